//! Simulation state: per-trajectory data advanced by each step.

use kinetree_math::{DMat, DVec, Transform};

use crate::{Result, System};

/// Simulation state of one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Generalized coordinates.
    pub q: DVec,
    /// Generalized velocities.
    pub qd: DVec,
    /// World transform of every link, filled by each step.
    pub x: Vec<Transform>,
    /// Inverse mass matrix cached from the previous step.
    pub mass_mat_inv: DMat,
    /// Simulation time.
    pub time: f64,
}

impl State {
    /// State at rest in the neutral configuration.
    pub fn new(sys: &System) -> Self {
        Self {
            q: sys.neutral_q(),
            qd: DVec::zeros(sys.qd_size()),
            x: vec![Transform::identity(); sys.num_links()],
            mass_mat_inv: DMat::identity(sys.qd_size(), sys.qd_size()),
            time: 0.0,
        }
    }

    /// State at `q` with velocity `qd` (zero when `None`).
    pub fn create(sys: &System, q: DVec, qd: Option<DVec>) -> Result<Self> {
        sys.check_q(&q)?;
        let qd = qd.unwrap_or_else(|| DVec::zeros(sys.qd_size()));
        sys.check_qd(&qd)?;
        Ok(Self {
            q,
            qd,
            ..Self::new(sys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KinetreeError, SystemBuilder};

    #[test]
    fn test_create_checks_dimensions() {
        let sys = SystemBuilder::new()
            .add_link("a", -1, "rx", Transform::identity())
            .add_link("b", 0, "py", Transform::identity())
            .build()
            .unwrap();
        let state = State::create(&sys, DVec::from_vec(vec![0.1, 0.2]), None).unwrap();
        assert_eq!(state.qd, DVec::zeros(2));
        assert_eq!(state.x.len(), 2);

        assert!(matches!(
            State::create(&sys, DVec::zeros(3), None),
            Err(KinetreeError::DimensionMismatch { what: "q", .. })
        ));
        assert!(matches!(
            State::create(&sys, DVec::zeros(2), Some(DVec::zeros(1))),
            Err(KinetreeError::DimensionMismatch { what: "qd", .. })
        ));
    }
}
