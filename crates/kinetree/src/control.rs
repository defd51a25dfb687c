//! Proportional-derivative tracking of a reference configuration trajectory.
//!
//! Position errors live in velocity coordinates: plain differences for
//! Euclidean joints, and the body-frame displacement between the current and
//! reference joint transforms (projected onto the motion subspace) for joints
//! whose coordinates live on a manifold.

use kinetree_math::{DMat, DVec, SpatialVec};
use kinetree_model::error::check_len;
use kinetree_model::{KinetreeError, Result, State, System};
use kinetree_rigid::inverse_dynamics;

/// Displacement from `q` to `q_ref` in velocity coordinates (`qd_size` entries).
///
/// Advancing `q` by the returned vector over unit time reaches `q_ref` to
/// first order. Quaternion blocks take the shorter of the two equivalent
/// rotations.
pub fn configuration_error(system: &System, q: &DVec, q_ref: &DVec) -> Result<DVec> {
    system.check_q(q)?;
    check_len("reference q", system.q_size(), q_ref.len())?;
    let mut out = DVec::zeros(system.qd_size());
    for i in 0..system.num_links() {
        let (qr, qdr) = (system.q_range(i), system.qd_range(i));
        let (qb, qb_ref) = (&q.as_slice()[qr.clone()], &q_ref.as_slice()[qr]);
        let model = system.joint_model(i);
        let block = &mut out.as_mut_slice()[qdr];
        if model.q_width == model.qd_width {
            for ((e, &a), &b) in block.iter_mut().zip(qb).zip(qb_ref) {
                *e = b - a;
            }
            continue;
        }

        let params = system.joint_params(i);
        let x = model.joint_transform(qb, params);
        let x_ref = model.joint_transform(qb_ref, params);
        let mut rel = x_ref.rot.mul(&x.rot.conjugate());
        if rel.w < 0.0 {
            rel.w = -rel.w;
            rel.v = -rel.v;
        }
        let xi = SpatialVec::new(-rel.log(), x.rot.rotate(&(x_ref.pos - x.pos)));

        // Least squares on the motion subspace: (SᵀS) e = Sᵀ xi.
        let cols = model.motion_subspace(qb, params);
        let n = cols.len();
        let gram = DMat::from_fn(n, n, |a, b| cols[a].dot(&cols[b]));
        let rhs = DVec::from_iterator(n, cols.iter().map(|s| s.dot(&xi)));
        let chol = gram.cholesky().ok_or_else(|| {
            KinetreeError::InvalidJointModel(format!(
                "joint type `{}` has a rank-deficient motion subspace",
                system.link_type(i)
            ))
        })?;
        block.copy_from_slice(chol.solve(&rhs).as_slice());
    }
    Ok(out)
}

/// Reference velocities for a `T × q_size` reference trajectory sampled at `dt`.
///
/// Row `k` is the displacement from row `k` to row `k + 1` divided by `dt`;
/// the last row repeats the previous one and a single sample reads zero.
pub fn reference_velocity(system: &System, q_ref: &DMat, dt: f64) -> Result<DMat> {
    check_len("reference columns", system.q_size(), q_ref.ncols())?;
    let t = q_ref.nrows();
    let mut qd_ref = DMat::zeros(t, system.qd_size());
    for k in 0..t.saturating_sub(1) {
        let a = q_ref.row(k).transpose();
        let b = q_ref.row(k + 1).transpose();
        let e = configuration_error(system, &a, &b)? / dt;
        qd_ref.set_row(k, &e.transpose());
    }
    if t >= 2 {
        let last = qd_ref.row(t - 2).into_owned();
        qd_ref.set_row(t - 1, &last);
    }
    Ok(qd_ref)
}

/// PD controller with per-velocity-coordinate gains.
#[derive(Debug, Clone, PartialEq)]
pub struct PdController {
    p_gains: DVec,
    d_gains: DVec,
    compensate_bias: bool,
}

impl PdController {
    pub fn new(p_gains: DVec, d_gains: DVec) -> Result<Self> {
        check_len("d gains", p_gains.len(), d_gains.len())?;
        Ok(Self {
            p_gains,
            d_gains,
            compensate_bias: false,
        })
    }

    /// Same gains on every velocity coordinate of `system`.
    pub fn uniform(system: &System, p: f64, d: f64) -> Self {
        Self {
            p_gains: DVec::from_element(system.qd_size(), p),
            d_gains: DVec::from_element(system.qd_size(), d),
            compensate_bias: false,
        }
    }

    /// Add the bias forces `ID(q, qd, 0)` (gravity, Coriolis, damping) as feedforward.
    pub fn with_bias_compensation(mut self, enabled: bool) -> Self {
        self.compensate_bias = enabled;
        self
    }

    /// Generalized forces driving `state` towards `(q_ref, qd_ref)`.
    pub fn control(
        &self,
        system: &System,
        state: &State,
        q_ref: &DVec,
        qd_ref: &DVec,
    ) -> Result<DVec> {
        check_len("p gains", system.qd_size(), self.p_gains.len())?;
        check_len("reference qd", system.qd_size(), qd_ref.len())?;
        let error = configuration_error(system, &state.q, q_ref)?;
        let mut tau = self.p_gains.component_mul(&error)
            + self.d_gains.component_mul(&(qd_ref - &state.qd));
        if self.compensate_bias {
            tau += inverse_dynamics(system, &state.q, &state.qd, &DVec::zeros(system.qd_size()))?;
        }
        Ok(tau)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kinetree_math::{Quat, Transform, Vec3};
    use kinetree_model::SystemBuilder;

    #[test]
    fn test_hinge_error_is_difference() {
        let sys = SystemBuilder::new()
            .add_link("a", -1, "rx", Transform::identity())
            .add_link("b", 0, "px", Transform::identity())
            .build()
            .unwrap();
        let e = configuration_error(
            &sys,
            &DVec::from_vec(vec![0.2, 1.0]),
            &DVec::from_vec(vec![3.5, -0.5]),
        )
        .unwrap();
        assert_relative_eq!(e, DVec::from_vec(vec![3.3, -1.5]), epsilon = 1e-12);
    }

    #[test]
    fn test_spherical_error_matches_hinge_angle() {
        let sys = SystemBuilder::new()
            .add_link("ball", -1, "spherical", Transform::identity())
            .build()
            .unwrap();
        let q = sys.neutral_q();
        // Same rotation as an rz joint at 0.3, once per quaternion sign.
        let rot = Quat::from_axis_angle(&Vec3::z(), -0.3);
        for sign in [1.0, -1.0] {
            let q_ref = DVec::from_iterator(4, rot.to_array().iter().map(|x| x * sign));
            let e = configuration_error(&sys, &q, &q_ref).unwrap();
            assert_relative_eq!(e, DVec::from_vec(vec![0.0, 0.0, 0.3]), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_free_error_is_body_frame_displacement() {
        let sys = SystemBuilder::new()
            .add_link("body", -1, "free", Transform::identity())
            .build()
            .unwrap();
        // Body turned +90° about z: world y is body x.
        let rot = Quat::from_axis_angle(&Vec3::z(), -std::f64::consts::FRAC_PI_2);
        let mut q = DVec::zeros(7);
        q.as_mut_slice()[..4].copy_from_slice(&rot.to_array());
        let mut q_ref = q.clone();
        q_ref[5] = 0.4;
        let e = configuration_error(&sys, &q, &q_ref).unwrap();
        assert_relative_eq!(e, DVec::from_vec(vec![0.0, 0.0, 0.0, 0.4, 0.0, 0.0]), epsilon = 1e-12);
    }

    #[test]
    fn test_reference_velocity() {
        let sys = SystemBuilder::new()
            .add_link("a", -1, "ry", Transform::identity())
            .build()
            .unwrap();
        let q_ref = DMat::from_column_slice(4, 1, &[0.0, 0.1, 0.3, 0.6]);
        let qd_ref = reference_velocity(&sys, &q_ref, 0.1).unwrap();
        assert_relative_eq!(
            qd_ref,
            DMat::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 3.0]),
            epsilon = 1e-12
        );
        assert_eq!(reference_velocity(&sys, &DMat::zeros(1, 1), 0.1).unwrap(), DMat::zeros(1, 1));
        assert!(reference_velocity(&sys, &DMat::zeros(3, 2), 0.1).is_err());
    }

    #[test]
    fn test_gain_lengths_are_checked() {
        let sys = SystemBuilder::new()
            .add_link("a", -1, "ry", Transform::identity())
            .build()
            .unwrap();
        assert!(PdController::new(DVec::zeros(2), DVec::zeros(1)).is_err());
        let wide = PdController::new(DVec::zeros(2), DVec::zeros(2)).unwrap();
        let state = State::new(&sys);
        assert!(matches!(
            wide.control(&sys, &state, &DVec::zeros(1), &DVec::zeros(1)),
            Err(KinetreeError::DimensionMismatch { what: "p gains", .. })
        ));
    }
}
