//! End-effector inverse kinematics.
//!
//! Damped least squares (Levenberg–Marquardt) on the pose error of one link.
//! The Jacobian is taken by central differences through the joint integrators,
//! so quaternion coordinates are perturbed on their manifold.

use kinetree_math::{DMat, DVec, Quat, Transform};
use kinetree_model::{KinetreeError, Result, System};
use serde::{Deserialize, Serialize};

use crate::kinematics::{forward_kinematics_transforms, integrate_q};

/// Iteration budget, tolerances and weights of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkOptions {
    pub max_iters: usize,
    /// Position tolerance in meters.
    pub pos_tol: f64,
    /// Orientation tolerance in radians.
    pub rot_tol: f64,
    /// Initial Levenberg–Marquardt damping.
    pub damping: f64,
    /// Step of the central-difference Jacobian.
    pub fd_step: f64,
    pub pos_weight: f64,
    pub rot_weight: f64,
}

impl Default for IkOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            pos_tol: 1e-6,
            rot_tol: 1e-4,
            damping: 1e-3,
            fd_step: 1e-6,
            pos_weight: 1.0,
            rot_weight: 1.0,
        }
    }
}

/// Converged joint configuration and its residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct IkSolution {
    pub q: DVec,
    pub iterations: usize,
    pub pos_error: f64,
    pub rot_error: f64,
}

const MAX_DAMPING: f64 = 1e12;

struct Residual {
    weighted: DVec,
    pos_error: f64,
    rot_error: f64,
}

impl Residual {
    fn converged(&self, options: &IkOptions) -> bool {
        self.pos_error <= options.pos_tol && self.rot_error <= options.rot_tol
    }

    fn cost(&self) -> f64 {
        self.weighted.norm_squared()
    }
}

fn residual(
    system: &System,
    endeffector: usize,
    target: &Transform,
    q: &DVec,
    options: &IkOptions,
) -> Result<Residual> {
    let xs = forward_kinematics_transforms(system, q)?;
    let x = &xs[endeffector];

    let diff = x.rot.mul(&target.rot.conjugate());
    // q and -q are the same rotation; take the short way round.
    let diff = if diff.w < 0.0 {
        Quat { w: -diff.w, v: -diff.v }
    } else {
        diff
    };
    let rot = diff.log();
    let pos = x.pos - target.pos;

    let mut weighted = DVec::zeros(6);
    weighted.rows_mut(0, 3).copy_from(&(rot * options.rot_weight));
    weighted.rows_mut(3, 3).copy_from(&(pos * options.pos_weight));
    Ok(Residual {
        weighted,
        pos_error: pos.norm(),
        rot_error: rot.norm(),
    })
}

/// Velocity indices of the joints between the root and `endeffector`.
fn chain_columns(system: &System, endeffector: usize) -> Vec<usize> {
    let mut columns = Vec::new();
    let mut link = Some(endeffector);
    while let Some(i) = link {
        columns.extend(system.qd_range(i));
        link = system.parent(i);
    }
    columns
}

fn jacobian(
    system: &System,
    endeffector: usize,
    target: &Transform,
    q: &DVec,
    columns: &[usize],
    options: &IkOptions,
) -> Result<DMat> {
    let h = options.fd_step;
    let mut jac = DMat::zeros(6, system.qd_size());
    for &k in columns {
        let mut dir = DVec::zeros(system.qd_size());
        dir[k] = 1.0;
        let plus = residual(system, endeffector, target, &integrate_q(system, q, &dir, h)?, options)?;
        let minus = residual(system, endeffector, target, &integrate_q(system, q, &dir, -h)?, options)?;
        jac.set_column(k, &((plus.weighted - minus.weighted) / (2.0 * h)));
    }
    Ok(jac)
}

/// Solve for `q` placing link `endeffector` at the world transform `target`,
/// starting from `q0`.
///
/// Fails with `ConvergenceFailure` when the iteration budget runs out or the
/// damping saturates before both tolerances are met; the error carries the
/// best residuals reached.
pub fn inverse_kinematics_endeffector(
    system: &System,
    endeffector: usize,
    target: &Transform,
    q0: &DVec,
    options: &IkOptions,
) -> Result<IkSolution> {
    system.check_q(q0)?;
    if endeffector >= system.num_links() {
        return Err(KinetreeError::InvalidTopology(format!(
            "end-effector index {endeffector} out of range for {} links",
            system.num_links()
        )));
    }

    let n = system.qd_size();
    let columns = chain_columns(system, endeffector);
    let mut q = q0.clone();
    let mut current = residual(system, endeffector, target, &q, options)?;
    let mut lambda = options.damping;
    let mut iterations = 0;

    while iterations < options.max_iters && !current.converged(options) {
        iterations += 1;
        let jac = jacobian(system, endeffector, target, &q, &columns, options)?;
        let jt = jac.transpose();
        let lhs = &jt * &jac + DMat::identity(n, n) * lambda;
        let Some(chol) = lhs.cholesky() else {
            lambda *= 10.0;
            continue;
        };
        let delta = -chol.solve(&(&jt * &current.weighted));

        let candidate_q = integrate_q(system, &q, &delta, 1.0)?;
        let candidate = residual(system, endeffector, target, &candidate_q, options)?;
        if candidate.cost() < current.cost() {
            q = candidate_q;
            current = candidate;
            lambda = (lambda / 10.0).max(1e-12);
        } else {
            lambda *= 10.0;
            if lambda > MAX_DAMPING {
                break;
            }
        }
    }

    if current.converged(options) {
        tracing::debug!(
            iterations,
            pos_error = current.pos_error,
            rot_error = current.rot_error,
            "inverse kinematics converged"
        );
        Ok(IkSolution {
            q,
            iterations,
            pos_error: current.pos_error,
            rot_error: current.rot_error,
        })
    } else {
        tracing::warn!(
            iterations,
            pos_error = current.pos_error,
            rot_error = current.rot_error,
            "inverse kinematics did not converge"
        );
        Err(KinetreeError::ConvergenceFailure {
            iterations,
            pos_error: current.pos_error,
            rot_error: current.rot_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kinetree_math::Vec3;
    use kinetree_model::SystemBuilder;

    /// Planar arm: two z hinges with unit links and a frozen tip.
    fn planar_arm() -> System {
        SystemBuilder::new()
            .add_link("upper", -1, "rz", Transform::identity())
            .add_link("lower", 0, "rz", Transform::from_translation(Vec3::x()))
            .add_link("tip", 1, "frozen", Transform::from_translation(Vec3::x()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_reaches_target_of_known_configuration() {
        let sys = planar_arm();
        let q_true = DVec::from_vec(vec![0.4, 0.7]);
        let target = forward_kinematics_transforms(&sys, &q_true).unwrap()[2];

        let options = IkOptions::default();
        let sol = inverse_kinematics_endeffector(
            &sys,
            2,
            &target,
            &DVec::from_vec(vec![0.1, 0.2]),
            &options,
        )
        .unwrap();
        assert!(sol.iterations <= options.max_iters);
        assert!(sol.pos_error <= 1e-6);
        assert!(sol.rot_error <= 1e-4);

        let reached = forward_kinematics_transforms(&sys, &sol.q).unwrap()[2];
        assert_relative_eq!(reached.pos, target.pos, epsilon = 1e-6);
    }

    #[test]
    fn test_position_only_target() {
        let sys = planar_arm();
        let target = Transform::from_translation(Vec3::new(0.5, 1.2, 0.0));
        let options = IkOptions {
            rot_weight: 0.0,
            rot_tol: f64::INFINITY,
            ..IkOptions::default()
        };
        let sol =
            inverse_kinematics_endeffector(&sys, 2, &target, &DVec::from_vec(vec![0.3, 0.3]), &options)
                .unwrap();
        assert!(sol.pos_error <= 1e-6);
    }

    #[test]
    fn test_unreachable_target_fails() {
        let sys = planar_arm();
        let target = Transform::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let result = inverse_kinematics_endeffector(
            &sys,
            2,
            &target,
            &DVec::from_vec(vec![0.3, -0.2]),
            &IkOptions::default(),
        );
        match result {
            Err(KinetreeError::ConvergenceFailure { pos_error, .. }) => {
                assert!(pos_error > 2.9, "pos_error = {pos_error}");
            }
            other => panic!("expected ConvergenceFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_endeffector_index_is_checked() {
        let sys = planar_arm();
        assert!(matches!(
            inverse_kinematics_endeffector(
                &sys,
                3,
                &Transform::identity(),
                &DVec::zeros(2),
                &IkOptions::default()
            ),
            Err(KinetreeError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: IkOptions = serde_json::from_str(r#"{"max_iters": 10}"#).unwrap();
        assert_eq!(options.max_iters, 10);
        assert_eq!(options.pos_tol, 1e-6);
    }
}
