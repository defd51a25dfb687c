//! Forward dynamics and time stepping.
//!
//! Forward dynamics is the composition of [`compute_mass_matrix`] and
//! [`inverse_dynamics`]: `M(q) qdd = tau - ID(q, qd, 0)`.

use kinetree_math::{DMat, DVec};
use kinetree_model::error::check_len;
use kinetree_model::{IntegrationMethod, KinetreeError, Result, State, System};

use crate::crba::compute_mass_matrix;
use crate::kinematics::{coordinate_rate, forward_kinematics_transforms, integrate_q, normalize_q};
use crate::rnea::inverse_dynamics;

/// Generalized forces not produced by `qdd`: gravity, Coriolis and damping.
fn bias_forces(system: &System, q: &DVec, qd: &DVec) -> Result<DVec> {
    inverse_dynamics(system, q, qd, &DVec::zeros(system.qd_size()))
}

fn exact_inverse(mass_matrix: DMat) -> Result<DMat> {
    match mass_matrix.cholesky() {
        Some(chol) => Ok(chol.inverse()),
        None => {
            tracing::warn!("mass matrix is not positive definite");
            Err(KinetreeError::SingularMassMatrix)
        }
    }
}

/// `‖I - M X‖` in the Frobenius norm.
fn inverse_residual(mass_matrix: &DMat, inv: &DMat) -> f64 {
    let n = mass_matrix.nrows();
    (DMat::identity(n, n) - mass_matrix * inv).norm()
}

/// Inverse of `mass_matrix`, refined from `prev_inv` by `iters` Newton–Schulz
/// steps `X' = X (2I - M X)`.
///
/// A refinement is kept only if it lowers the residual. With `iters == 0`, or
/// when `prev_inv` is not a contraction for this matrix, the inverse is computed
/// exactly.
fn refine_inverse(mass_matrix: DMat, prev_inv: &DMat, iters: usize) -> Result<DMat> {
    let n = mass_matrix.nrows();
    if iters == 0 || prev_inv.shape() != (n, n) {
        return exact_inverse(mass_matrix);
    }
    let mut residual = inverse_residual(&mass_matrix, prev_inv);
    if !(residual < 1.0) {
        return exact_inverse(mass_matrix);
    }

    let two_i = DMat::identity(n, n) * 2.0;
    let mut inv = prev_inv.clone();
    for _ in 0..iters {
        let candidate = &inv * (&two_i - &mass_matrix * &inv);
        let candidate_residual = inverse_residual(&mass_matrix, &candidate);
        if candidate_residual >= residual {
            break;
        }
        inv = candidate;
        residual = candidate_residual;
    }
    tracing::trace!(iters, residual, "refined inverse mass matrix");
    Ok(inv)
}

/// Compute forward dynamics: accelerations `qdd` produced by `tau` at `(q, qd)`.
pub fn forward_dynamics(system: &System, q: &DVec, qd: &DVec, tau: &DVec) -> Result<DVec> {
    check_len("tau", system.qd_size(), tau.len())?;
    let mass_matrix = compute_mass_matrix(system, q)?;
    let rhs = tau - bias_forces(system, q, qd)?;
    match mass_matrix.cholesky() {
        Some(chol) => Ok(chol.solve(&rhs)),
        None => {
            tracing::warn!("mass matrix is not positive definite");
            Err(KinetreeError::SingularMassMatrix)
        }
    }
}

/// Forward dynamics that also returns the inverse mass matrix, reusing
/// `prev_inv` as the starting point when the system asks for iterative
/// refinement (`mass_mat_iters > 0`).
pub fn forward_dynamics_cached(
    system: &System,
    q: &DVec,
    qd: &DVec,
    tau: &DVec,
    prev_inv: &DMat,
) -> Result<(DVec, DMat)> {
    check_len("tau", system.qd_size(), tau.len())?;
    let mass_matrix = compute_mass_matrix(system, q)?;
    let rhs = tau - bias_forces(system, q, qd)?;
    let inv = refine_inverse(mass_matrix, prev_inv, system.mass_mat_iters())?;
    Ok((&inv * rhs, inv))
}

/// Advance `state` by one timestep using the system's integration method.
pub fn step(system: &System, state: &State, tau: &DVec) -> Result<State> {
    match system.integration_method() {
        IntegrationMethod::SemiImplicitEuler => step_semi_implicit_euler(system, state, tau),
        IntegrationMethod::Rk4 => step_rk4(system, state, tau),
    }
}

fn prepare(system: &System, state: &State, tau: &DVec) -> Result<Option<System>> {
    system.check_q(&state.q)?;
    system.check_qd(&state.qd)?;
    check_len("tau", system.qd_size(), tau.len())?;
    Ok(system.dynamic_geometries().then(|| system.recompute_inertias()))
}

fn finish(system: &System, q: DVec, qd: DVec, mass_mat_inv: DMat, time: f64) -> Result<State> {
    if !(q.iter().all(|x| x.is_finite()) && qd.iter().all(|x| x.is_finite())) {
        tracing::warn!(time, "non-finite state after step");
    }
    let x = forward_kinematics_transforms(system, &q)?;
    Ok(State {
        q,
        qd,
        x,
        mass_mat_inv,
        time,
    })
}

/// Semi-implicit Euler: update `qd` with `qdd * dt` first, then `q` with the new `qd`.
pub fn step_semi_implicit_euler(system: &System, state: &State, tau: &DVec) -> Result<State> {
    let updated = prepare(system, state, tau)?;
    let system = updated.as_ref().unwrap_or(system);
    let dt = system.dt();

    let (qdd, inv) =
        forward_dynamics_cached(system, &state.q, &state.qd, tau, &state.mass_mat_inv)?;
    let qd = &state.qd + qdd * dt;
    let q = integrate_q(system, &state.q, &qd, dt)?;
    finish(system, q, qd, inv, state.time + dt)
}

/// Classical fourth-order Runge–Kutta on `(q, qd)`.
///
/// Stage derivatives of `q` are coordinate rates (see [`coordinate_rate`]),
/// so quaternion and free-joint blocks are combined in one common frame. The
/// result is projected back onto unit quaternions once at the end.
pub fn step_rk4(system: &System, state: &State, tau: &DVec) -> Result<State> {
    let updated = prepare(system, state, tau)?;
    let system = updated.as_ref().unwrap_or(system);
    let dt = system.dt();
    let (q, qd) = (&state.q, &state.qd);

    // k1
    let (a1, inv) = forward_dynamics_cached(system, q, qd, tau, &state.mass_mat_inv)?;
    let r1 = coordinate_rate(system, q, qd)?;

    // k2
    let q2 = q + &r1 * (dt / 2.0);
    let qd2 = qd + &a1 * (dt / 2.0);
    let a2 = forward_dynamics(system, &q2, &qd2, tau)?;
    let r2 = coordinate_rate(system, &q2, &qd2)?;

    // k3
    let q3 = q + &r2 * (dt / 2.0);
    let qd3 = qd + &a2 * (dt / 2.0);
    let a3 = forward_dynamics(system, &q3, &qd3, tau)?;
    let r3 = coordinate_rate(system, &q3, &qd3)?;

    // k4
    let q4 = q + &r3 * dt;
    let qd4 = qd + &a3 * dt;
    let a4 = forward_dynamics(system, &q4, &qd4, tau)?;
    let r4 = coordinate_rate(system, &q4, &qd4)?;

    // Combine
    let rate_mean = (r1 + r2 * 2.0 + r3 * 2.0 + r4) / 6.0;
    let qdd_mean = (a1 + a2 * 2.0 + a3 * 2.0 + a4) / 6.0;
    let q_next = normalize_q(system, &(q + rate_mean * dt))?;
    let qd_next = qd + qdd_mean * dt;
    finish(system, q_next, qd_next, inv, state.time + dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kinetree_math::{GRAVITY, Inertia, Mat3, Transform, Vec3};
    use kinetree_model::{Geometry, SystemBuilder};

    fn pendulum() -> System {
        SystemBuilder::new()
            .add_link("rod", -1, "rx", Transform::identity())
            .inertia(Inertia::from_com(
                1.0,
                Vec3::new(0.0, 0.0, -0.5),
                Mat3::from_diagonal(&Vec3::new(1.0 / 12.0, 1.0 / 12.0, 0.0)),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_pendulum_acceleration() {
        let sys = pendulum();
        let angle: f64 = 0.3;
        let qdd = forward_dynamics(
            &sys,
            &DVec::from_element(1, angle),
            &DVec::zeros(1),
            &DVec::zeros(1),
        )
        .unwrap();
        // qdd = -m g d sin / I_pivot = -(g / 2) sin / (1/3).
        assert_relative_eq!(qdd[0], -1.5 * GRAVITY * angle.sin(), epsilon = 1e-10);
    }

    #[test]
    fn test_massless_link_is_singular() {
        let sys = SystemBuilder::new()
            .add_link("ghost", -1, "ry", Transform::identity())
            .build()
            .unwrap();
        assert!(matches!(
            forward_dynamics(&sys, &DVec::zeros(1), &DVec::zeros(1), &DVec::zeros(1)),
            Err(KinetreeError::SingularMassMatrix)
        ));
    }

    #[test]
    fn test_tau_length_is_checked() {
        let sys = pendulum();
        assert!(matches!(
            forward_dynamics(&sys, &DVec::zeros(1), &DVec::zeros(1), &DVec::zeros(2)),
            Err(KinetreeError::DimensionMismatch { what: "tau", .. })
        ));
    }

    #[test]
    fn test_step_at_rest_without_forcing_is_idempotent() {
        let sys = SystemBuilder::new()
            .gravity(Vec3::zeros())
            .add_link("base", -1, "free", Transform::identity())
            .geometry(Geometry::sphere(1.0, Vec3::zeros(), 0.2))
            .add_link("arm", 0, "ry", Transform::from_translation(Vec3::x()))
            .geometry(Geometry::cylinder(0.5, Vec3::new(0.3, 0.0, 0.0), 0.05, 0.6))
            .build()
            .unwrap();
        for sys in [sys.clone(), sys.with_integration_method(IntegrationMethod::Rk4)] {
            let mut state = State::new(&sys);
            let tau = DVec::zeros(sys.qd_size());
            for _ in 0..50 {
                state = step(&sys, &state, &tau).unwrap();
            }
            assert_eq!(state.q, sys.neutral_q());
            assert_eq!(state.qd, DVec::zeros(sys.qd_size()));
            assert_relative_eq!(state.time, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_semi_implicit_order() {
        // Free fall of a slider: qd first, then q with the new qd.
        let sys = SystemBuilder::new()
            .dt(0.1)
            .add_link("mass", -1, "pz", Transform::identity())
            .geometry(Geometry::sphere(1.0, Vec3::zeros(), 0.1))
            .build()
            .unwrap();
        let state = step(&sys, &State::new(&sys), &DVec::zeros(1)).unwrap();
        assert_relative_eq!(state.qd[0], -GRAVITY * 0.1, epsilon = 1e-12);
        assert_relative_eq!(state.q[0], -GRAVITY * 0.01, epsilon = 1e-12);
        assert_relative_eq!(state.x[0].pos.z, state.q[0], epsilon = 1e-12);
    }

    /// Free base carrying a ball-jointed rod, both with asymmetric inertia.
    fn tumbling_pair(dt: f64) -> System {
        SystemBuilder::new()
            .dt(dt)
            .integration_method(IntegrationMethod::Rk4)
            .add_link("base", -1, "free", Transform::identity())
            .geometry(Geometry::cuboid(1.5, Vec3::new(0.02, 0.0, -0.01), 0.4, 0.2, 0.1))
            .add_link("rod", 0, "spherical", Transform::from_translation(Vec3::new(0.2, 0.05, 0.0)))
            .transform2(Transform::from_rotation(kinetree_math::Quat::from_euler_xyz(0.3, -0.2, 0.5)))
            .geometry(Geometry::cuboid(0.6, Vec3::new(0.15, 0.0, 0.0), 0.3, 0.06, 0.03))
            .build()
            .unwrap()
    }

    fn tumble(dt: f64, steps: usize) -> DVec {
        let sys = tumbling_pair(dt);
        let mut q = sys.neutral_q();
        q.as_mut_slice()[..4]
            .copy_from_slice(&kinetree_math::Quat::from_euler_xyz(0.2, 0.4, -0.1).to_array());
        let qd = DVec::from_vec(vec![1.5, -2.0, 3.0, 0.4, -0.3, 1.0, -2.5, 1.2, 2.0]);
        let mut state = State::create(&sys, q, Some(qd)).unwrap();
        let tau = DVec::zeros(sys.qd_size());
        for _ in 0..steps {
            state = step(&sys, &state, &tau).unwrap();
        }
        state.q
    }

    #[test]
    fn test_rk4_is_fourth_order_with_quaternion_joints() {
        // Same final time, halving dt must cut the error by about 2^4.
        let reference = tumble(0.0025, 160);
        let coarse = (tumble(0.04, 10) - &reference).norm();
        let fine = (tumble(0.02, 20) - &reference).norm();
        assert!(fine > 0.0 && coarse / fine > 8.0, "coarse {coarse:e}, fine {fine:e}");

        let q = tumble(0.02, 20);
        for i in [0, 1] {
            let r = tumbling_pair(0.02).q_range(i);
            assert_relative_eq!(q.rows(r.start, 4).norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_damping_slows_motion() {
        let sys = SystemBuilder::new()
            .gravity(Vec3::zeros())
            .add_link("wheel", -1, "rz", Transform::identity())
            .geometry(Geometry::cylinder(1.0, Vec3::zeros(), 0.2, 0.05))
            .damping(vec![0.05])
            .build()
            .unwrap();
        let mut state = State::new(&sys);
        state.qd[0] = 5.0;
        let tau = DVec::zeros(1);
        let mut prev = state.qd[0];
        for _ in 0..20 {
            state = step(&sys, &state, &tau).unwrap();
            assert!(state.qd[0] < prev && state.qd[0] > 0.0);
            prev = state.qd[0];
        }
    }

    #[test]
    fn test_cached_inverse_refinement() {
        let sys = pendulum().with_mass_mat_iters(3);
        let q = DVec::from_element(1, 0.2);
        let exact = compute_mass_matrix(&sys, &q).unwrap();
        let exact_inv = exact_inverse(exact.clone()).unwrap();

        // Close starting guess converges onto the exact inverse.
        let guess = &exact_inv * 1.05;
        let (qdd, inv) =
            forward_dynamics_cached(&sys, &q, &DVec::zeros(1), &DVec::zeros(1), &guess).unwrap();
        assert_relative_eq!(inv[(0, 0)], exact_inv[(0, 0)], epsilon = 1e-8);
        let reference = forward_dynamics(&sys, &q, &DVec::zeros(1), &DVec::zeros(1)).unwrap();
        assert_relative_eq!(qdd[0], reference[0], epsilon = 1e-6);

        // A useless guess falls back to the exact inverse.
        let (_, inv) = forward_dynamics_cached(
            &sys,
            &q,
            &DVec::zeros(1),
            &DVec::zeros(1),
            &(DMat::identity(1, 1) * 10.0),
        )
        .unwrap();
        assert_relative_eq!(inv[(0, 0)], exact_inv[(0, 0)], epsilon = 1e-12);
    }

    #[test]
    fn test_dynamic_geometries_rederives_inertia() {
        let sys = SystemBuilder::new()
            .dt(0.1)
            .dynamic_geometries(true)
            .add_link("mass", -1, "pz", Transform::identity())
            .geometry(Geometry::sphere(1.0, Vec3::zeros(), 0.1))
            .build()
            .unwrap()
            .with_inertia(0, Inertia::zero())
            .unwrap();
        // The zeroed inertia would be singular; the step re-derives it from the sphere.
        let state = step(&sys, &State::new(&sys), &DVec::zeros(1)).unwrap();
        assert_relative_eq!(state.qd[0], -GRAVITY * 0.1, epsilon = 1e-12);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use kinetree_math::{Transform, Vec3};
    use kinetree_model::{Geometry, SystemBuilder};
    use proptest::prelude::*;

    fn arm() -> System {
        let seg = |m: f64| Geometry::capsule(m, Vec3::new(0.25, 0.0, 0.0), 0.05, 0.4);
        SystemBuilder::new()
            .add_link("base", -1, "free", Transform::identity())
            .geometry(Geometry::cuboid(2.0, Vec3::zeros(), 0.3, 0.2, 0.1))
            .add_link("shoulder", 0, "spherical", Transform::from_translation(Vec3::x() * 0.15))
            .geometry(seg(1.0))
            .add_link("elbow", 1, "rz", Transform::from_translation(Vec3::x() * 0.5))
            .geometry(seg(0.7))
            .damping(vec![0.2])
            .armature(vec![0.01])
            .add_link("wrist", 2, "py", Transform::from_translation(Vec3::x() * 0.5))
            .geometry(seg(0.3))
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn forward_dynamics_inverts_inverse_dynamics(
            rot in prop::array::uniform4(-1.0..1.0_f64),
            rest in prop::collection::vec(-1.5..1.5_f64, 8),
            qd in prop::collection::vec(-2.0..2.0_f64, 11),
            qdd in prop::collection::vec(-5.0..5.0_f64, 11),
        ) {
            prop_assume!(rot.iter().map(|x| x * x).sum::<f64>() > 0.1);
            let sys = arm();
            let mut q = vec![rot[0], rot[1], rot[2], rot[3]];
            q.extend_from_slice(&rest[..3]);
            q.push(1.0);
            q.extend_from_slice(&rest[3..]);
            let q = DVec::from_vec(q);
            prop_assert_eq!(q.len(), sys.q_size());
            let qd = DVec::from_vec(qd);
            let qdd = DVec::from_vec(qdd);

            let tau = inverse_dynamics(&sys, &q, &qd, &qdd).unwrap();
            let back = forward_dynamics(&sys, &q, &qd, &tau).unwrap();
            prop_assert!((back - &qdd).norm() < 1e-6 * (1.0 + qdd.norm()));
        }
    }
}
