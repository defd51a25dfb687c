//! Recursive Newton-Euler Algorithm (RNEA): inverse dynamics.
//!
//! Given (q, qd, qdd), compute the required generalized forces tau.

use kinetree_math::{DVec, SpatialVec, Transform, Vec3};
use kinetree_model::{Result, System};

use crate::kinematics::{joint_motion, local_transforms};
use crate::scan::{scan_forward, scan_reverse};

struct LinkMotion {
    local: Transform,
    v_joint: SpatialVec,
    a_joint: SpatialVec,
}

/// Body-frame spatial velocity and acceleration of every link.
///
/// Gravity enters as a fictitious upward acceleration of the world, so the
/// accelerations include `-gravity`.
fn propagate_motion(
    system: &System,
    locals: Vec<Transform>,
    q: &DVec,
    qd: &DVec,
    qdd: &DVec,
) -> Result<Vec<(SpatialVec, SpatialVec)>> {
    let args: Vec<LinkMotion> = locals
        .into_iter()
        .enumerate()
        .map(|(i, local)| {
            let q_i = &q.as_slice()[system.q_range(i)];
            LinkMotion {
                local,
                v_joint: joint_motion(system, i, q_i, &qd.as_slice()[system.qd_range(i)]),
                a_joint: joint_motion(system, i, q_i, &qdd.as_slice()[system.qd_range(i)]),
            }
        })
        .collect();

    let a0 = SpatialVec::new(Vec3::zeros(), -system.gravity());
    scan_forward(
        system,
        (SpatialVec::zero(), a0),
        &args,
        |(v_parent, a_parent), _, m| {
            let v = m.local.apply_motion(&v_parent) + m.v_joint;
            let a = m.local.apply_motion(&a_parent) + m.a_joint + v.cross_motion(&m.v_joint);
            (v, a)
        },
    )
}

/// Compute inverse dynamics: generalized forces producing `qdd` at `(q, qd)`.
///
/// Includes gravity, Coriolis/centrifugal terms, `damping * qd` and `armature * qdd`.
pub fn inverse_dynamics(system: &System, q: &DVec, qd: &DVec, qdd: &DVec) -> Result<DVec> {
    system.check_qd(qd)?;
    system.check_qd(qdd)?;
    let locals = local_transforms(system, q)?;
    let motion = propagate_motion(system, locals.clone(), q, qd, qdd)?;

    let mut tau = DVec::zeros(system.qd_size());
    scan_reverse(system, SpatialVec::zero(), &locals, |children, i, local| {
        let inertia = &system.link(i).inertia;
        let (v, a) = &motion[i];
        let f = inertia.mul_motion(a) + v.cross_force(&inertia.mul_motion(v)) + children;

        let q_i = &q.as_slice()[system.q_range(i)];
        let f_joint = system.link(i).transform2.inv_apply_force(&f);
        let tau_i = system
            .joint_model(i)
            .joint_tau(&f_joint, q_i, system.joint_params(i));
        for (k, t) in system.qd_range(i).zip(tau_i) {
            tau[k] = t;
        }

        local.inv_apply_force(&f)
    })?;

    tau += system.damping().component_mul(qd) + system.armature().component_mul(qdd);
    Ok(tau)
}
