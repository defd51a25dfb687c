//! Forward kinematics: compute link transforms and velocities.

use kinetree_math::{DVec, SpatialVec, Transform};
use kinetree_model::{Result, System};

use crate::scan::scan_forward;

/// Transform from the parent frame of link `i` to its body frame:
/// `transform1`, then the joint, then `transform2`.
pub fn local_transform(system: &System, i: usize, q_block: &[f64]) -> Transform {
    let link = system.link(i);
    let joint = system
        .joint_model(i)
        .joint_transform(q_block, system.joint_params(i));
    link.transform2.compose(&joint.compose(&link.transform1))
}

/// Local transform of every link.
pub fn local_transforms(system: &System, q: &DVec) -> Result<Vec<Transform>> {
    system.check_q(q)?;
    Ok((0..system.num_links())
        .map(|i| local_transform(system, i, &q.as_slice()[system.q_range(i)]))
        .collect())
}

/// Motion subspace columns of link `i`, expressed in its body frame.
pub fn motion_subspace(system: &System, i: usize, q_block: &[f64]) -> Vec<SpatialVec> {
    let transform2 = &system.link(i).transform2;
    system
        .joint_model(i)
        .motion_subspace(q_block, system.joint_params(i))
        .iter()
        .map(|s| transform2.apply_motion(s))
        .collect()
}

/// `S qd` of link `i` in its body frame.
pub(crate) fn joint_motion(system: &System, i: usize, q_block: &[f64], qd_block: &[f64]) -> SpatialVec {
    motion_subspace(system, i, q_block)
        .iter()
        .zip(qd_block)
        .fold(SpatialVec::zero(), |acc, (s, &v)| acc + *s * v)
}

/// World-to-body transform of every link.
///
/// A root's world transform is its local transform; every other link composes
/// its local transform onto its parent's world transform.
pub fn forward_kinematics_transforms(system: &System, q: &DVec) -> Result<Vec<Transform>> {
    let locals = local_transforms(system, q)?;
    scan_forward(system, Transform::identity(), &locals, |parent, _, local| {
        local.compose(&parent)
    })
}

/// World transforms and body-frame spatial velocities of every link.
pub fn forward_kinematics(
    system: &System,
    q: &DVec,
    qd: &DVec,
) -> Result<(Vec<Transform>, Vec<SpatialVec>)> {
    system.check_qd(qd)?;
    let locals = local_transforms(system, q)?;
    let joint_vels: Vec<SpatialVec> = (0..system.num_links())
        .map(|i| {
            joint_motion(
                system,
                i,
                &q.as_slice()[system.q_range(i)],
                &qd.as_slice()[system.qd_range(i)],
            )
        })
        .collect();
    let args: Vec<(Transform, SpatialVec)> = locals.into_iter().zip(joint_vels).collect();

    let out = scan_forward(
        system,
        (Transform::identity(), SpatialVec::zero()),
        &args,
        |(x_parent, v_parent), _, (local, v_joint)| {
            (
                local.compose(&x_parent),
                local.apply_motion(&v_parent) + *v_joint,
            )
        },
    )?;
    Ok(out.into_iter().unzip())
}

/// Advance `q` by `qd` over `dt`, joint by joint, on each joint's coordinate manifold.
pub fn integrate_q(system: &System, q: &DVec, qd: &DVec, dt: f64) -> Result<DVec> {
    system.check_q(q)?;
    system.check_qd(qd)?;
    let mut out = q.clone();
    for i in 0..system.num_links() {
        let (qr, qdr) = (system.q_range(i), system.qd_range(i));
        system.joint_model(i).integrate_into(
            &q.as_slice()[qr.clone()],
            &qd.as_slice()[qdr],
            dt,
            &mut out.as_mut_slice()[qr],
        );
    }
    Ok(out)
}

/// Time derivative of `q` under `qd`, joint by joint.
///
/// Quaternion blocks get `d/dt rot` and free-joint positions get the body
/// velocity in world coordinates, so stage rates of a multistage integrator
/// can be summed in plain coordinates.
pub fn coordinate_rate(system: &System, q: &DVec, qd: &DVec) -> Result<DVec> {
    system.check_q(q)?;
    system.check_qd(qd)?;
    let mut out = DVec::zeros(q.len());
    for i in 0..system.num_links() {
        let (qr, qdr) = (system.q_range(i), system.qd_range(i));
        system.joint_model(i).rate_into(
            &q.as_slice()[qr.clone()],
            &qd.as_slice()[qdr],
            &mut out.as_mut_slice()[qr],
        );
    }
    Ok(out)
}

/// Project `q` back onto the joint manifolds (unit quaternion blocks).
pub fn normalize_q(system: &System, q: &DVec) -> Result<DVec> {
    integrate_q(system, q, &DVec::zeros(system.qd_size()), 0.0)
}
