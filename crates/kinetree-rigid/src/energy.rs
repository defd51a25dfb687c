//! Energy computation for rigid body systems.

use kinetree_math::DVec;
use kinetree_model::{Result, System};

use crate::crba::compute_mass_matrix;
use crate::kinematics::forward_kinematics_transforms;

/// Compute kinetic energy: 0.5 * qd^T * M(q) * qd
///
/// The mass matrix includes the joint armature, so rotor inertia counts as well.
pub fn kinetic_energy(system: &System, q: &DVec, qd: &DVec) -> Result<f64> {
    system.check_qd(qd)?;
    let m = compute_mass_matrix(system, q)?;
    Ok(0.5 * qd.dot(&(&m * qd)))
}

/// Compute gravitational potential energy.
///
/// PE = -sum_i m_i * g^T * x_com_i
pub fn potential_energy(system: &System, q: &DVec) -> Result<f64> {
    let xs = forward_kinematics_transforms(system, q)?;
    let gravity = system.gravity();
    Ok(system
        .links()
        .iter()
        .zip(&xs)
        .map(|(link, x)| {
            let com_world = x.inv_transform_point(&link.inertia.com());
            -link.inertia.mass * gravity.dot(&com_world)
        })
        .sum())
}

/// Total mechanical energy (kinetic + potential).
pub fn total_energy(system: &System, q: &DVec, qd: &DVec) -> Result<f64> {
    Ok(kinetic_energy(system, q, qd)? + potential_energy(system, q)?)
}
