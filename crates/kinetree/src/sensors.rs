//! Virtual inertial sensors computed from link trajectories.
//!
//! All inputs are trajectories sampled at a fixed `dt`: one world-to-body
//! transform (or orientation) per sample. Readings are expressed in the body
//! frame. Noise and bias models are left to the caller.

use kinetree_math::{DVec, Quat, Transform, Vec3};
use kinetree_model::{KinetreeError, Result, System, error::check_len};
use kinetree_rigid::motion_subspace;

/// Accelerometer and gyroscope readings of one body.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuReading {
    pub acc: Vec<Vec3>,
    pub gyr: Vec<Vec3>,
}

/// Specific force measured by an accelerometer rigidly attached to the body.
///
/// World acceleration comes from the second central difference of the origin
/// positions; the first and last samples have no neighbors and use zero. The
/// gravity vector is subtracted (a body at rest reads `-gravity`), then the
/// result is rotated into the body frame.
pub fn accelerometer(xs: &[Transform], gravity: Vec3, dt: f64) -> Vec<Vec3> {
    let n = xs.len();
    (0..n)
        .map(|k| {
            let acc_world = if k == 0 || k + 1 == n {
                Vec3::zeros()
            } else {
                (xs[k - 1].pos + xs[k + 1].pos - xs[k].pos * 2.0) / (dt * dt)
            };
            xs[k].rot.rotate(&(acc_world - gravity))
        })
        .collect()
}

/// Body-frame angular rate measured by a gyroscope following the orientations `rots`.
///
/// Uses the first-order difference between consecutive samples. The last
/// sample repeats the previous reading; a single sample reads zero.
pub fn gyroscope(rots: &[Quat], dt: f64) -> Vec<Vec3> {
    let mut gyr: Vec<Vec3> = rots
        .windows(2)
        .map(|w| {
            let dq = w[0].mul(&w[1].conjugate());
            let dq = if dq.w < 0.0 {
                Quat { w: -dq.w, v: -dq.v }
            } else {
                dq
            };
            // log() reads zero for rotations below its threshold.
            dq.log() / dt
        })
        .collect();
    let last = gyr.last().copied().unwrap_or_else(Vec3::zeros);
    if !rots.is_empty() {
        gyr.push(last);
    }
    gyr
}

/// Accelerometer and gyroscope readings of one body trajectory.
pub fn imu(xs: &[Transform], gravity: Vec3, dt: f64) -> ImuReading {
    let rots: Vec<Quat> = xs.iter().map(|x| x.rot).collect();
    ImuReading {
        acc: accelerometer(xs, gravity, dt),
        gyr: gyroscope(&rots, dt),
    }
}

/// Orientation of every link relative to its parent, from world transforms `xs`.
///
/// Roots report their world orientation.
pub fn rel_pose(system: &System, xs: &[Transform]) -> Result<Vec<Quat>> {
    check_len("transforms", system.num_links(), xs.len())?;
    Ok((0..system.num_links())
        .map(|i| match system.parent(i) {
            Some(p) => xs[i].rot.mul(&xs[p].rot.conjugate()),
            None => xs[i].rot,
        })
        .collect())
}

/// Rotation axis of every link's joint in the link frame at configuration `q`.
///
/// Single-velocity joints with a rotational part (`rx`, `ry`, `rz`, screws)
/// report their unit axis. Every other joint reports the x axis.
pub fn joint_axes(system: &System, q: &DVec) -> Result<Vec<Vec3>> {
    system.check_q(q)?;
    Ok((0..system.num_links())
        .map(|i| {
            let cols = motion_subspace(system, i, &q.as_slice()[system.q_range(i)]);
            match cols.as_slice() {
                [s] if s.angular().norm() > 1e-12 => s.angular().normalize(),
                _ => Vec3::x(),
            }
        })
        .collect())
}

/// Trajectory of link `link` out of a per-sample list of all link transforms.
pub fn link_trajectory(xs: &[Vec<Transform>], link: usize) -> Result<Vec<Transform>> {
    xs.iter()
        .map(|sample| {
            sample.get(link).copied().ok_or_else(|| {
                KinetreeError::InvalidTopology(format!(
                    "link index {link} out of range for {} links",
                    sample.len()
                ))
            })
        })
        .collect()
}
