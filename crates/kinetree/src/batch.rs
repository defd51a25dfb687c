//! Batched execution over independent trajectories sharing one [`System`].
//!
//! Every batch element is a pure function of its own inputs and the shared
//! system, so elements are mapped in parallel with rayon. Output order matches
//! input order and does not depend on thread count.

use rayon::prelude::*;

use kinetree_math::{DMat, DVec, Transform};
use kinetree_model::{Result, State, System, error::check_len};
use kinetree_rigid::forward_kinematics_transforms;

use crate::Simulator;

/// World transforms of every link for each configuration in `qs`.
pub fn forward_kinematics_batch(system: &System, qs: &[DVec]) -> Result<Vec<Vec<Transform>>> {
    qs.par_iter()
        .map(|q| forward_kinematics_transforms(system, q))
        .collect()
}

/// Forward kinematics of a `T × q_size` trajectory, one row per sample.
pub fn forward_kinematics_trajectory(system: &System, qs: &DMat) -> Result<Vec<Vec<Transform>>> {
    check_len("trajectory columns", system.q_size(), qs.ncols())?;
    let rows: Vec<DVec> = qs.row_iter().map(|row| row.transpose()).collect();
    forward_kinematics_batch(system, &rows)
}

/// Roll out every initial state under its own torque sequence.
///
/// Element `b` steps `initial[b]` once per entry of `taus[b]` and returns the
/// states after each step. Fails on the first failing element.
pub fn rollout_batch(
    system: &System,
    simulator: &Simulator,
    initial: &[State],
    taus: &[Vec<DVec>],
) -> Result<Vec<Vec<State>>> {
    check_len("torque sequences", initial.len(), taus.len())?;
    tracing::debug!(batch = initial.len(), "rolling out batch");
    initial
        .par_iter()
        .zip(taus.par_iter())
        .map(|(state, seq)| simulator.rollout(system, state, seq))
        .collect()
}
