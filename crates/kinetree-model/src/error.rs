//! Error types for kinetree.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KinetreeError {
    #[error("Unknown joint type: {0}")]
    UnknownJointType(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(
        "Inverse kinematics did not converge after {iterations} iterations \
         (position error {pos_error:.3e}, rotation error {rot_error:.3e})"
    )]
    ConvergenceFailure {
        iterations: usize,
        pos_error: f64,
        rot_error: f64,
    },

    #[error("Mass matrix is singular")]
    SingularMassMatrix,

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid joint model: {0}")]
    InvalidJointModel(String),

    #[error("Infeasible motion config: {0}")]
    InfeasibleMotionConfig(String),

    #[error("Unknown link name: {0}")]
    UnknownLinkName(String),
}

pub type Result<T> = std::result::Result<T, KinetreeError>;

/// Fail with `DimensionMismatch` unless `got == expected`.
pub fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(KinetreeError::DimensionMismatch {
            what,
            expected,
            got,
        })
    }
}
