//! Featherstone articulated rigid body kinematics and dynamics over a link tree.
//!
//! Implements:
//! - Root-to-leaf and leaf-to-root scans over the link tree
//! - Forward kinematics (transforms and body velocities)
//! - Recursive Newton-Euler Algorithm (RNEA) for inverse dynamics
//! - Composite Rigid Body Algorithm (CRBA) for the mass matrix
//! - Forward dynamics by Cholesky solve, semi-implicit Euler and RK4 stepping
//! - End-effector inverse kinematics

pub mod crba;
pub mod dynamics;
pub mod energy;
pub mod ik;
pub mod kinematics;
pub mod rnea;
pub mod scan;

pub use crba::{composite_inertias, compute_mass_matrix};
pub use dynamics::{
    forward_dynamics, forward_dynamics_cached, step, step_rk4, step_semi_implicit_euler,
};
pub use energy::{kinetic_energy, potential_energy, total_energy};
pub use ik::{inverse_kinematics_endeffector, IkOptions, IkSolution};
pub use kinematics::{
    coordinate_rate, forward_kinematics, forward_kinematics_transforms, integrate_q,
    local_transform, local_transforms, motion_subspace, normalize_q,
};
pub use rnea::inverse_dynamics;
pub use scan::{scan_forward, scan_reverse};
