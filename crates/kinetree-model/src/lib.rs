//! System description, joint calculus and state types for kinetree.
//!
//! `System` is the static description of a kinematic tree (topology, joint types, inertias).
//! `State` is the per-trajectory simulation state (coordinates, velocities, link transforms).
//! `JointRegistry` maps joint-type tags to their coordinate maps.

pub mod error;
pub mod geometry;
pub mod joint;
pub mod link;
pub mod motion;
pub mod state;
pub mod system;

pub use error::{KinetreeError, Result};
pub use geometry::Geometry;
pub use joint::{
    DrawFn, IntegrateFn, JointModel, JointParams, JointRegistry, MotionFn, N_JOINT_PARAMS,
    NeutralFn, TauFn, TransformFn,
};
pub use link::Link;
pub use motion::{MotionConfig, draw_q, random_angle_over_time, random_position_over_time};
pub use state::State;
pub use system::{IntegrationMethod, System, SystemBuilder};
