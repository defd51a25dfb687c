//! One node of the kinematic tree.

use kinetree_math::{Inertia, Transform};
use serde::{Deserialize, Serialize};

use crate::JointParams;

/// Static per-link data. The joint type and topology live on [`System`](crate::System).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Fixed offset from the parent's frame to the joint input frame.
    pub transform1: Transform,
    /// Fixed offset from the joint output frame to the body frame.
    #[serde(default)]
    pub transform2: Transform,
    #[serde(default)]
    pub joint_params: JointParams,
    /// Spatial inertia in the body frame.
    #[serde(default)]
    pub inertia: Inertia,
}

impl Link {
    pub fn new(transform1: Transform) -> Self {
        Self {
            transform1,
            transform2: Transform::identity(),
            joint_params: JointParams::default(),
            inertia: Inertia::zero(),
        }
    }
}
