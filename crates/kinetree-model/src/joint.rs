//! Joint calculus: per-joint-type coordinate maps and the registry resolving tags.
//!
//! A joint type is a [`JointModel`], a bundle of plain function pointers keyed
//! by a string tag in a [`JointRegistry`]. A [`System`](crate::System) resolves
//! every tag once at build time and keeps the resolved models alongside its links.

use std::collections::{BTreeMap, HashMap};

use kinetree_math::{DMat, Quat, SpatialVec, Transform, Vec3};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::motion::{self, MotionConfig};
use crate::{KinetreeError, Result};

/// Number of entries in the fixed-size part of [`JointParams`].
pub const N_JOINT_PARAMS: usize = 3;

/// Local joint transform from a coordinate block and joint parameters.
pub type TransformFn = fn(q: &[f64], params: &[f64]) -> Transform;
/// Columns of the motion subspace `S` (one per velocity component), in the joint output frame.
pub type MotionFn = fn(q: &[f64], params: &[f64]) -> Vec<SpatialVec>;
/// Advance a coordinate block by a velocity block over `dt`, writing into `out`.
pub type IntegrateFn = fn(q: &[f64], qd: &[f64], dt: f64, out: &mut [f64]);
/// Time derivative of a coordinate block under a velocity block, written into `out`.
pub type RateFn = fn(q: &[f64], qd: &[f64], out: &mut [f64]);
/// Joint-space generalized force from a spatial force acting across the joint.
pub type TauFn = fn(f: &SpatialVec, q: &[f64], params: &[f64]) -> Vec<f64>;
/// Random coordinate trajectory, `T x q_width`.
pub type DrawFn = fn(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    dt: f64,
    params: &[f64],
) -> Result<DMat>;
/// Write the neutral (rest) configuration of a coordinate block.
pub type NeutralFn = fn(q: &mut [f64]);

/// Joint parameters fed to every joint function.
///
/// `values` is the default parameter vector; `by_type` overrides it for a
/// specific joint tag, so a link can carry parameters for several candidate types.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JointParams {
    pub values: [f64; N_JOINT_PARAMS],
    pub by_type: BTreeMap<String, Vec<f64>>,
}

impl JointParams {
    pub fn new(values: [f64; N_JOINT_PARAMS]) -> Self {
        Self {
            values,
            by_type: BTreeMap::new(),
        }
    }

    /// Set the override for joint tag `tag`.
    pub fn with_override(mut self, tag: &str, values: Vec<f64>) -> Self {
        self.by_type.insert(tag.to_string(), values);
        self
    }

    /// Parameters seen by a joint of type `tag`.
    pub fn for_type(&self, tag: &str) -> &[f64] {
        match self.by_type.get(tag) {
            Some(v) => v,
            None => &self.values,
        }
    }
}

/// The calculus of one joint type.
#[derive(Debug, Clone, Copy)]
pub struct JointModel {
    pub q_width: usize,
    pub qd_width: usize,
    pub transform: TransformFn,
    pub motion: MotionFn,
    /// Manifold-aware integrator; Euclidean `q + qd * dt` when absent.
    pub integrate: Option<IntegrateFn>,
    /// Coordinate rate `dq/dt`; equal to `qd` when absent.
    pub rate: Option<RateFn>,
    /// Generalized force; `Sᵀ f` when absent.
    pub tau: Option<TauFn>,
    /// Random motion generator. Required for every registered type so that
    /// [`draw_q`](crate::draw_q) covers any system built from the registry.
    pub rcmg_draw: Option<DrawFn>,
    /// Rest configuration; all zeros when absent.
    pub neutral: Option<NeutralFn>,
}

impl JointModel {
    /// A joint model with only the mandatory coordinate maps.
    pub fn new(q_width: usize, qd_width: usize, transform: TransformFn, motion: MotionFn) -> Self {
        Self {
            q_width,
            qd_width,
            transform,
            motion,
            integrate: None,
            rate: None,
            tau: None,
            rcmg_draw: None,
            neutral: None,
        }
    }

    pub fn with_integrate(mut self, f: IntegrateFn) -> Self {
        self.integrate = Some(f);
        self
    }

    pub fn with_rate(mut self, f: RateFn) -> Self {
        self.rate = Some(f);
        self
    }

    pub fn with_tau(mut self, f: TauFn) -> Self {
        self.tau = Some(f);
        self
    }

    pub fn with_rcmg_draw(mut self, f: DrawFn) -> Self {
        self.rcmg_draw = Some(f);
        self
    }

    pub fn with_neutral(mut self, f: NeutralFn) -> Self {
        self.neutral = Some(f);
        self
    }

    /// Local joint transform.
    pub fn joint_transform(&self, q: &[f64], params: &[f64]) -> Transform {
        (self.transform)(q, params)
    }

    /// Motion subspace columns.
    pub fn motion_subspace(&self, q: &[f64], params: &[f64]) -> Vec<SpatialVec> {
        (self.motion)(q, params)
    }

    /// Joint velocity as a spatial motion vector in the joint output frame: `S qd`.
    pub fn joint_velocity(&self, q: &[f64], qd: &[f64], params: &[f64]) -> SpatialVec {
        self.motion_subspace(q, params)
            .iter()
            .zip(qd)
            .fold(SpatialVec::zero(), |acc, (s, &v)| acc + *s * v)
    }

    /// Generalized force for a spatial force transmitted across the joint.
    pub fn joint_tau(&self, f: &SpatialVec, q: &[f64], params: &[f64]) -> Vec<f64> {
        match self.tau {
            Some(tau) => tau(f, q, params),
            None => self
                .motion_subspace(q, params)
                .iter()
                .map(|s| s.dot(f))
                .collect(),
        }
    }

    /// Integrate a coordinate block, writing the result into `out`.
    pub fn integrate_into(&self, q: &[f64], qd: &[f64], dt: f64, out: &mut [f64]) {
        match self.integrate {
            Some(integrate) => integrate(q, qd, dt, out),
            None => {
                for ((o, &qi), &vi) in out.iter_mut().zip(q).zip(qd) {
                    *o = qi + vi * dt;
                }
            }
        }
    }

    /// Coordinate rate of a block, written into `out`.
    pub fn rate_into(&self, q: &[f64], qd: &[f64], out: &mut [f64]) {
        match self.rate {
            Some(rate) => rate(q, qd, out),
            None => out.copy_from_slice(qd),
        }
    }

    /// Write the rest configuration into `q`.
    pub fn neutral_into(&self, q: &mut [f64]) {
        match self.neutral {
            Some(neutral) => neutral(q),
            None => q.iter_mut().for_each(|x| *x = 0.0),
        }
    }

    fn validate(&self, tag: &str) -> Result<()> {
        if self.q_width != self.qd_width && (self.integrate.is_none() || self.rate.is_none()) {
            return Err(KinetreeError::InvalidJointModel(format!(
                "joint type `{tag}` has q width {} != qd width {} but lacks an integrator or coordinate rate",
                self.q_width, self.qd_width
            )));
        }
        if self.rcmg_draw.is_none() {
            return Err(KinetreeError::InvalidJointModel(format!(
                "joint type `{tag}` has no random motion generator"
            )));
        }
        Ok(())
    }
}

/// Table of joint models keyed by joint-type tag.
#[derive(Debug, Clone)]
pub struct JointRegistry {
    models: HashMap<String, JointModel>,
}

impl JointRegistry {
    /// A registry without any joint types.
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Register a new joint type. Existing tags cannot be replaced.
    pub fn register(&mut self, tag: &str, model: JointModel) -> Result<()> {
        if self.models.contains_key(tag) {
            return Err(KinetreeError::InvalidJointModel(format!(
                "joint type `{tag}` is already registered"
            )));
        }
        model.validate(tag)?;
        tracing::debug!(
            tag,
            q_width = model.q_width,
            qd_width = model.qd_width,
            "registered joint type"
        );
        self.models.insert(tag.to_string(), model);
        Ok(())
    }

    /// Look up a joint type.
    pub fn get(&self, tag: &str) -> Result<&JointModel> {
        self.models
            .get(tag)
            .ok_or_else(|| KinetreeError::UnknownJointType(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.models.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.models.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for JointRegistry {
    /// A registry holding the built-in joint types.
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert("free".to_string(), free());
        models.insert("frozen".to_string(), frozen());
        models.insert("spherical".to_string(), spherical());
        models.insert("rx".to_string(), revolute(rx_transform, rx_motion));
        models.insert("ry".to_string(), revolute(ry_transform, ry_motion));
        models.insert("rz".to_string(), revolute(rz_transform, rz_motion));
        models.insert("px".to_string(), prismatic(px_transform, px_motion));
        models.insert("py".to_string(), prismatic(py_transform, py_motion));
        models.insert("pz".to_string(), prismatic(pz_transform, pz_motion));
        Self { models }
    }
}

// ---------------------------------------------------------------------------
// Built-in joint types
// ---------------------------------------------------------------------------

fn revolute(transform: TransformFn, motion: MotionFn) -> JointModel {
    JointModel::new(1, 1, transform, motion).with_rcmg_draw(motion::draw_rxyz)
}

fn prismatic(transform: TransformFn, motion: MotionFn) -> JointModel {
    JointModel::new(1, 1, transform, motion).with_rcmg_draw(motion::draw_pxyz)
}

fn spherical() -> JointModel {
    JointModel::new(4, 3, spherical_transform, spherical_motion)
        .with_integrate(spherical_integrate)
        .with_rate(spherical_rate)
        .with_rcmg_draw(motion::draw_spherical)
        .with_neutral(quat_neutral)
}

fn free() -> JointModel {
    JointModel::new(7, 6, free_transform, free_motion)
        .with_integrate(free_integrate)
        .with_rate(free_rate)
        .with_rcmg_draw(motion::draw_free)
        .with_neutral(quat_neutral)
}

fn frozen() -> JointModel {
    JointModel::new(0, 0, frozen_transform, frozen_motion).with_rcmg_draw(motion::draw_frozen)
}

/// Passive rotation: the child frame turns by `+q` about `axis`.
fn rotation_about(axis: Vec3, q: &[f64]) -> Transform {
    Transform::from_rotation(Quat::from_axis_angle(&axis, -q[0]))
}

fn rx_transform(q: &[f64], _params: &[f64]) -> Transform {
    rotation_about(Vec3::x(), q)
}

fn ry_transform(q: &[f64], _params: &[f64]) -> Transform {
    rotation_about(Vec3::y(), q)
}

fn rz_transform(q: &[f64], _params: &[f64]) -> Transform {
    rotation_about(Vec3::z(), q)
}

fn rx_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    vec![SpatialVec::new(Vec3::x(), Vec3::zeros())]
}

fn ry_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    vec![SpatialVec::new(Vec3::y(), Vec3::zeros())]
}

fn rz_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    vec![SpatialVec::new(Vec3::z(), Vec3::zeros())]
}

fn px_transform(q: &[f64], _params: &[f64]) -> Transform {
    Transform::from_translation(Vec3::x() * q[0])
}

fn py_transform(q: &[f64], _params: &[f64]) -> Transform {
    Transform::from_translation(Vec3::y() * q[0])
}

fn pz_transform(q: &[f64], _params: &[f64]) -> Transform {
    Transform::from_translation(Vec3::z() * q[0])
}

fn px_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    vec![SpatialVec::new(Vec3::zeros(), Vec3::x())]
}

fn py_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    vec![SpatialVec::new(Vec3::zeros(), Vec3::y())]
}

fn pz_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    vec![SpatialVec::new(Vec3::zeros(), Vec3::z())]
}

// q = [qw, qx, qy, qz]; not required to be normalized.
fn spherical_transform(q: &[f64], _params: &[f64]) -> Transform {
    Transform::from_rotation(Quat::from_slice(q).normalize())
}

fn angular_columns() -> Vec<SpatialVec> {
    vec![
        SpatialVec::new(Vec3::x(), Vec3::zeros()),
        SpatialVec::new(Vec3::y(), Vec3::zeros()),
        SpatialVec::new(Vec3::z(), Vec3::zeros()),
    ]
}

fn spherical_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    angular_columns()
}

/// Rotate a quaternion block by a body-frame angular velocity over `dt`.
fn integrate_rotation(rot: Quat, omega: Vec3, dt: f64) -> Quat {
    Quat::exp(&(-omega * dt)).mul(&rot.normalize()).normalize()
}

/// `d/dt rot` for a body-frame angular velocity; linear in `rot`, so unit length is preserved.
fn rotation_rate(rot: Quat, omega: Vec3) -> Quat {
    Quat {
        w: 0.0,
        v: -omega * 0.5,
    }
    .mul(&rot)
}

fn spherical_rate(q: &[f64], qd: &[f64], out: &mut [f64]) {
    let omega = Vec3::new(qd[0], qd[1], qd[2]);
    out[..4].copy_from_slice(&rotation_rate(Quat::from_slice(q), omega).to_array());
}

fn spherical_integrate(q: &[f64], qd: &[f64], dt: f64, out: &mut [f64]) {
    let omega = Vec3::new(qd[0], qd[1], qd[2]);
    let rot = integrate_rotation(Quat::from_slice(q), omega, dt);
    out[..4].copy_from_slice(&rot.to_array());
}

// q = [qw, qx, qy, qz, x, y, z]; qd = [ω; v] in the body frame.
fn free_transform(q: &[f64], _params: &[f64]) -> Transform {
    Transform::new(
        Vec3::new(q[4], q[5], q[6]),
        Quat::from_slice(&q[..4]).normalize(),
    )
}

fn free_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    let mut cols = angular_columns();
    cols.push(SpatialVec::new(Vec3::zeros(), Vec3::x()));
    cols.push(SpatialVec::new(Vec3::zeros(), Vec3::y()));
    cols.push(SpatialVec::new(Vec3::zeros(), Vec3::z()));
    cols
}

fn free_integrate(q: &[f64], qd: &[f64], dt: f64, out: &mut [f64]) {
    let rot = Quat::from_slice(&q[..4]).normalize();
    let omega = Vec3::new(qd[0], qd[1], qd[2]);
    let vel_body = Vec3::new(qd[3], qd[4], qd[5]);
    let pos = Vec3::new(q[4], q[5], q[6]) + rot.conjugate().rotate(&vel_body) * dt;
    let rot = integrate_rotation(rot, omega, dt);
    out[..4].copy_from_slice(&rot.to_array());
    out[4] = pos.x;
    out[5] = pos.y;
    out[6] = pos.z;
}

// Position rate is the body velocity seen in world coordinates.
fn free_rate(q: &[f64], qd: &[f64], out: &mut [f64]) {
    let rot = Quat::from_slice(&q[..4]);
    let omega = Vec3::new(qd[0], qd[1], qd[2]);
    let vel_world = rot.normalize().conjugate().rotate(&Vec3::new(qd[3], qd[4], qd[5]));
    out[..4].copy_from_slice(&rotation_rate(rot, omega).to_array());
    out[4] = vel_world.x;
    out[5] = vel_world.y;
    out[6] = vel_world.z;
}

fn quat_neutral(q: &mut [f64]) {
    q.iter_mut().for_each(|x| *x = 0.0);
    q[0] = 1.0;
}

fn frozen_transform(_q: &[f64], _params: &[f64]) -> Transform {
    Transform::identity()
}

fn frozen_motion(_q: &[f64], _params: &[f64]) -> Vec<SpatialVec> {
    Vec::new()
}
