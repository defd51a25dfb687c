//! System definition: static description of a kinematic tree.

use std::collections::HashSet;
use std::ops::Range;

use kinetree_math::{DVec, GRAVITY, Inertia, Transform, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::check_len;
use crate::geometry::combined_inertia;
use crate::{Geometry, JointModel, JointParams, JointRegistry, KinetreeError, Link, Result};

/// Time integration scheme used by a simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Update `qd` with `qdd * dt`, then `q` with the new `qd * dt`.
    #[default]
    SemiImplicitEuler,
    /// Classical fourth-order Runge–Kutta on the coordinate manifold.
    Rk4,
}

/// A kinematic tree of links, each attached to its parent by a joint.
///
/// Links are stored in topological order: every parent index is smaller than
/// the index of its children, and `-1` attaches a link to the world. Joint
/// types are resolved against a [`JointRegistry`] when the system is built, so
/// a `System` never holds an unknown tag.
///
/// A `System` is immutable; the `with_*` methods return an updated copy.
#[derive(Debug, Clone)]
pub struct System {
    link_parents: Vec<i32>,
    links: Vec<Link>,
    link_types: Vec<String>,
    link_names: Vec<String>,
    link_damping: Vec<DVec>,
    link_armature: Vec<DVec>,
    geoms: Vec<Vec<Geometry>>,
    dt: f64,
    gravity: Vec3,
    dynamic_geometries: bool,
    integration_method: IntegrationMethod,
    mass_mat_iters: usize,

    // Resolved at build time.
    joint_models: Vec<JointModel>,
    children: Vec<Vec<usize>>,
    q_offsets: Vec<usize>,
    qd_offsets: Vec<usize>,
    q_size: usize,
    qd_size: usize,
    damping: DVec,
    armature: DVec,
}

impl System {
    /// Number of links.
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    /// Length of the generalized-coordinate vector.
    pub fn q_size(&self) -> usize {
        self.q_size
    }

    /// Length of the generalized-velocity vector.
    pub fn qd_size(&self) -> usize {
        self.qd_size
    }

    pub fn q_offset(&self, i: usize) -> usize {
        self.q_offsets[i]
    }

    pub fn qd_offset(&self, i: usize) -> usize {
        self.qd_offsets[i]
    }

    /// Slice of `q` belonging to link `i`.
    pub fn q_range(&self, i: usize) -> Range<usize> {
        self.q_offsets[i]..self.q_offsets[i] + self.joint_models[i].q_width
    }

    /// Slice of `qd` belonging to link `i`.
    pub fn qd_range(&self, i: usize) -> Range<usize> {
        self.qd_offsets[i]..self.qd_offsets[i] + self.joint_models[i].qd_width
    }

    /// Parent indices, `-1` for links attached to the world.
    pub fn link_parents(&self) -> &[i32] {
        &self.link_parents
    }

    /// Parent of link `i`, `None` for a root.
    pub fn parent(&self, i: usize) -> Option<usize> {
        usize::try_from(self.link_parents[i]).ok()
    }

    /// Direct children of link `i` in ascending order.
    pub fn children(&self, i: usize) -> &[usize] {
        &self.children[i]
    }

    pub fn link(&self, i: usize) -> &Link {
        &self.links[i]
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link_type(&self, i: usize) -> &str {
        &self.link_types[i]
    }

    pub fn link_types(&self) -> &[String] {
        &self.link_types
    }

    pub fn link_name(&self, i: usize) -> &str {
        &self.link_names[i]
    }

    pub fn link_names(&self) -> &[String] {
        &self.link_names
    }

    /// Index of the link called `name`.
    pub fn name_to_idx(&self, name: &str) -> Result<usize> {
        self.link_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| KinetreeError::UnknownLinkName(name.to_string()))
    }

    /// Resolved joint model of link `i`.
    pub fn joint_model(&self, i: usize) -> &JointModel {
        &self.joint_models[i]
    }

    /// Joint parameters of link `i` as seen by its joint type.
    pub fn joint_params(&self, i: usize) -> &[f64] {
        self.links[i].joint_params.for_type(&self.link_types[i])
    }

    pub fn geoms(&self, i: usize) -> &[Geometry] {
        &self.geoms[i]
    }

    /// Damping coefficients, one per velocity component.
    pub fn damping(&self) -> &DVec {
        &self.damping
    }

    /// Armature (added joint-space inertia), one per velocity component.
    pub fn armature(&self) -> &DVec {
        &self.armature
    }

    pub fn link_damping(&self, i: usize) -> &DVec {
        &self.link_damping[i]
    }

    pub fn link_armature(&self, i: usize) -> &DVec {
        &self.link_armature[i]
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Whether inertias are re-derived from the geometries every step.
    pub fn dynamic_geometries(&self) -> bool {
        self.dynamic_geometries
    }

    pub fn integration_method(&self) -> IntegrationMethod {
        self.integration_method
    }

    /// Newton–Schulz refinements of the cached inverse mass matrix per step;
    /// zero means an exact inversion every step.
    pub fn mass_mat_iters(&self) -> usize {
        self.mass_mat_iters
    }

    /// Fail with `DimensionMismatch` unless `q.len() == q_size`.
    pub fn check_q(&self, q: &DVec) -> Result<()> {
        check_len("q", self.q_size, q.len())
    }

    /// Fail with `DimensionMismatch` unless `qd.len() == qd_size`.
    pub fn check_qd(&self, qd: &DVec) -> Result<()> {
        check_len("qd", self.qd_size, qd.len())
    }

    /// Fail with `InvalidTopology` unless `i` names a link.
    pub fn check_link(&self, i: usize) -> Result<()> {
        if i >= self.num_links() {
            return Err(KinetreeError::InvalidTopology(format!(
                "link index {i} out of range for {} links",
                self.num_links()
            )));
        }
        Ok(())
    }

    /// Rest configuration: identity quaternions, zeros elsewhere.
    pub fn neutral_q(&self) -> DVec {
        let mut q = DVec::zeros(self.q_size);
        for (i, model) in self.joint_models.iter().enumerate() {
            model.neutral_into(&mut q.as_mut_slice()[self.q_range(i)]);
        }
        q
    }

    // -----------------------------------------------------------------------
    // Functional updates
    // -----------------------------------------------------------------------

    /// Change the joint type of link `i`. Damping and armature of the link are
    /// reset to zero when the velocity width changes.
    pub fn with_link_type(&self, i: usize, tag: &str, registry: &JointRegistry) -> Result<System> {
        self.check_link(i)?;
        let model = *registry.get(tag)?;
        let mut sys = self.clone();
        if model.qd_width != sys.joint_models[i].qd_width {
            sys.link_damping[i] = DVec::zeros(model.qd_width);
            sys.link_armature[i] = DVec::zeros(model.qd_width);
        }
        sys.link_types[i] = tag.to_string();
        sys.joint_models[i] = model;
        sys.refresh_layout();
        Ok(sys)
    }

    /// Replace the geometries of link `i` and re-derive its inertia.
    pub fn with_geoms(&self, i: usize, geoms: Vec<Geometry>) -> Result<System> {
        self.check_link(i)?;
        let mut sys = self.clone();
        sys.links[i].inertia = combined_inertia(&geoms);
        sys.geoms[i] = geoms;
        Ok(sys)
    }

    /// Set the inertia of link `i` directly.
    pub fn with_inertia(&self, i: usize, inertia: Inertia) -> Result<System> {
        self.check_link(i)?;
        let mut sys = self.clone();
        sys.links[i].inertia = inertia;
        Ok(sys)
    }

    pub fn with_joint_params(&self, i: usize, params: JointParams) -> Result<System> {
        self.check_link(i)?;
        let mut sys = self.clone();
        sys.links[i].joint_params = params;
        Ok(sys)
    }

    pub fn with_damping(&self, i: usize, damping: DVec) -> Result<System> {
        self.check_link(i)?;
        check_len("damping", self.joint_models[i].qd_width, damping.len())?;
        let mut sys = self.clone();
        sys.link_damping[i] = damping;
        sys.refresh_layout();
        Ok(sys)
    }

    pub fn with_armature(&self, i: usize, armature: DVec) -> Result<System> {
        self.check_link(i)?;
        check_len("armature", self.joint_models[i].qd_width, armature.len())?;
        let mut sys = self.clone();
        sys.link_armature[i] = armature;
        sys.refresh_layout();
        Ok(sys)
    }

    pub fn with_gravity(&self, gravity: Vec3) -> System {
        System {
            gravity,
            ..self.clone()
        }
    }

    pub fn with_dt(&self, dt: f64) -> System {
        System { dt, ..self.clone() }
    }

    pub fn with_integration_method(&self, integration_method: IntegrationMethod) -> System {
        System {
            integration_method,
            ..self.clone()
        }
    }

    pub fn with_mass_mat_iters(&self, mass_mat_iters: usize) -> System {
        System {
            mass_mat_iters,
            ..self.clone()
        }
    }

    pub fn with_dynamic_geometries(&self, dynamic_geometries: bool) -> System {
        System {
            dynamic_geometries,
            ..self.clone()
        }
    }

    /// Re-derive every link's inertia from its geometries.
    pub fn recompute_inertias(&self) -> System {
        let mut sys = self.clone();
        for (link, geoms) in sys.links.iter_mut().zip(&sys.geoms) {
            link.inertia = combined_inertia(geoms);
        }
        sys
    }

    /// Recompute offsets, sizes and the flattened damping/armature vectors.
    fn refresh_layout(&mut self) {
        self.q_offsets.clear();
        self.qd_offsets.clear();
        let (mut nq, mut nqd) = (0, 0);
        for model in &self.joint_models {
            self.q_offsets.push(nq);
            self.qd_offsets.push(nqd);
            nq += model.q_width;
            nqd += model.qd_width;
        }
        self.q_size = nq;
        self.qd_size = nqd;

        let flatten = |blocks: &[DVec]| {
            DVec::from_iterator(nqd, blocks.iter().flat_map(|b| b.iter().copied()))
        };
        self.damping = flatten(&self.link_damping);
        self.armature = flatten(&self.link_armature);
    }
}

struct PendingLink {
    name: String,
    parent: i32,
    link_type: String,
    link: Link,
    geoms: Vec<Geometry>,
    inertia: Option<Inertia>,
    damping: Option<Vec<f64>>,
    armature: Option<Vec<f64>>,
}

/// Builder for constructing systems.
///
/// Link modifiers (`transform2`, `geometry`, ...) apply to the most recently
/// added link.
pub struct SystemBuilder {
    links: Vec<PendingLink>,
    dt: f64,
    gravity: Vec3,
    dynamic_geometries: bool,
    integration_method: IntegrationMethod,
    mass_mat_iters: usize,
    misuse: Option<&'static str>,
}

impl SystemBuilder {
    /// Start building a new system.
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            dt: 0.01,
            gravity: Vec3::new(0.0, 0.0, -GRAVITY),
            dynamic_geometries: false,
            integration_method: IntegrationMethod::default(),
            mass_mat_iters: 0,
            misuse: None,
        }
    }

    /// Set the timestep.
    pub fn dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Set the gravity vector.
    pub fn gravity(mut self, g: Vec3) -> Self {
        self.gravity = g;
        self
    }

    pub fn dynamic_geometries(mut self, enabled: bool) -> Self {
        self.dynamic_geometries = enabled;
        self
    }

    pub fn integration_method(mut self, method: IntegrationMethod) -> Self {
        self.integration_method = method;
        self
    }

    pub fn mass_mat_iters(mut self, iters: usize) -> Self {
        self.mass_mat_iters = iters;
        self
    }

    /// Add a link with joint type `link_type` attached to `parent`.
    ///
    /// `parent` is the index of the parent link, or -1 for world.
    /// `transform1` is the offset from the parent frame to the joint frame.
    pub fn add_link(mut self, name: &str, parent: i32, link_type: &str, transform1: Transform) -> Self {
        self.links.push(PendingLink {
            name: name.to_string(),
            parent,
            link_type: link_type.to_string(),
            link: Link::new(transform1),
            geoms: Vec::new(),
            inertia: None,
            damping: None,
            armature: None,
        });
        self
    }

    fn last(&mut self, modifier: &'static str) -> Option<&mut PendingLink> {
        if self.links.is_empty() && self.misuse.is_none() {
            self.misuse = Some(modifier);
        }
        self.links.last_mut()
    }

    /// Offset from the joint output frame to the body frame.
    pub fn transform2(mut self, transform2: Transform) -> Self {
        if let Some(link) = self.last("transform2") {
            link.link.transform2 = transform2;
        }
        self
    }

    /// Attach a geometry; the link inertia is the sum over its geometries.
    pub fn geometry(mut self, geom: Geometry) -> Self {
        if let Some(link) = self.last("geometry") {
            link.geoms.push(geom);
        }
        self
    }

    /// Set the inertia directly instead of deriving it from geometries.
    pub fn inertia(mut self, inertia: Inertia) -> Self {
        if let Some(link) = self.last("inertia") {
            link.inertia = Some(inertia);
        }
        self
    }

    /// One coefficient per velocity component of the joint.
    pub fn damping(mut self, damping: Vec<f64>) -> Self {
        if let Some(link) = self.last("damping") {
            link.damping = Some(damping);
        }
        self
    }

    /// One coefficient per velocity component of the joint.
    pub fn armature(mut self, armature: Vec<f64>) -> Self {
        if let Some(link) = self.last("armature") {
            link.armature = Some(armature);
        }
        self
    }

    pub fn joint_params(mut self, params: JointParams) -> Self {
        if let Some(link) = self.last("joint_params") {
            link.link.joint_params = params;
        }
        self
    }

    /// Build against the built-in joint types.
    pub fn build(self) -> Result<System> {
        self.build_with(&JointRegistry::default())
    }

    /// Validate the topology, resolve joint types in `registry` and derive inertias.
    pub fn build_with(self, registry: &JointRegistry) -> Result<System> {
        if let Some(modifier) = self.misuse {
            return Err(KinetreeError::InvalidTopology(format!(
                "`{modifier}` called before any link was added"
            )));
        }

        let n = self.links.len();
        let mut seen = HashSet::new();
        let mut sys = System {
            link_parents: Vec::with_capacity(n),
            links: Vec::with_capacity(n),
            link_types: Vec::with_capacity(n),
            link_names: Vec::with_capacity(n),
            link_damping: Vec::with_capacity(n),
            link_armature: Vec::with_capacity(n),
            geoms: Vec::with_capacity(n),
            dt: self.dt,
            gravity: self.gravity,
            dynamic_geometries: self.dynamic_geometries,
            integration_method: self.integration_method,
            mass_mat_iters: self.mass_mat_iters,
            joint_models: Vec::with_capacity(n),
            children: vec![Vec::new(); n],
            q_offsets: Vec::new(),
            qd_offsets: Vec::new(),
            q_size: 0,
            qd_size: 0,
            damping: DVec::zeros(0),
            armature: DVec::zeros(0),
        };

        for (i, pending) in self.links.into_iter().enumerate() {
            if !seen.insert(pending.name.clone()) {
                return Err(KinetreeError::InvalidTopology(format!(
                    "duplicate link name `{}`",
                    pending.name
                )));
            }
            if pending.parent < -1 || pending.parent >= i as i32 {
                return Err(KinetreeError::InvalidTopology(format!(
                    "link {i} (`{}`) has parent {}; parents must precede their children",
                    pending.name, pending.parent
                )));
            }
            let model = *registry.get(&pending.link_type)?;

            let damping = DVec::from_vec(
                pending
                    .damping
                    .unwrap_or_else(|| vec![0.0; model.qd_width]),
            );
            check_len("damping", model.qd_width, damping.len())?;
            let armature = DVec::from_vec(
                pending
                    .armature
                    .unwrap_or_else(|| vec![0.0; model.qd_width]),
            );
            check_len("armature", model.qd_width, armature.len())?;

            let mut link = pending.link;
            link.inertia = pending
                .inertia
                .unwrap_or_else(|| combined_inertia(&pending.geoms));

            if let Ok(p) = usize::try_from(pending.parent) {
                sys.children[p].push(i);
            }
            sys.link_parents.push(pending.parent);
            sys.links.push(link);
            sys.link_types.push(pending.link_type);
            sys.link_names.push(pending.name);
            sys.link_damping.push(damping);
            sys.link_armature.push(armature);
            sys.geoms.push(pending.geoms);
            sys.joint_models.push(model);
        }
        sys.refresh_layout();

        tracing::debug!(
            links = sys.num_links(),
            q_size = sys.q_size,
            qd_size = sys.qd_size,
            "built system"
        );
        Ok(sys)
    }
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
