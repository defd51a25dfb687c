//! 6D spatial algebra following Featherstone's "Rigid Body Dynamics Algorithms".
//!
//! Convention: spatial vectors are [angular; linear] (Featherstone order).
//! A spatial motion vector (twist): [ω; v]
//! A spatial force vector (wrench): [τ; f]

use crate::{Mat3, Mat6, Quat, Vec3, Vec6, skew};
use serde::{Deserialize, Serialize};

/// 6D spatial vector: either a motion vector (twist) or force vector (wrench).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialVec {
    /// The underlying 6D vector [angular(3); linear(3)].
    pub data: Vec6,
}

/// Spatial motion vector (velocity, acceleration, motion subspace column).
pub type Motion = SpatialVec;
/// Spatial force vector.
pub type Force = SpatialVec;

impl SpatialVec {
    /// Create from angular and linear parts.
    #[inline]
    pub fn new(angular: Vec3, linear: Vec3) -> Self {
        Self {
            data: Vec6::new(
                angular.x, angular.y, angular.z, linear.x, linear.y, linear.z,
            ),
        }
    }

    /// Zero spatial vector.
    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Vec6::zeros(),
        }
    }

    /// Angular (top 3) component.
    #[inline]
    pub fn angular(&self) -> Vec3 {
        Vec3::new(self.data[0], self.data[1], self.data[2])
    }

    /// Linear (bottom 3) component.
    #[inline]
    pub fn linear(&self) -> Vec3 {
        Vec3::new(self.data[3], self.data[4], self.data[5])
    }

    /// Spatial cross product for motion vectors: v ×ₘ w
    /// Used in velocity propagation.
    pub fn cross_motion(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let w2 = other.angular();
        let v2 = other.linear();
        SpatialVec::new(w.cross(&w2), w.cross(&v2) + v.cross(&w2))
    }

    /// Spatial cross product for force vectors: v ×f f
    /// Used in bias force computation.
    pub fn cross_force(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let t = other.angular();
        let f = other.linear();
        SpatialVec::new(w.cross(&t) + v.cross(&f), w.cross(&f))
    }

    /// Dot product of two spatial vectors (the motion/force pairing).
    #[inline]
    pub fn dot(&self, other: &SpatialVec) -> f64 {
        self.data.dot(&other.data)
    }
}

impl Default for SpatialVec {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::ops::Add for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn add(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data + rhs.data,
        }
    }
}

impl std::ops::AddAssign for SpatialVec {
    #[inline]
    fn add_assign(&mut self, rhs: SpatialVec) {
        self.data += rhs.data;
    }
}

impl std::ops::Sub for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn sub(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data - rhs.data,
        }
    }
}

impl std::ops::Mul<f64> for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn mul(self, rhs: f64) -> SpatialVec {
        SpatialVec {
            data: self.data * rhs,
        }
    }
}

impl std::ops::Neg for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn neg(self) -> SpatialVec {
        SpatialVec { data: -self.data }
    }
}

/// 6x6 spatial matrix (inertia, transforms acting on spatial vectors).
#[derive(Debug, Clone, Copy)]
pub struct SpatialMat {
    pub data: Mat6,
}

impl SpatialMat {
    /// Create from a 6x6 nalgebra matrix.
    #[inline]
    pub fn from_mat6(data: Mat6) -> Self {
        Self { data }
    }

    /// Zero matrix.
    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Mat6::zeros(),
        }
    }

    /// Identity matrix.
    #[inline]
    pub fn identity() -> Self {
        Self {
            data: Mat6::identity(),
        }
    }

    /// Multiply by a spatial vector.
    #[inline]
    pub fn mul_vec(&self, v: &SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data * v.data,
        }
    }

    /// Matrix-matrix multiply.
    #[inline]
    pub fn mul_mat(&self, other: &SpatialMat) -> SpatialMat {
        SpatialMat {
            data: self.data * other.data,
        }
    }

    /// Transpose.
    #[inline]
    pub fn transpose(&self) -> SpatialMat {
        SpatialMat {
            data: self.data.transpose(),
        }
    }
}

impl std::ops::Add for SpatialMat {
    type Output = SpatialMat;
    #[inline]
    fn add(self, rhs: SpatialMat) -> SpatialMat {
        SpatialMat {
            data: self.data + rhs.data,
        }
    }
}

/// Rigid transform from frame A (parent) to frame B (child), acting on Plücker vectors.
///
/// `pos` is the position of B's origin expressed in A. `rot` is the quaternion
/// whose matrix `E` maps A coordinates to B coordinates, so a point `p_a`
/// has B coordinates `E (p_a - pos)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position of frame B's origin expressed in frame A.
    pub pos: Vec3,
    /// Relative orientation from frame A to frame B.
    pub rot: Quat,
}

impl Transform {
    /// Create from translation and rotation.
    pub fn new(pos: Vec3, rot: Quat) -> Self {
        Self { pos, rot }
    }

    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            pos: Vec3::zeros(),
            rot: Quat::identity(),
        }
    }

    /// Pure translation.
    pub fn from_translation(pos: Vec3) -> Self {
        Self {
            pos,
            rot: Quat::identity(),
        }
    }

    /// Pure rotation.
    pub fn from_rotation(rot: Quat) -> Self {
        Self {
            pos: Vec3::zeros(),
            rot,
        }
    }

    /// Coordinate rotation matrix E (A coordinates to B coordinates).
    #[inline]
    pub fn rotation_matrix(&self) -> Mat3 {
        self.rot.to_matrix()
    }

    /// Get the 6x6 Plücker transform matrix for motion vectors.
    ///
    /// X = | E    0 |
    ///     | -E[p]× E |
    pub fn to_motion_matrix(&self) -> Mat6 {
        let e = self.rotation_matrix();
        let neg_epx = -e * skew(&self.pos);

        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&e);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&neg_epx);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&e);
        m
    }

    /// Get the 6x6 Plücker transform matrix for force vectors.
    ///
    /// X* = | E    -E[p]× |
    ///      | 0      E    |
    ///
    /// This is the transpose-inverse of the motion transform.
    pub fn to_force_matrix(&self) -> Mat6 {
        let e = self.rotation_matrix();
        let neg_epx = -e * skew(&self.pos);

        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&e);
        m.fixed_view_mut::<3, 3>(0, 3).copy_from(&neg_epx);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&e);
        m
    }

    /// Transform a spatial motion vector from frame A to frame B.
    pub fn apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let w = v.angular();
        let vel = v.linear();
        let new_w = self.rot.rotate(&w);
        let new_v = self.rot.rotate(&(vel - self.pos.cross(&w)));
        SpatialVec::new(new_w, new_v)
    }

    /// Transform a spatial force vector from frame A to frame B.
    pub fn apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let tau = f.angular();
        let force = f.linear();
        let new_f = self.rot.rotate(&force);
        let new_tau = self.rot.rotate(&(tau - self.pos.cross(&force)));
        SpatialVec::new(new_tau, new_f)
    }

    /// Inverse transform a spatial motion vector (from B to A).
    pub fn inv_apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let inv = self.rot.conjugate();
        let new_w = inv.rotate(&v.angular());
        let new_v = inv.rotate(&v.linear()) + self.pos.cross(&new_w);
        SpatialVec::new(new_w, new_v)
    }

    /// Inverse transform a spatial force vector (from B to A).
    pub fn inv_apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let inv = self.rot.conjugate();
        let new_f = inv.rotate(&f.linear());
        let new_tau = inv.rotate(&f.angular()) + self.pos.cross(&new_f);
        SpatialVec::new(new_tau, new_f)
    }

    /// Express a point given in A coordinates in B coordinates.
    pub fn transform_point(&self, p: &Vec3) -> Vec3 {
        self.rot.rotate(&(p - self.pos))
    }

    /// Express a point given in B coordinates in A coordinates.
    pub fn inv_transform_point(&self, p: &Vec3) -> Vec3 {
        self.pos + self.rot.conjugate().rotate(p)
    }

    /// Compose two transforms: self ∘ other (`other` is applied first).
    ///
    /// With `other: A -> B` and `self: B -> C` the result maps A -> C.
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            pos: other.pos + other.rot.conjugate().rotate(&self.pos),
            rot: self.rot.mul(&other.rot),
        }
    }

    /// Inverse of this transform.
    pub fn inverse(&self) -> Transform {
        Transform {
            pos: -self.rot.rotate(&self.pos),
            rot: self.rot.conjugate(),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Spatial inertia of a rigid body about its frame origin.
///
/// `h = mass * com` is the first moment of mass, *not* the center of mass, and
/// `it_3x3` is the rotational inertia about the frame origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inertia {
    /// Rotational inertia about the frame origin (3x3 symmetric).
    pub it_3x3: Mat3,
    /// First moment of mass.
    pub h: Vec3,
    /// Mass of the body.
    pub mass: f64,
}

impl Inertia {
    /// Create from raw parts.
    pub fn new(it_3x3: Mat3, h: Vec3, mass: f64) -> Self {
        Self { it_3x3, h, mass }
    }

    /// Zero inertia (massless body).
    pub fn zero() -> Self {
        Self {
            it_3x3: Mat3::zeros(),
            h: Vec3::zeros(),
            mass: 0.0,
        }
    }

    /// Inertia of a body with `mass` centered at `com` and rotational inertia
    /// `it_com` about that center of mass (parallel-axis theorem).
    pub fn from_com(mass: f64, com: Vec3, it_com: Mat3) -> Self {
        let cx = skew(&com);
        Self {
            it_3x3: it_com + cx * cx.transpose() * mass,
            h: com * mass,
            mass,
        }
    }

    /// Center of mass in the body frame; origin for a massless body.
    pub fn com(&self) -> Vec3 {
        if self.mass.abs() > 1e-12 {
            self.h / self.mass
        } else {
            Vec3::zeros()
        }
    }

    /// Convert to 6x6 spatial inertia matrix.
    ///
    /// I_spatial = | I      [h]×  |
    ///             | [h]×ᵀ   mE   |
    pub fn to_matrix(&self) -> SpatialMat {
        let hx = skew(&self.h);
        let mut mat = Mat6::zeros();
        mat.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.it_3x3);
        mat.fixed_view_mut::<3, 3>(0, 3).copy_from(&hx);
        mat.fixed_view_mut::<3, 3>(3, 0).copy_from(&hx.transpose());
        mat.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(Mat3::identity() * self.mass));
        SpatialMat::from_mat6(mat)
    }

    /// Apply to a motion vector, producing a momentum (force-type) vector.
    pub fn mul_motion(&self, v: &SpatialVec) -> SpatialVec {
        let w = v.angular();
        let vel = v.linear();
        SpatialVec::new(
            self.it_3x3 * w + self.h.cross(&vel),
            vel * self.mass - self.h.cross(&w),
        )
    }

    /// Express an inertia given in the child frame of `xform` in its parent frame.
    ///
    /// Equivalent to `Xᵀ I X` with `X = xform.to_motion_matrix()`.
    pub fn transform_to_parent(&self, xform: &Transform) -> Inertia {
        let e = xform.rotation_matrix();
        let et = e.transpose();
        let r = xform.pos;
        let et_h = et * self.h;
        let h_new = et_h + r * self.mass;
        let rx = skew(&r);
        let it = et * self.it_3x3 * e - rx * skew(&et_h) - skew(&h_new) * rx;
        Inertia {
            it_3x3: it,
            h: h_new,
            mass: self.mass,
        }
    }
}

impl Default for Inertia {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::ops::Add for Inertia {
    type Output = Inertia;
    #[inline]
    fn add(self, rhs: Inertia) -> Inertia {
        Inertia {
            it_3x3: self.it_3x3 + rhs.it_3x3,
            h: self.h + rhs.h,
            mass: self.mass + rhs.mass,
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn arb_pos() -> impl Strategy<Value = Vec3> {
        (-10.0..10.0_f64, -10.0..10.0_f64, -10.0..10.0_f64)
            .prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    fn arb_quat() -> impl Strategy<Value = Quat> {
        (
            -3.0..3.0_f64,
            -3.0..3.0_f64,
            -3.0..3.0_f64,
        )
            .prop_map(|(x, y, z)| Quat::from_euler_xyz(x, y, z))
    }

    fn arb_transform() -> impl Strategy<Value = Transform> {
        (arb_pos(), arb_quat()).prop_map(|(pos, rot)| Transform::new(pos, rot))
    }

    fn arb_spatial_vec() -> impl Strategy<Value = SpatialVec> {
        (arb_pos(), arb_pos()).prop_map(|(a, l)| SpatialVec::new(a, l))
    }

    fn arb_inertia() -> impl Strategy<Value = Inertia> {
        (0.1..10.0_f64, arb_pos(), 0.01..2.0_f64, 0.01..2.0_f64, 0.01..2.0_f64).prop_map(
            |(m, c, a, b, d)| Inertia::from_com(m, c * 0.1, Mat3::from_diagonal(&Vec3::new(a, b, d))),
        )
    }

    proptest! {
        #[test]
        fn compose_with_inverse_is_identity(xf in arb_transform()) {
            let result = xf.compose(&xf.inverse());
            prop_assert!(result.pos.norm() < EPS, "pos = {:?}", result.pos);
            let id = Mat3::identity();
            prop_assert!((result.rotation_matrix() - id).norm() < EPS);
        }

        #[test]
        fn compose_is_associative(
            a in arb_transform(),
            b in arb_transform(),
            c in arb_transform(),
        ) {
            let ab_c = a.compose(&b).compose(&c);
            let a_bc = a.compose(&b.compose(&c));
            prop_assert!((ab_c.pos - a_bc.pos).norm() < EPS);
            prop_assert!((ab_c.rotation_matrix() - a_bc.rotation_matrix()).norm() < EPS);
        }

        #[test]
        fn compose_matches_matrix_product(a in arb_transform(), b in arb_transform()) {
            let lhs = a.compose(&b).to_motion_matrix();
            let rhs = a.to_motion_matrix() * b.to_motion_matrix();
            prop_assert!((lhs - rhs).norm() < EPS * 100.0);
        }

        #[test]
        fn apply_force_matches_matrix(xf in arb_transform(), f in arb_spatial_vec()) {
            let applied = xf.apply_force(&f);
            let mat_result = SpatialMat::from_mat6(xf.to_force_matrix()).mul_vec(&f);
            prop_assert!((applied.data - mat_result.data).norm() < EPS * 100.0);
        }

        #[test]
        fn apply_motion_matches_matrix(xf in arb_transform(), v in arb_spatial_vec()) {
            let applied = xf.apply_motion(&v);
            let mat_result = SpatialMat::from_mat6(xf.to_motion_matrix()).mul_vec(&v);
            prop_assert!((applied.data - mat_result.data).norm() < EPS * 100.0);
        }

        #[test]
        fn motion_force_pairing_is_invariant(
            xf in arb_transform(),
            v in arb_spatial_vec(),
            f in arb_spatial_vec(),
        ) {
            let before = v.dot(&f);
            let after = xf.apply_motion(&v).dot(&xf.apply_force(&f));
            prop_assert!((before - after).abs() < 1e-7 * (1.0 + before.abs()));
        }

        #[test]
        fn inertia_transform_matches_congruence(xf in arb_transform(), si in arb_inertia()) {
            let x = xf.to_motion_matrix();
            let expected = x.transpose() * si.to_matrix().data * x;
            let got = si.transform_to_parent(&xf).to_matrix().data;
            prop_assert!((expected - got).norm() < 1e-7 * (1.0 + expected.norm()));
        }

        #[test]
        fn inertia_matrix_is_symmetric(si in arb_inertia()) {
            let mat = si.to_matrix().data;
            prop_assert!((mat - mat.transpose()).norm() < EPS);
        }

        #[test]
        fn quat_to_matrix_is_rotation(q in arb_quat()) {
            let m = q.to_matrix();
            prop_assert!((m.determinant() - 1.0).abs() < EPS, "det = {}", m.determinant());
            prop_assert!((m * m.transpose() - Mat3::identity()).norm() < EPS);
        }
    }
}
