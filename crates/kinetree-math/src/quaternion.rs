//! Quaternion utilities for 3D rotations.
//!
//! Convention: q = [w; x; y; z] where w is scalar, (x,y,z) is vector part.
//! `to_matrix` is the Hamilton-product homomorphism, so
//! `(a.mul(&b)).to_matrix() == a.to_matrix() * b.to_matrix()`.

use crate::safe::{EPS, safe_arccos};
use crate::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// A quaternion, normally of unit length, representing a 3D rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    /// Scalar part (w).
    pub w: f64,
    /// Vector part (x, y, z).
    pub v: Vec3,
}

impl Quat {
    /// Create a new quaternion from scalar and vector parts.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            w,
            v: Vec3::new(x, y, z),
        }
    }

    /// Read `[w, x, y, z]` from the first four entries of a slice.
    pub fn from_slice(s: &[f64]) -> Self {
        Self::new(s[0], s[1], s[2], s[3])
    }

    /// `[w, x, y, z]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.w, self.v.x, self.v.y, self.v.z]
    }

    /// Identity quaternion (no rotation).
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            v: Vec3::zeros(),
        }
    }

    /// Create quaternion from axis-angle representation.
    /// axis should be a unit vector, angle in radians.
    pub fn from_axis_angle(axis: &Vec3, angle: f64) -> Self {
        let half_angle = angle * 0.5;
        let (s, c) = half_angle.sin_cos();
        Self { w: c, v: *axis * s }
    }

    /// Compose elementary rotations about x, then y, then z (intrinsic).
    pub fn from_euler_xyz(x: f64, y: f64, z: f64) -> Self {
        let qx = Self::from_axis_angle(&Vec3::x(), x);
        let qy = Self::from_axis_angle(&Vec3::y(), y);
        let qz = Self::from_axis_angle(&Vec3::z(), z);
        qx.mul(&qy).mul(&qz)
    }

    /// Euclidean norm of the four components.
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.v.norm_squared()).sqrt()
    }

    /// Normalize this quaternion to unit length.
    ///
    /// A (nearly) zero quaternion normalizes to the identity.
    pub fn normalize(&self) -> Self {
        let norm = self.norm();
        if norm < 1e-12 {
            return Self::identity();
        }
        Self {
            w: self.w / norm,
            v: self.v / norm,
        }
    }

    /// Quaternion multiplication: self * other.
    pub fn mul(&self, other: &Quat) -> Quat {
        Quat {
            w: self.w * other.w - self.v.dot(&other.v),
            v: self.v.cross(&other.v) + other.v * self.w + self.v * other.w,
        }
    }

    /// Conjugate of the quaternion (inverse for unit quaternions).
    pub fn conjugate(&self) -> Quat {
        Quat {
            w: self.w,
            v: -self.v,
        }
    }

    /// Multiplicative inverse; the identity for a (nearly) zero quaternion.
    pub fn inverse(&self) -> Quat {
        let n2 = self.w * self.w + self.v.norm_squared();
        if n2 < 1e-24 {
            return Self::identity();
        }
        Quat {
            w: self.w / n2,
            v: -self.v / n2,
        }
    }

    /// Rotate a vector: `to_matrix() * x`.
    pub fn rotate(&self, x: &Vec3) -> Vec3 {
        let t = self.v.cross(x) * 2.0;
        x + t * self.w + self.v.cross(&t)
    }

    /// Convert quaternion to 3x3 rotation matrix.
    pub fn to_matrix(&self) -> Mat3 {
        let w = self.w;
        let x = self.v.x;
        let y = self.v.y;
        let z = self.v.z;

        let x2 = x * x;
        let y2 = y * y;
        let z2 = z * z;
        let xy = x * y;
        let xz = x * z;
        let yz = y * z;
        let wx = w * x;
        let wy = w * y;
        let wz = w * z;

        Mat3::new(
            1.0 - 2.0 * (y2 + z2),
            2.0 * (xy - wz),
            2.0 * (xz + wy),
            2.0 * (xy + wz),
            1.0 - 2.0 * (x2 + z2),
            2.0 * (yz - wx),
            2.0 * (xz - wy),
            2.0 * (yz + wx),
            1.0 - 2.0 * (x2 + y2),
        )
    }

    /// Convert rotation matrix to quaternion.
    /// Reference: Shepperd's method (stable for all rotation matrices).
    pub fn from_matrix(m: &Mat3) -> Quat {
        let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

        if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0; // s = 4*w
            Quat {
                w: 0.25 * s,
                v: Vec3::new(
                    (m[(2, 1)] - m[(1, 2)]) / s,
                    (m[(0, 2)] - m[(2, 0)]) / s,
                    (m[(1, 0)] - m[(0, 1)]) / s,
                ),
            }
        } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
            let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0; // s = 4*x
            Quat {
                w: (m[(2, 1)] - m[(1, 2)]) / s,
                v: Vec3::new(
                    0.25 * s,
                    (m[(0, 1)] + m[(1, 0)]) / s,
                    (m[(0, 2)] + m[(2, 0)]) / s,
                ),
            }
        } else if m[(1, 1)] > m[(2, 2)] {
            let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0; // s = 4*y
            Quat {
                w: (m[(0, 2)] - m[(2, 0)]) / s,
                v: Vec3::new(
                    (m[(0, 1)] + m[(1, 0)]) / s,
                    0.25 * s,
                    (m[(1, 2)] + m[(2, 1)]) / s,
                ),
            }
        } else {
            let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0; // s = 4*z
            Quat {
                w: (m[(1, 0)] - m[(0, 1)]) / s,
                v: Vec3::new(
                    (m[(0, 2)] + m[(2, 0)]) / s,
                    (m[(1, 2)] + m[(2, 1)]) / s,
                    0.25 * s,
                ),
            }
        }
    }

    /// Exponential map: exp(theta u) where theta u is axis-angle representation.
    /// Converts axis-angle to quaternion via q = [cos(theta/2), sin(theta/2) * u].
    /// For small angles, uses first-order approximation.
    pub fn exp(w: &Vec3) -> Quat {
        let theta = w.norm();
        if theta < EPS {
            Quat {
                w: 1.0,
                v: *w * 0.5,
            }
            .normalize()
        } else {
            let half_theta = theta * 0.5;
            Quat {
                w: half_theta.cos(),
                v: *w * (half_theta.sin() / theta),
            }
        }
    }

    /// Logarithmic map: log(q) returns the axis-angle vector theta u such that q = exp(theta u).
    pub fn log(&self) -> Vec3 {
        let v_norm = self.v.norm();
        if v_norm < EPS {
            return Vec3::zeros();
        }
        let angle = 2.0 * v_norm.atan2(self.w);
        self.v * (angle / v_norm)
    }

    /// Rotation axis and angle in `[0, 2π]`.
    ///
    /// Near-zero rotations report the x axis and a zero angle.
    pub fn to_rot_axis(&self) -> (Vec3, f64) {
        let q = self.normalize();
        let v_norm = q.v.norm();
        if v_norm < EPS {
            return (Vec3::x(), 0.0);
        }
        (q.v / v_norm, 2.0 * safe_arccos(q.w))
    }

    /// Smallest rotation angle in `[0, π]` represented by this quaternion.
    pub fn angle(&self) -> f64 {
        let q = self.normalize();
        2.0 * safe_arccos(q.w.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-10;

    #[test]
    fn test_identity() {
        let q = Quat::identity();
        assert_eq!(q.w, 1.0);
        assert_eq!(q.v, Vec3::zeros());
    }

    #[test]
    fn test_axis_angle() {
        let axis = Vec3::new(0.0, 0.0, 1.0);
        let angle = std::f64::consts::FRAC_PI_2;
        let q = Quat::from_axis_angle(&axis, angle);

        assert!((q.w - (angle / 2.0).cos()).abs() < EPS);
        assert!((q.v.z - (angle / 2.0).sin()).abs() < EPS);
    }

    #[test]
    fn test_normalize() {
        let q = Quat::new(1.0, 2.0, 3.0, 4.0);
        assert!((q.normalize().norm() - 1.0).abs() < EPS);
        assert_eq!(Quat::new(0.0, 0.0, 0.0, 0.0).normalize(), Quat::identity());
    }

    #[test]
    fn test_multiplication() {
        // 90 degree rotation about Z, twice
        let axis = Vec3::new(0.0, 0.0, 1.0);
        let q1 = Quat::from_axis_angle(&axis, std::f64::consts::FRAC_PI_2);
        let result = q1.mul(&q1);
        let expected = Quat::from_axis_angle(&axis, std::f64::consts::PI);

        assert!((result.w - expected.w).abs() < EPS);
        assert!((result.v - expected.v).norm() < EPS);
    }

    #[test]
    fn test_to_matrix_and_rotate_agree() {
        let q = Quat::from_axis_angle(&Vec3::new(0.0, 0.0, 1.0), std::f64::consts::FRAC_PI_2);
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = q.to_matrix() * x;
        assert!((y - Vec3::new(0.0, 1.0, 0.0)).norm() < EPS);
        assert!((q.rotate(&x) - y).norm() < EPS);
    }

    #[test]
    fn test_product_matches_matrix_product() {
        let a = Quat::from_euler_xyz(0.3, -0.2, 1.1);
        let b = Quat::from_euler_xyz(-0.7, 0.4, 0.1);
        let lhs = a.mul(&b).to_matrix();
        let rhs = a.to_matrix() * b.to_matrix();
        assert!((lhs - rhs).norm() < EPS);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let axis = Vec3::new(1.0, 2.0, 3.0).normalize();
        let q = Quat::from_axis_angle(&axis, 0.7);
        let q2 = Quat::from_matrix(&q.to_matrix());

        let same = (q.w - q2.w).abs() < EPS && (q.v - q2.v).norm() < EPS;
        let negated = (q.w + q2.w).abs() < EPS && (q.v + q2.v).norm() < EPS;
        assert!(same || negated);
    }

    #[test]
    fn test_exp_log() {
        let w = Vec3::new(0.1, 0.2, 0.3);
        let w2 = Quat::exp(&w).log();
        assert!((w - w2).norm() < EPS);
    }

    #[test]
    fn test_conjugate_and_inverse() {
        let q = Quat::new(0.5, 0.5, 0.5, 0.5).normalize();
        let result = q.mul(&q.conjugate());
        assert!((result.w - 1.0).abs() < EPS);
        assert!(result.v.norm() < EPS);

        let p = Quat::new(2.0, 0.0, 0.0, 0.0);
        assert!((p.mul(&p.inverse()).w - 1.0).abs() < EPS);
    }

    #[test]
    fn test_rot_axis_guarded_near_zero() {
        let (axis, angle) = Quat::identity().to_rot_axis();
        assert_eq!(angle, 0.0);
        assert!(!axis.x.is_nan());

        let q = Quat::from_axis_angle(&Vec3::y(), 0.4);
        let (axis, angle) = q.to_rot_axis();
        assert!((axis - Vec3::y()).norm() < EPS);
        assert!((angle - 0.4).abs() < EPS);
    }
}
