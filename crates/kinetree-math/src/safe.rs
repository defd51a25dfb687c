//! Guarded numerics that return a well-defined value instead of NaN.

use crate::Vec3;

/// Norms below this are treated as zero.
pub const EPS: f64 = 1e-10;

/// Euclidean norm, reported as exactly zero below [`EPS`].
#[inline]
pub fn safe_norm(v: &Vec3) -> f64 {
    let n = v.norm();
    if n < EPS { 0.0 } else { n }
}

/// Unit vector along `v`, or the zero vector when `v` is (nearly) zero.
#[inline]
pub fn safe_normalize(v: &Vec3) -> Vec3 {
    let n = v.norm();
    if n < EPS { Vec3::zeros() } else { v / n }
}

/// `acos` with its argument clamped into [-1, 1].
#[inline]
pub fn safe_arccos(x: f64) -> f64 {
    x.clamp(-1.0, 1.0).acos()
}

/// `asin` with its argument clamped into [-1, 1].
#[inline]
pub fn safe_arcsin(x: f64) -> f64 {
    x.clamp(-1.0, 1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_vector_is_guarded() {
        let z = Vec3::zeros();
        assert_eq!(safe_norm(&z), 0.0);
        assert_eq!(safe_normalize(&z), Vec3::zeros());
    }

    #[test]
    fn test_out_of_domain_arccos() {
        assert_eq!(safe_arccos(1.0 + 1e-12), 0.0);
        assert!((safe_arccos(-1.0 - 1e-12) - std::f64::consts::PI).abs() < 1e-15);
        assert!(!safe_arcsin(2.0).is_nan());
    }

    #[test]
    fn test_normalize_regular_vector() {
        let v = safe_normalize(&Vec3::new(3.0, 0.0, 4.0));
        assert!((v.norm() - 1.0).abs() < 1e-15);
        assert!((v.x - 0.6).abs() < 1e-15);
    }
}
