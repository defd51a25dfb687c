//! Collision/visual primitives that carry mass and derive link inertia.

use kinetree_math::{Inertia, Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// A solid primitive attached to a link.
///
/// `com` is the center of mass in the link frame. Cylinders and capsules are
/// aligned with the link's x axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    Sphere {
        mass: f64,
        com: Vec3,
        radius: f64,
    },
    Box {
        mass: f64,
        com: Vec3,
        dim_x: f64,
        dim_y: f64,
        dim_z: f64,
    },
    Cylinder {
        mass: f64,
        com: Vec3,
        radius: f64,
        length: f64,
    },
    Capsule {
        mass: f64,
        com: Vec3,
        radius: f64,
        length: f64,
    },
}

impl Geometry {
    pub fn sphere(mass: f64, com: Vec3, radius: f64) -> Self {
        Geometry::Sphere { mass, com, radius }
    }

    pub fn cuboid(mass: f64, com: Vec3, dim_x: f64, dim_y: f64, dim_z: f64) -> Self {
        Geometry::Box {
            mass,
            com,
            dim_x,
            dim_y,
            dim_z,
        }
    }

    pub fn cube(mass: f64, com: Vec3, dim: f64) -> Self {
        Self::cuboid(mass, com, dim, dim, dim)
    }

    pub fn cylinder(mass: f64, com: Vec3, radius: f64, length: f64) -> Self {
        Geometry::Cylinder {
            mass,
            com,
            radius,
            length,
        }
    }

    pub fn capsule(mass: f64, com: Vec3, radius: f64, length: f64) -> Self {
        Geometry::Capsule {
            mass,
            com,
            radius,
            length,
        }
    }

    pub fn mass(&self) -> f64 {
        match *self {
            Geometry::Sphere { mass, .. }
            | Geometry::Box { mass, .. }
            | Geometry::Cylinder { mass, .. }
            | Geometry::Capsule { mass, .. } => mass,
        }
    }

    pub fn com(&self) -> Vec3 {
        match *self {
            Geometry::Sphere { com, .. }
            | Geometry::Box { com, .. }
            | Geometry::Cylinder { com, .. }
            | Geometry::Capsule { com, .. } => com,
        }
    }

    /// Rotational inertia about the center of mass.
    pub fn inertia_3x3(&self) -> Mat3 {
        match *self {
            Geometry::Sphere { mass, radius, .. } => {
                Mat3::identity() * (0.4 * mass * radius * radius)
            }
            Geometry::Box {
                mass,
                dim_x,
                dim_y,
                dim_z,
                ..
            } => {
                let (x2, y2, z2) = (dim_x * dim_x, dim_y * dim_y, dim_z * dim_z);
                Mat3::from_diagonal(&Vec3::new(y2 + z2, x2 + z2, x2 + y2)) * (mass / 12.0)
            }
            Geometry::Cylinder {
                mass,
                radius,
                length,
                ..
            } => {
                let r2 = radius * radius;
                let radial = 3.0 * r2 + length * length;
                Mat3::from_diagonal(&Vec3::new(6.0 * r2, radial, radial)) * (mass / 12.0)
            }
            Geometry::Capsule {
                mass,
                radius,
                length,
                ..
            } => {
                // Cylinder plus two hemispherical caps of uniform density.
                let r2 = radius * radius;
                let v_cyl = std::f64::consts::PI * r2 * length;
                let v_caps = 4.0 / 3.0 * std::f64::consts::PI * r2 * radius;
                let total = v_cyl + v_caps;
                let (m_cyl, m_caps) = if total > 0.0 {
                    (mass * v_cyl / total, mass * v_caps / total)
                } else {
                    (0.0, mass)
                };
                let axial = m_cyl * r2 / 2.0 + m_caps * 0.4 * r2;
                let radial = m_cyl * (3.0 * r2 + length * length) / 12.0
                    + m_caps * (0.4 * r2 + length * length / 4.0 + 3.0 * length * radius / 8.0);
                Mat3::from_diagonal(&Vec3::new(axial, radial, radial))
            }
        }
    }

    /// Spatial inertia about the link frame origin.
    pub fn to_inertia(&self) -> Inertia {
        Inertia::from_com(self.mass(), self.com(), self.inertia_3x3())
    }
}

/// Sum of the spatial inertias of `geoms`; zero for an empty slice.
pub fn combined_inertia(geoms: &[Geometry]) -> Inertia {
    geoms
        .iter()
        .fold(Inertia::zero(), |acc, g| acc + g.to_inertia())
}
