//! Composite Rigid Body Algorithm (CRBA) -- mass matrix computation.

use kinetree_math::{DMat, DVec, Inertia, SpatialVec, Transform};
use kinetree_model::{Result, System};

use crate::kinematics::{local_transforms, motion_subspace};
use crate::scan::scan_reverse;

/// Composite inertia of every link's subtree, expressed in that link's body frame.
pub fn composite_inertias(system: &System, locals: &[Transform]) -> Result<Vec<Inertia>> {
    let mut composite = vec![Inertia::zero(); system.num_links()];
    scan_reverse(system, Inertia::zero(), locals, |children, i, local| {
        composite[i] = system.link(i).inertia + children;
        composite[i].transform_to_parent(local)
    })?;
    Ok(composite)
}

/// Compute the joint-space mass matrix M(q) using CRBA.
///
/// Returns a `qd_size x qd_size` matrix including the armature on its diagonal.
/// Only the upper triangle is computed; the lower triangle is its mirror, so the
/// result is exactly symmetric.
pub fn compute_mass_matrix(system: &System, q: &DVec) -> Result<DMat> {
    let n = system.qd_size();
    let locals = local_transforms(system, q)?;
    let composite = composite_inertias(system, &locals)?;
    let subspaces: Vec<Vec<SpatialVec>> = (0..system.num_links())
        .map(|i| motion_subspace(system, i, &q.as_slice()[system.q_range(i)]))
        .collect();

    let mut mass_matrix = DMat::zeros(n, n);
    for i in 0..system.num_links() {
        let s_i = &subspaces[i];
        let v_i = system.qd_offset(i);

        for (ci, col) in s_i.iter().enumerate() {
            let f_i = composite[i].mul_motion(col);

            // Diagonal block, upper part.
            for (ri, row) in s_i.iter().enumerate().take(ci + 1) {
                mass_matrix[(v_i + ri, v_i + ci)] = row.dot(&f_i);
            }

            // Off-diagonal: walk up the tree; ancestors have smaller offsets.
            let mut f = locals[i].inv_apply_force(&f_i);
            let mut j = system.parent(i);
            while let Some(ju) = j {
                let v_j = system.qd_offset(ju);
                for (rj, s_j) in subspaces[ju].iter().enumerate() {
                    mass_matrix[(v_j + rj, v_i + ci)] = s_j.dot(&f);
                }
                f = locals[ju].inv_apply_force(&f);
                j = system.parent(ju);
            }
        }
    }

    for c in 0..n {
        for r in 0..c {
            mass_matrix[(c, r)] = mass_matrix[(r, c)];
        }
        mass_matrix[(c, c)] += system.armature()[c];
    }
    Ok(mass_matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kinetree_math::{Mat3, Vec3};
    use kinetree_model::{Geometry, SystemBuilder};

    #[test]
    fn test_point_mass_on_hinge() {
        // Point mass 2 kg at distance 0.5 from a z hinge: M = m r².
        let sys = SystemBuilder::new()
            .add_link("arm", -1, "rz", Transform::identity())
            .inertia(Inertia::from_com(2.0, Vec3::new(0.5, 0.0, 0.0), Mat3::zeros()))
            .build()
            .unwrap();
        let m = compute_mass_matrix(&sys, &DVec::from_element(1, 0.7)).unwrap();
        assert_relative_eq!(m[(0, 0)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_slider_mass_and_armature() {
        let sys = SystemBuilder::new()
            .add_link("cart", -1, "px", Transform::identity())
            .geometry(Geometry::cube(3.0, Vec3::new(0.0, 0.2, 0.0), 0.1))
            .armature(vec![0.25])
            .build()
            .unwrap();
        let m = compute_mass_matrix(&sys, &DVec::zeros(1)).unwrap();
        assert_relative_eq!(m[(0, 0)], 3.25, epsilon = 1e-12);
    }

    #[test]
    fn test_free_body_mass_matrix_is_spatial_inertia() {
        let geom = Geometry::cuboid(1.5, Vec3::new(0.1, -0.2, 0.3), 0.4, 0.2, 0.1);
        let sys = SystemBuilder::new()
            .add_link("body", -1, "free", Transform::identity())
            .geometry(geom.clone())
            .build()
            .unwrap();
        let m = compute_mass_matrix(&sys, &sys.neutral_q()).unwrap();
        let expected = geom.to_inertia().to_matrix().data;
        for r in 0..6 {
            for c in 0..6 {
                assert_relative_eq!(m[(r, c)], expected[(r, c)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_composite_inertia_of_chain() {
        let sys = SystemBuilder::new()
            .add_link("a", -1, "ry", Transform::identity())
            .geometry(Geometry::sphere(1.0, Vec3::zeros(), 0.1))
            .add_link("b", 0, "ry", Transform::from_translation(Vec3::x()))
            .geometry(Geometry::sphere(2.0, Vec3::zeros(), 0.1))
            .build()
            .unwrap();
        let locals = local_transforms(&sys, &DVec::zeros(2)).unwrap();
        let composite = composite_inertias(&sys, &locals).unwrap();
        assert_relative_eq!(composite[0].mass, 3.0, epsilon = 1e-12);
        assert_relative_eq!(composite[0].h, Vec3::new(2.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(composite[1].mass, 2.0, epsilon = 1e-12);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use kinetree_math::Vec3;
    use kinetree_model::{Geometry, SystemBuilder};
    use proptest::prelude::*;

    fn branched(masses: [f64; 4]) -> System {
        let seg = |m: f64| Geometry::cuboid(m, Vec3::new(0.2, 0.0, 0.0), 0.4, 0.1, 0.1);
        SystemBuilder::new()
            .add_link("base", -1, "free", Transform::identity())
            .geometry(seg(masses[0]))
            .add_link("shoulder", 0, "spherical", Transform::from_translation(Vec3::x() * 0.4))
            .geometry(seg(masses[1]))
            .add_link("elbow", 1, "ry", Transform::from_translation(Vec3::x() * 0.4))
            .geometry(seg(masses[2]))
            .add_link("slider", 0, "pz", Transform::from_translation(Vec3::y() * 0.2))
            .geometry(seg(masses[3]))
            .build()
            .unwrap()
    }

    fn arb_q() -> impl Strategy<Value = DVec> {
        prop::collection::vec(-2.0..2.0_f64, 13).prop_map(DVec::from_vec)
    }

    proptest! {
        #[test]
        fn mass_matrix_is_exactly_symmetric_and_positive_definite(
            masses in prop::array::uniform4(0.1..5.0_f64),
            q in arb_q(),
        ) {
            let sys = branched(masses);
            let m = compute_mass_matrix(&sys, &q).unwrap();
            prop_assert_eq!(m.nrows(), sys.qd_size());
            for r in 0..m.nrows() {
                for c in 0..m.ncols() {
                    prop_assert_eq!(m[(r, c)].to_bits(), m[(c, r)].to_bits());
                }
            }
            let eig = m.symmetric_eigenvalues();
            prop_assert!(eig.iter().all(|&e| e > 0.0), "eigenvalues: {}", eig);
        }
    }
}
