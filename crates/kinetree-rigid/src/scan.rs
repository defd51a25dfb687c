//! Topological traversal of the link tree.
//!
//! Both scans are single index-ordered passes over the links. They rely on the
//! invariant that every parent index is smaller than its children's.

use std::ops::Add;

use kinetree_model::error::check_len;
use kinetree_model::{Result, System};

/// Root-to-leaf scan.
///
/// `f(carry, i, &args[i])` receives the result of link `i`'s parent as its
/// carry, or `y0` when `i` is a root. Returns every link's result in link order.
pub fn scan_forward<Y, A, F>(system: &System, y0: Y, args: &[A], mut f: F) -> Result<Vec<Y>>
where
    Y: Clone,
    F: FnMut(Y, usize, &A) -> Y,
{
    let n = system.num_links();
    check_len("scan arguments", n, args.len())?;

    let mut ys: Vec<Y> = Vec::with_capacity(n);
    for (i, arg) in args.iter().enumerate() {
        let carry = match system.parent(i) {
            Some(p) => ys[p].clone(),
            None => y0.clone(),
        };
        ys.push(f(carry, i, arg));
    }
    Ok(ys)
}

/// Leaf-to-root scan.
///
/// `f(carry, i, &args[i])` receives the sum of the results of link `i`'s
/// direct children as its carry, or `y0` when `i` has no children. Returns
/// every link's result in link order.
pub fn scan_reverse<Y, A, F>(system: &System, y0: Y, args: &[A], mut f: F) -> Result<Vec<Y>>
where
    Y: Clone + Add<Output = Y>,
    F: FnMut(Y, usize, &A) -> Y,
{
    let n = system.num_links();
    check_len("scan arguments", n, args.len())?;

    let mut ys: Vec<Option<Y>> = vec![None; n];
    for i in (0..n).rev() {
        let carry = system
            .children(i)
            .iter()
            .filter_map(|&c| ys[c].clone())
            .reduce(|acc, y| acc + y)
            .unwrap_or_else(|| y0.clone());
        ys[i] = Some(f(carry, i, &args[i]));
    }
    Ok(ys.into_iter().flatten().collect())
}
