//! Balance (isometric log-ratio) basis over a binary tree of features
//!
//! Each internal node of a binary tree contrasts the leaves of its left
//! subtree against the leaves of its right subtree. With `r` leaves on
//! the left and `s` leaves on the right, the node contributes one row
//!
//! ```text
//!   +sqrt(s / (r (r + s)))   for every left leaf
//!   -sqrt(r / (s (r + s)))   for every right leaf
//! ```
//!
//! so that the `D - 1` rows are orthonormal and orthogonal to `1`.

use crate::sparse_util::CscMatrix;
use crate::traits::MatTriplets;
use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub enum TreeNode {
    Leaf(usize),
    Internal {
        left: usize,
        right: usize,
        num_leaves: usize,
    },
}

impl TreeNode {
    pub fn num_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 1,
            TreeNode::Internal { num_leaves, .. } => *num_leaves,
        }
    }
}

/// A rooted binary tree whose leaves are feature indices `0..num_leaves`
#[derive(Clone, Debug)]
pub struct BinaryTree {
    nodes: Vec<TreeNode>,
    root: usize,
}

impl BinaryTree {
    pub fn num_leaves(&self) -> usize {
        self.nodes[self.root].num_leaves()
    }

    pub fn num_internal(&self) -> usize {
        self.nodes.len() - self.num_leaves()
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[self.root]
    }

    /// Internal node indexes in pre-order from the root
    pub fn internal_preorder(&self) -> Vec<usize> {
        let mut ret = Vec::with_capacity(self.num_internal());
        let mut stack = vec![self.root];
        while let Some(v) = stack.pop() {
            if let TreeNode::Internal { left, right, .. } = self.nodes[v] {
                ret.push(v);
                stack.push(right);
                stack.push(left);
            }
        }
        ret
    }

    /// Feature indexes under the node `v`
    pub fn leaves_under(&self, v: usize) -> Vec<usize> {
        let mut ret = vec![];
        let mut stack = vec![v];
        while let Some(u) = stack.pop() {
            match self.nodes[u] {
                TreeNode::Leaf(j) => ret.push(j),
                TreeNode::Internal { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        ret
    }
}

/// Random agglomerative linkage over `num_features` leaves
///
/// Two distinct clusters are drawn uniformly at random and merged
/// until a single root remains.
pub fn random_linkage(num_features: usize) -> anyhow::Result<BinaryTree> {
    random_linkage_with_rng(num_features, &mut rand::rng())
}

/// Same as [`random_linkage`] with a caller-supplied random number generator
pub fn random_linkage_with_rng<R: Rng + ?Sized>(
    num_features: usize,
    rng: &mut R,
) -> anyhow::Result<BinaryTree> {
    if num_features < 2 {
        anyhow::bail!(
            "need at least two features to build a balance tree, got {}",
            num_features
        );
    }

    let mut nodes: Vec<TreeNode> = (0..num_features).map(TreeNode::Leaf).collect();
    let mut clusters: Vec<usize> = (0..num_features).collect();

    while clusters.len() > 1 {
        let i = rng.random_range(0..clusters.len());
        let mut j = rng.random_range(0..(clusters.len() - 1));
        if j >= i {
            j += 1;
        }

        let (left, right) = (clusters[i], clusters[j]);
        let num_leaves = nodes[left].num_leaves() + nodes[right].num_leaves();
        nodes.push(TreeNode::Internal {
            left,
            right,
            num_leaves,
        });

        // remove the larger position first so the smaller stays valid
        clusters.swap_remove(i.max(j));
        clusters.swap_remove(i.min(j));
        clusters.push(nodes.len() - 1);
    }

    let root = clusters[0];
    Ok(BinaryTree { nodes, root })
}

/// Sparse balance basis of the tree, `(D - 1) x D`
///
/// Rows follow the pre-order of internal nodes; columns are features.
pub fn sparse_balance_basis(tree: &BinaryTree) -> anyhow::Result<CscMatrix<f32>> {
    let num_features = tree.num_leaves();
    let internal = tree.internal_preorder();

    let mut triplets = Vec::with_capacity(internal.len() * 2);

    for (row, &v) in internal.iter().enumerate() {
        let (left, right) = match tree.nodes[v] {
            TreeNode::Internal { left, right, .. } => (left, right),
            TreeNode::Leaf(_) => unreachable!("pre-order only visits internal nodes"),
        };

        let r = tree.nodes[left].num_leaves() as f64;
        let s = tree.nodes[right].num_leaves() as f64;

        let a = (s / (r * (r + s))).sqrt() as f32;
        let b = -(r / (s * (r + s))).sqrt() as f32;

        triplets.extend(tree.leaves_under(left).into_iter().map(|j| (row, j, a)));
        triplets.extend(tree.leaves_under(right).into_iter().map(|j| (row, j, b)));
    }

    CscMatrix::<f32>::from_nonzero_triplets(internal.len(), num_features, triplets)
}

/// Build a random balance basis for `num_features` features
pub fn build_balance_basis(num_features: usize) -> anyhow::Result<CscMatrix<f32>> {
    let tree = random_linkage(num_features)?;
    log::debug!(
        "random linkage over {} features, {} balances",
        tree.num_leaves(),
        tree.num_internal()
    );
    sparse_balance_basis(&tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn linkage_covers_every_feature_once() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let tree = random_linkage_with_rng(13, &mut rng)?;

        assert_eq!(tree.num_leaves(), 13);
        assert_eq!(tree.num_internal(), 12);

        let mut leaves = tree.leaves_under(tree.root);
        leaves.sort();
        assert_eq!(leaves, (0..13).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn too_few_features() {
        assert!(random_linkage(1).is_err());
        assert!(random_linkage(0).is_err());
    }

    #[test]
    fn basis_rows_are_orthonormal_contrasts() -> anyhow::Result<()> {
        let basis = build_balance_basis(10)?;
        assert_eq!((basis.nrows(), basis.ncols()), (9, 10));

        let psi: DMatrix<f32> = DMatrix::from(&basis);
        let gram = &psi * psi.transpose();
        assert_abs_diff_eq!(gram, DMatrix::<f32>::identity(9, 9), epsilon = 1e-5);

        for row in psi.row_iter() {
            assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn two_features_give_the_textbook_balance() -> anyhow::Result<()> {
        let basis = build_balance_basis(2)?;
        let psi: DMatrix<f32> = DMatrix::from(&basis);
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert_abs_diff_eq!(psi[(0, 0)].abs(), h, epsilon = 1e-6);
        assert_abs_diff_eq!(psi[(0, 0)] + psi[(0, 1)], 0.0, epsilon = 1e-6);
        Ok(())
    }
}
