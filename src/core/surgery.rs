//! Structural tree repair: pruning flagged elements, collapsing same-level
//! binary joins, and restoring distance-level monotonicity.
//!
//! Every operation works on a scratch copy and swaps it in only after the
//! integrity check passes, so a failure leaves the tree untouched.

use bitvec::prelude::*;

use crate::constants::MONOTONICITY_EPSILON;
use crate::core::node::{Node, NodeId, NodeKind};
use crate::core::tree::Tree;
use crate::{Error, Result};

/// Strategy for removing non-monotonic distance steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonotonicityMode {
    /// Raise each parent's distance to its highest child's.
    Up,
    /// Lower each violating child's distance to its parent's.
    Down,
    /// Replace a violating parent's distance with a size-weighted average
    /// of its children's distances and its own, then sweep down.
    Weighted,
}

/// Mutating operations over a [`Tree`]. The borrow is exclusive for the
/// lifetime of the surgeon, matching the single-writer rule for trees.
pub struct TreeSurgeon<'a> {
    tree: &'a mut Tree,
}

impl<'a> TreeSurgeon<'a> {
    pub fn new(tree: &'a mut Tree) -> Self {
        TreeSurgeon { tree }
    }

    /// Prunes the flagged leaves and inner nodes.
    ///
    /// Inner nodes that lose all meaningful branching (fewer than two
    /// remaining leaves, or at most one effective child) are pruned as
    /// well. Children of a pruned node reattach to its nearest surviving
    /// ancestor. Pruned leaves move their coordinates to the discarded
    /// set. Saved partitions and the contained-leaves cache are dropped.
    ///
    /// Returns the number of (leaves, nodes) removed.
    pub fn cleanup(&mut self, leaf_flags: &BitSlice, node_flags: &BitSlice) -> Result<(usize, usize)> {
        let tree = &*self.tree;
        if leaf_flags.len() != tree.num_leaves() || node_flags.len() != tree.num_nodes() {
            return Err(Error::DimensionMismatch(format!(
                "flag vectors ({}, {}) do not match tree ({}, {})",
                leaf_flags.len(),
                node_flags.len(),
                tree.num_leaves(),
                tree.num_nodes()
            )));
        }
        if leaf_flags.not_any() && node_flags.not_any() {
            return Ok((0, 0));
        }

        let mut node_flags: BitVec = node_flags.to_bitvec();

        // sizes over surviving leaves only
        let mut kept_sizes = vec![0usize; tree.num_nodes()];
        for i in 0..tree.num_nodes() {
            let mut size = 0;
            for child in self.tree.nodes[i].children() {
                match child.kind {
                    NodeKind::Leaf => size += usize::from(!leaf_flags[child.index]),
                    NodeKind::Inner => size += kept_sizes[child.index],
                }
            }
            kept_sizes[i] = size;
        }
        for (i, &size) in kept_sizes.iter().enumerate() {
            if size < 2 {
                node_flags.set(i, true);
            }
        }

        // effective child counts, with pruned children bubbling theirs up
        let mut effective = vec![0usize; tree.num_nodes()];
        for i in 0..tree.num_nodes() {
            let mut count = 0;
            for child in self.tree.nodes[i].children() {
                match child.kind {
                    NodeKind::Leaf => count += usize::from(!leaf_flags[child.index]),
                    NodeKind::Inner => {
                        if node_flags[child.index] {
                            count += effective[child.index];
                        } else {
                            count += 1;
                        }
                    }
                }
            }
            effective[i] = count;
            if count <= 1 {
                node_flags.set(i, true);
            }
        }

        let pruned_leaves = leaf_flags.count_ones();
        let pruned_nodes = node_flags.count_ones();

        let mut rebuilt = rebuild_without_flagged(tree, leaf_flags, &node_flags)?;
        for (i, coord) in tree.coordinates().iter().enumerate() {
            if leaf_flags[i] {
                rebuilt.discarded.push(*coord);
            }
        }
        rebuilt.verify()?;
        *self.tree = rebuilt;
        Ok((pruned_leaves, pruned_nodes))
    }

    /// Collapses nodes joining at the same distance level as their parent
    /// into n-ary parents.
    ///
    /// With `keep_base_nodes`, meta-leaves are never merged; this requires
    /// a meta-leaf-clean tree, otherwise a warning is logged and the
    /// normal mode is used. Returns the number of nodes collapsed.
    pub fn debinarize(&mut self, keep_base_nodes: bool) -> Result<usize> {
        let keep = if keep_base_nodes && !self.tree.test_root_base_nodes() {
            log::warn!("tree is not meta-leaf-clean, debinarizing without base-node protection");
            false
        } else {
            keep_base_nodes
        };

        let tree = &*self.tree;
        let mut node_flags: BitVec = bitvec![0; tree.num_nodes()];
        for i in 0..tree.num_nodes() - 1 {
            let node = &tree.nodes[i];
            if keep && node.h_level() == 1 {
                continue;
            }
            let parent = &tree.nodes[node.parent().index];
            if node.dist_level() == parent.dist_level() {
                node_flags.set(i, true);
            }
        }
        let collapsed = node_flags.count_ones();
        if collapsed == 0 {
            return Ok(0);
        }

        let leaf_flags: BitVec = bitvec![0; tree.num_leaves()];
        let rebuilt = rebuild_without_flagged(tree, &leaf_flags, &node_flags)?;
        rebuilt.verify()?;
        *self.tree = rebuilt;
        Ok(collapsed)
    }

    /// Removes non-monotonic distance steps so that every child's level is
    /// at most its parent's (within the tolerance for `Weighted`).
    ///
    /// `error_mult` scales the base tolerance of 1e-5 and is clamped to
    /// [1, 100]; it only matters for the weighted strategy.
    pub fn force_monotonicity(&mut self, mode: MonotonicityMode, error_mult: f64) -> Result<()> {
        match mode {
            MonotonicityMode::Up => self.monotonicity_up(),
            MonotonicityMode::Down => self.monotonicity_down(),
            MonotonicityMode::Weighted => {
                let eps = (MONOTONICITY_EPSILON * error_mult.clamp(1.0, 100.0)) as f32;
                self.monotonicity_weighted(eps);
                self.monotonicity_down();
            }
        }
        self.tree.verify()
    }

    fn monotonicity_up(&mut self) {
        // ascending order, so raises cascade towards the root
        for i in 0..self.tree.nodes.len() - 1 {
            let dist = self.tree.nodes[i].dist_level();
            let parent = self.tree.nodes[i].parent().index;
            if dist > self.tree.nodes[parent].dist_level() {
                self.tree.nodes[parent].set_dist_level(dist);
            }
        }
    }

    fn monotonicity_down(&mut self) {
        // descending order, so clamps cascade towards the leaves
        for i in (0..self.tree.nodes.len()).rev() {
            let dist = self.tree.nodes[i].dist_level();
            let children: Vec<usize> = self.tree.nodes[i]
                .children()
                .iter()
                .filter(|c| c.is_inner())
                .map(|c| c.index)
                .collect();
            for c in children {
                if self.tree.nodes[c].dist_level() > dist {
                    self.tree.nodes[c].set_dist_level(dist);
                }
            }
        }
    }

    fn monotonicity_weighted(&mut self, eps: f32) {
        let n = self.tree.nodes.len();
        for start in 0..n {
            let mut j = start;
            loop {
                let parent_dist = self.tree.nodes[j].dist_level();
                let parent_size = self.tree.nodes[j].size();
                let mut violating_size = 0usize;
                let mut violating_sum = 0.0f64;
                for child in self.tree.nodes[j].children() {
                    let node = match child.kind {
                        NodeKind::Leaf => continue,
                        NodeKind::Inner => &self.tree.nodes[child.index],
                    };
                    if node.dist_level() > parent_dist * (1.0 + eps) {
                        violating_size += node.size();
                        violating_sum += f64::from(node.dist_level()) * node.size() as f64;
                    }
                }
                if violating_size == 0 {
                    break;
                }
                let corrected = ((violating_sum
                    + f64::from(parent_dist) * (parent_size - violating_size) as f64)
                    / parent_size as f64) as f32;
                self.tree.nodes[j].set_dist_level(corrected);

                let parent = self.tree.nodes[j].parent();
                if parent == NodeId::ROOT_PARENT {
                    break;
                }
                if corrected > self.tree.nodes[parent.index].dist_level() * (1.0 + eps) {
                    j = parent.index;
                } else {
                    break;
                }
            }
        }
    }
}

/// Rebuilds a tree without its flagged elements. Children of a flagged
/// node bubble up to its nearest surviving ancestor (the new root when the
/// whole ancestor chain is flagged), child order is preserved, and ids are
/// compacted in the old order. Parent pointers, sizes and h-levels are
/// rederived; saved partitions and the leaf cache are dropped.
fn rebuild_without_flagged(tree: &Tree, leaf_flags: &BitSlice, node_flags: &BitSlice) -> Result<Tree> {
    let num_leaves = tree.num_leaves();
    let num_nodes = tree.num_nodes();

    let mut new_leaf_id = vec![usize::MAX; num_leaves];
    let mut next = 0;
    for i in 0..num_leaves {
        if !leaf_flags[i] {
            new_leaf_id[i] = next;
            next += 1;
        }
    }
    let new_leaf_count = next;

    let mut new_node_id = vec![usize::MAX; num_nodes];
    let mut next = 0;
    for i in 0..num_nodes {
        if !node_flags[i] {
            new_node_id[i] = next;
            next += 1;
        }
    }
    let new_node_count = next;
    if new_node_count == 0 {
        return Err(Error::Invariant("pruning removed every inner node".to_string()));
    }

    // resolve children in old-id space; flagged nodes pass theirs through
    let mut resolved: Vec<Vec<NodeId>> = Vec::with_capacity(num_nodes);
    for i in 0..num_nodes {
        let mut list = Vec::new();
        for &child in tree.nodes[i].children() {
            match child.kind {
                NodeKind::Leaf => {
                    if !leaf_flags[child.index] {
                        list.push(child);
                    }
                }
                NodeKind::Inner => {
                    if node_flags[child.index] {
                        list.extend_from_slice(&resolved[child.index]);
                    } else {
                        list.push(child);
                    }
                }
            }
        }
        resolved.push(list);
    }

    let remap = |id: NodeId| -> NodeId {
        match id.kind {
            NodeKind::Leaf => NodeId::leaf(new_leaf_id[id.index]),
            NodeKind::Inner => NodeId::inner(new_node_id[id.index]),
        }
    };

    let mut new_nodes: Vec<Node> = Vec::with_capacity(new_node_count);
    for i in 0..num_nodes {
        if node_flags[i] {
            continue;
        }
        let children: Vec<NodeId> = resolved[i].iter().map(|&c| remap(c)).collect();
        new_nodes.push(Node::new_inner(new_node_id[i], tree.nodes[i].dist_level(), children));
    }

    // a flagged root leaves its resolved children homeless; the surviving
    // inner node with the highest id takes over as root and adopts the rest
    if node_flags[num_nodes - 1] {
        let orphans: Vec<NodeId> = resolved[num_nodes - 1].iter().map(|&c| remap(c)).collect();
        let new_root = orphans
            .iter()
            .filter(|id| id.is_inner())
            .map(|id| id.index)
            .max()
            .ok_or_else(|| Error::Invariant("pruning left no inner node to act as root".to_string()))?;
        let mut extra: Vec<NodeId> = orphans
            .into_iter()
            .filter(|&id| id != NodeId::inner(new_root))
            .collect();
        if !extra.is_empty() {
            let mut children = new_nodes[new_root].children().to_vec();
            children.append(&mut extra);
            new_nodes[new_root].set_children(children);
        }
    }

    let mut coordinates = Vec::with_capacity(new_leaf_count);
    let mut trackids = Vec::with_capacity(new_leaf_count);
    for i in 0..num_leaves {
        if !leaf_flags[i] {
            coordinates.push(tree.coordinates[i]);
            trackids.push(tree.trackids[i]);
        }
    }

    let mut rebuilt = Tree {
        name: tree.name.clone(),
        grid: tree.grid,
        extent: tree.extent,
        num_streamlines: tree.num_streamlines,
        log_factor: tree.log_factor,
        cpcc: tree.cpcc,
        leaves: (0..new_leaf_count).map(Node::new_leaf).collect(),
        nodes: new_nodes,
        coordinates,
        trackids,
        discarded: tree.discarded.clone(),
        contained_leaves: None,
        selected_values: Vec::new(),
        selected_partitions: Vec::new(),
        selected_colors: Vec::new(),
    };
    rebuilt.rewire_from_children()?;
    Ok(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinate::{Coordinate, Grid};
    use crate::core::tree::fixtures::five_leaf;
    use crate::core::tree::JoinList;
    use float_cmp::approx_eq;

    fn build(num_leaves: usize, joins: JoinList) -> Tree {
        let coordinates = (0..num_leaves)
            .map(|i| Coordinate::new(i as i16, 0, 0))
            .collect::<Vec<_>>();
        let trackids = (0..num_leaves).collect::<Vec<_>>();
        Tree::build(
            "surgery".to_string(),
            Grid::Nifti,
            Coordinate::new(num_leaves as i16, 1, 1),
            0,
            0.0,
            0.0,
            coordinates,
            trackids,
            Vec::new(),
            joins,
        )
        .unwrap()
    }

    #[test]
    fn test_cleanup_prunes_leaves() {
        let mut tree = five_leaf();
        let mut leaf_flags = bitvec![0; 5];
        leaf_flags.set(0, true);
        leaf_flags.set(1, true);
        let node_flags = bitvec![0; 4];

        let (leaves, nodes) = TreeSurgeon::new(&mut tree)
            .cleanup(&leaf_flags, &node_flags)
            .unwrap();
        assert_eq!(leaves, 2);
        // the (0,1) join loses all leaves, and the old root is left with a
        // single effective child
        assert_eq!(nodes, 2);
        assert!(tree.check());
        assert_eq!(tree.num_leaves(), 3);
        assert_eq!(tree.num_nodes(), 2);
        assert_eq!(tree.num_discarded(), 2);
        assert_eq!(tree.discarded()[0], Coordinate::new(0, 1, 2));
        assert_eq!(tree.root().size(), 3);
    }

    #[test]
    fn test_cleanup_without_flags_is_noop() {
        let mut tree = five_leaf();
        let reference = tree.clone();
        let (leaves, nodes) = TreeSurgeon::new(&mut tree)
            .cleanup(&bitvec![0; 5], &bitvec![0; 4])
            .unwrap();
        assert_eq!((leaves, nodes), (0, 0));
        assert_eq!(tree.leaves, reference.leaves);
        assert_eq!(tree.nodes, reference.nodes);
        assert_eq!(tree.coordinates, reference.coordinates);
    }

    #[test]
    fn test_cleanup_drops_partitions() {
        let mut tree = five_leaf();
        tree.insert_partitions(vec![vec![0, 2]], vec![1.0], None).unwrap();
        let mut leaf_flags = bitvec![0; 5];
        leaf_flags.set(4, true);
        TreeSurgeon::new(&mut tree).cleanup(&leaf_flags, &bitvec![0; 4]).unwrap();
        assert!(tree.selected_partitions().is_empty());
        assert!(tree.check());
    }

    #[test]
    fn test_debinarize_collapses_chain() {
        // (l0,l1)@0.5 then +l2@0.5 then root +l3@0.8
        let mut tree = build(
            4,
            vec![
                (0.5, vec![NodeId::leaf(0), NodeId::leaf(1)]),
                (0.5, vec![NodeId::inner(0), NodeId::leaf(2)]),
                (0.8, vec![NodeId::inner(1), NodeId::leaf(3)]),
            ],
        );
        let collapsed = TreeSurgeon::new(&mut tree).debinarize(false).unwrap();
        assert_eq!(collapsed, 1);
        assert!(tree.check());
        assert_eq!(tree.num_nodes(), 2);
        assert_eq!(tree.inner(0).unwrap().children().len(), 3);
        assert!(approx_eq!(f32, tree.inner(0).unwrap().dist_level(), 0.5));
    }

    #[test]
    fn test_debinarize_keeps_base_nodes() {
        // meta-leaf-clean: both children of the root are base nodes at the
        // root's own level
        let joins: JoinList = vec![
            (0.5, vec![NodeId::leaf(0), NodeId::leaf(1)]),
            (0.5, vec![NodeId::leaf(2), NodeId::leaf(3)]),
            (0.5, vec![NodeId::inner(0), NodeId::inner(1)]),
        ];
        let mut tree = build(4, joins.clone());
        assert_eq!(TreeSurgeon::new(&mut tree).debinarize(true).unwrap(), 0);
        assert_eq!(tree.num_nodes(), 3);

        let mut tree = build(4, joins);
        assert_eq!(TreeSurgeon::new(&mut tree).debinarize(false).unwrap(), 2);
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.root().children().len(), 4);
    }

    #[test]
    fn test_debinarize_falls_back_when_not_clean() {
        // leaf 3 hangs above a base node: not meta-leaf-clean
        let mut tree = build(
            4,
            vec![
                (0.5, vec![NodeId::leaf(0), NodeId::leaf(1)]),
                (0.5, vec![NodeId::inner(0), NodeId::leaf(2)]),
                (0.8, vec![NodeId::inner(1), NodeId::leaf(3)]),
            ],
        );
        assert!(!tree.test_root_base_nodes());
        let collapsed = TreeSurgeon::new(&mut tree).debinarize(true).unwrap();
        assert_eq!(collapsed, 1);
    }

    #[test]
    fn test_monotonicity_up_and_down() {
        let joins: JoinList = vec![
            (0.7, vec![NodeId::leaf(0), NodeId::leaf(1)]),
            (0.5, vec![NodeId::inner(0), NodeId::leaf(2)]),
        ];
        let mut tree = build(3, joins.clone());
        TreeSurgeon::new(&mut tree)
            .force_monotonicity(MonotonicityMode::Up, 1.0)
            .unwrap();
        assert!(approx_eq!(f32, tree.root().dist_level(), 0.7));
        assert!(approx_eq!(f32, tree.inner(0).unwrap().dist_level(), 0.7));

        let mut tree = build(3, joins);
        TreeSurgeon::new(&mut tree)
            .force_monotonicity(MonotonicityMode::Down, 1.0)
            .unwrap();
        assert!(approx_eq!(f32, tree.root().dist_level(), 0.5));
        assert!(approx_eq!(f32, tree.inner(0).unwrap().dist_level(), 0.5));
    }

    #[test]
    fn test_monotonicity_weighted() {
        let mut tree = build(
            3,
            vec![
                (0.7, vec![NodeId::leaf(0), NodeId::leaf(1)]),
                (0.5, vec![NodeId::inner(0), NodeId::leaf(2)]),
            ],
        );
        TreeSurgeon::new(&mut tree)
            .force_monotonicity(MonotonicityMode::Weighted, 1.0)
            .unwrap();
        // (2*0.7 + 1*0.5) / 3
        let expected = (2.0 * 0.7 + 0.5) / 3.0;
        assert!(approx_eq!(f32, tree.root().dist_level(), expected, epsilon = 1e-6));
        assert!(tree.inner(0).unwrap().dist_level() <= tree.root().dist_level());
        // monotone everywhere afterwards
        for i in 0..tree.num_nodes() - 1 {
            let parent = tree.inner(i).unwrap().parent().index;
            assert!(tree.inner(i).unwrap().dist_level() <= tree.inner(parent).unwrap().dist_level());
        }
    }

    #[test]
    fn test_monotonicity_idempotent() {
        let mut tree = five_leaf();
        let before: Vec<f32> = tree.nodes.iter().map(|n| n.dist_level()).collect();
        TreeSurgeon::new(&mut tree)
            .force_monotonicity(MonotonicityMode::Weighted, 1.0)
            .unwrap();
        let after: Vec<f32> = tree.nodes.iter().map(|n| n.dist_level()).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            assert!(approx_eq!(f32, *b, *a, epsilon = 1e-6));
        }
    }
}
