//! The hierarchical tree model: leaves and inner nodes in two contiguous
//! arrays, navigation queries, and the invariants every public mutation
//! must preserve.

use std::collections::HashSet;

use crate::core::coordinate::{Color, Coordinate, Grid};
use crate::core::node::{Node, NodeId, NodeKind};
use crate::{Error, Result};

/// A hierarchical tree over a set of seed voxels.
///
/// Leaves occupy indices `0..num_leaves`, inner nodes `0..num_nodes` with
/// the root at the last position. A parent always has a higher inner index
/// than any of its children, which the upward-walking queries rely on.
///
/// The tree also carries the seed coordinates (one per leaf, in leaf
/// order), the tract id of each leaf, the coordinates discarded while the
/// tree was built, and any saved partitions with their quality values and
/// colors.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) name: String,
    pub(crate) grid: Grid,
    pub(crate) extent: Coordinate,
    pub(crate) num_streamlines: usize,
    pub(crate) log_factor: f32,
    pub(crate) cpcc: f32,
    pub(crate) leaves: Vec<Node>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) coordinates: Vec<Coordinate>,
    pub(crate) trackids: Vec<usize>,
    pub(crate) discarded: Vec<Coordinate>,
    pub(crate) contained_leaves: Option<Vec<Vec<usize>>>,
    pub(crate) selected_values: Vec<f32>,
    pub(crate) selected_partitions: Vec<Vec<usize>>,
    pub(crate) selected_colors: Vec<Vec<Color>>,
}

/// The raw join list a tree is built from: each entry is the distance level
/// of one inner node plus its ordered children, root last.
pub type JoinList = Vec<(f32, Vec<NodeId>)>;

impl Tree {
    /// Builds a tree from its join list. Parent pointers, sizes and
    /// hierarchical levels are derived from the children lists; the result
    /// is checked before it is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: String,
        grid: Grid,
        extent: Coordinate,
        num_streamlines: usize,
        log_factor: f32,
        cpcc: f32,
        coordinates: Vec<Coordinate>,
        trackids: Vec<usize>,
        discarded: Vec<Coordinate>,
        joins: JoinList,
    ) -> Result<Tree> {
        let num_leaves = coordinates.len();
        if trackids.len() != num_leaves {
            return Err(Error::DimensionMismatch(format!(
                "{} coordinates but {} track ids",
                num_leaves,
                trackids.len()
            )));
        }

        let leaves: Vec<Node> = (0..num_leaves).map(Node::new_leaf).collect();
        let nodes: Vec<Node> = joins
            .into_iter()
            .enumerate()
            .map(|(i, (dist, children))| Node::new_inner(i, dist, children))
            .collect();

        let mut tree = Tree {
            name,
            grid,
            extent,
            num_streamlines,
            log_factor,
            cpcc,
            leaves,
            nodes,
            coordinates,
            trackids,
            discarded,
            contained_leaves: None,
            selected_values: Vec::new(),
            selected_partitions: Vec::new(),
            selected_colors: Vec::new(),
        };
        tree.rewire_from_children()?;
        tree.verify()?;
        Ok(tree)
    }

    /// Rederives parent pointers, sizes and h-levels from the children
    /// lists. Children must precede their parents in the inner array.
    pub(crate) fn rewire_from_children(&mut self) -> Result<()> {
        for leaf in self.leaves.iter_mut() {
            leaf.set_parent(NodeId::ROOT_PARENT);
            leaf.set_size(1);
            leaf.set_h_level(0);
        }
        for node in self.nodes.iter_mut() {
            node.set_parent(NodeId::ROOT_PARENT);
        }

        for i in 0..self.nodes.len() {
            let children = self.nodes[i].children().to_vec();
            let mut size = 0;
            let mut h_level = 0;
            for child in children {
                match child.kind {
                    NodeKind::Leaf => {
                        let leaf = self
                            .leaves
                            .get_mut(child.index)
                            .ok_or(Error::NotFound(child))?;
                        leaf.set_parent(NodeId::inner(i));
                        size += 1;
                    }
                    NodeKind::Inner => {
                        if child.index >= i {
                            return Err(Error::Invariant(format!(
                                "node {i} lists child {child} at or above itself"
                            )));
                        }
                        let inner = &mut self.nodes[child.index];
                        inner.set_parent(NodeId::inner(i));
                        size += inner.size();
                        h_level = h_level.max(inner.h_level());
                    }
                }
            }
            self.nodes[i].set_size(size);
            self.nodes[i].set_h_level(h_level + 1);
        }
        Ok(())
    }

    // === basic accessors ===

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn extent(&self) -> Coordinate {
        self.extent
    }

    pub fn num_streamlines(&self) -> usize {
        self.num_streamlines
    }

    pub fn log_factor(&self) -> f32 {
        self.log_factor
    }

    pub fn cpcc(&self) -> f32 {
        self.cpcc
    }

    pub fn set_cpcc(&mut self, cpcc: f32) {
        self.cpcc = cpcc;
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_discarded(&self) -> usize {
        self.discarded.len()
    }

    pub fn discarded(&self) -> &[Coordinate] {
        &self.discarded
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn trackids(&self) -> &[usize] {
        &self.trackids
    }

    /// Resolves a full id to its node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        let slot = match id.kind {
            NodeKind::Leaf => self.leaves.get(id.index),
            NodeKind::Inner => self.nodes.get(id.index),
        };
        slot.ok_or(Error::NotFound(id))
    }

    /// Resolves an inner-node index.
    pub fn inner(&self, index: usize) -> Result<&Node> {
        self.nodes.get(index).ok_or(Error::NotFound(NodeId::inner(index)))
    }

    /// Resolves a leaf index.
    pub fn leaf(&self, index: usize) -> Result<&Node> {
        self.leaves.get(index).ok_or(Error::NotFound(NodeId::leaf(index)))
    }

    /// The root node (last element of the inner array).
    pub fn root(&self) -> &Node {
        // A built tree always has at least one inner node.
        &self.nodes[self.nodes.len() - 1]
    }

    // === navigation ===

    /// All leaf indices contained in the subtree of `id`, from the memoised
    /// cache when one has been built.
    pub fn leaves_under(&self, id: NodeId) -> Result<Vec<usize>> {
        match id.kind {
            NodeKind::Leaf => {
                self.leaf(id.index)?;
                Ok(vec![id.index])
            }
            NodeKind::Inner => {
                self.inner(id.index)?;
                if let Some(cache) = &self.contained_leaves {
                    return Ok(cache[id.index].clone());
                }
                let mut found = Vec::new();
                let mut worklist = vec![id];
                while let Some(current) = worklist.pop() {
                    for &child in self.node(current)?.children() {
                        match child.kind {
                            NodeKind::Leaf => found.push(child.index),
                            NodeKind::Inner => worklist.push(child),
                        }
                    }
                }
                Ok(found)
            }
        }
    }

    /// Builds the contained-leaves memo in one bottom-up pass. Any mutation
    /// of the tree structure drops it again.
    pub fn load_contained_leaves(&mut self) {
        let mut cache: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for i in 0..self.nodes.len() {
            let mut contained = Vec::new();
            for child in self.nodes[i].children() {
                match child.kind {
                    NodeKind::Leaf => contained.push(child.index),
                    NodeKind::Inner => contained.extend_from_slice(&cache[child.index]),
                }
            }
            cache[i] = contained;
        }
        self.contained_leaves = Some(cache);
    }

    pub fn clear_contained_leaves(&mut self) {
        self.contained_leaves = None;
    }

    /// First common ancestor of two elements. Walks the lower-indexed chain
    /// upward; a parent's inner index always exceeds its children's.
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        if a == b {
            self.node(a)?;
            return Ok(a);
        }
        let mut ia = match a.kind {
            NodeKind::Leaf => self.leaf(a.index)?.parent().index,
            NodeKind::Inner => self.inner(a.index)?.index(),
        };
        let mut ib = match b.kind {
            NodeKind::Leaf => self.leaf(b.index)?.parent().index,
            NodeKind::Inner => self.inner(b.index)?.index(),
        };
        while ia != ib {
            if ia < ib {
                ia = self.nodes[ia].parent().index;
            } else {
                ib = self.nodes[ib].parent().index;
            }
        }
        Ok(NodeId::inner(ia))
    }

    /// The chain of elements from `id` (inclusive) up to the root.
    pub fn route_to_root(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut route = vec![id];
        let mut current = self.node(id)?;
        while !current.is_root() {
            let parent = current.parent();
            route.push(parent);
            current = self.node(parent)?;
        }
        Ok(route)
    }

    /// Cophenetic distance: the distance level of the first common ancestor.
    pub fn distance(&self, a: NodeId, b: NodeId) -> Result<f32> {
        let ancestor = self.common_ancestor(a, b)?;
        Ok(self.node(ancestor)?.dist_level())
    }

    /// Cophenetic distance between two seed coordinates.
    pub fn leaf_distance(&self, coord_a: &Coordinate, coord_b: &Coordinate) -> Result<f32> {
        let a = self.leaf_id_for_coord(coord_a)?;
        let b = self.leaf_id_for_coord(coord_b)?;
        self.distance(NodeId::leaf(a), NodeId::leaf(b))
    }

    /// Joining order of a triplet: 0 when all three meet at one ancestor,
    /// otherwise the 1-based position of the element joining last. Exactly
    /// one pairwise ancestor lies strictly below the other two; its pair
    /// joins first and the remaining element joins last.
    pub fn triplet_order(&self, a: NodeId, b: NodeId, c: NodeId) -> Result<u8> {
        let ab = self.common_ancestor(a, b)?.index;
        let ac = self.common_ancestor(a, c)?.index;
        let bc = self.common_ancestor(b, c)?.index;
        if ab == ac && ac == bc {
            Ok(0)
        } else if ab < ac {
            Ok(3)
        } else if ac < bc {
            Ok(2)
        } else {
            Ok(1)
        }
    }

    /// Inner nodes of the subtree whose children are all leaves.
    pub fn base_nodes(&self, subroot: NodeId) -> Result<Vec<usize>> {
        let mut bases = Vec::new();
        let mut worklist = match subroot.kind {
            NodeKind::Leaf => {
                self.leaf(subroot.index)?;
                return Ok(bases);
            }
            NodeKind::Inner => vec![subroot.index],
        };
        while let Some(index) = worklist.pop() {
            let node = self.inner(index)?;
            if node.h_level() == 1 {
                bases.push(index);
            } else {
                for child in node.children() {
                    if child.is_inner() {
                        worklist.push(child.index);
                    }
                }
            }
        }
        bases.sort_unstable();
        Ok(bases)
    }

    /// Base nodes of the whole tree.
    pub fn root_base_nodes(&self) -> Vec<usize> {
        self.base_nodes(self.root().id()).unwrap_or_default()
    }

    /// True when every leaf hangs from an h-level-1 node, i.e. the base
    /// nodes are proper meta-leaves covering the whole seed set.
    pub fn test_root_base_nodes(&self) -> bool {
        self.leaves
            .iter()
            .all(|leaf| matches!(self.node(leaf.parent()), Ok(parent) if parent.h_level() == 1))
    }

    /// All inner-node indices in the subtree of `subroot`, itself included.
    pub fn branch_nodes(&self, subroot: usize) -> Result<Vec<usize>> {
        self.inner(subroot)?;
        let mut found = Vec::new();
        let mut worklist = vec![subroot];
        while let Some(index) = worklist.pop() {
            found.push(index);
            for child in self.nodes[index].children() {
                if child.is_inner() {
                    worklist.push(child.index);
                }
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    // === coordinate lookups ===

    /// The leaf holding the given seed coordinate.
    pub fn leaf_id_for_coord(&self, coord: &Coordinate) -> Result<usize> {
        self.coordinates
            .iter()
            .position(|c| c == coord)
            .ok_or_else(|| Error::NotFound(NodeId::leaf(self.leaves.len())))
    }

    /// The tract id stored for a leaf.
    pub fn track_id_for_leaf(&self, leaf: usize) -> Result<usize> {
        self.trackids
            .get(leaf)
            .copied()
            .ok_or(Error::NotFound(NodeId::leaf(leaf)))
    }

    /// The seed coordinate of a leaf.
    pub fn coord_for_leaf(&self, leaf: usize) -> Result<Coordinate> {
        self.coordinates
            .get(leaf)
            .copied()
            .ok_or(Error::NotFound(NodeId::leaf(leaf)))
    }

    /// The seed coordinates contained in a subtree.
    pub fn coords_for_node(&self, id: NodeId) -> Result<Vec<Coordinate>> {
        Ok(self
            .leaves_under(id)?
            .into_iter()
            .map(|leaf| self.coordinates[leaf])
            .collect())
    }

    /// Mean seed coordinate of a subtree.
    pub fn mean_coord_for_node(&self, id: NodeId) -> Result<Coordinate> {
        let coords = self.coords_for_node(id)?;
        let n = coords.len().max(1) as f64;
        let (mut sx, mut sy, mut sz) = (0.0, 0.0, 0.0);
        for c in &coords {
            sx += f64::from(c.x);
            sy += f64::from(c.y);
            sz += f64::from(c.z);
        }
        Ok(Coordinate::new(
            (sx / n).round() as i16,
            (sy / n).round() as i16,
            (sz / n).round() as i16,
        ))
    }

    // === sorting helpers ===

    /// Sorts ids ascending by subtree size.
    pub fn sort_by_size(&self, ids: &mut [NodeId]) {
        ids.sort_by_key(|&id| self.node(id).map(Node::size).unwrap_or(0));
    }

    /// Sorts inner-node indices ascending by subtree size.
    pub fn sort_nodes_by_size(&self, ids: &mut [usize]) {
        ids.sort_by_key(|&i| self.inner(i).map(Node::size).unwrap_or(0));
    }

    /// Sorts ids ascending by hierarchical level, ties by id.
    pub fn sort_by_h_level(&self, ids: &mut [NodeId]) {
        ids.sort_by_key(|&id| (self.node(id).map(Node::h_level).unwrap_or(0), id));
    }

    /// Sorts inner-node indices ascending by hierarchical level, ties by id.
    pub fn sort_nodes_by_h_level(&self, ids: &mut [usize]) {
        ids.sort_by_key(|&i| (self.inner(i).map(Node::h_level).unwrap_or(0), i));
    }

    // === saved partitions ===

    pub fn selected_values(&self) -> &[f32] {
        &self.selected_values
    }

    pub fn selected_partitions(&self) -> &[Vec<usize>] {
        &self.selected_partitions
    }

    pub fn selected_colors(&self) -> &[Vec<Color>] {
        &self.selected_colors
    }

    /// Stores a set of partitions with their quality values and optional
    /// colors, replacing any previously saved set.
    pub fn insert_partitions(
        &mut self,
        partitions: Vec<Vec<usize>>,
        values: Vec<f32>,
        colors: Option<Vec<Vec<Color>>>,
    ) -> Result<()> {
        if partitions.len() != values.len() {
            return Err(Error::DimensionMismatch(format!(
                "{} partitions but {} values",
                partitions.len(),
                values.len()
            )));
        }
        if let Some(colors) = &colors {
            Self::check_color_alignment(&partitions, colors)?;
        }
        self.selected_partitions = partitions;
        self.selected_values = values;
        self.selected_colors = colors.unwrap_or_default();
        Ok(())
    }

    /// Replaces the colors of an already saved partition set.
    pub fn insert_partition_colors(&mut self, colors: Vec<Vec<Color>>) -> Result<()> {
        Self::check_color_alignment(&self.selected_partitions, &colors)?;
        self.selected_colors = colors;
        Ok(())
    }

    fn check_color_alignment(partitions: &[Vec<usize>], colors: &[Vec<Color>]) -> Result<()> {
        if colors.len() != partitions.len() {
            return Err(Error::DimensionMismatch(format!(
                "{} partitions but {} color sets",
                partitions.len(),
                colors.len()
            )));
        }
        for (k, (partition, cols)) in partitions.iter().zip(colors.iter()).enumerate() {
            if partition.len() != cols.len() {
                return Err(Error::DimensionMismatch(format!(
                    "partition {k} has {} clusters but {} colors",
                    partition.len(),
                    cols.len()
                )));
            }
        }
        Ok(())
    }

    pub fn clear_partitions(&mut self) {
        self.selected_partitions.clear();
        self.selected_values.clear();
        self.selected_colors.clear();
    }

    pub fn clear_partition_colors(&mut self) {
        self.selected_colors.clear();
    }

    // === grid conversion ===

    /// Converts all stored coordinates to the indicated grid. Returns false
    /// when the tree already was in that grid.
    pub fn convert_to_grid(&mut self, new_grid: Grid) -> bool {
        if self.grid == new_grid {
            return false;
        }
        let extent = self.extent;
        let from = self.grid;
        for coord in self.coordinates.iter_mut() {
            *coord = coord.to_grid(from, new_grid, extent);
        }
        for coord in self.discarded.iter_mut() {
            *coord = coord.to_grid(from, new_grid, extent);
        }
        self.grid = new_grid;
        true
    }

    // === integrity ===

    /// Checks every structural invariant, describing the first failure.
    pub fn verify(&self) -> Result<()> {
        if self.leaves.len() < 2 {
            return Err(Error::Invariant(format!(
                "tree needs at least 2 leaves, has {}",
                self.leaves.len()
            )));
        }
        if self.nodes.is_empty() || self.nodes.len() >= self.leaves.len() {
            return Err(Error::Invariant(format!(
                "inner count {} must be in 1..{}",
                self.nodes.len(),
                self.leaves.len()
            )));
        }
        if self.coordinates.len() != self.leaves.len() {
            return Err(Error::Invariant(format!(
                "{} leaves but {} coordinates",
                self.leaves.len(),
                self.coordinates.len()
            )));
        }
        if self.trackids.len() != self.leaves.len() {
            return Err(Error::Invariant(format!(
                "{} leaves but {} track ids",
                self.leaves.len(),
                self.trackids.len()
            )));
        }

        for (i, leaf) in self.leaves.iter().enumerate() {
            if leaf.id() != NodeId::leaf(i) {
                return Err(Error::Invariant(format!("leaf at position {i} has id {}", leaf.id())));
            }
            if leaf.size() != 1 || leaf.h_level() != 0 || !leaf.children().is_empty() {
                return Err(Error::Invariant(format!("leaf {i} carries inner-node data")));
            }
            let parent = leaf.parent();
            if !parent.is_inner() || parent.index >= self.nodes.len() {
                return Err(Error::Invariant(format!("leaf {i} has parent {parent}")));
            }
        }

        let root_index = self.nodes.len() - 1;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id() != NodeId::inner(i) {
                return Err(Error::Invariant(format!("node at position {i} has id {}", node.id())));
            }
            let parent = node.parent();
            if i == root_index {
                if parent != NodeId::ROOT_PARENT {
                    return Err(Error::Invariant(format!("root has parent {parent}")));
                }
            } else {
                if !parent.is_inner() || parent.index >= self.nodes.len() {
                    return Err(Error::Invariant(format!("node {i} has parent {parent}")));
                }
                if parent.index <= i {
                    return Err(Error::Invariant(format!(
                        "node {i} has parent index {} at or below itself",
                        parent.index
                    )));
                }
            }

            let mut size = 0;
            let mut max_child_h = 0;
            let mut seen = HashSet::new();
            for &child in node.children() {
                if !seen.insert(child) {
                    return Err(Error::Invariant(format!("node {i} lists child {child} twice")));
                }
                let child_node = self.node(child)?;
                if child_node.parent() != NodeId::inner(i) {
                    return Err(Error::Invariant(format!(
                        "child {child} of node {i} points to parent {}",
                        child_node.parent()
                    )));
                }
                size += child_node.size();
                max_child_h = max_child_h.max(child_node.h_level());
            }
            if node.children().is_empty() {
                return Err(Error::Invariant(format!("node {i} has no children")));
            }
            if node.size() != size {
                return Err(Error::Invariant(format!(
                    "node {i} has size {} but children sum to {size}",
                    node.size()
                )));
            }
            if node.h_level() != max_child_h + 1 {
                return Err(Error::Invariant(format!(
                    "node {i} has h-level {} but children reach {max_child_h}",
                    node.h_level()
                )));
            }
        }

        if self.root().size() != self.leaves.len() {
            return Err(Error::Invariant(format!(
                "root size {} but {} leaves",
                self.root().size(),
                self.leaves.len()
            )));
        }

        // every non-root element must be referenced exactly once
        let referenced: usize = self.nodes.iter().map(|n| n.children().len()).sum();
        if referenced != self.leaves.len() + self.nodes.len() - 1 {
            return Err(Error::Invariant(format!(
                "{referenced} child references for {} non-root elements",
                self.leaves.len() + self.nodes.len() - 1
            )));
        }

        Ok(())
    }

    /// Whether the tree passes all structural invariants.
    pub fn check(&self) -> bool {
        match self.verify() {
            Ok(()) => true,
            Err(err) => {
                log::error!("tree check failed: {err}");
                false
            }
        }
    }

    /// A short status line, or a longer two-line report.
    pub fn report(&self, long: bool) -> String {
        let mut out = format!(
            "Tree {}: {} leaves, {} nodes, {} discarded",
            self.name,
            self.leaves.len(),
            self.nodes.len(),
            self.discarded.len()
        );
        if long {
            out.push_str(&format!(
                "\ngrid {}, extent {}, {} streamlines, log factor {}, cpcc {}",
                self.grid, self.extent, self.num_streamlines, self.log_factor, self.cpcc
            ));
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A balanced binary tree over `2^depth` leaves. Joins at depth d from
    /// the leaves happen at distance `d / depth`, so all cuts are clean
    /// horizontal ones.
    pub(crate) fn balanced_binary(depth: u32) -> Tree {
        let num_leaves = 1usize << depth;
        let coordinates = (0..num_leaves)
            .map(|i| Coordinate::new(i as i16, 0, 0))
            .collect::<Vec<_>>();
        let trackids = (0..num_leaves).collect::<Vec<_>>();

        let mut joins: JoinList = Vec::with_capacity(num_leaves - 1);
        let mut level: Vec<NodeId> = (0..num_leaves).map(NodeId::leaf).collect();
        let mut next_index = 0;
        let mut d = 1;
        while level.len() > 1 {
            let dist = d as f32 / depth as f32;
            let mut above = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                joins.push((dist, pair.to_vec()));
                above.push(NodeId::inner(next_index));
                next_index += 1;
            }
            level = above;
            d += 1;
        }

        Tree::build(
            "balanced".to_string(),
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

    /// Five leaves: (0,1) join at 0.2 -> node 0, (2,3) join at 0.3 ->
    /// node 1, node1+leaf4 at 0.6 -> node 2, root joins node0+node2 at 0.9.
    pub(crate) fn five_leaf() -> Tree {
        let coordinates = (0..5).map(|i| Coordinate::new(i, 1, 2)).collect::<Vec<_>>();
        let trackids = (0..5).collect::<Vec<_>>();
        let joins: JoinList = vec![
            (0.2, vec![NodeId::leaf(0), NodeId::leaf(1)]),
            (0.3, vec![NodeId::leaf(2), NodeId::leaf(3)]),
            (0.6, vec![NodeId::inner(1), NodeId::leaf(4)]),
            (0.9, vec![NodeId::inner(0), NodeId::inner(2)]),
        ];
        Tree::build(
            "five".to_string(),
            Grid::Nifti,
            Coordinate::new(8, 8, 8),
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
}

#[cfg(test)]
mod tests {
    use super::fixtures::{balanced_binary, five_leaf};
    use super::*;

    #[test]
    fn test_build_and_check() {
        let tree = five_leaf();
        assert!(tree.check());
        assert_eq!(tree.num_leaves(), 5);
        assert_eq!(tree.num_nodes(), 4);
        assert_eq!(tree.root().size(), 5);
        assert_eq!(tree.root().h_level(), 3);
        assert_eq!(tree.inner(2).unwrap().size(), 3);
        assert_eq!(tree.leaf(4).unwrap().parent(), NodeId::inner(2));
    }

    #[test]
    fn test_check_rejects_bad_size() {
        let mut tree = five_leaf();
        tree.nodes[2].set_size(7);
        assert!(!tree.check());
    }

    #[test]
    fn test_common_ancestor() {
        let tree = five_leaf();
        let ca = tree.common_ancestor(NodeId::leaf(0), NodeId::leaf(1)).unwrap();
        assert_eq!(ca, NodeId::inner(0));
        let ca = tree.common_ancestor(NodeId::leaf(2), NodeId::leaf(4)).unwrap();
        assert_eq!(ca, NodeId::inner(2));
        let ca = tree.common_ancestor(NodeId::leaf(0), NodeId::leaf(4)).unwrap();
        assert_eq!(ca, NodeId::inner(3));
        let ca = tree.common_ancestor(NodeId::inner(1), NodeId::inner(1)).unwrap();
        assert_eq!(ca, NodeId::inner(1));
    }

    #[test]
    fn test_distance_levels() {
        let tree = five_leaf();
        assert!(float_cmp::approx_eq!(
            f32,
            tree.distance(NodeId::leaf(0), NodeId::leaf(1)).unwrap(),
            0.2
        ));
        assert!(float_cmp::approx_eq!(
            f32,
            tree.distance(NodeId::leaf(3), NodeId::leaf(4)).unwrap(),
            0.6
        ));
        assert!(float_cmp::approx_eq!(
            f32,
            tree.distance(NodeId::leaf(0), NodeId::leaf(3)).unwrap(),
            0.9
        ));
    }

    #[test]
    fn test_triplet_order() {
        let tree = five_leaf();
        // 2 and 3 join before 4 joins them, so 4 is always the late one
        assert_eq!(
            tree.triplet_order(NodeId::leaf(2), NodeId::leaf(3), NodeId::leaf(4)).unwrap(),
            3
        );
        assert_eq!(
            tree.triplet_order(NodeId::leaf(2), NodeId::leaf(4), NodeId::leaf(3)).unwrap(),
            2
        );
        assert_eq!(
            tree.triplet_order(NodeId::leaf(4), NodeId::leaf(2), NodeId::leaf(3)).unwrap(),
            1
        );
    }

    #[test]
    fn test_triplet_order_unresolved() {
        // three children under one parent join simultaneously
        let coordinates = (0..3).map(|i| Coordinate::new(i, 0, 0)).collect::<Vec<_>>();
        let joins: JoinList = vec![(
            0.5,
            vec![NodeId::leaf(0), NodeId::leaf(1), NodeId::leaf(2)],
        )];
        let tree = Tree::build(
            "ternary".into(),
            Grid::Nifti,
            Coordinate::new(4, 4, 4),
            0,
            0.0,
            0.0,
            coordinates,
            vec![0, 1, 2],
            Vec::new(),
            joins,
        )
        .unwrap();
        assert_eq!(
            tree.triplet_order(NodeId::leaf(0), NodeId::leaf(1), NodeId::leaf(2)).unwrap(),
            0
        );
    }

    #[test]
    fn test_leaves_under_matches_cache() {
        let mut tree = balanced_binary(3);
        let plain = {
            let mut v = tree.leaves_under(NodeId::inner(5)).unwrap();
            v.sort_unstable();
            v
        };
        tree.load_contained_leaves();
        let cached = {
            let mut v = tree.leaves_under(NodeId::inner(5)).unwrap();
            v.sort_unstable();
            v
        };
        assert_eq!(plain, cached);
        assert_eq!(plain.len(), tree.inner(5).unwrap().size());
    }

    #[test]
    fn test_base_nodes() {
        let tree = balanced_binary(3);
        let bases = tree.root_base_nodes();
        assert_eq!(bases, vec![0, 1, 2, 3]);
        assert!(tree.test_root_base_nodes());

        let five = five_leaf();
        // leaf 4 hangs from node 2 at h-level 2
        assert!(!five.test_root_base_nodes());
        assert_eq!(five.base_nodes(NodeId::inner(2)).unwrap(), vec![1]);
    }

    #[test]
    fn test_route_to_root() {
        let tree = five_leaf();
        let route = tree.route_to_root(NodeId::leaf(3)).unwrap();
        assert_eq!(
            route,
            vec![NodeId::leaf(3), NodeId::inner(1), NodeId::inner(2), NodeId::inner(3)]
        );
    }

    #[test]
    fn test_sorting() {
        let tree = five_leaf();
        let mut ids = vec![2usize, 0, 3, 1];
        tree.sort_nodes_by_size(&mut ids);
        assert_eq!(ids, vec![0, 1, 2, 3]);
        let mut ids = vec![NodeId::inner(3), NodeId::inner(0), NodeId::leaf(4)];
        tree.sort_by_h_level(&mut ids);
        assert_eq!(ids, vec![NodeId::leaf(4), NodeId::inner(0), NodeId::inner(3)]);
    }

    #[test]
    fn test_not_found() {
        let tree = five_leaf();
        assert!(matches!(tree.inner(99), Err(Error::NotFound(_))));
        assert!(matches!(
            tree.leaf_id_for_coord(&Coordinate::new(99, 99, 99)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_partition_color_alignment() {
        let mut tree = five_leaf();
        let parts = vec![vec![0usize, 2]];
        assert!(tree
            .insert_partitions(parts.clone(), vec![0.5], Some(vec![vec![Color::new(1, 2, 3)]]))
            .is_err());
        assert!(tree
            .insert_partitions(
                parts,
                vec![0.5],
                Some(vec![vec![Color::new(1, 2, 3), Color::new(4, 5, 6)]])
            )
            .is_ok());
    }

    #[test]
    fn test_grid_conversion_roundtrip() {
        let mut tree = five_leaf();
        let before = tree.coordinates.clone();
        assert!(tree.convert_to_grid(Grid::Vista));
        assert!(!tree.convert_to_grid(Grid::Vista));
        assert!(tree.convert_to_grid(Grid::Nifti));
        assert_eq!(tree.coordinates, before);
    }
}
