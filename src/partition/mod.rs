//! Partition extraction: classic cuts, sharp/smooth boundary cuts, the
//! Spread-Separation granularity scan, granularity filtering and the
//! max-granularity partition.
//!
//! A partition is a set of element ids whose subtrees cover every leaf of
//! the sub-root exactly once.

use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rayon::prelude::*;

use crate::constants::MAX_SEARCH_DEPTH;
use crate::core::node::{NodeId, NodeKind};
use crate::core::tree::Tree;
use crate::{Error, Result};

/// What a classic cut compares against its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Distance level: a horizontal cut through the dendrogram.
    Horizontal,
    /// Biggest cluster size.
    Size,
    /// Hierarchical level.
    HLevel,
}

/// When a classic cut stops subdividing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartitionCondition {
    /// Stop once every cluster's mode value is at or below this.
    Value(f32),
    /// Stop once the partition holds at least this many clusters.
    ClusterCount(usize),
}

/// The search depth the adaptive schedule assigns to a partition size.
pub fn assign_depth(partition_size: usize) -> usize {
    if partition_size < 40 {
        5
    } else if partition_size < 90 {
        4
    } else if partition_size < 200 {
        3
    } else if partition_size < 350 {
        2
    } else {
        1
    }
}

/// Read-only partition extraction over one tree.
pub struct TreePartitioner<'a> {
    tree: &'a Tree,
}

impl<'a> TreePartitioner<'a> {
    pub fn new(tree: &'a Tree) -> Self {
        TreePartitioner { tree }
    }

    fn expandable(&self, id: NodeId, exclude_leaves: bool) -> bool {
        match id.kind {
            NodeKind::Leaf => false,
            NodeKind::Inner => {
                let node = &self.tree.nodes[id.index];
                !(exclude_leaves && node.h_level() == 1)
            }
        }
    }

    fn mode_value(&self, id: NodeId, mode: PartitionMode) -> Result<f32> {
        let node = self.tree.node(id)?;
        Ok(match mode {
            PartitionMode::Horizontal => node.dist_level(),
            PartitionMode::Size => node.size() as f32,
            PartitionMode::HLevel => node.h_level() as f32,
        })
    }

    /// Classic cut: repeatedly split the cluster with the highest mode
    /// value until the condition triggers. Returns the partition and the
    /// mode value of its coarsest remaining cluster.
    pub fn classic(
        &self,
        condition: PartitionCondition,
        mode: PartitionMode,
        exclude_leaves: bool,
        subroot: NodeId,
    ) -> Result<(Vec<NodeId>, f32)> {
        self.tree.node(subroot)?;
        let mut queue: PriorityQueue<NodeId, OrderedFloat<f32>> = PriorityQueue::new();
        let mut fixed: Vec<NodeId> = Vec::new();
        queue.push(subroot, OrderedFloat(self.mode_value(subroot, mode)?));

        loop {
            let top_value = match queue.peek() {
                Some((_, value)) => value.into_inner(),
                None => break,
            };
            let expandable_left = queue.iter().any(|(&id, _)| self.expandable(id, exclude_leaves));

            match condition {
                PartitionCondition::Value(cut) => {
                    if top_value <= cut || !expandable_left {
                        break;
                    }
                }
                PartitionCondition::ClusterCount(count) => {
                    if queue.len() + fixed.len() >= count || !expandable_left {
                        break;
                    }
                }
            }

            let (id, _) = queue.pop().expect("peeked above");
            if !self.expandable(id, exclude_leaves) {
                fixed.push(id);
                continue;
            }
            for &child in self.tree.node(id)?.children() {
                queue.push(child, OrderedFloat(self.mode_value(child, mode)?));
            }
        }

        let cut_value = queue.peek().map(|(_, v)| v.into_inner()).unwrap_or(0.0);
        let mut partition: Vec<NodeId> = fixed;
        partition.extend(queue.into_sorted_iter().map(|(id, _)| id));
        partition.sort_unstable();
        Ok((partition, cut_value))
    }

    /// Branch length from an element up to its parent, optionally
    /// normalised by the parent's distance level.
    fn branch_length(&self, id: NodeId, normalized: bool) -> Result<f32> {
        let node = self.tree.node(id)?;
        if node.is_root() {
            return Ok(0.0);
        }
        let parent = self.tree.node(node.parent())?;
        let length = parent.dist_level() - node.dist_level();
        if normalized && parent.dist_level() > 0.0 {
            Ok(length / parent.dist_level())
        } else {
            Ok(length)
        }
    }

    /// Sharp cut: keep clusters whose branch to their parent exceeds the
    /// threshold; everything else is subdivided further. Unsplittable
    /// elements stay in the partition so the cover remains total.
    pub fn sharp(
        &self,
        threshold: f32,
        exclude_leaves: bool,
        subroot: NodeId,
        normalized: bool,
    ) -> Result<(Vec<NodeId>, f32)> {
        let start = self.tree.node(subroot)?;
        let mut partition = Vec::new();
        let mut worklist: Vec<NodeId> = if self.expandable(subroot, exclude_leaves) {
            start.children().to_vec()
        } else {
            vec![subroot]
        };
        while let Some(id) = worklist.pop() {
            if self.branch_length(id, normalized)? > threshold
                || !self.expandable(id, exclude_leaves)
            {
                partition.push(id);
            } else {
                worklist.extend_from_slice(self.tree.node(id)?.children());
            }
        }
        partition.sort_unstable();
        Ok((partition, threshold))
    }

    /// Smooth cut: keep clusters without any internal branch longer than
    /// the threshold.
    pub fn smooth(
        &self,
        threshold: f32,
        exclude_leaves: bool,
        subroot: NodeId,
    ) -> Result<(Vec<NodeId>, f32)> {
        // longest inner-to-inner branch within each subtree, bottom-up
        let mut max_branch = vec![0.0f32; self.tree.num_nodes()];
        for i in 0..self.tree.num_nodes() {
            let node = &self.tree.nodes[i];
            let mut longest = 0.0f32;
            for child in node.children() {
                if child.is_inner() {
                    let step = node.dist_level() - self.tree.nodes[child.index].dist_level();
                    longest = longest.max(step).max(max_branch[child.index]);
                }
            }
            max_branch[i] = longest;
        }

        self.tree.node(subroot)?;
        let mut partition = Vec::new();
        let mut worklist = vec![subroot];
        while let Some(id) = worklist.pop() {
            let smooth_enough = match id.kind {
                NodeKind::Leaf => true,
                NodeKind::Inner => max_branch[id.index] <= threshold,
            };
            if smooth_enough || !self.expandable(id, exclude_leaves) {
                partition.push(id);
            } else {
                worklist.extend_from_slice(self.tree.node(id)?.children());
            }
        }
        partition.sort_unstable();
        Ok((partition, threshold))
    }

    /// The spread-separation index of a partition: mean cluster size times
    /// the ratio of summed parent distances to the size-weighted sum of
    /// own distances. A partition whose clusters all sit at distance zero
    /// (pure singletons) has no intra-cluster spread left to weigh and
    /// scores 0.
    pub fn spread_separation(&self, partition: &[NodeId]) -> Result<f32> {
        if partition.is_empty() {
            return Err(Error::Config("cannot evaluate an empty partition".to_string()));
        }
        let mut size_sum = 0.0f64;
        let mut parent_dist_sum = 0.0f64;
        let mut weighted_dist_sum = 0.0f64;
        for &id in partition {
            let node = self.tree.node(id)?;
            let parent_dist = if node.is_root() {
                node.dist_level()
            } else {
                self.tree.node(node.parent())?.dist_level()
            };
            size_sum += node.size() as f64;
            parent_dist_sum += f64::from(parent_dist);
            weighted_dist_sum += node.size() as f64 * f64::from(node.dist_level());
        }
        let spread = size_sum / partition.len() as f64;
        if weighted_dist_sum == 0.0 {
            return Ok(0.0);
        }
        Ok((spread * parent_dist_sum / weighted_dist_sum) as f32)
    }

    /// One full level of descent: every expandable cluster is replaced by
    /// its children. None when nothing can be expanded.
    pub fn level_descent(&self, partition: &[NodeId], exclude_leaves: bool) -> Result<Option<Vec<NodeId>>> {
        let mut next = Vec::with_capacity(partition.len());
        let mut expanded = false;
        for &id in partition {
            if self.expandable(id, exclude_leaves) {
                next.extend_from_slice(self.tree.node(id)?.children());
                expanded = true;
            } else {
                next.push(id);
            }
        }
        Ok(if expanded { Some(next) } else { None })
    }

    /// Scans the tree's granularities for Spread-Separation-optimal
    /// partitions.
    ///
    /// The scan walks the dendrogram level-wise: at each step it
    /// enumerates the descents reachable within `depth` levels, evaluates
    /// their SS in parallel, and adopts the best-scoring one, so coarse
    /// levels without merit are skipped over. The adopted partition and
    /// its SS are recorded per step. `depth` is clamped to [1, 5] and
    /// scaled down by the adaptive schedule on coarse partitions; the
    /// scan stops at `granularity_ceiling`.
    pub fn scan_optimal_partitions(
        &self,
        depth: usize,
        exclude_leaves: bool,
        granularity_ceiling: usize,
    ) -> Result<Vec<(f32, Vec<NodeId>)>> {
        let depth = depth.clamp(1, MAX_SEARCH_DEPTH);
        let mut current: Vec<NodeId> = self
            .tree
            .root()
            .children()
            .iter()
            .copied()
            .filter(NodeId::is_inner)
            .collect();
        if current.is_empty() {
            return Err(Error::Invariant("root has no inner children to scan".to_string()));
        }

        let mut recorded = Vec::new();
        recorded.push((self.spread_separation(&current)?, current.clone()));

        loop {
            let effective = depth.min(assign_depth(current.len()));

            // all level descents within reach of the search depth
            let mut candidates: Vec<Vec<NodeId>> = Vec::with_capacity(effective);
            let mut frontier = current.clone();
            for _ in 0..effective {
                match self.level_descent(&frontier, exclude_leaves)? {
                    Some(next) => {
                        frontier = next.clone();
                        candidates.push(next);
                    }
                    None => break,
                }
            }
            if candidates.is_empty() {
                break;
            }

            let scores = candidates
                .par_iter()
                .map(|candidate| self.spread_separation(candidate))
                .collect::<Result<Vec<f32>>>()?;
            let (best, best_score) = crate::utils::helpers::arg_max(&scores);
            let adopted = candidates.swap_remove(best);
            if adopted.len() > granularity_ceiling {
                break;
            }
            recorded.push((best_score, adopted.clone()));
            current = adopted;
        }
        Ok(recorded)
    }

    /// Like the SS scan, but records the classic horizontal cut at each
    /// granularity the scan visits; the SS index still rates every
    /// recorded partition.
    pub fn scan_horizontal_partitions(
        &self,
        depth: usize,
        exclude_leaves: bool,
        granularity_ceiling: usize,
    ) -> Result<Vec<(f32, Vec<NodeId>)>> {
        let optimal = self.scan_optimal_partitions(depth, exclude_leaves, granularity_ceiling)?;
        let root = self.tree.root().id();
        let mut recorded = Vec::with_capacity(optimal.len());
        for (_, partition) in optimal {
            let (hoz, _) = self.classic(
                PartitionCondition::ClusterCount(partition.len()),
                PartitionMode::Horizontal,
                exclude_leaves,
                root,
            )?;
            recorded.push((self.spread_separation(&hoz)?, hoz));
        }
        Ok(recorded)
    }

    /// Keeps only partitions whose value is the maximum within a sliding
    /// granularity window of 2·radius+1. Returns the survivors and the
    /// index of the absolute maximum among them.
    pub fn filter_max_partitions<P: Clone>(
        &self,
        radius: usize,
        values: &[f32],
        partitions: &[P],
    ) -> (Vec<f32>, Vec<P>, usize) {
        let mut kept_values = Vec::new();
        let mut kept_partitions = Vec::new();
        for i in 0..values.len() {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(values.len() - 1);
            let window_max = values[lo..=hi]
                .iter()
                .cloned()
                .fold(f32::NEG_INFINITY, f32::max);
            if values[i] >= window_max {
                kept_values.push(values[i]);
                kept_partitions.push(partitions[i].clone());
            }
        }
        let best = if kept_values.is_empty() {
            0
        } else {
            crate::utils::helpers::arg_max(&kept_values).0
        };
        (kept_values, kept_partitions, best)
    }

    /// The finest meaningful partition: all root base nodes. Requires a
    /// meta-leaf-clean tree so the meta-leaves cover every seed.
    pub fn max_granularity_partition(&self) -> Result<Vec<usize>> {
        if !self.tree.test_root_base_nodes() {
            return Err(Error::Invariant(
                "max-granularity partition needs a meta-leaf-clean tree".to_string(),
            ));
        }
        Ok(self.tree.root_base_nodes())
    }

    /// All partitions derivable from `partition` by branching single
    /// clusters up to `depth` levels deep, each with the chain of cluster
    /// positions that was branched (the chain head locates the first
    /// branch).
    ///
    /// Leaf children stay in the derived partitions as atomic members,
    /// preserving the cover; with `exclude_leaves` they are dropped
    /// instead and meta-leaves are never branched, restricting the search
    /// to inner clusters.
    pub fn branching(
        &self,
        partition: &[NodeId],
        depth: usize,
        exclude_leaves: bool,
    ) -> Result<Vec<(Vec<NodeId>, Vec<usize>)>> {
        let mut results = Vec::new();
        for (position, &cluster) in partition.iter().enumerate() {
            if !self.expandable(cluster, exclude_leaves) {
                continue;
            }
            let children: Vec<NodeId> = if exclude_leaves {
                self.tree
                    .node(cluster)?
                    .children()
                    .iter()
                    .copied()
                    .filter(NodeId::is_inner)
                    .collect()
            } else {
                self.tree.node(cluster)?.children().to_vec()
            };
            if children.is_empty() {
                continue;
            }
            let mut derived = Vec::with_capacity(partition.len() + children.len() - 1);
            derived.extend_from_slice(&partition[..position]);
            derived.extend_from_slice(&children);
            derived.extend_from_slice(&partition[position + 1..]);

            if depth > 1 {
                for (deeper, mut chain) in self.branching(&derived, depth - 1, exclude_leaves)? {
                    chain.insert(0, position);
                    results.push((deeper, chain));
                }
            }
            results.push((derived, vec![position]));
        }
        Ok(results)
    }

    /// A text report of a partition set: one line per partition with its
    /// value and granularity.
    pub fn partition_report(&self, values: &[f32], partitions: &[Vec<NodeId>]) -> String {
        let mut out = String::from("value\tclusters\n");
        for (value, partition) in values.iter().zip(partitions.iter()) {
            out.push_str(&format!("{value}\t{}\n", partition.len()));
        }
        out
    }
}

/// The inner-node ids of a partition, the form saved into tree files.
/// Pure-leaf clusters have no inner id and are dropped.
pub fn to_inner_ids(partition: &[NodeId]) -> Vec<usize> {
    let mut ids: Vec<usize> = partition
        .iter()
        .filter(|id| id.is_inner())
        .map(|id| id.index)
        .collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinate::{Coordinate, Grid};
    use crate::core::tree::fixtures::{balanced_binary, five_leaf};
    use crate::core::tree::JoinList;
    use float_cmp::approx_eq;

    /// Balanced 8-leaf tree with every join at the same distance.
    fn uniform_binary() -> Tree {
        let coordinates = (0..8).map(|i| Coordinate::new(i as i16, 0, 0)).collect::<Vec<_>>();
        let joins: JoinList = vec![
            (0.5, vec![NodeId::leaf(0), NodeId::leaf(1)]),
            (0.5, vec![NodeId::leaf(2), NodeId::leaf(3)]),
            (0.5, vec![NodeId::leaf(4), NodeId::leaf(5)]),
            (0.5, vec![NodeId::leaf(6), NodeId::leaf(7)]),
            (0.5, vec![NodeId::inner(0), NodeId::inner(1)]),
            (0.5, vec![NodeId::inner(2), NodeId::inner(3)]),
            (0.5, vec![NodeId::inner(4), NodeId::inner(5)]),
        ];
        Tree::build(
            "uniform".to_string(),
            Grid::Nifti,
            Coordinate::new(8, 1, 1),
            0,
            0.0,
            0.0,
            coordinates,
            (0..8).collect(),
            Vec::new(),
            joins,
        )
        .unwrap()
    }

    fn covered_leaves(tree: &Tree, partition: &[NodeId]) -> usize {
        partition
            .iter()
            .map(|&id| tree.node(id).unwrap().size())
            .sum()
    }

    /// Balanced 16-leaf tree with four levels: bases at 0.1, mid joins at
    /// the given level, uppers at 0.8 and the root at 0.9.
    fn four_level(mid_dist: f32) -> Tree {
        let coordinates = (0..16).map(|i| Coordinate::new(i, 0, 0)).collect::<Vec<_>>();
        let mut joins: JoinList = Vec::new();
        for i in 0..8 {
            joins.push((0.1, vec![NodeId::leaf(2 * i), NodeId::leaf(2 * i + 1)]));
        }
        for i in 0..4 {
            joins.push((mid_dist, vec![NodeId::inner(2 * i), NodeId::inner(2 * i + 1)]));
        }
        joins.push((0.8, vec![NodeId::inner(8), NodeId::inner(9)]));
        joins.push((0.8, vec![NodeId::inner(10), NodeId::inner(11)]));
        joins.push((0.9, vec![NodeId::inner(12), NodeId::inner(13)]));
        Tree::build(
            "four_level".to_string(),
            Grid::Nifti,
            Coordinate::new(16, 1, 1),
            0,
            0.0,
            0.0,
            coordinates,
            (0..16).collect(),
            Vec::new(),
            joins,
        )
        .unwrap()
    }

    #[test]
    fn test_classic_horizontal_value() {
        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        let (partition, cut) = partitioner
            .classic(
                PartitionCondition::Value(0.5),
                PartitionMode::Horizontal,
                false,
                tree.root().id(),
            )
            .unwrap();
        assert_eq!(
            partition,
            vec![NodeId::leaf(4), NodeId::inner(0), NodeId::inner(1)]
        );
        assert!(approx_eq!(f32, cut, 0.3));
        assert_eq!(covered_leaves(&tree, &partition), 5);
    }

    #[test]
    fn test_classic_cluster_count() {
        let tree = balanced_binary(3);
        let partitioner = TreePartitioner::new(&tree);
        let (partition, _) = partitioner
            .classic(
                PartitionCondition::ClusterCount(4),
                PartitionMode::Horizontal,
                false,
                tree.root().id(),
            )
            .unwrap();
        assert_eq!(partition.len(), 4);
        assert_eq!(covered_leaves(&tree, &partition), 8);
        assert_eq!(to_inner_ids(&partition), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_classic_excludes_meta_leaves() {
        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        let (partition, _) = partitioner
            .classic(
                PartitionCondition::Value(0.05),
                PartitionMode::Horizontal,
                true,
                tree.root().id(),
            )
            .unwrap();
        // base nodes stay atomic, so subdivision stops at them
        assert_eq!(
            partition,
            vec![NodeId::leaf(4), NodeId::inner(0), NodeId::inner(1)]
        );
    }

    #[test]
    fn test_classic_by_size() {
        let tree = balanced_binary(3);
        let partitioner = TreePartitioner::new(&tree);
        let (partition, cut) = partitioner
            .classic(
                PartitionCondition::Value(2.5),
                PartitionMode::Size,
                false,
                tree.root().id(),
            )
            .unwrap();
        // splits until every cluster holds at most 2 leaves
        assert_eq!(partition.len(), 4);
        assert!(approx_eq!(f32, cut, 2.0));
    }

    #[test]
    fn test_sharp_cut() {
        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        // branches to parent: n0: 0.7, n2: 0.3, n1: 0.3, leaf4: 0.6
        let (partition, _) = partitioner.sharp(0.5, true, tree.root().id(), false).unwrap();
        assert_eq!(partition, vec![NodeId::leaf(4), NodeId::inner(0), NodeId::inner(1)]);
        assert_eq!(covered_leaves(&tree, &partition), 5);

        // without the meta-leaf protection, the weak-branch base node
        // dissolves into its leaves
        let (partition, _) = partitioner.sharp(0.5, false, tree.root().id(), false).unwrap();
        assert_eq!(
            partition,
            vec![NodeId::leaf(2), NodeId::leaf(3), NodeId::leaf(4), NodeId::inner(0)]
        );
    }

    #[test]
    fn test_smooth_cut() {
        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        // n2's internal branch (0.6 - 0.3) is 0.3, root's worst is 0.7
        let (partition, _) = partitioner.smooth(0.35, false, tree.root().id()).unwrap();
        assert_eq!(partition, vec![NodeId::inner(0), NodeId::inner(2)]);
        assert_eq!(covered_leaves(&tree, &partition), 5);
    }

    #[test]
    fn test_spread_separation_values() {
        let tree = balanced_binary(3);
        let partitioner = TreePartitioner::new(&tree);
        let bases: Vec<NodeId> = (0..4).map(NodeId::inner).collect();
        // spread 2, parent dists 4 * 2/3, own dists 8 * 1/3
        assert!(approx_eq!(
            f32,
            partitioner.spread_separation(&bases).unwrap(),
            2.0,
            epsilon = 1e-6
        ));
        let leaves: Vec<NodeId> = (0..8).map(NodeId::leaf).collect();
        assert_eq!(partitioner.spread_separation(&leaves).unwrap(), 0.0);
    }

    #[test]
    fn test_scan_optimal_on_balanced_tree() {
        let tree = uniform_binary();
        let partitioner = TreePartitioner::new(&tree);
        let recorded = partitioner.scan_optimal_partitions(3, false, 500).unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![2, 4, 8]);
        for (_, partition) in &recorded {
            assert_eq!(covered_leaves(&tree, partition), 8);
        }
        // the finest partition is the leaves themselves
        assert!(recorded[2].1.iter().all(NodeId::is_leaf));
    }

    #[test]
    fn test_scan_adopts_the_best_descent() {
        // tight mid-level joins: splitting to the mids separates well, so
        // the scan takes one level at a time
        let tree = four_level(0.2);
        let partitioner = TreePartitioner::new(&tree);
        let recorded = partitioner.scan_optimal_partitions(3, true, 500).unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![2, 4, 8]);
        assert!(approx_eq!(f32, recorded[1].0, 4.0, epsilon = 1e-6));

        // loose mid-level joins: the base partition outscores the mids, so
        // the scan adopts the deeper descent and skips granularity 4
        let tree = four_level(0.7);
        let partitioner = TreePartitioner::new(&tree);
        let recorded = partitioner.scan_optimal_partitions(3, true, 500).unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![2, 8]);
        assert!(approx_eq!(f32, recorded[1].0, 7.0, epsilon = 1e-6));
    }

    #[test]
    fn test_scan_respects_exclude_leaves_and_ceiling() {
        let tree = uniform_binary();
        let partitioner = TreePartitioner::new(&tree);
        let recorded = partitioner.scan_optimal_partitions(3, true, 500).unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![2, 4]);

        let recorded = partitioner.scan_optimal_partitions(3, false, 4).unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![2, 4]);
    }

    #[test]
    fn test_scan_horizontal() {
        let tree = uniform_binary();
        let partitioner = TreePartitioner::new(&tree);
        let recorded = partitioner.scan_horizontal_partitions(3, true, 500).unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![2, 4]);
        for (_, partition) in &recorded {
            assert_eq!(covered_leaves(&tree, partition), 8);
        }
    }

    #[test]
    fn test_filter_max_partitions() {
        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        let values = [1.0f32, 3.0, 2.0, 5.0, 4.0];
        let partitions: Vec<usize> = (0..5).collect();
        let (kept_values, kept, best) = partitioner.filter_max_partitions(1, &values, &partitions);
        assert_eq!(kept_values, vec![3.0, 5.0]);
        assert_eq!(kept, vec![1, 3]);
        assert_eq!(best, 1);

        // radius 0 keeps everything
        let (kept_values, _, _) = partitioner.filter_max_partitions(0, &values, &partitions);
        assert_eq!(kept_values.len(), 5);
    }

    #[test]
    fn test_max_granularity() {
        let tree = balanced_binary(3);
        let partitioner = TreePartitioner::new(&tree);
        assert_eq!(partitioner.max_granularity_partition().unwrap(), vec![0, 1, 2, 3]);

        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        assert!(partitioner.max_granularity_partition().is_err());
    }

    #[test]
    fn test_branching_chains() {
        let tree = balanced_binary(3);
        let partitioner = TreePartitioner::new(&tree);
        let start = [NodeId::inner(4), NodeId::inner(5)];
        let results = partitioner.branching(&start, 2, true).unwrap();
        // depth 1: branch either cluster; depth 2: branch both in turn
        let singles: Vec<&(Vec<NodeId>, Vec<usize>)> =
            results.iter().filter(|(_, chain)| chain.len() == 1).collect();
        assert_eq!(singles.len(), 2);
        let all_bases: Vec<NodeId> = (0..4).map(NodeId::inner).collect();
        assert!(results.iter().any(|(p, chain)| {
            let mut sorted = p.clone();
            sorted.sort_unstable();
            sorted == all_bases && chain.len() == 2
        }));
        // meta-leaves stay atomic under the exclusion flag
        assert!(partitioner.branching(&all_bases, 3, true).unwrap().is_empty());
    }

    #[test]
    fn test_branching_keeps_leaf_children() {
        // leaf 4 hangs from a node with mixed leaf and inner children
        let tree = five_leaf();
        let partitioner = TreePartitioner::new(&tree);
        let start = [tree.root().id()];

        let results = partitioner.branching(&start, 2, false).unwrap();
        assert!(!results.is_empty());
        for (partition, _) in &results {
            let covered: usize = partition.iter().map(|&id| tree.node(id).unwrap().size()).sum();
            assert_eq!(covered, 5, "partition {partition:?} lost part of its cover");
        }
        assert!(results.iter().any(|(p, _)| p.contains(&NodeId::leaf(4))));

        // with the exclusion flag that leaf child is dropped instead
        let results = partitioner.branching(&start, 2, true).unwrap();
        assert!(results
            .iter()
            .any(|(p, _)| p.contains(&NodeId::inner(1)) && !p.contains(&NodeId::leaf(4))));
    }

    #[test]
    fn test_assign_depth_schedule() {
        assert_eq!(assign_depth(10), 5);
        assert_eq!(assign_depth(40), 4);
        assert_eq!(assign_depth(100), 3);
        assert_eq!(assign_depth(300), 2);
        assert_eq!(assign_depth(400), 1);
    }
}
