//! Importing an external 3-D label partition into a tree: each meta-leaf
//! adopts the most frequent label among its seed voxels, and the tree is
//! rebuilt as a three-level hierarchy (meta-leaves, label clusters, root).

use std::collections::BTreeMap;

use crate::core::coordinate::Coordinate;
use crate::core::node::NodeId;
use crate::core::tree::{JoinList, Tree};
use crate::io::volume::LabelVolume;
use crate::{Error, Result};

const BASE_LEVEL: f32 = 0.1;
const LABEL_LEVEL: f32 = 0.5;
const ROOT_LEVEL: f32 = 1.0;

/// Builds the three-level partition tree induced by a label volume.
///
/// The volume must cover exactly the tree's seed voxels (its non-zero
/// count equals the leaf count, its extent equals the dataset extent) and
/// the tree must be meta-leaf-clean. Label 1 marks unlabelled tissue and
/// is ignored whenever a meta-leaf also sees real labels.
pub fn import_image_partition(tree: &Tree, volume: &LabelVolume) -> Result<Tree> {
    if volume.extent != tree.extent() {
        return Err(Error::DimensionMismatch(format!(
            "volume extent {} does not match dataset extent {}",
            volume.extent,
            tree.extent()
        )));
    }
    if volume.num_nonzero() != tree.num_leaves() {
        return Err(Error::DimensionMismatch(format!(
            "volume labels {} voxels but the tree has {} leaves",
            volume.num_nonzero(),
            tree.num_leaves()
        )));
    }
    if !tree.test_root_base_nodes() {
        return Err(Error::Invariant(
            "image import needs a meta-leaf-clean tree".to_string(),
        ));
    }

    let bases = tree.root_base_nodes();
    let mut best_labels = Vec::with_capacity(bases.len());
    for &base in &bases {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for leaf in tree.leaves_under(NodeId::inner(base))? {
            let coord = tree.coord_for_leaf(leaf)?;
            let sample = coord.to_grid(tree.grid(), volume.grid, tree.extent());
            let label = volume.label_at(&sample);
            if label == 0 {
                return Err(Error::DimensionMismatch(format!(
                    "seed voxel {coord} carries no label"
                )));
            }
            *counts.entry(label).or_insert(0) += 1;
        }
        // unlabeled-tissue marker only wins when nothing else is present
        if counts.len() > 1 {
            counts.remove(&1);
        }
        let (&label, _) = counts
            .iter()
            .max_by_key(|(_, &count)| count)
            .expect("every base holds at least one leaf");
        best_labels.push(label);
    }

    // meta-leaves keep their leaf sets at the lowest level
    let mut joins: JoinList = Vec::with_capacity(bases.len() + 2);
    for &base in &bases {
        let children: Vec<NodeId> = tree
            .leaves_under(NodeId::inner(base))?
            .into_iter()
            .map(NodeId::leaf)
            .collect();
        joins.push((BASE_LEVEL, children));
    }

    // one parent per distinct label
    let mut label_members: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for (position, &label) in best_labels.iter().enumerate() {
        label_members
            .entry(label)
            .or_default()
            .push(NodeId::inner(position));
    }
    let mut label_nodes = Vec::with_capacity(label_members.len());
    for members in label_members.values() {
        label_nodes.push(NodeId::inner(joins.len()));
        joins.push((LABEL_LEVEL, members.clone()));
    }
    joins.push((ROOT_LEVEL, label_nodes));

    Tree::build(
        format!("{}_labelpart", tree.name()),
        tree.grid(),
        tree.extent(),
        tree.num_streamlines(),
        tree.log_factor(),
        0.0,
        tree.coordinates().to_vec(),
        tree.trackids().to_vec(),
        tree.discarded().to_vec(),
        joins,
    )
}
