//! Cross-tree partition matching: given a correspondence between the
//! meta-leaves of two trees, find the target-tree partitions that best
//! match the reference tree's saved partitions and transfer their colors.

pub mod image;

use std::path::Path;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::core::coordinate::Color;
use crate::core::node::NodeId;
use crate::core::tree::Tree;
use crate::io::parser::{parse_token, SectionFile};
use crate::partition::{assign_depth, TreePartitioner};
use crate::{Error, Result};

/// The raw base-node correspondence table: one `(ref_node, target_node)`
/// pair per reference meta-leaf, with an out-of-range target id standing
/// for "no match".
#[derive(Debug, Clone)]
pub struct CorrespondenceTable {
    pub pairs: Vec<(usize, usize)>,
}

impl CorrespondenceTable {
    /// Reads the `#correspondence` section: one `ref target` pair per line.
    pub fn read(path: &Path) -> Result<CorrespondenceTable> {
        let file = SectionFile::read(path)?;
        let mut pairs = Vec::new();
        for line in file.required("correspondence")? {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != 2 {
                return Err(Error::format(path, format!("correspondence line needs two ids: {line:?}")));
            }
            pairs.push((
                parse_token(tokens[0], "reference node id", path)?,
                parse_token(tokens[1], "target node id", path)?,
            ));
        }
        if pairs.is_empty() {
            return Err(Error::format(path, "correspondence table is empty"));
        }
        Ok(CorrespondenceTable { pairs })
    }
}

/// The per-cluster assignment produced by one overlap evaluation:
/// `table[i]` is the matched opposite-side cluster (or a value past the
/// opposite partition's length when there is none) and `values[i]` the
/// overlap that backs it.
#[derive(Debug, Clone, Default)]
pub struct MatchTables {
    pub table1: Vec<usize>,
    pub values1: Vec<usize>,
    pub table2: Vec<usize>,
    pub values2: Vec<usize>,
}

/// Matches partitions between a reference and a target tree sharing a
/// meta-leaf correspondence. The derived lookup tables refer to the trees
/// the matcher was built from; rebuild it when a tree changes.
#[derive(Debug)]
pub struct PartitionMatcher {
    ref_matched_bases: Vec<usize>,
    target_matched_bases: Vec<usize>,
    ref_matched_for_node: Vec<Vec<usize>>,
    target_matched_for_node: Vec<Vec<usize>>,
}

impl PartitionMatcher {
    /// Validates both trees and the table, and builds the matched-base
    /// lookups.
    pub fn new(ref_tree: &Tree, target_tree: &Tree, table: &CorrespondenceTable) -> Result<PartitionMatcher> {
        if !ref_tree.test_root_base_nodes() {
            return Err(Error::Invariant("reference tree is not meta-leaf-clean".to_string()));
        }
        if !target_tree.test_root_base_nodes() {
            return Err(Error::Invariant("target tree is not meta-leaf-clean".to_string()));
        }
        let ref_bases = ref_tree.root_base_nodes();
        let target_bases = target_tree.root_base_nodes();
        if table.pairs.len() != ref_bases.len() {
            return Err(Error::DimensionMismatch(format!(
                "correspondence table has {} rows for {} reference meta-leaves",
                table.pairs.len(),
                ref_bases.len()
            )));
        }

        let mut ref_matched_bases = Vec::new();
        let mut target_matched_bases = Vec::new();
        for &(ref_id, target_id) in &table.pairs {
            if !ref_bases.contains(&ref_id) {
                return Err(Error::Format {
                    path: "correspondence".to_string(),
                    reason: format!("node {ref_id} is not a reference meta-leaf"),
                });
            }
            if target_id < target_tree.num_nodes() {
                if !target_bases.contains(&target_id) {
                    return Err(Error::Format {
                        path: "correspondence".to_string(),
                        reason: format!("node {target_id} is not a target meta-leaf"),
                    });
                }
                ref_matched_bases.push(ref_id);
                target_matched_bases.push(target_id);
            }
        }

        Ok(PartitionMatcher {
            ref_matched_for_node: matched_bases_per_node(ref_tree, &ref_matched_bases),
            target_matched_for_node: matched_bases_per_node(target_tree, &target_matched_bases),
            ref_matched_bases,
            target_matched_bases,
        })
    }

    pub fn num_matched(&self) -> usize {
        self.ref_matched_bases.len()
    }

    /// Lower-triangular same-cluster matrix of a partition over the
    /// matched meta-leaves.
    fn signature_matrix(&self, tree: &Tree, partition: &[usize], for_ref: bool) -> Result<Vec<Vec<bool>>> {
        let matched = if for_ref { &self.ref_matched_bases } else { &self.target_matched_bases };
        let mut membership = vec![usize::MAX; matched.len()];
        let mut assigned = 0usize;

        for (cluster_pos, &cluster) in partition.iter().enumerate() {
            let mut worklist = vec![cluster];
            while let Some(node_id) = worklist.pop() {
                let node = tree.inner(node_id)?;
                if node.h_level() == 1 {
                    if let Some(rel) = matched.iter().position(|&b| b == node_id) {
                        membership[rel] = cluster_pos;
                        assigned += 1;
                    }
                } else {
                    for child in node.children() {
                        if child.is_inner() {
                            worklist.push(child.index);
                        }
                    }
                }
            }
        }
        if assigned != matched.len() {
            return Err(Error::Invariant(format!(
                "partition assigned {assigned} of {} matched meta-leaves",
                matched.len()
            )));
        }

        let mut signature = Vec::with_capacity(membership.len());
        for i in 0..membership.len() {
            let mut row = Vec::with_capacity(i);
            for j in 0..i {
                row.push(membership[i] == membership[j]);
            }
            signature.push(row);
        }
        Ok(signature)
    }

    /// Pearson correlation of the two signatures over the lower triangle,
    /// plus lambda times the partition-size ratio.
    fn eval_signature_match(
        lambda: f32,
        ref_size: usize,
        ref_signature: &[Vec<bool>],
        target_size: usize,
        target_signature: &[Vec<bool>],
    ) -> Result<f64> {
        if ref_signature.len() != target_signature.len() {
            return Err(Error::DimensionMismatch(
                "signature matrices differ in size".to_string(),
            ));
        }
        let n = ref_signature.len();
        if n < 2 {
            return Err(Error::DimensionMismatch(
                "signature matching needs at least two matched meta-leaves".to_string(),
            ));
        }
        let m = (n * (n - 1)) as f64 / 2.0;
        let (mut sum1, mut sum2, mut sum_prod) = (0.0f64, 0.0, 0.0);
        for i in 0..n {
            for j in 0..i {
                let a = f64::from(u8::from(ref_signature[i][j]));
                let b = f64::from(u8::from(target_signature[i][j]));
                sum1 += a;
                sum2 += b;
                sum_prod += a * b;
            }
        }
        let mean1 = sum1 / m;
        let mean2 = sum2 / m;
        let denominator = (mean1 * (1.0 - mean1) * mean2 * (1.0 - mean2)).sqrt();
        let correlation = if denominator > 0.0 {
            (sum_prod / m - mean1 * mean2) / denominator
        } else {
            0.0
        };

        let big = ref_size.max(target_size) as f64;
        let small = ref_size.min(target_size) as f64;
        Ok(correlation + f64::from(lambda) * (small / big))
    }

    /// Shared matched meta-leaves between a reference and a target cluster.
    fn cluster_overlap(&self, ref_cluster: usize, target_cluster: usize) -> usize {
        let bases1 = &self.ref_matched_for_node[ref_cluster];
        let bases2 = &self.target_matched_for_node[target_cluster];
        bases1.iter().filter(|b| bases2.contains(b)).count()
    }

    /// Bidirectional overlap matching of two partitions. Returns the
    /// quality (frozen overlap mass over the matched meta-leaf count) and
    /// the final assignment tables.
    pub fn eval_overlap_match(
        &self,
        ref_partition: &[usize],
        target_partition: &[usize],
    ) -> Result<(f64, MatchTables)> {
        if ref_partition.is_empty() || target_partition.is_empty() {
            return Err(Error::DimensionMismatch("overlap match of an empty partition".to_string()));
        }
        let rows = ref_partition.len();
        let cols = target_partition.len();

        let mut matrix1 = vec![vec![0usize; cols]; rows];
        let mut matrix2 = vec![vec![0usize; rows]; cols];
        for i in 0..rows {
            for j in 0..cols {
                let overlap = self.cluster_overlap(ref_partition[i], target_partition[j]);
                matrix1[i][j] = overlap;
                matrix2[j][i] = overlap;
            }
        }

        let best_of = |matrix: &Vec<Vec<usize>>| -> (Vec<usize>, Vec<usize>) {
            let mut table = Vec::with_capacity(matrix.len());
            let mut values = Vec::with_capacity(matrix.len());
            for row in matrix {
                let (best, value) = crate::utils::helpers::arg_max(row);
                if value > 0 {
                    table.push(best);
                } else {
                    table.push(row.len() + 1);
                }
                values.push(value);
            }
            (table, values)
        };
        let (mut table1, mut values1) = best_of(&matrix1);
        let (mut table2, mut values2) = best_of(&matrix2);

        let mut tables = MatchTables {
            table1: table1.clone(),
            values1: values1.clone(),
            table2: table2.clone(),
            values2: values2.clone(),
        };

        let mut checked1 = vec![false; rows];
        let mut checked2 = vec![false; cols];
        for i in 0..rows {
            if table1[i] >= cols {
                checked1[i] = true;
            }
        }
        for j in 0..cols {
            if table2[j] >= rows {
                checked2[j] = true;
            }
        }

        let mut frozen_mass = 0usize;
        let mut keep_going = true;
        while keep_going {
            keep_going = false;

            // freeze every bidirectional best match
            for i in 0..rows {
                if checked1[i] {
                    continue;
                }
                let j = table1[i];
                if table2[j] == i {
                    if values1[i] != values2[j] {
                        return Err(Error::Invariant("overlap tables disagree on a frozen pair".to_string()));
                    }
                    frozen_mass += values1[i];
                    tables.table1[i] = j;
                    tables.table2[j] = i;
                    tables.values1[i] = values1[i];
                    tables.values2[j] = values1[i];
                    checked1[i] = true;
                    checked2[j] = true;
                }
            }

            // clusters whose pick is frozen try their next-best column,
            // but only for at least half their original best overlap
            for i in 0..rows {
                if checked1[i] || !checked2[table1[i]] {
                    continue;
                }
                let mut next_best = 0usize;
                let mut next_value = 0usize;
                for (j, &overlap) in matrix1[i].iter().enumerate() {
                    if !checked2[j] && overlap > next_value {
                        next_value = overlap;
                        next_best = j;
                    }
                }
                if next_value > tables.values1[i] / 2 {
                    values1[i] = next_value;
                    table1[i] = next_best;
                    keep_going = true;
                }
            }
            for j in 0..cols {
                if checked2[j] || !checked1[table2[j]] {
                    continue;
                }
                let mut next_best = 0usize;
                let mut next_value = 0usize;
                for (i, &overlap) in matrix2[j].iter().enumerate() {
                    if !checked1[i] && overlap > next_value {
                        next_value = overlap;
                        next_best = i;
                    }
                }
                if next_value > tables.values2[j] / 2 {
                    values2[j] = next_value;
                    table2[j] = next_best;
                    keep_going = true;
                }
            }
        }

        let quality = frozen_mass as f64 / self.ref_matched_bases.len() as f64;
        Ok((quality, tables))
    }

    /// Searches the target tree for the partition best matching each of
    /// the reference tree's saved partitions, and saves the results into
    /// the target tree.
    ///
    /// A negative lambda selects overlap matching; otherwise signature
    /// matching with that lambda. `depth` 0 assigns the search depth
    /// adaptively from each reference partition's size.
    pub fn find_matching_partitions(
        &self,
        ref_tree: &Tree,
        target_tree: &mut Tree,
        lambda: f32,
        depth: usize,
    ) -> Result<()> {
        let overlap_matching = lambda < 0.0;
        if !target_tree.selected_values().is_empty() {
            log::warn!("target tree had saved partitions, replacing them");
        }
        target_tree.clear_partitions();

        let ref_partitions = ref_tree.selected_partitions().to_vec();
        log::info!(
            "matching {} saved partitions ({})",
            ref_partitions.len(),
            if overlap_matching { "overlap" } else { "signature" }
        );

        let mut found_partitions = Vec::with_capacity(ref_partitions.len());
        let mut found_values = Vec::with_capacity(ref_partitions.len());

        let target: &Tree = target_tree;
        for (index, ref_partition) in ref_partitions.iter().enumerate() {
            let level_depth = if depth == 0 { assign_depth(ref_partition.len()) } else { depth };
            log::info!(
                "partition {index}: {} clusters, search depth {level_depth}",
                ref_partition.len()
            );

            let ref_signature = if overlap_matching {
                Vec::new()
            } else {
                self.signature_matrix(ref_tree, ref_partition, true)?
            };

            let partitioner = TreePartitioner::new(target);
            let mut last_partition = vec![target.root().id().index];
            let mut last_value = self.eval_candidate(
                target,
                lambda,
                overlap_matching,
                ref_partition,
                &ref_signature,
                &last_partition,
            )?;
            let mut kept_partition = last_partition.clone();
            let mut kept_value = last_value;

            loop {
                // the matched meta-leaves are the atoms of the comparison,
                // so the search never descends past them
                let as_ids: Vec<NodeId> =
                    last_partition.iter().map(|&i| NodeId::inner(i)).collect();
                let derived: Vec<(Vec<usize>, Vec<usize>)> = partitioner
                    .branching(&as_ids, level_depth, true)?
                    .into_iter()
                    .map(|(candidate, chain)| {
                        (candidate.into_iter().map(|id| id.index).collect(), chain)
                    })
                    .collect();
                if derived.is_empty() {
                    break;
                }

                let values = derived
                    .par_iter()
                    .map(|(candidate, _)| {
                        self.eval_candidate(
                            target,
                            lambda,
                            overlap_matching,
                            ref_partition,
                            &ref_signature,
                            candidate,
                        )
                    })
                    .collect::<Result<Vec<f64>>>()?;

                let (best, best_value) = crate::utils::helpers::arg_max(&values);
                if best_value <= last_value
                    && derived[best].0.len() > ref_partition.len() + ref_partition.len() / 10 + 10
                {
                    break;
                }

                // walk to the first-branch partition of the best derivation
                let (adopted, adopted_value) = if derived[best].1.len() == 1 {
                    (derived[best].0.clone(), best_value)
                } else {
                    let first = derived[best].1[0];
                    let position = derived
                        .iter()
                        .position(|(_, chain)| chain.len() == 1 && chain[0] == first)
                        .ok_or_else(|| {
                            Error::Invariant("first-branch partition missing from derivation".to_string())
                        })?;
                    (derived[position].0.clone(), values[position])
                };

                if adopted_value > last_value {
                    kept_value = adopted_value;
                    kept_partition = adopted.clone();
                }
                last_partition = adopted;
                last_value = adopted_value;
            }

            log::info!(
                "best match: {} clusters at value {kept_value}",
                kept_partition.len()
            );
            kept_partition.sort_unstable_by(|a, b| b.cmp(a));
            found_partitions.push(kept_partition);
            found_values.push(kept_value as f32);
        }

        target_tree.insert_partitions(found_partitions, found_values, None)
    }

    fn eval_candidate(
        &self,
        target_tree: &Tree,
        lambda: f32,
        overlap_matching: bool,
        ref_partition: &[usize],
        ref_signature: &[Vec<bool>],
        candidate: &[usize],
    ) -> Result<f64> {
        if overlap_matching {
            Ok(self.eval_overlap_match(ref_partition, candidate)?.0)
        } else {
            let target_signature = self.signature_matrix(target_tree, candidate, false)?;
            Self::eval_signature_match(
                lambda,
                ref_partition.len(),
                ref_signature,
                candidate.len(),
                &target_signature,
            )
        }
    }

    /// Transfers cluster colors between the saved partition pairs of the
    /// two trees based on overlap matching. Returns whether the reference
    /// tree's colors were altered.
    pub fn match_colors(
        &self,
        ref_tree: &mut Tree,
        target_tree: &mut Tree,
        exclusive: bool,
    ) -> Result<bool> {
        if ref_tree.selected_colors().is_empty() {
            log::info!("reference tree has no saved partition colors, skipping color matching");
            return Ok(false);
        }
        let num_partitions = ref_tree.selected_partitions().len();
        if target_tree.selected_partitions().len() != num_partitions {
            return Err(Error::DimensionMismatch(format!(
                "{num_partitions} reference partitions but {} target partitions",
                target_tree.selected_partitions().len()
            )));
        }

        let mut rng = ChaCha8Rng::from_entropy();
        let mut ref_changed = false;
        let mut all_ref_colors = Vec::with_capacity(num_partitions);
        let mut all_target_colors = Vec::with_capacity(num_partitions);

        for index in 0..num_partitions {
            let partition1 = ref_tree.selected_partitions()[index].clone();
            let partition2 = target_tree.selected_partitions()[index].clone();
            let mut colors1 = ref_tree.selected_colors()[index].clone();
            let (quality, tables) = self.eval_overlap_match(&partition1, &partition2)?;
            log::info!("partition {index}: overlap quality {quality:.4}");

            let part1_size = partition1.len();
            let part2_size = partition2.len();
            let mut done1 = vec![false; part1_size];
            let mut done2 = vec![false; part2_size];
            let mut colors2 = vec![Color::new(0, 0, 0); part2_size];

            // color the target partition from its matches
            for j in 0..part2_size {
                if done2[j] {
                    continue;
                }
                let matched1 = tables.table2[j];
                if matched1 >= part1_size {
                    done2[j] = true;
                    colors2[j] = if exclusive { Color::WHITE } else { random_color(&mut rng) };
                    continue;
                }
                let matched_color = colors1[matched1];
                let rivals: Vec<usize> = (0..part2_size)
                    .filter(|&k| tables.table2[k] == matched1)
                    .collect();
                if rivals.len() == 1 {
                    colors2[j] = matched_color;
                    done2[j] = true;
                    continue;
                }

                // several target clusters share this reference match: the
                // biggest overlap keeps the pure color
                let best = rivals
                    .iter()
                    .copied()
                    .max_by_key(|&k| tables.values2[k])
                    .expect("rivals holds j");
                colors2[best] = matched_color;
                done2[best] = true;
                let mut shift = 0usize;
                for &k in &rivals {
                    if k == best {
                        continue;
                    }
                    done2[k] = true;
                    // a reference cluster may itself point at this rival
                    if let Some(claimant) = (0..part1_size).find(|&l| tables.table1[l] == k) {
                        colors2[k] = colors1[claimant];
                    } else {
                        colors2[k] = shift_color(matched_color, shift);
                        shift += 1;
                    }
                }
            }

            // symmetric pass: reference clusters sharing one target match
            for i in 0..part1_size {
                if done1[i] {
                    continue;
                }
                let matched2 = tables.table1[i];
                if matched2 >= part2_size {
                    done1[i] = true;
                    if exclusive {
                        colors1[i] = Color::WHITE;
                        ref_changed = true;
                    }
                    continue;
                }
                let rivals: Vec<usize> = (0..part1_size)
                    .filter(|&k| tables.table1[k] == matched2)
                    .collect();
                if rivals.len() == 1 {
                    done1[i] = true;
                    continue;
                }
                let best = rivals
                    .iter()
                    .copied()
                    .max_by_key(|&k| tables.values1[k])
                    .expect("rivals holds i");
                done1[best] = true;
                let matched_color = colors2[matched2];
                let mut shift = 0usize;
                for &k in &rivals {
                    if k == best {
                        continue;
                    }
                    done1[k] = true;
                    // leave clusters alone that a target cluster claims
                    if tables.table2.iter().any(|&t| t == k) {
                        continue;
                    }
                    colors1[k] = shift_color(matched_color, shift);
                    shift += 1;
                    ref_changed = true;
                }
            }

            all_ref_colors.push(colors1);
            all_target_colors.push(colors2);
        }

        ref_tree.insert_partition_colors(all_ref_colors)?;
        target_tree.insert_partition_colors(all_target_colors)?;
        Ok(ref_changed)
    }
}

/// For each inner node, the relative ids of the matched meta-leaves its
/// subtree contains, built bottom-up.
fn matched_bases_per_node(tree: &Tree, matched_bases: &[usize]) -> Vec<Vec<usize>> {
    let mut per_node: Vec<Vec<usize>> = vec![Vec::new(); tree.num_nodes()];
    for (rel, &base) in matched_bases.iter().enumerate() {
        per_node[base].push(rel);
    }
    for i in 0..per_node.len() {
        let children: Vec<usize> = tree
            .inner(i)
            .map(|n| n.children().iter().filter(|c| c.is_inner()).map(|c| c.index).collect())
            .unwrap_or_default();
        for child in children {
            let inherited = per_node[child].clone();
            per_node[i].extend(inherited);
        }
    }
    per_node
}

/// A fresh random cluster color.
fn random_color(rng: &mut impl Rng) -> Color {
    Color::new(rng.gen(), rng.gen(), rng.gen())
}

/// Produces a visually distinct variant of a color: rotates through the
/// three channel pairs, moving each of the pair's channels by
/// 30·(shift/3 + 1) towards the side that keeps it within range.
pub fn shift_color(color: Color, shift: usize) -> Color {
    let amount = (30 * (shift / 3 + 1)) as i16;
    let moved = |value: u8| -> u8 {
        let v = i16::from(value);
        let v = if v >= 128 { v - amount } else { v + amount };
        v.clamp(0, 255) as u8
    };
    let mut out = color;
    match shift % 3 {
        0 => {
            out.r = moved(out.r);
            out.g = moved(out.g);
        }
        1 => {
            out.g = moved(out.g);
            out.b = moved(out.b);
        }
        _ => {
            out.r = moved(out.r);
            out.b = moved(out.b);
        }
    }
    out
}
