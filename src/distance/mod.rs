//! The blocked dissimilarity-matrix engine.
//!
//! The N×N matrix of normalised dot-product dissimilarities between seed
//! tractograms is computed in B×B blocks, each block assembled from b-tract
//! sub-blocks so that one distance block, one row buffer and one column
//! buffer fit the caller's memory budget together. Only upper-triangular
//! blocks (row <= col) are materialised; every completed block is flushed
//! atomically before the next begins, so a killed run resumes at the first
//! missing block.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use rayon::prelude::*;

use crate::constants::{MIN_BLOCK_SIZE, MIN_SUB_BLOCK_SIZE};
use crate::core::coordinate::Coordinate;
use crate::io::roi::SeedRoi;
use crate::io::tract_store::{self, TractStore};
use crate::{Error, Result};

/// Bytes divided by this give tract probabilities multiplied: a dot
/// product term is (byte_a * byte_b) / (255 * 255).
const NORMALIZER: f64 = 255.0 * 255.0;

/// Computes and stores the blocked distance matrix for one seed ROI.
pub struct DistMatComputer {
    coordinates: Vec<Coordinate>,
    trackids: Vec<usize>,
    store: TractStore,
    output_folder: PathBuf,
    tract_threshold: f32,
    log_factor: f64,
    zip: bool,

    // geometry, fixed by configure()
    configured: bool,
    block_size: usize,
    blocks_per_row: usize,
    sub_block_size: usize,
    tract_length: usize,
    start_block: (usize, usize),
    finish_block: (usize, usize),

    norms: Vec<f64>,
}

impl DistMatComputer {
    /// Builds an engine over a loaded ROI. `threshold_ratio` is the
    /// fraction of the streamline budget a tract voxel must reach to count
    /// towards similarity; it is translated into the tracts' normalized
    /// units here. `no_log` declares the stored tracts to be in natural
    /// units already.
    pub fn new(
        roi: &SeedRoi,
        input_folder: &Path,
        output_folder: &Path,
        threshold_ratio: f32,
        no_log: bool,
    ) -> Self {
        let log_factor = if no_log || roi.num_streamlines == 0 {
            if !no_log && roi.num_streamlines == 0 {
                log::warn!("streamline count of 0, treating tracts as natural units");
            }
            0.0
        } else {
            (roi.num_streamlines as f64).log10()
        };

        let tract_threshold = if !(0.0..1.0).contains(&threshold_ratio) {
            if threshold_ratio != 0.0 {
                log::warn!("threshold ratio {threshold_ratio} outside [0,1), not thresholding");
            }
            0.0
        } else if threshold_ratio == 0.0 || log_factor == 0.0 {
            threshold_ratio
        } else {
            ((roi.num_streamlines as f64 * f64::from(threshold_ratio)).log10() / log_factor) as f32
        };
        log::info!("normalized tract threshold: {tract_threshold}");

        DistMatComputer {
            coordinates: roi.coordinates.clone(),
            trackids: roi.trackids.clone(),
            store: TractStore::new(input_folder, roi.grid),
            output_folder: output_folder.to_path_buf(),
            tract_threshold,
            log_factor,
            zip: false,
            configured: false,
            block_size: 0,
            blocks_per_row: 0,
            sub_block_size: 0,
            tract_length: 0,
            start_block: (0, 0),
            finish_block: (0, 0),
            norms: Vec::new(),
        }
    }

    pub fn set_zip(&mut self, zip: bool) {
        self.zip = zip;
    }

    pub fn log_factor(&self) -> f64 {
        self.log_factor
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn blocks_per_row(&self) -> usize {
        self.blocks_per_row
    }

    pub fn sub_block_size(&self) -> usize {
        self.sub_block_size
    }

    /// Fixes the block geometry for a memory budget (GiB) and a requested
    /// outer block size (0 picks the largest that fits).
    ///
    /// An explicit block size below the floor (500 on seed sets larger
    /// than that, 1 otherwise) or above sqrt(budget/8) is rejected, as is
    /// an out-of-range budget or an unreachable sub-block floor; nothing
    /// is silently clamped. The accepted block size is then capped at N,
    /// and the sub-block b becomes the largest divisor of B whose two
    /// tract buffers fit the remaining budget.
    pub fn configure(&mut self, memory_gib: f64, block_size: usize) -> Result<()> {
        if !(0.1..=50.0).contains(&memory_gib) {
            return Err(Error::Config(format!(
                "memory budget {memory_gib} GiB outside [0.1, 50]"
            )));
        }
        let num_seeds = self.coordinates.len();
        if num_seeds == 0 {
            return Err(Error::Config("roi holds no seeds".to_string()));
        }

        // one probe read fixes the tract length
        let probe = self.store.read_leaf_tract(0, &self.trackids, &self.coordinates)?;
        self.tract_length = probe.len();
        log::info!("tractogram length: {} bytes", self.tract_length);

        let budget_bytes = (memory_gib * f64::from(1u32 << 30)) as usize;

        // the distance block may take at most half the budget; the block
        // floor only binds datasets that actually exceed it
        let max_block = ((budget_bytes as f64 / (4.0 * 2.0)).sqrt()) as usize;
        let effective_min = if num_seeds > MIN_BLOCK_SIZE { MIN_BLOCK_SIZE } else { 1 };

        let mut block_size = block_size;
        if block_size == 0 {
            block_size = max_block;
        } else {
            if block_size < effective_min {
                return Err(Error::Config(format!(
                    "block size {block_size} below the minimum of {effective_min}"
                )));
            }
            if block_size > max_block {
                return Err(Error::Config(format!(
                    "block size {block_size} exceeds the maximum of {max_block} for a {memory_gib} GiB budget"
                )));
            }
        }
        if block_size > num_seeds {
            block_size = num_seeds;
        }
        self.block_size = block_size;
        self.blocks_per_row = num_seeds.div_ceil(block_size);
        log::info!(
            "{0}x{0} blocks of size {1}x{1}",
            self.blocks_per_row,
            self.block_size
        );

        let dist_block_bytes = self.block_size * self.block_size * std::mem::size_of::<f32>();
        let overhead = std::mem::size_of::<f64>() * num_seeds;
        let remaining = budget_bytes
            .checked_sub(dist_block_bytes + overhead)
            .ok_or_else(|| Error::Config("distance block alone exceeds the memory budget".to_string()))?;
        let max_sub = remaining / (2 * self.tract_length);

        // largest divisor of the block size that fits two tract buffers
        let mut sub = self.block_size;
        let mut parts = 1;
        while sub > max_sub {
            parts += 1;
            if parts > self.block_size {
                break;
            }
            if self.block_size % parts == 0 {
                sub = self.block_size / parts;
            }
        }
        let sub_floor = MIN_SUB_BLOCK_SIZE.min(self.block_size);
        if sub > max_sub || sub < sub_floor {
            return Err(Error::Config(format!(
                "memory budget leaves room for sub-blocks of {max_sub} tracts, need at least {sub_floor}"
            )));
        }
        self.sub_block_size = sub;
        log::info!(
            "tract sub-blocks of {} tracts ({} per block side)",
            self.sub_block_size,
            self.block_size / self.sub_block_size
        );

        if self.finish_block == (0, 0) {
            self.finish_block = (self.blocks_per_row - 1, self.blocks_per_row - 1);
        }
        self.configured = true;
        self.validate_range();
        Ok(())
    }

    /// First block to compute, in row-major upper-triangular order; blocks
    /// before it are skipped, not deleted.
    pub fn set_start_block(&mut self, row: usize, col: usize) {
        let (row, col) = if col < row { (col, row) } else { (row, col) };
        self.start_block = (row, col);
        if self.configured {
            self.validate_range();
        }
    }

    /// Last block to compute; later blocks are skipped.
    pub fn set_finish_block(&mut self, row: usize, col: usize) {
        let (row, col) = if col < row { (col, row) } else { (row, col) };
        self.finish_block = (row, col);
        if self.configured {
            self.validate_range();
        }
    }

    fn validate_range(&mut self) {
        let last = self.blocks_per_row - 1;
        if self.start_block.0 >= self.blocks_per_row {
            log::warn!("starting block outside the matrix, using (0, 0)");
            self.start_block = (0, 0);
        }
        if self.finish_block.0 > last || self.finish_block.1 > last {
            log::warn!("finish block outside the matrix, using ({last}, {last})");
            self.finish_block = (last, last);
        }
        if self.start_block > self.finish_block {
            log::warn!("starting block after finish block, computing the whole range");
            self.start_block = (0, 0);
            self.finish_block = (last, last);
        }
    }

    /// Computes every tract norm in parallel. Zero norms are reported but
    /// not fatal; the affected rows of the matrix are 1 by definition.
    pub fn compute_norms(&mut self) -> Result<()> {
        log::info!("precomputing tractogram norms");
        let tract_length = self.tract_length;
        let threshold = self.tract_threshold;
        let store = &self.store;
        let trackids = &self.trackids;
        let coordinates = &self.coordinates;

        self.norms = (0..coordinates.len())
            .into_par_iter()
            .map(|seed| {
                let mut tract = store.read_leaf_tract(seed, trackids, coordinates)?;
                if tract.len() != tract_length {
                    return Err(Error::DimensionMismatch(format!(
                        "tract {seed} has {} bytes, expected {tract_length}",
                        tract.len()
                    )));
                }
                tract_store::threshold(&mut tract, threshold);
                Ok(tract_store::compute_norm(&tract))
            })
            .collect::<Result<Vec<f64>>>()?;

        for (seed, norm) in self.norms.iter().enumerate() {
            if *norm == 0.0 {
                log::warn!("tract {seed} has norm 0");
            }
        }
        Ok(())
    }

    /// Computes and flushes all selected blocks. Returns the smallest and
    /// largest distance seen across them.
    pub fn run(&mut self) -> Result<(f32, f32)> {
        if !self.configured {
            return Err(Error::Config("configure() must run before the block loop".to_string()));
        }
        tract_store::write_matrix_index(&self.output_folder, &self.coordinates, self.block_size)?;
        if self.norms.is_empty() {
            self.compute_norms()?;
        }

        let total = self.selected_blocks().count();
        let mut done = 0usize;
        let (mut min_seen, mut max_seen) = (2.0f32, -1.0f32);
        let blocks: Vec<(usize, usize)> = self.selected_blocks().collect();
        for (row, col) in blocks {
            log::info!("computing block {row}-{col}");
            let (block, lo, hi) = self.compute_block(row, col)?;
            tract_store::write_dist_block(&self.output_folder, row, col, &block, self.zip)?;
            min_seen = min_seen.min(lo);
            max_seen = max_seen.max(hi);
            done += 1;
            log::info!("completed block {row}-{col} ({done} of {total}), range [{lo}, {hi}]");
        }
        log::info!("distance range over computed blocks: [{min_seen}, {max_seen}]");
        Ok((min_seen, max_seen))
    }

    /// Upper-triangular blocks within the start..finish range, row-major.
    fn selected_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let (start, finish) = (self.start_block, self.finish_block);
        (start.0..=finish.0).flat_map(move |row| {
            (row..self.blocks_per_row)
                .map(move |col| (row, col))
                .filter(move |&(row, col)| {
                    !(row == start.0 && col < start.1) && !(row == finish.0 && col > finish.1)
                })
        })
    }

    /// Computes one block. Returns it with the smallest and largest value
    /// of its semantically valid region (strictly above the diagonal for
    /// diagonal blocks).
    fn compute_block(&self, row: usize, col: usize) -> Result<(Array2<f32>, f32, f32)> {
        let num_seeds = self.coordinates.len();
        let first_row_seed = row * self.block_size;
        let post_row_seed = ((row + 1) * self.block_size).min(num_seeds);
        let first_col_seed = col * self.block_size;
        let post_col_seed = ((col + 1) * self.block_size).min(num_seeds);
        let block_rows = post_row_seed - first_row_seed;
        let block_cols = post_col_seed - first_col_seed;

        let mut block = Array2::<f32>::zeros((block_rows, block_cols));

        // one row buffer and one column buffer for the whole block
        let b = self.sub_block_size;
        let mut row_tracts = vec![0u8; b * self.tract_length];
        let mut col_tracts = vec![0u8; b * self.tract_length];

        let mut sub_row = 0;
        while sub_row * b < block_rows {
            let first_sub_row = sub_row * b;
            let rows_here = b.min(block_rows - first_sub_row);
            self.load_tract_set(
                first_row_seed + first_sub_row,
                rows_here,
                &mut row_tracts,
                false,
            )?;
            let row_norms = &self.norms[first_row_seed + first_sub_row..first_row_seed + first_sub_row + rows_here];

            let mut sub_col = 0;
            while sub_col * b < block_cols {
                let first_sub_col = sub_col * b;
                let cols_here = b.min(block_cols - first_sub_col);

                if row == col && sub_row > sub_col {
                    sub_col += 1;
                    continue;
                }
                if row == col && sub_row == sub_col {
                    transpose_set(&row_tracts, rows_here, self.tract_length, &mut col_tracts);
                } else {
                    self.load_tract_set(
                        first_col_seed + first_sub_col,
                        cols_here,
                        &mut col_tracts,
                        true,
                    )?;
                }
                let col_norms =
                    &self.norms[first_col_seed + first_sub_col..first_col_seed + first_sub_col + cols_here];

                let rows_out = compute_distances(
                    row_norms,
                    &row_tracts,
                    col_norms,
                    &col_tracts,
                    self.tract_length,
                );
                for (r, values) in rows_out.into_iter().enumerate() {
                    for (c, value) in values.into_iter().enumerate() {
                        block[(first_sub_row + r, first_sub_col + c)] = value;
                    }
                }
                sub_col += 1;
            }
            sub_row += 1;
        }

        let (mut lo, mut hi) = (2.0f32, -1.0f32);
        for r in 0..block_rows {
            let c_init = if row == col { r + 1 } else { 0 };
            for c in c_init..block_cols {
                let value = block[(r, c)];
                lo = lo.min(value);
                hi = hi.max(value);
            }
        }
        Ok((block, lo, hi))
    }

    /// Loads a run of tracts into the reused buffer, thresholding each as
    /// it arrives. Row sets are row-major (`tract * L + k`), column sets
    /// column-major (`k * count + tract`).
    fn load_tract_set(
        &self,
        first_seed: usize,
        count: usize,
        buffer: &mut [u8],
        transposed: bool,
    ) -> Result<()> {
        for offset in 0..count {
            let mut tract =
                self.store
                    .read_leaf_tract(first_seed + offset, &self.trackids, &self.coordinates)?;
            if tract.len() != self.tract_length {
                return Err(Error::DimensionMismatch(format!(
                    "tract {} has {} bytes, expected {}",
                    first_seed + offset,
                    tract.len(),
                    self.tract_length
                )));
            }
            tract_store::threshold(&mut tract, self.tract_threshold);
            if transposed {
                for (k, value) in tract.iter().enumerate() {
                    buffer[k * count + offset] = *value;
                }
            } else {
                buffer[offset * self.tract_length..(offset + 1) * self.tract_length]
                    .copy_from_slice(&tract);
            }
        }
        Ok(())
    }
}

/// Transposes a row-major tract set into the column-major buffer.
fn transpose_set(row_set: &[u8], count: usize, tract_length: usize, col_set: &mut [u8]) {
    for offset in 0..count {
        for k in 0..tract_length {
            col_set[k * count + offset] = row_set[offset * tract_length + k];
        }
    }
}

/// The dot-product kernel over one sub-block pair. Rows run in parallel;
/// each worker owns its dot buffer and produces its own output row, so no
/// state is shared.
fn compute_distances(
    row_norms: &[f64],
    row_set: &[u8],
    col_norms: &[f64],
    col_set: &[u8],
    tract_length: usize,
) -> Vec<Vec<f32>> {
    let cols = col_norms.len();
    (0..row_norms.len())
        .into_par_iter()
        .map(|r| {
            if row_norms[r] == 0.0 {
                return vec![1.0f32; cols];
            }
            let mut dot = vec![0.0f64; cols];
            let tract = &row_set[r * tract_length..(r + 1) * tract_length];
            for (k, &byte) in tract.iter().enumerate() {
                if byte == 0 {
                    continue;
                }
                let value = f64::from(byte) / NORMALIZER;
                let col_slice = &col_set[k * cols..(k + 1) * cols];
                for (acc, &col_byte) in dot.iter_mut().zip(col_slice.iter()) {
                    *acc += value * f64::from(col_byte);
                }
            }
            dot.iter()
                .zip(col_norms.iter())
                .map(|(&product, &col_norm)| {
                    if col_norm == 0.0 {
                        1.0
                    } else {
                        ((1.0 - product / (row_norms[r] * col_norm)) as f32).max(0.0)
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinate::Grid;
    use float_cmp::approx_eq;
    use std::fs;

    fn make_roi(tracts: &[Vec<u8>]) -> SeedRoi {
        SeedRoi {
            grid: Grid::Nifti,
            extent: Coordinate::new(16, 16, 16),
            num_streamlines: 0,
            coordinates: (0..tracts.len())
                .map(|i| Coordinate::new(i as i16, 0, 0))
                .collect(),
            trackids: (0..tracts.len()).collect(),
        }
    }

    fn write_tracts(dir: &Path, roi: &SeedRoi, tracts: &[Vec<u8>]) {
        let store = TractStore::new(dir, roi.grid);
        for (seed, tract) in tracts.iter().enumerate() {
            store
                .write_leaf_tract(seed, &roi.trackids, &roi.coordinates, tract)
                .unwrap();
        }
    }

    fn full_matrix(out: &Path, n: usize, block_size: usize) -> Vec<Vec<f32>> {
        let blocks_per_row = n.div_ceil(block_size);
        let mut matrix = vec![vec![f32::NAN; n]; n];
        for row in 0..blocks_per_row {
            for col in row..blocks_per_row {
                let block = tract_store::read_dist_block(out, row, col).unwrap();
                for ((r, c), &value) in block.indexed_iter() {
                    if row == col && r > c {
                        // below the diagonal the block content is unspecified
                        continue;
                    }
                    let (a, b) = (row * block_size + r, col * block_size + c);
                    matrix[a][b] = value;
                    matrix[b][a] = value;
                }
            }
        }
        matrix
    }

    #[test]
    fn test_tiny_dissimilarity() {
        let tracts = vec![
            vec![255u8, 0, 0, 0, 0, 0],
            vec![255, 255, 0, 0, 0, 0],
            vec![0, 0, 255, 0, 0, 0],
            vec![0, 0, 0, 0, 0, 0],
        ];
        let roi = make_roi(&tracts);
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);

        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.0, false);
        engine.configure(0.1, 2).unwrap();
        assert_eq!(engine.blocks_per_row(), 2);
        let (lo, hi) = engine.run().unwrap();

        let matrix = full_matrix(output.path(), 4, 2);
        let expected = 1.0 - 1.0 / 2f32.sqrt();
        assert!(approx_eq!(f32, matrix[0][1], expected, epsilon = 1e-4));
        for (a, b) in [(0, 2), (0, 3), (1, 2), (1, 3), (2, 3)] {
            assert!(approx_eq!(f32, matrix[a][b], 1.0, epsilon = 1e-6), "D[{a}][{b}]");
        }
        assert!(approx_eq!(f32, lo, expected, epsilon = 1e-4));
        assert!(approx_eq!(f32, hi, 1.0, epsilon = 1e-6));
        assert!(output.path().join(crate::constants::MATRIX_INDEX_FILENAME).is_file());
    }

    #[test]
    fn test_matrix_properties() {
        // pseudo-random but deterministic tracts
        let tracts: Vec<Vec<u8>> = (0..7u32)
            .map(|seed| {
                (0..11u32)
                    .map(|k| ((seed * 37 + k * 101 + 13) % 256) as u8)
                    .collect()
            })
            .collect();
        let roi = make_roi(&tracts);
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);

        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.0, false);
        engine.configure(0.1, 3).unwrap();
        engine.run().unwrap();

        let matrix = full_matrix(output.path(), 7, 3);
        for a in 0..7 {
            assert!(matrix[a][a].abs() < 1e-6, "diagonal {a} = {}", matrix[a][a]);
            for b in 0..7 {
                assert_eq!(matrix[a][b].to_bits(), matrix[b][a].to_bits());
                assert!((0.0..=1.0).contains(&matrix[a][b]));
            }
        }
    }

    #[test]
    fn test_checkpoint_resume() {
        let tracts: Vec<Vec<u8>> = (0..9u32)
            .map(|seed| (0..5u32).map(|k| ((seed * 31 + k * 7) % 256) as u8).collect())
            .collect();
        let roi = make_roi(&tracts);
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);

        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.0, false);
        engine.set_start_block(1, 1);
        engine.set_finish_block(1, 2);
        engine.configure(0.1, 3).unwrap();
        engine.run().unwrap();

        for (row, col) in [(1, 1), (1, 2)] {
            assert!(tract_store::block_exists(output.path(), row, col));
        }
        for (row, col) in [(0, 0), (0, 1), (0, 2), (2, 2)] {
            assert!(!tract_store::block_exists(output.path(), row, col));
        }
        let frozen: Vec<Vec<u8>> = [(1, 1), (1, 2)]
            .iter()
            .map(|&(r, c)| fs::read(output.path().join(tract_store::block_filename(r, c, false))).unwrap())
            .collect();

        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.0, false);
        engine.set_start_block(0, 0);
        engine.set_finish_block(0, 2);
        engine.configure(0.1, 3).unwrap();
        engine.run().unwrap();

        for (row, col) in [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2)] {
            assert!(tract_store::block_exists(output.path(), row, col));
        }
        assert!(!tract_store::block_exists(output.path(), 2, 2));
        for (i, &(r, c)) in [(1, 1), (1, 2)].iter().enumerate() {
            let bytes = fs::read(output.path().join(tract_store::block_filename(r, c, false))).unwrap();
            assert_eq!(bytes, frozen[i], "block {r}-{c} was touched by the resumed run");
        }
    }

    #[test]
    fn test_threshold_drops_weak_voxels() {
        // natural units: threshold ratio is the normalized threshold
        let tracts = vec![vec![10u8, 200, 0, 0], vec![10, 200, 0, 0]];
        let mut roi = make_roi(&tracts);
        roi.num_streamlines = 0;
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);

        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.5, false);
        engine.configure(0.1, 2).unwrap();
        engine.run().unwrap();

        // bytes below 127 vanish, so the tracts still agree perfectly
        let block = tract_store::read_dist_block(output.path(), 0, 0).unwrap();
        assert!(block[(0, 1)].abs() < 1e-6);
    }

    #[test]
    fn test_config_rejections() {
        let tracts = vec![vec![1u8, 2, 3], vec![4, 5, 6]];
        let roi = make_roi(&tracts);
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);

        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.0, false);
        assert!(matches!(engine.configure(0.01, 0), Err(Error::Config(_))));
        assert!(matches!(engine.configure(51.0, 0), Err(Error::Config(_))));
        assert!(matches!(engine.run(), Err(Error::Config(_))));
    }

    #[test]
    fn test_blocksize_rejections() {
        // a 0.1 GiB budget caps blocks at sqrt(budget/8) rows
        let tracts = vec![vec![1u8, 2, 3], vec![4, 5, 6]];
        let roi = make_roi(&tracts);
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);
        let mut engine = DistMatComputer::new(&roi, input.path(), output.path(), 0.0, false);
        assert!(matches!(engine.configure(0.1, 5000), Err(Error::Config(_))));

        // on seed sets above the block floor, an undersized block is
        // rejected before any tract beyond the probe is touched
        let big_roi = SeedRoi {
            grid: Grid::Nifti,
            extent: Coordinate::new(1000, 16, 16),
            num_streamlines: 0,
            coordinates: (0..600).map(|i| Coordinate::new(i, 0, 0)).collect(),
            trackids: (0..600).collect(),
        };
        let store = TractStore::new(input.path(), big_roi.grid);
        store
            .write_leaf_tract(0, &big_roi.trackids, &big_roi.coordinates, &[1, 2, 3])
            .unwrap();
        let mut engine = DistMatComputer::new(&big_roi, input.path(), output.path(), 0.0, false);
        assert!(matches!(engine.configure(0.1, 100), Err(Error::Config(_))));
    }

    #[test]
    fn test_zipped_blocks_roundtrip() {
        let tracts = vec![vec![9u8, 0, 3], vec![0, 7, 3], vec![1, 1, 1]];
        let roi = make_roi(&tracts);
        let input = tempfile::tempdir().unwrap();
        let plain_out = tempfile::tempdir().unwrap();
        let zipped_out = tempfile::tempdir().unwrap();
        write_tracts(input.path(), &roi, &tracts);

        let mut engine = DistMatComputer::new(&roi, input.path(), plain_out.path(), 0.0, false);
        engine.configure(0.1, 3).unwrap();
        engine.run().unwrap();

        let mut engine = DistMatComputer::new(&roi, input.path(), zipped_out.path(), 0.0, false);
        engine.set_zip(true);
        engine.configure(0.1, 3).unwrap();
        engine.run().unwrap();

        let plain = tract_store::read_dist_block(plain_out.path(), 0, 0).unwrap();
        let zipped = tract_store::read_dist_block(zipped_out.path(), 0, 0).unwrap();
        for (a, b) in plain.iter().zip(zipped.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
