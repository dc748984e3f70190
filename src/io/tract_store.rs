//! The compact tract store: per-seed probability vectors as raw byte
//! files, plus the float distance-block files the engine emits.
//!
//! Tract values are log-normalised streamline probabilities scaled to
//! 0..255; a byte b stands for the probability b/255.

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};

use crate::core::coordinate::{Coordinate, Grid};
use crate::{Error, Result};

/// Reads and writes compact tractograms from one folder. The naming
/// convention is fixed by the grid the dataset was tracked in: nifti
/// stores one file per tract id, vista derives the name from the seed
/// coordinate.
#[derive(Debug, Clone)]
pub struct TractStore {
    folder: PathBuf,
    grid: Grid,
}

impl TractStore {
    pub fn new(folder: impl Into<PathBuf>, grid: Grid) -> Self {
        TractStore { folder: folder.into(), grid }
    }

    /// File holding the tract of the given seed.
    pub fn tract_path(&self, seed: usize, trackids: &[usize], coords: &[Coordinate]) -> Result<PathBuf> {
        let name = match self.grid {
            Grid::Nifti => {
                let id = trackids.get(seed).ok_or(Error::DimensionMismatch(format!(
                    "seed {seed} outside track id list of length {}",
                    trackids.len()
                )))?;
                format!("probtract_{id}.cmpct")
            }
            Grid::Vista => {
                let c = coords.get(seed).ok_or(Error::DimensionMismatch(format!(
                    "seed {seed} outside coordinate list of length {}",
                    coords.len()
                )))?;
                format!("connect_{}_{}_{}.v", c.x, c.y, c.z)
            }
        };
        Ok(self.folder.join(name))
    }

    /// Loads the compact tract of one seed.
    pub fn read_leaf_tract(&self, seed: usize, trackids: &[usize], coords: &[Coordinate]) -> Result<Vec<u8>> {
        let path = self.tract_path(seed, trackids, coords)?;
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        if bytes.is_empty() {
            return Err(Error::format(&path, "tract file is empty"));
        }
        Ok(bytes)
    }

    /// Stores a compact tract (used by dataset preparation and tests).
    pub fn write_leaf_tract(
        &self,
        seed: usize,
        trackids: &[usize],
        coords: &[Coordinate],
        tract: &[u8],
    ) -> Result<()> {
        let path = self.tract_path(seed, trackids, coords)?;
        fs::write(&path, tract).map_err(|e| Error::io(&path, e))
    }
}

/// Zeroes every byte whose probability falls below the normalized
/// threshold τ ∈ [0, 1).
pub fn threshold(tract: &mut [u8], tau: f32) {
    let cut = (tau * 255.0).floor() as u8;
    if cut == 0 {
        return;
    }
    for value in tract.iter_mut() {
        if *value < cut {
            *value = 0;
        }
    }
}

/// Euclidean norm of the tract seen as a float vector of b/255 entries.
pub fn compute_norm(tract: &[u8]) -> f64 {
    tract
        .iter()
        .map(|&b| {
            let v = f64::from(b) / 255.0;
            v * v
        })
        .sum::<f64>()
        .sqrt()
}

/// Name of the file holding block (row, col).
pub fn block_filename(row: usize, col: usize, zip: bool) -> String {
    if zip {
        format!("dist_block_{row}_{col}.npy.gz")
    } else {
        format!("dist_block_{row}_{col}.npy")
    }
}

/// Writes a distance block atomically: the payload lands in a temporary
/// file in the same folder and is renamed into place, so a block file is
/// either absent or complete.
pub fn write_dist_block(folder: &Path, row: usize, col: usize, block: &Array2<f32>, zip: bool) -> Result<PathBuf> {
    let final_path = folder.join(block_filename(row, col, zip));
    let tmp_path = folder.join(format!(".{}.tmp", block_filename(row, col, zip)));

    let file = fs::File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
    let writer = BufWriter::new(file);
    let write_result = if zip {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        block
            .write_npy(&mut encoder)
            .map_err(|e| Error::format(&tmp_path, e.to_string()))
            .and_then(|()| encoder.finish().map(|_| ()).map_err(|e| Error::io(&tmp_path, e)))
    } else {
        block.write_npy(writer).map_err(|e| Error::format(&tmp_path, e.to_string()))
    };
    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    fs::rename(&tmp_path, &final_path).map_err(|e| Error::io(&final_path, e))?;
    Ok(final_path)
}

/// Loads a previously written distance block, zipped or not.
pub fn read_dist_block(folder: &Path, row: usize, col: usize) -> Result<Array2<f32>> {
    let plain = folder.join(block_filename(row, col, false));
    if plain.is_file() {
        let file = fs::File::open(&plain).map_err(|e| Error::io(&plain, e))?;
        return Array2::<f32>::read_npy(BufReader::new(file))
            .map_err(|e| Error::format(&plain, e.to_string()));
    }
    let zipped = folder.join(block_filename(row, col, true));
    let file = fs::File::open(&zipped).map_err(|e| Error::io(&zipped, e))?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut payload = Vec::new();
    decoder.read_to_end(&mut payload).map_err(|e| Error::io(&zipped, e))?;
    Array2::<f32>::read_npy(payload.as_slice()).map_err(|e| Error::format(&zipped, e.to_string()))
}

/// Whether a block has already been flushed (in either encoding).
pub fn block_exists(folder: &Path, row: usize, col: usize) -> bool {
    folder.join(block_filename(row, col, false)).is_file()
        || folder.join(block_filename(row, col, true)).is_file()
}

/// Writes the `#distindex` file mapping each seed to its block and
/// in-block offset.
pub fn write_matrix_index(
    folder: &Path,
    coordinates: &[Coordinate],
    block_size: usize,
) -> Result<PathBuf> {
    let path = folder.join(crate::constants::MATRIX_INDEX_FILENAME);
    let file = fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
    let mut writer = BufWriter::new(file);

    let mut emit = || -> std::io::Result<()> {
        writeln!(writer, "#distindex")?;
        for (seed, coord) in coordinates.iter().enumerate() {
            let block_row = seed / block_size;
            let offset = seed % block_size;
            writeln!(writer, "{coord} b {block_row:03} i {offset:04}")?;
        }
        writeln!(writer, "#enddistindex")?;
        writer.flush()
    };
    emit().map_err(|e| Error::io(&path, e))?;
    Ok(path)
}
