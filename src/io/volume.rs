//! 3-D label volumes, the executable form of the external label-image
//! contract: a framed text file listing the non-zero voxels.

use std::path::Path;

use std::collections::HashMap;

use crate::core::coordinate::{Coordinate, Grid};
use crate::io::parser::{parse_token, SectionFile};
use crate::{Error, Result};

/// A sparse 3-D volume of cluster labels.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    pub grid: Grid,
    pub extent: Coordinate,
    voxels: HashMap<Coordinate, usize>,
}

impl LabelVolume {
    /// Reads a `#imagesize` + `#labels` file; label lines are
    /// `x y z label` with non-zero labels.
    pub fn read(path: &Path) -> Result<LabelVolume> {
        let file = SectionFile::read(path)?;
        let (extent, grid) = crate::io::roi::parse_imagesize(file.single_line("imagesize")?, path)?;

        let mut voxels = HashMap::new();
        for line in file.required("labels")? {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != 4 {
                return Err(Error::format(path, format!("label line needs 'x y z label': {line:?}")));
            }
            let coord = Coordinate::new(
                parse_token(tokens[0], "voxel x", path)?,
                parse_token(tokens[1], "voxel y", path)?,
                parse_token(tokens[2], "voxel z", path)?,
            );
            if coord.x < 0
                || coord.y < 0
                || coord.z < 0
                || coord.x >= extent.x
                || coord.y >= extent.y
                || coord.z >= extent.z
            {
                return Err(Error::format(path, format!("voxel {coord} outside extent {extent}")));
            }
            let label: usize = parse_token(tokens[3], "label", path)?;
            if label == 0 {
                return Err(Error::format(path, format!("voxel {coord} carries label 0")));
            }
            voxels.insert(coord, label);
        }
        Ok(LabelVolume { grid, extent, voxels })
    }

    pub fn from_voxels(grid: Grid, extent: Coordinate, voxels: HashMap<Coordinate, usize>) -> Self {
        LabelVolume { grid, extent, voxels }
    }

    /// The label at a voxel; 0 where no label was stored.
    pub fn label_at(&self, coord: &Coordinate) -> usize {
        self.voxels.get(coord).copied().unwrap_or(0)
    }

    pub fn num_nonzero(&self) -> usize {
        self.voxels.len()
    }
}
