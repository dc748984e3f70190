//! Seed ROI files: the ordered seed voxel list a tractography run was
//! seeded from, with the grid, dataset extent and streamline budget.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::core::coordinate::{Coordinate, Grid};
use crate::io::parser::{parse_token, SectionFile};
use crate::{Error, Result};

/// A loaded seed ROI. `trackids[i]` is the storage id of the tractogram
/// computed for `coordinates[i]`.
#[derive(Debug, Clone)]
pub struct SeedRoi {
    pub grid: Grid,
    pub extent: Coordinate,
    pub num_streamlines: usize,
    pub coordinates: Vec<Coordinate>,
    pub trackids: Vec<usize>,
}

impl SeedRoi {
    /// Reads a framed-section ROI file.
    ///
    /// The `#trackindex` section may be omitted in vista datasets (tract
    /// ids then equal seed positions); nifti datasets must carry it.
    pub fn read(path: &Path) -> Result<SeedRoi> {
        let file = SectionFile::read(path)?;

        let (extent, grid) = parse_imagesize(file.single_line("imagesize")?, path)?;
        let num_streamlines: usize = parse_token(file.single_line("streams")?, "streamline count", path)?;

        let mut coordinates = Vec::new();
        for line in file.required("roi")? {
            coordinates.push(Coordinate::parse_line(line, path)?);
        }
        if coordinates.is_empty() {
            return Err(Error::format(path, "roi file holds no seed coordinates"));
        }

        let trackids = match file.section("trackindex")? {
            Some(lines) => {
                if lines.len() != coordinates.len() {
                    return Err(Error::format(
                        path,
                        format!("{} track ids for {} seeds", lines.len(), coordinates.len()),
                    ));
                }
                lines
                    .iter()
                    .map(|line| parse_token(line, "track id", path))
                    .collect::<Result<Vec<usize>>>()?
            }
            None if grid == Grid::Vista => (0..coordinates.len()).collect(),
            None => {
                return Err(Error::format(path, "nifti roi file is missing the #trackindex section"));
            }
        };

        Ok(SeedRoi { grid, extent, num_streamlines, coordinates, trackids })
    }

    /// Writes the ROI back out in the same framed format.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("#imagesize\n");
        out.push_str(&format!("{} {}\n", self.extent, self.grid));
        out.push_str("#endimagesize\n\n#streams\n");
        out.push_str(&format!("{}\n", self.num_streamlines));
        out.push_str("#endstreams\n\n#roi\n");
        for coord in &self.coordinates {
            out.push_str(&format!("{coord}\n"));
        }
        out.push_str("#endroi\n\n#trackindex\n");
        for id in &self.trackids {
            out.push_str(&format!("{id}\n"));
        }
        out.push_str("#endtrackindex\n");

        let mut file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        file.write_all(out.as_bytes()).map_err(|e| Error::io(path, e))
    }

    pub fn num_seeds(&self) -> usize {
        self.coordinates.len()
    }
}

/// Parses an `x y z GRID` imagesize line.
pub(crate) fn parse_imagesize(line: &str, path: &Path) -> Result<(Coordinate, Grid)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 4 {
        return Err(Error::format(path, format!("imagesize line needs 'x y z grid': {line:?}")));
    }
    let x: i16 = parse_token(tokens[0], "extent x", path)?;
    let y: i16 = parse_token(tokens[1], "extent y", path)?;
    let z: i16 = parse_token(tokens[2], "extent z", path)?;
    let grid = Grid::parse(tokens[3])
        .ok_or_else(|| Error::format(path, format!("unknown grid: {:?}", tokens[3])))?;
    Ok((Coordinate::new(x, y, z), grid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roi.txt");
        let roi = SeedRoi {
            grid: Grid::Nifti,
            extent: Coordinate::new(10, 10, 10),
            num_streamlines: 5000,
            coordinates: vec![Coordinate::new(1, 2, 3), Coordinate::new(4, 5, 6)],
            trackids: vec![7, 9],
        };
        roi.write(&path).unwrap();
        let back = SeedRoi::read(&path).unwrap();
        assert_eq!(back.coordinates, roi.coordinates);
        assert_eq!(back.trackids, roi.trackids);
        assert_eq!(back.num_streamlines, 5000);
        assert_eq!(back.grid, Grid::Nifti);
    }

    #[test]
    fn test_vista_identity_trackids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roi.txt");
        fs::write(
            &path,
            "#imagesize\n10 10 10 vista\n#endimagesize\n#streams\n0\n#endstreams\n#roi\n1 2 3\n4 5 6\n#endroi\n",
        )
        .unwrap();
        let roi = SeedRoi::read(&path).unwrap();
        assert_eq!(roi.trackids, vec![0, 1]);
    }

    #[test]
    fn test_nifti_requires_trackindex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roi.txt");
        fs::write(
            &path,
            "#imagesize\n10 10 10 nifti\n#endimagesize\n#streams\n0\n#endstreams\n#roi\n1 2 3\n#endroi\n",
        )
        .unwrap();
        assert!(SeedRoi::read(&path).is_err());
    }
}
