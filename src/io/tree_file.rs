//! The tree text format: framed sections holding the dataset metadata,
//! the seed coordinates, the join structure and any saved partitions.
//!
//! Parsing rederives parent pointers, sizes and h-levels from the
//! `clusters` section, and writing is deterministic, so parse→write is a
//! byte-identical round trip for files this module produced in the same
//! coordinate frame.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::constants::LOG_FACTOR_TOLERANCE;
use crate::core::coordinate::{Color, Coordinate, Grid};
use crate::core::node::NodeId;
use crate::core::tree::{JoinList, Tree};
use crate::io::parser::{parse_token, SectionFile};
use crate::io::roi::parse_imagesize;
use crate::{Error, Result};

/// Reads a tree file. The tree name is the file stem.
pub fn read_tree(path: &Path) -> Result<Tree> {
    let file = SectionFile::read(path)?;

    let (extent, grid) = parse_imagesize(file.single_line("imagesize")?, path)?;
    let num_streamlines: usize = parse_token(file.single_line("streams")?, "streamline count", path)?;
    let log_factor: f32 = parse_token(file.single_line("logfactor")?, "log factor", path)?;

    if num_streamlines > 0 && log_factor != 0.0 {
        let expected = (num_streamlines as f64).log10();
        if (f64::from(log_factor) - expected).abs() > LOG_FACTOR_TOLERANCE {
            return Err(Error::format(
                path,
                format!("log factor {log_factor} does not match log10({num_streamlines})"),
            ));
        }
    }

    let cpcc: f32 = match file.optional_line("cpcc")? {
        Some(line) => parse_token(line, "cpcc", path)?,
        None => 0.0,
    };

    let mut coordinates = Vec::new();
    for line in file.required("coordinates")? {
        coordinates.push(Coordinate::parse_line(line, path)?);
    }

    let trackids = match file.section("trackindex")? {
        Some(lines) => {
            if lines.len() != coordinates.len() {
                return Err(Error::format(
                    path,
                    format!("{} track ids for {} coordinates", lines.len(), coordinates.len()),
                ));
            }
            lines
                .iter()
                .map(|line| parse_token(line, "track id", path))
                .collect::<Result<Vec<usize>>>()?
        }
        None if grid == Grid::Vista => (0..coordinates.len()).collect(),
        None => {
            return Err(Error::format(path, "nifti tree file is missing the #trackindex section"));
        }
    };

    let mut joins: JoinList = Vec::new();
    for line in file.required("clusters")? {
        joins.push(parse_cluster_line(line, path)?);
    }

    let mut discarded = Vec::new();
    if let Some(lines) = file.section("discarded")? {
        for line in lines {
            discarded.push(Coordinate::parse_line(line, path)?);
        }
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tree".to_string());

    let mut tree = Tree::build(
        name,
        grid,
        extent,
        num_streamlines,
        log_factor,
        cpcc,
        coordinates,
        trackids,
        discarded,
        joins,
    )?;

    read_partitions(&file, &mut tree)?;
    Ok(tree)
}

fn parse_cluster_line(line: &str, path: &Path) -> Result<(f32, Vec<NodeId>)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 || tokens.len() % 2 == 0 {
        return Err(Error::format(path, format!("bad cluster line: {line:?}")));
    }
    let dist: f32 = parse_token(tokens[0], "distance level", path)?;
    let mut children = Vec::with_capacity((tokens.len() - 1) / 2);
    for pair in tokens[1..].chunks(2) {
        let index: usize = parse_token(pair[1], "child index", path)?;
        let id = match pair[0] {
            "0" => NodeId::leaf(index),
            "1" => NodeId::inner(index),
            other => {
                return Err(Error::format(path, format!("bad child kind: {other:?}")));
            }
        };
        children.push(id);
    }
    Ok((dist, children))
}

fn read_partitions(file: &SectionFile, tree: &mut Tree) -> Result<()> {
    let path = file.path().to_path_buf();
    let values_lines = match file.section("partvalues")? {
        Some(lines) => lines,
        None => return Ok(()),
    };
    let partition_lines = file.required("partitions")?;
    if partition_lines.len() != values_lines.len() {
        return Err(Error::format(
            &path,
            format!("{} partitions for {} values", partition_lines.len(), values_lines.len()),
        ));
    }

    let values = values_lines
        .iter()
        .map(|line| parse_token(line, "partition value", &path))
        .collect::<Result<Vec<f32>>>()?;

    let mut partitions = Vec::with_capacity(partition_lines.len());
    for line in partition_lines {
        let clusters = line
            .split_whitespace()
            .map(|token| parse_token(token, "cluster id", &path))
            .collect::<Result<Vec<usize>>>()?;
        for &cluster in &clusters {
            tree.inner(cluster)?;
        }
        partitions.push(clusters);
    }

    let colors = match file.section("partcolors")? {
        Some(lines) => {
            let mut all = Vec::with_capacity(lines.len());
            for line in lines {
                let row = line
                    .split_whitespace()
                    .map(|token| Color::parse_token(token, &path))
                    .collect::<Result<Vec<Color>>>()?;
                all.push(row);
            }
            Some(all)
        }
        None => None,
    };

    tree.insert_partitions(partitions, values, colors)
}

/// Writes a tree file in the requested coordinate frame. The tree itself
/// is not modified; coordinates are converted on the way out when the
/// frames differ.
pub fn write_tree(tree: &Tree, path: &Path, output_grid: Grid) -> Result<()> {
    let convert = |c: &Coordinate| c.to_grid(tree.grid(), output_grid, tree.extent());

    let mut out = String::new();
    out.push_str("#imagesize\n");
    out.push_str(&format!("{} {}\n", tree.extent(), output_grid));
    out.push_str("#endimagesize\n\n");

    out.push_str("#streams\n");
    out.push_str(&format!("{}\n", tree.num_streamlines()));
    out.push_str("#endstreams\n\n");

    out.push_str("#logfactor\n");
    out.push_str(&format!("{}\n", tree.log_factor()));
    out.push_str("#endlogfactor\n\n");

    if tree.cpcc() != 0.0 {
        out.push_str("#cpcc\n");
        out.push_str(&format!("{}\n", tree.cpcc()));
        out.push_str("#endcpcc\n\n");
    }

    out.push_str("#coordinates\n");
    for coord in tree.coordinates() {
        out.push_str(&format!("{}\n", convert(coord)));
    }
    out.push_str("#endcoordinates\n\n");

    out.push_str("#trackindex\n");
    for id in tree.trackids() {
        out.push_str(&format!("{id}\n"));
    }
    out.push_str("#endtrackindex\n\n");

    out.push_str("#clusters\n");
    for i in 0..tree.num_nodes() {
        let node = tree.inner(i)?;
        out.push_str(&format!("{}", node.dist_level()));
        for child in node.children() {
            let kind = if child.is_inner() { 1 } else { 0 };
            out.push_str(&format!(" {kind} {}", child.index));
        }
        out.push('\n');
    }
    out.push_str("#endclusters\n");

    if tree.num_discarded() > 0 {
        out.push_str("\n#discarded\n");
        for coord in tree.discarded() {
            out.push_str(&format!("{}\n", convert(coord)));
        }
        out.push_str("#enddiscarded\n");
    }

    if !tree.selected_partitions().is_empty() {
        out.push_str("\n#partvalues\n");
        for value in tree.selected_values() {
            out.push_str(&format!("{value}\n"));
        }
        out.push_str("#endpartvalues\n\n#partitions\n");
        for partition in tree.selected_partitions() {
            let tokens: Vec<String> = partition.iter().map(|c| c.to_string()).collect();
            out.push_str(&tokens.join(" "));
            out.push('\n');
        }
        out.push_str("#endpartitions\n");

        if !tree.selected_colors().is_empty() {
            out.push_str("\n#partcolors\n");
            for row in tree.selected_colors() {
                let tokens: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                out.push_str(&tokens.join(" "));
                out.push('\n');
            }
            out.push_str("#endpartcolors\n");
        }
    }

    let mut file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(out.as_bytes()).map_err(|e| Error::io(path, e))
}
