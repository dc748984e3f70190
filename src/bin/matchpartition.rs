//! Finds the target-tree partitions matching a reference tree's saved
//! partitions across a meta-leaf correspondence, and coordinates cluster
//! colors between the two trees.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use hclust::io::tree_file::{read_tree, write_tree};
use hclust::matching::{CorrespondenceTable, PartitionMatcher};
use hclust::utils::runlog::RunLog;
use hclust::{Error, Grid, Result};

/// Match saved partitions from a reference tree onto a target tree.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Reference tree file (carries the partitions to match)
    #[arg(short = 'r', long = "reference")]
    reference: PathBuf,

    /// Target tree file
    #[arg(short = 't', long = "target")]
    target: PathBuf,

    /// Meta-leaf correspondence table
    #[arg(short = 'm', long = "match-table")]
    match_table: PathBuf,

    /// Output folder
    #[arg(short = 'O', long = "output")]
    output: PathBuf,

    /// Signature matching with this size-ratio weight
    #[arg(short = 's', long, group = "matchmode")]
    signature: Option<f32>,

    /// Bidirectional cluster-overlap matching
    #[arg(short = 'o', long, group = "matchmode")]
    overlap: bool,

    /// Only transfer colors between already saved partition pairs
    #[arg(short = 'c', long, group = "matchmode")]
    colors_only: bool,

    /// Branching search depth; 0 adapts it to each partition's size
    #[arg(short = 'd', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=5))]
    depth: u8,

    /// Unmatched clusters turn white instead of getting fresh colors
    #[arg(short = 'x', long)]
    exclusive: bool,

    /// Write output trees in the vista coordinate frame (default nifti)
    #[arg(long)]
    vista: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(if cli.verbose { log::LevelFilter::Info } else { log::LevelFilter::Warn })
        .init();

    let mut runlog = match RunLog::create(&cli.output, "matchpartition") {
        Ok(log) => log,
        Err(err) => {
            eprintln!("ERROR: {err}");
            process::exit(1);
        }
    };

    match run(&cli, &mut runlog) {
        Ok(()) => {
            if let Err(err) = runlog.finish(&cli.output) {
                eprintln!("ERROR: {err}");
                process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("ERROR: {err}");
            let _ = runlog.error(&err.to_string());
            process::exit(1);
        }
    }
}

fn run(cli: &Cli, runlog: &mut RunLog) -> Result<()> {
    if !cli.overlap && !cli.colors_only && cli.signature.is_none() {
        return Err(Error::Config(
            "pick a matching mode: --signature LAMBDA, --overlap or --colors-only".to_string(),
        ));
    }
    let out_grid = if cli.vista { Grid::Vista } else { Grid::Nifti };

    runlog.param("Reference tree", cli.reference.display())?;
    runlog.param("Target tree", cli.target.display())?;
    runlog.param("Correspondence table", cli.match_table.display())?;
    runlog.param("Exclusive coloring", cli.exclusive)?;

    runlog.stage("load inputs")?;
    let mut ref_tree = read_tree(&cli.reference)?;
    let mut target_tree = read_tree(&cli.target)?;
    let table = CorrespondenceTable::read(&cli.match_table)?;
    runlog.line(&ref_tree.report(false))?;
    runlog.line(&target_tree.report(false))?;

    let matcher = PartitionMatcher::new(&ref_tree, &target_tree, &table)?;
    runlog.param("Matched meta-leaves", matcher.num_matched())?;

    if !cli.colors_only {
        runlog.stage("find matching partitions")?;
        let lambda = match cli.signature {
            Some(lambda) if lambda >= 0.0 => lambda,
            Some(lambda) => {
                return Err(Error::Config(format!("lambda {lambda} must be non-negative")));
            }
            None => -1.0,
        };
        matcher.find_matching_partitions(&ref_tree, &mut target_tree, lambda, cli.depth as usize)?;
        runlog.param("Matched partitions", target_tree.selected_partitions().len())?;
    }

    runlog.stage("match colors")?;
    let ref_changed = matcher.match_colors(&mut ref_tree, &mut target_tree, cli.exclusive)?;
    runlog.param("Reference colors changed", ref_changed)?;

    runlog.stage("write trees")?;
    let target_name = format!("{}_matched.txt", target_tree.name());
    write_tree(&target_tree, &cli.output.join(target_name), out_grid)?;
    if ref_changed {
        let ref_name = format!("{}_recolored.txt", ref_tree.name());
        write_tree(&ref_tree, &cli.output.join(ref_name), out_grid)?;
    }
    Ok(())
}
