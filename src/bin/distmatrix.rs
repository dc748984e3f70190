//! Computes the blocked dissimilarity matrix between the compact
//! tractograms of a seed ROI.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use hclust::distance::DistMatComputer;
use hclust::io::roi::SeedRoi;
use hclust::utils::runlog::RunLog;
use hclust::{Error, Grid, Result};

/// Compute the pairwise tractogram dissimilarity matrix in blocks.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Seed ROI file (coordinates, streamline count, tract ids)
    #[arg(short = 'r', long = "roi")]
    roi: PathBuf,

    /// Folder holding the compact tractograms
    #[arg(short = 'I', long = "input")]
    input: PathBuf,

    /// Output folder for the distance blocks
    #[arg(short = 'O', long = "output")]
    output: PathBuf,

    /// Relative noise threshold for the tracts
    #[arg(short = 't', long, default_value_t = 0.0)]
    threshold: f32,

    /// Block size in seeds per row; 0 picks the largest that fits
    #[arg(short = 'b', long, default_value_t = hclust::constants::DEFAULT_BLOCK_SIZE)]
    blocksize: usize,

    /// First block to compute (row column), for resuming a killed run
    #[arg(long, num_args = 2, value_names = ["ROW", "COL"])]
    start: Option<Vec<usize>>,

    /// Last block to compute (row column)
    #[arg(long, num_args = 2, value_names = ["ROW", "COL"])]
    finish: Option<Vec<usize>>,

    /// Memory budget in GiB
    #[arg(short = 'm', long, default_value_t = 0.5)]
    memory: f64,

    /// Gzip the block files
    #[arg(short = 'z', long)]
    zip: bool,

    /// Tracts are stored in natural units (skip log10 renormalisation)
    #[arg(long)]
    nolog: bool,

    /// Number of worker threads; 0 uses every core
    #[arg(short = 'p', long, default_value_t = 0)]
    threads: usize,

    /// Work in the vista coordinate frame (default nifti)
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

    let mut runlog = match RunLog::create(&cli.output, "distmatrix") {
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
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .map_err(|e| Error::Config(format!("thread pool: {e}")))?;
    }
    if !(0.0..1.0).contains(&cli.threshold) {
        return Err(Error::Config(format!("threshold {} outside [0, 1)", cli.threshold)));
    }

    runlog.param("Roi file", cli.roi.display())?;
    runlog.param("Input folder", cli.input.display())?;
    runlog.param("Output folder", cli.output.display())?;
    runlog.param("Relative threshold", cli.threshold)?;
    runlog.param("Available memory", format!("{} GiB", cli.memory))?;
    runlog.param("Zipped blocks", cli.zip)?;

    runlog.stage("load roi")?;
    let mut roi = SeedRoi::read(&cli.roi)?;
    let work_grid = if cli.vista { Grid::Vista } else { Grid::Nifti };
    if roi.grid != work_grid {
        for coord in roi.coordinates.iter_mut() {
            *coord = coord.to_grid(roi.grid, work_grid, roi.extent);
        }
        roi.grid = work_grid;
    }
    log::info!("roi loaded, {} seed voxels", roi.num_seeds());
    runlog.param("Seed voxels", roi.num_seeds())?;

    runlog.stage("configure")?;
    let mut engine = DistMatComputer::new(&roi, &cli.input, &cli.output, cli.threshold, cli.nolog);
    engine.set_zip(cli.zip);
    if let Some(start) = &cli.start {
        engine.set_start_block(start[0], start[1]);
    }
    if let Some(finish) = &cli.finish {
        engine.set_finish_block(finish[0], finish[1]);
    }
    engine.configure(cli.memory, cli.blocksize)?;
    runlog.param("Block size", engine.block_size())?;
    runlog.param("Blocks per row", engine.blocks_per_row())?;
    runlog.param("Sub-block size", engine.sub_block_size())?;

    runlog.stage("distance blocks")?;
    let (min_seen, max_seen) = engine.run()?;
    runlog.param("Minimum distance", min_seen)?;
    runlog.param("Maximum distance", max_seen)?;
    Ok(())
}
