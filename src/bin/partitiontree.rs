//! Extracts Spread-Separation-optimal (or horizontal) partitions at every
//! granularity of a hierarchical tree, optionally filtered to local
//! quality maxima.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use hclust::io::tree_file::{read_tree, write_tree};
use hclust::partition::{to_inner_ids, TreePartitioner};
use hclust::utils::runlog::RunLog;
use hclust::{Error, Grid, NodeId, Result};

/// Scan a hierarchical tree for quality-optimal partitions.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Tree file to partition
    #[arg(short = 't', long = "tree")]
    tree: PathBuf,

    /// Output folder
    #[arg(short = 'O', long = "output")]
    output: PathBuf,

    /// Branching search depth
    #[arg(short = 'd', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=5))]
    depth: u8,

    /// Keep only local quality maxima within this granularity radius
    #[arg(short = 'r', long = "filter-radius", default_value_t = 0)]
    filter_radius: usize,

    /// Record horizontal cuts instead of the SS-optimal partitions
    #[arg(long)]
    hoz: bool,

    /// Only compute the maximum granularity (meta-leaf) partition
    #[arg(short = 'm', long)]
    maxgran: bool,

    /// Number of worker threads; 0 uses every core
    #[arg(short = 'p', long, default_value_t = 0)]
    threads: usize,

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

    let mut runlog = match RunLog::create(&cli.output, "partitiontree") {
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
    let filter_radius = if cli.filter_radius > 1000 {
        log::warn!("filter radius {} too large, using 100", cli.filter_radius);
        100
    } else {
        cli.filter_radius
    };
    let out_grid = if cli.vista { Grid::Vista } else { Grid::Nifti };

    runlog.param("Tree file", cli.tree.display())?;
    runlog.param("Output folder", cli.output.display())?;
    runlog.param("Search depth", cli.depth)?;
    runlog.param("Filter radius", filter_radius)?;

    runlog.stage("load tree")?;
    let mut tree = read_tree(&cli.tree)?;
    log::info!("{}", tree.report(true));
    runlog.line(&tree.report(false))?;

    if cli.maxgran {
        runlog.stage("max granularity partition")?;
        let partitioner = TreePartitioner::new(&tree);
        let partition = partitioner.max_granularity_partition()?;
        let as_ids: Vec<NodeId> = partition.iter().map(|&i| NodeId::inner(i)).collect();
        let value = partitioner.spread_separation(&as_ids)?;
        runlog.param("Meta-leaves", partition.len())?;

        let report = partitioner.partition_report(&[value], &[as_ids]);
        let report_path = cli.output.join("maxgranPart.txt");
        fs::write(&report_path, report).map_err(|e| Error::io(&report_path, e))?;

        let name = format!("{}_maxgranPart.txt", tree.name());
        tree.insert_partitions(vec![partition], vec![value], None)?;
        write_tree(&tree, &cli.output.join(name), out_grid)?;
        return Ok(());
    }

    runlog.stage("partition scan")?;
    let partitioner = TreePartitioner::new(&tree);
    let prefix = if cli.hoz { "Hoz" } else { "SS" };
    let recorded = if cli.hoz {
        partitioner.scan_horizontal_partitions(
            cli.depth as usize,
            true,
            hclust::constants::OPT_PART_LIMIT,
        )?
    } else {
        partitioner.scan_optimal_partitions(
            cli.depth as usize,
            true,
            hclust::constants::OPT_PART_LIMIT,
        )?
    };
    let values: Vec<f32> = recorded.iter().map(|(v, _)| *v).collect();
    let partitions: Vec<Vec<NodeId>> = recorded.into_iter().map(|(_, p)| p).collect();
    runlog.param("Scanned partitions", partitions.len())?;

    let all_report = partitioner.partition_report(&values, &partitions);
    let all_path = cli.output.join(format!("all{prefix}parts_d{}.txt", cli.depth));
    fs::write(&all_path, all_report).map_err(|e| Error::io(&all_path, e))?;

    let (kept_values, kept_partitions) = if filter_radius > 0 {
        runlog.stage("filter partitions")?;
        let (kept_values, kept_partitions, best) =
            partitioner.filter_max_partitions(filter_radius, &values, &partitions);
        runlog.param("Filtered partitions", kept_partitions.len())?;
        log::info!(
            "best partition: {} clusters at value {}",
            kept_partitions[best].len(),
            kept_values[best]
        );
        let filt_report = partitioner.partition_report(&kept_values, &kept_partitions);
        let filt_path = cli
            .output
            .join(format!("filt{prefix}parts_d{}_r{filter_radius}.txt", cli.depth));
        fs::write(&filt_path, filt_report).map_err(|e| Error::io(&filt_path, e))?;
        (kept_values, kept_partitions)
    } else {
        (values, partitions)
    };

    runlog.stage("write tree")?;
    let inner: Vec<Vec<usize>> = kept_partitions.iter().map(|p| to_inner_ids(p)).collect();
    tree.insert_partitions(inner, kept_values, None)?;
    let name = format!("{}_{prefix}parts.txt", tree.name());
    write_tree(&tree, &cli.output.join(name), out_grid)?;
    Ok(())
}
