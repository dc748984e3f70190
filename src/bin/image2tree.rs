//! Rebuilds a tree as the three-level hierarchy induced by an external
//! 3-D label volume over its seed voxels.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use hclust::io::parser::{parse_token, SectionFile};
use hclust::io::tree_file::{read_tree, write_tree};
use hclust::io::volume::LabelVolume;
use hclust::matching::image::import_image_partition;
use hclust::utils::runlog::RunLog;
use hclust::{Error, Grid, Result};

/// Turn a 3-D label image into a partition tree over the same seeds.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Tree file providing the meta-leaves
    #[arg(short = 't', long = "tree")]
    tree: PathBuf,

    /// Optional base-node list to validate the tree against
    #[arg(short = 'b', long = "bases")]
    bases: Option<PathBuf>,

    /// Label volume file
    #[arg(short = 'i', long = "image")]
    image: PathBuf,

    /// Output folder
    #[arg(short = 'O', long = "output")]
    output: PathBuf,

    /// Write the output tree in the vista coordinate frame (default nifti)
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

    let mut runlog = match RunLog::create(&cli.output, "image2tree") {
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
    let out_grid = if cli.vista { Grid::Vista } else { Grid::Nifti };

    runlog.param("Tree file", cli.tree.display())?;
    runlog.param("Image file", cli.image.display())?;
    runlog.param("Output folder", cli.output.display())?;

    runlog.stage("load inputs")?;
    let tree = read_tree(&cli.tree)?;
    let volume = LabelVolume::read(&cli.image)?;
    runlog.line(&tree.report(false))?;
    runlog.param("Labelled voxels", volume.num_nonzero())?;

    if let Some(bases_path) = &cli.bases {
        let file = SectionFile::read(bases_path)?;
        let expected = file
            .required("bases")?
            .iter()
            .map(|line| parse_token(line, "base node id", bases_path))
            .collect::<Result<Vec<usize>>>()?;
        if expected != tree.root_base_nodes() {
            return Err(Error::DimensionMismatch(
                "base-node file does not match the tree's meta-leaves".to_string(),
            ));
        }
    }

    runlog.stage("import partition")?;
    let rebuilt = import_image_partition(&tree, &volume)?;
    runlog.param("Meta-leaves", tree.root_base_nodes().len())?;
    runlog.param("Label clusters", rebuilt.root().children().len())?;

    runlog.stage("write tree")?;
    let name = format!("{}.txt", rebuilt.name());
    write_tree(&rebuilt, &cli.output.join(name), out_grid)?;
    Ok(())
}
