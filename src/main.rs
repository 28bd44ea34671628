use clap::{Parser, Subcommand};
use gnatsgo::cog::{CloudTiff, CloudTiffError};
use gnatsgo::config::Config;
use gnatsgo::pipeline::derived::{self, DerivedInputs};
use gnatsgo::pipeline::{self, tiling, CancellationToken, PipelineError, RunReport};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gnatsgo")]
#[command(about = "Tile gNATSGO map unit key rasters into COGs and derive soil property layers")]
struct Args {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "gnatsgo.yaml")]
    config: PathBuf,

    /// Worker threads (overrides execution.threads)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mosaic region rasters into map unit key tiles
    Tile,
    /// Derive property rasters from existing key tiles
    Derive {
        /// mukey_{tile}.tif files; scans the output directory when empty
        files: Vec<PathBuf>,
    },
    /// Tile, then derive
    Run,
    /// Print the header summary of a GeoTIFF as JSON
    Info { file: PathBuf },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match execute(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

fn execute(args: Args) -> Result<u8, PipelineError> {
    if let Command::Info { file } = &args.command {
        let cog = File::open(file)
            .map_err(CloudTiffError::from)
            .and_then(|mut f| CloudTiff::open(&mut f))
            .map_err(|source| PipelineError::Region {
                id: file.display().to_string(),
                source,
            })?;
        println!("{}", serde_json::to_string_pretty(&cog.info())?);
        return Ok(0);
    }

    let mut config = Config::open(&args.config)?;
    if args.threads.is_some() {
        config.execution.threads = args.threads;
        config.validate()?;
    }
    let token = CancellationToken::new();
    let t0 = Instant::now();

    let report = match args.command {
        Command::Tile => RunReport::new(tiling::run(&config, &token)?, vec![]),
        Command::Derive { files } => {
            let settings = config.derived()?;
            let inputs = if files.is_empty() {
                DerivedInputs::Scan(config.output_dir.clone())
            } else {
                DerivedInputs::Files(files)
            };
            RunReport::new(vec![], derived::run(&config, settings, inputs, &token)?)
        }
        Command::Run => pipeline::run(&config, &token)?,
        Command::Info { .. } => return Ok(0),
    };

    let path = report.write(&config.output_dir)?;
    info!("report written to {}", path.display());
    println!("{report} in {:.1}s", t0.elapsed().as_secs_f64());
    Ok(report.exit_code() as u8)
}
