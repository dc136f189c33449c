use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use fec_etl::app::fetch_use_case::FetchUseCase;
use fec_etl::config::{EtlConfig, DEFAULT_CONFIG_PATH};
use fec_etl::infra::http_client::ReqwestHttp;
use fec_etl::{logging, metrics, run_pipeline, CancelFlag, RunStatus};

#[derive(Parser)]
#[command(name = "fec_etl")]
#[command(about = "Campaign-finance ETL: FEC bulk files to a star schema with inequality statistics")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the output tables
    Run {
        /// Override the configured output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Override the configured election cycle
        #[arg(long)]
        cycle: Option<u16>,
        /// Do not back up existing output files
        #[arg(long)]
        no_backup: bool,
    },
    /// Download the configured sources' bulk archives
    Fetch {
        #[arg(long)]
        cycle: Option<u16>,
        /// Re-download files that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Validate the configuration and thresholds without reading any input
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(EtlConfig, PathBuf, bool)> {
    let explicit = path.is_some();
    let path = path.cloned().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let from_file = path.exists();
    let mut config = if from_file {
        EtlConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else if explicit {
        anyhow::bail!("config file {} does not exist", path.display());
    } else {
        EtlConfig::default()
    };
    config.apply_env_overrides()?;
    Ok((config, path, from_file))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (mut config, config_path, from_file) = load_config(cli.config.as_ref())?;

    // Initialize logging; the guard flushes the file writer on drop
    let guard = logging::init_logging(&config.run.log_dir);
    metrics::init_metrics();
    if !from_file {
        warn!("No {} found, using defaults", config_path.display());
    }

    let code = match cli.command {
        Commands::Run { output_dir, cycle, no_backup } => {
            if let Some(dir) = output_dir {
                config.run.output_dir = dir;
            }
            if let Some(cycle) = cycle {
                config.run.cycle = cycle;
            }
            if no_backup {
                config.run.backup = false;
            }

            println!("🚀 Running pipeline for cycle {}...", config.run.cycle);
            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            let result = run_pipeline(&config, cancel).await;
            result.print_summary();
            match result.status {
                RunStatus::Succeeded => 0,
                RunStatus::Failed => 1,
                RunStatus::Cancelled => 130,
            }
        }
        Commands::Fetch { cycle, overwrite } => {
            let cycle = cycle.unwrap_or(config.run.cycle);
            println!("📥 Fetching {} sources for cycle {}...", config.sources.len(), cycle);
            let use_case = FetchUseCase::new(Box::new(ReqwestHttp::new()?), cycle, overwrite);
            match use_case.fetch_all(&config.sources).await {
                Ok(files) => {
                    for file in &files {
                        if file.skipped {
                            println!("   ⏭️  {} already at {}", file.file_type, file.path.display());
                        } else {
                            println!("   ✅ {} → {} ({} bytes)", file.file_type, file.path.display(), file.bytes);
                        }
                    }
                    0
                }
                Err(e) => {
                    error!("Fetch failed: {}", e);
                    println!("❌ Fetch failed: {}", e);
                    1
                }
            }
        }
        Commands::CheckConfig => match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                println!("✅ Configuration is valid");
                println!("   Cycle: {}", config.run.cycle);
                println!("   Output: {}", config.run.output_dir.display());
                for source in &config.sources {
                    println!("   {:<26} {}", source.file_type.as_str(), source.path.display());
                }
                0
            }
            Err(e) => {
                println!("❌ {}: {}", e.kind(), e);
                1
            }
        },
    };

    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
