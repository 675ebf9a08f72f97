//! Symbol Delta Ledger CLI
//!
//! # Usage
//!
//! ```bash
//! # environment checks
//! sdl doctor
//!
//! # index one repo, then keep watching it
//! sdl index --repo-id my-repo --watch
//!
//! # serve the stdio transport
//! sdl serve --stdio
//!
//! # move a ledger between machines
//! sdl export --repo-id my-repo --output my-repo.sdl.json
//! sdl import --input my-repo.sdl.json
//! ```
//!
//! Exit codes: 0 success, 1 config/usage error, 2 environment check
//! failed, 3 store error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use sdl_core::SdlConfig;
use sdl_service::{doctor, serve, ServiceError};
use sdl_service::service::SdlService;

#[derive(Parser)]
#[command(name = "sdl")]
#[command(about = "Symbol Delta Ledger - incremental code index and context assembly", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (falls back to $SDL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Destination path
        #[arg(short, long, default_value = "sdl.yaml")]
        output: PathBuf,
    },

    /// Run environment checks
    Doctor,

    /// Print version information
    Version,

    /// Index configured repos (or one, with --repo-id)
    Index {
        /// Only this repository
        #[arg(long)]
        repo_id: Option<String>,

        /// Force a full re-extraction
        #[arg(long)]
        full: bool,

        /// Keep watching for changes after the pass
        #[arg(long)]
        watch: bool,
    },

    /// Start the request transport
    Serve {
        /// Serve over stdio (the default)
        #[arg(long)]
        stdio: bool,

        /// Serve over HTTP (not built in this distribution)
        #[arg(long)]
        http: bool,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "7421")]
        port: u16,
    },

    /// Export one repo's ledger as a sync artifact
    Export {
        #[arg(long)]
        repo_id: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a sync artifact, replacing that repo's ledger
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Import an artifact, then run an incremental pass on top
    Pull {
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, ServiceError> {
    match cli.command {
        Commands::Init { output } => {
            if output.exists() {
                return Err(ServiceError::InvalidQuery(format!(
                    "{} already exists",
                    output.display()
                )));
            }
            std::fs::write(&output, STARTER_CONFIG)?;
            println!("wrote {}", output.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Doctor => {
            let config = load_config(cli.config.as_deref())?;
            let report = doctor::run(&config);
            for check in &report.checks {
                let mark = if check.ok { "ok  " } else { "FAIL" };
                println!("{mark} {:<16} {}", check.name, check.detail);
            }
            if report.ok {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }

        Commands::Version => {
            println!("sdl {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Index {
            repo_id,
            full,
            watch,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let service = SdlService::new(config)?;
            let repos: Vec<String> = match repo_id {
                Some(id) => vec![id],
                None => service
                    .config()
                    .repos
                    .iter()
                    .map(|r| r.repo_id.clone())
                    .collect(),
            };
            if repos.is_empty() {
                return Err(ServiceError::InvalidQuery(
                    "no repos configured; pass --repo-id or add repos to the config".into(),
                ));
            }

            for repo in &repos {
                let outcome = service.index_refresh(repo, full, Some("cli".into()))?;
                match outcome.version_id {
                    Some(version) => println!(
                        "{repo}: version {version} ({} files changed, {} symbols upserted)",
                        outcome.stats.files_changed, outcome.stats.symbols_upserted
                    ),
                    None => println!("{repo}: up to date"),
                }
            }

            if watch {
                for repo in &repos {
                    service.watch_start(repo)?;
                }
                println!("watching {} repo(s); ctrl-c to stop", repos.len());
                loop {
                    std::thread::sleep(std::time::Duration::from_secs(3600));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve {
            stdio,
            http,
            host,
            port,
        } => {
            if http {
                return Err(ServiceError::InvalidQuery(format!(
                    "http transport is not built into this distribution ({host}:{port}); use --stdio"
                )));
            }
            let _ = stdio; // stdio is the default transport
            let config = load_config(cli.config.as_deref())?;
            let service = SdlService::new(config)?;
            serve::run_stdio(&service)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Export { repo_id, output } => {
            let config = load_config(cli.config.as_deref())?;
            let service = SdlService::new(config)?;
            let artifact = service.export_repo(&repo_id)?;
            std::fs::write(&output, serde_json::to_vec_pretty(&artifact)?)?;
            println!(
                "exported {repo_id} ({} versions, {} symbols) to {}",
                artifact.versions.len(),
                artifact.symbols.len(),
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Import { input } => {
            let config = load_config(cli.config.as_deref())?;
            let service = SdlService::new(config)?;
            let artifact = read_artifact(&input)?;
            let repo_id = artifact.repo.repo_id.clone();
            service.import_artifact(&artifact)?;
            println!("imported {repo_id} from {}", input.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Pull { input } => {
            let config = load_config(cli.config.as_deref())?;
            let service = SdlService::new(config)?;
            let artifact = read_artifact(&input)?;
            let repo_id = artifact.repo.repo_id.clone();
            service.import_artifact(&artifact)?;
            let outcome = service.index_refresh(&repo_id, false, Some("pull".into()))?;
            match outcome.version_id {
                Some(version) => println!("{repo_id}: pulled and advanced to version {version}"),
                None => println!("{repo_id}: pulled, already current"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<SdlConfig, ServiceError> {
    Ok(SdlConfig::load(path)?)
}

fn read_artifact(path: &std::path::Path) -> Result<sdl_service::artifact::LedgerArtifact, ServiceError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

const STARTER_CONFIG: &str = r#"# Symbol Delta Ledger configuration
db_path: sdl-ledger.db

repos: []
#  - repo_id: my-repo
#    root_path: /absolute/path/to/repo
#    languages: [typescript, python]
#    ignore: ["**/node_modules/**", "**/dist/**"]

indexing:
  enable_file_watching: false
  debounce_ms: 500
  max_workers: 0   # 0 = min(cpu, 8)

cache:
  max_entries: 1024
  max_size_bytes: 67108864

policy:
  max_window_lines: 180
  max_window_tokens: 1400
  require_identifiers: true
  allow_break_glass: false
  default_deny_raw: true
  slice_max_cards: 60
  slice_max_tokens: 12000
"#;
