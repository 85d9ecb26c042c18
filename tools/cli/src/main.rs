//! driveup CLI - Upload local files and folders to Google Drive.
//!
//! Wraps the transfer engine with credential handling, Ctrl-C
//! cancellation and a small local directory listing helper.

mod listing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use driveup_common::CancellationGate;
use driveup_storage::gdrive::{default_state_dir, CredentialStore, OAuthAuthorizer};
use driveup_transfer::{upload, CredentialMode, Layout, LogProgress, Settings, UploadOptions};

#[derive(Parser)]
#[command(name = "driveup")]
#[command(about = "driveup - Upload files and folders to Google Drive")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the token, client config and settings.
    #[arg(long, env = "DRIVEUP_HOME", global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    /// One zip archive of the directory.
    Archive,
    /// Mirror subdirectories as remote folders.
    Tree,
    /// Top-level files only.
    Flat,
}

impl From<LayoutArg> for Layout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Archive => Layout::SingleArchive,
            LayoutArg::Tree => Layout::MirroredTree,
            LayoutArg::Flat => Layout::FlatFiles,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file or directory.
    Upload {
        /// Local file or directory (optional when --params names a source).
        source: Option<PathBuf>,

        /// Remote folder id to upload into (default: drive root).
        #[arg(short, long)]
        parent: Option<String>,

        /// Grant this address write access to every uploaded item.
        #[arg(short, long)]
        share: Option<String>,

        /// How a directory is laid out remotely.
        #[arg(short, long, value_enum)]
        layout: Option<LayoutArg>,

        /// Authenticate with a service-account key instead of OAuth.
        #[arg(long)]
        service_account: bool,

        /// OAuth client config or service-account key file.
        #[arg(short, long)]
        credentials: Option<PathBuf>,

        /// Upload directory contents straight into the parent.
        #[arg(long)]
        no_parent_folder: bool,

        /// JSON file with upload options; flags override its fields.
        #[arg(long)]
        params: Option<PathBuf>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List a local directory.
    Ls {
        /// Directory to list.
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Include hidden entries.
        #[arg(short, long)]
        all: bool,

        /// Show type, size and modification time.
        #[arg(short, long)]
        long: bool,
    },

    /// Obtain and save an OAuth token.
    Auth {
        /// OAuth client config file.
        #[arg(short, long)]
        credentials: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => default_state_dir().context("Cannot locate the state directory")?,
    };

    match cli.command {
        Commands::Upload {
            source,
            parent,
            share,
            layout,
            service_account,
            credentials,
            no_parent_folder,
            params,
            json,
        } => {
            let mut options = match params {
                Some(file) => read_params(&file)?,
                None => UploadOptions::new(PathBuf::new()),
            };
            if let Some(source) = source {
                options.source = source;
            }
            if options.source.as_os_str().is_empty() {
                anyhow::bail!("No source given; pass a path or a --params file with a source");
            }
            if let Some(parent) = parent {
                options = options.with_parent(parent);
            }
            if let Some(share) = share {
                options = options.with_share_email(share);
            }
            if let Some(layout) = layout {
                options = options.with_layout(layout.into());
            }
            if service_account {
                options = options.with_credential_mode(CredentialMode::ServiceAccount);
            }
            if let Some(file) = credentials {
                options = options.with_credentials(read_credentials(&file)?);
            }
            if no_parent_folder {
                options = options.with_create_parent_folder(false);
            }

            cmd_upload(&state_dir, options, json).await
        }
        Commands::Ls { dir, all, long } => cmd_ls(&dir, all, long),
        Commands::Auth { credentials } => cmd_auth(&state_dir, credentials).await,
    }
}

fn read_params(path: &Path) -> Result<UploadOptions> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read params file {}", path.display()))?;
    UploadOptions::from_json(&json).context("Invalid params file")
}

fn read_credentials(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read credentials file {}", path.display()))
}

fn credential_store(state_dir: &Path) -> Result<Arc<CredentialStore>> {
    let authorizer = OAuthAuthorizer::new().context("Failed to create OAuth client")?;
    Ok(Arc::new(CredentialStore::new(state_dir, Arc::new(authorizer))))
}

async fn cmd_upload(state_dir: &Path, options: UploadOptions, json: bool) -> Result<ExitCode> {
    let store = credential_store(state_dir)?;
    let settings = Settings::load(state_dir);

    let gate = CancellationGate::new();
    let interrupt = gate.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next checkpoint");
            interrupt.trip();
        }
    });

    let summary = upload(&options, store, settings, &gate, Arc::new(LogProgress)).await;

    if json {
        let output = serde_json::json!({
            "message": summary.message(),
            "status": summary.status(),
            "urls": summary.urls(),
            "results": summary.results(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", summary.message());
        for url in summary.urls() {
            println!("  {}", url);
        }
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_ls(dir: &Path, all: bool, long: bool) -> Result<ExitCode> {
    for line in listing::list_directory(dir, all, long)? {
        println!("{}", line);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_auth(state_dir: &Path, credentials: Option<PathBuf>) -> Result<ExitCode> {
    let payload = match credentials {
        Some(file) => Some(read_credentials(&file)?),
        None => None,
    };

    let store = credential_store(state_dir)?;
    info!("Using state directory {}", store.dir().display());

    let credential = store
        .acquire(payload.as_deref())
        .await
        .context("Failed to obtain a token")?;

    println!("Token saved to {}", store.token_path().display());
    println!("  Expires: {}", credential.expires_at);
    Ok(ExitCode::SUCCESS)
}
