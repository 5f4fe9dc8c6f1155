//! blobfs -- command-line client for a versioned blob container.
//!
//! Connection details come from the YAML configuration file; the
//! `AZURE_STORAGE_CONNECTION_STRING` environment variable overrides the
//! configured connection string.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use blobfs::config::{load_config, Config, LoggingConfig};
use blobfs::{BlobPath, FileSystem, VersionId};

/// Command-line arguments for blobfs.
#[derive(Parser, Debug)]
#[command(
    name = "blobfs",
    version,
    about = "File-system style client for Azure Blob Storage with version history"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "blobfs.yaml")]
    config: PathBuf,

    /// Override the configured container.
    #[arg(long)]
    container: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file.
    Put {
        path: String,
        file: PathBuf,
        /// Content type to store with the blob.
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download a blob to stdout or a file.
    Get {
        path: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete a blob (its history is kept).
    Rm { path: String },
    /// List blobs under a prefix.
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Server-side copy.
    Cp { src: String, dst: String },
    /// Copy then delete the source.
    Mv { src: String, dst: String },
    /// Show properties and metadata.
    Stat { path: String },
    /// List the version history of a blob.
    Versions { path: String },
    /// Download one version of a blob.
    GetVersion {
        path: String,
        version: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Make an older version live again.
    Restore { path: String, version: String },
    /// Delete one historical version.
    RmVersion { path: String, version: String },
    /// Delete every historical version of a blob.
    PurgeVersions { path: String },
    /// Create the configured container.
    Mkcontainer,
    /// Delete the configured container.
    Rmcontainer,
}

/// Initialize tracing with `RUST_LOG` taking precedence over the config.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn write_output(out: Option<PathBuf>, content: &[u8]) -> anyhow::Result<()> {
    match out {
        Some(file) => tokio::fs::write(&file, content)
            .await
            .with_context(|| format!("failed to write {}", file.display())),
        None => {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(content).await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        load_config(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))?
    } else {
        Config::default()
    };
    if let Some(container) = cli.container {
        config.storage.container = container;
    }

    init_tracing(&config.logging);
    blobfs::metrics::describe_metrics();
    info!("Using container {}", config.storage.container);

    let fs = FileSystem::connect(&config.storage)?;

    match cli.command {
        Command::Put {
            path,
            file,
            content_type,
        } => {
            let path = BlobPath::parse(path)?;
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            match content_type {
                Some(ct) => fs.write_with_content_type(&path, content, &ct).await?,
                None => fs.write(&path, content).await?,
            }
            println!("{}", fs.get_url(&path));
        }
        Command::Get { path, out } => {
            let content = fs.get(&BlobPath::parse(path)?).await?;
            write_output(out, &content).await?;
        }
        Command::Rm { path } => fs.delete(&BlobPath::parse(path)?).await?,
        Command::Ls { prefix } => print_json(&fs.list(&prefix).await?)?,
        Command::Cp { src, dst } => {
            fs.copy(&BlobPath::parse(src)?, &BlobPath::parse(dst)?)
                .await?
        }
        Command::Mv { src, dst } => {
            fs.move_blob(&BlobPath::parse(src)?, &BlobPath::parse(dst)?)
                .await?
        }
        Command::Stat { path } => print_json(&fs.properties(&BlobPath::parse(path)?).await?)?,
        Command::Versions { path } => {
            print_json(&fs.list_versions(&BlobPath::parse(path)?).await?)?
        }
        Command::GetVersion { path, version, out } => {
            let version: VersionId = version.parse()?;
            let content = fs.get_version(&BlobPath::parse(path)?, version).await?;
            write_output(out, &content).await?;
        }
        Command::Restore { path, version } => {
            fs.restore_version(&BlobPath::parse(path)?, version.parse()?)
                .await?
        }
        Command::RmVersion { path, version } => {
            fs.delete_version(&BlobPath::parse(path)?, version.parse()?)
                .await?
        }
        Command::PurgeVersions { path } => {
            let removed = fs.purge_versions(&BlobPath::parse(path)?).await?;
            println!("{removed}");
        }
        Command::Mkcontainer => {
            if !fs.create_container().await? {
                println!("container {} already exists", fs.container());
            }
        }
        Command::Rmcontainer => fs.delete_container().await?,
    }

    Ok(())
}
