use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imagestore::{models::Config, storage, ImageUpload};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "imagestore")]
#[command(about = "Store uploaded images and serve them back")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a copy of FILE and print its public URL.
    Save {
        file: PathBuf,
        /// Name to store the image under (defaults to FILE's name).
        #[arg(long)]
        name: Option<String>,
    },
    /// Report whether PATH exists in storage.
    Exists { path: PathBuf },
    /// Serve stored images over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:2368")]
        addr: SocketAddr,
    },
    /// Print the resolved configuration as JSON.
    Config,
}

/// The store consumes its upload, so work on a throwaway copy.
fn stage_upload(file: &Path) -> Result<PathBuf> {
    let staged = tempfile::NamedTempFile::new()?.into_temp_path();
    std::fs::copy(file, &staged)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(staged.keep()?)
}

fn default_name(file: &Path) -> Result<String> {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagestore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let config = Config::from_env()?;

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Save { file, name } => {
            let name = match name {
                Some(name) => name,
                None => default_name(&file)?,
            };
            let staged = stage_upload(&file)?;

            let storage = storage::from_config(&config).await?;
            let url = storage.save(ImageUpload::new(staged, name)).await?;
            println!("{}", url);
        }
        Command::Exists { path } => {
            let storage = storage::from_config(&config).await?;
            let exists = storage.exists(&path).await;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        Command::Serve { addr } => {
            let storage = storage::from_config(&config).await?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;

            info!("Serving images on http://{}", addr);
            axum::serve(listener, storage.serve()).await?;
        }
    }

    Ok(())
}
