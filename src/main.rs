use anyhow::Context;
use clap::{Parser, Subcommand};
use larkdrive::{ConcurrencyPolicy, UploadConfig, Uploader};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Upload files to a Feishu/Lark drive folder.
#[derive(Parser, Debug)]
#[command(name = "larkdrive", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a local file and print its file token
    Upload {
        file: PathBuf,

        /// Token of the destination folder (or document for media uploads)
        #[arg(long)]
        parent: String,

        /// Send one block at a time instead of in parallel
        #[arg(long)]
        sequential: bool,

        /// Use the block protocol even for small files
        #[arg(long)]
        chunked: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = UploadConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload {
            file,
            parent,
            sequential,
            chunked,
        } => {
            let mut uploader = Uploader::from_config(&config)?;
            if sequential {
                uploader = uploader.with_policy(ConcurrencyPolicy::Sequential);
            }
            tracing::info!(
                file = %file.display(),
                policy = ?uploader.policy(),
                "starting upload"
            );
            let token = uploader
                .upload_path(&file, &parent, chunked)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            println!("{token}");
        }
        Commands::Config => {
            print!("{}", config.to_redacted_toml()?);
        }
    }

    Ok(())
}
