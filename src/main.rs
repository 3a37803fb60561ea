use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "sideloader")]
#[command(version, about = "Release gating for deployment streams")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory holding .sideloader/ (defaults to the current directory)
    #[arg(long, global = true, env = "SIDELOADER_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .sideloader/sideloader.toml and the release database
    Init,
    /// Serve sign-off links and the release API, and run the deploy worker
    Serve {
        /// Address to bind (overrides sideloader.toml)
        #[arg(long)]
        host: Option<String>,
        /// Port to serve on (overrides sideloader.toml)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage release streams
    Stream {
        #[command(subcommand)]
        command: StreamCommands,
    },
    /// Show the state of one release
    Status { release_id: i64 },
    /// List the most recent releases on a stream
    Releases {
        stream_id: i64,
        #[arg(short, long, default_value = "5")]
        limit: i64,
    },
}

#[derive(Subcommand, Clone)]
pub enum StreamCommands {
    /// Create a stream
    Add {
        #[arg(long)]
        name: String,
        /// Releases must be signed off before they deploy
        #[arg(long)]
        require_signoff: bool,
        /// Addresses asked to sign, separated by commas, spaces or newlines
        #[arg(long, default_value = "")]
        signoff_list: String,
        /// Signatures required; 0 means everyone on the list
        #[arg(long, default_value = "0")]
        quorum: i64,
    },
    /// Change a stream's name or sign-off policy
    Edit {
        stream_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        require_signoff: Option<bool>,
        #[arg(long)]
        signoff_list: Option<String>,
        #[arg(long)]
        quorum: Option<i64>,
    },
    /// Delete a stream and all of its releases
    #[command(name = "rm")]
    Remove { stream_id: i64 },
    /// List all streams
    List,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "sideloader=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Serve { host, port } => {
            cmd::cmd_serve(&project_dir, host.clone(), *port).await?;
        }
        Commands::Stream { command } => cmd::cmd_stream(&project_dir, command.clone())?,
        Commands::Status { release_id } => cmd::cmd_status(&project_dir, *release_id)?,
        Commands::Releases { stream_id, limit } => {
            cmd::cmd_releases(&project_dir, *stream_id, *limit)?
        }
    }

    Ok(())
}
