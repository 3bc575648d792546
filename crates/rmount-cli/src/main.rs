use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rmount_config::RmountConfig;
use rmount_remote::Session;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "rmount", version, about = "Mount remote storage with write-back file handles")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file through a write-back handle
    Put {
        /// Local file to read
        local: PathBuf,
        /// Remote destination path
        remote: String,
        /// Keep the existing remote content and write after it
        #[arg(short, long)]
        append: bool,
        /// Permission bits for the remote file (octal)
        #[arg(short, long, default_value = "644")]
        mode: String,
    },
    /// Display remote file contents
    Cat {
        /// Remote path
        path: String,
    },
    /// Show remote file or directory metadata
    Stat {
        /// Remote path
        path: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show remote capacity and usage
    Df,
    /// Show effective configuration
    Config,
    /// Mount the remote at a local directory
    Mount {
        /// Mount point path
        mountpoint: PathBuf,
        /// Stay in the foreground
        #[arg(short, long)]
        foreground: bool,
    },
}

fn find_config() -> Option<PathBuf> {
    // 1. RMOUNT_CONFIG environment variable
    if let Ok(path) = std::env::var("RMOUNT_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. rmount.yaml in current directory
    let cwd_config = PathBuf::from("rmount.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/rmount/config.yaml
    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/rmount/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.or_else(find_config).ok_or(
        "No configuration file found. Use --config, set RMOUNT_CONFIG, or create rmount.yaml",
    )?;
    let config = RmountConfig::from_file(&config_path)?;

    match cli.command {
        Commands::Put {
            local,
            remote,
            append,
            mode,
        } => {
            let mode = commands::put::parse_mode(&mode)?;
            let session = Session::from_config(&config)?;
            commands::put::run(&session, &local, &remote, mode, append).await?;
        }
        Commands::Cat { path } => {
            let session = Session::from_config(&config)?;
            commands::cat::run(&session, &path).await?;
        }
        Commands::Stat { path, json } => {
            let session = Session::from_config(&config)?;
            commands::stat::run(&session, &path, json).await?;
        }
        Commands::Df => {
            let session = Session::from_config(&config)?;
            commands::df::run(&session).await?;
        }
        Commands::Config => {
            commands::config::run(&config)?;
        }
        Commands::Mount {
            mountpoint,
            foreground,
        } => {
            let args = commands::mount::MountArgs {
                mountpoint,
                foreground,
            };
            // The FUSE session drives its own runtime and cannot be entered from this one.
            let worker = std::thread::spawn(move || {
                commands::mount::run(config, args).map_err(|e| e.to_string())
            });
            worker.join().map_err(|_| "mount thread panicked")??;
        }
    }

    Ok(())
}
