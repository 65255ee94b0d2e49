use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use std::path::PathBuf;
use vt_core::{PhotoId, PinId};

mod cmd;
mod config;
mod init_config;

#[derive(Parser)]
#[command(version, about = "Collect Flickr photos around map pins", long_about = None)]
struct Cli {
    /// Config file to use instead of the default one
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print record changes while the command runs
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    watch: bool,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the config file
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Add, list and delete pins
    Pin {
        #[command(subcommand)]
        cmd: PinCmd,
    },
    /// Inspect and change a pin's photo collection
    Photos {
        #[command(subcommand)]
        cmd: PhotosCmd,
    },
    /// Image cache maintenance
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
}

#[derive(Subcommand)]
enum PinCmd {
    /// Drop a pin and download the photos taken around it
    Add {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
        /// Display name; defaults to the coordinates
        #[arg(short, long)]
        name: Option<String>,
        /// Return as soon as the photo records are saved
        #[arg(long, action = ArgAction::SetTrue)]
        no_wait: bool,
    },
    /// List pins with their page state and photo counts
    Ls,
    /// Delete a pin, its photos and their cached images
    Rm {
        /// Pin id or name
        pin: String,
    },
}

#[derive(Subcommand)]
enum PhotosCmd {
    /// List a pin's photos and whether their images are cached
    Ls {
        /// Pin id or name
        pin: String,
    },
    /// Replace a pin's photos with the next page of results
    Refresh {
        /// Pin id or name
        pin: String,
    },
    /// Remove selected photos from a pin
    Rm {
        /// Pin id or name
        pin: String,
        #[arg(required = true)]
        photos: Vec<PhotoId>,
    },
    /// Write a photo's image to a file, downloading it if needed
    Get {
        photo: PhotoId,
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheCmd {
    /// Delete cached images that no photo refers to
    Prune {
        /// Only print which images would be deleted
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
}

/// A pin given on the command line, by id or by name.
#[derive(Debug, Clone)]
enum PinRef {
    Id(PinId),
    Name(String),
}

impl From<String> for PinRef {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Name(s),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Config lives in ~/.config/vt/config.toml, data (records and the image
    // cache) under ~/.local/share/vt/ unless the config says otherwise.
    let dirs = ProjectDirs::from("", "", "vt").context("failed to determine config directory path")?;
    let config_file = cli
        .config
        .unwrap_or_else(|| dirs.config_dir().join("config.toml"));

    cmd::run_command(&config_file, dirs.data_dir(), cli.watch, cli.cmd).await
}
