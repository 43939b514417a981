pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "portalsync")]
#[command(about = "Sync and browse a Stalker middleware portal catalog", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/portalsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authenticate against the portal
    Login,
    /// List categories
    Categories {
        /// Live TV genres instead of VOD categories
        #[arg(long)]
        live: bool,
    },
    /// List the items of a category
    Browse {
        /// Category ID
        category: String,

        /// Maximum number of rows to print
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Index every configured category
    Index {
        /// Run even if the last index is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Search the portal and the local cache
    Search {
        query: String,
    },
    /// Show details of a movie or series
    Info {
        movie_id: String,

        /// List every episode with its playable files (series only)
        #[arg(long)]
        episodes: bool,
    },
    /// Resolve a stream command to a playable URL
    Link {
        cmd: String,

        /// Resolve as a live channel
        #[arg(long)]
        live: bool,
    },
    /// Show cache and index status
    Status,
    /// Delete the local cache and index metadata
    ClearCache,
    /// Keep the index up to date until interrupted
    Watch {
        /// Sync interval (e.g., "30m", "6h", "1d")
        #[arg(short, long, default_value = "6h")]
        interval: String,

        /// Wait for the first interval before syncing
        #[arg(long)]
        no_initial_sync: bool,
    },
}
