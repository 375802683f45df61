//! Command line definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use skyload::collector::StructureMode;
use skyload::config::UploadSettings;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Skyload - resilient file uploads to FTP, SFTP, HTTP and S3"
)]
pub struct Cli {
    /// Configuration file (default: ~/.config/skyload/skyload.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the named [profiles.<name>] backend instead of [backend]
    #[arg(short = 'P', long, global = true)]
    pub profile: Option<String>,

    /// Emit events and results as JSON lines on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Append a text log of the session to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Show every file and informational message
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload files and directories
    Upload(UploadArgs),
    /// Show what an upload would send without connecting
    Preview(CollectArgs),
    /// Connect to the backend and disconnect again
    Test,
    /// List a remote directory
    Ls {
        /// Remote directory (default: root)
        path: Option<String>,
    },
    /// Show one remote entry
    Stat { path: String },
    /// Download remote files
    Get {
        #[arg(required = true)]
        remotes: Vec<String>,
        /// Local target directory
        #[arg(long, default_value = ".")]
        to: PathBuf,
    },
    /// Delete remote files or empty directories
    Rm {
        #[arg(required = true)]
        remotes: Vec<String>,
    },
    /// Create a remote directory, parents included
    Mkdir { path: String },
}

/// Selection and filtering shared by `upload` and `preview`.
#[derive(Debug, Clone, Args)]
pub struct CollectArgs {
    /// Files and directories to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Remote base directory
    #[arg(short = 'r', long = "remote-dir")]
    pub remote_dir: Option<String>,

    /// Regex matched against each path component name (repeatable)
    #[arg(short = 'x', long = "ignore")]
    pub ignore: Vec<String>,

    /// Include dot files and dot directories
    #[arg(long)]
    pub hidden: bool,

    /// Upload the contents of directory roots rather than the roots themselves
    #[arg(long = "contents-only")]
    pub contents_only: bool,
}

#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    #[command(flatten)]
    pub collect: CollectArgs,

    /// Number of parallel connections (0 = auto)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Extra attempts per file after the first
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-connection limit in bytes per second (0 = unlimited)
    #[arg(short = 'b', long = "bandwidth-limit")]
    pub bandwidth_limit: Option<u64>,

    /// Delay before a retry, in milliseconds
    #[arg(long = "retry-delay-ms")]
    pub retry_delay_ms: Option<u64>,

    /// Double the retry delay after every failed attempt
    #[arg(long = "exponential-backoff")]
    pub exponential_backoff: bool,
}

impl CollectArgs {
    /// Layers these flags over the file settings.
    pub fn apply(&self, settings: &mut UploadSettings) {
        if let Some(dir) = &self.remote_dir {
            settings.remote_dir = dir.clone();
        }
        settings
            .ignore_patterns
            .extend(self.ignore.iter().cloned());
        if self.hidden {
            settings.include_hidden = true;
        }
        if self.contents_only {
            settings.structure = StructureMode::ContentsOnly;
        }
    }
}

impl UploadArgs {
    pub fn apply(&self, settings: &mut UploadSettings) {
        self.collect.apply(settings);
        if let Some(threads) = self.threads {
            settings.max_threads = threads;
        }
        if let Some(retries) = self.retries {
            settings.max_retries = retries;
        }
        if let Some(limit) = self.bandwidth_limit {
            settings.bandwidth_limit = limit;
        }
        if let Some(delay) = self.retry_delay_ms {
            settings.retry_delay_ms = delay;
        }
        if self.exponential_backoff {
            settings.exponential_backoff = true;
        }
    }
}
