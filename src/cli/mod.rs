use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::secret::DEFAULT_KEY_FILE;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Config file, created with default values if missing.
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Key sealing the secrets of the config file, generated if missing.
    #[arg(long, default_value = DEFAULT_KEY_FILE)]
    pub key_file: PathBuf,

    /// Append the log output to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Default switch username, overrides the config file.
    #[arg(long, env = "CX_BACKUP_USERNAME")]
    pub username: Option<String>,

    /// Default switch password, overrides the config file.
    #[arg(long, env = "CX_BACKUP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Backup all switches of the inventory once. (Default)
    #[default]
    Backup,
    /// Run scheduled backups and accept `run`, `status` and `quit` on stdin.
    Serve,
    /// Print the status of the last backup of every switch.
    Status,
}
