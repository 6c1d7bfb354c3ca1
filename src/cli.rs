use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the dirsyncd daemon.
#[derive(Parser, Debug)]
#[clap(name = "dirsyncd")]
#[clap(about = "Watch directory trees and mirror them with rsync", long_about = None)]
#[clap(version)]
pub struct Args {
    /// Path to the config file (default: ~/.config/dirsyncd/config.json)
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log file path (overrides the config file setting)
    #[clap(short, long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Skip the initial scan for every watched directory
    #[clap(short, long)]
    pub ignore_initial: bool,

    /// Log the generated rsync command line for each invocation
    #[clap(short = 'D', long)]
    pub debug: bool,
}

impl Args {
    /// Resolve the config file path, falling back to the default location.
    pub fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
                .join(crate::PROCESS_NAME)
                .join("config.json"),
        }
    }
}
