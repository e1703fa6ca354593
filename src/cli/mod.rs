// src/cli/mod.rs — CLI definition (clap derive)

pub mod console;
pub mod plugins;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "plugscript",
    about = "Scripting host with native plugins and hot-reloading scripts",
    version
)]
pub struct Cli {
    /// Scripts to load at startup (in addition to configured autoload)
    pub scripts: Vec<String>,

    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    /// Plugin directory (overrides config)
    #[arg(long)]
    pub plugins: Option<String>,

    /// Log level (overrides config; RUST_LOG takes precedence)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Do not start the script watcher
    #[arg(long)]
    pub no_watch: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List discovered plugins and their load order without loading them
    Plugins {
        /// Plugin directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<String>,
    },
}
