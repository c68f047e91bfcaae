use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppType;

pub mod add;
pub mod detect;
pub mod fix_config;
pub mod list;
pub mod logs;
pub mod maintenance;
pub mod remove;
pub mod status;
pub mod transfer;

#[derive(Parser)]
#[command(
    name = "deckhand",
    version,
    about = "Deploy web apps to this host via nginx + systemd"
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a new application
    Add {
        /// Domain the application is served under
        #[arg(short, long)]
        domain: String,
        /// Git URL or local path of the source
        #[arg(short, long)]
        source: String,
        /// Internal port the application listens on (1024-65535)
        #[arg(short, long)]
        port: u16,
        /// Application type
        #[arg(short = 't', long = "type", value_enum, default_value_t = AppType::Nextjs)]
        app_type: AppType,
        /// Git branch to deploy
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Skip SSL certificate provisioning
        #[arg(long)]
        no_ssl: bool,
        /// Override the build command
        #[arg(long)]
        build_command: Option<String>,
        /// Override the start command
        #[arg(long)]
        start_command: Option<String>,
        /// Environment variables (KEY=VALUE, repeatable)
        #[arg(long = "env")]
        env: Vec<String>,
    },

    /// Remove a deployed application
    Remove {
        #[arg(short, long)]
        domain: String,
        /// Skip the pre-removal backup
        #[arg(long)]
        no_backup: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List deployed applications
    List {
        /// Show sources, branches, and timestamps
        #[arg(long)]
        detailed: bool,
    },

    /// Restart an application's service
    Restart {
        #[arg(short, long)]
        domain: String,
    },

    /// Update an application from its git remote
    Update {
        #[arg(short, long)]
        domain: String,
    },

    /// Show application logs
    Logs {
        #[arg(short, long)]
        domain: String,
        /// Number of log lines
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },

    /// Provision an SSL certificate for an application
    Ssl {
        #[arg(short, long)]
        domain: String,
        /// Contact email for the certificate authority
        #[arg(long)]
        email: Option<String>,
    },

    /// Check an application (or the whole host) for problems
    Diagnose {
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Repair a broken application in place
    Repair {
        #[arg(short, long)]
        domain: String,
    },

    /// Show the status of an application or the host
    Status {
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Export the registry to a file
    Export {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Import a previously exported registry
    Import {
        #[arg(short, long)]
        file: PathBuf,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List supported application types
    Types,

    /// Detect the application type of a directory
    Detect {
        #[arg(long)]
        directory: PathBuf,
    },

    /// Serve a maintenance page instead of the application
    Maintenance {
        #[arg(short, long)]
        domain: String,
        /// Enable maintenance mode
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        /// Disable maintenance mode
        #[arg(long)]
        disable: bool,
    },

    /// Start the web dashboard
    Gui {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value = "8085")]
        port: u16,
    },

    /// Repair the registry file and common nginx problems
    FixConfig {
        /// Registry file to repair (defaults to the system registry)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}
