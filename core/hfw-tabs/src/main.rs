//! hfw-tabs: drive HFW session liveness from a terminal.
//!
//! Each `tab` process plays one browser tab. Tabs sharing a cookie scope
//! coordinate through the file store under `~/.hfw/sessions`, so several
//! terminals reproduce the multi-tab behavior of one browser session.
//!
//! ## Subcommands
//!
//! - `tab`: Run one tab, reading commands from stdin
//! - `status`: Print the shared session as JSON
//! - `reset`: Clear the shared session

mod logging;
mod scope;
mod status;
mod tab;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use scope::ScopeArgs;

#[derive(Parser)]
#[command(name = "hfw-tabs")]
#[command(about = "HFW multi-tab session liveness")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.hfw/liveness.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one tab (commands on stdin: activity, yes, no, dirty, clean, close)
    Tab {
        /// Inactivity timeout in minutes; zero or less disables it
        #[arg(long, allow_negative_numbers = true)]
        minutes: i64,

        /// Log out without asking once every tab is idle
        #[arg(long)]
        unified_logout: bool,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Print the shared session as JSON
    Status {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Clear the shared session
    Reset {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let config = match hfw_session::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "hfw-tabs failed to load config");
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Tab {
            minutes,
            unified_logout,
            scope,
        } => tab::run(&config, minutes, unified_logout, &scope),
        Commands::Status { scope } => status::run(&config, &scope),
        Commands::Reset { scope } => status::reset(&config, &scope),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "hfw-tabs failed");
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
