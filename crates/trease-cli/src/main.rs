mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    apps::{handle_apps_command, AppsAction},
    config::{handle_config_command, ConfigAction},
    daemon::{run_daemon_process, show_status, start_daemon, stop_daemon},
    focus::{handle_focus_command, FocusAction},
    history::show_history,
};
use trease_core::config::get_data_dir;

#[derive(Parser)]
#[command(name = "trease")]
#[command(about = "Focus sessions that keep distracting apps locked", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the monitor daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the monitor daemon
    Stop,
    /// Show daemon and session status
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Control focus sessions
    Focus {
        #[command(subcommand)]
        action: FocusAction,
    },
    /// Installed applications
    Apps {
        #[command(subcommand)]
        action: AppsAction,
    },
    /// Show recently finished sessions
    History {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Monitor configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Start => start_daemon(&data_dir),
        Commands::DaemonInternalStart => run_daemon_process().await,
        Commands::Stop => stop_daemon(&data_dir).await,
        Commands::Status { json } => show_status(&data_dir, json).await,
        Commands::Focus { action } => handle_focus_command(action, &data_dir).await,
        Commands::Apps { action } => handle_apps_command(action),
        Commands::History { limit } => show_history(limit),
        Commands::Config { action } => handle_config_command(action),
    }
}
