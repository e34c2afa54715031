//! NSE mean-reversion engine - main entry point
//!
//! This binary provides four subcommands:
//! - run: Trade one session (paper or live)
//! - session: Inspect or reset the session checkpoint
//! - kill: Engage or clear the kill switch of a running session
//! - login: Exchange a Kite request token for an access token

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::session::SessionAction;

#[derive(Parser, Debug)]
#[command(name = "reversion-engine")]
#[command(about = "Intraday mean-reversion engine for NSE equities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a trading session
    Run {
        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Initial capital for a fresh session
        #[arg(long)]
        capital: Option<f64>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Inspect or reset the persisted session
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },

    /// Engage the kill switch of a running session
    Kill {
        /// Remove the kill switch file instead
        #[arg(long)]
        off: bool,
    },

    /// Exchange a Kite request token for an access token
    Login {
        /// request_token from the Kite login redirect
        #[arg(long)]
        request_token: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Print capital, P&L and the latest equity points
    Show,
    /// Delete the checkpoint so the next run starts fresh
    Reset,
    /// Start over with the given capital
    SetCapital { amount: f64 },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Session { .. } => "session",
        Commands::Kill { .. } => "kill",
        Commands::Login { .. } => "login",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run {
            paper,
            live,
            capital,
            cycles,
        } => commands::run::run(cli.config, paper, live, capital, cycles),

        Commands::Session { action } => {
            let action = match action {
                SessionCommand::Show => SessionAction::Show,
                SessionCommand::Reset => SessionAction::Reset,
                SessionCommand::SetCapital { amount } => SessionAction::SetCapital(amount),
            };
            commands::session::run(cli.config, action)
        }

        Commands::Kill { off } => commands::kill::run(cli.config, off),

        Commands::Login { request_token } => commands::login::run(cli.config, request_token),
    }
}
