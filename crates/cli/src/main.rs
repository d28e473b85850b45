mod config_commands;
mod cron_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    taskhub_config::TaskhubConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "taskhub", about = "Taskhub — distributed cron scheduler", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (skips discovery of ./taskhub.* and ~/.config/taskhub/).
    #[arg(long, global = true, env = "TASKHUB_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every cron and run until interrupted (default when no subcommand is provided).
    Run,
    /// List the registered crons.
    Crons,
    /// Show the recorded execution stats of a cron.
    Stats {
        /// Cron name, e.g. fire_contacts.
        name: String,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<TaskhubConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = taskhub_config::load_config(path)?;
            taskhub_config::apply_env_overrides(&mut config);
            Ok(config)
        },
        None => Ok(taskhub_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);
    taskhub_cron::driver::install_panic_hook();

    info!(version = env!("CARGO_PKG_VERSION"), "taskhub starting");

    let config = load_config(&cli)?;

    match cli.command {
        // Default: run the scheduler when no subcommand is provided
        None | Some(Commands::Run) => cron_commands::run(config).await,
        Some(Commands::Crons) => cron_commands::list(&config),
        Some(Commands::Stats { name }) => cron_commands::stats(config, &name).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
    }
}
