use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use omnibot_runtime::config::{DEFAULT_STORE_PATH, WATCHDOG_TIMEOUT};
use omnibot_runtime::motor::LoopMode;
use omnibot_runtime::runtime::{self, Settings};

#[derive(Parser, Debug)]
#[command(about = "Omnidirectional robot runtime")]
struct Cli {
    /// Robot id to answer to (overrides the stored one)
    #[arg(long)]
    robot_id: Option<u8>,

    /// Radio channel switch position 0-4 (overrides the stored frequency)
    #[arg(long)]
    channel: Option<u8>,

    /// Persistent configuration file
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Apply wheel targets directly instead of through the PID loop
    #[arg(long)]
    open_loop: bool,

    /// Watchdog timeout in milliseconds
    #[arg(long, default_value_t = WATCHDOG_TIMEOUT.as_millis() as u64)]
    watchdog_ms: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let settings = Settings {
        robot_id: cli.robot_id,
        channel: cli.channel,
        store_path: cli.store,
        loop_mode: if cli.open_loop {
            LoopMode::OpenLoop
        } else {
            LoopMode::ClosedLoop
        },
        watchdog_timeout: Duration::from_millis(cli.watchdog_ms),
    };

    if let Err(e) = runtime::run(settings).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
