use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dooropener_bridge_lib::commands::ConsoleCommand;
use dooropener_bridge_lib::logging::setup_logging;
use dooropener_bridge_lib::state::AppState;
use log::{LevelFilter, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "dooropener-bridge")]
#[command(about = "BLE console for a Nordic UART door opener")]
struct Args {
    /// Directory holding the saved settings
    #[arg(long, env = "DOOROPENER_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Log at debug level
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    info!("Using config directory {:?}", args.config_dir);
    let app_state = AppState::new(args.config_dir).await?;
    println!("Type help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match ConsoleCommand::parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                if let Err(e) = e.print() {
                    warn!("Failed to print usage: {}", e);
                }
                continue;
            }
        };

        let quit = command == ConsoleCommand::Quit;
        match command.execute(&app_state).await {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(e) => eprintln!("Error: {}", e),
        }
        if quit {
            break;
        }
    }

    app_state.bluetooth.shutdown();
    info!("Bye.");
    Ok(())
}
