// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tideway — a multi-protocol gateway fronting the Claude web service.
//!
//! This is the binary entry point.

mod serve;
mod shutdown;

use clap::{Parser, Subcommand};

/// Tideway — a multi-protocol gateway fronting the Claude web service.
#[derive(Parser, Debug)]
#[command(name = "tideway", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway server (default).
    Serve,
    /// Load and validate the configuration, then print the effective values.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = match tideway_config::load_and_validate() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Config => match tideway_config::load_and_validate() {
            Ok(config) => {
                let mut printable = config.clone();
                // Never echo credentials back.
                printable.tokens.session_key = printable.tokens.session_key.map(|_| "[redacted]".into());
                printable.tokens.cf_clearance = printable.tokens.cf_clearance.map(|_| "[redacted]".into());
                printable.tokens.cf_bm = printable.tokens.cf_bm.map(|_| "[redacted]".into());
                match serde_json::to_string_pretty(&printable) {
                    Ok(text) => println!("{text}"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
    }
}
