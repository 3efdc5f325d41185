//! Entry point for `arq-transfer`.
//!
//! Parses CLI arguments and dispatches into either **provider** or
//! **requester** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use arq_transfer::progress::ConsoleProgress;
use arq_transfer::{Provider, ProviderConfig, Requester, RequesterConfig};

/// Reliable file transfer over UDP (stop-and-wait ARQ).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve one file to requesters, one at a time.
    Provider {
        /// The port used to accept incoming requests.
        #[arg(short = 'p')]
        port: u16,
        /// The file sent to every requester.
        #[arg(short = 'f')]
        file: PathBuf,
        /// Payload bytes per data frame.
        #[arg(short = 'b')]
        buffer_size: u64,
        /// Probability (percent) of corrupting each data frame.
        #[arg(short = 'e', allow_negative_numbers = true)]
        error_rate: i64,
    },
    /// Download the file offered by a provider.
    Requester {
        /// The provider's address.
        #[arg(short = 's')]
        server: String,
        /// The port the provider listens on.
        #[arg(short = 'p')]
        port: u16,
        /// Directory to save the received file into.
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Default to info-level operator output; set RUST_LOG to change verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Provider {
            port,
            file,
            buffer_size,
            error_rate,
        } => {
            let config = match ProviderConfig::validate(port, file, buffer_size, error_rate) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(2);
                }
            };
            let mut provider = Provider::bind(&config)
                .await
                .with_context(|| format!("cannot serve {}", config.file.display()))?;
            log::info!(
                "Serving '{}' on {} ({}-byte frames, {}% corruption)",
                config.file.display(),
                provider.local_addr(),
                provider.frame_size(),
                config.error_rate
            );

            tokio::select! {
                result = provider.serve(ConsoleProgress::new()) => {
                    result.context("provider socket failed")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Exiting server...");
                }
            }
        }
        Mode::Requester {
            server,
            port,
            output,
        } => {
            let config = RequesterConfig::resolve(&server, port, output)
                .with_context(|| format!("invalid provider address {server}:{port}"))?;
            let mut requester = Requester::connect(config)
                .await
                .context("cannot open requester socket")?;

            if let Err(e) = requester.run(ConsoleProgress::new()).await {
                log::error!("Transfer failed: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
