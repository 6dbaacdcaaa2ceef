use clap::{Parser, Subcommand};
use stackhook_core::{CoreError, Dispatcher, HandlerConfig};
use stackhook_server::{install_signal_handler, run_server};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_DELIVERY_ERROR: u8 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "stackhook",
    version,
    about = "Reconciliation handlers for orchestrator custom resources"
)]
struct Cli {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Accept lifecycle events over HTTP.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 8330)]
        port: u16,
        /// Address to bind.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },
    /// Handle a single event read from a file, or stdin when omitted.
    Invoke {
        #[arg(long)]
        event: Option<PathBuf>,
    },
}

fn read_event(path: Option<&Path>) -> Result<Vec<u8>, CoreError> {
    match path {
        Some(path) => Ok(std::fs::read(path)?),
        None => {
            let mut event = Vec::new();
            std::io::stdin().read_to_end(&mut event)?;
            Ok(event)
        }
    }
}

fn invoke(dispatcher: &Dispatcher, event: Option<&Path>) -> u8 {
    let raw = match read_event(event) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_FAILURE;
        }
    };
    match dispatcher.handle_event(&raw) {
        Ok(response) => {
            match serde_json::to_string_pretty(&response) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("cannot print response: {e}"),
            }
            if response.is_success() {
                EXIT_SUCCESS
            } else {
                EXIT_FAILURE
            }
        }
        Err(e @ CoreError::Callback(_)) => {
            eprintln!("error: {e}");
            EXIT_DELIVERY_ERROR
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let dispatcher = match HandlerConfig::load_with_env(cli.config.as_deref())
        .and_then(Dispatcher::from_config)
    {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let code = match cli.command {
        Commands::Serve { port, bind } => {
            install_signal_handler();
            let addr = format!("{bind}:{port}");
            info!("starting stackhook on {addr}");
            match run_server(&Arc::new(dispatcher), &addr) {
                Ok(()) => EXIT_SUCCESS,
                Err(e) => {
                    eprintln!("error: {e}");
                    EXIT_FAILURE
                }
            }
        }
        Commands::Invoke { event } => invoke(&dispatcher, event.as_deref()),
    };
    ExitCode::from(code)
}
