use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::task::LocalSet;

mod ble;
mod cmd;
mod utils;

use ble::App;
use ble::stack::StackSettings;
use ble::types::Address;
use cmd::{Console, Output};

/// BLE CLI - drive a BLE host stack from a line oriented console.
///
/// Commands are read one per line (stdin or --script):
///   <suite> <command> [args...]
///
/// Every command prints one JSON object followed by `retcode: N`:
///   ble init
///   {"status":0}
///   retcode: 0
///
/// Suites:
///   ble   init / shutdown / reset / getVersion
///   gap   getAddress / connect / startConnecting / cancelConnect /
///         disconnect / waitForConnection / waitForDisconnection
///
/// Each suite also answers `list` and `help <command>`.
///
/// Global flags / env:
///   -v / -vv           Increase verbosity (traces on stderr, prefixed by ~~~)
///   -q / --quiet       Errors only
///   -c / --config      Simulated stack settings (JSON or YAML)
///   BLE_CLIAPP_CONFIG  Environment fallback if -c not provided
#[derive(Parser, Debug)]
#[command(
    name = "ble-cliapp",
    version,
    about = "BLE CLI - command console for a BLE host stack",
    propagate_version = true
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Silence all non-error traces
    #[arg(short, long)]
    quiet: bool,

    /// Read commands from a file instead of stdin
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Echo the command name and arguments in every response
    #[arg(long)]
    echo: bool,

    /// Stack settings file (.json / .yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Public address of the simulated controller (AA:BB:CC:DD:EE:FF)
    #[arg(long, value_name = "ADDRESS")]
    address: Option<Address>,

    /// Time taken by `ble init`, in ms
    #[arg(long, value_name = "MS")]
    init_latency_ms: Option<u64>,

    /// Time taken by `gap connect`, in ms
    #[arg(long, value_name = "MS")]
    connect_latency_ms: Option<u64>,
}

impl Cli {
    /// Settings precedence: CLI flag > config file > defaults.
    async fn stack_settings(&self) -> Result<StackSettings> {
        let config = self.config.clone().or_else(|| {
            std::env::var("BLE_CLIAPP_CONFIG")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        });

        let mut settings = match &config {
            Some(path) => utils::load_config_file(path).await?,
            None => StackSettings::default(),
        };
        if let Some(address) = self.address {
            settings.address = address;
        }
        if let Some(ms) = self.init_latency_ms {
            settings.init_latency_ms = ms;
        }
        if let Some(ms) = self.connect_latency_ms {
            settings.connect_latency_ms = ms;
        }
        Ok(settings)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = utils::derive_level(cli.verbose, cli.quiet);
    utils::init_logging(level);

    let settings = cli.stack_settings().await?;
    log_debug!("stack settings: {settings:?}");

    let output = Output::stdout().with_echo(cli.echo);
    let console = Console::new(App::new(settings, output.clone()), ble::suites(), output);

    LocalSet::new()
        .run_until(async {
            match &cli.script {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("failed to open script: {}", path.display()))?;
                    console.run(BufReader::new(file)).await
                }
                None => console.run(BufReader::new(tokio::io::stdin())).await,
            }
        })
        .await?;
    Ok(())
}
