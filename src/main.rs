use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use acarshub::config::{ConfigError, DEFAULT_ADSB_PORT, HubConfig, RetentionConfig};
use acarshub::iata::IataOverride;
use acarshub::log_format::TargetFirstFormat;

mod commands;

#[derive(Parser)]
#[command(name = "acarshub")]
#[command(about = "Correlate ACARS/VDLM2 datalink messages with ADS-B positions")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable ANSI colors in log output
    #[arg(long, env = "AH_NO_COLOR", global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the correlation service
    Run(HubArgs),
    /// Feed a recorded datalink capture (one JSON payload per line) through
    /// the normalizer and registry and print the resulting aircraft as JSON
    Replay {
        /// Capture file
        file: PathBuf,

        /// IATA to ICAO airline table (JSON)
        #[arg(long, env = "AH_IATA_TABLE")]
        iata_table: Option<PathBuf>,

        /// Airline override in the form IATA|ICAO|NAME (repeatable)
        #[arg(long = "iata-override", env = "AH_IATA_OVERRIDES", value_delimiter = ';')]
        iata_overrides: Vec<String>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct HubArgs {
    #[arg(long, env = "AH_ENABLE_ACARS")]
    enable_acars: bool,

    #[arg(long, env = "AH_ENABLE_VDLM2")]
    enable_vdlm2: bool,

    #[arg(long, env = "AH_ENABLE_ADSB")]
    enable_adsb: bool,

    /// ACARS publishers as host:port, comma separated
    #[arg(long, env = "AH_ACARS_SOURCE", value_delimiter = ',')]
    acars_source: Vec<String>,

    /// VDLM2 publishers as host:port, comma separated
    #[arg(long, env = "AH_VDLM2_SOURCE", value_delimiter = ',')]
    vdlm2_source: Vec<String>,

    /// Host of the ADS-B JSON stream
    #[arg(long, env = "AH_ADSB_HOST")]
    adsb_host: Option<String>,

    #[arg(long, env = "AH_ADSB_PORT", default_value_t = DEFAULT_ADSB_PORT)]
    adsb_port: u16,

    /// IATA to ICAO airline table (JSON)
    #[arg(long, env = "AH_IATA_TABLE")]
    iata_table: Option<PathBuf>,

    /// Airline override in the form IATA|ICAO|NAME (repeatable)
    #[arg(long = "iata-override", env = "AH_IATA_OVERRIDES", value_delimiter = ';')]
    iata_overrides: Vec<String>,

    /// Seconds an aircraft is kept after its last position
    #[arg(long, env = "AH_POSITION_RETENTION_SECS", default_value_t = 120)]
    position_retention_secs: u64,

    /// Seconds an aircraft is kept after its last datalink message
    #[arg(long, env = "AH_MESSAGE_RETENTION_SECS", default_value_t = 900)]
    message_retention_secs: u64,

    #[arg(long, env = "AH_PRUNE_INTERVAL_SECS", default_value_t = 10)]
    prune_interval_secs: u64,

    #[arg(long, env = "AH_STATS_INTERVAL_SECS", default_value_t = 60)]
    stats_interval_secs: u64,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "AH_METRICS_PORT")]
    metrics_port: Option<u16>,
}

fn parse_overrides(values: &[String]) -> Result<Vec<IataOverride>, ConfigError> {
    values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.parse())
        .collect()
}

impl TryFrom<HubArgs> for HubConfig {
    type Error = ConfigError;

    fn try_from(args: HubArgs) -> Result<Self, Self::Error> {
        let iata_overrides = parse_overrides(&args.iata_overrides)?;
        Ok(HubConfig {
            enable_acars: args.enable_acars,
            enable_vdlm2: args.enable_vdlm2,
            enable_adsb: args.enable_adsb,
            acars_sources: args.acars_source,
            vdlm2_sources: args.vdlm2_source,
            adsb_host: args.adsb_host,
            adsb_port: args.adsb_port,
            iata_table: args.iata_table,
            iata_overrides,
            retention: RetentionConfig {
                position_window: Duration::from_secs(args.position_retention_secs),
                message_window: Duration::from_secs(args.message_retention_secs),
                prune_interval: Duration::from_secs(args.prune_interval_secs),
            },
            stats_interval: Duration::from_secs(args.stats_interval_secs),
            metrics_port: args.metrics_port,
        })
    }
}

fn init_tracing(verbose: u8, ansi: bool) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,acarshub={}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(TargetFirstFormat::new(ansi))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose, !cli.no_color);

    match cli.command {
        Commands::Run(args) => {
            let config = match HubConfig::try_from(args).and_then(|c| c.validate().map(|_| c)) {
                Ok(config) => config,
                Err(e) => {
                    error!("Invalid configuration: {}", e);
                    std::process::exit(1);
                }
            };
            commands::handle_run(config).await
        }
        Commands::Replay {
            file,
            iata_table,
            iata_overrides,
            pretty,
        } => {
            let iata_overrides = match parse_overrides(&iata_overrides) {
                Ok(overrides) => overrides,
                Err(e) => {
                    error!("Invalid configuration: {}", e);
                    std::process::exit(1);
                }
            };
            commands::handle_replay(file, iata_table, iata_overrides, pretty).await
        }
    }
}
