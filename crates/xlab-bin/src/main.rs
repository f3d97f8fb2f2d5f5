//! `xlab`: command line access to lab instruments.
//!
//! ```bash
//! xlab list
//! xlab find 'visa:USB.*'
//! xlab query visa:USB0::0x0957::0x0618::MY123::INSTR '*IDN?'
//! xlab log tcpip:192.168.1.20 --query 'MEAS:VOLT:DC?' --interval 1 --output run.csv
//! xlab relay 'serialport:COM5:K8090 8-Channel Relay Card' on 1,3
//! ```
//!
//! `--mock` replaces every backend with a small set of simulated
//! instruments.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use xlab_core::mock::MockInterface;
use xlab_core::Interface;
use xlab_experiment::{CsvLogger, Experiment, LogPlotter, Measure, Measurement, Value};
use xlab_hardware::config::DEFAULT_CONFIG_FILE;
use xlab_hardware::{InstrumentRegistry, MockBackend, XlabConfig};

#[derive(Parser, Debug)]
#[command(name = "xlab")]
#[command(about = "Find, identify and drive laboratory instruments", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Use simulated instruments instead of the configured backends
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the interface ids of every backend
    List,

    /// List registered drivers
    Drivers,

    /// Print the identity of an interface and the drivers matching it
    Identify { interface: String },

    /// Find the single instrument whose interface id matches a regex
    Find { pattern: String },

    /// Send a query and print the reply
    Query { interface: String, message: String },

    /// Send a command
    Write { interface: String, message: String },

    /// Sample one or more queries periodically
    Log {
        interface: String,

        /// Query to sample; repeat for more columns
        #[arg(long = "query", short = 'q', required = true)]
        queries: Vec<String>,

        /// Seconds between samples; 0 samples as fast as possible
        #[arg(long, default_value_t = 1.0)]
        interval: f64,

        /// Stop after this many samples
        #[arg(long)]
        count: Option<usize>,

        /// CSV file to log to; must not exist yet
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Switch relays of a relay card
    Relay {
        interface: String,
        action: RelayAction,

        /// Relay numbers, 1-8, comma separated
        #[arg(value_delimiter = ',', required = true)]
        channels: Vec<u8>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RelayAction {
    On,
    Off,
    Toggle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = XlabConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init(level, config.log_format)?;
    debug!(?config, "configuration loaded");

    let registry = if cli.mock {
        InstrumentRegistry::with_mock(Arc::new(demo_backend()))
    } else {
        InstrumentRegistry::from_config(&config)
    };

    run(cli.command, &registry).await
}

async fn run(command: Commands, registry: &InstrumentRegistry) -> Result<()> {
    match command {
        Commands::List => {
            for id in registry.list_instruments().await {
                println!("{}", id);
            }
        }
        Commands::Drivers => {
            for driver in registry.list_drivers() {
                println!(
                    "{:<10} {:<16} {:<40} {}",
                    driver.driver_type, driver.manufacturer, driver.name, driver.id_pattern
                );
            }
        }
        Commands::Identify { interface } => {
            let iface = registry.get_interface(&interface).await?;
            let identity = iface.identify().await?;
            println!("{}", identity);
            let drivers = registry.matching_drivers(&identity)?;
            if drivers.is_empty() {
                println!("no matching driver");
            } else {
                println!("drivers: {}", drivers.join(", "));
            }
        }
        Commands::Find { pattern } => {
            let instrument = registry.find_instrument(&pattern).await?;
            println!("{} {}", instrument.interface_id, instrument.driver_type);
        }
        Commands::Query { interface, message } => {
            let iface = registry.get_interface(&interface).await?;
            println!("{}", iface.query(&message).await?);
        }
        Commands::Write { interface, message } => {
            let iface = registry.get_interface(&interface).await?;
            iface.command(&message).await?;
        }
        Commands::Log {
            interface,
            queries,
            interval,
            count,
            output,
        } => {
            let iface = registry.get_interface(&interface).await?;
            log_queries(iface, queries, interval, count, output).await?;
        }
        Commands::Relay {
            interface,
            action,
            channels,
        } => {
            let instrument = registry.get_instrument(&interface).await?;
            let relays = instrument.components.relay_card.with_context(|| {
                format!("{} ({}) is not a relay card", interface, instrument.driver_type)
            })?;
            match action {
                RelayAction::On => relays.switch_on(&channels).await?,
                RelayAction::Off => relays.switch_off(&channels).await?,
                RelayAction::Toggle => relays.toggle(&channels).await?,
            }
            println!("relays: {:08b}", relays.relay_status().await?);
        }
    }
    Ok(())
}

// =============================================================================
// log
// =============================================================================

/// Sends each query and stores the reply under the query text.
struct QueryMeasure {
    interface: Arc<dyn Interface>,
    queries: Vec<String>,
}

#[async_trait]
impl Measure for QueryMeasure {
    async fn measure(&self, measurement: &mut Measurement) -> Result<()> {
        for query in &self.queries {
            let reply = self
                .interface
                .query(query)
                .await
                .with_context(|| format!("Query '{}' failed", query))?;
            measurement.insert(query.as_str(), Value::parse(&reply));
        }
        Ok(())
    }
}

async fn log_queries(
    interface: Arc<dyn Interface>,
    queries: Vec<String>,
    interval: f64,
    count: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    if !interval.is_finite() || interval < 0.0 {
        bail!("interval must be a non-negative number of seconds, got {}", interval);
    }

    let mut experiment = Experiment::new(QueryMeasure { interface, queries })
        .with_plotter(LogPlotter::new());
    if let Some(count) = count {
        experiment = experiment.measurements_per_condition(count);
    }
    if let Some(path) = &output {
        experiment = experiment.with_logger(CsvLogger::new(path));
    }

    let handle = experiment.start(Duration::from_secs_f64(interval));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping");
            handle.stop();
        }
        _ = wait_until_done(&handle) => {}
    }
    let data = handle.wait_finished().await?;

    if output.is_none() {
        println!("{}", data.columns().join("\t"));
        for row in data.rows() {
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            println!("{}", cells.join("\t"));
        }
    }
    Ok(())
}

async fn wait_until_done(handle: &xlab_experiment::ExperimentHandle) {
    while handle.is_running() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Simulated instruments served by `--mock`.
fn demo_backend() -> MockBackend {
    MockBackend::new()
        .with(
            MockInterface::new("mock", "dmm")
                .with_identity("Agilent Technologies,34405A,MY00000001,1.0")
                .with_reply("*IDN?", "Agilent Technologies,34405A,MY00000001,1.0")
                .with_reply("MEASURE:VOLTAGE:DC? AUTO,DEF", "+1.23450000E+00"),
        )
        .with(
            MockInterface::new("mock", "generator")
                .with_identity("Agilent Technologies,33220A,MY00000002,2.0")
                .with_reply("*IDN?", "Agilent Technologies,33220A,MY00000002,2.0"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_log_command() {
        let cli = Cli::parse_from([
            "xlab", "--mock", "log", "mock:dmm", "-q", "READ?", "--query", "SYST:ERR?",
            "--interval", "0.5", "--count", "3",
        ]);
        assert!(cli.mock);
        match cli.command {
            Commands::Log {
                queries,
                interval,
                count,
                output,
                ..
            } => {
                assert_eq!(queries, vec!["READ?", "SYST:ERR?"]);
                assert_eq!(interval, 0.5);
                assert_eq!(count, Some(3));
                assert!(output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_relay_channels() {
        let cli = Cli::parse_from(["xlab", "relay", "serialport:COM5:K8090", "on", "1,3,8"]);
        match cli.command {
            Commands::Relay { action, channels, .. } => {
                assert_eq!(action, RelayAction::On);
                assert_eq!(channels, vec![1, 3, 8]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn mock_registry_finds_and_queries() {
        let registry = InstrumentRegistry::with_mock(Arc::new(demo_backend()));
        let dmm = registry.find_instrument("mock:dmm").await.unwrap();
        assert_eq!(dmm.driver_type, "a34405");
        let reading = dmm.components.readable.unwrap().read().await.unwrap();
        assert_eq!(reading, 1.2345);
    }

    #[tokio::test]
    async fn query_measure_names_columns_after_queries() {
        let mock = MockInterface::new("mock", "dmm")
            .with_reply("MEAS?", "+2.5E-01")
            .with_reply("RANGE?", "AUTO");
        let measure = QueryMeasure {
            interface: Arc::new(mock),
            queries: vec!["MEAS?".into(), "RANGE?".into()],
        };
        let data = Experiment::new(measure)
            .measurements_per_condition(2)
            .run(Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(data.columns(), ["time", "MEAS?", "RANGE?"]);
        assert_eq!(data.column_f64("MEAS?").unwrap(), vec![0.25, 0.25]);
        assert_eq!(data.row(0).unwrap().get("RANGE?"), Some(&Value::from("AUTO")));
    }
}
