pub mod config;         // Configuration management
pub mod datalog_writer; // Status readings as JSON lines
pub mod error;          // Error handling and types
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod samil;          // Samil Power inverter protocol

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::datalog_writer::DatalogWriter;
use crate::options::Options;
use crate::prelude::*;
use crate::samil::util::connect_inverters;

use std::io::Write;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// Main application entry point
///
/// Pairs with the configured number of inverters, then polls each of them for
/// status until a shutdown signal arrives or the runtime limit from the
/// command line runs out. Every inverter is disconnected on the way out,
/// whatever the outcome.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let options = Options::new();

    let config = match Config::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            error!("Failed to load config {}: {:?}", options.config_file, err);
            return Err(err);
        }
    };
    init_logging(&config.loglevel);

    info!(
        "samil-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    let datalog = match &config.datalog_file {
        Some(path) => Some(DatalogWriter::new(path)?),
        None => None,
    };

    let count = config.inverter.count();
    info!("Searching for {} inverter(s)...", count);
    let mut inverters = match connect_inverters(&config.finder, &config.inverter, count).await {
        Ok(inverters) => inverters,
        Err(e) if e.is_not_found() => {
            error!("No inverter answered the advertisements: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("Pairing with inverters failed: {}", e);
            return Err(e.into());
        }
    };

    let runtime = options.runtime.map(Duration::from_secs);
    let result = monitor(&mut inverters, &config, datalog.as_ref(), runtime, &mut shutdown_rx).await;

    info!("Disconnecting {} inverter(s)", inverters.len());
    for inverter in inverters.iter_mut() {
        if let Err(e) = inverter.disconnect().await {
            warn!("inverter {}: disconnect failed: {}", inverter.addr(), e);
        }
    }

    if let Err(e) = &result {
        error!("Stopped after error: {:#}", e);
    }
    info!("Application shutdown complete");
    result
}

async fn monitor(
    inverters: &mut [KeepAliveInverter],
    config: &Config,
    datalog: Option<&DatalogWriter>,
    runtime: Option<Duration>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut serials = Vec::with_capacity(inverters.len());
    for inverter in inverters.iter_mut() {
        let model = inverter.model().await?;
        info!(
            "inverter {}: {} {} ({}, {} VA), serial {}, firmware {}",
            inverter.addr(),
            model.manufacturer,
            model.model_name,
            model.device_type,
            model.va_rating,
            model.serial_number,
            model.firmware_version
        );
        serials.push(model.serial_number);
    }

    let deadline = async {
        match runtime {
            Some(runtime) => tokio::time::sleep(runtime).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut interval = tokio::time::interval(config.inverter.status_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Ok(()) = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
            _ = &mut deadline => {
                info!("Runtime limit reached");
                break;
            }
            _ = interval.tick() => {}
        }

        for (inverter, serial) in inverters.iter_mut().zip(&serials) {
            let status = inverter.status().await?;
            let line = serde_json::json!({
                "serial": serial,
                "address": inverter.addr().to_string(),
                "status": &status,
            });
            println!("{}", line);

            if let Some(writer) = datalog {
                writer.write_status(serial, inverter.addr(), &status)?;
            }
        }
    }

    Ok(())
}
