//! Softkey Bridge - SQ SoftKey triggers to mixer and video switcher presets

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use softkey_bridge::config::{AppConfig, DEFAULT_CONFIG_FILE};
use softkey_bridge::drivers::{Driver, MixerClient, SwitcherClient};
use softkey_bridge::listener::{self, Backoff, ListenerLoop};
use softkey_bridge::notes::NoteTable;
use softkey_bridge::preset::PresetExecutor;

/// Recall mixer and video switcher presets from SQ SoftKey MIDI triggers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the preset file
    #[arg(short, long, env = "MIDI_PRESET_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to this file (rotated daily)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Validate the configuration, print the preset table and exit
    #[arg(long)]
    check: bool,

    /// Execute the preset for NOTE once and exit
    #[arg(long, value_name = "NOTE")]
    fire: Option<String>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref())?;

    if args.list_ports {
        return cli::list_ports_formatted();
    }

    info!("Starting Softkey Bridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config)
        .await
        .with_context(|| format!("Cannot start with configuration '{}'", args.config))?;
    let presets = Arc::new(config.preset_table()?);
    info!("Loaded {} presets", presets.len());

    if args.check {
        cli::print_preset_table(&config, &presets);
        return Ok(());
    }

    let mut executor = build_executor(&config)?;

    if let Some(key) = args.fire.as_deref() {
        let note = NoteTable::new()
            .resolve(key)
            .with_context(|| format!("'{}' is not a note label or number", key))?;
        let Some(preset) = presets.get(note) else {
            bail!("No preset assigned to note {} ({})", note, NoteTable::label(note));
        };

        let report = executor.execute(preset).await;
        executor.shutdown().await;
        if !report.is_success() {
            bail!("Preset failed: {}", report);
        }
        return Ok(());
    }

    let source = listener::from_endpoint(&config.trigger_endpoint()?);
    let backoff = Backoff::new(
        Duration::from_millis(config.listener.reconnect_base_ms),
        Duration::from_millis(config.listener.reconnect_max_ms),
    );
    let mut listener = ListenerLoop::new(source, config.listener.channel, presets, executor)
        .with_backoff(backoff);

    let stats = listener.run(shutdown_signal()).await;
    info!(
        "Softkey Bridge stopped ({} triggers, {} failed presets, {} unmapped)",
        stats.triggers, stats.presets_failed, stats.unmapped
    );

    Ok(())
}

fn build_executor(config: &AppConfig) -> Result<PresetExecutor> {
    let mut drivers: Vec<Box<dyn Driver>> = Vec::new();

    if let Some(mixer) = &config.mixer {
        let client = MixerClient::new(mixer.endpoint()?, config.listener.channel)
            .with_message_gap(Duration::from_millis(mixer.message_gap_ms));
        info!("Mixer: {}", client.endpoint());
        drivers.push(Box::new(client));
    }

    if let Some(switcher) = &config.switcher {
        let client = SwitcherClient::new(switcher.host.clone(), switcher.port)
            .with_timeout(Duration::from_millis(switcher.timeout_ms));
        info!("Switcher: {}", client.address());
        drivers.push(Box::new(client));
    }

    let executor = PresetExecutor::new(drivers, config.on_error);
    let devices: Vec<String> = executor.devices().map(|d| d.to_string()).collect();
    info!("Devices: [{}], on error: {:?}", devices.join(", "), executor.policy());
    Ok(executor)
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("--log-file '{}' must name a file", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C ({}), run until killed", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
