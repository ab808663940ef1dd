//! usb-sentry CLI
//!
//! Front end for the discovery engine: lists attached USB devices, watches
//! hotplug traffic, and manages the identity overlays (rename, hide,
//! heritage, history, connection log).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::setup_logging;
use engine::{
    AlertSink, DeviceEngine, EngineConfig, FileBackend, OverlayStore, UsbRegistry,
};
use model::{DeviceKey, DeviceListView, DisplayDevice};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-sentry")]
#[command(author, version, about = "USB Sentry - watch attached USB devices")]
#[command(long_about = "
Lists attached USB devices, tracks hotplug events, and maintains persisted
identity overlays: per-device renames, camouflaged (hidden) devices,
heritage inheritance, seen-device history, and a connection-event log.

EXAMPLES:
    # One scan, print the visible device list
    usb-sentry list

    # Watch for hotplug changes until Ctrl-C
    usb-sentry watch

    # Rename a device (keys look like 05ac:0262@14300000)
    usb-sentry rename 05ac:0262@14300000 'Desk Keyboard'

    # Hide and reveal a device
    usb-sentry hide 05ac:0262@14300000
    usb-sentry unhide 05ac:0262@14300000

    # Show the retained connection log
    usb-sentry log

CONFIGURATION:
    The engine looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-sentry/config.toml
    3. /etc/usb-sentry/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan once and print the visible device list
    List {
        /// Also list camouflaged devices
        #[arg(long)]
        all: bool,
    },

    /// Run the engine until Ctrl-C, printing list changes and alerts
    Watch,

    /// Assign a display name to a device
    Rename { device: DeviceKey, name: String },

    /// Hide a device from the visible list
    Hide { device: DeviceKey },

    /// Reveal a hidden device
    Unhide { device: DeviceKey },

    /// Let a device inherit identity overlays from another device
    Inherit { device: DeviceKey, from: DeviceKey },

    /// Remove a device's inheritance edge
    Disinherit { device: DeviceKey },

    /// Show every device ever seen
    History,

    /// Drop a device from the seen history
    Forget { device: DeviceKey },

    /// Show the connection log
    Log {
        /// Empty the log
        #[arg(long)]
        clear: bool,

        /// Retain only the N most recent events
        #[arg(long, value_name = "N")]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = EngineConfig::default();
        let path = EngineConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        EngineConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        EngineConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.level.clone());
    setup_logging(&log_level).map_err(|e| anyhow::anyhow!("{}", e))?;

    let store = OverlayStore::open(Arc::new(FileBackend::new(config.storage.data_dir())));

    match args.command.unwrap_or(Command::List { all: false }) {
        Command::List { all } => cmd_list(config, store, all).await,
        Command::Watch => cmd_watch(config, store).await,
        Command::Rename { device, name } => {
            store.rename(device, name).context("could not save rename")?;
            println!("renamed {}", device);
            Ok(())
        }
        Command::Hide { device } => {
            store.camouflage(device).context("could not hide device")?;
            println!("hidden {}", device);
            Ok(())
        }
        Command::Unhide { device } => {
            store.reveal(device).context("could not reveal device")?;
            println!("revealed {}", device);
            Ok(())
        }
        Command::Inherit { device, from } => {
            store
                .inherit(device, from)
                .context("could not save inheritance")?;
            println!("{} now inherits from {}", device, from);
            Ok(())
        }
        Command::Disinherit { device } => {
            store
                .disinherit(device)
                .context("could not remove inheritance")?;
            println!("removed inheritance for {}", device);
            Ok(())
        }
        Command::History => {
            let stored = store.stored();
            if stored.is_empty() {
                println!("no devices seen yet");
            }
            for record in stored {
                println!("{}  {}", record.device, record.name);
            }
            Ok(())
        }
        Command::Forget { device } => {
            store.forget(device).context("could not update history")?;
            println!("forgot {}", device);
            Ok(())
        }
        Command::Log { clear, keep } => {
            if clear {
                store.clear_log().context("could not clear log")?;
                println!("connection log cleared");
                return Ok(());
            }
            if let Some(n) = keep {
                store.keep_only(n).context("could not trim log")?;
            }
            for event in store.connection_log() {
                let kind = if event.disconnect {
                    "disconnect"
                } else {
                    "connect"
                };
                println!("{}  {:<10} {}", format_time(event.time), kind, event.device);
            }
            Ok(())
        }
    }
}

async fn cmd_list(config: EngineConfig, store: OverlayStore, all: bool) -> Result<()> {
    let registry = UsbRegistry::new().context("Failed to open USB registry")?;
    let source = registry.clone();
    let mut engine = DeviceEngine::new(registry, source, store, config);

    let view = engine.refresh_and_wait().await;
    print_view(&view);

    if all {
        let camouflaged = engine.store().camouflaged();
        if !camouflaged.is_empty() {
            println!("\ncamouflaged:");
            for record in camouflaged {
                println!("  {}", record.device);
            }
        }
    }

    engine.stop().await;
    Ok(())
}

async fn cmd_watch(config: EngineConfig, store: OverlayStore) -> Result<()> {
    let registry = UsbRegistry::new().context("Failed to open USB registry")?;
    let source = registry.clone();
    let mut engine =
        DeviceEngine::with_alert_sink(registry, source, store, config, Arc::new(PrintAlertSink));

    engine
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start hotplug monitor: {}", e))?;

    let mut views = engine.subscribe();
    let printer = tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow().clone();
            print_view(&view);
        }
    });

    info!("watching for device changes, press Ctrl-C to exit");
    tokio::select! {
        _ = engine.run() => {},
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    engine.stop().await;
    printer.abort();
    Ok(())
}

/// Sink that prints alerts to stdout for interactive watching.
struct PrintAlertSink;

impl AlertSink for PrintAlertSink {
    fn alert(&self, title: &str, body: &str) {
        println!("!! {}: {}", title, body);
    }
}

fn print_view(view: &DeviceListView) {
    println!(
        "-- {} device(s) visible, {} hidden but connected --",
        view.devices.len(),
        view.hidden_connected
    );
    for device in &view.devices {
        println!("{}", format_device(device));
    }
}

fn format_device(device: &DisplayDevice) -> String {
    let snapshot = &device.device;
    let vendor = snapshot.vendor.as_deref().unwrap_or("-");
    let mut line = format!(
        "{}  {:<28} {:<20} {:<10} {}",
        device.key(),
        device.name,
        vendor,
        snapshot.version_label(),
        snapshot.speed_description(),
    );
    if snapshot.is_external_storage {
        line.push_str("  [storage]");
    }
    if device.renamed {
        line.push_str("  (renamed)");
    }
    line
}

fn format_time(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => format!("{:>12}", elapsed.as_secs()),
        Err(_) => format!("{:>12}", "-"),
    }
}
