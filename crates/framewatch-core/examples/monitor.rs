//! Serial Stream Monitor
//!
//! Opens a port, prints validated frames, consumer values and grouped
//! traffic until Ctrl-C. Reconnects automatically if the device drops out.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: first port found)
//!   --baud RATE       Baud rate (default: 115200)
//!   --config FILE     JSON monitor configuration
//!   --demo            Use the built-in simulated device
//!   --list            List serial ports and exit
//!
//! Set RUST_LOG=debug for anomaly and recovery details.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use framewatch_core::demo::{DemoSource, DEMO_PORT};
use framewatch_core::device::{list_ports, shared, SerialByteSource, SerialParams, SharedSource};
use framewatch_core::field::ConsumerUpdate;
use framewatch_core::prelude::*;
use framewatch_core::runtime::run;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut port: Option<String> = None;
    let mut baud: Option<u32> = None;
    let mut config_path: Option<String> = None;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port = args.get(i).cloned();
            }
            "--baud" | "-b" => {
                i += 1;
                let value = args.get(i).context("--baud needs a value")?;
                baud = Some(value.parse().context("invalid baud rate")?);
            }
            "--config" | "-c" => {
                i += 1;
                config_path = args.get(i).cloned();
            }
            "--demo" => demo = true,
            "--list" => {
                for info in list_ports() {
                    println!(
                        "{}  {}",
                        info.name,
                        info.product.as_deref().unwrap_or("")
                    );
                }
                return Ok(());
            }
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path))?;
            MonitorConfig::from_json_str(&text)?
        }
        None => MonitorConfig::default(),
    };

    let (source, mut params): (SharedSource, SerialParams) = if demo {
        (shared(DemoSource::default()), SerialParams::new(DEMO_PORT))
    } else {
        let configured = Some(config.serial.port.clone()).filter(|p| !p.is_empty());
        let name = match port.or(configured) {
            Some(name) => name,
            None => match list_ports().into_iter().next() {
                Some(info) => info.name,
                None => bail!("no serial ports found; pass --port or --demo"),
            },
        };
        let params = SerialParams {
            port: name,
            ..config.serial.clone()
        };
        (shared(SerialByteSource::new()), params)
    };
    if let Some(baud) = baud {
        params.baud_rate = baud;
    }

    let style = config.display;
    let curves = config.consumers.curves.clone();
    let monitor = Monitor::new(config, source)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let token = CancellationToken::new();
    let handle = tokio::spawn(run(monitor, cmd_rx, event_tx, token.clone()));

    tracing::info!("Connecting to {} at {} baud", params.port, params.baud_rate);
    cmd_tx
        .send(MonitorCommand::Connect(params))
        .await
        .map_err(|_| anyhow!("monitor stopped before connecting"))?;

    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    while let Some(event) = event_rx.recv().await {
        match event {
            MonitorEvent::Frame(frame) => {
                println!("[{}] {}", frame.protocol(), frame.to_hex());
            }
            MonitorEvent::Consumer(ConsumerUpdate::Curve { id, value }) => {
                if let Some(curve) = curves.get(id) {
                    println!("    {} = {:.2} {}", curve.name, value, curve.unit);
                }
            }
            MonitorEvent::Consumer(ConsumerUpdate::Display { text, .. }) => {
                println!("    {}", text);
            }
            MonitorEvent::Consumer(ConsumerUpdate::Clock(clock)) => {
                println!("    device clock {}", clock);
            }
            MonitorEvent::Consumer(_) => {}
            MonitorEvent::Traffic(record) => {
                tracing::debug!("{}", record.render(style));
            }
            MonitorEvent::Recovery(event) => {
                println!("*** {:?}", event);
            }
        }
    }

    let monitor = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .context("monitor did not stop")??;
    println!("{} traffic records", monitor.traffic().len());
    Ok(())
}
