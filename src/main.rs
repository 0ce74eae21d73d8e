//! Ambient Bridge - Rust Implementation
//!
//! Screen-to-LED ambient lighting daemon.

use ambient_bridge::capture::{Rotation, TestPattern};
use ambient_bridge::discovery::DeviceScanner;
use ambient_bridge::{bus, config, AmbientPipeline};

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PATTERN_WIDTH: usize = 160;
const PATTERN_HEIGHT: usize = 90;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ambient_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Ambient Bridge v{} ({})",
        env!("AMBI_VERSION"),
        env!("AMBI_GIT_SHA")
    );

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".into());
    match command.as_str() {
        "run" => run().await,
        "scan" => scan().await,
        other => bail!("unknown command '{}' (expected 'run' or 'scan')", other),
    }
}

/// Drive the pipeline from the built-in test pattern until a shutdown signal.
async fn run() -> Result<()> {
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded from {}",
        config::get_config_dir().display()
    );

    let bus = bus::create_bus();
    let pipeline = AmbientPipeline::new(&config, bus.clone())?;
    pipeline.start().await?;

    let mut pattern = TestPattern::new(PATTERN_WIDTH, PATTERN_HEIGHT);
    let mut ticker = tokio::time::interval(Duration::from_micros(
        1_000_000 / config.frame_rate.max(1) as u64,
    ));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if !pipeline.is_capturing() {
                    tracing::error!("Capture stopped, exiting");
                    break;
                }
                let frame = pattern.next_frame(0.002);
                if let Err(e) = pipeline.submit_frame(frame, PATTERN_WIDTH, PATTERN_HEIGHT, Rotation::None) {
                    tracing::warn!("Frame rejected: {}", e);
                }
            }
        }
    }

    tracing::info!("Shutting down pipeline...");
    bus.publish(bus::BusEvent::ShuttingDown);
    pipeline.stop().await;
    let stats = pipeline.stats();
    tracing::info!(
        "Shutdown complete ({} frames, {} sent)",
        stats.accepted,
        pipeline.connection().frames_sent()
    );
    Ok(())
}

/// Probe the local subnets and log every controller found.
async fn scan() -> Result<()> {
    let config = config::load_config()?;
    let cancel = CancellationToken::new();
    let mut scanner = DeviceScanner::new(config.scanner)?.on_discovered(|device| {
        tracing::info!(
            "Found {} at {}:{} ({}{})",
            device.protocol,
            device.host,
            device.port,
            device.display_name(),
            if device.verified { "" } else { ", unverified" }
        );
    });
    tracing::info!("Scanning {} addresses", scanner.total());

    let stop = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.cancel();
    });

    let devices = scanner.scan_all(&cancel).await;
    tracing::info!("Scan finished: {} controller(s)", devices.len());
    for device in &devices {
        if let Some(endpoint) = device.endpoint() {
            println!("{}", serde_json::to_string(&endpoint)?);
        }
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
