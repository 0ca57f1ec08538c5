//! switchboxd - connection-routing core of a switchbox relay.
//!
//! Multiplexes many lightweight client sessions onto one shared outbound
//! transport from a single network service, with per-session ring-buffer
//! backpressure. See `SPEC_FULL.md` for the full design.

mod config;
mod error;
mod metrics;
mod network;
mod root;
mod telemetry;

use crate::config::Config;
use crate::network::endpoint::{Endpoint, EndpointEvent};
use crate::root::Root;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("missing path after {flag}");
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "switchboxd.toml".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = Config::load(Path::new(&config_path)).map_err(|e| {
        eprintln!("ERROR: failed to load config from {config_path}: {e}");
        e
    })?;

    telemetry::init(config.server.log_format == config::LogFormat::Json);
    metrics::init();

    info!(relay = %config.server.name, endpoints = config.endpoints.len(), "starting switchboxd");

    let root = Root::new();

    let mut endpoint_handles = Vec::new();
    for endpoint_cfg in &config.endpoints {
        let endpoint = Endpoint::new(
            root.clone(),
            config.server.name.clone(),
            endpoint_cfg,
            &config.server.idle_timeouts,
        )
        .map_err(|e| anyhow::anyhow!("invalid endpoint config: {e}"))?
        .with_callback(Arc::new(|event: EndpointEvent| match event {
            EndpointEvent::Listening { label, addr } => {
                info!(endpoint = %label, %addr, "LISTENING");
            }
            EndpointEvent::Dropped { label, addr } => {
                warn!(endpoint = %label, %addr, "DROPPED");
            }
        }));

        let shutdown_rx = root.subscribe_shutdown();
        endpoint_handles.push(tokio::spawn(endpoint.run(shutdown_rx)));
    }

    if let Some(metrics_addr) = &config.metrics_address {
        let addr = metrics_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid metrics_address {metrics_addr:?}: {e}"))?;
        tokio::spawn(metrics::run_http_server(addr));
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    root.request_shutdown();

    for handle in endpoint_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "endpoint task panicked");
        }
    }

    // Best-effort grace period for connection workers to observe the
    // shutdown signal and unlink themselves.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while root.connection_count() > 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    info!("switchboxd stopped");
    Ok(())
}
