//! Prints Bitstamp fills as they stream in.
//!
//! `fill-stream [SYMBOL...]` follows `btcusd` when no symbol is given.
//! Public mode (the default) prints every trade on the live trades channel.
//! With `BITSTAMP_STREAM_MODE=private` the stream only forwards fills of
//! orders registered with this process's observer. This binary places no
//! orders, so private mode only shows the wiring an application that places
//! orders through `BitstampRestClient` would use, and prints no fills.

use auth::ApiCredentials;
use bitstamp_rest::BitstampRestClient;
use common::Endpoints;
use connector_bitstamp::{spawn_fill_stream, StreamSession};
use connector_core::{StreamConfig, StreamMode};
use execution_core::{create_stream_observer, Fill, OrderObserver};
use metrics::create_metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Interval for periodic health status logging.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

fn stream_mode_from_env() -> StreamMode {
    match std::env::var("BITSTAMP_STREAM_MODE") {
        Ok(mode) if mode.eq_ignore_ascii_case("private") => StreamMode::Private,
        _ => StreamMode::Public,
    }
}

#[tokio::main]
async fn main() {
    common::init_logging();

    let symbols = std::env::args().skip(1).collect::<Vec<_>>();
    let symbols = if symbols.is_empty() {
        vec!["btcusd".to_string()]
    } else {
        symbols
    };

    let endpoints = Endpoints::from_env();
    let mode = stream_mode_from_env();
    info!(symbols = ?symbols, mode = ?mode, endpoints = %endpoints, "Starting fill stream");

    let observer = create_stream_observer();
    let metrics = create_metrics();

    let config = StreamConfig {
        symbols,
        mode,
        ..StreamConfig::for_endpoints(&endpoints)
    };
    let mut session = StreamSession::new(config, observer.clone(), metrics.clone());

    // Private channels need the REST client for stream tokens and order lookups
    let mut rest = None;
    if mode == StreamMode::Private {
        let credentials = match ApiCredentials::from_env() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "Private stream needs API credentials");
                std::process::exit(1);
            }
        };
        let client = match BitstampRestClient::with_endpoints(credentials, endpoints, observer.clone())
        {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!(error = %e, "Failed to build REST client");
                std::process::exit(1);
            }
        };
        session = session.with_token_provider(client.clone());
        rest = Some(client);
    }

    let stream = match spawn_fill_stream(session) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to start fill stream");
            std::process::exit(1);
        }
    };
    let (mut fills, stop) = stream.split();

    // Spawn ctrl_c handler
    let (done_tx, done_rx) = watch::channel(false);
    let mut stop_done_rx = done_tx.subscribe();
    let stop_handle = tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Received Ctrl+C, initiating shutdown");
                }
            }
            _ = stop_done_rx.wait_for(|done| *done) => {}
        }
        if let Err(e) = stop.stop().await {
            error!(error = %e, "Fill stream ended with error");
        }
    });

    // Spawn periodic health reporter
    let health_metrics = metrics.clone();
    let health_observer = observer.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
        let mut done_rx = done_rx;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    health_metrics.set_observed_orders(health_observer.len());
                    let snapshot = health_metrics.snapshot();
                    info!(
                        status = %snapshot.health_status(),
                        frames = snapshot.frames_received,
                        fills = snapshot.fills_forwarded,
                        filtered = snapshot.fills_filtered,
                        errors = snapshot.websocket_errors + snapshot.translation_errors,
                        reconnects = snapshot.reconnect_attempts,
                        observed = snapshot.observed_orders,
                        "Health check"
                    );
                }
                _ = done_rx.wait_for(|done| *done) => break,
            }
        }
    });

    while let Some(fill) = fills.recv().await {
        print_fill(&fill);

        if let Some(client) = &rest {
            forget_if_finished(client, &fill).await;
        }
    }

    info!("Fill channel closed, waiting for stream to finish");
    let _ = done_tx.send(true);
    let _ = stop_handle.await;

    println!("\n{}", metrics.snapshot());
    info!("Shutdown complete");
}

fn print_fill(fill: &Fill) {
    println!(
        "{} | {} | order {} | {} {} @ {} | fee: {}",
        fill.filled_at.format("%H:%M:%S%.6f"),
        fill.symbol,
        fill.order_id,
        fill.side,
        fill.size,
        fill.price,
        fill.fee
    );
}

/// Unregister an order once Bitstamp reports it finished or canceled.
async fn forget_if_finished(client: &BitstampRestClient, fill: &Fill) {
    let status = match client.get_order_status(fill.order_id).await {
        Ok(status) => status,
        Err(e) => {
            warn!(order_id = fill.order_id, error = %e, "Order status lookup failed");
            return;
        }
    };

    if status.order_status().is_some_and(|s| s.is_terminal()) {
        match client.observer().delete(fill.order_id) {
            Ok(()) => info!(order_id = fill.order_id, status = %status.status, "Order done, no longer observed"),
            Err(e) => warn!(order_id = fill.order_id, error = %e, "Failed to unregister order"),
        }
    }
}
