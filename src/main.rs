use anyhow::{Context, Result};
use axum::Router;
use grid_twin::{api, config::Config, telemetry, twin};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = Config::load().context("startup aborted: configuration error")?;

    let (state, engine) = twin::AppState::new(cfg.clone())
        .context("startup aborted: invalid grid topology")?;

    let app: Router = api::router(state.clone(), &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!(
            "server binding to 0.0.0.0 - the telemetry API will be reachable from the network; \
            bind to 127.0.0.1 unless a reverse proxy fronts it"
        );
    }

    info!(%addr, plc = %format!("{}:{}", cfg.plc.host, cfg.plc.port), "starting grid twin");

    let engine_handle = twin::spawn_engine(engine);

    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            telemetry::shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    // The engine stops within one cycle plus one protocol timeout: the
    // in-flight poll is bounded by its own deadline.
    let bound = cfg.cycle.interval() + cfg.plc.request_timeout();
    if tokio::time::timeout(bound, engine_handle).await.is_err() {
        warn!("cycle engine did not stop within {:?}", bound);
    }

    warn!("shutdown complete");
    Ok(())
}
