//! Pull API handlers and the wire shape consumed by dashboards.
//!
//! The snapshot carries the semantic fields; this module maps them into the
//! `plc_status` / `system_metrics` / `grid_data` layout operator frontends
//! expect, with per-line and per-bus entries keyed by element id.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    arbiter::Mode,
    snapshot::{GridSnapshot, PowerAggregate},
    twin::{AppState, BreakerCommand},
};

use super::error::ApiError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/grid", get(get_grid))
        .route("/history", get(get_history))
        .route("/breaker", post(set_breaker))
        .route("/stream", get(super::stream::ws_handler))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub plc_status: PlcStatusDto,
    pub system_metrics: SystemMetricsDto,
    pub grid_data: GridDataDto,
}

#[derive(Debug, Serialize)]
pub struct PlcStatusDto {
    pub connected: bool,
    /// true = breaker closed.
    pub breaker_state: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub connection_attempts: u64,
}

#[derive(Debug, Serialize)]
pub struct SystemMetricsDto {
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub total_cycles: u64,
    pub error_count: u64,
    pub cycles_per_minute: f64,
}

#[derive(Debug, Serialize)]
pub struct GridDataDto {
    pub timestamp: DateTime<Utc>,
    pub cycle_id: u64,
    pub mode: Mode,
    pub converged: bool,
    pub stale: bool,
    pub frequency_hz: f64,
    pub breaker_closed: bool,
    pub buses: BTreeMap<String, BusDto>,
    pub lines: BTreeMap<String, LineDto>,
    pub aggregate: PowerAggregate,
}

#[derive(Debug, Serialize)]
pub struct BusDto {
    pub voltage_kv: f64,
    pub voltage_pu: f64,
    pub energized: bool,
}

#[derive(Debug, Serialize)]
pub struct LineDto {
    pub power_flow: PowerFlowDto,
    pub loading_percent: f64,
    pub current_ka: f64,
    pub energized: bool,
}

#[derive(Debug, Serialize)]
pub struct PowerFlowDto {
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
}

/// Assemble the full status payload for one snapshot. Shared between the
/// pull endpoint and the push stream so both emit the same shape.
pub fn status_payload(state: &AppState, snapshot: &GridSnapshot) -> StatusResponse {
    let plc = state.plc_status.read().clone();
    let metrics = state.metrics.read().snapshot(Utc::now());

    StatusResponse {
        plc_status: PlcStatusDto {
            connected: plc.connected,
            breaker_state: snapshot.breaker.position.is_closed(),
            last_update: plc.last_success_at,
            connection_attempts: plc.connection_attempts,
        },
        system_metrics: SystemMetricsDto {
            uptime_seconds: metrics.uptime_seconds,
            uptime_formatted: metrics.uptime_formatted(),
            total_cycles: metrics.total_cycles,
            error_count: metrics.error_count,
            cycles_per_minute: metrics.cycles_per_minute,
        },
        grid_data: GridDataDto {
            timestamp: snapshot.timestamp,
            cycle_id: snapshot.cycle_id,
            mode: snapshot.mode,
            converged: snapshot.converged,
            stale: snapshot.stale,
            frequency_hz: snapshot.frequency_hz,
            breaker_closed: snapshot.breaker.position.is_closed(),
            buses: snapshot
                .buses
                .iter()
                .map(|b| {
                    (
                        b.bus.clone(),
                        BusDto {
                            voltage_kv: b.voltage_kv,
                            voltage_pu: b.voltage_pu,
                            energized: b.energized,
                        },
                    )
                })
                .collect(),
            lines: snapshot
                .lines
                .iter()
                .map(|l| {
                    (
                        l.line.clone(),
                        LineDto {
                            power_flow: PowerFlowDto {
                                p_from_mw: l.p_from_mw,
                                q_from_mvar: l.q_from_mvar,
                            },
                            loading_percent: l.loading_percent,
                            current_ka: l.current_ka,
                            energized: l.energized,
                        },
                    )
                })
                .collect(),
            aggregate: snapshot.aggregate,
        },
    }
}

pub async fn get_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.publisher.latest().ok_or(ApiError::NotReady)?;
    Ok(Json(status_payload(&state, &snapshot)))
}

pub async fn get_grid(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.publisher.latest().ok_or(ApiError::NotReady)?;
    Ok(Json((*snapshot).clone()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(60);
    let history: Vec<GridSnapshot> = state
        .publisher
        .history(limit)
        .iter()
        .map(|s| (**s).clone())
        .collect();
    Json(history)
}

#[derive(Debug, Deserialize)]
pub struct BreakerRequest {
    pub closed: bool,
}

pub async fn set_breaker(
    State(state): State<AppState>,
    Json(req): Json<BreakerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .commands
        .try_send(BreakerCommand { closed: req.closed })
        .map_err(|e| ApiError::EngineUnavailable(e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true, "closed": req.closed })),
    ))
}
