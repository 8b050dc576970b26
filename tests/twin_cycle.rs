mod common;

use common::MockPlcServer;
use figment::{providers::Serialized, Figment};
use grid_twin::api::v1::status_payload;
use grid_twin::arbiter::Mode;
use grid_twin::config::Config;
use grid_twin::snapshot::{BreakerPosition, GridSnapshot};
use grid_twin::twin::AppState;

fn config_for(plc: std::net::SocketAddr) -> Config {
    Figment::new()
        .merge(Serialized::defaults(serde_json::json!({
            "server": { "host": "127.0.0.1", "port": 0 },
            "plc": {
                "host": plc.ip().to_string(),
                "port": plc.port(),
                "connect_timeout_ms": 300,
                "request_timeout_ms": 300,
            },
            "simulation": { "random_seed": 42 },
        })))
        .extract()
        .unwrap()
}

fn dead_plc_config() -> Config {
    // Nothing listens on port 1; connects fail immediately.
    config_for("127.0.0.1:1".parse().unwrap())
}

#[tokio::test]
async fn first_cycle_publishes_a_finite_simulated_snapshot() {
    let (state, mut engine) = AppState::new(dead_plc_config()).unwrap();
    assert!(state.publisher.latest().is_none());

    engine.step().await;

    let snapshot = state.publisher.latest().expect("one snapshot per cycle");
    assert_eq!(snapshot.cycle_id, 1);
    assert_eq!(snapshot.mode, Mode::Simulated);
    assert_eq!(snapshot.breaker.source, Mode::Simulated);
    assert_eq!(snapshot.breaker.position, BreakerPosition::Closed);
    assert!(snapshot.converged);
    assert!(snapshot.all_finite());

    let metrics = state.metrics.read().snapshot(chrono::Utc::now());
    assert_eq!(metrics.total_cycles, 1);
    assert_eq!(metrics.error_count, 1);
}

#[tokio::test]
async fn every_cycle_publishes_exactly_one_snapshot() {
    let (state, mut engine) = AppState::new(dead_plc_config()).unwrap();
    for _ in 0..5 {
        engine.step().await;
    }
    let history = state.publisher.history(10);
    let ids: Vec<u64> = history.iter().map(|s| s.cycle_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(history.iter().all(|s| s.all_finite()));
}

#[tokio::test]
async fn one_fresh_success_switches_to_live() {
    let server = MockPlcServer::spawn().await;
    server.set_coil(0, true).await;

    let (state, mut engine) = AppState::new(config_for(server.addr)).unwrap();
    engine.step().await;

    let snapshot = state.publisher.latest().unwrap();
    assert_eq!(snapshot.mode, Mode::Live);
    assert_eq!(snapshot.breaker.source, Mode::Live);
    assert_eq!(snapshot.breaker.position, BreakerPosition::Closed);
    assert!(state.plc_status.read().connected);

    let payload = serde_json::to_value(status_payload(&state, &snapshot)).unwrap();
    assert_eq!(payload["plc_status"]["connected"], true);
    assert_eq!(payload["plc_status"]["breaker_state"], true);
    assert_eq!(payload["grid_data"]["mode"], "live");
}

#[tokio::test]
async fn opening_the_breaker_propagates_within_one_cycle() {
    let server = MockPlcServer::spawn().await;
    server.set_coil(0, true).await;

    let (state, mut engine) = AppState::new(config_for(server.addr)).unwrap();
    engine.step().await;

    let closed = state.publisher.latest().unwrap();
    let feeder = closed.lines.iter().find(|l| l.line == "feeder_line").unwrap();
    assert!(feeder.p_from_mw > 0.0);
    assert!(feeder.loading_percent > 0.0 && feeder.loading_percent < 100.0);

    server.set_coil(0, false).await;
    engine.step().await;

    let open = state.publisher.latest().unwrap();
    assert_eq!(open.breaker.position, BreakerPosition::Open);
    let feeder = open.lines.iter().find(|l| l.line == "feeder_line").unwrap();
    assert_eq!(feeder.p_from_mw, 0.0);
    assert_eq!(feeder.current_ka, 0.0);
    let load_bus = open.buses.iter().find(|b| b.bus == "load_center").unwrap();
    assert!(!load_bus.energized);
    assert_eq!(load_bus.voltage_pu, 0.0);
    assert!(open.all_finite());
}

#[tokio::test]
async fn falls_back_to_simulation_after_three_failed_polls() {
    let server = MockPlcServer::spawn().await;
    server.set_coil(0, true).await;

    let (state, mut engine) = AppState::new(config_for(server.addr)).unwrap();
    engine.step().await;
    assert_eq!(state.publisher.latest().unwrap().mode, Mode::Live);

    server.set_stall(true).await;

    let mut modes = Vec::new();
    for _ in 0..3 {
        engine.step().await;
        modes.push(state.publisher.latest().unwrap().mode);
    }
    // Hysteresis holds for the first two failures, the third one flips.
    assert_eq!(modes, vec![Mode::Live, Mode::Live, Mode::Simulated]);

    // The simulated breaker continues from the last live position.
    let snapshot = state.publisher.latest().unwrap();
    assert_eq!(snapshot.breaker.position, BreakerPosition::Closed);
    assert_eq!(snapshot.breaker.source, Mode::Simulated);

    let metrics = state.metrics.read().snapshot(chrono::Utc::now());
    assert_eq!(metrics.error_count, 3);
    assert_eq!(metrics.total_cycles, 4);
}

#[tokio::test]
async fn snapshot_survives_a_json_round_trip() {
    let (state, mut engine) = AppState::new(dead_plc_config()).unwrap();
    engine.step().await;

    let snapshot = state.publisher.latest().unwrap();
    let json = serde_json::to_string(&*snapshot).unwrap();
    let back: GridSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, *snapshot);
}
