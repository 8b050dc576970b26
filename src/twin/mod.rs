//! The cycle engine and the shared application state.
//!
//! The engine owns every mutable component — PLC client, arbiter, simulation
//! driver, grid model, metrics — and runs the fixed-period pipeline to
//! completion each tick; cycles never overlap. Everything the API layer needs
//! is exposed through `AppState` as read views plus a command channel; there
//! is no ambient global state anywhere.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::arbiter::{Mode, ModeArbiter};
use crate::config::Config;
use crate::grid::GridModel;
use crate::metrics::MetricsAggregator;
use crate::plc::{PlcClient, PlcSessionStatus};
use crate::publisher::SnapshotPublisher;
use crate::simulation::SimulationDriver;
use crate::snapshot::{
    BreakerPosition, BreakerState, BusResult, GridSnapshot, LineResult, PowerAggregate,
};

/// Operator request to move the breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerCommand {
    pub closed: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub publisher: Arc<SnapshotPublisher>,
    pub metrics: Arc<RwLock<MetricsAggregator>>,
    pub plc_status: Arc<RwLock<PlcSessionStatus>>,
    pub commands: mpsc::Sender<BreakerCommand>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire up the full component set. Topology problems surface here, before
    /// the cycle loop ever starts.
    pub fn new(cfg: Config) -> Result<(Self, TwinEngine)> {
        let model = GridModel::new(cfg.grid.clone())?;
        let plc = PlcClient::new(cfg.plc.clone());
        let plc_status = plc.status_handle();

        let shutdown = CancellationToken::new();
        let publisher = Arc::new(SnapshotPublisher::new(
            cfg.cycle.history_depth,
            shutdown.child_token(),
        ));
        let metrics = Arc::new(RwLock::new(MetricsAggregator::new(Utc::now())));
        let (commands_tx, commands_rx) = mpsc::channel(8);

        let arbiter = ModeArbiter::new(
            cfg.cycle.failure_threshold,
            cfg.cycle.success_threshold,
            cfg.cycle.freshness_window(),
        );
        let sim = SimulationDriver::new(cfg.simulation.clone());

        let state = AppState {
            cfg: cfg.clone(),
            publisher: publisher.clone(),
            metrics: metrics.clone(),
            plc_status,
            commands: commands_tx,
            shutdown: shutdown.clone(),
        };
        let engine = TwinEngine {
            interval: cfg.cycle.interval(),
            plc,
            arbiter,
            sim,
            model,
            publisher,
            metrics,
            commands: commands_rx,
            shutdown,
            cycle_id: 0,
            prev: None,
            last_live: None,
        };
        Ok((state, engine))
    }
}

pub fn spawn_engine(engine: TwinEngine) -> tokio::task::JoinHandle<()> {
    tokio::spawn(engine.run())
}

pub struct TwinEngine {
    interval: Duration,
    plc: PlcClient,
    arbiter: ModeArbiter,
    sim: SimulationDriver,
    model: GridModel,
    publisher: Arc<SnapshotPublisher>,
    metrics: Arc<RwLock<MetricsAggregator>>,
    commands: mpsc::Receiver<BreakerCommand>,
    shutdown: CancellationToken,
    cycle_id: u64,
    prev: Option<GridSnapshot>,
    last_live: Option<(BreakerPosition, DateTime<Utc>)>,
}

impl TwinEngine {
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "cycle engine started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(cmd) = self.commands.recv() => self.handle_command(cmd).await,
                _ = interval.tick() => self.step().await,
            }
        }

        self.plc.close();
        self.publisher.close();
        info!("cycle engine stopped");
    }

    /// One full cycle: poll, arbitrate, synthesize, solve, account, publish.
    /// Nothing in here aborts the loop; every cycle ends with exactly one
    /// finite published snapshot.
    pub async fn step(&mut self) {
        let now = Utc::now();
        let mut cycle_error = false;

        let mode = match self.plc.read_breaker().await {
            Ok(closed) => {
                let position = BreakerPosition::from_closed(closed);
                self.last_live = Some((position, now));
                // Keep the simulated state tracking reality so a later
                // fallback continues from the last known position.
                self.sim.set_breaker(position);
                self.arbiter.record_success(now, now)
            }
            Err(e) => {
                warn!(error = %e, "plc poll failed");
                cycle_error = true;
                self.arbiter.record_failure()
            }
        };

        self.sim.advance_cycle();
        let breaker = match (mode, self.last_live) {
            (Mode::Live, Some((position, observed_at))) => BreakerState {
                position,
                source: Mode::Live,
                observed_at,
            },
            _ => BreakerState {
                position: self.sim.breaker_position(),
                source: Mode::Simulated,
                observed_at: now,
            },
        };

        let input = self.sim.solve_input(breaker.position, now);
        let frequency_hz = self.sim.frequency_hz();
        self.cycle_id += 1;

        let snapshot = match self.model.solve(&input) {
            Ok(result) => GridSnapshot {
                cycle_id: self.cycle_id,
                timestamp: now,
                frequency_hz,
                breaker,
                buses: result
                    .buses
                    .into_iter()
                    .map(|b| BusResult {
                        bus: b.bus,
                        voltage_kv: b.voltage_kv,
                        voltage_pu: b.voltage_pu,
                        energized: b.energized,
                    })
                    .collect(),
                lines: result
                    .branches
                    .into_iter()
                    .map(|b| LineResult {
                        line: b.branch,
                        p_from_mw: b.p_from_mw,
                        q_from_mvar: b.q_from_mvar,
                        loading_percent: b.loading_percent,
                        current_ka: b.current_ka,
                        energized: b.energized,
                    })
                    .collect(),
                aggregate: result.aggregate,
                mode,
                converged: true,
                stale: false,
            },
            Err(e) => {
                warn!(error = %e, cycle = self.cycle_id, "solve failed, carrying last valid values");
                cycle_error = true;
                self.carry_forward(now, frequency_hz, breaker, mode)
            }
        };

        let snapshot = snapshot.sanitize(self.prev.as_ref());

        {
            let mut metrics = self.metrics.write();
            metrics.record_cycle(now);
            if cycle_error {
                metrics.record_error();
            }
        }
        self.publisher.publish(snapshot.clone());
        self.prev = Some(snapshot);
    }

    /// Snapshot for a cycle whose solve produced no result: previous values
    /// where they exist, de-energized zeros on the very first cycle.
    fn carry_forward(
        &self,
        now: DateTime<Utc>,
        frequency_hz: f64,
        breaker: BreakerState,
        mode: Mode,
    ) -> GridSnapshot {
        let (buses, lines, aggregate) = match &self.prev {
            Some(prev) => (prev.buses.clone(), prev.lines.clone(), prev.aggregate),
            None => {
                let topo = self.model.topology();
                let buses = topo
                    .buses
                    .iter()
                    .map(|b| BusResult {
                        bus: b.id.clone(),
                        voltage_kv: 0.0,
                        voltage_pu: 0.0,
                        energized: false,
                    })
                    .collect();
                let lines = topo
                    .branches
                    .iter()
                    .map(|b| LineResult {
                        line: b.id.clone(),
                        p_from_mw: 0.0,
                        q_from_mvar: 0.0,
                        loading_percent: 0.0,
                        current_ka: 0.0,
                        energized: false,
                    })
                    .collect();
                (buses, lines, PowerAggregate::ZERO)
            }
        };
        GridSnapshot {
            cycle_id: self.cycle_id,
            timestamp: now,
            frequency_hz,
            breaker,
            buses,
            lines,
            aggregate,
            mode,
            converged: false,
            stale: true,
        }
    }

    async fn handle_command(&mut self, cmd: BreakerCommand) {
        info!(closed = cmd.closed, mode = %self.arbiter.mode(), "breaker command received");
        if self.arbiter.mode() == Mode::Live {
            if let Err(e) = self.plc.write_breaker(cmd.closed).await {
                warn!(error = %e, "breaker command write failed");
                self.metrics.write().record_error();
                return;
            }
        }
        self.sim.set_breaker(BreakerPosition::from_closed(cmd.closed));
    }
}
