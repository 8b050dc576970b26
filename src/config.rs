use anyhow::{ensure, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::grid::{ClassLoads, GridTopology};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub plc: PlcConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default = "GridTopology::default_feeder")]
    pub grid: GridTopology,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub enable_cors: bool,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid server address")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Coil that takes the breaker command.
    #[serde(default)]
    pub breaker_coil: u16,
    /// Discrete input reporting the actual position. OpenPLC-style runtimes
    /// mirror the output coil instead, so this is optional.
    #[serde(default)]
    pub breaker_input: Option<u16>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_plc_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}
// Sized so a full poll, including the one allowed reconnect retry, stays
// inside a single 5 s cycle.
fn default_connect_timeout_ms() -> u64 {
    1_000
}
fn default_plc_request_timeout_ms() -> u64 {
    800
}

impl PlcConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid plc address")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub interval_seconds: u64,
    /// Consecutive poll failures before falling back to simulation.
    pub failure_threshold: u32,
    /// Consecutive fresh successes before trusting the live feed again.
    pub success_threshold: u32,
    /// Freshness window as a multiple of the cycle interval.
    pub freshness_factor: f64,
    /// Snapshots kept for short-term history.
    pub history_depth: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            failure_threshold: 3,
            success_threshold: 1,
            freshness_factor: 2.0,
            history_depth: 120,
        }
    }
}

impl CycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds.max(1) as f64 * self.freshness_factor)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Hard bound on load jitter, percent of the diurnal base.
    pub jitter_percent: f64,
    /// Share of total load covered by distributed generation.
    pub generation_share: f64,
    /// Expected network losses as a fraction of total load.
    pub loss_factor: f64,
    /// Flip the simulated breaker every N cycles; 0 disables.
    pub demo_toggle_cycles: u64,
    pub random_seed: Option<u64>,
    pub nominal_frequency_hz: f64,
    pub frequency_std_dev_hz: f64,
    pub base_loads: ClassLoads,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            jitter_percent: 10.0,
            generation_share: 0.15,
            loss_factor: 0.02,
            demo_toggle_cycles: 0,
            random_seed: None,
            nominal_frequency_hz: 50.0,
            frequency_std_dev_hz: 0.02,
            base_loads: ClassLoads::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("GRID_TWIN__").split("__"));
        let cfg: Config = figment.extract().context("configuration is invalid")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field checks. Failing any of these halts startup; nothing here
    /// is recoverable at runtime.
    pub fn validate(&self) -> Result<()> {
        let interval = self.cycle.interval();
        ensure!(
            self.plc.request_timeout() < interval,
            "plc request timeout ({:?}) must be shorter than the cycle interval ({:?})",
            self.plc.request_timeout(),
            interval
        );
        ensure!(
            self.plc.connect_timeout() < interval,
            "plc connect timeout ({:?}) must be shorter than the cycle interval ({:?})",
            self.plc.connect_timeout(),
            interval
        );
        ensure!(self.cycle.failure_threshold >= 1, "failure_threshold must be >= 1");
        ensure!(self.cycle.success_threshold >= 1, "success_threshold must be >= 1");
        ensure!(self.cycle.freshness_factor > 0.0, "freshness_factor must be positive");
        ensure!(self.cycle.history_depth >= 1, "history_depth must be >= 1");
        ensure!(
            (0.0..=100.0).contains(&self.simulation.jitter_percent),
            "jitter_percent must be within 0..=100"
        );
        ensure!(
            (0.0..=1.0).contains(&self.simulation.generation_share),
            "generation_share must be within 0..=1"
        );
        ensure!(self.simulation.loss_factor >= 0.0, "loss_factor must be >= 0");
        ensure!(
            self.simulation.nominal_frequency_hz > 0.0,
            "nominal_frequency_hz must be positive"
        );
        Ok(())
    }
}
