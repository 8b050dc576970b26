//! # Feeder Environment Simulation
//!
//! Synthesizes the quantities the PLC cannot report: per-class customer load,
//! distributed generation, grid import and system frequency. The breaker
//! position itself is only simulated when the live link is down; load and
//! generation figures are always synthesized, in either mode, because the
//! field controller reports nothing but the breaker state.

pub mod driver;
pub mod load;

pub use driver::SimulationDriver;
pub use load::diurnal_multiplier;
