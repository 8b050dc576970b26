use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::info;

use crate::config::SimulationConfig;
use crate::grid::{ClassLoads, CustomerClass, SolveInput};
use crate::snapshot::BreakerPosition;

use super::load::diurnal_multiplier;

/// Synthesizes solver inputs and, when the live link is down, the breaker
/// position itself. The simulated position is sticky: it holds the last known
/// state (live reading or operator command) until something changes it.
pub struct SimulationDriver {
    cfg: SimulationConfig,
    rng: StdRng,
    breaker: BreakerPosition,
    cycles: u64,
}

impl SimulationDriver {
    pub fn new(cfg: SimulationConfig) -> Self {
        let rng = match cfg.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cfg,
            rng,
            breaker: BreakerPosition::Closed,
            cycles: 0,
        }
    }

    pub fn breaker_position(&self) -> BreakerPosition {
        self.breaker
    }

    /// Adopt a position observed live or commanded by an operator, so a later
    /// fallback to simulation continues from the last known state.
    pub fn set_breaker(&mut self, position: BreakerPosition) {
        self.breaker = position;
    }

    /// Called once per cycle. Drives the optional demo toggle that flips the
    /// simulated breaker every N cycles, as the original operator demo did.
    pub fn advance_cycle(&mut self) {
        self.cycles += 1;
        let toggle = self.cfg.demo_toggle_cycles;
        if toggle > 0 && self.cycles % toggle == 0 {
            self.breaker = match self.breaker {
                BreakerPosition::Open => BreakerPosition::Closed,
                BreakerPosition::Closed => BreakerPosition::Open,
            };
            info!(position = ?self.breaker, "demo toggle flipped simulated breaker");
        }
    }

    /// Build the cycle's solver input: diurnal base per class with bounded
    /// jitter, generation and import sized to roughly balance load plus
    /// losses. Nothing physically required ever goes negative.
    pub fn solve_input(&mut self, breaker: BreakerPosition, at: DateTime<Utc>) -> SolveInput {
        let hour = at.hour() as f64 + at.minute() as f64 / 60.0;

        let class_loads_mw = ClassLoads {
            industrial_mw: self.class_load_mw(CustomerClass::Industrial, hour),
            commercial_mw: self.class_load_mw(CustomerClass::Commercial, hour),
            residential_mw: self.class_load_mw(CustomerClass::Residential, hour),
        };

        let total = class_loads_mw.total_mw();
        let generation_mw = (self.cfg.generation_share * total).max(0.0);
        let import_mw = (total * (1.0 + self.cfg.loss_factor) - generation_mw).max(0.0);

        SolveInput {
            breaker,
            class_loads_mw,
            generation_mw,
            import_mw,
        }
    }

    /// Nominal frequency with bounded noise, clamped to a plausible band.
    pub fn frequency_hz(&mut self) -> f64 {
        let nominal = self.cfg.nominal_frequency_hz;
        let noise = Normal::new(0.0, self.cfg.frequency_std_dev_hz)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0);
        (nominal + noise).clamp(nominal - 0.2, nominal + 0.2)
    }

    fn class_load_mw(&mut self, class: CustomerClass, hour: f64) -> f64 {
        let base = self.cfg.base_loads.get(class);
        let bound = self.cfg.jitter_percent / 100.0;
        // Two-sigma bound, then hard clamp: jitter never exceeds the
        // configured percentage.
        let jitter = Normal::new(0.0, bound / 2.0)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0)
            .clamp(-bound, bound);
        (base * diurnal_multiplier(class, hour) * (1.0 + jitter)).max(0.0)
    }
}
