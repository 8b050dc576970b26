use serde::{Deserialize, Serialize};

use crate::snapshot::BreakerPosition;

use super::topology::CustomerClass;

/// Active power per customer class in MW.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassLoads {
    pub industrial_mw: f64,
    pub commercial_mw: f64,
    pub residential_mw: f64,
}

impl ClassLoads {
    pub fn get(&self, class: CustomerClass) -> f64 {
        match class {
            CustomerClass::Industrial => self.industrial_mw,
            CustomerClass::Commercial => self.commercial_mw,
            CustomerClass::Residential => self.residential_mw,
        }
    }

    pub fn total_mw(&self) -> f64 {
        self.industrial_mw + self.commercial_mw + self.residential_mw
    }
}

impl Default for ClassLoads {
    fn default() -> Self {
        Self {
            industrial_mw: 0.60,
            commercial_mw: 0.35,
            residential_mw: 0.25,
        }
    }
}

/// One cycle's worth of solver input. Built fresh each cycle, consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveInput {
    pub breaker: BreakerPosition,
    pub class_loads_mw: ClassLoads,
    /// Distributed generation injected at the topology's generation bus.
    pub generation_mw: f64,
    /// Expected grid import from the balance estimate. The solved import is
    /// what the slack bus actually supplies; this field is bookkeeping.
    pub import_mw: f64,
}
