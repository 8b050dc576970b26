//! The immutable per-cycle telemetry snapshot.
//!
//! One `GridSnapshot` is built per cycle and is the only object that crosses
//! component and thread boundaries. Readers get it behind an `Arc`; nothing is
//! ever mutated after publication. Every numeric field of a published snapshot
//! is finite: `sanitize` backfills any non-finite value from the previous
//! cycle and flags the snapshot instead of letting a NaN escape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arbiter::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerPosition {
    Open,
    Closed,
}

impl BreakerPosition {
    pub fn from_closed(closed: bool) -> Self {
        if closed {
            BreakerPosition::Closed
        } else {
            BreakerPosition::Open
        }
    }

    pub fn is_closed(self) -> bool {
        self == BreakerPosition::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub position: BreakerPosition,
    pub source: Mode,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub bus: String,
    pub voltage_kv: f64,
    pub voltage_pu: f64,
    /// De-energized buses report 0.0 pu with this flag cleared, never NaN.
    pub energized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResult {
    pub line: String,
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub loading_percent: f64,
    pub current_ka: f64,
    pub energized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerAggregate {
    pub total_load_mw: f64,
    pub total_generation_mw: f64,
    pub grid_import_mw: f64,
    pub losses_mw: f64,
}

impl PowerAggregate {
    pub const ZERO: PowerAggregate = PowerAggregate {
        total_load_mw: 0.0,
        total_generation_mw: 0.0,
        grid_import_mw: 0.0,
        losses_mw: 0.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Monotonic, starts at 1.
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub frequency_hz: f64,
    pub breaker: BreakerState,
    pub buses: Vec<BusResult>,
    pub lines: Vec<LineResult>,
    pub aggregate: PowerAggregate,
    pub mode: Mode,
    pub converged: bool,
    /// Set when any field had to be carried over from the previous cycle.
    pub stale: bool,
}

impl GridSnapshot {
    pub fn all_finite(&self) -> bool {
        let mut values = vec![self.frequency_hz];
        for b in &self.buses {
            values.push(b.voltage_kv);
            values.push(b.voltage_pu);
        }
        for l in &self.lines {
            values.extend([l.p_from_mw, l.q_from_mvar, l.loading_percent, l.current_ka]);
        }
        values.extend([
            self.aggregate.total_load_mw,
            self.aggregate.total_generation_mw,
            self.aggregate.grid_import_mw,
            self.aggregate.losses_mw,
        ]);
        values.iter().all(|v| v.is_finite())
    }

    /// Replace every non-finite numeric field with the previous cycle's value
    /// for the same bus/line (0.0 when there is no previous cycle) and flag
    /// the snapshot as stale. Finite snapshots pass through untouched.
    pub fn sanitize(mut self, prev: Option<&GridSnapshot>) -> GridSnapshot {
        if self.all_finite() {
            return self;
        }

        let mut patched = false;
        let mut patch = |value: &mut f64, fallback: f64| {
            if !value.is_finite() {
                *value = if fallback.is_finite() { fallback } else { 0.0 };
                patched = true;
            }
        };

        let prev_freq = prev.map(|p| p.frequency_hz).unwrap_or(0.0);
        patch(&mut self.frequency_hz, prev_freq);

        for bus in &mut self.buses {
            let old = prev.and_then(|p| p.buses.iter().find(|b| b.bus == bus.bus));
            patch(&mut bus.voltage_kv, old.map(|b| b.voltage_kv).unwrap_or(0.0));
            patch(&mut bus.voltage_pu, old.map(|b| b.voltage_pu).unwrap_or(0.0));
        }
        for line in &mut self.lines {
            let old = prev.and_then(|p| p.lines.iter().find(|l| l.line == line.line));
            patch(&mut line.p_from_mw, old.map(|l| l.p_from_mw).unwrap_or(0.0));
            patch(&mut line.q_from_mvar, old.map(|l| l.q_from_mvar).unwrap_or(0.0));
            patch(
                &mut line.loading_percent,
                old.map(|l| l.loading_percent).unwrap_or(0.0),
            );
            patch(&mut line.current_ka, old.map(|l| l.current_ka).unwrap_or(0.0));
        }

        let prev_agg = prev.map(|p| p.aggregate).unwrap_or(PowerAggregate::ZERO);
        patch(&mut self.aggregate.total_load_mw, prev_agg.total_load_mw);
        patch(
            &mut self.aggregate.total_generation_mw,
            prev_agg.total_generation_mw,
        );
        patch(&mut self.aggregate.grid_import_mw, prev_agg.grid_import_mw);
        patch(&mut self.aggregate.losses_mw, prev_agg.losses_mw);

        if patched {
            self.stale = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snapshot_with(freq: f64, p_mw: f64, voltage_pu: f64) -> GridSnapshot {
        GridSnapshot {
            cycle_id: 1,
            timestamp: Utc::now(),
            frequency_hz: freq,
            breaker: BreakerState {
                position: BreakerPosition::Closed,
                source: Mode::Simulated,
                observed_at: Utc::now(),
            },
            buses: vec![BusResult {
                bus: "load_center".into(),
                voltage_kv: voltage_pu * 11.0,
                voltage_pu,
                energized: true,
            }],
            lines: vec![LineResult {
                line: "feeder_line".into(),
                p_from_mw: p_mw,
                q_from_mvar: 0.4,
                loading_percent: 47.0,
                current_ka: 0.066,
                energized: true,
            }],
            aggregate: PowerAggregate {
                total_load_mw: p_mw,
                total_generation_mw: 0.18,
                grid_import_mw: 1.05,
                losses_mw: 0.02,
            },
            mode: Mode::Simulated,
            converged: true,
            stale: false,
        }
    }

    #[test]
    fn finite_snapshot_passes_through() {
        let snap = snapshot_with(50.0, 1.2, 0.99);
        let out = snap.clone().sanitize(None);
        assert_eq!(out, snap);
        assert!(!out.stale);
    }

    #[test]
    fn nan_is_backfilled_from_previous_cycle() {
        let prev = snapshot_with(50.0, 1.2, 0.99);
        let out = snapshot_with(f64::NAN, f64::INFINITY, 0.98).sanitize(Some(&prev));
        assert!(out.all_finite());
        assert!(out.stale);
        assert_eq!(out.frequency_hz, 50.0);
        assert_eq!(out.lines[0].p_from_mw, 1.2);
        // The finite field keeps its fresh value.
        assert_eq!(out.buses[0].voltage_pu, 0.98);
    }

    #[test]
    fn nan_without_history_falls_back_to_zero() {
        let out = snapshot_with(f64::NAN, f64::NEG_INFINITY, f64::NAN).sanitize(None);
        assert!(out.all_finite());
        assert!(out.stale);
        assert_eq!(out.frequency_hz, 0.0);
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let snap = snapshot_with(49.98, 1.21, 0.987);
        let json = serde_json::to_string(&snap).unwrap();
        let back: GridSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    proptest! {
        // Whatever garbage the solver path produces, a sanitized snapshot is
        // always fully finite.
        #[test]
        fn sanitized_snapshots_are_always_finite(
            freq in prop::num::f64::ANY,
            p_mw in prop::num::f64::ANY,
            v_pu in prop::num::f64::ANY,
        ) {
            let prev = snapshot_with(50.0, 1.2, 0.99);
            let out = snapshot_with(freq, p_mw, v_pu).sanitize(Some(&prev));
            prop_assert!(out.all_finite());
        }
    }
}
