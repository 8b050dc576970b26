//! Arbitration between the live PLC feed and the simulation.
//!
//! A two-state machine with hysteresis in both directions so a single
//! transient read error (or a single lucky read while the link is bad) does
//! not flap the published mode.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::Display;
use tracing::info;

/// Which source currently supplies the breaker position used by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    Live,
    Simulated,
}

pub struct ModeArbiter {
    mode: Mode,
    consecutive_failures: u32,
    consecutive_successes: u32,
    failure_threshold: u32,
    success_threshold: u32,
    freshness: Duration,
}

impl ModeArbiter {
    /// Starts in `Simulated` until the first poll completes.
    pub fn new(failure_threshold: u32, success_threshold: u32, freshness: Duration) -> Self {
        Self {
            mode: Mode::Simulated,
            consecutive_failures: 0,
            consecutive_successes: 0,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            freshness,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// A poll succeeded with a reading taken at `observed_at`. Stale readings
    /// (older than the freshness window) break the consecutive-fresh chain but
    /// never count toward a switch to live.
    pub fn record_success(&mut self, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> Mode {
        self.consecutive_failures = 0;

        let fresh = now - observed_at
            <= ChronoDuration::from_std(self.freshness).unwrap_or(ChronoDuration::zero());
        if !fresh {
            self.consecutive_successes = 0;
            return self.mode;
        }

        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        if self.mode == Mode::Simulated && self.consecutive_successes >= self.success_threshold {
            info!(
                successes = self.consecutive_successes,
                "plc link healthy, switching to live mode"
            );
            self.mode = Mode::Live;
        }
        self.mode
    }

    /// A poll failed.
    pub fn record_failure(&mut self) -> Mode {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.mode == Mode::Live && self.consecutive_failures >= self.failure_threshold {
            info!(
                failures = self.consecutive_failures,
                "plc link lost, falling back to simulated mode"
            );
            self.mode = Mode::Simulated;
        }
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // Defaults under test: 3 consecutive failures to leave live mode, 1 fresh
    // success to enter it, freshness window of 10 s (2x a 5 s cycle).
    const FRESHNESS: Duration = Duration::from_secs(10);

    fn arbiter() -> ModeArbiter {
        ModeArbiter::new(3, 1, FRESHNESS)
    }

    fn live_arbiter() -> ModeArbiter {
        let mut a = arbiter();
        a.record_success(Utc::now(), Utc::now());
        assert_eq!(a.mode(), Mode::Live);
        a
    }

    #[test]
    fn starts_simulated() {
        assert_eq!(arbiter().mode(), Mode::Simulated);
    }

    #[test]
    fn single_fresh_success_goes_live() {
        let mut a = arbiter();
        let now = Utc::now();
        assert_eq!(a.record_success(now, now), Mode::Live);
    }

    #[test]
    fn stale_success_does_not_go_live() {
        let mut a = arbiter();
        let now = Utc::now();
        let stale = now - ChronoDuration::seconds(30);
        assert_eq!(a.record_success(stale, now), Mode::Simulated);
    }

    #[rstest]
    #[case(1, Mode::Live)]
    #[case(2, Mode::Live)]
    #[case(3, Mode::Simulated)]
    fn falls_back_after_exactly_three_failures(#[case] failures: u32, #[case] expected: Mode) {
        let mut a = live_arbiter();
        let mut mode = a.mode();
        for _ in 0..failures {
            mode = a.record_failure();
        }
        assert_eq!(mode, expected);
    }

    #[test]
    fn alternating_below_threshold_never_flaps() {
        let mut a = live_arbiter();
        let now = Utc::now();
        for _ in 0..20 {
            a.record_failure();
            a.record_failure();
            assert_eq!(a.mode(), Mode::Live);
            a.record_success(now, now);
            assert_eq!(a.mode(), Mode::Live);
        }
    }

    #[test]
    fn success_hysteresis_requires_consecutive_fresh_reads() {
        let mut a = ModeArbiter::new(3, 2, FRESHNESS);
        let now = Utc::now();
        assert_eq!(a.record_success(now, now), Mode::Simulated);
        a.record_failure();
        assert_eq!(a.record_success(now, now), Mode::Simulated);
        assert_eq!(a.record_success(now, now), Mode::Live);
    }

    #[test]
    fn stale_read_breaks_success_chain() {
        let mut a = ModeArbiter::new(3, 2, FRESHNESS);
        let now = Utc::now();
        a.record_success(now, now);
        a.record_success(now - ChronoDuration::seconds(30), now);
        // Chain broken; one more fresh read is not enough.
        assert_eq!(a.record_success(now, now), Mode::Simulated);
        assert_eq!(a.record_success(now, now), Mode::Live);
    }
}
