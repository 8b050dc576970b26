//! Cycle and error accounting.
//!
//! Counters only move forward and are written by exactly one owner, the cycle
//! engine; everyone else reads a copied-out `SystemMetrics`. The per-minute
//! rate comes from a sliding window of recent cycle timestamps so it reflects
//! the current cadence rather than the lifetime average.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const RATE_WINDOW_SECONDS: i64 = 60;

pub struct MetricsAggregator {
    started_at: DateTime<Utc>,
    total_cycles: u64,
    error_count: u64,
    window: VecDeque<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub started_at: DateTime<Utc>,
    pub total_cycles: u64,
    pub error_count: u64,
    pub uptime_seconds: u64,
    pub cycles_per_minute: f64,
}

impl SystemMetrics {
    /// `H:MM:SS`, matching the operator-facing uptime string.
    pub fn uptime_formatted(&self) -> String {
        let s = self.uptime_seconds;
        format!("{}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
    }
}

impl MetricsAggregator {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_cycles: 0,
            error_count: 0,
            window: VecDeque::new(),
        }
    }

    /// One successfully published snapshot.
    pub fn record_cycle(&mut self, at: DateTime<Utc>) {
        self.total_cycles += 1;
        self.window.push_back(at);
        let cutoff = at - ChronoDuration::seconds(RATE_WINDOW_SECONDS);
        while self.window.front().is_some_and(|t| *t < cutoff) {
            self.window.pop_front();
        }
    }

    /// One cycle that observed a solve divergence or a protocol failure.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SystemMetrics {
        SystemMetrics {
            started_at: self.started_at,
            total_cycles: self.total_cycles,
            error_count: self.error_count,
            uptime_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            cycles_per_minute: self.rate_per_minute(),
        }
    }

    /// Rate from the spacing of the windowed timestamps. Needs two cycles to
    /// say anything; converges as soon as the cadence is established.
    fn rate_per_minute(&self) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }
        let first = *self.window.front().unwrap();
        let last = *self.window.back().unwrap();
        let span = (last - first).num_milliseconds() as f64 / 1000.0;
        if span <= 0.0 {
            return 0.0;
        }
        (self.window.len() - 1) as f64 * 60.0 / span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 16, 8, 0, 0).unwrap()
    }

    #[test]
    fn counters_are_monotonic() {
        let mut m = MetricsAggregator::new(t0());
        for i in 0..10 {
            m.record_cycle(t0() + ChronoDuration::seconds(i * 5));
        }
        m.record_error();
        let snap = m.snapshot(t0() + ChronoDuration::seconds(50));
        assert_eq!(snap.total_cycles, 10);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.uptime_seconds, 50);
    }

    #[test]
    fn rate_converges_to_twelve_per_minute_at_five_second_cadence() {
        let mut m = MetricsAggregator::new(t0());
        // Warm-up: a couple of cycles are enough for the interval estimate.
        for i in 0..24 {
            m.record_cycle(t0() + ChronoDuration::seconds(i * 5));
        }
        let snap = m.snapshot(t0() + ChronoDuration::seconds(24 * 5));
        assert!((snap.cycles_per_minute - 12.0).abs() < 0.5, "{}", snap.cycles_per_minute);
    }

    #[test]
    fn rate_reflects_current_cadence_not_lifetime_average() {
        let mut m = MetricsAggregator::new(t0());
        // A long stall, then a steady 5 s cadence: the stall must age out.
        m.record_cycle(t0());
        let resume = t0() + ChronoDuration::seconds(600);
        for i in 0..20 {
            m.record_cycle(resume + ChronoDuration::seconds(i * 5));
        }
        let snap = m.snapshot(resume + ChronoDuration::seconds(100));
        assert!((snap.cycles_per_minute - 12.0).abs() < 0.5, "{}", snap.cycles_per_minute);
    }

    #[test]
    fn rate_is_zero_before_two_cycles() {
        let mut m = MetricsAggregator::new(t0());
        assert_eq!(m.snapshot(t0()).cycles_per_minute, 0.0);
        m.record_cycle(t0());
        assert_eq!(m.snapshot(t0()).cycles_per_minute, 0.0);
    }

    #[test]
    fn uptime_formatting() {
        let m = MetricsAggregator::new(t0());
        let snap = m.snapshot(t0() + ChronoDuration::seconds(3_725));
        assert_eq!(snap.uptime_formatted(), "1:02:05");
    }
}
