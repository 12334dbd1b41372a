//! Metrics aggregation.
//!
//! One `MetricsBundle` per run: four timers (selects, mutations,
//! deletions, populate) and one error meter. Timers record latencies in
//! nanoseconds into per-thread histogram stripes to keep contention off
//! the hot path; snapshots merge the stripes and report microseconds.
//! Meters expose the total count plus 1/5/15-minute exponentially
//! weighted rates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Kind of a dispatched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Select,
    Mutation,
    Delete,
    Populate,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpKind::Select => "select",
            OpKind::Mutation => "mutation",
            OpKind::Delete => "delete",
            OpKind::Populate => "populate",
        };
        write!(f, "{}", name)
    }
}

const TICK_INTERVAL_SECS: u64 = 5;
const TICK_INTERVAL_NANOS: u64 = TICK_INTERVAL_SECS * 1_000_000_000;

/// One exponentially weighted moving average rate.
struct Ewma {
    alpha: f64,
    /// Rate in events/ns, stored as f64 bits.
    rate_bits: AtomicU64,
    initialized: AtomicBool,
}

impl Ewma {
    fn for_minutes(minutes: f64) -> Self {
        Self {
            alpha: 1.0 - (-(TICK_INTERVAL_SECS as f64) / 60.0 / minutes).exp(),
            rate_bits: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    fn tick(&self, uncounted: u64) {
        let instant_rate = uncounted as f64 / TICK_INTERVAL_NANOS as f64;
        if self.initialized.load(Ordering::Relaxed) {
            let rate = f64::from_bits(self.rate_bits.load(Ordering::Relaxed));
            let next = rate + self.alpha * (instant_rate - rate);
            self.rate_bits.store(next.to_bits(), Ordering::Relaxed);
        } else {
            self.rate_bits
                .store(instant_rate.to_bits(), Ordering::Relaxed);
            self.initialized.store(true, Ordering::Relaxed);
        }
    }

    /// Rate in events/second.
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed)) * 1e9
    }

    fn reset(&self) {
        self.rate_bits.store(0, Ordering::Relaxed);
        self.initialized.store(false, Ordering::Relaxed);
    }
}

/// Lock-free event meter with decaying 1/5/15-minute rates.
pub struct Meter {
    count: AtomicU64,
    uncounted: AtomicU64,
    start: Mutex<Instant>,
    /// Nanoseconds since `start` of the last completed tick.
    last_tick: AtomicU64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            uncounted: AtomicU64::new(0),
            start: Mutex::new(Instant::now()),
            last_tick: AtomicU64::new(0),
            m1: Ewma::for_minutes(1.0),
            m5: Ewma::for_minutes(5.0),
            m15: Ewma::for_minutes(15.0),
        }
    }

    /// Records one event.
    pub fn mark(&self) {
        self.tick_if_necessary();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.uncounted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean rate over the meter's whole lifetime, events/second.
    pub fn mean_rate(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let elapsed = self.start.lock().elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        count as f64 / elapsed
    }

    fn tick_if_necessary(&self) {
        let elapsed = self.start.lock().elapsed().as_nanos() as u64;
        let last = self.last_tick.load(Ordering::Relaxed);
        let age = elapsed.saturating_sub(last);
        if age < TICK_INTERVAL_NANOS {
            return;
        }

        let new_tick = elapsed - (age % TICK_INTERVAL_NANOS);
        if self
            .last_tick
            .compare_exchange(last, new_tick, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            // Another thread owns this tick.
            return;
        }

        let uncounted = self.uncounted.swap(0, Ordering::Relaxed);
        let ticks = age / TICK_INTERVAL_NANOS;
        // The first interval absorbs the uncounted events, the rest decay.
        self.m1.tick(uncounted);
        self.m5.tick(uncounted);
        self.m15.tick(uncounted);
        for _ in 1..ticks {
            self.m1.tick(0);
            self.m5.tick(0);
            self.m15.tick(0);
        }
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        self.tick_if_necessary();
        MeterSnapshot {
            count: self.count(),
            mean_rate: self.mean_rate(),
            rate_1m: self.m1.rate(),
            rate_5m: self.m5.rate(),
            rate_15m: self.m15.rate(),
        }
    }

    pub fn reset(&self) {
        *self.start.lock() = Instant::now();
        self.count.store(0, Ordering::Relaxed);
        self.uncounted.store(0, Ordering::Relaxed);
        self.last_tick.store(0, Ordering::Relaxed);
        self.m1.reset();
        self.m5.reset();
        self.m15.reset();
    }
}

/// Latency timer: a meter plus striped nanosecond histograms.
pub struct Timer {
    meter: Meter,
    stripes: Vec<Mutex<Histogram<u64>>>,
}

fn new_histogram() -> Histogram<u64> {
    // 3 significant digits, auto-resizing. Infallible for sigfig <= 5.
    Histogram::new(3).unwrap()
}

impl Timer {
    pub fn new(stripes: usize) -> Self {
        Self {
            meter: Meter::new(),
            stripes: (0..stripes.max(1))
                .map(|_| Mutex::new(new_histogram()))
                .collect(),
        }
    }

    /// Records one successful sample. `stripe` is the worker index; each
    /// worker hits its own histogram stripe.
    pub fn record(&self, stripe: usize, latency_nanos: u64) {
        self.meter.mark();
        let mut histogram = self.stripes[stripe % self.stripes.len()].lock();
        // Saturating record: auto-resize only fails on pathological values.
        let _ = histogram.record(latency_nanos.max(1));
    }

    pub fn count(&self) -> u64 {
        self.meter.count()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let mut merged = new_histogram();
        for stripe in &self.stripes {
            let _ = merged.add(&*stripe.lock());
        }

        TimerSnapshot {
            rates: self.meter.snapshot(),
            latency: LatencySnapshot {
                mean_us: merged.mean() / 1_000.0,
                median_us: merged.value_at_quantile(0.50) as f64 / 1_000.0,
                p95_us: merged.value_at_quantile(0.95) as f64 / 1_000.0,
                p99_us: merged.value_at_quantile(0.99) as f64 / 1_000.0,
                p999_us: merged.value_at_quantile(0.999) as f64 / 1_000.0,
                max_us: merged.max() as f64 / 1_000.0,
            },
        }
    }

    pub fn reset(&self) {
        self.meter.reset();
        for stripe in &self.stripes {
            stripe.lock().reset();
        }
    }
}

/// Point-in-time view of a meter. Rates are events/second.
#[derive(Debug, Clone, Serialize)]
pub struct MeterSnapshot {
    pub count: u64,
    pub mean_rate: f64,
    pub rate_1m: f64,
    pub rate_5m: f64,
    pub rate_15m: f64,
}

/// Latency percentiles in microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub mean_us: f64,
    pub median_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub p999_us: f64,
    pub max_us: f64,
}

/// Point-in-time view of a timer.
#[derive(Debug, Clone, Serialize)]
pub struct TimerSnapshot {
    #[serde(flatten)]
    pub rates: MeterSnapshot,
    pub latency: LatencySnapshot,
}

/// The per-run metrics bundle.
pub struct MetricsBundle {
    selects: Timer,
    mutations: Timer,
    deletions: Timer,
    populate: Timer,
    errors: Meter,
}

impl MetricsBundle {
    pub fn new(stripes: usize) -> Self {
        Self {
            selects: Timer::new(stripes),
            mutations: Timer::new(stripes),
            deletions: Timer::new(stripes),
            populate: Timer::new(stripes),
            errors: Meter::new(),
        }
    }

    pub fn timer(&self, kind: OpKind) -> &Timer {
        match kind {
            OpKind::Select => &self.selects,
            OpKind::Mutation => &self.mutations,
            OpKind::Delete => &self.deletions,
            OpKind::Populate => &self.populate,
        }
    }

    pub fn errors(&self) -> &Meter {
        &self.errors
    }

    /// Total operations observed: successful samples plus failures.
    pub fn total_operations(&self) -> u64 {
        self.selects.count()
            + self.mutations.count()
            + self.deletions.count()
            + self.populate.count()
            + self.errors.count()
    }

    /// Clears all timers and meters. Called between the populate and
    /// measured phases.
    pub fn reset(&self) {
        self.selects.reset();
        self.mutations.reset();
        self.deletions.reset();
        self.populate.reset();
        self.errors.reset();
    }

    /// Read-only snapshot, safe while workers are running.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            selects: self.selects.snapshot(),
            mutations: self.mutations.snapshot(),
            deletions: self.deletions.snapshot(),
            populate: self.populate.snapshot(),
            errors: self.errors.snapshot(),
        }
    }
}

/// Full metrics view, serialized by the control server's `status`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub selects: TimerSnapshot,
    pub mutations: TimerSnapshot,
    pub deletions: TimerSnapshot,
    pub populate: TimerSnapshot,
    pub errors: MeterSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_meter_counts_exactly() {
        let meter = Meter::new();
        for _ in 0..1_000 {
            meter.mark();
        }
        assert_eq!(meter.count(), 1_000);
        let snapshot = meter.snapshot();
        assert_eq!(snapshot.count, 1_000);
        assert!(snapshot.rate_1m >= 0.0);
        assert!(snapshot.mean_rate > 0.0);
    }

    #[test]
    fn test_meter_reset() {
        let meter = Meter::new();
        meter.mark();
        meter.reset();
        assert_eq!(meter.count(), 0);
        assert_eq!(meter.snapshot().rate_1m, 0.0);
    }

    #[test]
    fn test_timer_records_nanos_reports_micros() {
        let timer = Timer::new(2);
        for _ in 0..100 {
            timer.record(0, 2_000_000); // 2ms
        }
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.rates.count, 100);
        assert!((snapshot.latency.median_us - 2_000.0).abs() < 50.0);
        assert!(snapshot.latency.max_us >= snapshot.latency.median_us);
    }

    #[test]
    fn test_timer_stripes_merge() {
        let timer = Timer::new(4);
        timer.record(0, 1_000_000);
        timer.record(1, 2_000_000);
        timer.record(2, 3_000_000);
        timer.record(3, 4_000_000);
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.rates.count, 4);
        assert!(snapshot.latency.max_us >= 3_900.0);
    }

    #[test]
    fn test_bundle_total_operations() {
        let bundle = MetricsBundle::new(2);
        bundle.timer(OpKind::Select).record(0, 1_000);
        bundle.timer(OpKind::Mutation).record(0, 1_000);
        bundle.timer(OpKind::Mutation).record(1, 1_000);
        bundle.errors().mark();
        assert_eq!(bundle.total_operations(), 4);
    }

    #[test]
    fn test_bundle_reset_zeroes_counts() {
        let bundle = MetricsBundle::new(2);
        bundle.timer(OpKind::Populate).record(0, 5_000);
        bundle.errors().mark();
        bundle.reset();
        assert_eq!(bundle.total_operations(), 0);
        assert_eq!(bundle.snapshot().populate.rates.count, 0);
    }

    #[test]
    fn test_meter_rates_decay_toward_observed() {
        let meter = Meter::new();
        for _ in 0..100 {
            meter.mark();
        }
        // Force a tick boundary to fold the marks into the EWMAs.
        std::thread::sleep(Duration::from_millis(10));
        *meter.start.lock() = Instant::now() - Duration::from_secs(TICK_INTERVAL_SECS + 1);
        let snapshot = meter.snapshot();
        assert!(snapshot.rate_1m > 0.0);
        assert!(snapshot.rate_5m > 0.0);
        assert!(snapshot.rate_15m > 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let bundle = MetricsBundle::new(1);
        bundle.timer(OpKind::Select).record(0, 1_500_000);
        let json = serde_json::to_value(bundle.snapshot()).unwrap();
        assert!(json["selects"]["count"].is_u64());
        assert!(json["selects"]["latency"]["p99_us"].is_number());
    }
}
