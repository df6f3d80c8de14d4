//! Coordination metrics
//!
//! Counters for id allocation and for the lock / lease lifecycle, rendered
//! in the Prometheus text exposition format by the admin HTTP server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Histogram bucket boundaries for critical section durations (in milliseconds)
const SECTION_BUCKETS: [f64; 10] = [
    1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0, 300000.0,
];

/// A simple histogram implementation for duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the default section buckets
    pub fn new() -> Self {
        Self::with_buckets(&SECTION_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturates at zero
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics shared by the allocator, the mutex and coordinated sections
#[derive(Debug)]
pub struct CoordMetrics {
    pub ids_issued: Counter,
    pub sequence_exhausted: Counter,

    pub locks_acquired: Counter,
    pub locks_contended: Counter,
    pub store_errors: Counter,

    pub leases_extended: Counter,
    pub lease_extend_failures: Counter,

    pub locks_released: Counter,
    pub lock_release_failures: Counter,

    pub sections_completed: Counter,
    pub sections_failed: Counter,
    pub sections_cancelled: Counter,
    pub sections_active: Gauge,
    pub section_duration: Histogram,

    start_time: Instant,
}

impl CoordMetrics {
    pub fn new() -> Self {
        Self {
            ids_issued: Counter::new(),
            sequence_exhausted: Counter::new(),
            locks_acquired: Counter::new(),
            locks_contended: Counter::new(),
            store_errors: Counter::new(),
            leases_extended: Counter::new(),
            lease_extend_failures: Counter::new(),
            locks_released: Counter::new(),
            lock_release_failures: Counter::new(),
            sections_completed: Counter::new(),
            sections_failed: Counter::new(),
            sections_cancelled: Counter::new(),
            sections_active: Gauge::new(),
            section_duration: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 12] = [
            ("ids_issued_total", "Ids minted by the allocator", &self.ids_issued),
            (
                "sequence_exhausted_total",
                "Times a millisecond ran out of sequence numbers",
                &self.sequence_exhausted,
            ),
            ("locks_acquired_total", "Successful lock acquisitions", &self.locks_acquired),
            (
                "locks_contended_total",
                "Acquisitions refused because the key was held",
                &self.locks_contended,
            ),
            ("store_errors_total", "Coordination store failures", &self.store_errors),
            ("leases_extended_total", "Successful lease renewals", &self.leases_extended),
            (
                "lease_extend_failures_total",
                "Lease renewals that failed or found the lease lost",
                &self.lease_extend_failures,
            ),
            ("locks_released_total", "Successful lock releases", &self.locks_released),
            (
                "lock_release_failures_total",
                "Releases that failed or found the lease already gone",
                &self.lock_release_failures,
            ),
            (
                "sections_completed_total",
                "Coordinated sections whose callback succeeded",
                &self.sections_completed,
            ),
            (
                "sections_failed_total",
                "Coordinated sections whose callback returned an error",
                &self.sections_failed,
            ),
            (
                "sections_cancelled_total",
                "Coordinated sections cancelled while held",
                &self.sections_cancelled,
            ),
        ];

        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP coordkit_{} {}", name, help);
            let _ = writeln!(out, "# TYPE coordkit_{} counter", name);
            let _ = writeln!(out, "coordkit_{} {}", name, counter.get());
        }

        out.push_str("# HELP coordkit_sections_active Coordinated sections currently holding a lock\n");
        out.push_str("# TYPE coordkit_sections_active gauge\n");
        let _ = writeln!(out, "coordkit_sections_active {}", self.sections_active.get());

        out.push_str("# HELP coordkit_section_duration_ms Time spent holding a lock in milliseconds\n");
        out.push_str("# TYPE coordkit_section_duration_ms histogram\n");
        for (le, count) in self.section_duration.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "coordkit_section_duration_ms_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(
                    out,
                    "coordkit_section_duration_ms_bucket{{le=\"{}\"}} {}",
                    le, count
                );
            }
        }
        let _ = writeln!(
            out,
            "coordkit_section_duration_ms_sum {}",
            self.section_duration.sum()
        );
        let _ = writeln!(
            out,
            "coordkit_section_duration_ms_count {}",
            self.section_duration.count()
        );

        out.push_str("# HELP coordkit_uptime_seconds Process uptime in seconds\n");
        out.push_str("# TYPE coordkit_uptime_seconds gauge\n");
        let _ = writeln!(out, "coordkit_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for CoordMetrics {
    fn default() -> Self {
        Self::new()
    }
}
