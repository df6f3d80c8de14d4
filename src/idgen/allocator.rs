//! Snowflake-style id allocator

use super::clock::{Clock, SystemClock};
use super::{MACHINE_SHIFT, MAX_SEQUENCE, MAX_TIMESTAMP, TIMESTAMP_SHIFT};
use crate::common::{CoordMetrics, Error, IdConfig, Result, DEFAULT_EPOCH_MS, MAX_MACHINE_ID};
use std::sync::{Arc, Mutex, PoisonError};

/// Mutable part of the allocator, guarded by one mutex
#[derive(Debug, Default)]
struct AllocatorState {
    last_timestamp: i64,
    sequence: i64,
}

/// Components of a generated id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Unix milliseconds the id was minted in
    pub timestamp_ms: i64,
    pub machine_id: i64,
    pub sequence: i64,
}

/// Split an id minted against `epoch_ms` back into its fields
pub fn decompose(id: i64, epoch_ms: i64) -> IdParts {
    IdParts {
        timestamp_ms: (id >> TIMESTAMP_SHIFT) + epoch_ms,
        machine_id: (id >> MACHINE_SHIFT) & MAX_MACHINE_ID,
        sequence: id & MAX_SEQUENCE,
    }
}

/// Produces unique, time-ordered ids for one machine id.
///
/// Every call to [`generate`](IdAllocator::generate) serialises through an
/// internal mutex. Within one allocator, ids are strictly increasing as long
/// as the clock does not move backwards.
pub struct IdAllocator<C: Clock = SystemClock> {
    machine_id: i64,
    epoch_ms: i64,
    clock: C,
    state: Mutex<AllocatorState>,
    metrics: Option<Arc<CoordMetrics>>,
}

impl IdAllocator<SystemClock> {
    /// Allocator on the system clock and the default epoch
    pub fn new(machine_id: i64) -> Result<Self> {
        Self::with_clock(machine_id, DEFAULT_EPOCH_MS, SystemClock)
    }

    pub fn from_config(config: &IdConfig) -> Result<Self> {
        Self::with_clock(config.machine_id, config.epoch_ms, SystemClock)
    }
}

impl<C: Clock> IdAllocator<C> {
    /// Build an allocator on an arbitrary clock.
    ///
    /// Fails when the machine id does not fit in 10 bits, or when the clock
    /// already reads before the epoch or past the 41-bit lifetime.
    pub fn with_clock(machine_id: i64, epoch_ms: i64, clock: C) -> Result<Self> {
        if !(0..=MAX_MACHINE_ID).contains(&machine_id) {
            return Err(Error::InvalidConfig(format!(
                "machine id must be between 0 and {}, got {}",
                MAX_MACHINE_ID, machine_id
            )));
        }

        let elapsed = clock.now_millis() - epoch_ms;
        if elapsed < 0 {
            return Err(Error::InvalidConfig(format!(
                "epoch {} is in the future",
                epoch_ms
            )));
        }
        if elapsed > MAX_TIMESTAMP {
            return Err(Error::InvalidConfig(format!(
                "epoch {} is more than {} ms in the past",
                epoch_ms, MAX_TIMESTAMP
            )));
        }

        Ok(Self {
            machine_id,
            epoch_ms,
            clock,
            state: Mutex::new(AllocatorState::default()),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn machine_id(&self) -> i64 {
        self.machine_id
    }

    pub fn epoch_ms(&self) -> i64 {
        self.epoch_ms
    }

    /// Mint the next id.
    ///
    /// Spins until the next millisecond when 4096 ids were already issued in
    /// the current one.
    ///
    /// # Panics
    ///
    /// Panics when the elapsed time since the epoch no longer fits in 41 bits.
    /// The deployment has outlived its epoch and must be reconfigured.
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = self.clock.now_millis();

        if now == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                if let Some(metrics) = &self.metrics {
                    metrics.sequence_exhausted.inc();
                }
                while now <= state.last_timestamp {
                    std::hint::spin_loop();
                    now = self.clock.now_millis();
                }
            }
        } else {
            // A backwards jump lands here too and may mint a smaller id.
            state.sequence = 0;
        }

        let elapsed = now - self.epoch_ms;
        if !(0..=MAX_TIMESTAMP).contains(&elapsed) {
            tracing::error!(
                machine_id = self.machine_id,
                epoch_ms = self.epoch_ms,
                now,
                "clock is outside the 41-bit id range"
            );
            panic!(
                "id timestamp {} out of range 0..={} for epoch {}",
                elapsed, MAX_TIMESTAMP, self.epoch_ms
            );
        }

        state.last_timestamp = now;
        if let Some(metrics) = &self.metrics {
            metrics.ids_issued.inc();
        }

        (elapsed << TIMESTAMP_SHIFT) | (self.machine_id << MACHINE_SHIFT) | state.sequence
    }

    /// Split an id from this allocator back into its fields
    pub fn decompose(&self, id: i64) -> IdParts {
        decompose(id, self.epoch_ms)
    }
}

impl<C: Clock> std::fmt::Debug for IdAllocator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("machine_id", &self.machine_id)
            .field("epoch_ms", &self.epoch_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idgen::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn allocator(machine_id: i64) -> (Arc<ManualClock>, IdAllocator<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let alloc = IdAllocator::with_clock(machine_id, DEFAULT_EPOCH_MS, clock.clone()).unwrap();
        (clock, alloc)
    }

    #[test]
    fn test_machine_id_range() {
        assert!(IdAllocator::new(0).is_ok());
        assert!(IdAllocator::new(1023).is_ok());
        assert!(matches!(IdAllocator::new(1024), Err(Error::InvalidConfig(_))));
        assert!(matches!(IdAllocator::new(-1), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_epoch_in_future_rejected() {
        let clock = ManualClock::new(NOW);
        assert!(IdAllocator::with_clock(1, NOW + 1, clock).is_err());
    }

    #[test]
    fn test_epoch_too_old_rejected() {
        let clock = ManualClock::new(NOW);
        assert!(IdAllocator::with_clock(1, NOW - MAX_TIMESTAMP - 1, clock).is_err());
        let clock = ManualClock::new(NOW);
        assert!(IdAllocator::with_clock(1, NOW - MAX_TIMESTAMP, clock).is_ok());
    }

    #[test]
    fn test_bit_layout() {
        let (_clock, alloc) = allocator(5);
        let id = alloc.generate();
        let expected = ((NOW - DEFAULT_EPOCH_MS) << 22) | (5 << 12);
        assert_eq!(id, expected);
        assert!(id > 0);
    }

    #[test]
    fn test_sequence_within_millisecond() {
        let (_clock, alloc) = allocator(3);
        let first = alloc.decompose(alloc.generate());
        let second = alloc.decompose(alloc.generate());

        assert_eq!(first.timestamp_ms, NOW);
        assert_eq!(first.sequence, 0);
        assert_eq!(second.timestamp_ms, NOW);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.machine_id, 3);
    }

    #[test]
    fn test_sequence_resets_on_new_millisecond() {
        let (clock, alloc) = allocator(3);
        alloc.generate();
        alloc.generate();
        clock.advance(1);

        let parts = alloc.decompose(alloc.generate());
        assert_eq!(parts.timestamp_ms, NOW + 1);
        assert_eq!(parts.sequence, 0);
    }

    #[test]
    fn test_clock_rollback_is_not_detected() {
        let (clock, alloc) = allocator(1);
        clock.advance(10);
        let later = alloc.generate();
        clock.advance(-5);
        let earlier = alloc.generate();

        // Known weakness: a backwards jump yields a smaller id.
        assert!(earlier < later);
        assert_eq!(alloc.decompose(earlier).sequence, 0);
    }

    #[test]
    fn test_metrics_counted() {
        let metrics = Arc::new(CoordMetrics::new());
        let (_clock, alloc) = allocator(1);
        let alloc = alloc.with_metrics(metrics.clone());
        for _ in 0..10 {
            alloc.generate();
        }
        assert_eq!(metrics.ids_issued.get(), 10);
        assert_eq!(metrics.sequence_exhausted.get(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_lifetime_overflow_is_fatal() {
        let (clock, alloc) = allocator(1);
        clock.set(DEFAULT_EPOCH_MS + MAX_TIMESTAMP + 1);
        alloc.generate();
    }
}
