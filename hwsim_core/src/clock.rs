//! Virtual controller clock.
//!
//! The clock thread is the only writer. It publishes `{ticks, runtime}`
//! with an even/odd sequence counter so readers on any thread see a
//! consistent pair without taking a lock:
//!
//! ```text
//!   writer:  seq=odd → ticks, runtime → seq=even → notify waiters
//!   reader:  s1=seq (even?) → ticks, runtime → s2=seq → retry if s1≠s2
//! ```
//!
//! Ticks are masked to the configured counter width and wrap, so every
//! comparison between tick values goes through [`TickMask::compare`].

use crate::error::CoreResult;
use crate::notify::WakeSignal;
use hwsim_common::config::ConfigError;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Width of the wrapping tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickMask {
    bits: u8,
    mask: u64,
}

impl TickMask {
    /// Mask for a `bits`-wide counter (1..=64).
    pub fn new(bits: u8) -> CoreResult<Self> {
        if bits == 0 || bits > 64 {
            return Err(ConfigError::ValidationError(format!(
                "tick width must be in 1..=64, got {bits}"
            ))
            .into());
        }
        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        Ok(Self { bits, mask })
    }

    /// Counter width in bits.
    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Raw mask value.
    pub fn mask(self) -> u64 {
        self.mask
    }

    /// Truncate `value` to the counter width.
    pub fn apply(self, value: u64) -> u64 {
        value & self.mask
    }

    /// `tick + delta`, wrapped.
    pub fn add(self, tick: u64, delta: u64) -> u64 {
        tick.wrapping_add(delta) & self.mask
    }

    /// Order two masked tick values, allowing for wraparound.
    ///
    /// `a` is later than `b` when the forward distance from `b` to `a` is
    /// less than half the counter range.
    pub fn compare(self, a: u64, b: u64) -> CmpOrdering {
        let distance = a.wrapping_sub(b) & self.mask;
        let half = 1u64 << (self.bits - 1);
        if distance == 0 {
            CmpOrdering::Equal
        } else if distance < half {
            CmpOrdering::Greater
        } else {
            CmpOrdering::Less
        }
    }

    /// Largest forward delay `compare` still orders correctly.
    pub fn max_delay(self) -> u64 {
        (1u64 << (self.bits - 1)) - 1
    }

    /// True once `now` has reached `deadline`.
    pub fn is_elapsed(self, deadline: u64, now: u64) -> bool {
        self.compare(now, deadline) != CmpOrdering::Less
    }
}

/// Consistent `{ticks, runtime}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockSnapshot {
    /// Masked controller ticks.
    pub ticks: u64,
    /// Running time in nanoseconds, pauses excluded.
    pub runtime_ns: u64,
}

impl ClockSnapshot {
    /// Running time as a `Duration`.
    pub fn runtime(&self) -> Duration {
        Duration::from_nanos(self.runtime_ns)
    }
}

/// Clock loop timing statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockStats {
    /// Clock loop iterations.
    pub loops: u64,
    /// Iterations that took longer than one timer period.
    pub overruns: u64,
    /// Worst overrun beyond the period, in microseconds.
    pub max_overrun_us: u64,
}

#[derive(Debug, Default)]
struct StatsCell {
    loops: AtomicU64,
    overruns: AtomicU64,
    max_overrun_us: AtomicU64,
}

/// Shared virtual clock.
#[derive(Debug)]
pub struct VirtualClock {
    mask: TickMask,
    frequency: u64,
    seq: AtomicU64,
    ticks: AtomicU64,
    runtime_ns: AtomicU64,
    signal: WakeSignal,
    stats: StatsCell,
}

impl VirtualClock {
    /// Clock at tick 0 running at `frequency` Hz.
    pub fn new(mask: TickMask, frequency: u64) -> Self {
        Self {
            mask,
            frequency: frequency.max(1),
            seq: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            runtime_ns: AtomicU64::new(0),
            signal: WakeSignal::new(),
            stats: StatsCell::default(),
        }
    }

    /// Tick mask.
    pub fn mask(&self) -> TickMask {
        self.mask
    }

    /// Controller frequency (Hz).
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Wake signal notified after every publication.
    pub fn signal(&self) -> &WakeSignal {
        &self.signal
    }

    /// Masked tick count reached after `runtime_ns`.
    pub fn ticks_at(&self, runtime_ns: u64) -> u64 {
        let raw = u128::from(runtime_ns) * u128::from(self.frequency) / NANOS_PER_SEC;
        self.mask.apply(raw as u64)
    }

    /// Nanoseconds covered by `ticks` controller ticks.
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        (u128::from(ticks) * NANOS_PER_SEC / u128::from(self.frequency)) as u64
    }

    fn store(&self, ticks: u64, runtime_ns: u64) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.ticks.store(ticks, Ordering::Relaxed);
        self.runtime_ns.store(runtime_ns, Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Publish the state after `runtime_ns` of running time and wake waiters.
    pub fn publish(&self, runtime_ns: u64) -> ClockSnapshot {
        let snapshot = ClockSnapshot {
            ticks: self.ticks_at(runtime_ns),
            runtime_ns,
        };
        self.store(snapshot.ticks, snapshot.runtime_ns);
        self.signal.notify_all();
        snapshot
    }

    /// Publish an exact unmasked tick count (stepped mode).
    pub fn publish_ticks(&self, raw_ticks: u64) -> ClockSnapshot {
        let snapshot = ClockSnapshot {
            ticks: self.mask.apply(raw_ticks),
            runtime_ns: self.ticks_to_ns(raw_ticks),
        };
        self.store(snapshot.ticks, snapshot.runtime_ns);
        self.signal.notify_all();
        snapshot
    }

    /// Read a consistent snapshot.
    pub fn snapshot(&self) -> ClockSnapshot {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let ticks = self.ticks.load(Ordering::Relaxed);
            let runtime_ns = self.runtime_ns.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            let s2 = self.seq.load(Ordering::Relaxed);
            if s1 == s2 {
                return ClockSnapshot { ticks, runtime_ns };
            }
        }
    }

    /// Current masked tick count.
    pub fn ticks(&self) -> u64 {
        self.snapshot().ticks
    }

    /// Record one clock loop iteration.
    pub fn record_loop(&self, elapsed: Duration, period: Duration) {
        self.stats.loops.fetch_add(1, Ordering::Relaxed);
        if elapsed > period {
            let over = (elapsed - period).as_micros() as u64;
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            self.stats.max_overrun_us.fetch_max(over, Ordering::Relaxed);
        }
    }

    /// Clock loop statistics.
    pub fn stats(&self) -> ClockStats {
        ClockStats {
            loops: self.stats.loops.load(Ordering::Relaxed),
            overruns: self.stats.overruns.load(Ordering::Relaxed),
            max_overrun_us: self.stats.max_overrun_us.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wrapped_tick_compares_earlier() {
        let mask = TickMask::new(16).unwrap();
        assert_eq!(mask.compare(5, 0xFFFF - 2), CmpOrdering::Greater);
        assert_eq!(mask.compare(0xFFFF - 2, 5), CmpOrdering::Less);
        assert!(mask.is_elapsed(0xFFFF - 2, 5));
    }

    #[test]
    fn delays_past_max_delay_compare_as_past() {
        let mask = TickMask::new(16).unwrap();
        assert_eq!(mask.max_delay(), 0x7FFF);
        let now = 0xFFF0;
        let ahead = mask.add(now, mask.max_delay());
        assert_eq!(mask.compare(ahead, now), CmpOrdering::Greater);
        let too_far = mask.add(now, mask.max_delay() + 1);
        assert_eq!(mask.compare(too_far, now), CmpOrdering::Less);
    }

    #[test]
    fn full_width_mask() {
        let mask = TickMask::new(64).unwrap();
        assert_eq!(mask.mask(), u64::MAX);
        assert_eq!(mask.compare(1, u64::MAX), CmpOrdering::Greater);
        assert!(TickMask::new(0).is_err());
        assert!(TickMask::new(65).is_err());
    }

    #[test]
    fn ticks_follow_runtime() {
        let clock = VirtualClock::new(TickMask::new(32).unwrap(), 1_000_000);
        let snap = clock.publish(2_500_000);
        assert_eq!(snap.ticks, 2_500);
        assert_eq!(clock.snapshot(), snap);
    }

    #[test]
    fn ticks_wrap_at_width() {
        let clock = VirtualClock::new(TickMask::new(8).unwrap(), 1_000);
        assert_eq!(clock.publish_ticks(300).ticks, 300 - 256);
        assert_eq!(clock.snapshot().runtime_ns, 300_000_000);
    }

    #[test]
    fn readers_never_see_torn_pairs() {
        // runtime == ticks * 1000 at 1 MHz, so any mix of two
        // publications is detectable.
        let clock = Arc::new(VirtualClock::new(TickMask::new(64).unwrap(), 1_000_000));
        let writer = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for t in 1..20_000u64 {
                    clock.publish_ticks(t);
                }
            })
        };
        let reader = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for _ in 0..20_000 {
                    let snap = clock.snapshot();
                    assert_eq!(snap.runtime_ns, snap.ticks * 1_000);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn overruns_are_counted() {
        let clock = VirtualClock::new(TickMask::new(32).unwrap(), 1_000);
        let period = Duration::from_millis(1);
        clock.record_loop(Duration::from_micros(500), period);
        clock.record_loop(Duration::from_micros(1_300), period);
        let stats = clock.stats();
        assert_eq!(stats.loops, 2);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.max_overrun_us, 300);
    }

    proptest! {
        #[test]
        fn later_tick_within_half_range_compares_greater(
            bits in 2u8..=64,
            start in any::<u64>(),
            delta_seed in any::<u64>(),
        ) {
            let mask = TickMask::new(bits).unwrap();
            let half = 1u64 << (bits - 1);
            let delta = 1 + delta_seed % (half - 1).max(1);
            prop_assume!(delta < half);
            let a = mask.apply(start);
            let b = mask.add(a, delta);
            prop_assert_eq!(mask.compare(b, a), CmpOrdering::Greater);
            prop_assert_eq!(mask.compare(a, b), CmpOrdering::Less);
            prop_assert_eq!(mask.compare(a, a), CmpOrdering::Equal);
        }
    }
}
