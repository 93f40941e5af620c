//! Timer wheel driven by the virtual clock.
//!
//! Timers hold an absolute (masked) wake tick. Armed timers sit in a list
//! sorted by deadline, disarmed ones in a side list. One mutex guards both.
//!
//! The driver never holds the wheel lock while a callback runs:
//!
//! ```text
//!   lock → pop every due timer (snapshot) → unlock
//!   for each: CAS Idle→Executing (skip if gone) → callback(now)
//!   lock → ToRemove? drop it : re-arm / disarm from the return value → unlock
//! ```
//!
//! A callback may unregister its own timer; the removal is deferred until
//! the callback returns. A `reschedule` issued while the callback runs wins
//! over the value the callback returns. A `reschedule` of a timer that was
//! popped but has not started yet cancels that fire.

use crate::clock::TickMask;
use crate::error::{CoreError, CoreResult};
use hwsim_common::object::ObjectId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tracing::trace;

/// Timer callback: receives the current tick, returns the next absolute
/// wake tick or 0 to disarm.
pub type TimerCallback = Box<dyn FnMut(u64) -> u64 + Send>;

/// Handle of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Raw handle value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

const IDLE: u8 = 0;
const EXECUTING: u8 = 1;
const TO_REMOVE: u8 = 2;
const REMOVED: u8 = 3;

struct TimerEntry {
    state: AtomicU8,
    callback: Mutex<TimerCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    Armed,
    Disarmed,
    InFlight,
}

struct TimerSlot {
    entry: Arc<TimerEntry>,
    owner: Option<ObjectId>,
    timeout: u64,
    generation: u64,
    listing: Listing,
}

#[derive(Default)]
struct WheelState {
    slots: HashMap<u64, TimerSlot>,
    armed: VecDeque<(u64, u64)>,
    disarmed: Vec<u64>,
}

impl WheelState {
    fn unlist(&mut self, id: u64) {
        let Some(slot) = self.slots.get(&id) else {
            return;
        };
        match slot.listing {
            Listing::Armed => {
                if let Some(pos) = self.armed.iter().position(|&(_, t)| t == id) {
                    self.armed.remove(pos);
                }
            }
            Listing::Disarmed => self.disarmed.retain(|&t| t != id),
            Listing::InFlight => {}
        }
    }

    fn list(&mut self, mask: TickMask, id: u64, timeout: u64) {
        let listing = if timeout == 0 {
            self.disarmed.push(id);
            Listing::Disarmed
        } else {
            // Ties keep registration order.
            let pos = self
                .armed
                .iter()
                .position(|&(t, _)| mask.compare(t, timeout) == std::cmp::Ordering::Greater)
                .unwrap_or(self.armed.len());
            self.armed.insert(pos, (timeout, id));
            Listing::Armed
        };
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.timeout = timeout;
            slot.listing = listing;
        }
    }
}

/// Sorted timer wheel.
pub struct TimerWheel {
    mask: TickMask,
    next_id: AtomicU64,
    state: Mutex<WheelState>,
}

impl TimerWheel {
    /// Empty wheel using `mask` for deadline arithmetic.
    pub fn new(mask: TickMask) -> Self {
        Self {
            mask,
            next_id: AtomicU64::new(1),
            state: Mutex::new(WheelState::default()),
        }
    }

    /// Normalize a requested deadline: 0 stays 0 (disarmed), anything else
    /// is masked and a masked 0 becomes 1 so the timer stays armed.
    fn deadline(&self, timeout: u64) -> u64 {
        if timeout == 0 {
            return 0;
        }
        match self.mask.apply(timeout) {
            0 => 1,
            t => t,
        }
    }

    /// Register a timer firing at `timeout` (0 = disarmed).
    pub fn register(&self, timeout: u64, callback: TimerCallback) -> TimerHandle {
        self.register_owned(None, timeout, callback)
    }

    /// Register a timer owned by an object; it is removed with the object.
    pub fn register_owned(
        &self,
        owner: Option<ObjectId>,
        timeout: u64,
        callback: TimerCallback,
    ) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = self.deadline(timeout);
        let mut state = self.state.lock();
        state.slots.insert(
            id,
            TimerSlot {
                entry: Arc::new(TimerEntry {
                    state: AtomicU8::new(IDLE),
                    callback: Mutex::new(callback),
                }),
                owner,
                timeout,
                generation: 0,
                listing: Listing::Disarmed,
            },
        );
        state.list(self.mask, id, timeout);
        TimerHandle(id)
    }

    /// Move a timer to a new deadline (0 = disarm).
    pub fn reschedule(&self, handle: TimerHandle, timeout: u64) -> CoreResult<()> {
        let timeout = self.deadline(timeout);
        let mut state = self.state.lock();
        let live = state.slots.get(&handle.0).is_some_and(|slot| {
            matches!(slot.entry.state.load(Ordering::Acquire), IDLE | EXECUTING)
        });
        if !live {
            return Err(CoreError::TimerNotRegistered(handle));
        }
        state.unlist(handle.0);
        if let Some(slot) = state.slots.get_mut(&handle.0) {
            slot.generation = slot.generation.wrapping_add(1);
        }
        state.list(self.mask, handle.0, timeout);
        Ok(())
    }

    /// Remove a timer. Safe to call from the timer's own callback.
    pub fn unregister(&self, handle: TimerHandle) -> CoreResult<()> {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get(&handle.0) else {
            return Err(CoreError::TimerNotRegistered(handle));
        };
        let entry = Arc::clone(&slot.entry);

        if entry
            .state
            .compare_exchange(IDLE, REMOVED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            state.unlist(handle.0);
            state.slots.remove(&handle.0);
            return Ok(());
        }

        if entry
            .state
            .compare_exchange(EXECUTING, TO_REMOVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // The driver finishes the removal once the callback returns.
            state.unlist(handle.0);
            if let Some(slot) = state.slots.get_mut(&handle.0) {
                slot.listing = Listing::InFlight;
            }
            return Ok(());
        }

        Err(CoreError::TimerNotRegistered(handle))
    }

    /// Unregister every timer owned by `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: ObjectId) -> usize {
        let handles: Vec<TimerHandle> = {
            let state = self.state.lock();
            state
                .slots
                .iter()
                .filter(|(_, slot)| slot.owner == Some(owner))
                .map(|(&id, _)| TimerHandle(id))
                .collect()
        };
        handles
            .into_iter()
            .filter(|&h| self.unregister(h).is_ok())
            .count()
    }

    /// Fire every timer due at `now`. Returns the number of callbacks run.
    pub fn run(&self, now: u64) -> usize {
        let due: Vec<(u64, u64, Arc<TimerEntry>)> = {
            let mut state = self.state.lock();
            let mut due = Vec::new();
            while let Some(&(timeout, id)) = state.armed.front() {
                if !self.mask.is_elapsed(timeout, now) {
                    break;
                }
                state.armed.pop_front();
                if let Some(slot) = state.slots.get_mut(&id) {
                    slot.listing = Listing::InFlight;
                    due.push((id, slot.generation, Arc::clone(&slot.entry)));
                }
            }
            due
        };

        let mut fired = 0;
        for (id, generation, entry) in due {
            {
                // A reschedule or unregister since the snapshot cancels this fire.
                let state = self.state.lock();
                let pending = state.slots.get(&id).is_some_and(|slot| {
                    slot.generation == generation && slot.listing == Listing::InFlight
                });
                if !pending
                    || entry
                        .state
                        .compare_exchange(IDLE, EXECUTING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    continue;
                }
            }

            let next = {
                let mut guard = entry.callback.lock();
                let callback = &mut *guard;
                callback(now)
            };
            fired += 1;

            let mut state = self.state.lock();
            if entry
                .state
                .compare_exchange(EXECUTING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                entry.state.store(REMOVED, Ordering::Release);
                state.slots.remove(&id);
                trace!(timer = id, "timer removed after callback");
                continue;
            }

            let rescheduled = state
                .slots
                .get(&id)
                .is_none_or(|slot| slot.generation != generation);
            if !rescheduled {
                let next = self.deadline(next);
                state.list(self.mask, id, next);
            }
        }
        fired
    }

    /// Number of registered timers.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// True when no timers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of armed timers.
    pub fn armed(&self) -> usize {
        self.state.lock().armed.len()
    }

    /// Deadline of a timer, `Some(0)` when disarmed.
    pub fn deadline_of(&self, handle: TimerHandle) -> Option<u64> {
        self.state.lock().slots.get(&handle.0).map(|slot| slot.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicUsize;

    fn wheel(bits: u8) -> Arc<TimerWheel> {
        Arc::new(TimerWheel::new(TickMask::new(bits).unwrap()))
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn fires_in_deadline_order_and_rearms() {
        let wheel = wheel(32);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (tag, deadline) in [(1u64, 30u64), (2, 10), (3, 20)] {
            let order = Arc::clone(&order);
            wheel.register(
                deadline,
                Box::new(move |now: u64| {
                    order.lock().push(tag);
                    if tag == 2 { now + 100 } else { 0 }
                }),
            );
        }

        assert_eq!(wheel.run(5), 0);
        assert_eq!(wheel.run(25), 2);
        assert_eq!(*order.lock(), vec![2, 3]);
        assert_eq!(wheel.run(40), 1);
        assert_eq!(*order.lock(), vec![2, 3, 1]);
        assert_eq!(wheel.armed(), 1);
        assert_eq!(wheel.run(125), 1);
        assert_eq!(*order.lock(), vec![2, 3, 1, 2]);
    }

    #[test]
    fn zero_registers_disarmed() {
        let wheel = wheel(32);
        let hits = counter();
        let h = {
            let hits = Arc::clone(&hits);
            wheel.register(0, Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                0
            }))
        };
        assert_eq!(wheel.run(1_000), 0);
        wheel.reschedule(h, 50).unwrap();
        assert_eq!(wheel.run(1_000), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.deadline_of(h), Some(0));
    }

    #[test]
    fn masked_zero_deadline_stays_armed() {
        let wheel = wheel(8);
        let h = wheel.register(256, Box::new(|_| 0));
        assert_eq!(wheel.deadline_of(h), Some(1));
        assert_eq!(wheel.armed(), 1);
    }

    #[test]
    fn wraparound_deadline_is_due_after_wrap() {
        let wheel = wheel(16);
        let hits = counter();
        {
            let hits = Arc::clone(&hits);
            wheel.register(0xFFFF - 2, Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                0
            }));
        }
        assert_eq!(wheel.run(0xFFF0), 0);
        assert_eq!(wheel.run(5), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_unregister_never_fires_again() {
        let wheel = wheel(32);
        let hits = counter();
        let handle: Arc<OnceLock<TimerHandle>> = Arc::new(OnceLock::new());

        let h = {
            let wheel_ref = Arc::clone(&wheel);
            let hits = Arc::clone(&hits);
            let handle = Arc::clone(&handle);
            wheel.register(10, Box::new(move |now: u64| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(&own) = handle.get() {
                    wheel_ref.unregister(own).unwrap();
                }
                now + 1
            }))
        };
        handle.set(h).unwrap();

        assert_eq!(wheel.run(10), 1);
        assert!(wheel.is_empty());
        assert_eq!(wheel.run(11), 0);
        assert_eq!(wheel.run(1_000), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(wheel.unregister(h), Err(CoreError::TimerNotRegistered(_))));
    }

    #[test]
    fn reschedule_during_callback_wins() {
        let wheel = wheel(32);
        let handle: Arc<OnceLock<TimerHandle>> = Arc::new(OnceLock::new());
        let h = {
            let wheel_ref = Arc::clone(&wheel);
            let handle = Arc::clone(&handle);
            wheel.register(10, Box::new(move |_| {
                if let Some(&own) = handle.get() {
                    wheel_ref.reschedule(own, 500).unwrap();
                }
                20
            }))
        };
        handle.set(h).unwrap();

        assert_eq!(wheel.run(10), 1);
        assert_eq!(wheel.deadline_of(h), Some(500));
        assert_eq!(wheel.run(100), 0);
    }

    /// Two timers due at 10; the first moves the second before it runs.
    fn rescheduled_by_sibling(target: u64) -> (Arc<TimerWheel>, TimerHandle, Arc<AtomicUsize>) {
        let wheel = wheel(32);
        let hits = counter();
        let sibling: Arc<OnceLock<TimerHandle>> = Arc::new(OnceLock::new());
        {
            let wheel_ref = Arc::clone(&wheel);
            let sibling = Arc::clone(&sibling);
            wheel.register(10, Box::new(move |_| {
                if let Some(&other) = sibling.get() {
                    wheel_ref.reschedule(other, target).unwrap();
                }
                0
            }));
        }
        let b = {
            let hits = Arc::clone(&hits);
            wheel.register(10, Box::new(move |now: u64| {
                hits.fetch_add(1, Ordering::SeqCst);
                now + 1_000
            }))
        };
        sibling.set(b).unwrap();
        (wheel, b, hits)
    }

    #[test]
    fn disarm_before_fire_cancels_it() {
        let (wheel, b, hits) = rescheduled_by_sibling(0);
        assert_eq!(wheel.run(10), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(wheel.deadline_of(b), Some(0));
        assert_eq!(wheel.run(5_000), 0);
    }

    #[test]
    fn moved_timer_fires_only_at_new_deadline() {
        let (wheel, b, hits) = rescheduled_by_sibling(500);
        assert_eq!(wheel.run(10), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(wheel.deadline_of(b), Some(500));
        assert_eq!(wheel.run(499), 0);
        assert_eq!(wheel.run(500), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.deadline_of(b), Some(1_500));
    }

    #[test]
    fn double_unregister_is_an_error() {
        let wheel = wheel(32);
        let h = wheel.register(10, Box::new(|_| 0));
        assert!(wheel.unregister(h).is_ok());
        assert!(wheel.unregister(h).is_err());
        assert!(wheel.reschedule(h, 5).is_err());
    }

    #[test]
    fn owner_timers_are_removed_together() {
        let wheel = wheel(32);
        let owner = ObjectId::from_raw(4);
        wheel.register_owned(Some(owner), 10, Box::new(|_| 0));
        wheel.register_owned(Some(owner), 0, Box::new(|_| 0));
        wheel.register(10, Box::new(|_| 0));
        assert_eq!(wheel.unregister_owner(owner), 2);
        assert_eq!(wheel.len(), 1);
    }
}
