//! Object cache: a segmented slab allocator for hot-path records.
//!
//! Command records and event nodes are allocated here instead of going
//! through the global allocator on every submission. Slots live in 4 KiB
//! segments that are never moved or returned until the cache itself is
//! gone, so a slot pointer stays valid for the lifetime of the cache.
//!
//! ```text
//!   ObjectCache<T> ──Arc──► CacheShared<T>
//!                             │ Mutex<CacheState>
//!                             │   segments: [seg0][seg1][seg2]...
//!                             │   free:     [ptr, ptr, ...]  (pre-reserved)
//!   CacheBox<T> ────Arc──────►┘
//! ```
//!
//! A [`CacheBox`] keeps its cache alive, so dropping the last
//! [`ObjectCache`] handle while boxes are outstanding is safe: memory is
//! released when the last box goes away.

use crate::error::{CoreError, CoreResult};
use hwsim_common::consts::CACHE_SEGMENT_BYTES;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fmt;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::Arc;

type Slot<T> = UnsafeCell<MaybeUninit<T>>;

/// Allocation counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Segments allocated so far.
    pub segments: usize,
    /// Total slot capacity across all segments.
    pub capacity: usize,
    /// Slots currently handed out.
    pub allocated: usize,
}

struct CacheState<T> {
    segments: Vec<NonNull<[Slot<T>]>>,
    free: Vec<NonNull<Slot<T>>>,
    allocated: usize,
}

struct CacheShared<T> {
    name: String,
    slots_per_segment: usize,
    max_segments: Option<usize>,
    state: Mutex<CacheState<T>>,
}

// Slots are only reached through the mutex (free list) or through the
// unique CacheBox that owns them.
unsafe impl<T: Send> Send for CacheShared<T> {}
unsafe impl<T: Send> Sync for CacheShared<T> {}

impl<T> CacheShared<T> {
    fn exhausted(&self) -> CoreError {
        CoreError::CacheExhausted {
            cache: self.name.clone(),
        }
    }

    /// Add one segment and push its slots on the free list.
    fn grow(&self, state: &mut CacheState<T>) -> CoreResult<()> {
        if self
            .max_segments
            .is_some_and(|max| state.segments.len() >= max)
        {
            return Err(self.exhausted());
        }

        if state.segments.len() == state.segments.capacity() {
            let additional = state.segments.len().max(1);
            state
                .segments
                .try_reserve_exact(additional)
                .map_err(|_| self.exhausted())?;
        }

        // Every slot ever created must fit in the free list without a
        // reallocation on the release path.
        let total = (state.segments.len() + 1) * self.slots_per_segment;
        state
            .free
            .try_reserve(total - state.free.len())
            .map_err(|_| self.exhausted())?;

        let mut slots: Vec<Slot<T>> = Vec::new();
        slots
            .try_reserve_exact(self.slots_per_segment)
            .map_err(|_| self.exhausted())?;
        slots.extend((0..self.slots_per_segment).map(|_| UnsafeCell::new(MaybeUninit::uninit())));
        let segment = NonNull::from(Box::leak(slots.into_boxed_slice()));

        let base = segment.cast::<Slot<T>>();
        for i in (0..self.slots_per_segment).rev() {
            // SAFETY: i < segment length.
            state.free.push(unsafe { base.add(i) });
        }
        state.segments.push(segment);
        Ok(())
    }

    fn release(&self, slot: NonNull<Slot<T>>) {
        let mut state = self.state.lock();
        state.allocated -= 1;
        state.free.push(slot);
    }
}

impl<T> Drop for CacheShared<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.free.clear();
        for segment in state.segments.drain(..) {
            // SAFETY: produced by Box::leak in grow(); no CacheBox outlives
            // the Arc it holds, so no slot is in use here.
            drop(unsafe { Box::from_raw(segment.as_ptr()) });
        }
    }
}

/// Handle to a named slab cache of `T` records.
///
/// Cloning the handle shares the same cache.
pub struct ObjectCache<T> {
    shared: Arc<CacheShared<T>>,
}

impl<T> Clone for ObjectCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ObjectCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T> ObjectCache<T> {
    /// Create an unbounded cache.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Create a cache that refuses to grow past `max_segments` segments.
    pub fn with_limit(name: impl Into<String>, max_segments: usize) -> Self {
        Self::build(name.into(), Some(max_segments))
    }

    fn build(name: String, max_segments: Option<usize>) -> Self {
        let slot_size = std::mem::size_of::<Slot<T>>().max(1);
        let slots_per_segment = (CACHE_SEGMENT_BYTES / slot_size).max(1);
        Self {
            shared: Arc::new(CacheShared {
                name,
                slots_per_segment,
                max_segments,
                state: Mutex::new(CacheState {
                    segments: Vec::new(),
                    free: Vec::new(),
                    allocated: 0,
                }),
            }),
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Slots carved out of each segment.
    pub fn slots_per_segment(&self) -> usize {
        self.shared.slots_per_segment
    }

    /// Move `value` into a free slot.
    ///
    /// # Errors
    /// `CoreError::CacheExhausted` when a new segment is needed and either
    /// the segment limit is reached or the heap refuses the allocation.
    pub fn alloc(&self, value: T) -> CoreResult<CacheBox<T>> {
        let slot = {
            let mut state = self.shared.state.lock();
            let slot = match state.free.pop() {
                Some(slot) => slot,
                None => {
                    self.shared.grow(&mut state)?;
                    state.free.pop().ok_or_else(|| self.shared.exhausted())?
                }
            };
            state.allocated += 1;
            slot
        };

        // SAFETY: the slot came off the free list, so nothing else refers to it.
        unsafe { UnsafeCell::raw_get(slot.as_ptr()).write(MaybeUninit::new(value)) };

        Ok(CacheBox {
            slot,
            cache: Arc::clone(&self.shared),
        })
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            segments: state.segments.len(),
            capacity: state.segments.len() * self.shared.slots_per_segment,
            allocated: state.allocated,
        }
    }

    #[cfg(test)]
    fn downgrade(&self) -> std::sync::Weak<CacheShared<T>> {
        Arc::downgrade(&self.shared)
    }
}

/// Owned value living in an [`ObjectCache`] slot.
///
/// Dropping the box drops the value and returns the slot in O(1).
pub struct CacheBox<T> {
    slot: NonNull<Slot<T>>,
    cache: Arc<CacheShared<T>>,
}

unsafe impl<T: Send> Send for CacheBox<T> {}
unsafe impl<T: Sync> Sync for CacheBox<T> {}

impl<T> CacheBox<T> {
    fn value_ptr(&self) -> *mut T {
        UnsafeCell::raw_get(self.slot.as_ptr()).cast::<T>()
    }

    /// Move the value out and return the slot.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: the slot is initialized and `this` is never dropped, so
        // the value and the Arc are each read exactly once.
        let value = unsafe { ptr::read(this.value_ptr()) };
        let cache = unsafe { ptr::read(&this.cache) };
        cache.release(this.slot);
        value
    }
}

impl<T> Deref for CacheBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized in alloc(), exclusively owned by this box.
        unsafe { &*self.value_ptr() }
    }
}

impl<T> DerefMut for CacheBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in deref(), and &mut self guarantees uniqueness.
        unsafe { &mut *self.value_ptr() }
    }
}

impl<T> Drop for CacheBox<T> {
    fn drop(&mut self) {
        // SAFETY: initialized in alloc() and not yet dropped.
        unsafe { ptr::drop_in_place(self.value_ptr()) };
        self.cache.release(self.slot);
    }
}

impl<T: fmt::Debug> fmt::Debug for CacheBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// ─── Named cache set ────────────────────────────────────────────────

struct CacheEntry {
    type_id: TypeId,
    users: usize,
    cache: Box<dyn Any + Send + Sync>,
}

/// Refcounted registry of named caches.
///
/// `acquire` with an existing name and the same record type returns the
/// same cache and bumps its user count. `release` drops the registry's
/// handle once the count reaches zero; the memory itself goes away when
/// the last [`CacheBox`] and [`ObjectCache`] handle are gone.
#[derive(Default)]
pub struct CacheSet {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the cache called `name`.
    ///
    /// # Errors
    /// `CoreError::InvalidState` if `name` is already used for another type.
    pub fn acquire<T: Send + 'static>(&self, name: &str) -> CoreResult<ObjectCache<T>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(name) {
            let cache = entry
                .cache
                .downcast_ref::<ObjectCache<T>>()
                .filter(|_| entry.type_id == TypeId::of::<T>())
                .ok_or_else(|| {
                    CoreError::InvalidState(format!("cache '{name}' holds another record type"))
                })?
                .clone();
            entry.users += 1;
            return Ok(cache);
        }

        let cache = ObjectCache::<T>::new(name);
        entries.insert(
            name.to_string(),
            CacheEntry {
                type_id: TypeId::of::<T>(),
                users: 1,
                cache: Box::new(cache.clone()),
            },
        );
        Ok(cache)
    }

    /// Drop one user of `name`. Returns `true` when this was the last user.
    pub fn release(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };
        entry.users -= 1;
        if entry.users == 0 {
            entries.remove(name);
            true
        } else {
            false
        }
    }

    /// Number of users of `name` (0 when absent).
    pub fn users(&self, name: &str) -> usize {
        self.entries.lock().get(name).map_or(0, |e| e.users)
    }
}
