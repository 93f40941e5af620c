//! Completion ring buffer.
//!
//! Objects post `{command_id, result, payload}` from any thread; a single
//! consumer drains them in order. The ring starts at
//! [`COMPLETION_RING_CAPACITY`] entries and doubles when a post finds it
//! full, so posting never fails and never drops an entry.
//!
//! Head and tail are free-running `u64` counters; the slot index is the
//! counter masked by `capacity - 1`.

use hwsim_common::consts::COMPLETION_RING_CAPACITY;
use hwsim_common::object::{CommandId, ResultPayload};
use parking_lot::Mutex;

/// One command completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completion {
    /// Completed command.
    pub command_id: CommandId,
    /// `RESULT_OK` or a negative result code.
    pub result: i32,
    /// Optional result data.
    pub payload: Option<ResultPayload>,
}

struct Ring {
    slots: Vec<Option<Completion>>,
    head: u64,
    tail: u64,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
        }
    }

    fn len(&self) -> usize {
        (self.head - self.tail) as usize
    }

    fn mask(&self) -> u64 {
        self.slots.len() as u64 - 1
    }

    fn grow(&mut self) {
        let capacity = self.slots.len() * 2;
        let mut slots = vec![None; capacity];
        let mask = self.mask();
        for (i, pos) in (self.tail..self.head).enumerate() {
            slots[i] = self.slots[(pos & mask) as usize].take();
        }
        let len = self.len() as u64;
        self.slots = slots;
        self.tail = 0;
        self.head = len;
    }
}

/// Multi-producer, single-consumer completion ring.
pub struct CompletionRing {
    ring: Mutex<Ring>,
}

impl Default for CompletionRing {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionRing {
    /// Ring with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(COMPLETION_RING_CAPACITY)
    }

    /// Ring with `capacity` rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity.max(1).next_power_of_two())),
        }
    }

    /// Append a completion, growing the ring when full.
    pub fn post(&self, command_id: CommandId, result: i32, payload: Option<ResultPayload>) {
        let mut ring = self.ring.lock();
        if ring.len() == ring.slots.len() {
            ring.grow();
        }
        let index = (ring.head & ring.mask()) as usize;
        ring.slots[index] = Some(Completion {
            command_id,
            result,
            payload,
        });
        ring.head += 1;
    }

    /// Remove the oldest completion.
    pub fn pop(&self) -> Option<Completion> {
        let mut ring = self.ring.lock();
        if ring.head == ring.tail {
            return None;
        }
        let index = (ring.tail & ring.mask()) as usize;
        let entry = ring.slots[index].take();
        ring.tail += 1;
        entry
    }

    /// Pop entries one at a time and hand each to `handle` with the ring
    /// unlocked. Returns the number of entries drained.
    pub fn drain(&self, mut handle: impl FnMut(Completion)) -> usize {
        let mut drained = 0;
        while let Some(completion) = self.pop() {
            handle(completion);
            drained += 1;
        }
        drained
    }

    /// Unread entries.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// True when there is nothing to drain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot capacity.
    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Discard every unread entry.
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        let mask = ring.mask();
        for pos in ring.tail..ring.head {
            ring.slots[(pos & mask) as usize] = None;
        }
        ring.tail = ring.head;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_common::consts::RESULT_OK;

    fn id(n: u64) -> CommandId {
        CommandId::from_raw(n)
    }

    #[test]
    fn grows_past_initial_capacity_in_order() {
        let ring = CompletionRing::new();
        assert_eq!(ring.capacity(), 256);
        for n in 0..300 {
            ring.post(id(n), RESULT_OK, None);
        }
        assert_eq!(ring.capacity(), 512);
        assert_eq!(ring.len(), 300);

        let mut seen = Vec::new();
        assert_eq!(ring.drain(|c| seen.push(c.command_id.raw())), 300);
        assert_eq!(seen, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn grow_preserves_wrapped_entries() {
        let ring = CompletionRing::with_capacity(4);
        for n in 0..3 {
            ring.post(id(n), RESULT_OK, None);
        }
        assert_eq!(ring.pop().map(|c| c.command_id), Some(id(0)));
        assert_eq!(ring.pop().map(|c| c.command_id), Some(id(1)));
        // tail=2, head=3: the next posts wrap around the end
        for n in 3..8 {
            ring.post(id(n), -5, Some(ResultPayload::Steps(n)));
        }
        assert_eq!(ring.capacity(), 8);

        let drained: Vec<_> = std::iter::from_fn(|| ring.pop()).collect();
        let ids: Vec<u64> = drained.iter().map(|c| c.command_id.raw()).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(drained[1].payload, Some(ResultPayload::Steps(3)));
        assert_eq!(drained[1].result, -5);
    }

    #[test]
    fn handler_may_post_while_draining() {
        let ring = CompletionRing::with_capacity(2);
        ring.post(id(1), RESULT_OK, None);
        let mut seen = Vec::new();
        ring.drain(|c| {
            seen.push(c.command_id.raw());
            if c.command_id.raw() < 4 {
                ring.post(id(c.command_id.raw() + 1), RESULT_OK, None);
            }
        });
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn clear_discards_unread() {
        let ring = CompletionRing::new();
        ring.post(id(1), RESULT_OK, None);
        ring.clear();
        assert!(ring.pop().is_none());
    }
}
