//! Multi-producer multi-consumer work queue of tuple indexes
//!
//! The queue is an append-only array of atomic slots with two cursors:
//! `head` is the next free slot and `tail` the next slot to dequeue. A slot
//! holding `0` is empty. Slots keep their values after being dequeued, so a
//! consumer can rewind `tail` with [`LockFreeQueue::reset_dequeue_position`]
//! and replay a range; the maintenance tasks use this to rescan facts queued
//! by earlier levels.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{CwmError, CwmResult};
use crate::store::{TupleIndex, INVALID_TUPLE_INDEX};

const SEGMENT_SHIFT: u32 = 12;
const SEGMENT_SIZE: usize = 1 << SEGMENT_SHIFT;
const SEGMENT_MASK: u64 = SEGMENT_SIZE as u64 - 1;

fn new_segment() -> Box<[AtomicU64]> {
    (0..SEGMENT_SIZE).map(|_| AtomicU64::new(0)).collect()
}

#[derive(Default)]
pub struct LockFreeQueue {
    segments: RwLock<Vec<Box<[AtomicU64]>>>,
    head: AtomicU64,
    tail: AtomicU64,
}

impl LockFreeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, position: u64) -> TupleIndex {
        let segments = self.segments.read();
        segments
            .get((position >> SEGMENT_SHIFT) as usize)
            .map(|segment| segment[(position & SEGMENT_MASK) as usize].load(Ordering::Acquire))
            .unwrap_or(INVALID_TUPLE_INDEX)
    }

    fn ensure_position(&self, position: u64) -> CwmResult<()> {
        let count = (position >> SEGMENT_SHIFT) as usize + 1;
        if self.segments.read().len() >= count {
            return Ok(());
        }
        let mut segments = self.segments.write();
        let missing = count.saturating_sub(segments.len());
        if missing > 0 {
            segments
                .try_reserve(missing)
                .map_err(|_| CwmError::resource_exhausted("work queue", count * SEGMENT_SIZE))?;
            segments.extend((0..missing).map(|_| new_segment()));
        }
        Ok(())
    }

    /// Append `value`, which must not be `0`
    pub fn enqueue(&self, value: TupleIndex) -> CwmResult<()> {
        if value == INVALID_TUPLE_INDEX {
            return Err(CwmError::invariant_violation("cannot enqueue the invalid tuple index"));
        }
        loop {
            let position = self.head.load(Ordering::Acquire);
            self.ensure_position(position)?;
            let published = {
                let segments = self.segments.read();
                segments[(position >> SEGMENT_SHIFT) as usize][(position & SEGMENT_MASK) as usize]
                    .compare_exchange(INVALID_TUPLE_INDEX, value, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            };
            // Either we own the slot or another producer does; in both cases
            // head must move past it.
            let _ = self
                .head
                .compare_exchange(position, position + 1, Ordering::AcqRel, Ordering::Acquire);
            if published {
                return Ok(());
            }
        }
    }

    /// Take the next value, or `0` if none is published yet
    pub fn dequeue(&self) -> TupleIndex {
        self.dequeue_before(u64::MAX)
    }

    /// Like [`dequeue`](Self::dequeue), but never takes a slot at or after `limit`
    pub fn dequeue_before(&self, limit: u64) -> TupleIndex {
        loop {
            let position = self.tail.load(Ordering::Acquire);
            if position >= limit {
                return INVALID_TUPLE_INDEX;
            }
            let value = self.load(position);
            if value == INVALID_TUPLE_INDEX {
                return INVALID_TUPLE_INDEX;
            }
            if self
                .tail
                .compare_exchange(position, position + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return value;
            }
        }
    }

    /// The value the next dequeue would return, without taking it
    pub fn peek(&self) -> TupleIndex {
        self.load(self.tail.load(Ordering::Acquire))
    }

    pub fn can_dequeue(&self) -> bool {
        self.peek() != INVALID_TUPLE_INDEX
    }

    /// Rewind or advance the dequeue cursor
    pub fn reset_dequeue_position(&self, position: u64) {
        self.tail.store(position, Ordering::Release);
    }

    pub fn next_dequeue_position(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn first_free_position(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Number of enqueued values not yet dequeued
    pub fn unprocessed_size(&self) -> u64 {
        self.first_free_position()
            .saturating_sub(self.next_dequeue_position())
    }

    /// Value stored at `position`, whether dequeued or not
    pub fn value_at(&self, position: u64) -> TupleIndex {
        self.load(position)
    }

    /// Values stored in `start..end`
    pub fn values_between(&self, start: u64, end: u64) -> Vec<TupleIndex> {
        (start..end)
            .map(|position| self.load(position))
            .filter(|&value| value != INVALID_TUPLE_INDEX)
            .collect()
    }

    /// Enqueue every value `other` has not yet dequeued. `other` is unchanged.
    pub fn append_unprocessed(&self, other: &LockFreeQueue) -> CwmResult<()> {
        let start = other.next_dequeue_position();
        let end = other.first_free_position();
        for value in other.values_between(start, end) {
            self.enqueue(value)?;
        }
        Ok(())
    }

    /// Empty the queue and rewind both cursors
    pub fn clear(&mut self) {
        for segment in self.segments.get_mut().iter() {
            for slot in segment.iter() {
                slot.store(INVALID_TUPLE_INDEX, Ordering::Relaxed);
            }
        }
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
    }
}
