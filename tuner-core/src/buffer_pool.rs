//! # Buffer Pool Module
//!
//! A fixed set of sample buffers cycling between capture and analysis.
//!
//! ## Features
//! - `K` buffers allocated once, never created or destroyed afterwards
//! - Blocking [`BufferPool::acquire`] for backpressure, [`BufferPool::try_acquire`] for callers that drop
//! - Ownership tracked per side: producer, consumer or queued
//! - Buffers return to the queue when their [`PooledBuffer`] is dropped

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use log::debug;
use parking_lot::Mutex;

use crate::float::Float;

/// Side currently owning a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    /// Capture, while filling
    Producer,
    /// Analysis, while processing
    Consumer,
}

/// Snapshot of where the pool's buffers are.
///
/// `queued + held_by_producer + held_by_consumer == total` in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    pub queued: usize,
    pub held_by_producer: usize,
    pub held_by_consumer: usize,
    pub total: usize,
}

struct Slot<T> {
    id: usize,
    samples: Vec<T>,
}

struct Shared<T> {
    free_tx: Sender<Slot<T>>,
    free_rx: Receiver<Slot<T>>,
    occupancy: Mutex<Occupancy>,
    buffer_len: usize,
}

fn lend<T>(shared: &Arc<Shared<T>>, slot: Slot<T>) -> PooledBuffer<T> {
    let mut occupancy = shared.occupancy.lock();
    occupancy.queued -= 1;
    occupancy.held_by_producer += 1;
    PooledBuffer {
        slot: Some(slot),
        holder: Holder::Producer,
        pool: Arc::clone(shared),
    }
}

/// Bounded FIFO of reusable sample buffers.
///
/// Cloning the pool clones a handle; all clones share the same buffers.
pub struct BufferPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Float> BufferPool<T> {
    /// Allocates `depth` zeroed buffers of `buffer_len` samples.
    ///
    /// # Panics
    /// If `depth` or `buffer_len` is zero.
    pub fn new(depth: usize, buffer_len: usize) -> Self {
        assert!(depth > 0, "buffer pool needs at least one buffer");
        assert!(buffer_len > 0, "pooled buffers must not be empty");

        let (free_tx, free_rx) = bounded(depth);
        for id in 0..depth {
            let slot = Slot {
                id,
                samples: vec![T::zero(); buffer_len],
            };
            // Capacity equals depth, so this never blocks.
            let _ = free_tx.send(slot);
        }

        debug!("[POOL] Allocated {} buffers of {} samples", depth, buffer_len);
        Self {
            shared: Arc::new(Shared {
                free_tx,
                free_rx,
                occupancy: Mutex::new(Occupancy {
                    queued: depth,
                    total: depth,
                    ..Occupancy::default()
                }),
                buffer_len,
            }),
        }
    }
}

impl<T> BufferPool<T> {
    /// Takes the oldest free buffer, blocking until one is released.
    pub fn acquire(&self) -> PooledBuffer<T> {
        // The pool holds its own sender, so the channel never disconnects.
        let slot = match self.shared.free_rx.recv() {
            Ok(slot) => slot,
            Err(_) => unreachable!("buffer pool channel disconnected"),
        };
        lend(&self.shared, slot)
    }

    /// Takes the oldest free buffer if one is available.
    pub fn try_acquire(&self) -> Option<PooledBuffer<T>> {
        let slot = self.shared.free_rx.try_recv().ok()?;
        Some(lend(&self.shared, slot))
    }

    /// Returns a buffer to the queue. Equivalent to dropping it.
    pub fn release(&self, buffer: PooledBuffer<T>) {
        drop(buffer);
    }

    pub fn occupancy(&self) -> Occupancy {
        *self.shared.occupancy.lock()
    }

    pub fn depth(&self) -> usize {
        self.shared.occupancy.lock().total
    }

    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Dereferences to its samples. Dropping it puts the buffer back at the end
/// of the pool's queue.
pub struct PooledBuffer<T> {
    slot: Option<Slot<T>>,
    holder: Holder,
    pool: Arc<Shared<T>>,
}

impl<T> PooledBuffer<T> {
    /// Stable identity of the underlying buffer, in `0..depth`.
    pub fn id(&self) -> usize {
        self.slot().id
    }

    pub fn holder(&self) -> Holder {
        self.holder
    }

    /// Passes a filled buffer from the producer to the consumer.
    ///
    /// # Panics
    /// If the buffer is already held by the consumer.
    pub fn hand_off(mut self) -> Self {
        assert_eq!(
            self.holder,
            Holder::Producer,
            "only a producer-held buffer can be handed off"
        );
        let mut occupancy = self.pool.occupancy.lock();
        occupancy.held_by_producer -= 1;
        occupancy.held_by_consumer += 1;
        drop(occupancy);
        self.holder = Holder::Consumer;
        self
    }

    fn slot(&self) -> &Slot<T> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("pooled buffer used after release"),
        }
    }

    fn slot_mut(&mut self) -> &mut Slot<T> {
        match &mut self.slot {
            Some(slot) => slot,
            None => unreachable!("pooled buffer used after release"),
        }
    }
}

impl<T> Deref for PooledBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.slot().samples
    }
}

impl<T> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.slot_mut().samples
    }
}

impl<T> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let mut occupancy = self.pool.occupancy.lock();
        match self.holder {
            Holder::Producer => occupancy.held_by_producer -= 1,
            Holder::Consumer => occupancy.held_by_consumer -= 1,
        }
        occupancy.queued += 1;
        // Sent under the lock: at most `total` slots exist, so the queue has room.
        let _ = self.pool.free_tx.try_send(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn conserved(occupancy: Occupancy) -> bool {
        occupancy.queued + occupancy.held_by_producer + occupancy.held_by_consumer
            == occupancy.total
    }

    #[test]
    fn fresh_pool_is_fully_queued() {
        let pool = BufferPool::<f32>::new(3, 16);
        assert_eq!(
            pool.occupancy(),
            Occupancy {
                queued: 3,
                held_by_producer: 0,
                held_by_consumer: 0,
                total: 3
            }
        );
        assert_eq!(pool.buffer_len(), 16);
    }

    #[test]
    fn occupancy_is_conserved_through_a_cycle() {
        let pool = BufferPool::<f32>::new(3, 8);

        let first = pool.acquire();
        let second = pool.acquire();
        assert!(conserved(pool.occupancy()));
        assert_eq!(pool.occupancy().held_by_producer, 2);

        let first = first.hand_off();
        assert_eq!(first.holder(), Holder::Consumer);
        assert_eq!(pool.occupancy().held_by_consumer, 1);
        assert!(conserved(pool.occupancy()));

        pool.release(first);
        drop(second);
        assert_eq!(pool.occupancy().queued, 3);
        assert!(conserved(pool.occupancy()));
    }

    #[test]
    fn held_buffers_are_never_handed_out_twice() {
        let pool = BufferPool::<f64>::new(4, 4);
        let held: Vec<_> = (0..4).map(|_| pool.acquire()).collect();
        let ids: HashSet<_> = held.iter().map(PooledBuffer::id).collect();
        assert_eq!(ids.len(), 4);
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn buffers_cycle_in_fifo_order() {
        let pool = BufferPool::<f32>::new(2, 4);
        let a = pool.acquire();
        let b = pool.acquire();
        let (a_id, b_id) = (a.id(), b.id());
        drop(b);
        drop(a);
        assert_eq!(pool.acquire().id(), b_id);
        assert_eq!(pool.acquire().id(), a_id);
    }

    #[test]
    fn samples_survive_the_hand_off() {
        let pool = BufferPool::<f32>::new(2, 4);
        let mut buffer = pool.acquire();
        buffer.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let buffer = buffer.hand_off();
        assert_eq!(&buffer[..], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn acquire_blocks_until_a_release() {
        let pool = BufferPool::<f32>::new(2, 4);
        let a = pool.acquire();
        let b = pool.acquire();
        let released_id = a.id();

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(a.hand_off());
        });
        let next = pool.acquire();
        assert_eq!(next.id(), released_id);
        consumer.join().unwrap();
        drop(b);
        drop(next);
        assert!(conserved(pool.occupancy()));
        assert_eq!(pool.occupancy().queued, 2);
    }

    #[test]
    #[should_panic(expected = "only a producer-held buffer")]
    fn consumer_buffers_cannot_be_handed_off_again() {
        let pool = BufferPool::<f32>::new(2, 4);
        let buffer = pool.acquire().hand_off();
        let _ = buffer.hand_off();
    }
}
