//! Bounded SPSC ring - the only objects shared between tasks.
//!
//! Split producer/consumer handles over an `rtrb` ring buffer, which
//! implements the classic protocol: the producer publishes with a release
//! store on the tail, the consumer advances with an acquire load on the
//! head, and the complementary reads use acquire. FIFO, no ABA, wait-free
//! push when not full and pop when not empty.
//!
//! Two distinct instances exist in the engine: the command ring and the
//! journal ring.

/// Create a bounded ring of the given capacity and split it into its
/// producer and consumer halves.
pub fn spsc_ring<T>(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (RingProducer { inner: producer }, RingConsumer { inner: consumer })
}

/// The writing half. Owned by exactly one thread; never waits inside the
/// ring.
pub struct RingProducer<T> {
    inner: rtrb::Producer<T>,
}

impl<T> RingProducer<T> {
    /// Push an item, or hand it back if the ring is full.
    #[inline]
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        match self.inner.push(item) {
            Ok(()) => Ok(()),
            Err(rtrb::PushError::Full(item)) => Err(item),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.buffer().capacity()
    }

    /// Slots currently free for pushing.
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.inner.slots()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

/// The reading half. Owned by exactly one thread; may spin or yield
/// between empty polls.
pub struct RingConsumer<T> {
    inner: rtrb::Consumer<T>,
}

impl<T> RingConsumer<T> {
    /// Pop the oldest item, or `None` if the ring is empty.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        self.inner.pop().ok()
    }

    /// Items currently available for popping.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.slots()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.buffer().capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
