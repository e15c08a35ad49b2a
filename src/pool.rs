//! Order pool - preallocated supply of order records with O(1) recycling.
//!
//! The pool hands out slot indices into a contiguous block of records,
//! threading a LIFO free list through the `next` field of unused slots.
//! It is owned by the matcher thread and never frees memory during
//! operation; exhaustion grows the block by one record (the documented
//! soft failure mode) rather than failing the command.

use std::fmt;

use crate::command::{OrderId, OrderKind, Price, Quantity, Side};

/// Sentinel value representing a null/invalid slot
pub const NULL_INDEX: u32 = u32::MAX;

/// Type alias for pool slot indices - compressed pointers.
/// u32 instead of a 64-bit pointer halves linkage metadata.
pub type PoolIndex = u32;

/// A single order record - exactly 64 bytes (one cache line).
///
/// Identity (id, side, kind, price, initial quantity) is fixed for the
/// record's lifetime in the book; only `remaining` decreases as fills
/// occur. `next`/`prev` link the record into its price level's FIFO queue.
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct OrderRecord {
    // === Hot data (read on every match iteration) ===
    /// Limit price in ticks
    pub price: Price,

    /// Residual (unfilled) quantity
    pub remaining: Quantity,

    /// Quantity at acceptance
    pub initial: Quantity,

    /// External order identifier
    pub id: OrderId,

    // === Linkage (FIFO queue within a PriceLevel) ===
    /// Slot of the next order at the same price level
    pub next: PoolIndex,

    /// Slot of the previous order (enables O(1) cancel)
    pub prev: PoolIndex,

    pub side: Side,
    pub kind: OrderKind,

    _reserved: [u8; 22],
}

const _: () = assert!(
    std::mem::size_of::<OrderRecord>() == 64,
    "OrderRecord must be exactly 64 bytes (one cache line)"
);

const _: () = assert!(
    std::mem::align_of::<OrderRecord>() == 64,
    "OrderRecord must be 64-byte aligned"
);

impl OrderRecord {
    /// Create an empty/uninitialized record (for the free list)
    #[inline]
    pub const fn empty() -> Self {
        Self {
            price: 0,
            remaining: 0,
            initial: 0,
            id: 0,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            side: Side::Buy,
            kind: OrderKind::GoodTillCancel,
            _reserved: [0u8; 22],
        }
    }

    /// Repopulate a recycled record with a new order's identity.
    #[inline]
    pub fn reset(
        &mut self,
        kind: OrderKind,
        id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) {
        self.kind = kind;
        self.id = id;
        self.side = side;
        self.price = price;
        self.initial = quantity;
        self.remaining = quantity;
        self.next = NULL_INDEX;
        self.prev = NULL_INDEX;
    }

    /// Consume residual quantity after a match.
    #[inline]
    pub fn fill(&mut self, quantity: Quantity) {
        debug_assert!(
            quantity <= self.remaining,
            "fill exceeds residual quantity"
        );
        self.remaining -= quantity;
    }

    #[inline]
    pub const fn is_filled(&self) -> bool {
        self.remaining == 0
    }

    #[inline]
    pub const fn filled_quantity(&self) -> Quantity {
        self.initial - self.remaining
    }
}

impl fmt::Debug for OrderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderRecord")
            .field("id", &self.id)
            .field("side", &self.side)
            .field("kind", &self.kind)
            .field("price", &self.price)
            .field("remaining", &self.remaining)
            .field("initial", &self.initial)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Preallocated record supply with O(1) acquire and release.
///
/// The free list is threaded through the `next` field of unused records.
/// No locks: the pool lives on the matcher thread. Cross-thread releases
/// must be funneled through the command queue.
pub struct OrderPool {
    /// Contiguous block of records
    records: Vec<OrderRecord>,

    /// Head of the free list (slot of first available record)
    free_head: PoolIndex,

    /// Number of currently acquired records
    in_use: u32,

    /// Times the pool had to grow past its configured size
    grown: u64,
}

impl OrderPool {
    /// Create a pool with `initial_size` preallocated records.
    ///
    /// # Panics
    /// Panics if `initial_size` is not below `NULL_INDEX`.
    pub fn new(initial_size: u32) -> Self {
        assert!(
            initial_size < NULL_INDEX,
            "pool size must be less than NULL_INDEX"
        );

        let mut records = vec![OrderRecord::empty(); initial_size as usize];

        // Thread the free list through all records
        for i in 0..initial_size.saturating_sub(1) {
            records[i as usize].next = i + 1;
        }
        if initial_size > 0 {
            records[(initial_size - 1) as usize].next = NULL_INDEX;
        }

        Self {
            records,
            free_head: if initial_size > 0 { 0 } else { NULL_INDEX },
            in_use: 0,
            grown: 0,
        }
    }

    /// Acquire a record slot.
    ///
    /// When the free list is exhausted the pool allocates one more record
    /// and counts the growth - the soft failure mode. Steady-state
    /// operation within the configured size never allocates.
    ///
    /// # Complexity
    /// O(1) amortized
    #[inline]
    pub fn acquire(&mut self) -> PoolIndex {
        if self.free_head == NULL_INDEX {
            let index = self.records.len() as u32;
            assert!(index < NULL_INDEX, "pool exceeded addressable slots");
            self.records.push(OrderRecord::empty());
            self.grown += 1;
            self.in_use += 1;
            return index;
        }

        let index = self.free_head;
        self.free_head = self.records[index as usize].next;
        self.in_use += 1;

        self.records[index as usize].next = NULL_INDEX;
        self.records[index as usize].prev = NULL_INDEX;

        index
    }

    /// Return a record slot to the free list.
    ///
    /// The caller must have unlinked the record from its price level
    /// first; releasing a slot twice is a programmer error caught only
    /// in debug builds.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn release(&mut self, index: PoolIndex) {
        debug_assert!((index as usize) < self.records.len(), "slot out of bounds");
        debug_assert!(self.in_use > 0, "double release detected");
        debug_assert!(
            self.records[index as usize].prev == NULL_INDEX
                && self.records[index as usize].next == NULL_INDEX,
            "released record is still linked into a price level"
        );

        let record = &mut self.records[index as usize];
        record.remaining = 0;
        record.initial = 0;
        record.id = 0;
        record.price = 0;
        record.next = self.free_head;
        self.free_head = index;
        self.in_use -= 1;
    }

    /// Get an immutable reference to a record.
    #[inline]
    pub fn get(&self, index: PoolIndex) -> &OrderRecord {
        debug_assert!((index as usize) < self.records.len(), "slot out of bounds");
        &self.records[index as usize]
    }

    /// Get a mutable reference to a record.
    #[inline]
    pub fn get_mut(&mut self, index: PoolIndex) -> &mut OrderRecord {
        debug_assert!((index as usize) < self.records.len(), "slot out of bounds");
        &mut self.records[index as usize]
    }

    /// Number of currently acquired records.
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    /// Total number of records, including any growth past the configured size.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.records.len() as u32
    }

    /// Times the pool grew past its configured size.
    #[inline]
    pub fn grown(&self) -> u64 {
        self.grown
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    /// Pre-fault all record pages so the hot path never page-faults.
    pub fn warm_up(&mut self) {
        for record in &mut self.records {
            unsafe {
                std::ptr::write_volatile(&mut record._reserved[0], 0);
            }
        }
    }
}

impl fmt::Debug for OrderPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use)
            .field("grown", &self.grown)
            .field("free_head", &self.free_head)
            .finish()
    }
}
