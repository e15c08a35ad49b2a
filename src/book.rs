//! Order book - two ordered sides plus an O(1) order index.
//!
//! Each side is an ordered map from price to [`PriceLevel`] with a cached
//! best price, so best-price lookup is constant time while insert and
//! cancel pay the map's O(log L) in the number of live levels. The order
//! index maps identifier to a locator (slot, side, price); the intrusive
//! level linkage makes cancel from any queue position O(1) once located.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::command::{OrderId, Price, Quantity, Side};
use crate::pool::{OrderPool, PoolIndex, NULL_INDEX};
use crate::price_level::PriceLevel;

/// Where a resting order lives: its pool slot and its price level.
///
/// Locators are produced on insertion and stay valid until the order is
/// unlinked; callers treat them as opaque.
#[derive(Clone, Copy, Debug)]
pub struct Locator {
    pub slot: PoolIndex,
    pub side: Side,
    pub price: Price,
}

/// Aggregated view of one price level, safe to hand across threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSnapshot {
    pub price: Price,
    pub quantity: Quantity,
    pub orders: u32,
}

/// Top-N aggregated view of both sides, best price first.
#[derive(Clone, Debug, Default)]
pub struct BookSnapshot {
    pub bids: Vec<LevelSnapshot>,
    pub asks: Vec<LevelSnapshot>,
}

/// One side of the book: price levels ordered by the side's preference,
/// with O(1) cached best-price lookup.
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Price, PriceLevel>,
    /// Cached extremal price, maintained on every add/remove of a level's
    /// extremal entry
    best: Option<Price>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            best: None,
        }
    }

    /// `true` if `a` is a better price than `b` for this side
    #[inline]
    fn better(&self, a: Price, b: Price) -> bool {
        match self.side {
            Side::Buy => a > b,
            Side::Sell => a < b,
        }
    }

    /// Best resting price (highest bid / lowest ask).
    #[inline]
    pub fn best_price(&self) -> Option<Price> {
        self.best
    }

    /// Worst resting price (lowest bid / highest ask). Market orders
    /// convert against this on the opposite side.
    #[inline]
    pub fn worst_price(&self) -> Option<Price> {
        match self.side {
            Side::Buy => self.levels.keys().next().copied(),
            Side::Sell => self.levels.keys().next_back().copied(),
        }
    }

    #[inline]
    pub fn get_level(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    #[inline]
    pub fn get_level_mut(&mut self, price: Price) -> Option<&mut PriceLevel> {
        self.levels.get_mut(&price)
    }

    /// Get or create the level at `price` and refresh the cached best.
    #[inline]
    pub fn get_or_create_level(&mut self, price: Price) -> &mut PriceLevel {
        let improves = match self.best {
            None => true,
            Some(best) => self.better(price, best),
        };
        if improves {
            self.best = Some(price);
        }
        self.levels.entry(price).or_insert_with(PriceLevel::new)
    }

    /// Drop an empty level and refresh the cached best if it was extremal.
    pub fn remove_level(&mut self, price: Price) {
        debug_assert!(
            self.levels.get(&price).map_or(true, |l| l.is_empty()),
            "removing a non-empty level"
        );
        self.levels.remove(&price);
        if self.best == Some(price) {
            self.best = match self.side {
                Side::Buy => self.levels.keys().next_back().copied(),
                Side::Sell => self.levels.keys().next().copied(),
            };
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// The underlying price-ordered map (ascending by key).
    #[inline]
    pub fn levels(&self) -> &BTreeMap<Price, PriceLevel> {
        &self.levels
    }

    /// Top-N levels, best price first.
    pub fn snapshot(&self, max_levels: usize) -> Vec<LevelSnapshot> {
        let view = |(&price, level): (&Price, &PriceLevel)| LevelSnapshot {
            price,
            quantity: level.total_qty,
            orders: level.count,
        };
        match self.side {
            Side::Buy => self.levels.iter().rev().take(max_levels).map(view).collect(),
            Side::Sell => self.levels.iter().take(max_levels).map(view).collect(),
        }
    }
}

/// The full book: bids, asks, and the identifier index.
pub struct OrderBook {
    pub bids: BookSide,
    pub asks: BookSide,
    index: FxHashMap<OrderId, Locator>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            index: FxHashMap::default(),
        }
    }

    pub fn with_order_capacity(orders: usize) -> Self {
        Self {
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            index: FxHashMap::with_capacity_and_hasher(orders, Default::default()),
        }
    }

    #[inline]
    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    #[inline]
    pub fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    // ========================================================================
    // Order Management
    // ========================================================================

    /// Link an already-populated record into its price level and index it.
    ///
    /// # Returns
    /// `false` if the identifier is already present (nothing changes).
    pub fn insert(&mut self, pool: &mut OrderPool, slot: PoolIndex) -> bool {
        let (id, side, price) = {
            let record = pool.get(slot);
            (record.id, record.side, record.price)
        };

        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id, Locator { slot, side, price });

        let book_side = self.side_mut(side);
        let level = book_side.get_or_create_level(price);
        level.push_back(pool, slot);

        true
    }

    /// Unlink an order from its level and index (cancel path).
    ///
    /// The slot is NOT released to the pool; the caller does that.
    pub fn remove(&mut self, pool: &mut OrderPool, id: OrderId) -> Option<Locator> {
        let locator = self.index.remove(&id)?;

        let book_side = self.side_mut(locator.side);
        let level_empty = match book_side.get_level_mut(locator.price) {
            Some(level) => level.remove(pool, locator.slot),
            None => false,
        };
        if level_empty {
            book_side.remove_level(locator.price);
        }

        Some(locator)
    }

    /// Drop the index entry for an order fully filled during matching.
    #[inline]
    pub fn remove_from_index(&mut self, id: OrderId) {
        self.index.remove(&id);
    }

    #[inline]
    pub fn locator(&self, id: OrderId) -> Option<&Locator> {
        self.index.get(&id)
    }

    #[inline]
    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains_key(&id)
    }

    // ========================================================================
    // Utility
    // ========================================================================

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Aggregate (quantity, order count) resting at one price.
    pub fn depth_at(&self, side: Side, price: Price) -> (Quantity, u32) {
        self.side(side)
            .get_level(price)
            .map(|l| (l.total_qty, l.count))
            .unwrap_or((0, 0))
    }

    /// Top-N aggregated view of both sides.
    pub fn snapshot(&self, max_levels: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self.bids.snapshot(max_levels),
            asks: self.asks.snapshot(max_levels),
        }
    }

    /// Audit every structural invariant; panics with a description on the
    /// first violation. Debugging and test aid, not for the hot path.
    pub fn check_invariants(&self, pool: &OrderPool) {
        let mut seen = 0usize;
        for book_side in [&self.bids, &self.asks] {
            // Cached best must equal the extremal key
            let extremal = match book_side.side {
                Side::Buy => book_side.levels.keys().next_back().copied(),
                Side::Sell => book_side.levels.keys().next().copied(),
            };
            assert_eq!(book_side.best, extremal, "stale cached best price");

            for (&price, level) in &book_side.levels {
                assert!(level.count >= 1, "empty level retained at {}", price);

                let mut sum: Quantity = 0;
                let mut walked = 0u32;
                let mut slot = level.head;
                let mut prev = NULL_INDEX;
                while slot != NULL_INDEX {
                    let record = pool.get(slot);
                    assert_eq!(record.price, price, "record price differs from level");
                    assert_eq!(record.side, book_side.side, "record on wrong side");
                    assert!(record.remaining > 0, "filled order resting in book");
                    assert!(record.remaining <= record.initial, "residual exceeds initial");
                    assert_eq!(record.prev, prev, "broken back-link at {}", price);

                    let locator = self
                        .index
                        .get(&record.id)
                        .unwrap_or_else(|| panic!("order {} missing from index", record.id));
                    assert_eq!(locator.slot, slot, "index locator resolves elsewhere");
                    assert_eq!(locator.price, price);
                    assert_eq!(locator.side, book_side.side);

                    sum += record.remaining;
                    walked += 1;
                    prev = slot;
                    slot = record.next;
                }
                assert_eq!(level.tail, prev, "level tail out of sync");
                assert_eq!(level.count, walked, "level count out of sync");
                assert_eq!(level.total_qty, sum, "level aggregate out of sync");
                seen += walked as usize;
            }
        }
        assert_eq!(seen, self.index.len(), "index size differs from book contents");

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            assert!(bid < ask, "book left crossed: bid {} >= ask {}", bid, ask);
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("order_count", &self.index.len())
            .finish()
    }
}
