//! Matcher - the single-writer core that applies commands to the book.
//!
//! One `apply` call handles one command: duplicate/unknown screening,
//! market-order conversion, the fill-or-kill depth check, insertion,
//! and the match loop that crosses the top of book until it uncrosses.
//! Trades accumulate in an internal scratch buffer that is reused across
//! commands, so the steady state allocates nothing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::book::OrderBook;
use crate::command::{
    AddOrder, Command, ModifyOrder, OrderId, OrderKind, Price, Quantity, Side, Trade,
};
use crate::pool::{OrderPool, PoolIndex, NULL_INDEX};

/// What happened to a command. Everything except `Applied` is a counted
/// no-op: the book is untouched and nothing unwinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The command mutated the book (possibly producing trades)
    Applied,
    /// Add with an identifier already resting
    DuplicateId,
    /// Cancel/Modify of an identifier not in the book
    UnknownId,
    /// Market add with no opposing liquidity
    EmptyOppositeMarket,
    /// Fill-or-kill that cannot be fully filled at its limit
    FullFillImpossible,
}

/// The matching core: pool, book, and the per-command trade buffer.
///
/// Strictly single-writer; the engine wraps it in a dedicated thread and
/// nothing else touches it.
pub struct Matcher {
    pub pool: OrderPool,
    pub book: OrderBook,
    trades: Vec<Trade>,
}

impl Matcher {
    /// Create a matcher with `pool_size` preallocated order records.
    pub fn new(pool_size: u32) -> Self {
        Self {
            pool: OrderPool::new(pool_size),
            book: OrderBook::with_order_capacity(pool_size as usize),
            trades: Vec::with_capacity(128),
        }
    }

    /// Apply one command. Trades produced by this command are available
    /// through [`Matcher::trades`] until the next `apply`.
    pub fn apply(&mut self, command: &Command, now_ns: u64) -> ApplyOutcome {
        self.trades.clear();
        match *command {
            Command::Add(ref order) => self.apply_add(order, now_ns),
            Command::Cancel(id) => self.apply_cancel(id),
            Command::Modify(ref modify) => self.apply_modify(modify, now_ns),
        }
    }

    /// Trades produced by the most recent `apply`, in match order.
    #[inline]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    // ========================================================================
    // Command handlers
    // ========================================================================

    fn apply_add(&mut self, order: &AddOrder, now_ns: u64) -> ApplyOutcome {
        if self.book.contains(order.id) {
            return ApplyOutcome::DuplicateId;
        }

        let mut kind = order.kind;
        let mut price = order.price;

        // Market orders convert to a limit at the worst opposing level,
        // then match as good-till-cancel
        if kind == OrderKind::Market {
            let worst_opposing = match order.side {
                Side::Buy => self.book.asks.worst_price(),
                Side::Sell => self.book.bids.worst_price(),
            };
            match worst_opposing {
                Some(p) => {
                    price = p;
                    kind = OrderKind::GoodTillCancel;
                }
                None => return ApplyOutcome::EmptyOppositeMarket,
            }
        }

        // Fill-or-kill: accepted only if the opposing depth at or better
        // than the limit covers the full quantity
        if kind == OrderKind::FillOrKill
            && !self.can_fully_fill(order.side, price, order.quantity)
        {
            return ApplyOutcome::FullFillImpossible;
        }

        let slot = self.pool.acquire();
        self.pool
            .get_mut(slot)
            .reset(kind, order.id, order.side, price, order.quantity);
        self.book.insert(&mut self.pool, slot);

        self.run_match_loop(order.id, now_ns);

        // Fill-and-kill never rests: cancel any residual
        if kind == OrderKind::FillAndKill {
            if let Some(locator) = self.book.remove(&mut self.pool, order.id) {
                self.pool.release(locator.slot);
            }
        }

        ApplyOutcome::Applied
    }

    fn apply_cancel(&mut self, id: OrderId) -> ApplyOutcome {
        match self.book.remove(&mut self.pool, id) {
            Some(locator) => {
                self.pool.release(locator.slot);
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::UnknownId,
        }
    }

    /// Modify is cancel-then-add under the same identifier and kind.
    /// The re-added order joins the tail of its level's queue: time
    /// priority is lost.
    fn apply_modify(&mut self, modify: &ModifyOrder, now_ns: u64) -> ApplyOutcome {
        let kind = match self.book.locator(modify.id) {
            Some(locator) => self.pool.get(locator.slot).kind,
            None => return ApplyOutcome::UnknownId,
        };

        self.apply_cancel(modify.id);
        self.apply_add(
            &AddOrder {
                id: modify.id,
                side: modify.side,
                kind,
                price: modify.price,
                quantity: modify.quantity,
            },
            now_ns,
        )
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Cross the top of book until it no longer crosses.
    ///
    /// Each iteration fills min(residuals) between the two heads. The
    /// trade prices at the resting side's price; if neither head is the
    /// incoming order the bid's price is used (the documented tie-break).
    fn run_match_loop(&mut self, incoming: OrderId, now_ns: u64) {
        loop {
            let (bid_price, ask_price) =
                match (self.book.bids.best_price(), self.book.asks.best_price()) {
                    (Some(bid), Some(ask)) => (bid, ask),
                    _ => break,
                };
            if bid_price < ask_price {
                break;
            }

            let bid_slot = match self.book.bids.get_level(bid_price) {
                Some(level) => level.peek_head(),
                None => break,
            };
            let ask_slot = match self.book.asks.get_level(ask_price) {
                Some(level) => level.peek_head(),
                None => break,
            };
            debug_assert!(bid_slot != NULL_INDEX && ask_slot != NULL_INDEX);

            let (buyer, bid_remaining) = {
                let bid = self.pool.get(bid_slot);
                (bid.id, bid.remaining)
            };
            let (seller, ask_remaining) = {
                let ask = self.pool.get(ask_slot);
                (ask.id, ask.remaining)
            };

            let quantity = bid_remaining.min(ask_remaining);
            let price = if buyer == incoming {
                ask_price
            } else if seller == incoming {
                bid_price
            } else {
                bid_price
            };

            self.pool.get_mut(bid_slot).fill(quantity);
            self.pool.get_mut(ask_slot).fill(quantity);

            // Aggregates track residuals, so both levels shrink by the
            // traded quantity before any fully-filled head is unlinked
            if let Some(level) = self.book.bids.get_level_mut(bid_price) {
                level.subtract_qty(quantity);
            }
            if let Some(level) = self.book.asks.get_level_mut(ask_price) {
                level.subtract_qty(quantity);
            }

            self.trades.push(Trade {
                buyer,
                seller,
                price,
                quantity,
                ts_ns: now_ns,
            });

            if self.pool.get(bid_slot).is_filled() {
                self.unlink_filled_head(Side::Buy, bid_price, bid_slot);
            }
            if self.pool.get(ask_slot).is_filled() {
                self.unlink_filled_head(Side::Sell, ask_price, ask_slot);
            }
        }
    }

    /// Pop a fully-filled head from its level, drop the level if empty,
    /// erase the index entry, and recycle the record.
    fn unlink_filled_head(&mut self, side: Side, price: Price, slot: PoolIndex) {
        let id = self.pool.get(slot).id;
        let book_side = self.book.side_mut(side);
        let level_empty = match book_side.get_level_mut(price) {
            Some(level) => {
                level.pop_front(&mut self.pool);
                level.is_empty()
            }
            None => false,
        };
        if level_empty {
            book_side.remove_level(price);
        }
        self.book.remove_from_index(id);
        self.pool.release(slot);
    }

    /// Walk the opposing side from best inward, summing depth at or
    /// better than `price`, until the quantity is covered or the next
    /// level is strictly worse than the limit.
    fn can_fully_fill(&self, side: Side, price: Price, quantity: Quantity) -> bool {
        let mut need = quantity;
        match side {
            Side::Buy => {
                for (&level_price, level) in self.book.asks.levels() {
                    if level_price > price {
                        break;
                    }
                    if level.total_qty >= need {
                        return true;
                    }
                    need -= level.total_qty;
                }
            }
            Side::Sell => {
                for (&level_price, level) in self.book.bids.levels().iter().rev() {
                    if level_price < price {
                        break;
                    }
                    if level.total_qty >= need {
                        return true;
                    }
                    need -= level.total_qty;
                }
            }
        }
        false
    }

    // ========================================================================
    // Utility
    // ========================================================================

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.book.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.book.best_ask()
    }

    #[inline]
    pub fn spread(&self) -> Option<Price> {
        self.book.spread()
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.book.order_count()
    }

    /// Pre-fault pool pages before entering the hot loop.
    pub fn warm_up(&mut self) {
        self.pool.warm_up();
    }

    /// Hash of the observable book state, for determinism testing.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.book.best_bid().hash(&mut hasher);
        self.book.best_ask().hash(&mut hasher);
        self.book.order_count().hash(&mut hasher);
        self.pool.in_use().hash(&mut hasher);
        hasher.finish()
    }

    /// Audit every structural invariant; test aid.
    pub fn check_invariants(&self) {
        self.book.check_invariants(&self.pool);
        assert_eq!(
            self.book.order_count(),
            self.pool.in_use() as usize,
            "pool records in use differ from resting orders"
        );
    }
}
