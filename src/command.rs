//! Command and trade types for the matching engine.
//!
//! Commands are inputs from the submitting thread; trades are the values
//! produced by matching. Trades carry copies of everything they need so
//! they stay valid after the underlying order records are recycled.

/// Opaque order identifier, unique within a session.
pub type OrderId = u64;

/// Price in minimum-increment (tick) units.
pub type Price = i64;

/// Order quantity.
pub type Quantity = u64;

/// Sentinel for "no price": market orders carry this until they are
/// converted at acceptance.
pub const INVALID_PRICE: Price = i64::MIN;

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    #[inline]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Order kind determines acceptance and matching behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderKind {
    /// Rests until cancelled or fully filled (default)
    #[default]
    GoodTillCancel = 0,
    /// No limit price; converted at acceptance to a GoodTillCancel priced
    /// at the worst opposing level
    Market = 1,
    /// Immediate-or-cancel: match what is possible, cancel the residual
    FillAndKill = 2,
    /// All-or-nothing: accepted only if fully fillable at acceptance
    FillOrKill = 3,
}

impl OrderKind {
    #[inline]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(OrderKind::GoodTillCancel),
            1 => Some(OrderKind::Market),
            2 => Some(OrderKind::FillAndKill),
            3 => Some(OrderKind::FillOrKill),
            _ => None,
        }
    }
}

// ============================================================================
// Input Commands
// ============================================================================

/// Submit a new order.
#[derive(Clone, Copy, Debug)]
pub struct AddOrder {
    pub id: OrderId,
    pub side: Side,
    pub kind: OrderKind,
    /// `INVALID_PRICE` for market orders
    pub price: Price,
    pub quantity: Quantity,
}

impl AddOrder {
    /// Create a good-till-cancel limit order (most common case)
    #[inline]
    pub const fn limit(id: OrderId, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            id,
            side,
            kind: OrderKind::GoodTillCancel,
            price,
            quantity,
        }
    }

    /// Create a market order (no limit price)
    #[inline]
    pub const fn market(id: OrderId, side: Side, quantity: Quantity) -> Self {
        Self {
            id,
            side,
            kind: OrderKind::Market,
            price: INVALID_PRICE,
            quantity,
        }
    }

    /// Create an immediate-or-cancel order
    #[inline]
    pub const fn fill_and_kill(id: OrderId, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            id,
            side,
            kind: OrderKind::FillAndKill,
            price,
            quantity,
        }
    }

    /// Create an all-or-nothing order
    #[inline]
    pub const fn fill_or_kill(id: OrderId, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            id,
            side,
            kind: OrderKind::FillOrKill,
            price,
            quantity,
        }
    }
}

/// Replace an existing order's side, price, and quantity.
///
/// Applied as cancel-then-add under the same identifier, so the order
/// loses its place in the time-priority queue.
#[derive(Clone, Copy, Debug)]
pub struct ModifyOrder {
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
}

/// Input commands from the submitting thread.
#[derive(Clone, Copy, Debug)]
pub enum Command {
    Add(AddOrder),
    Cancel(OrderId),
    Modify(ModifyOrder),
}

/// A command plus its ingress timestamp, as carried on the command ring.
#[derive(Clone, Copy, Debug)]
pub struct QueuedCommand {
    pub ingress_ns: u64,
    pub command: Command,
}

// ============================================================================
// Output
// ============================================================================

/// An executed trade.
///
/// Holds values, not references: both sides may be recycled by the pool
/// immediately after the trade is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trade {
    pub buyer: OrderId,
    pub seller: OrderId,
    pub price: Price,
    pub quantity: Quantity,
    pub ts_ns: u64,
}
