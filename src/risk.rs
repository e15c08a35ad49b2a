//! Risk gate - a stateless predicate over incoming commands.
//!
//! Checks nothing about the book: quantity and price bounds only.
//! Rejections surface as counters at the engine level; the gate itself
//! just answers.

use crate::command::{Command, Price, Quantity};

/// Construction-time risk limits, immutable during operation.
#[derive(Clone, Copy, Debug)]
pub struct RiskConfig {
    pub max_quantity: Quantity,
    pub min_price: Price,
    pub max_price: Price,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_quantity: 10_000,
            min_price: 1,
            max_price: 1_000_000,
        }
    }
}

/// Outcome of a risk check; the reason is enough for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskVerdict {
    Allowed,
    /// Zero quantity or above the configured maximum
    QuantityOutOfRange,
    /// Limit price outside [min_price, max_price]
    PriceOutOfRange,
}

impl RiskVerdict {
    #[inline]
    pub fn is_allowed(self) -> bool {
        self == RiskVerdict::Allowed
    }
}

/// Stateless command gate.
pub struct RiskGate {
    config: RiskConfig,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Check a command against the configured limits.
    ///
    /// Cancels are always allowed. Market orders carry the no-price
    /// sentinel and skip the price-range check; they are priced at
    /// conversion inside the matcher.
    pub fn check(&self, command: &Command) -> RiskVerdict {
        match command {
            Command::Add(order) => {
                if order.quantity == 0 || order.quantity > self.config.max_quantity {
                    return RiskVerdict::QuantityOutOfRange;
                }
                if order.kind != crate::command::OrderKind::Market
                    && (order.price < self.config.min_price
                        || order.price > self.config.max_price)
                {
                    return RiskVerdict::PriceOutOfRange;
                }
                RiskVerdict::Allowed
            }
            Command::Modify(modify) => {
                if modify.quantity == 0 || modify.quantity > self.config.max_quantity {
                    return RiskVerdict::QuantityOutOfRange;
                }
                if modify.price < self.config.min_price || modify.price > self.config.max_price {
                    return RiskVerdict::PriceOutOfRange;
                }
                RiskVerdict::Allowed
            }
            Command::Cancel(_) => RiskVerdict::Allowed,
        }
    }
}
