//! # Matchbook
//!
//! A single-symbol limit order book matching engine with bounded,
//! deterministic latency and durable event journalling.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: one thread owns the book, index, and pool (no locks)
//! - **Zero Steady-State Allocation**: pooled order records, preallocated rings
//! - **Never Block the Matcher**: journalling is asynchronous and batched;
//!   overload sheds or stalls at the edges, never inside the loop
//! - **Everything Counted**: every drop, reject, and no-op lands on a counter
//!
//! ## Architecture
//!
//! ```text
//! [Producer] --> [Command SPSC Ring] --> [Matcher Thread (pinned)]
//!                                              |            |
//!                                     [Journal SPSC Ring]  [Metrics]
//!                                              |
//!                                      [Drainer Thread] --> append-only file
//! ```

pub mod book;
pub mod clock;
pub mod command;
pub mod engine;
pub mod journal;
pub mod matching;
pub mod metrics;
pub mod pool;
pub mod price_level;
pub mod ring;
pub mod risk;

// Re-exports for convenience
pub use book::{BookSnapshot, LevelSnapshot, OrderBook};
pub use command::{
    AddOrder, Command, ModifyOrder, OrderId, OrderKind, Price, Quantity, Side, Trade,
    INVALID_PRICE,
};
pub use engine::{BackpressurePolicy, Engine, EngineConfig, OrderGateway, SubmitError};
pub use journal::{JournalConfig, JournalReader};
pub use matching::{ApplyOutcome, Matcher};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pool::{OrderPool, OrderRecord, PoolIndex, NULL_INDEX};
pub use price_level::PriceLevel;
pub use risk::{RiskConfig, RiskGate, RiskVerdict};
