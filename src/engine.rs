//! Engine - the threaded pipeline around the matching core.
//!
//! Construction spawns two tasks: the matcher thread, which owns the
//! book, pool, and risk gate and has exclusive write access to all of
//! them, and the journal drainer, which owns the file handle. Producers
//! talk to the matcher only through the command ring via [`OrderGateway`];
//! observers read the metrics surface or request a book snapshot, which
//! the matcher services between commands.
//!
//! Shutdown drains the command ring, then the journal ring, then joins
//! both threads before returning.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::book::BookSnapshot;
use crate::clock::monotonic_ns;
use crate::command::{AddOrder, Command, ModifyOrder, OrderId, Price, Quantity, QueuedCommand, Side};
use crate::journal::{self, EventPayload, JournalConfig, JournalHandle, JournalResult, SystemEvent};
use crate::matching::{ApplyOutcome, Matcher};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::ring::{spsc_ring, RingConsumer, RingProducer};
use crate::risk::{RiskConfig, RiskGate, RiskVerdict};

/// What a producer experiences when the command queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Spin with yields until space appears (backpressure the producer)
    Spin,
    /// Return [`SubmitError::QueueFull`] immediately
    FailFast,
}

/// Engine configuration, fixed at construction.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Command ring capacity; power of two, at least 2^10
    pub command_queue_capacity: usize,
    /// Preallocated order records
    pub order_pool_size: u32,
    pub risk: RiskConfig,
    /// `None` disables journalling entirely
    pub journal: Option<JournalConfig>,
    pub backpressure: BackpressurePolicy,
    /// Pin the matcher thread to the last available core
    pub pin_matcher: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 65_536,
            order_pool_size: 100_000,
            risk: RiskConfig::default(),
            journal: None,
            backpressure: BackpressurePolicy::Spin,
            pin_matcher: false,
        }
    }
}

/// Submission failures surfaced to the producer at the ingress boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("command queue full")]
    QueueFull,
    #[error("engine is shut down")]
    Shutdown,
}

// ============================================================================
// Producer handle
// ============================================================================

/// The single producer's handle onto the command ring.
///
/// Deliberately not `Clone`: the ring is single-producer. A multi-producer
/// front end needs its own fan-in ahead of this handle.
pub struct OrderGateway {
    tx: RingProducer<QueuedCommand>,
    policy: BackpressurePolicy,
    metrics: Arc<EngineMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl OrderGateway {
    /// Submit a new order.
    pub fn add(&mut self, order: AddOrder) -> Result<(), SubmitError> {
        self.submit(Command::Add(order))
    }

    /// Cancel a resting order. Unknown identifiers are a counted no-op.
    pub fn cancel(&mut self, id: OrderId) -> Result<(), SubmitError> {
        self.submit(Command::Cancel(id))
    }

    /// Replace a resting order's side, price, and quantity. The order
    /// loses time priority.
    pub fn modify(
        &mut self,
        id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Result<(), SubmitError> {
        self.submit(Command::Modify(ModifyOrder {
            id,
            side,
            price,
            quantity,
        }))
    }

    fn submit(&mut self, command: Command) -> Result<(), SubmitError> {
        self.metrics.orders_received.fetch_add(1, Ordering::Relaxed);
        let mut queued = QueuedCommand {
            ingress_ns: monotonic_ns(),
            command,
        };
        match self.policy {
            BackpressurePolicy::Spin => loop {
                match self.tx.try_push(queued) {
                    Ok(()) => return Ok(()),
                    Err(back) => {
                        if self.shutdown.load(Ordering::Acquire) {
                            return Err(SubmitError::Shutdown);
                        }
                        queued = back;
                        std::thread::yield_now();
                    }
                }
            },
            BackpressurePolicy::FailFast => self.tx.try_push(queued).map_err(|_| {
                self.metrics.queue_overflows.fetch_add(1, Ordering::Relaxed);
                SubmitError::QueueFull
            }),
        }
    }
}

// ============================================================================
// Snapshot rendezvous
// ============================================================================

/// Rendezvous between external snapshot callers and the matcher.
///
/// The matcher polls one relaxed atomic per loop iteration; it touches
/// the mutex only while a request is pending, so the steady-state hot
/// path stays lock-free.
struct SnapshotCell {
    pending: AtomicBool,
    closed: AtomicBool,
    max_levels: AtomicUsize,
    slot: Mutex<Option<BookSnapshot>>,
    ready: Condvar,
}

impl SnapshotCell {
    fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            max_levels: AtomicUsize::new(0),
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<BookSnapshot>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The running engine: owns both background threads.
pub struct Engine {
    metrics: Arc<EngineMetrics>,
    shutdown: Arc<AtomicBool>,
    journal_shutdown: Arc<AtomicBool>,
    snapshot: Arc<SnapshotCell>,
    matcher_thread: Option<JoinHandle<()>>,
    drainer_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the matcher (and journal drainer, if configured) and return
    /// the engine plus the single producer handle.
    ///
    /// # Panics
    /// Panics if `command_queue_capacity` is not a power of two of at
    /// least 1024.
    pub fn start(config: EngineConfig) -> JournalResult<(Engine, OrderGateway)> {
        assert!(
            config.command_queue_capacity.is_power_of_two()
                && config.command_queue_capacity >= 1024,
            "command queue capacity must be a power of two, at least 1024"
        );

        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let journal_shutdown = Arc::new(AtomicBool::new(false));
        let snapshot = Arc::new(SnapshotCell::new());

        let (cmd_tx, cmd_rx) = spsc_ring(config.command_queue_capacity);

        let (journal_handle, drainer_thread) = match &config.journal {
            Some(journal_config) => {
                let (handle, thread) = journal::start(
                    journal_config,
                    monotonic_ns(),
                    metrics.clone(),
                    journal_shutdown.clone(),
                )?;
                (Some(handle), Some(thread))
            }
            None => (None, None),
        };

        let matcher_loop = MatcherLoop {
            rx: cmd_rx,
            matcher: Matcher::new(config.order_pool_size),
            risk: RiskGate::new(config.risk),
            journal: journal_handle,
            metrics: metrics.clone(),
            shutdown: shutdown.clone(),
            snapshot: snapshot.clone(),
            pin: config.pin_matcher,
        };
        let matcher_thread = std::thread::Builder::new()
            .name("matchbook-matcher".into())
            .spawn(move || matcher_loop.run())
            .map_err(journal::JournalError::Io)?;

        let gateway = OrderGateway {
            tx: cmd_tx,
            policy: config.backpressure,
            metrics: metrics.clone(),
            shutdown: shutdown.clone(),
        };

        Ok((
            Engine {
                metrics,
                shutdown,
                journal_shutdown,
                snapshot,
                matcher_thread: Some(matcher_thread),
                drainer_thread,
            },
            gateway,
        ))
    }

    /// Shared handle to the lock-free metrics record.
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Copy of all counters and latency summaries; callable from any
    /// thread at any time.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Top-N aggregated view of both sides.
    ///
    /// The matcher is quiesced briefly: it services the request between
    /// commands, so the two sides are mutually consistent as of that
    /// point. Returns `None` once the engine has shut down or if the
    /// matcher does not respond within the internal deadline.
    pub fn book_snapshot(&self, max_levels: usize) -> Option<BookSnapshot> {
        if self.snapshot.closed.load(Ordering::Acquire) {
            return None;
        }

        let mut slot = self.snapshot.lock_slot();
        *slot = None;
        self.snapshot.max_levels.store(max_levels, Ordering::Relaxed);
        self.snapshot.pending.store(true, Ordering::Release);

        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            if let Some(snap) = slot.take() {
                return Some(snap);
            }
            if self.snapshot.closed.load(Ordering::Acquire) {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                self.snapshot.pending.store(false, Ordering::Relaxed);
                return None;
            }
            let (guard, _) = self
                .snapshot
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot = guard;
        }
    }

    /// Stop both tasks: the matcher drains the command ring, the drainer
    /// drains the journal ring, files are flushed and closed, and both
    /// threads are joined before this returns. Idempotent; also run by
    /// `Drop`.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.matcher_thread.take() {
            self.shutdown.store(true, Ordering::Release);
            let _ = handle.join();
        }
        if let Some(handle) = self.drainer_thread.take() {
            self.journal_shutdown.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Matcher thread
// ============================================================================

struct MatcherLoop {
    rx: RingConsumer<QueuedCommand>,
    matcher: Matcher,
    risk: RiskGate,
    journal: Option<JournalHandle>,
    metrics: Arc<EngineMetrics>,
    shutdown: Arc<AtomicBool>,
    snapshot: Arc<SnapshotCell>,
    pin: bool,
}

impl MatcherLoop {
    fn run(mut self) {
        if self.pin {
            pin_to_last_core();
        }
        self.matcher.warm_up();

        if let Some(journal) = &mut self.journal {
            journal.log_blocking(
                monotonic_ns(),
                EventPayload::System {
                    event: SystemEvent::EngineStart,
                },
                Duration::from_secs(1),
            );
        }

        loop {
            if self.snapshot.pending.load(Ordering::Acquire) {
                self.service_snapshot();
            }
            match self.rx.try_pop() {
                Some(queued) => self.process(queued),
                None => {
                    // Drain-then-exit: the flag alone does not stop us
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    std::hint::spin_loop();
                    std::thread::yield_now();
                }
            }
        }

        if let Some(journal) = &mut self.journal {
            journal.log_blocking(
                monotonic_ns(),
                EventPayload::System {
                    event: SystemEvent::EngineStop,
                },
                Duration::from_secs(1),
            );
        }

        self.snapshot.closed.store(true, Ordering::Release);
        self.snapshot.ready.notify_all();
    }

    fn process(&mut self, queued: QueuedCommand) {
        self.metrics.record_queue_depth(self.rx.len() as u64);
        let now_ns = monotonic_ns();

        let verdict = self.risk.check(&queued.command);
        if verdict != RiskVerdict::Allowed {
            self.metrics.orders_rejected.fetch_add(1, Ordering::Relaxed);
            match verdict {
                RiskVerdict::QuantityOutOfRange => {
                    self.metrics
                        .risk_rejected_quantity
                        .fetch_add(1, Ordering::Relaxed);
                }
                RiskVerdict::PriceOutOfRange => {
                    self.metrics
                        .risk_rejected_price
                        .fetch_add(1, Ordering::Relaxed);
                }
                RiskVerdict::Allowed => {}
            }
            self.journal_command(&queued.command, now_ns);
            self.finish(queued.ingress_ns);
            return;
        }

        let outcome = self.matcher.apply(&queued.command, now_ns);
        let counter = match outcome {
            ApplyOutcome::Applied => None,
            ApplyOutcome::DuplicateId => Some(&self.metrics.duplicate_adds),
            ApplyOutcome::UnknownId => Some(&self.metrics.unknown_ids),
            ApplyOutcome::EmptyOppositeMarket => Some(&self.metrics.empty_market_drops),
            ApplyOutcome::FullFillImpossible => Some(&self.metrics.fok_rejects),
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        self.journal_command(&queued.command, now_ns);

        let trades = self.matcher.trades();
        if !trades.is_empty() {
            self.metrics
                .trades_executed
                .fetch_add(trades.len() as u64, Ordering::Relaxed);
            if let Some(journal) = &mut self.journal {
                for trade in trades {
                    journal.log(
                        trade.ts_ns,
                        EventPayload::Trade {
                            buyer: trade.buyer,
                            seller: trade.seller,
                            price: trade.price,
                            quantity: trade.quantity,
                        },
                    );
                }
            }
        }

        self.metrics
            .pool_grown
            .store(self.matcher.pool.grown(), Ordering::Relaxed);
        self.finish(queued.ingress_ns);
    }

    /// One journal entry per command popped from the ring, no-ops
    /// included, so the file replays the full input in apply order.
    fn journal_command(&mut self, command: &Command, ts_ns: u64) {
        if let Some(journal) = &mut self.journal {
            let payload = match *command {
                Command::Add(order) => EventPayload::Add {
                    id: order.id,
                    side: order.side,
                    kind: order.kind,
                    price: order.price,
                    quantity: order.quantity,
                },
                Command::Cancel(id) => EventPayload::Cancel { id },
                Command::Modify(modify) => EventPayload::Modify {
                    id: modify.id,
                    side: modify.side,
                    price: modify.price,
                    quantity: modify.quantity,
                },
            };
            journal.log(ts_ns, payload);
        }
    }

    fn finish(&mut self, ingress_ns: u64) {
        self.metrics.orders_processed.fetch_add(1, Ordering::Relaxed);
        let done_ns = monotonic_ns();
        if done_ns > ingress_ns {
            self.metrics.record_latency(done_ns - ingress_ns);
        }
    }

    /// Cold path: only reached while a request is pending.
    fn service_snapshot(&mut self) {
        let max_levels = self.snapshot.max_levels.load(Ordering::Relaxed);
        let snap = self.matcher.book.snapshot(max_levels);
        {
            let mut slot = self.snapshot.lock_slot();
            *slot = Some(snap);
        }
        self.snapshot.pending.store(false, Ordering::Release);
        self.snapshot.ready.notify_all();
    }
}

/// Pin the current thread to the last available core, which is the one
/// most likely to be isolated from OS interrupts.
fn pin_to_last_core() {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(last_core) = core_ids.last() {
            core_affinity::set_for_current(*last_core);
        }
    }
}
