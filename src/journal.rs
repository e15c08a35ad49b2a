//! Journal - asynchronous, batched persistence of state-changing events.
//!
//! The matcher calls [`JournalHandle::log`], which assigns the next
//! sequence number and pushes a fixed-size entry onto a private SPSC
//! ring; it never blocks. A background drainer owns the file handle,
//! collects entries into bounded batches, and writes each batch with a
//! single `write_all`. Ring-full drops and write failures land on
//! counters; the matcher proceeds regardless.
//!
//! # File format (little-endian throughout)
//!
//! ```text
//! header:  magic "MBJ1" (4) | version u16 (2) | reserved (2) | start_ts u64 (8)
//! entry:   tag u8 (1) | reserved (7) | sequence u64 (8) | ts_ns u64 (8) | payload (40)
//! ```
//!
//! Entries are exactly 64 bytes. Readers scan sequentially and treat a
//! truncated final record as end-of-stream; gaps in the sequence numbers
//! reveal dropped entries after a crash.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::command::{OrderId, OrderKind, Price, Quantity, Side};
use crate::metrics::EngineMetrics;
use crate::ring::{spsc_ring, RingConsumer, RingProducer};

pub const MAGIC: [u8; 4] = *b"MBJ1";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 16;
pub const ENTRY_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("bad magic in journal header")]
    BadMagic,

    #[error("unsupported journal format version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown event tag {0}")]
    UnknownTag(u8),

    #[error("corrupt entry payload")]
    CorruptPayload,
}

pub type JournalResult<T> = Result<T, JournalError>;

// ============================================================================
// Events
// ============================================================================

/// Control events recorded with `log_blocking` so they are never dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SystemEvent {
    EngineStart = 1,
    EngineStop = 2,
}

impl SystemEvent {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(SystemEvent::EngineStart),
            2 => Some(SystemEvent::EngineStop),
            _ => None,
        }
    }
}

/// Per-kind payload of a journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPayload {
    Add {
        id: OrderId,
        side: Side,
        kind: OrderKind,
        price: Price,
        quantity: Quantity,
    },
    Cancel {
        id: OrderId,
    },
    Modify {
        id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    },
    Trade {
        buyer: OrderId,
        seller: OrderId,
        price: Price,
        quantity: Quantity,
    },
    System {
        event: SystemEvent,
    },
}

const TAG_ADD: u8 = 0;
const TAG_CANCEL: u8 = 1;
const TAG_MODIFY: u8 = 2;
const TAG_TRADE: u8 = 3;
const TAG_SYSTEM: u8 = 4;

/// One fixed-size journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JournalEvent {
    pub sequence: u64,
    pub ts_ns: u64,
    pub payload: EventPayload,
}

impl JournalEvent {
    fn tag(&self) -> u8 {
        match self.payload {
            EventPayload::Add { .. } => TAG_ADD,
            EventPayload::Cancel { .. } => TAG_CANCEL,
            EventPayload::Modify { .. } => TAG_MODIFY,
            EventPayload::Trade { .. } => TAG_TRADE,
            EventPayload::System { .. } => TAG_SYSTEM,
        }
    }

    /// Serialize to the fixed 64-byte wire form.
    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.tag();
        buf[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        buf[16..24].copy_from_slice(&self.ts_ns.to_le_bytes());

        let payload = &mut buf[24..];
        match self.payload {
            EventPayload::Add {
                id,
                side,
                kind,
                price,
                quantity,
            } => {
                payload[0..8].copy_from_slice(&id.to_le_bytes());
                payload[8..16].copy_from_slice(&price.to_le_bytes());
                payload[16..24].copy_from_slice(&quantity.to_le_bytes());
                payload[24] = side as u8;
                payload[25] = kind as u8;
            }
            EventPayload::Cancel { id } => {
                payload[0..8].copy_from_slice(&id.to_le_bytes());
            }
            EventPayload::Modify {
                id,
                side,
                price,
                quantity,
            } => {
                payload[0..8].copy_from_slice(&id.to_le_bytes());
                payload[8..16].copy_from_slice(&price.to_le_bytes());
                payload[16..24].copy_from_slice(&quantity.to_le_bytes());
                payload[24] = side as u8;
            }
            EventPayload::Trade {
                buyer,
                seller,
                price,
                quantity,
            } => {
                payload[0..8].copy_from_slice(&buyer.to_le_bytes());
                payload[8..16].copy_from_slice(&seller.to_le_bytes());
                payload[16..24].copy_from_slice(&price.to_le_bytes());
                payload[24..32].copy_from_slice(&quantity.to_le_bytes());
            }
            EventPayload::System { event } => {
                payload[0..4].copy_from_slice(&(event as u32).to_le_bytes());
            }
        }
        buf
    }

    /// Deserialize from the fixed 64-byte wire form.
    pub fn decode(buf: &[u8; ENTRY_SIZE]) -> JournalResult<Self> {
        let le_u64 = |b: &[u8]| u64::from_le_bytes(b.try_into().expect("8-byte slice"));
        let le_i64 = |b: &[u8]| i64::from_le_bytes(b.try_into().expect("8-byte slice"));

        let tag = buf[0];
        let sequence = le_u64(&buf[8..16]);
        let ts_ns = le_u64(&buf[16..24]);
        let payload_bytes = &buf[24..];

        let payload = match tag {
            TAG_ADD => EventPayload::Add {
                id: le_u64(&payload_bytes[0..8]),
                price: le_i64(&payload_bytes[8..16]),
                quantity: le_u64(&payload_bytes[16..24]),
                side: Side::from_u8(payload_bytes[24]).ok_or(JournalError::CorruptPayload)?,
                kind: OrderKind::from_u8(payload_bytes[25])
                    .ok_or(JournalError::CorruptPayload)?,
            },
            TAG_CANCEL => EventPayload::Cancel {
                id: le_u64(&payload_bytes[0..8]),
            },
            TAG_MODIFY => EventPayload::Modify {
                id: le_u64(&payload_bytes[0..8]),
                price: le_i64(&payload_bytes[8..16]),
                quantity: le_u64(&payload_bytes[16..24]),
                side: Side::from_u8(payload_bytes[24]).ok_or(JournalError::CorruptPayload)?,
            },
            TAG_TRADE => EventPayload::Trade {
                buyer: le_u64(&payload_bytes[0..8]),
                seller: le_u64(&payload_bytes[8..16]),
                price: le_i64(&payload_bytes[16..24]),
                quantity: le_u64(&payload_bytes[24..32]),
            },
            TAG_SYSTEM => EventPayload::System {
                event: SystemEvent::from_u32(u32::from_le_bytes(
                    payload_bytes[0..4].try_into().expect("4-byte slice"),
                ))
                .ok_or(JournalError::CorruptPayload)?,
            },
            other => return Err(JournalError::UnknownTag(other)),
        };

        Ok(Self {
            sequence,
            ts_ns,
            payload,
        })
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Journal configuration, fixed at construction.
#[derive(Clone, Debug)]
pub struct JournalConfig {
    pub path: PathBuf,
    /// Capacity of the matcher-to-drainer ring
    pub ring_capacity: usize,
    /// Maximum entries per physical write
    pub batch_size: usize,
    /// Sync file data every K entries
    pub flush_every_entries: Option<usize>,
    /// Sync file data at least every T
    pub flush_interval: Option<Duration>,
}

impl JournalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ring_capacity: 65_536,
            batch_size: 256,
            flush_every_entries: Some(1_024),
            flush_interval: Some(Duration::from_millis(50)),
        }
    }
}

// ============================================================================
// Writer side
// ============================================================================

/// The matcher-facing handle: assigns sequence numbers and enqueues.
///
/// Sequence numbers are consumed even when the ring is full, so a gap in
/// the file is the durable record of a drop.
pub struct JournalHandle {
    tx: RingProducer<JournalEvent>,
    next_sequence: u64,
    metrics: Arc<EngineMetrics>,
}

impl JournalHandle {
    /// Non-blocking log. On ring-full the entry is dropped and counted.
    pub fn log(&mut self, ts_ns: u64, payload: EventPayload) {
        let event = JournalEvent {
            sequence: self.next_sequence,
            ts_ns,
            payload,
        };
        self.next_sequence += 1;
        if self.tx.try_push(event).is_err() {
            self.metrics.journal_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Blocking log for events that must not be lost (session control).
    /// Spins with yields until space appears or the deadline passes.
    ///
    /// # Returns
    /// `false` if the deadline passed and the entry was dropped.
    pub fn log_blocking(&mut self, ts_ns: u64, payload: EventPayload, timeout: Duration) -> bool {
        let mut event = JournalEvent {
            sequence: self.next_sequence,
            ts_ns,
            payload,
        };
        self.next_sequence += 1;

        let deadline = Instant::now() + timeout;
        loop {
            match self.tx.try_push(event) {
                Ok(()) => return true,
                Err(back) => {
                    if Instant::now() >= deadline {
                        self.metrics.journal_drops.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                    event = back;
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Next sequence number to be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

/// Spawn the drainer thread and return the matcher-facing handle.
///
/// The file is created (truncated) and the header written before this
/// returns, so open failures surface at construction. Setting `shutdown`
/// makes the drainer drain the ring to empty, sync, and exit.
pub fn start(
    config: &JournalConfig,
    start_ts_ns: u64,
    metrics: Arc<EngineMetrics>,
    shutdown: Arc<AtomicBool>,
) -> JournalResult<(JournalHandle, JoinHandle<()>)> {
    let mut file = File::create(&config.path)?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&start_ts_ns.to_le_bytes());
    file.write_all(&header)?;

    let (tx, rx) = spsc_ring(config.ring_capacity);

    let drainer = Drainer {
        rx,
        file,
        batch: Vec::with_capacity(config.batch_size * ENTRY_SIZE),
        batch_size: config.batch_size,
        flush_every_entries: config.flush_every_entries,
        flush_interval: config.flush_interval,
        entries_since_flush: 0,
        last_flush: Instant::now(),
        metrics: metrics.clone(),
        shutdown,
    };

    let thread = std::thread::Builder::new()
        .name("journal-drainer".into())
        .spawn(move || drainer.run())
        .map_err(JournalError::Io)?;

    Ok((
        JournalHandle {
            tx,
            next_sequence: 0,
            metrics,
        },
        thread,
    ))
}

/// Background task that owns the file handle.
struct Drainer {
    rx: RingConsumer<JournalEvent>,
    file: File,
    batch: Vec<u8>,
    batch_size: usize,
    flush_every_entries: Option<usize>,
    flush_interval: Option<Duration>,
    entries_since_flush: usize,
    last_flush: Instant,
    metrics: Arc<EngineMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl Drainer {
    fn run(mut self) {
        loop {
            let drained = self.drain_batch();
            if drained == 0 {
                if self.shutdown.load(Ordering::Acquire) && self.rx.is_empty() {
                    break;
                }
                // Idle: the drainer may block, unlike the matcher
                std::thread::sleep(Duration::from_millis(1));
                self.maybe_flush();
            }
        }
        self.sync();
    }

    /// Pop up to one batch of entries and write them in a single call.
    fn drain_batch(&mut self) -> usize {
        self.batch.clear();
        let mut drained = 0;
        while drained < self.batch_size {
            match self.rx.try_pop() {
                Some(event) => {
                    self.batch.extend_from_slice(&event.encode());
                    drained += 1;
                }
                None => break,
            }
        }

        if drained > 0 {
            if self.file.write_all(&self.batch).is_err() {
                // Entries in this batch are lost; the matcher is not
                self.metrics
                    .journal_io_errors
                    .fetch_add(1, Ordering::Relaxed);
            }
            self.entries_since_flush += drained;
            self.maybe_flush();
        }
        drained
    }

    fn maybe_flush(&mut self) {
        let by_count = self
            .flush_every_entries
            .map_or(false, |k| self.entries_since_flush >= k);
        let by_time = self
            .flush_interval
            .map_or(false, |t| self.entries_since_flush > 0 && self.last_flush.elapsed() >= t);
        if by_count || by_time {
            self.sync();
        }
    }

    fn sync(&mut self) {
        if self.file.sync_data().is_err() {
            self.metrics
                .journal_io_errors
                .fetch_add(1, Ordering::Relaxed);
        }
        self.entries_since_flush = 0;
        self.last_flush = Instant::now();
    }
}

// ============================================================================
// Reader side
// ============================================================================

/// Sequential reader over a journal file.
///
/// Iterates entries in file order; a truncated final record ends the
/// stream silently, as the last batch may have been cut by a crash.
pub struct JournalReader {
    file: File,
    start_ts_ns: u64,
}

impl JournalReader {
    pub fn open(path: impl Into<PathBuf>) -> JournalResult<Self> {
        let mut file = File::open(path.into())?;

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;
        if header[0..4] != MAGIC {
            return Err(JournalError::BadMagic);
        }
        let version = u16::from_le_bytes(header[4..6].try_into().expect("2-byte slice"));
        if version != FORMAT_VERSION {
            return Err(JournalError::UnsupportedVersion(version));
        }
        let start_ts_ns = u64::from_le_bytes(header[8..16].try_into().expect("8-byte slice"));

        Ok(Self { file, start_ts_ns })
    }

    /// Engine start timestamp from the file header.
    pub fn start_ts_ns(&self) -> u64 {
        self.start_ts_ns
    }

    /// Read every entry up to the first truncation.
    pub fn read_all(path: impl Into<PathBuf>) -> JournalResult<Vec<JournalEvent>> {
        let reader = Self::open(path)?;
        let mut events = Vec::new();
        for event in reader {
            events.push(event?);
        }
        Ok(events)
    }
}

impl Iterator for JournalReader {
    type Item = JournalResult<JournalEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; ENTRY_SIZE];
        match self.file.read_exact(&mut buf) {
            Ok(()) => Some(JournalEvent::decode(&buf)),
            // Clean EOF or a truncated final record: end of stream
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(JournalError::Io(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    fn sample_events() -> Vec<EventPayload> {
        vec![
            EventPayload::Add {
                id: 1,
                side: Side::Buy,
                kind: OrderKind::GoodTillCancel,
                price: 10_000,
                quantity: 50,
            },
            EventPayload::Trade {
                buyer: 1,
                seller: 2,
                price: 10_000,
                quantity: 25,
            },
            EventPayload::Modify {
                id: 1,
                side: Side::Sell,
                price: -50,
                quantity: 10,
            },
            EventPayload::Cancel { id: 1 },
            EventPayload::System {
                event: SystemEvent::EngineStop,
            },
        ]
    }

    #[test]
    fn test_encode_decode_all_variants() {
        for (i, payload) in sample_events().into_iter().enumerate() {
            let event = JournalEvent {
                sequence: i as u64,
                ts_ns: 1_000 + i as u64,
                payload,
            };
            let decoded = JournalEvent::decode(&event.encode()).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = 99;
        assert!(matches!(
            JournalEvent::decode(&buf),
            Err(JournalError::UnknownTag(99))
        ));
    }

    #[test]
    fn test_end_to_end_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.journal");
        let config = JournalConfig::new(&path);
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (mut handle, thread) =
            start(&config, 7, metrics.clone(), shutdown.clone()).unwrap();

        for (i, payload) in sample_events().into_iter().enumerate() {
            handle.log(i as u64 * 10, payload);
        }

        shutdown.store(true, Ordering::Release);
        thread.join().unwrap();

        let reader = JournalReader::open(&path).unwrap();
        assert_eq!(reader.start_ts_ns(), 7);

        let events = JournalReader::read_all(&path).unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, i as u64);
            assert_eq!(event.ts_ns, i as u64 * 10);
        }
        assert_eq!(events[3].payload, EventPayload::Cancel { id: 1 });
        assert_eq!(metrics.journal_drops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_truncated_final_record_is_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.journal");
        let config = JournalConfig::new(&path);
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (mut handle, thread) =
            start(&config, 0, metrics.clone(), shutdown.clone()).unwrap();
        for i in 0..3u64 {
            handle.log(i, EventPayload::Cancel { id: i });
        }
        shutdown.store(true, Ordering::Release);
        thread.join().unwrap();

        // Chop the last record mid-entry
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let full = file.metadata().unwrap().len();
        file.set_len(full - 10).unwrap();
        drop(file);

        let events = JournalReader::read_all(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence, 1);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-journal");
        std::fs::write(&path, b"definitely not a journal header").unwrap();

        assert!(matches!(
            JournalReader::open(&path),
            Err(JournalError::BadMagic)
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.journal");

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&99u16.to_le_bytes());
        std::fs::write(&path, header).unwrap();

        assert!(matches!(
            JournalReader::open(&path),
            Err(JournalError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_ring_full_drops_consume_sequence_numbers() {
        // No drainer: hold the consumer so the ring stays full
        let metrics = Arc::new(EngineMetrics::new());
        let (tx, mut rx) = spsc_ring(2);
        let mut handle = JournalHandle {
            tx,
            next_sequence: 0,
            metrics: metrics.clone(),
        };

        for i in 0..5u64 {
            handle.log(i, EventPayload::Cancel { id: i });
        }

        assert_eq!(metrics.journal_drops.load(Ordering::Relaxed), 3);
        assert_eq!(handle.next_sequence(), 5);
        // The entries that made it kept their assigned numbers
        assert_eq!(rx.try_pop().unwrap().sequence, 0);
        assert_eq!(rx.try_pop().unwrap().sequence, 1);
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_reader_surfaces_sequence_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap.journal");

        // A file whose writer dropped sequence 2
        let mut bytes = Vec::new();
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&header);
        for sequence in [0u64, 1, 3, 4] {
            let event = JournalEvent {
                sequence,
                ts_ns: sequence,
                payload: EventPayload::Cancel { id: sequence },
            };
            bytes.extend_from_slice(&event.encode());
        }
        std::fs::write(&path, bytes).unwrap();

        let events = JournalReader::read_all(&path).unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 3, 4]);
        for pair in sequences.windows(2) {
            assert!(pair[1] > pair[0], "sequences must be strictly increasing");
        }
        // Gap detection: one number was consumed but never written
        let expected: u64 = events.last().unwrap().sequence + 1;
        assert_eq!(expected - events.len() as u64, 1);
    }

    #[test]
    fn test_log_blocking_waits_for_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocking.journal");
        let config = JournalConfig {
            ring_capacity: 4,
            ..JournalConfig::new(&path)
        };
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (mut handle, thread) =
            start(&config, 0, metrics.clone(), shutdown.clone()).unwrap();

        // The drainer keeps making space, so these all land
        for i in 0..100u64 {
            assert!(handle.log_blocking(
                i,
                EventPayload::Cancel { id: i },
                Duration::from_secs(1)
            ));
        }

        shutdown.store(true, Ordering::Release);
        thread.join().unwrap();

        let events = JournalReader::read_all(&path).unwrap();
        assert_eq!(events.len(), 100);
        assert_eq!(metrics.journal_drops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_reader_is_an_iterator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iter.journal");
        let config = JournalConfig::new(&path);
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (mut handle, thread) =
            start(&config, 0, metrics.clone(), shutdown.clone()).unwrap();
        for i in 0..5u64 {
            handle.log(i, EventPayload::Cancel { id: i });
        }
        shutdown.store(true, Ordering::Release);
        thread.join().unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        let mut count = 0;
        for event in &mut reader {
            event.unwrap();
            count += 1;
        }
        assert_eq!(count, 5);

        // Seek back and confirm the file position math: header + entries
        let pos = reader.file.stream_position().unwrap();
        assert_eq!(pos as usize, HEADER_SIZE + 5 * ENTRY_SIZE);
    }
}
