//! Snowflake-style identifier generation.
//!
//! Generates 64-bit ids that are unique, time-ordered, and strictly
//! increasing within one generator.
//!
//! # ID Structure
//!
//! ```text
//! | 42 bits: timestamp (ms since epoch) | 12 bits: worker | 10 bits: sequence |
//! ```
//!
//! - **Timestamp**: milliseconds since 2024-01-01 00:00:00 UTC
//! - **Worker**: per-generator identifier, random mixed with the PID unless set explicitly
//! - **Sequence**: counter within each millisecond
//!
//! Because stored keys are the big-endian id, key order in the `patients` and
//! `records` namespaces is creation order.
//!
//! When more than 1024 ids are drawn within one millisecond, or the clock
//! steps backwards, the generator borrows the next millisecond instead of
//! sleeping, so it never blocks an async worker.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;

/// Custom epoch: 2024-01-01 00:00:00 UTC (milliseconds since Unix epoch).
const EPOCH_MS: u64 = 1_704_067_200_000;

/// Number of bits used for the worker id.
const WORKER_BITS: u32 = 12;

/// Number of bits used for the sequence portion.
const SEQUENCE_BITS: u32 = 10;

/// Mask for the worker id (12 bits).
const WORKER_MASK: u64 = (1 << WORKER_BITS) - 1;

/// Mask for the sequence portion (10 bits).
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
struct State {
    last_timestamp: u64,
    sequence: u64,
}

/// Thread-safe snowflake generator.
///
/// # Example
///
/// ```
/// use expedientes_records::ids::IdGenerator;
///
/// let ids = IdGenerator::new();
/// let a = ids.next_id();
/// let b = ids.next_id();
/// assert!(b > a);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    worker: u64,
    state: Mutex<State>,
}

impl IdGenerator {
    /// Creates a generator with a worker id drawn from entropy mixed with the
    /// process id.
    #[must_use]
    pub fn new() -> Self {
        let pid = u64::from(std::process::id());
        Self::with_worker(rand::rng().random::<u64>() ^ pid)
    }

    /// Creates a generator with an explicit worker id (only the low 12 bits
    /// are used).
    #[must_use]
    pub fn with_worker(worker: u64) -> Self {
        Self {
            worker: worker & WORKER_MASK,
            state: Mutex::new(State { last_timestamp: 0, sequence: 0 }),
        }
    }

    /// Draws the next id.
    pub fn next_id(&self) -> u64 {
        self.next_id_at(Utc::now())
    }

    fn next_id_at(&self, now: DateTime<Utc>) -> u64 {
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let timestamp = now_ms.saturating_sub(EPOCH_MS);

        let mut state = self.state.lock();
        if timestamp > state.last_timestamp {
            state.last_timestamp = timestamp;
            state.sequence = 0;
        } else {
            // Same millisecond, or the clock went backwards.
            state.sequence += 1;
            if state.sequence > SEQUENCE_MASK {
                state.last_timestamp += 1;
                state.sequence = 0;
            }
        }

        (state.last_timestamp << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker << SEQUENCE_BITS)
            | state.sequence
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Creation instant embedded in an id.
#[must_use]
pub fn timestamp_of(id: u64) -> Option<DateTime<Utc>> {
    let ms = (id >> (WORKER_BITS + SEQUENCE_BITS)) + EPOCH_MS;
    DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)
}

/// Worker id embedded in an id.
#[must_use]
pub fn worker_of(id: u64) -> u64 {
    (id >> SEQUENCE_BITS) & WORKER_MASK
}
