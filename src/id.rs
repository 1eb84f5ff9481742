//! Unique id generation and the epoch tokens derived from it.

use std::sync::Mutex;

use ulid::Generator;
use xxhash_rust::xxh32::xxh32;

/// Length in characters of a rendered epoch token.
pub const EPOCH_LEN: usize = 16;

/// Thread-safe unique id source scoped to a single cloud environment.
///
/// Ids seed epoch tokens and clone identity suffixes; monotonicity keeps ids
/// produced by one process distinct even within a single clock tick.
pub struct UniqueIdGenerator {
    inner: Mutex<Generator>,
}

impl UniqueIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next unique id as a printable string.
    pub fn generate(&self) -> String {
        let mut guard = self
            .inner
            .lock()
            .expect("unique id generator mutex should not be poisoned");
        guard
            .generate()
            .expect("unique id generator should advance without error")
            .to_string()
    }
}

impl Default for UniqueIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shrink a unique id into a 16-hex-character epoch token.
///
/// The id is split in half; a 32-bit hash of the first half fills the low
/// word and a 32-bit hash of the second half fills the high word. The result
/// is deterministic for a given input. Uniqueness comes from the id source,
/// not from the hash.
pub fn epoch_from_unique_id(unique_id: &str) -> String {
    let bytes = unique_id.as_bytes();
    let (low, high) = bytes.split_at(bytes.len() / 2);
    let value = u64::from(xxh32(low, 0)) | (u64::from(xxh32(high, 0)) << 32);
    format!("{value:016x}")
}
