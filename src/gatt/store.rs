//! Fixed-capacity backing storage for the provisioning attributes.
//!
//! Each logical attribute owns one [`StoreEntry`]: a zero-initialized byte
//! buffer with a declared capacity and a current length. Entries are guarded
//! by their own mutex so that read and write events delivered from the stack's
//! callback context never race, even if more than one peer is ever served.
//!
//! # Example
//!
//! ```
//! use ble_provisioner::gatt::{AttributeIndex, AttributeStore, StoreError};
//!
//! let store = AttributeStore::new([32, 32]);
//! store.write(AttributeIndex::WifiId, b"MyNetwork").unwrap();
//! assert_eq!(store.read(AttributeIndex::WifiId), b"MyNetwork");
//!
//! let too_long = [0u8; 40];
//! assert_eq!(
//!     store.write(AttributeIndex::Password, &too_long),
//!     Err(StoreError::TooLong { len: 40, max: 32 })
//! );
//! ```

use super::table::AttributeIndex;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Capacity of each attribute in bytes.
pub const ATTRIBUTE_CAPACITY: usize = 32;

/// One attribute's storage.
///
/// Invariant: `len <= max_len <= ATTRIBUTE_CAPACITY`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreEntry {
    bytes: [u8; ATTRIBUTE_CAPACITY],
    len: usize,
    max_len: usize,
}

impl StoreEntry {
    fn new(max_len: usize) -> Self {
        Self {
            bytes: [0; ATTRIBUTE_CAPACITY],
            len: 0,
            max_len: max_len.min(ATTRIBUTE_CAPACITY),
        }
    }

    /// Bytes currently in use.
    pub fn value(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn replace(&mut self, value: &[u8]) -> Result<(), StoreError> {
        if value.len() > self.max_len {
            return Err(StoreError::TooLong {
                len: value.len(),
                max: self.max_len,
            });
        }
        // Wipe the tail so a shorter value never leaves old secret bytes behind.
        self.bytes.zeroize();
        self.bytes[..value.len()].copy_from_slice(value);
        self.len = value.len();
        Ok(())
    }
}

impl fmt::Debug for StoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEntry")
            .field("len", &self.len)
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

/// Errors returned by [`AttributeStore::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The value is longer than the attribute's capacity.
    TooLong { len: usize, max: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { len, max } => {
                write!(f, "value too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Storage for every logical attribute, indexed by [`AttributeIndex`].
#[derive(Debug)]
pub struct AttributeStore {
    entries: [Mutex<StoreEntry>; AttributeIndex::COUNT],
}

impl AttributeStore {
    /// Create zeroed storage with the given capacity per attribute, in
    /// [`AttributeIndex::ALL`] order. Capacities above
    /// [`ATTRIBUTE_CAPACITY`] are clamped.
    pub fn new(max_lens: [usize; AttributeIndex::COUNT]) -> Self {
        Self {
            entries: max_lens.map(|max| Mutex::new(StoreEntry::new(max))),
        }
    }

    /// Return a copy of the attribute's current value.
    pub fn read(&self, index: AttributeIndex) -> Vec<u8> {
        self.entry(index).value().to_vec()
    }

    /// Run `f` against the entry without copying the value out.
    pub fn with_entry<R>(&self, index: AttributeIndex, f: impl FnOnce(&StoreEntry) -> R) -> R {
        f(&self.entry(index))
    }

    /// Replace the attribute's value.
    ///
    /// Values longer than the capacity are rejected and the stored value is
    /// left untouched.
    pub fn write(&self, index: AttributeIndex, value: &[u8]) -> Result<(), StoreError> {
        self.entry(index).replace(value)
    }

    /// Current length of the attribute's value.
    pub fn len(&self, index: AttributeIndex) -> usize {
        self.entry(index).len()
    }

    pub fn max_len(&self, index: AttributeIndex) -> usize {
        self.entry(index).max_len()
    }

    /// Zero the attribute's bytes and reset its length.
    pub fn clear(&self, index: AttributeIndex) {
        let mut entry = self.entry(index);
        entry.bytes.zeroize();
        entry.len = 0;
    }

    fn entry(&self, index: AttributeIndex) -> MutexGuard<'_, StoreEntry> {
        // A panic while holding the lock cannot break the length invariant:
        // `replace` validates before mutating.
        self.entries[index.position()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::new([ATTRIBUTE_CAPACITY; AttributeIndex::COUNT])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    // ==================== Read/Write Tests ====================

    #[test]
    fn test_new_store_is_empty() {
        let store = AttributeStore::default();
        for index in AttributeIndex::ALL {
            assert!(store.read(index).is_empty());
            assert_eq!(store.len(index), 0);
            assert_eq!(store.max_len(index), ATTRIBUTE_CAPACITY);
        }
    }

    #[test]
    fn test_write_then_read() {
        let store = AttributeStore::default();
        store.write(AttributeIndex::WifiId, b"MyNetwork").unwrap();
        assert_eq!(store.read(AttributeIndex::WifiId), b"MyNetwork");
        assert_eq!(store.len(AttributeIndex::WifiId), 9);
        // Other attribute untouched
        assert!(store.read(AttributeIndex::Password).is_empty());
    }

    #[test]
    fn test_write_exact_capacity() {
        let store = AttributeStore::default();
        let value = [b'x'; ATTRIBUTE_CAPACITY];
        store.write(AttributeIndex::Password, &value).unwrap();
        assert_eq!(store.read(AttributeIndex::Password), value);
    }

    #[test]
    fn test_write_empty_value() {
        let store = AttributeStore::default();
        store.write(AttributeIndex::WifiId, b"first").unwrap();
        store.write(AttributeIndex::WifiId, b"").unwrap();
        assert!(store.read(AttributeIndex::WifiId).is_empty());
    }

    #[test]
    fn test_shorter_write_replaces_whole_value() {
        let store = AttributeStore::default();
        store.write(AttributeIndex::WifiId, b"LongNetworkName").unwrap();
        store.write(AttributeIndex::WifiId, b"Net").unwrap();
        assert_eq!(store.read(AttributeIndex::WifiId), b"Net");
        store.with_entry(AttributeIndex::WifiId, |entry| {
            assert!(entry.bytes[3..].iter().all(|&b| b == 0));
        });
    }

    // ==================== Bounds Tests ====================

    #[test]
    fn test_too_long_rejected_without_mutation() {
        let store = AttributeStore::default();
        store.write(AttributeIndex::Password, b"secret123").unwrap();

        let result = store.write(AttributeIndex::Password, &[b'a'; 40]);
        assert_eq!(result, Err(StoreError::TooLong { len: 40, max: 32 }));
        assert_eq!(store.read(AttributeIndex::Password), b"secret123");
    }

    #[test]
    fn test_one_past_capacity_rejected() {
        let store = AttributeStore::default();
        let result = store.write(AttributeIndex::WifiId, &[0u8; ATTRIBUTE_CAPACITY + 1]);
        assert!(matches!(result, Err(StoreError::TooLong { .. })));
        assert!(store.read(AttributeIndex::WifiId).is_empty());
    }

    #[test]
    fn test_custom_capacity() {
        let store = AttributeStore::new([8, 4]);
        assert!(store.write(AttributeIndex::WifiId, b"12345678").is_ok());
        assert_eq!(
            store.write(AttributeIndex::Password, b"12345"),
            Err(StoreError::TooLong { len: 5, max: 4 })
        );
    }

    #[test]
    fn test_capacity_clamped() {
        let store = AttributeStore::new([1000, 32]);
        assert_eq!(store.max_len(AttributeIndex::WifiId), ATTRIBUTE_CAPACITY);
    }

    #[test]
    fn test_clear_zeroes_entry() {
        let store = AttributeStore::default();
        store.write(AttributeIndex::Password, b"hunter22").unwrap();
        store.clear(AttributeIndex::Password);
        assert_eq!(store.len(AttributeIndex::Password), 0);
        store.with_entry(AttributeIndex::Password, |entry| {
            assert!(entry.bytes.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn test_debug_hides_value() {
        let store = AttributeStore::default();
        store.write(AttributeIndex::Password, b"topsecret").unwrap();
        let debug_str = format!("{:?}", store);
        assert!(!debug_str.contains("topsecret"));
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::TooLong { len: 40, max: 32 };
        assert_eq!(err.to_string(), "value too long: 40 bytes (max 32)");
    }

    // ==================== Concurrency Tests ====================

    #[test]
    fn test_concurrent_writes_keep_invariant() {
        let store = Arc::new(AttributeStore::default());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for n in 0..100usize {
                        let len = (n + i as usize) % (ATTRIBUTE_CAPACITY + 5);
                        let _ = store.write(AttributeIndex::WifiId, &vec![i; len]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let value = store.read(AttributeIndex::WifiId);
        assert!(value.len() <= ATTRIBUTE_CAPACITY);
        // Every write is whole: all bytes come from the same writer.
        if let Some(&first) = value.first() {
            assert!(value.iter().all(|&b| b == first));
        }
    }
}
