//! Attribute table of the provisioning service.
//!
//! The table is an ordered list of attribute specifications, one per
//! [`AttributeIndex`]. It is handed to the stack once at registration; the
//! stack later reports the handles it assigned, and from then on
//! [`AttributeTable::resolve`] maps incoming request handles back to logical
//! attributes.
//!
//! ```text
//! Service (primary)
//! ├── WiFi ID  (Read, Write) - network name, up to 32 bytes
//! └── Password (Read, Write) - network passphrase, up to 32 bytes
//! ```

use crate::stack::Handle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Stable logical identity of a provisioning attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeIndex {
    WifiId,
    Password,
}

impl AttributeIndex {
    /// Number of logical attributes.
    pub const COUNT: usize = 2;

    /// All attributes in table order.
    pub const ALL: [AttributeIndex; Self::COUNT] = [Self::WifiId, Self::Password];

    /// Position of the attribute in the table.
    pub const fn position(self) -> usize {
        match self {
            Self::WifiId => 0,
            Self::Password => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WifiId => "wifi_id",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for AttributeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access permissions of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Permissions {
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

/// Specification of one attribute in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// 16-bit characteristic UUID.
    pub uuid: u16,
    pub permissions: Permissions,
    /// Capacity of the value in bytes.
    pub max_len: usize,
}

impl AttributeSpec {
    pub const fn new(uuid: u16, permissions: Permissions, max_len: usize) -> Self {
        Self {
            uuid,
            permissions,
            max_len,
        }
    }
}

/// Errors reported when binding stack-assigned handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Handles were already bound; bindings never change once made.
    AlreadyBound,
    /// The stack reported a different number of handles than attributes.
    CountMismatch { expected: usize, got: usize },
    /// The same handle was reported for two attributes.
    DuplicateHandle(Handle),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyBound => write!(f, "attribute handles already bound"),
            Self::CountMismatch { expected, got } => {
                write!(f, "expected {} attribute handles, got {}", expected, got)
            }
            Self::DuplicateHandle(handle) => write!(f, "duplicate attribute handle {}", handle),
        }
    }
}

impl std::error::Error for BindError {}

#[derive(Debug)]
struct Binding {
    service_handle: Handle,
    handles: [Handle; AttributeIndex::COUNT],
    by_handle: HashMap<Handle, AttributeIndex>,
}

/// The ordered attribute table and its handle map.
#[derive(Debug)]
pub struct AttributeTable {
    specs: [AttributeSpec; AttributeIndex::COUNT],
    binding: RwLock<Option<Binding>>,
}

impl AttributeTable {
    /// Create an unbound table. `specs` are given in [`AttributeIndex::ALL`]
    /// order.
    pub fn new(specs: [AttributeSpec; AttributeIndex::COUNT]) -> Self {
        Self {
            specs,
            binding: RwLock::new(None),
        }
    }

    /// Specifications in table order, as registered with the stack.
    pub fn specs(&self) -> &[AttributeSpec] {
        &self.specs
    }

    pub fn spec(&self, index: AttributeIndex) -> &AttributeSpec {
        &self.specs[index.position()]
    }

    /// Capacities in table order, for sizing the store.
    pub fn capacities(&self) -> [usize; AttributeIndex::COUNT] {
        self.specs.map(|spec| spec.max_len)
    }

    /// Value handles out of the row handles a stack reports for the table.
    ///
    /// Rows are laid out as the service declaration followed by a
    /// characteristic declaration and value row per attribute. A truncated
    /// report yields only the value rows it contains.
    pub fn value_handles(rows: &[Handle]) -> Vec<Handle> {
        rows.iter().skip(2).step_by(2).copied().collect()
    }

    /// Record the handles assigned by the stack, in table order.
    pub fn bind(&self, service_handle: Handle, handles: &[Handle]) -> Result<(), BindError> {
        let mut binding = self
            .binding
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if binding.is_some() {
            return Err(BindError::AlreadyBound);
        }
        if handles.len() != AttributeIndex::COUNT {
            return Err(BindError::CountMismatch {
                expected: AttributeIndex::COUNT,
                got: handles.len(),
            });
        }

        let mut by_handle = HashMap::with_capacity(AttributeIndex::COUNT);
        let mut assigned = [0; AttributeIndex::COUNT];
        for (index, &handle) in AttributeIndex::ALL.iter().zip(handles) {
            if by_handle.insert(handle, *index).is_some() {
                return Err(BindError::DuplicateHandle(handle));
            }
            assigned[index.position()] = handle;
        }

        *binding = Some(Binding {
            service_handle,
            handles: assigned,
            by_handle,
        });
        Ok(())
    }

    /// Map a request handle to its logical attribute.
    ///
    /// Returns `None` for unknown handles and for every handle before the
    /// table is bound.
    pub fn resolve(&self, handle: Handle) -> Option<AttributeIndex> {
        self.read_binding()
            .as_ref()
            .and_then(|binding| binding.by_handle.get(&handle).copied())
    }

    /// Handle assigned to an attribute, once bound.
    pub fn handle_of(&self, index: AttributeIndex) -> Option<Handle> {
        self.read_binding()
            .as_ref()
            .map(|binding| binding.handles[index.position()])
    }

    pub fn service_handle(&self) -> Option<Handle> {
        self.read_binding()
            .as_ref()
            .map(|binding| binding.service_handle)
    }

    pub fn is_bound(&self) -> bool {
        self.read_binding().is_some()
    }

    fn read_binding(&self) -> std::sync::RwLockReadGuard<'_, Option<Binding>> {
        self.binding
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AttributeTable {
        AttributeTable::new([
            AttributeSpec::new(0xEEEE, Permissions::READ_WRITE, 32),
            AttributeSpec::new(0xDDDD, Permissions::READ_WRITE, 32),
        ])
    }

    // ==================== Index Tests ====================

    #[test]
    fn test_index_positions_match_all() {
        for (i, index) in AttributeIndex::ALL.iter().enumerate() {
            assert_eq!(index.position(), i);
        }
    }

    #[test]
    fn test_spec_lookup() {
        let table = table();
        assert_eq!(table.spec(AttributeIndex::WifiId).uuid, 0xEEEE);
        assert_eq!(table.spec(AttributeIndex::Password).uuid, 0xDDDD);
        assert_eq!(table.capacities(), [32, 32]);
    }

    // ==================== Row Handle Tests ====================

    #[test]
    fn test_value_handles_from_full_table() {
        assert_eq!(AttributeTable::value_handles(&[40, 41, 42, 43, 44]), vec![42, 44]);
    }

    #[test]
    fn test_value_handles_single_attribute() {
        assert_eq!(AttributeTable::value_handles(&[7, 8, 9]), vec![9]);
    }

    #[test]
    fn test_value_handles_short_rows() {
        assert!(AttributeTable::value_handles(&[]).is_empty());
        assert!(AttributeTable::value_handles(&[40]).is_empty());
        assert!(AttributeTable::value_handles(&[40, 41]).is_empty());
        // Last declaration without its value row
        assert_eq!(AttributeTable::value_handles(&[40, 41, 42, 43]), vec![42]);
    }

    #[test]
    fn test_truncated_rows_fail_to_bind() {
        let table = table();
        let handles = AttributeTable::value_handles(&[40, 41, 42, 43]);
        assert_eq!(
            table.bind(40, &handles),
            Err(BindError::CountMismatch {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_bind_from_rows() {
        let table = table();
        let rows = [40, 41, 42, 43, 44];
        table.bind(rows[0], &AttributeTable::value_handles(&rows)).unwrap();
        assert_eq!(table.resolve(42), Some(AttributeIndex::WifiId));
        assert_eq!(table.resolve(44), Some(AttributeIndex::Password));
        assert_eq!(table.resolve(41), None);
    }

    // ==================== Binding Tests ====================

    #[test]
    fn test_unbound_table_resolves_nothing() {
        let table = table();
        assert!(!table.is_bound());
        assert_eq!(table.resolve(0), None);
        assert_eq!(table.resolve(42), None);
        assert_eq!(table.handle_of(AttributeIndex::WifiId), None);
    }

    #[test]
    fn test_resolve_bound_handles() {
        let table = table();
        table.bind(40, &[42, 44]).unwrap();

        assert_eq!(table.resolve(42), Some(AttributeIndex::WifiId));
        assert_eq!(table.resolve(44), Some(AttributeIndex::Password));
        assert_eq!(table.handle_of(AttributeIndex::Password), Some(44));
        assert_eq!(table.service_handle(), Some(40));
    }

    #[test]
    fn test_resolve_unknown_handle() {
        let table = table();
        table.bind(40, &[42, 44]).unwrap();

        // Service and declaration handles are not addressable attributes
        assert_eq!(table.resolve(40), None);
        assert_eq!(table.resolve(43), None);
        assert_eq!(table.resolve(u16::MAX), None);
    }

    #[test]
    fn test_bind_only_once() {
        let table = table();
        table.bind(40, &[42, 44]).unwrap();
        assert_eq!(table.bind(50, &[52, 54]), Err(BindError::AlreadyBound));
        // Original binding survives
        assert_eq!(table.resolve(42), Some(AttributeIndex::WifiId));
        assert_eq!(table.resolve(52), None);
    }

    #[test]
    fn test_bind_count_mismatch() {
        let table = table();
        assert_eq!(
            table.bind(40, &[42]),
            Err(BindError::CountMismatch {
                expected: 2,
                got: 1
            })
        );
        assert!(!table.is_bound());
    }

    #[test]
    fn test_bind_duplicate_handle() {
        let table = table();
        assert_eq!(table.bind(40, &[42, 42]), Err(BindError::DuplicateHandle(42)));
        assert!(!table.is_bound());
    }
}
