//! Versioned value wrapper.

use crate::core::time::LogicalTime;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A value paired with the unique version that wrote it and the logical
/// time of that write.
///
/// Versions are issued by the map's global version counter and are
/// strictly increasing across successive writes of the same key, so a
/// `Versioned` read at one point can later be used as a compare-and-set
/// fence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    /// The opaque value bytes.
    pub value: Bytes,

    /// Version issued by the mutation that wrote this value.
    pub version: u64,

    /// Logical time of the write.
    pub created: LogicalTime,
}

impl Versioned {
    /// Create a versioned value.
    pub fn new(value: impl Into<Bytes>, version: u64, created: LogicalTime) -> Self {
        Self {
            value: value.into(),
            version,
            created,
        }
    }

    /// Length of the value in bytes.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl std::fmt::Display for Versioned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "v{}@{} ({} bytes)",
            self.version,
            self.created,
            self.value.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_and_accessors() {
        let v = Versioned::new(vec![1u8, 2, 3], 7, LogicalTime::new(42));
        assert_eq!(v.version, 7);
        assert_eq!(v.created.ms, 42);
        assert_eq!(v.len(), 3);
        assert!(!v.is_empty());
    }
}
