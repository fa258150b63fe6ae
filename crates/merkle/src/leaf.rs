//! Leaf records.
//!
//! A leaf record is one key/value entry of the virtual map, pinned to a leaf
//! path. The value travels in two interchangeable forms — a domain object and
//! its encoded bytes — and whichever form is missing is produced lazily on
//! first request and cached for the record's lifetime. Records are immutable
//! from the outside: every update returns a new record sharing the unchanged
//! parts.

use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use std::sync::OnceLock;

use bytes::Bytes;

use crate::path::{Path, INVALID_PATH};

/// Encodes and decodes a leaf value to and from bytes.
///
/// Encoding must be deterministic: equal values produce equal bytes, since
/// leaf hashes and record equality are both defined over the encoded form.
pub trait ValueCodec: Sized {
    /// Encode this value to bytes.
    fn to_bytes(&self) -> Bytes;

    /// Decode a value from bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValueDecodeError>;
}

/// A leaf value's bytes did not parse under the expected codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to decode leaf value: {0}")]
pub struct ValueDecodeError(String);

impl ValueDecodeError {
    /// Create a decode error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The value of a leaf record, in whichever forms are currently known.
///
/// The missing form is computed on first access and cached via `OnceLock`, so
/// concurrent first accesses converge on a single result instead of racing.
#[derive(Clone)]
enum ValueState<V> {
    /// The leaf has no value at all. Distinct from an empty byte string.
    None,
    /// Object form known; bytes encoded on demand.
    Object { object: V, bytes: OnceLock<Bytes> },
    /// Byte form known; object decoded on demand.
    Bytes { bytes: Bytes, object: OnceLock<V> },
}

/// One key/value record stored at a leaf path.
///
/// Alongside its current path the record carries the path it occupied when it
/// was last loaded from storage, letting flush logic skip key-to-path index
/// updates for records that changed in place.
#[derive(Clone)]
pub struct LeafRecord<V> {
    path: Path,
    path_on_disk: Path,
    key: Bytes,
    value: ValueState<V>,
}

impl<V> LeafRecord<V> {
    /// Create a new record from a key and an object-form value.
    ///
    /// The record is considered new: its path on disk is invalid until it is
    /// stored.
    pub fn new(path: Path, key: Bytes, value: Option<V>) -> Self {
        Self {
            path,
            path_on_disk: INVALID_PATH,
            key,
            value: match value {
                Some(object) => ValueState::Object {
                    object,
                    bytes: OnceLock::new(),
                },
                None => ValueState::None,
            },
        }
    }

    /// Create a new record from a key and already-encoded value bytes.
    pub fn from_value_bytes(path: Path, key: Bytes, value_bytes: Option<Bytes>) -> Self {
        Self {
            path,
            path_on_disk: INVALID_PATH,
            key,
            value: match value_bytes {
                Some(bytes) => ValueState::Bytes {
                    bytes,
                    object: OnceLock::new(),
                },
                None => ValueState::None,
            },
        }
    }

    /// Create a record as loaded from storage: its path on disk equals its
    /// current path until the record is moved.
    pub fn from_storage(path: Path, key: Bytes, value_bytes: Option<Bytes>) -> Self {
        Self {
            path_on_disk: path,
            ..Self::from_value_bytes(path, key, value_bytes)
        }
    }

    /// The sentinel marking a deleted record.
    ///
    /// The sentinel's path is invalid; its path and key must never be
    /// queried, and it must never be hashed.
    pub fn deleted() -> Self {
        Self {
            path: INVALID_PATH,
            path_on_disk: INVALID_PATH,
            key: Bytes::new(),
            value: ValueState::None,
        }
    }

    /// Whether this record is the deleted sentinel.
    pub fn is_deleted(&self) -> bool {
        !self.path.is_valid()
    }

    /// The record's current leaf path.
    pub fn path(&self) -> Path {
        self.path
    }

    /// The path this record occupied when last loaded from storage, or
    /// [`INVALID_PATH`] for records never stored.
    pub fn path_on_disk(&self) -> Path {
        self.path_on_disk
    }

    /// The record's key bytes.
    pub fn key_bytes(&self) -> &Bytes {
        &self.key
    }

    /// Whether this record's path differs from where it was loaded from.
    ///
    /// New records (never loaded) always report true. Must not be called on
    /// the deleted sentinel.
    pub fn is_new_or_moved(&self) -> bool {
        debug_assert!(
            self.path.is_valid(),
            "is_new_or_moved must not be called on a record with an invalid path"
        );
        self.path != self.path_on_disk
    }

    /// A copy of this record at a different path, sharing key and value.
    pub fn with_path(&self, new_path: Path) -> Self
    where
        V: Clone,
    {
        Self {
            path: new_path,
            ..self.clone()
        }
    }

    /// A copy of this record with a new object-form value.
    pub fn with_value(&self, value: Option<V>) -> Self {
        Self {
            path: self.path,
            path_on_disk: self.path_on_disk,
            key: self.key.clone(),
            value: match value {
                Some(object) => ValueState::Object {
                    object,
                    bytes: OnceLock::new(),
                },
                None => ValueState::None,
            },
        }
    }

    /// A copy of this record with a new byte-form value.
    pub fn with_value_bytes(&self, value_bytes: Option<Bytes>) -> Self {
        Self {
            path: self.path,
            path_on_disk: self.path_on_disk,
            key: self.key.clone(),
            value: match value_bytes {
                Some(bytes) => ValueState::Bytes {
                    bytes,
                    object: OnceLock::new(),
                },
                None => ValueState::None,
            },
        }
    }
}

impl<V: ValueCodec> LeafRecord<V> {
    /// The object form of the value, decoding from bytes on first call.
    ///
    /// Returns `None` for a valueless leaf. Fails with [`ValueDecodeError`]
    /// if the byte form does not parse; the byte form itself is untouched by
    /// a failed decode.
    pub fn value(&self) -> Result<Option<&V>, ValueDecodeError> {
        match &self.value {
            ValueState::None => Ok(None),
            ValueState::Object { object, .. } => Ok(Some(object)),
            ValueState::Bytes { bytes, object } => {
                if let Some(v) = object.get() {
                    return Ok(Some(v));
                }
                let decoded = V::from_bytes(bytes)?;
                // Losing the race just discards our copy; both decodes of the
                // same bytes are equal.
                Ok(Some(object.get_or_init(|| decoded)))
            }
        }
    }

    /// The byte form of the value, encoding from the object on first call.
    ///
    /// Returns `None` for a valueless leaf.
    pub fn value_bytes(&self) -> Option<&Bytes> {
        match &self.value {
            ValueState::None => None,
            ValueState::Bytes { bytes, .. } => Some(bytes),
            ValueState::Object { object, bytes } => Some(bytes.get_or_init(|| object.to_bytes())),
        }
    }
}

// Equality is defined over (path, key, encoded value), not the object form,
// so two records are equal iff their serialized forms match.
impl<V: ValueCodec> PartialEq for LeafRecord<V> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.key == other.key
            && self.value_bytes() == other.value_bytes()
    }
}

impl<V: ValueCodec> Eq for LeafRecord<V> {}

impl<V: ValueCodec> StdHash for LeafRecord<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.key.hash(state);
        self.value_bytes().hash(state);
    }
}

impl<V: ValueCodec> fmt::Debug for LeafRecord<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafRecord")
            .field("path", &self.path)
            .field("key", &hex::encode(&self.key))
            .field("value_bytes", &self.value_bytes().map(hex::encode))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TestValue(u64);

    impl ValueCodec for TestValue {
        fn to_bytes(&self) -> Bytes {
            Bytes::copy_from_slice(&self.0.to_le_bytes())
        }

        fn from_bytes(bytes: &[u8]) -> Result<Self, ValueDecodeError> {
            let arr: [u8; 8] = bytes
                .try_into()
                .map_err(|_| ValueDecodeError::new(format!("expected 8 bytes, got {}", bytes.len())))?;
            Ok(Self(u64::from_le_bytes(arr)))
        }
    }

    fn key(n: u64) -> Bytes {
        Bytes::copy_from_slice(&n.to_be_bytes())
    }

    #[test]
    fn test_bytes_memoized_from_object() {
        let record = LeafRecord::new(Path::new(5), key(1), Some(TestValue(42)));
        let bytes = record.value_bytes().unwrap().clone();
        assert_eq!(bytes, TestValue(42).to_bytes());
        // Second call returns the cached buffer.
        assert_eq!(record.value_bytes().unwrap(), &bytes);
        assert_eq!(record.value().unwrap(), Some(&TestValue(42)));
    }

    #[test]
    fn test_object_memoized_from_bytes() {
        let record = LeafRecord::<TestValue>::from_value_bytes(
            Path::new(5),
            key(1),
            Some(TestValue(7).to_bytes()),
        );
        assert_eq!(record.value().unwrap(), Some(&TestValue(7)));
        assert_eq!(record.value_bytes().unwrap(), &TestValue(7).to_bytes());
    }

    #[test]
    fn test_malformed_bytes_fail_decode() {
        let record = LeafRecord::<TestValue>::from_value_bytes(
            Path::new(5),
            key(1),
            Some(Bytes::from_static(b"bad")),
        );
        assert!(record.value().is_err());
        // A failed decode leaves the byte form intact.
        assert_eq!(record.value_bytes().unwrap(), &Bytes::from_static(b"bad"));
    }

    #[test]
    fn test_valueless_leaf() {
        let record = LeafRecord::<TestValue>::new(Path::new(5), key(1), None);
        assert_eq!(record.value().unwrap(), None);
        assert_eq!(record.value_bytes(), None);
    }

    #[test]
    fn test_new_or_moved() {
        let fresh = LeafRecord::new(Path::new(9), key(1), Some(TestValue(1)));
        assert!(fresh.is_new_or_moved());
        assert_eq!(fresh.path_on_disk(), crate::path::INVALID_PATH);

        let loaded = LeafRecord::<TestValue>::from_storage(Path::new(9), key(1), None);
        assert!(!loaded.is_new_or_moved());
        assert_eq!(loaded.path_on_disk(), Path::new(9));
        assert!(loaded.with_path(Path::new(10)).is_new_or_moved());
    }

    #[test]
    fn test_with_path_shares_value() {
        let record = LeafRecord::new(Path::new(3), key(1), Some(TestValue(42)));
        let moved = record.with_path(Path::new(7));
        assert_eq!(moved.path(), Path::new(7));
        assert_eq!(moved.key_bytes(), record.key_bytes());
        assert_eq!(moved.value_bytes(), record.value_bytes());
    }

    #[test]
    fn test_with_value_resets_bytes() {
        let record = LeafRecord::new(Path::new(3), key(1), Some(TestValue(1)));
        let _ = record.value_bytes();
        let updated = record.with_value(Some(TestValue(2)));
        assert_eq!(updated.value_bytes().unwrap(), &TestValue(2).to_bytes());
    }

    #[test]
    fn test_equality_over_encoded_form() {
        let from_object = LeafRecord::new(Path::new(3), key(1), Some(TestValue(42)));
        let from_bytes = LeafRecord::<TestValue>::from_value_bytes(
            Path::new(3),
            key(1),
            Some(TestValue(42).to_bytes()),
        );
        assert_eq!(from_object, from_bytes);

        assert_ne!(from_object, from_object.with_path(Path::new(4)));
        assert_ne!(from_object, from_object.with_value(Some(TestValue(43))));
    }

    #[test]
    fn test_deleted_sentinel() {
        let sentinel = LeafRecord::<TestValue>::deleted();
        assert!(sentinel.is_deleted());
        assert!(!LeafRecord::<TestValue>::new(Path::new(1), key(1), None).is_deleted());
    }
}
