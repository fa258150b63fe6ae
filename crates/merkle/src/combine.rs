//! Hash combination rules.
//!
//! Every hash in the tree is produced one of two ways: from a leaf record's
//! key and value bytes, or from the hashes of one or two children. Each input
//! starts with a marker byte identifying the node kind, so bytes hashed as a
//! leaf can never be reinterpreted as an internal node and vice versa. This
//! byte layout is a wire contract: any code that recomputes or verifies
//! hashes outside this crate must reproduce it exactly.

use vmap_types::Hash;

use crate::leaf::{LeafRecord, ValueCodec};

/// Marker byte prefixing leaf hash inputs.
pub const LEAF_MARKER: u8 = 0x00;

/// Marker byte prefixing the hash input of an internal node with a single
/// (left) child.
pub const ONE_CHILD_MARKER: u8 = 0x01;

/// Marker byte prefixing the hash input of an internal node with two
/// children.
pub const TWO_CHILDREN_MARKER: u8 = 0x02;

/// Compute the hash of a leaf record.
///
/// The input is the leaf marker, the length-prefixed key bytes, and the
/// length-prefixed value bytes. A leaf without a value contributes no value
/// section at all, which is distinct from a present-but-empty value.
pub fn hash_leaf<V: ValueCodec>(leaf: &LeafRecord<V>) -> Hash {
    let key = leaf.key_bytes();
    let mut key_len = [0u8; 10];
    let key_len = write_uvarint(&mut key_len, key.len() as u64);
    match leaf.value_bytes() {
        Some(value) => {
            let mut value_len = [0u8; 10];
            let value_len = write_uvarint(&mut value_len, value.len() as u64);
            Hash::from_parts(&[&[LEAF_MARKER], key_len, key.as_ref(), value_len, value.as_ref()])
        }
        None => Hash::from_parts(&[&[LEAF_MARKER], key_len, key.as_ref()]),
    }
}

/// Combine one or two child hashes into their parent's hash.
///
/// `right` is `None` only when the right child does not exist, which yields
/// the one-child form; a distinct marker keeps it from colliding with any
/// two-children input.
pub fn hash_internal(left: &Hash, right: Option<&Hash>) -> Hash {
    match right {
        Some(right) => {
            Hash::from_parts(&[&[TWO_CHILDREN_MARKER], left.as_bytes(), right.as_bytes()])
        }
        None => Hash::from_parts(&[&[ONE_CHILD_MARKER], left.as_bytes()]),
    }
}

/// The root hash of an empty tree.
pub fn empty_root_hash() -> Hash {
    Hash::from_bytes(&[LEAF_MARKER])
}

/// Encode `value` as an unsigned LEB128 varint into `buf`, returning the
/// written prefix.
fn write_uvarint(buf: &mut [u8; 10], mut value: u64) -> &[u8] {
    let mut i = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[i] = byte;
            i += 1;
            break;
        }
        buf[i] = byte | 0x80;
        i += 1;
    }
    &buf[..i]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use bytes::Bytes;
    use vmap_types::Hash;

    #[derive(Clone)]
    struct RawValue(Bytes);

    impl ValueCodec for RawValue {
        fn to_bytes(&self) -> Bytes {
            self.0.clone()
        }

        fn from_bytes(bytes: &[u8]) -> Result<Self, crate::leaf::ValueDecodeError> {
            Ok(Self(Bytes::copy_from_slice(bytes)))
        }
    }

    fn leaf(key: &'static [u8], value: Option<&'static [u8]>) -> LeafRecord<RawValue> {
        LeafRecord::from_value_bytes(
            Path::new(1),
            Bytes::from_static(key),
            value.map(Bytes::from_static),
        )
    }

    #[test]
    fn test_markers_are_pairwise_distinct() {
        assert_ne!(LEAF_MARKER, ONE_CHILD_MARKER);
        assert_ne!(LEAF_MARKER, TWO_CHILDREN_MARKER);
        assert_ne!(ONE_CHILD_MARKER, TWO_CHILDREN_MARKER);
    }

    #[test]
    fn test_leaf_hash_layout() {
        let record = leaf(b"key", Some(b"value"));
        let expected = Hash::from_parts(&[&[0x00], &[3], b"key", &[5], b"value"]);
        assert_eq!(hash_leaf(&record), expected);
    }

    #[test]
    fn test_valueless_differs_from_empty_value() {
        let no_value = leaf(b"key", None);
        let empty_value = leaf(b"key", Some(b""));
        assert_ne!(hash_leaf(&no_value), hash_leaf(&empty_value));
    }

    #[test]
    fn test_one_child_differs_from_two_children() {
        let left = Hash::from_bytes(b"left");
        let right = Hash::from_bytes(b"right");
        assert_ne!(
            hash_internal(&left, None),
            hash_internal(&left, Some(&right))
        );
    }

    #[test]
    fn test_child_order_matters() {
        let a = Hash::from_bytes(b"a");
        let b = Hash::from_bytes(b"b");
        assert_ne!(hash_internal(&a, Some(&b)), hash_internal(&b, Some(&a)));
    }

    #[test]
    fn test_leaf_and_internal_inputs_never_collide() {
        // A leaf whose key bytes mimic a two-children internal input still
        // hashes differently thanks to the marker.
        let left = Hash::from_bytes(b"left");
        let right = Hash::from_bytes(b"right");
        let internal = hash_internal(&left, Some(&right));

        let mut mimic = Vec::new();
        mimic.extend_from_slice(left.as_bytes());
        mimic.extend_from_slice(right.as_bytes());
        let record = LeafRecord::<RawValue>::from_value_bytes(
            Path::new(1),
            Bytes::from(mimic),
            None,
        );
        assert_ne!(hash_leaf(&record), internal);
    }

    #[test]
    fn test_varint_length_prefix_boundaries() {
        let mut buf = [0u8; 10];
        assert_eq!(write_uvarint(&mut buf, 0), &[0x00]);
        assert_eq!(write_uvarint(&mut buf, 127), &[0x7f]);
        assert_eq!(write_uvarint(&mut buf, 128), &[0x80, 0x01]);
        assert_eq!(write_uvarint(&mut buf, 300), &[0xac, 0x02]);
    }

    #[test]
    fn test_empty_root_hash_is_stable() {
        assert_eq!(empty_root_hash(), empty_root_hash());
        assert_eq!(empty_root_hash(), Hash::from_bytes(&[0x00]));
    }
}
