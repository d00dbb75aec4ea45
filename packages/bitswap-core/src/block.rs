use std::fmt;

use bytes::Bytes;
use multihash::Multihash;

/// Maximum digest size we're willing to carry inline; matches the largest
/// hash function code in common use (sha2-512) with headroom.
const MAX_DIGEST_SIZE: usize = 64;

/// A content address: a self-describing hash of a [`Block`]'s data.
///
/// Equality and ordering are byte-wise on the encoded multihash form, as
/// required so `BlockKey` can serve as a map key with a stable iteration
/// order for tests and logs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey(Multihash<MAX_DIGEST_SIZE>);

impl BlockKey {
    pub fn new(multihash: Multihash<MAX_DIGEST_SIZE>) -> Self {
        Self(multihash)
    }

    pub fn multihash(&self) -> &Multihash<MAX_DIGEST_SIZE> {
        &self.0
    }

    /// Canonical base58 form, used for logs and notification keys.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0.to_bytes()).into_string()
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockKey({})", self.to_base58())
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// An immutable (key, data) pair. The core never validates that `key` is
/// actually the hash of `data`; that invariant belongs to the blockstore.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    pub key: BlockKey,
    pub data: Bytes,
}

impl Block {
    pub fn new(key: BlockKey, data: impl Into<Bytes>) -> Self {
        Self {
            key,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("len", &self.data.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_key;

    #[test]
    fn equal_keys_for_equal_digests() {
        let a = test_key(b"hello");
        let b = test_key(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_data_different_keys() {
        assert_ne!(test_key(b"hello"), test_key(b"world"));
    }

    #[test]
    fn base58_round_trips_through_display() {
        let key = test_key(b"hello");
        let rendered = key.to_base58();
        assert_eq!(rendered, key.to_string());
        assert!(!rendered.is_empty());
    }
}
