//! Block identity and the two reserved sentinel hashes (§3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const EMPTY_FILE_HASH: &str = "-1";
pub const TOMBSTONE_HASH: &str = "0";

/// A block hash, distinguishing the two wire sentinels from real content
/// hashes (§9 re-architecture note: tagged variant internally, sentinel
/// strings on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockHash {
    Empty,
    Tombstone,
    Content(String),
}

impl BlockHash {
    pub fn as_wire_str(&self) -> &str {
        match self {
            BlockHash::Empty => EMPTY_FILE_HASH,
            BlockHash::Tombstone => TOMBSTONE_HASH,
            BlockHash::Content(h) => h,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, BlockHash::Content(_))
    }
}

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        match s {
            EMPTY_FILE_HASH => BlockHash::Empty,
            TOMBSTONE_HASH => BlockHash::Tombstone,
            other => BlockHash::Content(other.to_string()),
        }
    }
}

impl From<String> for BlockHash {
    fn from(s: String) -> Self {
        BlockHash::from(s.as_str())
    }
}

impl Serialize for BlockHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(BlockHash::from(s))
    }
}

/// Computes the hex-encoded SHA-256 of `data`, the identity of a real
/// content block.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// An opaque block of bytes plus its declared size (§3, §6 wire shape).
/// `data` is `None` for the tombstone sentinel and `Some(vec![])` for the
/// empty-file sentinel.
#[derive(Debug, Clone)]
pub struct Block {
    pub data: Option<Vec<u8>>,
    pub size: i32,
}

impl Block {
    pub fn empty_file_sentinel() -> Self {
        Block {
            data: Some(Vec::new()),
            size: -1,
        }
    }

    pub fn tombstone_sentinel() -> Self {
        Block { data: None, size: 0 }
    }

    pub fn from_content(data: Vec<u8>) -> Self {
        let size = data.len() as i32;
        Block {
            data: Some(data),
            size,
        }
    }

    /// Hash this block's content per PutBlock semantics: blocks with
    /// `data = None` are stored under the empty-file sentinel, matching
    /// the observed BlockStore.PutBlock behavior (§4.1).
    pub fn content_hash(&self) -> BlockHash {
        match &self.data {
            None => BlockHash::Empty,
            Some(bytes) => BlockHash::Content(hash_bytes(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_matches_known_sha256() {
        let h = hash_bytes(b"hello");
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn block_hash_roundtrips_sentinels() {
        assert_eq!(BlockHash::from("-1"), BlockHash::Empty);
        assert_eq!(BlockHash::from("0"), BlockHash::Tombstone);
        assert_eq!(BlockHash::Empty.as_wire_str(), "-1");
        assert_eq!(BlockHash::Tombstone.as_wire_str(), "0");
    }

    #[test]
    fn put_block_with_no_data_hashes_to_empty_sentinel() {
        let block = Block {
            data: None,
            size: 0,
        };
        assert_eq!(block.content_hash(), BlockHash::Empty);
    }
}
