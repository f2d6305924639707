//! File metadata records and the server's FileInfoMap (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::block::BlockHash;

/// The reserved local-index file name; never a valid sync target (§6).
pub const DEFAULT_META_FILENAME: &str = "index.db";

/// A file's name, version, and ordered block-hash list (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    pub filename: String,
    pub version: i64,
    pub block_hash_list: Vec<BlockHash>,
}

impl FileMetaData {
    pub fn is_tombstone(&self) -> bool {
        matches!(self.block_hash_list.as_slice(), [BlockHash::Tombstone])
    }

    pub fn is_empty_file(&self) -> bool {
        matches!(self.block_hash_list.as_slice(), [BlockHash::Empty])
    }

    pub fn tombstone(filename: String, version: i64) -> Self {
        FileMetaData {
            filename,
            version,
            block_hash_list: vec![BlockHash::Tombstone],
        }
    }
}

/// Wire shape for FileMetaData (§6): `repeated string block_hash_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetaDataWire {
    pub filename: String,
    pub version: i64,
    pub block_hash_list: Vec<String>,
}

impl From<&FileMetaData> for FileMetaDataWire {
    fn from(meta: &FileMetaData) -> Self {
        FileMetaDataWire {
            filename: meta.filename.clone(),
            version: meta.version,
            block_hash_list: meta
                .block_hash_list
                .iter()
                .map(|h| h.as_wire_str().to_string())
                .collect(),
        }
    }
}

impl From<FileMetaDataWire> for FileMetaData {
    fn from(wire: FileMetaDataWire) -> Self {
        FileMetaData {
            filename: wire.filename,
            version: wire.version,
            block_hash_list: wire.block_hash_list.into_iter().map(BlockHash::from).collect(),
        }
    }
}

/// filename -> FileMetaData (§3).
pub type FileInfoMap = HashMap<String, FileMetaData>;

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfoMapWire {
    pub file_info_map: HashMap<String, FileMetaDataWire>,
}

pub fn map_to_wire(map: &FileInfoMap) -> FileInfoMapWire {
    FileInfoMapWire {
        file_info_map: map.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
    }
}

pub fn map_from_wire(wire: FileInfoMapWire) -> FileInfoMap {
    wire.file_info_map
        .into_iter()
        .map(|(k, v)| (k, v.into()))
        .collect()
}

/// A file is eligible for sync iff its name is not `DEFAULT_META_FILENAME`
/// and contains neither `/` nor `,` (§6 naming rules).
pub fn is_valid_filename(name: &str) -> bool {
    name != DEFAULT_META_FILENAME && !name.contains('/') && !name.contains(',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_filenames() {
        assert!(is_valid_filename("a.txt"));
        assert!(!is_valid_filename("index.db"));
        assert!(!is_valid_filename("a/b.txt"));
        assert!(!is_valid_filename("a,b.txt"));
    }

    #[test]
    fn tombstone_and_empty_detection() {
        let tomb = FileMetaData::tombstone("a".into(), 2);
        assert!(tomb.is_tombstone());
        let empty = FileMetaData {
            filename: "b".into(),
            version: 1,
            block_hash_list: vec![BlockHash::Empty],
        };
        assert!(empty.is_empty_file());
    }

    #[test]
    fn wire_roundtrip_preserves_sentinels() {
        let meta = FileMetaData {
            filename: "x".into(),
            version: 3,
            block_hash_list: vec![BlockHash::Content("a".repeat(64)), BlockHash::Empty],
        };
        let wire: FileMetaDataWire = (&meta).into();
        assert_eq!(wire.block_hash_list[1], "-1");
        let back: FileMetaData = wire.into();
        assert_eq!(back, meta);
    }
}
