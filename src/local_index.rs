//! Persisted local index: the client's record of what it last saw synced,
//! stored as a SQLite database at `<base_dir>/index.db` (§6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::block::BlockHash;
use crate::filemeta::{FileInfoMap, FileMetaData, DEFAULT_META_FILENAME};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS indexes (
    fileName TEXT NOT NULL,
    version INTEGER NOT NULL,
    hashIndex INTEGER NOT NULL,
    hashValue TEXT NOT NULL
);
"#;

pub struct LocalIndex {
    db_path: PathBuf,
}

impl LocalIndex {
    pub fn path_for(base_dir: &Path) -> PathBuf {
        base_dir.join(DEFAULT_META_FILENAME)
    }

    /// Opens (creating if absent) the index database under `base_dir`.
    pub fn open(base_dir: &Path) -> Result<Self> {
        let db_path = Self::path_for(base_dir);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("open local index {}", db_path.display()))?;
        conn.execute_batch(SCHEMA).context("init local index schema")?;
        Ok(LocalIndex { db_path })
    }

    /// Loads every row into a FileInfoMap, grouping by file name and
    /// ordering each file's block-hash list by `hashIndex` (§6).
    pub fn load(&self) -> Result<FileInfoMap> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("open local index {}", self.db_path.display()))?;
        conn.execute_batch(SCHEMA).context("init local index schema")?;

        let mut stmt = conn.prepare(
            "SELECT fileName, version, hashIndex, hashValue FROM indexes ORDER BY fileName, hashIndex",
        )?;
        let mut rows = stmt.query([])?;

        let mut map: FileInfoMap = HashMap::new();
        while let Some(row) = rows.next()? {
            let filename: String = row.get(0)?;
            let version: i64 = row.get(1)?;
            let hash_value: String = row.get(3)?;

            let entry = map.entry(filename.clone()).or_insert_with(|| FileMetaData {
                filename,
                version,
                block_hash_list: Vec::new(),
            });
            entry.block_hash_list.push(BlockHash::from(hash_value));
        }
        Ok(map)
    }

    /// Rewrites the entire table to reflect `map`: drop, recreate, insert
    /// (§6 — the index is a snapshot, not an append log).
    pub fn persist(&self, map: &FileInfoMap) -> Result<()> {
        let mut conn = Connection::open(&self.db_path)
            .with_context(|| format!("open local index {}", self.db_path.display()))?;
        let tx = conn.transaction().context("begin local index tx")?;
        tx.execute("DROP TABLE IF EXISTS indexes", [])?;
        tx.execute_batch(SCHEMA).context("recreate local index schema")?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO indexes (fileName, version, hashIndex, hashValue) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for meta in map.values() {
                for (idx, hash) in meta.block_hash_list.iter().enumerate() {
                    insert.execute(params![
                        meta.filename,
                        meta.version,
                        idx as i64,
                        hash.as_wire_str(),
                    ])?;
                }
            }
        }
        tx.commit().context("commit local index tx")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("surfstore-rs-local-index-{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = temp_dir("roundtrip");
        let index = LocalIndex::open(&dir).unwrap();

        let mut map: FileInfoMap = HashMap::new();
        map.insert(
            "a.txt".to_string(),
            FileMetaData {
                filename: "a.txt".to_string(),
                version: 3,
                block_hash_list: vec![
                    BlockHash::Content("a".repeat(64)),
                    BlockHash::Content("b".repeat(64)),
                ],
            },
        );
        map.insert(
            "b.txt".to_string(),
            FileMetaData::tombstone("b.txt".to_string(), 2),
        );

        index.persist(&map).unwrap();
        let loaded = index.load().unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn persist_overwrites_previous_contents() {
        let dir = temp_dir("overwrite");
        let index = LocalIndex::open(&dir).unwrap();

        let mut first: FileInfoMap = HashMap::new();
        first.insert(
            "a.txt".to_string(),
            FileMetaData {
                filename: "a.txt".to_string(),
                version: 1,
                block_hash_list: vec![BlockHash::Empty],
            },
        );
        index.persist(&first).unwrap();

        let second: FileInfoMap = HashMap::new();
        index.persist(&second).unwrap();

        assert!(index.load().unwrap().is_empty());
    }

    #[test]
    fn fresh_database_loads_as_empty() {
        let dir = temp_dir("fresh");
        let index = LocalIndex::open(&dir).unwrap();
        assert!(index.load().unwrap().is_empty());
    }
}
