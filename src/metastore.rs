//! Metadata coordinator: owns the FileInfoMap and the block-store ring,
//! and admits updates under optimistic version control (§4.3).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::SurfstoreError;
use crate::filemeta::{self, FileInfoMap, FileInfoMapWire, FileMetaData, FileMetaDataWire};
use crate::ring::ConsistentHashRing;

/// Owns the canonical FileInfoMap and the ring of configured block-store
/// addresses. The ring is built once at startup from `block_store_addrs`
/// and never changes for the lifetime of the process (§4.3).
pub struct MetaStore {
    file_info_map: RwLock<FileInfoMap>,
    block_store_addrs: Vec<String>,
    ring: ConsistentHashRing,
}

impl MetaStore {
    pub fn new(block_store_addrs: Vec<String>) -> anyhow::Result<Self> {
        let ring = ConsistentHashRing::new(&block_store_addrs)?;
        Ok(MetaStore {
            file_info_map: RwLock::new(HashMap::new()),
            block_store_addrs,
            ring,
        })
    }

    pub async fn file_info_map(&self) -> FileInfoMap {
        self.file_info_map.read().await.clone()
    }

    /// Admits `update` iff it names a new file at version 1, or an
    /// existing file at `stored_version + 1`. Holds the write guard across
    /// the whole check-and-set so no other caller can interleave (§5).
    /// Returns the new version on success, or the currently-stored version
    /// on rejection (§4.3, §4.4).
    pub async fn update_file(&self, update: FileMetaData) -> Result<i64, SurfstoreError> {
        if !filemeta::is_valid_filename(&update.filename) {
            // An invalid name can never be admitted; treat as a permanent
            // rejection against version 0 so callers don't retry forever.
            return Err(SurfstoreError::VersionMismatch {
                filename: update.filename,
                expected: update.version,
                got: 0,
            });
        }
        let mut map = self.file_info_map.write().await;
        let expected = match map.get(&update.filename) {
            Some(existing) => existing.version + 1,
            None => 1,
        };
        if update.version != expected {
            let current = map.get(&update.filename).map(|m| m.version).unwrap_or(0);
            return Err(SurfstoreError::VersionMismatch {
                filename: update.filename,
                expected: update.version,
                got: current,
            });
        }
        map.insert(update.filename.clone(), update);
        Ok(expected)
    }

    pub fn block_store_addrs(&self) -> &[String] {
        &self.block_store_addrs
    }

    /// Groups each input hash by the block store responsible for it (§4.2).
    pub fn block_store_map(&self, hashes: &[String]) -> HashMap<String, Vec<String>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for hash in hashes {
            let addr = self.ring.responsible_server(hash).to_string();
            out.entry(addr).or_default().push(hash.clone());
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct UpdateSuccess {
    version: i64,
}

#[derive(Debug, Serialize)]
struct UpdateFailure {
    version: i64,
    error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStoreMapRequest {
    pub hashes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStoreMapResponse {
    pub block_store_map: HashMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStoreAddrsResponse {
    pub block_store_addrs: Vec<String>,
}

pub fn router(state: Arc<MetaStore>) -> Router {
    Router::new()
        .route("/files", get(get_file_info_map))
        .route("/files/update", post(update_file))
        .route("/block-store-map", post(get_block_store_map))
        .route("/block-store-addrs", get(get_block_store_addrs))
        .with_state(state)
}

async fn get_file_info_map(State(store): State<Arc<MetaStore>>) -> Json<FileInfoMapWire> {
    Json(filemeta::map_to_wire(&store.file_info_map().await))
}

async fn update_file(
    State(store): State<Arc<MetaStore>>,
    Json(wire): Json<FileMetaDataWire>,
) -> Result<Json<UpdateSuccess>, (StatusCode, Json<UpdateFailure>)> {
    match store.update_file(wire.into()).await {
        Ok(version) => Ok(Json(UpdateSuccess { version })),
        Err(err) => {
            crate::logging::info(format!("rejected update: {err}"));
            Err((
                StatusCode::CONFLICT,
                Json(UpdateFailure {
                    version: -1,
                    error: "version mismatch".to_string(),
                }),
            ))
        }
    }
}

async fn get_block_store_map(
    State(store): State<Arc<MetaStore>>,
    Json(req): Json<BlockStoreMapRequest>,
) -> Json<BlockStoreMapResponse> {
    Json(BlockStoreMapResponse {
        block_store_map: store.block_store_map(&req.hashes),
    })
}

async fn get_block_store_addrs(State(store): State<Arc<MetaStore>>) -> Json<BlockStoreAddrsResponse> {
    Json(BlockStoreAddrsResponse {
        block_store_addrs: store.block_store_addrs().to_vec(),
    })
}

/// Spawns the MetaStore HTTP server on `addr` (mirrors `blockstore::serve`).
pub async fn serve(addr: &str, block_store_addrs: Vec<String>) -> anyhow::Result<std::net::SocketAddr> {
    let store = Arc::new(MetaStore::new(block_store_addrs)?);
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    crate::logging::info(format!("meta store listening on {bound}"));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            crate::logging::error(format!("meta store server error: {e}"));
        }
    });
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHash;

    fn store() -> MetaStore {
        MetaStore::new(vec!["a:1".into(), "b:2".into()]).unwrap()
    }

    #[tokio::test]
    async fn new_file_must_start_at_version_one() {
        let store = store();
        let meta = FileMetaData {
            filename: "a.txt".into(),
            version: 1,
            block_hash_list: vec![BlockHash::Empty],
        };
        assert_eq!(store.update_file(meta).await, Ok(1));
    }

    #[tokio::test]
    async fn new_file_at_version_two_is_rejected() {
        let store = store();
        let meta = FileMetaData {
            filename: "a.txt".into(),
            version: 2,
            block_hash_list: vec![BlockHash::Empty],
        };
        assert_eq!(
            store.update_file(meta).await,
            Err(SurfstoreError::VersionMismatch {
                filename: "a.txt".into(),
                expected: 2,
                got: 0,
            })
        );
    }

    #[tokio::test]
    async fn update_must_increment_by_exactly_one() {
        let store = store();
        store
            .update_file(FileMetaData {
                filename: "a.txt".into(),
                version: 1,
                block_hash_list: vec![BlockHash::Empty],
            })
            .await
            .unwrap();

        let stale = FileMetaData {
            filename: "a.txt".into(),
            version: 1,
            block_hash_list: vec![BlockHash::Tombstone],
        };
        assert_eq!(
            store.update_file(stale).await,
            Err(SurfstoreError::VersionMismatch {
                filename: "a.txt".into(),
                expected: 1,
                got: 1,
            })
        );

        let ahead = FileMetaData {
            filename: "a.txt".into(),
            version: 3,
            block_hash_list: vec![BlockHash::Tombstone],
        };
        assert_eq!(
            store.update_file(ahead).await,
            Err(SurfstoreError::VersionMismatch {
                filename: "a.txt".into(),
                expected: 3,
                got: 1,
            })
        );

        let correct = FileMetaData {
            filename: "a.txt".into(),
            version: 2,
            block_hash_list: vec![BlockHash::Tombstone],
        };
        assert_eq!(store.update_file(correct).await, Ok(2));
    }

    #[tokio::test]
    async fn rejects_reserved_index_filename() {
        let store = store();
        let meta = FileMetaData {
            filename: filemeta::DEFAULT_META_FILENAME.to_string(),
            version: 1,
            block_hash_list: vec![BlockHash::Empty],
        };
        assert!(store.update_file(meta).await.is_err());
    }

    #[tokio::test]
    async fn block_store_map_groups_by_ring_placement() {
        let store = store();
        let hashes = vec!["h1".to_string(), "h2".to_string(), "h3".to_string()];
        let map = store.block_store_map(&hashes);
        let total: usize = map.values().map(|v| v.len()).sum();
        assert_eq!(total, hashes.len());
        for addr in map.keys() {
            assert!(store.block_store_addrs().contains(addr));
        }
    }
}
