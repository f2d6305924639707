//! Content-addressed blob store, keyed by the hash of the blob (§4.1).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::block::{Block, BlockHash};
use crate::error::SurfstoreError;

/// A single in-memory content-addressed map from hex hash to block bytes
/// (§4.1). Blocks are never deleted.
pub struct BlockStore {
    blocks: RwLock<HashMap<String, Block>>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore {
    pub fn new() -> Self {
        BlockStore {
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Computes the hash of `block`'s bytes and inserts under that key.
    /// Blocks whose data is absent are stored under the empty-file
    /// sentinel instead (§4.1). Idempotent, always succeeds.
    pub async fn put_block(&self, block: Block) -> BlockHash {
        let hash = block.content_hash();
        if let BlockHash::Content(key) = &hash {
            self.blocks.write().await.insert(key.clone(), block);
        }
        hash
    }

    /// Returns the stored block, or the appropriate sentinel block for
    /// `"-1"`/`"0"`. `NOT_FOUND` for an absent real hash (§4.1).
    pub async fn get_block(&self, hash: &BlockHash) -> Result<Block, SurfstoreError> {
        match hash {
            BlockHash::Empty => Ok(Block::empty_file_sentinel()),
            BlockHash::Tombstone => Ok(Block::tombstone_sentinel()),
            BlockHash::Content(key) => self
                .blocks
                .read()
                .await
                .get(key)
                .map(|b| Block::from_content(b.data.clone().unwrap_or_default()))
                .ok_or_else(|| SurfstoreError::NotFound {
                    what: format!("block {key}"),
                }),
        }
    }

    /// Returns the subset of `hashes_in` that are NOT present locally —
    /// the intended semantics per the operation's name (§4.1, §9.1). This
    /// deliberately does not reproduce the observed reversed behavior
    /// noted as an ambiguity in the source.
    pub async fn missing_blocks(&self, hashes_in: &[String]) -> Vec<String> {
        let blocks = self.blocks.read().await;
        hashes_in
            .iter()
            .filter(|h| !blocks.contains_key(h.as_str()))
            .cloned()
            .collect()
    }

    pub async fn block_hashes(&self) -> Vec<String> {
        self.blocks.read().await.keys().cloned().collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockWire {
    /// Base64-encoded bytes; absent (`null`) for the tombstone sentinel,
    /// present-but-empty for the empty-file sentinel.
    pub data: Option<String>,
    pub size: i32,
}

impl From<&Block> for BlockWire {
    fn from(block: &Block) -> Self {
        BlockWire {
            data: block.data.as_ref().map(|d| BASE64.encode(d)),
            size: block.size,
        }
    }
}

impl TryFrom<BlockWire> for Block {
    type Error = anyhow::Error;

    fn try_from(wire: BlockWire) -> Result<Self, Self::Error> {
        let data = match wire.data {
            Some(encoded) => Some(BASE64.decode(encoded)?),
            None => None,
        };
        Ok(Block {
            data,
            size: wire.size,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashesWire {
    pub hashes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PutBlockResponse {
    ok: bool,
    hash: String,
}

#[cfg(test)]
impl<'de> Deserialize<'de> for PutBlockResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            ok: bool,
            hash: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(PutBlockResponse {
            ok: raw.ok,
            hash: raw.hash,
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: Arc<BlockStore>) -> Router {
    Router::new()
        .route("/blocks", put(put_block).get(get_block_hashes))
        .route("/blocks/missing", post(missing_blocks))
        .route("/blocks/:hash", get(get_block))
        .with_state(state)
}

async fn put_block(
    State(store): State<Arc<BlockStore>>,
    Json(wire): Json<BlockWire>,
) -> Result<Json<PutBlockResponse>, (StatusCode, Json<ErrorResponse>)> {
    let block: Block = wire.try_into().map_err(|e: anyhow::Error| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;
    let hash = store.put_block(block).await;
    Ok(Json(PutBlockResponse {
        ok: true,
        hash: hash.as_wire_str().to_string(),
    }))
}

async fn get_block(
    State(store): State<Arc<BlockStore>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<BlockWire>, (StatusCode, Json<ErrorResponse>)> {
    let block_hash = BlockHash::from(hash);
    match store.get_block(&block_hash).await {
        Ok(block) => Ok(Json((&block).into())),
        Err(err) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )),
    }
}

async fn missing_blocks(
    State(store): State<Arc<BlockStore>>,
    Json(req): Json<HashesWire>,
) -> Json<HashesWire> {
    let hashes = store.missing_blocks(&req.hashes).await;
    Json(HashesWire { hashes })
}

async fn get_block_hashes(State(store): State<Arc<BlockStore>>) -> Json<HashesWire> {
    Json(HashesWire {
        hashes: store.block_hashes().await,
    })
}

/// Spawns the BlockStore HTTP server on `addr`, returning the actual bound
/// address.
pub async fn serve(addr: &str) -> anyhow::Result<std::net::SocketAddr> {
    let store = Arc::new(BlockStore::new());
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    crate::logging::info(format!("block store listening on {bound}"));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            crate::logging::error(format!("block store server error: {e}"));
        }
    });
    Ok(bound)
}
