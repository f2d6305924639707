//! HTTP client the sync engine uses to talk to a MetaStore and the
//! BlockStore fleet (§4.4). Plain JSON-over-HTTP, no auth: the servers
//! this talks to are assumed to live on a trusted network.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client as HttpClient, ClientBuilder, Response, StatusCode};

use crate::block::{Block, BlockHash};
use crate::blockstore::{BlockWire, HashesWire};
use crate::filemeta::{self, FileInfoMap, FileInfoMapWire, FileMetaData, FileMetaDataWire};
use crate::metastore::{BlockStoreAddrsResponse, BlockStoreMapRequest, BlockStoreMapResponse};

#[derive(Clone)]
pub struct RpcClient {
    http: HttpClient,
}

impl RpcClient {
    pub fn new() -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(1))
            .connect_timeout(Duration::from_secs(1))
            .user_agent("surfstore-rs/0.1")
            .no_proxy()
            .build()?;
        Ok(RpcClient { http })
    }

    // --- MetaStore surface -------------------------------------------------

    pub async fn get_file_info_map(&self, metastore_addr: &str) -> Result<FileInfoMap> {
        let url = format!("http://{metastore_addr}/files");
        let resp = self.http.get(url).send().await?;
        let wire: FileInfoMapWire = map_error(resp, "get file info map").await?;
        Ok(filemeta::map_from_wire(wire))
    }

    /// Pushes a single file record. `Ok(new_version)` on admission,
    /// `Err(stored_version)` if the server rejected it for a version
    /// mismatch (§4.4); any other transport/HTTP failure propagates as an
    /// error.
    pub async fn update_file(&self, metastore_addr: &str, meta: &FileMetaData) -> Result<i64> {
        let url = format!("http://{metastore_addr}/files/update");
        let wire: FileMetaDataWire = meta.into();
        let resp = self.http.post(url).json(&wire).send().await?;
        let status = resp.status();
        if status == StatusCode::CONFLICT {
            anyhow::bail!(VersionRejected);
        }
        #[derive(serde::Deserialize)]
        struct Success {
            version: i64,
        }
        let body: Success = map_error(resp, "update file").await?;
        Ok(body.version)
    }

    pub async fn get_block_store_map(
        &self,
        metastore_addr: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let url = format!("http://{metastore_addr}/block-store-map");
        let resp = self
            .http
            .post(url)
            .json(&BlockStoreMapRequest {
                hashes: hashes.to_vec(),
            })
            .send()
            .await?;
        let body: BlockStoreMapResponse = map_error(resp, "get block store map").await?;
        Ok(body.block_store_map)
    }

    pub async fn get_block_store_addrs(&self, metastore_addr: &str) -> Result<Vec<String>> {
        let url = format!("http://{metastore_addr}/block-store-addrs");
        let resp = self.http.get(url).send().await?;
        let body: BlockStoreAddrsResponse = map_error(resp, "get block store addrs").await?;
        Ok(body.block_store_addrs)
    }

    // --- BlockStore surface -------------------------------------------------

    pub async fn get_block(&self, block_store_addr: &str, hash: &BlockHash) -> Result<Block> {
        let url = format!("http://{block_store_addr}/blocks/{}", hash.as_wire_str());
        let resp = self.http.get(url).send().await?;
        let wire: BlockWire = map_error(resp, "get block").await?;
        wire.try_into()
    }

    pub async fn put_block(&self, block_store_addr: &str, block: &Block) -> Result<()> {
        let url = format!("http://{block_store_addr}/blocks");
        let wire = BlockWire {
            data: block.data.as_ref().map(|d| BASE64.encode(d)),
            size: block.size,
        };
        let resp = self.http.put(url).json(&wire).send().await?;
        map_status(resp, "put block").await
    }

    pub async fn missing_blocks(
        &self,
        block_store_addr: &str,
        hashes: &[String],
    ) -> Result<Vec<String>> {
        let url = format!("http://{block_store_addr}/blocks/missing");
        let resp = self
            .http
            .post(url)
            .json(&HashesWire {
                hashes: hashes.to_vec(),
            })
            .send()
            .await?;
        let body: HashesWire = map_error(resp, "missing blocks").await?;
        Ok(body.hashes)
    }

    pub async fn get_block_hashes(&self, block_store_addr: &str) -> Result<Vec<String>> {
        let url = format!("http://{block_store_addr}/blocks");
        let resp = self.http.get(url).send().await?;
        let body: HashesWire = map_error(resp, "get block hashes").await?;
        Ok(body.hashes)
    }
}

#[derive(Debug)]
pub struct VersionRejected;

impl std::fmt::Display for VersionRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server rejected update: version mismatch")
    }
}

impl std::error::Error for VersionRejected {}

/// True iff `err` wraps a [`VersionRejected`], i.e. the update failed
/// because the caller's version was stale or ahead (§4.4).
pub fn is_version_rejected(err: &anyhow::Error) -> bool {
    err.downcast_ref::<VersionRejected>().is_some()
}

async fn map_error<T: for<'de> serde::Deserialize<'de>>(resp: Response, op: &str) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.context(format!("{op}: decoding response"));
    }
    let text = resp.text().await.unwrap_or_default();
    anyhow::bail!("{op} failed: {status} {text}")
}

async fn map_status(resp: Response, op: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let text = resp.text().await.unwrap_or_default();
    anyhow::bail!("{op} failed: {status} {text}")
}
