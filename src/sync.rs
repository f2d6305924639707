//! The Sync Engine: one client-side reconciliation pass between a scanned
//! base directory, the persisted local index, and the MetaStore's view
//! (§ Phases 1-8).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::block::{Block, BlockHash};
use crate::filemeta::{is_valid_filename, FileInfoMap, FileMetaData};
use crate::local_index::LocalIndex;
use crate::local_scanner::{self, BlockBuffer};
use crate::rpc_client::{self, RpcClient};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub metastore_addr: String,
    pub base_dir: PathBuf,
    pub block_size: usize,
}

/// Runs exactly one full reconciliation pass and returns.
pub async fn run_sync(cfg: &SyncConfig) -> Result<()> {
    fs::create_dir_all(&cfg.base_dir)
        .with_context(|| format!("create base dir {}", cfg.base_dir.display()))?;

    let (local_dir, buffer) = local_scanner::scan(&cfg.base_dir, cfg.block_size)
        .context("scanning base directory")?;

    let index = LocalIndex::open(&cfg.base_dir).context("opening local index")?;
    let local_index = index.load().context("loading local index")?;

    let updated_local = derive_updated_local_index(&local_dir, &local_index);

    let rpc = RpcClient::new()?;
    let remote_index = rpc
        .get_file_info_map(&cfg.metastore_addr)
        .await
        .context("fetching remote file info map")?;

    let final_map = reconcile(&cfg.metastore_addr, &cfg.base_dir, &rpc, updated_local, remote_index, &buffer)
        .await?;

    index.persist(&final_map).context("persisting local index")?;
    Ok(())
}

/// Phase 3: compare the freshly-scanned directory against the last
/// persisted index, emitting new/changed/unchanged/tombstoned records.
fn derive_updated_local_index(
    local_dir: &local_scanner::LocalDirectory,
    local_index: &FileInfoMap,
) -> FileInfoMap {
    let mut updated = FileInfoMap::new();

    for (filename, hash_list) in local_dir {
        match local_index.get(filename) {
            None => {
                updated.insert(
                    filename.clone(),
                    FileMetaData {
                        filename: filename.clone(),
                        version: 1,
                        block_hash_list: hash_list.clone(),
                    },
                );
            }
            Some(prev) => {
                if &prev.block_hash_list == hash_list {
                    updated.insert(filename.clone(), prev.clone());
                } else {
                    updated.insert(
                        filename.clone(),
                        FileMetaData {
                            filename: filename.clone(),
                            version: prev.version + 1,
                            block_hash_list: hash_list.clone(),
                        },
                    );
                }
            }
        }
    }

    for (filename, prev) in local_index {
        if local_dir.contains_key(filename) {
            continue;
        }
        if prev.is_tombstone() {
            updated.insert(filename.clone(), prev.clone());
        } else {
            updated.insert(filename.clone(), FileMetaData::tombstone(filename.clone(), prev.version + 1));
        }
    }

    updated
}

/// Phase 5: reconcile the updated local index against the remote index,
/// pushing or pulling as needed, and return the final per-file map to
/// persist (§ Phase 5, §9.3 for the version-ahead redesign).
async fn reconcile(
    metastore_addr: &str,
    base_dir: &Path,
    rpc: &RpcClient,
    updated_local: FileInfoMap,
    mut remote_index: FileInfoMap,
    buffer: &BlockBuffer,
) -> Result<FileInfoMap> {
    let mut final_map = FileInfoMap::new();

    for local_meta in updated_local.values() {
        resolve_against_remote(
            metastore_addr,
            base_dir,
            rpc,
            local_meta,
            &mut remote_index,
            buffer,
            &mut final_map,
        )
        .await?;
    }

    for (filename, remote_meta) in &remote_index {
        if updated_local.contains_key(filename) {
            continue;
        }
        if remote_meta.is_tombstone() {
            final_map.insert(filename.clone(), remote_meta.clone());
            continue;
        }
        let path = base_dir.join(filename);
        download_file(rpc, metastore_addr, &path, remote_meta).await?;
        final_map.insert(filename.clone(), remote_meta.clone());
    }

    Ok(final_map)
}

/// Re-reads a single filename's record from the remote index, used when a
/// push loses a race (§9.3).
async fn refetch(
    rpc: &RpcClient,
    metastore_addr: &str,
    remote_index: &mut FileInfoMap,
    filename: &str,
) -> Result<Option<FileMetaData>> {
    let fresh = rpc
        .get_file_info_map(metastore_addr)
        .await
        .context("refreshing remote file info map after a rejected update")?;
    let meta = fresh.get(filename).cloned();
    *remote_index = fresh;
    Ok(meta)
}

/// Resolves one file against the remote index, implementing the
/// version-comparison table in Phase 5. Looks the record up from
/// `remote_index` itself (rather than a snapshot passed in by the caller)
/// so that a rejected push can refetch and re-resolve against the record
/// that actually beat it, instead of falling through to the stale
/// pre-push snapshot (§9.3).
async fn resolve_against_remote(
    metastore_addr: &str,
    base_dir: &Path,
    rpc: &RpcClient,
    local_meta: &FileMetaData,
    remote_index: &mut FileInfoMap,
    buffer: &BlockBuffer,
    final_map: &mut FileInfoMap,
) -> Result<()> {
    let filename = &local_meta.filename;
    let Some(remote_meta) = remote_index.get(filename).cloned() else {
        match push(metastore_addr, rpc, local_meta, buffer).await? {
            Some(pushed) => {
                final_map.insert(filename.clone(), pushed);
            }
            None => {
                // Someone else created this file first; refetch and fall
                // through to the remote-wins handling against the record
                // that actually won.
                pull_after_refetch(metastore_addr, base_dir, rpc, local_meta, remote_index, buffer, final_map)
                    .await?;
            }
        }
        return Ok(());
    };

    if local_meta.version < remote_meta.version {
        pull(rpc, metastore_addr, base_dir, &remote_meta).await?;
        final_map.insert(filename.clone(), remote_meta);
    } else if local_meta.version == remote_meta.version {
        if local_meta.block_hash_list == remote_meta.block_hash_list {
            final_map.insert(filename.clone(), local_meta.clone());
        } else {
            pull(rpc, metastore_addr, base_dir, &remote_meta).await?;
            final_map.insert(filename.clone(), remote_meta);
        }
    } else if local_meta.version == remote_meta.version + 1 {
        match push(metastore_addr, rpc, local_meta, buffer).await? {
            Some(pushed) => {
                final_map.insert(filename.clone(), pushed);
            }
            None => {
                // The snapshot this resolution started from is stale:
                // another client's update was admitted between our last
                // fetch and this push. Refetch before falling through to
                // remote-wins, rather than overwriting the local file
                // with the record we already knew was behind.
                pull_after_refetch(metastore_addr, base_dir, rpc, local_meta, remote_index, buffer, final_map)
                    .await?;
            }
        }
    } else {
        crate::logging::error(format!(
            "skipping {}: local version {} is not comparable to remote version {}",
            filename, local_meta.version, remote_meta.version
        ));
    }
    Ok(())
}

/// Refetches the remote index after a rejected push and resolves against
/// whatever now-current record comes back: pulls it if one exists, or
/// retries the push as brand new if the file has since vanished from the
/// remote index entirely (§9.3).
async fn pull_after_refetch(
    metastore_addr: &str,
    base_dir: &Path,
    rpc: &RpcClient,
    local_meta: &FileMetaData,
    remote_index: &mut FileInfoMap,
    buffer: &BlockBuffer,
    final_map: &mut FileInfoMap,
) -> Result<()> {
    let filename = &local_meta.filename;
    match refetch(rpc, metastore_addr, remote_index, filename).await? {
        Some(fresh) => {
            pull(rpc, metastore_addr, base_dir, &fresh).await?;
            final_map.insert(filename.clone(), fresh);
        }
        None => {
            if let Some(pushed) = push(metastore_addr, rpc, local_meta, buffer).await? {
                final_map.insert(filename.clone(), pushed);
            }
        }
    }
    Ok(())
}

/// Attempts to admit `local_meta` at the MetaStore and, on success, upload
/// every non-sentinel block it references (Phase 6). `Ok(None)` means the
/// server rejected the update for a version mismatch; any other failure
/// propagates.
async fn push(
    metastore_addr: &str,
    rpc: &RpcClient,
    local_meta: &FileMetaData,
    buffer: &BlockBuffer,
) -> Result<Option<FileMetaData>> {
    if !is_valid_filename(&local_meta.filename) {
        return Ok(None);
    }
    match rpc.update_file(metastore_addr, local_meta).await {
        Ok(_) => {
            upload_blocks(metastore_addr, rpc, local_meta, buffer).await?;
            Ok(Some(local_meta.clone()))
        }
        Err(e) if rpc_client::is_version_rejected(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Phase 6: place each non-sentinel block via the ring and PUT it to the
/// responsible BlockStore.
async fn upload_blocks(
    metastore_addr: &str,
    rpc: &RpcClient,
    meta: &FileMetaData,
    buffer: &BlockBuffer,
) -> Result<()> {
    let hashes: Vec<String> = meta
        .block_hash_list
        .iter()
        .filter(|h| !h.is_sentinel())
        .map(|h| h.as_wire_str().to_string())
        .collect();
    if hashes.is_empty() {
        return Ok(());
    }

    let block_map = rpc.get_block_store_map(metastore_addr, &hashes).await?;
    for (addr, owned_hashes) in block_map {
        for hash in owned_hashes {
            let Some(data) = buffer.get(&hash) else {
                continue;
            };
            rpc.put_block(&addr, &Block::from_content(data.clone())).await?;
        }
    }
    Ok(())
}

/// Remote wins: overwrite (or delete) the local file to match `remote_meta`.
async fn pull(rpc: &RpcClient, metastore_addr: &str, base_dir: &Path, remote_meta: &FileMetaData) -> Result<()> {
    let path = base_dir.join(&remote_meta.filename);
    if remote_meta.is_tombstone() {
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))?;
        }
        return Ok(());
    }
    download_file(rpc, metastore_addr, &path, remote_meta).await
}

/// Phase 7: fetch every block in `remote_meta`'s hash list from its
/// responsible BlockStore and write them out in order.
async fn download_file(
    rpc: &RpcClient,
    metastore_addr: &str,
    path: &Path,
    remote_meta: &FileMetaData,
) -> Result<()> {
    if remote_meta.is_empty_file() {
        fs::write(path, []).with_context(|| format!("writing {}", path.display()))?;
        return Ok(());
    }

    let hashes: Vec<String> = remote_meta
        .block_hash_list
        .iter()
        .map(|h| h.as_wire_str().to_string())
        .collect();
    let block_map = rpc.get_block_store_map(metastore_addr, &hashes).await?;

    let mut owner_of: HashMap<String, String> = HashMap::new();
    for (addr, owned_hashes) in &block_map {
        for hash in owned_hashes {
            owner_of.insert(hash.clone(), addr.clone());
        }
    }

    let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    for hash in &remote_meta.block_hash_list {
        let wire = hash.as_wire_str();
        let Some(addr) = owner_of.get(wire) else {
            anyhow::bail!("no block store owns block {wire} for {}", path.display());
        };
        let block = rpc.get_block(addr, hash).await?;
        file.write_all(&block.data.unwrap_or_default())
            .with_context(|| format!("writing block into {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::hash_bytes;

    fn meta(filename: &str, version: i64, hashes: &[&str]) -> FileMetaData {
        FileMetaData {
            filename: filename.to_string(),
            version,
            block_hash_list: hashes.iter().map(|h| BlockHash::from(*h)).collect(),
        }
    }

    #[test]
    fn derive_marks_new_files_as_version_one() {
        let mut local_dir = local_scanner::LocalDirectory::new();
        local_dir.insert("a.txt".into(), vec![BlockHash::Content(hash_bytes(b"hi"))]);
        let updated = derive_updated_local_index(&local_dir, &FileInfoMap::new());
        assert_eq!(updated["a.txt"].version, 1);
    }

    #[test]
    fn derive_keeps_unchanged_files_at_same_version() {
        let hash = hash_bytes(b"hi");
        let mut local_dir = local_scanner::LocalDirectory::new();
        local_dir.insert("a.txt".into(), vec![BlockHash::Content(hash.clone())]);
        let mut index = FileInfoMap::new();
        index.insert("a.txt".into(), meta("a.txt", 4, &[&hash]));
        let updated = derive_updated_local_index(&local_dir, &index);
        assert_eq!(updated["a.txt"].version, 4);
    }

    #[test]
    fn derive_bumps_version_on_content_change() {
        let mut local_dir = local_scanner::LocalDirectory::new();
        local_dir.insert("a.txt".into(), vec![BlockHash::Content(hash_bytes(b"new"))]);
        let mut index = FileInfoMap::new();
        index.insert("a.txt".into(), meta("a.txt", 2, &[&hash_bytes(b"old")]));
        let updated = derive_updated_local_index(&local_dir, &index);
        assert_eq!(updated["a.txt"].version, 3);
    }

    #[test]
    fn derive_tombstones_locally_deleted_files() {
        let local_dir = local_scanner::LocalDirectory::new();
        let mut index = FileInfoMap::new();
        index.insert("a.txt".into(), meta("a.txt", 2, &[&hash_bytes(b"x")]));
        let updated = derive_updated_local_index(&local_dir, &index);
        assert!(updated["a.txt"].is_tombstone());
        assert_eq!(updated["a.txt"].version, 3);
    }

    #[test]
    fn derive_leaves_existing_tombstones_untouched() {
        let local_dir = local_scanner::LocalDirectory::new();
        let mut index = FileInfoMap::new();
        index.insert("a.txt".into(), FileMetaData::tombstone("a.txt".into(), 5));
        let updated = derive_updated_local_index(&local_dir, &index);
        assert_eq!(updated["a.txt"].version, 5);
    }
}
