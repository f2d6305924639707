//! Phase 1 of a sync pass: scan the base directory into a candidate
//! file-metadata map plus the block bytes behind each hash (§ Phase 1).

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use crate::block::{hash_bytes, BlockHash};
use crate::filemeta::is_valid_filename;

/// filename -> ordered block hash list, as observed on disk right now.
pub type LocalDirectory = HashMap<String, Vec<BlockHash>>;

/// hash -> block bytes, populated for every real (non-sentinel) block read
/// during this scan.
pub type BlockBuffer = HashMap<String, Vec<u8>>;

/// Enumerates the direct entries of `base_dir` (no recursion — file names
/// may not contain `/`, so there is never a meaningful subdirectory
/// entry to sync), skipping directories, symlinks, and the reserved
/// index file name. Each regular file is read in `block_size`-byte
/// chunks and every block is hashed and buffered.
pub fn scan(base_dir: &Path, block_size: usize) -> Result<(LocalDirectory, BlockBuffer)> {
    let mut local_dir = LocalDirectory::new();
    let mut buffer = BlockBuffer::new();

    if !base_dir.exists() {
        return Ok((local_dir, buffer));
    }

    for entry in fs::read_dir(base_dir).with_context(|| format!("read dir {}", base_dir.display()))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }

        let filename = entry.file_name().to_string_lossy().to_string();
        if !is_valid_filename(&filename) {
            continue;
        }

        let path = entry.path();
        let hash_list = chunk_and_hash(&path, block_size, &mut buffer)
            .with_context(|| format!("reading {}", path.display()))?;
        local_dir.insert(filename, hash_list);
    }

    Ok((local_dir, buffer))
}

fn chunk_and_hash(path: &Path, block_size: usize, buffer: &mut BlockBuffer) -> Result<Vec<BlockHash>> {
    let mut file = fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(vec![BlockHash::Empty]);
    }

    let mut hash_list = Vec::new();
    let mut chunk = vec![0u8; block_size];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let block = &chunk[..n];
        let hash = hash_bytes(block);
        buffer.insert(hash.clone(), block.to_vec());
        hash_list.push(BlockHash::Content(hash));
    }
    Ok(hash_list)
}
