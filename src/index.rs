use crate::block::{Block, BlockHash, ContentHash, FileHash};
use crate::error::{FilechainError, Result};
use std::collections::HashMap;

/// Blocks sharing one content hash: the same chunk at the same position of one file.
#[derive(Debug, Clone)]
struct Bucket {
    blocks: Vec<BlockHash>,
}

/// Everything the index knows about one file.
#[derive(Debug, Clone)]
struct FileEntry {
    index_all: u32,
    buckets: HashMap<ContentHash, Bucket>,
    /// chunk index → the content hash recorded for it
    positions: HashMap<u32, ContentHash>,
}

/// Derived lookup from a file hash to the blocks that rebuild it.
///
/// The chain store is authoritative; this index is rebuilt incrementally as blocks
/// are appended. A file's chunk count and each chunk's content are fixed by the
/// first block recorded for that position.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    files: HashMap<FileHash, FileEntry>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a block that contradicts the split already recorded for its file.
    pub fn check(&self, block: &Block) -> Result<()> {
        let Some(entry) = self.files.get(&block.file_hash) else {
            return Ok(());
        };
        if entry.index_all != block.index_all {
            return Err(FilechainError::InconsistentFile(format!(
                "file {} has {} chunks, block {} claims {}",
                block.file_hash, entry.index_all, block.block_hash, block.index_all
            )));
        }
        match entry.positions.get(&block.index) {
            Some(content) if *content != block.content_hash => {
                Err(FilechainError::InconsistentFile(format!(
                    "chunk {} of file {} already has different content",
                    block.index, block.file_hash
                )))
            }
            _ => Ok(()),
        }
    }

    /// Append a block's hash under its `(file_hash, content_hash)` key.
    pub fn record(&mut self, block: &Block) {
        let entry = self
            .files
            .entry(block.file_hash.clone())
            .or_insert_with(|| FileEntry {
                index_all: block.index_all,
                buckets: HashMap::new(),
                positions: HashMap::new(),
            });
        entry
            .buckets
            .entry(block.content_hash.clone())
            .or_insert_with(|| Bucket { blocks: Vec::new() })
            .blocks
            .push(block.block_hash.clone());
        entry
            .positions
            .entry(block.index)
            .or_insert_with(|| block.content_hash.clone());
    }

    /// True once every chunk of the file has at least one block.
    pub fn is_complete(&self, file_hash: &str) -> bool {
        self.files
            .get(file_hash)
            .map(|e| e.positions.len() == e.index_all as usize)
            .unwrap_or(false)
    }

    /// True if any block of the file is known.
    pub fn knows(&self, file_hash: &str) -> bool {
        self.files.contains_key(file_hash)
    }

    /// All block hashes recorded for one chunk content, oldest first.
    pub fn bucket(&self, file_hash: &str, content_hash: &str) -> &[BlockHash] {
        self.files
            .get(file_hash)
            .and_then(|e| e.buckets.get(content_hash))
            .map(|b| b.blocks.as_slice())
            .unwrap_or(&[])
    }

    /// One block hash per chunk index, in index order.
    pub fn resolve(&self, file_hash: &str) -> Result<Vec<BlockHash>> {
        let entry = self
            .files
            .get(file_hash)
            .ok_or_else(|| FilechainError::FileNotFound(file_hash.into()))?;

        let present = entry.positions.len();
        if present != entry.index_all as usize {
            return Err(FilechainError::IncompleteFile {
                file_hash: file_hash.into(),
                present,
                total: entry.index_all,
            });
        }

        (0..entry.index_all)
            .map(|index| {
                entry
                    .positions
                    .get(&index)
                    .and_then(|content| entry.buckets.get(content))
                    .and_then(|bucket| bucket.blocks.first())
                    .cloned()
                    .ok_or_else(|| FilechainError::IncompleteFile {
                        file_hash: file_hash.into(),
                        present,
                        total: entry.index_all,
                    })
            })
            .collect()
    }

    /// Number of distinct files with at least one block.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}
