use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 hash as hex string, used as the block's unique identifier.
pub type BlockHash = String;

/// SHA-256 hex digest of a whole file's content.
pub type FileHash = String;

/// SHA-256 hex digest of a chunk and its position, independent of chain placement.
pub type ContentHash = String;

/// Maximum number of bytes of file content carried by one block.
pub const CHUNK_SIZE: usize = 500;

/// Largest `index_all` a block may declare.
pub const MAX_FILE_CHUNKS: u32 = 1 << 20;

/// `previous_block_hash` of the first block in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One chunk of one file, linked to the block that was the chain tail when it was appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub file_hash: FileHash,
    pub index: u32,
    pub index_all: u32,
    pub chunk: Vec<u8>,
    pub content_hash: ContentHash,
    pub previous_block_hash: BlockHash,
    pub block_hash: BlockHash,
}

impl Block {
    /// Create a block appended after `previous_block_hash`; both hashes are computed.
    pub fn new(
        file_hash: FileHash,
        index_all: u32,
        index: u32,
        chunk: Vec<u8>,
        previous_block_hash: BlockHash,
    ) -> Self {
        let content_hash = compute_content_hash(&file_hash, index_all, &chunk, index);
        let block_hash =
            compute_block_hash(&file_hash, index_all, &chunk, index, &previous_block_hash);
        Self {
            file_hash,
            index,
            index_all,
            chunk,
            content_hash,
            previous_block_hash,
            block_hash,
        }
    }

    /// Verify that both stored hashes match the block's own fields.
    pub fn verify(&self) -> bool {
        self.content_hash
            == compute_content_hash(&self.file_hash, self.index_all, &self.chunk, self.index)
            && self.block_hash
                == compute_block_hash(
                    &self.file_hash,
                    self.index_all,
                    &self.chunk,
                    self.index,
                    &self.previous_block_hash,
                )
    }

    /// Check the position and size bounds every block must satisfy.
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.index_all == 0 {
            return Err(format!("block {} has index_all 0", self.block_hash));
        }
        if self.index_all > MAX_FILE_CHUNKS {
            return Err(format!(
                "block {} declares {} chunks, limit is {}",
                self.block_hash, self.index_all, MAX_FILE_CHUNKS
            ));
        }
        if self.index >= self.index_all {
            return Err(format!(
                "block {} has index {} outside 0..{}",
                self.block_hash, self.index, self.index_all
            ));
        }
        if self.chunk.len() > CHUNK_SIZE {
            return Err(format!(
                "block {} carries {} bytes, limit is {}",
                self.block_hash,
                self.chunk.len(),
                CHUNK_SIZE
            ));
        }
        Ok(())
    }
}

/// Compute the SHA-256 hex digest of some data.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Feed a variable-length field with its length in front, so field boundaries are unambiguous.
fn update_prefixed(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field);
}

fn content_hasher(file_hash: &str, index_all: u32, chunk: &[u8], index: u32) -> Sha256 {
    let mut hasher = Sha256::new();
    update_prefixed(&mut hasher, file_hash.as_bytes());
    hasher.update(index_all.to_be_bytes());
    update_prefixed(&mut hasher, chunk);
    hasher.update(index.to_be_bytes());
    hasher
}

pub fn compute_content_hash(
    file_hash: &str,
    index_all: u32,
    chunk: &[u8],
    index: u32,
) -> ContentHash {
    let hasher = content_hasher(file_hash, index_all, chunk, index);
    format!("{:x}", hasher.finalize())
}

pub fn compute_block_hash(
    file_hash: &str,
    index_all: u32,
    chunk: &[u8],
    index: u32,
    previous_block_hash: &str,
) -> BlockHash {
    let mut hasher = content_hasher(file_hash, index_all, chunk, index);
    update_prefixed(&mut hasher, previous_block_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split file content into `chunk_size` pieces and hash the whole content.
///
/// An empty file yields a single empty chunk so it still occupies one block.
pub fn chunk_content(content: &[u8], chunk_size: usize) -> (FileHash, Vec<Vec<u8>>) {
    let file_hash = compute_hash(content);
    let mut chunks: Vec<Vec<u8>> = content
        .chunks(chunk_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    (file_hash, chunks)
}
