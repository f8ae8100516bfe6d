use crate::block::{compute_hash, Block, BlockHash, GENESIS_HASH};
use crate::error::{FilechainError, Result};
use crate::index::FileIndex;
use crate::storage::ChainStore;

/// Outcome of accepting a block that was built elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// The block extended the tail and is now stored.
    New,
    /// A block with the same hash was already stored; nothing changed.
    AlreadyPresent,
}

/// A single global chain of file blocks plus the file index derived from it.
///
/// All mutation goes through `&mut self`, so callers sharing a `Blockchain`
/// serialise insertions behind one lock and tail reads never go stale.
#[derive(Debug, Default, Clone)]
pub struct Blockchain {
    store: ChainStore,
    files: FileIndex,
}

impl Blockchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a chain from blocks ordered oldest to newest, verifying every link.
    pub fn from_chain(blocks: impl IntoIterator<Item = Block>) -> Result<Self> {
        let mut chain = Self::new();
        for block in blocks {
            if chain.insert_verified(block)? == Inserted::AlreadyPresent {
                return Err(FilechainError::ChainIntegrity(
                    "bootstrap chain repeats a block".into(),
                ));
            }
        }
        Ok(chain)
    }

    // ── Insertion ─────────────────────────────────────────────

    /// Append a new chunk after the current tail.
    pub fn insert(
        &mut self,
        file_hash: &str,
        index_all: u32,
        index: u32,
        chunk: Vec<u8>,
    ) -> Result<Block> {
        let block = Block::new(
            file_hash.into(),
            index_all,
            index,
            chunk,
            self.tail_hash().into(),
        );
        block.validate_shape().map_err(FilechainError::InvalidBlock)?;
        self.files.check(&block)?;
        self.append(block.clone());
        Ok(block)
    }

    /// Append every chunk of a file, in order. Nothing is inserted if any chunk is rejected.
    pub fn insert_file(&mut self, file_hash: &str, chunks: Vec<Vec<u8>>) -> Result<Vec<Block>> {
        let index_all = u32::try_from(chunks.len())
            .map_err(|_| FilechainError::InvalidBlock("too many chunks".into()))?;
        if index_all == 0 {
            return Err(FilechainError::InvalidBlock(format!(
                "file {} has no chunks",
                file_hash
            )));
        }

        let declared = {
            let content: Vec<u8> = chunks.concat();
            compute_hash(&content)
        };
        if declared != file_hash {
            return Err(FilechainError::InvalidBlock(format!(
                "content hashes to {}, not {}",
                declared, file_hash
            )));
        }

        // Validate every chunk before appending any, so a rejected upload leaves no partial file.
        let mut previous = self.tail_hash().to_string();
        let mut planned = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let block = Block::new(file_hash.into(), index_all, i as u32, chunk, previous);
            block.validate_shape().map_err(FilechainError::InvalidBlock)?;
            self.files.check(&block)?;
            previous = block.block_hash.clone();
            planned.push(block);
        }

        for block in &planned {
            self.append(block.clone());
        }
        Ok(planned)
    }

    /// Accept a block received from a peer.
    ///
    /// The block must hash correctly and extend the current tail.
    pub fn insert_verified(&mut self, block: Block) -> Result<Inserted> {
        if self.store.contains(&block.block_hash) {
            return Ok(Inserted::AlreadyPresent);
        }
        Self::check_hashes(&block)?;
        if block.previous_block_hash != self.tail_hash() {
            return Err(FilechainError::ChainIntegrity(format!(
                "block {} links to {}, tail is {}",
                block.block_hash,
                block.previous_block_hash,
                self.tail_hash()
            )));
        }
        block
            .validate_shape()
            .map_err(FilechainError::ChainIntegrity)?;
        self.files.check(&block)?;
        self.append(block);
        Ok(Inserted::New)
    }

    fn append(&mut self, block: Block) {
        self.files.record(&block);
        self.store.put(block);
    }

    fn check_hashes(block: &Block) -> Result<()> {
        if !block.verify() {
            return Err(FilechainError::ChainIntegrity(format!(
                "block {} does not match its own hashes",
                block.block_hash
            )));
        }
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────

    /// True if every chunk of the file is in the chain.
    pub fn contains_file(&self, file_hash: &str) -> bool {
        self.files.is_complete(file_hash)
    }

    pub fn contains_block(&self, block_hash: &str) -> bool {
        self.store.contains(block_hash)
    }

    /// Blocks of one file in chunk order.
    pub fn get_blocks_for_file(&self, file_hash: &str) -> Result<Vec<Block>> {
        self.files
            .resolve(file_hash)?
            .iter()
            .map(|h| self.get_block(h))
            .collect()
    }

    /// Concatenated chunks of one file.
    pub fn reconstruct(&self, file_hash: &str) -> Result<Vec<u8>> {
        Ok(self
            .get_blocks_for_file(file_hash)?
            .into_iter()
            .flat_map(|b| b.chunk)
            .collect())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Block> {
        self.store
            .get(block_hash)
            .cloned()
            .ok_or_else(|| FilechainError::BlockNotFound(block_hash.into()))
    }

    /// All blocks with the same content and position as `block`.
    pub fn get_blocks_by_content(&self, block: &Block) -> Vec<Block> {
        self.files
            .bucket(&block.file_hash, &block.content_hash)
            .iter()
            .filter_map(|h| self.store.get(h).cloned())
            .collect()
    }

    /// Hash of the newest block, or the genesis sentinel for an empty chain.
    pub fn tail_hash(&self) -> &str {
        self.store.tail()
    }

    /// Every block, oldest first.
    pub fn chain(&self) -> Vec<Block> {
        self.store.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.files.file_count()
    }

    // ── Integrity ─────────────────────────────────────────────

    /// Walk the whole chain from genesis, recomputing every hash and link.
    pub fn verify_integrity(&self) -> Result<()> {
        let mut expected_previous: BlockHash = GENESIS_HASH.into();
        for block in self.store.iter() {
            Self::check_hashes(block)?;
            if block.previous_block_hash != expected_previous {
                return Err(FilechainError::ChainIntegrity(format!(
                    "block {} links to {}, expected {}",
                    block.block_hash, block.previous_block_hash, expected_previous
                )));
            }
            expected_previous = block.block_hash.clone();
        }
        Ok(())
    }
}
