use crate::block::{Block, BlockHash, GENESIS_HASH};
use std::collections::HashMap;

/// Append-only, in-memory log of every accepted block.
///
/// Blocks are kept in insertion order with a hash index on top.
/// Duplicate writes are no-ops.
#[derive(Debug, Default, Clone)]
pub struct ChainStore {
    blocks: HashMap<BlockHash, Block>,
    order: Vec<BlockHash>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block. Returns `false` if a block with the same hash is already stored.
    pub fn put(&mut self, block: Block) -> bool {
        if self.blocks.contains_key(&block.block_hash) {
            return false;
        }
        self.order.push(block.block_hash.clone());
        self.blocks.insert(block.block_hash.clone(), block);
        true
    }

    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Hash of the most recently appended block, or the genesis sentinel.
    pub fn tail(&self) -> &str {
        self.order.last().map(String::as_str).unwrap_or(GENESIS_HASH)
    }

    /// Blocks from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.order.iter().filter_map(|h| self.blocks.get(h))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
