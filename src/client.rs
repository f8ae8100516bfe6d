use crate::block::{chunk_content, compute_hash, Block, BlockHash, FileHash};
use crate::config::ClientConfig;
use crate::error::{FilechainError, Result};
use crate::peers::PeerAddr;
use crate::protocol::{Command, InsertFileHeader, InsertFileReply};
use crate::wire::Session;
use log::debug;
use std::path::Path;

/// Talks to one filechain node on behalf of a user.
pub struct FilechainClient {
    server: PeerAddr,
    config: ClientConfig,
}

impl FilechainClient {
    pub fn new(server: PeerAddr, config: ClientConfig) -> Self {
        Self { server, config }
    }

    async fn open(&self, command: Command) -> Result<Session> {
        Session::open(&self.server, command, &self.config.net).await
    }

    /// Upload pre-chunked content. Returns the new block hashes in chunk order.
    pub async fn insert(&self, file_hash: &str, chunks: &[Vec<u8>]) -> Result<Vec<BlockHash>> {
        let index_all = u32::try_from(chunks.len())
            .map_err(|_| FilechainError::InvalidBlock("too many chunks".into()))?;
        let mut session = self.open(Command::InsertFile).await?;
        session
            .send(&InsertFileHeader {
                file_hash: file_hash.into(),
                index_all,
            })
            .await?;
        for chunk in chunks {
            session.send_bytes(chunk).await?;
        }
        let reply: InsertFileReply = session.recv().await?;
        session.close().await;
        reply.map_err(FilechainError::InvalidBlock)
    }

    /// Chunk a local file and upload it. Returns its file hash.
    pub async fn send_file(&self, path: &Path) -> Result<FileHash> {
        let content = tokio::fs::read(path).await?;
        let (file_hash, chunks) = chunk_content(&content, self.config.chunk_size);
        let blocks = self.insert(&file_hash, &chunks).await?;
        debug!("{} stored as {} block(s)", path.display(), blocks.len());
        Ok(file_hash)
    }

    /// CONTAINS_FILE for a known hash.
    pub async fn contains(&self, file_hash: &str) -> Result<bool> {
        let mut session = self.open(Command::ContainsFile).await?;
        session.send(&file_hash).await?;
        let found: bool = session.recv().await?;
        session.close().await;
        Ok(found)
    }

    /// Hash a local file and ask whether the network holds it.
    pub async fn check_file(&self, path: &Path) -> Result<(FileHash, bool)> {
        let content = tokio::fs::read(path).await?;
        let file_hash = compute_hash(&content);
        let found = self.contains(&file_hash).await?;
        Ok((file_hash, found))
    }

    /// GET_FILE: the file's blocks in chunk order.
    pub async fn get_blocks(&self, file_hash: &str) -> Result<Vec<Block>> {
        let mut session = self.open(Command::GetFile).await?;
        session.send(&file_hash).await?;
        let found: bool = session.recv().await?;
        if !found {
            session.close().await;
            return Err(FilechainError::FileNotFound(file_hash.into()));
        }
        let blocks: Vec<Block> = session.recv_seq(u32::MAX as u64).await?;
        session.close().await;
        Ok(blocks)
    }

    /// GET_BLOCK for a single hash.
    pub async fn get_block(&self, block_hash: &str) -> Result<Block> {
        let mut session = self.open(Command::GetBlock).await?;
        session.send(&block_hash).await?;
        let block: Option<Block> = session.recv().await?;
        session.close().await;
        block.ok_or_else(|| FilechainError::BlockNotFound(block_hash.into()))
    }

    /// Download a file, verify it against its hash and write it to a new path.
    pub async fn get_file(&self, file_hash: &str, path: &Path) -> Result<usize> {
        if tokio::fs::try_exists(path).await? {
            return Err(FilechainError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let content = assemble(file_hash, self.get_blocks(file_hash).await?)?;
        tokio::fs::write(path, &content).await?;
        Ok(content.len())
    }
}

/// Concatenate blocks after checking each one and the whole content.
pub fn assemble(file_hash: &str, blocks: Vec<Block>) -> Result<Vec<u8>> {
    for (i, block) in blocks.iter().enumerate() {
        if !block.verify() || block.file_hash != file_hash || block.index as usize != i {
            return Err(FilechainError::ChainIntegrity(format!(
                "block {} is not chunk {} of {}",
                block.block_hash, i, file_hash
            )));
        }
    }
    let content: Vec<u8> = blocks.into_iter().flat_map(|b| b.chunk).collect();
    let actual = compute_hash(&content);
    if actual != file_hash {
        return Err(FilechainError::ChainIntegrity(format!(
            "content hashes to {}, expected {}",
            actual, file_hash
        )));
    }
    Ok(content)
}
