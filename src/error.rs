use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilechainError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Decompression error: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("Chain integrity violated: {0}")]
    ChainIntegrity(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Inconsistent file split: {0}")]
    InconsistentFile(String),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File {file_hash} is incomplete: {present} of {total} chunks")]
    IncompleteFile {
        file_hash: String,
        present: usize,
        total: u32,
    },

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Timed out during {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FilechainError {
    /// Whether the error came from the network rather than from local state.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FilechainError::Io(_)
                | FilechainError::PeerUnreachable { .. }
                | FilechainError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FilechainError>;
