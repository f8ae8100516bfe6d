//! Command tokens and payload types of the request/response protocol.
//!
//! Every connection carries exactly one command:
//!
//! 1. the initiator sends the command token,
//! 2. the receiver answers [`ACK`] (or closes on an unknown token),
//! 3. both sides exchange the command's payload frames,
//! 4. the connection is closed.

use crate::block::{BlockHash, FileHash};
use crate::peers::PeerAddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Acknowledgement sent after a recognised command token.
pub const ACK: &str = "OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    InsertFile,
    ContainsFile,
    GetFile,
    NewBlocksAvailable,
    GetBlock,
    RegisterServer,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::InsertFile,
        Command::ContainsFile,
        Command::GetFile,
        Command::NewBlocksAvailable,
        Command::GetBlock,
        Command::RegisterServer,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Command::InsertFile => "INSERT_FILE",
            Command::ContainsFile => "CONTAINS_FILE",
            Command::GetFile => "GET_FILE",
            Command::NewBlocksAvailable => "NEW_BLOCKS_AVAILABLE",
            Command::GetBlock => "GET_BLOCK",
            Command::RegisterServer => "REGISTER_SERVER",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// INSERT_FILE header; followed by `index_all` raw chunk frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsertFileHeader {
    pub file_hash: FileHash,
    pub index_all: u32,
}

/// INSERT_FILE result: the new block hashes in chunk order, or the rejection reason.
pub type InsertFileReply = Result<Vec<BlockHash>, String>;

/// NEW_BLOCKS_AVAILABLE payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    /// Where the receiver should fetch the blocks from.
    pub sender: PeerAddr,
    /// Shared by every hop of one propagation so log lines can be correlated.
    /// Nodes do not deduplicate on it; `hops_left` and the known-hash filter stop re-gossip.
    pub wave: Uuid,
    /// Remaining re-gossip budget; 0 means the receiver must not forward.
    pub hops_left: u8,
    /// Newly accepted hashes in chain order.
    pub block_hashes: Vec<BlockHash>,
}

/// REGISTER_SERVER reply header; followed by a counted sequence of blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterReply {
    pub peers: Vec<PeerAddr>,
}
