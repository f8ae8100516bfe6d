//! Files stored as hash-linked blocks on a single global chain, replicated
//! across peer nodes by gossip.

pub mod block;
pub mod chain;
pub mod client;
pub mod compression;
pub mod config;
pub mod error;
pub mod index;
pub mod peers;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod wire;

pub use block::{Block, BlockHash, ContentHash, FileHash, CHUNK_SIZE, GENESIS_HASH};
pub use chain::{Blockchain, Inserted};
pub use client::FilechainClient;
pub use config::{ClientConfig, NetConfig, NodeConfig};
pub use error::{FilechainError, Result};
pub use peers::{PeerAddr, PeerDirectory};
pub use server::{Node, Server};
