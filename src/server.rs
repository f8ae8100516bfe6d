use crate::block::{Block, BlockHash, FileHash, CHUNK_SIZE, GENESIS_HASH};
use crate::chain::{Blockchain, Inserted};
use crate::config::NodeConfig;
use crate::error::{FilechainError, Result};
use crate::peers::{PeerAddr, PeerDirectory};
use crate::protocol::{
    Announcement, Command, InsertFileHeader, InsertFileReply, RegisterReply, ACK,
};
use crate::wire::Session;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

/// One participant in the network: a chain, an address book and the protocol handlers.
pub struct Node {
    config: NodeConfig,
    addr: PeerAddr,
    chain: RwLock<Blockchain>,
    peers: Mutex<PeerDirectory>,
}

impl Node {
    /// Create a node advertising `addr` to its peers.
    pub fn new(config: NodeConfig, addr: PeerAddr) -> Arc<Self> {
        let peers = PeerDirectory::new(
            addr.clone(),
            config.peer_failure_threshold,
            config.peer_cooldown(),
        );
        Arc::new(Self {
            config,
            addr,
            chain: RwLock::new(Blockchain::new()),
            peers: Mutex::new(peers),
        })
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    // ── Local API ─────────────────────────────────────────────

    pub async fn contains_file(&self, file_hash: &str) -> bool {
        self.chain.read().await.contains_file(file_hash)
    }

    pub async fn blocks_for_file(&self, file_hash: &str) -> Result<Vec<Block>> {
        self.chain.read().await.get_blocks_for_file(file_hash)
    }

    pub async fn get_block(&self, block_hash: &str) -> Result<Block> {
        self.chain.read().await.get_block(block_hash)
    }

    /// Every block, oldest first.
    pub async fn chain(&self) -> Vec<Block> {
        self.chain.read().await.chain()
    }

    pub async fn tail_hash(&self) -> BlockHash {
        self.chain.read().await.tail_hash().to_string()
    }

    pub async fn peers(&self) -> Vec<PeerAddr> {
        self.peers.lock().await.addresses()
    }

    pub async fn add_peer(&self, addr: PeerAddr) -> bool {
        self.peers.lock().await.add(addr)
    }

    /// Insert a whole file locally, then announce the new blocks to every peer.
    pub async fn insert_file(
        self: &Arc<Self>,
        file_hash: &str,
        chunks: Vec<Vec<u8>>,
    ) -> Result<Vec<Block>> {
        let blocks = self.chain.write().await.insert_file(file_hash, chunks)?;
        info!(
            "inserted file {} as {} block(s), tail {}",
            file_hash,
            blocks.len(),
            blocks.last().map(|b| b.block_hash.as_str()).unwrap_or(GENESIS_HASH)
        );

        let hashes = blocks.iter().map(|b| b.block_hash.clone()).collect();
        tokio::spawn(self.clone().broadcast(
            hashes,
            None,
            self.config.max_hops,
            Uuid::new_v4(),
        ));
        Ok(blocks)
    }

    // ── Registration ──────────────────────────────────────────

    /// Register with `target`, adopting its peers and its chain.
    pub async fn join(&self, target: &PeerAddr) -> Result<()> {
        info!("joining network via {}", target);
        let mut session = Session::open(target, Command::RegisterServer, &self.config.net).await?;
        session.send(&self.addr).await?;
        let reply: RegisterReply = session.recv().await?;
        let blocks: Vec<Block> = session.recv_seq(u64::MAX).await?;
        session.close().await;

        let adopted = self.adopt(blocks).await?;

        let mut peers = self.peers.lock().await;
        peers.add(target.clone());
        let learned = peers.extend(reply.peers);
        info!(
            "joined via {}: {} block(s) adopted, {} peer(s) learned",
            target, adopted, learned
        );
        Ok(())
    }

    async fn adopt(&self, blocks: Vec<Block>) -> Result<usize> {
        let mut chain = self.chain.write().await;
        if chain.is_empty() {
            let verified = Blockchain::from_chain(blocks)?;
            let count = verified.len();
            *chain = verified;
            return Ok(count);
        }
        let mut adopted = 0;
        for block in blocks {
            if chain.insert_verified(block)? == Inserted::New {
                adopted += 1;
            }
        }
        Ok(adopted)
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Serve one connection: token, acknowledgement, payload exchange, close.
    pub async fn handle_connection(self: Arc<Self>, mut session: Session) {
        let token = match session.recv_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("no command from {}: {}", session.peer(), e);
                session.close().await;
                return;
            }
        };
        let Some(command) = Command::from_token(&token) else {
            warn!("unsupported command '{}' from {}", token, session.peer());
            session.close().await;
            return;
        };
        debug!("{} from {}", command, session.peer());

        let result = match session.send_token(ACK).await {
            Ok(()) => self.dispatch(command, &mut session).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("{} from {} failed: {}", command, session.peer(), e);
        }
        session.close().await;
    }

    async fn dispatch(self: &Arc<Self>, command: Command, session: &mut Session) -> Result<()> {
        match command {
            Command::InsertFile => self.serve_insert_file(session).await,
            Command::ContainsFile => {
                let file_hash: FileHash = session.recv().await?;
                let found = self.contains_file(&file_hash).await;
                session.send(&found).await
            }
            Command::GetFile => {
                let file_hash: FileHash = session.recv().await?;
                match self.blocks_for_file(&file_hash).await {
                    Ok(blocks) => {
                        session.send(&true).await?;
                        session.send_seq(&blocks).await
                    }
                    Err(e) => {
                        debug!("GET_FILE {}: {}", file_hash, e);
                        session.send(&false).await
                    }
                }
            }
            Command::GetBlock => {
                let block_hash: BlockHash = session.recv().await?;
                let block = self.get_block(&block_hash).await.ok();
                session.send(&block).await
            }
            Command::NewBlocksAvailable => {
                let announcement: Announcement = session.recv().await?;
                if self.add_peer(announcement.sender.clone()).await {
                    info!("learned peer {} from gossip", announcement.sender);
                }
                // The sender is waiting on this connection; fetch over fresh ones.
                tokio::spawn(self.clone().absorb(announcement));
                Ok(())
            }
            Command::RegisterServer => {
                let joiner: PeerAddr = session.recv().await?;
                let peers = {
                    let mut directory = self.peers.lock().await;
                    let known = directory
                        .addresses()
                        .into_iter()
                        .filter(|a| *a != joiner)
                        .collect();
                    directory.add(joiner.clone());
                    known
                };
                let chain = self.chain().await;
                info!("registered {}; sending {} block(s)", joiner, chain.len());
                session.send(&RegisterReply { peers }).await?;
                session.send_seq(&chain).await
            }
        }
    }

    async fn serve_insert_file(self: &Arc<Self>, session: &mut Session) -> Result<()> {
        let header: InsertFileHeader = session.recv().await?;
        if header.index_all == 0 || header.index_all > self.config.max_file_chunks {
            let reason = format!(
                "index_all {} outside 1..={}",
                header.index_all, self.config.max_file_chunks
            );
            session.send(&InsertFileReply::Err(reason.clone())).await?;
            return Err(FilechainError::Protocol(reason));
        }

        let mut chunks = Vec::with_capacity(header.index_all.min(1024) as usize);
        for _ in 0..header.index_all {
            let chunk = session.recv_bytes().await?;
            if chunk.len() > CHUNK_SIZE {
                let reason = format!("chunk of {} bytes exceeds {}", chunk.len(), CHUNK_SIZE);
                session.send(&InsertFileReply::Err(reason.clone())).await?;
                return Err(FilechainError::Protocol(reason));
            }
            chunks.push(chunk);
        }

        let reply: InsertFileReply = match self.insert_file(&header.file_hash, chunks).await {
            Ok(blocks) => Ok(blocks.into_iter().map(|b| b.block_hash).collect()),
            Err(e) => {
                warn!("rejected upload of {}: {}", header.file_hash, e);
                Err(e.to_string())
            }
        };
        session.send(&reply).await
    }

    // ── Gossip ────────────────────────────────────────────────

    /// Fetch announced blocks from the sender, append the ones that extend the
    /// tail and forward only those.
    async fn absorb(self: Arc<Self>, announcement: Announcement) {
        let Announcement {
            sender,
            wave,
            hops_left,
            block_hashes,
        } = announcement;

        let missing: Vec<BlockHash> = {
            let chain = self.chain.read().await;
            block_hashes
                .into_iter()
                .filter(|h| !chain.contains_block(h))
                .collect()
        };
        if missing.is_empty() {
            debug!("wave {}: nothing new from {}", wave, sender);
            return;
        }

        let pending = match self.collect_blocks(&sender, &missing).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("wave {}: fetching from {} failed: {}", wave, sender, e);
                if e.is_transport() {
                    self.peers.lock().await.record_failure(&sender, Utc::now());
                }
                return;
            }
        };

        let accepted = {
            let mut chain = self.chain.write().await;
            let mut accepted = Vec::new();
            for block in pending {
                let hash = block.block_hash.clone();
                match chain.insert_verified(block) {
                    Ok(Inserted::New) => accepted.push(hash),
                    Ok(Inserted::AlreadyPresent) => {}
                    Err(e) => {
                        warn!("wave {}: rejected block {} from {}: {}", wave, hash, sender, e);
                        break;
                    }
                }
            }
            accepted
        };
        if accepted.is_empty() {
            return;
        }
        info!(
            "wave {}: accepted {} block(s) from {}",
            wave,
            accepted.len(),
            sender
        );

        if hops_left == 0 {
            debug!("wave {}: hop budget spent, not forwarding", wave);
            return;
        }
        self.broadcast(accepted, Some(sender), hops_left - 1, wave)
            .await;
    }

    /// Fetch `missing` from `peer`, then walk back through unknown predecessors.
    async fn collect_blocks(&self, peer: &PeerAddr, missing: &[BlockHash]) -> Result<Vec<Block>> {
        let mut pending = VecDeque::with_capacity(missing.len());
        for hash in missing {
            pending.push_back(self.fetch_block(peer, hash).await?);
        }

        let mut backfilled = 0;
        while let Some(first) = pending.front() {
            let previous = first.previous_block_hash.clone();
            if previous == GENESIS_HASH || self.chain.read().await.contains_block(&previous) {
                break;
            }
            if backfilled >= self.config.max_backfill {
                return Err(FilechainError::ChainIntegrity(format!(
                    "no known ancestor within {} block(s) of {}",
                    self.config.max_backfill, first.block_hash
                )));
            }
            pending.push_front(self.fetch_block(peer, &previous).await?);
            backfilled += 1;
        }
        if backfilled > 0 {
            debug!("back-filled {} block(s) from {}", backfilled, peer);
        }
        Ok(pending.into())
    }

    /// GET_BLOCK against a peer.
    pub async fn fetch_block(&self, peer: &PeerAddr, block_hash: &str) -> Result<Block> {
        let mut session = Session::open(peer, Command::GetBlock, &self.config.net).await?;
        session.send(&block_hash).await?;
        let block: Option<Block> = session.recv().await?;
        session.close().await;

        let block = block.ok_or_else(|| FilechainError::BlockNotFound(block_hash.into()))?;
        if block.block_hash != block_hash {
            return Err(FilechainError::Protocol(format!(
                "asked {} for {}, got {}",
                peer, block_hash, block.block_hash
            )));
        }
        Ok(block)
    }

    /// Announce `block_hashes` to every eligible peer concurrently.
    ///
    /// Returns how many peers acknowledged. Unreachable peers are logged and skipped.
    pub async fn broadcast(
        self: Arc<Self>,
        block_hashes: Vec<BlockHash>,
        exclude: Option<PeerAddr>,
        hops_left: u8,
        wave: Uuid,
    ) -> usize {
        let targets = self
            .peers
            .lock()
            .await
            .gossip_targets(exclude.as_ref(), Utc::now());
        if targets.is_empty() {
            debug!("wave {}: no peers to announce to", wave);
            return 0;
        }

        let announcement = Arc::new(Announcement {
            sender: self.addr.clone(),
            wave,
            hops_left,
            block_hashes,
        });
        let mut tasks = JoinSet::new();
        for peer in targets {
            let node = self.clone();
            let announcement = announcement.clone();
            tasks.spawn(async move {
                let result = node.announce(&peer, &announcement).await;
                (peer, result)
            });
        }

        let mut reached = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    reached += 1;
                    self.peers.lock().await.record_success(&peer);
                }
                Ok((peer, Err(e))) => {
                    warn!("wave {}: skipping peer {}: {}", wave, peer, e);
                    self.peers.lock().await.record_failure(&peer, Utc::now());
                }
                Err(e) => error!("wave {}: gossip task failed: {}", wave, e),
            }
        }
        debug!("wave {}: {} peer(s) reached", wave, reached);
        reached
    }

    async fn announce(&self, peer: &PeerAddr, announcement: &Announcement) -> Result<()> {
        let attempts = self.config.gossip_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.announce_once(peer, announcement).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    debug!("announce to {} attempt {} failed: {}", peer, attempt, e);
                    tokio::time::sleep(self.config.retry_backoff() * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn announce_once(&self, peer: &PeerAddr, announcement: &Announcement) -> Result<()> {
        let mut session =
            Session::open(peer, Command::NewBlocksAvailable, &self.config.net).await?;
        session.send(announcement).await?;
        session.close().await;
        Ok(())
    }
}

/// A bound listener plus the node it serves.
pub struct Server {
    node: Arc<Node>,
    listener: TcpListener,
}

impl Server {
    /// Bind the configured address. With port 0 the advertised port is the one the OS picked.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let listener =
            TcpListener::bind((config.listen.host.as_str(), config.listen.port)).await?;
        let addr = PeerAddr::new(config.listen.host.clone(), listener.local_addr()?.port());
        let node = Node::new(config, addr);
        Ok(Self { node, listener })
    }

    pub fn node(&self) -> Arc<Node> {
        self.node.clone()
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) -> Result<()> {
        let Server { node, listener } = self;
        let permits = Arc::new(Semaphore::new(node.config.max_connections));
        info!("filechain node listening on {}", node.addr);

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                return Ok(());
            };
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay for {}: {}", remote, e);
            }
            debug!("connection from {}", remote);

            let session = Session::new(stream, remote.to_string(), node.config.net.clone());
            let node = node.clone();
            tokio::spawn(async move {
                node.handle_connection(session).await;
                drop(permit);
            });
        }
    }

    /// Run in the background; returns the node and the accept-loop handle.
    pub fn spawn(self) -> (Arc<Node>, JoinHandle<Result<()>>) {
        let node = self.node();
        (node, tokio::spawn(self.run()))
    }
}
