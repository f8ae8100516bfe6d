use filechain::block::{chunk_content, compute_hash, GENESIS_HASH};
use filechain::chain::Blockchain;
use filechain::client::FilechainClient;
use filechain::config::{ClientConfig, NodeConfig};
use filechain::peers::PeerAddr;
use filechain::protocol::Command;
use filechain::server::{Node, Server};
use filechain::wire::{read_frame, write_frame};
use filechain::FilechainError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

async fn start_node() -> Arc<Node> {
    let server = Server::bind(NodeConfig::default()).await.unwrap();
    let (node, _handle) = server.spawn();
    node
}

fn client_for(node: &Node) -> FilechainClient {
    FilechainClient::new(node.addr().clone(), ClientConfig::default())
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn sample(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn upload_splits_into_ordered_blocks() {
    let node = start_node().await;
    let client = client_for(&node);
    let data = sample(1200, 1);
    let (file_hash, chunks) = chunk_content(&data, 500);

    let hashes = client.insert(&file_hash, &chunks).await.unwrap();
    assert_eq!(hashes.len(), 3);

    let blocks = client.get_blocks(&file_hash).await.unwrap();
    let lengths: Vec<usize> = blocks.iter().map(|b| b.chunk.len()).collect();
    assert_eq!(lengths, vec![500, 500, 200]);
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.index as usize, i);
        assert_eq!(block.index_all, 3);
        assert_eq!(block.block_hash, hashes[i]);
    }
    assert_eq!(blocks[0].previous_block_hash, GENESIS_HASH);
    assert_eq!(blocks[1].previous_block_hash, blocks[0].block_hash);
    assert_eq!(blocks[2].previous_block_hash, blocks[1].block_hash);

    assert!(client.contains(&file_hash).await.unwrap());
    assert!(!client.contains(&compute_hash(b"never stored")).await.unwrap());
    assert_eq!(node.tail_hash().await, hashes[2]);
}

#[tokio::test]
async fn upload_with_wrong_hash_is_rejected() {
    let node = start_node().await;
    let client = client_for(&node);
    let (_, chunks) = chunk_content(&sample(700, 2), 500);

    let err = client
        .insert(&compute_hash(b"something else"), &chunks)
        .await
        .unwrap_err();
    assert!(matches!(err, FilechainError::InvalidBlock(_)));
    assert!(node.chain().await.is_empty());
}

#[tokio::test]
async fn reupload_resolves_to_first_copy() {
    let node = start_node().await;
    let client = client_for(&node);
    let (file_hash, chunks) = chunk_content(&sample(900, 3), 500);

    let first = client.insert(&file_hash, &chunks).await.unwrap();
    let second = client.insert(&file_hash, &chunks).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(node.chain().await.len(), 4);

    let resolved: Vec<String> = client
        .get_blocks(&file_hash)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.block_hash)
        .collect();
    assert_eq!(resolved, first);
}

#[tokio::test]
async fn concurrent_uploads_stay_linear() {
    let node = start_node().await;
    let mut uploads = Vec::new();
    for seed in 0..8u8 {
        let client = client_for(&node);
        uploads.push(tokio::spawn(async move {
            let (file_hash, chunks) = chunk_content(&sample(1100 + seed as usize * 37, seed), 500);
            client.insert(&file_hash, &chunks).await.map(|_| file_hash)
        }));
    }
    let mut files = Vec::new();
    for upload in uploads {
        files.push(upload.await.unwrap().unwrap());
    }

    let chain = node.chain().await;
    assert_eq!(chain.len(), 8 * 3);
    assert_eq!(chain[0].previous_block_hash, GENESIS_HASH);
    for pair in chain.windows(2) {
        assert_eq!(pair[1].previous_block_hash, pair[0].block_hash);
    }
    let rebuilt = Blockchain::from_chain(chain).unwrap();
    rebuilt.verify_integrity().unwrap();
    for file_hash in &files {
        assert!(node.contains_file(file_hash).await);
    }
}

#[tokio::test]
async fn negative_lookups() {
    let node = start_node().await;
    let client = client_for(&node);
    let missing = compute_hash(b"missing");

    assert!(!client.contains(&missing).await.unwrap());
    assert!(matches!(
        client.get_blocks(&missing).await,
        Err(FilechainError::FileNotFound(_))
    ));
    assert!(matches!(
        client.get_block(&missing).await,
        Err(FilechainError::BlockNotFound(_))
    ));
}

#[tokio::test]
async fn unsupported_token_closes_connection() {
    let node = start_node().await;
    let addr = node.addr();
    let mut stream = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .unwrap();

    write_frame(&mut stream, b"DELETE_FILE").await.unwrap();
    assert!(matches!(
        read_frame(&mut stream, 1024).await,
        Err(FilechainError::Protocol(_))
    ));

    // The node keeps serving other connections.
    let client = client_for(&node);
    assert!(!client.contains(&compute_hash(b"x")).await.unwrap());
}

#[tokio::test]
async fn known_token_is_acknowledged() {
    let node = start_node().await;
    let addr = node.addr();
    let mut stream = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .unwrap();

    write_frame(&mut stream, Command::ContainsFile.token().as_bytes())
        .await
        .unwrap();
    let ack = read_frame(&mut stream, 1024).await.unwrap();
    assert_eq!(ack, b"OK");
}

#[tokio::test]
async fn gossip_reaches_peer() {
    let a = start_node().await;
    let b = start_node().await;
    a.add_peer(b.addr().clone()).await;

    let data = sample(1300, 4);
    let (file_hash, chunks) = chunk_content(&data, 500);
    client_for(&a).insert(&file_hash, &chunks).await.unwrap();

    assert!(eventually(|| b.contains_file(&file_hash)).await);
    assert_eq!(b.chain().await, a.chain().await);
    // The receiver now knows the sender as a peer.
    assert!(b.peers().await.contains(a.addr()));

    let fetched = client_for(&b).get_blocks(&file_hash).await.unwrap();
    assert_eq!(filechain::client::assemble(&file_hash, fetched).unwrap(), data);
}

#[tokio::test]
async fn gossip_back_fills_missing_predecessors() {
    let a = start_node().await;
    let b = start_node().await;

    // A holds a file B has never heard of.
    let (first_hash, first_chunks) = chunk_content(&sample(800, 5), 500);
    a.insert_file(&first_hash, first_chunks).await.unwrap();

    a.add_peer(b.addr().clone()).await;
    let (second_hash, second_chunks) = chunk_content(&sample(300, 6), 500);
    a.insert_file(&second_hash, second_chunks).await.unwrap();

    assert!(eventually(|| b.contains_file(&second_hash)).await);
    assert!(b.contains_file(&first_hash).await);
    assert_eq!(b.chain().await, a.chain().await);
}

#[tokio::test]
async fn gossip_relays_across_a_line() {
    let a = start_node().await;
    let b = start_node().await;
    let c = start_node().await;
    a.add_peer(b.addr().clone()).await;
    b.add_peer(c.addr().clone()).await;

    let (file_hash, chunks) = chunk_content(&sample(1000, 7), 500);
    a.insert_file(&file_hash, chunks).await.unwrap();

    assert!(eventually(|| c.contains_file(&file_hash)).await);
    assert_eq!(c.tail_hash().await, a.tail_hash().await);
}

#[tokio::test]
async fn unreachable_peer_does_not_block_others() {
    let a = start_node().await;
    let b = start_node().await;

    // Grab a free port and release it so nothing listens there.
    let dead_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dead = PeerAddr::new("127.0.0.1", dead_port);
    a.add_peer(dead.clone()).await;
    a.add_peer(b.addr().clone()).await;

    let (file_hash, chunks) = chunk_content(&sample(600, 8), 500);
    a.insert_file(&file_hash, chunks).await.unwrap();

    assert!(eventually(|| b.contains_file(&file_hash)).await);
    // Failed peers stay in the directory.
    assert!(a.peers().await.contains(&dead));
}

#[tokio::test]
async fn joining_node_adopts_chain_and_peers() {
    let a = start_node().await;
    let (file_hash, chunks) = chunk_content(&sample(1200, 9), 500);
    a.insert_file(&file_hash, chunks).await.unwrap();

    let b = start_node().await;
    b.join(a.addr()).await.unwrap();

    assert_eq!(b.chain().await, a.chain().await);
    assert!(b.contains_file(&file_hash).await);
    assert_eq!(
        b.blocks_for_file(&file_hash).await.unwrap(),
        a.blocks_for_file(&file_hash).await.unwrap()
    );
    assert!(b.peers().await.contains(a.addr()));
    assert!(a.peers().await.contains(b.addr()));

    // New content on the joiner flows back to the node it joined through.
    let (next_hash, next_chunks) = chunk_content(&sample(450, 10), 500);
    b.insert_file(&next_hash, next_chunks).await.unwrap();
    assert!(eventually(|| a.contains_file(&next_hash)).await);
    assert_eq!(a.tail_hash().await, b.tail_hash().await);
}

#[tokio::test]
async fn third_node_learns_existing_peers() {
    let a = start_node().await;
    let b = start_node().await;
    b.join(a.addr()).await.unwrap();

    let c = start_node().await;
    c.join(a.addr()).await.unwrap();

    let known = c.peers().await;
    assert!(known.contains(a.addr()));
    assert!(known.contains(b.addr()));
    assert!(!known.contains(c.addr()));
}

#[tokio::test]
async fn join_unreachable_node_fails() {
    let dead_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let node = start_node().await;
    let err = node
        .join(&PeerAddr::new("127.0.0.1", dead_port))
        .await
        .unwrap_err();
    assert!(matches!(err, FilechainError::PeerUnreachable { .. }));
}

#[tokio::test]
async fn client_file_round_trip() {
    let node = start_node().await;
    let client = client_for(&node);
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("input.bin");
    let data = sample(2048, 11);
    std::fs::write(&source, &data).unwrap();

    let (_, before) = client.check_file(&source).await.unwrap();
    assert!(!before);

    let file_hash = client.send_file(&source).await.unwrap();
    assert_eq!(file_hash, compute_hash(&data));
    let (checked, after) = client.check_file(&source).await.unwrap();
    assert_eq!(checked, file_hash);
    assert!(after);

    let target = dir.path().join("output.bin");
    let written = client.get_file(&file_hash, &target).await.unwrap();
    assert_eq!(written, data.len());
    assert_eq!(std::fs::read(&target).unwrap(), data);

    // An existing file is never overwritten.
    let err = client.get_file(&file_hash, &target).await.unwrap_err();
    assert!(matches!(err, FilechainError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
}

#[tokio::test]
async fn empty_file_round_trip() {
    let node = start_node().await;
    let client = client_for(&node);
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("empty");
    std::fs::write(&source, b"").unwrap();

    let file_hash = client.send_file(&source).await.unwrap();
    assert!(client.contains(&file_hash).await.unwrap());

    let target = dir.path().join("empty.out");
    assert_eq!(client.get_file(&file_hash, &target).await.unwrap(), 0);
    assert!(std::fs::read(&target).unwrap().is_empty());
}
