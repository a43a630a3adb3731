//! Peer list and fire-and-forget broadcasting of blocks and transactions.

use crate::blockchain::Block;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Configured peer addresses (`host:port`). Cloning shares the list.
#[derive(Debug, Clone, Default)]
pub struct PeerList {
    peers: Arc<RwLock<Vec<String>>>,
}

impl PeerList {
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        let list = PeerList::default();
        list.register(initial);
        list
    }

    /// Add peers not already known. Returns how many were new.
    pub fn register(&self, peers: impl IntoIterator<Item = String>) -> usize {
        let mut known = self.peers.write();
        let mut added = 0;
        for peer in peers {
            let peer = peer.trim().trim_end_matches('/').to_string();
            if peer.is_empty() || known.contains(&peer) {
                continue;
            }
            known.push(peer);
            added += 1;
        }
        added
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

/// Outbound notifications. Implementations must return without waiting on
/// peers; delivery failures are theirs to log.
pub trait Broadcaster: Send + Sync {
    fn broadcast_block(&self, block: &Block);
    fn broadcast_transaction(&self, tx: &Transaction);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast_block(&self, _block: &Block) {}
    fn broadcast_transaction(&self, _tx: &Transaction) {}
}

/// Posts to each peer's `/blocks/new` and `/transactions/new` on its own task.
pub struct HttpBroadcaster {
    client: reqwest::Client,
    peers: PeerList,
}

impl HttpBroadcaster {
    pub fn new(peers: PeerList) -> Self {
        let client = reqwest::Client::builder()
            .timeout(BROADCAST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, peers }
    }

    fn post_to_peers(&self, path: &'static str, body: serde_json::Value) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(path, "no async runtime, dropping broadcast");
                return;
            }
        };
        for peer in self.peers.snapshot() {
            let client = self.client.clone();
            let body = body.clone();
            handle.spawn(async move {
                let url = format!("http://{}{}", peer, path);
                match client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(peer = %peer, path, "broadcast delivered");
                    }
                    Ok(resp) => {
                        debug!(peer = %peer, path, status = %resp.status(), "peer declined broadcast");
                    }
                    Err(e) => {
                        warn!(peer = %peer, path, error = %e, "broadcast failed");
                    }
                }
            });
        }
    }
}

impl Broadcaster for HttpBroadcaster {
    fn broadcast_block(&self, block: &Block) {
        match serde_json::to_value(block) {
            Ok(body) => self.post_to_peers("/blocks/new", body),
            Err(e) => warn!(height = block.height, error = %e, "could not encode block for broadcast"),
        }
    }

    fn broadcast_transaction(&self, tx: &Transaction) {
        self.post_to_peers("/transactions/new", tx.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_dedupes() {
        let peers = PeerList::new(vec!["127.0.0.1:5001".to_string()]);
        let added = peers.register(vec![
            "127.0.0.1:5001".to_string(),
            "127.0.0.1:5002/".to_string(),
            " ".to_string(),
        ]);
        assert_eq!(added, 1);
        assert_eq!(peers.snapshot(), vec!["127.0.0.1:5001", "127.0.0.1:5002"]);

        let shared = peers.clone();
        shared.register(vec!["10.0.0.1:5000".to_string()]);
        assert_eq!(peers.len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_block() {
        let peers = PeerList::new(vec!["127.0.0.1:1".to_string()]);
        let broadcaster = HttpBroadcaster::new(peers);
        let tx = Transaction::transfer("alice", "bob", 1, 1);
        broadcaster.broadcast_transaction(&tx);
        broadcaster.broadcast_block(&Block::new(1, [0u8; 32], vec![tx], 2));
    }
}
