//! Network coordinator interface and an in-process implementation
//!
//! The helper never moves bytes itself. A [`NetworkCoordinator`] owns peer
//! connections and delivery; [`LoopbackCoordinator`] wires peers together
//! through tokio channels for single-process clusters and tests.

use crate::error::CoordinatorError;
use crate::types::{ConsensusMessage, PeerEndpoint, ReplicaIdentity};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Transport side consumed by the helper. Must be safe for concurrent callers.
#[async_trait]
pub trait NetworkCoordinator: Send + Sync {
    /// Endpoint of the local node, taken from the node's own state
    fn local_endpoint(&self) -> Result<PeerEndpoint, CoordinatorError>;

    /// Deliver `message` to every known replica
    async fn broadcast(&self, message: &ConsensusMessage) -> Result<(), CoordinatorError>;

    /// Deliver `message` to exactly one replica
    async fn unicast(
        &self,
        message: &ConsensusMessage,
        receiver: &ReplicaIdentity,
    ) -> Result<(), CoordinatorError>;
}

/// Delivery counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub messages_broadcast: u64,
    pub messages_unicast: u64,
    pub connected_peers: usize,
}

/// Coordinator that delivers to peers living in the same process
pub struct LoopbackCoordinator {
    /// Local endpoint, `None` until the node knows where it listens
    endpoint: Option<PeerEndpoint>,
    /// Connected peers
    peers: RwLock<HashMap<ReplicaIdentity, mpsc::Sender<Vec<u8>>>>,
    /// Stats
    stats: RwLock<CoordinatorStats>,
}

impl LoopbackCoordinator {
    /// Create a coordinator for a node listening on `endpoint`
    pub fn new(endpoint: PeerEndpoint) -> Self {
        Self {
            endpoint: Some(endpoint),
            peers: RwLock::new(HashMap::new()),
            stats: RwLock::new(CoordinatorStats::default()),
        }
    }

    /// Create a coordinator whose local endpoint is not known
    pub fn detached() -> Self {
        Self {
            endpoint: None,
            peers: RwLock::new(HashMap::new()),
            stats: RwLock::new(CoordinatorStats::default()),
        }
    }

    /// Register a peer and return the inbox its messages arrive on.
    ///
    /// Reconnecting an identity replaces the previous inbox.
    pub fn connect(&self, peer: ReplicaIdentity, capacity: usize) -> PeerInbox {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut peers = self.peers.write();
        peers.insert(peer.clone(), tx);
        self.stats.write().connected_peers = peers.len();
        tracing::debug!("Peer {} connected", peer);
        PeerInbox { peer, rx }
    }

    /// Drop a peer from the table
    pub fn disconnect(&self, peer: &ReplicaIdentity) -> bool {
        let mut peers = self.peers.write();
        let removed = peers.remove(peer).is_some();
        self.stats.write().connected_peers = peers.len();
        if removed {
            tracing::debug!("Peer {} disconnected", peer);
        }
        removed
    }

    /// Get number of connected peers
    pub fn connected_peers(&self) -> usize {
        self.peers.read().len()
    }

    /// Get current stats
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    fn encode(message: &ConsensusMessage) -> Result<Vec<u8>, CoordinatorError> {
        message
            .to_bytes()
            .map_err(|e| CoordinatorError::Codec(e.to_string()))
    }

    /// Forget a peer whose inbox was dropped
    fn prune(&self, peer: &ReplicaIdentity) {
        let mut peers = self.peers.write();
        if peers.get(peer).is_some_and(|tx| tx.is_closed()) {
            peers.remove(peer);
            self.stats.write().connected_peers = peers.len();
            tracing::warn!("Pruned closed peer {}", peer);
        }
    }
}

#[async_trait]
impl NetworkCoordinator for LoopbackCoordinator {
    fn local_endpoint(&self) -> Result<PeerEndpoint, CoordinatorError> {
        self.endpoint
            .clone()
            .ok_or_else(|| CoordinatorError::EndpointUnknown("endpoint not configured".into()))
    }

    async fn broadcast(&self, message: &ConsensusMessage) -> Result<(), CoordinatorError> {
        let data = Self::encode(message)?;

        // Snapshot so the lock is not held across sends
        let targets: Vec<(ReplicaIdentity, mpsc::Sender<Vec<u8>>)> = self
            .peers
            .read()
            .iter()
            .map(|(peer, tx)| (peer.clone(), tx.clone()))
            .collect();

        if targets.is_empty() {
            return Err(CoordinatorError::NoPeers);
        }

        // A full inbox is reported instead of awaited so one slow peer never
        // holds up delivery to the rest
        let mut first_failure = None;
        let mut delivered = 0usize;
        for (peer, tx) in targets {
            match tx.try_send(data.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Inbox of {} full, dropping broadcast", peer);
                    first_failure.get_or_insert(CoordinatorError::InboxFull(peer));
                }
                Err(TrySendError::Closed(_)) => {
                    self.prune(&peer);
                    first_failure.get_or_insert(CoordinatorError::Disconnected(peer));
                }
            }
        }

        self.stats.write().messages_broadcast += 1;
        tracing::debug!("Broadcast {:?} message to {} peers", message.kind, delivered);

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn unicast(
        &self,
        message: &ConsensusMessage,
        receiver: &ReplicaIdentity,
    ) -> Result<(), CoordinatorError> {
        let data = Self::encode(message)?;
        let tx = self
            .peers
            .read()
            .get(receiver)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownPeer(receiver.clone()))?;

        if tx.send(data).await.is_err() {
            self.prune(receiver);
            return Err(CoordinatorError::Disconnected(receiver.clone()));
        }

        self.stats.write().messages_unicast += 1;
        tracing::trace!("Unicast {:?} message to {}", message.kind, receiver);
        Ok(())
    }
}

/// Receiving end of a loopback peer
pub struct PeerInbox {
    peer: ReplicaIdentity,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl PeerInbox {
    pub fn peer(&self) -> &ReplicaIdentity {
        &self.peer
    }

    /// Receive next message; `None` once the coordinator side is gone.
    /// Frames that fail to decode are skipped.
    pub async fn recv(&mut self) -> Option<ConsensusMessage> {
        while let Some(data) = self.rx.recv().await {
            match ConsensusMessage::from_bytes(&data) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!("Dropping undecodable frame for {}: {}", self.peer, e),
            }
        }
        None
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<ConsensusMessage> {
        let data = self.rx.try_recv().ok()?;
        ConsensusMessage::from_bytes(&data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    fn coordinator() -> LoopbackCoordinator {
        LoopbackCoordinator::new(PeerEndpoint::new("vp0", "10.0.0.1:7051"))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let coordinator = coordinator();
        let mut a = coordinator.connect("10.0.0.2:7051".into(), 8);
        let mut b = coordinator.connect("10.0.0.3:7051".into(), 8);

        let msg = ConsensusMessage::new(MessageType::Heartbeat, vec![1]);
        coordinator.broadcast(&msg).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), msg);
        assert_eq!(b.recv().await.unwrap(), msg);
        assert_eq!(coordinator.stats().messages_broadcast, 1);
    }

    #[tokio::test]
    async fn test_broadcast_without_peers() {
        let coordinator = coordinator();
        let msg = ConsensusMessage::consensus(vec![]);
        assert_eq!(
            coordinator.broadcast(&msg).await,
            Err(CoordinatorError::NoPeers)
        );
    }

    #[tokio::test]
    async fn test_broadcast_reports_dropped_peer_and_prunes_it() {
        let coordinator = coordinator();
        let mut live = coordinator.connect("live:1".into(), 8);
        let dead = coordinator.connect("dead:1".into(), 8);
        drop(dead);

        let msg = ConsensusMessage::consensus(vec![5]);
        let err = coordinator.broadcast(&msg).await.unwrap_err();
        assert_eq!(err, CoordinatorError::Disconnected("dead:1".into()));

        // The live peer still got it
        assert_eq!(live.recv().await.unwrap(), msg);
        assert_eq!(coordinator.connected_peers(), 1);
    }

    #[tokio::test]
    async fn test_full_inbox_does_not_stall_other_peers() {
        let coordinator = coordinator();
        let mut slow = coordinator.connect("slow:1".into(), 1);
        let mut fast = coordinator.connect("fast:1".into(), 8);

        let first = ConsensusMessage::consensus(vec![1]);
        let second = ConsensusMessage::consensus(vec![2]);
        coordinator.broadcast(&first).await.unwrap();

        let err = coordinator.broadcast(&second).await.unwrap_err();
        assert_eq!(err, CoordinatorError::InboxFull("slow:1".into()));

        assert_eq!(fast.recv().await.unwrap(), first);
        assert_eq!(fast.recv().await.unwrap(), second);
        assert_eq!(slow.recv().await.unwrap(), first);
        assert!(slow.try_recv().is_none());
        // A full peer stays connected
        assert_eq!(coordinator.connected_peers(), 2);
    }

    #[tokio::test]
    async fn test_unicast_targets_one_peer() {
        let coordinator = coordinator();
        let mut a = coordinator.connect("a:1".into(), 8);
        let mut b = coordinator.connect("b:1".into(), 8);

        let msg = ConsensusMessage::consensus(vec![9]);
        coordinator.unicast(&msg, &"b:1".into()).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), msg);
        assert!(a.try_recv().is_none());
        assert_eq!(coordinator.stats().messages_unicast, 1);
    }

    #[tokio::test]
    async fn test_unicast_unknown_peer() {
        let coordinator = coordinator();
        let msg = ConsensusMessage::consensus(vec![]);
        assert_eq!(
            coordinator.unicast(&msg, &"nobody:1".into()).await,
            Err(CoordinatorError::UnknownPeer("nobody:1".into()))
        );
    }

    #[test]
    fn test_detached_has_no_endpoint() {
        let coordinator = LoopbackCoordinator::detached();
        assert!(matches!(
            coordinator.local_endpoint(),
            Err(CoordinatorError::EndpointUnknown(_))
        ));
        assert!(!coordinator.disconnect(&"x:1".into()));
    }
}
