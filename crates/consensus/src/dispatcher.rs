//! Outbound consensus messages
//!
//! Thin delegation to the coordinator. Delivery guarantees, retries and
//! ordering all belong to the coordinator; failures are handed back as
//! [`HelperError::DispatchFailed`].

use crate::coordinator::NetworkCoordinator;
use crate::error::{HelperError, Result};
use crate::types::{ConsensusMessage, ReplicaIdentity};
use std::sync::Arc;
use tracing::{Instrument, Span};

pub struct MessageDispatcher<C: ?Sized> {
    coordinator: Arc<C>,
    span: Span,
}

impl<C: NetworkCoordinator + ?Sized> MessageDispatcher<C> {
    pub fn new(coordinator: Arc<C>) -> Self {
        Self {
            coordinator,
            span: tracing::info_span!("consensus_helper", component = "dispatcher"),
        }
    }

    /// Send `message` to all replicas
    pub async fn broadcast(&self, message: &ConsensusMessage) -> Result<()> {
        async {
            self.coordinator.broadcast(message).await.map_err(|source| {
                tracing::warn!("Broadcast of {:?} message failed: {}", message.kind, source);
                HelperError::DispatchFailed {
                    target: "broadcast".to_string(),
                    source,
                }
            })
        }
        .instrument(self.span.clone())
        .await
    }

    /// Send a raw consensus payload to one replica
    pub async fn unicast(&self, payload: &[u8], receiver: &ReplicaIdentity) -> Result<()> {
        async {
            let message = ConsensusMessage::consensus(payload.to_vec());
            self.coordinator
                .unicast(&message, receiver)
                .await
                .map_err(|source| {
                    tracing::warn!("Unicast to {} failed: {}", receiver, source);
                    HelperError::DispatchFailed {
                        target: format!("unicast to {}", receiver),
                        source,
                    }
                })
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::LoopbackCoordinator;
    use crate::error::CoordinatorError;
    use crate::types::{MessageType, PeerEndpoint};

    fn dispatcher() -> (Arc<LoopbackCoordinator>, MessageDispatcher<LoopbackCoordinator>) {
        let coordinator = Arc::new(LoopbackCoordinator::new(PeerEndpoint::new(
            "vp0",
            "10.0.0.1:7051",
        )));
        (coordinator.clone(), MessageDispatcher::new(coordinator))
    }

    #[tokio::test]
    async fn test_unicast_wraps_payload() {
        let (coordinator, dispatcher) = dispatcher();
        let mut inbox = coordinator.connect("10.0.0.2:7051".into(), 4);

        dispatcher
            .unicast(b"prepare", &"10.0.0.2:7051".into())
            .await
            .unwrap();

        let received = inbox.recv().await.unwrap();
        assert_eq!(received.kind, MessageType::Consensus);
        assert_eq!(received.payload, b"prepare".to_vec());
    }

    #[tokio::test]
    async fn test_broadcast_failure_surfaces() {
        let (_coordinator, dispatcher) = dispatcher();

        let err = dispatcher
            .broadcast(&ConsensusMessage::consensus(vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HelperError::DispatchFailed {
                source: CoordinatorError::NoPeers,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_peer_surfaces() {
        let (_coordinator, dispatcher) = dispatcher();

        let err = dispatcher
            .unicast(b"x", &"10.0.0.9:7051".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HelperError::DispatchFailed {
                source: CoordinatorError::UnknownPeer(_),
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "unicast to 10.0.0.9:7051 failed: unknown peer 10.0.0.9:7051"
        );
    }
}
