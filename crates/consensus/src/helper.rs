//! The consensus programming interface and its default implementation

use crate::config::ConfigSource;
use crate::coordinator::NetworkCoordinator;
use crate::directory::ReplicaDirectory;
use crate::dispatcher::MessageDispatcher;
use crate::error::Result;
use crate::executor::{ExecutionEngine, TransactionExecutor};
use crate::types::{ChainId, ConsensusMessage, ExecutionOutcome, ReplicaIdentity, Transaction};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a consensus module needs from the node it runs in
#[async_trait]
pub trait Cpi: Send + Sync {
    /// Identity of this replica and of every configured replica.
    ///
    /// The local identity is returned even when the member list could not
    /// be read; it is empty only when the local endpoint itself is unknown.
    fn self_and_network(&self) -> (ReplicaIdentity, Result<Vec<ReplicaIdentity>>);

    /// Ordinal of a replica in the configured list
    fn resolve_ordinal(&self, identity: &ReplicaIdentity) -> Result<u64>;

    /// Send a message to all replicas
    async fn broadcast(&self, message: &ConsensusMessage) -> Result<()>;

    /// Send a payload to a single replica
    async fn unicast(&self, payload: &[u8], receiver: &ReplicaIdentity) -> Result<()>;

    /// Execute an ordered batch and return the candidate state hash with
    /// per-transaction errors
    async fn execute_transactions(
        &self,
        transactions: &[Transaction],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome>;
}

/// [`Cpi`] on top of a network coordinator and an execution engine.
///
/// Holds only the injected references plus where to look for config and
/// which chain to run on. The directory, dispatcher and executor are built
/// per call, and the replica list is re-read from config every time.
pub struct Helper<C: ?Sized, E: ?Sized> {
    coordinator: Arc<C>,
    engine: Arc<E>,
    config: ConfigSource,
    chain: ChainId,
}

impl<C, E> Helper<C, E>
where
    C: NetworkCoordinator + ?Sized,
    E: ExecutionEngine + ?Sized,
{
    /// Create a helper reading `openchain.*` from the working directory
    pub fn new(coordinator: Arc<C>, engine: Arc<E>) -> Self {
        Self::with_config_source(coordinator, engine, ConfigSource::default())
    }

    pub fn with_config_source(coordinator: Arc<C>, engine: Arc<E>, config: ConfigSource) -> Self {
        Self {
            coordinator,
            engine,
            config,
            chain: ChainId::default_chain(),
        }
    }

    /// Run batches against `chain` instead of the default chain
    pub fn with_chain(mut self, chain: ChainId) -> Self {
        self.chain = chain;
        self
    }

    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    pub fn directory(&self) -> ReplicaDirectory<C> {
        ReplicaDirectory::new(self.coordinator.clone(), self.config.clone())
    }

    pub fn dispatcher(&self) -> MessageDispatcher<C> {
        MessageDispatcher::new(self.coordinator.clone())
    }

    pub fn executor(&self) -> TransactionExecutor<E> {
        TransactionExecutor::with_chain(self.engine.clone(), self.chain.clone())
    }
}

#[async_trait]
impl<C, E> Cpi for Helper<C, E>
where
    C: NetworkCoordinator + ?Sized + 'static,
    E: ExecutionEngine + ?Sized + 'static,
{
    fn self_and_network(&self) -> (ReplicaIdentity, Result<Vec<ReplicaIdentity>>) {
        let directory = self.directory();
        let self_identity = match directory.self_identity() {
            Ok(identity) => identity,
            Err(e) => return (ReplicaIdentity::default(), Err(e)),
        };
        let network = directory.members();
        (self_identity, network)
    }

    fn resolve_ordinal(&self, identity: &ReplicaIdentity) -> Result<u64> {
        self.directory().resolve_ordinal(identity)
    }

    async fn broadcast(&self, message: &ConsensusMessage) -> Result<()> {
        self.dispatcher().broadcast(message).await
    }

    async fn unicast(&self, payload: &[u8], receiver: &ReplicaIdentity) -> Result<()> {
        self.dispatcher().unicast(payload, receiver).await
    }

    async fn execute_transactions(
        &self,
        transactions: &[Transaction],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        self.executor().execute(transactions, cancel).await
    }
}
