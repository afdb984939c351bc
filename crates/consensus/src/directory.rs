//! Replica directory - who we are and who else is in the replica set
//!
//! The local identity comes from the coordinator (the node's own state); the
//! member list comes from the root config file, read fresh on every call.

use crate::config::ConfigSource;
use crate::coordinator::NetworkCoordinator;
use crate::error::{CoordinatorError, HelperError, Result};
use crate::types::{ReplicaIdentity, ReplicaSet};
use std::sync::Arc;
use tracing::Span;

/// Resolves replica identities and ordinals
pub struct ReplicaDirectory<C: ?Sized> {
    coordinator: Arc<C>,
    config: ConfigSource,
    span: Span,
}

impl<C: NetworkCoordinator + ?Sized> ReplicaDirectory<C> {
    pub fn new(coordinator: Arc<C>, config: ConfigSource) -> Self {
        Self {
            coordinator,
            config,
            span: tracing::info_span!("consensus_helper", component = "directory"),
        }
    }

    /// Identity of the local replica
    pub fn self_identity(&self) -> Result<ReplicaIdentity> {
        let _guard = self.span.enter();
        let endpoint = self
            .coordinator
            .local_endpoint()
            .map_err(HelperError::EndpointUnavailable)?;
        if endpoint.address.is_empty() {
            return Err(HelperError::EndpointUnavailable(
                CoordinatorError::EndpointUnknown(format!("peer {} has no address", endpoint.id)),
            ));
        }
        Ok(ReplicaIdentity::from_address(endpoint.address))
    }

    /// Configured members, in configuration order
    pub fn members(&self) -> Result<Vec<ReplicaIdentity>> {
        let _guard = self.span.enter();
        let addresses = self.config.replica_addresses().map_err(|source| {
            tracing::warn!("Replica config unreadable: {}", source);
            HelperError::ConfigUnreadable {
                name: self.config.base_name().to_string(),
                source,
            }
        })?;
        tracing::debug!("Loaded {} replica addresses", addresses.len());
        Ok(addresses
            .into_iter()
            .map(ReplicaIdentity::from_address)
            .collect())
    }

    /// The local identity together with the configured members
    pub fn replica_set(&self) -> Result<ReplicaSet> {
        let self_identity = self.self_identity()?;
        let members = self.members()?;
        Ok(ReplicaSet::new(self_identity, members))
    }

    /// Ordinal of `identity` in the configured list; the first match wins
    pub fn resolve_ordinal(&self, identity: &ReplicaIdentity) -> Result<u64> {
        let set = self.replica_set()?;
        let _guard = self.span.enter();
        match set.ordinal_of(identity) {
            Some(ordinal) => {
                tracing::trace!("Resolved {} to ordinal {}", identity, ordinal);
                Ok(ordinal)
            }
            None => {
                tracing::debug!("{} is not a configured replica", identity);
                Err(HelperError::ReplicaNotFound(identity.clone()))
            }
        }
    }
}
