//! Core types shared between the helper and consensus modules

use crate::error::TransactionError;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Name of the application context transactions run against by default
pub const DEFAULT_CHAIN: &str = "default";

/// Stable identity of a replica in the consensus group.
///
/// Currently backed by the replica's `host:port` address. Only the
/// resolution functions in [`crate::directory`] depend on that, so a
/// cryptographic identity can replace it without touching call sites.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(transparent)]
pub struct ReplicaIdentity(String);

impl ReplicaIdentity {
    /// Build an identity from a network address
    pub fn from_address(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the placeholder identity returned when the local endpoint is unknown
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ReplicaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReplicaIdentity {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_address(s))
    }
}

impl From<&str> for ReplicaIdentity {
    fn from(address: &str) -> Self {
        Self::from_address(address)
    }
}

impl From<String> for ReplicaIdentity {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// A replica and its position in the configured replica list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replica {
    /// Dense 0-based index in configuration order
    pub ordinal: u64,
    pub identity: ReplicaIdentity,
}

/// The local replica plus every configured member, in configuration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaSet {
    pub self_identity: ReplicaIdentity,
    pub members: Vec<ReplicaIdentity>,
}

impl ReplicaSet {
    pub fn new(self_identity: ReplicaIdentity, members: Vec<ReplicaIdentity>) -> Self {
        Self {
            self_identity,
            members,
        }
    }

    /// Iterate members with their ordinals
    pub fn replicas(&self) -> impl Iterator<Item = Replica> + '_ {
        self.members
            .iter()
            .enumerate()
            .map(|(i, identity)| Replica {
                ordinal: i as u64,
                identity: identity.clone(),
            })
    }

    /// Ordinal of the first member equal to `identity`
    pub fn ordinal_of(&self, identity: &ReplicaIdentity) -> Option<u64> {
        self.members
            .iter()
            .position(|member| member == identity)
            .map(|i| i as u64)
    }

    /// Whether the local replica is listed among the members
    pub fn contains_self(&self) -> bool {
        self.ordinal_of(&self.self_identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Endpoint of the local node as known to the network coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    /// Node name
    pub id: String,
    /// `host:port` the node is reachable on
    pub address: String,
}

impl PeerEndpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Type tag carried next to a consensus payload.
///
/// Only the consensus module and the transport interpret it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum MessageType {
    /// Protocol message produced by the consensus module
    Consensus,
    /// Transactions forwarded for ordering
    Transactions,
    /// Liveness ping
    Heartbeat,
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "consensus" => Ok(Self::Consensus),
            "transactions" => Ok(Self::Transactions),
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(format!("unknown message type `{}`", other)),
        }
    }
}

/// Opaque message moved between replicas
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub kind: MessageType,
    pub payload: Vec<u8>,
}

impl ConsensusMessage {
    pub fn new(kind: MessageType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Wrap a raw consensus payload
    pub fn consensus(payload: Vec<u8>) -> Self {
        Self::new(MessageType::Consensus, payload)
    }

    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// A single ordered transaction; the helper never looks inside `payload`
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Application context a batch is executed against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn default_chain() -> Self {
        Self::new(DEFAULT_CHAIN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::default_chain()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of executing a batch: the candidate state hash and per-transaction failures.
///
/// Whether a partial failure invalidates `state_hash` is decided by the
/// execution engine, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub state_hash: Option<[u8; 32]>,
    pub errors: Vec<TransactionError>,
}

impl ExecutionOutcome {
    /// Every transaction applied
    pub fn success(state_hash: [u8; 32]) -> Self {
        Self {
            state_hash: Some(state_hash),
            errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.state_hash.is_some()
    }

    /// Error recorded for the transaction at `index`, if any
    pub fn error_for(&self, index: usize) -> Option<&TransactionError> {
        self.errors.iter().find(|e| e.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(self_addr: &str, members: &[&str]) -> ReplicaSet {
        ReplicaSet::new(
            self_addr.into(),
            members.iter().map(|m| ReplicaIdentity::from(*m)).collect(),
        )
    }

    #[test]
    fn test_ordinals_follow_config_order() {
        let set = set("b:1", &["a:1", "b:1", "c:1"]);
        let ordinals: Vec<u64> = set.replicas().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert_eq!(set.ordinal_of(&"c:1".into()), Some(2));
        assert!(set.contains_self());
    }

    #[test]
    fn test_duplicate_member_resolves_to_lowest_ordinal() {
        let set = set("x:1", &["a:1", "b:1", "a:1"]);
        assert_eq!(set.ordinal_of(&"a:1".into()), Some(0));
        assert!(!set.contains_self());
    }

    #[test]
    fn test_message_bytes() {
        let msg = ConsensusMessage::consensus(vec![7, 8, 9]);
        let decoded = ConsensusMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.kind, MessageType::Consensus);
        assert_eq!(decoded.payload, vec![7, 8, 9]);
    }

    #[test]
    fn test_message_type_from_str() {
        assert_eq!("heartbeat".parse::<MessageType>(), Ok(MessageType::Heartbeat));
        assert_eq!("Transactions".parse::<MessageType>(), Ok(MessageType::Transactions));
        assert!("gossip".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_outcome_success() {
        let outcome = ExecutionOutcome::success([1u8; 32]);
        assert!(outcome.is_success());

        let failed = ExecutionOutcome {
            state_hash: Some([1u8; 32]),
            errors: vec![TransactionError::new(0, "bad")],
        };
        assert!(!failed.is_success());
        assert_eq!(failed.error_for(0).map(|e| e.reason.as_str()), Some("bad"));
        assert!(failed.error_for(1).is_none());
    }
}
