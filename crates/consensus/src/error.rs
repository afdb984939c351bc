//! Helper errors

use crate::types::{ExecutionOutcome, ReplicaIdentity};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to the consensus module
#[derive(Error, Debug)]
pub enum HelperError {
    #[error("local endpoint unavailable: {0}")]
    EndpointUnavailable(#[source] CoordinatorError),

    #[error("fatal error reading root config `{name}`: {source}")]
    ConfigUnreadable {
        name: String,
        #[source]
        source: ConfigError,
    },

    #[error("couldn't find {0} in list of replica addresses given in config")]
    ReplicaNotFound(ReplicaIdentity),

    #[error("{target} failed: {source}")]
    DispatchFailed {
        target: String,
        #[source]
        source: CoordinatorError,
    },

    /// Execution was cancelled or ran past its deadline. `partial` holds
    /// what the engine reported after it observed the cancellation; it is
    /// `None` when the engine was never started or did not stop in time.
    #[error("transaction execution cancelled")]
    Cancelled { partial: Option<ExecutionOutcome> },
}

pub type Result<T> = std::result::Result<T, HelperError>;

/// Failures loading the replica configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no {base_name}.{{yaml,yml,json}} in {searched:?}")]
    NotFound {
        base_name: String,
        searched: Vec<PathBuf>,
    },

    #[error("read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by a network coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("unknown peer {0}")]
    UnknownPeer(ReplicaIdentity),

    #[error("peer {0} disconnected")]
    Disconnected(ReplicaIdentity),

    #[error("inbox of peer {0} is full")]
    InboxFull(ReplicaIdentity),

    #[error("no peers connected")]
    NoPeers,

    #[error("local endpoint unknown: {0}")]
    EndpointUnknown(String),

    #[error("message encoding failed: {0}")]
    Codec(String),
}

/// Failure of a single transaction within a batch
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("transaction {index} failed: {reason}")]
pub struct TransactionError {
    /// Position in the submitted batch
    pub index: usize,
    pub reason: String,
}

impl TransactionError {
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}
