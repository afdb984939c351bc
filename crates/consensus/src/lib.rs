//! Consensus Helper - the node side of the consensus programming interface
//!
//! A consensus module (PBFT, Raft, ...) talks to the node only through
//! [`Cpi`]:
//! - Who am I, and who are the other replicas (from the root config file)
//! - Broadcast / unicast of opaque consensus messages via the network coordinator
//! - Execution of ordered transaction batches via the execution engine
//!
//! Replicas are identified by their `host:port` address for now.

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod helper;
pub mod types;


pub use config::{ConfigSource, DEFAULT_CONFIG_NAME, REPLICAS_KEY};
pub use coordinator::{CoordinatorStats, LoopbackCoordinator, NetworkCoordinator, PeerInbox};
pub use directory::ReplicaDirectory;
pub use dispatcher::MessageDispatcher;
pub use engine::{LedgerEngine, StateWrite};
pub use error::{ConfigError, CoordinatorError, HelperError, Result, TransactionError};
pub use executor::{ExecutionEngine, TransactionExecutor, DEFAULT_CANCEL_GRACE};
pub use helper::{Cpi, Helper};
pub use types::*;

pub use tokio_util::sync::CancellationToken;
