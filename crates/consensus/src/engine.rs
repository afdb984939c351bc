//! Reference execution engine
//!
//! An in-memory key/value ledger. Each transaction payload is a borsh-encoded
//! [`StateWrite`]; the state hash is a blake3 digest over the sorted
//! contents, so it depends only on what is stored and not on insertion order.
//!
//! Partial failure policy: a failing transaction is skipped, the rest of the
//! batch still applies, and the returned hash covers everything that applied.
//! Batches run one at a time, so a batch's hash never includes writes from a
//! batch submitted concurrently.

use crate::error::TransactionError;
use crate::executor::ExecutionEngine;
use crate::types::{ChainId, ExecutionOutcome, Transaction};
use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A single key write carried in a transaction payload
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct StateWrite {
    pub key: String,
    pub value: Vec<u8>,
}

impl StateWrite {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Wrap this write in a transaction
    pub fn to_transaction(&self, id: impl Into<String>) -> Result<Transaction, borsh::io::Error> {
        Ok(Transaction::new(id, borsh::to_vec(self)?))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// In-memory ledger serving a single chain
#[derive(Clone)]
pub struct LedgerEngine {
    chain: ChainId,
    state: Arc<DashMap<String, Vec<u8>>>,
    /// Held for the whole of apply-then-hash
    batch: Arc<Mutex<()>>,
}

impl LedgerEngine {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            state: Arc::new(DashMap::new()),
            batch: Arc::new(Mutex::new(())),
        }
    }

    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Hash of the current contents
    pub fn state_hash(&self) -> [u8; 32] {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .state
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = blake3::Hasher::new();
        for (key, value) in &entries {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }
        *hasher.finalize().as_bytes()
    }

    fn apply(&self, tx: &Transaction) -> Result<(), String> {
        let write = StateWrite::from_bytes(&tx.payload)
            .map_err(|e| format!("malformed payload in {}: {}", tx.id, e))?;
        if write.key.is_empty() {
            return Err(format!("empty key in {}", tx.id));
        }
        self.state.insert(write.key, write.value);
        Ok(())
    }
}

impl Default for LedgerEngine {
    fn default() -> Self {
        Self::new(ChainId::default_chain())
    }
}

#[async_trait]
impl ExecutionEngine for LedgerEngine {
    async fn execute_transactions(
        &self,
        chain: &ChainId,
        transactions: &[Transaction],
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        if chain != &self.chain {
            tracing::warn!("Rejecting batch for unknown chain {}", chain);
            return ExecutionOutcome {
                state_hash: None,
                errors: (0..transactions.len())
                    .map(|i| TransactionError::new(i, format!("unknown chain {}", chain)))
                    .collect(),
            };
        }

        let _batch = self.batch.lock().await;
        let mut errors = Vec::new();
        for (index, tx) in transactions.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!("Stopping batch at {} of {}", index, transactions.len());
                errors.extend(
                    (index..transactions.len())
                        .map(|i| TransactionError::new(i, "execution cancelled")),
                );
                break;
            }
            if let Err(reason) = self.apply(tx) {
                tracing::debug!("Transaction {} ({}) failed: {}", index, tx.id, reason);
                errors.push(TransactionError::new(index, reason));
            }
            // Let a pending cancellation be observed between transactions
            tokio::task::yield_now().await;
        }

        ExecutionOutcome {
            state_hash: Some(self.state_hash()),
            errors,
        }
    }
}
