//! Transaction execution delegation
//!
//! Hands an ordered batch to the execution engine and returns whatever the
//! engine produced. Cancellation of the caller's token is forwarded to the
//! engine through a child token; the engine is then given a grace period to
//! stop and report what it applied before its future is dropped.

use crate::error::{HelperError, Result};
use crate::types::{ChainId, ExecutionOutcome, Transaction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// How long a cancelled engine may take to report its partial outcome
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Applies transactions to application state
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute `transactions` in order against `chain`.
    ///
    /// `cancel` is advisory: long-running engines should check it between
    /// transactions, stop early once it fires, and return what they applied.
    async fn execute_transactions(
        &self,
        chain: &ChainId,
        transactions: &[Transaction],
        cancel: &CancellationToken,
    ) -> ExecutionOutcome;
}

pub struct TransactionExecutor<E: ?Sized> {
    engine: Arc<E>,
    chain: ChainId,
    cancel_grace: Duration,
    span: Span,
}

impl<E: ExecutionEngine + ?Sized> TransactionExecutor<E> {
    /// Executor for the default chain
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_chain(engine, ChainId::default_chain())
    }

    pub fn with_chain(engine: Arc<E>, chain: ChainId) -> Self {
        Self {
            engine,
            chain,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            span: tracing::info_span!("consensus_helper", component = "executor"),
        }
    }

    /// Override how long a cancelled engine may take to stop
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Chain batches are executed against
    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    /// Execute `transactions` in order, stopping the engine once `cancel` fires.
    ///
    /// On cancellation the result is [`HelperError::Cancelled`] carrying the
    /// engine's partial outcome, so the caller can see which writes landed.
    pub async fn execute(
        &self,
        transactions: &[Transaction],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        async {
            if cancel.is_cancelled() {
                tracing::debug!("Batch of {} cancelled before execution", transactions.len());
                return Err(HelperError::Cancelled { partial: None });
            }

            let engine_cancel = cancel.child_token();
            let work = self
                .engine
                .execute_transactions(&self.chain, transactions, &engine_cancel);
            tokio::pin!(work);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                outcome = &mut work => {
                    // The engine may have stopped on the token between our polls
                    if cancel.is_cancelled() {
                        tracing::warn!("Batch of {} stopped by cancellation", transactions.len());
                        return Err(HelperError::Cancelled {
                            partial: Some(outcome),
                        });
                    }
                    tracing::debug!(
                        "Executed {} transactions on {}: {} errors",
                        transactions.len(),
                        self.chain,
                        outcome.errors.len()
                    );
                    return Ok(outcome);
                }
            }

            // The child token is already cancelled with the parent
            tracing::warn!("Batch of {} cancelled during execution", transactions.len());
            match tokio::time::timeout(self.cancel_grace, &mut work).await {
                Ok(outcome) => Err(HelperError::Cancelled {
                    partial: Some(outcome),
                }),
                Err(_) => {
                    tracing::error!(
                        "Engine did not stop within {:?} of cancellation",
                        self.cancel_grace
                    );
                    Err(HelperError::Cancelled { partial: None })
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Execute with an advisory deadline
    pub async fn execute_with_deadline(
        &self,
        transactions: &[Transaction],
        deadline: Duration,
    ) -> Result<ExecutionOutcome> {
        let cancel = CancellationToken::new();
        let execution = self.execute(transactions, &cancel);
        tokio::pin!(execution);

        tokio::select! {
            result = &mut execution => return result,
            _ = tokio::time::sleep(deadline) => {}
        }

        tracing::warn!("Batch of {} exceeded {:?} deadline", transactions.len(), deadline);
        cancel.cancel();
        execution.await
    }
}
