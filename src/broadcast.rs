//! Broadcast with bounded retries.
//!
//! Each transaction starts `Pending` and is submitted until it reaches a
//! terminal state. Transient failures resubmit the same hex after a fixed
//! backoff, at most `max_retries` times.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::signer::BuiltTransaction;

const DUPLICATE_MARKERS: [&str; 2] = [
    "Transaction already in block chain",
    "bad-txns-inputs-missingorspent",
];
const MALFORMED_MARKERS: [&str; 1] = ["scriptsig-size"];

/// Raw answer of a submission endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Submits consensus-encoded hex. `Err` means the transport failed before a response.
    async fn submit(&self, tx_hex: &str) -> anyhow::Result<SubmitResponse>;
}

/// Classification of a single submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Accepted(String),
    AlreadyConfirmed,
    Rejected(String),
    Transient(String),
}

impl BroadcastOutcome {
    pub fn from_response(response: &SubmitResponse) -> Self {
        let body = response.body.trim();
        if (200..300).contains(&response.status) {
            return if body.is_empty() {
                BroadcastOutcome::Transient("accepted without a transaction id".to_string())
            } else {
                BroadcastOutcome::Accepted(body.to_string())
            };
        }
        if MALFORMED_MARKERS.iter().any(|marker| body.contains(marker)) {
            return BroadcastOutcome::Rejected(body.to_string());
        }
        if DUPLICATE_MARKERS.iter().any(|marker| body.contains(marker)) {
            return BroadcastOutcome::AlreadyConfirmed;
        }
        BroadcastOutcome::Transient(format!("status {}: {}", response.status, body))
    }

    pub fn from_submission(submission: anyhow::Result<SubmitResponse>) -> Self {
        match submission {
            Ok(response) => Self::from_response(&response),
            Err(err) => BroadcastOutcome::Transient(format!("transport error: {err:#}")),
        }
    }
}

/// Final state of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastStatus {
    Accepted(String),
    AlreadyConfirmed,
    Rejected(String),
    /// Retry budget exhausted on transient failures.
    Failed(String),
    /// Shutdown requested before a terminal answer.
    Cancelled,
}

impl BroadcastStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BroadcastStatus::Accepted(_) | BroadcastStatus::AlreadyConfirmed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub status: BroadcastStatus,
    /// Submissions made, including the first one.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_millis(2_000),
        }
    }
}

pub async fn broadcast_with_retry<Sink: Broadcaster + ?Sized>(
    broadcaster: &Sink,
    tx: &BuiltTransaction,
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
) -> BroadcastReport {
    let mut attempts = 0;
    let mut retries_left = policy.max_retries;

    loop {
        if shutdown.is_cancelled() {
            return BroadcastReport {
                status: BroadcastStatus::Cancelled,
                attempts,
            };
        }

        attempts += 1;
        let outcome = BroadcastOutcome::from_submission(broadcaster.submit(&tx.hex).await);
        let status = match outcome {
            BroadcastOutcome::Accepted(id) => {
                tracing::info!(txid = %tx.txid, response = %id, attempts, "Transaction accepted");
                BroadcastStatus::Accepted(id)
            }
            BroadcastOutcome::AlreadyConfirmed => {
                tracing::info!(txid = %tx.txid, attempts, "Transaction already confirmed");
                BroadcastStatus::AlreadyConfirmed
            }
            BroadcastOutcome::Rejected(reason) => {
                tracing::error!(
                    txid = %tx.txid,
                    reason = %reason,
                    hex = %tx.hex,
                    "Transaction rejected as malformed"
                );
                BroadcastStatus::Rejected(reason)
            }
            BroadcastOutcome::Transient(reason) if retries_left == 0 => {
                tracing::warn!(
                    txid = %tx.txid,
                    reason = %reason,
                    attempts,
                    "Retries exhausted, giving up"
                );
                BroadcastStatus::Failed(reason)
            }
            BroadcastOutcome::Transient(reason) => {
                tracing::warn!(
                    txid = %tx.txid,
                    reason = %reason,
                    retries_left,
                    "Broadcast failed, retrying"
                );
                retries_left -= 1;
                tokio::select! {
                    _ = tokio::time::sleep(policy.backoff) => {},
                    _ = shutdown.cancelled() => {
                        tracing::info!(txid = %tx.txid, "Shutdown during backoff");
                        return BroadcastReport {
                            status: BroadcastStatus::Cancelled,
                            attempts,
                        };
                    }
                }
                continue;
            }
        };

        return BroadcastReport { status, attempts };
    }
}
