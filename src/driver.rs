use crate::broadcast::{broadcast_with_retry, BroadcastStatus, Broadcaster, RetryPolicy};
use crate::builder::{build_batch, plan_batch};
use crate::error::{MintError, Result};
use crate::fee_estimates::{resolve_fee_rate, FeePolicy, FeeRateSource};
use crate::request::MintRequest;
use crate::signer::TransactionSigner;
use crate::utxo::{fetch_candidates, UtxoSource};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Terminal outcomes of a run. `rejected` is included in `failed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTally {
    pub successful: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Built but never submitted because of shutdown.
    pub unsent: u64,
}

impl RunTally {
    pub fn record(&mut self, status: &BroadcastStatus) {
        match status {
            BroadcastStatus::Accepted(_) | BroadcastStatus::AlreadyConfirmed => {
                self.successful += 1
            }
            BroadcastStatus::Rejected(_) => {
                self.failed += 1;
                self.rejected += 1;
            }
            BroadcastStatus::Failed(_) => self.failed += 1,
            BroadcastStatus::Cancelled => self.unsent += 1,
        }
    }

    pub fn merge(&mut self, other: RunTally) {
        self.successful += other.successful;
        self.failed += other.failed;
        self.rejected += other.rejected;
        self.unsent += other.unsent;
    }

    pub fn total(&self) -> u64 {
        self.successful + self.failed + self.unsent
    }
}

impl fmt::Display for RunTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "successful: {}, failed: {} (rejected: {}), unsent: {}",
            self.successful, self.failed, self.rejected, self.unsent
        )
    }
}

/// Round scheduling around [`Minter::run_mint_batch`].
#[derive(Debug, Clone)]
pub struct RoundSettings {
    /// Request reused every round; its fee rate is replaced by the resolved one.
    pub template: MintRequest,
    pub fee_policy: FeePolicy,
    pub max_rounds: Option<u64>,
    pub round_delay: Duration,
}

pub struct Minter<Source, Sink, Signer> {
    source: Source,
    broadcaster: Sink,
    signer: Signer,
    retry: RetryPolicy,
}

impl<Source, Sink, Signer> Minter<Source, Sink, Signer>
where
    Source: UtxoSource,
    Sink: Broadcaster,
    Signer: TransactionSigner,
{
    pub fn new(source: Source, broadcaster: Sink, signer: Signer, retry: RetryPolicy) -> Self {
        Self {
            source,
            broadcaster,
            signer,
            retry,
        }
    }

    /// One round: select, build every transaction, then broadcast them in order.
    /// Construction errors abort before anything is submitted.
    pub async fn run_mint_batch(
        &self,
        request: &MintRequest,
        shutdown: &CancellationToken,
    ) -> Result<RunTally> {
        if shutdown.is_cancelled() {
            return Err(MintError::Cancelled);
        }
        self.check_request(request)?;

        let candidates = fetch_candidates(
            &self.source,
            &request.source,
            request.min_viable_value(),
            request.batch_size,
        )
        .await?;
        if candidates.is_empty() {
            return Err(MintError::NoSpendableOutputs {
                address: request.source.to_string(),
            });
        }

        let plan = plan_batch(candidates, request);
        let transactions = build_batch(&plan, request, &self.signer)?;
        tracing::info!(
            mode = %plan.mode(),
            inputs = plan.inputs().len(),
            transactions = transactions.len(),
            fee_rate = request.fee_rate,
            "Built batch"
        );

        let mut tally = RunTally::default();
        for (index, tx) in transactions.iter().enumerate() {
            let report = broadcast_with_retry(&self.broadcaster, tx, &self.retry, shutdown).await;
            tally.record(&report.status);
            if report.status == BroadcastStatus::Cancelled {
                let remaining = (transactions.len() - index - 1) as u64;
                tally.unsent += remaining;
                tracing::info!(unsent = remaining + 1, "Shutdown requested, stopping broadcast");
                break;
            }
        }

        tracing::info!("Round finished, {}", tally);
        Ok(tally)
    }

    /// Repeats rounds until shutdown, `max_rounds`, or a fatal error. Network
    /// errors only end the current round.
    pub async fn run_rounds<Fees: FeeRateSource + ?Sized>(
        &self,
        settings: &RoundSettings,
        fees: &Fees,
        shutdown: &CancellationToken,
    ) -> Result<RunTally> {
        let mut total = RunTally::default();
        let mut rounds = 0u64;

        while !shutdown.is_cancelled() {
            rounds += 1;
            let fee_rate = resolve_fee_rate(fees, &settings.fee_policy).await;
            let request = MintRequest {
                fee_rate,
                ..settings.template.clone()
            };
            tracing::info!(round = rounds, fee_rate, "Starting round");

            match self.run_mint_batch(&request, shutdown).await {
                Ok(tally) => total.merge(tally),
                Err(MintError::Cancelled) => break,
                Err(err) if err.is_round_local() => {
                    tracing::warn!(round = rounds, error = %err, "Round aborted");
                }
                Err(err) => {
                    tracing::error!(round = rounds, error = %err, "Stopping after fatal error, {}", total);
                    return Err(err);
                }
            }

            if settings.max_rounds.map_or(false, |max| rounds >= max) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(settings.round_delay) => {},
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!(rounds, "Minting stopped, {}", total);
        Ok(total)
    }

    fn check_request(&self, request: &MintRequest) -> Result<()> {
        if request.batch_size == 0 {
            return Err(MintError::Configuration(
                "batch size must be positive".to_string(),
            ));
        }
        if request.consolidation_cap == 0 {
            return Err(MintError::Configuration(
                "consolidation cap must be positive".to_string(),
            ));
        }
        if request.source.script_pubkey() != self.signer.script_pubkey() {
            return Err(MintError::Configuration(format!(
                "source address {} is not controlled by the signing key",
                request.source
            )));
        }
        Ok(())
    }
}
