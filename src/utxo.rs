use crate::error::Result;
use async_trait::async_trait;
use bitcoin::{Address, OutPoint};
use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub value: u64,
}

impl SpendableOutput {
    pub fn new(outpoint: OutPoint, value: u64) -> Self {
        Self { outpoint, value }
    }
}

#[async_trait]
pub trait UtxoSource: Send + Sync {
    /// Every output currently spendable by `address`, in no particular order.
    async fn fetch_spendable_outputs(&self, address: &Address) -> Result<Vec<SpendableOutput>>;
}

/// Largest-first working set: drops outputs below `min_viable_value`, orders by
/// value descending (outpoint breaks ties) and keeps at most `limit`.
pub fn select_candidates(
    outputs: Vec<SpendableOutput>,
    min_viable_value: u64,
    limit: usize,
) -> Vec<SpendableOutput> {
    outputs
        .into_iter()
        .filter(|output| output.value > 0 && output.value >= min_viable_value)
        .sorted_by(|a, b| {
            b.value
                .cmp(&a.value)
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        })
        .take(limit)
        .collect()
}

/// Fetches the outputs of `address` and applies [`select_candidates`].
/// Source failures propagate unchanged.
pub async fn fetch_candidates<Source: UtxoSource + ?Sized>(
    source: &Source,
    address: &Address,
    min_viable_value: u64,
    limit: usize,
) -> Result<Vec<SpendableOutput>> {
    let outputs = source.fetch_spendable_outputs(address).await?;
    let fetched = outputs.len();
    let candidates = select_candidates(outputs, min_viable_value, limit);
    tracing::debug!(
        %address,
        fetched,
        selected = candidates.len(),
        min_viable_value,
        limit,
        "Selected candidate outputs"
    );
    Ok(candidates)
}
