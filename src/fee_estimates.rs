use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Snapshot of a fee-estimates endpoint: confirmation target (blocks) to sat/vB.
pub type FeeEstimates = BTreeMap<u32, f64>;

#[async_trait]
pub trait FeeRateSource: Send + Sync {
    async fn fee_estimates(&self) -> Result<FeeEstimates>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeePolicy {
    /// Rate used when no target is set or the estimator is unavailable.
    pub static_rate: u64,
    pub confirmation_target: Option<u32>,
    pub buffer_percent: u64,
}

/// Estimate for `target`, or for the nearest available target. Ties go to the
/// faster (smaller) target.
pub fn closest_target(estimates: &FeeEstimates, target: u32) -> Option<(u32, f64)> {
    if let Some(rate) = estimates.get(&target) {
        return Some((target, *rate));
    }
    estimates
        .iter()
        .min_by_key(|(key, _)| key.abs_diff(target))
        .map(|(key, rate)| (*key, *rate))
}

pub fn buffered_rate(rate: f64, buffer_percent: u64) -> u64 {
    let scaled = rate * (100 + buffer_percent) as f64 / 100.0;
    if scaled.is_finite() && scaled > 0.0 {
        scaled.ceil() as u64
    } else {
        0
    }
}

/// Fee rate for one round. Estimator failures fall back to the static rate.
pub async fn resolve_fee_rate<Source: FeeRateSource + ?Sized>(
    source: &Source,
    policy: &FeePolicy,
) -> u64 {
    let target = match policy.confirmation_target {
        None => return policy.static_rate,
        Some(target) => target,
    };

    let estimates = match source.fee_estimates().await {
        Ok(estimates) => estimates,
        Err(err) => {
            tracing::warn!(
                error = %err,
                fallback = policy.static_rate,
                "Fee estimates unavailable, using static fee rate"
            );
            return policy.static_rate;
        }
    };

    match closest_target(&estimates, target) {
        Some((used_target, rate)) => {
            let buffered = buffered_rate(rate, policy.buffer_percent);
            if buffered == 0 {
                tracing::warn!(
                    used_target,
                    rate,
                    fallback = policy.static_rate,
                    "Fee estimate is not a positive rate, using static fee rate"
                );
                return policy.static_rate;
            }
            tracing::debug!(
                requested_target = target,
                used_target,
                rate,
                buffered,
                "Resolved fee rate"
            );
            buffered
        }
        None => {
            tracing::warn!(
                fallback = policy.static_rate,
                "Fee estimates were empty, using static fee rate"
            );
            policy.static_rate
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{MintError, Result};
    use crate::fee_estimates::{
        buffered_rate, closest_target, resolve_fee_rate, FeeEstimates, FeePolicy, FeeRateSource,
    };
    use async_trait::async_trait;

    struct FixedEstimates(Option<FeeEstimates>);

    #[async_trait]
    impl FeeRateSource for FixedEstimates {
        async fn fee_estimates(&self) -> Result<FeeEstimates> {
            self.0
                .clone()
                .ok_or_else(|| MintError::Network("connection refused".to_string()))
        }
    }

    fn estimates() -> FeeEstimates {
        [(1, 20.0), (2, 15.5), (6, 8.0), (144, 1.0)]
            .into_iter()
            .collect()
    }

    fn policy(target: Option<u32>) -> FeePolicy {
        FeePolicy {
            static_rate: 2,
            confirmation_target: target,
            buffer_percent: 30,
        }
    }

    #[test]
    fn exact_target_wins() {
        assert_eq!(closest_target(&estimates(), 6), Some((6, 8.0)));
    }

    #[test]
    fn nearest_target_is_used() {
        assert_eq!(closest_target(&estimates(), 5), Some((6, 8.0)));
        assert_eq!(closest_target(&estimates(), 100), Some((144, 1.0)));
        assert_eq!(closest_target(&estimates(), 0), Some((1, 20.0)));
    }

    #[test]
    fn tie_prefers_smaller_target() {
        // 4 is two away from both 2 and 6
        assert_eq!(closest_target(&estimates(), 4), Some((2, 15.5)));
    }

    #[test]
    fn empty_estimates_have_no_target() {
        assert_eq!(closest_target(&FeeEstimates::new(), 3), None);
    }

    #[test]
    fn buffer_rounds_up() {
        assert_eq!(buffered_rate(10.0, 30), 13);
        assert_eq!(buffered_rate(1.0, 30), 2);
        assert_eq!(buffered_rate(15.5, 0), 16);
        assert_eq!(buffered_rate(f64::NAN, 30), 0);
    }

    #[tokio::test]
    async fn static_rate_without_target() {
        let source = FixedEstimates(Some(estimates()));
        assert_eq!(resolve_fee_rate(&source, &policy(None)).await, 2);
    }

    #[tokio::test]
    async fn estimated_rate_is_buffered() {
        let source = FixedEstimates(Some(estimates()));
        assert_eq!(resolve_fee_rate(&source, &policy(Some(6))).await, 11);
    }

    #[tokio::test]
    async fn estimator_failure_falls_back() {
        let source = FixedEstimates(None);
        assert_eq!(resolve_fee_rate(&source, &policy(Some(3))).await, 2);
        let empty = FixedEstimates(Some(FeeEstimates::new()));
        assert_eq!(resolve_fee_rate(&empty, &policy(Some(3))).await, 2);
    }

    #[tokio::test]
    async fn unusable_estimate_falls_back() {
        for rate in [0.0, -4.0, f64::NAN] {
            let source = FixedEstimates(Some([(6, rate)].into_iter().collect()));
            assert_eq!(resolve_fee_rate(&source, &policy(Some(6))).await, 2);
        }
    }
}
