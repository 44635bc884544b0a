//! Batch transaction construction.
//!
//! A round either mints (one single-input transaction per candidate) or, when
//! too few candidates are funded, consolidates the largest ones into a single
//! transaction with `batch_size` equal outputs for a later mint round. The mode
//! is decided once from the fetched candidate count and never mixed.

use crate::error::{MintError, Result};
use crate::fee::{calculate_fee, mint_fee};
use crate::request::MintRequest;
use crate::signer::{BuiltTransaction, TransactionSigner};
use crate::utxo::SpendableOutput;
use bitcoin::{Amount, TxOut};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// One mint transaction per candidate.
    Mint(Vec<SpendableOutput>),
    /// All candidates merged into `batch_size` equal outputs.
    Consolidate(Vec<SpendableOutput>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Mint,
    Consolidate,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Mint => write!(f, "mint"),
            BatchMode::Consolidate => write!(f, "consolidate"),
        }
    }
}

impl BatchPlan {
    pub fn mode(&self) -> BatchMode {
        match self {
            BatchPlan::Mint(_) => BatchMode::Mint,
            BatchPlan::Consolidate(_) => BatchMode::Consolidate,
        }
    }

    pub fn inputs(&self) -> &[SpendableOutput] {
        match self {
            BatchPlan::Mint(inputs) | BatchPlan::Consolidate(inputs) => inputs,
        }
    }
}

/// Picks the mode from the candidates actually fetched, largest first.
pub fn plan_batch(mut candidates: Vec<SpendableOutput>, request: &MintRequest) -> BatchPlan {
    if request.batch_size > 0 && candidates.len() >= request.batch_size {
        candidates.truncate(request.batch_size);
        BatchPlan::Mint(candidates)
    } else {
        candidates.truncate(request.consolidation_cap);
        BatchPlan::Consolidate(candidates)
    }
}

/// Builds and signs every transaction of `plan`. Any failure aborts the whole
/// batch; nothing partial is returned.
pub fn build_batch<Signer: TransactionSigner + ?Sized>(
    plan: &BatchPlan,
    request: &MintRequest,
    signer: &Signer,
) -> Result<Vec<BuiltTransaction>> {
    match plan {
        BatchPlan::Mint(candidates) => candidates
            .iter()
            .map(|candidate| build_mint(candidate, request, signer))
            .collect(),
        BatchPlan::Consolidate(candidates) => {
            Ok(vec![build_consolidation(candidates, request, signer)?])
        }
    }
}

/// Marker, destination dust and change, in that order.
pub fn build_mint<Signer: TransactionSigner + ?Sized>(
    candidate: &SpendableOutput,
    request: &MintRequest,
    signer: &Signer,
) -> Result<BuiltTransaction> {
    let fee = mint_fee(request.fee_rate);
    let required = fee + request.dust_threshold;
    let change = candidate
        .value
        .checked_sub(required)
        .ok_or(MintError::UnderfundedCandidate {
            outpoint: candidate.outpoint,
            value: candidate.value,
            required,
        })?;

    let outputs = vec![
        TxOut {
            value: Amount::ZERO,
            script_pubkey: request.marker.clone(),
        },
        TxOut {
            value: Amount::from_sat(request.dust_threshold),
            script_pubkey: request.destination_script(),
        },
        TxOut {
            value: Amount::from_sat(change),
            script_pubkey: signer.script_pubkey(),
        },
    ];

    signer.sign_and_finalize(std::slice::from_ref(candidate), outputs)
}

pub fn build_consolidation<Signer: TransactionSigner + ?Sized>(
    candidates: &[SpendableOutput],
    request: &MintRequest,
    signer: &Signer,
) -> Result<BuiltTransaction> {
    if request.batch_size == 0 {
        return Err(MintError::Configuration(
            "batch size must be positive".to_string(),
        ));
    }

    let available: u64 = candidates.iter().map(|candidate| candidate.value).sum();
    let fee = calculate_fee(
        candidates.len() as u64,
        request.batch_size as u64,
        request.fee_rate,
    );
    if candidates.is_empty() || available < fee {
        return Err(MintError::insufficient_funds(available, fee));
    }

    let value = (available - fee) / request.batch_size as u64;
    if value < request.min_viable_value() {
        tracing::warn!(
            value,
            min_viable = request.min_viable_value(),
            outputs = request.batch_size,
            "Consolidated outputs will be too small to mint from"
        );
    }
    let script_pubkey = signer.script_pubkey();
    let outputs = (0..request.batch_size)
        .map(|_| TxOut {
            value: Amount::from_sat(value),
            script_pubkey: script_pubkey.clone(),
        })
        .collect();

    signer.sign_and_finalize(candidates, outputs)
}

#[cfg(test)]
mod tests {
    use crate::builder::{build_batch, plan_batch, BatchMode, BatchPlan};
    use crate::error::MintError;
    use crate::fee::{calculate_fee, mint_fee};
    use crate::request::tests::test_request;
    use crate::signer::tests::{test_signer, FailingSigner};
    use crate::signer::TransactionSigner;
    use crate::utxo::tests::generate_output;
    use crate::utxo::SpendableOutput;
    use bitcoin::{Amount, ScriptBuf};
    use itertools::Itertools;

    fn outputs(values: &[u64]) -> Vec<SpendableOutput> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| generate_output(index as u32, *value))
            .collect()
    }

    #[test]
    fn enough_candidates_selects_mint() {
        let request = test_request(5, 10);
        let plan = plan_batch(outputs(&[9_000; 5]), &request);
        assert_eq!(plan.mode(), BatchMode::Mint);

        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        assert_eq!(built.len(), 5);
        assert!(built.iter().all(|tx| tx.transaction.input.len() == 1));
    }

    #[test]
    fn mint_is_capped_at_batch_size() {
        let request = test_request(5, 10);
        let plan = plan_batch(outputs(&[9_000; 8]), &request);
        assert_eq!(plan.inputs().len(), 5);
        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        assert_eq!(built.len(), 5);
    }

    #[test]
    fn few_candidates_selects_consolidation() {
        let request = test_request(5, 10);
        let plan = plan_batch(outputs(&[20_000, 15_000, 10_000]), &request);
        assert_eq!(plan.mode(), BatchMode::Consolidate);

        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].transaction.input.len(), 3);
        assert_eq!(built[0].transaction.output.len(), 5);
    }

    #[test]
    fn consolidation_respects_cap() {
        let mut request = test_request(10, 1);
        request.consolidation_cap = 4;
        let plan = plan_batch(outputs(&[50_000; 7]), &request);
        match &plan {
            BatchPlan::Consolidate(inputs) => assert_eq!(inputs.len(), 4),
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn mint_outputs_balance_exactly() {
        let request = test_request(3, 7);
        let signer = test_signer();
        let plan = plan_batch(outputs(&[100_000, 25_000, 4_000]), &request);
        let built = build_batch(&plan, &request, &signer).unwrap();

        for tx in built.iter() {
            assert_eq!(tx.output_value() + mint_fee(7), tx.input_value);
            let outs = &tx.transaction.output;
            assert_eq!(outs.len(), 3);
            assert_eq!(outs[0].value, Amount::ZERO);
            assert_eq!(outs[0].script_pubkey, request.marker);
            assert_eq!(outs[1].value, Amount::from_sat(1_000));
            assert_eq!(outs[1].script_pubkey, signer.script_pubkey());
            assert_eq!(outs[2].script_pubkey, signer.script_pubkey());
        }
    }

    #[test]
    fn mint_pays_configured_destination() {
        let mut request = test_request(1, 2);
        let destination = ScriptBuf::from_bytes(vec![0x51]);
        request.destination = Some(destination.clone());
        let plan = plan_batch(outputs(&[10_000]), &request);
        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        assert_eq!(built[0].transaction.output[1].script_pubkey, destination);
    }

    #[test]
    fn underfunded_mint_candidate_fails_loudly() {
        let request = test_request(2, 10);
        let plan = BatchPlan::Mint(outputs(&[50_000, request.min_viable_value() - 1]));
        let result = build_batch(&plan, &request, &test_signer());
        match result {
            Err(MintError::UnderfundedCandidate {
                value, required, ..
            }) => {
                assert_eq!(value, 2_709);
                assert_eq!(required, 2_710);
            }
            other => panic!("unexpected result {:?}", other.map(|txs| txs.len())),
        }
    }

    #[test]
    fn signing_failure_aborts_whole_batch() {
        let request = test_request(5, 10);
        let plan = plan_batch(outputs(&[9_000; 5]), &request);
        assert_eq!(plan.mode(), BatchMode::Mint);
        match build_batch(&plan, &request, &FailingSigner::new(3)) {
            Err(MintError::Signing { index, .. }) => assert_eq!(index, 0),
            other => panic!("unexpected result {:?}", other.map(|txs| txs.len())),
        }
    }

    #[test]
    fn exactly_funded_candidate_leaves_zero_change() {
        let request = test_request(1, 10);
        let plan = BatchPlan::Mint(outputs(&[request.min_viable_value()]));
        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        assert_eq!(built[0].transaction.output[2].value, Amount::ZERO);
    }

    #[test]
    fn consolidation_outputs_are_equal_and_covered() {
        let request = test_request(5, 3);
        let inputs = outputs(&[40_001, 13_337, 9_999]);
        let total: u64 = inputs.iter().map(|input| input.value).sum();
        let plan = plan_batch(inputs, &request);
        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        let tx = &built[0];

        let fee = calculate_fee(3, 5, 3);
        assert!(tx.output_value() + fee <= total);
        assert!(tx
            .transaction
            .output
            .iter()
            .map(|output| output.value)
            .all_equal());
        assert_eq!(
            tx.transaction.output[0].value.to_sat(),
            (total - fee) / 5
        );
        assert!(tx
            .transaction
            .output
            .iter()
            .all(|output| output.script_pubkey == test_signer().script_pubkey()));
    }

    #[test]
    fn small_consolidation_still_builds() {
        let request = test_request(5, 2);
        let inputs = outputs(&[3_000, 2_000]);
        let fee = calculate_fee(2, 5, 2);
        let plan = plan_batch(inputs, &request);
        let built = build_batch(&plan, &request, &test_signer()).unwrap();
        let value = built[0].transaction.output[0].value.to_sat();
        assert_eq!(value, (5_000 - fee) / 5);
        assert!(value < request.min_viable_value());
    }

    #[test]
    fn consolidation_without_funds_builds_nothing() {
        let request = test_request(5, 50);
        let fee = calculate_fee(2, 5, 50);
        let plan = BatchPlan::Consolidate(outputs(&[100, 200]));
        match build_batch(&plan, &request, &test_signer()) {
            Err(MintError::InsufficientFunds {
                available,
                required,
                shortfall,
            }) => {
                assert_eq!(available, 300);
                assert_eq!(required, fee);
                assert_eq!(shortfall, fee - 300);
            }
            other => panic!("unexpected result {:?}", other.map(|txs| txs.len())),
        }
    }

    #[test]
    fn no_candidates_is_insufficient() {
        let request = test_request(5, 0);
        let plan = plan_batch(vec![], &request);
        assert_eq!(plan.mode(), BatchMode::Consolidate);
        assert!(matches!(
            build_batch(&plan, &request, &test_signer()),
            Err(MintError::InsufficientFunds { available: 0, .. })
        ));
    }
}
