//! Linear weight model for P2WPKH spends.
//!
//! The constants are vbyte sizes scaled by 4: a 10 vbyte transaction header,
//! 68 vbytes per witness input and 31 vbytes per P2WPKH output. Other output or
//! address types need their own measured constants.

pub const BASE_TX_WEIGHT: u64 = 10 * 4;
pub const INPUT_WEIGHT: u64 = 68 * 4;
pub const OUTPUT_WEIGHT: u64 = 31 * 4;

/// Inputs and outputs of a mint transaction: one funding input, then marker,
/// destination and change outputs.
pub const MINT_SHAPE: (u64, u64) = (1, 3);

pub fn transaction_weight(input_count: u64, output_count: u64) -> u64 {
    let base = if input_count == 0 { 0 } else { BASE_TX_WEIGHT };
    base + input_count * INPUT_WEIGHT + output_count * OUTPUT_WEIGHT
}

/// Required fee in satoshis, `ceil(weight / 4 * fee_rate)`.
pub fn calculate_fee(input_count: u64, output_count: u64, fee_rate: u64) -> u64 {
    (transaction_weight(input_count, output_count) * fee_rate).div_ceil(4)
}

pub fn mint_fee(fee_rate: u64) -> u64 {
    let (inputs, outputs) = MINT_SHAPE;
    calculate_fee(inputs, outputs, fee_rate)
}
