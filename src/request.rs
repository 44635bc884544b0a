use crate::fee::mint_fee;
use bitcoin::{Address, ScriptBuf};

/// Default number of inputs merged by one consolidation transaction.
pub const DEFAULT_CONSOLIDATION_CAP: usize = 300;
pub const DEFAULT_DUST_THRESHOLD: u64 = 1_000;

/// Immutable parameters of one minting round. The fee rate is snapshotted
/// before selection and used unchanged for building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Funding address; change and consolidated outputs return here.
    pub source: Address,
    /// Receiver of the dust output carrying the minted tokens. `None` sends it to `source`.
    pub destination: Option<ScriptBuf>,
    /// Zero-value issuance output, opaque to the builder.
    pub marker: ScriptBuf,
    pub batch_size: usize,
    pub consolidation_cap: usize,
    /// sat/vB
    pub fee_rate: u64,
    pub dust_threshold: u64,
}

impl MintRequest {
    /// Smallest output that can fund a mint transaction at this fee rate.
    pub fn min_viable_value(&self) -> u64 {
        mint_fee(self.fee_rate) + self.dust_threshold
    }

    pub fn destination_script(&self) -> ScriptBuf {
        self.destination
            .clone()
            .unwrap_or_else(|| self.source.script_pubkey())
    }
}
