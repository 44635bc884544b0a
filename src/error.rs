use bitcoin::OutPoint;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MintError>;

/// Errors that abort a minting round.
///
/// Broadcast-time failures of a single transaction are not errors here: they are
/// classified into a terminal outcome by the broadcast engine and tallied.
#[derive(Error, Debug)]
pub enum MintError {
    /// Missing or malformed configuration (key, address, rune id, sizes).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The spendable output source could not be reached or returned garbage.
    #[error("network error: {0}")]
    Network(String),

    #[error("no spendable outputs found for {address}")]
    NoSpendableOutputs { address: String },

    /// Consolidation cannot pay its own fee.
    #[error("insufficient funds: available {available} sat, required {required} sat (short by {shortfall})")]
    InsufficientFunds {
        available: u64,
        required: u64,
        shortfall: u64,
    },

    /// A candidate passed selection but cannot pay for the mint shape at the run's fee rate.
    #[error("candidate {outpoint} holds {value} sat but a mint requires {required} sat")]
    UnderfundedCandidate {
        outpoint: OutPoint,
        value: u64,
        required: u64,
    },

    #[error("signing failed for input {index}: {reason}")]
    Signing { index: usize, reason: String },

    #[error("cannot encode issuance marker: {0}")]
    Marker(String),

    #[error("run cancelled")]
    Cancelled,
}

impl MintError {
    pub fn insufficient_funds(available: u64, required: u64) -> Self {
        MintError::InsufficientFunds {
            available,
            required,
            shortfall: required.saturating_sub(available),
        }
    }

    /// Whether the scheduler may continue with a fresh round after this error.
    pub fn is_round_local(&self) -> bool {
        matches!(self, MintError::Network(_))
    }
}

impl From<reqwest::Error> for MintError {
    fn from(err: reqwest::Error) -> Self {
        MintError::Network(err.to_string())
    }
}
