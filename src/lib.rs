//! Bulk rune minting over an esplora backend.
//!
//! A round selects the largest spendable outputs of the signing key, builds
//! either one mint transaction per output or a single consolidation, and
//! broadcasts them sequentially with bounded retries.

pub mod broadcast;
pub mod builder;
pub mod config;
pub mod driver;
pub mod error;
pub mod esplora;
pub mod fee;
pub mod fee_estimates;
pub mod request;
pub mod runestone;
pub mod signer;
pub mod utxo;

pub use driver::{Minter, RoundSettings, RunTally};
pub use error::{MintError, Result};
pub use request::MintRequest;
