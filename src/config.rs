use crate::broadcast::RetryPolicy;
use crate::driver::RoundSettings;
use crate::error::{MintError, Result};
use crate::fee_estimates::FeePolicy;
use crate::request::{MintRequest, DEFAULT_CONSOLIDATION_CAP, DEFAULT_DUST_THRESHOLD};
use crate::runestone::{RuneId, Runestone};
use crate::signer::P2wpkhSigner;
use anyhow::Context;
use bitcoin::{Address, Network};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const PRIVATE_KEY_ENV: &str = "MINTER_PRIVATE_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub esplora_url: String,
    pub network: Network,
    /// WIF. Falls back to `MINTER_PRIVATE_KEY`.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub destination_address: Option<String>,
    pub rune_id: RuneId,
    pub batch_size: usize,
    #[serde(default = "default_consolidation_cap")]
    pub consolidation_cap: usize,
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,
    pub fee: FeeConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub rounds: RoundsConfig,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeeConfig {
    pub rate: u64,
    #[serde(default)]
    pub confirmation_target: Option<u32>,
    #[serde(default = "default_buffer_percent")]
    pub buffer_percent: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoundsConfig {
    #[serde(default)]
    pub max_rounds: Option<u64>,
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_consolidation_cap() -> usize {
    DEFAULT_CONSOLIDATION_CAP
}

fn default_dust_threshold() -> u64 {
    DEFAULT_DUST_THRESHOLD
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

fn default_backoff_ms() -> u64 {
    RetryPolicy::default().backoff.as_millis() as u64
}

fn default_buffer_percent() -> u64 {
    30
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Cannot read config file {path}", path = path.display()))?;
        let config: Config = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse config file {path}", path = path.display()))?;
        Ok(config)
    }

    /// Key from the file, otherwise from the environment.
    pub fn signer(&self) -> Result<P2wpkhSigner> {
        let wif = match &self.private_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => std::env::var(PRIVATE_KEY_ENV).map_err(|_| {
                MintError::Configuration(format!(
                    "no private_key in config and {PRIVATE_KEY_ENV} is not set"
                ))
            })?,
        };
        P2wpkhSigner::from_wif(&wif, self.network)
    }

    pub fn destination(&self) -> Result<Option<Address>> {
        self.destination_address
            .as_deref()
            .map(|address| {
                Address::from_str(address)
                    .and_then(|address| address.require_network(self.network))
                    .map_err(|err| {
                        MintError::Configuration(format!(
                            "destination address `{address}` is invalid for {}: {err}",
                            self.network
                        ))
                    })
            })
            .transpose()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.broadcast.max_retries,
            backoff: Duration::from_millis(self.broadcast.backoff_ms),
        }
    }

    /// Validates everything needed before the first network call.
    pub fn round_settings(&self, signer: &P2wpkhSigner) -> Result<RoundSettings> {
        if self.batch_size == 0 {
            return Err(MintError::Configuration(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.consolidation_cap == 0 {
            return Err(MintError::Configuration(
                "consolidation_cap must be positive".to_string(),
            ));
        }

        let template = MintRequest {
            source: signer.address().clone(),
            destination: self.destination()?.map(|address| address.script_pubkey()),
            marker: Runestone::mint(self.rune_id, 1).encipher()?,
            batch_size: self.batch_size,
            consolidation_cap: self.consolidation_cap,
            fee_rate: self.fee.rate,
            dust_threshold: self.dust_threshold,
        };

        Ok(RoundSettings {
            template,
            fee_policy: FeePolicy {
                static_rate: self.fee.rate,
                confirmation_target: self.fee.confirmation_target,
                buffer_percent: self.fee.buffer_percent,
            },
            max_rounds: self.rounds.max_rounds,
            round_delay: Duration::from_millis(self.rounds.delay_ms),
        })
    }
}
