//! Esplora/electrs REST client.
//!
//! Covers the three endpoints a minting round needs: address UTXOs, fee
//! estimates and raw transaction submission.

use crate::broadcast::{Broadcaster, SubmitResponse};
use crate::error::{MintError, Result};
use crate::fee_estimates::{FeeEstimates, FeeRateSource};
use crate::utxo::{SpendableOutput, UtxoSource};
use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{Address, OutPoint, Txid};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct EsploraUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
}

impl From<EsploraUtxo> for SpendableOutput {
    fn from(utxo: EsploraUtxo) -> Self {
        SpendableOutput::new(OutPoint::new(utxo.txid, utxo.vout), utxo.value)
    }
}

#[derive(Clone)]
pub struct EsploraClient {
    client: Client,
    endpoint: String,
}

impl EsploraClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP Client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, api: impl fmt::Display) -> String {
        format!("{}/{api}", self.endpoint)
    }
}

/// Esplora reports targets as string keys; non-numeric keys are dropped.
pub fn parse_fee_estimates(body: &str) -> Result<FeeEstimates> {
    let raw: HashMap<String, f64> = serde_json::from_str(body)
        .map_err(|err| MintError::Network(format!("malformed fee estimates: {err}")))?;
    Ok(raw
        .into_iter()
        .filter_map(|(target, rate)| target.parse::<u32>().ok().map(|target| (target, rate)))
        .collect())
}

#[async_trait]
impl UtxoSource for EsploraClient {
    async fn fetch_spendable_outputs(&self, address: &Address) -> Result<Vec<SpendableOutput>> {
        let response = self
            .client
            .get(self.url(format!("address/{address}/utxo")))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let utxos: Vec<EsploraUtxo> = response.json().await?;
                Ok(utxos.into_iter().map(SpendableOutput::from).collect())
            }
            code => Err(MintError::Network(format!(
                "utxo lookup for {address} returned {code}"
            ))),
        }
    }
}

#[async_trait]
impl FeeRateSource for EsploraClient {
    async fn fee_estimates(&self) -> Result<FeeEstimates> {
        let response = self.client.get(self.url("fee-estimates")).send().await?;
        match response.status() {
            StatusCode::OK => parse_fee_estimates(&response.text().await?),
            code => Err(MintError::Network(format!(
                "fee estimates returned {code}"
            ))),
        }
    }
}

#[async_trait]
impl Broadcaster for EsploraClient {
    #[tracing::instrument(skip(self, tx_hex), fields(len = tx_hex.len()))]
    async fn submit(&self, tx_hex: &str) -> anyhow::Result<SubmitResponse> {
        let response = self
            .client
            .post(self.url("tx"))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(tx_hex.to_string())
            .send()
            .await
            .context("Failed to submit transaction")?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .context("Failed to read submission response")?;
        tracing::debug!(status, body = %body, "Submission response");
        Ok(SubmitResponse { status, body })
    }
}
