use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::utils::http::get_http_client;

/// Decimal places of the token tracked by the indexer (6-decimal fixed
/// point, USDC-style).
const TOKEN_DECIMALS_DIVISOR: f64 = 1_000_000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct TransferLog {
    #[serde(default)]
    pub topic1: Option<String>,
    #[serde(default)]
    pub topic2: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionDetails {
    #[serde(default)]
    pub logs: Vec<TransferLog>,
    #[serde(default)]
    pub receipt_status: Value,
}

impl TransactionDetails {
    pub fn is_successful(&self) -> bool {
        match &self.receipt_status {
            Value::String(status) => status == "1" || status.eq_ignore_ascii_case("success"),
            Value::Number(status) => status.as_i64() == Some(1),
            _ => false,
        }
    }

    /// Recipient of the transfer, from the first transfer log.
    pub fn destination(&self) -> Option<&str> {
        self.logs
            .first()
            .and_then(|log| log.topic2.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Transferred value, minor-unit-normalized.
    pub fn transfer_amount(&self) -> Option<f64> {
        let data = self.logs.first().and_then(|log| log.data.as_deref())?;
        parse_token_amount(data)
    }
}

/// The indexer reports raw transfer values either as 0x-hex or decimal.
pub fn parse_token_amount(data: &str) -> Option<f64> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }

    let raw = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u128::from_str_radix(hex, 16).ok()? as f64
    } else {
        trimmed.parse::<f64>().ok()?
    };

    Some(raw / TOKEN_DECIMALS_DIVISOR)
}

/// Point lookup against the chain-indexing API. `Ok(None)` means the
/// indexer answered but knows no such transaction.
pub async fn fetch_transaction(tx_hash: &str) -> Result<Option<TransactionDetails>> {
    let base = CONFIG.indexer_base_url.trim_end_matches('/');
    if base.is_empty() {
        return Err(anyhow!("INDEXER_BASE_URL is not configured"));
    }

    let url = format!("{base}/transaction/{tx_hash}");
    debug!("Fetching transaction details from {url}");

    let mut request = get_http_client().get(&url);
    if !CONFIG.indexer_api_key.trim().is_empty() {
        request = request.query(&[("apikey", CONFIG.indexer_api_key.as_str())]);
    }

    let response = request.send().await?;
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("Indexer lookup for {tx_hash} failed with status {status}: {body}");
        return Err(anyhow!("Indexer returned status {status}"));
    }

    let details = response.json::<TransactionDetails>().await?;
    if details.logs.is_empty() && details.receipt_status.is_null() {
        // Some indexers answer 200 with an empty body for unknown hashes.
        return Ok(None);
    }
    Ok(Some(details))
}
