//! Etherscan REST client (api.etherscan.io).

use anyhow::{bail, Context, Result};
use format_url::FormatUrl;
use serde::Deserialize;
use serde_json::Value;

const ETHERSCAN_API: &str = "https://api.etherscan.io/api";

#[derive(Debug, Deserialize)]
struct EtherscanEnvelope {
    status: String,
    message: String,
    result: Value,
}

pub struct EtherscanClient {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
}

/// One row from the `account/txlist` endpoint. Etherscan serializes every
/// numeric field as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransaction {
    pub block_number: String,
    pub time_stamp: String,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas_used: String,
    pub is_error: String,
}

impl EtherscanClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::new_with_url(ETHERSCAN_API, api_key)
    }

    pub fn new_with_url(server_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Raw module/action query, returning the envelope `result` untyped.
    pub async fn query(
        &self,
        module: &str,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<Value> {
        let mut query_params = vec![
            ("module", module),
            ("action", action),
            ("apikey", self.api_key.as_str()),
        ];
        query_params.extend_from_slice(params);
        let url = FormatUrl::new(&self.server_url)
            .with_query_params(query_params)
            .format_url();

        let envelope = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<EtherscanEnvelope>()
            .await?;

        // Status "0" covers both real errors and legitimately empty result
        // sets ("No transactions found").
        if envelope.status != "1" && !envelope.message.starts_with("No transactions") {
            bail!("etherscan {module}/{action} failed: {}", envelope.message);
        }
        Ok(envelope.result)
    }

    /// Normal transactions for an address, one page of `offset` rows.
    pub async fn get_transactions(
        &self,
        address: &str,
        page: u64,
        offset: u64,
    ) -> Result<Vec<AccountTransaction>> {
        let page = page.to_string();
        let offset = offset.to_string();
        let result = self
            .query(
                "account",
                "txlist",
                &[
                    ("address", address),
                    ("page", &page),
                    ("offset", &offset),
                    ("sort", "asc"),
                ],
            )
            .await?;
        if result.is_string() {
            // "No transactions found" responses carry a string result.
            return Ok(Vec::new());
        }
        serde_json::from_value(result).context("unexpected txlist result shape")
    }
}
