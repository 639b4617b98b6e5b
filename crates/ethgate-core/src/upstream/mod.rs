//! Thin JSON-RPC client for the fronted Ethereum node.
//!
//! The gateway does not interpret chain data beyond the handful of read-only
//! helpers below; everything else goes through [`EthClient::raw`] untouched.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed upstream response: {0}")]
    InvalidResponse(String),
}

/// JSON-RPC 2.0 client over HTTP.
pub struct EthClient {
    client: reqwest::Client,
    url: String,
}

impl EthClient {
    /// Builds a client for `url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Http`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.to_string() })
    }

    /// Calls a JSON-RPC method and returns its `result`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Rpc`] for an error response from the node,
    /// [`UpstreamError::InvalidResponse`] for a response with neither
    /// `result` nor `error`, and [`UpstreamError::Http`] for transport
    /// failures.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let body = self.raw(payload).await?;

        if let Some(error) = body.get("error") {
            return Err(UpstreamError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown upstream error")
                    .to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| UpstreamError::InvalidResponse("missing result field".to_string()))
    }

    /// Forwards a caller-supplied JSON-RPC payload verbatim and returns the
    /// node's response body, errors included. Used by the raw proxy route.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Http`] for transport failures.
    pub async fn raw(&self, payload: Value) -> Result<Value, UpstreamError> {
        let response = self.client.post(&self.url).json(&payload).send().await?;
        Ok(response.json().await?)
    }

    /// Current chain head height via `eth_blockNumber`.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::call`] errors; also fails when the node returns a
    /// non-hex quantity.
    pub async fn block_number(&self) -> Result<u64, UpstreamError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_quantity(&result)
    }

    /// Current gas price in wei via `eth_gasPrice`.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::call`] errors; also fails when the node returns a
    /// non-hex quantity.
    pub async fn gas_price(&self) -> Result<u128, UpstreamError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_hex_quantity_u128(&result)
    }
}

fn hex_str(value: &Value) -> Result<&str, UpstreamError> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix("0x"))
        .ok_or_else(|| UpstreamError::InvalidResponse(format!("expected hex quantity, got {value}")))
}

fn parse_hex_quantity(value: &Value) -> Result<u64, UpstreamError> {
    let hex = hex_str(value)?;
    u64::from_str_radix(hex, 16)
        .map_err(|e| UpstreamError::InvalidResponse(format!("bad hex quantity: {e}")))
}

fn parse_hex_quantity_u128(value: &Value) -> Result<u128, UpstreamError> {
    let hex = hex_str(value)?;
    u128::from_str_radix(hex, 16)
        .map_err(|e| UpstreamError::InvalidResponse(format!("bad hex quantity: {e}")))
}
