//! On-chain account resolution.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::NodeError;

/// Canonical on-chain identity of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountId {
    pub address: String,
    pub account_number: Option<u64>,
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// `Ok(None)` when the account has never appeared on-chain.
    async fn resolve_account(
        &self,
        node_address: &str,
        address: &str,
    ) -> Result<Option<AccountId>, NodeError>;
}

/// Resolves accounts through the Cosmos SDK REST (LCD) auth module.
pub struct RestNodeClient {
    client: Client,
}

impl RestNodeClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl NodeClient for RestNodeClient {
    async fn resolve_account(
        &self,
        node_address: &str,
        address: &str,
    ) -> Result<Option<AccountId>, NodeError> {
        let url = format!(
            "{}/cosmos/auth/v1beta1/accounts/{}",
            node_address.trim_end_matches('/'),
            urlencoding::encode(address)
        );
        tracing::debug!(%url, "Resolving account");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| NodeError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| NodeError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let parsed = serde_json::from_slice::<serde_json::Value>(&body).ok();

        if status == reqwest::StatusCode::NOT_FOUND || is_not_found_body(parsed.as_ref()) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(NodeError::Status {
                url,
                status: status.as_u16(),
                detail: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        let value = parsed.ok_or_else(|| NodeError::Decode {
            url: url.clone(),
            reason: "body is not JSON".to_string(),
        })?;
        account_from_value(&value)
            .map(Some)
            .ok_or_else(|| NodeError::Decode {
                url,
                reason: "no account address in response".to_string(),
            })
    }
}

// gRPC-gateway reports a missing account as code 5 (NotFound), sometimes
// with a non-404 HTTP status depending on the node version.
fn is_not_found_body(value: Option<&serde_json::Value>) -> bool {
    value
        .and_then(|v| v.get("code"))
        .and_then(|code| code.as_u64())
        == Some(5)
}

/// Extract address and account number from base, vesting, or module
/// account shapes.
fn account_from_value(value: &serde_json::Value) -> Option<AccountId> {
    const BASE_PATHS: &[&str] = &[
        "/account",
        "/account/base_account",
        "/account/base_vesting_account/base_account",
    ];

    BASE_PATHS.iter().find_map(|path| {
        let base = value.pointer(path)?;
        let address = base.get("address")?.as_str()?.trim();
        if address.is_empty() {
            return None;
        }
        let account_number = base
            .get("account_number")
            .and_then(|n| n.as_str().and_then(|s| s.parse().ok()).or_else(|| n.as_u64()));
        Some(AccountId {
            address: address.to_string(),
            account_number,
        })
    })
}
