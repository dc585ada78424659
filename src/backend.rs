//! Backend HTTP JSON API.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::agent::Signature;
use crate::chain::ChainInfo;
use crate::challenge::Nonce;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::multisig::MultisigListResponse;

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Issue a fresh nonce for `(chain_id, address)`.
    async fn get_nonce(&self, chain_id: &str, address: &str) -> Result<Nonce, BackendError>;

    /// List multisigs visible to the signer of `signature`.
    async fn list_multisigs(
        &self,
        chain: &ChainInfo,
        signature: &Signature,
    ) -> Result<MultisigListResponse, BackendError>;
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: String,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    signature: &'a Signature,
    chain: &'a ChainInfo,
}

/// `BackendApi` over reqwest.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<T, BackendError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");
        if let Some(payload) = payload {
            request = request.json(&payload);
        }

        let response = request.send().await.map_err(|e| BackendError::Transport {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| BackendError::Transport {
            path: path.to_string(),
            reason: format!("response read failed: {e}"),
        })?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|value| value.get("error").and_then(|v| v.as_str()).map(String::from))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).trim().to_string());
            return Err(BackendError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn get_nonce(&self, chain_id: &str, address: &str) -> Result<Nonce, BackendError> {
        let path = format!(
            "chain/{}/nonce/{}",
            urlencoding::encode(chain_id),
            urlencoding::encode(address)
        );
        let response: NonceResponse = self.request_json(Method::GET, &path, None).await?;
        if response.nonce.trim().is_empty() {
            return Err(BackendError::Decode {
                path,
                reason: "empty nonce".to_string(),
            });
        }
        Ok(Nonce::new(response.nonce))
    }

    async fn list_multisigs(
        &self,
        chain: &ChainInfo,
        signature: &Signature,
    ) -> Result<MultisigListResponse, BackendError> {
        let path = format!("chain/{}/multisig/list", urlencoding::encode(&chain.chain_id));
        let payload = serde_json::to_value(ListRequest { signature, chain }).map_err(|e| {
            BackendError::Decode {
                path: path.clone(),
                reason: format!("failed to encode request: {e}"),
            }
        })?;
        self.request_json(Method::POST, &path, Some(payload)).await
    }
}
