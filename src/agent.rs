//! External signing agent surface (browser wallet extension or equivalent).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};
use tokio::sync::broadcast;

use crate::challenge::StdSignDoc;
use crate::error::AgentError;

/// Signing preferences pushed to the agent when a session connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOptions {
    pub prefer_no_set_fee: bool,
    pub prefer_no_set_memo: bool,
    pub disable_balance_check: bool,
}

impl SignOptions {
    /// Fixed session defaults. Not user-configurable.
    pub const SESSION_DEFAULTS: Self = Self {
        prefer_no_set_fee: true,
        prefer_no_set_memo: true,
        disable_balance_check: true,
    };
}

/// Key material reported by the agent for the enabled chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentKey {
    pub bech32_address: String,
    pub pub_key: Vec<u8>,
}

/// Opaque signature token returned by the agent.
///
/// Passed to the backend unmodified. Redacted in `Debug` output.
#[derive(Debug, Clone)]
pub struct Signature(SecretString);

impl Signature {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

/// Fired by the agent whenever its active account changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeystoreChanged;

#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Ask the user to allow this application to use `chain_id`.
    async fn enable(&self, chain_id: &str) -> Result<(), AgentError>;

    fn set_default_options(&self, options: SignOptions);

    async fn get_key(&self, chain_id: &str) -> Result<AgentKey, AgentError>;

    async fn sign_amino(
        &self,
        chain_id: &str,
        signer: &str,
        doc: &StdSignDoc,
    ) -> Result<Signature, AgentError>;

    /// New receiver for account-change notifications.
    ///
    /// Dropping the receiver deregisters it.
    fn keystore_events(&self) -> broadcast::Receiver<KeystoreChanged>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_debug_is_redacted() {
        let sig = Signature::new("very-secret-signature");
        let debug = format!("{sig:?}");
        assert!(!debug.contains("very-secret-signature"));
        assert_eq!(sig.expose(), "very-secret-signature");
    }

    #[test]
    fn signature_serializes_as_plain_string() {
        let sig = Signature::new("abc");
        assert_eq!(serde_json::to_string(&sig).unwrap(), r#""abc""#);
    }

    #[test]
    fn session_defaults_disable_fee_memo_and_balance_prompts() {
        let value = serde_json::to_value(SignOptions::SESSION_DEFAULTS).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "preferNoSetFee": true,
                "preferNoSetMemo": true,
                "disableBalanceCheck": true
            })
        );
    }
}
