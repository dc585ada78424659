//! Error types for the multisig discovery flow.

use serde::Serialize;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed input to the challenge builder.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("challenge field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("failed to encode challenge: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors surfaced by the external signing agent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// The user declined the request in the agent UI.
    #[error("request rejected by user: {0}")]
    Rejected(String),

    /// Agent missing, locked, or not initialised for the chain.
    #[error("signing agent unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the node client used to resolve accounts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeError {
    #[error("node request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("node {url} returned HTTP {status}: {detail}")]
    Status {
        url: String,
        status: u16,
        detail: String,
    },

    #[error("invalid account response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Errors from the backend HTTP JSON API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("request to {path} failed: {reason}")]
    Transport { path: String, reason: String },

    #[error("{path} returned HTTP {status}: {detail}")]
    Status {
        path: String,
        status: u16,
        detail: String,
    },

    #[error("invalid response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl BackendError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure kinds of the discovery flow.
///
/// Every kind is terminal for the attempt that raised it. The controller
/// classifies it once into a [`FailureReason`] and reports it; nothing below
/// the controller reports to the user.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    #[error("account {address} not found on chain")]
    AccountNotFound { address: String },

    #[error("network error during {operation}: {reason}")]
    Network { operation: String, reason: String },

    #[error("signing rejected: {reason}")]
    SigningRejected { reason: String },

    #[error("signature rejected by backend: {reason}")]
    Unauthorized { reason: String },

    #[error("malformed multisig entry {address}: {reason}")]
    MalformedEntry { address: String, reason: String },

    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("signing agent unavailable: {reason}")]
    AgentUnavailable { reason: String },
}

impl FlowError {
    pub(crate) fn network(operation: &str, detail: impl std::fmt::Display) -> Self {
        Self::Network {
            operation: operation.to_string(),
            reason: detail.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound { .. } => "account_not_found",
            Self::Network { .. } => "network_error",
            Self::SigningRejected { .. } => "signing_rejected",
            Self::Unauthorized { .. } => "unauthorized",
            Self::MalformedEntry { .. } => "malformed_entry",
            Self::InvalidChallenge(_) => "invalid_challenge",
            Self::AgentUnavailable { .. } => "agent_unavailable",
        }
    }

    /// Whether the same account can usefully try again.
    ///
    /// An account that has never appeared on-chain cannot authenticate until
    /// it does, so retrying with it is pointless.
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::AccountNotFound { .. })
    }

    fn user_message(&self) -> String {
        match self {
            Self::AccountNotFound { address } => format!(
                "Account {address} has not been seen on-chain yet. Send it a transaction or use a different address."
            ),
            Self::Network { .. } => {
                "Could not reach the multisig service. Please try again.".to_string()
            }
            Self::SigningRejected { .. } => {
                "The login signature was not provided. Unlock your wallet and approve the request to continue."
                    .to_string()
            }
            Self::Unauthorized { .. } => {
                "The multisig service did not accept the login signature.".to_string()
            }
            Self::MalformedEntry { .. } => {
                "The multisig service returned an entry that could not be read.".to_string()
            }
            Self::InvalidChallenge(_) => "Could not build the login challenge.".to_string(),
            Self::AgentUnavailable { reason } => {
                format!("Wallet extension is not available: {reason}")
            }
        }
    }
}

impl From<ChallengeError> for FlowError {
    fn from(err: ChallengeError) -> Self {
        Self::InvalidChallenge(err.to_string())
    }
}

/// User-facing failure payload built at the controller boundary.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureReason {
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
    pub detail: String,
}

impl From<&FlowError> for FailureReason {
    fn from(err: &FlowError) -> Self {
        Self {
            code: err.code(),
            retryable: err.retryable(),
            message: err.user_message(),
            detail: err.to_string(),
        }
    }
}
