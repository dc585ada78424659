//! Wallet-authenticated multisig discovery.
//!
//! A user connects a signing agent, proves control of an address by signing
//! a backend-issued nonce challenge, and receives the multisig accounts they
//! created or belong to on the configured chain.

pub mod agent;
pub mod backend;
pub mod chain;
pub mod challenge;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod multisig;
pub mod node;
pub mod session;
pub mod signer;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod view;

pub use agent::{AgentKey, KeystoreChanged, SignOptions, Signature, SigningAgent};
pub use backend::{BackendApi, HttpBackend};
pub use chain::ChainInfo;
pub use challenge::{Challenge, Nonce, NonceChallengeBuilder, StdSignDoc};
pub use config::SessionConfig;
pub use error::{Error, FailureReason, FlowError};
pub use fetcher::MultisigFetcher;
pub use multisig::{FetchedMultisigs, MultisigEntry, ThresholdPubkey};
pub use node::{NodeClient, RestNodeClient};
pub use session::{Notifier, SessionState, TracingNotifier, WalletIdentity, WalletSessionController};
pub use signer::ChallengeSigner;
pub use view::ViewState;
