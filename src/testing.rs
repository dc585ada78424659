//! In-memory collaborators for tests. Built for unit tests and, with the
//! `test-utils` feature, for the integration tests in `tests/`.
//!
//! The fakes record what they were asked to do and can be told to fail,
//! so flows can be driven without a wallet, node or backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Notify, broadcast};

use crate::agent::{AgentKey, KeystoreChanged, SignOptions, Signature, SigningAgent};
use crate::backend::BackendApi;
use crate::chain::ChainInfo;
use crate::challenge::{Nonce, StdSignDoc};
use crate::error::{AgentError, BackendError, FailureReason, NodeError};
use crate::multisig::{MULTISIG_THRESHOLD_TYPE, MultisigListResponse, SECP256K1_TYPE};
use crate::node::{AccountId, NodeClient};
use crate::session::Notifier;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn test_chain() -> ChainInfo {
    ChainInfo {
        chain_id: "testchain-1".to_string(),
        chain_display_name: "Test Chain".to_string(),
        node_address: "http://node.test".to_string(),
        address_prefix: "cosmos".to_string(),
        denom: "utest".to_string(),
        display_denom: "TEST".to_string(),
    }
}

/// A compressed secp256k1 key: 0x02 followed by `seed` repeated.
pub fn secp_key_b64(seed: u8) -> String {
    let mut bytes = vec![0x02];
    bytes.extend(std::iter::repeat_n(seed, 32));
    BASE64.encode(bytes)
}

/// Amino JSON for a threshold multisig over secp256k1 keys built from `members`.
pub fn pubkey_json(threshold: &str, members: &[u8]) -> String {
    let pubkeys: Vec<_> = members
        .iter()
        .map(|seed| serde_json::json!({ "type": SECP256K1_TYPE, "value": secp_key_b64(*seed) }))
        .collect();
    serde_json::json!({
        "type": MULTISIG_THRESHOLD_TYPE,
        "value": { "threshold": threshold, "pubkeys": pubkeys }
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeNode {
    accounts: Mutex<HashSet<String>>,
    fail_next: Mutex<Option<String>>,
}

impl FakeNode {
    pub fn with_accounts<I>(accounts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            accounts: Mutex::new(accounts.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn forget(&self, address: &str) {
        lock(&self.accounts).remove(address);
    }

    /// Fail the next lookup with a transport error.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *lock(&self.fail_next) = Some(reason.into());
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn resolve_account(
        &self,
        node_address: &str,
        address: &str,
    ) -> Result<Option<AccountId>, NodeError> {
        if let Some(reason) = lock(&self.fail_next).take() {
            return Err(NodeError::Transport {
                url: format!("{node_address}/cosmos/auth/v1beta1/accounts/{address}"),
                reason,
            });
        }
        Ok(lock(&self.accounts).contains(address).then(|| AccountId {
            address: address.to_string(),
            account_number: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Issues `nonce-1`, `nonce-2`, ... and serves lists keyed by signer.
///
/// Signatures are expected in the `sig:{address}` form produced by
/// [`FakeAgent`].
#[derive(Default)]
pub struct FakeBackend {
    nonce_requests: AtomicUsize,
    nonce_failure: Mutex<Option<BackendError>>,
    lists: Mutex<HashMap<String, MultisigListResponse>>,
    list_gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nonce_requests(&self) -> usize {
        self.nonce_requests.load(Ordering::SeqCst)
    }

    /// Fail every nonce request until cleared.
    pub fn fail_nonce(&self, err: BackendError) {
        *lock(&self.nonce_failure) = Some(err);
    }

    pub fn clear_nonce_failure(&self) {
        lock(&self.nonce_failure).take();
    }

    pub fn set_list(&self, signer: &str, response: MultisigListResponse) {
        lock(&self.lists).insert(signer.to_string(), response);
    }

    /// Hold list responses for `signer` until the returned gate is notified.
    pub fn gate_list(&self, signer: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.list_gates).insert(signer.to_string(), gate.clone());
        gate
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn get_nonce(&self, chain_id: &str, address: &str) -> Result<Nonce, BackendError> {
        let n = self.nonce_requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = lock(&self.nonce_failure).clone() {
            return Err(err);
        }
        tracing::trace!(chain_id, address, n, "Fake nonce issued");
        Ok(Nonce::new(format!("nonce-{n}")))
    }

    async fn list_multisigs(
        &self,
        chain: &ChainInfo,
        signature: &Signature,
    ) -> Result<MultisigListResponse, BackendError> {
        let path = format!("chain/{}/multisig/list", chain.chain_id);
        let signer = signature
            .expose()
            .strip_prefix("sig:")
            .unwrap_or_default()
            .to_string();

        let gate = lock(&self.list_gates).get(&signer).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        lock(&self.lists)
            .get(&signer)
            .cloned()
            .ok_or_else(|| BackendError::Status {
                path,
                status: 401,
                detail: "signature not recognised".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Signing agent
// ---------------------------------------------------------------------------

struct AgentState {
    address: String,
    enable_failure: Option<AgentError>,
    sign_failure: Option<AgentError>,
    enabled_chains: Vec<String>,
    default_options: Option<SignOptions>,
    last_signed_doc: Option<StdSignDoc>,
}

/// Wallet stand-in that signs with `sig:{signer}`.
pub struct FakeAgent {
    state: Mutex<AgentState>,
    enable_calls: AtomicUsize,
    sign_requests: AtomicUsize,
    events: Mutex<Option<broadcast::Sender<KeystoreChanged>>>,
}

impl FakeAgent {
    pub fn new(address: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(AgentState {
                address: address.into(),
                enable_failure: None,
                sign_failure: None,
                enabled_chains: Vec::new(),
                default_options: None,
                last_signed_doc: None,
            }),
            enable_calls: AtomicUsize::new(0),
            sign_requests: AtomicUsize::new(0),
            events: Mutex::new(Some(events)),
        }
    }

    /// Change the active account without notifying listeners.
    pub fn switch_account(&self, address: impl Into<String>) {
        lock(&self.state).address = address.into();
    }

    /// Broadcast an account-change notification.
    pub fn fire_account_changed(&self) {
        if let Some(events) = lock(&self.events).as_ref() {
            let _ = events.send(KeystoreChanged);
        }
    }

    /// Drop the notification source, closing every receiver.
    pub fn close_account_events(&self) {
        lock(&self.events).take();
    }

    /// Number of live account-change receivers.
    pub fn receiver_count(&self) -> usize {
        lock(&self.events)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub fn fail_enable(&self, err: AgentError) {
        lock(&self.state).enable_failure = Some(err);
    }

    pub fn fail_signing(&self, err: AgentError) {
        lock(&self.state).sign_failure = Some(err);
    }

    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }

    pub fn enabled_chains(&self) -> Vec<String> {
        lock(&self.state).enabled_chains.clone()
    }

    pub fn default_options(&self) -> Option<SignOptions> {
        lock(&self.state).default_options
    }

    pub fn last_signed_doc(&self) -> Option<StdSignDoc> {
        lock(&self.state).last_signed_doc.clone()
    }
}

#[async_trait]
impl SigningAgent for FakeAgent {
    async fn enable(&self, chain_id: &str) -> Result<(), AgentError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if let Some(err) = state.enable_failure.clone() {
            return Err(err);
        }
        if !state.enabled_chains.iter().any(|c| c == chain_id) {
            state.enabled_chains.push(chain_id.to_string());
        }
        Ok(())
    }

    fn set_default_options(&self, options: SignOptions) {
        lock(&self.state).default_options = Some(options);
    }

    async fn get_key(&self, _chain_id: &str) -> Result<AgentKey, AgentError> {
        let address = lock(&self.state).address.clone();
        let mut pub_key = vec![0x02];
        pub_key.extend(address.bytes().cycle().take(32));
        Ok(AgentKey {
            bech32_address: address,
            pub_key,
        })
    }

    async fn sign_amino(
        &self,
        _chain_id: &str,
        signer: &str,
        doc: &StdSignDoc,
    ) -> Result<Signature, AgentError> {
        self.sign_requests.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if let Some(err) = state.sign_failure.clone() {
            return Err(err);
        }
        state.last_signed_doc = Some(doc.clone());
        Ok(Signature::new(format!("sig:{signer}")))
    }

    fn keystore_events(&self) -> broadcast::Receiver<KeystoreChanged> {
        match lock(&self.events).as_ref() {
            Some(events) => events.subscribe(),
            // Already closed: hand out a receiver whose sender is gone.
            None => broadcast::channel(1).1,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    reasons: Mutex<Vec<FailureReason>>,
}

impl RecordingNotifier {
    pub fn reasons(&self) -> Vec<FailureReason> {
        lock(&self.reasons).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_failure(&self, reason: &FailureReason) {
        lock(&self.reasons).push(reason.clone());
    }
}
