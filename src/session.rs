//! Wallet session controller.
//!
//! Drives one discovery attempt end to end:
//! 1) enable the signing agent and read its key
//! 2) sign the backend's nonce challenge
//! 3) fetch and classify the multisig lists
//!
//! While an identity is held the controller also listens for the agent's
//! account-change notification and re-runs the whole attempt on each one.
//! Attempts may overlap; each captures a generation number and only the
//! most recently started attempt may write session state.

use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::Poll;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::agent::{KeystoreChanged, SignOptions, SigningAgent};
use crate::backend::{BackendApi, HttpBackend};
use crate::chain::ChainInfo;
use crate::config::SessionConfig;
use crate::error::{AgentError, FailureReason, FlowError};
use crate::fetcher::MultisigFetcher;
use crate::multisig::FetchedMultisigs;
use crate::node::{NodeClient, RestNodeClient};
use crate::signer::ChallengeSigner;

/// Account the agent reported for the session.
#[derive(Clone, PartialEq, Eq)]
pub struct WalletIdentity {
    pub address: String,
    pub public_key: Vec<u8>,
}

impl fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("address", &self.address)
            .field("public_key", &format_args!("<{} bytes>", self.public_key.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Connecting,
    Authenticated(WalletIdentity),
    Loading(WalletIdentity),
    Ready(WalletIdentity, FetchedMultisigs),
    /// `identity` is kept when the failure happened after the agent
    /// connection succeeded.
    Failed {
        reason: FailureReason,
        identity: Option<WalletIdentity>,
    },
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Connecting => "connecting",
            Self::Authenticated(_) => "authenticated",
            Self::Loading(_) => "loading",
            Self::Ready(..) => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn identity(&self) -> Option<&WalletIdentity> {
        match self {
            Self::Authenticated(identity) | Self::Loading(identity) | Self::Ready(identity, _) => {
                Some(identity)
            }
            Self::Failed { identity, .. } => identity.as_ref(),
            Self::Unauthenticated | Self::Connecting => None,
        }
    }

    pub fn multisigs(&self) -> Option<&FetchedMultisigs> {
        match self {
            Self::Ready(_, multisigs) => Some(multisigs),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// User-facing error reporting.
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, reason: &FailureReason);
}

/// Reports failures to the log only.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_failure(&self, reason: &FailureReason) {
        tracing::warn!(code = reason.code, retryable = reason.retryable, "{}", reason.message);
    }
}

// Receiver slot shared with the listener task. Emptying it deregisters the
// receiver immediately, whether or not the task runs again.
type AccountEvents = Arc<Mutex<Option<BroadcastStream<KeystoreChanged>>>>;

// Releasing the guard deregisters the receiver and aborts the listener.
struct AccountWatch {
    events: AccountEvents,
    task: JoinHandle<()>,
}

impl Drop for AccountWatch {
    fn drop(&mut self) {
        lock(&self.events).take();
        self.task.abort();
    }
}

struct Inner {
    chain: ChainInfo,
    agent: Arc<dyn SigningAgent>,
    signer: ChallengeSigner,
    fetcher: MultisigFetcher,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<SessionState>,
    generation: Mutex<u64>,
    account_watch: Mutex<Option<AccountWatch>>,
}

/// Owns the session state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WalletSessionController {
    inner: Arc<Inner>,
}

impl WalletSessionController {
    pub fn new(
        chain: ChainInfo,
        agent: Arc<dyn SigningAgent>,
        node: Arc<dyn NodeClient>,
        backend: Arc<dyn BackendApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            inner: Arc::new(Inner {
                chain,
                signer: ChallengeSigner::new(node, backend.clone(), agent.clone()),
                fetcher: MultisigFetcher::new(backend),
                agent,
                notifier,
                state,
                generation: Mutex::new(0),
                account_watch: Mutex::new(None),
            }),
        }
    }

    /// Wire the HTTP backend and REST node client from configuration.
    pub fn from_config(
        config: &SessionConfig,
        agent: Arc<dyn SigningAgent>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(
            config.chain.clone(),
            agent,
            Arc::new(RestNodeClient::new(config.backend.timeout)),
            Arc::new(HttpBackend::new(&config.backend)),
            notifier,
        )
    }

    pub fn chain(&self) -> &ChainInfo {
        &self.inner.chain
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether the account-change subscription is currently installed.
    pub fn is_watching_account_changes(&self) -> bool {
        lock(&self.inner.account_watch).is_some()
    }

    /// Run a full attempt: connect, sign, fetch.
    ///
    /// Returns the state once this attempt finishes. If a newer attempt
    /// started meanwhile, that attempt's state is returned instead.
    pub async fn connect(&self) -> SessionState {
        let generation = self.inner.begin_attempt();
        self.inner.run(generation).await;
        self.state()
    }

    /// Forget the identity and stop listening for account changes.
    ///
    /// Any attempt still in flight is superseded and its result dropped.
    pub fn disconnect(&self) {
        let mut slot = lock(&self.inner.account_watch);
        let generation = self.inner.begin_attempt();
        release_account_watch(slot.take());
        self.inner.apply(generation, SessionState::Unauthenticated);
        drop(slot);
        tracing::info!(chain_id = %self.inner.chain.chain_id, "Wallet session disconnected");
    }
}

impl Inner {
    fn begin_attempt(&self) -> u64 {
        let mut generation = lock(&self.generation);
        *generation += 1;
        *generation
    }

    /// Write `next` if `generation` is still the latest attempt.
    fn apply(&self, generation: u64, next: SessionState) -> bool {
        let current = lock(&self.generation);
        if *current != generation {
            tracing::debug!(
                generation,
                current = *current,
                state = next.as_str(),
                "Discarding stale session update"
            );
            return false;
        }
        self.state.send_replace(next);
        true
    }

    async fn run(self: &Arc<Self>, generation: u64) {
        if !self.apply(generation, SessionState::Connecting) {
            return;
        }
        tracing::info!(chain_id = %self.chain.chain_id, generation, "Connecting to signing agent");

        let identity = match self.connect_agent().await {
            Ok(identity) => identity,
            Err(err) => {
                self.fail(generation, &err, None);
                return;
            }
        };

        if !self.apply(generation, SessionState::Authenticated(identity.clone())) {
            return;
        }
        tracing::info!(address = %identity.address, generation, "Signing agent connected");
        self.ensure_account_watch(generation);

        if !self.apply(generation, SessionState::Loading(identity.clone())) {
            return;
        }
        match self.load(&identity).await {
            Ok(multisigs) => {
                let created = multisigs.created.len();
                let belonged = multisigs.belonged.len();
                if self.apply(generation, SessionState::Ready(identity, multisigs)) {
                    tracing::info!(generation, created, belonged, "Multisig discovery complete");
                }
            }
            // The held address can never sign in, so drop it.
            Err(err @ FlowError::AccountNotFound { .. }) => self.fail(generation, &err, None),
            Err(err) => self.fail(generation, &err, Some(identity)),
        }
    }

    async fn connect_agent(&self) -> Result<WalletIdentity, FlowError> {
        let chain_id = self.chain.chain_id.as_str();
        self.agent
            .enable(chain_id)
            .await
            .map_err(classify_agent_error)?;
        self.agent.set_default_options(SignOptions::SESSION_DEFAULTS);

        let key = self
            .agent
            .get_key(chain_id)
            .await
            .map_err(classify_agent_error)?;
        if !self.chain.owns_address(&key.bech32_address) {
            return Err(FlowError::AgentUnavailable {
                reason: format!(
                    "agent returned address '{}' without the '{}' prefix",
                    key.bech32_address, self.chain.address_prefix
                ),
            });
        }

        Ok(WalletIdentity {
            address: key.bech32_address,
            public_key: key.pub_key,
        })
    }

    async fn load(&self, identity: &WalletIdentity) -> Result<FetchedMultisigs, FlowError> {
        let signature = self.signer.sign(&self.chain, &identity.address).await?;
        self.fetcher.fetch(&self.chain, &signature).await
    }

    fn fail(&self, generation: u64, err: &FlowError, identity: Option<WalletIdentity>) {
        let reason = FailureReason::from(err);
        let next = SessionState::Failed {
            reason: reason.clone(),
            identity,
        };
        let applied = if next.identity().is_none() {
            // Slot is held across the write so no newer watch can slip in.
            let mut slot = lock(&self.account_watch);
            let applied = self.apply(generation, next);
            if applied {
                release_account_watch(slot.take());
            }
            applied
        } else {
            self.apply(generation, next)
        };
        if !applied {
            return;
        }
        tracing::warn!(generation, code = reason.code, error = %err, "Discovery attempt failed");
        self.notifier.notify_failure(&reason);
    }

    /// Install the listener unless one is live or `generation` is stale.
    fn ensure_account_watch(self: &Arc<Self>, generation: u64) {
        let mut slot = lock(&self.account_watch);
        if slot.is_some() {
            return;
        }
        if *lock(&self.generation) != generation {
            tracing::debug!(generation, "Skipping account watch for stale attempt");
            return;
        }
        let events: AccountEvents = Arc::new(Mutex::new(Some(BroadcastStream::new(
            self.agent.keystore_events(),
        ))));
        let task = tokio::spawn(watch_account_changes(
            Arc::downgrade(self),
            events.clone(),
        ));
        *slot = Some(AccountWatch { events, task });
        tracing::debug!("Subscribed to signing agent account changes");
    }

    /// Clear the slot if it still holds the watch that owns `events`.
    fn forget_closed_watch(&self, events: &AccountEvents) {
        let mut slot = lock(&self.account_watch);
        if slot
            .as_ref()
            .is_some_and(|watch| Arc::ptr_eq(&watch.events, events))
        {
            release_account_watch(slot.take());
        }
    }
}

async fn watch_account_changes(inner: Weak<Inner>, events: AccountEvents) {
    loop {
        let event = poll_fn(|cx| match lock(&events).as_mut() {
            Some(stream) => Pin::new(stream).poll_next(cx),
            None => Poll::Ready(None),
        })
        .await;
        let Some(event) = event else {
            break;
        };
        if let Err(BroadcastStreamRecvError::Lagged(skipped)) = event {
            tracing::debug!(skipped, "Account change notifications lagged");
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let generation = inner.begin_attempt();
        tracing::info!(generation, "Signing agent account changed, re-authenticating");
        tokio::spawn(async move {
            inner.run(generation).await;
        });
    }

    if let Some(inner) = inner.upgrade() {
        tracing::debug!("Account change source closed");
        inner.forget_closed_watch(&events);
    }
}

fn release_account_watch(watch: Option<AccountWatch>) {
    if watch.is_some() {
        tracing::debug!("Unsubscribed from signing agent account changes");
    }
}

fn classify_agent_error(err: AgentError) -> FlowError {
    match err {
        AgentError::Rejected(reason) => FlowError::SigningRejected { reason },
        AgentError::Unavailable(reason) => FlowError::AgentUnavailable { reason },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::BackendError;
    use crate::multisig::{MultisigEntryDto, MultisigListResponse};
    use crate::testing::{
        FakeAgent, FakeBackend, FakeNode, RecordingNotifier, pubkey_json, test_chain,
    };

    const ALICE: &str = "cosmos1alice0000000000000000000000000000000";
    const BOB: &str = "cosmos1bob000000000000000000000000000000000";

    struct Harness {
        agent: Arc<FakeAgent>,
        node: Arc<FakeNode>,
        backend: Arc<FakeBackend>,
        notifier: Arc<RecordingNotifier>,
        controller: WalletSessionController,
    }

    fn harness(address: &str) -> Harness {
        let agent = Arc::new(FakeAgent::new(address));
        let node = Arc::new(FakeNode::with_accounts([ALICE, BOB]));
        let backend = Arc::new(FakeBackend::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = WalletSessionController::new(
            test_chain(),
            agent.clone(),
            node.clone(),
            backend.clone(),
            notifier.clone(),
        );
        Harness {
            agent,
            node,
            backend,
            notifier,
            controller,
        }
    }

    fn list_of(created: usize, belonged: usize) -> MultisigListResponse {
        let row = |i: usize| MultisigEntryDto {
            address: format!("cosmos1multi{i}"),
            pubkey_json: pubkey_json("1", &[i as u8, 200]),
        };
        MultisigListResponse {
            created: (0..created).map(row).collect(),
            belonged: (0..belonged).map(row).collect(),
        }
    }

    #[tokio::test]
    async fn connect_runs_to_ready_and_applies_sign_defaults() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 2));

        let state = h.controller.connect().await;

        let SessionState::Ready(identity, multisigs) = state else {
            panic!("expected ready, got {state:?}");
        };
        assert_eq!(identity.address, ALICE);
        assert_eq!(multisigs.created.len(), 1);
        assert_eq!(multisigs.belonged.len(), 2);
        assert_eq!(h.agent.enabled_chains(), vec!["testchain-1".to_string()]);
        assert_eq!(h.agent.default_options(), Some(SignOptions::SESSION_DEFAULTS));
        assert!(h.controller.is_watching_account_changes());
        assert!(h.notifier.reasons().is_empty());
    }

    #[tokio::test]
    async fn enable_rejection_fails_without_identity() {
        let h = harness(ALICE);
        h.agent.fail_enable(AgentError::Rejected("Request rejected".to_string()));

        let state = h.controller.connect().await;

        assert_eq!(state.as_str(), "failed");
        assert!(state.identity().is_none());
        assert_eq!(state.failure().unwrap().code, "signing_rejected");
        assert!(!h.controller.is_watching_account_changes());
        assert_eq!(h.backend.nonce_requests(), 0);
        assert_eq!(h.notifier.reasons().len(), 1);
    }

    #[tokio::test]
    async fn missing_agent_is_agent_unavailable() {
        let h = harness(ALICE);
        h.agent.fail_enable(AgentError::Unavailable("extension not installed".to_string()));

        let state = h.controller.connect().await;
        assert_eq!(state.failure().unwrap().code, "agent_unavailable");
    }

    #[tokio::test]
    async fn foreign_prefix_key_is_rejected() {
        let h = harness("osmo1alice0000000000000000000000000000000000");

        let state = h.controller.connect().await;
        assert_eq!(state.failure().unwrap().code, "agent_unavailable");
        assert!(state.identity().is_none());
    }

    #[tokio::test]
    async fn signing_failure_keeps_identity() {
        let h = harness(ALICE);
        h.agent.fail_signing(AgentError::Rejected("declined".to_string()));

        let state = h.controller.connect().await;

        assert_eq!(state.failure().unwrap().code, "signing_rejected");
        assert_eq!(state.identity().map(|i| i.address.as_str()), Some(ALICE));
        assert!(h.controller.is_watching_account_changes());
    }

    #[tokio::test]
    async fn unknown_account_clears_identity() {
        let h = harness(ALICE);
        h.node.forget(ALICE);

        let state = h.controller.connect().await;

        assert_eq!(state.failure().unwrap().code, "account_not_found");
        assert!(state.identity().is_none());
        assert!(!h.controller.is_watching_account_changes());
        assert_eq!(h.agent.sign_requests(), 0);
    }

    #[tokio::test]
    async fn failed_attempt_can_be_retried() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(0, 0));
        h.backend.fail_nonce(BackendError::Transport {
            path: "nonce".to_string(),
            reason: "connection reset".to_string(),
        });

        let state = h.controller.connect().await;
        assert_eq!(state.failure().unwrap().code, "network_error");

        h.backend.clear_nonce_failure();
        let state = h.controller.connect().await;
        assert_eq!(state.as_str(), "ready");
        assert_eq!(h.notifier.reasons().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_identity_and_subscription() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 1));
        h.controller.connect().await;
        assert!(h.controller.is_watching_account_changes());

        h.controller.disconnect();

        assert_eq!(h.controller.state(), SessionState::Unauthenticated);
        assert!(!h.controller.is_watching_account_changes());
        assert_eq!(h.agent.receiver_count(), 0);
    }

    #[tokio::test]
    async fn dropping_controller_releases_subscription() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 1));
        h.controller.connect().await;
        assert_eq!(h.agent.receiver_count(), 1);

        drop(h.controller);
        assert_eq!(h.agent.receiver_count(), 0);
    }

    #[tokio::test]
    async fn stale_attempt_does_not_install_account_watch() {
        let h = harness(ALICE);
        let inner = &h.controller.inner;
        let stale = inner.begin_attempt();
        let current = inner.begin_attempt();

        inner.ensure_account_watch(stale);
        assert!(!h.controller.is_watching_account_changes());
        assert_eq!(h.agent.receiver_count(), 0);

        inner.ensure_account_watch(current);
        assert!(h.controller.is_watching_account_changes());
        assert_eq!(h.agent.receiver_count(), 1);
    }

    #[tokio::test]
    async fn closed_event_source_clears_watch() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 1));
        h.controller.connect().await;
        assert!(h.controller.is_watching_account_changes());

        h.agent.close_account_events();
        tokio::time::timeout(Duration::from_secs(1), async {
            while h.controller.is_watching_account_changes() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("watch cleared after source closed");

        assert_eq!(h.controller.state().as_str(), "ready");
    }

    #[tokio::test]
    async fn failed_reauth_on_account_change_clears_identity() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 1));
        h.controller.connect().await;
        let mut states = h.controller.subscribe();

        h.agent.fail_enable(AgentError::Rejected("Request rejected".to_string()));
        h.agent.fire_account_changed();

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| matches!(s, SessionState::Failed { .. })),
        )
        .await
        .expect("re-auth finished")
        .expect("sender alive")
        .clone();

        assert!(state.identity().is_none());
        assert_eq!(state.failure().unwrap().code, "signing_rejected");
        assert!(!h.controller.is_watching_account_changes());
        assert_eq!(h.agent.receiver_count(), 0);
        assert_eq!(h.notifier.reasons().len(), 1);
    }

    #[tokio::test]
    async fn lagged_notifications_still_reauthenticate() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 1));
        h.backend.set_list(BOB, list_of(2, 3));
        h.controller.connect().await;
        let mut states = h.controller.subscribe();

        // More events than the channel holds before the listener runs.
        h.agent.switch_account(BOB);
        for _ in 0..20 {
            h.agent.fire_account_changed();
        }

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| matches!(s, SessionState::Ready(id, _) if id.address == BOB)),
        )
        .await
        .expect("re-auth finished")
        .expect("sender alive")
        .clone();

        assert_eq!(state.multisigs().unwrap().belonged.len(), 3);
        assert!(h.agent.enable_calls() >= 2);
        assert!(h.controller.is_watching_account_changes());
    }

    #[tokio::test]
    async fn account_change_reruns_full_sequence() {
        let h = harness(ALICE);
        h.backend.set_list(ALICE, list_of(1, 1));
        h.backend.set_list(BOB, list_of(2, 3));
        h.controller.connect().await;
        let mut states = h.controller.subscribe();

        h.agent.switch_account(BOB);
        h.agent.fire_account_changed();

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| matches!(s, SessionState::Ready(id, _) if id.address == BOB)),
        )
        .await
        .expect("re-auth finished")
        .expect("sender alive")
        .clone();

        assert_eq!(state.multisigs().unwrap().belonged.len(), 3);
        assert_eq!(h.agent.enable_calls(), 2);
        assert_eq!(h.backend.nonce_requests(), 2);
    }
}
