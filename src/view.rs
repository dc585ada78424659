//! Presentation state derived from the session.

use crate::error::FailureReason;
use crate::multisig::{FetchedMultisigs, MultisigEntry};
use crate::session::{SessionState, WalletIdentity};

/// What a multisig picker shows for the current session.
///
/// Toggling between the created and belonged lists is local; it never
/// triggers a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub identity: Option<WalletIdentity>,
    pub multisigs: Option<FetchedMultisigs>,
    pub show_belonged: bool,
    pub failure: Option<FailureReason>,
}

impl ViewState {
    pub fn from_session(state: &SessionState) -> Self {
        let mut view = Self::default();
        view.sync(state);
        view
    }

    /// Refresh from a new session state.
    ///
    /// The toggle position survives refreshes for the same address and
    /// resets when the address changes.
    pub fn sync(&mut self, state: &SessionState) {
        let identity = state.identity().cloned();
        let same_account = match (&self.identity, &identity) {
            (Some(old), Some(new)) => old.address == new.address,
            _ => false,
        };
        if !same_account {
            self.show_belonged = false;
        }
        self.identity = identity;
        self.multisigs = state.multisigs().cloned();
        self.failure = state.failure().cloned();
    }

    pub fn awaiting_connection(&self) -> bool {
        self.identity.is_none() && self.multisigs.is_none()
    }

    pub fn awaiting_fetch(&self) -> bool {
        self.identity.is_some() && self.multisigs.is_none()
    }

    /// Offered only when the two lists differ in length.
    pub fn toggle_offered(&self) -> bool {
        self.multisigs
            .as_ref()
            .is_some_and(|m| m.created.len() != m.belonged.len())
    }

    pub fn displayed_set(&self) -> &[MultisigEntry] {
        let Some(multisigs) = &self.multisigs else {
            return &[];
        };
        if self.show_belonged && self.toggle_offered() {
            &multisigs.belonged
        } else {
            &multisigs.created
        }
    }

    pub fn set_show_belonged(&mut self, show: bool) {
        self.show_belonged = show;
    }

    pub fn toggle(&mut self) {
        self.show_belonged = !self.show_belonged;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::multisig::ThresholdPubkey;
    use crate::testing::pubkey_json;

    fn identity(address: &str) -> WalletIdentity {
        WalletIdentity {
            address: address.to_string(),
            public_key: vec![2; 33],
        }
    }

    fn entries(prefix: &str, n: usize) -> Vec<MultisigEntry> {
        (0..n)
            .map(|i| MultisigEntry {
                address: format!("{prefix}{i}"),
                threshold_pubkey: ThresholdPubkey::from_amino_json(&pubkey_json("1", &[1, 2]))
                    .unwrap(),
            })
            .collect()
    }

    fn ready(address: &str, created: usize, belonged: usize) -> SessionState {
        SessionState::Ready(
            identity(address),
            FetchedMultisigs {
                created: entries("cosmos1c", created),
                belonged: entries("cosmos1b", belonged),
            },
        )
    }

    #[test]
    fn unauthenticated_awaits_connection() {
        let view = ViewState::from_session(&SessionState::Unauthenticated);
        assert!(view.awaiting_connection());
        assert!(!view.awaiting_fetch());
        assert!(view.displayed_set().is_empty());
        assert!(!view.toggle_offered());
    }

    #[test]
    fn loading_awaits_fetch() {
        let view = ViewState::from_session(&SessionState::Loading(identity("cosmos1a")));
        assert!(!view.awaiting_connection());
        assert!(view.awaiting_fetch());
    }

    #[test]
    fn equal_counts_hide_toggle_and_show_created() {
        let mut view = ViewState::from_session(&ready("cosmos1a", 3, 3));
        assert!(!view.toggle_offered());

        view.set_show_belonged(true);
        let shown: Vec<_> = view.displayed_set().iter().map(|e| e.address.as_str()).collect();
        assert_eq!(shown, vec!["cosmos1c0", "cosmos1c1", "cosmos1c2"]);
    }

    #[test]
    fn both_empty_hides_toggle() {
        let view = ViewState::from_session(&ready("cosmos1a", 0, 0));
        assert!(!view.toggle_offered());
        assert!(view.displayed_set().is_empty());
        assert!(!view.awaiting_fetch());
    }

    #[test]
    fn differing_counts_offer_toggle() {
        let mut view = ViewState::from_session(&ready("cosmos1a", 2, 5));
        assert!(view.toggle_offered());
        assert_eq!(view.displayed_set().len(), 2);

        view.toggle();
        assert_eq!(view.displayed_set().len(), 5);
        view.toggle();
        assert_eq!(view.displayed_set().len(), 2);
    }

    #[test]
    fn toggle_survives_refresh_for_same_account_only() {
        let mut view = ViewState::from_session(&ready("cosmos1a", 2, 5));
        view.toggle();

        view.sync(&ready("cosmos1a", 1, 4));
        assert!(view.show_belonged);
        assert_eq!(view.displayed_set().len(), 4);

        view.sync(&ready("cosmos1b", 1, 4));
        assert!(!view.show_belonged);
        assert_eq!(view.displayed_set().len(), 1);
    }

    #[test]
    fn failure_with_identity_keeps_identity() {
        let reason = FailureReason {
            code: "network_error",
            retryable: true,
            message: "Network error".to_string(),
            detail: "nonce request failed".to_string(),
        };
        let view = ViewState::from_session(&SessionState::Failed {
            reason: reason.clone(),
            identity: Some(identity("cosmos1a")),
        });
        assert!(view.awaiting_fetch());
        assert_eq!(view.failure, Some(reason));
    }
}
