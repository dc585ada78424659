//! Multisig list retrieval and classification.

use std::sync::Arc;

use crate::agent::Signature;
use crate::backend::BackendApi;
use crate::chain::ChainInfo;
use crate::error::{BackendError, FlowError};
use crate::multisig::{FetchedMultisigs, MultisigEntry, MultisigEntryDto};

#[derive(Clone)]
pub struct MultisigFetcher {
    backend: Arc<dyn BackendApi>,
}

impl MultisigFetcher {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }

    /// Exchange the signature for the created/belonged lists.
    ///
    /// All or nothing: one unreadable row fails the whole fetch.
    pub async fn fetch(
        &self,
        chain: &ChainInfo,
        signature: &Signature,
    ) -> Result<FetchedMultisigs, FlowError> {
        let response = self
            .backend
            .list_multisigs(chain, signature)
            .await
            .map_err(classify_list_error)?;

        let fetched = FetchedMultisigs {
            created: parse_entries(&response.created)?,
            belonged: parse_entries(&response.belonged)?,
        };
        tracing::debug!(
            created = fetched.created.len(),
            belonged = fetched.belonged.len(),
            "Fetched multisigs"
        );
        Ok(fetched)
    }
}

fn classify_list_error(err: BackendError) -> FlowError {
    match err.status() {
        Some(401 | 403) => FlowError::Unauthorized {
            reason: err.to_string(),
        },
        _ => FlowError::network("multisig list", err),
    }
}

fn parse_entries(rows: &[MultisigEntryDto]) -> Result<Vec<MultisigEntry>, FlowError> {
    rows.iter()
        .map(|row| {
            MultisigEntry::try_from(row).map_err(|e| FlowError::MalformedEntry {
                address: row.address.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
