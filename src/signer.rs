//! Nonce challenge signing: resolve account, fetch nonce, ask the agent to sign.

use std::sync::Arc;

use crate::agent::{Signature, SigningAgent};
use crate::backend::BackendApi;
use crate::chain::ChainInfo;
use crate::challenge::NonceChallengeBuilder;
use crate::error::{AgentError, FlowError};
use crate::node::NodeClient;

/// Produces a login signature for an address.
///
/// Holds no state of its own. Every call requests exactly one nonce, and
/// nothing is retried.
#[derive(Clone)]
pub struct ChallengeSigner {
    node: Arc<dyn NodeClient>,
    backend: Arc<dyn BackendApi>,
    agent: Arc<dyn SigningAgent>,
}

impl ChallengeSigner {
    pub fn new(
        node: Arc<dyn NodeClient>,
        backend: Arc<dyn BackendApi>,
        agent: Arc<dyn SigningAgent>,
    ) -> Self {
        Self {
            node,
            backend,
            agent,
        }
    }

    pub async fn sign(&self, chain: &ChainInfo, address: &str) -> Result<Signature, FlowError> {
        let account = self
            .node
            .resolve_account(&chain.node_address, address)
            .await
            .map_err(|e| FlowError::network("account lookup", e))?
            .ok_or_else(|| FlowError::AccountNotFound {
                address: address.to_string(),
            })?;
        tracing::debug!(address = %account.address, "Resolved on-chain account");

        let nonce = self
            .backend
            .get_nonce(&chain.chain_id, &account.address)
            .await
            .map_err(|e| FlowError::network("nonce request", e))?;

        let challenge = NonceChallengeBuilder::build(&chain.chain_display_name, &nonce)?;
        let doc = challenge.sign_doc(&chain.chain_id)?;

        tracing::debug!(address = %account.address, "Requesting challenge signature");
        self.agent
            .sign_amino(&chain.chain_id, &account.address, &doc)
            .await
            .map_err(|e| match e {
                AgentError::Rejected(reason) | AgentError::Unavailable(reason) => {
                    FlowError::SigningRejected { reason }
                }
            })
    }
}
