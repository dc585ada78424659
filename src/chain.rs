//! Chain context shared by every step of the flow.

use serde::{Deserialize, Serialize};

/// Target chain description. Sent verbatim as the `chain` field of the
/// multisig list request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub chain_id: String,
    pub chain_display_name: String,
    pub node_address: String,
    pub address_prefix: String,
    pub denom: String,
    pub display_denom: String,
}

impl ChainInfo {
    /// Whether `address` carries this chain's bech32 human-readable prefix.
    pub fn owns_address(&self, address: &str) -> bool {
        address
            .strip_prefix(self.address_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('1') && rest.len() > 1)
    }
}
