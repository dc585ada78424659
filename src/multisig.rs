//! Multisig result model and its wire representation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize};

pub const MULTISIG_THRESHOLD_TYPE: &str = "tendermint/PubKeyMultisigThreshold";
pub const SECP256K1_TYPE: &str = "tendermint/PubKeySecp256k1";
pub const ED25519_TYPE: &str = "tendermint/PubKeyEd25519";

/// One row of the list endpoint as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigEntryDto {
    pub address: String,
    #[serde(rename = "pubkeyJSON")]
    pub pubkey_json: String,
}

/// Body of `POST /chain/{chainId}/multisig/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigListResponse {
    pub created: Vec<MultisigEntryDto>,
    pub belonged: Vec<MultisigEntryDto>,
}

/// Member key of a threshold multisig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub key_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdPubkey {
    pub threshold: u32,
    pub members: Vec<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigEntry {
    pub address: String,
    pub threshold_pubkey: ThresholdPubkey,
}

/// Classified result of one fetch, both lists in server order.
///
/// An entry may appear in both lists; the creator is usually a member too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMultisigs {
    pub created: Vec<MultisigEntry>,
    pub belonged: Vec<MultisigEntry>,
}

/// Why a single row could not be turned into a [`MultisigEntry`].
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("empty address")]
    EmptyAddress,

    #[error("pubkeyJSON is not a valid multisig pubkey: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unsupported pubkey type '{0}'")]
    UnsupportedType(String),

    #[error("threshold {threshold} is invalid for {members} members")]
    InvalidThreshold { threshold: u32, members: usize },

    #[error("member key {index} is invalid: {reason}")]
    InvalidMemberKey { index: usize, reason: String },
}

#[derive(Deserialize)]
struct AminoPubkey {
    #[serde(rename = "type")]
    key_type: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct AminoThresholdValue {
    #[serde(deserialize_with = "threshold_from_string_or_number")]
    threshold: u32,
    pubkeys: Vec<AminoMemberKey>,
}

#[derive(Deserialize)]
struct AminoMemberKey {
    #[serde(rename = "type")]
    key_type: String,
    value: String,
}

// Amino JSON encodes integers as strings; older rows carry plain numbers.
fn threshold_from_string_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u32),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl ThresholdPubkey {
    /// Parse an amino-JSON `PubKeyMultisigThreshold` and check
    /// `1 <= threshold <= members`.
    pub fn from_amino_json(raw: &str) -> Result<Self, EntryError> {
        let outer: AminoPubkey = serde_json::from_str(raw)?;
        if outer.key_type != MULTISIG_THRESHOLD_TYPE {
            return Err(EntryError::UnsupportedType(outer.key_type));
        }
        let value: AminoThresholdValue = serde_json::from_value(outer.value)?;

        let members = value
            .pubkeys
            .into_iter()
            .enumerate()
            .map(|(index, key)| decode_member(index, key))
            .collect::<Result<Vec<_>, _>>()?;

        if value.threshold == 0 || value.threshold as usize > members.len() {
            return Err(EntryError::InvalidThreshold {
                threshold: value.threshold,
                members: members.len(),
            });
        }

        Ok(Self {
            threshold: value.threshold,
            members,
        })
    }
}

fn decode_member(index: usize, key: AminoMemberKey) -> Result<PublicKey, EntryError> {
    let expected_len = match key.key_type.as_str() {
        SECP256K1_TYPE => 33,
        ED25519_TYPE => 32,
        other => {
            return Err(EntryError::InvalidMemberKey {
                index,
                reason: format!("unsupported key type '{other}'"),
            });
        }
    };
    let bytes = BASE64
        .decode(key.value.trim())
        .map_err(|e| EntryError::InvalidMemberKey {
            index,
            reason: format!("bad base64: {e}"),
        })?;
    if bytes.len() != expected_len {
        return Err(EntryError::InvalidMemberKey {
            index,
            reason: format!("expected {expected_len} bytes, got {}", bytes.len()),
        });
    }
    Ok(PublicKey {
        key_type: key.key_type,
        bytes,
    })
}

impl TryFrom<&MultisigEntryDto> for MultisigEntry {
    type Error = EntryError;

    fn try_from(dto: &MultisigEntryDto) -> Result<Self, Self::Error> {
        if dto.address.trim().is_empty() {
            return Err(EntryError::EmptyAddress);
        }
        Ok(Self {
            address: dto.address.clone(),
            threshold_pubkey: ThresholdPubkey::from_amino_json(&dto.pubkey_json)?,
        })
    }
}
