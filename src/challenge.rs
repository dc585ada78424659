//! Login challenge construction.
//!
//! The backend issues a nonce, the user signs a no-fee amino sign doc whose
//! memo embeds that nonce, and the backend rebuilds the exact same doc to
//! check the signature. The byte encoding is therefore part of the contract:
//! sign doc keys are emitted in sorted order with no insignificant
//! whitespace, and the memo is the Keplr login object in its fixed
//! `title`, `description`, `nonce` order.

use serde::{Deserialize, Serialize};

use crate::error::ChallengeError;

const LOGIN_DESCRIPTION: &str = "Sign this no fee transaction to login with your Keplr wallet";

/// Server-issued, single-use nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Human-readable login challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub title: String,
    pub description: String,
    pub nonce: Nonce,
}

// Field order is the serialization order. The backend rebuilds the memo
// as `{title, description, nonce}`.
#[derive(Serialize)]
struct ChallengeMemo<'a> {
    title: &'a str,
    description: &'a str,
    nonce: &'a str,
}

/// Builds login challenges.
pub struct NonceChallengeBuilder;

impl NonceChallengeBuilder {
    pub fn build(display_name: &str, nonce: &Nonce) -> Result<Challenge, ChallengeError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ChallengeError::EmptyField("display_name"));
        }
        if nonce.as_str().trim().is_empty() {
            return Err(ChallengeError::EmptyField("nonce"));
        }

        Ok(Challenge {
            title: format!("Keplr Login to {display_name}"),
            description: LOGIN_DESCRIPTION.to_string(),
            nonce: nonce.clone(),
        })
    }
}

impl Challenge {
    /// Compact JSON memo carried by the sign doc.
    pub fn memo(&self) -> Result<String, ChallengeError> {
        Ok(serde_json::to_string(&ChallengeMemo {
            title: &self.title,
            description: &self.description,
            nonce: self.nonce.as_str(),
        })?)
    }

    /// No-fee, no-message sign doc for `chain_id` carrying this challenge.
    pub fn sign_doc(&self, chain_id: &str) -> Result<StdSignDoc, ChallengeError> {
        if chain_id.trim().is_empty() {
            return Err(ChallengeError::EmptyField("chain_id"));
        }
        Ok(StdSignDoc {
            account_number: "0".to_string(),
            chain_id: chain_id.to_string(),
            fee: StdFee {
                amount: Vec::new(),
                gas: "0".to_string(),
            },
            memo: self.memo()?,
            msgs: Vec::new(),
            sequence: "0".to_string(),
        })
    }

    pub fn canonical_bytes(&self, chain_id: &str) -> Result<Vec<u8>, ChallengeError> {
        self.sign_doc(chain_id)?.canonical_bytes()
    }
}

/// Amino JSON sign doc. Fields are declared in sorted key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdSignDoc {
    pub account_number: String,
    pub chain_id: String,
    pub fee: StdFee,
    pub memo: String,
    pub msgs: Vec<serde_json::Value>,
    pub sequence: String,
}

impl StdSignDoc {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ChallengeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdFee {
    pub amount: Vec<Coin>,
    pub gas: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub amount: String,
    pub denom: String,
}
