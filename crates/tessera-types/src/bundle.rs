//! Bundles - ordered, nonce-tagged batches of processed intentions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, ProcessedIntention, TypesError};

/// Archival sub-state of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalStatus {
    Pending,
    Uploading,
    Confirmed,
    Failed,
}

impl ArchivalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(TypesError::UnknownArchivalStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl fmt::Display for ArchivalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signed body of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePayload {
    pub nonce: u64,
    pub proposer: Address,
    pub created_at: DateTime<Utc>,
    pub intentions: Vec<ProcessedIntention>,
}

impl BundlePayload {
    /// The exact bytes that are signed, uploaded and archived
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A bundle ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBundle {
    pub nonce: u64,
    pub payload: String,
    pub proposer: Address,
    pub signature: String,
}

/// A persisted bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: i64,
    pub nonce: u64,
    pub payload: String,
    pub proposer: Address,
    pub signature: String,
    pub content_id: Option<String>,
    pub anchor_tx_hash: Option<String>,
    pub archival_status: ArchivalStatus,
    pub archival_tx_hash: Option<String>,
    pub archival_piece_id: Option<String>,
    pub archival_confirmed_at: Option<DateTime<Utc>>,
    pub archival_error: Option<String>,
    /// When the deposit holds of the bundled intentions became assignments
    pub holds_settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Bundle {
    /// Uploaded and anchored on-chain
    pub fn is_published(&self) -> bool {
        self.content_id.is_some() && self.anchor_tx_hash.is_some()
    }

    pub fn decode_payload(&self) -> serde_json::Result<BundlePayload> {
        serde_json::from_str(&self.payload)
    }
}

/// A change to the archival columns of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivalUpdate {
    Uploading,
    TxSubmitted { tx_hash: String },
    Completed { piece_id: String },
    Confirmed { at: DateTime<Utc> },
    Failed { error: String },
}
