//! Transfer record and protocol state (C1)
//!
//! A [`Transfer`] is a plain owned record tracking one attempted asset
//! hand-off. It is not shared across engines: it is created by
//! [`crate::engine`]'s ingest stage or by [`crate::recovery`], and is owned
//! exclusively by the engine until it reaches [`TransferState::Processed`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Asset identifier as reported by the ledger adapters.
///
/// Opaque from the engine's point of view — adapters are free to encode
/// whatever native identifier their ledger uses (an address, a UTXO, a
/// token ID) as long as it round-trips through [`AssetId::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Internal bookkeeping identity for a transfer record.
///
/// Never observed by the adapters; exists only so the engine can key its
/// `inflight` map and pair a completed `receive` task back to its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The opaque payload bundle identifying the asset and carrying
/// adapter-specific metadata. Always carries at least an `asset_id`.
#[derive(Debug, Clone)]
pub struct TransferData {
    pub asset_id: AssetId,
    /// Adapter-defined extra fields (e.g. amount, memo, source address).
    pub metadata: Map<String, Value>,
}

impl TransferData {
    pub fn new(asset_id: impl Into<AssetId>) -> Self {
        Self {
            asset_id: asset_id.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(asset_id: impl Into<AssetId>, metadata: Map<String, Value>) -> Self {
        Self {
            asset_id: asset_id.into(),
            metadata,
        }
    }
}

/// Transfer FSM states.
///
/// Transitions are monotonic: `Ready -> Sent -> Completed -> Processed`.
/// There are no back-transitions, and each transition is driven by exactly
/// one engine stage (see `crate::engine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Created by ingest or recovery; not yet dispatched to the Responder.
    Ready,
    /// Dispatch has started the Responder's `receive` call.
    Sent,
    /// Collect observed the `receive` call finish; `result` is populated.
    Completed,
    /// Finalize has issued commit/abort on the Initiator. Terminal.
    Processed,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Processed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Ready => "READY",
            TransferState::Sent => "SENT",
            TransferState::Completed => "COMPLETED",
            TransferState::Processed => "PROCESSED",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the Responder's `receive` attempt, once known.
///
/// `detail` carries adapter-defined context: an error message when the
/// `receive` call raised (per spec, treated as `success = false`), or
/// `None` on a clean success/failure report.
#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    pub success: bool,
    pub detail: Option<String>,
}

/// A single attempted asset hand-off.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: TransferId,
    pub data: TransferData,
    pub state: TransferState,
    /// Set by collect on `Sent -> Completed`. `None` until then.
    pub result: Option<ReceiveOutcome>,
    /// When the engine first saw this transfer — either ingested fresh or
    /// reconstructed by recovery. Observability only; no stage reads it.
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Construct a fresh transfer in `Ready` state, as ingest does.
    pub fn new(data: TransferData) -> Self {
        Self {
            id: TransferId::new(),
            data,
            state: TransferState::Ready,
            result: None,
            created_at: Utc::now(),
        }
    }

    pub fn asset_id(&self) -> &AssetId {
        &self.data.asset_id
    }
}
