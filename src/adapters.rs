//! Initiator / Responder adapter contracts (C2 boundary).
//!
//! These traits are the engine's only interface to the outside world. The
//! concrete ledger clients (blockchain clients, DB-backed adapters, test
//! doubles) live outside this crate; only their contracts are defined here.
//!
//! `StateAwareInitiator` / `StateAwareResponder` extend the base contracts
//! with `query_by_state`, used exclusively by [`crate::recovery`]. An
//! adapter implements the state-aware variant only if its ledger can answer
//! that query; plain `Initiator` / `Responder` implementors skip recovery.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::transfer::{AssetId, Transfer, TransferData};

/// Ledger-side asset state tags used by the state-aware recovery protocol.
///
/// `TransferOut` is only ever queried on the Initiator; `Here` / `NotHere`
/// only on the Responder. The single enum exists for convenience — adapters
/// are free to reject tags they don't recognize with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerState {
    /// Asset marked as outbound at the source; not yet destroyed.
    TransferOut,
    /// Asset materialized at this ledger.
    Here,
    /// Asset not present at this ledger.
    NotHere,
}

/// Source-ledger adapter: originates transfer intents.
#[async_trait]
pub trait Initiator: Send + Sync {
    /// Blocks until at least one new transfer is available.
    ///
    /// Returned transfer data has no engine-assigned state yet — ingest
    /// wraps it in a fresh [`Transfer`] at `Ready`.
    async fn poll_for_new_transfers(&self) -> anyhow::Result<Vec<TransferData>>;

    /// Durably records the source-side release of the asset.
    ///
    /// Called at most once per transfer per engine run. Idempotence across
    /// runs (e.g. after a crash and restart) is the adapter's job.
    async fn commit(&self, transfer: &Transfer) -> anyhow::Result<()>;

    /// Durably restores the source-side asset after a failed hand-off.
    async fn abort(&self, transfer: &Transfer) -> anyhow::Result<()>;
}

/// Destination-ledger adapter: materializes transfers.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Attempts to materialize the asset at the destination.
    ///
    /// `Ok(true)` means the asset now exists at the destination; `Ok(false)`
    /// means the attempt failed and the destination is unchanged. An `Err`
    /// must also leave the destination ledger unchanged — the engine treats
    /// it identically to `Ok(false)`.
    async fn receive(&self, transfer: &Transfer) -> anyhow::Result<bool>;
}

/// Initiator variant that can report which assets are in a given ledger
/// state, used by recovery to reconcile in-flight transfers after a crash.
#[async_trait]
pub trait StateAwareInitiator: Initiator {
    /// Recognizes [`LedgerState::TransferOut`].
    async fn query_by_state(&self, state: LedgerState) -> anyhow::Result<HashSet<AssetId>>;
}

/// Responder variant that can report which assets are in a given ledger
/// state, used by recovery to reconcile in-flight transfers after a crash.
#[async_trait]
pub trait StateAwareResponder: Responder {
    /// Recognizes [`LedgerState::Here`] and [`LedgerState::NotHere`].
    async fn query_by_state(&self, state: LedgerState) -> anyhow::Result<HashSet<AssetId>>;
}
