//! Startup reconciliation for state-aware adapters (C4).
//!
//! A plain [`Engine`] starts with an empty pool and no in-flight transfers —
//! fine for a fresh process, wrong after a crash: any transfer the old
//! process had accepted from the Initiator but not yet fully processed is
//! otherwise silently forgotten. When both adapters implement the
//! state-aware traits, [`Engine::new_with_recovery`] rebuilds that missing
//! state from two ledger queries instead, before the loop ever runs.
//!
//! The reconciliation itself is two set intersections over asset ids:
//!
//! - `TransferOut ∩ NotHere` — the source released the asset but the
//!   destination never saw it land. Equivalent to `Ready`: re-queued into
//!   the pool so dispatch sends it again.
//! - `TransferOut ∩ Here` — the source released the asset and the
//!   destination already has it. Equivalent to `Completed` with a
//!   successful outcome: queued directly into `inflight` so finalize
//!   commits it on the next iteration, without re-sending to the Responder.
//!
//! Assets the Initiator never marked `TransferOut` are untouched — they
//! were never part of a hand-off this engine would have started.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::info;

use crate::adapters::{LedgerState, StateAwareInitiator, StateAwareResponder};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::transfer::{ReceiveOutcome, Transfer, TransferData, TransferId, TransferState};

impl<I, R> Engine<I, R>
where
    I: StateAwareInitiator + 'static,
    R: StateAwareResponder + 'static,
{
    /// Builds an engine whose `pool` and `inflight` are pre-populated from
    /// the adapters' current ledger state, per the two intersections above.
    pub async fn new_with_recovery(initiator: I, responder: R) -> Result<Self, EngineError> {
        let initiator = Arc::new(initiator);
        let responder = Arc::new(responder);

        let (pool, inflight) = reconcile(initiator.as_ref(), responder.as_ref()).await?;

        info!(
            recovered_ready = pool.len(),
            recovered_inflight = inflight.len(),
            "reconciled in-flight transfers from ledger state"
        );

        let pending = inflight.len();
        Ok(Engine::from_parts(
            initiator, responder, pool, inflight, pending,
        ))
    }
}

async fn reconcile<I, R>(
    initiator: &I,
    responder: &R,
) -> Result<(VecDeque<Transfer>, HashMap<TransferId, Transfer>), EngineError>
where
    I: StateAwareInitiator,
    R: StateAwareResponder,
{
    let transfer_out = initiator
        .query_by_state(LedgerState::TransferOut)
        .await
        .map_err(EngineError::Recovery)?;
    let not_here = responder
        .query_by_state(LedgerState::NotHere)
        .await
        .map_err(EngineError::Recovery)?;
    let here = responder
        .query_by_state(LedgerState::Here)
        .await
        .map_err(EngineError::Recovery)?;

    let pool: VecDeque<Transfer> = transfer_out
        .intersection(&not_here)
        .map(|asset_id| Transfer::new(TransferData::new(asset_id.clone())))
        .collect();

    let mut inflight = HashMap::new();
    for asset_id in transfer_out.intersection(&here) {
        let mut transfer = Transfer::new(TransferData::new(asset_id.clone()));
        transfer.state = TransferState::Completed;
        transfer.result = Some(ReceiveOutcome {
            success: true,
            detail: None,
        });
        inflight.insert(transfer.id, transfer);
    }

    Ok((pool, inflight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockInitiator, MockResponder};
    use crate::transfer::AssetId;

    #[tokio::test]
    async fn ready_equivalent_goes_to_pool() {
        let initiator = MockInitiator::new();
        let responder = MockResponder::new();
        initiator.seed_transfer_out([AssetId::new("a"), AssetId::new("b")]);
        responder.seed_not_here([AssetId::new("a")]);
        responder.seed_here([AssetId::new("b")]);

        let engine = Engine::new_with_recovery(initiator, responder)
            .await
            .unwrap();

        assert_eq!(engine.pending(), 1);
    }

    #[tokio::test]
    async fn completed_equivalent_goes_to_inflight_as_success() {
        let initiator = MockInitiator::new();
        let responder = MockResponder::new();
        initiator.seed_transfer_out([AssetId::new("a")]);
        responder.seed_here([AssetId::new("a")]);

        let engine = Engine::new_with_recovery(initiator, responder)
            .await
            .unwrap();

        assert_eq!(engine.pending(), 1);
    }

    #[tokio::test]
    async fn assets_never_marked_transfer_out_are_ignored() {
        let initiator = MockInitiator::new();
        let responder = MockResponder::new();
        responder.seed_here([AssetId::new("untouched")]);

        let engine = Engine::new_with_recovery(initiator, responder)
            .await
            .unwrap();

        assert_eq!(engine.pending(), 0);
    }
}
