//! Main loop and stage operations (C2 + C3).
//!
//! Four stage operations drive a mutable pool of in-flight transfers. Two
//! are triggers that block waiting for external progress (`ingest`,
//! `collect`); two are actions that make local progress and return
//! immediately (`dispatch`, `finalize`). The loop interleaves them so that
//! it blocks only on "new work arrived" or "an in-flight transfer
//! completed", whichever comes first, and always drains whatever the
//! latest trigger delivered before the next iteration.
//!
//! Scheduling is single-threaded and cooperative: everything here runs on
//! one logical task, suspending only at the await points named in the
//! design (ingest's poll, collect's join, and the combined wait between
//! them). Concurrent I/O against the two adapters happens through the
//! `receive` tasks tracked in a [`JoinSet`], which doubles as the
//! per-transfer in-flight handle — membership in the set *is* the
//! reference, rather than a literal field on [`Transfer`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::{self, JoinSet};
use tracing::{error, warn};

use crate::adapters::{Initiator, Responder};
use crate::error::EngineError;
use crate::transfer::{ReceiveOutcome, Transfer, TransferId, TransferState};

/// Result of a single `receive` task: which transfer it was for, whether it
/// succeeded, and (on failure) an optional adapter-provided detail.
type ReceiveResult = (TransferId, bool, Option<String>);

/// The interledger engine: pulls new transfers from the Initiator,
/// dispatches them to the Responder, collects outcomes, and drives the
/// Initiator to commit or abort each one.
///
/// Construct with [`Engine::new`] for a plain run, or with
/// [`Engine::new_with_recovery`] (see [`crate::recovery`]) when both
/// adapters support state-aware queries and in-flight transfers should be
/// reconciled from ledger state at startup.
pub struct Engine<I, R> {
    initiator: Arc<I>,
    responder: Arc<R>,
    /// Transfers in `Ready`, not yet dispatched.
    pool: VecDeque<Transfer>,
    /// Transfers in `Sent` or `Completed`, keyed by their internal id.
    inflight: HashMap<TransferId, Transfer>,
    /// Outstanding `receive` tasks, tagged by transfer id.
    receiving: JoinSet<ReceiveResult>,
    /// Maps each outstanding task's tokio-assigned id back to the transfer
    /// it's receiving for, so a panicked task can still be logged with its
    /// transfer id — `JoinError` carries the task id but not our payload.
    /// Entries are removed as their task is drained by `collect`.
    task_ids: HashMap<task::Id, TransferId>,
    /// `|{t in inflight : t.state in {Sent, Completed}}|` — kept in sync by
    /// dispatch (+1) and finalize (-1).
    pending: usize,
    running: Arc<AtomicBool>,
    committed: Arc<Mutex<Vec<Transfer>>>,
    aborted: Arc<Mutex<Vec<Transfer>>>,
}

/// A cheap, cloneable remote control for a running [`Engine`].
///
/// The main loop borrows the engine mutably for the duration of `run`, so
/// stopping it or reading its observability counters from another task
/// goes through this handle instead.
#[derive(Clone)]
pub struct EngineHandle {
    running: Arc<AtomicBool>,
    committed: Arc<Mutex<Vec<Transfer>>>,
    aborted: Arc<Mutex<Vec<Transfer>>>,
}

impl EngineHandle {
    /// Requests a graceful stop. The loop exits after its current
    /// iteration completes — in-flight `receive` handles and commit/abort
    /// requests are not cancelled.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().expect("poisoned").len()
    }

    pub fn aborted_count(&self) -> usize {
        self.aborted.lock().expect("poisoned").len()
    }

    pub fn committed_results(&self) -> Vec<Transfer> {
        self.committed.lock().expect("poisoned").clone()
    }

    pub fn aborted_results(&self) -> Vec<Transfer> {
        self.aborted.lock().expect("poisoned").clone()
    }
}

impl<I, R> Engine<I, R> {
    /// Crate-internal constructor used both by `new` (empty pool/inflight)
    /// and by recovery (pre-populated from reconciled ledger state).
    pub(crate) fn from_parts(
        initiator: Arc<I>,
        responder: Arc<R>,
        pool: VecDeque<Transfer>,
        inflight: HashMap<TransferId, Transfer>,
        pending: usize,
    ) -> Self {
        Self {
            initiator,
            responder,
            pool,
            inflight,
            receiving: JoinSet::new(),
            task_ids: HashMap::new(),
            pending,
            running: Arc::new(AtomicBool::new(false)),
            committed: Arc::new(Mutex::new(Vec::new())),
            aborted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of transfers dispatched but not yet finalized.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            running: self.running.clone(),
            committed: self.committed.clone(),
            aborted: self.aborted.clone(),
        }
    }
}

impl<I: Initiator + 'static, R: Responder + 'static> Engine<I, R> {
    /// Build an engine with no recovery step — `pool` and `inflight` start
    /// empty and are populated only by `ingest` as the loop runs.
    pub fn new(initiator: I, responder: R) -> Self {
        Self::from_parts(
            Arc::new(initiator),
            Arc::new(responder),
            VecDeque::new(),
            HashMap::new(),
            0,
        )
    }

    /// Runs the main loop until [`EngineHandle::stop`] is called or ingest
    /// returns a fatal error.
    ///
    /// Each iteration: start ingest; if there's no other work outstanding,
    /// wait for it, otherwise race it against collect; then run dispatch
    /// and finalize to drain whatever the trigger delivered.
    ///
    /// "No other work outstanding" means both `pending == 0` (nothing
    /// dispatched and awaiting a result) and `pool` empty (nothing already
    /// waiting to be dispatched). The latter matters on the very first
    /// iteration after recovery seeds a READY-equivalent `pool` with
    /// `pending` still zero: without it, the loop would block on ingest
    /// forever and never dispatch the recovered transfers. When `pool` is
    /// non-empty but `pending` is zero, `collect` resolves immediately
    /// (nothing is in `receiving` yet) so the race falls through to
    /// dispatch without waiting on a fresh ingest event.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            let initiator = self.initiator.clone();

            if self.pending == 0 && self.pool.is_empty() {
                Self::ingest(initiator.as_ref(), &mut self.pool).await?;
            } else {
                tokio::select! {
                    res = Self::ingest(initiator.as_ref(), &mut self.pool) => { res?; }
                    _ = Self::collect(&mut self.receiving, &mut self.task_ids, &mut self.inflight) => {}
                }
            }

            self.dispatch();
            self.finalize();
        }

        Ok(())
    }

    /// Trigger: blocks until the Initiator reports at least one new
    /// transfer, then appends them to `pool` in `Ready` state. On error,
    /// propagates unchanged without mutating `pool`.
    async fn ingest(initiator: &I, pool: &mut VecDeque<Transfer>) -> Result<usize, EngineError> {
        let transfers = initiator
            .poll_for_new_transfers()
            .await
            .map_err(EngineError::Ingest)?;

        let count = transfers.len();
        if count > 0 {
            pool.extend(transfers.into_iter().map(Transfer::new));
        }
        Ok(count)
    }

    /// Trigger: blocks until at least one outstanding `receive` task
    /// completes, then drains every task that has completed so far,
    /// transitioning each matching transfer `Sent -> Completed`.
    async fn collect(
        receiving: &mut JoinSet<ReceiveResult>,
        task_ids: &mut HashMap<task::Id, TransferId>,
        inflight: &mut HashMap<TransferId, Transfer>,
    ) {
        if let Some(outcome) = receiving.join_next_with_id().await {
            Self::handle_receive_outcome(task_ids, inflight, outcome);
        }

        while let Some(outcome) = receiving.try_join_next_with_id() {
            Self::handle_receive_outcome(task_ids, inflight, outcome);
        }
    }

    /// Applies one joined task's outcome, whether it completed normally or
    /// panicked. Always removes the task's `task_ids` entry so the map
    /// doesn't grow unbounded across the engine's lifetime.
    fn handle_receive_outcome(
        task_ids: &mut HashMap<task::Id, TransferId>,
        inflight: &mut HashMap<TransferId, Transfer>,
        outcome: Result<(task::Id, ReceiveResult), task::JoinError>,
    ) {
        match outcome {
            Ok((task_id, result)) => {
                task_ids.remove(&task_id);
                Self::apply_receive_result(inflight, result);
            }
            Err(join_err) => {
                let transfer_id = task_ids.remove(&join_err.id());
                error!(
                    transfer_id = ?transfer_id,
                    error = %join_err,
                    "receive task panicked"
                );
            }
        }
    }

    fn apply_receive_result(
        inflight: &mut HashMap<TransferId, Transfer>,
        (id, success, detail): ReceiveResult,
    ) {
        if let Some(transfer) = inflight.get_mut(&id) {
            if transfer.state == TransferState::Sent {
                transfer.result = Some(ReceiveOutcome { success, detail });
                transfer.state = TransferState::Completed;
            }
        }
    }

    /// Action: moves every `Ready` transfer from `pool` to `inflight`,
    /// spawning its `receive` call without waiting on it. Never blocks.
    fn dispatch(&mut self) {
        while let Some(mut transfer) = self.pool.pop_front() {
            transfer.state = TransferState::Sent;
            let id = transfer.id;
            let responder = self.responder.clone();
            let snapshot = transfer.clone();

            let abort_handle = self.receiving.spawn(async move {
                match responder.receive(&snapshot).await {
                    Ok(success) => (id, success, None),
                    Err(e) => {
                        warn!(transfer_id = %id, error = %e, "receive raised, treating as failure");
                        (id, false, Some(e.to_string()))
                    }
                }
            });
            self.task_ids.insert(abort_handle.id(), id);

            self.inflight.insert(id, transfer);
            self.pending += 1;
        }
    }

    /// Action: for every `Completed` transfer, fires commit or abort on the
    /// Initiator depending on the receive outcome and transitions it to
    /// `Processed`. The commit/abort request is fire-and-forget: `pending`
    /// drops immediately, regardless of when the adapter call finishes.
    fn finalize(&mut self) {
        let completed: Vec<TransferId> = self
            .inflight
            .iter()
            .filter(|(_, t)| t.state == TransferState::Completed)
            .map(|(id, _)| *id)
            .collect();

        for id in completed {
            let mut transfer = self
                .inflight
                .remove(&id)
                .expect("id was just read from inflight");
            let outcome = transfer
                .result
                .clone()
                .expect("Completed transfer always carries a result");
            transfer.state = TransferState::Processed;

            let initiator = self.initiator.clone();
            let for_task = transfer.clone();

            if outcome.success {
                tokio::spawn(async move {
                    if let Err(e) = initiator.commit(&for_task).await {
                        error!(transfer_id = %for_task.id, error = %e, "commit failed");
                    }
                });
                self.committed.lock().expect("poisoned").push(transfer);
            } else {
                tokio::spawn(async move {
                    if let Err(e) = initiator.abort(&for_task).await {
                        error!(transfer_id = %for_task.id, error = %e, "abort failed");
                    }
                });
                self.aborted.lock().expect("poisoned").push(transfer);
            }

            self.pending -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::mock::{MockInitiator, MockResponder};
    use crate::transfer::{AssetId, TransferData};

    fn engine_with_mocks() -> (
        Engine<MockInitiator, MockResponder>,
        Arc<MockInitiator>,
        Arc<MockResponder>,
    ) {
        let initiator = Arc::new(MockInitiator::new());
        let responder = Arc::new(MockResponder::new());
        let engine = Engine::from_parts(
            initiator.clone(),
            responder.clone(),
            VecDeque::new(),
            HashMap::new(),
            0,
        );
        (engine, initiator, responder)
    }

    #[tokio::test]
    async fn dispatch_moves_ready_transfers_into_inflight() {
        let (mut engine, _initiator, _responder) = engine_with_mocks();
        engine.pool.push_back(Transfer::new(TransferData::new("a")));

        engine.dispatch();

        assert!(engine.pool.is_empty());
        assert_eq!(engine.inflight.len(), 1);
        assert_eq!(engine.pending, 1);
    }

    #[tokio::test]
    async fn finalize_commits_on_success_and_decrements_pending() {
        let (mut engine, initiator, _responder) = engine_with_mocks();
        let mut transfer = Transfer::new(TransferData::new("a"));
        transfer.state = TransferState::Completed;
        transfer.result = Some(ReceiveOutcome {
            success: true,
            detail: None,
        });
        engine.inflight.insert(transfer.id, transfer);
        engine.pending = 1;

        engine.finalize();

        // fire-and-forget: pending drops immediately, before the spawned
        // commit task necessarily runs.
        assert_eq!(engine.pending, 0);
        assert!(engine.inflight.is_empty());
        assert_eq!(engine.committed.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(initiator.committed(), vec![AssetId::new("a")]);
    }

    #[tokio::test]
    async fn finalize_aborts_on_failure() {
        let (mut engine, initiator, _responder) = engine_with_mocks();
        let mut transfer = Transfer::new(TransferData::new("b"));
        transfer.state = TransferState::Completed;
        transfer.result = Some(ReceiveOutcome {
            success: false,
            detail: Some("nope".into()),
        });
        engine.inflight.insert(transfer.id, transfer);
        engine.pending = 1;

        engine.finalize();

        assert_eq!(engine.pending, 0);
        assert_eq!(engine.aborted.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(initiator.aborted(), vec![AssetId::new("b")]);
    }

    #[tokio::test]
    async fn collect_only_advances_sent_transfers() {
        let (mut engine, _initiator, responder) = engine_with_mocks();
        let transfer = Transfer::new(TransferData::new("a"));
        let id = transfer.id;
        engine.inflight.insert(id, transfer);
        // dispatch would normally flip this to Sent before spawning;
        // simulate that directly and spawn the receive task ourselves.
        engine.inflight.get_mut(&id).unwrap().state = TransferState::Sent;
        let snapshot = engine.inflight[&id].clone();
        let responder = responder.clone();
        let abort_handle = engine.receiving.spawn(async move {
            let ok = responder.receive(&snapshot).await.unwrap();
            (id, ok, None)
        });
        engine.task_ids.insert(abort_handle.id(), id);

        Engine::<MockInitiator, MockResponder>::collect(
            &mut engine.receiving,
            &mut engine.task_ids,
            &mut engine.inflight,
        )
        .await;

        assert_eq!(engine.inflight[&id].state, TransferState::Completed);
        assert!(engine.inflight[&id].result.as_ref().unwrap().success);
        assert!(engine.task_ids.is_empty());
    }

    #[tokio::test]
    async fn collect_logs_panicked_task_with_its_transfer_id() {
        let (mut engine, _initiator, _responder) = engine_with_mocks();
        let transfer = Transfer::new(TransferData::new("panics"));
        let id = transfer.id;
        engine.inflight.insert(id, transfer);
        engine.inflight.get_mut(&id).unwrap().state = TransferState::Sent;

        let abort_handle = engine
            .receiving
            .spawn(async move { panic!("receive task blew up") });
        engine.task_ids.insert(abort_handle.id(), id);

        Engine::<MockInitiator, MockResponder>::collect(
            &mut engine.receiving,
            &mut engine.task_ids,
            &mut engine.inflight,
        )
        .await;

        // the panicked transfer is neither advanced nor left tracked —
        // only the log record (asserted by inspection, not captured here)
        // carries its id.
        assert_eq!(engine.inflight[&id].state, TransferState::Sent);
        assert!(engine.task_ids.is_empty());
    }

    #[tokio::test]
    async fn handle_stop_halts_the_loop() {
        let (mut engine, initiator, _responder) = engine_with_mocks();
        initiator.push_ready(TransferData::new("only"));
        let handle = engine.handle();

        let run = tokio::spawn(async move { engine.run().await });

        // let the single transfer fully flow through before stopping.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();

        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("run should exit after stop")
            .unwrap()
            .unwrap();

        assert_eq!(handle.committed_count(), 1);
    }
}
