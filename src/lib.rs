//! Interledger — concurrent two-phase asset hand-off coordinator
//!
//! Coordinates asset transfers between two independent ledgers that cannot
//! observe each other directly. One side (the [`Initiator`](adapters::Initiator))
//! marks an asset as outbound; the engine forwards the intent to the other
//! side (the [`Responder`](adapters::Responder)), which attempts to
//! materialize the asset; the engine then drives the Initiator to commit or
//! abort depending on the Responder's outcome.
//!
//! # Modules
//!
//! - [`transfer`] - per-transfer record and the four-state protocol FSM
//! - [`adapters`] - the `Initiator` / `Responder` adapter contracts
//! - [`error`] - engine-level error taxonomy
//! - [`engine`] - the pipelined main loop: ingest, dispatch, collect, finalize
//! - [`recovery`] - startup reconciliation for the state-aware adapter variant
//!
//! The engine itself never persists anything: all durable state lives in the
//! Initiator and Responder adapters. See [`engine::Engine`] for the entry point.

pub mod adapters;
pub mod engine;
pub mod error;
pub mod recovery;
pub mod transfer;


pub use adapters::{Initiator, LedgerState, Responder, StateAwareInitiator, StateAwareResponder};
pub use engine::{Engine, EngineHandle};
pub use error::EngineError;
pub use transfer::{AssetId, ReceiveOutcome, Transfer, TransferData, TransferId, TransferState};
