//! Engine-level error taxonomy.
//!
//! Errors from the adapters are boxed into [`anyhow::Error`] at the
//! boundary — the engine does not care which concrete ledger client raised
//! them, only where in the pipeline the failure occurred.

use thiserror::Error;

/// Errors the main loop surfaces to its caller.
///
/// Per the error handling design: ingest failures propagate unchanged and
/// abort the current iteration without mutating any transfer state.
/// Receive failures and commit/abort failures never reach this type — they
/// are protocol outcomes (see `crate::engine`) or fire-and-forget, not
/// engine-fatal conditions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ingest failed: {0}")]
    Ingest(#[source] anyhow::Error),

    #[error("recovery failed: {0}")]
    Recovery(#[source] anyhow::Error),
}
