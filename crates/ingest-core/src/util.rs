//! Small helpers shared by the pipeline stages and coordinator.

use crate::error::StoreError;

/// Runs a best-effort phase-row mutation: the error is logged and
/// discarded rather than propagated, per §4.2's "phase-row mutations are
/// best-effort" rule. Grounded on the Python `phase_tracking.py`
/// `*_noncritical` wrapper functions.
pub fn log_and_swallow(what: &str, result: Result<(), StoreError>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "{} failed, continuing without it", what);
    }
}
