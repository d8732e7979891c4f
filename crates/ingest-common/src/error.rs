//! Error types shared across the ingestion engine. Subsystem-specific errors
//! (job store, gate, service) live in `ingest-core` alongside the code that
//! raises them; this module holds only the state-machine error, since every
//! crate needs to be able to name an illegal transition.

use thiserror::Error;

use crate::enums::JobStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal transition from {current} to {target}")]
    IllegalTransition {
        current: JobStatus,
        target: JobStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_display_names_both_states() {
        let err = StateError::IllegalTransition {
            current: JobStatus::Completed,
            target: JobStatus::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let err = StateError::IllegalTransition {
            current: JobStatus::Pending,
            target: JobStatus::Paused,
        };
        assert_std_error(&err);
    }
}
