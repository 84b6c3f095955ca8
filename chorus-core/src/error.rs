use thiserror::Error;

/// Error kinds the orchestrator distinguishes at the slot boundary.
///
/// Decision backend failures are recovered locally (the pending advice
/// is simply left unchanged); session errors fail the slot, which is
/// logged and skipped so the run continues.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("session error: {0}")]
    Session(String),

    #[error("decision backend error: {0}")]
    DecisionBackend(String),
}
