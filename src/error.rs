use thiserror::Error;

/// Caller-side mistakes when asking for a quick trace. The UI should never get into a state that
/// produces these, so they are surfaced instead of papered over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuickTraceError {
    #[error("Quick trace is empty")]
    EmptyTrace,
    #[error("Current event not in trace navigator!")]
    CurrentEventNotInTrace,
    #[error("No relevant path exists!")]
    NoRelevantPath,
}
