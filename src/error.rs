use thiserror::Error;

/// Failures the call controller and its collaborators can report.
///
/// None of these cross the relay: a client's fault stays on that client.
#[derive(Debug, Error)]
pub enum CallError {
    /// Send on a closed or absent signaling channel.
    #[error("signaling channel unavailable: {0}")]
    Transport(String),
    #[error("malformed signaling message: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("local media access denied: {0}")]
    MediaAccessDenied(String),
    #[error("session negotiation failed: {0}")]
    Negotiation(String),
    /// Non-fatal: the candidate is dropped and negotiation continues.
    #[error("candidate rejected: {0}")]
    Candidate(String),
}

impl CallError {
    /// Whether the controller must collapse the call back to idle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MediaAccessDenied(_) | Self::Negotiation(_))
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
