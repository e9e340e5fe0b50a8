use thiserror::Error;

/// Failure taxonomy for session operations.
///
/// Each surfaced failure also sets the session's boolean error flag; `Busy`
/// is the one exception, reporting a locally suppressed duplicate submission.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("validation failed: {0}")]
    Validation(&'static str),
    #[error("credentials rejected by server")]
    Auth,
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("live channel failure: {0}")]
    Channel(String),
    #[error("server reported failure for {0}")]
    ServerLogic(&'static str),
    #[error("no chat available for this account")]
    NoChatAvailable,
    #[error("operation requires the admin capability")]
    AdminRequired,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("another request is already in flight")]
    Busy,
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
