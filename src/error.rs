/// Unified error types for the Aurora Gambit AppView
use thiserror::Error;

/// Main error type for the AppView
#[derive(Error, Debug)]
pub enum AppViewError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity resolution errors
    #[error("Identity resolution error: {0}")]
    IdentityResolution(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failures talking to the player's PDS or the feed endpoints
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// Submission precondition failures
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// WebSocket errors from the feed subscriptions
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Precondition failures on the synchronous submission path.
///
/// Each variant corresponds to an XRPC error name the request surface
/// returns verbatim; `error_code` yields that name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Game is not active (status: {0})")]
    GameNotActive(String),

    #[error("Not your turn")]
    NotYourTurn,

    #[error("previousMove is required after the first move")]
    PreviousMoveRequired,

    #[error("previousMove does not reference the latest move")]
    InvalidPreviousMove,

    #[error("You cannot challenge yourself")]
    ChallengeSelf,

    #[error("startsFirst must be either the challenger or the challenged player")]
    InvalidPlayer,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SubmitError {
    /// XRPC error name for this condition
    pub fn error_code(&self) -> &'static str {
        match self {
            SubmitError::GameNotFound(_) => "GameNotFound",
            SubmitError::GameNotActive(_) => "GameNotActive",
            SubmitError::NotYourTurn => "NotYourTurn",
            SubmitError::PreviousMoveRequired => "PreviousMoveRequired",
            SubmitError::InvalidPreviousMove => "InvalidPreviousMove",
            SubmitError::ChallengeSelf => "ChallengeSelf",
            SubmitError::InvalidPlayer => "InvalidPlayer",
            SubmitError::InvalidRequest(_) => "InvalidRequest",
        }
    }
}

/// Result type alias for AppView operations
pub type AppViewResult<T> = Result<T, AppViewError>;
