use thiserror::Error;

/// Failures of one call to the decision service.
///
/// Every variant is retried by [`crate::brain::RetryPolicy`]; only the last one reaches the caller.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rate limiting, 5xx, or the request never got an answer.
    #[error("API server error: {0}")]
    Transient(String),

    /// Any other non-2xx status.
    #[error("API Error ({status}): {message}")]
    Request { status: u16, message: String },

    /// A 2xx body without `candidates[0].content.parts[0].text`.
    #[error("Invalid response structure from decision service: {0}")]
    Structural(String),

    /// The text was expected to be JSON and was not.
    #[error("AI returned malformed JSON: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ServiceError {
    /// The request URL carries the API key, so it is stripped from the message.
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transient(err.without_url().to_string())
    }
}

/// Failure of a single mission step. Always fatal for the mission.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Secret \"{0}\" not in Vault.")]
    SecretNotFound(String),

    #[error("{command} requires a target selector or URL")]
    MissingTarget { command: &'static str },

    #[error("{command} requires a value")]
    MissingValue { command: &'static str },

    #[error("a secret reference cannot name a context variable")]
    SecretAsVariable,

    #[error("No element matches selector: {0}")]
    ElementNotFound(String),

    #[error("Timeout waiting for element: {selector}")]
    Timeout { selector: String, timeout_ms: u64 },

    /// Navigation, load wait or script round-trip failed inside the session provider.
    #[error("{0:#}")]
    Session(anyhow::Error),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Why a mission never reached its first step.
#[derive(Debug, Error)]
pub enum MissionError {
    #[error("Could not create phantom tab: {0:#}")]
    SessionCreation(anyhow::Error),
}
