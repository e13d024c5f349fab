use thiserror::Error;

/// Failure taxonomy for the authentication core.
///
/// `Configuration` is fatal wiring (unknown strategy, colocated origins),
/// `Authorization` is an expected per-attempt failure, `Transport` is a
/// network fault talking to an upstream identity service. Nothing here is
/// retried internally; callers decide how to surface each variant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Authorization(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub(crate) fn authorization(reason: impl Into<String>) -> Self {
        Self::Authorization(reason.into())
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
