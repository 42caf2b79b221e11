use std::io;

use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Errors that abort a whole batch run. Per-record geocoding problems never
/// surface here; they are folded into [`GeocodeFailure`] and reported per
/// outcome.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("mapped column `{0}` is not present in the batch")]
    MissingColumn(String),
    #[error("geocoding backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    NegativeResult,
    Permanent,
}

/// Why a single query string did not yield coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum GeocodeFailure {
    #[error("geocoder did not respond in time")]
    Timeout,
    #[error("geocoder unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("no match for query")]
    NotFound,
    #[error("query rejected: {0}")]
    Malformed(String),
    #[error("unexpected backend response: {0}")]
    Backend(String),
}

impl GeocodeFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            GeocodeFailure::Timeout | GeocodeFailure::ServiceUnavailable(_) => {
                FailureKind::Transient
            }
            GeocodeFailure::NotFound => FailureKind::NegativeResult,
            GeocodeFailure::Malformed(_) | GeocodeFailure::Backend(_) => FailureKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}
