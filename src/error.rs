use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

/// Upstream error codes that signal throttling.
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];
const AUTH_ERROR_CODE: i64 = 190;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Warehouse: {0}")]
    Warehouse(#[from] rusqlite::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'The date supplied {date} is invalid'")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("API request failed: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("API responded with status {status}, code {code}: {message}")]
    Api {
        status: u16,
        code: i64,
        subcode: Option<i64>,
        message: String,
    },

    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("Missing configuration value: {name}")]
    MissingConfig { name: String },

    #[error("{message}")]
    NoData { message: String },
}

impl Error {
    /// Authentication failures cannot heal by retrying.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Api { status, code, message, .. } => {
                *code == AUTH_ERROR_CODE || *status == 401 || message.contains("(#190)")
            }
            Error::ApiFailure(err) => err.status().is_some_and(|s| s.as_u16() == 401),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Api { status, code, message, .. } => {
                RATE_LIMIT_CODES.contains(code)
                    || (80000..=80014).contains(code)
                    || *status == 429
                    || mentions_rate_limit(message)
            }
            Error::ApiFailure(err) => {
                err.status().is_some_and(|s| s.as_u16() == 429)
                    || mentions_rate_limit(&err.to_string())
            }
            _ => false,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit") || message.contains("too many calls")
}
