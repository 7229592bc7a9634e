use serde::{Deserialize, Serialize};

/// Machine-readable error codes for HTTP error bodies.
/// Shared by every route the workspace serves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    IoError,
    Internal,
}

impl ErrorCode {
    /// Suggested HTTP status code for this error.
    /// Transport-agnostic (returns u16, not an axum type).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::IoError | Self::Internal => 500,
        }
    }
}
