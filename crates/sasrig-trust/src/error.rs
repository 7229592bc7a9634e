//! Trust domain error types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sasrig_common::error::ErrorCode;

use crate::store::RecordKind;

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("{kind} missing from the store (expected {})", path.display())]
    MissingCertificate { kind: RecordKind, path: PathBuf },

    #[error("{kind} at {} is unparseable: {detail}", path.display())]
    UnparseableCertificate {
        kind: RecordKind,
        path: PathBuf,
        detail: String,
    },

    #[error("{kind} expired at {not_after}")]
    ExpiredCertificate {
        kind: RecordKind,
        not_after: DateTime<Utc>,
    },

    #[error("certificate generation failed: {0}")]
    GenerationFailure(String),

    #[error("store write failed at {}: {source}", path.display())]
    StoreWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not bind CRL listener on {addr}: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("regeneration already in progress: lock held at {}", path.display())]
    LockContention { path: PathBuf },

    #[error("{operation} did not finish within {}s", timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("store is inconsistent: {0}")]
    InconsistentStore(String),

    #[error("harness launch failed: {0}")]
    LaunchFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<&TrustError> for ErrorCode {
    fn from(e: &TrustError) -> Self {
        match e {
            TrustError::MissingCertificate { .. } => ErrorCode::NotFound,
            TrustError::StoreWriteFailure { .. } | TrustError::Io(_) => ErrorCode::IoError,
            TrustError::UnparseableCertificate { .. }
            | TrustError::ExpiredCertificate { .. }
            | TrustError::GenerationFailure(_)
            | TrustError::BindFailure { .. }
            | TrustError::LockContention { .. }
            | TrustError::Timeout { .. }
            | TrustError::InconsistentStore(_)
            | TrustError::LaunchFailure(_)
            | TrustError::Internal(_) => ErrorCode::Internal,
        }
    }
}
