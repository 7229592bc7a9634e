//! Certificate store inspection.
//!
//! Reads a store and reports per-record validity plus bundle-consistency
//! findings. Inspection never fails on missing or corrupt material: an empty
//! store on first run is an expected steady state, so every anomaly is a
//! reported status rather than an error. Nothing here writes to the store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::store::{RecordKind, StorePaths};

/// Validity classification for one store record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Missing,
    Unparseable,
    Expired,
    NotYetValid,
    Valid,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordStatus::Missing => "missing",
            RecordStatus::Unparseable => "unparseable",
            RecordStatus::Expired => "expired",
            RecordStatus::NotYetValid => "not yet valid",
            RecordStatus::Valid => "valid",
        };
        f.write_str(s)
    }
}

/// What the inspector learned about one record.
///
/// Parsed fields are populated when the underlying file parses; a missing or
/// unparseable record carries only its status (and a parse detail).
#[derive(Debug, Clone, Serialize)]
pub struct CertificateRecord {
    pub kind: RecordKind,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CertificateRecord {
    fn absent(kind: RecordKind, status: RecordStatus, detail: Option<String>) -> Self {
        Self {
            kind,
            status,
            subject: None,
            issuer: None,
            serial: None,
            not_before: None,
            not_after: None,
            detail,
        }
    }
}

/// Cross-record finding that individual statuses cannot express.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ConsistencyIssue {
    MissingKey {
        role: RecordKind,
    },
    UnparseableKey {
        role: RecordKind,
        detail: String,
    },
    IssuerMismatch {
        record: RecordKind,
        issuer: String,
        ca_subject: String,
    },
    BadSignature {
        record: RecordKind,
        detail: String,
    },
}

impl ConsistencyIssue {
    /// True when regenerating the bundle resolves the finding.
    ///
    /// Key problems are fixed by minting fresh material. Issuer and signature
    /// mismatches on otherwise valid records mean something outside the
    /// lifecycle wrote the store; those are not silently papered over.
    pub fn regenerable(&self) -> bool {
        matches!(
            self,
            ConsistencyIssue::MissingKey { .. } | ConsistencyIssue::UnparseableKey { .. }
        )
    }
}

impl std::fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyIssue::MissingKey { role } => {
                write!(f, "{} private key is missing", role.role_name())
            }
            ConsistencyIssue::UnparseableKey { role, detail } => {
                write!(f, "{} private key is unparseable: {detail}", role.role_name())
            }
            ConsistencyIssue::IssuerMismatch {
                record,
                issuer,
                ca_subject,
            } => write!(
                f,
                "{record} issuer {issuer:?} does not match the CA subject {ca_subject:?}"
            ),
            ConsistencyIssue::BadSignature { record, detail } => {
                write!(f, "{record} signature does not verify against the CA: {detail}")
            }
        }
    }
}

/// Snapshot of one inspection pass. Recomputed per run, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ValidityReport {
    pub checked_at: DateTime<Utc>,
    pub store: PathBuf,
    pub records: Vec<CertificateRecord>,
    pub issues: Vec<ConsistencyIssue>,
}

impl ValidityReport {
    pub fn record(&self, kind: RecordKind) -> Option<&CertificateRecord> {
        self.records.iter().find(|r| r.kind == kind)
    }

    pub fn status(&self, kind: RecordKind) -> RecordStatus {
        self.record(kind)
            .map(|r| r.status)
            .unwrap_or(RecordStatus::Missing)
    }

    pub fn all_valid(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.status == RecordStatus::Valid)
    }

    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Reads every expected record of `store` and classifies it as of `now`.
///
/// The evaluation instant is a parameter so callers can pin it for
/// reproducible reports.
pub fn inspect(store: &StorePaths, now: DateTime<Utc>) -> ValidityReport {
    let ca = load_der(&store.cert_path(RecordKind::Ca));
    let server = load_der(&store.cert_path(RecordKind::Server));
    let client = load_der(&store.cert_path(RecordKind::Client));
    let crl = load_der(&store.cert_path(RecordKind::Crl));

    let records = vec![
        certificate_record(RecordKind::Ca, &ca, now),
        certificate_record(RecordKind::Server, &server, now),
        certificate_record(RecordKind::Client, &client, now),
        crl_record(&crl, now),
    ];
    let issues = consistency_issues(store, &ca, &server, &client, &crl);

    let valid = records
        .iter()
        .filter(|r| r.status == RecordStatus::Valid)
        .count();
    tracing::debug!(
        path = %store.root().display(),
        valid,
        issues = issues.len(),
        "Store inspected"
    );

    ValidityReport {
        checked_at: now,
        store: store.root().to_path_buf(),
        records,
        issues,
    }
}

// ── File loading ──────────────────────────────────────────────────

enum Loaded {
    Missing,
    Unreadable(String),
    Malformed(String),
    Pem(Vec<u8>),
}

fn load_der(path: &Path) -> Loaded {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Loaded::Missing,
        Err(err) => return Loaded::Unreadable(err.to_string()),
    };
    match pem::parse(&text) {
        Ok(block) => Loaded::Pem(block.contents().to_vec()),
        Err(err) => Loaded::Malformed(err.to_string()),
    }
}

// ── Record classification ─────────────────────────────────────────

fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn window_status(now: DateTime<Utc>, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> RecordStatus {
    if now < not_before {
        RecordStatus::NotYetValid
    } else if now > not_after {
        RecordStatus::Expired
    } else {
        RecordStatus::Valid
    }
}

fn certificate_record(kind: RecordKind, loaded: &Loaded, now: DateTime<Utc>) -> CertificateRecord {
    let der = match loaded {
        Loaded::Missing => return CertificateRecord::absent(kind, RecordStatus::Missing, None),
        Loaded::Unreadable(detail) | Loaded::Malformed(detail) => {
            return CertificateRecord::absent(kind, RecordStatus::Unparseable, Some(detail.clone()))
        }
        Loaded::Pem(der) => der,
    };
    match X509Certificate::from_der(der) {
        Ok((_, cert)) => {
            let not_before = timestamp_to_utc(cert.validity().not_before.timestamp());
            let not_after = timestamp_to_utc(cert.validity().not_after.timestamp());
            CertificateRecord {
                kind,
                status: window_status(now, not_before, not_after),
                subject: Some(cert.subject().to_string()),
                issuer: Some(cert.issuer().to_string()),
                serial: Some(cert.raw_serial_as_string()),
                not_before: Some(not_before),
                not_after: Some(not_after),
                detail: None,
            }
        }
        Err(err) => {
            CertificateRecord::absent(kind, RecordStatus::Unparseable, Some(err.to_string()))
        }
    }
}

fn crl_record(loaded: &Loaded, now: DateTime<Utc>) -> CertificateRecord {
    let kind = RecordKind::Crl;
    let der = match loaded {
        Loaded::Missing => return CertificateRecord::absent(kind, RecordStatus::Missing, None),
        Loaded::Unreadable(detail) | Loaded::Malformed(detail) => {
            return CertificateRecord::absent(kind, RecordStatus::Unparseable, Some(detail.clone()))
        }
        Loaded::Pem(der) => der,
    };
    match CertificateRevocationList::from_der(der) {
        Ok((_, crl)) => {
            let this_update = timestamp_to_utc(crl.last_update().timestamp());
            let next_update = crl.next_update().map(|t| timestamp_to_utc(t.timestamp()));
            let status = if now < this_update {
                RecordStatus::NotYetValid
            } else if next_update.is_some_and(|t| now > t) {
                RecordStatus::Expired
            } else {
                RecordStatus::Valid
            };
            CertificateRecord {
                kind,
                status,
                subject: None,
                issuer: Some(crl.issuer().to_string()),
                serial: None,
                not_before: Some(this_update),
                not_after: next_update,
                detail: None,
            }
        }
        Err(err) => {
            CertificateRecord::absent(kind, RecordStatus::Unparseable, Some(err.to_string()))
        }
    }
}

// ── Bundle consistency ────────────────────────────────────────────

fn consistency_issues(
    store: &StorePaths,
    ca: &Loaded,
    server: &Loaded,
    client: &Loaded,
    crl: &Loaded,
) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();

    for kind in [RecordKind::Ca, RecordKind::Server, RecordKind::Client] {
        if let Some(path) = store.key_path(kind) {
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    if let Err(err) = rcgen::KeyPair::from_pem(&text) {
                        issues.push(ConsistencyIssue::UnparseableKey {
                            role: kind,
                            detail: err.to_string(),
                        });
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    issues.push(ConsistencyIssue::MissingKey { role: kind });
                }
                Err(err) => {
                    issues.push(ConsistencyIssue::UnparseableKey {
                        role: kind,
                        detail: format!("read failed: {err}"),
                    });
                }
            }
        }
    }

    // Chain checks need a parseable CA to compare against.
    let Loaded::Pem(ca_der) = ca else {
        return issues;
    };
    let Ok((_, ca_cert)) = X509Certificate::from_der(ca_der) else {
        return issues;
    };
    let ca_subject = ca_cert.subject().to_string();

    for (kind, loaded) in [(RecordKind::Server, server), (RecordKind::Client, client)] {
        let Loaded::Pem(der) = loaded else { continue };
        let Ok((_, cert)) = X509Certificate::from_der(der) else {
            continue;
        };
        let issuer = cert.issuer().to_string();
        if issuer != ca_subject {
            issues.push(ConsistencyIssue::IssuerMismatch {
                record: kind,
                issuer,
                ca_subject: ca_subject.clone(),
            });
        } else if let Err(err) = cert.verify_signature(Some(ca_cert.public_key())) {
            issues.push(ConsistencyIssue::BadSignature {
                record: kind,
                detail: err.to_string(),
            });
        }
    }

    if let Loaded::Pem(der) = crl {
        if let Ok((_, parsed)) = CertificateRevocationList::from_der(der) {
            let issuer = parsed.issuer().to_string();
            if issuer != ca_subject {
                issues.push(ConsistencyIssue::IssuerMismatch {
                    record: RecordKind::Crl,
                    issuer,
                    ca_subject,
                });
            } else if let Err(err) = parsed.verify_signature(ca_cert.public_key()) {
                issues.push(ConsistencyIssue::BadSignature {
                    record: RecordKind::Crl,
                    detail: err.to_string(),
                });
            }
        }
    }

    issues
}
