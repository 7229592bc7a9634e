//! Certificate store layout and the regeneration lock.
//!
//! A store is a plain directory holding one CA pair, one server pair, one
//! client pair, and one CRL, co-located. Staging, the swap backup, and the
//! lock file are siblings of the store directory so the store itself only
//! ever contains bundle files.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;

use crate::error::TrustError;

pub const CA_CERT_FILE: &str = "ca.crt";
pub const CA_KEY_FILE: &str = "ca.key";
pub const SERVER_CERT_FILE: &str = "server.crt";
pub const SERVER_KEY_FILE: &str = "server.key";
pub const CLIENT_CERT_FILE: &str = "client.crt";
pub const CLIENT_KEY_FILE: &str = "client.key";
pub const CRL_FILE: &str = "crl.pem";

/// Every file a complete bundle installs.
pub const BUNDLE_FILES: [&str; 7] = [
    CA_CERT_FILE,
    CA_KEY_FILE,
    SERVER_CERT_FILE,
    SERVER_KEY_FILE,
    CLIENT_CERT_FILE,
    CLIENT_KEY_FILE,
    CRL_FILE,
];

/// The four records the inspector reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Ca,
    Server,
    Client,
    Crl,
}

impl RecordKind {
    /// All record kinds, in store-listing order.
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Ca,
        RecordKind::Server,
        RecordKind::Client,
        RecordKind::Crl,
    ];

    /// File name of this record's certificate (or CRL) within the store.
    pub fn cert_file(self) -> &'static str {
        match self {
            RecordKind::Ca => CA_CERT_FILE,
            RecordKind::Server => SERVER_CERT_FILE,
            RecordKind::Client => CLIENT_CERT_FILE,
            RecordKind::Crl => CRL_FILE,
        }
    }

    /// File name of this record's private key, if the record has one.
    pub fn key_file(self) -> Option<&'static str> {
        match self {
            RecordKind::Ca => Some(CA_KEY_FILE),
            RecordKind::Server => Some(SERVER_KEY_FILE),
            RecordKind::Client => Some(CLIENT_KEY_FILE),
            RecordKind::Crl => None,
        }
    }

    /// Short role name without the "certificate" suffix.
    pub fn role_name(self) -> &'static str {
        match self {
            RecordKind::Ca => "CA",
            RecordKind::Server => "server",
            RecordKind::Client => "client",
            RecordKind::Crl => "CRL",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Ca => "CA certificate",
            RecordKind::Server => "server certificate",
            RecordKind::Client => "client certificate",
            RecordKind::Crl => "CRL",
        };
        f.write_str(name)
    }
}

/// Path bundle for one certificate store.
///
/// Carries the live store root plus the derived sibling paths. Everything
/// that touches the store takes one of these instead of a bare directory,
/// so tests can point each run at an isolated location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The live store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Certificate (or CRL) path for a record kind.
    pub fn cert_path(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.cert_file())
    }

    /// Private-key path for a record kind, if it has one.
    pub fn key_path(&self, kind: RecordKind) -> Option<PathBuf> {
        kind.key_file().map(|name| self.root.join(name))
    }

    /// Private staging directory, sibling of the store.
    pub fn staging(&self) -> PathBuf {
        sasrig_common::paths::staging_dir(&self.root)
    }

    /// Moved-aside previous bundle during a swap, sibling of the store.
    pub fn backup(&self) -> PathBuf {
        sasrig_common::paths::backup_dir(&self.root)
    }

    /// Regeneration lock file, sibling of the store.
    pub fn lock_file(&self) -> PathBuf {
        sasrig_common::paths::lock_path(&self.root)
    }
}

/// Exclusive advisory lock serializing regenerations against one store.
///
/// The lock file lives beside the store and is never deleted; deleting a
/// locked file would let a second process acquire a fresh lock on the same
/// path. Dropping the guard releases the lock, and the kernel releases it
/// if the process dies.
#[derive(Debug)]
pub struct StoreLock {
    file: std::fs::File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquires the lock, failing fast when another run holds it.
    pub fn acquire(store: &StorePaths) -> Result<Self, TrustError> {
        let path = store.lock_file();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    TrustError::StoreWriteFailure {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| TrustError::StoreWriteFailure {
                path: path.clone(),
                source,
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TrustError::LockContention { path })
            }
            Err(source) => Err(TrustError::StoreWriteFailure { path, source }),
        }
    }

    /// Path of the lock file, mainly for log context.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
