//! Store path derivation.
//!
//! The live certificate store is a plain directory holding only bundle files.
//! Everything the lifecycle needs besides the bundle itself (staging area,
//! swap backup, regeneration lock) lives in sibling paths derived from the
//! store directory name, so the store stays byte-comparable across runs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Default store directory, relative to the working directory.
pub const DEFAULT_CERT_DIR: &str = "certs";

/// Suffix appended to the store name for the private staging directory.
pub const STAGING_SUFFIX: &str = ".staging";

/// Suffix appended to the store name for the moved-aside previous bundle.
pub const BACKUP_SUFFIX: &str = ".old";

/// Suffix appended to the store name for the regeneration lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Returns a sibling of `store` whose final component carries `suffix`.
///
/// `certs` becomes `certs.staging`, `/srv/harness/certs` becomes
/// `/srv/harness/certs.staging`, and so on. Sibling paths share the store's
/// parent directory, which keeps swap renames on one filesystem.
pub fn sibling_with_suffix(store: &Path, suffix: &str) -> PathBuf {
    let mut name = store
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from(DEFAULT_CERT_DIR));
    name.push(suffix);
    store.with_file_name(name)
}

/// Private staging directory for a store.
pub fn staging_dir(store: &Path) -> PathBuf {
    sibling_with_suffix(store, STAGING_SUFFIX)
}

/// Moved-aside location of the previous bundle during a swap.
pub fn backup_dir(store: &Path) -> PathBuf {
    sibling_with_suffix(store, BACKUP_SUFFIX)
}

/// Regeneration lock file for a store.
pub fn lock_path(store: &Path) -> PathBuf {
    sibling_with_suffix(store, LOCK_SUFFIX)
}
