//! Staged store replacement.
//!
//! A regenerated bundle lands in a staging sibling first and only replaces
//! the live store through directory renames. The sequence moves the live
//! store aside, moves staging in, and drops the old copy once the new store
//! verifies, so a crash leaves at most one half-finished state.
//! [`repair_interrupted`] resolves whichever state a crash left behind.

use std::path::Path;

use chrono::Utc;

use crate::error::TrustError;
use crate::inspect::inspect;
use crate::store::StorePaths;

/// What [`repair_interrupted`] found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    /// No leftover backup; nothing to repair.
    Clean,
    /// A backup existed with no live store. The backup was restored.
    RestoredBackup,
    /// Live and backup both existed and the live store verified. The
    /// leftover backup was discarded.
    DiscardedBackup,
    /// Live and backup both existed but the live store did not verify. It
    /// was replaced by the backup.
    RolledBack,
}

/// Replace the live store with the staging directory.
///
/// The previous live store is kept as the backup sibling until the caller
/// verifies the swapped-in store and calls [`discard_backup`]. Fails without
/// touching anything when no staging directory exists or an unresolved
/// backup is still present.
pub fn swap_in(store: &StorePaths) -> Result<(), TrustError> {
    let staging = store.staging();
    let live = store.root();
    let backup = store.backup();

    if !staging.is_dir() {
        return Err(TrustError::InconsistentStore(format!(
            "staging directory {} does not exist",
            staging.display()
        )));
    }
    if backup.exists() {
        return Err(TrustError::InconsistentStore(format!(
            "unresolved backup {} would be overwritten",
            backup.display()
        )));
    }

    let had_live = live.exists();
    if had_live {
        std::fs::rename(live, &backup).map_err(|source| TrustError::StoreWriteFailure {
            path: backup.clone(),
            source,
        })?;
    }

    if let Err(source) = std::fs::rename(&staging, live) {
        // Put the previous store back so a failed swap changes nothing.
        if had_live {
            if let Err(restore) = std::fs::rename(&backup, live) {
                return Err(TrustError::InconsistentStore(format!(
                    "staging rename failed ({source}) and restoring the backup failed \
                     ({restore}); the previous store remains at {}",
                    backup.display()
                )));
            }
        }
        return Err(TrustError::StoreWriteFailure {
            path: live.to_path_buf(),
            source,
        });
    }

    tracing::info!(path = %live.display(), "Staged bundle swapped into place");
    Ok(())
}

/// Resolve the leftovers of a swap that was interrupted mid-sequence.
///
/// Callers must hold the store lock. When both the live store and a backup
/// exist, the live store wins only if it verifies; otherwise the backup is
/// restored.
pub fn repair_interrupted(store: &StorePaths) -> Result<RepairAction, TrustError> {
    let live = store.root();
    let backup = store.backup();

    if !backup.exists() {
        return Ok(RepairAction::Clean);
    }

    if !live.exists() {
        std::fs::rename(&backup, live).map_err(|source| TrustError::StoreWriteFailure {
            path: live.to_path_buf(),
            source,
        })?;
        tracing::warn!(
            path = %live.display(),
            "Interrupted swap detected; previous store restored"
        );
        return Ok(RepairAction::RestoredBackup);
    }

    let report = inspect(store, Utc::now());
    if report.all_valid() && report.is_consistent() {
        remove_dir(&backup)?;
        tracing::warn!(
            path = %live.display(),
            "Interrupted swap detected; new store verified, backup discarded"
        );
        Ok(RepairAction::DiscardedBackup)
    } else {
        remove_dir(live)?;
        std::fs::rename(&backup, live).map_err(|source| TrustError::StoreWriteFailure {
            path: live.to_path_buf(),
            source,
        })?;
        tracing::warn!(
            path = %live.display(),
            "Interrupted swap detected; unverifiable new store rolled back"
        );
        Ok(RepairAction::RolledBack)
    }
}

/// Replace the live store with the backup after post-swap verification
/// failed. Leaves the store absent when there is no backup to restore.
pub fn roll_back(store: &StorePaths) -> Result<(), TrustError> {
    let live = store.root();
    let backup = store.backup();

    remove_dir(live)?;
    if backup.exists() {
        std::fs::rename(&backup, live).map_err(|source| TrustError::StoreWriteFailure {
            path: live.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Remove any staging leftovers from an earlier run.
pub fn clear_staging(store: &StorePaths) -> Result<(), TrustError> {
    remove_dir(&store.staging())
}

/// Drop the backup once the swapped-in store has been verified.
pub fn discard_backup(store: &StorePaths) -> Result<(), TrustError> {
    remove_dir(&store.backup())
}

fn remove_dir(path: &Path) -> Result<(), TrustError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TrustError::StoreWriteFailure {
            path: path.to_path_buf(),
            source,
        }),
    }
}
