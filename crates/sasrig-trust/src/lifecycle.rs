//! Certificate lifecycle orchestration.
//!
//! Drives one bootstrap run: inspect the store, reuse or regenerate the
//! bundle, serve the CRL, then hand off to the harness launcher. Regeneration
//! happens under the store lock and goes through the staging swap, so a
//! reused store is never written to and a failed run leaves the previous
//! store in place. Every phase draws on a single wall-clock deadline.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::error::TrustError;
use crate::generate::{generate, CertificateBundle, GenerationConfig};
use crate::http::{crl_url, CrlService};
use crate::inspect::{inspect, RecordStatus, ValidityReport};
use crate::store::{StoreLock, StorePaths};
use crate::swap::{self, RepairAction};

/// Total budget for one lifecycle run unless the caller overrides it.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// States the orchestrator moves through, in order. `Failed` is terminal
/// from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Checking,
    Reusing,
    Regenerating,
    Serving,
    Done,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Init => "INIT",
            LifecycleState::Checking => "CHECKING",
            LifecycleState::Reusing => "REUSING",
            LifecycleState::Regenerating => "REGENERATING",
            LifecycleState::Serving => "SERVING",
            LifecycleState::Done => "DONE",
            LifecycleState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What the store inspection implies for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// Existing material is fully usable; the store stays untouched.
    Reuse,
    /// Some record is absent, unparseable, or outside its validity window.
    Regenerate,
    /// Records are individually valid but do not belong together. Never
    /// overwritten automatically.
    Abort,
}

impl std::fmt::Display for LifecycleDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleDecision::Reuse => "reuse",
            LifecycleDecision::Regenerate => "regenerate",
            LifecycleDecision::Abort => "abort",
        };
        f.write_str(s)
    }
}

/// Apply the decision table to an inspection report.
///
/// Bad records always regenerate, even when non-regenerable findings are
/// also present; abort is reserved for stores whose records are all valid
/// yet mismatched, since overwriting those would destroy material some
/// other process may own.
pub fn decide(report: &ValidityReport, force_regenerate: bool) -> LifecycleDecision {
    if force_regenerate {
        return LifecycleDecision::Regenerate;
    }
    if !report.all_valid() {
        return LifecycleDecision::Regenerate;
    }
    if report.issues.iter().any(|i| !i.regenerable()) {
        return LifecycleDecision::Abort;
    }
    if !report.is_consistent() {
        return LifecycleDecision::Regenerate;
    }
    LifecycleDecision::Reuse
}

/// Everything a launched harness needs to consume the store.
#[derive(Debug, Clone, Serialize)]
pub struct Handoff {
    pub store: PathBuf,
    pub crl_url: String,
}

/// Boundary for starting the harness once certificates are in place.
pub trait HarnessLauncher: Send + Sync {
    fn launch(&self, handoff: &Handoff) -> Result<(), TrustError>;
}

/// Terminal summary of a successful run.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub decision: LifecycleDecision,
    pub report: ValidityReport,
    pub crl_url: String,
}

// ── Deadline ────────────────────────────────────────────────────────

/// Wall-clock budget shared by every phase of a run.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    total: Duration,
}

impl Deadline {
    pub fn start(total: Duration) -> Self {
        Self {
            started: Instant::now(),
            total,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// Budget left for `operation`, or a `Timeout` naming it.
    pub fn remaining(&self, operation: &'static str) -> Result<Duration, TrustError> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.total {
            return Err(TrustError::Timeout {
                operation,
                timeout: self.total,
            });
        }
        Ok(self.total - elapsed)
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// One-shot lifecycle driver for a certificate store.
pub struct Orchestrator {
    pub store: StorePaths,
    pub config: GenerationConfig,
    pub force_regenerate: bool,
    pub timeout: Duration,
}

impl Orchestrator {
    pub fn new(store: StorePaths, config: GenerationConfig) -> Self {
        Self {
            store,
            config,
            force_regenerate: false,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// Run the lifecycle to completion.
    ///
    /// On success the CRL service is left running on `service` and the
    /// launcher has been invoked exactly once. On failure nothing has been
    /// launched and the store holds whatever verified material it had
    /// before the run.
    pub async fn run(
        &self,
        service: &CrlService,
        launcher: &dyn HarnessLauncher,
    ) -> Result<LifecycleOutcome, TrustError> {
        let deadline = Deadline::start(self.timeout);
        match self.drive(service, launcher, &deadline).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                enter(LifecycleState::Failed);
                tracing::error!(error = %err, "Certificate lifecycle failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        service: &CrlService,
        launcher: &dyn HarnessLauncher,
        deadline: &Deadline,
    ) -> Result<LifecycleOutcome, TrustError> {
        enter(LifecycleState::Init);
        tracing::info!(
            path = %self.store.root().display(),
            force = self.force_regenerate,
            "Certificate lifecycle starting"
        );

        enter(LifecycleState::Checking);
        deadline.remaining("store inspection")?;
        let mut report = inspect(&self.store, Utc::now());
        let mut decision = decide(&report, self.force_regenerate);
        tracing::info!(decision = %decision, "Store inspected");

        match decision {
            LifecycleDecision::Abort => {
                return Err(TrustError::InconsistentStore(verification_findings(
                    &report,
                )));
            }
            LifecycleDecision::Reuse => {
                enter(LifecycleState::Reusing);
                tracing::info!(
                    path = %self.store.root().display(),
                    "Existing certificates verified; reusing"
                );
            }
            LifecycleDecision::Regenerate => {
                enter(LifecycleState::Regenerating);
                let (new_report, new_decision) = self.regenerate_under_lock(deadline).await?;
                report = new_report;
                decision = new_decision;
            }
        }

        enter(LifecycleState::Serving);
        deadline.remaining("CRL service start")?;
        let addr = service.restart().await?;
        let crl_url = crl_url(addr);

        deadline.remaining("harness launch")?;
        let handoff = Handoff {
            store: self.store.root().to_path_buf(),
            crl_url: crl_url.clone(),
        };
        launcher.launch(&handoff)?;

        enter(LifecycleState::Done);
        tracing::info!(
            decision = %decision,
            crl_url = %crl_url,
            "Certificate lifecycle complete"
        );

        Ok(LifecycleOutcome {
            decision,
            report,
            crl_url,
        })
    }

    /// Regeneration arm: lock, repair any interrupted swap, then install a
    /// fresh bundle through staging.
    ///
    /// Repair may restore a store that turns out to be reusable, in which
    /// case the restored material is kept and no regeneration happens.
    async fn regenerate_under_lock(
        &self,
        deadline: &Deadline,
    ) -> Result<(ValidityReport, LifecycleDecision), TrustError> {
        let _lock = StoreLock::acquire(&self.store)?;

        let action = swap::repair_interrupted(&self.store)?;
        if action != RepairAction::Clean {
            let report = inspect(&self.store, Utc::now());
            match decide(&report, self.force_regenerate) {
                LifecycleDecision::Reuse => {
                    tracing::info!("Repaired store verified; regeneration no longer needed");
                    return Ok((report, LifecycleDecision::Reuse));
                }
                LifecycleDecision::Abort => {
                    return Err(TrustError::InconsistentStore(verification_findings(
                        &report,
                    )));
                }
                LifecycleDecision::Regenerate => {}
            }
        }

        let report = install_fresh_bundle(&self.store, &self.config, deadline).await?;
        Ok((report, LifecycleDecision::Regenerate))
    }
}

/// Force-install a fresh bundle without the serve-and-launch tail.
///
/// Takes the store lock, resolves any interrupted swap, and replaces
/// whatever the store holds. Returns the post-swap inspection of the live
/// store.
pub async fn regenerate(
    store: &StorePaths,
    config: &GenerationConfig,
    timeout: Duration,
) -> Result<ValidityReport, TrustError> {
    let deadline = Deadline::start(timeout);
    let _lock = StoreLock::acquire(store)?;
    swap::repair_interrupted(store)?;
    install_fresh_bundle(store, config, &deadline).await
}

/// Generate into staging, verify the staged bundle, swap it in, verify the
/// live store, then drop the backup.
async fn install_fresh_bundle(
    store: &StorePaths,
    config: &GenerationConfig,
    deadline: &Deadline,
) -> Result<ValidityReport, TrustError> {
    swap::clear_staging(store)?;

    let bundle = bounded_generate(config, deadline).await?;
    let staging = store.staging();
    bundle.write_to(&staging)?;

    // The staged bundle must verify before it may replace anything.
    let staged = inspect(&StorePaths::new(staging), Utc::now());
    if !staged.all_valid() || !staged.is_consistent() {
        swap::clear_staging(store)?;
        return Err(TrustError::GenerationFailure(format!(
            "staged bundle failed verification: {}",
            verification_findings(&staged)
        )));
    }

    deadline.remaining("store swap")?;
    swap::swap_in(store)?;

    let live = inspect(store, Utc::now());
    if !live.all_valid() || !live.is_consistent() {
        swap::roll_back(store)?;
        return Err(TrustError::InconsistentStore(format!(
            "swapped-in store failed verification and was rolled back: {}",
            verification_findings(&live)
        )));
    }

    swap::discard_backup(store)?;
    Ok(live)
}

/// Run `generate` on the blocking pool, bounded by the deadline.
///
/// A timed-out generation task cannot be cancelled; it finishes in the
/// background while the run fails.
async fn bounded_generate(
    config: &GenerationConfig,
    deadline: &Deadline,
) -> Result<CertificateBundle, TrustError> {
    let budget = deadline.remaining("certificate generation")?;
    let config = config.clone();
    let task = tokio::task::spawn_blocking(move || generate(&config));
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(TrustError::Internal(format!(
            "certificate generation task panicked: {join}"
        ))),
        Err(_) => Err(TrustError::Timeout {
            operation: "certificate generation",
            timeout: deadline.total(),
        }),
    }
}

fn verification_findings(report: &ValidityReport) -> String {
    let mut findings: Vec<String> = report
        .records
        .iter()
        .filter(|r| r.status != RecordStatus::Valid)
        .map(|r| format!("{} is {}", r.kind, r.status))
        .collect();
    findings.extend(report.issues.iter().map(|i| i.to_string()));
    findings.join("; ")
}

fn enter(state: LifecycleState) {
    tracing::info!(state = %state, "Lifecycle transition");
}
