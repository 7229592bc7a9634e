//! End-to-end lifecycle runs against a real CRL listener.
//!
//! Each test drives the orchestrator through a full run on an ephemeral
//! loopback port with a recording launcher, then checks the store on disk
//! and the CRL actually served over HTTP.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Mutex;

use chrono::Utc;
use sasrig_common::test::unique_temp_dir;
use sasrig_trust::error::TrustError;
use sasrig_trust::generate::{generate, GenerationConfig};
use sasrig_trust::http::CrlService;
use sasrig_trust::inspect::inspect;
use sasrig_trust::lifecycle::{Handoff, HarnessLauncher, LifecycleDecision, Orchestrator};
use sasrig_trust::store::{RecordKind, StoreLock, StorePaths, BUNDLE_FILES};
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

/// Captures every handoff instead of spawning a process.
struct RecordingLauncher {
    handoffs: Mutex<Vec<Handoff>>,
}

impl RecordingLauncher {
    fn new() -> Self {
        Self {
            handoffs: Mutex::new(Vec::new()),
        }
    }

    fn handoffs(&self) -> Vec<Handoff> {
        self.handoffs.lock().unwrap().clone()
    }
}

impl HarnessLauncher for RecordingLauncher {
    fn launch(&self, handoff: &Handoff) -> Result<(), TrustError> {
        self.handoffs.lock().unwrap().push(handoff.clone());
        Ok(())
    }
}

fn fresh_store(prefix: &str) -> StorePaths {
    StorePaths::new(unique_temp_dir(prefix))
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn cleanup(store: &StorePaths) {
    let _ = std::fs::remove_dir_all(store.root());
}

fn snapshot(store: &StorePaths) -> Vec<(&'static str, Vec<u8>)> {
    BUNDLE_FILES
        .iter()
        .map(|name| (*name, std::fs::read(store.root().join(name)).unwrap()))
        .collect()
}

/// `ureq` is blocking, so fetches run off the test runtime.
async fn fetch(url: &str) -> ureq::Response {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || ureq::get(&url).call().unwrap())
        .await
        .unwrap()
}

fn read_body(response: ureq::Response) -> Vec<u8> {
    let mut body = Vec::new();
    response.into_reader().read_to_end(&mut body).unwrap();
    body
}

#[tokio::test]
async fn first_run_generates_serves_and_hands_off() {
    let store = fresh_store("sasrig-e2e-first");
    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), GenerationConfig::default());

    let outcome = orchestrator.run(&service, &launcher).await.unwrap();

    assert_eq!(outcome.decision, LifecycleDecision::Regenerate);
    assert!(outcome.report.all_valid());
    for name in BUNDLE_FILES {
        assert!(store.root().join(name).is_file(), "{name} missing");
    }

    let handoffs = launcher.handoffs();
    assert_eq!(handoffs.len(), 1);
    assert_eq!(handoffs[0].store, store.root());
    assert_eq!(handoffs[0].crl_url, outcome.crl_url);

    let response = fetch(&outcome.crl_url).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_type(), "application/pkix-crl");
    let on_disk = std::fs::read(store.cert_path(RecordKind::Crl)).unwrap();
    assert_eq!(read_body(response), on_disk);

    let health = fetch(&outcome.crl_url.replace("/crl", "/healthz")).await;
    assert_eq!(read_body(health), b"OK");

    service.stop().await;
    cleanup(&store);
}

#[tokio::test]
async fn second_run_reuses_the_store_untouched() {
    let store = fresh_store("sasrig-e2e-reuse");
    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), GenerationConfig::default());

    let first = orchestrator.run(&service, &launcher).await.unwrap();
    assert_eq!(first.decision, LifecycleDecision::Regenerate);
    let before = snapshot(&store);

    let second = orchestrator.run(&service, &launcher).await.unwrap();
    assert_eq!(second.decision, LifecycleDecision::Reuse);
    assert_eq!(snapshot(&store), before);
    assert_eq!(launcher.handoffs().len(), 2);

    // The rebound listener serves the reused CRL.
    let response = fetch(&second.crl_url).await;
    assert_eq!(response.status(), 200);

    service.stop().await;
    cleanup(&store);
}

#[tokio::test]
async fn forced_run_replaces_a_valid_store() {
    let store = fresh_store("sasrig-e2e-force");
    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), GenerationConfig::default());

    orchestrator.run(&service, &launcher).await.unwrap();
    let before = std::fs::read(store.cert_path(RecordKind::Ca)).unwrap();

    let mut forced = Orchestrator::new(store.clone(), GenerationConfig::default());
    forced.force_regenerate = true;
    let outcome = forced.run(&service, &launcher).await.unwrap();

    assert_eq!(outcome.decision, LifecycleDecision::Regenerate);
    let after = std::fs::read(store.cert_path(RecordKind::Ca)).unwrap();
    assert_ne!(after, before);
    assert!(inspect(&store, Utc::now()).all_valid());

    service.stop().await;
    cleanup(&store);
}

#[tokio::test]
async fn failed_regeneration_is_idempotent_and_never_launches() {
    let store = fresh_store("sasrig-e2e-failure");
    let bundle = generate(&GenerationConfig::default()).unwrap();
    bundle.write_to(store.root()).unwrap();
    let before = snapshot(&store);

    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let rejected = GenerationConfig {
        validity_days: 0,
        ..GenerationConfig::default()
    };
    let mut orchestrator = Orchestrator::new(store.clone(), rejected);
    orchestrator.force_regenerate = true;

    for _ in 0..2 {
        let err = orchestrator.run(&service, &launcher).await.unwrap_err();
        assert!(matches!(err, TrustError::GenerationFailure(_)), "{err}");
        assert_eq!(snapshot(&store), before);
    }
    assert!(launcher.handoffs().is_empty());
    assert!(!service.is_running().await);
    cleanup(&store);
}

#[tokio::test]
async fn held_lock_fails_the_run_without_launching() {
    let store = fresh_store("sasrig-e2e-lock");
    let _held = StoreLock::acquire(&store).unwrap();

    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), GenerationConfig::default());

    let err = orchestrator.run(&service, &launcher).await.unwrap_err();
    assert!(matches!(err, TrustError::LockContention { .. }), "{err}");
    assert!(launcher.handoffs().is_empty());
    cleanup(&store);
}

#[tokio::test]
async fn revoked_serials_are_served_in_the_crl() {
    let store = fresh_store("sasrig-e2e-revoked");
    let config = GenerationConfig {
        revoked_serials: vec!["1f2e3d".to_string(), "0abc".to_string()],
        ..GenerationConfig::default()
    };

    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), config);
    let outcome = orchestrator.run(&service, &launcher).await.unwrap();

    let body = read_body(fetch(&outcome.crl_url).await);
    let block = pem::parse(&body).unwrap();
    let (_, crl) = CertificateRevocationList::from_der(block.contents()).unwrap();
    let serials: Vec<String> = crl
        .iter_revoked_certificates()
        .map(|revoked| hex::encode(revoked.raw_serial()))
        .collect();
    assert_eq!(serials, ["1f2e3d", "0abc"]);

    service.stop().await;
    cleanup(&store);
}

#[tokio::test]
async fn occupied_crl_port_fails_the_run_before_launch() {
    let store = fresh_store("sasrig-e2e-bind");
    let occupying = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupying.local_addr().unwrap();

    let service = CrlService::new(store.clone(), addr);
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), GenerationConfig::default());

    let err = orchestrator.run(&service, &launcher).await.unwrap_err();
    assert!(matches!(err, TrustError::BindFailure { .. }), "{err}");
    assert!(launcher.handoffs().is_empty());

    // Regeneration completed before the bind, so the bundle stays usable.
    assert!(inspect(&store, Utc::now()).all_valid());
    cleanup(&store);
}

#[tokio::test]
async fn tampered_store_aborts_and_is_left_untouched() {
    let store = fresh_store("sasrig-e2e-abort");
    let bundle = generate(&GenerationConfig::default()).unwrap();
    bundle.write_to(store.root()).unwrap();

    // Swap in a server certificate from an unrelated authority. Every record
    // stays individually valid, so the mismatch is not regenerable.
    let foreign = generate(&GenerationConfig::default()).unwrap();
    std::fs::write(store.cert_path(RecordKind::Server), &foreign.server_cert_pem).unwrap();
    let before = snapshot(&store);

    let service = CrlService::new(store.clone(), loopback());
    let launcher = RecordingLauncher::new();
    let orchestrator = Orchestrator::new(store.clone(), GenerationConfig::default());

    let err = orchestrator.run(&service, &launcher).await.unwrap_err();
    assert!(matches!(err, TrustError::InconsistentStore(_)), "{err}");
    assert_eq!(snapshot(&store), before);
    assert!(launcher.handoffs().is_empty());
    assert!(!service.is_running().await);
    cleanup(&store);
}
