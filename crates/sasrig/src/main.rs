mod cli;
mod launch;

use std::time::Duration;

use cli::{Cli, Command, Config, GenerateArgs, RunArgs};
use launch::ProcessLauncher;
use sasrig_trust::http::{crl_url, CrlService};
use sasrig_trust::inspect::inspect;
use sasrig_trust::lifecycle::{self, Orchestrator, DEFAULT_RUN_TIMEOUT};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_or_default_run();

    // Initialize logging on stderr; stdout is reserved for report output.
    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_cli(&cli);

    // ── Synchronous subcommands (no runtime needed) ──────────────────
    if matches!(cli.command, Some(Command::Inspect)) {
        return inspect_store(&config);
    }

    // ── Everything below needs a Tokio runtime ──────────────────────
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli, config))
}

async fn async_main(cli: Cli, config: Config) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store.root().display(),
        "sasrig starting"
    );

    match cli.command {
        Some(Command::Run(args)) => run_lifecycle(config, args).await,
        Some(Command::Generate(args)) => generate_store(config, args).await,
        Some(Command::Serve) => serve_crl(config).await,
        // Inspect was handled in main(); a missing subcommand was
        // normalized to `run` at parse time.
        Some(Command::Inspect) | None => Ok(()),
    }
}

/// `inspect` — read-only validity report on stdout.
fn inspect_store(config: &Config) -> anyhow::Result<()> {
    let report = inspect(&config.store, chrono::Utc::now());
    let decision = lifecycle::decide(&report, false);

    let mut value = serde_json::to_value(&report)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "decision".to_string(),
            serde_json::Value::String(decision.to_string()),
        );
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Runs the full lifecycle, then serves until interrupted.
async fn run_lifecycle(config: Config, args: RunArgs) -> anyhow::Result<()> {
    let orchestrator = Orchestrator {
        store: config.store.clone(),
        config: args.generation.to_config()?,
        force_regenerate: args.force_regenerate,
        timeout: resolve_timeout(args.timeout_secs),
    };

    let service = CrlService::new(config.store, config.crl_addr);
    let launcher = ProcessLauncher::new(args.harness_cmd);

    let outcome = orchestrator.run(&service, &launcher).await?;
    tracing::info!(
        decision = %outcome.decision,
        crl_url = %outcome.crl_url,
        "Ready."
    );

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    service.stop().await;
    Ok(())
}

/// Forces a regeneration and prints the resulting report.
async fn generate_store(config: Config, args: GenerateArgs) -> anyhow::Result<()> {
    let generation = args.generation.to_config()?;
    let timeout = resolve_timeout(args.timeout_secs);

    let report = lifecycle::regenerate(&config.store, &generation, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// CRL service only, for a store provisioned elsewhere.
async fn serve_crl(config: Config) -> anyhow::Result<()> {
    let service = CrlService::new(config.store, config.crl_addr);
    let addr = service.start().await?;
    tracing::info!(crl_url = %crl_url(addr), "Ready.");

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    service.stop().await;
    Ok(())
}

fn resolve_timeout(secs: Option<u64>) -> Duration {
    secs.map(Duration::from_secs).unwrap_or(DEFAULT_RUN_TIMEOUT)
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");
}
