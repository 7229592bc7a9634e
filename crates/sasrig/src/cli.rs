//! Command-line surface and resolved configuration.
//!
//! Generation flags are optional overlays: anything not given falls through
//! to [`GenerationConfig::default`], so the CLI, the library, and bare
//! invocations share one set of defaults.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use sasrig_trust::generate::GenerationConfig;
use sasrig_trust::store::StorePaths;

/// Default CRL listener address.
pub const DEFAULT_CRL_ADDR: &str = "127.0.0.1:9007";

#[derive(Parser, Debug)]
#[command(
    name = "sasrig",
    version,
    about = "Certificate bootstrap and CRL service for a SAS test harness"
)]
pub struct Cli {
    /// Certificate store directory
    #[arg(
        long,
        env = "SASRIG_STORE",
        default_value = sasrig_common::paths::DEFAULT_CERT_DIR,
        global = true
    )]
    pub store: PathBuf,

    /// Address for the CRL service listener
    #[arg(long, env = "SASRIG_CRL_ADDR", default_value = DEFAULT_CRL_ADDR, global = true)]
    pub crl_addr: SocketAddr,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "SASRIG_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Parse argv, treating a bare invocation as `sasrig run` so subcommand
    /// env fallbacks still apply.
    pub fn parse_or_default_run() -> Self {
        Self::from_argv(std::env::args_os().collect())
    }

    fn from_argv(argv: Vec<OsString>) -> Self {
        let cli = Self::parse_from(argv.clone());
        if cli.command.is_none() {
            let mut argv = argv;
            argv.push(OsString::from("run"));
            return Self::parse_from(argv);
        }
        cli
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Full lifecycle: check the store, regenerate if needed, serve the CRL,
    /// launch the harness (default)
    Run(RunArgs),
    /// Print the store validity report as JSON (read-only)
    Inspect,
    /// Regenerate the bundle unconditionally, without serving or launching
    Generate(GenerateArgs),
    /// Serve the CRL from the existing store
    Serve,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub generation: GenerationArgs,

    /// Regenerate even when the existing store is fully valid
    #[arg(long, env = "SASRIG_FORCE_REGENERATE")]
    pub force_regenerate: bool,

    /// Shell command that launches the harness once certificates are ready
    #[arg(long, env = "SASRIG_HARNESS_CMD", value_name = "CMD")]
    pub harness_cmd: Option<String>,

    /// Overall time budget for the run, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub generation: GenerationArgs,

    /// Overall time budget for the regeneration, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,
}

/// Generation knobs shared by `run` and `generate`.
#[derive(Args, Debug, Default)]
pub struct GenerationArgs {
    /// CA certificate common name
    #[arg(long, value_name = "NAME")]
    pub ca_name: Option<String>,

    /// Server certificate common name
    #[arg(long, value_name = "NAME")]
    pub server_name: Option<String>,

    /// Server SAN, DNS name or IP address (repeatable)
    #[arg(long = "san", value_name = "SAN")]
    pub sans: Vec<String>,

    /// Client certificate common name
    #[arg(long, value_name = "NAME")]
    pub client_name: Option<String>,

    /// Certificate validity in days
    #[arg(long, value_name = "DAYS")]
    pub validity_days: Option<i64>,

    /// CRL validity in days
    #[arg(long, value_name = "DAYS")]
    pub crl_validity_days: Option<i64>,

    /// Hex certificate serial to list as revoked in the CRL (repeatable)
    #[arg(long = "revoke-serial", value_name = "HEX")]
    pub revoked_serials: Vec<String>,

    /// Key algorithm (ecdsa-p256 or ecdsa-p384)
    #[arg(long, value_name = "ALG")]
    pub key_algorithm: Option<String>,
}

impl GenerationArgs {
    /// Overlay the provided flags onto the generation defaults.
    pub fn to_config(&self) -> anyhow::Result<GenerationConfig> {
        let mut config = GenerationConfig::default();
        if let Some(name) = &self.ca_name {
            config.ca_common_name = name.clone();
        }
        if let Some(name) = &self.server_name {
            config.server_common_name = name.clone();
        }
        if let Some(name) = &self.client_name {
            config.client_common_name = name.clone();
        }
        config.server_sans = self.sans.clone();
        config.revoked_serials = self.revoked_serials.clone();
        if let Some(days) = self.validity_days {
            config.validity_days = days;
        }
        if let Some(days) = self.crl_validity_days {
            config.crl_validity_days = days;
        }
        if let Some(alg) = &self.key_algorithm {
            config.key_algorithm = alg.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        Ok(config)
    }
}

/// Resolved runtime configuration, independent of clap.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StorePaths,
    pub crl_addr: SocketAddr,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            store: StorePaths::new(cli.store.clone()),
            crl_addr: cli.crl_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sasrig_trust::generate::KeyAlgorithm;

    #[test]
    fn bare_invocation_defaults_to_run() {
        let cli = Cli::from_argv(vec!["sasrig".into()]);
        assert!(matches!(cli.command, Some(Command::Run(_))));
        assert_eq!(cli.store, PathBuf::from("certs"));
        assert_eq!(
            cli.crl_addr,
            DEFAULT_CRL_ADDR.parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "sasrig",
            "run",
            "--force-regenerate",
            "--harness-cmd",
            "python harness.py",
            "--san",
            "sas.local",
            "--san",
            "10.0.0.5",
            "--revoke-serial",
            "0abc",
            "--timeout-secs",
            "5",
        ])
        .unwrap();

        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(args.force_regenerate);
        assert_eq!(args.harness_cmd.as_deref(), Some("python harness.py"));
        assert_eq!(args.generation.sans, ["sas.local", "10.0.0.5"]);
        assert_eq!(args.generation.revoked_serials, ["0abc"]);
        assert_eq!(args.timeout_secs, Some(5));
    }

    #[test]
    fn store_flag_is_global() {
        let cli = Cli::try_parse_from(["sasrig", "inspect", "--store", "/tmp/teststore"]).unwrap();
        assert_eq!(cli.store, PathBuf::from("/tmp/teststore"));
        assert!(matches!(cli.command, Some(Command::Inspect)));
    }

    #[test]
    fn generation_flags_overlay_the_defaults() {
        let cli = Cli::try_parse_from([
            "sasrig",
            "generate",
            "--validity-days",
            "30",
            "--key-algorithm",
            "ecdsa-p384",
        ])
        .unwrap();

        let Some(Command::Generate(args)) = cli.command else {
            panic!("expected generate subcommand");
        };
        let config = args.generation.to_config().unwrap();
        assert_eq!(config.validity_days, 30);
        assert_eq!(config.key_algorithm, KeyAlgorithm::EcdsaP384);
        // Untouched knobs keep the library defaults.
        assert_eq!(config.ca_common_name, "SAS Test Harness CA");
        assert_eq!(config.crl_validity_days, 30);
        assert!(config.server_sans.is_empty());
    }

    #[test]
    fn unknown_key_algorithm_is_rejected_at_conversion() {
        let cli = Cli::try_parse_from(["sasrig", "generate", "--key-algorithm", "rsa"]).unwrap();
        let Some(Command::Generate(args)) = cli.command else {
            panic!("expected generate subcommand");
        };
        let err = args.generation.to_config().unwrap_err();
        assert!(err.to_string().contains("rsa"));
    }

    #[test]
    fn config_resolves_store_paths() {
        let cli = Cli::try_parse_from(["sasrig", "serve", "--store", "/srv/sas/certs"]).unwrap();
        let config = Config::from_cli(&cli);
        assert_eq!(config.store.root(), std::path::Path::new("/srv/sas/certs"));
    }
}
