//! Certificate bundle generation.
//!
//! Mints a complete mutual-TLS bundle with `rcgen`: a self-signed ECDSA CA
//! plus server and client leaf certificates signed by it. The bundle also
//! carries a CRL listing any configured revoked serials. Generation never
//! touches the live store; callers decide where the bundle lands via
//! [`CertificateBundle::write_to`].

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason,
    RevokedCertParams, SanType, SerialNumber,
};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::TrustError;
use crate::store;

/// Key algorithm for every key pair in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    fn generate_key(self) -> Result<KeyPair, TrustError> {
        let alg = match self {
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        };
        KeyPair::generate_for(alg).map_err(generation)
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyAlgorithm::EcdsaP256 => write!(f, "ecdsa-p256"),
            KeyAlgorithm::EcdsaP384 => write!(f, "ecdsa-p384"),
        }
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecdsa-p256" => Ok(KeyAlgorithm::EcdsaP256),
            "ecdsa-p384" => Ok(KeyAlgorithm::EcdsaP384),
            other => Err(format!(
                "unknown key algorithm {other:?} (expected ecdsa-p256 or ecdsa-p384)"
            )),
        }
    }
}

/// Everything that shapes a generated bundle.
///
/// `issued_at` pins the issuance instant; `None` means now. Tests use it to
/// mint backdated or future-dated bundles without touching the clock.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub ca_common_name: String,
    pub organization: String,
    pub server_common_name: String,
    /// SANs for the server certificate. Empty means derive defaults
    /// (localhost, the machine hostname, 127.0.0.1).
    pub server_sans: Vec<String>,
    pub client_common_name: String,
    pub key_algorithm: KeyAlgorithm,
    pub validity_days: i64,
    pub crl_validity_days: i64,
    /// Hex serial numbers to list as revoked in the CRL.
    pub revoked_serials: Vec<String>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            ca_common_name: "SAS Test Harness CA".to_string(),
            organization: "SAS Test Harness".to_string(),
            server_common_name: "localhost".to_string(),
            server_sans: Vec::new(),
            client_common_name: "SAS Test Harness Client".to_string(),
            key_algorithm: KeyAlgorithm::default(),
            validity_days: 365,
            crl_validity_days: 30,
            revoked_serials: Vec::new(),
            issued_at: None,
        }
    }
}

impl GenerationConfig {
    fn validate(&self) -> Result<(), TrustError> {
        if self.ca_common_name.trim().is_empty() {
            return Err(TrustError::GenerationFailure(
                "CA common name is empty".into(),
            ));
        }
        if self.server_common_name.trim().is_empty() {
            return Err(TrustError::GenerationFailure(
                "server common name is empty".into(),
            ));
        }
        if self.client_common_name.trim().is_empty() {
            return Err(TrustError::GenerationFailure(
                "client common name is empty".into(),
            ));
        }
        if self.validity_days < 1 {
            return Err(TrustError::GenerationFailure(format!(
                "validity must be at least 1 day, got {}",
                self.validity_days
            )));
        }
        if self.crl_validity_days < 1 {
            return Err(TrustError::GenerationFailure(format!(
                "CRL validity must be at least 1 day, got {}",
                self.crl_validity_days
            )));
        }
        Ok(())
    }
}

/// A freshly minted bundle, held in memory until written out.
#[derive(Debug)]
pub struct CertificateBundle {
    pub ca_cert_pem: String,
    pub ca_key_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub crl_pem: String,
    /// Serial of the CA certificate, lowercase hex.
    pub ca_serial: String,
    /// When the bundle's certificates stop being valid.
    pub expires: DateTime<Utc>,
}

impl CertificateBundle {
    /// Write all seven records into `dir`, creating it if needed.
    ///
    /// Private keys get owner-only permissions on Unix.
    pub fn write_to(&self, dir: &Path) -> Result<(), TrustError> {
        std::fs::create_dir_all(dir).map_err(|source| TrustError::StoreWriteFailure {
            path: dir.to_path_buf(),
            source,
        })?;

        let records: [(&str, &str, bool); 7] = [
            (store::CA_CERT_FILE, &self.ca_cert_pem, false),
            (store::CA_KEY_FILE, &self.ca_key_pem, true),
            (store::SERVER_CERT_FILE, &self.server_cert_pem, false),
            (store::SERVER_KEY_FILE, &self.server_key_pem, true),
            (store::CLIENT_CERT_FILE, &self.client_cert_pem, false),
            (store::CLIENT_KEY_FILE, &self.client_key_pem, true),
            (store::CRL_FILE, &self.crl_pem, false),
        ];
        for (name, contents, is_key) in records {
            let path = dir.join(name);
            std::fs::write(&path, contents).map_err(|source| TrustError::StoreWriteFailure {
                path: path.clone(),
                source,
            })?;
            if is_key {
                restrict_key_permissions(&path)?;
            }
        }

        tracing::info!(path = %dir.display(), "Certificate bundle written");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_key_permissions(path: &Path) -> Result<(), TrustError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        TrustError::StoreWriteFailure {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_key_permissions(_path: &Path) -> Result<(), TrustError> {
    Ok(())
}

/// Generate a complete bundle from `config`.
///
/// Certificates are backdated one hour to absorb clock skew between this
/// host and verifiers.
pub fn generate(config: &GenerationConfig) -> Result<CertificateBundle, TrustError> {
    config.validate()?;

    let issued_at = config.issued_at.unwrap_or_else(Utc::now);
    let not_before = issued_at - Duration::hours(1);
    let not_after = issued_at + Duration::days(config.validity_days);

    let ca_key = config.key_algorithm.generate_key()?;
    let ca_params = build_ca_params(config, not_before, not_after);
    let ca_cert = ca_params.self_signed(&ca_key).map_err(generation)?;

    let sans = if config.server_sans.is_empty() {
        default_server_sans()
    } else {
        config.server_sans.clone()
    };

    let server_key = config.key_algorithm.generate_key()?;
    let server_params = build_leaf_params(
        &config.server_common_name,
        &config.organization,
        &sans,
        ExtendedKeyUsagePurpose::ServerAuth,
        not_before,
        not_after,
    )?;
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .map_err(generation)?;

    let client_key = config.key_algorithm.generate_key()?;
    let client_params = build_leaf_params(
        &config.client_common_name,
        &config.organization,
        &[],
        ExtendedKeyUsagePurpose::ClientAuth,
        not_before,
        not_after,
    )?;
    let client_cert = client_params
        .signed_by(&client_key, &ca_cert, &ca_key)
        .map_err(generation)?;

    let crl_pem = build_crl(config, issued_at, &ca_cert, &ca_key)?;
    let ca_serial = certificate_serial(ca_cert.der())?;

    tracing::info!(
        ca = %config.ca_common_name,
        server = %config.server_common_name,
        expires = %not_after,
        revoked = config.revoked_serials.len(),
        "Certificate bundle generated"
    );

    Ok(CertificateBundle {
        ca_cert_pem: ca_cert.pem(),
        ca_key_pem: ca_key.serialize_pem(),
        server_cert_pem: server_cert.pem(),
        server_key_pem: server_key.serialize_pem(),
        client_cert_pem: client_cert.pem(),
        client_key_pem: client_key.serialize_pem(),
        crl_pem,
        ca_serial,
        expires: not_after,
    })
}

fn generation(e: rcgen::Error) -> TrustError {
    TrustError::GenerationFailure(e.to_string())
}

fn to_offset(dt: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .unwrap_or(time::OffsetDateTime::now_utc())
}

fn build_ca_params(
    config: &GenerationConfig,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> CertificateParams {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, config.ca_common_name.as_str());
    params
        .distinguished_name
        .push(DnType::OrganizationName, config.organization.as_str());

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    // CrlSign is mandatory: rcgen refuses to sign a CRL without it.
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    params.not_before = to_offset(not_before);
    params.not_after = to_offset(not_after);
    params
}

fn build_leaf_params(
    common_name: &str,
    organization: &str,
    sans: &[String],
    eku: ExtendedKeyUsagePurpose,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateParams, TrustError> {
    let dns_sans: Vec<String> = sans
        .iter()
        .filter(|s| s.parse::<std::net::IpAddr>().is_err())
        .cloned()
        .collect();

    let mut params = CertificateParams::new(dns_sans).map_err(generation)?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, organization);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![eku];

    for san in sans {
        if let Ok(ip) = san.parse::<std::net::IpAddr>() {
            params.subject_alt_names.push(SanType::IpAddress(ip));
        }
    }

    params.not_before = to_offset(not_before);
    params.not_after = to_offset(not_after);
    Ok(params)
}

/// SANs used when the caller does not supply any.
fn default_server_sans() -> Vec<String> {
    let mut sans = vec!["localhost".to_string()];
    if let Ok(name) = hostname::get() {
        let name = name.to_string_lossy().to_string();
        if !name.is_empty() && !sans.contains(&name) {
            sans.push(name);
        }
    }
    sans.push("127.0.0.1".to_string());
    sans
}

fn build_crl(
    config: &GenerationConfig,
    issued_at: DateTime<Utc>,
    ca_cert: &rcgen::Certificate,
    ca_key: &KeyPair,
) -> Result<String, TrustError> {
    let this_update = issued_at - Duration::hours(1);
    let next_update = issued_at + Duration::days(config.crl_validity_days);

    let revoked_certs = config
        .revoked_serials
        .iter()
        .map(|serial| {
            parse_serial(serial).map(|bytes| RevokedCertParams {
                serial_number: SerialNumber::from_slice(&bytes),
                revocation_time: to_offset(issued_at),
                reason_code: Some(RevocationReason::Unspecified),
                invalidity_date: None,
            })
        })
        .collect::<Result<Vec<_>, TrustError>>()?;

    let params = CertificateRevocationListParams {
        this_update: to_offset(this_update),
        next_update: to_offset(next_update),
        crl_number: SerialNumber::from(issued_at.timestamp().unsigned_abs()),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: KeyIdMethod::Sha256,
    };
    let crl = params.signed_by(ca_cert, ca_key).map_err(generation)?;
    crl.pem().map_err(generation)
}

/// Parse a hex serial into raw big-endian bytes.
///
/// Accepts optional `0x` prefixes and colon separators, pads odd-length
/// input with a leading zero.
fn parse_serial(serial: &str) -> Result<Vec<u8>, TrustError> {
    let normalized = serial.trim().trim_start_matches("0x").replace(':', "");
    let padded = if normalized.len() % 2 == 1 {
        format!("0{normalized}")
    } else {
        normalized
    };
    let bytes = hex::decode(&padded).map_err(|e| {
        TrustError::GenerationFailure(format!("invalid revoked serial {serial:?}: {e}"))
    })?;
    if bytes.is_empty() {
        return Err(TrustError::GenerationFailure(format!(
            "invalid revoked serial {serial:?}: empty"
        )));
    }
    Ok(bytes)
}

fn certificate_serial(der: &[u8]) -> Result<String, TrustError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| TrustError::GenerationFailure(format!("generated CA does not parse: {e}")))?;
    Ok(hex::encode(cert.raw_serial()))
}
