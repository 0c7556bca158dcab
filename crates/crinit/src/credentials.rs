//! Credential generation for the registry API server.
//!
//! Every run mints a fresh CA, a server certificate bound to the service's
//! network identity and an `admin` client certificate, plus optional basic
//! auth password and bearer token. Nothing here is persisted; callers put the
//! material into the credentials secret and the user's kubeconfig.

use std::fmt;
use std::net::IpAddr;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType, string::Ia5String,
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;
use x509_parser::pem::Pem;

/// Username every generated credential authenticates as
pub const ADMIN_USERNAME: &str = "admin";

/// Cluster-local DNS zone of the host cluster
pub const LOCAL_DNS_ZONE: &str = "cluster.local.";

/// Common name of the server certificate
const SERVER_COMMON_NAME: &str = "clusterregistry";

/// Validity period for the CA certificate (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Validity period for server and client certificates (1 year)
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// Certificate and key generation errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Parse error
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

fn compute_validity(years: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(years * 365);
    (now, not_after)
}

/// A PEM certificate with its PEM private key
#[derive(Clone)]
pub struct CertifiedKey {
    pub cert_pem: String,
    pub key_pem: String,
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Everything generated for one registry deployment
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub ca: CertifiedKey,
    pub server: CertifiedKey,
    pub admin: CertifiedKey,
    pub password: Option<SecretString>,
    pub token: Option<SecretString>,
}

impl Credentials {
    /// Exposed basic auth password, if one was generated
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|s| s.expose_secret())
    }

    /// Exposed bearer token, if one was generated
    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|s| s.expose_secret())
    }
}

/// Inputs to [`generate_credentials`]
#[derive(Debug, Clone, Default)]
pub struct CredentialRequest {
    pub namespace: String,
    /// Registry name; the CA is named after it
    pub name: String,
    pub service_name: String,
    pub dns_zone: String,
    pub ips: Vec<String>,
    pub hostnames: Vec<String>,
    /// Additional DNS names, e.g. the canonical name used by a remote aggregator
    pub extra_dns_names: Vec<String>,
    pub enable_basic_auth: bool,
    pub enable_token_auth: bool,
}

/// Subject alternative names for the server certificate, in order:
/// service short names, the cluster-local FQDN, then IPs, hostnames and extras.
pub fn server_sans(request: &CredentialRequest) -> Vec<String> {
    let svc = &request.service_name;
    let ns = &request.namespace;
    let zone = request.dns_zone.trim_end_matches('.');

    let mut sans = vec![
        svc.clone(),
        format!("{svc}.{ns}"),
        format!("{svc}.{ns}.svc"),
        format!("{svc}.{ns}.svc.{zone}"),
    ];
    sans.extend(request.ips.iter().cloned());
    sans.extend(request.hostnames.iter().cloned());
    sans.extend(request.extra_dns_names.iter().cloned());
    sans
}

fn to_san(san: &str) -> Result<SanType> {
    if let Ok(ip) = san.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(san.to_string())
        .map(SanType::DnsName)
        .map_err(|e| PkiError::CertificateGenerationFailed(format!("invalid DNS name '{san}': {e}")))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn
}

fn new_key(what: &str) -> Result<KeyPair> {
    KeyPair::generate()
        .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate {what} key: {e}")))
}

fn self_signed_ca(common_name: &str) -> Result<CertifiedKey> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS);
    params.not_before = not_before;
    params.not_after = not_after;

    let key = new_key("CA")?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {e}")))?;

    Ok(CertifiedKey {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

fn signed_leaf(
    ca: &CertifiedKey,
    common_name: &str,
    sans: Vec<SanType>,
    usage: rcgen::ExtendedKeyUsagePurpose,
) -> Result<CertifiedKey> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![usage];
    params.subject_alt_names = sans;
    let (not_before, not_after) = compute_validity(CERT_VALIDITY_YEARS);
    params.not_before = not_before;
    params.not_after = not_after;

    let key = new_key(common_name)?;

    let ca_key = KeyPair::from_pem(&ca.key_pem)
        .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key)
        .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {e}")))?;

    let cert = params.signed_by(&key, &issuer).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!("failed to sign {common_name} cert: {e}"))
    })?;

    Ok(CertifiedKey {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Generate a fresh CA, server and admin keypair, and optional secrets.
///
/// Any failure is returned immediately; generation is never retried.
pub fn generate_credentials(request: &CredentialRequest) -> Result<Credentials> {
    let ca = self_signed_ca(&request.name)?;

    let sans = server_sans(request)
        .iter()
        .map(|san| to_san(san))
        .collect::<Result<Vec<_>>>()?;
    let server = signed_leaf(&ca, SERVER_COMMON_NAME, sans, rcgen::ExtendedKeyUsagePurpose::ServerAuth)?;
    let admin = signed_leaf(&ca, ADMIN_USERNAME, Vec::new(), rcgen::ExtendedKeyUsagePurpose::ClientAuth)?;

    let password = request
        .enable_basic_auth
        .then(|| SecretString::from(uuid::Uuid::new_v4().to_string()));
    let token = request
        .enable_token_auth
        .then(|| SecretString::from(uuid::Uuid::new_v4().to_string()));

    debug!(
        name = %request.name,
        basic_auth = password.is_some(),
        token_auth = token.is_some(),
        "Generated registry credentials"
    );

    Ok(Credentials {
        username: ADMIN_USERNAME.to_string(),
        ca,
        server,
        admin,
        password,
        token,
    })
}

/// Contents of a static auth file line: `secret,username,uid\n`
pub fn auth_file_contents(username: &str, secret: &str) -> String {
    format!("{secret},{username},{}\n", uuid::Uuid::new_v4())
}

/// Number of certificates in a PEM bundle; fails if any block does not parse
pub fn count_pem_certificates(pem: &[u8]) -> Result<usize> {
    let mut count = 0;
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| PkiError::ParseError(format!("invalid PEM: {e}")))?;
        if block.label != "CERTIFICATE" {
            continue;
        }
        block
            .parse_x509()
            .map_err(|e| PkiError::ParseError(format!("invalid certificate: {e}")))?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::extensions::GeneralName;
    use x509_parser::pem::parse_x509_pem;

    fn request() -> CredentialRequest {
        CredentialRequest {
            namespace: "clusterregistry".to_string(),
            name: "foo".to_string(),
            service_name: "foo".to_string(),
            dns_zone: LOCAL_DNS_ZONE.to_string(),
            ips: vec!["10.0.0.1".to_string()],
            hostnames: vec!["lb.example.com".to_string(), "192.168.1.5".to_string()],
            ..Default::default()
        }
    }

    fn sans_of(cert_pem: &str) -> (Vec<String>, Vec<Vec<u8>>) {
        let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).expect("pem");
        let cert = pem.parse_x509().expect("x509");
        let san = cert
            .subject_alternative_name()
            .expect("valid extension")
            .expect("SAN present");

        let mut dns = Vec::new();
        let mut ips = Vec::new();
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(d) => dns.push((*d).to_string()),
                GeneralName::IPAddress(ip) => ips.push(ip.to_vec()),
                _ => {}
            }
        }
        (dns, ips)
    }

    #[test]
    fn test_server_sans_cover_service_identity() {
        let sans = server_sans(&request());
        assert_eq!(
            &sans[..4],
            &[
                "foo",
                "foo.clusterregistry",
                "foo.clusterregistry.svc",
                "foo.clusterregistry.svc.cluster.local",
            ]
        );
        assert!(sans.contains(&"10.0.0.1".to_string()));
        assert!(sans.contains(&"lb.example.com".to_string()));
    }

    #[test]
    fn test_generated_server_certificate_binds_names_and_ips() {
        let creds = generate_credentials(&request()).expect("credentials");

        let (dns, ips) = sans_of(&creds.server.cert_pem);
        assert!(dns.contains(&"foo.clusterregistry.svc.cluster.local".to_string()));
        assert!(dns.contains(&"lb.example.com".to_string()));
        // hostnames that parse as IPs become IP SANs
        assert!(!dns.contains(&"192.168.1.5".to_string()));
        assert!(ips.contains(&vec![10, 0, 0, 1]));
        assert!(ips.contains(&vec![192, 168, 1, 5]));

        assert_eq!(count_pem_certificates(creds.ca.cert_pem.as_bytes()).expect("ca"), 1);
    }

    #[test]
    fn test_optional_secrets_follow_flags() {
        let creds = generate_credentials(&request()).expect("credentials");
        assert!(creds.password().is_none());
        assert!(creds.token().is_none());
        assert_eq!(creds.username, ADMIN_USERNAME);

        let creds = generate_credentials(&CredentialRequest {
            enable_basic_auth: true,
            enable_token_auth: true,
            ..request()
        })
        .expect("credentials");
        let password = creds.password().expect("password");
        let token = creds.token().expect("token");
        assert!(uuid::Uuid::parse_str(password).is_ok());
        assert!(uuid::Uuid::parse_str(token).is_ok());
        assert_ne!(password, token);
    }

    #[test]
    fn test_fresh_material_every_run() {
        let first = generate_credentials(&request()).expect("credentials");
        let second = generate_credentials(&request()).expect("credentials");
        assert_ne!(first.ca.cert_pem, second.ca.cert_pem);
        assert_ne!(first.admin.key_pem, second.admin.key_pem);
    }

    #[test]
    fn test_auth_file_line_layout() {
        let line = auth_file_contents("admin", "s3cret");
        let fields: Vec<&str> = line.trim_end_matches('\n').split(',').collect();
        assert!(line.ends_with('\n'));
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], "s3cret");
        assert_eq!(fields[1], "admin");
        assert!(uuid::Uuid::parse_str(fields[2]).is_ok());
    }

    #[test]
    fn test_invalid_dns_name_is_fatal() {
        let err = generate_credentials(&CredentialRequest {
            hostnames: vec!["bad name with spaces é".to_string()],
            ..request()
        })
        .unwrap_err();
        assert!(matches!(err, PkiError::CertificateGenerationFailed(_)));
    }
}
