//! Configuration: issuer identity, certificate secrets and webservice endpoint.
use std::{fmt, time::Duration};
use thiserror::Error;

/// WSDL of the municipal NFS-e webservice.
pub const DEFAULT_WSDL_URL: &str = "https://saojoaodelrei.nfiss.com.br/?WSDL";

/// Upper bound for each request to the webservice.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_CERTIFICATE_BASE64: &str = "CERTIFICATE_BASE64";
pub const ENV_CERTIFICATE_PASSWORD: &str = "CERTIFICATE_PASSWORD";
pub const ENV_PRESTADOR_CNPJ: &str = "PRESTADOR_CNPJ";
pub const ENV_PRESTADOR_IM: &str = "PRESTADOR_IM";
pub const ENV_WSDL_URL: &str = "NFSE_WSDL_URL";
pub const ENV_TIMEOUT_SECS: &str = "NFSE_TIMEOUT_SECS";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_SERVICE_KEY: &str = "SUPABASE_SERVICE_KEY";

/// Error returned while assembling configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    Missing { name: &'static str },
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// The service provider (prestador) issuing the invoices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    cnpj: String,
    municipal_registration: String,
}

impl Issuer {
    pub fn new(cnpj: impl Into<String>, municipal_registration: impl Into<String>) -> Self {
        Self {
            cnpj: cnpj.into(),
            municipal_registration: municipal_registration.into(),
        }
    }

    pub fn cnpj(&self) -> &str {
        &self.cnpj
    }

    pub fn municipal_registration(&self) -> &str {
        &self.municipal_registration
    }
}

/// Base64 PKCS#12 bundle and its password.
///
/// Either value may be blank here; the certificate loader rejects that at
/// signing time so the failure is recorded on the sale.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CertificateSecrets {
    pfx_base64: String,
    password: String,
}

impl CertificateSecrets {
    pub fn new(pfx_base64: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            pfx_base64: pfx_base64.into(),
            password: password.into(),
        }
    }

    pub fn pfx_base64(&self) -> &str {
        &self.pfx_base64
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for CertificateSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateSecrets")
            .field("pfx_base64", &redacted(&self.pfx_base64))
            .field("password", &redacted(&self.password))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}

/// Configuration for the emission pipeline.
///
/// # Examples
/// ```rust
/// use nfse_core::config::{CertificateSecrets, Config, Issuer};
///
/// let config = Config::new(
///     Issuer::new("12345678000195", "123456"),
///     CertificateSecrets::new("MIIK...", "secret"),
/// )
/// .with_wsdl_url("http://localhost:8080/?WSDL");
/// assert_eq!(config.wsdl_url(), "http://localhost:8080/?WSDL");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    issuer: Issuer,
    certificate: CertificateSecrets,
    wsdl_url: String,
    timeout: Duration,
}

impl Config {
    pub fn new(issuer: Issuer, certificate: CertificateSecrets) -> Self {
        Self {
            issuer,
            certificate,
            wsdl_url: DEFAULT_WSDL_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read configuration from process environment variables.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the issuer identity is missing or an
    /// optional override cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing { name })
        };

        let issuer = Issuer::new(required(ENV_PRESTADOR_CNPJ)?, required(ENV_PRESTADOR_IM)?);
        let certificate = CertificateSecrets::new(
            lookup(ENV_CERTIFICATE_BASE64).unwrap_or_default(),
            lookup(ENV_CERTIFICATE_PASSWORD).unwrap_or_default(),
        );
        let mut config = Config::new(issuer, certificate);

        if let Some(url) = lookup(ENV_WSDL_URL).filter(|v| !v.trim().is_empty()) {
            config = config.with_wsdl_url(url.trim());
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS).filter(|v| !v.trim().is_empty()) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Invalid {
                    name: ENV_TIMEOUT_SECS,
                    value: raw.clone(),
                })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_wsdl_url(mut self, url: impl Into<String>) -> Self {
        self.wsdl_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub fn certificate(&self) -> &CertificateSecrets {
        &self.certificate
    }

    pub fn wsdl_url(&self) -> &str {
        &self.wsdl_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Connection settings for the hosted record store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    url: String,
    service_key: String,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
        }
    }

    /// Read `SUPABASE_URL` and `SUPABASE_SERVICE_KEY`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] if either is unset or blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing { name })
        };
        Ok(Self::new(
            read(ENV_SUPABASE_URL)?,
            read(ENV_SUPABASE_SERVICE_KEY)?,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("service_key", &redacted(&self.service_key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn from_lookup_reads_issuer_and_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_PRESTADOR_CNPJ, "12345678000195"),
            (ENV_PRESTADOR_IM, " 98765 "),
            (ENV_CERTIFICATE_BASE64, "AAAA"),
        ]))
        .expect("config");
        assert_eq!(config.issuer().cnpj(), "12345678000195");
        assert_eq!(config.issuer().municipal_registration(), "98765");
        assert_eq!(config.certificate().pfx_base64(), "AAAA");
        assert_eq!(config.certificate().password(), "");
        assert_eq!(config.wsdl_url(), DEFAULT_WSDL_URL);
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn from_lookup_requires_issuer() {
        let err = Config::from_lookup(lookup(&[(ENV_PRESTADOR_CNPJ, "12345678000195")]))
            .expect_err("missing IM");
        assert_eq!(
            err,
            ConfigError::Missing {
                name: ENV_PRESTADOR_IM
            }
        );
    }

    #[test]
    fn from_lookup_applies_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_PRESTADOR_CNPJ, "12345678000195"),
            (ENV_PRESTADOR_IM, "1"),
            (ENV_WSDL_URL, "http://localhost:1234/?WSDL"),
            (ENV_TIMEOUT_SECS, "5"),
        ]))
        .expect("config");
        assert_eq!(config.wsdl_url(), "http://localhost:1234/?WSDL");
        assert_eq!(config.timeout(), Duration::from_secs(5));

        let err = Config::from_lookup(lookup(&[
            (ENV_PRESTADOR_CNPJ, "12345678000195"),
            (ENV_PRESTADOR_IM, "1"),
            (ENV_TIMEOUT_SECS, "0"),
        ]))
        .expect_err("zero timeout");
        assert!(matches!(err, ConfigError::Invalid { name: ENV_TIMEOUT_SECS, .. }));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let secrets = CertificateSecrets::new("MIIKsecretbundle", "hunter2");
        let printed = format!("{secrets:?}");
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("MIIK"));
        assert!(printed.contains("<redacted>"));

        let store = StoreConfig::new("https://db.example", "service-key");
        assert!(!format!("{store:?}").contains("service-key"));
    }

    #[test]
    fn store_config_requires_both_values() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "https://db")]))
            .expect_err("missing key");
        assert_eq!(
            err,
            ConfigError::Missing {
                name: ENV_SUPABASE_SERVICE_KEY
            }
        );
    }
}
