//! Signing material extracted from a PKCS#12 (PFX) bundle.
use crate::config::CertificateSecrets;
use base64ct::{Base64, Encoding};
use openssl::{
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{Id, PKey, Private},
    x509::X509,
};
use thiserror::Error;

/// Errors that can occur while loading the signing certificate.
///
/// Messages are fixed strings so they can be stored on a sale without
/// exposing key material or library internals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// Bundle or password not configured. Not retryable.
    #[error("certificate not configured: {0}")]
    Configuration(&'static str),
    /// Not base64, not PKCS#12, or the password does not unlock it.
    #[error("invalid certificate bundle: {0}")]
    Format(&'static str),
    /// The bundle opened but lacks a usable key or certificate.
    #[error("unusable certificate bundle: {0}")]
    Content(&'static str),
}

/// Private key and X.509 certificate for one signing operation.
///
/// Built fresh for every emission and dropped afterwards; nothing is cached.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::certificate::CertificateBundle;
///
/// let pfx_base64 = std::env::var("CERTIFICATE_BASE64")?;
/// let bundle = CertificateBundle::from_base64(&pfx_base64, "secret")?;
/// println!("{}", bundle.subject());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct CertificateBundle {
    private_key: PKey<Private>,
    certificate: X509,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("subject", &self.subject())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl CertificateBundle {
    /// Load the bundle described by configured secrets.
    ///
    /// # Errors
    /// See [`CertificateBundle::from_base64`].
    pub fn from_secrets(secrets: &CertificateSecrets) -> Result<Self, CertificateError> {
        Self::from_base64(secrets.pfx_base64(), secrets.password())
    }

    /// Decode a base64 PKCS#12 bundle and unlock it with `password`.
    ///
    /// Whitespace inside the base64 text (wrapped secrets) is ignored.
    ///
    /// # Errors
    /// - [`CertificateError::Configuration`] if either input is empty.
    /// - [`CertificateError::Format`] if the data is not a PKCS#12 bundle or
    ///   the password is wrong.
    /// - [`CertificateError::Content`] if the key or certificate is missing,
    ///   the key is not RSA, or the two do not belong together.
    pub fn from_base64(pfx_base64: &str, password: &str) -> Result<Self, CertificateError> {
        if pfx_base64.trim().is_empty() {
            return Err(CertificateError::Configuration(
                "certificate bundle (CERTIFICATE_BASE64) is not set",
            ));
        }
        if password.is_empty() {
            return Err(CertificateError::Configuration(
                "certificate password (CERTIFICATE_PASSWORD) is not set",
            ));
        }

        let compact: String = pfx_base64.chars().filter(|c| !c.is_whitespace()).collect();
        let der = Base64::decode_vec(&compact)
            .map_err(|_| CertificateError::Format("certificate bundle is not valid base64"))?;
        Self::from_pkcs12_der(&der, password)
    }

    /// Unlock a DER-encoded PKCS#12 bundle.
    ///
    /// # Errors
    /// Same as [`CertificateBundle::from_base64`], minus the base64 checks.
    pub fn from_pkcs12_der(der: &[u8], password: &str) -> Result<Self, CertificateError> {
        let pkcs12 = Pkcs12::from_der(der).map_err(|e| {
            tracing::debug!(error = %e, "PKCS#12 decoding failed");
            CertificateError::Format("certificate bundle is not a PKCS#12 container")
        })?;
        let parsed = pkcs12.parse2(password).map_err(|e| {
            tracing::debug!(error = %e, "PKCS#12 unlock failed");
            CertificateError::Format("certificate bundle could not be unlocked with the configured password")
        })?;

        let private_key = parsed
            .pkey
            .ok_or(CertificateError::Content("bundle holds no private key"))?;
        let certificate = parsed
            .cert
            .ok_or(CertificateError::Content("bundle holds no certificate"))?;

        if private_key.id() != Id::RSA {
            return Err(CertificateError::Content(
                "private key is not an RSA key",
            ));
        }
        let matches = certificate
            .public_key()
            .map(|public| public.public_eq(&private_key))
            .unwrap_or(false);
        if !matches {
            return Err(CertificateError::Content(
                "private key does not belong to the certificate",
            ));
        }

        let bundle = Self {
            private_key,
            certificate,
        };
        tracing::debug!(
            subject = %bundle.subject(),
            not_after = %bundle.certificate.not_after(),
            "loaded signing certificate"
        );
        Ok(bundle)
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// DER encoding of the certificate.
    ///
    /// # Errors
    /// Returns [`CertificateError::Content`] if the certificate cannot be re-encoded.
    pub fn certificate_der(&self) -> Result<Vec<u8>, CertificateError> {
        self.certificate
            .to_der()
            .map_err(|_| CertificateError::Content("certificate could not be DER-encoded"))
    }

    /// Bare base64 DER of the certificate, as embedded in `X509Certificate`.
    ///
    /// # Errors
    /// See [`CertificateBundle::certificate_der`].
    pub fn certificate_base64(&self) -> Result<String, CertificateError> {
        Ok(Base64::encode_string(&self.certificate_der()?))
    }

    /// Human-readable subject, e.g. `CN=ACME LTDA:12345678000195, O=ICP-Brasil`.
    pub fn subject(&self) -> String {
        self.certificate
            .subject_name()
            .entries()
            .map(|entry| {
                let key = entry
                    .object()
                    .nid()
                    .short_name()
                    .unwrap_or("?")
                    .to_string();
                let value = entry
                    .data()
                    .as_utf8()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                format!("{key}={value}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Common name of the certificate subject, if present.
    pub fn common_name(&self) -> Option<String> {
        self.certificate
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_inputs_are_configuration_errors() {
        assert!(matches!(
            CertificateBundle::from_base64("", "secret"),
            Err(CertificateError::Configuration(_))
        ));
        assert!(matches!(
            CertificateBundle::from_base64("  \n", "secret"),
            Err(CertificateError::Configuration(_))
        ));
        assert!(matches!(
            CertificateBundle::from_base64("TUlJSw==", ""),
            Err(CertificateError::Configuration(_))
        ));
    }

    #[test]
    fn garbage_is_a_format_error() {
        assert!(matches!(
            CertificateBundle::from_base64("not base64 at all!", "secret"),
            Err(CertificateError::Format(_))
        ));
        assert!(matches!(
            CertificateBundle::from_base64("aGVsbG8gd29ybGQ=", "secret"),
            Err(CertificateError::Format(_))
        ));
    }

    #[test]
    fn secrets_round_through_from_secrets() {
        let secrets = CertificateSecrets::new("", "");
        assert!(matches!(
            CertificateBundle::from_secrets(&secrets),
            Err(CertificateError::Configuration(_))
        ));
    }
}
