//! Rust toolkit for Brazilian municipal NFS-e emission (ABRASF 2.02 documents,
//! XML-DSig signing, SOAP submission and sale reconciliation).
//!
//! # Examples
//! ```rust
//! use nfse_core::config::{CertificateSecrets, Config, Issuer};
//!
//! let config = Config::new(
//!     Issuer::new("12345678000195", "12345"),
//!     CertificateSecrets::new("MIIK...", "secret"),
//! );
//! assert_eq!(config.issuer().cnpj(), "12345678000195");
//! ```
pub mod api;
pub mod certificate;
pub mod config;
pub mod emission;
pub mod nfse;
pub mod store;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Document(#[from] nfse::DocumentError),
    #[error(transparent)]
    Signing(#[from] nfse::sign::SigningError),
    #[error(transparent)]
    Verification(#[from] nfse::sign::VerificationError),
    #[error(transparent)]
    Parse(#[from] nfse::xml::parse::ParseError),
    #[error(transparent)]
    Transport(#[from] api::TransportError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Emission(#[from] emission::EmissionError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::{
        api::TransportError,
        certificate::CertificateError,
        config::ConfigError,
        nfse::{
            DocumentError, DocumentField, RecordId, SaleStatus, ValidationError, ValidationIssue,
            ValidationKind, sign::VerificationError, xml::parse::ParseError,
        },
        store::StoreError,
    };

    #[test]
    fn error_conversions_cover_variants() {
        let err: Error = ConfigError::Missing {
            name: "PRESTADOR_CNPJ",
        }
        .into();
        assert!(matches!(err, Error::Config(_)));

        let err: Error = CertificateError::Format("not base64").into();
        assert!(matches!(err, Error::Certificate(_)));

        let err: Error = DocumentError::Validation(ValidationError::new(vec![
            ValidationIssue::new(DocumentField::ClientName, ValidationKind::Missing),
        ]))
        .into();
        assert!(matches!(err, Error::Document(_)));

        let err: Error = VerificationError::DigestMismatch.into();
        assert!(matches!(err, Error::Verification(_)));

        let err: Error = ParseError::MissingField("Numero").into();
        assert!(matches!(err, Error::Parse(_)));

        let err: Error = TransportError::Wsdl("no address".into()).into();
        assert!(matches!(err, Error::Transport(_)));

        let err: Error = StoreError::Conflict {
            id: RecordId::new("1"),
            status: SaleStatus::Processing,
        }
        .into();
        assert!(matches!(err, Error::Store(_)));
    }
}
