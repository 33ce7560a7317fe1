//! NFS-e domain types: sale and client records, tax ids and emission results.
mod builder;
pub mod receipt;
pub mod sign;
pub mod xml;
pub use builder::{RpsBuilder, RpsDocument, Taker, brasilia_offset};
pub use receipt::{MonotonicRpsNumbers, RandomRpsNumbers, RpsNumber, RpsNumberSource};

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while turning a sale and client into an RPS document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Xml(#[from] xml::NfseXmlError),
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid sale or client data: {}", describe_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

fn describe_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{} {}", issue.field.as_str(), issue.kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: DocumentField,
    pub kind: ValidationKind,
}

impl ValidationIssue {
    pub fn new(field: DocumentField, kind: ValidationKind) -> Self {
        Self { field, kind }
    }
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    SaleValue,
    ServiceDescription,
    ClientName,
    ClientTaxId,
    AddressStreet,
    AddressNumber,
    AddressNeighborhood,
    AddressState,
    AddressZipCode,
    IssuerTaxId,
    IssuerMunicipalRegistration,
}

impl DocumentField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentField::SaleValue => "value",
            DocumentField::ServiceDescription => "service_description",
            DocumentField::ClientName => "name",
            DocumentField::ClientTaxId => "cpf_cnpj",
            DocumentField::AddressStreet => "address_street",
            DocumentField::AddressNumber => "address_number",
            DocumentField::AddressNeighborhood => "address_neighborhood",
            DocumentField::AddressState => "address_state",
            DocumentField::AddressZipCode => "address_zip_code",
            DocumentField::IssuerTaxId => "issuer cnpj",
            DocumentField::IssuerMunicipalRegistration => "issuer municipal registration",
        }
    }
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    InvalidFormat,
    OutOfRange,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Missing => "is missing",
            ValidationKind::InvalidFormat => "has an invalid format",
            ValidationKind::OutOfRange => "is out of range",
        }
    }
}

/// Primary key of a stored record.
///
/// The store may hand out integer or text keys; both are carried as text.
///
/// # Examples
/// ```rust
/// use nfse_core::nfse::RecordId;
///
/// let id: RecordId = serde_json::from_str("42")?;
/// assert_eq!(id.as_str(), "42");
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId(value)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId(value.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecordId {
    Text(String),
    Number(i64),
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawRecordId::deserialize(deserializer)? {
            RawRecordId::Text(value) => RecordId(value),
            RawRecordId::Number(value) => RecordId(value.to_string()),
        })
    }
}

impl Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// Fiscal lifecycle of a sale.
///
/// Persisted with the labels the existing frontend reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaleStatus {
    #[serde(rename = "Pendente")]
    Pending,
    #[serde(rename = "Processando")]
    Processing,
    #[serde(rename = "Emitida")]
    Issued,
    #[serde(rename = "Erro")]
    Error,
}

/// Error returned when parsing a [`SaleStatus`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid sale status: {input}")]
pub struct SaleStatusParseError {
    input: String,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "Pendente",
            SaleStatus::Processing => "Processando",
            SaleStatus::Issued => "Emitida",
            SaleStatus::Error => "Erro",
        }
    }

    /// Whether a new emission attempt may start from this status.
    pub fn can_begin_processing(&self) -> bool {
        matches!(self, SaleStatus::Pending | SaleStatus::Error)
    }
}

impl FromStr for SaleStatus {
    type Err = SaleStatusParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pendente" => Ok(SaleStatus::Pending),
            "Processando" => Ok(SaleStatus::Processing),
            "Emitida" => Ok(SaleStatus::Issued),
            "Erro" => Ok(SaleStatus::Error),
            _ => Err(SaleStatusParseError {
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded sale as stored in the `sales` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: RecordId,
    #[serde(default)]
    pub client_id: Option<RecordId>,
    pub value: Decimal,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub installments: Option<i32>,
    #[serde(default)]
    pub observations: Option<String>,
    pub status: SaleStatus,
    #[serde(default)]
    pub rps_number: Option<u64>,
    #[serde(default)]
    pub nfs_number: Option<String>,
    #[serde(default)]
    pub verification_code: Option<String>,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default, rename = "nfs_link_pdf")]
    pub pdf_link: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Sale {
    /// A freshly recorded sale, as the sales form inserts it.
    pub fn new(id: impl Into<RecordId>, value: Decimal, service_description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client_id: None,
            value,
            service_description: Some(service_description.into()),
            payment_method: None,
            installments: None,
            observations: None,
            status: SaleStatus::Pending,
            rps_number: None,
            nfs_number: None,
            verification_code: None,
            issue_date: None,
            pdf_link: None,
            error_message: None,
        }
    }

    pub fn service_description(&self) -> &str {
        self.service_description.as_deref().unwrap_or_default()
    }
}

/// A client (service taker) as stored in the `clients` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Option<RecordId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cpf_cnpj: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address_street: Option<String>,
    #[serde(default)]
    pub address_number: Option<String>,
    #[serde(default)]
    pub address_complement: Option<String>,
    #[serde(default)]
    pub address_neighborhood: Option<String>,
    #[serde(default)]
    pub address_state: Option<String>,
    #[serde(default)]
    pub address_zip_code: Option<String>,
}

/// Brazilian taxpayer id of a person (CPF) or company (CNPJ).
///
/// # Examples
/// ```rust
/// use nfse_core::nfse::TaxId;
///
/// let id = TaxId::parse("12.345.678/0001-95")?;
/// assert_eq!(id, TaxId::Cnpj("12345678000195".into()));
/// # Ok::<(), nfse_core::nfse::ValidationKind>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxId {
    Cpf(String),
    Cnpj(String),
}

impl TaxId {
    /// Parse a formatted or bare CPF/CNPJ.
    ///
    /// # Errors
    /// Returns [`ValidationKind::Missing`] for blank input and
    /// [`ValidationKind::InvalidFormat`] when the digit count matches neither.
    pub fn parse(raw: &str) -> std::result::Result<Self, ValidationKind> {
        let digits = digits_only(raw);
        match digits.len() {
            0 if raw.trim().is_empty() => Err(ValidationKind::Missing),
            11 => Ok(TaxId::Cpf(digits)),
            14 => Ok(TaxId::Cnpj(digits)),
            _ => Err(ValidationKind::InvalidFormat),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaxId::Cpf(value) | TaxId::Cnpj(value) => value,
        }
    }
}

pub(crate) fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Fiscal fields assigned by the tax authority to an issued NFS-e.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedNfse {
    pub nfs_number: String,
    pub verification_code: String,
    pub issue_date: String,
    #[serde(rename = "nfs_link_pdf")]
    pub pdf_link: Option<String>,
}

/// Normalized outcome of an emission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionResult {
    pub status: SaleStatus,
    pub rps_number: Option<u64>,
    pub nfs_number: Option<String>,
    pub verification_code: Option<String>,
    pub issue_date: Option<String>,
    #[serde(rename = "nfs_link_pdf")]
    pub pdf_link: Option<String>,
    pub error_message: Option<String>,
}

impl EmissionResult {
    pub fn issued(rps_number: RpsNumber, nfse: IssuedNfse) -> Self {
        Self {
            status: SaleStatus::Issued,
            rps_number: Some(rps_number.value()),
            nfs_number: Some(nfse.nfs_number),
            verification_code: Some(nfse.verification_code),
            issue_date: Some(nfse.issue_date),
            pdf_link: nfse.pdf_link,
            error_message: None,
        }
    }

    pub fn is_issued(&self) -> bool {
        self.status == SaleStatus::Issued
    }
}
