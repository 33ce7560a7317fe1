use super::{
    Client, DocumentError, DocumentField, RpsNumber, Sale, TaxId, ValidationError,
    ValidationIssue, ValidationKind, digits_only,
};
use crate::config::Issuer;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// ISS rate applied to every service (2%).
pub(crate) fn iss_rate() -> Decimal {
    Decimal::new(2, 2)
}

/// Brasília local time (UTC-03:00, no daylight saving since 2019).
pub fn brasilia_offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("UTC-3 is a valid offset")
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Service taker (tomador) data, normalized for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taker {
    pub(crate) tax_id: TaxId,
    pub(crate) name: String,
    pub(crate) street: String,
    pub(crate) number: String,
    pub(crate) complement: String,
    pub(crate) neighborhood: String,
    pub(crate) state: String,
    pub(crate) zip_code: String,
    pub(crate) phone: String,
    pub(crate) email: String,
}

impl Taker {
    pub fn tax_id(&self) -> &TaxId {
        &self.tax_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A validated RPS ready to be rendered as `GerarNfseEnvio`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpsDocument {
    rps_number: RpsNumber,
    issued_at: DateTime<FixedOffset>,
    service_value: Decimal,
    description: String,
    issuer: Issuer,
    taker: Taker,
}

impl RpsDocument {
    pub fn rps_number(&self) -> RpsNumber {
        self.rps_number
    }

    /// `Id` of the declaration element referenced by the signature.
    pub fn element_id(&self) -> String {
        self.rps_number.element_id()
    }

    pub fn issued_at(&self) -> DateTime<FixedOffset> {
        self.issued_at
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issued_at.date_naive()
    }

    pub fn service_value(&self) -> Decimal {
        self.service_value
    }

    /// Always zero; the issuer is a Simples Nacional opt-in.
    pub fn iss_value(&self) -> Decimal {
        Decimal::ZERO
    }

    pub fn iss_rate(&self) -> Decimal {
        iss_rate()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub fn taker(&self) -> &Taker {
        &self.taker
    }
}

/// Assembles an [`RpsDocument`] from a sale and its client.
///
/// # Examples
/// ```rust
/// use nfse_core::config::Issuer;
/// use nfse_core::nfse::{Client, RpsBuilder, RpsNumber, Sale};
/// use nfse_core::nfse::xml::ToXml;
/// use rust_decimal::Decimal;
///
/// let sale = Sale::new("1", Decimal::new(15000, 2), "Vitrificação");
/// let client = Client {
///     name: Some("Maria Silva".into()),
///     cpf_cnpj: Some("529.982.247-25".into()),
///     address_street: Some("Rua Direita".into()),
///     address_number: Some("10".into()),
///     address_neighborhood: Some("Centro".into()),
///     address_state: Some("MG".into()),
///     address_zip_code: Some("36300-000".into()),
///     ..Client::default()
/// };
/// let issuer = Issuer::new("12345678000195", "12345");
/// let rps = RpsBuilder::new(&sale, &client, &issuer, RpsNumber::new(1).unwrap()).build()?;
/// let xml = rps.to_xml()?;
/// assert!(xml.contains(r#"Id="rps1""#));
/// # Ok::<(), nfse_core::nfse::DocumentError>(())
/// ```
pub struct RpsBuilder<'a> {
    sale: &'a Sale,
    client: &'a Client,
    issuer: &'a Issuer,
    rps_number: RpsNumber,
    issued_at: Option<DateTime<FixedOffset>>,
}

impl<'a> RpsBuilder<'a> {
    pub fn new(sale: &'a Sale, client: &'a Client, issuer: &'a Issuer, rps_number: RpsNumber) -> Self {
        Self {
            sale,
            client,
            issuer,
            rps_number,
            issued_at: None,
        }
    }

    /// Emission timestamp; defaults to now in Brasília time.
    pub fn issued_at(mut self, issued_at: DateTime<FixedOffset>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    /// Validate the inputs and produce the document.
    ///
    /// # Errors
    /// Returns [`DocumentError::Validation`] listing every missing or
    /// malformed field.
    pub fn build(self) -> Result<RpsDocument, DocumentError> {
        let mut issues = Vec::new();
        let mut require = |field: DocumentField, value: Option<&str>| -> String {
            match value.map(str::trim).filter(|v| !v.is_empty()) {
                Some(v) => v.to_string(),
                None => {
                    issues.push(ValidationIssue::new(field, ValidationKind::Missing));
                    String::new()
                }
            }
        };

        let description = require(
            DocumentField::ServiceDescription,
            self.sale.service_description.as_deref(),
        );
        let name = require(DocumentField::ClientName, self.client.name.as_deref());
        let street = require(DocumentField::AddressStreet, self.client.address_street.as_deref());
        let number = require(DocumentField::AddressNumber, self.client.address_number.as_deref());
        let neighborhood = require(
            DocumentField::AddressNeighborhood,
            self.client.address_neighborhood.as_deref(),
        );
        let state = require(DocumentField::AddressState, self.client.address_state.as_deref());
        let zip_raw = require(
            DocumentField::AddressZipCode,
            self.client.address_zip_code.as_deref(),
        );
        let issuer_cnpj = require(DocumentField::IssuerTaxId, Some(self.issuer.cnpj()));
        let issuer_im = require(
            DocumentField::IssuerMunicipalRegistration,
            Some(self.issuer.municipal_registration()),
        );

        let service_value = money(self.sale.value);
        if service_value <= Decimal::ZERO {
            issues.push(ValidationIssue::new(
                DocumentField::SaleValue,
                ValidationKind::OutOfRange,
            ));
        }

        let tax_id = match TaxId::parse(self.client.cpf_cnpj.as_deref().unwrap_or_default()) {
            Ok(id) => Some(id),
            Err(kind) => {
                issues.push(ValidationIssue::new(DocumentField::ClientTaxId, kind));
                None
            }
        };

        let zip_code = digits_only(&zip_raw);
        if !zip_raw.is_empty() && zip_code.len() != 8 {
            issues.push(ValidationIssue::new(
                DocumentField::AddressZipCode,
                ValidationKind::InvalidFormat,
            ));
        }
        let state = state.to_uppercase();
        if !state.is_empty() && (state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic())) {
            issues.push(ValidationIssue::new(
                DocumentField::AddressState,
                ValidationKind::InvalidFormat,
            ));
        }
        if !issuer_cnpj.is_empty() && !matches!(TaxId::parse(&issuer_cnpj), Ok(TaxId::Cnpj(_))) {
            issues.push(ValidationIssue::new(
                DocumentField::IssuerTaxId,
                ValidationKind::InvalidFormat,
            ));
        }

        let tax_id = match tax_id {
            Some(id) if issues.is_empty() => id,
            _ => return Err(ValidationError::new(issues).into()),
        };

        let optional = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();
        let taker = Taker {
            tax_id,
            name,
            street,
            number,
            complement: optional(&self.client.address_complement),
            neighborhood,
            state,
            zip_code,
            phone: optional(&self.client.phone),
            email: optional(&self.client.email),
        };

        Ok(RpsDocument {
            rps_number: self.rps_number,
            issued_at: self
                .issued_at
                .map(|at| at.with_timezone(&brasilia_offset()))
                .unwrap_or_else(|| Utc::now().with_timezone(&brasilia_offset())),
            service_value,
            description,
            issuer: Issuer::new(digits_only(&issuer_cnpj), issuer_im),
            taker,
        })
    }
}
