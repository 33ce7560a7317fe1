//! XML serialization of the `GerarNfseEnvio` request (ABRASF 2.02 layout).
use super::{RpsDocument, TaxId, builder::Taker};
use crate::config::Issuer;
use constants::{
    ISS_NOT_WITHHELD, ISS_REQUIRED, MUNICIPAL_TAX_CODE, MUNICIPALITY_CODE, NFSE_NS,
    NO_TAX_INCENTIVE, RPS_SERIES, RPS_STATUS_NORMAL, RPS_TYPE, SERVICE_LIST_ITEM,
    SIMPLES_NACIONAL_OPT_IN,
};
use helpers::FixedPrecision;
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub(crate) mod constants;
pub mod parse;

pub use constants::SIGNED_ELEMENT;

/// XML serialization error.
#[derive(Debug, Error)]
pub enum NfseXmlError {
    #[error("failed to serialize RPS to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Rendering to an XML string.
///
/// `to_xml` is compact because the output is signed as-is; use
/// `to_xml_pretty` for inspection only.
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, NfseXmlError>;

    fn to_xml(&self) -> Result<String, NfseXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, NfseXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for RpsDocument {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, NfseXmlError> {
        let mut buffer = String::with_capacity(2048);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        if matches!(format, XmlFormat::Pretty { .. }) {
            buffer.push('\n');
        }

        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            GerarNfseEnvioXml(self).serialize(serializer)?;
        }

        Ok(buffer)
    }
}

mod helpers {
    use rust_decimal::{Decimal, RoundingStrategy};
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: Decimal,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn money(value: Decimal) -> Self {
            Self {
                value,
                precision: 2,
            }
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            let rounded = self
                .value
                .round_dp_with_strategy(self.precision as u32, RoundingStrategy::MidpointAwayFromZero);
            write!(f, "{:.*}", self.precision, rounded)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }
}

struct GerarNfseEnvioXml<'a>(&'a RpsDocument);

impl<'a> Serialize for GerarNfseEnvioXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("GerarNfseEnvio", 2)?;
        st.serialize_field("@xmlns", NFSE_NS)?;
        st.serialize_field("Rps", &DeclaracaoXml(self.0))?;
        st.end()
    }
}

struct DeclaracaoXml<'a>(&'a RpsDocument);

impl<'a> Serialize for DeclaracaoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Rps", 1)?;
        st.serialize_field(SIGNED_ELEMENT, &InfDeclaracaoXml(self.0))?;
        st.end()
    }
}

struct InfDeclaracaoXml<'a>(&'a RpsDocument);

impl<'a> Serialize for InfDeclaracaoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rps = self.0;
        let mut st = s.serialize_struct(SIGNED_ELEMENT, 0)?;
        st.serialize_field("@Id", &rps.element_id())?;
        st.serialize_field("Rps", &InfRpsXml(rps))?;
        st.serialize_field("Competencia", &rps.issue_date().to_string())?;
        st.serialize_field("Servico", &ServicoXml(rps))?;
        st.serialize_field("Prestador", &PrestadorXml(rps.issuer()))?;
        st.serialize_field("Tomador", &TomadorXml(rps.taker()))?;
        st.serialize_field("OptanteSimplesNacional", SIMPLES_NACIONAL_OPT_IN)?;
        st.serialize_field("IncentivoFiscal", NO_TAX_INCENTIVE)?;
        st.end()
    }
}

struct InfRpsXml<'a>(&'a RpsDocument);

impl<'a> Serialize for InfRpsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Rps", 0)?;
        st.serialize_field("IdentificacaoRps", &IdentificacaoRpsXml(self.0))?;
        st.serialize_field("DataEmissao", &self.0.issue_date().to_string())?;
        st.serialize_field("Status", RPS_STATUS_NORMAL)?;
        st.end()
    }
}

struct IdentificacaoRpsXml<'a>(&'a RpsDocument);

impl<'a> Serialize for IdentificacaoRpsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("IdentificacaoRps", 0)?;
        st.serialize_field("Numero", &self.0.rps_number().to_string())?;
        st.serialize_field("Serie", RPS_SERIES)?;
        st.serialize_field("Tipo", RPS_TYPE)?;
        st.end()
    }
}

struct ServicoXml<'a>(&'a RpsDocument);

impl<'a> Serialize for ServicoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rps = self.0;
        let mut st = s.serialize_struct("Servico", 0)?;
        st.serialize_field("Valores", &ValoresXml(rps))?;
        st.serialize_field("IssRetido", ISS_NOT_WITHHELD)?;
        st.serialize_field("ItemListaServico", SERVICE_LIST_ITEM)?;
        st.serialize_field("CodigoTributacaoMunicipio", MUNICIPAL_TAX_CODE)?;
        st.serialize_field("Discriminacao", rps.description())?;
        st.serialize_field("CodigoMunicipio", MUNICIPALITY_CODE)?;
        st.serialize_field("ExigibilidadeISS", ISS_REQUIRED)?;
        st.serialize_field("MunicipioIncidencia", MUNICIPALITY_CODE)?;
        st.end()
    }
}

struct ValoresXml<'a>(&'a RpsDocument);

impl<'a> Serialize for ValoresXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rps = self.0;
        let zero = FixedPrecision::money(Decimal::ZERO);
        let mut st = s.serialize_struct("Valores", 0)?;
        st.serialize_field("ValorServicos", &FixedPrecision::money(rps.service_value()))?;
        st.serialize_field("ValorDeducoes", &zero)?;
        st.serialize_field("ValorPis", &zero)?;
        st.serialize_field("ValorCofins", &zero)?;
        st.serialize_field("ValorInss", &zero)?;
        st.serialize_field("ValorIr", &zero)?;
        st.serialize_field("ValorCsll", &zero)?;
        st.serialize_field("OutrasRetencoes", &zero)?;
        st.serialize_field("ValorIss", &FixedPrecision::money(rps.iss_value()))?;
        st.serialize_field("Aliquota", &FixedPrecision::money(rps.iss_rate()))?;
        st.end()
    }
}

struct CpfCnpjXml<'a>(&'a TaxId);

impl<'a> Serialize for CpfCnpjXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("CpfCnpj", 1)?;
        match self.0 {
            TaxId::Cpf(cpf) => st.serialize_field("Cpf", cpf)?,
            TaxId::Cnpj(cnpj) => st.serialize_field("Cnpj", cnpj)?,
        }
        st.end()
    }
}

struct PrestadorXml<'a>(&'a Issuer);

impl<'a> Serialize for PrestadorXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let issuer = self.0;
        let cnpj = TaxId::Cnpj(issuer.cnpj().to_string());
        let mut st = s.serialize_struct("Prestador", 2)?;
        st.serialize_field("CpfCnpj", &CpfCnpjXml(&cnpj))?;
        st.serialize_field("InscricaoMunicipal", issuer.municipal_registration())?;
        st.end()
    }
}

struct TomadorXml<'a>(&'a Taker);

impl<'a> Serialize for TomadorXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let taker = self.0;
        let mut st = s.serialize_struct("Tomador", 0)?;
        st.serialize_field("IdentificacaoTomador", &IdentificacaoTomadorXml(&taker.tax_id))?;
        st.serialize_field("RazaoSocial", &taker.name)?;
        st.serialize_field("Endereco", &EnderecoXml(taker))?;
        st.serialize_field("Contato", &ContatoXml(taker))?;
        st.end()
    }
}

struct IdentificacaoTomadorXml<'a>(&'a TaxId);

impl<'a> Serialize for IdentificacaoTomadorXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("IdentificacaoTomador", 1)?;
        st.serialize_field("CpfCnpj", &CpfCnpjXml(self.0))?;
        st.end()
    }
}

struct EnderecoXml<'a>(&'a Taker);

impl<'a> Serialize for EnderecoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let taker = self.0;
        let mut st = s.serialize_struct("Endereco", 0)?;
        st.serialize_field("Endereco", &taker.street)?;
        st.serialize_field("Numero", &taker.number)?;
        st.serialize_field("Complemento", &taker.complement)?;
        st.serialize_field("Bairro", &taker.neighborhood)?;
        st.serialize_field("CodigoMunicipio", MUNICIPALITY_CODE)?;
        st.serialize_field("Uf", &taker.state)?;
        st.serialize_field("Cep", &taker.zip_code)?;
        st.end()
    }
}

struct ContatoXml<'a>(&'a Taker);

impl<'a> Serialize for ContatoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let taker = self.0;
        let mut st = s.serialize_struct("Contato", 2)?;
        st.serialize_field("Telefone", &taker.phone)?;
        st.serialize_field("Email", &taker.email)?;
        st.end()
    }
}
