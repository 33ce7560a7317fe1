pub(crate) const NFSE_NS: &str = "http://www.abrasf.org.br/nfse.xsd";
pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub(crate) const SOAP11_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub(crate) const SOAP12_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub(crate) const WSDL_SOAP12_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";

pub(crate) const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub(crate) const ALG_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub(crate) const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub(crate) const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// ABRASF layout version announced in `nfseCabecMsg`.
pub(crate) const LAYOUT_VERSION: &str = "2.02";

/// Element carrying the signed declaration.
pub const SIGNED_ELEMENT: &str = "InfDeclaracaoPrestacaoServico";

// Fixed fiscal profile of the business (Simples Nacional, no withholdings).
pub(crate) const MUNICIPALITY_CODE: &str = "3162500";
pub(crate) const SERVICE_LIST_ITEM: &str = "14.01";
pub(crate) const MUNICIPAL_TAX_CODE: &str = "140101";
pub(crate) const RPS_SERIES: &str = "API";
pub(crate) const RPS_TYPE: &str = "1";
pub(crate) const RPS_STATUS_NORMAL: &str = "1";
pub(crate) const ISS_NOT_WITHHELD: &str = "2";
pub(crate) const ISS_REQUIRED: &str = "1";
pub(crate) const SIMPLES_NACIONAL_OPT_IN: &str = "1";
pub(crate) const NO_TAX_INCENTIVE: &str = "2";
