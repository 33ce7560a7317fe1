//! SOAP client for the municipal NFS-e webservice.
use crate::config::Config;
use crate::nfse::xml::constants::{
    LAYOUT_VERSION, NFSE_NS, SOAP11_ENV_NS, SOAP12_ENV_NS, WSDL_SOAP12_NS,
};
use libxml::{parser::Parser, tree::Node, xpath};
use quick_xml::se::SeError;
use reqwest::Client;
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};
use std::time::Duration;
use thiserror::Error;

const OPERATION: &str = "GerarNfse";
const DEFAULT_REQUEST_ELEMENT: &str = "GerarNfseRequest";

/// Errors returned by the SOAP client.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("webservice unreachable: {0}")]
    Network(String),
    #[error("webservice did not answer within {0:?}")]
    Timeout(Duration),
    #[error("webservice answered HTTP {status} without a SOAP envelope")]
    Http { status: u16, body: String },
    #[error("invalid WSDL: {0}")]
    Wsdl(String),
    #[error("failed to build SOAP envelope: {0}")]
    Envelope(#[from] SeError),
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// SOAP protocol version advertised by the WSDL port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SoapVersion {
    #[default]
    Soap11,
    Soap12,
}

impl SoapVersion {
    pub fn envelope_namespace(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => SOAP11_ENV_NS,
            SoapVersion::Soap12 => SOAP12_ENV_NS,
        }
    }
}

/// What the WSDL says about the `GerarNfse` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub endpoint: String,
    pub soap_action: Option<String>,
    pub request_element: String,
    pub target_namespace: String,
    pub soap_version: SoapVersion,
}

/// NFS-e webservice client.
///
/// The WSDL is fetched on every call, so endpoint changes published by the
/// municipality are picked up without a restart.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::api::NfseClient;
/// use nfse_core::config::Config;
///
/// # async fn run(config: Config, signed_xml: String) -> Result<(), Box<dyn std::error::Error>> {
/// let client = NfseClient::new(&config)?;
/// let soap_response = client.gerar_nfse(&signed_xml).await?;
/// # let _ = soap_response;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NfseClient {
    http: Client,
    wsdl_url: String,
    timeout: Duration,
}

impl NfseClient {
    /// Create a client for the configured WSDL and timeout.
    ///
    /// # Errors
    /// Returns [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        Self::with_endpoint(config.wsdl_url(), config.timeout())
    }

    pub fn with_endpoint(wsdl_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self {
            http,
            wsdl_url: wsdl_url.into(),
            timeout,
        })
    }

    pub fn wsdl_url(&self) -> &str {
        &self.wsdl_url
    }

    /// Fetch and inspect the WSDL.
    ///
    /// # Errors
    /// Returns [`TransportError`] if the WSDL cannot be fetched or does not
    /// describe a `GerarNfse` endpoint.
    pub async fn discover(&self) -> Result<ServiceDescription, TransportError> {
        let response = self
            .http
            .get(&self.wsdl_url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }
        let description = parse_wsdl(&body)?;
        tracing::debug!(
            endpoint = %description.endpoint,
            soap_version = ?description.soap_version,
            request_element = %description.request_element,
            "discovered GerarNfse operation"
        );
        Ok(description)
    }

    /// Invoke `GerarNfse` with a signed `GerarNfseEnvio` document and return
    /// the raw SOAP response.
    ///
    /// HTTP error statuses are returned as responses when they carry a SOAP
    /// envelope (faults); otherwise they are transport failures.
    ///
    /// # Errors
    /// Returns [`TransportError`] for network failures, timeouts, invalid
    /// WSDL or non-SOAP HTTP errors.
    pub async fn gerar_nfse(&self, signed_xml: &str) -> Result<String, TransportError> {
        let service = self.discover().await?;
        let envelope = build_envelope(&service, signed_xml)?;

        let mut request = self.http.post(&service.endpoint);
        request = match (service.soap_version, service.soap_action.as_deref()) {
            (SoapVersion::Soap11, action) => request
                .header("Content-Type", "text/xml; charset=utf-8")
                .header("SOAPAction", format!("\"{}\"", action.unwrap_or_default())),
            (SoapVersion::Soap12, Some(action)) => request.header(
                "Content-Type",
                format!("application/soap+xml; charset=utf-8; action=\"{action}\""),
            ),
            (SoapVersion::Soap12, None) => {
                request.header("Content-Type", "application/soap+xml; charset=utf-8")
            }
        };

        tracing::info!(endpoint = %service.endpoint, "submitting GerarNfse");
        let response = request
            .body(envelope)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.request_error(e))?;

        if status.is_success() || is_soap_envelope(&body) {
            return Ok(body);
        }
        Err(TransportError::Http {
            status: status.as_u16(),
            body: snippet(&body),
        })
    }

    fn request_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(512).collect()
}

fn is_soap_envelope(body: &str) -> bool {
    Parser::default()
        .parse_string(body)
        .ok()
        .and_then(|doc| doc.get_root_element())
        .is_some_and(|root| root.get_name() == "Envelope")
}

/// Extract the `GerarNfse` endpoint from a WSDL 1.1 document.
///
/// # Errors
/// Returns [`TransportError::Wsdl`] when the document is not XML or has no
/// service address.
pub fn parse_wsdl(wsdl: &str) -> Result<ServiceDescription, TransportError> {
    let doc = Parser::default()
        .parse_string(wsdl)
        .map_err(|e| TransportError::Wsdl(format!("XML parse error: {e:?}")))?;
    let ctx = xpath::Context::new(&doc)
        .map_err(|_| TransportError::Wsdl("failed to build XPath context".into()))?;

    let target_namespace = doc
        .get_root_element()
        .and_then(|root| root.get_attribute("targetNamespace"))
        .unwrap_or_else(|| NFSE_NS.to_string());

    let bindings = wsdl_nodes(
        &ctx,
        &format!(
            "//*[local-name()='binding'][*[local-name()='operation'][@name='{OPERATION}']]"
        ),
    )?;
    let ports = wsdl_nodes(&ctx, "//*[local-name()='service']/*[local-name()='port']")?;

    let mut chosen: Option<(Node, Option<Node>)> = None;
    for port in ports {
        let binding_name = port
            .get_attribute("binding")
            .map(|b| local_part(&b).to_string())
            .unwrap_or_default();
        let binding = bindings
            .iter()
            .find(|b| b.get_attribute("name").as_deref() == Some(binding_name.as_str()))
            .cloned();
        if binding.is_some() {
            chosen = Some((port, binding));
            break;
        }
        if chosen.is_none() {
            chosen = Some((port, None));
        }
    }
    let (port, binding) =
        chosen.ok_or_else(|| TransportError::Wsdl("no service port declared".into()))?;

    let address = element_children(&port)
        .into_iter()
        .find(|child| child.get_name() == "address")
        .ok_or_else(|| TransportError::Wsdl("service port has no address".into()))?;
    let endpoint = address
        .get_attribute("location")
        .filter(|location| !location.trim().is_empty())
        .ok_or_else(|| TransportError::Wsdl("service address has no location".into()))?;
    let soap_version = match address.get_namespace().map(|ns| ns.get_href()) {
        Some(href) if href == WSDL_SOAP12_NS => SoapVersion::Soap12,
        _ => SoapVersion::Soap11,
    };

    let soap_action = binding
        .as_ref()
        .and_then(|binding| {
            element_children(binding)
                .into_iter()
                .find(|op| op.get_name() == "operation" && op.get_attribute("name").as_deref() == Some(OPERATION))
        })
        .and_then(|operation| {
            element_children(&operation)
                .into_iter()
                .find(|child| child.get_name() == "operation")
        })
        .and_then(|soap_operation| soap_operation.get_attribute("soapAction"))
        .filter(|action| !action.is_empty());

    let request_element = request_element(&ctx)?.unwrap_or_else(|| DEFAULT_REQUEST_ELEMENT.to_string());

    Ok(ServiceDescription {
        endpoint: endpoint.trim().to_string(),
        soap_action,
        request_element,
        target_namespace,
        soap_version,
    })
}

fn request_element(ctx: &xpath::Context) -> Result<Option<String>, TransportError> {
    let inputs = wsdl_nodes(
        ctx,
        &format!(
            "//*[local-name()='portType']/*[local-name()='operation'][@name='{OPERATION}']/*[local-name()='input']"
        ),
    )?;
    let Some(message_name) = inputs
        .first()
        .and_then(|input| input.get_attribute("message"))
        .map(|m| local_part(&m).to_string())
    else {
        return Ok(None);
    };
    let parts = wsdl_nodes(
        ctx,
        &format!("//*[local-name()='message'][@name='{message_name}']/*[local-name()='part']"),
    )?;
    Ok(parts
        .first()
        .and_then(|part| part.get_attribute("element"))
        .map(|element| local_part(&element).to_string())
        .filter(|element| !element.is_empty()))
}

fn wsdl_nodes(ctx: &xpath::Context, expr: &str) -> Result<Vec<Node>, TransportError> {
    Ok(ctx
        .evaluate(expr)
        .map_err(|_| TransportError::Wsdl(format!("XPath error for {expr}")))?
        .get_nodes_as_vec())
}

fn element_children(node: &Node) -> Vec<Node> {
    node.get_child_elements()
}

fn local_part(qname: &str) -> &str {
    qname.rsplit_once(':').map_or(qname, |(_, local)| local)
}

/// Build the SOAP envelope carrying `signed_xml` in `nfseDadosMsg`.
///
/// # Errors
/// Returns [`TransportError::Envelope`] if serialization fails.
pub fn build_envelope(service: &ServiceDescription, signed_xml: &str) -> Result<String, TransportError> {
    let payload = strip_xml_declaration(signed_xml);
    let envelope = EnvelopeXml {
        namespace: service.soap_version.envelope_namespace(),
        request_element: &service.request_element,
        target_namespace: &service.target_namespace,
        payload,
    };
    let mut buffer = String::with_capacity(payload.len() * 2 + 512);
    buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    envelope.serialize(quick_xml::se::Serializer::new(&mut buffer))?;
    Ok(buffer)
}

fn strip_xml_declaration(xml: &str) -> &str {
    let trimmed = xml.trim();
    match trimmed.strip_prefix("<?xml") {
        Some(rest) => rest.split_once("?>").map_or(trimmed, |(_, body)| body.trim_start()),
        None => trimmed,
    }
}

struct EnvelopeXml<'a> {
    namespace: &'a str,
    request_element: &'a str,
    target_namespace: &'a str,
    payload: &'a str,
}

impl Serialize for EnvelopeXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("soap:Envelope", 3)?;
        st.serialize_field("@xmlns:soap", self.namespace)?;
        st.serialize_field("soap:Header", &HeaderXml)?;
        st.serialize_field("soap:Body", &BodyXml(self))?;
        st.end()
    }
}

struct HeaderXml;

impl Serialize for HeaderXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("soap:Header", 1)?;
        st.serialize_field("nfseCabecMsg", &CabecMsgXml)?;
        st.end()
    }
}

struct CabecMsgXml;

impl Serialize for CabecMsgXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("nfseCabecMsg", 2)?;
        st.serialize_field("@xmlns", NFSE_NS)?;
        st.serialize_field("cabecalho", &CabecalhoXml)?;
        st.end()
    }
}

struct CabecalhoXml;

impl Serialize for CabecalhoXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cabecalho", 2)?;
        st.serialize_field("@versao", LAYOUT_VERSION)?;
        st.serialize_field("versaoDados", LAYOUT_VERSION)?;
        st.end()
    }
}

struct BodyXml<'a, 'b>(&'b EnvelopeXml<'a>);

impl Serialize for BodyXml<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Map keys become element names; the request element comes from the WSDL.
        let mut map = s.serialize_map(Some(1))?;
        map.serialize_entry(self.0.request_element, &RequestXml(self.0))?;
        map.end()
    }
}

struct RequestXml<'a, 'b>(&'b EnvelopeXml<'a>);

impl Serialize for RequestXml<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("request", 2)?;
        st.serialize_field("@xmlns", self.0.target_namespace)?;
        st.serialize_field("nfseDadosMsg", self.0.payload)?;
        st.end()
    }
}
