//! Classification of `GerarNfse` responses.
use crate::nfse::IssuedNfse;
use libxml::{parser::Parser, tree::Document, xpath};
use std::fmt;
use thiserror::Error;

/// Errors emitted while reading a webservice response.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    XmlParse(String),
    #[error("XPath error: {0}")]
    XPath(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// One `MensagemRetorno` entry returned by the webservice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub code: String,
    pub message: String,
    pub correction: Option<String>,
}

impl fmt::Display for RemoteMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

/// Render messages as `"(E1) First; (E2) Second"`.
pub fn join_messages(messages: &[RemoteMessage]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What the webservice answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfseResponse {
    /// `ListaNfse` with the issued invoice.
    Issued(IssuedNfse),
    /// `ListaMensagemRetorno` with at least one message.
    Rejected(Vec<RemoteMessage>),
    /// SOAP `Fault`; rendered as a single remote message.
    Fault(RemoteMessage),
    /// Neither of the above.
    Unexpected,
}

/// Classify a SOAP response body.
///
/// The NFS-e payload may be inline or carried as an escaped string inside
/// the response element (`outputXML`); both forms are accepted.
///
/// # Errors
/// Returns [`ParseError`] when the body is empty or a success payload lacks
/// its invoice number. The parser recovers from other malformed input, so
/// plain text and HTML error pages classify as [`NfseResponse::Unexpected`].
///
/// # Examples
/// ```rust
/// use nfse_core::nfse::xml::parse::{NfseResponse, parse_response};
///
/// let soap = r#"<Envelope><Body><GerarNfseResposta>
///   <ListaMensagemRetorno><MensagemRetorno><Codigo>E1</Codigo><Mensagem>Invalid date</Mensagem></MensagemRetorno></ListaMensagemRetorno>
/// </GerarNfseResposta></Body></Envelope>"#;
/// let NfseResponse::Rejected(messages) = parse_response(soap)? else { panic!() };
/// assert_eq!(messages[0].to_string(), "(E1) Invalid date");
/// # Ok::<(), nfse_core::nfse::xml::parse::ParseError>(())
/// ```
pub fn parse_response(soap: &str) -> Result<NfseResponse, ParseError> {
    let doc = parse_document(soap)?;
    let ctx = build_context(&doc)?;

    if let Some(fault) = parse_fault(&ctx)? {
        return Ok(NfseResponse::Fault(fault));
    }
    let inline = classify(&ctx)?;
    if inline != NfseResponse::Unexpected {
        return Ok(inline);
    }

    for payload in nodes(&ctx, "//*[local-name()='Body']//*[not(*)]")? {
        let text = payload.get_content();
        let text = text.trim();
        if !text.starts_with('<') {
            continue;
        }
        let Ok(inner) = parse_document(text) else {
            continue;
        };
        let inner_ctx = build_context(&inner)?;
        let response = classify(&inner_ctx)?;
        if response != NfseResponse::Unexpected {
            return Ok(response);
        }
    }
    Ok(NfseResponse::Unexpected)
}

fn parse_document(xml: &str) -> Result<Document, ParseError> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| ParseError::XmlParse(format!("{e:?}")))
}

fn build_context(doc: &Document) -> Result<xpath::Context, ParseError> {
    xpath::Context::new(doc).map_err(|_| ParseError::XPath("failed to build XPath context".into()))
}

fn classify(ctx: &xpath::Context) -> Result<NfseResponse, ParseError> {
    if let Some(issued) = parse_issued(ctx)? {
        return Ok(NfseResponse::Issued(issued));
    }
    let messages = parse_messages(ctx)?;
    if !messages.is_empty() {
        return Ok(NfseResponse::Rejected(messages));
    }
    Ok(NfseResponse::Unexpected)
}

fn parse_issued(ctx: &xpath::Context) -> Result<Option<IssuedNfse>, ParseError> {
    let found = nodes(
        ctx,
        "//*[local-name()='ListaNfse']//*[local-name()='InfNfse']",
    )?;
    let Some(inf) = found.first() else {
        return Ok(None);
    };
    let child = |name: &str| -> Result<Option<String>, ParseError> {
        let expr = format!("./*[local-name()='{name}']");
        let values = ctx
            .node_evaluate(&expr, inf)
            .map_err(|_| ParseError::XPath(format!("failed to evaluate {expr}")))?
            .get_nodes_as_vec();
        Ok(values
            .first()
            .map(|node| node.get_content().trim().to_string())
            .filter(|value| !value.is_empty()))
    };

    Ok(Some(IssuedNfse {
        nfs_number: child("Numero")?.ok_or(ParseError::MissingField("InfNfse/Numero"))?,
        verification_code: child("CodigoVerificacao")?
            .ok_or(ParseError::MissingField("InfNfse/CodigoVerificacao"))?,
        issue_date: child("DataEmissao")?.ok_or(ParseError::MissingField("InfNfse/DataEmissao"))?,
        pdf_link: match child("OutrasInformacoes")? {
            Some(link) => Some(link),
            None => nodes(ctx, "//*[local-name()='ListaNfse']//*[local-name()='OutrasInformacoes']")?
                .first()
                .map(|node| node.get_content().trim().to_string())
                .filter(|value| !value.is_empty()),
        },
    }))
}

fn parse_messages(ctx: &xpath::Context) -> Result<Vec<RemoteMessage>, ParseError> {
    let found = nodes(
        ctx,
        "//*[local-name()='ListaMensagemRetorno']/*[local-name()='MensagemRetorno']",
    )?;
    let mut messages = Vec::with_capacity(found.len());
    for node in &found {
        let field = |name: &str| -> Result<String, ParseError> {
            let expr = format!("./*[local-name()='{name}']");
            Ok(ctx
                .node_evaluate(&expr, node)
                .map_err(|_| ParseError::XPath(format!("failed to evaluate {expr}")))?
                .get_nodes_as_vec()
                .first()
                .map(|n| n.get_content().trim().to_string())
                .unwrap_or_default())
        };
        let correction = field("Correcao")?;
        messages.push(RemoteMessage {
            code: field("Codigo")?,
            message: field("Mensagem")?,
            correction: (!correction.is_empty()).then_some(correction),
        });
    }
    Ok(messages)
}

fn parse_fault(ctx: &xpath::Context) -> Result<Option<RemoteMessage>, ParseError> {
    if nodes(ctx, "//*[local-name()='Fault']")?.is_empty() {
        return Ok(None);
    }
    let first_text = |exprs: &[&str]| -> Result<String, ParseError> {
        for expr in exprs {
            if let Some(node) = nodes(ctx, expr)?.first() {
                let value = node.get_content().trim().to_string();
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }
        Ok(String::new())
    };
    let code = first_text(&[
        "//*[local-name()='Fault']/*[local-name()='faultcode']",
        "//*[local-name()='Fault']/*[local-name()='Code']/*[local-name()='Value']",
    ])?;
    let message = first_text(&[
        "//*[local-name()='Fault']/*[local-name()='faultstring']",
        "//*[local-name()='Fault']/*[local-name()='Reason']/*[local-name()='Text']",
    ])?;
    Ok(Some(RemoteMessage {
        code,
        message,
        correction: None,
    }))
}

fn nodes(ctx: &xpath::Context, expr: &str) -> Result<Vec<libxml::tree::Node>, ParseError> {
    Ok(ctx
        .evaluate(expr)
        .map_err(|_| ParseError::XPath(format!("failed to evaluate {expr}")))?
        .get_nodes_as_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <GerarNfseResponse xmlns="http://nfse.abrasf.org.br">
      <GerarNfseResposta xmlns="http://www.abrasf.org.br/nfse.xsd">
        <ListaNfse>
          <CompNfse>
            <Nfse versao="2.02">
              <InfNfse Id="nfse1">
                <Numero>2024000123</Numero>
                <CodigoVerificacao>AB12-CD34</CodigoVerificacao>
                <DataEmissao>2024-03-01T09:15:00</DataEmissao>
                <OutrasInformacoes>https://nfse.example/pdf/2024000123</OutrasInformacoes>
                <DeclaracaoPrestacaoServico>
                  <InfDeclaracaoPrestacaoServico>
                    <Rps><IdentificacaoRps><Numero>1700000000000</Numero></IdentificacaoRps></Rps>
                  </InfDeclaracaoPrestacaoServico>
                </DeclaracaoPrestacaoServico>
              </InfNfse>
            </Nfse>
          </CompNfse>
        </ListaNfse>
      </GerarNfseResposta>
    </GerarNfseResponse>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn inline_success_yields_fiscal_fields() {
        let response = parse_response(SUCCESS).expect("parse");
        assert_eq!(
            response,
            NfseResponse::Issued(IssuedNfse {
                nfs_number: "2024000123".into(),
                verification_code: "AB12-CD34".into(),
                issue_date: "2024-03-01T09:15:00".into(),
                pdf_link: Some("https://nfse.example/pdf/2024000123".into()),
            })
        );
    }

    #[test]
    fn escaped_payload_is_unwrapped() {
        let payload = "<GerarNfseResposta><ListaMensagemRetorno>\
            <MensagemRetorno><Codigo>E1</Codigo><Mensagem>Invalid date</Mensagem></MensagemRetorno>\
            <MensagemRetorno><Codigo>E2</Codigo><Mensagem>Invalid value</Mensagem><Correcao>Use dot</Correcao></MensagemRetorno>\
            </ListaMensagemRetorno></GerarNfseResposta>"
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let soap = format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><GerarNfseResponse><outputXML>{payload}</outputXML></GerarNfseResponse></s:Body></s:Envelope>"#
        );
        let NfseResponse::Rejected(messages) = parse_response(&soap).expect("parse") else {
            panic!("expected rejection");
        };
        assert_eq!(join_messages(&messages), "(E1) Invalid date; (E2) Invalid value");
        assert_eq!(messages[1].correction.as_deref(), Some("Use dot"));
    }

    #[test]
    fn soap_fault_becomes_remote_message() {
        let soap = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Server</faultcode><faultstring>Certificado revogado</faultstring></soap:Fault></soap:Body></soap:Envelope>"#;
        let NfseResponse::Fault(fault) = parse_response(soap).expect("parse") else {
            panic!("expected fault");
        };
        assert_eq!(fault.to_string(), "(soap:Server) Certificado revogado");
    }

    #[test]
    fn soap12_fault_reads_code_and_reason() {
        let soap = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault><env:Code><env:Value>env:Receiver</env:Value></env:Code><env:Reason><env:Text xml:lang="pt">Falha interna</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#;
        let NfseResponse::Fault(fault) = parse_response(soap).expect("parse") else {
            panic!("expected fault");
        };
        assert_eq!(fault.to_string(), "(env:Receiver) Falha interna");
    }

    #[test]
    fn unrelated_body_is_unexpected() {
        let soap = r#"<Envelope><Body><GerarNfseResponse><outputXML>ok</outputXML></GerarNfseResponse></Body></Envelope>"#;
        assert_eq!(parse_response(soap).expect("parse"), NfseResponse::Unexpected);
    }

    #[test]
    fn non_xml_bodies_are_unexpected() {
        assert_eq!(parse_response("not xml").expect("recovered"), NfseResponse::Unexpected);
        assert_eq!(
            parse_response("<html><body><h1>502 Bad Gateway</h1></body></html>")
                .expect("recovered"),
            NfseResponse::Unexpected
        );
        assert!(matches!(parse_response(""), Err(ParseError::XmlParse(_))));
    }

    #[test]
    fn success_without_number_is_an_error() {
        let soap = "<Envelope><Body><ListaNfse><CompNfse><Nfse><InfNfse><CodigoVerificacao>X</CodigoVerificacao></InfNfse></Nfse></CompNfse></ListaNfse></Body></Envelope>";
        assert!(matches!(
            parse_response(soap),
            Err(ParseError::MissingField("InfNfse/Numero"))
        ));
    }
}
