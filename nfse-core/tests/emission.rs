mod common;

use httpmock::{
    Method::{GET, POST},
    Mock, MockServer,
};
use nfse_core::config::{CertificateSecrets, Config};
use nfse_core::emission::{EmissionError, Emitter};
use nfse_core::nfse::{RecordId, RpsNumber, RpsNumberSource, SaleStatus};
use nfse_core::store::InMemorySaleStore;
use std::sync::Arc;

const SUCCESS: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <GerarNfseResponse xmlns="http://nfse.abrasf.org.br">
      <GerarNfseResposta xmlns="http://www.abrasf.org.br/nfse.xsd">
        <ListaNfse><CompNfse><Nfse versao="2.02"><InfNfse>
          <Numero>202400000042</Numero>
          <CodigoVerificacao>X1Y2-Z3</CodigoVerificacao>
          <DataEmissao>2024-03-01T10:31:00</DataEmissao>
          <OutrasInformacoes>https://nfse.example/pdf/42</OutrasInformacoes>
        </InfNfse></Nfse></CompNfse></ListaNfse>
      </GerarNfseResposta>
    </GerarNfseResponse>
  </soap:Body>
</soap:Envelope>"#;

const REJECTED: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <GerarNfseResponse xmlns="http://nfse.abrasf.org.br">
      <GerarNfseResposta xmlns="http://www.abrasf.org.br/nfse.xsd">
        <ListaMensagemRetorno>
          <MensagemRetorno><Codigo>E1</Codigo><Mensagem>Invalid date</Mensagem></MensagemRetorno>
          <MensagemRetorno><Codigo>E2</Codigo><Mensagem>Invalid value</Mensagem></MensagemRetorno>
        </ListaMensagemRetorno>
      </GerarNfseResposta>
    </GerarNfseResponse>
  </soap:Body>
</soap:Envelope>"#;

struct FixedNumbers(u64);

impl RpsNumberSource for FixedNumbers {
    fn next_number(&self) -> RpsNumber {
        RpsNumber::new(self.0).expect("rps number")
    }
}

fn try_start_server() -> Option<MockServer> {
    std::panic::catch_unwind(MockServer::start).ok()
}

fn wsdl(endpoint: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
    xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
    xmlns:tns="http://nfse.abrasf.org.br"
    targetNamespace="http://nfse.abrasf.org.br">
  <wsdl:message name="GerarNfseRequest"><wsdl:part name="parameters" element="tns:GerarNfseRequest"/></wsdl:message>
  <wsdl:portType name="nfse">
    <wsdl:operation name="GerarNfse"><wsdl:input message="tns:GerarNfseRequest"/></wsdl:operation>
  </wsdl:portType>
  <wsdl:binding name="nfseSoapBinding" type="tns:nfse">
    <soap:binding transport="http://schemas.xmlsoap.org/soap/http"/>
    <wsdl:operation name="GerarNfse"><soap:operation soapAction="http://nfse.abrasf.org.br/GerarNfse"/></wsdl:operation>
  </wsdl:binding>
  <wsdl:service name="NfseService">
    <wsdl:port name="nfsePort" binding="tns:nfseSoapBinding"><soap:address location="{endpoint}"/></wsdl:port>
  </wsdl:service>
</wsdl:definitions>"#
    )
}

fn mock_wsdl(server: &MockServer) -> Mock<'_> {
    let body = wsdl(&server.url("/ws"));
    server.mock(|when, then| {
        when.method(GET).path("/wsdl");
        then.status(200)
            .header("content-type", "text/xml")
            .body(body);
    })
}

fn seeded_store(status: SaleStatus) -> Arc<InMemorySaleStore> {
    let store = InMemorySaleStore::new();
    let mut sale = common::sample_sale("s-1");
    sale.status = status;
    store.insert_sale(sale);
    store.insert_client(common::sample_client());
    Arc::new(store)
}

fn emitter(config: Config, store: &Arc<InMemorySaleStore>) -> Emitter {
    Emitter::new(config, store.clone())
        .expect("emitter")
        .with_numbers(Arc::new(FixedNumbers(1709300000)))
}

fn emit(emitter: &Emitter) -> Result<nfse_core::nfse::EmissionResult, EmissionError> {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(emitter.emit_invoice(&RecordId::new("s-1"), &RecordId::new("c-1")))
}

#[test]
fn successful_emission_persists_fiscal_fields() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let wsdl_mock = mock_wsdl(&server);
    let soap_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/ws")
            .header("SOAPAction", "\"http://nfse.abrasf.org.br/GerarNfse\"")
            .body_contains("<nfseCabecMsg")
            .body_contains("<nfseDadosMsg>&lt;GerarNfseEnvio")
            .body_contains("&lt;Signature");
        then.status(200)
            .header("content-type", "text/xml; charset=utf-8")
            .body(SUCCESS);
    });

    let store = seeded_store(SaleStatus::Pending);
    let emitter = emitter(common::test_config(&server.url("/wsdl")), &store);
    let result = emit(&emitter).expect("issued");

    assert!(result.is_issued());
    assert_eq!(result.rps_number, Some(1709300000));
    assert_eq!(result.nfs_number.as_deref(), Some("202400000042"));
    assert!(result.error_message.is_none());

    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Issued);
    assert_eq!(row.rps_number, Some(1709300000));
    assert_eq!(row.verification_code.as_deref(), Some("X1Y2-Z3"));
    assert_eq!(row.issue_date.as_deref(), Some("2024-03-01T10:31:00"));
    assert_eq!(row.pdf_link.as_deref(), Some("https://nfse.example/pdf/42"));
    assert!(row.error_message.is_none());

    wsdl_mock.assert();
    soap_mock.assert();
}

#[test]
fn remote_rejection_is_joined_and_persisted() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    mock_wsdl(&server);
    server.mock(|when, then| {
        when.method(POST).path("/ws");
        then.status(200).body(REJECTED);
    });

    let store = seeded_store(SaleStatus::Pending);
    let emitter = emitter(common::test_config(&server.url("/wsdl")), &store);
    let err = emit(&emitter).expect_err("rejected");

    assert!(matches!(err, EmissionError::RemoteFault { .. }));
    assert!(!err.is_retryable());
    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Error);
    assert_eq!(
        row.error_message.as_deref(),
        Some("(E1) Invalid date; (E2) Invalid value")
    );
    assert!(row.nfs_number.is_none());
    assert!(row.rps_number.is_none());
}

#[test]
fn soap_fault_with_error_status_is_a_remote_fault() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    mock_wsdl(&server);
    server.mock(|when, then| {
        when.method(POST).path("/ws");
        then.status(500).body(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Client</faultcode><faultstring>Assinatura invalida</faultstring></soap:Fault></soap:Body></soap:Envelope>"#,
        );
    });

    let store = seeded_store(SaleStatus::Pending);
    let emitter = emitter(common::test_config(&server.url("/wsdl")), &store);
    let err = emit(&emitter).expect_err("fault");

    assert!(matches!(err, EmissionError::RemoteFault { .. }));
    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(
        row.error_message.as_deref(),
        Some("(soap:Client) Assinatura invalida")
    );
}

#[test]
fn unrecognized_response_is_a_protocol_error() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    mock_wsdl(&server);
    server.mock(|when, then| {
        when.method(POST).path("/ws");
        then.status(200).body(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><GerarNfseResponse/></soap:Body></soap:Envelope>"#,
        );
    });

    let store = seeded_store(SaleStatus::Pending);
    let emitter = emitter(common::test_config(&server.url("/wsdl")), &store);
    let err = emit(&emitter).expect_err("unexpected");

    assert!(matches!(err, EmissionError::Protocol(_)));
    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Error);
    assert_eq!(
        row.error_message.as_deref(),
        Some("unexpected webservice response")
    );
}

#[test]
fn unavailable_webservice_is_a_retryable_transport_error() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(GET).path("/wsdl");
        then.status(503).body("Service Unavailable");
    });

    let store = seeded_store(SaleStatus::Pending);
    let emitter = emitter(common::test_config(&server.url("/wsdl")), &store);
    let err = emit(&emitter).expect_err("transport");

    assert!(matches!(err, EmissionError::Transport(_)));
    assert!(err.is_retryable());
    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Error);
    assert!(row.error_message.is_some());
}

#[test]
fn missing_certificate_fails_before_submission() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let wsdl_mock = mock_wsdl(&server);

    let config = Config::new(common::test_issuer(), CertificateSecrets::new("", ""))
        .with_wsdl_url(server.url("/wsdl"));
    let store = seeded_store(SaleStatus::Pending);
    let emitter = emitter(config, &store);
    let err = emit(&emitter).expect_err("configuration");

    assert!(matches!(err, EmissionError::Configuration(_)));
    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Error);
    assert!(
        row.error_message
            .as_deref()
            .is_some_and(|message| message.contains("CERTIFICATE_BASE64"))
    );
    assert_eq!(wsdl_mock.hits(), 0);
}

#[test]
fn invalid_client_data_is_persisted_as_error() {
    let store = InMemorySaleStore::new();
    store.insert_sale(common::sample_sale("s-1"));
    let mut client = common::sample_client();
    client.address_street = None;
    client.address_zip_code = Some("123".into());
    store.insert_client(client);
    let store = Arc::new(store);

    let emitter = emitter(common::test_config("http://127.0.0.1:9/wsdl"), &store);
    let err = emit(&emitter).expect_err("document");

    assert!(matches!(err, EmissionError::Document(_)));
    let message = store
        .sale(&RecordId::new("s-1"))
        .and_then(|row| row.error_message)
        .expect("message");
    assert!(message.contains("address_street is missing"));
    assert!(message.contains("address_zip_code has an invalid format"));
}

#[test]
fn second_emission_is_rejected_without_touching_the_row() {
    let store = seeded_store(SaleStatus::Processing);
    let emitter = emitter(common::test_config("http://127.0.0.1:9/wsdl"), &store);
    let err = emit(&emitter).expect_err("conflict");

    assert!(matches!(
        err,
        EmissionError::Conflict {
            status: SaleStatus::Processing,
            ..
        }
    ));
    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Processing);
    assert!(row.error_message.is_none());
}

#[test]
fn failed_sale_can_be_emitted_again() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    mock_wsdl(&server);
    server.mock(|when, then| {
        when.method(POST).path("/ws");
        then.status(200).body(SUCCESS);
    });

    let store = seeded_store(SaleStatus::Error);
    let emitter = emitter(common::test_config(&server.url("/wsdl")), &store);
    emit(&emitter).expect("issued on retry");

    let row = store.sale(&RecordId::new("s-1")).expect("row");
    assert_eq!(row.status, SaleStatus::Issued);
    assert!(row.error_message.is_none());
}
