use base64ct::{Base64, Encoding};
use nfse_core::config::{CertificateSecrets, Config, Issuer};
use nfse_core::nfse::{Client, RecordId, Sale};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};
use rust_decimal::Decimal;
use std::time::Duration;

pub const PASSWORD: &str = "test-password";

#[allow(dead_code)]
pub const ISSUER_CNPJ: &str = "12345678000195";

pub fn build_test_key() -> PKey<Private> {
    let rsa = Rsa::generate(2048).expect("rsa key");
    PKey::from_rsa(rsa).expect("pkey")
}

pub fn build_test_cert(key: &PKey<Private>) -> X509 {
    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("C", "BR").expect("country");
    name.append_entry_by_text("O", "Lava Jato Teste").expect("org");
    name.append_entry_by_text("CN", "LAVA JATO TESTE:12345678000195")
        .expect("cn");
    let name = name.build();

    let mut builder = X509::builder().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(1)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("not after"))
        .expect("not after");
    builder.sign(key, MessageDigest::sha256()).expect("self-sign");
    builder.build()
}

/// Base64 PKCS#12 bundle holding a fresh key and self-signed certificate.
pub fn pfx_base64() -> String {
    let key = build_test_key();
    let cert = build_test_cert(&key);
    let pkcs12 = Pkcs12::builder()
        .name("nfse-test")
        .pkey(&key)
        .cert(&cert)
        .build2(PASSWORD)
        .expect("pkcs12");
    Base64::encode_string(&pkcs12.to_der().expect("pkcs12 der"))
}

/// Base64 PKCS#12 bundle with a certificate but no private key.
#[allow(dead_code)]
pub fn certificate_only_pfx_base64() -> String {
    let key = build_test_key();
    let cert = build_test_cert(&key);
    let pkcs12 = Pkcs12::builder()
        .name("cert-only")
        .cert(&cert)
        .build2(PASSWORD)
        .expect("pkcs12");
    Base64::encode_string(&pkcs12.to_der().expect("pkcs12 der"))
}

#[allow(dead_code)]
pub fn test_issuer() -> Issuer {
    Issuer::new(ISSUER_CNPJ, "998877")
}

#[allow(dead_code)]
pub fn test_config(wsdl_url: &str) -> Config {
    Config::new(
        test_issuer(),
        CertificateSecrets::new(pfx_base64(), PASSWORD),
    )
    .with_wsdl_url(wsdl_url)
    .with_timeout(Duration::from_secs(5))
}

#[allow(dead_code)]
pub fn sample_sale(id: &str) -> Sale {
    let mut sale = Sale::new(id, Decimal::new(25050, 2), "Lavagem completa & cera");
    sale.client_id = Some(RecordId::new("c-1"));
    sale.payment_method = Some("Pix".into());
    sale
}

#[allow(dead_code)]
pub fn sample_client() -> Client {
    Client {
        id: Some(RecordId::new("c-1")),
        name: Some("Maria Silva".into()),
        cpf_cnpj: Some("529.982.247-25".into()),
        email: Some("maria@example.com".into()),
        phone: Some("(32) 99999-0000".into()),
        address_street: Some("Rua Direita".into()),
        address_number: Some("10".into()),
        address_complement: None,
        address_neighborhood: Some("Centro".into()),
        address_state: Some("mg".into()),
        address_zip_code: Some("36300-000".into()),
    }
}
