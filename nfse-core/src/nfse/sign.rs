//! Enveloped XML-DSig signatures (RSA-SHA256, exclusive c14n).
use super::xml::constants::{
    ALG_ENVELOPED_SIGNATURE, ALG_EXC_C14N, ALG_RSA_SHA256, ALG_SHA256, DS_NS,
};
use crate::certificate::{CertificateBundle, CertificateError};
use base64ct::{Base64, Encoding};
use libxml::{
    parser::Parser,
    tree::{
        Document, Node,
        c14n::{CanonicalizationMode, CanonicalizationOptions},
    },
    xpath,
};
use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    sign::{Signer, Verifier},
    x509::X509,
};
use quick_xml::se::SeError;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Signing failed. The message is fixed; the cause is kept as the source
/// and logged, never shown to callers.
#[derive(Debug, Error)]
#[error("digital signature failed")]
pub struct SigningError {
    #[source]
    failure: SigningFailure,
}

impl SigningError {
    pub fn failure(&self) -> &SigningFailure {
        &self.failure
    }
}

/// Underlying cause of a [`SigningError`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SigningFailure {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("signature XML could not be serialized: {0}")]
    Serialize(#[from] SeError),
    #[error("RSA signing failed: {0}")]
    Crypto(#[from] ErrorStack),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

/// Problems locating, canonicalizing or editing nodes of the document.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("XPath error: {0}")]
    XPath(String),
    #[error("element {0} not found")]
    NotFound(String),
    #[error("element {name} appears {count} times")]
    Duplicated { name: String, count: usize },
    #[error("element {0} has no Id attribute")]
    MissingId(String),
    #[error("could not canonicalize {0}")]
    Canonicalization(String),
    #[error("could not edit the document: {0}")]
    Edit(String),
}

/// Why a signed document failed verification.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("referenced content is unusable: {0}")]
    Document(#[from] XmlError),
    #[error("embedded certificate is invalid")]
    Certificate,
    #[error("digest of the referenced element does not match")]
    DigestMismatch,
    #[error("signature value does not match SignedInfo")]
    SignatureMismatch,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub reference_id: String,
    pub digest_base64: String,
}

/// Signs documents with one certificate bundle.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::certificate::CertificateBundle;
/// use nfse_core::nfse::sign::{XmlSigner, verify};
///
/// let bundle = CertificateBundle::from_base64("MIIK...", "secret")?;
/// let xml = r#"<Doc><Inf Id="rps1"><Valor>1.00</Valor></Inf></Doc>"#;
/// let signed = XmlSigner::new(&bundle).sign(xml, "Inf")?;
/// verify(&signed)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct XmlSigner<'a> {
    bundle: &'a CertificateBundle,
}

impl<'a> XmlSigner<'a> {
    pub fn new(bundle: &'a CertificateBundle) -> Self {
        Self { bundle }
    }

    /// Sign the single element whose local name is `element_name`,
    /// referencing it through its `Id`, and insert the `Signature` right
    /// after it.
    ///
    /// # Errors
    /// Returns [`SigningError`] if the element is missing, duplicated or
    /// has no `Id`, or if any cryptographic step fails.
    pub fn sign(&self, xml: &str, element_name: &str) -> Result<String, SigningError> {
        self.sign_enveloped(xml, element_name).map_err(|failure| {
            tracing::error!(element = element_name, error = %failure, "XML signing failed");
            SigningError { failure }
        })
    }

    fn sign_enveloped(&self, xml: &str, element_name: &str) -> Result<String, SigningFailure> {
        let mut doc = parse(xml)?;
        let mut target = unique_element(&doc, element_name, |node| {
            node.get_name() == element_name
        })?;
        let element_id = target
            .get_attribute("Id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| XmlError::MissingId(element_name.to_string()))?;
        let digest = enveloped_digest(&doc, &element_id)?;

        let reference_uri = format!("#{element_id}");
        let signature = quick_xml::se::to_string(&SignatureXml {
            signed_info: SignedInfoXml {
                reference_uri: &reference_uri,
                digest_value: &digest,
            },
            signature_value: "",
            certificate: &self.bundle.certificate_base64()?,
        })?;
        let mut signature_node = import_fragment(&mut doc, &signature)?;
        target
            .add_next_sibling(&mut signature_node)
            .map_err(|e| XmlError::Edit(e.to_string()))?;

        let mut signed_info = child_element(&signature_node, "SignedInfo")?;
        let canonical = canonicalize(&mut signed_info, "SignedInfo")?;
        let mut signer = Signer::new(MessageDigest::sha256(), self.bundle.private_key())?;
        signer.update(canonical.as_bytes())?;
        let signature_value = Base64::encode_string(&signer.sign_to_vec()?);

        child_element(&signature_node, "SignatureValue")?
            .set_content(&signature_value)
            .map_err(|e| XmlError::Edit(e.to_string()))?;
        Ok(doc.to_string())
    }
}

/// Check the enveloped signature of `xml`.
///
/// # Errors
/// Returns [`VerificationError`] describing the first check that failed.
pub fn verify(xml: &str) -> Result<VerifiedSignature, VerificationError> {
    let doc = Parser::default()
        .parse_string(xml)
        .map_err(|e| VerificationError::Malformed(format!("XML parse error: {e:?}")))?;
    let ctx = xpath::Context::new(&doc)
        .map_err(|_| VerificationError::Malformed("XPath context".to_string()))?;
    ctx.register_namespace("ds", DS_NS)
        .map_err(|_| VerificationError::Malformed("XPath namespace".to_string()))?;

    let signatures = nodes(&ctx, "//ds:Signature")?;
    let [signature] = signatures.as_slice() else {
        return Err(VerificationError::Malformed(format!(
            "expected one Signature, found {}",
            signatures.len()
        )));
    };

    let algorithm = |path: &str| -> Result<String, VerificationError> {
        nodes(&ctx, path)?
            .first()
            .and_then(|node| node.get_attribute("Algorithm"))
            .ok_or_else(|| VerificationError::Malformed(format!("missing {path}")))
    };
    let expect = |path: &str, wanted: &str| -> Result<(), VerificationError> {
        let found = algorithm(path)?;
        if found == wanted {
            Ok(())
        } else {
            Err(VerificationError::UnsupportedAlgorithm(found))
        }
    };
    expect("//ds:Signature/ds:SignedInfo/ds:CanonicalizationMethod", ALG_EXC_C14N)?;
    expect("//ds:Signature/ds:SignedInfo/ds:SignatureMethod", ALG_RSA_SHA256)?;
    expect("//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestMethod", ALG_SHA256)?;

    let reference = nodes(&ctx, "//ds:Signature/ds:SignedInfo/ds:Reference")?;
    let [reference] = reference.as_slice() else {
        return Err(VerificationError::Malformed(
            "expected exactly one Reference".to_string(),
        ));
    };
    let reference_id = reference
        .get_attribute("URI")
        .and_then(|uri| uri.strip_prefix('#').map(str::to_string))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| VerificationError::Malformed("Reference URI must be #Id".to_string()))?;

    let expected_digest = xpath_text_value(
        &ctx,
        "//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestValue",
        "DigestValue",
    )?;
    let signature_value = xpath_text_value(&ctx, "//ds:Signature/ds:SignatureValue", "SignatureValue")?;
    let certificate = xpath_text_value(
        &ctx,
        "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
        "X509Certificate",
    )?;

    let digest = enveloped_digest(&doc, &reference_id)?;
    if digest != compact(&expected_digest) {
        return Err(VerificationError::DigestMismatch);
    }

    let mut signed_info = child_element(signature, "SignedInfo")?;
    let canonical = canonicalize(&mut signed_info, "SignedInfo")?;
    let signature = Base64::decode_vec(&compact(&signature_value))
        .map_err(|_| VerificationError::Malformed("SignatureValue is not base64".to_string()))?;
    let der = Base64::decode_vec(&compact(&certificate))
        .map_err(|_| VerificationError::Certificate)?;
    let public_key = X509::from_der(&der)
        .and_then(|cert| cert.public_key())
        .map_err(|_| VerificationError::Certificate)?;

    let matches = Verifier::new(MessageDigest::sha256(), &public_key)
        .and_then(|mut verifier| {
            verifier.update(canonical.as_bytes())?;
            verifier.verify(&signature)
        })
        .unwrap_or(false);
    if !matches {
        return Err(VerificationError::SignatureMismatch);
    }

    Ok(VerifiedSignature {
        reference_id,
        digest_base64: digest,
    })
}

fn parse(xml: &str) -> Result<Document, XmlError> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| XmlError::Parse(format!("{e:?}")))
}

/// SHA-256 over the exclusive canonical form of the element with `Id`
/// `element_id`, with nested signatures removed.
fn enveloped_digest(doc: &Document, element_id: &str) -> Result<String, XmlError> {
    let copy = doc
        .dup()
        .map_err(|_| XmlError::Edit("failed to duplicate document".to_string()))?;
    let mut target = unique_element(&copy, &format!("with Id {element_id}"), |node| {
        node.get_attribute("Id").as_deref() == Some(element_id)
    })?;
    for mut signature in nested_signatures(&target) {
        signature.unlink();
    }
    let canonical = canonicalize(&mut target, element_id)?;
    Ok(Base64::encode_string(&Sha256::digest(canonical.as_bytes())))
}

fn unique_element(
    doc: &Document,
    label: &str,
    predicate: impl Fn(&Node) -> bool,
) -> Result<Node, XmlError> {
    let ctx = xpath::Context::new(doc).map_err(|_| XmlError::XPath("context".to_string()))?;
    let mut found: Vec<Node> = ctx
        .evaluate("//*")
        .map_err(|_| XmlError::XPath("//*".to_string()))?
        .get_nodes_as_vec()
        .into_iter()
        .filter(|node| predicate(node))
        .collect();
    match found.len() {
        0 => Err(XmlError::NotFound(label.to_string())),
        1 => Ok(found.remove(0)),
        count => Err(XmlError::Duplicated {
            name: label.to_string(),
            count,
        }),
    }
}

fn nested_signatures(node: &Node) -> Vec<Node> {
    node.get_child_elements()
        .into_iter()
        .flat_map(|child| {
            let is_signature = child.get_name() == "Signature"
                && child
                    .get_namespace()
                    .is_some_and(|ns| ns.get_href() == DS_NS);
            if is_signature {
                vec![child]
            } else {
                nested_signatures(&child)
            }
        })
        .collect()
}

fn child_element(parent: &Node, name: &str) -> Result<Node, XmlError> {
    parent
        .get_child_elements()
        .into_iter()
        .find(|child| child.get_name() == name)
        .ok_or_else(|| XmlError::NotFound(name.to_string()))
}

fn canonicalize(node: &mut Node, label: &str) -> Result<String, XmlError> {
    let options = CanonicalizationOptions {
        mode: CanonicalizationMode::ExclusiveCanonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    node.canonicalize(options)
        .map_err(|_| XmlError::Canonicalization(label.to_string()))
}

fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, XmlError> {
    let fragment = parse(xml)?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| XmlError::Edit("missing fragment root".to_string()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| XmlError::Edit("failed to import fragment".to_string()))
}

fn compact(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn nodes(ctx: &xpath::Context, expr: &str) -> Result<Vec<Node>, VerificationError> {
    Ok(ctx
        .evaluate(expr)
        .map_err(|e| VerificationError::Malformed(format!("XPath error for {expr}: {e:?}")))?
        .get_nodes_as_vec())
}

fn xpath_text_value(ctx: &xpath::Context, expr: &str, label: &str) -> Result<String, VerificationError> {
    let found = nodes(ctx, expr)?;
    let node = found
        .first()
        .ok_or_else(|| VerificationError::Malformed(format!("missing {label}")))?;
    let value = node.get_content().trim().to_string();
    if value.is_empty() {
        return Err(VerificationError::Malformed(format!("empty {label}")));
    }
    Ok(value)
}

struct AlgorithmXml(&'static str, &'static str);

impl Serialize for AlgorithmXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.0, 1)?;
        st.serialize_field("@Algorithm", self.1)?;
        st.end()
    }
}

struct SignedInfoXml<'a> {
    reference_uri: &'a str,
    digest_value: &'a str,
}

impl<'a> Serialize for SignedInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("SignedInfo", 3)?;
        st.serialize_field(
            "CanonicalizationMethod",
            &AlgorithmXml("CanonicalizationMethod", ALG_EXC_C14N),
        )?;
        st.serialize_field(
            "SignatureMethod",
            &AlgorithmXml("SignatureMethod", ALG_RSA_SHA256),
        )?;
        st.serialize_field("Reference", &ReferenceXml(self))?;
        st.end()
    }
}

struct ReferenceXml<'a, 'b>(&'b SignedInfoXml<'a>);

impl Serialize for ReferenceXml<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Reference", 4)?;
        st.serialize_field("@URI", self.0.reference_uri)?;
        st.serialize_field("Transforms", &TransformsXml)?;
        st.serialize_field("DigestMethod", &AlgorithmXml("DigestMethod", ALG_SHA256))?;
        st.serialize_field("DigestValue", self.0.digest_value)?;
        st.end()
    }
}

struct TransformsXml;

impl Serialize for TransformsXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Transforms", 1)?;
        st.serialize_field(
            "Transform",
            &[
                AlgorithmXml("Transform", ALG_ENVELOPED_SIGNATURE),
                AlgorithmXml("Transform", ALG_EXC_C14N),
            ],
        )?;
        st.end()
    }
}

struct SignatureXml<'a> {
    signed_info: SignedInfoXml<'a>,
    signature_value: &'a str,
    certificate: &'a str,
}

impl Serialize for SignatureXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Signature", 4)?;
        st.serialize_field("@xmlns", DS_NS)?;
        st.serialize_field("SignedInfo", &self.signed_info)?;
        st.serialize_field("SignatureValue", self.signature_value)?;
        st.serialize_field("KeyInfo", &KeyInfoXml(self.certificate))?;
        st.end()
    }
}

struct KeyInfoXml<'a>(&'a str);

impl Serialize for KeyInfoXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("KeyInfo", 1)?;
        st.serialize_field("X509Data", &X509DataXml(self.0))?;
        st.end()
    }
}

struct X509DataXml<'a>(&'a str);

impl Serialize for X509DataXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("X509Data", 1)?;
        st.serialize_field("X509Certificate", self.0)?;
        st.end()
    }
}
