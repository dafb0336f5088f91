//! Enveloped XML-DSig verification for toolkit responses.
//!
//! Supports RSA-SHA1/RSA-SHA256 signatures over SHA-1/SHA-256 reference
//! digests, with C14N 1.0 or Exclusive C14N. References resolve by `Id`
//! attribute, falling back to the `Message` element of the toolkit's
//! namespace.

use std::ops::Range;

use base64::{Engine as _, engine::general_purpose};
use roxmltree::{Document, Node};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem, Encode};

use super::c14n::{self, Method};
use super::integrity::SignatureVerifier;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const VG_NS: &str = "http://www.emiratesid.ae/vg";

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// Why a signature was rejected. Only ever logged.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("document is not well-formed: {0}")]
    Malformed(String),

    #[error("no signature element present")]
    MissingSignature,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("referenced element not found: {0}")]
    ReferenceNotFound(String),

    #[error("digest mismatch for reference {0:?}")]
    DigestMismatch(String),

    #[error("signature value does not verify")]
    BadSignature,

    #[error("signing key unavailable: {0}")]
    Key(String),
}

/// Verifies enveloped signatures, optionally pinned to one trusted key.
///
/// Without a trusted key the key embedded in `KeyInfo` is used, which
/// proves the document was not altered but not who signed it.
#[derive(Clone, Default)]
pub struct XmlDsigVerifier {
    trusted_key: Option<RsaPublicKey>,
}

impl XmlDsigVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies against `key` only, ignoring any key in the document.
    pub fn with_trusted_key(key: RsaPublicKey) -> Self {
        Self {
            trusted_key: Some(key),
        }
    }

    /// Verifies the first `ds:Signature` in `xml`.
    ///
    /// # Returns
    ///
    /// The byte ranges in `xml` of the elements the references cover, in
    /// `SignedInfo` order. Content outside them is not authenticated.
    pub fn verify_document(&self, xml: &str) -> Result<Vec<Range<usize>>, SignatureError> {
        let doc = Document::parse(xml).map_err(|e| SignatureError::Malformed(e.to_string()))?;

        let signature = doc
            .descendants()
            .find(|n| n.has_tag_name((DSIG_NS, "Signature")))
            .ok_or(SignatureError::MissingSignature)?;

        let signed_info = ds_child(signature, "SignedInfo")?;
        let (c14n_method, c14n_prefixes) =
            canonicalization(ds_child(signed_info, "CanonicalizationMethod")?)?;
        let signature_method = algorithm(ds_child(signed_info, "SignatureMethod")?)?;

        let mut signed = Vec::new();
        for reference in signed_info
            .children()
            .filter(|n| n.has_tag_name((DSIG_NS, "Reference")))
        {
            signed.push(verify_reference(&doc, signature, reference)?);
        }
        if signed.is_empty() {
            return Err(SignatureError::Malformed("SignedInfo has no Reference".to_string()));
        }

        let canonical_signed_info =
            c14n::canonicalize_with_prefixes(signed_info, c14n_method, None, &c14n_prefixes);
        let signature_value = decode_base64(ds_child(signature, "SignatureValue")?)?;
        let key = match &self.trusted_key {
            Some(key) => key.clone(),
            None => embedded_key(signature)?,
        };

        let signature_value = Signature::try_from(signature_value.as_slice())
            .map_err(|_| SignatureError::BadSignature)?;
        let verified = match signature_method {
            RSA_SHA256 => VerifyingKey::<Sha256>::new(key)
                .verify(canonical_signed_info.as_bytes(), &signature_value),
            RSA_SHA1 => VerifyingKey::<Sha1>::new(key)
                .verify(canonical_signed_info.as_bytes(), &signature_value),
            other => return Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
        };

        verified.map_err(|_| SignatureError::BadSignature)?;
        Ok(signed)
    }
}

impl SignatureVerifier for XmlDsigVerifier {
    fn verify(&self, document: &str) -> Result<Vec<Range<usize>>, SignatureError> {
        self.verify_document(document)
    }
}

/// Reads a canonicalization algorithm and its `InclusiveNamespaces` prefix
/// list, which only Exclusive C14N honours.
fn canonicalization(node: Node<'_, '_>) -> Result<(Method, Vec<String>), SignatureError> {
    let uri = algorithm(node)?;
    let method =
        Method::from_uri(uri).ok_or_else(|| SignatureError::UnsupportedAlgorithm(uri.to_string()))?;

    let prefixes = match method {
        Method::Exclusive => node
            .children()
            .find(|n| n.has_tag_name((c14n::EXC_C14N, "InclusiveNamespaces")))
            .map(|n| c14n::parse_prefix_list(n.attribute("PrefixList").unwrap_or("")))
            .unwrap_or_default(),
        Method::Inclusive => Vec::new(),
    };
    Ok((method, prefixes))
}

fn verify_reference(
    doc: &Document<'_>,
    signature: Node<'_, '_>,
    reference: Node<'_, '_>,
) -> Result<Range<usize>, SignatureError> {
    let uri = reference.attribute("URI").unwrap_or("");
    let target = resolve_reference(doc, uri)?;

    let mut method = Method::Inclusive;
    let mut prefixes = Vec::new();
    let mut exclude = None;
    if let Some(transforms) = reference
        .children()
        .find(|n| n.has_tag_name((DSIG_NS, "Transforms")))
    {
        for transform in transforms
            .children()
            .filter(|n| n.has_tag_name((DSIG_NS, "Transform")))
        {
            let alg = algorithm(transform)?;
            if alg == ENVELOPED_SIGNATURE {
                exclude = Some(signature.id());
            } else if Method::from_uri(alg).is_some() {
                (method, prefixes) = canonicalization(transform)?;
            } else {
                return Err(SignatureError::UnsupportedAlgorithm(alg.to_string()));
            }
        }
    }

    let canonical = c14n::canonicalize_with_prefixes(target, method, exclude, &prefixes);
    let digest = match algorithm(ds_child(reference, "DigestMethod")?)? {
        DIGEST_SHA256 => Sha256::digest(canonical.as_bytes()).to_vec(),
        DIGEST_SHA1 => Sha1::digest(canonical.as_bytes()).to_vec(),
        other => return Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    };
    let expected = decode_base64(ds_child(reference, "DigestValue")?)?;

    if digest != expected {
        tracing::debug!(
            uri,
            computed = %hex::encode(&digest),
            declared = %hex::encode(&expected),
            "reference digest mismatch"
        );
        return Err(SignatureError::DigestMismatch(uri.to_string()));
    }
    Ok(target.range())
}

/// Resolves a same-document reference URI to the element it covers.
fn resolve_reference<'a, 'input>(
    doc: &'a Document<'input>,
    uri: &str,
) -> Result<Node<'a, 'input>, SignatureError> {
    if uri.is_empty() || uri == "#xpointer(/)" {
        return Ok(doc.root_element());
    }

    let id = uri
        .strip_prefix("#xpointer(id('")
        .and_then(|s| s.strip_suffix("'))"))
        .or_else(|| uri.strip_prefix('#'))
        .ok_or_else(|| SignatureError::UnsupportedAlgorithm(format!("reference URI {uri}")))?;

    find_by_id(doc, id)
        .or_else(|| {
            doc.descendants()
                .find(|n| n.has_tag_name((VG_NS, "Message")))
        })
        .ok_or_else(|| SignatureError::ReferenceNotFound(id.to_string()))
}

fn find_by_id<'a, 'input>(doc: &'a Document<'input>, id: &str) -> Option<Node<'a, 'input>> {
    doc.descendants().filter(|n| n.is_element()).find(|n| {
        ["Id", "ID", "id"]
            .iter()
            .any(|name| n.attribute(*name) == Some(id))
    })
}

fn embedded_key(signature: Node<'_, '_>) -> Result<RsaPublicKey, SignatureError> {
    let key_info = ds_child(signature, "KeyInfo")?;

    if let Some(cert) = key_info
        .descendants()
        .find(|n| n.has_tag_name((DSIG_NS, "X509Certificate")))
    {
        let der = decode_base64(cert)?;
        return key_from_certificate_der(&der);
    }

    if let Some(rsa_value) = key_info
        .descendants()
        .find(|n| n.has_tag_name((DSIG_NS, "RSAKeyValue")))
    {
        let modulus = BigUint::from_bytes_be(&decode_base64(ds_child(rsa_value, "Modulus")?)?);
        let exponent = BigUint::from_bytes_be(&decode_base64(ds_child(rsa_value, "Exponent")?)?);
        return RsaPublicKey::new(modulus, exponent).map_err(|e| SignatureError::Key(e.to_string()));
    }

    Err(SignatureError::Key("KeyInfo carries no usable key".to_string()))
}

fn key_from_certificate_der(der: &[u8]) -> Result<RsaPublicKey, SignatureError> {
    let cert = Certificate::from_der(der).map_err(|e| SignatureError::Key(e.to_string()))?;
    key_from_certificate(&cert)
}

fn key_from_certificate(cert: &Certificate) -> Result<RsaPublicKey, SignatureError> {
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SignatureError::Key(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| SignatureError::Key(e.to_string()))
}

/// Loads a trusted signer key from PEM.
///
/// Accepts an SPKI `PUBLIC KEY`, a PKCS#1 `RSA PUBLIC KEY`, or a `CERTIFICATE`.
pub fn load_trusted_key(pem: &str) -> Result<RsaPublicKey, SignatureError> {
    if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
        return Ok(key);
    }
    if let Ok(key) = RsaPublicKey::from_pkcs1_pem(pem) {
        return Ok(key);
    }
    let cert = Certificate::from_pem(pem.as_bytes())
        .map_err(|e| SignatureError::Key(format!("unrecognized PEM: {e}")))?;
    key_from_certificate(&cert)
}

fn ds_child<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Result<Node<'a, 'input>, SignatureError> {
    node.children()
        .find(|n| n.has_tag_name((DSIG_NS, name)))
        .ok_or_else(|| SignatureError::Malformed(format!("missing ds:{name}")))
}

fn algorithm<'a>(node: Node<'a, '_>) -> Result<&'a str, SignatureError> {
    node.attribute("Algorithm").ok_or_else(|| {
        SignatureError::Malformed(format!("{} has no Algorithm", node.tag_name().name()))
    })
}

fn decode_base64(node: Node<'_, '_>) -> Result<Vec<u8>, SignatureError> {
    let text: String = node
        .descendants()
        .filter_map(|n| if n.is_text() { n.text() } else { None })
        .flat_map(str::chars)
        .filter(|c| !c.is_whitespace())
        .collect();
    general_purpose::STANDARD
        .decode(text)
        .map_err(|e| SignatureError::Malformed(format!("bad base64 in {}: {e}", node.tag_name().name())))
}
