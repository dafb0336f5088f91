//! Builders for signed toolkit responses used across unit tests.

use std::sync::OnceLock;

use base64::{Engine as _, engine::general_purpose};
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::c14n::{self, Method};
use super::xmldsig::{DIGEST_SHA1, DIGEST_SHA256, DSIG_NS, ENVELOPED_SIGNATURE, RSA_SHA1, RSA_SHA256, VG_NS};

fn signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

fn other_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub fn public_key() -> RsaPublicKey {
    signing_key().to_public_key()
}

pub fn other_public_key() -> RsaPublicKey {
    other_key().to_public_key()
}

pub struct SignOptions {
    /// Reference URI; `""` signs the whole document with an enveloped transform.
    pub reference_uri: &'static str,
    /// `Id` attribute placed on the message element.
    pub message_id: Option<&'static str>,
    pub c14n: &'static str,
    pub sha1: bool,
    /// `PrefixList` for an `InclusiveNamespaces` element on the reference's
    /// exclusive canonicalization transform.
    pub inclusive_prefixes: Option<&'static str>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            reference_uri: "#msg",
            message_id: Some("msg"),
            c14n: c14n::EXC_C14N,
            sha1: false,
            inclusive_prefixes: None,
        }
    }
}

fn message(request_id: &str, message_id: Option<&str>) -> String {
    let id_attr = message_id
        .map(|id| format!(r#" Id="{id}""#))
        .unwrap_or_default();
    format!(
        r#"<vg:Message{id_attr}>
    <RequestID>{request_id}</RequestID>
    <IdNumber>784-1988-1234567-1</IdNumber>
    <FullNameEnglish>AJAY RAMACHANDRAN</FullNameEnglish>
    <Nationality>INDIA</Nationality>
    <DateOfBirth>1977-01-01</DateOfBirth>
    <Gender>M</Gender>
    <ExpiryDate>2032-12-31</ExpiryDate>
  </vg:Message>"#
    )
}

fn envelope(message: &str, signature: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<vg:Response xmlns:vg=\"{VG_NS}\" xmlns:xs=\"http://www.w3.org/2001/XMLSchema\">\n  {message}\n  {signature}\n</vg:Response>"
    )
}

/// A well-formed toolkit response without any signature.
pub fn unsigned_response(request_id: &str) -> String {
    envelope(&message(request_id, Some("msg")), "")
}

/// A toolkit response signed with the shared test key.
pub fn signed_response(request_id: &str, options: SignOptions) -> String {
    let method = Method::from_uri(options.c14n).unwrap();
    let message = message(request_id, options.message_id);
    let unsigned = envelope(&message, "");

    let doc = roxmltree::Document::parse(&unsigned).unwrap();
    let target = if options.reference_uri.is_empty() {
        doc.root_element()
    } else {
        doc.descendants().find(|n| n.has_tag_name((VG_NS, "Message"))).unwrap()
    };
    let prefixes = options
        .inclusive_prefixes
        .map(c14n::parse_prefix_list)
        .unwrap_or_default();
    let canonical = c14n::canonicalize_with_prefixes(target, method, None, &prefixes);

    let (digest_alg, digest) = if options.sha1 {
        (DIGEST_SHA1, Sha1::digest(canonical.as_bytes()).to_vec())
    } else {
        (DIGEST_SHA256, Sha256::digest(canonical.as_bytes()).to_vec())
    };
    let signature_alg = if options.sha1 { RSA_SHA1 } else { RSA_SHA256 };

    let enveloped = if options.reference_uri.is_empty() {
        format!(r#"<ds:Transform Algorithm="{ENVELOPED_SIGNATURE}"/>"#)
    } else {
        String::new()
    };
    let signed_info_body = format!(
        r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/><ds:SignatureMethod Algorithm="{signature_alg}"/><ds:Reference URI="{uri}"><ds:Transforms>{enveloped}{c14n_transform}</ds:Transforms><ds:DigestMethod Algorithm="{digest_alg}"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference>"#,
        c14n = options.c14n,
        c14n_transform = match options.inclusive_prefixes {
            Some(list) => format!(
                r#"<ds:Transform Algorithm="{c14n}"><ec:InclusiveNamespaces xmlns:ec="{ec}" PrefixList="{list}"/></ds:Transform>"#,
                c14n = options.c14n,
                ec = c14n::EXC_C14N,
            ),
            None => format!(r#"<ds:Transform Algorithm="{}"/>"#, options.c14n),
        },
        uri = options.reference_uri,
        digest = general_purpose::STANDARD.encode(&digest),
    );

    // Canonicalize SignedInfo in the namespace context it will have inside
    // the final document.
    let context = envelope(
        &message,
        &format!(r#"<ds:Signature xmlns:ds="{DSIG_NS}"><ds:SignedInfo>{signed_info_body}</ds:SignedInfo></ds:Signature>"#),
    );
    let context_doc = roxmltree::Document::parse(&context).unwrap();
    let signed_info = context_doc
        .descendants()
        .find(|n| n.has_tag_name((DSIG_NS, "SignedInfo")))
        .unwrap();
    let canonical_signed_info = c14n::canonicalize(signed_info, method, None);

    let signature_value = if options.sha1 {
        SigningKey::<Sha1>::new(signing_key().clone())
            .sign(canonical_signed_info.as_bytes())
            .to_bytes()
    } else {
        SigningKey::<Sha256>::new(signing_key().clone())
            .sign(canonical_signed_info.as_bytes())
            .to_bytes()
    };

    let public = public_key();
    let signature = format!(
        r#"<ds:Signature xmlns:ds="{DSIG_NS}"><ds:SignedInfo>{signed_info_body}</ds:SignedInfo>
    <ds:SignatureValue>{value}</ds:SignatureValue>
    <ds:KeyInfo><ds:KeyValue><ds:RSAKeyValue><ds:Modulus>{n}</ds:Modulus><ds:Exponent>{e}</ds:Exponent></ds:RSAKeyValue></ds:KeyValue></ds:KeyInfo>
  </ds:Signature>"#,
        value = general_purpose::STANDARD.encode(&signature_value),
        n = general_purpose::STANDARD.encode(public.n().to_bytes_be()),
        e = general_purpose::STANDARD.encode(public.e().to_bytes_be()),
    );

    envelope(&message, &signature)
}

/// Inserts `fragment` as unsigned content just before the message element.
pub fn prepend_unsigned(xml: &str, fragment: &str) -> String {
    xml.replacen("<vg:Message", &format!("{fragment}\n  <vg:Message"), 1)
}
