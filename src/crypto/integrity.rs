use std::ops::Range;
use std::sync::Arc;

use roxmltree::Node;
use thiserror::Error;

use super::xmldsig::SignatureError;
use crate::device::parser::{content_elements, element_text, parse_card_element};
use crate::models::card::CardData;

/// Something that can check the embedded signature of a toolkit document.
pub trait SignatureVerifier: Send + Sync {
    /// Returns the byte ranges of the elements the signature covers.
    fn verify(&self, document: &str) -> Result<Vec<Range<usize>>, SignatureError>;
}

/// Why a payload was rejected.
///
/// Callers only ever see "integrity validation failed"; the variants exist
/// for the logs.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("payload is not well-formed: {0}")]
    Malformed(String),

    #[error("signed content carries no RequestID")]
    MissingRequestId,

    #[error("RequestID does not match the expected value")]
    RequestIdMismatch,

    #[error("signed content is not a card record: {0}")]
    IncompleteRecord(String),

    #[error("signature check failed: {0}")]
    Signature(#[from] SignatureError),
}

/// Establishes that a toolkit payload belongs to this request and has not
/// been altered.
#[derive(Clone)]
pub struct IntegrityValidator {
    verifier: Arc<dyn SignatureVerifier>,
}

impl IntegrityValidator {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Returns `true` only when both the signature and correlation checks pass.
    pub fn validate(&self, expected_request_id: &str, raw_signed_payload: &str) -> bool {
        match self.check(expected_request_id, raw_signed_payload) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("🛡️ Integrity validation failed: {}", e);
                false
            }
        }
    }

    /// Verifies the payload and returns the card data it authenticates.
    ///
    /// Only the signed element is read. The `RequestID` is the first one in
    /// signed content, compared byte for byte, and the card fields come from
    /// the same element; anything placed around it is ignored.
    pub fn check(&self, expected_request_id: &str, raw_signed_payload: &str) -> Result<CardData, IntegrityError> {
        let signed = self.verifier.verify(raw_signed_payload)?;
        let doc = roxmltree::Document::parse(raw_signed_payload)
            .map_err(|e| IntegrityError::Malformed(e.to_string()))?;

        let (scope, echoed) = signed
            .iter()
            .filter_map(|range| {
                doc.descendants()
                    .find(|n| n.is_element() && n.range() == *range)
            })
            .find_map(|scope| echoed_request_id(scope).map(|id| (scope, id)))
            .ok_or(IntegrityError::MissingRequestId)?;

        if echoed.as_bytes() != expected_request_id.as_bytes() {
            return Err(IntegrityError::RequestIdMismatch);
        }

        let mut card = parse_card_element(scope, raw_signed_payload)
            .map_err(|e| IntegrityError::IncompleteRecord(e.to_string()))?;
        card.correlation_id = Some(echoed);
        Ok(card)
    }
}

/// Text of the first `RequestID` element in the signed content of `scope`.
fn echoed_request_id(scope: Node<'_, '_>) -> Option<String> {
    content_elements(scope)
        .find(|n| n.tag_name().name() == "RequestID")
        .map(element_text)
}
