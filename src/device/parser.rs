//! Parsing of the toolkit's public-data document.

use chrono::{DateTime, NaiveDate};
use roxmltree::Node;

use super::GatewayError;
use crate::crypto::xmldsig::DSIG_NS;
use crate::models::card::CardData;

const ID_NUMBER: &[&str] = &["IdNumber", "EmiratesId", "EidNumber"];
const FULL_NAME_EN: &[&str] = &["FullNameEnglish", "FullNameEn", "NameEnglish"];
const NATIONALITY: &[&str] = &["Nationality", "NationalityEnglish"];
const DATE_OF_BIRTH: &[&str] = &["DateOfBirth", "Dob", "BirthDate"];
const GENDER: &[&str] = &["Gender"];
const EXPIRY: &[&str] = &["ExpiryDate", "CardExpiryDate"];
const REQUEST_ID: &[&str] = &["RequestID"];

/// Parses a public-data XML document into card data.
///
/// Fields are located by element local name, case-insensitively, trying each
/// alias in order and taking the first non-blank match. The document itself
/// is kept as the signed payload.
pub fn parse_public_data(xml: &str) -> Result<CardData, GatewayError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

    parse_card_element(doc.root_element(), xml)
}

/// Parses card data from the subtree rooted at `scope` only.
///
/// `raw` is the whole document `scope` belongs to.
pub fn parse_card_element(scope: Node<'_, '_>, raw: &str) -> Result<CardData, GatewayError> {
    let request_id = field(scope, REQUEST_ID);

    Ok(CardData {
        id_number_raw: field(scope, ID_NUMBER),
        full_name_en: field(scope, FULL_NAME_EN),
        nationality: field(scope, NATIONALITY),
        date_of_birth: parse_date(&field(scope, DATE_OF_BIRTH), "date of birth")?,
        gender: field(scope, GENDER),
        expiry_date: parse_date(&field(scope, EXPIRY), "expiry date")?,
        raw_signed_payload: Some(raw.to_string()),
        correlation_id: (!request_id.is_empty()).then_some(request_id),
    })
}

/// Elements under `scope` (itself included) that are document content.
///
/// Anything inside a `ds:Signature` is skipped: an enveloped signature is
/// excluded from its own digest, so nothing there is authenticated.
pub fn content_elements<'a, 'input: 'a>(
    scope: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    scope.descendants().filter(|n| {
        n.is_element() && !n.ancestors().any(|a| a.has_tag_name((DSIG_NS, "Signature")))
    })
}

/// Concatenated text content of `node`.
pub fn element_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn field(scope: Node<'_, '_>, names: &[&str]) -> String {
    for name in names {
        let value = content_elements(scope)
            .filter(|n| n.tag_name().name().eq_ignore_ascii_case(name))
            .map(element_text)
            .find(|v| !v.trim().is_empty());

        if let Some(value) = value {
            return value.trim().to_string();
        }
    }
    String::new()
}

fn parse_date(value: &str, what: &str) -> Result<NaiveDate, GatewayError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| GatewayError::MalformedPayload(format!("unparseable {}: {:?}", what, value)))
}
