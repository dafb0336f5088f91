use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Status reported by the reader before a card read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderStatus {
    Ready,
    ToolkitNotInitialized,
    ReaderNotSelected,
    CardNotConnected,
    ReaderNotFound,
    CardNotPresent,
    Timeout,
    Busy,
    Unknown,
}

impl ReaderStatus {
    /// Decodes a numeric status or result code as reported by the toolkit.
    ///
    /// Codes outside the known range decode to `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ReaderStatus::Ready,
            1 => ReaderStatus::ToolkitNotInitialized,
            2 => ReaderStatus::ReaderNotSelected,
            3 => ReaderStatus::CardNotConnected,
            4 => ReaderStatus::ReaderNotFound,
            5 => ReaderStatus::CardNotPresent,
            6 => ReaderStatus::Timeout,
            7 => ReaderStatus::Busy,
            _ => ReaderStatus::Unknown,
        }
    }
}

/// Public data read from an identity card.
///
/// `raw_signed_payload` and `correlation_id` are only trustworthy once the
/// integrity validator has accepted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardData {
    pub id_number_raw: String,
    pub full_name_en: String,
    pub nationality: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub expiry_date: NaiveDate,
    pub raw_signed_payload: Option<String>,
    pub correlation_id: Option<String>,
}

/// The response returned to the caller after a successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub eid_number_masked: String,
    pub full_name_en: String,
    pub nationality: String,
    pub dob: NaiveDate,
    pub gender: String,
    pub expiry: NaiveDate,
    pub photo_base64: Option<String>,
}

impl ReadResult {
    /// Builds the caller-facing result from trusted card data.
    ///
    /// The raw identity number is consumed here and only its masked form
    /// survives.
    pub fn from_card(card: CardData, photo_base64: Option<String>) -> Self {
        Self {
            eid_number_masked: crate::services::masking::mask_id_number(&card.id_number_raw),
            full_name_en: card.full_name_en,
            nationality: card.nationality,
            dob: card.date_of_birth,
            gender: card.gender,
            expiry: card.expiry_date,
            photo_base64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_decode() {
        assert_eq!(ReaderStatus::from_code(0), ReaderStatus::Ready);
        assert_eq!(ReaderStatus::from_code(5), ReaderStatus::CardNotPresent);
        assert_eq!(ReaderStatus::from_code(7), ReaderStatus::Busy);
        assert_eq!(ReaderStatus::from_code(-1), ReaderStatus::Unknown);
        assert_eq!(ReaderStatus::from_code(99), ReaderStatus::Unknown);
    }

    #[test]
    fn read_result_serializes_with_camel_case_and_iso_dates() {
        let card = CardData {
            id_number_raw: "784-1988-1234567-1".to_string(),
            full_name_en: "AJAY RAMACHANDRAN".to_string(),
            nationality: "INDIA".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1977, 1, 1).unwrap(),
            gender: "M".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2032, 12, 31).unwrap(),
            raw_signed_payload: None,
            correlation_id: None,
        };

        let json = sonic_rs::to_string(&ReadResult::from_card(card, None)).unwrap();

        assert!(json.contains(r#""eidNumberMasked":"***********5671""#));
        assert!(json.contains(r#""dob":"1977-01-01""#));
        assert!(json.contains(r#""expiry":"2032-12-31""#));
        assert!(json.contains(r#""photoBase64":null"#));
        assert!(!json.contains("784"));
    }
}
