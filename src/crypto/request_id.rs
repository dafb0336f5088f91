use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

/// The size of a request id in bytes before encoding.
const REQUEST_ID_SIZE: usize = 40;

/// Generates a new random request id for one card read.
///
/// # Returns
///
/// A standard base64-encoded id the toolkit echoes back in its signed response.
pub fn generate_request_id() -> String {
    let mut id = [0u8; REQUEST_ID_SIZE];
    OsRng.fill_bytes(&mut id);

    general_purpose::STANDARD.encode(id)
}
