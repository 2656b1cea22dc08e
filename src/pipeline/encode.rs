//! Response encoding: artifact bytes → base64 transport payload.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

/// Encoded payload plus the heuristic truncation finding, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub data: String,
    pub warning: Option<String>,
}

/// Length of padded base64 output for `len` input bytes.
pub fn expected_encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Encode `bytes` and check the result against the 4/3 expansion ratio.
///
/// An encoding shorter than 90% of the expected length is logged as a
/// possible truncation. It is not an error: the check is heuristic.
pub fn encode_payload(bytes: &[u8]) -> EncodedPayload {
    let data = STANDARD.encode(bytes);
    let expected = expected_encoded_len(bytes.len());
    debug!(
        "Encoded {} bytes → {} chars base64 ({:.2} MB)",
        bytes.len(),
        data.len(),
        data.len() as f64 / 1024.0 / 1024.0
    );
    let warning = check_expansion(data.len(), expected);
    EncodedPayload { data, warning }
}

fn check_expansion(actual: usize, expected: usize) -> Option<String> {
    if (actual as f64) < expected as f64 * 0.9 {
        let msg = format!(
            "base64 length {actual} is well below the expected {expected}; payload may be truncated"
        );
        warn!("{msg}");
        Some(msg)
    } else {
        None
    }
}
