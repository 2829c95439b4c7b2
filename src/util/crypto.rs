use base64::Engine as _;
use rand_core::{CryptoRng, RngCore};

use crate::common::consts::SIGNATURE_LINE_WIDTH;

#[derive(Debug)]
pub enum NeverRng {}

impl RngCore for NeverRng {
    fn next_u32(&mut self) -> u32 {
        match *self {}
    }

    fn next_u64(&mut self) -> u64 {
        match *self {}
    }

    fn fill_bytes(&mut self, _: &mut [u8]) {
        match *self {}
    }

    fn try_fill_bytes(&mut self, _: &mut [u8]) -> Result<(), rand_core::Error> {
        match *self {}
    }
}

impl CryptoRng for NeverRng {}

/// Base64-encodes `signature` and splits it into lines of at most 60 characters.
pub fn fold_signature(signature: &[u8]) -> Vec<String> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(signature);
    // Base64 output is ASCII, so splitting at byte offsets stays on char boundaries.
    encoded
        .as_bytes()
        .chunks(SIGNATURE_LINE_WIDTH)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

/// Decodes a (possibly multi-line) base64 signature, ignoring embedded whitespace.
pub fn decode_signature(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.split_ascii_whitespace().collect();
    base64::engine::general_purpose::STANDARD.decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_at_sixty() {
        let lines = fold_signature(&[0xa5; 256]);
        assert_eq!(lines.len(), 6);
        assert!(lines[..5].iter().all(|line| line.len() == 60));
        assert_eq!(lines[5].len(), 44);
        assert_eq!(decode_signature(&lines.join("\n")).unwrap(), [0xa5; 256]);
    }

    #[test]
    fn decode_tolerates_folding() {
        assert_eq!(decode_signature("aGVs\n\tbG8=\r\n").unwrap(), b"hello");
        assert!(decode_signature("epic*fail").is_err());
    }
}
