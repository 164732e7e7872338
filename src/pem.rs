// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! PEM armor for user public keys.
//!
//! Only the textual envelope is handled here: base64 body in 64-column lines
//! between `BEGIN PUBLIC KEY` / `END PUBLIC KEY` markers. The DER content is
//! opaque; no cryptographic validation is performed.

use crate::error::{BrokerError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const BEGIN: &str = "-----BEGIN PUBLIC KEY-----";
const END: &str = "-----END PUBLIC KEY-----";
const LINE_WIDTH: usize = 64;

/// Wrap DER bytes in public-key PEM armor.
pub fn encode_public_key(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + BEGIN.len() + END.len() + 4);
    out.push_str(BEGIN);
    out.push('\n');
    // base64 output is ASCII, so every byte offset is a char boundary
    for start in (0..body.len()).step_by(LINE_WIDTH) {
        out.push_str(&body[start..body.len().min(start + LINE_WIDTH)]);
        out.push('\n');
    }
    out.push_str(END);
    out.push('\n');
    out
}

/// Strip public-key PEM armor and return the DER bytes.
pub fn decode_public_key(armor: &str) -> Result<Vec<u8>> {
    let trimmed = armor.trim();
    let inner = trimmed
        .strip_prefix(BEGIN)
        .ok_or_else(|| BrokerError::Pem("missing BEGIN PUBLIC KEY marker".into()))?;
    let body = inner
        .strip_suffix(END)
        .ok_or_else(|| BrokerError::Pem("missing END PUBLIC KEY marker".into()))?;

    let joined: String = body.split_whitespace().collect();
    if joined.is_empty() {
        return Err(BrokerError::Pem("empty key body".into()));
    }

    STANDARD
        .decode(joined.as_bytes())
        .map_err(|e| BrokerError::Pem(format!("invalid base64 body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wraps_at_64_columns() {
        let der: Vec<u8> = (0..=255u8).collect();
        let armor = encode_public_key(&der);
        let lines: Vec<&str> = armor.lines().collect();

        assert_eq!(lines.first(), Some(&BEGIN));
        assert_eq!(lines.last(), Some(&END));
        for line in &lines[1..lines.len() - 1] {
            assert!(line.len() <= LINE_WIDTH);
        }
        assert_eq!(decode_public_key(&armor).unwrap(), der);
    }

    #[test]
    fn test_encode_line_layout() {
        // 96 bytes encode to exactly 128 base64 chars
        let armor = encode_public_key(&[0xAB; 96]);
        let body: Vec<&str> = armor.lines().skip(1).take_while(|l| *l != END).collect();
        assert_eq!(body.iter().map(|l| l.len()).collect::<Vec<_>>(), vec![64, 64]);

        let armor = encode_public_key(&[0xAB; 100]);
        let body: Vec<&str> = armor.lines().skip(1).take_while(|l| *l != END).collect();
        assert_eq!(body.iter().map(|l| l.len()).collect::<Vec<_>>(), vec![64, 64, 8]);
        assert_eq!(body.concat(), STANDARD.encode([0xAB; 100]));
        assert!(armor.ends_with(&format!("{END}\n")));
    }

    #[test]
    fn test_decode_tolerates_crlf_and_padding_whitespace() {
        let armor = format!("\r\n  {BEGIN}\r\nAQID\r\nBAU=\r\n{END}\r\n");
        assert_eq!(decode_public_key(&armor).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_decode_rejects_missing_markers() {
        assert!(matches!(decode_public_key("AQID"), Err(BrokerError::Pem(_))));
        let no_end = format!("{BEGIN}\nAQID\n");
        assert!(decode_public_key(&no_end).unwrap_err().to_string().contains("END"));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let armor = format!("{BEGIN}\n!!!not-base64!!!\n{END}");
        assert!(decode_public_key(&armor).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_body() {
        let armor = format!("{BEGIN}\n\n{END}");
        assert!(decode_public_key(&armor).is_err());
    }
}
