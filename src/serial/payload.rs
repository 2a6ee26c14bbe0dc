//! Conversion of user supplied payloads (hex strings, text) into raw bytes.

use super::{Result, SerialError};

/// Parse a hex string such as "7E 01 02 7E" or "7E01027E". Whitespace is
/// ignored anywhere in the input.
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.chars().count() % 2 != 0 {
        return Err(SerialError::OddHexLength);
    }
    hex::decode(&compact).map_err(|_| SerialError::InvalidHex)
}

/// Upper-case, space separated dump, e.g. "7E 01 02 7E"
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Encode text for the wire. Characters the encoding cannot represent are
/// replaced with '?'.
pub fn encode_text(text: &str, encoding: &str) -> Result<Vec<u8>> {
    let normalized: String = encoding
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect::<String>()
        .to_lowercase();

    match normalized.as_str() {
        "utf8" => Ok(text.as_bytes().to_vec()),
        "ascii" | "usascii" => Ok(text
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect()),
        "latin1" | "iso88591" | "l1" => Ok(text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect()),
        _ => Err(SerialError::UnsupportedEncoding(encoding.to_string())),
    }
}

/// Append '\n' unless the text already ends with one
pub fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}
