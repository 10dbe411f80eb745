//! Tables for rendering bytes 128-255 on a UTF-8 console.

use crate::domain::error::{RelayError, RelayResult};

const UNMAPPED: &[u8] = b"?";

const CP437_HIGH: &str = concat!(
    "ÇüéâäàåçêëèïîìÄÅ",
    "ÉæÆôöòûùÿÖÜ¢£¥₧ƒ",
    "áíóúñÑªº¿⌐¬½¼¡«»",
    "░▒▓│┤╡╢╖╕╣║╗╝╜╛┐",
    "└┴┬├─┼╞╟╚╔╩╦╠═╬╧",
    "╨╤╥╙╘╒╓╫╪┘┌█▄▌▐▀",
    "αßΓπΣσµτΦΘΩδ∞φε∩",
    "≡±≥≤⌠⌡÷≈°∙·√ⁿ²■\u{a0}",
);

/// Byte sequences written for each high character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighCharTable {
    name: String,
    entries: Vec<Option<Box<[u8]>>>,
}

impl HighCharTable {
    /// Build the table for a character set name.
    ///
    /// An empty name passes high bytes through verbatim.
    pub fn from_name(name: &str) -> RelayResult<Self> {
        let entries: Vec<Option<Box<[u8]>>> = match name.to_ascii_lowercase().as_str() {
            "" => (0x80..=0xFFu8).map(|b| Some(Box::from([b]))).collect(),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => (0x80..=0xFFu32)
                .map(|code| match code {
                    // C1 controls have nothing to show
                    0x80..=0x9F => None,
                    _ => char::from_u32(code).map(utf8),
                })
                .collect(),
            "cp437" | "ibm437" | "437" => CP437_HIGH.chars().map(|c| Some(utf8(c))).collect(),
            "ascii" | "us-ascii" => vec![None; 128],
            _ => {
                return Err(RelayError::Config {
                    message: format!("unknown encoding '{}'", name),
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes to write for `byte`, `?` when the character set has no glyph.
    /// Bytes below 128 are returned unchanged.
    pub fn glyph(&self, byte: u8) -> &[u8] {
        if byte < 0x80 {
            return std::slice::from_ref(&ASCII[byte as usize]);
        }
        self.entries
            .get(usize::from(byte - 0x80))
            .and_then(|entry| entry.as_deref())
            .unwrap_or(UNMAPPED)
    }
}

static ASCII: [u8; 128] = {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        table[i] = i as u8;
        i += 1;
    }
    table
};

fn utf8(c: char) -> Box<[u8]> {
    let mut buf = [0u8; 4];
    Box::from(c.encode_utf8(&mut buf).as_bytes())
}
