use std::fmt;

use crate::error::{FrameError, Result};

/// Text encoding negotiated in SETUP for metadata or data payloads.
///
/// The codec never interprets payload bytes; this type turns them into text at
/// the application edge. Names that are not recognized (MIME types such as
/// `application/json`) are kept verbatim and decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Ascii,
    /// One byte per code point (ISO-8859-1).
    Binary,
    Other(String),
}

impl Encoding {
    /// Resolve an encoding name as carried on the wire.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Self::Utf8,
            "ascii" | "us-ascii" => Self::Ascii,
            "binary" | "latin1" | "iso-8859-1" => Self::Binary,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Name to put on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Ascii => "ascii",
            Self::Binary => "binary",
            Self::Other(name) => name,
        }
    }

    /// Decode payload bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Binary => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Ascii if !bytes.is_ascii() => Err(self.invalid()),
            Self::Utf8 | Self::Ascii | Self::Other(_) => {
                String::from_utf8(bytes.to_vec()).map_err(|_| self.invalid())
            }
        }
    }

    /// Encode text into payload bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Self::Binary => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| self.invalid()))
                .collect(),
            Self::Ascii if !text.is_ascii() => Err(self.invalid()),
            Self::Utf8 | Self::Ascii | Self::Other(_) => Ok(text.as_bytes().to_vec()),
        }
    }

    fn invalid(&self) -> FrameError {
        FrameError::InvalidText {
            encoding: self.name().to_string(),
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::Utf8
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_names() {
        assert_eq!(Encoding::from_name("UTF-8"), Encoding::Utf8);
        assert_eq!(Encoding::from_name("utf8"), Encoding::Utf8);
        assert_eq!(Encoding::from_name("ascii"), Encoding::Ascii);
        assert_eq!(Encoding::from_name("binary"), Encoding::Binary);
        assert_eq!(
            Encoding::from_name("application/json"),
            Encoding::Other("application/json".to_string())
        );
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        let err = Encoding::Ascii.decode(&[0x41, 0xC3]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidText { encoding } if encoding == "ascii"));
        assert!(Encoding::Ascii.encode("caf\u{e9}").is_err());
    }

    #[test]
    fn binary_maps_bytes_to_code_points() {
        let text = Encoding::Binary.decode(&[0x63, 0xE9]).unwrap();
        assert_eq!(text, "c\u{e9}");
        assert_eq!(Encoding::Binary.encode(&text).unwrap(), vec![0x63, 0xE9]);
        assert!(Encoding::Binary.encode("\u{2603}").is_err());
    }

    #[test]
    fn utf8_roundtrip() {
        let bytes = Encoding::Utf8.encode("can't nobody feel your pain").unwrap();
        assert_eq!(
            Encoding::Utf8.decode(&bytes).unwrap(),
            "can't nobody feel your pain"
        );
        assert!(Encoding::Utf8.decode(&[0xFF, 0xFE]).is_err());
    }
}
