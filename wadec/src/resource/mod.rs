//! Recovery of binary cores embedded as text.
//!
//! An embedded core is a DEFLATE stream wrapped in a text-safe armor. Two
//! armors exist:
//!
//! - `dynEncode`: a 13 character header (`"dynEncode"`, a 2 character
//!   version, a 2 digit hex offset) followed by the escaped body.
//! - the older fixed armor: no header, offset 42, line breaks ignored.
//!
//! Both share the escape rule: `=` marks the next character, whose code is
//! reduced by 64. Every resulting value `v` is shifted back by the offset,
//! wrapping values in `1..offset` around the top of the byte range.

use std::fmt;

use log::{debug, warn};

use crate::inflate::{InflateStats, inflate_with_stats};
use crate::utils::errors::ResourceError;

pub const DYN_ENCODE_MARKER: &str = "dynEncode";

const HEADER_LEN: usize = 13;
const OFFSET_RANGE: std::ops::Range<usize> = 11..13;
const VERSION_RANGE: std::ops::Range<usize> = 9..11;

const ESCAPE: i32 = b'=' as i32;
const ESCAPE_SHIFT: i32 = 64;

const FIXED_OFFSET: u8 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armor {
    DynEncode,
    Fixed,
}

impl Armor {
    pub fn detect(source: &str) -> Self {
        if source.starts_with(DYN_ENCODE_MARKER) {
            Armor::DynEncode
        } else {
            Armor::Fixed
        }
    }
}

impl fmt::Display for Armor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Armor::DynEncode => write!(f, "dynEncode"),
            Armor::Fixed => write!(f, "fixed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorHeader {
    pub armor: Armor,
    /// Two character format version; only present for `dynEncode`.
    pub version: Option<String>,
    pub offset: u8,
}

impl ArmorHeader {
    /// Parses a `dynEncode` header from the first 13 characters of `source`.
    pub fn parse_dyn_encode(source: &str) -> Result<Self, ResourceError> {
        let header: Vec<char> = source.chars().take(HEADER_LEN).collect();
        if header.len() < HEADER_LEN {
            return Err(ResourceError::TooShort(header.len()));
        }

        let marker: String = header[..DYN_ENCODE_MARKER.len()].iter().collect();
        if marker != DYN_ENCODE_MARKER {
            warn!("Resource header {marker:?} does not carry the {DYN_ENCODE_MARKER} marker");
        }

        let hex: String = header[OFFSET_RANGE].iter().collect();
        let offset = u8::from_str_radix(&hex, 16)
            .map_err(|_| ResourceError::InvalidHeader(header.iter().collect()))?;

        Ok(Self {
            armor: Armor::DynEncode,
            version: Some(header[VERSION_RANGE].iter().collect()),
            offset,
        })
    }

    pub fn fixed() -> Self {
        Self {
            armor: Armor::Fixed,
            version: None,
            offset: FIXED_OFFSET,
        }
    }
}

fn unescape(body: impl Iterator<Item = char>, offset: u8, skip_line_breaks: bool) -> Vec<u8> {
    let (lower, upper) = body.size_hint();
    let mut output = Vec::with_capacity(upper.unwrap_or(lower));
    let offset = offset as i32;
    let mut escaped = false;

    for c in body {
        let mut byte = c as i32;

        if skip_line_breaks && (byte == 13 || byte == 10) {
            continue;
        }

        if byte == ESCAPE && !escaped {
            escaped = true;
            continue;
        }

        if escaped {
            escaped = false;
            byte -= ESCAPE_SHIFT;
        }

        let value = if byte < offset && byte > 0 {
            byte + 256 - offset
        } else {
            byte - offset
        };
        // truncation to a byte is part of the format
        output.push(value as u8);
    }

    output
}

/// Strips the `dynEncode` armor, returning the raw DEFLATE stream.
pub fn decode_dyn_encode(source: &str) -> Result<Vec<u8>, ResourceError> {
    let header = ArmorHeader::parse_dyn_encode(source)?;
    Ok(unescape(source.chars().skip(HEADER_LEN), header.offset, false))
}

/// Strips the fixed-offset armor, returning the raw DEFLATE stream.
pub fn decode_fixed(source: &str) -> Vec<u8> {
    unescape(source.chars(), FIXED_OFFSET, true)
}

/// Strips whichever armor `source` carries.
pub fn unarmor(source: &str) -> Result<(ArmorHeader, Vec<u8>), ResourceError> {
    match Armor::detect(source) {
        Armor::DynEncode => {
            let header = ArmorHeader::parse_dyn_encode(source)?;
            let deflated = unescape(source.chars().skip(HEADER_LEN), header.offset, false);
            Ok((header, deflated))
        }
        Armor::Fixed => Ok((ArmorHeader::fixed(), decode_fixed(source))),
    }
}

/// An embedded resource after both stages have been undone.
#[derive(Debug, Clone)]
pub struct LoadedResource {
    pub header: ArmorHeader,
    /// Characters of armored text, header included.
    pub encoded_len: usize,
    pub deflated_len: usize,
    pub stats: InflateStats,
    pub data: Vec<u8>,
}

pub fn load_resource_with_stats(source: &str) -> Result<LoadedResource, ResourceError> {
    let (header, deflated) = unarmor(source)?;
    let (data, stats) = inflate_with_stats(&deflated)?;

    debug!(
        "Loaded {} resource: {} deflated bytes -> {} bytes",
        header.armor,
        deflated.len(),
        data.len()
    );

    Ok(LoadedResource {
        header,
        encoded_len: source.chars().count(),
        deflated_len: deflated.len(),
        stats,
        data,
    })
}

/// Decodes an armored resource and inflates it into the original binary.
pub fn load_resource(source: &str) -> Result<Vec<u8>, ResourceError> {
    load_resource_with_stats(source).map(|loaded| loaded.data)
}


#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::DeflateEncoder;

    use super::testing::{armor, dyn_encode};
    use super::*;
    use crate::utils::errors::DataError;

    fn core_image() -> Vec<u8> {
        // every byte value, plus a compressible tail
        let mut image: Vec<u8> = (0..=255).collect();
        image.extend(b"\0asm\x01\0\0\0".iter().cycle().take(4096));
        image
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn unescapes_with_wraparound() {
        // offset 0x10: 'A' (65) -> 49, 0x05 wraps to 245, "=}" is 125 - 64 = 61 -> 45
        let body = unescape("A\u{5}=}".chars(), 0x10, false);
        assert_eq!(body, [49, 245, 45]);

        // 0 and the offset itself both land on the low side
        let body = unescape("\0\u{10}".chars(), 0x10, false);
        assert_eq!(body, [0xF0, 0]);
    }

    #[test]
    fn escaped_escape_is_literal() {
        // "==" yields 61 - 64, wrapping to 253 before the shift
        let body = unescape("==".chars(), 0, false);
        assert_eq!(body, [253]);
    }

    #[test]
    fn fixed_armor_skips_line_breaks() {
        let body = decode_fixed("k\r\nl\n");
        assert_eq!(body, [b'k' - 42, b'l' - 42]);
    }

    #[test]
    fn dyn_encode_round_trip() -> Result<(), ResourceError> {
        let image = core_image();
        let deflated = deflate(&image);

        for offset in [0x00, 0x01, 0x2a, 0x7f, 0xd3, 0xff] {
            let source = dyn_encode(&deflated, offset);
            assert_eq!(Armor::detect(&source), Armor::DynEncode);
            assert_eq!(decode_dyn_encode(&source)?, deflated, "offset {offset:#x}");

            let loaded = load_resource_with_stats(&source)?;
            assert_eq!(loaded.data, image);
            assert_eq!(loaded.header.offset, offset);
            assert_eq!(loaded.header.version.as_deref(), Some("01"));
            assert_eq!(loaded.deflated_len, deflated.len());
        }
        Ok(())
    }

    #[test]
    fn fixed_armor_round_trip() -> Result<(), ResourceError> {
        let image = core_image();
        let source = armor(&deflate(&image), FIXED_OFFSET, Some(76));

        assert_eq!(Armor::detect(&source), Armor::Fixed);
        assert_eq!(load_resource(&source)?, image);
        Ok(())
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(decode_dyn_encode("dynEncode"), Err(ResourceError::TooShort(9))));
        assert!(matches!(
            decode_dyn_encode("dynEncode01zz...."),
            Err(ResourceError::InvalidHeader(_))
        ));
    }

    #[test]
    fn corrupt_body_fails_to_inflate() {
        // BTYPE 3 once unarmored
        let source = dyn_encode(&[0x07], 0x2a);
        assert!(matches!(
            load_resource(&source),
            Err(ResourceError::Data(DataError::InvalidBlockType(3)))
        ));
    }
}
