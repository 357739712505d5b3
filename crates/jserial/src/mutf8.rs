//! Modified UTF-8, the Java-specific string encoding used by
//! `DataOutputStream.writeUTF` and the serialization stream.
//!
//! It differs from standard UTF-8 in two ways: the null character is written
//! as the two-byte sequence `C0 80` (so encoded strings never contain a zero
//! byte), and code points above the BMP are written as a surrogate pair with
//! each surrogate in three-byte form (a six-byte sequence in total). Four-byte
//! UTF-8 lead bytes never occur.

use thiserror::Error;

/// Error type for modified UTF-8 decoding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Mutf8Error {
    #[error("embedded zero byte at {at}")]
    EmbeddedNull { at: usize },
    #[error("invalid byte at {at}")]
    InvalidByte { at: usize },
    #[error("incomplete sequence at {at}")]
    IncompleteSequence { at: usize },
    #[error("unpaired surrogate at {at}")]
    UnpairedSurrogate { at: usize },
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16, Mutf8Error> {
    match bytes.get(at) {
        None => Err(Mutf8Error::IncompleteSequence { at }),
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        Some(_) => Err(Mutf8Error::InvalidByte { at }),
    }
}

/// Decodes modified UTF-8 bytes into a string.
///
/// The byte groups decode to UTF-16 code units; surrogate halves are then
/// combined into supplementary code points. Zero bytes, `Fx` lead bytes,
/// misplaced continuation bytes and unpaired surrogates are rejected.
pub fn decode(bytes: &[u8]) -> Result<String, Mutf8Error> {
    let mut out = String::with_capacity(bytes.len());
    // A high surrogate waiting for its low half, with its byte offset.
    let mut pending: Option<(u16, usize)> = None;
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];
        let unit: u16 = if b == 0x00 {
            return Err(Mutf8Error::EmbeddedNull { at: i });
        } else if b < 0x80 {
            i += 1;
            b as u16
        } else if b & 0xE0 == 0xC0 {
            let b1 = continuation(bytes, i + 1)?;
            i += 2;
            (((b & 0x1F) as u16) << 6) | b1
        } else if b & 0xF0 == 0xE0 {
            let b1 = continuation(bytes, i + 1)?;
            let b2 = continuation(bytes, i + 2)?;
            i += 3;
            (((b & 0x0F) as u16) << 12) | (b1 << 6) | b2
        } else {
            return Err(Mutf8Error::InvalidByte { at: i });
        };

        match (pending.take(), unit) {
            (None, 0xD800..=0xDBFF) => pending = Some((unit, start)),
            (None, 0xDC00..=0xDFFF) => {
                return Err(Mutf8Error::UnpairedSurrogate { at: start })
            }
            (None, _) => {
                let c = char::from_u32(unit as u32)
                    .ok_or(Mutf8Error::InvalidByte { at: start })?;
                out.push(c);
            }
            (Some((high, _)), 0xDC00..=0xDFFF) => {
                let cp = 0x10000
                    + (((high - 0xD800) as u32) << 10)
                    + (unit - 0xDC00) as u32;
                let c = char::from_u32(cp)
                    .ok_or(Mutf8Error::InvalidByte { at: start })?;
                out.push(c);
            }
            (Some((_, at)), _) => return Err(Mutf8Error::UnpairedSurrogate { at }),
        }
    }

    if let Some((_, at)) = pending {
        return Err(Mutf8Error::UnpairedSurrogate { at });
    }
    Ok(out)
}

/// Encodes a string as modified UTF-8 bytes.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 4);
    for c in s.chars() {
        let cp = c as u32;
        if cp == 0 {
            out.extend_from_slice(&[0xC0, 0x80]);
        } else if cp < 0x80 {
            out.push(cp as u8);
        } else if cp < 0x800 {
            out.push(0xC0 | (cp >> 6) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else if cp < 0x10000 {
            push_three(&mut out, cp as u16);
        } else {
            let v = cp - 0x10000;
            push_three(&mut out, 0xD800 + (v >> 10) as u16);
            push_three(&mut out, 0xDC00 + (v & 0x3FF) as u16);
        }
    }
    out
}

fn push_three(out: &mut Vec<u8>, unit: u16) {
    out.push(0xE0 | (unit >> 12) as u8);
    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
    out.push(0x80 | (unit & 0x3F) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_roundtrip() {
        let bytes = encode("Hello, world");
        assert_eq!(bytes, b"Hello, world");
        assert_eq!(decode(&bytes).unwrap(), "Hello, world");
    }

    #[test]
    fn empty_string() {
        assert_eq!(encode(""), Vec::<u8>::new());
        assert_eq!(decode(&[]).unwrap(), "");
    }

    #[test]
    fn null_is_two_bytes() {
        let bytes = encode("a\0b");
        assert_eq!(bytes, &[b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&bytes).unwrap(), "a\0b");
    }

    #[test]
    fn embedded_zero_byte_rejected() {
        assert_eq!(decode(&[b'a', 0x00]), Err(Mutf8Error::EmbeddedNull { at: 1 }));
    }

    #[test]
    fn two_and_three_byte_sequences() {
        let s = "é€";
        let bytes = encode(s);
        assert_eq!(bytes, &[0xC3, 0xA9, 0xE2, 0x82, 0xAC]);
        assert_eq!(decode(&bytes).unwrap(), s);
    }

    #[test]
    fn supplementary_code_point_is_six_bytes() {
        let s = "\u{1F600}";
        let bytes = encode(s);
        assert_eq!(bytes, &[0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode(&bytes).unwrap(), s);
    }

    #[test]
    fn ed_lead_bmp_character_decodes() {
        // U+D7FF is a plain BMP character whose three-byte form starts 0xED.
        let s = "\u{D7FF}";
        let bytes = encode(s);
        assert_eq!(bytes, &[0xED, 0x9F, 0xBF]);
        assert_eq!(decode(&bytes).unwrap(), s);
    }

    #[test]
    fn unpaired_surrogates_rejected() {
        // High surrogate alone.
        assert!(matches!(
            decode(&[0xED, 0xA0, 0xBD]),
            Err(Mutf8Error::UnpairedSurrogate { .. })
        ));
        // Low surrogate first.
        assert!(matches!(
            decode(&[0xED, 0xB8, 0x80]),
            Err(Mutf8Error::UnpairedSurrogate { .. })
        ));
        // High surrogate followed by a plain character.
        assert!(matches!(
            decode(&[0xED, 0xA0, 0xBD, b'x']),
            Err(Mutf8Error::UnpairedSurrogate { .. })
        ));
    }

    #[test]
    fn four_byte_utf8_lead_rejected() {
        assert_eq!(
            decode(&[0xF0, 0x9F, 0x98, 0x80]),
            Err(Mutf8Error::InvalidByte { at: 0 })
        );
    }

    #[test]
    fn misplaced_continuation_rejected() {
        assert_eq!(decode(&[0x80]), Err(Mutf8Error::InvalidByte { at: 0 }));
    }

    #[test]
    fn truncated_sequence_rejected() {
        assert_eq!(
            decode(&[0xE2, 0x82]),
            Err(Mutf8Error::IncompleteSequence { at: 2 })
        );
    }
}
