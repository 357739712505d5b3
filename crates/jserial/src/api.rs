//! Front-door convenience functions over byte buffers.
//!
//! These wrap [`StreamDecoder`] and [`StreamEncoder`] for the common case:
//! a fully buffered stream, optional transparent gzip, and the default
//! transformer registry extended with caller transformers.

use std::borrow::Cow;
use std::io::Read;
use std::rc::Rc;

use flate2::read::GzDecoder;

use crate::content::JavaValue;
use crate::decoder::StreamDecoder;
use crate::encoder::StreamEncoder;
use crate::error::StreamError;
use crate::transform::{ObjectTransformer, Transformers};

/// Options recognized by the parse functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Hand primitive array bodies to an external numeric facility. That
    /// facility is not part of this build, so requesting it fails with
    /// [`StreamError::NumericArrayUnavailable`]; the
    /// [`ObjectTransformer::load_array`] hook is the seam it would plug
    /// into.
    pub use_numeric_array_acceleration: bool,
}

/// Parses the first top-level value of a serialization stream.
pub fn parse_one(
    data: &[u8],
    transformers: Vec<Rc<dyn ObjectTransformer>>,
    options: ParseOptions,
) -> Result<JavaValue, StreamError> {
    check_options(&options)?;
    let data = inflate_if_gzip(data)?;
    let mut decoder =
        StreamDecoder::with_transformers(&data, Transformers::with_user(transformers));
    decoder.parse_one()
}

/// Parses top-level values until the byte source is exhausted.
pub fn parse_all(
    data: &[u8],
    transformers: Vec<Rc<dyn ObjectTransformer>>,
    options: ParseOptions,
) -> Result<Vec<JavaValue>, StreamError> {
    check_options(&options)?;
    let data = inflate_if_gzip(data)?;
    let mut decoder =
        StreamDecoder::with_transformers(&data, Transformers::with_user(transformers));
    decoder.parse_all()
}

/// Serializes a value into a stream `ObjectInputStream` can read back.
pub fn to_bytes(value: &JavaValue) -> Result<Vec<u8>, StreamError> {
    StreamEncoder::new().encode(value)
}

fn check_options(options: &ParseOptions) -> Result<(), StreamError> {
    if options.use_numeric_array_acceleration {
        return Err(StreamError::NumericArrayUnavailable);
    }
    Ok(())
}

/// Decompresses the whole input when it starts with the gzip magic.
fn inflate_if_gzip(data: &[u8]) -> Result<Cow<'_, [u8]>, StreamError> {
    if data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B {
        let mut inflated = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut inflated)
            .map_err(|e| StreamError::malformed(0, format!("gzip: {}", e)))?;
        Ok(Cow::Owned(inflated))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const NULL_STREAM: &[u8] = &[0xAC, 0xED, 0x00, 0x05, 0x70];

    #[test]
    fn parse_one_plain_stream() {
        let value = parse_one(NULL_STREAM, Vec::new(), ParseOptions::default()).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn parse_one_gzipped_stream() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(NULL_STREAM).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(&compressed[..2], &[0x1F, 0x8B]);

        let value = parse_one(&compressed, Vec::new(), ParseOptions::default()).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn corrupt_gzip_is_malformed() {
        let data = [0x1F, 0x8B, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            parse_one(&data, Vec::new(), ParseOptions::default()),
            Err(StreamError::MalformedStream { .. })
        ));
    }

    #[test]
    fn numeric_acceleration_fails_without_the_facility() {
        let options = ParseOptions {
            use_numeric_array_acceleration: true,
        };
        assert_eq!(
            parse_one(NULL_STREAM, Vec::new(), options),
            Err(StreamError::NumericArrayUnavailable)
        );
    }

    #[test]
    fn parse_all_returns_every_top_level_value() {
        let data = [0xAC, 0xED, 0x00, 0x05, 0x70, 0x70];
        let values = parse_all(&data, Vec::new(), ParseOptions::default()).unwrap();
        assert_eq!(values.len(), 2);
    }
}
