//! Reader (and limited writer) for the Java Object Serialization Stream
//! Protocol, the wire format produced by `ObjectOutputStream` and consumed
//! by `ObjectInputStream`.
//!
//! The decoder reconstructs a faithful in-memory graph of the serialized
//! data: primitives, strings, classes, arrays, enums, and arbitrarily
//! nested objects with back-references, custom `writeObject` payloads and
//! `Externalizable` block data. Recognized standard-library collections are
//! converted to idiomatic representations by the default transformer, and
//! callers can attach their own [`ObjectTransformer`]s for custom classes.
//!
//! No class logic is executed and no classpath is consulted: the decoder
//! reproduces bytes-to-values decoding and graph topology only. It is not a
//! security sandbox; do not feed it untrusted streams without resource
//! limits of your own.
//!
//! # Example
//!
//! ```
//! use jserial::{parse_one, ParseOptions};
//!
//! // AC ED 00 05, then a one-byte block: the stream of writeBoolean(false).
//! let data = [0xAC, 0xED, 0x00, 0x05, 0x77, 0x01, 0x00];
//! let value = parse_one(&data, Vec::new(), ParseOptions::default()).unwrap();
//! assert_eq!(value.block_bytes(), Some(&[0x00][..]));
//! ```

pub mod api;
pub mod constants;
pub mod content;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod handles;
pub mod mutf8;
pub mod transform;

pub use api::{parse_all, parse_one, to_bytes, ParseOptions};
pub use constants::TypeCode;
pub use content::{
    ArrayData, ClassDataLayout, ClassDesc, ClassDescKind, ExceptionState, Instance, JavaArray,
    JavaClass, JavaEnum, JavaField, JavaValue, Representation,
};
pub use decoder::StreamDecoder;
pub use encoder::StreamEncoder;
pub use error::StreamError;
pub use handles::HandleTable;
pub use transform::{DefaultTransformer, JavaTimeTransformer, ObjectTransformer, Transformers};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_false_primitive_stream() {
        let data = [0xAC, 0xED, 0x00, 0x05, 0x77, 0x01, 0x00];
        let value = parse_one(&data, Vec::new(), ParseOptions::default()).unwrap();
        assert_eq!(value.block_bytes(), Some(&[0x00][..]));
    }

    #[test]
    fn double_max_value_stream() {
        // writeDouble(Double.MAX_VALUE): an eight-byte block of the IEEE-754
        // pattern 7F EF FF FF FF FF FF FF.
        let mut data = vec![0xAC, 0xED, 0x00, 0x05, 0x77, 0x08];
        data.extend_from_slice(&[0x7F, 0xEF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let value = parse_one(&data, Vec::new(), ParseOptions::default()).unwrap();
        let bytes = value.block_bytes().unwrap();
        assert_eq!(f64::from_be_bytes(bytes.try_into().unwrap()), f64::MAX);
    }

    #[test]
    fn encode_then_parse_smoke() {
        let original = JavaValue::sequence(vec![
            JavaValue::Int(7),
            JavaValue::from("seven"),
            JavaValue::Null,
        ]);
        let bytes = to_bytes(&original).unwrap();
        let parsed = parse_one(&bytes, Vec::new(), ParseOptions::default()).unwrap();
        let elements = parsed.as_object().unwrap().sequence().unwrap();
        assert_eq!(elements.len(), 3);
        // The int went through its java.lang.Integer boxed form.
        assert_eq!(
            elements[0].as_object().unwrap().wrapped(),
            Some(JavaValue::Int(7))
        );
        assert_eq!(elements[1], JavaValue::from("seven"));
        assert!(elements[2].is_null());
    }
}
