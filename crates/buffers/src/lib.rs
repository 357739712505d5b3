//! Binary buffer utilities for the jserial codec.
//!
//! # Overview
//!
//! - [`Reader`] - Reads big-endian binary data from a byte slice with cursor
//!   tracking. All reads are bounds-checked and return a [`BufferError`] when
//!   the slice runs out.
//! - [`Writer`] - Writes big-endian binary data to an auto-growing buffer.
//!
//! # Example
//!
//! ```
//! use jserial_buffers::{Reader, Writer};
//!
//! // Write some data
//! let mut writer = Writer::new();
//! writer.u8(0x01);
//! writer.u16(0x0203);
//! let data = writer.flush();
//!
//! // Read it back
//! let mut reader = Reader::new(&data);
//! assert_eq!(reader.u8().unwrap(), 0x01);
//! assert_eq!(reader.u16().unwrap(), 0x0203);
//! ```

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Error type for buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Attempted to read past the end of the buffer.
    EndOfBuffer,
    /// Attempted to seek outside the buffer.
    OutOfRange,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::EndOfBuffer => write!(f, "end of buffer"),
            BufferError::OutOfRange => write!(f, "position out of range"),
        }
    }
}

impl std::error::Error for BufferError {}
