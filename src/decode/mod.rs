//! Exposition format decoders
//!
//! - `delimited`: incremental decoder for varint length-prefixed protobuf records
//! - `text`: whole-body parser for the line-oriented text format (version 0.0.4)

pub mod delimited;
pub mod text;

pub use delimited::{DecodeError, DelimitedDecoder};
pub use text::ParseError;
