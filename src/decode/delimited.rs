//! Streaming decoder for length-delimited `MetricFamily` records
//!
//! Bytes are pushed in as they arrive from the network; complete records are
//! pulled out one at a time. A record whose length prefix or payload is split
//! across chunks simply waits for more input.

use bytes::{Buf, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::model::MetricFamily;

/// Upper bound on the varint length prefix (64-bit value)
const MAX_VARINT_LEN: usize = 10;

/// Default cap on a single serialized record
pub const DEFAULT_MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid length prefix")]
    InvalidLength,

    #[error("record of {len} bytes exceeds limit of {max} bytes")]
    RecordTooLarge { len: usize, max: usize },

    #[error("stream ended inside a record ({buffered} bytes left over)")]
    Truncated { buffered: usize },

    #[error("malformed metric family record: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

pub struct DelimitedDecoder {
    buf: BytesMut,
    max_record_bytes: usize,
}

impl DelimitedDecoder {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_record_bytes,
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete record, or `Ok(None)` if more input is needed
    pub fn next_family(&mut self) -> Result<Option<MetricFamily>, DecodeError> {
        let Some((len, prefix_len)) = self.frame_header()? else {
            return Ok(None);
        };

        if len > self.max_record_bytes {
            return Err(DecodeError::RecordTooLarge {
                len,
                max: self.max_record_bytes,
            });
        }

        if self.buf.len() < prefix_len + len {
            self.buf.reserve(prefix_len + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(prefix_len);
        let record = self.buf.split_to(len).freeze();
        let family = MetricFamily::decode(record)?;
        Ok(Some(family))
    }

    /// Signal end of input. Succeeds only on a record boundary.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::Truncated {
                buffered: self.buf.len(),
            })
        }
    }

    /// Read the varint length prefix without consuming it
    fn frame_header(&self) -> Result<Option<(usize, usize)>, DecodeError> {
        let mut value: u64 = 0;
        for (i, byte) in self.buf.iter().take(MAX_VARINT_LEN).enumerate() {
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                let len = usize::try_from(value).map_err(|_| DecodeError::InvalidLength)?;
                return Ok(Some((len, i + 1)));
            }
        }

        if self.buf.len() >= MAX_VARINT_LEN {
            Err(DecodeError::InvalidLength)
        } else {
            Ok(None)
        }
    }
}

impl Default for DelimitedDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_BYTES)
    }
}
