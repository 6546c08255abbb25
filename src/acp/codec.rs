//! NDJSON line framing for the agent stream.
//!
//! [`AcpCodec`] wraps [`LinesCodec`] so both halves of the stream speak the
//! same framing: one UTF-8 JSON document per `\n`-terminated line. Inbound
//! lines are capped at [`MAX_LINE_BYTES`]; a runaway line surfaces as
//! [`AppError::Acp`] and the reader skips it instead of buffering forever.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Largest inbound line the codec accepts: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec shared by the reader ([`tokio_util::codec::FramedRead`]) and
/// the writer ([`tokio_util::codec::FramedWrite`]).
#[derive(Debug)]
pub struct AcpCodec(LinesCodec);

impl AcpCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    /// Append `item` plus the `\n` delimiter to `dst`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Acp(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
