//! Streaming compressor/decompressor façade over the container back-ends.
//!
//! Every stream owns one encoder or decoder instance; the pipelines talk to
//! it through owned buffer handles (`OutBuf`, `InBuf`) that expose only
//! remaining-byte counters. Encoders consume whole input slices and append
//! to an `OutBuf`; decoders fill whole output slices from an `InBuf`.

mod flac;
mod lz4;
mod lzma;
mod zlib;

use crate::error::{EcmError, Result};
use num_derive::FromPrimitive;
use std::io::Read;

/// Compression back-ends storable in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum CodecKind {
    /// Byte copy.
    None = 0,
    /// Raw DEFLATE.
    Zlib,
    /// LZMA2 with an x86 BCJ filter in front.
    Lzma,
    /// LZ4-HC in independent 1 MiB blocks.
    Lz4,
    /// FLAC, stereo 16-bit 44.1 kHz. Audio streams only.
    Flac,
}

/// Flush behavior of one compression step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// More input follows.
    Continue,
    /// Emit a restart boundary a decoder can resume from.
    SyncPoint,
    /// No more input will arrive for this stream.
    EndStream,
}

/// Tuning shared by the encoder back-ends.
#[derive(Debug, Clone, Copy)]
pub struct CodecOptions {
    /// Compression level, 0..=9.
    pub level: u32,
    /// Trade (a lot of) time for ratio where the back-end supports it.
    pub extreme: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            level: 5,
            extreme: false,
        }
    }
}

/// Owned output region a stream encoder appends to. The pipelines drain it
/// to the container when utilization crosses their threshold.
pub struct OutBuf {
    buf: Vec<u8>,
    len: usize,
}

impl OutBuf {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        buf.resize(capacity, 0);
        Ok(OutBuf { buf, len: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Output slots still unfilled.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// The bytes produced so far.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn spare(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.buf[len..]
    }

    fn advance(&mut self, produced: usize) {
        self.len += produced;
    }

    fn push_slice(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.remaining() {
            return Err(EcmError::Processing("compressor output buffer exhausted"));
        }
        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }
}

/// Owned input window over one stream's compressed payload. The pipelines
/// refill it from the container; decoders consume from the front.
pub struct InBuf {
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl InBuf {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        buf.resize(capacity, 0);
        Ok(InBuf {
            buf,
            pos: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available and not yet consumed.
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Drop buffered data, e.g. when moving to the next stream.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.len = 0;
    }

    /// Move the unconsumed tail to the front and read up to
    /// `*stream_left` bytes from `reader` into the free space.
    pub fn refill<R: Read>(&mut self, reader: &mut R, stream_left: &mut u64) -> Result<()> {
        self.buf.copy_within(self.pos..self.len, 0);
        self.len -= self.pos;
        self.pos = 0;

        let space = self.buf.len() - self.len;
        let to_read = space.min(usize::try_from(*stream_left).unwrap_or(space));
        if to_read > 0 {
            let end = self.len + to_read;
            reader
                .read_exact(&mut self.buf[self.len..end])
                .map_err(EcmError::read)?;
            self.len = end;
            *stream_left -= to_read as u64;
        }
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }

    fn consume(&mut self, used: usize) {
        self.pos += used;
    }
}

/// One stream in the encode direction.
pub enum StreamEncoder {
    Copy,
    Zlib(zlib::ZlibEncoder),
    Lzma(lzma::LzmaEncoder),
    Lz4(lz4::Lz4Encoder),
    Flac(flac::FlacEncoder),
}

impl StreamEncoder {
    pub fn new(kind: CodecKind, options: &CodecOptions) -> Result<Self> {
        Ok(match kind {
            CodecKind::None => StreamEncoder::Copy,
            CodecKind::Zlib => StreamEncoder::Zlib(zlib::ZlibEncoder::new(options)),
            CodecKind::Lzma => StreamEncoder::Lzma(lzma::LzmaEncoder::new(options)?),
            CodecKind::Lz4 => StreamEncoder::Lz4(lz4::Lz4Encoder::new(options)),
            CodecKind::Flac => StreamEncoder::Flac(flac::FlacEncoder::new()),
        })
    }

    /// Consume all of `input`, appending compressed bytes to `out`.
    pub fn compress(&mut self, input: &[u8], out: &mut OutBuf, flush: FlushMode) -> Result<()> {
        match self {
            StreamEncoder::Copy => out.push_slice(input),
            StreamEncoder::Zlib(encoder) => encoder.compress(input, out, flush),
            StreamEncoder::Lzma(encoder) => encoder.compress(input, out, flush),
            StreamEncoder::Lz4(encoder) => encoder.compress(input, out, flush),
            StreamEncoder::Flac(encoder) => encoder.compress(input, out, flush),
        }
    }
}

/// One stream in the decode direction.
pub enum StreamDecoder {
    Copy,
    Zlib(zlib::ZlibDecoder),
    Lzma(lzma::LzmaDecoder),
    Lz4(lz4::Lz4Decoder),
    Flac(flac::FlacDecoder),
}

impl StreamDecoder {
    pub fn new(kind: CodecKind) -> Result<Self> {
        Ok(match kind {
            CodecKind::None => StreamDecoder::Copy,
            CodecKind::Zlib => StreamDecoder::Zlib(zlib::ZlibDecoder::new()),
            CodecKind::Lzma => StreamDecoder::Lzma(lzma::LzmaDecoder::new()?),
            CodecKind::Lz4 => StreamDecoder::Lz4(lz4::Lz4Decoder::new()),
            CodecKind::Flac => StreamDecoder::Flac(flac::FlacDecoder::new()),
        })
    }

    /// Fill all of `output` with decompressed bytes, consuming from
    /// `input`.
    pub fn decompress(&mut self, input: &mut InBuf, output: &mut [u8]) -> Result<()> {
        match self {
            StreamDecoder::Copy => {
                if input.remaining() < output.len() {
                    return Err(EcmError::Processing("stored stream truncated"));
                }
                output.copy_from_slice(&input.data()[..output.len()]);
                input.consume(output.len());
                Ok(())
            }
            StreamDecoder::Zlib(decoder) => decoder.decompress(input, output),
            StreamDecoder::Lzma(decoder) => decoder.decompress(input, output),
            StreamDecoder::Lz4(decoder) => decoder.decompress(input, output),
            StreamDecoder::Flac(decoder) => decoder.decompress(input, output),
        }
    }
}
