//! LZ4-HC back-end. Input is cut into independent 1 MiB blocks (no input
//! byte spans two blocks, no cross-block references); each block is stored
//! as `[u32 raw_len][u32 comp_len][payload]`, little-endian.

use crate::compression::{CodecOptions, FlushMode, InBuf, OutBuf};
use crate::error::{EcmError, Result};
use lz4::block::{compress_to_buffer, decompress_to_buffer, CompressionMode};

const BLOCK_SIZE: usize = 1_048_576;
const BLOCK_HEADER: usize = 8;

// LZ4_COMPRESSBOUND
fn compress_bound(len: usize) -> usize {
    len + len / 255 + 16
}

pub struct Lz4Encoder {
    level: i32,
    block: Vec<u8>,
    scratch: Vec<u8>,
}

impl Lz4Encoder {
    pub fn new(options: &CodecOptions) -> Self {
        // The HC level scale runs past the generic 0..=9 scale.
        let level = (134 * options.level).div_ceil(100) as i32;
        Lz4Encoder {
            level,
            block: Vec::with_capacity(BLOCK_SIZE),
            scratch: Vec::new(),
        }
    }

    pub fn compress(&mut self, input: &[u8], out: &mut OutBuf, flush: FlushMode) -> Result<()> {
        let mut input = input;
        while !input.is_empty() {
            let take = (BLOCK_SIZE - self.block.len()).min(input.len());
            self.block.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.block.len() == BLOCK_SIZE {
                self.emit_block(out)?;
            }
        }
        if flush != FlushMode::Continue && !self.block.is_empty() {
            self.emit_block(out)?;
        }
        Ok(())
    }

    fn emit_block(&mut self, out: &mut OutBuf) -> Result<()> {
        self.scratch.resize(compress_bound(self.block.len()), 0);
        let compressed_len = compress_to_buffer(
            &self.block,
            Some(CompressionMode::HIGHCOMPRESSION(self.level)),
            false,
            &mut self.scratch,
        )
        .map_err(|_| EcmError::Processing("lz4 block compression failed"))?;

        out.push_slice(&(self.block.len() as u32).to_le_bytes())?;
        out.push_slice(&(compressed_len as u32).to_le_bytes())?;
        out.push_slice(&self.scratch[..compressed_len])?;
        self.block.clear();
        Ok(())
    }
}

pub struct Lz4Decoder {
    decoded: Vec<u8>,
    pos: usize,
}

impl Lz4Decoder {
    pub fn new() -> Self {
        Lz4Decoder {
            decoded: Vec::new(),
            pos: 0,
        }
    }

    pub fn decompress(&mut self, input: &mut InBuf, output: &mut [u8]) -> Result<()> {
        let mut out_pos = 0;
        while out_pos < output.len() {
            if self.pos == self.decoded.len() {
                self.read_block(input)?;
            }
            let take = (self.decoded.len() - self.pos).min(output.len() - out_pos);
            output[out_pos..out_pos + take].copy_from_slice(&self.decoded[self.pos..self.pos + take]);
            self.pos += take;
            out_pos += take;
        }
        Ok(())
    }

    fn read_block(&mut self, input: &mut InBuf) -> Result<()> {
        let data = input.data();
        if data.len() < BLOCK_HEADER {
            return Err(EcmError::Processing("truncated lz4 block header"));
        }
        let raw_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let comp_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if raw_len > BLOCK_SIZE || data.len() < BLOCK_HEADER + comp_len {
            return Err(EcmError::Processing("truncated lz4 block"));
        }

        self.decoded.resize(raw_len, 0);
        let produced = decompress_to_buffer(
            &data[BLOCK_HEADER..BLOCK_HEADER + comp_len],
            Some(raw_len as i32),
            &mut self.decoded,
        )
        .map_err(|_| EcmError::Processing("lz4 block corrupt"))?;
        if produced != raw_len {
            return Err(EcmError::Processing("lz4 block corrupt"));
        }
        input.consume(BLOCK_HEADER + comp_len);
        self.pos = 0;
        Ok(())
    }
}
