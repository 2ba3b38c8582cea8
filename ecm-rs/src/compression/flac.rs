//! FLAC back-end for audio streams. Samples arrive as little-endian
//! 16-bit stereo pairs at 44.1 kHz; four input bytes make one sample
//! frame. PCM is cut into independent chunks of at most 1 MiB, each
//! encoded as a self-contained FLAC stream and stored as
//! `[u32 raw_len][u32 comp_len][payload]`, little-endian.

use crate::compression::{FlushMode, InBuf, OutBuf};
use crate::error::{EcmError, Result};
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use std::io::Cursor;

const CHUNK_SIZE: usize = 1_048_576;
const CHUNK_HEADER: usize = 8;
const SAMPLE_RATE: usize = 44_100;
const CHANNELS: usize = 2;
const BITS_PER_SAMPLE: usize = 16;
const BYTES_PER_FRAME: usize = 4;

pub struct FlacEncoder {
    pcm: Vec<u8>,
}

impl FlacEncoder {
    pub fn new() -> Self {
        FlacEncoder {
            pcm: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    pub fn compress(&mut self, input: &[u8], out: &mut OutBuf, flush: FlushMode) -> Result<()> {
        let mut input = input;
        while !input.is_empty() {
            let take = (CHUNK_SIZE - self.pcm.len()).min(input.len());
            self.pcm.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pcm.len() == CHUNK_SIZE {
                self.emit_chunk(out)?;
            }
        }
        if flush != FlushMode::Continue && !self.pcm.is_empty() {
            self.emit_chunk(out)?;
        }
        Ok(())
    }

    fn emit_chunk(&mut self, out: &mut OutBuf) -> Result<()> {
        if self.pcm.len() % BYTES_PER_FRAME != 0 {
            return Err(EcmError::Processing("audio stream not sample aligned"));
        }
        let samples: Vec<i32> = self
            .pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as i32)
            .collect();

        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|_| EcmError::Processing("flac encoder configuration rejected"))?;
        let source = flacenc::source::MemSource::from_samples(
            &samples,
            CHANNELS,
            BITS_PER_SAMPLE,
            SAMPLE_RATE,
        );
        let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
            .map_err(|_| EcmError::Processing("flac encoding failed"))?;
        let mut sink = flacenc::bitsink::ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|_| EcmError::Processing("flac encoding failed"))?;

        out.push_slice(&(self.pcm.len() as u32).to_le_bytes())?;
        out.push_slice(&(sink.as_slice().len() as u32).to_le_bytes())?;
        out.push_slice(sink.as_slice())?;
        self.pcm.clear();
        Ok(())
    }
}

pub struct FlacDecoder {
    decoded: Vec<u8>,
    pos: usize,
}

impl FlacDecoder {
    pub fn new() -> Self {
        FlacDecoder {
            decoded: Vec::new(),
            pos: 0,
        }
    }

    pub fn decompress(&mut self, input: &mut InBuf, output: &mut [u8]) -> Result<()> {
        let mut out_pos = 0;
        while out_pos < output.len() {
            if self.pos == self.decoded.len() {
                self.read_chunk(input)?;
            }
            let take = (self.decoded.len() - self.pos).min(output.len() - out_pos);
            output[out_pos..out_pos + take].copy_from_slice(&self.decoded[self.pos..self.pos + take]);
            self.pos += take;
            out_pos += take;
        }
        Ok(())
    }

    fn read_chunk(&mut self, input: &mut InBuf) -> Result<()> {
        let data = input.data();
        if data.len() < CHUNK_HEADER {
            return Err(EcmError::Processing("truncated flac chunk header"));
        }
        let raw_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let comp_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if raw_len > CHUNK_SIZE || data.len() < CHUNK_HEADER + comp_len {
            return Err(EcmError::Processing("truncated flac chunk"));
        }

        let payload = &data[CHUNK_HEADER..CHUNK_HEADER + comp_len];
        let mut reader = claxon::FlacReader::new(Cursor::new(payload))
            .map_err(|_| EcmError::Processing("flac stream corrupt"))?;
        self.decoded.clear();
        self.decoded.try_reserve(raw_len)?;
        for sample in reader.samples() {
            let sample = sample.map_err(|_| EcmError::Processing("flac stream corrupt"))? as i16;
            self.decoded.extend_from_slice(&sample.to_le_bytes());
        }
        if self.decoded.len() != raw_len {
            return Err(EcmError::Processing("flac chunk size mismatch"));
        }
        input.consume(CHUNK_HEADER + comp_len);
        self.pos = 0;
        Ok(())
    }
}
