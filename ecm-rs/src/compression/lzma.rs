//! LZMA2 back-end with an x86 BCJ filter in front of the coder, carried in
//! an xz stream with no integrity check (the container has its own EDC).

use crate::compression::{CodecOptions, FlushMode, InBuf, OutBuf};
use crate::error::{EcmError, Result};
use xz2::stream::{Action, Check, Filters, LzmaOptions, Status, Stream};

// liblzma LZMA_PRESET_EXTREME
const PRESET_EXTREME: u32 = 1 << 31;

pub struct LzmaEncoder {
    engine: Stream,
}

impl LzmaEncoder {
    pub fn new(options: &CodecOptions) -> Result<Self> {
        let mut preset = options.level.min(9);
        if options.extreme {
            preset |= PRESET_EXTREME;
        }
        let lzma2 =
            LzmaOptions::new_preset(preset).map_err(|_| EcmError::Processing("bad lzma preset"))?;
        let mut filters = Filters::new();
        filters.x86();
        filters.lzma2(&lzma2);
        let engine = Stream::new_stream_encoder(&filters, Check::None)
            .map_err(|_| EcmError::Processing("lzma encoder initialization failed"))?;
        Ok(LzmaEncoder { engine })
    }

    pub fn compress(&mut self, input: &[u8], out: &mut OutBuf, flush: FlushMode) -> Result<()> {
        let action = match flush {
            FlushMode::Continue => Action::Run,
            FlushMode::SyncPoint => Action::FullFlush,
            FlushMode::EndStream => Action::Finish,
        };

        let mut pos = 0;
        loop {
            if matches!(action, Action::Run) && pos == input.len() {
                break;
            }
            let in_before = self.engine.total_in();
            let out_before = self.engine.total_out();
            let status = self
                .engine
                .process(&input[pos..], out.spare(), action)
                .map_err(|_| EcmError::Processing("lzma coding failed"))?;
            pos += (self.engine.total_in() - in_before) as usize;
            out.advance((self.engine.total_out() - out_before) as usize);

            // Flushing actions report StreamEnd once the boundary (or the
            // whole stream) has been emitted.
            if let Status::StreamEnd = status {
                break;
            }
            if out.remaining() == 0 {
                return Err(EcmError::Processing("compressor output buffer exhausted"));
            }
        }
        Ok(())
    }
}

pub struct LzmaDecoder {
    engine: Stream,
}

impl LzmaDecoder {
    pub fn new() -> Result<Self> {
        let engine = Stream::new_stream_decoder(u64::MAX, 0)
            .map_err(|_| EcmError::Processing("lzma decoder initialization failed"))?;
        Ok(LzmaDecoder { engine })
    }

    pub fn decompress(&mut self, input: &mut InBuf, output: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        while pos < output.len() {
            let in_before = self.engine.total_in();
            let out_before = self.engine.total_out();
            let status = self
                .engine
                .process(input.data(), &mut output[pos..], Action::Run)
                .map_err(|_| EcmError::Processing("lzma stream corrupt"))?;
            let consumed = (self.engine.total_in() - in_before) as usize;
            let produced = (self.engine.total_out() - out_before) as usize;
            input.consume(consumed);
            pos += produced;

            match status {
                Status::StreamEnd => {
                    if pos < output.len() {
                        return Err(EcmError::Processing("lzma stream ended early"));
                    }
                }
                _ => {
                    if consumed == 0 && produced == 0 {
                        return Err(EcmError::Processing("compressed stream truncated"));
                    }
                }
            }
        }
        Ok(())
    }
}
