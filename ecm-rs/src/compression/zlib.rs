//! Raw DEFLATE back-end.

use crate::compression::{FlushMode, InBuf, OutBuf};
use crate::error::{EcmError, Result};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::CodecOptions;

pub struct ZlibEncoder {
    engine: Compress,
}

impl ZlibEncoder {
    pub fn new(options: &CodecOptions) -> Self {
        ZlibEncoder {
            engine: Compress::new(Compression::new(options.level.min(9)), false),
        }
    }

    pub fn compress(&mut self, input: &[u8], out: &mut OutBuf, flush: FlushMode) -> Result<()> {
        let flate_flush = match flush {
            FlushMode::Continue => FlushCompress::None,
            FlushMode::SyncPoint => FlushCompress::Full,
            FlushMode::EndStream => FlushCompress::Finish,
        };

        let mut pos = 0;
        loop {
            let in_before = self.engine.total_in();
            let out_before = self.engine.total_out();
            let status = self
                .engine
                .compress(&input[pos..], out.spare(), flate_flush)
                .map_err(|_| EcmError::Processing("deflate failed"))?;
            pos += (self.engine.total_in() - in_before) as usize;
            out.advance((self.engine.total_out() - out_before) as usize);

            match status {
                Status::StreamEnd => break,
                // A flush is only known complete once deflate returns with
                // output space to spare.
                Status::Ok => {
                    if pos == input.len() && flush != FlushMode::EndStream && out.remaining() > 0 {
                        break;
                    }
                }
                Status::BufError => {
                    // No pending input means the flush has nothing left to
                    // emit; anything else is a genuine stall.
                    if pos == input.len() && flush != FlushMode::EndStream {
                        break;
                    }
                    return Err(EcmError::Processing("deflate stalled"));
                }
            }
            if out.remaining() == 0 {
                return Err(EcmError::Processing("compressor output buffer exhausted"));
            }
        }
        Ok(())
    }
}

pub struct ZlibDecoder {
    engine: Decompress,
}

impl ZlibDecoder {
    pub fn new() -> Self {
        ZlibDecoder {
            engine: Decompress::new(false),
        }
    }

    pub fn decompress(&mut self, input: &mut InBuf, output: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        while pos < output.len() {
            let in_before = self.engine.total_in();
            let out_before = self.engine.total_out();
            let status = self
                .engine
                .decompress(input.data(), &mut output[pos..], FlushDecompress::None)
                .map_err(|_| EcmError::Processing("inflate failed"))?;
            let consumed = (self.engine.total_in() - in_before) as usize;
            let produced = (self.engine.total_out() - out_before) as usize;
            input.consume(consumed);
            pos += produced;

            match status {
                Status::StreamEnd => {
                    if pos < output.len() {
                        return Err(EcmError::Processing("deflate stream ended early"));
                    }
                }
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        return Err(EcmError::Processing("compressed stream truncated"));
                    }
                }
            }
        }
        Ok(())
    }
}
