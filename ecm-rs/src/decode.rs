//! Decode pipeline: replay the container's stream script through the
//! matching decompressors and regenerate the original sector stream.

use crate::cdrom::SECTOR_SIZE;
use crate::encode::is_cancelled;
use crate::error::{EcmError, Result};
use crate::read::EcmImageReader;
use std::io::{Read, Seek, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Caller-tunable knobs for [`decode_image`].
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Abort signal; the pipeline checks it once per sector.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Outcome of a successful decode.
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub sector_count: u32,
    /// Restored image size in bytes.
    pub output_size: u64,
}

/// Decode an ECM v3 container back into the original raw image.
///
/// The restored byte stream is verified against the whole-image EDC
/// trailer; a mismatch is reported as a processing error after the sink
/// has been written.
pub fn decode_image<R, W>(input: &mut R, output: &mut W, options: &DecodeOptions) -> Result<DecodeReport>
where
    R: Read + Seek,
    W: Write,
{
    let mut reader = EcmImageReader::new(&mut *input)?;
    let sector_count = reader.sector_count();
    let mut written = 0u64;

    loop {
        if is_cancelled(&options.cancel) {
            return Err(EcmError::Cancelled);
        }
        match reader.read_sector()? {
            Some(sector) => {
                output.write_all(sector).map_err(EcmError::write)?;
                written += SECTOR_SIZE as u64;
            }
            None => break,
        }
    }
    output.flush().map_err(EcmError::write)?;

    Ok(DecodeReport {
        sector_count,
        output_size: written,
    })
}
