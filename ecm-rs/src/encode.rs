//! Encode pipeline: analyze the source image, write the container
//! skeleton, then stream every sector residue through its stream's
//! compressor, patching the deferred header fields at the end.

use crate::cdrom::SECTOR_SIZE;
use crate::compression::{CodecKind, CodecOptions, FlushMode, OutBuf, StreamEncoder};
use crate::container::{
    compress_header_block, deflate_bound, write_outer_header, BlockHeader, BlockType, EcmSubHeader,
    MiniTocHeader, TocEntry, BLOCK_HEADER_SIZE, MINI_TOC_HEADER_SIZE, OUTER_HEADER_SIZE,
    TOC_ENTRY_SIZE,
};
use crate::ecc::edc_compute;
use crate::error::{EcmError, Result};
use crate::metadata::{write_metadata_block, FileMetadata};
use crate::sector::{clean, Optimizations};
use crate::segment::{
    analyze, build_script, serialize_runs, serialize_streams, Stream, STREAM_RECORD_SIZE,
};
use log::debug;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size of the elastic buffer between a codec and the container.
pub(crate) const BUFFER_SIZE: usize = 0x0080_0000;

pub(crate) fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// Caller-tunable knobs for [`encode_image`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Codec for data-family streams. FLAC is not allowed here.
    pub data_compression: CodecKind,
    /// Codec for audio-family streams.
    pub audio_compression: CodecKind,
    /// Compression level, 0..=9.
    pub compression_level: u32,
    /// Much slower, slightly smaller output (LZMA).
    pub extreme_compression: bool,
    /// Emit decoder restart boundaries every `sectors_per_block` sectors.
    pub seekable: bool,
    pub sectors_per_block: u8,
    /// Descriptive metadata; empty metadata writes no block. Title and id
    /// are also mirrored into the ECM sub-header, capped at 255 bytes.
    pub metadata: FileMetadata,
    /// Abort signal; the pipeline checks it once per sector.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            data_compression: CodecKind::None,
            audio_compression: CodecKind::None,
            compression_level: 5,
            extreme_compression: false,
            seekable: false,
            sectors_per_block: 100,
            metadata: FileMetadata::default(),
            cancel: None,
        }
    }
}

/// Outcome of a successful encode.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub sector_count: u32,
    /// Sectors seen per mode, indexed by the mode discriminant.
    pub mode_counts: [u32; 11],
    /// Optimization set actually applied.
    pub optimizations: Optimizations,
    /// Final container size in bytes.
    pub output_size: u64,
}

/// Encode a raw 2352-byte-per-sector image into an ECM v3 container.
///
/// The source must be seekable: it is read once to classify and segment,
/// then again to compress. On error the partially written output is left
/// as-is; removing it is the caller's policy.
pub fn encode_image<R, W>(input: &mut R, output: &mut W, options: &EncodeOptions) -> Result<EncodeReport>
where
    R: Read + Seek,
    W: Write + Seek,
{
    if options.data_compression == CodecKind::Flac {
        return Err(EcmError::Processing("FLAC compresses audio streams only"));
    }
    if options.metadata.title.len() > 255 || options.metadata.id.len() > 255 {
        return Err(EcmError::Processing("title or id longer than 255 bytes"));
    }
    if options.seekable && options.sectors_per_block == 0 {
        return Err(EcmError::Processing("sectors per block must be nonzero"));
    }

    let input_size = input.seek(SeekFrom::End(0)).map_err(EcmError::read)?;
    if input_size == 0 || input_size % SECTOR_SIZE as u64 != 0 {
        return Err(EcmError::Processing(
            "input size is not a positive multiple of 2352",
        ));
    }
    let sector_count = u32::try_from(input_size / SECTOR_SIZE as u64)
        .map_err(|_| EcmError::Processing("image has too many sectors"))?;

    // Analyze pass.
    input.seek(SeekFrom::Start(0)).map_err(EcmError::read)?;
    let analysis = analyze(
        input,
        sector_count,
        options.data_compression,
        options.audio_compression,
        Optimizations::all(),
    )?;
    let mut script = build_script(&analysis.streams_toc, &analysis.sectors_toc)?;

    // Container skeleton. The outer TOC position, the ECM block sizes and
    // the streams mini-TOC are all patched once the payload is written.
    write_outer_header(output, 0)?;
    let ecm_block_pos = OUTER_HEADER_SIZE;
    let mut ecm_header = BlockHeader {
        block_type: BlockType::Ecm,
        compression: CodecKind::None,
        block_size: 0,
        real_block_size: 0,
    };
    ecm_header.write_to(output)?;

    let sectors_per_block = if options.seekable {
        options.sectors_per_block
    } else {
        0
    };
    let streams_raw_len = analysis.streams_toc.len() * STREAM_RECORD_SIZE;
    let streams_reserved = deflate_bound(streams_raw_len);
    let sectors_raw = serialize_runs(&analysis.sectors_toc);
    let sectors_compressed = compress_header_block(&sectors_raw)?;

    let mut sub_header = EcmSubHeader {
        optimizations: analysis.optimizations,
        sectors_per_block,
        crc_mode: 0,
        streams_toc_pos: 0,
        sectors_toc_pos: 0,
        ecm_data_pos: 0,
        title: options.metadata.title.clone(),
        id: options.metadata.id.clone(),
    };
    sub_header.streams_toc_pos = BLOCK_HEADER_SIZE + sub_header.byte_len();
    sub_header.sectors_toc_pos =
        sub_header.streams_toc_pos + MINI_TOC_HEADER_SIZE + streams_reserved as u64;
    sub_header.ecm_data_pos =
        sub_header.sectors_toc_pos + MINI_TOC_HEADER_SIZE + sectors_compressed.len() as u64;
    sub_header.write_to(output)?;

    MiniTocHeader {
        compression: CodecKind::Zlib,
        count: analysis.streams_toc.len() as u32,
        uncompressed_size: streams_raw_len as u32,
        compressed_size: 0,
    }
    .write_to(output)?;
    output
        .write_all(&vec![0u8; streams_reserved])
        .map_err(EcmError::write)?;

    MiniTocHeader {
        compression: CodecKind::Zlib,
        count: analysis.sectors_toc.len() as u32,
        uncompressed_size: sectors_raw.len() as u32,
        compressed_size: sectors_compressed.len() as u32,
    }
    .write_to(output)?;
    output.write_all(&sectors_compressed).map_err(EcmError::write)?;

    let data_start = output.stream_position().map_err(EcmError::write)?;
    if data_start != ecm_block_pos + sub_header.ecm_data_pos {
        return Err(EcmError::Processing("container layout accounting error"));
    }

    // Encode pass.
    input.seek(SeekFrom::Start(0)).map_err(EcmError::read)?;
    let codec_options = CodecOptions {
        level: options.compression_level,
        extreme: options.extreme_compression,
    };
    let mut out_buf = OutBuf::with_capacity(BUFFER_SIZE)?;
    let drain_threshold = BUFFER_SIZE - BUFFER_SIZE / 4;
    let mut raw_sector = [0u8; SECTOR_SIZE];
    let mut residue = [0u8; SECTOR_SIZE];
    let mut image_edc = 0u32;
    let mut absolute = 0u32;

    for entry in script.iter_mut() {
        let mut encoder = StreamEncoder::new(entry.stream.compression, &codec_options)?;
        for run in &entry.runs {
            for _ in 0..run.count {
                if is_cancelled(&options.cancel) {
                    return Err(EcmError::Cancelled);
                }
                input.read_exact(&mut raw_sector).map_err(EcmError::read)?;
                image_edc = edc_compute(image_edc, &raw_sector);
                let len = clean(&raw_sector, run.mode, analysis.optimizations, &mut residue);
                absolute += 1;

                let flush = if absolute == entry.stream.end_sector {
                    FlushMode::EndStream
                } else if sectors_per_block != 0 && absolute % sectors_per_block as u32 == 0 {
                    FlushMode::SyncPoint
                } else {
                    FlushMode::Continue
                };
                encoder.compress(&residue[..len], &mut out_buf, flush)?;

                if out_buf.filled().len() >= drain_threshold || flush == FlushMode::EndStream {
                    output.write_all(out_buf.filled()).map_err(EcmError::write)?;
                    out_buf.clear();
                }
            }
        }
        entry.stream.out_end_position = output.stream_position().map_err(EcmError::write)?;
        debug!(
            "stream closed at sector {} position {}",
            entry.stream.end_sector, entry.stream.out_end_position
        );
    }

    // Whole-image EDC trailer closes the ECM payload.
    output
        .write_all(&image_edc.to_le_bytes())
        .map_err(EcmError::write)?;
    let ecm_payload_end = output.stream_position().map_err(EcmError::write)?;

    let payload_size = ecm_payload_end - ecm_block_pos - BLOCK_HEADER_SIZE;
    ecm_header.block_size = payload_size;
    ecm_header.real_block_size = payload_size;
    output
        .seek(SeekFrom::Start(ecm_block_pos))
        .map_err(EcmError::write)?;
    ecm_header.write_to(output)?;

    // The stream end positions are known now; re-deflate the streams
    // mini-TOC into its reserved window.
    let final_streams: Vec<Stream> = script.iter().map(|entry| entry.stream).collect();
    let streams_compressed = compress_header_block(&serialize_streams(&final_streams))?;
    if streams_compressed.len() > streams_reserved {
        return Err(EcmError::HeaderCompression);
    }
    output
        .seek(SeekFrom::Start(ecm_block_pos + sub_header.streams_toc_pos))
        .map_err(EcmError::write)?;
    MiniTocHeader {
        compression: CodecKind::Zlib,
        count: final_streams.len() as u32,
        uncompressed_size: streams_raw_len as u32,
        compressed_size: streams_compressed.len() as u32,
    }
    .write_to(output)?;
    output.write_all(&streams_compressed).map_err(EcmError::write)?;

    // Optional metadata block and the file TOC, then point the outer
    // header at the TOC.
    output
        .seek(SeekFrom::Start(ecm_payload_end))
        .map_err(EcmError::write)?;
    let mut toc_entries = vec![TocEntry {
        block_type: BlockType::Ecm,
        start_position: ecm_block_pos,
    }];
    if !options.metadata.is_empty() {
        toc_entries.push(TocEntry {
            block_type: BlockType::Metadata,
            start_position: ecm_payload_end,
        });
        write_metadata_block(output, &options.metadata)?;
    }
    let toc_pos = output.stream_position().map_err(EcmError::write)?;
    let toc_size = toc_entries.len() as u64 * TOC_ENTRY_SIZE;
    BlockHeader {
        block_type: BlockType::Toc,
        compression: CodecKind::None,
        block_size: toc_size,
        real_block_size: toc_size,
    }
    .write_to(output)?;
    for entry in &toc_entries {
        entry.write_to(output)?;
    }
    let output_size = output.stream_position().map_err(EcmError::write)?;

    output.seek(SeekFrom::Start(4)).map_err(EcmError::write)?;
    output
        .write_all(&toc_pos.to_le_bytes())
        .map_err(EcmError::write)?;
    output
        .seek(SeekFrom::Start(output_size))
        .map_err(EcmError::write)?;
    output.flush().map_err(EcmError::write)?;

    Ok(EncodeReport {
        sector_count,
        mode_counts: analysis.mode_counts,
        optimizations: analysis.optimizations,
        output_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_input_is_rejected() {
        let mut input = Cursor::new(Vec::new());
        let mut output = Cursor::new(Vec::new());
        assert!(matches!(
            encode_image(&mut input, &mut output, &EncodeOptions::default()),
            Err(EcmError::Processing(_))
        ));
    }

    #[test]
    fn misaligned_input_is_rejected() {
        let mut input = Cursor::new(vec![0u8; 2351]);
        let mut output = Cursor::new(Vec::new());
        assert!(matches!(
            encode_image(&mut input, &mut output, &EncodeOptions::default()),
            Err(EcmError::Processing(_))
        ));
    }

    #[test]
    fn flac_for_data_streams_is_rejected() {
        let mut input = Cursor::new(vec![0u8; 2352]);
        let mut output = Cursor::new(Vec::new());
        let options = EncodeOptions {
            data_compression: CodecKind::Flac,
            ..EncodeOptions::default()
        };
        assert!(matches!(
            encode_image(&mut input, &mut output, &options),
            Err(EcmError::Processing(_))
        ));
    }

    #[test]
    fn cancellation_aborts_the_encode() {
        let cancel = Arc::new(AtomicBool::new(true));
        let mut input = Cursor::new(vec![0u8; 2352 * 4]);
        let mut output = Cursor::new(Vec::new());
        let options = EncodeOptions {
            cancel: Some(cancel),
            ..EncodeOptions::default()
        };
        assert!(matches!(
            encode_image(&mut input, &mut output, &options),
            Err(EcmError::Cancelled)
        ));
    }
}
