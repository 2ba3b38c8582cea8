//! Reading side of the container: layout parsing and a pull-style
//! sector reader.
//!
//! [`EcmImageReader`] decodes one sector at a time and doubles as an
//! [`std::io::Read`] implementation over the restored image, keeping a
//! single sector of lookahead. For whole-image restores prefer
//! [`decode_image`](crate::decode::decode_image), which drives the same
//! machinery.

use crate::cdrom::{FIRST_SECTOR_LBA, SECTOR_SIZE};
use crate::compression::{CodecKind, InBuf, StreamDecoder};
use crate::container::{
    decompress_header_block, read_outer_header, BlockHeader, BlockType, EcmSubHeader,
    MiniTocHeader, TocEntry, BLOCK_HEADER_SIZE, TOC_ENTRY_SIZE,
};
use crate::ecc::edc_compute;
use crate::encode::BUFFER_SIZE;
use crate::error::{EcmError, Result};
use crate::sector::{encoded_size, regenerate, Optimizations};
use crate::segment::{
    build_script, parse_runs, parse_streams, Run, Stream, StreamScript, SECTOR_RECORD_SIZE,
    STREAM_RECORD_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::io::{Read, Seek, SeekFrom};

pub(crate) struct ContainerLayout {
    pub sub_header: EcmSubHeader,
    pub streams_toc: Vec<Stream>,
    pub sectors_toc: Vec<Run>,
    /// Absolute offset of the ECM block header.
    pub ecm_block_pos: u64,
    /// Absolute offset of the metadata block header, if one exists.
    pub metadata_block_pos: Option<u64>,
    pub input_size: u64,
}

fn read_mini_toc_records<R: Read>(
    input: &mut R,
    record_size: usize,
    input_size: u64,
) -> Result<(u32, Vec<u8>)> {
    let header = MiniTocHeader::read_from(input)?;
    if header.uncompressed_size as u64 != header.count as u64 * record_size as u64
        || header.compressed_size as u64 > input_size
    {
        return Err(EcmError::CorruptedHeader);
    }
    let mut payload = vec![0u8; header.compressed_size as usize];
    input.read_exact(&mut payload).map_err(EcmError::read)?;
    let raw = match header.compression {
        CodecKind::None => {
            if payload.len() != header.uncompressed_size as usize {
                return Err(EcmError::CorruptedHeader);
            }
            payload
        }
        CodecKind::Zlib => decompress_header_block(&payload, header.uncompressed_size as usize)?,
        _ => return Err(EcmError::CorruptedHeader),
    };
    Ok((header.count, raw))
}

/// Read the outer header, the file TOC, the ECM block header and both
/// mini-TOCs, validating their consistency with the file size.
pub(crate) fn read_container_layout<R: Read + Seek>(input: &mut R) -> Result<ContainerLayout> {
    let input_size = input.seek(SeekFrom::End(0)).map_err(EcmError::read)?;
    input.seek(SeekFrom::Start(0)).map_err(EcmError::read)?;
    let toc_pos = read_outer_header(input)?;
    if toc_pos == 0 || toc_pos + BLOCK_HEADER_SIZE > input_size {
        return Err(EcmError::CorruptedHeader);
    }

    input.seek(SeekFrom::Start(toc_pos)).map_err(EcmError::read)?;
    let toc_header = BlockHeader::read_from(input)?;
    if toc_header.block_type != BlockType::Toc
        || toc_header.real_block_size % TOC_ENTRY_SIZE != 0
        || toc_header.block_size > input_size
    {
        return Err(EcmError::CorruptedHeader);
    }
    let raw_toc = match toc_header.compression {
        CodecKind::None => {
            let mut raw = vec![0u8; toc_header.block_size as usize];
            input.read_exact(&mut raw).map_err(EcmError::read)?;
            raw
        }
        CodecKind::Zlib => {
            let mut payload = vec![0u8; toc_header.block_size as usize];
            input.read_exact(&mut payload).map_err(EcmError::read)?;
            decompress_header_block(&payload, toc_header.real_block_size as usize)?
        }
        _ => return Err(EcmError::CorruptedHeader),
    };
    let mut toc_cursor = &raw_toc[..];
    let mut ecm_block_pos = None;
    let mut metadata_block_pos = None;
    for _ in 0..toc_header.real_block_size / TOC_ENTRY_SIZE {
        let entry = TocEntry::read_from(&mut toc_cursor)?;
        match entry.block_type {
            BlockType::Ecm => ecm_block_pos = Some(entry.start_position),
            BlockType::Metadata => metadata_block_pos = Some(entry.start_position),
            _ => {}
        }
    }
    let ecm_block_pos = ecm_block_pos.ok_or(EcmError::CorruptedHeader)?;

    input
        .seek(SeekFrom::Start(ecm_block_pos))
        .map_err(EcmError::read)?;
    let ecm_header = BlockHeader::read_from(input)?;
    if ecm_header.block_type != BlockType::Ecm
        || ecm_header.compression != CodecKind::None
        || ecm_block_pos + BLOCK_HEADER_SIZE + ecm_header.block_size > input_size
    {
        return Err(EcmError::CorruptedHeader);
    }
    let ecm_block_end = ecm_block_pos + BLOCK_HEADER_SIZE + ecm_header.block_size;

    let sub_header = EcmSubHeader::read_from(input)?;
    if sub_header.streams_toc_pos < BLOCK_HEADER_SIZE
        || sub_header.streams_toc_pos >= sub_header.sectors_toc_pos
        || sub_header.sectors_toc_pos >= sub_header.ecm_data_pos
        || ecm_block_pos + sub_header.ecm_data_pos > ecm_block_end
    {
        return Err(EcmError::CorruptedHeader);
    }

    input
        .seek(SeekFrom::Start(ecm_block_pos + sub_header.streams_toc_pos))
        .map_err(EcmError::read)?;
    let (count, raw) = read_mini_toc_records(input, STREAM_RECORD_SIZE, input_size)?;
    let streams_toc = parse_streams(&raw, count as usize)?;

    input
        .seek(SeekFrom::Start(ecm_block_pos + sub_header.sectors_toc_pos))
        .map_err(EcmError::read)?;
    let (count, raw) = read_mini_toc_records(input, SECTOR_RECORD_SIZE, input_size)?;
    let sectors_toc = parse_runs(&raw, count as usize)?;

    debug!(
        "container: {} streams, {} runs, optimizations {:?}",
        streams_toc.len(),
        sectors_toc.len(),
        sub_header.optimizations
    );

    Ok(ContainerLayout {
        sub_header,
        streams_toc,
        sectors_toc,
        ecm_block_pos,
        metadata_block_pos,
        input_size,
    })
}

/// Sequential reader over the restored image of an ECM container.
///
/// Sectors come out in image order; after the last sector the stored
/// whole-image EDC trailer is verified and a mismatch surfaces as a
/// processing error.
pub struct EcmImageReader<F: Read + Seek> {
    file: F,
    script: Vec<StreamScript>,
    optimizations: Optimizations,
    input_size: u64,
    total_sectors: u32,
    current_sector: u32,
    stream_index: usize,
    run_index: usize,
    run_remaining: u32,
    decoder: Option<StreamDecoder>,
    in_buf: InBuf,
    stream_left: u64,
    image_edc: u32,
    trailer_checked: bool,
    sector: [u8; SECTOR_SIZE],
    /// Bytes of `sector` not yet served through `Read`.
    pending: usize,
}

impl<F: Read + Seek> EcmImageReader<F> {
    pub fn new(mut file: F) -> Result<Self> {
        let layout = read_container_layout(&mut file)?;
        let script = build_script(&layout.streams_toc, &layout.sectors_toc)?;
        let total_sectors = layout
            .streams_toc
            .last()
            .map(|stream| stream.end_sector)
            .unwrap_or(0);
        file.seek(SeekFrom::Start(
            layout.ecm_block_pos + layout.sub_header.ecm_data_pos,
        ))
        .map_err(EcmError::read)?;

        Ok(EcmImageReader {
            file,
            script,
            optimizations: layout.sub_header.optimizations,
            input_size: layout.input_size,
            total_sectors,
            current_sector: 0,
            stream_index: 0,
            run_index: 0,
            run_remaining: 0,
            decoder: None,
            in_buf: InBuf::with_capacity(BUFFER_SIZE)?,
            stream_left: 0,
            image_edc: 0,
            trailer_checked: false,
            sector: [0u8; SECTOR_SIZE],
            pending: 0,
        })
    }

    /// Total number of sectors in the restored image.
    pub fn sector_count(&self) -> u32 {
        self.total_sectors
    }

    /// The optimization set the image was encoded with.
    pub fn optimizations(&self) -> Optimizations {
        self.optimizations
    }

    /// Position the cursor on the next stream and run that still has
    /// sectors to deliver.
    fn advance_cursor(&mut self) -> Result<()> {
        loop {
            if self.stream_index >= self.script.len() {
                return Err(EcmError::CorruptedStream);
            }
            if self.decoder.is_none() {
                let entry = &self.script[self.stream_index];
                let position = self.file.stream_position().map_err(EcmError::read)?;
                if entry.stream.out_end_position < position
                    || entry.stream.out_end_position > self.input_size
                {
                    return Err(EcmError::CorruptedHeader);
                }
                self.stream_left = entry.stream.out_end_position - position;
                self.in_buf.reset();
                self.decoder = Some(StreamDecoder::new(entry.stream.compression)?);
                self.run_index = 0;
                self.run_remaining = entry.runs.first().map(|run| run.count).unwrap_or(0);
            }
            if self.run_remaining > 0 {
                return Ok(());
            }
            self.run_index += 1;
            if self.run_index < self.script[self.stream_index].runs.len() {
                self.run_remaining = self.script[self.stream_index].runs[self.run_index].count;
                continue;
            }
            // Stream exhausted: skip whatever the decoder did not consume
            // (stream padding) and move on.
            self.file
                .seek(SeekFrom::Start(
                    self.script[self.stream_index].stream.out_end_position,
                ))
                .map_err(EcmError::read)?;
            self.decoder = None;
            self.stream_index += 1;
        }
    }

    /// Decode the next sector, or verify the trailer and return `None`
    /// at the end of the image.
    pub fn read_sector(&mut self) -> Result<Option<&[u8; SECTOR_SIZE]>> {
        if self.current_sector == self.total_sectors {
            if !self.trailer_checked {
                self.trailer_checked = true;
                // The final stream may not have been stepped past; the
                // trailer sits at its recorded end position.
                if let Some(last) = self.script.last() {
                    self.file
                        .seek(SeekFrom::Start(last.stream.out_end_position))
                        .map_err(EcmError::read)?;
                }
                let stored_edc = self
                    .file
                    .read_u32::<LittleEndian>()
                    .map_err(EcmError::read)?;
                if stored_edc != self.image_edc {
                    return Err(EcmError::Processing("whole-image EDC mismatch"));
                }
            }
            return Ok(None);
        }

        self.advance_cursor()?;
        let run = self.script[self.stream_index].runs[self.run_index];
        let size = encoded_size(run.mode, self.optimizations);

        if self.in_buf.remaining() < BUFFER_SIZE / 4 && self.stream_left > 0 {
            self.in_buf.refill(&mut self.file, &mut self.stream_left)?;
        }
        let decoder = self
            .decoder
            .as_mut()
            .ok_or(EcmError::Processing("decoder state lost"))?;
        let mut residue = [0u8; SECTOR_SIZE];
        decoder.decompress(&mut self.in_buf, &mut residue[..size])?;

        regenerate(
            &residue[..size],
            run.mode,
            self.current_sector + FIRST_SECTOR_LBA,
            self.optimizations,
            &mut self.sector,
        );
        self.image_edc = edc_compute(self.image_edc, &self.sector);
        self.current_sector += 1;
        self.run_remaining -= 1;
        Ok(Some(&self.sector))
    }
}

impl<F: Read + Seek> Read for EcmImageReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending == 0 {
            match self.read_sector() {
                Ok(Some(_)) => self.pending = SECTOR_SIZE,
                Ok(None) => return Ok(0),
                Err(error) => return Err(error.into()),
            }
        }
        let start = SECTOR_SIZE - self.pending;
        let take = self.pending.min(buf.len());
        buf[..take].copy_from_slice(&self.sector[start..start + take]);
        self.pending -= take;
        Ok(take)
    }
}
