//! ECM v3 container framing: the outer header, typed blocks, the file TOC
//! and the ECM sub-header with its two compressed mini-TOCs.
//!
//! Every multi-byte integer is little-endian, written field by field; the
//! in-memory types make no layout promises.

use crate::compression::CodecKind;
use crate::error::{EcmError, Result};
use crate::sector::Optimizations;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use std::io::{Read, Write};

/// File magic, followed by the one-byte version.
pub const ECM_MAGIC: [u8; 3] = *b"ECM";
/// Container version implemented by this crate.
pub const ECM_VERSION: u8 = 3;

/// Outer header: magic, version and the file TOC position.
pub(crate) const OUTER_HEADER_SIZE: u64 = 12;
/// Framing in front of every block payload.
pub(crate) const BLOCK_HEADER_SIZE: u64 = 18;
/// One entry of the file TOC payload.
pub(crate) const TOC_ENTRY_SIZE: u64 = 9;
/// Framing in front of each mini-TOC payload.
pub(crate) const MINI_TOC_HEADER_SIZE: u64 = 13;

/// Typed blocks a container may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum BlockType {
    Deleted = 0,
    Metadata,
    Toc,
    Ecm,
    File,
}

/// Framing common to every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: BlockType,
    /// Compression of the payload as stored.
    pub compression: CodecKind,
    /// On-disk payload size.
    pub block_size: u64,
    /// Payload size after decompression.
    pub real_block_size: u64,
}

impl BlockHeader {
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.block_type as u8).map_err(EcmError::write)?;
        writer.write_u8(self.compression as u8).map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.block_size)
            .map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.real_block_size)
            .map_err(EcmError::write)
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let block_type =
            BlockType::from_u8(reader.read_u8().map_err(EcmError::read)?)
                .ok_or(EcmError::CorruptedHeader)?;
        let compression =
            CodecKind::from_u8(reader.read_u8().map_err(EcmError::read)?)
                .ok_or(EcmError::CorruptedHeader)?;
        let block_size = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        let real_block_size = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        Ok(BlockHeader {
            block_type,
            compression,
            block_size,
            real_block_size,
        })
    }
}

/// One entry of the file TOC block, pointing at a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub block_type: BlockType,
    pub start_position: u64,
}

impl TocEntry {
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.block_type as u8).map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.start_position)
            .map_err(EcmError::write)
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let block_type =
            BlockType::from_u8(reader.read_u8().map_err(EcmError::read)?)
                .ok_or(EcmError::CorruptedHeader)?;
        let start_position = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        Ok(TocEntry {
            block_type,
            start_position,
        })
    }
}

pub(crate) fn write_outer_header<W: Write>(writer: &mut W, toc_position: u64) -> Result<()> {
    writer.write_all(&ECM_MAGIC).map_err(EcmError::write)?;
    writer.write_u8(ECM_VERSION).map_err(EcmError::write)?;
    writer
        .write_u64::<LittleEndian>(toc_position)
        .map_err(EcmError::write)
}

/// Read and validate the outer header, returning the file TOC position.
pub(crate) fn read_outer_header<R: Read>(reader: &mut R) -> Result<u64> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(EcmError::read)?;
    if magic[..3] != ECM_MAGIC || magic[3] != ECM_VERSION {
        return Err(EcmError::CorruptedHeader);
    }
    reader.read_u64::<LittleEndian>().map_err(EcmError::read)
}

/// Leading fields of the ECM block payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmSubHeader {
    /// Optimization set actually applied to the whole image.
    pub optimizations: Optimizations,
    /// Sectors per decoder restart block; 0 when the file is not seekable.
    pub sectors_per_block: u8,
    /// Reserved; written as zero, ignored on read.
    pub crc_mode: u64,
    /// Positions relative to the first byte of the ECM block header.
    pub streams_toc_pos: u64,
    pub sectors_toc_pos: u64,
    pub ecm_data_pos: u64,
    pub title: String,
    pub id: String,
}

impl EcmSubHeader {
    pub(crate) fn byte_len(&self) -> u64 {
        36 + self.title.len() as u64 + self.id.len() as u64
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_u8(self.optimizations.bits())
            .map_err(EcmError::write)?;
        writer.write_u8(self.sectors_per_block).map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.crc_mode)
            .map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.streams_toc_pos)
            .map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.sectors_toc_pos)
            .map_err(EcmError::write)?;
        writer
            .write_u64::<LittleEndian>(self.ecm_data_pos)
            .map_err(EcmError::write)?;
        writer.write_u8(self.title.len() as u8).map_err(EcmError::write)?;
        writer.write_u8(self.id.len() as u8).map_err(EcmError::write)?;
        writer.write_all(self.title.as_bytes()).map_err(EcmError::write)?;
        writer.write_all(self.id.as_bytes()).map_err(EcmError::write)
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let optimizations =
            Optimizations::from_bits(reader.read_u8().map_err(EcmError::read)?)
                .ok_or(EcmError::CorruptedHeader)?;
        let sectors_per_block = reader.read_u8().map_err(EcmError::read)?;
        let crc_mode = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        let streams_toc_pos = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        let sectors_toc_pos = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        let ecm_data_pos = reader.read_u64::<LittleEndian>().map_err(EcmError::read)?;
        let title_length = reader.read_u8().map_err(EcmError::read)? as usize;
        let id_length = reader.read_u8().map_err(EcmError::read)? as usize;
        let mut text = vec![0u8; title_length + id_length];
        reader.read_exact(&mut text).map_err(EcmError::read)?;
        let id = String::from_utf8(text.split_off(title_length))
            .map_err(|_| EcmError::CorruptedHeader)?;
        let title = String::from_utf8(text).map_err(|_| EcmError::CorruptedHeader)?;
        Ok(EcmSubHeader {
            optimizations,
            sectors_per_block,
            crc_mode,
            streams_toc_pos,
            sectors_toc_pos,
            ecm_data_pos,
            title,
            id,
        })
    }
}

/// Framing of one compressed mini-TOC (streams or sector runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MiniTocHeader {
    pub compression: CodecKind,
    pub count: u32,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

impl MiniTocHeader {
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.compression as u8).map_err(EcmError::write)?;
        writer
            .write_u32::<LittleEndian>(self.count)
            .map_err(EcmError::write)?;
        writer
            .write_u32::<LittleEndian>(self.uncompressed_size)
            .map_err(EcmError::write)?;
        writer
            .write_u32::<LittleEndian>(self.compressed_size)
            .map_err(EcmError::write)
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let compression =
            CodecKind::from_u8(reader.read_u8().map_err(EcmError::read)?)
                .ok_or(EcmError::CorruptedHeader)?;
        let count = reader.read_u32::<LittleEndian>().map_err(EcmError::read)?;
        let uncompressed_size = reader.read_u32::<LittleEndian>().map_err(EcmError::read)?;
        let compressed_size = reader.read_u32::<LittleEndian>().map_err(EcmError::read)?;
        Ok(MiniTocHeader {
            compression,
            count,
            uncompressed_size,
            compressed_size,
        })
    }
}

/// Deflate a mini-TOC payload at level 9, zlib-wrapped.
pub(crate) fn compress_header_block(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(9));
    encoder
        .write_all(data)
        .map_err(|_| EcmError::HeaderCompression)?;
    encoder.finish().map_err(|_| EcmError::HeaderCompression)
}

/// Inflate a mini-TOC payload to its known decompressed size.
pub(crate) fn decompress_header_block(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; expected_len];
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    decoder
        .read_exact(&mut out)
        .map_err(|_| EcmError::HeaderCompression)?;
    // The payload must end exactly where the record array does.
    let mut overrun = [0u8; 1];
    match decoder.read(&mut overrun) {
        Ok(0) => Ok(out),
        _ => Err(EcmError::HeaderCompression),
    }
}

/// Worst-case deflated size for `len` input bytes (zlib's deflateBound
/// with the 6-byte zlib wrapper).
pub(crate) fn deflate_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13 + 6
}
