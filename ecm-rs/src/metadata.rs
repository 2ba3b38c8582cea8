//! Optional descriptive metadata carried in a METADATA block.
//!
//! The block payload is a sequence of typed text entries, each framed as
//! `{u8 tag, u32 length, bytes}`, deflated as a whole. Unknown tags are
//! skipped on read so future fields do not break older readers.

use crate::compression::CodecKind;
use crate::container::{compress_header_block, decompress_header_block, BlockHeader, BlockType};
use crate::error::{EcmError, Result};
use crate::read::read_container_layout;
use log::debug;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{Read, Seek, SeekFrom};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
enum MetadataTag {
    Cover = 0,
    Title,
    Id,
    ReleaseDate,
    Developer,
    Publisher,
    Genre,
}

/// Descriptive metadata of the stored image. Every field is optional;
/// empty fields are not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub title: String,
    pub id: String,
    pub release_date: String,
    pub developer: String,
    pub publisher: String,
    pub genre: String,
}

impl FileMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.id.is_empty()
            && self.release_date.is_empty()
            && self.developer.is_empty()
            && self.publisher.is_empty()
            && self.genre.is_empty()
    }

    fn entries(&self) -> [(MetadataTag, &str); 6] {
        [
            (MetadataTag::Title, &self.title),
            (MetadataTag::Id, &self.id),
            (MetadataTag::ReleaseDate, &self.release_date),
            (MetadataTag::Developer, &self.developer),
            (MetadataTag::Publisher, &self.publisher),
            (MetadataTag::Genre, &self.genre),
        ]
    }

    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, text) in self.entries() {
            if text.is_empty() {
                continue;
            }
            out.push(tag as u8);
            out.extend_from_slice(&(text.len() as u32).to_le_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        out
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut metadata = FileMetadata::default();
        let mut pos = 0;
        while pos < data.len() {
            if data.len() - pos < 5 {
                return Err(EcmError::CorruptedHeader);
            }
            let tag = data[pos];
            let length = u32::from_le_bytes([
                data[pos + 1],
                data[pos + 2],
                data[pos + 3],
                data[pos + 4],
            ]) as usize;
            pos += 5;
            if data.len() - pos < length {
                return Err(EcmError::CorruptedHeader);
            }
            let text = &data[pos..pos + length];
            pos += length;

            let Some(tag) = MetadataTag::from_u8(tag) else {
                continue;
            };
            let field = match tag {
                // Cover images are binary and not represented here.
                MetadataTag::Cover => continue,
                MetadataTag::Title => &mut metadata.title,
                MetadataTag::Id => &mut metadata.id,
                MetadataTag::ReleaseDate => &mut metadata.release_date,
                MetadataTag::Developer => &mut metadata.developer,
                MetadataTag::Publisher => &mut metadata.publisher,
                MetadataTag::Genre => &mut metadata.genre,
            };
            *field = String::from_utf8(text.to_vec()).map_err(|_| EcmError::CorruptedHeader)?;
        }
        Ok(metadata)
    }
}

/// Write a METADATA block at the current output position.
pub(crate) fn write_metadata_block<W: std::io::Write>(
    output: &mut W,
    metadata: &FileMetadata,
) -> Result<()> {
    let raw = metadata.serialize();
    let compressed = compress_header_block(&raw)?;
    BlockHeader {
        block_type: BlockType::Metadata,
        compression: CodecKind::Zlib,
        block_size: compressed.len() as u64,
        real_block_size: raw.len() as u64,
    }
    .write_to(output)?;
    output.write_all(&compressed).map_err(EcmError::write)
}

/// Load the metadata stored in a container, if any.
pub fn read_metadata<R: Read + Seek>(input: &mut R) -> Result<Option<FileMetadata>> {
    let layout = read_container_layout(input)?;
    let Some(block_pos) = layout.metadata_block_pos else {
        return Ok(None);
    };
    if block_pos >= layout.input_size {
        return Err(EcmError::CorruptedHeader);
    }

    input
        .seek(SeekFrom::Start(block_pos))
        .map_err(EcmError::read)?;
    let header = BlockHeader::read_from(input)?;
    if header.block_type != BlockType::Metadata || header.block_size > layout.input_size {
        return Err(EcmError::CorruptedHeader);
    }
    let mut payload = vec![0u8; header.block_size as usize];
    input.read_exact(&mut payload).map_err(EcmError::read)?;
    let raw = match header.compression {
        CodecKind::None => payload,
        CodecKind::Zlib => decompress_header_block(&payload, header.real_block_size as usize)?,
        _ => return Err(EcmError::CorruptedHeader),
    };

    debug!("metadata block: {} bytes", raw.len());
    Ok(Some(FileMetadata::parse(&raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileMetadata {
        FileMetadata {
            title: "Example Disc".to_string(),
            id: "SLES-12345".to_string(),
            release_date: "1999-03-04".to_string(),
            developer: String::new(),
            publisher: "Example Soft".to_string(),
            genre: "RPG".to_string(),
        }
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let metadata = sample();
        let parsed = FileMetadata::parse(&metadata.serialize()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn empty_fields_are_not_persisted() {
        let metadata = sample();
        let raw = metadata.serialize();
        // developer is empty and contributes no entry
        let tags: Vec<u8> = {
            let mut tags = Vec::new();
            let mut pos = 0;
            while pos < raw.len() {
                tags.push(raw[pos]);
                let length = u32::from_le_bytes([
                    raw[pos + 1],
                    raw[pos + 2],
                    raw[pos + 3],
                    raw[pos + 4],
                ]) as usize;
                pos += 5 + length;
            }
            tags
        };
        assert!(!tags.contains(&(MetadataTag::Developer as u8)));
        assert_eq!(tags.len(), 5);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut raw = sample().serialize();
        raw.push(0x7f);
        raw.extend_from_slice(&3u32.to_le_bytes());
        raw.extend_from_slice(b"xyz");
        let parsed = FileMetadata::parse(&raw).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn truncated_entries_are_rejected() {
        let mut raw = sample().serialize();
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            FileMetadata::parse(&raw),
            Err(EcmError::CorruptedHeader)
        ));
    }
}
