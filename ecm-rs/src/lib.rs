//! Implementation of the ECM v3 disc image format.
//!
//! ECM v3 stores a raw 2352-byte-per-sector CD-ROM image in a compact
//! container. Each sector is classified by its encoding mode; bytes that
//! can be regenerated algorithmically (sync pattern, address stamp, EDC,
//! ECC parity, gap fill) are stripped, and the remaining residue is
//! grouped into audio and data streams, each fed through a general-purpose
//! compressor. Decoding reverses the transform byte-for-byte and verifies
//! a whole-image CRC trailer.
//!
//! ## Usage
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufWriter;
//!
//! let mut image = File::open("game.bin")?;
//! let mut container = File::create("game.bin.ecm2")?;
//! let options = ecm::EncodeOptions {
//!     data_compression: ecm::CodecKind::Lzma,
//!     audio_compression: ecm::CodecKind::Flac,
//!     ..Default::default()
//! };
//! let report = ecm::encode_image(&mut image, &mut container, &options)?;
//! println!("{} sectors stored", report.sector_count);
//!
//! let mut container = File::open("game.bin.ecm2")?;
//! let mut restored = BufWriter::new(File::create("game.bin")?);
//! ecm::decode_image(&mut container, &mut restored, &Default::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compression;
pub mod container;
pub mod decode;
pub mod encode;
pub mod error;
pub mod metadata;
pub mod read;
pub mod sector;
pub mod segment;

mod cdrom;
mod ecc;

pub use crate::cdrom::SECTOR_SIZE;
pub use crate::compression::CodecKind;
pub use crate::decode::{decode_image, DecodeOptions, DecodeReport};
pub use crate::encode::{encode_image, EncodeOptions, EncodeReport};
pub use crate::error::{EcmError, Result};
pub use crate::metadata::{read_metadata, FileMetadata};
pub use crate::read::EcmImageReader;
pub use crate::sector::{Optimizations, SectorMode, StreamFamily};
