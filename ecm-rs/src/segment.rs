//! Run-length segmentation of a disc image into sector runs and
//! compression streams, and the packed TOC records both are persisted as.

use crate::cdrom::{msf_from_sector, FIRST_SECTOR_LBA, MSF_OFFSET, SECTOR_SIZE};
use crate::compression::CodecKind;
use crate::error::{EcmError, Result};
use crate::sector::{classify, Optimizations, SectorMode, StreamFamily};
use log::{debug, warn};
use num_traits::FromPrimitive;
use std::io::Read;

/// A maximal run of adjacent sectors sharing one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub mode: SectorMode,
    pub count: u32,
}

/// A maximal sequence of runs sharing one stream family; the unit of
/// compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    pub family: StreamFamily,
    pub compression: CodecKind,
    /// Cumulative sector count at the end of this stream.
    pub end_sector: u32,
    /// Absolute container offset where this stream's payload ends.
    pub out_end_position: u64,
}

/// On-disk size of one packed stream record.
pub(crate) const STREAM_RECORD_SIZE: usize = 13;
/// On-disk size of one packed sector-run record.
pub(crate) const SECTOR_RECORD_SIZE: usize = 5;

impl Stream {
    pub(crate) fn write_record(&self, out: &mut Vec<u8>) {
        out.push((self.family as u8) | ((self.compression as u8) << 1));
        out.extend_from_slice(&self.end_sector.to_le_bytes());
        out.extend_from_slice(&self.out_end_position.to_le_bytes());
    }

    pub(crate) fn read_record(record: &[u8]) -> Result<Stream> {
        let packed = record[0];
        let family = if packed & 0x01 == 0 {
            StreamFamily::Audio
        } else {
            StreamFamily::Data
        };
        let compression =
            CodecKind::from_u8((packed >> 1) & 0x07).ok_or(EcmError::CorruptedHeader)?;
        Ok(Stream {
            family,
            compression,
            end_sector: u32::from_le_bytes([record[1], record[2], record[3], record[4]]),
            out_end_position: u64::from_le_bytes([
                record[5], record[6], record[7], record[8], record[9], record[10], record[11],
                record[12],
            ]),
        })
    }
}

impl Run {
    pub(crate) fn write_record(&self, out: &mut Vec<u8>) {
        out.push((self.mode as u8) & 0x0f);
        out.extend_from_slice(&self.count.to_le_bytes());
    }

    pub(crate) fn read_record(record: &[u8]) -> Result<Run> {
        let mode = SectorMode::from_u8(record[0] & 0x0f).ok_or(EcmError::CorruptedHeader)?;
        Ok(Run {
            mode,
            count: u32::from_le_bytes([record[1], record[2], record[3], record[4]]),
        })
    }
}

pub(crate) fn serialize_streams(streams: &[Stream]) -> Vec<u8> {
    let mut out = Vec::with_capacity(streams.len() * STREAM_RECORD_SIZE);
    for stream in streams {
        stream.write_record(&mut out);
    }
    out
}

pub(crate) fn parse_streams(data: &[u8], count: usize) -> Result<Vec<Stream>> {
    if data.len() != count * STREAM_RECORD_SIZE {
        return Err(EcmError::CorruptedHeader);
    }
    data.chunks_exact(STREAM_RECORD_SIZE)
        .map(Stream::read_record)
        .collect()
}

pub(crate) fn serialize_runs(runs: &[Run]) -> Vec<u8> {
    let mut out = Vec::with_capacity(runs.len() * SECTOR_RECORD_SIZE);
    for run in runs {
        run.write_record(&mut out);
    }
    out
}

pub(crate) fn parse_runs(data: &[u8], count: usize) -> Result<Vec<Run>> {
    if data.len() != count * SECTOR_RECORD_SIZE {
        return Err(EcmError::CorruptedHeader);
    }
    data.chunks_exact(SECTOR_RECORD_SIZE)
        .map(Run::read_record)
        .collect()
}

/// Result of the analyze pass over a source image.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub sectors_toc: Vec<Run>,
    pub streams_toc: Vec<Stream>,
    pub sector_count: u32,
    /// Requested optimizations minus the ones whose lossless precondition
    /// failed somewhere in the image.
    pub optimizations: Optimizations,
    /// Sectors seen per mode, indexed by the mode discriminant.
    pub mode_counts: [u32; 11],
}

/// Walk every sector of `input`, classifying and run-length grouping.
///
/// Each stream inherits the caller-supplied codec matching its family.
/// `REMOVE_MSF` is cleared when any data sector's address stamp disagrees
/// with its position, and `REMOVE_REDUNDANT_FLAG` when any XA sector's
/// sub-header copies differ.
pub fn analyze<R: Read>(
    input: &mut R,
    sector_count: u32,
    data_compression: CodecKind,
    audio_compression: CodecKind,
    requested: Optimizations,
) -> Result<Analysis> {
    let mut optimizations = requested;
    let mut sectors_toc: Vec<Run> = Vec::new();
    let mut streams_toc: Vec<Stream> = Vec::new();
    let mut mode_counts = [0u32; 11];
    let mut sector = [0u8; SECTOR_SIZE];

    for index in 0..sector_count {
        input.read_exact(&mut sector).map_err(EcmError::read)?;
        let mode = classify(&sector);
        mode_counts[mode as usize] += 1;

        if mode.has_address()
            && optimizations.contains(Optimizations::REMOVE_MSF)
            && sector[MSF_OFFSET..MSF_OFFSET + 3] != msf_from_sector(FIRST_SECTOR_LBA + index)
        {
            warn!(
                "sector {} carries a non-canonical address stamp; keeping address bytes",
                index
            );
            optimizations.remove(Optimizations::REMOVE_MSF);
        }
        if mode.has_xa_subheader()
            && optimizations.contains(Optimizations::REMOVE_REDUNDANT_FLAG)
            && sector[0x010..0x014] != sector[0x014..0x018]
        {
            warn!(
                "sector {} carries mismatched sub-header copies; keeping both",
                index
            );
            optimizations.remove(Optimizations::REMOVE_REDUNDANT_FLAG);
        }

        match sectors_toc.last_mut() {
            Some(run) if run.mode == mode && run.count < u32::MAX => run.count += 1,
            _ => {
                let family = mode.family();
                let start_new_stream = match streams_toc.last() {
                    Some(stream) => stream.family != family,
                    None => true,
                };
                if start_new_stream {
                    if let Some(previous) = streams_toc.last_mut() {
                        previous.end_sector = index;
                    }
                    let compression = match family {
                        StreamFamily::Audio => audio_compression,
                        StreamFamily::Data => data_compression,
                    };
                    streams_toc.push(Stream {
                        family,
                        compression,
                        end_sector: 0,
                        out_end_position: 0,
                    });
                }
                sectors_toc.push(Run { mode, count: 1 });
            }
        }
    }

    if let Some(last) = streams_toc.last_mut() {
        last.end_sector = sector_count;
    }

    debug!(
        "analyzed {} sectors into {} runs and {} streams",
        sector_count,
        sectors_toc.len(),
        streams_toc.len()
    );

    Ok(Analysis {
        sectors_toc,
        streams_toc,
        sector_count,
        optimizations,
        mode_counts,
    })
}

/// A stream together with the ordered runs it encodes.
#[derive(Debug, Clone)]
pub struct StreamScript {
    pub stream: Stream,
    pub runs: Vec<Run>,
}

/// Rebuild the per-stream run script from the two persisted TOCs by
/// absorbing runs until each stream's cumulative sector count is reached.
pub fn build_script(streams_toc: &[Stream], sectors_toc: &[Run]) -> Result<Vec<StreamScript>> {
    let mut script = Vec::with_capacity(streams_toc.len());
    let mut covered: u64 = 0;
    let mut next_run = 0;

    for &stream in streams_toc {
        let mut runs = Vec::new();
        while covered < stream.end_sector as u64 {
            let run = *sectors_toc
                .get(next_run)
                .ok_or(EcmError::CorruptedStream)?;
            covered += run.count as u64;
            runs.push(run);
            next_run += 1;
        }
        if covered > stream.end_sector as u64 {
            return Err(EcmError::CorruptedStream);
        }
        script.push(StreamScript { stream, runs });
    }

    if next_run != sectors_toc.len() {
        return Err(EcmError::CorruptedStream);
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::regenerate;
    use std::io::Cursor;

    fn sector_of(mode: SectorMode, lba: u32, payload: &[u8]) -> [u8; SECTOR_SIZE] {
        let mut out = [0u8; SECTOR_SIZE];
        regenerate(payload, mode, lba, Optimizations::all(), &mut out);
        out
    }

    fn image(modes: &[SectorMode]) -> Vec<u8> {
        let mut image = Vec::with_capacity(modes.len() * SECTOR_SIZE);
        for (index, &mode) in modes.iter().enumerate() {
            let lba = FIRST_SECTOR_LBA + index as u32;
            let sector = match mode {
                SectorMode::Cdda => {
                    let mut raw = [0x11u8; SECTOR_SIZE];
                    raw[0] = 0x01;
                    raw
                }
                SectorMode::CddaGap => [0u8; SECTOR_SIZE],
                SectorMode::Mode1 => sector_of(mode, lba, &[0x42; 0x800]),
                SectorMode::Mode1Gap => sector_of(mode, lba, &[]),
                SectorMode::Mode2Form1 => {
                    let mut payload = vec![0, 0, 8, 0];
                    payload.extend_from_slice(&[0x24; 0x800]);
                    sector_of(mode, lba, &payload)
                }
                other => panic!("unsupported test mode {:?}", other),
            };
            image.extend_from_slice(&sector);
        }
        image
    }

    #[test]
    fn record_roundtrip() {
        let stream = Stream {
            family: StreamFamily::Data,
            compression: CodecKind::Lzma,
            end_sector: 123_456,
            out_end_position: 0x1_2345_6789,
        };
        let mut bytes = Vec::new();
        stream.write_record(&mut bytes);
        assert_eq!(bytes.len(), STREAM_RECORD_SIZE);
        assert_eq!(Stream::read_record(&bytes).unwrap(), stream);

        let run = Run {
            mode: SectorMode::Mode2Form2Gap,
            count: 42,
        };
        let mut bytes = Vec::new();
        run.write_record(&mut bytes);
        assert_eq!(bytes.len(), SECTOR_RECORD_SIZE);
        assert_eq!(Run::read_record(&bytes).unwrap(), run);
    }

    #[test]
    fn invalid_mode_nibble_is_rejected() {
        let record = [0x0f, 1, 0, 0, 0];
        assert!(matches!(
            Run::read_record(&record),
            Err(EcmError::CorruptedHeader)
        ));
    }

    #[test]
    fn analyze_groups_runs_and_streams() {
        let mut modes = vec![SectorMode::Mode2Form1; 75];
        modes.extend(vec![SectorMode::Cdda; 75]);
        let image = image(&modes);

        let analysis = analyze(
            &mut Cursor::new(&image),
            150,
            CodecKind::Zlib,
            CodecKind::Flac,
            Optimizations::all(),
        )
        .unwrap();

        assert_eq!(
            analysis.sectors_toc,
            vec![
                Run {
                    mode: SectorMode::Mode2Form1,
                    count: 75
                },
                Run {
                    mode: SectorMode::Cdda,
                    count: 75
                },
            ]
        );
        assert_eq!(analysis.streams_toc.len(), 2);
        assert_eq!(analysis.streams_toc[0].family, StreamFamily::Data);
        assert_eq!(analysis.streams_toc[0].compression, CodecKind::Zlib);
        assert_eq!(analysis.streams_toc[0].end_sector, 75);
        assert_eq!(analysis.streams_toc[1].family, StreamFamily::Audio);
        assert_eq!(analysis.streams_toc[1].compression, CodecKind::Flac);
        assert_eq!(analysis.streams_toc[1].end_sector, 150);

        // Run counts must cover the image exactly.
        let total: u64 = analysis.sectors_toc.iter().map(|r| r.count as u64).sum();
        assert_eq!(total, 150);
        assert_eq!(analysis.optimizations, Optimizations::all());
    }

    #[test]
    fn analyze_detects_tampered_address() {
        // A valid sector regenerated for sector number 151, placed at
        // index 0: internally consistent, stamped one frame off.
        let sector = sector_of(SectorMode::Mode1, FIRST_SECTOR_LBA + 1, &[0x37; 0x800]);
        let analysis = analyze(
            &mut Cursor::new(&sector[..]),
            1,
            CodecKind::None,
            CodecKind::None,
            Optimizations::all(),
        )
        .unwrap();
        assert!(!analysis
            .optimizations
            .contains(Optimizations::REMOVE_MSF));
        assert!(analysis
            .optimizations
            .contains(Optimizations::REMOVE_SYNC));
    }

    #[test]
    fn analyze_detects_mismatched_subheader() {
        let lba = FIRST_SECTOR_LBA;
        let mut payload = vec![0, 0, 8, 0];
        payload.extend_from_slice(&[0x24; 0x800]);
        let mut sector = sector_of(SectorMode::Mode2Form1, lba, &payload);
        // Distinct but self-consistent copies: rebuild without the echo so
        // both halves are stored, then alter the second copy.
        let mut residue = [0u8; SECTOR_SIZE];
        let opts = Optimizations::all() - Optimizations::REMOVE_REDUNDANT_FLAG;
        let len = crate::sector::clean(&sector, SectorMode::Mode2Form1, opts, &mut residue);
        let mut residue = residue[..len].to_vec();
        residue[7] = 0x01; // second sub-header copy, file number byte
        regenerate(&residue, SectorMode::Mode2Form1, lba, opts, &mut sector);

        let analysis = analyze(
            &mut Cursor::new(&sector[..]),
            1,
            CodecKind::None,
            CodecKind::None,
            Optimizations::all(),
        )
        .unwrap();
        assert!(!analysis
            .optimizations
            .contains(Optimizations::REMOVE_REDUNDANT_FLAG));
    }

    #[test]
    fn script_reconstruction() {
        let streams = vec![
            Stream {
                family: StreamFamily::Data,
                compression: CodecKind::Zlib,
                end_sector: 10,
                out_end_position: 0,
            },
            Stream {
                family: StreamFamily::Audio,
                compression: CodecKind::Flac,
                end_sector: 30,
                out_end_position: 0,
            },
        ];
        let runs = vec![
            Run {
                mode: SectorMode::Mode1,
                count: 10,
            },
            Run {
                mode: SectorMode::Cdda,
                count: 15,
            },
            Run {
                mode: SectorMode::CddaGap,
                count: 5,
            },
        ];
        let script = build_script(&streams, &runs).unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[0].runs, vec![runs[0]]);
        assert_eq!(script[1].runs, vec![runs[1], runs[2]]);
    }

    #[test]
    fn script_overshoot_is_corrupted_stream() {
        let streams = vec![Stream {
            family: StreamFamily::Data,
            compression: CodecKind::None,
            end_sector: 10,
            out_end_position: 0,
        }];
        let runs = vec![Run {
            mode: SectorMode::Mode1,
            count: 11,
        }];
        assert!(matches!(
            build_script(&streams, &runs),
            Err(EcmError::CorruptedStream)
        ));

        // Runs that run dry before the boundary are equally corrupt.
        let runs = vec![Run {
            mode: SectorMode::Mode1,
            count: 9,
        }];
        assert!(matches!(
            build_script(&streams, &runs),
            Err(EcmError::CorruptedStream)
        ));
    }
}
