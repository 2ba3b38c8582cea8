//! Sector codec: classification of raw 2352-byte sectors and the
//! clean/regenerate transforms that strip and restore the recoverable
//! byte ranges of each mode.
//!
//! Data sector layout (byte offsets):
//!
//! ```text
//! 0x000..0x00C  sync pattern           00 FF*10 00
//! 0x00C..0x00F  address                minutes:seconds:frames, BCD
//! 0x00F..0x010  mode byte              01 or 02
//! mode 1:       data 0x010..0x810, EDC 0x810, blanks 0x814, ECC 0x81C..0x930
//! mode 2:       data 0x010..0x930
//! XA form 1:    sub-header 0x010 (x2), data 0x018..0x818, EDC 0x818, ECC 0x81C
//! XA form 2:    sub-header 0x010 (x2), data 0x018..0x92C, EDC 0x92C
//! ```

use crate::cdrom::{msf_from_sector, MODE_OFFSET, MSF_OFFSET, SECTOR_SIZE, SYNC_HEADER};
use crate::ecc::{ecc_check_sector, ecc_generate_sector, edc_compute};
use bitflags::bitflags;
use num_derive::FromPrimitive;

/// Classification of a raw 2352-byte sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum SectorMode {
    /// Sync pattern present but the sector structure is not recognized.
    /// Stored verbatim.
    Unknown = 0,
    /// Audio sector, raw PCM.
    Cdda,
    /// Audio sector, all zero.
    CddaGap,
    /// Mode 1 data sector.
    Mode1,
    /// Mode 1 data sector with zeroed user data.
    Mode1Gap,
    /// Mode 2 sector without XA structure.
    Mode2,
    /// Mode 2 sector without XA structure, zeroed user data.
    Mode2Gap,
    /// Mode 2 XA form 1 sector.
    Mode2Form1,
    /// Mode 2 XA form 1 sector with zeroed user data.
    Mode2Form1Gap,
    /// Mode 2 XA form 2 sector.
    Mode2Form2,
    /// Mode 2 XA form 2 sector with zeroed user data.
    Mode2Form2Gap,
}

/// Compression family of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamFamily {
    Audio = 0,
    Data = 1,
}

impl SectorMode {
    /// The stream family sectors of this mode belong to.
    pub fn family(self) -> StreamFamily {
        match self {
            SectorMode::Cdda | SectorMode::CddaGap => StreamFamily::Audio,
            _ => StreamFamily::Data,
        }
    }

    /// Whether the mode carries a sync header and address stamp.
    pub(crate) fn has_address(self) -> bool {
        !matches!(
            self,
            SectorMode::Unknown | SectorMode::Cdda | SectorMode::CddaGap
        )
    }

    /// Whether the mode carries the doubled XA sub-header.
    pub(crate) fn has_xa_subheader(self) -> bool {
        matches!(
            self,
            SectorMode::Mode2Form1
                | SectorMode::Mode2Form1Gap
                | SectorMode::Mode2Form2
                | SectorMode::Mode2Form2Gap
        )
    }
}

bitflags! {
    /// Byte ranges the encoder may strip because they can be regenerated.
    ///
    /// A flag applies to the whole image; the analyzer clears `REMOVE_MSF`
    /// and `REMOVE_REDUNDANT_FLAG` when any sector fails their lossless
    /// precondition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Optimizations: u8 {
        const REMOVE_SYNC = 0x01;
        const REMOVE_MSF = 0x02;
        const REMOVE_MODE = 0x04;
        const REMOVE_BLANKS = 0x08;
        const REMOVE_REDUNDANT_FLAG = 0x10;
        const REMOVE_ECC = 0x20;
        const REMOVE_EDC = 0x40;
        const REMOVE_GAP = 0x80;
    }
}

/// How a stripped segment is reconstructed on regeneration.
#[derive(Clone, Copy)]
enum Regen {
    /// Always kept, never synthesized.
    Keep,
    Sync,
    Msf,
    ModeByte(u8),
    /// Echo of the first XA sub-header copy.
    SubHeaderEcho,
    Zero,
    /// EDC over `start..end`, stored at `slot`.
    Edc {
        start: usize,
        end: usize,
        slot: usize,
    },
    Ecc {
        zero_address: bool,
    },
}

#[derive(Clone, Copy)]
struct Segment {
    start: usize,
    end: usize,
    removed_by: Option<Optimizations>,
    regen: Regen,
}

impl Segment {
    const fn kept(start: usize, end: usize) -> Self {
        Segment {
            start,
            end,
            removed_by: None,
            regen: Regen::Keep,
        }
    }

    const fn removable(start: usize, end: usize, flag: Optimizations, regen: Regen) -> Self {
        Segment {
            start,
            end,
            removed_by: Some(flag),
            regen,
        }
    }

    fn is_kept(&self, opts: Optimizations) -> bool {
        match self.removed_by {
            Some(flag) => !opts.contains(flag),
            None => true,
        }
    }

    fn len(&self) -> usize {
        self.end - self.start
    }
}

const SYNC_SEG: Segment = Segment::removable(0x000, 0x00c, Optimizations::REMOVE_SYNC, Regen::Sync);
const MSF_SEG: Segment = Segment::removable(0x00c, 0x00f, Optimizations::REMOVE_MSF, Regen::Msf);
const MODE1_BYTE_SEG: Segment =
    Segment::removable(0x00f, 0x010, Optimizations::REMOVE_MODE, Regen::ModeByte(0x01));
const MODE2_BYTE_SEG: Segment =
    Segment::removable(0x00f, 0x010, Optimizations::REMOVE_MODE, Regen::ModeByte(0x02));
const XA_FLAGS_SEG: Segment = Segment::kept(0x010, 0x014);
const XA_FLAGS_COPY_SEG: Segment = Segment::removable(
    0x014,
    0x018,
    Optimizations::REMOVE_REDUNDANT_FLAG,
    Regen::SubHeaderEcho,
);

const MODE1_EDC_SEG: Segment = Segment::removable(
    0x810,
    0x814,
    Optimizations::REMOVE_EDC,
    Regen::Edc {
        start: 0x000,
        end: 0x810,
        slot: 0x810,
    },
);
const MODE1_BLANKS_SEG: Segment =
    Segment::removable(0x814, 0x81c, Optimizations::REMOVE_BLANKS, Regen::Zero);
const MODE1_ECC_SEG: Segment = Segment::removable(
    0x81c,
    0x930,
    Optimizations::REMOVE_ECC,
    Regen::Ecc {
        zero_address: false,
    },
);

const FORM1_EDC_SEG: Segment = Segment::removable(
    0x818,
    0x81c,
    Optimizations::REMOVE_EDC,
    Regen::Edc {
        start: 0x010,
        end: 0x818,
        slot: 0x818,
    },
);
const FORM1_ECC_SEG: Segment = Segment::removable(
    0x81c,
    0x930,
    Optimizations::REMOVE_ECC,
    Regen::Ecc { zero_address: true },
);
const FORM2_EDC_SEG: Segment = Segment::removable(
    0x92c,
    0x930,
    Optimizations::REMOVE_EDC,
    Regen::Edc {
        start: 0x010,
        end: 0x92c,
        slot: 0x92c,
    },
);

const fn gap(start: usize, end: usize) -> Segment {
    Segment::removable(start, end, Optimizations::REMOVE_GAP, Regen::Zero)
}

static RAW_LAYOUT: [Segment; 1] = [Segment::kept(0x000, 0x930)];
static CDDA_GAP_LAYOUT: [Segment; 1] = [gap(0x000, 0x930)];

static MODE1_LAYOUT: [Segment; 7] = [
    SYNC_SEG,
    MSF_SEG,
    MODE1_BYTE_SEG,
    Segment::kept(0x010, 0x810),
    MODE1_EDC_SEG,
    MODE1_BLANKS_SEG,
    MODE1_ECC_SEG,
];
static MODE1_GAP_LAYOUT: [Segment; 7] = [
    SYNC_SEG,
    MSF_SEG,
    MODE1_BYTE_SEG,
    gap(0x010, 0x810),
    MODE1_EDC_SEG,
    MODE1_BLANKS_SEG,
    MODE1_ECC_SEG,
];

static MODE2_LAYOUT: [Segment; 4] = [
    SYNC_SEG,
    MSF_SEG,
    MODE2_BYTE_SEG,
    Segment::kept(0x010, 0x930),
];
static MODE2_GAP_LAYOUT: [Segment; 4] = [SYNC_SEG, MSF_SEG, MODE2_BYTE_SEG, gap(0x010, 0x930)];

static FORM1_LAYOUT: [Segment; 8] = [
    SYNC_SEG,
    MSF_SEG,
    MODE2_BYTE_SEG,
    XA_FLAGS_SEG,
    XA_FLAGS_COPY_SEG,
    Segment::kept(0x018, 0x818),
    FORM1_EDC_SEG,
    FORM1_ECC_SEG,
];
static FORM1_GAP_LAYOUT: [Segment; 8] = [
    SYNC_SEG,
    MSF_SEG,
    MODE2_BYTE_SEG,
    XA_FLAGS_SEG,
    XA_FLAGS_COPY_SEG,
    gap(0x018, 0x818),
    FORM1_EDC_SEG,
    FORM1_ECC_SEG,
];

static FORM2_LAYOUT: [Segment; 7] = [
    SYNC_SEG,
    MSF_SEG,
    MODE2_BYTE_SEG,
    XA_FLAGS_SEG,
    XA_FLAGS_COPY_SEG,
    Segment::kept(0x018, 0x92c),
    FORM2_EDC_SEG,
];
static FORM2_GAP_LAYOUT: [Segment; 7] = [
    SYNC_SEG,
    MSF_SEG,
    MODE2_BYTE_SEG,
    XA_FLAGS_SEG,
    XA_FLAGS_COPY_SEG,
    gap(0x018, 0x92c),
    FORM2_EDC_SEG,
];

fn layout(mode: SectorMode) -> &'static [Segment] {
    match mode {
        SectorMode::Unknown | SectorMode::Cdda => &RAW_LAYOUT,
        SectorMode::CddaGap => &CDDA_GAP_LAYOUT,
        SectorMode::Mode1 => &MODE1_LAYOUT,
        SectorMode::Mode1Gap => &MODE1_GAP_LAYOUT,
        SectorMode::Mode2 => &MODE2_LAYOUT,
        SectorMode::Mode2Gap => &MODE2_GAP_LAYOUT,
        SectorMode::Mode2Form1 => &FORM1_LAYOUT,
        SectorMode::Mode2Form1Gap => &FORM1_GAP_LAYOUT,
        SectorMode::Mode2Form2 => &FORM2_LAYOUT,
        SectorMode::Mode2Form2Gap => &FORM2_GAP_LAYOUT,
    }
}

fn is_zeroed(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

fn get32le(sector: &[u8; SECTOR_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes([
        sector[offset],
        sector[offset + 1],
        sector[offset + 2],
        sector[offset + 3],
    ])
}

/// Classify a raw sector into one of the eleven modes.
///
/// Data modes are only reported when the stored EDC and ECC verify, so a
/// classified sector is guaranteed to survive clean/regenerate exactly.
pub fn classify(sector: &[u8; SECTOR_SIZE]) -> SectorMode {
    if sector[..12] != SYNC_HEADER {
        return if is_zeroed(sector) {
            SectorMode::CddaGap
        } else {
            SectorMode::Cdda
        };
    }

    match sector[MODE_OFFSET] {
        0x01 => {
            if is_zeroed(&sector[0x814..0x81c])
                && ecc_check_sector(sector, false)
                && edc_compute(0, &sector[..0x810]) == get32le(sector, 0x810)
            {
                if is_zeroed(&sector[0x010..0x810]) {
                    SectorMode::Mode1Gap
                } else {
                    SectorMode::Mode1
                }
            } else {
                SectorMode::Unknown
            }
        }
        0x02 => {
            if ecc_check_sector(sector, true)
                && edc_compute(0, &sector[0x010..0x818]) == get32le(sector, 0x818)
            {
                if is_zeroed(&sector[0x018..0x818]) {
                    SectorMode::Mode2Form1Gap
                } else {
                    SectorMode::Mode2Form1
                }
            } else if edc_compute(0, &sector[0x010..0x92c]) == get32le(sector, 0x92c) {
                if is_zeroed(&sector[0x018..0x92c]) {
                    SectorMode::Mode2Form2Gap
                } else {
                    SectorMode::Mode2Form2
                }
            } else if is_zeroed(&sector[0x010..0x930]) {
                SectorMode::Mode2Gap
            } else {
                SectorMode::Mode2
            }
        }
        _ => SectorMode::Unknown,
    }
}

/// Residue size of a sector of `mode` under the given optimization set.
pub fn encoded_size(mode: SectorMode, opts: Optimizations) -> usize {
    layout(mode)
        .iter()
        .filter(|seg| seg.is_kept(opts))
        .map(Segment::len)
        .sum()
}

/// Strip the recoverable ranges of `sector`, writing the residue into
/// `out`. Returns the residue length.
///
/// The residue is the concatenation of the kept ranges in ascending
/// offset order.
pub fn clean(
    sector: &[u8; SECTOR_SIZE],
    mode: SectorMode,
    opts: Optimizations,
    out: &mut [u8; SECTOR_SIZE],
) -> usize {
    let mut len = 0;
    for seg in layout(mode) {
        if seg.is_kept(opts) {
            out[len..len + seg.len()].copy_from_slice(&sector[seg.start..seg.end]);
            len += seg.len();
        }
    }
    len
}

/// Rebuild the raw 2352-byte sector of `mode` from its residue.
///
/// `lba` is the absolute sector number including the 150-sector lead-in
/// offset; it only matters when the address stamp was stripped. Returns
/// the number of residue bytes consumed.
pub fn regenerate(
    residue: &[u8],
    mode: SectorMode,
    lba: u32,
    opts: Optimizations,
    out: &mut [u8; SECTOR_SIZE],
) -> usize {
    out.fill(0);

    // Place the residue and the position-independent fields first; EDC and
    // ECC depend on the assembled contents and run afterwards, in layout
    // order (sub-header echo precedes the EDC slot, EDC precedes ECC).
    let mut pos = 0;
    for seg in layout(mode) {
        if seg.is_kept(opts) {
            out[seg.start..seg.end].copy_from_slice(&residue[pos..pos + seg.len()]);
            pos += seg.len();
        } else {
            match seg.regen {
                Regen::Sync => out[..12].copy_from_slice(&SYNC_HEADER),
                Regen::Msf => out[MSF_OFFSET..MSF_OFFSET + 3].copy_from_slice(&msf_from_sector(lba)),
                Regen::ModeByte(mode_byte) => out[MODE_OFFSET] = mode_byte,
                // Zeroed by the initial fill.
                Regen::Zero | Regen::Keep => {}
                Regen::SubHeaderEcho | Regen::Edc { .. } | Regen::Ecc { .. } => {}
            }
        }
    }

    for seg in layout(mode) {
        if seg.is_kept(opts) {
            continue;
        }
        match seg.regen {
            Regen::SubHeaderEcho => out.copy_within(0x010..0x014, 0x014),
            Regen::Edc { start, end, slot } => {
                let edc = edc_compute(0, &out[start..end]);
                out[slot..slot + 4].copy_from_slice(&edc.to_le_bytes());
            }
            Regen::Ecc { zero_address } => ecc_generate_sector(out, zero_address),
            _ => {}
        }
    }

    pos
}
