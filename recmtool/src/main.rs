use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use ecm::container::{ECM_MAGIC, ECM_VERSION};
use ecm::sector::encoded_size;
use ecm::{
    decode_image, encode_image, read_metadata, CodecKind, DecodeOptions, EncodeOptions,
    EncodeReport, SectorMode, SECTOR_SIZE,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AudioCodec {
    Zlib,
    Lzma,
    Lz4,
    Flac,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DataCodec {
    Zlib,
    Lzma,
    Lz4,
}

impl From<AudioCodec> for CodecKind {
    fn from(codec: AudioCodec) -> Self {
        match codec {
            AudioCodec::Zlib => CodecKind::Zlib,
            AudioCodec::Lzma => CodecKind::Lzma,
            AudioCodec::Lz4 => CodecKind::Lz4,
            AudioCodec::Flac => CodecKind::Flac,
        }
    }
}

impl From<DataCodec> for CodecKind {
    fn from(codec: DataCodec) -> Self {
        match codec {
            DataCodec::Zlib => CodecKind::Zlib,
            DataCodec::Lzma => CodecKind::Lzma,
            DataCodec::Lz4 => CodecKind::Lz4,
        }
    }
}

/// Encoder/decoder for the ECM v3 disc image format.
///
/// The role is picked from the input file: an ECM v3 container is decoded
/// back to a raw image, anything else is encoded.
#[derive(Parser)]
#[command(name = "recmtool", version, about)]
struct Cli {
    /// Input file (raw CD image, or ECM file to decode)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file; derived from the input name when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Audio stream compression
    #[arg(short = 'a', long = "acompression", value_enum)]
    acompression: Option<AudioCodec>,

    /// Data stream compression
    #[arg(short = 'd', long = "dcompression", value_enum)]
    dcompression: Option<DataCodec>,

    /// Compression level
    #[arg(
        short = 'c',
        long = "clevel",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    clevel: u32,

    /// Extreme compression mode for LZMA (can be very slow)
    #[arg(short = 'e', long = "extreme-compression")]
    extreme_compression: bool,

    /// Create a seekable file: worse ratio, decodable from block marks
    #[arg(short = 's', long)]
    seekable: bool,

    /// Sectors between block marks in a seekable file
    #[arg(
        short = 'p',
        long = "sectors-per-block",
        default_value_t = 100,
        value_parser = clap::value_parser!(u8).range(1..)
    )]
    sectors_per_block: u8,

    /// Overwrite the output file if it exists
    #[arg(short = 'f', long)]
    force: bool,

    /// Keep the output file when the operation fails
    #[arg(short = 'k', long = "keep-output")]
    keep_output: bool,
}

/// Input wrapper that feeds the progress bar as bytes are consumed.
struct ProgressReader<R> {
    inner: R,
    bar: ProgressBar,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.bar.inc(read as u64);
        Ok(read)
    }
}

impl<R: Seek> Seek for ProgressReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

fn default_output(input: &Path, decode: bool) -> PathBuf {
    let name = input.as_os_str().to_string_lossy();
    if decode {
        if let Some(stripped) = name
            .strip_suffix(".ecm2")
            .or_else(|| name.strip_suffix(".ECM2"))
        {
            PathBuf::from(stripped.to_string())
        } else {
            PathBuf::from(format!("{name}.unecm2"))
        }
    } else {
        PathBuf::from(format!("{name}.ecm2"))
    }
}

/// Role detection on the first four bytes: an ECM v3 magic means decode.
fn detect_decode(input: &Path) -> anyhow::Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
    match file.read_exact(&mut magic) {
        Ok(()) => {
            if magic[..3] == ECM_MAGIC {
                if magic[3] == ECM_VERSION {
                    Ok(true)
                } else {
                    bail!(
                        "{} is an ECM file of an unsupported version ({})",
                        input.display(),
                        magic[3]
                    );
                }
            } else {
                Ok(false)
            }
        }
        // Too short to carry a magic; let the encoder reject it.
        Err(_) => Ok(false),
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("[{bar:40}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

const MODE_LABELS: [(SectorMode, &str); 11] = [
    (SectorMode::Unknown, "Unknown"),
    (SectorMode::Cdda, "CDDA"),
    (SectorMode::CddaGap, "CDDA Gap"),
    (SectorMode::Mode1, "Mode 1"),
    (SectorMode::Mode1Gap, "Mode 1 Gap"),
    (SectorMode::Mode2, "Mode 2"),
    (SectorMode::Mode2Gap, "Mode 2 Gap"),
    (SectorMode::Mode2Form1, "Mode 2 XA1"),
    (SectorMode::Mode2Form1Gap, "Mode 2 XA1 Gap"),
    (SectorMode::Mode2Form2, "Mode 2 XA2"),
    (SectorMode::Mode2Form2Gap, "Mode 2 XA2 Gap"),
];

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

fn summary(report: &EncodeReport) {
    let total_sectors = u64::from(report.sector_count);
    let total_size = total_sectors * SECTOR_SIZE as u64;
    let mut cleaned_size = 0u64;

    println!();
    println!(" ECM cleanup summary");
    println!("------------------------------------------------------------");
    println!(" Type                 Sectors        In Size       Out Size");
    println!("------------------------------------------------------------");
    for (mode, label) in MODE_LABELS {
        let sectors = u64::from(report.mode_counts[mode as usize]);
        let in_size = sectors * SECTOR_SIZE as u64;
        let out_size = sectors * encoded_size(mode, report.optimizations) as u64;
        cleaned_size += out_size;
        println!(
            "{label:<16} {sectors:>10} {:>12.2} MB {:>11.2} MB",
            megabytes(in_size),
            megabytes(out_size),
        );
    }
    println!("------------------------------------------------------------");
    println!(
        "Total            {total_sectors:>10} {:>12.2} MB {:>11.2} MB",
        megabytes(total_size),
        megabytes(cleaned_size),
    );
    if total_size > 0 {
        println!(
            "ECM reduction (input vs cleaned) ................... {:>6.2}%",
            (1.0 - cleaned_size as f64 / total_size as f64) * 100.0
        );
        println!(
            "Total reduction (input vs output) .................. {:>6.2}%",
            (1.0 - report.output_size as f64 / total_size as f64) * 100.0
        );
    }
    println!(
        "Output size ........................................ {:.2} MB",
        megabytes(report.output_size)
    );
}

fn run(cli: &Cli, decode: bool, output_path: &Path) -> anyhow::Result<()> {
    let input_size = fs::metadata(&cli.input)
        .with_context(|| format!("cannot stat {}", cli.input.display()))?
        .len();

    // The encoder walks the input twice (analyze, then encode).
    let bar = progress_bar(if decode { input_size } else { input_size * 2 });
    let file = File::open(&cli.input)?;
    let mut reader = ProgressReader {
        inner: BufReader::new(file),
        bar: bar.clone(),
    };

    let output_file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output_path)
        .with_context(|| format!("cannot create {}", output_path.display()))?;

    if decode {
        if let Some(metadata) = read_metadata(&mut reader).ok().flatten() {
            if !metadata.title.is_empty() {
                println!("Title: {}", metadata.title);
            }
            if !metadata.id.is_empty() {
                println!("Id:    {}", metadata.id);
            }
        }
        let mut writer = BufWriter::new(output_file);
        let report = decode_image(&mut reader, &mut writer, &DecodeOptions::default())?;
        bar.finish_and_clear();
        println!(
            "Decoded {} sectors ({:.2} MB); image CRC verified",
            report.sector_count,
            megabytes(report.output_size)
        );
    } else {
        let options = EncodeOptions {
            data_compression: cli.dcompression.map(CodecKind::from).unwrap_or(CodecKind::None),
            audio_compression: cli.acompression.map(CodecKind::from).unwrap_or(CodecKind::None),
            compression_level: cli.clevel,
            extreme_compression: cli.extreme_compression,
            seekable: cli.seekable,
            sectors_per_block: cli.sectors_per_block,
            ..EncodeOptions::default()
        };
        let mut writer = output_file;
        let report = encode_image(&mut reader, &mut writer, &options)?;
        bar.finish_and_clear();
        summary(&report);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let decode = detect_decode(&cli.input)?;
    if decode {
        println!("An ECM file was detected... it will be decoded");
    } else {
        println!("A raw image was detected... it will be encoded");
    }

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.input, decode));
    if !cli.force && output_path.exists() {
        bail!(
            "{} exists; refusing to overwrite (use -f to force)",
            output_path.display()
        );
    }

    match run(&cli, decode, &output_path) {
        Ok(()) => Ok(()),
        Err(error) => {
            if !cli.keep_output {
                let _ = fs::remove_file(&output_path);
            }
            Err(error)
        }
    }
}
