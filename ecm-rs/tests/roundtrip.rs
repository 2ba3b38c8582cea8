//! End-to-end encode/decode scenarios over in-memory images.

use ecm::sector::{encoded_size, regenerate};
use ecm::segment::analyze;
use ecm::{
    decode_image, encode_image, CodecKind, DecodeOptions, EcmError, EncodeOptions, Optimizations,
    SectorMode, StreamFamily, SECTOR_SIZE,
};
use std::io::Cursor;

const FIRST_LBA: u32 = 150;

fn test_pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        })
        .collect()
}

/// Build a valid sector of `mode` for image position `index` by running
/// the regenerator with every recoverable range stripped.
fn build_sector(mode: SectorMode, index: u32, payload: &[u8]) -> [u8; SECTOR_SIZE] {
    let mut sector = [0u8; SECTOR_SIZE];
    regenerate(payload, mode, FIRST_LBA + index, Optimizations::all(), &mut sector);
    sector
}

fn audio_sector(seed: u32) -> [u8; SECTOR_SIZE] {
    let mut sector = [0u8; SECTOR_SIZE];
    sector.copy_from_slice(&test_pattern(SECTOR_SIZE, seed));
    sector[0] = 0x01; // never a sync match
    sector
}

fn sector_for(mode: SectorMode, index: u32, seed: u32) -> [u8; SECTOR_SIZE] {
    match mode {
        SectorMode::Cdda => audio_sector(seed),
        SectorMode::CddaGap => [0u8; SECTOR_SIZE],
        SectorMode::Mode1 => build_sector(mode, index, &test_pattern(0x800, seed)),
        SectorMode::Mode1Gap => build_sector(mode, index, &[]),
        SectorMode::Mode2 => {
            // Data that matches neither XA form: break the form 2 EDC slot.
            let mut payload = test_pattern(0x920, seed);
            let split = payload.len() - 4;
            payload[split..].rotate_left(1);
            let sector = build_sector(mode, index, &payload);
            // Extremely unlikely, but keep the fixture honest.
            assert_ne!(ecm::sector::classify(&sector), SectorMode::Mode2Form2);
            sector
        }
        SectorMode::Mode2Gap => build_sector(mode, index, &[]),
        SectorMode::Mode2Form1 => {
            let mut payload = vec![0x00, 0x00, 0x08, 0x00];
            payload.extend(test_pattern(0x800, seed));
            build_sector(mode, index, &payload)
        }
        SectorMode::Mode2Form1Gap => build_sector(mode, index, &[0x00, 0x00, 0x08, 0x00]),
        SectorMode::Mode2Form2 => {
            let mut payload = vec![0x00, 0x00, 0x20, 0x00];
            payload.extend(test_pattern(0x914, seed));
            build_sector(mode, index, &payload)
        }
        SectorMode::Mode2Form2Gap => build_sector(mode, index, &[0x00, 0x00, 0x20, 0x00]),
        SectorMode::Unknown => {
            let mut sector = audio_sector(seed);
            sector[..12].copy_from_slice(&[
                0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
            ]);
            sector[0x00f] = 0x01; // claims mode 1 but carries no valid EDC
            sector
        }
    }
}

fn image_of(modes: &[SectorMode]) -> Vec<u8> {
    let mut image = Vec::with_capacity(modes.len() * SECTOR_SIZE);
    for (index, &mode) in modes.iter().enumerate() {
        image.extend_from_slice(&sector_for(mode, index as u32, 0x9000 + index as u32));
    }
    image
}

fn roundtrip(image: &[u8], options: &EncodeOptions) -> Vec<u8> {
    let mut container = Cursor::new(Vec::new());
    encode_image(&mut Cursor::new(image), &mut container, options).expect("encode");

    container.set_position(0);
    let mut restored = Vec::new();
    decode_image(&mut container, &mut restored, &DecodeOptions::default()).expect("decode");
    assert_eq!(restored.len(), image.len());
    assert!(restored == image, "restored image differs from the source");
    container.into_inner()
}

#[test]
fn all_zero_audio_image() {
    // 150 gap sectors collapse into a single audio stream of one run, and
    // every sector strips to nothing.
    let image = image_of(&[SectorMode::CddaGap; 150]);

    let analysis = analyze(
        &mut Cursor::new(&image),
        150,
        CodecKind::Zlib,
        CodecKind::Flac,
        Optimizations::all(),
    )
    .expect("analyze");
    assert_eq!(analysis.streams_toc.len(), 1);
    assert_eq!(analysis.streams_toc[0].family, StreamFamily::Audio);
    assert_eq!(analysis.sectors_toc.len(), 1);
    assert_eq!(analysis.sectors_toc[0].mode, SectorMode::CddaGap);
    assert_eq!(analysis.sectors_toc[0].count, 150);
    assert_eq!(encoded_size(SectorMode::CddaGap, analysis.optimizations), 0);

    let options = EncodeOptions {
        audio_compression: CodecKind::Flac,
        data_compression: CodecKind::Zlib,
        ..EncodeOptions::default()
    };
    roundtrip(&image, &options);
}

#[test]
fn mode1_boot_sectors() {
    let image = image_of(&[SectorMode::Mode1; 16]);
    let options = EncodeOptions {
        data_compression: CodecKind::Zlib,
        ..EncodeOptions::default()
    };
    let mut container = Cursor::new(Vec::new());
    let report = encode_image(&mut Cursor::new(&image), &mut container, &options).expect("encode");
    assert_eq!(report.mode_counts[SectorMode::Mode1 as usize], 16);
    assert_eq!(report.optimizations, Optimizations::all());
    assert_eq!(encoded_size(SectorMode::Mode1, report.optimizations), 2048);

    container.set_position(0);
    let mut restored = Vec::new();
    decode_image(&mut container, &mut restored, &DecodeOptions::default()).expect("decode");
    assert_eq!(restored, image);
}

#[test]
fn xa_and_audio_make_two_streams() {
    let mut modes = vec![SectorMode::Mode2Form1; 75];
    modes.extend(vec![SectorMode::Cdda; 75]);
    let image = image_of(&modes);

    let analysis = analyze(
        &mut Cursor::new(&image),
        150,
        CodecKind::Lzma,
        CodecKind::Flac,
        Optimizations::all(),
    )
    .expect("analyze");
    assert_eq!(analysis.streams_toc.len(), 2);
    assert_eq!(analysis.streams_toc[0].family, StreamFamily::Data);
    assert_eq!(analysis.streams_toc[1].family, StreamFamily::Audio);
    assert_eq!(
        analysis
            .sectors_toc
            .iter()
            .map(|run| (run.mode, run.count))
            .collect::<Vec<_>>(),
        vec![(SectorMode::Mode2Form1, 75), (SectorMode::Cdda, 75)]
    );

    let options = EncodeOptions {
        data_compression: CodecKind::Lzma,
        audio_compression: CodecKind::Flac,
        ..EncodeOptions::default()
    };
    roundtrip(&image, &options);
}

#[test]
fn tampered_address_disables_address_stripping() {
    // A sector regenerated for position 1 placed at position 0: internally
    // consistent but stamped 00:02:01.
    let mut image = Vec::new();
    image.extend_from_slice(&build_sector(
        SectorMode::Mode1,
        1,
        &test_pattern(0x800, 0xbad),
    ));
    image.extend_from_slice(&sector_for(SectorMode::Mode1, 1, 0xbeef));

    let options = EncodeOptions {
        data_compression: CodecKind::Zlib,
        ..EncodeOptions::default()
    };
    let mut container = Cursor::new(Vec::new());
    let report = encode_image(&mut Cursor::new(&image), &mut container, &options).expect("encode");
    assert!(!report.optimizations.contains(Optimizations::REMOVE_MSF));
    assert!(report.optimizations.contains(Optimizations::REMOVE_SYNC));

    container.set_position(0);
    let mut restored = Vec::new();
    decode_image(&mut container, &mut restored, &DecodeOptions::default()).expect("decode");
    assert_eq!(restored, image);
}

#[test]
fn seekable_restart_points() {
    let mut modes = Vec::new();
    for chunk in 0..4 {
        let mode = if chunk % 2 == 0 {
            SectorMode::Mode1
        } else {
            SectorMode::Cdda
        };
        modes.extend(vec![mode; 50]);
    }
    let image = image_of(&modes);

    for (data, audio) in [
        (CodecKind::Zlib, CodecKind::Zlib),
        (CodecKind::Lzma, CodecKind::Flac),
    ] {
        let options = EncodeOptions {
            data_compression: data,
            audio_compression: audio,
            seekable: true,
            sectors_per_block: 50,
            ..EncodeOptions::default()
        };
        roundtrip(&image, &options);
    }

    // One restart point per sector.
    let short = image_of(&[SectorMode::Mode1; 8]);
    let options = EncodeOptions {
        data_compression: CodecKind::Zlib,
        seekable: true,
        sectors_per_block: 1,
        ..EncodeOptions::default()
    };
    roundtrip(&short, &options);
}

#[test]
fn corrupted_payload_fails_the_trailer_check() {
    // Stored without compression so the corruption survives to the
    // regenerated image and is caught by the trailer EDC.
    let image = image_of(&[SectorMode::Cdda; 8]);
    let mut container = Cursor::new(Vec::new());
    encode_image(
        &mut Cursor::new(&image),
        &mut container,
        &EncodeOptions::default(),
    )
    .expect("encode");

    let mut bytes = container.into_inner();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;

    let mut restored = Vec::new();
    let result = decode_image(
        &mut Cursor::new(bytes),
        &mut restored,
        &DecodeOptions::default(),
    );
    assert!(matches!(result, Err(EcmError::Processing(_))));
}

#[test]
fn single_sector_of_every_mode() {
    for mode in [
        SectorMode::Unknown,
        SectorMode::Cdda,
        SectorMode::CddaGap,
        SectorMode::Mode1,
        SectorMode::Mode1Gap,
        SectorMode::Mode2,
        SectorMode::Mode2Gap,
        SectorMode::Mode2Form1,
        SectorMode::Mode2Form1Gap,
        SectorMode::Mode2Form2,
        SectorMode::Mode2Form2Gap,
    ] {
        let image = image_of(&[mode]);
        let options = EncodeOptions {
            data_compression: CodecKind::Zlib,
            audio_compression: CodecKind::Zlib,
            ..EncodeOptions::default()
        };
        roundtrip(&image, &options);
    }
}

#[test]
fn mixed_image_under_every_codec_pairing() {
    let mut modes = Vec::new();
    modes.extend(vec![SectorMode::Mode1; 20]);
    modes.extend(vec![SectorMode::Mode1Gap; 5]);
    modes.extend(vec![SectorMode::Cdda; 30]);
    modes.extend(vec![SectorMode::CddaGap; 10]);
    modes.extend(vec![SectorMode::Mode2Form1; 15]);
    modes.extend(vec![SectorMode::Mode2Form2; 10]);
    modes.extend(vec![SectorMode::Unknown; 3]);
    let image = image_of(&modes);

    for data in [CodecKind::None, CodecKind::Zlib, CodecKind::Lzma, CodecKind::Lz4] {
        for audio in [CodecKind::None, CodecKind::Zlib, CodecKind::Flac] {
            let options = EncodeOptions {
                data_compression: data,
                audio_compression: audio,
                compression_level: 6,
                ..EncodeOptions::default()
            };
            roundtrip(&image, &options);
        }
    }
}

#[test]
fn metadata_block_roundtrips() {
    let image = image_of(&[SectorMode::Mode1; 4]);
    let metadata = ecm::FileMetadata {
        title: "Example Disc".to_string(),
        id: "SLES-12345".to_string(),
        release_date: "1999-03-04".to_string(),
        publisher: "Example Soft".to_string(),
        ..Default::default()
    };
    let options = EncodeOptions {
        data_compression: CodecKind::Zlib,
        metadata: metadata.clone(),
        ..EncodeOptions::default()
    };
    let container = roundtrip(&image, &options);

    let mut cursor = Cursor::new(&container);
    let stored = ecm::read_metadata(&mut cursor).expect("metadata").expect("present");
    assert_eq!(stored, metadata);

    // A container written without metadata has none to read.
    let plain = roundtrip(&image, &EncodeOptions::default());
    let mut cursor = Cursor::new(&plain);
    assert!(ecm::read_metadata(&mut cursor).expect("metadata").is_none());
}

#[test]
fn zero_length_and_misaligned_images_are_rejected() {
    for bad in [Vec::new(), vec![0u8; SECTOR_SIZE + 1]] {
        let mut output = Cursor::new(Vec::new());
        let result = encode_image(
            &mut Cursor::new(bad),
            &mut output,
            &EncodeOptions::default(),
        );
        assert!(matches!(result, Err(EcmError::Processing(_))));
    }
}

#[test]
fn decode_rejects_foreign_files() {
    let mut restored = Vec::new();
    let result = decode_image(
        &mut Cursor::new(b"MComprHD notanecmfile".to_vec()),
        &mut restored,
        &DecodeOptions::default(),
    );
    assert!(matches!(result, Err(EcmError::CorruptedHeader)));
}
