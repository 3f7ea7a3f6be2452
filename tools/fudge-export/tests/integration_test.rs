//! Integration tests for fudge-export
//!
//! Tests the full pipeline: generate test assets -> convert -> assemble ->
//! read the bundle back with fudge-common

use std::path::Path;

use fudge_common::{
    BackgroundHeader, BundleHeader, SECTOR_SIZE, SoundDescriptor, entry_data, entry_type,
    find_entry, lookup_string, read_frames, read_tim,
};
use fudge_export::atlas::PackOptions;
use fudge_export::audio::{Pcm, SoundOptions, convert_sound};
use fudge_export::pack::{BundleOptions, run_bundle};
use fudge_export::string_table::{StringEncoding, StringEntries};
use fudge_export::texture::{ImageOptions, convert_image};
use fudge_export::{BundleBuilder, ExactQuantizer};
use tempfile::tempdir;

fn checkerboard(width: u32, height: u32) -> image::RgbaImage {
    image::RgbaImage::from_fn(width, height, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([200, 40, 40, 255])
        }
    })
}

fn write_wav(path: &Path, channels: u16, rate: u32, samples: usize) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV");
    for i in 0..samples * channels as usize {
        let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
        writer.write_sample(sample).expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV");
}

/// Texture + sound + string table, assembled in memory
#[test]
fn test_bundle_in_memory() {
    let options = ImageOptions::default();
    let images = convert_image("checker", &checkerboard(32, 32), &options, &ExactQuantizer)
        .expect("Failed to convert image");
    let sound = convert_sound(
        "beep",
        Pcm {
            channels: vec![vec![1000; 4410]],
            sample_rate: 22050,
        },
        &SoundOptions::default(),
    )
    .expect("Failed to convert sound");
    let mut strings = StringEntries::new();
    strings.insert("title".to_string(), "FUDGE".to_string());
    strings.insert("start".to_string(), "Press start".to_string());

    let mut builder = BundleBuilder::new();
    builder.add_texture("checker", vec![images], false).unwrap();
    builder.add_sound("beep", &sound).unwrap();
    builder
        .add_string_table("text", &strings, StringEncoding::Ascii, 4)
        .unwrap();
    let bundle = builder.build(&PackOptions::default()).expect("Failed to build bundle");

    let bytes = &bundle.bytes;
    assert_eq!(bytes.len() % SECTOR_SIZE, 0);

    let header = BundleHeader::from_bytes(bytes).expect("Bad header");
    assert_eq!(header.total_length(), bytes.len());
    assert_eq!(header.buckets, 4);
    assert_eq!(header.vram_offset(), SECTOR_SIZE);
    assert_eq!(header.page_count(), bundle.vram.page_count());
    assert!(header.page_count() >= 1);

    // Texture
    let slot = find_entry(bytes, "checker").expect("checker not found");
    assert_eq!(slot.type_id, entry_type::TEXTURE);
    let (texture, frames) = read_frames(entry_data(bytes, &slot).unwrap()).unwrap();
    assert_eq!(
        (texture.frame_count, texture.mip_levels, texture.field_count, texture.bpp),
        (1, 1, 1, 4)
    );
    assert_eq!((frames[0].width, frames[0].height), (32, 32));
    assert!((frames[0].image_page as usize) < header.page_count());

    // Sound: 4410 samples -> 158 blocks -> 2528 bytes -> 316 units
    let slot = find_entry(bytes, "beep").expect("beep not found");
    assert_eq!(slot.type_id, entry_type::SOUND);
    let descriptor = SoundDescriptor::from_bytes(entry_data(bytes, &slot).unwrap()).unwrap();
    assert_eq!(descriptor.left_offset, 0);
    assert_eq!(descriptor.right_offset, 0);
    assert_eq!(descriptor.length, 316);
    assert_eq!(descriptor.sample_rate, 0x800);
    assert!(header.spu_length as usize >= descriptor.byte_length());

    // Strings
    let slot = find_entry(bytes, "text").expect("text not found");
    assert_eq!(slot.type_id, entry_type::STRING_TABLE);
    let table = entry_data(bytes, &slot).unwrap();
    assert_eq!(lookup_string(table, "title"), Some(&b"FUDGE"[..]));
    assert_eq!(lookup_string(table, "start"), Some(&b"Press start"[..]));

    assert!(find_entry(bytes, "missing").is_none());
}

/// Write a small asset tree and a manifest into `dir`
fn write_project(dir: &Path) {
    checkerboard(16, 16).save(dir.join("sprite_0.png")).unwrap();
    checkerboard(16, 16).save(dir.join("sprite_1.png")).unwrap();
    checkerboard(20, 10).save(dir.join("title.png")).unwrap();
    write_wav(&dir.join("jump.wav"), 2, 22050, 2205);
    let text = "# English\ngreeting = Hello\nbye = \"Good bye\"\n";
    std::fs::write(dir.join("en.txt"), text).unwrap();
    std::fs::write(dir.join("level.bin"), [1u8, 2, 3, 4, 5]).unwrap();

    std::fs::write(
        dir.join("fudge.toml"),
        r#"
[bundle]
output = "out/data.bnd"

[packer]
discard_step = 8

[defaults]
bpp = 4

[[entries]]
name = "sprite"
type = "texture"
from = ["sprite_0.png", "sprite_1.png"]

[[entries]]
name = "title"
type = "bg"
from = "title.png"
position = [4, 2]

[[entries]]
name = "jump"
type = "sound"
from = "jump.wav"
channels = 2

[[entries]]
name = "text"
type = "stringtable"
from = "en.txt"
strings = { bye = "See you" }

[[entries]]
name = "level"
type = 0x8001
from = "level.bin"
"#,
    )
    .unwrap();
}

/// Manifest -> bundle file
#[test]
fn test_manifest_to_bundle() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_project(dir.path());

    let output = run_bundle(&dir.path().join("fudge.toml"), &BundleOptions::default())
        .expect("Failed to build bundle");
    assert_eq!(output, dir.path().join("out/data.bnd"));

    let bytes = std::fs::read(&output).expect("Failed to read bundle");
    let header = BundleHeader::from_bytes(&bytes).unwrap();
    assert_eq!(header.total_length(), bytes.len());
    assert_eq!(header.buckets, 8);

    // Two identical frames share one placement
    let slot = find_entry(&bytes, "sprite").unwrap();
    let (texture, frames) = read_frames(entry_data(&bytes, &slot).unwrap()).unwrap();
    assert_eq!(texture.frame_count, 2);
    assert_eq!(frames[0], frames[1]);

    let slot = find_entry(&bytes, "title").unwrap();
    assert_eq!(slot.type_id, entry_type::BACKGROUND);
    let payload = entry_data(&bytes, &slot).unwrap();
    let background = BackgroundHeader::from_bytes(payload).unwrap();
    assert_eq!(
        (background.x, background.y, background.width, background.height),
        (4, 2, 20, 10)
    );
    assert_eq!(payload.len(), BackgroundHeader::SIZE + 20 * 10 * 2);

    let slot = find_entry(&bytes, "jump").unwrap();
    let sound = SoundDescriptor::from_bytes(entry_data(&bytes, &slot).unwrap()).unwrap();
    assert!(sound.is_stereo());
    assert_eq!(sound.right_offset, sound.length);

    // Inline strings override the text file
    let slot = find_entry(&bytes, "text").unwrap();
    let table = entry_data(&bytes, &slot).unwrap();
    assert_eq!(lookup_string(table, "greeting"), Some(&b"Hello"[..]));
    assert_eq!(lookup_string(table, "bye"), Some(&b"See you"[..]));

    let slot = find_entry(&bytes, "level").unwrap();
    assert_eq!(slot.type_id, 0x8001);
    assert_eq!(entry_data(&bytes, &slot).unwrap(), &[1, 2, 3, 4, 5]);
}

/// CLI properties override the manifest
#[test]
fn test_forced_properties() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_project(dir.path());

    let options = BundleOptions {
        output: Some(dir.path().join("forced.bnd")),
        forced: vec!["bpp=8".to_string()],
        ..BundleOptions::default()
    };
    let output = run_bundle(&dir.path().join("fudge.toml"), &options).unwrap();
    assert_eq!(output, dir.path().join("forced.bnd"));

    let bytes = std::fs::read(&output).unwrap();
    let slot = find_entry(&bytes, "sprite").unwrap();
    let (texture, _) = read_frames(entry_data(&bytes, &slot).unwrap()).unwrap();
    assert_eq!(texture.bpp, 8);
}

/// A failing entry aborts the build before anything is written
#[test]
fn test_failed_build_writes_nothing() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_project(dir.path());
    std::fs::write(dir.path().join("en.txt"), "no equals sign here\n").unwrap();

    assert!(run_bundle(&dir.path().join("fudge.toml"), &BundleOptions::default()).is_err());
    assert!(!dir.path().join("out/data.bnd").exists());
}

/// Textures with more colours than their depth allows are reduced unless
/// exact colours are requested
#[test]
fn test_bundle_reduces_colors() {
    let dir = tempdir().expect("Failed to create temp dir");
    let gradient = image::RgbaImage::from_fn(16, 16, |x, y| {
        image::Rgba([(x * 16) as u8, (y * 16) as u8, 128, 255])
    });
    gradient.save(dir.path().join("gradient.png")).unwrap();
    std::fs::write(
        dir.path().join("fudge.toml"),
        "[[entries]]\nname = \"gradient\"\ntype = \"texture\"\nfrom = \"gradient.png\"\n",
    )
    .unwrap();
    let manifest = dir.path().join("fudge.toml");

    let output = run_bundle(&manifest, &BundleOptions::default()).expect("Failed to build bundle");
    let bytes = std::fs::read(&output).unwrap();
    let slot = find_entry(&bytes, "gradient").unwrap();
    let (texture, frames) = read_frames(entry_data(&bytes, &slot).unwrap()).unwrap();
    assert_eq!(texture.bpp, 4);
    assert_eq!((frames[0].width, frames[0].height), (16, 16));

    let exact = BundleOptions {
        output: Some(dir.path().join("exact.bnd")),
        exact_colors: true,
        ..BundleOptions::default()
    };
    assert!(run_bundle(&manifest, &exact).is_err());
    assert!(!dir.path().join("exact.bnd").exists());
}

fn fudge_export(args: &[&str]) -> std::process::Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_fudge-export"))
        .args(args)
        .output()
        .expect("Failed to run fudge-export")
}

/// check, bundle and inspect through the binary
#[test]
fn test_cli_commands() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_project(dir.path());
    let manifest = dir.path().join("fudge.toml");
    let output = dir.path().join("cli.bnd");

    let result = fudge_export(&["check", manifest.to_str().unwrap()]);
    assert!(result.status.success(), "fudge-export check failed");

    let result = fudge_export(&[
        "bundle",
        manifest.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--atlas-debug",
        dir.path().join("atlases").to_str().unwrap(),
    ]);
    assert!(result.status.success(), "fudge-export bundle failed");
    assert!(output.exists());
    assert!(dir.path().join("atlases").read_dir().unwrap().count() >= 1);

    let result = fudge_export(&["inspect", output.to_str().unwrap()]);
    assert!(result.status.success(), "fudge-export inspect failed");
    let text = String::from_utf8_lossy(&result.stdout);
    assert!(text.contains("texture"));
    assert!(text.contains("stereo"));
}

/// WAV -> stream file
#[test]
fn test_cli_stream() {
    let dir = tempdir().expect("Failed to create temp dir");
    let wav = dir.path().join("music.wav");
    let out = dir.path().join("music.str");
    write_wav(&wav, 2, 44100, 44100);

    let result = fudge_export(&[
        "stream",
        wav.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--chunk-length",
        "4096",
    ]);
    assert!(result.status.success(), "fudge-export stream failed");

    // 44100 samples -> 1575 blocks; 4096 bytes hold 256 blocks -> 7 chunks of 8192 bytes
    let data = std::fs::read(&out).unwrap();
    assert_eq!(data.len(), 7 * 8192);
}

/// PNG -> TIM file
#[test]
fn test_cli_tim() {
    let dir = tempdir().expect("Failed to create temp dir");
    let png = dir.path().join("tile.png");
    checkerboard(32, 32).save(&png).unwrap();
    let template = dir.path().join("{name}_vram.tim");

    let result = fudge_export(&[
        "tim",
        png.to_str().unwrap(),
        "-o",
        template.to_str().unwrap(),
        "--set",
        "position=[640,0]",
        "--set",
        "palette_position=[0,480]",
    ]);
    assert!(result.status.success(), "fudge-export tim failed");

    let data = std::fs::read(dir.path().join("tile_vram.tim")).expect("TIM file not written");
    let (header, clut, (image, pixels)) = read_tim(&data).expect("Bad TIM file");
    assert!(header.has_clut());
    assert_eq!(clut.map(|(section, _)| (section.x, section.y)), Some((0, 480)));
    assert_eq!((image.x, image.y, image.width, image.height), (640, 0, 8, 32));
    assert_eq!(pixels.len(), 8 * 32 * 2);
}
