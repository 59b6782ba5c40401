// src/main.rs
// pixtext — reversible text-as-picture container.
// Text in, grayscale PNG out. No hidden chunks. The pixels ARE the text.
//
// Subcommand CLI:
//   encode <image> (--text T | --file F) [--limit L]  → PNG carrying the text
//   decode <image> [--file OUT]                       → exact original text back
//
// Stream layout (pixel offsets, header/trailer always full byte range):
//   MAGIC(4) | VERSION(1) | limit(1) | digit count u64 BE(8) | byte length u64 BE(8)
//   | digit count data digits in base limit+1 | payload hash32 LE(4) | zero pad to W*H
//
// Integrity proofs (active):
//   • Encode: re-open the written PNG, decode → verify byte-for-byte.
//   • Decode: BLAKE3-derived trailer checked against the recovered payload.
//
// Build: cargo build --release
// Run:   cargo run --release -- encode note.png --text "hello"

use std::{
    ffi::OsStr,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use image::GrayImage;
use num_bigint::BigUint;
use num_traits::Zero;
use thiserror::Error;

// ========================= Configuration =========================

// Stream prefix
const MAGIC: &[u8; 4] = b"PXTG"; // PixText Grayscale v1
const VERSION: u8 = 1;

// Fixed stream overhead, in pixels
const HEADER_PX: usize = 22; // MAGIC(4) + VERSION(1) + limit(1) + digits u64(8) + bytes u64(8)
const TRAILER_PX: usize = 4; // payload hash32, little-endian

// Size guards
const MAX_SIDE_PX: u32 = 8192; // near-square grid, so this bounds both W and H
const MAX_PAYLOAD_BYTES: u64 = 1 << 30; // decode-side allocation guard for the recorded length

// Logging
macro_rules! step { ($($arg:tt)*) => { eprintln!("▶ {}", format!($($arg)*)); }; }
macro_rules! ok   { ($($arg:tt)*) => { eprintln!("✔ {}", format!($($arg)*)); }; }
macro_rules! fail { ($($arg:tt)*) => { eprintln!("✘ {}", format!($($arg)*)); }; }

// ========================= Errors =========================

/// Failures of the pure byte↔pixel transform. Image I/O errors stay on the
/// anyhow side and are propagated unchanged from the collaborator.
#[derive(Debug, Error, PartialEq, Eq)]
enum CodecError {
    #[error("intensity limit {0} is outside the valid range 1..=255")]
    InvalidLimit(u8),
    #[error("digit {index} has value {value}, above the recorded limit {limit}")]
    MalformedDigit { index: usize, value: u8, limit: u8 },
    #[error("payload needs {pixels} pixels, more than a {max_side}×{max_side} grid holds")]
    PayloadTooLarge { pixels: usize, max_side: u32 },
    #[error("image does not carry the PXTG magic (got {0:02x?})")]
    BadMagic([u8; 4]),
    #[error("unsupported container version {0} (expected {VERSION})")]
    UnsupportedVersion(u8),
    #[error("stream needs {declared} pixels but the grid holds {have}")]
    Truncated { declared: u64, have: usize },
    #[error("recorded payload length {0} bytes exceeds the {MAX_PAYLOAD_BYTES}-byte decode guard")]
    ImplausibleLength(u64),
    #[error("recorded payload length {recorded} is shorter than the {minimal}-byte value")]
    LengthMismatch { recorded: usize, minimal: usize },
    #[error("payload checksum mismatch: image says {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
}

// ========================= Numeral codec =========================

// The payload is one big-endian unsigned integer; digits are that integer in
// base limit+1, most significant first. Leading zero bytes vanish here, which
// is why the stream records the byte length explicitly.

fn digitize(bytes: &[u8], limit: u8) -> Result<Vec<u8>, CodecError> {
    if limit == 0 {
        return Err(CodecError::InvalidLimit(0));
    }
    let value = BigUint::from_bytes_be(bytes);
    Ok(value.to_radix_be(u32::from(limit) + 1))
}

fn undigitize(digits: &[u8], limit: u8, byte_len: usize) -> Result<Vec<u8>, CodecError> {
    if limit == 0 {
        return Err(CodecError::InvalidLimit(0));
    }
    let base = u32::from(limit) + 1;
    let value = BigUint::from_radix_be(digits, base).ok_or_else(|| {
        // The only rejection is a digit at or above the base; report the first one.
        let index = digits.iter().position(|&d| d > limit).unwrap_or(0);
        CodecError::MalformedDigit { index, value: digits.get(index).copied().unwrap_or(0), limit }
    })?;
    let mut raw = if value.is_zero() { Vec::new() } else { value.to_bytes_be() };
    if raw.len() > byte_len {
        return Err(CodecError::LengthMismatch { recorded: byte_len, minimal: raw.len() });
    }
    let mut payload = vec![0u8; byte_len - raw.len()];
    payload.append(&mut raw);
    Ok(payload)
}

// ========================= Grid layout =========================

struct Grid {
    width: u32,
    height: u32,
    samples: Vec<u8>, // row-major, len == width * height
}

// Near-square raster: W = ceil(sqrt(total)), H = ceil(total / W).
fn grid_dims(total_px: usize) -> Result<(u32, u32), CodecError> {
    let side = (total_px as f64).sqrt().ceil() as u32;
    let width = side.max(1);
    if width > MAX_SIDE_PX {
        return Err(CodecError::PayloadTooLarge { pixels: total_px, max_side: MAX_SIDE_PX });
    }
    let height = ((total_px as u64 + u64::from(width) - 1) / u64::from(width)) as u32;
    Ok((width, height.max(1)))
}

fn hash32_first(bytes: &[u8]) -> u32 {
    let h = blake3::hash(bytes);
    let b = h.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn encode_to_samples(payload: &[u8], limit: u8) -> Result<Grid, CodecError> {
    let digits = digitize(payload, limit)?;
    let total = HEADER_PX + digits.len() + TRAILER_PX;
    let (width, height) = grid_dims(total)?;

    let capacity = (width as usize) * (height as usize);
    let mut samples = Vec::with_capacity(capacity);
    samples.extend_from_slice(MAGIC);
    samples.push(VERSION);
    samples.push(limit);
    samples.extend_from_slice(&(digits.len() as u64).to_be_bytes());
    samples.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    samples.extend_from_slice(&digits);
    samples.extend_from_slice(&hash32_first(payload).to_le_bytes());
    samples.resize(capacity, 0); // padding past the trailer is all zero

    Ok(Grid { width, height, samples })
}

fn decode_from_samples(width: u32, height: u32, samples: &[u8]) -> Result<Vec<u8>, CodecError> {
    let capacity = (width as usize).saturating_mul(height as usize);
    if samples.len() != capacity || samples.len() < HEADER_PX {
        return Err(CodecError::Truncated { declared: HEADER_PX as u64, have: samples.len() });
    }
    if &samples[0..4] != MAGIC {
        return Err(CodecError::BadMagic([samples[0], samples[1], samples[2], samples[3]]));
    }
    if samples[4] != VERSION {
        return Err(CodecError::UnsupportedVersion(samples[4]));
    }
    let limit = samples[5];
    if limit == 0 {
        return Err(CodecError::InvalidLimit(0));
    }
    let digit_count = read_u64_be(&samples[6..14]);
    let byte_len = read_u64_be(&samples[14..22]);

    let declared = (HEADER_PX as u64)
        .saturating_add(digit_count)
        .saturating_add(TRAILER_PX as u64);
    if declared > samples.len() as u64 {
        return Err(CodecError::Truncated { declared, have: samples.len() });
    }
    if byte_len > MAX_PAYLOAD_BYTES {
        return Err(CodecError::ImplausibleLength(byte_len));
    }

    let digit_count = digit_count as usize;
    let digits = &samples[HEADER_PX..HEADER_PX + digit_count];
    let payload = undigitize(digits, limit, byte_len as usize)?;

    let t = HEADER_PX + digit_count;
    let expected = u32::from_le_bytes([samples[t], samples[t + 1], samples[t + 2], samples[t + 3]]);
    let computed = hash32_first(&payload);
    if expected != computed {
        return Err(CodecError::ChecksumMismatch { expected, computed });
    }
    Ok(payload)
}

// ========================= PNG collaborators =========================

fn write_grid(path: &Path, grid: &Grid) -> Result<()> {
    let img = GrayImage::from_raw(grid.width, grid.height, grid.samples.clone())
        .ok_or_else(|| anyhow!("sample buffer does not match a {}×{} grid", grid.width, grid.height))?;
    img.save(path).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn read_grid(path: &Path) -> Result<(u32, u32, Vec<u8>)> {
    let img = image::open(path)
        .with_context(|| format!("read {:?}", path))?
        .to_luma8();
    let (width, height) = img.dimensions();
    Ok((width, height, img.into_raw()))
}

// ========================= Encode / decode entry =========================

// Keep the target extension if already present (case-insensitive), else append
// it without clobbering whatever extension the caller supplied.
fn ensure_extension(path: &Path, extension: &str) -> PathBuf {
    match path.extension().and_then(OsStr::to_str) {
        Some(ext) if ext.eq_ignore_ascii_case(extension) => path.to_path_buf(),
        Some(_) => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".");
            name.push(extension);
            PathBuf::from(name)
        }
        None => path.with_extension(extension),
    }
}

fn encode_payload_to_png(payload: &[u8], limit: u8, image_path: &Path) -> Result<PathBuf> {
    step!("Digitizing {} bytes at limit {} (base {})…", payload.len(), limit, u32::from(limit) + 1);
    let grid = encode_to_samples(payload, limit)?;
    ok!("Grid sized {}×{} px.", grid.width, grid.height);

    let out = ensure_extension(image_path, "png");
    step!("Writing PNG to {:?}…", out);
    write_grid(&out, &grid)?;

    // Active proof: re-open the PNG and verify the round trip before claiming success.
    step!("Re-opening PNG for round-trip verification…");
    let (width, height, samples) = read_grid(&out)?;
    let back = decode_from_samples(width, height, &samples)?;
    if back != payload {
        bail!("Round-trip verification failed for {:?}", out);
    }
    ok!("Round-trip verification OK ({} bytes).", payload.len());
    Ok(out)
}

fn decode_png_to_payload(image_path: &Path) -> Result<Vec<u8>> {
    step!("Reading {:?}…", image_path);
    let (width, height, samples) = read_grid(image_path)?;
    let payload = decode_from_samples(width, height, &samples)?;
    ok!("Recovered {} bytes.", payload.len());
    Ok(payload)
}

// ========================= CLI =========================

#[derive(Parser)]
#[command(name = "pixtext", version, about = "Encode text into a grayscale PNG and back.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode literal text or a text file into a grayscale image.
    Encode {
        /// Output path for the image carrying the encoded text.
        image_path: PathBuf,
        /// Text to be encoded.
        #[arg(short, long)]
        text: Option<String>,
        /// Path to a text file to be encoded.
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Inclusive upper bound on pixel intensity; the encoding base is limit + 1.
        #[arg(short, long, default_value_t = 255, value_parser = clap::value_parser!(u8).range(1..))]
        limit: u8,
    },
    /// Decode an image back into text (stdout, or a file with --file).
    Decode {
        /// Image holding the encoded text.
        image_path: PathBuf,
        /// Write the decoded text here instead of stdout.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() {
    if let Err(e) = real_main() {
        fail!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Encode { image_path, text, file, limit } => {
            let payload = match (text, file) {
                (Some(t), None) => t.into_bytes(),
                (None, Some(f)) => fs::read(&f).with_context(|| format!("read {:?}", f))?,
                _ => bail!("Provide the text to encode with either --text or --file."),
            };
            let out = encode_payload_to_png(&payload, limit, &image_path)?;
            eprintln!();
            ok!("ENCODE COMPLETE → {:?}", out.file_name().unwrap_or_default());
        }
        Command::Decode { image_path, file } => {
            let payload = decode_png_to_payload(&image_path)?;
            match file {
                Some(f) => {
                    let out = ensure_extension(&f, "txt");
                    fs::write(&out, &payload).with_context(|| format!("write {:?}", out))?;
                    eprintln!();
                    ok!("DECODE COMPLETE → {:?}", out.file_name().unwrap_or_default());
                }
                None => {
                    io::stdout().write_all(&payload).context("write stdout")?;
                }
            }
        }
    }
    Ok(())
}

// ========================= Tests =========================
