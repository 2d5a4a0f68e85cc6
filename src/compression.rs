//! Adaptive GZIP compression (spec §4.2).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;

const TEN_MIB: u64 = 10 * 1024 * 1024;
const ONE_GIB: u64 = 1024 * 1024 * 1024;

/// Ratio threshold: compression is kept only if it shrinks the buffer to
/// at or below this fraction of the input size.
const DOWNSIZE_RATIO: f64 = 0.95;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extensions the adaptive pipeline never bothers compressing.
const ALREADY_COMPRESSED_EXTENSIONS: &[&str] = &[
	// images
	"jpg", "jpeg", "png", "gif", "webp", "heic", "avif",
	// video
	"mp4", "mkv", "mov", "avi", "webm",
	// audio
	"mp3", "aac", "ogg", "flac", "m4a",
	// archives
	"zip", "gz", "xz", "zst", "7z", "rar", "bz2",
	// documents
	"pdf", "docx", "xlsx", "pptx",
];

fn has_already_compressed_extension(ext: Option<&str>) -> bool {
	let Some(ext) = ext else { return false };
	let ext = ext.to_ascii_lowercase();
	ALREADY_COMPRESSED_EXTENSIONS.contains(&ext.as_str())
}

/// Compress `data` per spec §4.2's adaptive policy. Returns `(used,
/// output)`: `used` is false when the caller should store `data` verbatim
/// (extension opted out, file too big, or the ratio check didn't pay off).
pub fn compress_adaptive(level: u32, ext: Option<&str>, data: &[u8]) -> Result<(bool, Vec<u8>)> {
	if level == 0 || has_already_compressed_extension(ext) {
		return Ok((false, data.to_vec()));
	}

	let size = data.len() as u64;
	if size > ONE_GIB {
		return Ok((false, data.to_vec()));
	}

	let compressed = gzip_compress(level, data)?;

	if size < TEN_MIB {
		if (compressed.len() as f64) <= (size as f64) * DOWNSIZE_RATIO {
			Ok((true, compressed))
		} else {
			Ok((false, data.to_vec()))
		}
	} else {
		// 10 MiB..=1 GiB: always applied, regardless of ratio.
		Ok((true, compressed))
	}
}

fn gzip_compress(level: u32, data: &[u8]) -> Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
	encoder.write_all(data)?;
	Ok(encoder.finish()?)
}

/// Probe for the GZIP magic and decompress if present; otherwise return the
/// bytes unchanged (spec §4.2 "Order").
pub fn decompress_if_gzip(data: &[u8]) -> Result<Vec<u8>> {
	if data.starts_with(&GZIP_MAGIC) {
		let mut decoder = GzDecoder::new(data);
		let mut out = Vec::new();
		decoder.read_to_end(&mut out)?;
		Ok(out)
	} else {
		Ok(data.to_vec())
	}
}
