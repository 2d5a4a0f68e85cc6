//! Compression + encryption pipeline (spec §4.2, §4.3).
//!
//! Order is compress-then-encrypt on write, decrypt-then-probe-decompress
//! on read, applied identically whether it's a whole small file or one
//! chunk of a large one.

use crate::cipher::Cipher;
use crate::compression::{compress_adaptive, decompress_if_gzip};
use crate::error::Result;

pub struct CodecConfig {
	pub cipher: Cipher,
	pub key: Vec<u8>,
	pub compression_level: u32,
}

/// Encode one buffer: adaptively compress, then seal with the configured
/// AEAD cipher. Used for whole small files and for each chunk of a large
/// one (spec §4.3).
pub fn encode(config: &CodecConfig, ext: Option<&str>, plaintext: &[u8]) -> Result<Vec<u8>> {
	let (_, maybe_compressed) = compress_adaptive(config.compression_level, ext, plaintext)?;
	config.cipher.seal(&config.key, &maybe_compressed)
}

/// Decode one buffer: open the AEAD frame, then decompress iff the GZIP
/// magic is present (spec §4.2 "Order").
pub fn decode(config: &CodecConfig, frame: &[u8], storage_key: &str) -> Result<Vec<u8>> {
	let plain_or_compressed = config.cipher.open(&config.key, frame, storage_key)?;
	decompress_if_gzip(&plain_or_compressed)
}
