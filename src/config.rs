//! Runtime configuration (spec §6 "Configuration recognized by the core").
//!
//! A plain `serde_json`-deserialisable struct, in the style of
//! `alertd::config::Config` (`crates/alertd/src/config.rs`) — that one reads
//! TOML or JSON into a typed struct and lets `serde` do the validation work
//! it can; `validate()` below covers the checks `serde` can't express
//! (cipher key length, cross-field size-tier ordering).

use std::path::PathBuf;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::chunked::SizeTiers;
use crate::checksum::ChecksumMode;
use crate::cipher::Cipher;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
	Memory,
	#[cfg(feature = "s3")]
	S3 {
		bucket: String,
		access_key_id: Option<String>,
		secret_access_key: Option<String>,
		region: Option<String>,
		endpoint: Option<String>,
	},
	#[cfg(feature = "webdav")]
	WebDav {
		base_url: String,
		username: Option<String>,
		password: Option<String>,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
	pub encryption_key: String,
	pub encryption_algo: String,
	#[serde(default = "default_compression_level")]
	pub compression_level: u32,
	#[serde(default)]
	pub checksum_mode: ChecksumMode,
	#[serde(default = "default_max_workers")]
	pub max_workers: usize,
	#[serde(default = "default_large_file_threshold")]
	pub large_file_threshold: ByteSize,
	#[serde(default = "default_ultra_large_threshold")]
	pub ultra_large_threshold: ByteSize,
	#[serde(default = "default_chunk_size")]
	pub chunk_size: ByteSize,
	#[serde(default = "default_chunk_size_large")]
	pub chunk_size_large: ByteSize,
	#[serde(default = "default_network_timeout")]
	pub network_timeout: u64,
	#[serde(default = "default_retry_attempts")]
	pub retry_attempts: u32,
	#[serde(default = "default_retry_delay")]
	pub retry_delay: u64,
	#[serde(default = "default_sort_by_size")]
	pub sort_by_size: bool,
	#[serde(default)]
	pub skip_patterns: Vec<String>,
}

fn default_compression_level() -> u32 {
	6
}
fn default_max_workers() -> usize {
	4
}
fn default_large_file_threshold() -> ByteSize {
	ByteSize::mib(100)
}
fn default_ultra_large_threshold() -> ByteSize {
	ByteSize::gib(5)
}
fn default_chunk_size() -> ByteSize {
	ByteSize::mib(10)
}
fn default_chunk_size_large() -> ByteSize {
	ByteSize::mib(50)
}
fn default_network_timeout() -> u64 {
	30
}
fn default_retry_attempts() -> u32 {
	1
}
fn default_retry_delay() -> u64 {
	2
}
fn default_sort_by_size() -> bool {
	true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetentionConfig {
	pub days: Option<u32>,
	pub max_backups: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub storage: StorageConfig,
	pub backup: BackupConfig,
	#[serde(default)]
	pub retention: RetentionConfig,
}

impl Config {
	pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
		let raw = std::fs::read(path)?;
		let config: Config = serde_json::from_slice(&raw)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks the `ConfigInvalid` conditions spec §7 enumerates that
	/// `serde`'s structural deserialisation can't: cipher key length,
	/// unknown algorithm name, invalid compression level, and a sane
	/// ordering of the size tiers.
	pub fn validate(&self) -> Result<()> {
		let cipher = self.cipher()?;
		let key = self.encryption_key_bytes()?;
		if key.len() != cipher.key_size() {
			return Err(Error::ConfigInvalid(format!(
				"encryption_key is {} bytes, but {:?} requires {}",
				key.len(),
				cipher,
				cipher.key_size()
			)));
		}

		if self.backup.compression_level > 9 {
			return Err(Error::ConfigInvalid(format!(
				"compression_level must be 0-9, got {}",
				self.backup.compression_level
			)));
		}

		if self.backup.max_workers == 0 {
			return Err(Error::ConfigInvalid("max_workers must be positive".into()));
		}

		if self.backup.large_file_threshold >= self.backup.ultra_large_threshold {
			return Err(Error::ConfigInvalid(
				"large_file_threshold must be smaller than ultra_large_threshold".into(),
			));
		}

		Ok(())
	}

	pub fn cipher(&self) -> Result<Cipher> {
		Cipher::from_config_str(&self.backup.encryption_algo)
	}

	pub fn encryption_key_bytes(&self) -> Result<Vec<u8>> {
		hex::decode(&self.backup.encryption_key)
			.map_err(|e| Error::ConfigInvalid(format!("encryption_key is not valid hex: {e}")))
	}

	pub fn size_tiers(&self) -> SizeTiers {
		SizeTiers {
			large_file_threshold: self.backup.large_file_threshold,
			ultra_large_threshold: self.backup.ultra_large_threshold,
			chunk_size: self.backup.chunk_size,
			chunk_size_large: self.backup.chunk_size_large,
		}
	}

	pub fn skip_pattern_globs(&self) -> Result<Vec<glob::Pattern>> {
		self.backup
			.skip_patterns
			.iter()
			.map(|pattern| {
				glob::Pattern::new(pattern)
					.map_err(|e| Error::ConfigInvalid(format!("invalid skip pattern {pattern:?}: {e}")))
			})
			.collect()
	}
}

/// Location a config file is loaded from, resolved by `main.rs` from a
/// `--config` flag or the `COLDVAULT_CONFIG` environment variable.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
	if let Some(path) = explicit {
		return Ok(path);
	}
	std::env::var_os("COLDVAULT_CONFIG")
		.map(PathBuf::from)
		.ok_or_else(|| Error::ConfigInvalid("no config file given (--config or COLDVAULT_CONFIG)".into()))
}
