//! Crate-wide error taxonomy (spec §7).
//!
//! Library code returns [`Error`] and propagates with `?`; the thin CLI
//! front-end (`main.rs`) converts into a [`miette::Report`] at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	ConfigInvalid(String),

	#[error("source path does not exist or is not traversable: {0}")]
	SourceMissing(std::path::PathBuf),

	#[error("storage operation failed transiently: {0}")]
	StoreTransient(String),

	#[error("storage operation failed: {0}")]
	StoreFatal(String),

	#[error("index is corrupt: {0}")]
	IndexCorrupt(String),

	#[error("chunk {index} missing for storage key {storage_key}")]
	ChunkMissing { storage_key: String, index: u32 },

	#[error("AEAD authentication failed while opening storage key {storage_key}")]
	CipherMismatch { storage_key: String },

	#[error("backup deadline exceeded")]
	DeadlineExceeded,

	#[error("object not found: {0}")]
	NotFound(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("json (de)serialisation failed: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	/// Whether a store-layer error is worth retrying, per spec §4.5/§7.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::StoreTransient(_))
	}
}
