//! AEAD frame cipher (spec §4.2).
//!
//! Two cipher choices, resolved once from configuration into a tagged
//! variant (DESIGN NOTES: "from dynamic key types to sum types"). A frame
//! is `nonce || ciphertext || tag`; no associated data is used.
//!
//! Grounded in `byte271-6cy/src/crypto/mod.rs`, which implements the same
//! `nonce || ciphertext || tag` layout for AES-256-GCM; the XChaCha20-
//! Poly1305 branch follows the same shape with the wider 24-byte nonce.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::XChaCha20Poly1305;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
	AesGcm256,
	XChaCha20Poly1305,
}

impl Cipher {
	pub fn from_config_str(s: &str) -> Result<Self> {
		match s {
			"aes-256-gcm" => Ok(Cipher::AesGcm256),
			"xchacha20-poly1305" => Ok(Cipher::XChaCha20Poly1305),
			other => Err(Error::ConfigInvalid(format!(
				"unknown encryption_algo {other:?}"
			))),
		}
	}

	pub fn key_size(&self) -> usize {
		32
	}

	pub fn nonce_size(&self) -> usize {
		match self {
			Cipher::AesGcm256 => 12,
			Cipher::XChaCha20Poly1305 => 24,
		}
	}

	/// Tag length; informational (`seal`/`open` don't need it separately,
	/// since the AEAD crates append/verify it as part of the ciphertext).
	pub fn tag_size(&self) -> usize {
		16
	}

	/// Encrypt `plaintext` into `nonce || ciphertext || tag`.
	pub fn seal(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
		if key.len() != self.key_size() {
			return Err(Error::ConfigInvalid(format!(
				"key length {} does not match {:?} (expected {})",
				key.len(),
				self,
				self.key_size()
			)));
		}

		match self {
			Cipher::AesGcm256 => {
				let cipher = Aes256Gcm::new_from_slice(key)
					.map_err(|e| Error::ConfigInvalid(format!("bad AES-256-GCM key: {e}")))?;
				let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
				let ciphertext = cipher
					.encrypt(&nonce, plaintext)
					.map_err(|_| Error::StoreFatal("AES-256-GCM encryption failed".into()))?;
				Ok(frame(&nonce, ciphertext))
			}
			Cipher::XChaCha20Poly1305 => {
				let cipher = XChaCha20Poly1305::new_from_slice(key)
					.map_err(|e| Error::ConfigInvalid(format!("bad XChaCha20-Poly1305 key: {e}")))?;
				let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
				let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|_| {
					Error::StoreFatal("XChaCha20-Poly1305 encryption failed".into())
				})?;
				Ok(frame(&nonce, ciphertext))
			}
		}
	}

	/// Decrypt a `nonce || ciphertext || tag` frame produced by [`Cipher::seal`].
	pub fn open(&self, key: &[u8], frame: &[u8], storage_key: &str) -> Result<Vec<u8>> {
		let nonce_size = self.nonce_size();
		if frame.len() < nonce_size + self.tag_size() {
			return Err(Error::CipherMismatch {
				storage_key: storage_key.to_owned(),
			});
		}
		let (nonce_bytes, ciphertext) = frame.split_at(nonce_size);

		let plaintext = match self {
			Cipher::AesGcm256 => {
				let cipher = Aes256Gcm::new_from_slice(key)
					.map_err(|e| Error::ConfigInvalid(format!("bad AES-256-GCM key: {e}")))?;
				let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);
				cipher.decrypt(nonce, ciphertext)
			}
			Cipher::XChaCha20Poly1305 => {
				let cipher = XChaCha20Poly1305::new_from_slice(key)
					.map_err(|e| Error::ConfigInvalid(format!("bad XChaCha20-Poly1305 key: {e}")))?;
				let nonce = chacha20poly1305::XNonce::from_slice(nonce_bytes);
				cipher.decrypt(nonce, ciphertext)
			}
		};

		plaintext.map_err(|_| Error::CipherMismatch {
			storage_key: storage_key.to_owned(),
		})
	}
}

fn frame(nonce: &[u8], ciphertext: Vec<u8>) -> Vec<u8> {
	let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
	out.extend_from_slice(nonce);
	out.extend_from_slice(&ciphertext);
	out
}
