//! Object-store adapter (spec §6) and retry/timeout wrapper (spec §4.5).

pub mod memory;
pub mod retry;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "webdav")]
pub mod webdav;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackupConfig, Config, StorageConfig};
use crate::error::{Error, Result};
use crate::store::retry::{RetryPolicy, RetryingStore};

/// Uniform put/get/delete/list over one prefix namespace (spec §6).
///
/// Implementations must distinguish "not found" via `Error::NotFound` so
/// callers (the sidecar presence probe in particular, spec §4.3) can tell
/// it apart from a genuine failure.
#[async_trait]
pub trait ObjectStore: Send + Sync {
	async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
	async fn get(&self, key: &str) -> Result<Vec<u8>>;
	async fn delete(&self, key: &str) -> Result<()>;
	async fn list(&self, prefix: &str) -> Result<Vec<String>>;

	/// Cheap round-trip used at configuration validation (spec §6, §7
	/// "unwritable test object at validation time").
	async fn test_connectivity(&self) -> Result<()>;

	/// `true` iff `key` exists. Default implementation is a `get` plus a
	/// not-found check; backends with a cheaper HEAD-style call should
	/// override this.
	async fn exists(&self, key: &str) -> Result<bool> {
		match self.get(key).await {
			Ok(_) => Ok(true),
			Err(crate::error::Error::NotFound(_)) => Ok(false),
			Err(e) => Err(e),
		}
	}
}

fn retry_policy(backup: &BackupConfig) -> RetryPolicy {
	RetryPolicy {
		per_attempt_deadline: std::time::Duration::from_secs(backup.network_timeout),
		backoff_base: std::time::Duration::from_secs(backup.retry_delay),
		backoff_cap: std::time::Duration::from_secs(60),
		attempts: backup.retry_attempts,
	}
}

/// Builds the configured [`ObjectStore`] backend, wrapped in the retry/
/// timeout combinator (spec §4.5) so every caller goes through it uniformly
/// (DESIGN NOTES "from ad-hoc retries to a combinator").
pub async fn build(config: &Config) -> Result<Arc<dyn ObjectStore>> {
	let policy = retry_policy(&config.backup);
	match &config.storage {
		StorageConfig::Memory => Ok(Arc::new(RetryingStore::new(memory::MemoryStore::new(), policy))),
		#[cfg(feature = "s3")]
		StorageConfig::S3 {
			bucket,
			access_key_id,
			secret_access_key,
			region,
			endpoint,
		} => {
			let store = s3::S3Store::connect(s3::S3Config {
				bucket: bucket.clone(),
				access_key_id: access_key_id.clone(),
				secret_access_key: secret_access_key.clone(),
				region: region.clone(),
				endpoint: endpoint.clone(),
			})
			.await?;
			Ok(Arc::new(RetryingStore::new(store, policy)))
		}
		#[cfg(feature = "webdav")]
		StorageConfig::WebDav {
			base_url,
			username,
			password,
		} => {
			let store = webdav::WebDavStore::new(webdav::WebDavConfig {
				base_url: base_url.clone(),
				username: username.clone(),
				password: password.clone(),
			});
			Ok(Arc::new(RetryingStore::new(store, policy)))
		}
	}
}

/// Validates the config and performs a cheap connectivity round-trip
/// (spec §6 `test_connectivity`, §7 "unwritable test object at validation
/// time").
pub async fn validate_and_connect(config: &Config) -> Result<Arc<dyn ObjectStore>> {
	config.validate()?;
	let store = build(config).await?;
	store.test_connectivity().await.map_err(|e| {
		Error::ConfigInvalid(format!("storage connectivity check failed: {e}"))
	})?;
	Ok(store)
}
