//! S3-backed [`ObjectStore`] (spec §6, feature `s3`).
//!
//! The chunked layout (spec §4.3) already splits large files into
//! bounded-size objects before anything reaches this adapter, so unlike
//! `aws/s3.rs`'s `multipart_upload` in the teacher this is a single
//! `put_object`/`get_object` per key rather than an S3 multipart upload.
//! Credential/region resolution follows `aws::init` in the teacher's
//! `aws.rs`.

use std::borrow::Cow;

use async_trait::async_trait;
use aws_config::{AppName, BehaviorVersion, ConfigLoader, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::store::ObjectStore;

pub struct S3Config {
	pub bucket: String,
	pub access_key_id: Option<String>,
	pub secret_access_key: Option<String>,
	pub region: Option<String>,
	pub endpoint: Option<String>,
}

pub struct S3Store {
	client: S3Client,
	bucket: String,
}

impl S3Store {
	pub async fn connect(config: S3Config) -> Result<Self> {
		let mut loader = ConfigLoader::default()
			.behavior_version(BehaviorVersion::v2023_11_09())
			.app_name(AppName::new("coldvault").expect("static app name is valid"));

		if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
			let creds = Credentials::from_keys(key_id.clone(), secret.clone(), None);
			loader = loader.credentials_provider(creds);
		}
		if let Some(region) = &config.region {
			loader = loader.region(Region::new(region.clone()));
		}

		let sdk_config = loader.load().await;
		let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
		if let Some(endpoint) = &config.endpoint {
			builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
		}

		Ok(Self {
			client: S3Client::from_conf(builder.build()),
			bucket: config.bucket,
		})
	}

	/// Classifies an SDK error per spec §7: auth/permission failures are
	/// `StoreFatal` (not worth retrying), everything else (5xx, throttling,
	/// connection resets) is `StoreTransient` and goes through the retry
	/// wrapper (`store/retry.rs`).
	fn map_sdk_error(&self, key: &str, err: impl std::fmt::Display) -> Error {
		let message = err.to_string();
		if is_fatal_s3_error(&message) {
			Error::StoreFatal(format!("s3 operation on {key}: {message}"))
		} else {
			Error::StoreTransient(format!("s3 operation on {key}: {message}"))
		}
	}
}

#[async_trait]
impl ObjectStore for S3Store {
	#[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
	async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
		debug!(key, "putting object to s3");
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(key)
			.body(ByteStream::from(bytes))
			.send()
			.await
			.map_err(|e| self.map_sdk_error(key, e))?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn get(&self, key: &str) -> Result<Vec<u8>> {
		let output = self
			.client
			.get_object()
			.bucket(&self.bucket)
			.key(key)
			.send()
			.await
			.map_err(|e| {
				let message = e.to_string();
				if message.contains("NoSuchKey") || message.contains("NotFound") {
					Error::NotFound(key.to_owned())
				} else {
					self.map_sdk_error(key, e)
				}
			})?;

		let bytes = output
			.body
			.collect()
			.await
			.map_err(|e| self.map_sdk_error(key, e))?
			.into_bytes();
		Ok(bytes.to_vec())
	}

	#[instrument(skip(self))]
	async fn delete(&self, key: &str) -> Result<()> {
		self.client
			.delete_object()
			.bucket(&self.bucket)
			.key(key)
			.send()
			.await
			.map_err(|e| self.map_sdk_error(key, e))?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn list(&self, prefix: &str) -> Result<Vec<String>> {
		let mut keys = Vec::new();
		let mut continuation: Option<String> = None;

		loop {
			let mut request = self
				.client
				.list_objects_v2()
				.bucket(&self.bucket)
				.prefix(prefix);
			if let Some(token) = continuation.take() {
				request = request.continuation_token(token);
			}

			let response = request
				.send()
				.await
				.map_err(|e| self.map_sdk_error(prefix, e))?;

			keys.extend(
				response
					.contents()
					.iter()
					.filter_map(|object| object.key().map(str::to_owned)),
			);

			if response.is_truncated().unwrap_or(false) {
				continuation = response.next_continuation_token().map(str::to_owned);
			} else {
				break;
			}
		}

		Ok(keys)
	}

	#[instrument(skip(self))]
	async fn test_connectivity(&self) -> Result<()> {
		let probe_key = ".coldvault-connectivity-probe";
		self.put(probe_key, b"ok".to_vec()).await?;
		self.delete(probe_key).await
	}
}

/// Auth/permission failures a retry can never fix (spec §7 `StoreFatal`).
/// Throttling (also a 4xx) is deliberately excluded so it stays retryable.
fn is_fatal_s3_error(message: &str) -> bool {
	["AccessDenied", "InvalidAccessKeyId", "SignatureDoesNotMatch", "Forbidden", "403"]
		.iter()
		.any(|needle| message.contains(needle))
}

impl std::fmt::Debug for S3Store {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("S3Store")
			.field("bucket", &Cow::Borrowed(self.bucket.as_str()))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn auth_failures_are_fatal_but_other_errors_are_not() {
		assert!(is_fatal_s3_error("AccessDenied: not authorized"));
		assert!(is_fatal_s3_error("InvalidAccessKeyId"));
		assert!(!is_fatal_s3_error("service unavailable, please retry"));
		assert!(!is_fatal_s3_error("connection reset by peer"));
	}
}
