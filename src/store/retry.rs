//! Retry/timeout combinator wrapping any [`ObjectStore`] (spec §4.5).
//!
//! Grounded in the retry-with-backoff shape of
//! `crates/bestool/src/file_chunker.rs`'s `with_next_chunk` (try, fail,
//! shrink/back off, try again up to a bound), generalised here to a fixed
//! exponential backoff over `put`/`get`/`delete` rather than a shrinking
//! chunk size.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	/// Per-attempt deadline (spec §4.5 `network_timeout`, default 30s).
	pub per_attempt_deadline: Duration,
	/// Exponential backoff base (spec §4.5 `retry_delay`, default 2s).
	pub backoff_base: Duration,
	/// Backoff cap (spec §4.5, fixed at 60s).
	pub backoff_cap: Duration,
	/// Maximum total attempts (spec §4.5 `retry_attempts`, default 1).
	pub attempts: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			per_attempt_deadline: Duration::from_secs(30),
			backoff_base: Duration::from_secs(2),
			backoff_cap: Duration::from_secs(60),
			attempts: 1,
		}
	}
}

impl RetryPolicy {
	fn backoff_for_attempt(&self, attempt: u32) -> Duration {
		let scaled = self.backoff_base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
		scaled.min(self.backoff_cap)
	}
}

/// Wraps an inner [`ObjectStore`], applying [`RetryPolicy`] to every call.
pub struct RetryingStore<S> {
	inner: S,
	policy: RetryPolicy,
}

impl<S: ObjectStore> RetryingStore<S> {
	pub fn new(inner: S, policy: RetryPolicy) -> Self {
		Self { inner, policy }
	}

	#[instrument(skip(self, op), level = "debug")]
	async fn with_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = Result<T>>,
	{
		let mut last_error = None;

		for attempt in 0..self.policy.attempts.max(1) {
			let attempt_result = tokio::time::timeout(self.policy.per_attempt_deadline, op()).await;

			match attempt_result {
				Ok(Ok(value)) => return Ok(value),
				Ok(Err(err)) if err.is_retryable() => {
					debug!(operation, attempt, ?err, "store operation failed, may retry");
					last_error = Some(err);
				}
				Ok(Err(err)) => return Err(err),
				Err(_elapsed) => {
					debug!(operation, attempt, "store operation timed out, may retry");
					last_error = Some(Error::StoreTransient(format!(
						"{operation} timed out after {:?}",
						self.policy.per_attempt_deadline
					)));
				}
			}

			if attempt + 1 < self.policy.attempts {
				let backoff = self.policy.backoff_for_attempt(attempt);
				tokio::time::sleep(backoff).await;
			}
		}

		let err = last_error.unwrap_or_else(|| Error::StoreTransient(operation.to_owned()));
		warn!(operation, attempts = self.policy.attempts, "store operation exhausted retries");
		Err(err)
	}
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
	async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
		self.with_retry("put", || self.inner.put(key, bytes.clone()))
			.await
	}

	async fn get(&self, key: &str) -> Result<Vec<u8>> {
		self.with_retry("get", || self.inner.get(key)).await
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.with_retry("delete", || self.inner.delete(key)).await
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>> {
		self.with_retry("list", || self.inner.list(prefix)).await
	}

	async fn test_connectivity(&self) -> Result<()> {
		self.with_retry("test_connectivity", || self.inner.test_connectivity())
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::memory::MemoryStore;

	#[tokio::test]
	async fn succeeds_without_retry_when_first_attempt_works() {
		let store = RetryingStore::new(MemoryStore::new(), RetryPolicy::default());
		store.put("k", b"v".to_vec()).await.unwrap();
		assert_eq!(store.get("k").await.unwrap(), b"v".to_vec());
	}

	#[tokio::test]
	async fn retries_transient_failures_up_to_the_attempt_budget() {
		let inner = MemoryStore::new();
		inner.fail_next_n_calls(2);
		let store = RetryingStore::new(
			inner,
			RetryPolicy {
				attempts: 3,
				backoff_base: Duration::from_millis(1),
				backoff_cap: Duration::from_millis(5),
				..Default::default()
			},
		);
		store.put("k", b"v".to_vec()).await.unwrap();
		assert_eq!(store.get("k").await.unwrap(), b"v".to_vec());
	}

	#[tokio::test]
	async fn exhausting_attempts_surfaces_the_last_error() {
		let inner = MemoryStore::new();
		inner.fail_next_n_calls(10);
		let store = RetryingStore::new(
			inner,
			RetryPolicy {
				attempts: 2,
				backoff_base: Duration::from_millis(1),
				backoff_cap: Duration::from_millis(5),
				..Default::default()
			},
		);
		assert!(store.put("k", b"v".to_vec()).await.is_err());
	}

	#[tokio::test]
	async fn fatal_errors_are_not_retried() {
		let inner = MemoryStore::new();
		// Getting a key that was never put is a fatal NotFound, not transient.
		let store = RetryingStore::new(inner, RetryPolicy::default());
		assert!(matches!(
			store.get("missing").await,
			Err(Error::NotFound(_))
		));
	}
}
