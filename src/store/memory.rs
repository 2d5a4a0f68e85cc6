//! In-process [`ObjectStore`] backing every unit/integration test in this
//! crate, plus a fault-injection harness for exercising [`crate::store::retry`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::store::ObjectStore;

#[derive(Default)]
pub struct MemoryStore {
	objects: Mutex<HashMap<String, Vec<u8>>>,
	remaining_failures: AtomicU32,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// The next `n` calls to `put`/`get`/`delete`/`list` return a transient
	/// error instead of touching storage. Used to drive
	/// [`crate::store::retry::RetryingStore`] through its retry path.
	pub fn fail_next_n_calls(&self, n: u32) {
		self.remaining_failures.store(n, Ordering::SeqCst);
	}

	fn maybe_fail(&self, operation: &str) -> Result<()> {
		let mut remaining = self.remaining_failures.load(Ordering::SeqCst);
		while remaining > 0 {
			match self.remaining_failures.compare_exchange(
				remaining,
				remaining - 1,
				Ordering::SeqCst,
				Ordering::SeqCst,
			) {
				Ok(_) => {
					return Err(Error::StoreTransient(format!(
						"injected failure on {operation}"
					)))
				}
				Err(actual) => remaining = actual,
			}
		}
		Ok(())
	}
}

#[async_trait]
impl ObjectStore for MemoryStore {
	async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
		self.maybe_fail("put")?;
		self.objects.lock().unwrap().insert(key.to_owned(), bytes);
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Vec<u8>> {
		self.maybe_fail("get")?;
		self.objects
			.lock()
			.unwrap()
			.get(key)
			.cloned()
			.ok_or_else(|| Error::NotFound(key.to_owned()))
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.maybe_fail("delete")?;
		self.objects.lock().unwrap().remove(key);
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>> {
		self.maybe_fail("list")?;
		let mut keys: Vec<String> = self
			.objects
			.lock()
			.unwrap()
			.keys()
			.filter(|k| k.starts_with(prefix))
			.cloned()
			.collect();
		keys.sort();
		Ok(keys)
	}

	async fn test_connectivity(&self) -> Result<()> {
		self.maybe_fail("test_connectivity")?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn put_then_get_roundtrips() {
		let store = MemoryStore::new();
		store.put("a/b", b"hello".to_vec()).await.unwrap();
		assert_eq!(store.get("a/b").await.unwrap(), b"hello".to_vec());
	}

	#[tokio::test]
	async fn get_on_missing_key_is_not_found() {
		let store = MemoryStore::new();
		assert!(matches!(store.get("nope").await, Err(Error::NotFound(_))));
	}

	#[tokio::test]
	async fn delete_removes_the_key() {
		let store = MemoryStore::new();
		store.put("k", b"v".to_vec()).await.unwrap();
		store.delete("k").await.unwrap();
		assert!(matches!(store.get("k").await, Err(Error::NotFound(_))));
	}

	#[tokio::test]
	async fn list_filters_by_prefix_and_sorts() {
		let store = MemoryStore::new();
		store.put("backups/a", vec![]).await.unwrap();
		store.put("backups/b", vec![]).await.unwrap();
		store.put("other/c", vec![]).await.unwrap();
		assert_eq!(
			store.list("backups/").await.unwrap(),
			vec!["backups/a".to_string(), "backups/b".to_string()]
		);
	}

	#[tokio::test]
	async fn fail_next_n_calls_injects_exactly_n_transient_failures() {
		let store = MemoryStore::new();
		store.fail_next_n_calls(2);
		assert!(store.put("k", vec![]).await.is_err());
		assert!(store.put("k", vec![]).await.is_err());
		store.put("k", vec![]).await.unwrap();
	}

	#[tokio::test]
	async fn exists_reflects_presence() {
		let store = MemoryStore::new();
		assert!(!store.exists("k").await.unwrap());
		store.put("k", vec![]).await.unwrap();
		assert!(store.exists("k").await.unwrap());
	}
}
