//! Bounded worker pool for per-file upload/download tasks (spec §4.4, §5).
//!
//! `tokio::sync::Semaphore` bounds concurrency the same way the teacher's
//! data-bar plumbing assumes one task per file; sort policy and
//! cancellation are new since the teacher's uploads run one file at a time
//! from the CLI rather than fanning out a whole tree.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPolicy {
	/// Used during backup: improves early throughput and visibility.
	SmallestFirst,
	/// Used during restore: keeps the remaining-time estimate honest.
	LargestLast,
}

impl SortPolicy {
	/// Sorts `items` in place by `size_of`, per spec §4.4.
	pub fn sort_by_size<T>(self, items: &mut [T], size_of: impl Fn(&T) -> u64) {
		match self {
			SortPolicy::SmallestFirst => items.sort_by_key(|item| size_of(item)),
			SortPolicy::LargestLast => items.sort_by_key(|item| std::cmp::Reverse(size_of(item))),
		}
	}
}

/// Minimum cancellation deadline floor (spec §4.4).
const MIN_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// `max_workers × per_file_timeout`, floored at 30 minutes (spec §4.4).
pub fn compute_deadline(max_workers: usize, per_file_timeout: Duration) -> Duration {
	let scaled = per_file_timeout.saturating_mul(max_workers.max(1) as u32);
	scaled.max(MIN_DEADLINE)
}

/// Aggregate bytes-done across every task in the pool (spec §5 "progress
/// aggregator is the only intra-pool shared mutable state").
#[derive(Default)]
pub struct ProgressAggregator {
	done: AtomicU64,
	total: AtomicU64,
}

impl ProgressAggregator {
	pub fn new(total: u64) -> Arc<Self> {
		Arc::new(Self {
			done: AtomicU64::new(0),
			total: AtomicU64::new(total),
		})
	}

	pub fn add_done(&self, bytes: u64) {
		self.done.fetch_add(bytes, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> (u64, u64) {
		(
			self.done.load(Ordering::Relaxed),
			self.total.load(Ordering::Relaxed),
		)
	}
}

/// A bounded pool of `max_workers` concurrent per-file tasks, with a global
/// cancellation deadline (spec §4.4) and cooperative first/second-signal
/// cancellation (spec §5).
pub struct WorkerPool {
	semaphore: Arc<Semaphore>,
	cancellation: CancellationToken,
	deadline: Duration,
}

impl WorkerPool {
	pub fn new(max_workers: usize, per_file_timeout: Duration, cancellation: CancellationToken) -> Self {
		Self {
			semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
			deadline: compute_deadline(max_workers, per_file_timeout),
			cancellation,
		}
	}

	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancellation.clone()
	}

	/// Runs `items` through `task` with at most `max_workers` concurrently
	/// in flight, honoring the pool's cancellation token and deadline.
	/// Per-item errors are collected rather than aborting the whole batch,
	/// except `Error::DeadlineExceeded`/cancellation, which stop dispatch of
	/// new work (in-flight tasks still run to their next I/O boundary).
	pub async fn run_all<T, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<Result<()>>
	where
		T: Send + 'static,
		F: Fn(T) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send,
	{
		let task = Arc::new(task);
		let mut handles = Vec::with_capacity(items.len());

		let deadline_future = tokio::time::sleep(self.deadline);
		tokio::pin!(deadline_future);

		for item in items {
			if self.cancellation.is_cancelled() {
				debug!("pool cancelled, skipping remaining dispatch");
				handles.push(tokio::spawn(async { Err(Error::DeadlineExceeded) }));
				continue;
			}

			let permit = tokio::select! {
				permit = self.semaphore.clone().acquire_owned() => permit,
				_ = &mut deadline_future => {
					warn!("global deadline exceeded while waiting for a worker slot");
					self.cancellation.cancel();
					handles.push(tokio::spawn(async { Err(Error::DeadlineExceeded) }));
					continue;
				}
				_ = self.cancellation.cancelled() => {
					handles.push(tokio::spawn(async { Err(Error::DeadlineExceeded) }));
					continue;
				}
			};

			let task = task.clone();
			let cancellation = self.cancellation.clone();
			handles.push(tokio::spawn(async move {
				let _permit = permit;
				if cancellation.is_cancelled() {
					return Err(Error::DeadlineExceeded);
				}
				task(item).await
			}));
		}

		let mut results = Vec::with_capacity(handles.len());
		for handle in handles {
			results.push(match handle.await {
				Ok(result) => result,
				Err(join_error) => Err(Error::StoreFatal(format!("worker task panicked: {join_error}"))),
			});
		}
		results
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	#[test]
	fn smallest_first_sorts_ascending() {
		let mut items = vec![30u64, 10, 20];
		SortPolicy::SmallestFirst.sort_by_size(&mut items, |x| *x);
		assert_eq!(items, vec![10, 20, 30]);
	}

	#[test]
	fn largest_last_sorts_descending() {
		let mut items = vec![10u64, 30, 20];
		SortPolicy::LargestLast.sort_by_size(&mut items, |x| *x);
		assert_eq!(items, vec![30, 20, 10]);
	}

	#[test]
	fn deadline_is_floored_at_thirty_minutes() {
		assert_eq!(
			compute_deadline(1, Duration::from_secs(1)),
			Duration::from_secs(30 * 60)
		);
	}

	#[test]
	fn deadline_scales_with_worker_count() {
		assert_eq!(
			compute_deadline(10, Duration::from_secs(300)),
			Duration::from_secs(3000)
		);
	}

	#[tokio::test]
	async fn runs_all_items_respecting_the_concurrency_bound() {
		let pool = WorkerPool::new(2, Duration::from_secs(5), CancellationToken::new());
		let concurrent = Arc::new(AtomicUsize::new(0));
		let max_seen = Arc::new(AtomicUsize::new(0));

		let items: Vec<usize> = (0..6).collect();
		let concurrent_for_task = concurrent.clone();
		let max_seen_for_task = max_seen.clone();
		let results = pool
			.run_all(items, move |_i| {
				let concurrent = concurrent_for_task.clone();
				let max_seen = max_seen_for_task.clone();
				async move {
					let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
					max_seen.fetch_max(now, Ordering::SeqCst);
					tokio::time::sleep(Duration::from_millis(10)).await;
					concurrent.fetch_sub(1, Ordering::SeqCst);
					Ok(())
				}
			})
			.await;

		assert!(results.iter().all(|r| r.is_ok()));
		assert!(max_seen.load(Ordering::SeqCst) <= 2);
	}

	#[tokio::test]
	async fn cancellation_stops_new_dispatch() {
		let token = CancellationToken::new();
		let pool = WorkerPool::new(1, Duration::from_secs(5), token.clone());
		token.cancel();

		let results = pool.run_all(vec![1, 2, 3], |_| async { Ok(()) }).await;
		assert!(results.iter().all(|r| r.is_err()));
	}
}
