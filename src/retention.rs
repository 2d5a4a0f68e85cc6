//! Retention: age+count-bounded eviction of whole snapshots (spec §4.6).
//!
//! Grounded in the same "enumerate, sort, select" shape `diff::select_previous`
//! uses for picking one prior snapshot, generalised here to picking a *set*
//! to delete, plus the deletion-order guarantee from spec §3 "Lifecycles"
//! (data before index).

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::chunked::{chunk_key, metadata_key};
use crate::error::{Error, Result};
use crate::model::{BackupId, ChunkMetadata, Index};
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
	pub max_backups: Option<u32>,
	pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
	fn is_noop(&self) -> bool {
		self.max_backups.is_none() && self.max_age_days.is_none()
	}
}

/// Per-snapshot outcome of a retention run, so the caller can report
/// without aborting the whole run on one failure (spec §7).
#[derive(Debug)]
pub struct RetentionReport {
	pub deleted: Vec<BackupId>,
	pub failed: Vec<(BackupId, Error)>,
}

/// Which backups are candidates for eviction. Scoping to a single logical
/// name (spec §4.6) prevents a rarely-run backup from pruning a frequently-
/// run one when retention is triggered right after a backup completes.
pub enum Scope<'a> {
	Named(&'a str),
	All,
}

/// Selects snapshots for deletion: every snapshot at count-position ≥
/// `max_backups`, unioned with every snapshot older than `now - max_age_days`
/// (spec §4.6). `indexes` need not be sorted; ties in timestamp are broken
/// by `BackupId`'s total order.
pub fn select_for_deletion(indexes: &[Index], now: DateTime<Utc>, policy: &RetentionPolicy) -> Vec<BackupId> {
	if policy.is_noop() {
		return Vec::new();
	}

	let mut sorted: Vec<&Index> = indexes.iter().collect();
	sorted.sort_by(|a, b| b.backup_id.cmp(&a.backup_id)); // newest first

	let mut marked = std::collections::HashSet::new();

	if let Some(max_backups) = policy.max_backups {
		for index in sorted.iter().skip(max_backups as usize) {
			marked.insert(index.backup_id.clone());
		}
	}

	if let Some(max_age_days) = policy.max_age_days {
		let cutoff = now - chrono::Duration::days(max_age_days as i64);
		for index in &sorted {
			// The index's own embedded timestamp is the age reference, not
			// `created_at`, since it's the identity that survives JSON
			// round-trips unambiguously (spec §6 backup_id format).
			if let Ok(ts) = index.backup_id.timestamp() {
				if ts.and_utc() < cutoff {
					marked.insert(index.backup_id.clone());
				}
			}
		}
	}

	marked.into_iter().collect()
}

/// Runs retention against every snapshot visible in the store, scoped per
/// `scope` (spec §4.6 "Scoping").
pub async fn run_scoped<S: ObjectStore + ?Sized>(
	store: &S,
	policy: &RetentionPolicy,
	scope: Option<&str>,
) -> Result<RetentionReport> {
	match scope {
		Some(name) => run(store, policy, Scope::Named(name)).await,
		None => run(store, policy, Scope::All).await,
	}
}

pub async fn run<S: ObjectStore + ?Sized>(store: &S, policy: &RetentionPolicy, scope: Scope<'_>) -> Result<RetentionReport> {
	let mut report = RetentionReport {
		deleted: Vec::new(),
		failed: Vec::new(),
	};

	if policy.is_noop() {
		return Ok(report);
	}

	let all = load_all_indexes(store).await?;
	let scoped: Vec<Index> = match scope {
		Scope::Named(name) => all
			.into_iter()
			.filter(|i| i.backup_id.name().map(|n| n == name).unwrap_or(false))
			.collect(),
		Scope::All => all,
	};

	let marked = select_for_deletion(&scoped, Utc::now(), policy);
	debug!(count = marked.len(), "snapshots marked for retention deletion");

	let by_id: std::collections::HashMap<&BackupId, &Index> =
		scoped.iter().map(|i| (&i.backup_id, i)).collect();

	for backup_id in marked {
		let Some(index) = by_id.get(&backup_id) else {
			continue;
		};
		match delete_snapshot(store, index).await {
			Ok(()) => report.deleted.push(backup_id),
			Err(e) => {
				warn!(backup_id = %backup_id, ?e, "failed to delete snapshot during retention");
				report.failed.push((backup_id, e));
			}
		}
	}

	Ok(report)
}

/// Deletes one snapshot's data objects (or chunk set + sidecar) before its
/// index (spec §3 "Lifecycles", §4.6 "Deletion order"). Per-object deletion
/// errors are logged and don't abort the snapshot; only a failure deleting
/// the index itself fails the whole snapshot-deletion.
pub async fn delete_snapshot<S: ObjectStore + ?Sized>(store: &S, index: &Index) -> Result<()> {
	for entry in &index.files {
		if !entry.is_uploaded() {
			continue;
		}
		let base_key = format!("data/{}/{}", index.backup_id.as_str(), entry.storage_key);
		if let Err(e) = delete_object_or_chunks(store, &base_key).await {
			warn!(key = base_key, ?e, "failed to delete data object during retention");
		}
	}

	let index_key = format!("indexes/{}.json", index.backup_id.as_str());
	store.delete(&index_key).await
}

async fn delete_object_or_chunks<S: ObjectStore + ?Sized>(store: &S, base_key: &str) -> Result<()> {
	match store.get(&metadata_key(base_key)).await {
		Ok(sidecar_bytes) => {
			let sidecar = ChunkMetadata::from_json(&sidecar_bytes)?;
			for index in 0..sidecar.chunks {
				store.delete(&chunk_key(base_key, index)).await?;
			}
			store.delete(&metadata_key(base_key)).await
		}
		Err(Error::NotFound(_)) => store.delete(base_key).await,
		Err(e) => Err(e),
	}
}

pub(crate) async fn load_all_indexes<S: ObjectStore + ?Sized>(store: &S) -> Result<Vec<Index>> {
	let keys = store.list("indexes/").await?;
	let mut indexes = Vec::with_capacity(keys.len());
	for key in keys {
		match store.get(&key).await {
			Ok(bytes) => match Index::from_json(&bytes) {
				Ok(index) => indexes.push(index),
				Err(e) => warn!(key, ?e, "skipping corrupt index during retention"),
			},
			Err(e) => warn!(key, ?e, "failed to load index during retention"),
		}
	}
	Ok(indexes)
}
