//! Orphan sweep: removes storage objects not referenced by any surviving
//! index (spec §4.7), independent of retention.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::chunked::base_key;
use crate::error::Result;
use crate::model::Index;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOptions {
	/// Report intended deletions without performing them.
	pub dry_run: bool,
	/// Also delete entire `data/<backup_id>/` subtrees whose index object
	/// is missing (a torn/partial deletion, or a crash mid-backup).
	pub remove_orphaned_backups: bool,
}

#[derive(Debug, Default)]
pub struct SweepReport {
	/// Object keys deleted (or that would be deleted, in dry-run mode).
	pub deleted_objects: Vec<String>,
	/// `backup_id`s whose entire `data/` subtree was removed because no
	/// matching index survives (only populated when
	/// `remove_orphaned_backups` is set).
	pub deleted_backup_prefixes: Vec<String>,
}

/// Sweeps every object under `data/` not referenced by any index in
/// `surviving_indexes`. Algorithm (spec §4.7):
/// 1. Build the set of `(backup_id, storage_key)` pairs referenced by a
///    surviving index.
/// 2. For each object under `data/<backup_id>/...`, strip the
///    `.chunk.NNN`/`.metadata` suffix to get its base key; if
///    `(backup_id, base_key)` isn't referenced, schedule it for deletion.
/// 3. If `remove_orphaned_backups` is set, additionally remove whole
///    `data/<backup_id>/` subtrees whose index object is missing entirely.
pub async fn orphan_sweep<S: ObjectStore + ?Sized>(
	store: &S,
	surviving_indexes: &[Index],
	options: SweepOptions,
) -> Result<SweepReport> {
	let referenced = referenced_keys(surviving_indexes);
	let surviving_backup_ids: HashSet<&str> = surviving_indexes
		.iter()
		.map(|i| i.backup_id.as_str())
		.collect();

	let mut report = SweepReport::default();

	let data_keys = store.list("data/").await?;
	for key in &data_keys {
		let Some((backup_id, storage_base)) = split_data_key(key) else {
			continue;
		};

		if !surviving_backup_ids.contains(backup_id) {
			// Handled below by the whole-prefix pass if enabled; otherwise
			// left alone (we can't tell "evicted intentionally" from
			// "partially missing index" without that option).
			continue;
		}

		if !referenced.contains(&(backup_id, storage_base)) {
			debug!(key, "orphaned data object not referenced by any index");
			if !options.dry_run {
				store.delete(key).await?;
			}
			report.deleted_objects.push(key.clone());
		}
	}

	if options.remove_orphaned_backups {
		let orphaned_backups = distinct_backup_ids(&data_keys)
			.into_iter()
			.filter(|id| !surviving_backup_ids.contains(id.as_str()))
			.collect::<Vec<_>>();

		for backup_id in orphaned_backups {
			let prefix = format!("data/{backup_id}/");
			info!(backup_id, "removing orphaned backup's entire data prefix");
			let keys = store.list(&prefix).await?;
			for key in &keys {
				if !options.dry_run {
					if let Err(e) = store.delete(key).await {
						warn!(key, ?e, "failed to delete object during orphaned-backup sweep");
					}
				}
				report.deleted_objects.push(key.clone());
			}
			report.deleted_backup_prefixes.push(backup_id);
		}
	}

	Ok(report)
}

/// `(backup_id, storage_key)` pairs referenced by at least one surviving
/// index's uploaded entries.
fn referenced_keys(indexes: &[Index]) -> HashSet<(&str, &str)> {
	let mut set = HashSet::new();
	for index in indexes {
		for entry in &index.files {
			if entry.is_uploaded() {
				set.insert((index.backup_id.as_str(), entry.storage_key.as_str()));
			}
		}
	}
	set
}

/// Splits `data/<backup_id>/<storage_key>[.chunk.NNN|.metadata]` into
/// `(backup_id, base_storage_key)`.
fn split_data_key(key: &str) -> Option<(&str, &str)> {
	let rest = key.strip_prefix("data/")?;
	let (backup_id, object_key) = rest.split_once('/')?;
	Some((backup_id, base_key(object_key)))
}

fn distinct_backup_ids(data_keys: &[String]) -> Vec<String> {
	let mut ids: Vec<String> = data_keys
		.iter()
		.filter_map(|k| k.strip_prefix("data/"))
		.filter_map(|rest| rest.split_once('/').map(|(id, _)| id.to_owned()))
		.collect();
	ids.sort();
	ids.dedup();
	ids
}
