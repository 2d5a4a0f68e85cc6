//! Set-difference between two snapshots, and previous-snapshot selection
//! (spec §4.1).

use crate::model::{FileEntry, Index};

#[derive(Debug, Clone, Default)]
pub struct Diff {
	pub added: Vec<FileEntry>,
	pub modified: Vec<(FileEntry, FileEntry)>,
	pub deleted: Vec<FileEntry>,
}

impl Diff {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
	}
}

/// Compare `current` against `previous`, keyed on path, first occurrence
/// wins on either side (spec §4.1 tie-break).
pub fn diff(current: &Index, previous: &Index) -> Diff {
	let current_by_path = current.first_occurrence_by_path();
	let previous_by_path = previous.first_occurrence_by_path();

	let mut out = Diff::default();

	for (path, entry) in &current_by_path {
		match previous_by_path.get(*path) {
			None => out.added.push((*entry).clone()),
			Some(prev) => {
				if entry.size != prev.size
					|| entry.modified_time != prev.modified_time
					|| entry.checksum != prev.checksum
				{
					out.modified.push(((*prev).clone(), (*entry).clone()));
				}
			}
		}
	}

	for (path, entry) in &previous_by_path {
		if !current_by_path.contains_key(*path) {
			out.deleted.push((*entry).clone());
		}
	}

	out
}

/// Select the previous snapshot for a logical backup `name` (spec §4.1):
/// most recent index whose `backup_id` name matches `name`; failing that,
/// the most recent index of any name; failing that, `None` (first backup).
pub fn select_previous<'a>(indexes: &'a [Index], name: &str) -> Option<&'a Index> {
	let mut by_name: Vec<&Index> = indexes
		.iter()
		.filter(|i| i.backup_id.name().map(|n| n == name).unwrap_or(false))
		.collect();
	by_name.sort_by(|a, b| a.backup_id.cmp(&b.backup_id));
	if let Some(last) = by_name.last() {
		return Some(*last);
	}

	let mut any: Vec<&Index> = indexes.iter().collect();
	any.sort_by(|a, b| a.backup_id.cmp(&b.backup_id));
	any.last().copied()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::BackupId;
	use chrono::{TimeZone, Utc};

	fn entry(path: &str, size: u64, checksum: &str) -> FileEntry {
		FileEntry {
			path: path.to_string(),
			size,
			modified_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
			checksum: checksum.to_string(),
			storage_key: checksum.to_string(),
		}
	}

	fn index(name: &str, ts: &str, files: Vec<FileEntry>) -> Index {
		let id: BackupId = format!("{name}-{ts}").parse().unwrap();
		Index::new(id, "/src".into(), files)
	}

	#[test]
	fn detects_added_modified_deleted() {
		let previous = index(
			"n",
			"20260101-000000",
			vec![entry("a", 5, "c1"), entry("b", 5, "c2")],
		);
		let current = index(
			"n",
			"20260102-000000",
			vec![entry("a", 6, "c1-new"), entry("c", 1, "c3")],
		);

		let d = diff(&current, &previous);
		assert_eq!(d.added.len(), 1);
		assert_eq!(d.added[0].path, "c");
		assert_eq!(d.modified.len(), 1);
		assert_eq!(d.modified[0].1.path, "a");
		assert_eq!(d.deleted.len(), 1);
		assert_eq!(d.deleted[0].path, "b");
	}

	#[test]
	fn identical_snapshots_yield_empty_diff() {
		let files = vec![entry("a", 5, "c1")];
		let previous = index("n", "20260101-000000", files.clone());
		let current = index("n", "20260102-000000", files);
		assert!(diff(&current, &previous).is_empty());
	}

	#[test]
	fn select_previous_prefers_same_name_then_falls_back() {
		let n1 = index("n", "20260101-000000", vec![entry("a", 1, "c")]);
		let n2 = index("n", "20260102-000000", vec![entry("a", 1, "c")]);
		let m1 = index("m", "20260103-000000", vec![entry("a", 1, "c")]);

		let all = vec![n1.clone(), n2.clone(), m1.clone()];
		let selected = select_previous(&all, "n").unwrap();
		assert_eq!(selected.backup_id, n2.backup_id);

		let selected_other = select_previous(&all, "nonexistent").unwrap();
		assert_eq!(selected_other.backup_id, m1.backup_id);

		assert!(select_previous(&[], "n").is_none());
	}
}
