//! Index model (spec §3, §6).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `^[A-Za-z0-9._]+-[0-9]{8}-[0-9]{6}$`: a logical backup name followed by
/// an 8-digit date and a 6-digit time, split on the *last two* `-`-delimited
/// components (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
	pub fn new(name: &str, when: DateTime<Utc>) -> Self {
		Self(format!("{name}-{}", when.format("%Y%m%d-%H%M%S")))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// The logical backup name (everything before the date/time suffix).
	pub fn name(&self) -> Result<&str> {
		self.split().map(|(name, _)| name)
	}

	/// The embedded timestamp, parsed as UTC naive (no offset is stored).
	pub fn timestamp(&self) -> Result<NaiveDateTime> {
		let (_, ts) = self.split()?;
		NaiveDateTime::parse_from_str(ts, "%Y%m%d-%H%M%S")
			.map_err(|e| Error::IndexCorrupt(format!("bad backup_id timestamp {ts:?}: {e}")))
	}

	fn split(&self) -> Result<(&str, &str)> {
		let parts: Vec<&str> = self.0.rsplitn(3, '-').collect();
		if parts.len() != 3 {
			return Err(Error::IndexCorrupt(format!(
				"backup_id {:?} does not have a name-date-time shape",
				self.0
			)));
		}
		// rsplitn yields [time, date, name] — reassemble name-date as one
		// string and keep the two timestamp parts to validate their shape.
		let time = parts[0];
		let date = parts[1];
		let name = parts[2];
		if date.len() != 8 || time.len() != 6 || !date.bytes().all(|b| b.is_ascii_digit()) || !time.bytes().all(|b| b.is_ascii_digit()) {
			return Err(Error::IndexCorrupt(format!(
				"backup_id {:?} has a malformed date/time suffix",
				self.0
			)));
		}
		if name.is_empty() {
			return Err(Error::IndexCorrupt(format!(
				"backup_id {:?} has an empty logical name",
				self.0
			)));
		}
		Ok((name, &self.0[name.len() + 1..]))
	}
}

impl fmt::Display for BackupId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for BackupId {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let id = BackupId(s.to_owned());
		id.split()?; // validate shape eagerly
		Ok(id)
	}
}

impl PartialOrd for BackupId {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for BackupId {
	/// Orders by embedded timestamp; ties (shouldn't happen) fall back to
	/// the raw string so the ordering is still total.
	fn cmp(&self, other: &Self) -> Ordering {
		match (self.timestamp(), other.timestamp()) {
			(Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
			_ => self.0.cmp(&other.0),
		}
	}
}

/// One regular file observed at walk time (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
	/// Relative to the snapshot's `source_path` (see DESIGN.md — resolved
	/// Open Question, not the original absolute-path behaviour).
	pub path: String,
	pub size: u64,
	pub modified_time: DateTime<Utc>,
	pub checksum: String,
	/// Empty iff this entry's data was not successfully uploaded.
	#[serde(default)]
	pub storage_key: String,
}

impl FileEntry {
	pub fn is_uploaded(&self) -> bool {
		!self.storage_key.is_empty()
	}
}

/// One snapshot manifest (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
	pub backup_id: BackupId,
	pub created_at: DateTime<Utc>,
	pub source_path: String,
	pub files: Vec<FileEntry>,
	pub total_files: u64,
	pub total_size: u64,
}

impl Index {
	pub fn new(backup_id: BackupId, source_path: String, files: Vec<FileEntry>) -> Self {
		let mut index = Self {
			backup_id,
			created_at: Utc::now(),
			source_path,
			files,
			total_files: 0,
			total_size: 0,
		};
		index.recompute_totals();
		index
	}

	pub fn recompute_totals(&mut self) {
		self.total_files = self.files.len() as u64;
		self.total_size = self.files.iter().map(|f| f.size).sum();
	}

	pub fn to_json(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec_pretty(self)?)
	}

	/// Parse an index, rejecting the IndexCorrupt conditions from spec §7:
	/// JSON decode failure (bubbled via `?`/`From`), empty files list, or
	/// an absent/malformed `backup_id`.
	pub fn from_json(bytes: &[u8]) -> Result<Self> {
		let index: Index = serde_json::from_slice(bytes)?;
		if index.files.is_empty() {
			return Err(Error::IndexCorrupt(
				"index has an empty files list".into(),
			));
		}
		index.backup_id.name()?;
		Ok(index)
	}

	/// First occurrence of each path wins (spec §4.1 tie-break).
	pub fn first_occurrence_by_path(&self) -> std::collections::HashMap<&str, &FileEntry> {
		let mut map = std::collections::HashMap::new();
		for entry in &self.files {
			map.entry(entry.path.as_str()).or_insert(entry);
		}
		map
	}
}

/// The `.metadata` sidecar for a chunked object (spec §3, §6).
///
/// Unknown keys are tolerated for forward compatibility (DESIGN NOTES:
/// "typed sidecar"); only `chunks` is load-bearing for restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
	pub chunks: u32,
	pub size: u64,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChunkMetadata {
	pub fn new(chunks: u32, size: u64) -> Self {
		Self {
			chunks,
			size,
			extra: serde_json::Map::new(),
		}
	}

	pub fn to_json(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(self)?)
	}

	pub fn from_json(bytes: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(bytes)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn backup_id_round_trips() {
		let when = Utc.with_ymd_and_hms(2026, 7, 27, 12, 30, 0).unwrap();
		let id = BackupId::new("nightly.db", when);
		assert_eq!(id.as_str(), "nightly.db-20260727-123000");
		assert_eq!(id.name().unwrap(), "nightly.db");
		assert_eq!(id.timestamp().unwrap(), when.naive_utc());
	}

	#[test]
	fn backup_id_name_can_contain_dashes() {
		let id: BackupId = "my-project-20260727-123000".parse().unwrap();
		assert_eq!(id.name().unwrap(), "my-project");
	}

	#[test]
	fn backup_id_rejects_malformed_input() {
		assert!("not-a-backup-id".parse::<BackupId>().is_err());
		assert!("name-2026072-123000".parse::<BackupId>().is_err());
	}

	#[test]
	fn ordering_is_by_timestamp() {
		let a: BackupId = "n-20260101-000000".parse().unwrap();
		let b: BackupId = "n-20260201-000000".parse().unwrap();
		assert!(a < b);
	}

	#[test]
	fn index_from_json_rejects_empty_files() {
		let when = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
		let index = Index::new(BackupId::new("n", when), "/src".into(), vec![]);
		let bytes = index.to_json().unwrap();
		assert!(Index::from_json(&bytes).is_err());
	}

	#[test]
	fn chunk_metadata_tolerates_unknown_keys() {
		let raw = br#"{"chunks": 3, "size": 100, "algorithm": "future-proof"}"#;
		let meta = ChunkMetadata::from_json(raw).unwrap();
		assert_eq!(meta.chunks, 3);
		assert_eq!(meta.size, 100);
	}
}
