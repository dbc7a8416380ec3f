// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Directory-backed crash storage.
//!
//! Each record is a group of files sharing the identifier as a stem:
//!
//! ```text
//! <dir>/<id>.crash              raw report bytes
//! <dir>/<id>.meta.json          StoredCrashContext
//! <dir>/<id>.attachments.json   Vec<Attachment>
//! ```
//!
//! A record is pending while its `.crash` file exists. Writes go through a
//! `.tmp` sibling that is renamed into place; siblings left by an interrupted
//! write are removed with their record or by [`CrashStorage::cleanup_all`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use loom_crash_reporter_core::{Attachment, StoredCrashContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::ports::CrashStorage;

const REPORT_EXTENSION: &str = ".crash";
const METADATA_EXTENSION: &str = ".meta.json";
const ATTACHMENTS_EXTENSION: &str = ".attachments.json";
const TMP_SUFFIX: &str = ".tmp";
const RECORD_EXTENSIONS: [&str; 3] = [
	REPORT_EXTENSION,
	METADATA_EXTENSION,
	ATTACHMENTS_EXTENSION,
];

pub struct FileCrashStorage {
	dir: PathBuf,
}

impl FileCrashStorage {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Storage under the platform data directory, e.g.
	/// `~/.local/share/loom/crash-reports` on Linux.
	pub fn from_xdg() -> Result<Self, StorageError> {
		let dir = default_dir().ok_or_else(|| {
			StorageError::Unavailable("could not determine XDG data directory".to_string())
		})?;

		std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(dir.display().to_string(), e))?;

		info!(dir = %dir.display(), "initialized crash report storage");
		Ok(Self::new(dir))
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path(&self, id: &str, extension: &str) -> Result<PathBuf, StorageError> {
		validate_identifier(id)?;
		Ok(self.dir.join(format!("{id}{extension}")))
	}

	fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
		std::fs::create_dir_all(&self.dir)
			.map_err(|e| StorageError::io(self.dir.display().to_string(), e))?;

		let tmp = tmp_path(path);
		std::fs::write(&tmp, data).map_err(|e| StorageError::io(tmp.display().to_string(), e))?;
		std::fs::rename(&tmp, path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
		Ok(())
	}

	fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		match std::fs::read(path) {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::io(path.display().to_string(), e)),
		}
	}

	fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
		let json = serde_json::to_vec_pretty(value)
			.map_err(|e| StorageError::corrupt(path.display().to_string(), e))?;
		self.write_atomic(path, &json)
	}

	fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StorageError> {
		match self.read_optional(path)? {
			Some(data) => serde_json::from_slice(&data)
				.map(Some)
				.map_err(|e| StorageError::corrupt(path.display().to_string(), e)),
			None => Ok(None),
		}
	}

	fn remove_if_exists(&self, path: &Path) -> Result<(), StorageError> {
		match std::fs::remove_file(path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::io(path.display().to_string(), e)),
		}
	}
}

fn tmp_path(path: &Path) -> PathBuf {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(TMP_SUFFIX);
	PathBuf::from(tmp)
}

/// Whether `name` is a record part or an interrupted write of one.
fn is_record_file(name: &str) -> bool {
	let name = name.strip_suffix(TMP_SUFFIX).unwrap_or(name);
	RECORD_EXTENSIONS.iter().any(|extension| {
		name
			.strip_suffix(extension)
			.is_some_and(|id| validate_identifier(id).is_ok())
	})
}

/// Default crash report directory under the platform data directory.
pub fn default_dir() -> Option<PathBuf> {
	dirs::data_dir().map(|d| d.join("loom").join("crash-reports"))
}

/// Identifiers become file name stems, so anything that could escape the
/// storage directory is refused.
fn validate_identifier(id: &str) -> Result<(), StorageError> {
	let valid = !id.is_empty()
		&& id != "."
		&& id != ".."
		&& !id.starts_with('.')
		&& id
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
	if valid {
		Ok(())
	} else {
		Err(StorageError::InvalidIdentifier(id.to_string()))
	}
}

impl CrashStorage for FileCrashStorage {
	fn pending_reports(&self) -> Result<Vec<String>, StorageError> {
		let entries = match std::fs::read_dir(&self.dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::io(self.dir.display().to_string(), e)),
		};

		let mut ids = Vec::new();
		for entry in entries {
			let entry = entry.map_err(|e| StorageError::io(self.dir.display().to_string(), e))?;
			let name = entry.file_name();
			let Some(name) = name.to_str() else {
				warn!(dir = %self.dir.display(), "skipping non UTF-8 file name");
				continue;
			};
			if let Some(id) = name.strip_suffix(REPORT_EXTENSION) {
				if validate_identifier(id).is_ok() {
					ids.push(id.to_string());
				}
			}
		}

		ids.sort();
		debug!(count = ids.len(), dir = %self.dir.display(), "enumerated pending crash reports");
		Ok(ids)
	}

	fn save_report(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
		let path = self.path(id, REPORT_EXTENSION)?;
		self.write_atomic(&path, data)?;
		debug!(crash_filename = %id, bytes = data.len(), "saved crash report");
		Ok(())
	}

	fn load_report(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
		let path = self.path(id, REPORT_EXTENSION)?;
		self.read_optional(&path)
	}

	fn save_metadata(&self, id: &str, context: &StoredCrashContext) -> Result<(), StorageError> {
		let path = self.path(id, METADATA_EXTENSION)?;
		self.write_json(&path, context)
	}

	fn load_metadata(&self, id: &str) -> Result<Option<StoredCrashContext>, StorageError> {
		let path = self.path(id, METADATA_EXTENSION)?;
		self.read_json(&path)
	}

	fn save_attachments(&self, id: &str, attachments: &[Attachment]) -> Result<(), StorageError> {
		let path = self.path(id, ATTACHMENTS_EXTENSION)?;
		self.write_json(&path, attachments)
	}

	fn load_attachments(&self, id: &str) -> Result<Vec<Attachment>, StorageError> {
		let path = self.path(id, ATTACHMENTS_EXTENSION)?;
		Ok(self.read_json(&path)?.unwrap_or_default())
	}

	fn cleanup(&self, id: &str) -> Result<(), StorageError> {
		// Report file goes first so a partial cleanup is no longer pending.
		for extension in RECORD_EXTENSIONS {
			let path = self.path(id, extension)?;
			self.remove_if_exists(&path)?;
			self.remove_if_exists(&tmp_path(&path))?;
		}
		debug!(crash_filename = %id, "removed crash report");
		Ok(())
	}

	fn cleanup_all(&self) -> Result<(), StorageError> {
		for id in self.pending_reports()? {
			self.cleanup(&id)?;
		}

		// Orphaned parts and interrupted writes.
		let entries = match std::fs::read_dir(&self.dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(StorageError::io(self.dir.display().to_string(), e)),
		};
		let mut swept = 0usize;
		for entry in entries {
			let entry = entry.map_err(|e| StorageError::io(self.dir.display().to_string(), e))?;
			if entry.file_name().to_str().is_some_and(is_record_file) {
				self.remove_if_exists(&entry.path())?;
				swept += 1;
			}
		}
		if swept > 0 {
			info!(count = swept, dir = %self.dir.display(), "removed leftover crash record files");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{TimeZone, Utc};
	use tempfile::TempDir;

	fn storage() -> (TempDir, FileCrashStorage) {
		let dir = TempDir::new().unwrap();
		let storage = FileCrashStorage::new(dir.path().join("reports"));
		(dir, storage)
	}

	#[test]
	fn missing_directory_has_no_pending_reports() {
		let (_dir, storage) = storage();
		assert!(storage.pending_reports().unwrap().is_empty());
	}

	#[test]
	fn pending_reports_are_sorted_oldest_first() {
		let (_dir, storage) = storage();
		storage.save_report("crash-0002", b"b").unwrap();
		storage.save_report("crash-0001", b"a").unwrap();
		storage.save_report("crash-0003", b"c").unwrap();

		assert_eq!(
			storage.pending_reports().unwrap(),
			vec!["crash-0001", "crash-0002", "crash-0003"]
		);
	}

	#[test]
	fn record_parts_round_trip() {
		let (_dir, storage) = storage();
		let time = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
		let mut context = StoredCrashContext::at(time);
		context.user_email = Some("a@b.c".to_string());
		let attachments = vec![Attachment::new("log.txt", "text/plain", b"line".to_vec())];

		storage.save_report("crash-1", b"report").unwrap();
		storage.save_metadata("crash-1", &context).unwrap();
		storage.save_attachments("crash-1", &attachments).unwrap();

		assert_eq!(storage.load_report("crash-1").unwrap().unwrap(), b"report");
		assert_eq!(storage.load_metadata("crash-1").unwrap().unwrap(), context);
		assert_eq!(storage.load_attachments("crash-1").unwrap(), attachments);
	}

	#[test]
	fn absent_parts_load_as_empty() {
		let (_dir, storage) = storage();
		storage.save_report("crash-1", b"report").unwrap();
		assert!(storage.load_metadata("crash-1").unwrap().is_none());
		assert!(storage.load_attachments("crash-1").unwrap().is_empty());
		assert!(storage.load_report("crash-2").unwrap().is_none());
	}

	#[test]
	fn metadata_alone_is_not_pending() {
		let (_dir, storage) = storage();
		storage
			.save_metadata("crash-1", &StoredCrashContext::at(Utc::now()))
			.unwrap();
		assert!(storage.pending_reports().unwrap().is_empty());
	}

	#[test]
	fn cleanup_removes_every_part() {
		let (_dir, storage) = storage();
		storage.save_report("crash-1", b"report").unwrap();
		storage
			.save_metadata("crash-1", &StoredCrashContext::at(Utc::now()))
			.unwrap();
		storage.save_attachments("crash-1", &[]).unwrap();

		storage.cleanup("crash-1").unwrap();
		storage.cleanup("crash-1").unwrap();

		assert!(storage.pending_reports().unwrap().is_empty());
		assert_eq!(std::fs::read_dir(storage.dir()).unwrap().count(), 0);
	}

	#[test]
	fn cleanup_all_empties_storage() {
		let (_dir, storage) = storage();
		storage.save_report("crash-1", b"1").unwrap();
		storage.save_report("crash-2", b"2").unwrap();

		storage.cleanup_all().unwrap();
		assert!(storage.pending_reports().unwrap().is_empty());
	}

	#[test]
	fn interrupted_writes_are_swept() {
		let (_dir, storage) = storage();
		storage.save_report("crash-1", b"report").unwrap();
		std::fs::write(storage.dir().join("crash-1.meta.json.tmp"), b"{").unwrap();
		std::fs::write(storage.dir().join("crash-2.crash.tmp"), b"half").unwrap();
		std::fs::write(storage.dir().join("crash-3.meta.json"), b"{}").unwrap();
		std::fs::write(storage.dir().join("notes.txt"), b"keep").unwrap();

		assert_eq!(storage.pending_reports().unwrap(), vec!["crash-1"]);

		storage.cleanup("crash-1").unwrap();
		assert!(!storage.dir().join("crash-1.meta.json.tmp").exists());

		storage.cleanup_all().unwrap();
		let names: Vec<String> = std::fs::read_dir(storage.dir())
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names, vec!["notes.txt"]);
	}

	#[test]
	fn corrupt_metadata_is_reported() {
		let (_dir, storage) = storage();
		storage.save_report("crash-1", b"report").unwrap();
		std::fs::write(storage.dir().join("crash-1.meta.json"), b"{not json").unwrap();

		assert!(matches!(
			storage.load_metadata("crash-1"),
			Err(StorageError::Corrupt { .. })
		));
	}

	#[test]
	fn path_traversal_is_rejected() {
		let (_dir, storage) = storage();
		for id in ["", "..", "../escape", "a/b", ".hidden"] {
			assert!(
				matches!(
					storage.save_report(id, b"x"),
					Err(StorageError::InvalidIdentifier(_))
				),
				"identifier {id:?} should be rejected"
			);
		}
	}

	#[test]
	fn temp_files_do_not_linger() {
		let (_dir, storage) = storage();
		storage.save_report("crash-1", b"report").unwrap();
		let names: Vec<String> = std::fs::read_dir(storage.dir())
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names, vec!["crash-1.crash"]);
	}
}
