// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory collaborators for tests and embedding without a filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use loom_crash_reporter_core::{Attachment, StoredCrashContext};

use crate::error::{StorageError, TrapperError};
use crate::ports::{BundleInfo, CrashStorage, CrashTrapper, Preferences};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
struct MemoryRecord {
	report: Option<Vec<u8>>,
	metadata: Option<StoredCrashContext>,
	attachments: Vec<Attachment>,
}

/// Crash storage held in a sorted map.
///
/// Identifiers enumerate in lexicographic order, which is creation order for
/// identifiers the reporter generates.
#[derive(Debug, Default)]
pub struct MemoryCrashStorage {
	records: Mutex<BTreeMap<String, MemoryRecord>>,
	cleaned: Mutex<Vec<String>>,
	unavailable: AtomicBool,
}

impl MemoryCrashStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds a record as if it had been ingested on a previous run.
	pub fn insert(
		&self,
		id: impl Into<String>,
		report: impl Into<Vec<u8>>,
		metadata: Option<StoredCrashContext>,
	) {
		lock(&self.records).insert(
			id.into(),
			MemoryRecord {
				report: Some(report.into()),
				metadata,
				attachments: Vec::new(),
			},
		);
	}

	pub fn contains(&self, id: &str) -> bool {
		lock(&self.records).contains_key(id)
	}

	/// Identifiers removed through [`CrashStorage::cleanup`], in order.
	pub fn cleaned(&self) -> Vec<String> {
		lock(&self.cleaned).clone()
	}

	/// Makes every subsequent operation fail with `Unavailable`.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.unavailable.store(unavailable, Ordering::SeqCst);
	}

	fn check(&self) -> Result<(), StorageError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(StorageError::Unavailable(
				"in-memory storage marked unavailable".to_string(),
			));
		}
		Ok(())
	}
}

impl CrashStorage for MemoryCrashStorage {
	fn pending_reports(&self) -> Result<Vec<String>, StorageError> {
		self.check()?;
		Ok(
			lock(&self.records)
				.iter()
				.filter(|(_, record)| record.report.is_some())
				.map(|(id, _)| id.clone())
				.collect(),
		)
	}

	fn save_report(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
		self.check()?;
		lock(&self.records).entry(id.to_string()).or_default().report = Some(data.to_vec());
		Ok(())
	}

	fn load_report(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
		self.check()?;
		Ok(lock(&self.records).get(id).and_then(|r| r.report.clone()))
	}

	fn save_metadata(&self, id: &str, context: &StoredCrashContext) -> Result<(), StorageError> {
		self.check()?;
		lock(&self.records).entry(id.to_string()).or_default().metadata = Some(context.clone());
		Ok(())
	}

	fn load_metadata(&self, id: &str) -> Result<Option<StoredCrashContext>, StorageError> {
		self.check()?;
		Ok(lock(&self.records).get(id).and_then(|r| r.metadata.clone()))
	}

	fn save_attachments(&self, id: &str, attachments: &[Attachment]) -> Result<(), StorageError> {
		self.check()?;
		lock(&self.records).entry(id.to_string()).or_default().attachments = attachments.to_vec();
		Ok(())
	}

	fn load_attachments(&self, id: &str) -> Result<Vec<Attachment>, StorageError> {
		self.check()?;
		Ok(
			lock(&self.records)
				.get(id)
				.map(|r| r.attachments.clone())
				.unwrap_or_default(),
		)
	}

	fn cleanup(&self, id: &str) -> Result<(), StorageError> {
		self.check()?;
		if lock(&self.records).remove(id).is_some() {
			lock(&self.cleaned).push(id.to_string());
		}
		Ok(())
	}

	fn cleanup_all(&self) -> Result<(), StorageError> {
		self.check()?;
		let removed: Vec<String> = std::mem::take(&mut *lock(&self.records))
			.into_keys()
			.collect();
		lock(&self.cleaned).extend(removed);
		Ok(())
	}
}

/// Preferences held in a map.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
	strings: Mutex<HashMap<String, String>>,
	bools: Mutex<HashMap<String, bool>>,
}

impl MemoryPreferences {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Preferences for MemoryPreferences {
	fn string(&self, key: &str) -> Option<String> {
		lock(&self.strings).get(key).cloned()
	}

	fn bool(&self, key: &str) -> bool {
		lock(&self.bools).get(key).copied().unwrap_or(false)
	}

	fn set_string(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
		let mut strings = lock(&self.strings);
		match value {
			Some(value) => {
				strings.insert(key.to_string(), value.to_string());
			}
			None => {
				strings.remove(key);
			}
		}
		Ok(())
	}

	fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
		lock(&self.bools).insert(key.to_string(), value);
		Ok(())
	}
}

/// Bundle information from a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticBundle {
	values: HashMap<String, String>,
}

impl StaticBundle {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.values.insert(key.into(), value.into());
		self
	}
}

impl BundleInfo for StaticBundle {
	fn info_value(&self, key: &str) -> Option<String> {
		self.values.get(key).cloned()
	}
}

#[derive(Debug, Default)]
struct TrapperState {
	pending: Option<Vec<u8>>,
	pending_custom_data: Option<Vec<u8>>,
	pending_time: Option<DateTime<Utc>>,
	custom_data: Option<Vec<u8>>,
	enabled: bool,
	fail_enable: bool,
	fail_load: bool,
}

/// A crash trapper whose pending capture is set by hand.
#[derive(Debug, Default)]
pub struct MemoryCrashTrapper {
	state: Mutex<TrapperState>,
}

impl MemoryCrashTrapper {
	pub fn new() -> Self {
		Self::default()
	}

	/// Simulates a crash captured in a previous run.
	pub fn with_pending(self, report: impl Into<Vec<u8>>) -> Self {
		lock(&self.state).pending = Some(report.into());
		self
	}

	pub fn with_pending_custom_data(self, data: impl Into<Vec<u8>>) -> Self {
		lock(&self.state).pending_custom_data = Some(data.into());
		self
	}

	pub fn with_pending_time(self, time: DateTime<Utc>) -> Self {
		lock(&self.state).pending_time = Some(time);
		self
	}

	pub fn failing_enable(self) -> Self {
		lock(&self.state).fail_enable = true;
		self
	}

	pub fn failing_load(self) -> Self {
		lock(&self.state).fail_load = true;
		self
	}

	pub fn is_enabled(&self) -> bool {
		lock(&self.state).enabled
	}

	/// The blob most recently handed to [`CrashTrapper::set_custom_data`].
	pub fn custom_data(&self) -> Option<Vec<u8>> {
		lock(&self.state).custom_data.clone()
	}
}

impl CrashTrapper for MemoryCrashTrapper {
	fn has_pending_report(&self) -> bool {
		lock(&self.state).pending.is_some()
	}

	fn load_pending_report(&self) -> Result<Vec<u8>, TrapperError> {
		let state = lock(&self.state);
		if state.fail_load {
			return Err(TrapperError("pending capture is unreadable".to_string()));
		}
		state
			.pending
			.clone()
			.ok_or_else(|| TrapperError("no pending capture".to_string()))
	}

	fn purge_pending_report(&self) -> Result<(), TrapperError> {
		let mut state = lock(&self.state);
		state.pending = None;
		state.pending_custom_data = None;
		state.pending_time = None;
		Ok(())
	}

	fn enable(&self) -> Result<(), TrapperError> {
		let mut state = lock(&self.state);
		if state.fail_enable {
			return Err(TrapperError("signal handlers could not be installed".to_string()));
		}
		state.enabled = true;
		Ok(())
	}

	fn set_custom_data(&self, data: Vec<u8>) {
		lock(&self.state).custom_data = Some(data);
	}

	fn pending_custom_data(&self) -> Option<Vec<u8>> {
		lock(&self.state).pending_custom_data.clone()
	}

	fn pending_report_time(&self) -> Option<DateTime<Utc>> {
		lock(&self.state).pending_time
	}
}
