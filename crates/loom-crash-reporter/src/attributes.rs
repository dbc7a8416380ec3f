// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable session attributes.
//!
//! Every change is written to the preference store before the call returns.
//! Nothing is buffered, so the attributes recorded before a crash are still
//! there on the next launch.

use std::sync::{Arc, Mutex};

use loom_crash_reporter_core::{AttributeError, AttributeSet};
use tracing::{debug, warn};

use crate::error::{ReporterError, Result, StorageError};
use crate::ports::{Preferences, PREF_ATTRIBUTES};

pub struct AttributeStore {
	preferences: Arc<dyn Preferences>,
	// Serialises read-modify-write cycles against the preference store.
	write_lock: Mutex<()>,
}

impl AttributeStore {
	pub fn new(preferences: Arc<dyn Preferences>) -> Self {
		Self {
			preferences,
			write_lock: Mutex::new(()),
		}
	}

	/// Reads the persisted set. An undecodable document reads as empty.
	pub fn load(&self) -> AttributeSet {
		match self.preferences.string(PREF_ATTRIBUTES) {
			Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
				warn!(error = %e, "discarding unreadable persisted attributes");
				AttributeSet::new()
			}),
			None => AttributeSet::new(),
		}
	}

	/// Sets or removes one attribute and persists the result.
	///
	/// The name is validated before anything is read or written.
	pub fn set(&self, name: &str, value: Option<&str>) -> Result<()> {
		if !loom_crash_reporter_core::is_valid_entity_name(name) {
			return Err(AttributeError::InvalidName(name.to_string()).into());
		}

		let _guard = self
			.write_lock
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		let mut attributes = self.load();
		attributes.set(name, value)?;
		self.persist(&attributes)?;

		debug!(attribute = name, removed = value.map_or(true, str::is_empty), "attribute updated");
		Ok(())
	}

	/// Drops every attribute.
	pub fn clear(&self) -> Result<()> {
		let _guard = self
			.write_lock
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		self
			.preferences
			.set_string(PREF_ATTRIBUTES, None)
			.map_err(ReporterError::from)
	}

	fn persist(&self, attributes: &AttributeSet) -> Result<()> {
		if attributes.is_empty() {
			self.preferences.set_string(PREF_ATTRIBUTES, None)?;
			return Ok(());
		}
		let json = serde_json::to_string(attributes)
			.map_err(|e| StorageError::corrupt(PREF_ATTRIBUTES, e))?;
		self.preferences.set_string(PREF_ATTRIBUTES, Some(&json))?;
		Ok(())
	}
}
