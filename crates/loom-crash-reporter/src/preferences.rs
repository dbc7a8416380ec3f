// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON file preferences.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;
use crate::ports::Preferences;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
	#[serde(default)]
	strings: BTreeMap<String, String>,
	#[serde(default)]
	bools: BTreeMap<String, bool>,
}

/// Preferences kept in a single JSON document.
///
/// The whole document is rewritten through a temp file on every set, so a
/// crash right after a setter returns never loses the value.
pub struct FilePreferences {
	path: PathBuf,
	state: Mutex<PreferenceFile>,
}

impl FilePreferences {
	/// Opens the document at `path`. A missing file starts empty; an
	/// unreadable one is logged and replaced on the next write.
	pub fn open(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let state = match std::fs::read(&path) {
			Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
				warn!(path = %path.display(), error = %e, "ignoring unreadable preferences file");
				PreferenceFile::default()
			}),
			Err(_) => PreferenceFile::default(),
		};
		Self {
			path,
			state: Mutex::new(state),
		}
	}

	/// Preferences under the platform config directory.
	pub fn from_xdg() -> Result<Self, StorageError> {
		let path = dirs::config_dir()
			.map(|d| d.join("loom").join("crash-reporter-preferences.json"))
			.ok_or_else(|| {
				StorageError::Unavailable("could not determine XDG config directory".to_string())
			})?;
		Ok(Self::open(path))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn update(&self, apply: impl FnOnce(&mut PreferenceFile)) -> Result<(), StorageError> {
		let mut state = self
			.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		apply(&mut state);

		let target = self.path.display().to_string();
		let json = serde_json::to_vec_pretty(&*state).map_err(|e| StorageError::corrupt(&target, e))?;

		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| StorageError::io(&target, e))?;
		}
		let mut tmp = self.path.as_os_str().to_owned();
		tmp.push(".tmp");
		std::fs::write(&tmp, json).map_err(|e| StorageError::io(&target, e))?;
		std::fs::rename(&tmp, &self.path).map_err(|e| StorageError::io(&target, e))?;
		Ok(())
	}

	fn read<T>(&self, f: impl FnOnce(&PreferenceFile) -> T) -> T {
		let state = self
			.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		f(&state)
	}
}

impl Preferences for FilePreferences {
	fn string(&self, key: &str) -> Option<String> {
		self.read(|state| state.strings.get(key).cloned())
	}

	fn bool(&self, key: &str) -> bool {
		self.read(|state| state.bools.get(key).copied().unwrap_or(false))
	}

	fn set_string(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
		self.update(|state| match value {
			Some(value) => {
				state.strings.insert(key.to_string(), value.to_string());
			}
			None => {
				state.strings.remove(key);
			}
		})
	}

	fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
		self.update(|state| {
			state.bools.insert(key.to_string(), value);
		})
	}
}
