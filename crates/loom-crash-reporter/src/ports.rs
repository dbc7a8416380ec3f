// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Collaborator interfaces the reporter is constructed with.
//!
//! The reporter never touches the platform directly. Crash capture, durable
//! storage, bundle metadata, preferences and the user prompt are all injected
//! through these traits, and every one of them has an in-memory
//! implementation in [`crate::memory`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_crash_reporter_core::{Attachment, StoredCrashContext};

use crate::error::{StorageError, TrapperError};

/// Bundle key holding the collector database name.
pub const BUNDLE_KEY_DATABASE: &str = "LoomCrashDatabase";
/// Bundle key holding the display name of the application.
pub const BUNDLE_KEY_APPLICATION_NAME: &str = "CFBundleName";
/// Bundle key holding the application version.
pub const BUNDLE_KEY_APPLICATION_VERSION: &str = "CFBundleVersion";

/// Preference key for the persistent auto-submit choice.
pub const PREF_AUTO_SUBMIT: &str = "loom.crash.v1.autoSubmit";
/// Preference key for the remembered user name.
pub const PREF_USER_NAME: &str = "loom.crash.v1.userName";
/// Preference key for the remembered user email.
pub const PREF_USER_EMAIL: &str = "loom.crash.v1.userEmail";
/// Preference key holding the session's attributes as a JSON object.
pub const PREF_ATTRIBUTES: &str = "loom.crash.v1.attributes";

/// The signal/exception trapper that records crashes.
pub trait CrashTrapper: Send + Sync {
	/// Whether a capture from a previous run is waiting to be taken over.
	fn has_pending_report(&self) -> bool;

	fn load_pending_report(&self) -> Result<Vec<u8>, TrapperError>;

	fn purge_pending_report(&self) -> Result<(), TrapperError>;

	/// Arms the trapper for the running session.
	fn enable(&self) -> Result<(), TrapperError>;

	/// Opaque blob the trapper embeds in future captures.
	fn set_custom_data(&self, data: Vec<u8>);

	/// Custom data embedded in the pending capture, if the trapper exposes it.
	fn pending_custom_data(&self) -> Option<Vec<u8>> {
		None
	}

	/// When the pending capture was taken, if the trapper records it.
	fn pending_report_time(&self) -> Option<DateTime<Utc>> {
		None
	}
}

/// Durable per-identifier crash record store.
///
/// Identifiers returned by [`pending_reports`](Self::pending_reports) are
/// ordered oldest first. Writes for one identifier are atomic.
pub trait CrashStorage: Send + Sync {
	fn pending_reports(&self) -> Result<Vec<String>, StorageError>;

	fn save_report(&self, id: &str, data: &[u8]) -> Result<(), StorageError>;

	fn load_report(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError>;

	fn save_metadata(&self, id: &str, context: &StoredCrashContext) -> Result<(), StorageError>;

	fn load_metadata(&self, id: &str) -> Result<Option<StoredCrashContext>, StorageError>;

	fn save_attachments(&self, id: &str, attachments: &[Attachment]) -> Result<(), StorageError>;

	fn load_attachments(&self, id: &str) -> Result<Vec<Attachment>, StorageError>;

	/// Deletes every part of one record. Unknown identifiers are not an error.
	fn cleanup(&self, id: &str) -> Result<(), StorageError>;

	fn cleanup_all(&self) -> Result<(), StorageError>;
}

/// Read-only application bundle information.
pub trait BundleInfo: Send + Sync {
	fn info_value(&self, key: &str) -> Option<String>;
}

/// Small key/value store for user preferences.
///
/// Every setter must be durable when it returns.
pub trait Preferences: Send + Sync {
	fn string(&self, key: &str) -> Option<String>;

	fn bool(&self, key: &str) -> bool;

	/// Stores `value`, or removes the key when `None`.
	fn set_string(&self, key: &str, value: Option<&str>) -> Result<(), StorageError>;

	fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError>;
}

/// What the user chose in the crash prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
	Send,
	Cancel,
	/// Send this report and every future one without asking.
	AlwaysSend,
}

/// Everything the prompt needs to ask about one report.
#[derive(Debug, Clone)]
pub struct PromptRequest {
	pub application_name: String,
	pub banner_image: Option<String>,
	/// The raw report rendered as text.
	pub report_text: String,
	pub ask_user_details: bool,
	pub prefill_name: Option<String>,
	pub prefill_email: Option<String>,
}

/// The user's answer.
#[derive(Debug, Clone)]
pub struct PromptResponse {
	pub action: UserAction,
	pub name: Option<String>,
	pub email: Option<String>,
	pub comments: Option<String>,
}

impl PromptResponse {
	pub fn new(action: UserAction) -> Self {
		Self {
			action,
			name: None,
			email: None,
			comments: None,
		}
	}
}

/// The interactive surface that asks whether a report should be sent.
#[async_trait]
pub trait CrashPrompt: Send + Sync {
	async fn show(&self, request: PromptRequest) -> PromptResponse;
}

/// The injected collaborators a reporter is built from.
#[derive(Clone)]
pub struct Collaborators {
	pub trapper: Arc<dyn CrashTrapper>,
	pub storage: Arc<dyn CrashStorage>,
	pub bundle: Arc<dyn BundleInfo>,
	pub preferences: Arc<dyn Preferences>,
}
