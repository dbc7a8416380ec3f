// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash-time metadata and attachments.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeSet;

/// A file the host application asked to ship alongside a crash report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
	pub filename: String,
	pub mime_type: String,
	pub data: Vec<u8>,
}

impl Attachment {
	pub fn new(
		filename: impl Into<String>,
		mime_type: impl Into<String>,
		data: impl Into<Vec<u8>>,
	) -> Self {
		Self {
			filename: filename.into(),
			mime_type: mime_type.into(),
			data: data.into(),
		}
	}
}

/// Context captured for one crash and sent with its upload.
///
/// Values describe the application as it was when the crash happened, which
/// may differ from the running application if it was updated before the
/// report could be sent. Built once per upload attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashMetadata {
	pub database: Option<String>,
	pub application_name: Option<String>,
	pub application_version: Option<String>,
	pub user_name: Option<String>,
	pub user_email: Option<String>,
	pub user_description: Option<String>,
	pub application_log: Option<String>,
	pub application_key: Option<String>,
	pub notes: Option<String>,
	pub attributes: AttributeSet,
	pub crash_time: Option<DateTime<Utc>>,
}

impl CrashMetadata {
	/// Crash time as an ISO-8601 string, e.g. `2025-03-01T12:30:00Z`.
	pub fn crash_time_iso8601(&self) -> Option<String> {
		self
			.crash_time
			.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
	}
}

/// Per-report metadata record kept by crash storage.
///
/// Written once when a pending capture is taken over from the crash trapper
/// and read back on every upload attempt for that report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCrashContext {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub database: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub application_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub application_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_email: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub application_key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub application_log: Option<String>,
	#[serde(default)]
	pub attributes: AttributeSet,
	pub crash_time: DateTime<Utc>,
}

impl StoredCrashContext {
	/// An empty context stamped with `crash_time`.
	pub fn at(crash_time: DateTime<Utc>) -> Self {
		Self {
			database: None,
			application_name: None,
			application_version: None,
			user_name: None,
			user_email: None,
			application_key: None,
			notes: None,
			application_log: None,
			attributes: AttributeSet::new(),
			crash_time,
		}
	}

	/// Time elapsed between the crash and `now`.
	pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
		now.signed_duration_since(self.crash_time)
	}

	pub fn to_metadata(&self) -> CrashMetadata {
		CrashMetadata {
			database: self.database.clone(),
			application_name: self.application_name.clone(),
			application_version: self.application_version.clone(),
			user_name: self.user_name.clone(),
			user_email: self.user_email.clone(),
			user_description: None,
			application_log: self.application_log.clone(),
			application_key: self.application_key.clone(),
			notes: self.notes.clone(),
			attributes: self.attributes.clone(),
			crash_time: Some(self.crash_time),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn sample_time() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap()
	}

	#[test]
	fn crash_time_formats_as_iso8601() {
		let metadata = CrashMetadata {
			crash_time: Some(sample_time()),
			..Default::default()
		};
		assert_eq!(
			metadata.crash_time_iso8601().as_deref(),
			Some("2025-03-01T12:30:00Z")
		);
	}

	#[test]
	fn missing_crash_time_formats_as_none() {
		assert!(CrashMetadata::default().crash_time_iso8601().is_none());
	}

	#[test]
	fn stored_context_carries_into_metadata() {
		let mut context = StoredCrashContext::at(sample_time());
		context.database = Some("fred".to_string());
		context.application_version = Some("1.2.3".to_string());
		context.attributes.set("tier", Some("gold")).unwrap();

		let metadata = context.to_metadata();
		assert_eq!(metadata.database.as_deref(), Some("fred"));
		assert_eq!(metadata.application_version.as_deref(), Some("1.2.3"));
		assert_eq!(metadata.attributes.get("tier"), Some("gold"));
		assert_eq!(metadata.crash_time, Some(sample_time()));
		assert!(metadata.user_description.is_none());
	}

	#[test]
	fn stored_context_json_omits_absent_fields() {
		let context = StoredCrashContext::at(sample_time());
		let json = serde_json::to_value(&context).unwrap();
		assert!(json.get("database").is_none());
		assert_eq!(json["crash_time"], "2025-03-01T12:30:00Z");

		let parsed: StoredCrashContext = serde_json::from_value(json).unwrap();
		assert_eq!(parsed, context);
	}

	#[test]
	fn age_is_measured_from_crash_time() {
		let context = StoredCrashContext::at(sample_time());
		let later = sample_time() + chrono::Duration::hours(2);
		assert_eq!(context.age(later), chrono::Duration::hours(2));
	}
}
