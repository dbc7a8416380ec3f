// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notifications to the embedding application.

use loom_crash_reporter_core::Attachment;
use serde::Serialize;

use crate::error::{ErrorKind, UploadStage};

/// Terminal result of one report attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
	Success {
		/// Report page on the collector, if it returned one.
		info_url: Option<String>,
	},
	Failure {
		kind: ErrorKind,
		/// Failing upload stage; `None` when the attempt failed before upload.
		stage: Option<UploadStage>,
		message: String,
	},
}

impl UploadOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, UploadOutcome::Success { .. })
	}

	pub fn info_url(&self) -> Option<&str> {
		match self {
			UploadOutcome::Success { info_url } => info_url.as_deref(),
			UploadOutcome::Failure { .. } => None,
		}
	}

	pub fn kind(&self) -> Option<ErrorKind> {
		match self {
			UploadOutcome::Success { .. } => None,
			UploadOutcome::Failure { kind, .. } => Some(*kind),
		}
	}

	pub fn stage(&self) -> Option<UploadStage> {
		match self {
			UploadOutcome::Success { .. } => None,
			UploadOutcome::Failure { stage, .. } => *stage,
		}
	}
}

/// The single notification sent for every report that reached the build
/// step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
	pub crash_filename: String,
	pub outcome: UploadOutcome,
}

/// Hooks the embedding application can implement. All methods have no-op
/// defaults.
pub trait ReporterDelegate: Send + Sync {
	/// Log text captured with a crash when it is taken over from the trapper.
	fn application_log(&self) -> Option<String> {
		None
	}

	/// Files captured with a crash when it is taken over from the trapper.
	fn attachments(&self) -> Vec<Attachment> {
		Vec::new()
	}

	/// Called right before a report is uploaded.
	fn will_send_crash_report(&self, _crash_filename: &str) {}

	/// Called once per attempt with its outcome.
	fn did_finish_sending(&self, _outcome: &ReportOutcome) {}
}

/// Delegate that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl ReporterDelegate for NoopDelegate {}
