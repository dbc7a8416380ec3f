// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the crash reporter.

use std::fmt;
use std::path::PathBuf;

use loom_crash_reporter_core::{ArchiveError, AttributeError};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for crash reporter operations.
pub type Result<T> = std::result::Result<T, ReporterError>;

/// Coarse classification reported to the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// A crash record or its directory could not be read or written.
	StorageUnavailable,
	/// An attribute name failed XML entity name validation.
	InvalidAttributeName,
	/// The crash archive could not be encoded.
	ArchiveEncodingFailure,
	/// The request never got a response from the collector.
	NetworkTransport,
	/// The collector answered with a failure or an unusable body.
	RemoteRejected,
	/// The upload was cancelled while in flight.
	Cancelled,
	/// The reporter was misconfigured or misused.
	Configuration,
}

/// The three sequential steps of a crash upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
	/// Ask the collector where to put the archive.
	Negotiate,
	/// Send the archive bytes to the negotiated destination.
	Transfer,
	/// Tell the collector the transfer completed.
	Finalize,
}

impl UploadStage {
	pub fn as_str(&self) -> &'static str {
		match self {
			UploadStage::Negotiate => "negotiate",
			UploadStage::Transfer => "transfer",
			UploadStage::Finalize => "finalize",
		}
	}
}

impl fmt::Display for UploadStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors from crash storage and preference persistence.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("storage I/O error for {target}: {source}")]
	Io {
		target: String,
		#[source]
		source: std::io::Error,
	},

	#[error("corrupt storage record {target}: {message}")]
	Corrupt { target: String, message: String },

	#[error("invalid crash identifier: {0:?}")]
	InvalidIdentifier(String),

	#[error("storage unavailable: {0}")]
	Unavailable(String),
}

impl StorageError {
	pub(crate) fn io(target: impl Into<String>, source: std::io::Error) -> Self {
		Self::Io {
			target: target.into(),
			source,
		}
	}

	pub(crate) fn corrupt(target: impl Into<String>, message: impl ToString) -> Self {
		Self::Corrupt {
			target: target.into(),
			message: message.to_string(),
		}
	}
}

/// Error reported by the crash trapper collaborator.
#[derive(Debug, Clone, Error)]
#[error("crash trapper error: {0}")]
pub struct TrapperError(pub String);

/// Errors from the upload protocol.
#[derive(Debug, Error)]
pub enum UploadError {
	#[error("{stage} failed: {source}")]
	Transport {
		stage: UploadStage,
		#[source]
		source: reqwest::Error,
	},

	#[error("{stage} rejected by collector (status {status}): {message}")]
	Rejected {
		stage: UploadStage,
		status: u16,
		message: String,
	},

	#[error("{stage} returned an invalid response: {message}")]
	InvalidResponse { stage: UploadStage, message: String },

	#[error("upload cancelled during {stage}")]
	Cancelled { stage: UploadStage },

	#[error("an upload is already in progress on this client")]
	AlreadyInProgress,
}

impl UploadError {
	/// The stage that failed, if the upload got as far as starting one.
	pub fn stage(&self) -> Option<UploadStage> {
		match self {
			UploadError::Transport { stage, .. }
			| UploadError::Rejected { stage, .. }
			| UploadError::InvalidResponse { stage, .. }
			| UploadError::Cancelled { stage } => Some(*stage),
			UploadError::AlreadyInProgress => None,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			UploadError::Transport { .. } => ErrorKind::NetworkTransport,
			UploadError::Rejected { .. } | UploadError::InvalidResponse { .. } => {
				ErrorKind::RemoteRejected
			}
			UploadError::Cancelled { .. } => ErrorKind::Cancelled,
			UploadError::AlreadyInProgress => ErrorKind::Configuration,
		}
	}
}

/// Errors that can occur while loading reporter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Missing required field: {0}")]
	MissingField(String),

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },
}

impl ConfigError {
	pub fn missing_field(field: impl Into<String>) -> Self {
		Self::MissingField(field.into())
	}

	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}

/// Errors surfaced by the crash reporter.
#[derive(Debug, Error)]
pub enum ReporterError {
	#[error("crash reporter has already been started")]
	AlreadyStarted,

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Attribute(#[from] AttributeError),

	#[error(transparent)]
	Storage(#[from] StorageError),

	#[error(transparent)]
	Archive(#[from] ArchiveError),

	#[error(transparent)]
	Upload(#[from] UploadError),

	#[error(transparent)]
	Trapper(#[from] TrapperError),

	#[error("failed to build HTTP client: {0}")]
	HttpClient(#[source] reqwest::Error),
}

impl ReporterError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			ReporterError::AlreadyStarted
			| ReporterError::Config(_)
			| ReporterError::HttpClient(_) => ErrorKind::Configuration,
			ReporterError::Attribute(_) => ErrorKind::InvalidAttributeName,
			ReporterError::Storage(_) | ReporterError::Trapper(_) => ErrorKind::StorageUnavailable,
			ReporterError::Archive(_) => ErrorKind::ArchiveEncodingFailure,
			ReporterError::Upload(err) => err.kind(),
		}
	}
}
