// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the crash reporter core.

use thiserror::Error;

/// Errors raised when mutating an [`AttributeSet`](crate::AttributeSet).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
	#[error("invalid attribute name: {0:?} is not a valid XML entity name")]
	InvalidName(String),
}

/// Errors raised while building a crash archive.
///
/// No partially written archive is ever returned alongside these.
#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("duplicate archive entry: {0}")]
	DuplicateEntry(String),

	#[error("zip encoding failed: {0}")]
	Zip(#[from] zip::result::ZipError),

	#[error("I/O error while writing archive: {0}")]
	Io(#[from] std::io::Error),
}
