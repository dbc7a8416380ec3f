// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Zip archive construction for crash uploads.
//!
//! A crash bundle is a standard zip file: the raw crash report, the optional
//! `CrashContext.xml` document and any attachments, in that order. Non-empty
//! entries are deflated, empty ones stored. Entry timestamps are fixed, so the
//! same entries always produce the same bytes and the same digest.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

/// A named payload inside a crash archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
	pub name: String,
	pub data: Vec<u8>,
}

impl ArchiveEntry {
	pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
		Self {
			name: name.into(),
			data: data.into(),
		}
	}
}

/// The encoded container together with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
	pub bytes: Vec<u8>,
	/// Lowercase hex MD5 of `bytes`.
	pub digest: String,
}

impl BuiltArchive {
	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}
}

/// Ordered set of entries that will become one crash archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBundle {
	entries: Vec<ArchiveEntry>,
}

impl ArchiveBundle {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends an entry. Entries keep their insertion order in the archive.
	pub fn push(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> &mut Self {
		self.entries.push(ArchiveEntry::new(name, data));
		self
	}

	pub fn entries(&self) -> &[ArchiveEntry] {
		&self.entries
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Encodes the bundle and fingerprints the result.
	pub fn build(&self) -> Result<BuiltArchive, ArchiveError> {
		let bytes = build_archive(&self.entries)?;
		let digest = content_digest(&bytes);
		Ok(BuiltArchive { bytes, digest })
	}
}

/// Builds a zip archive holding `data` under `name`.
pub fn build_single_entry_archive(name: &str, data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
	build_archive(&[ArchiveEntry::new(name, data)])
}

/// Builds a zip archive holding `entries` in order.
///
/// An empty slice produces a valid archive with no entries.
pub fn build_archive(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ArchiveError> {
	let mut seen = HashSet::with_capacity(entries.len());
	for entry in entries {
		if !seen.insert(entry.name.as_str()) {
			return Err(ArchiveError::DuplicateEntry(entry.name.clone()));
		}
	}

	let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
	for entry in entries {
		let method = if entry.data.is_empty() {
			CompressionMethod::Stored
		} else {
			CompressionMethod::Deflated
		};
		let options = SimpleFileOptions::default()
			.compression_method(method)
			.unix_permissions(0o644);

		writer.start_file(entry.name.as_str(), options)?;
		writer.write_all(&entry.data)?;
	}

	Ok(writer.finish()?.into_inner())
}

/// Lowercase hex MD5 digest of `bytes`.
///
/// Used only as an identity fingerprint for the collector; it carries no
/// security guarantee.
pub fn content_digest(bytes: &[u8]) -> String {
	hex::encode(md5::compute(bytes).0)
}
