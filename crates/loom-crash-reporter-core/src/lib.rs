// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom crash reporter.
//!
//! This crate holds the side-effect free pieces of post-crash processing.
//! It is used by `loom-crash-reporter`, which adds storage, networking and
//! the startup lifecycle on top.
//!
//! # Overview
//!
//! - [`escape`]: XML escaping that leaves CDATA sections and comments intact,
//!   plus XML entity name validation
//! - [`archive`]: zip containers for crash bundles and the MD5 content digest
//!   the collector uses to fingerprint uploads
//! - [`attributes`]: the application-supplied attribute set and its
//!   `CrashContext.xml` rendering
//! - [`metadata`]: crash-time metadata snapshots and attachments

pub mod archive;
pub mod attributes;
pub mod error;
pub mod escape;
pub mod metadata;

pub use archive::{
	build_archive, build_single_entry_archive, content_digest, ArchiveBundle, ArchiveEntry,
	BuiltArchive,
};
pub use attributes::{
	AttributeSet, CRASH_CONTEXT_ENCODING, CRASH_CONTEXT_FILE_NAME, CRASH_CONTEXT_MIME_TYPE,
};
pub use error::{ArchiveError, AttributeError};
pub use escape::{
	escape_excluding, escape_ignoring_cdata_and_comments, escape_xml, is_valid_entity_name,
	prune_contained_or_overlapping, token_pair_ranges,
};
pub use metadata::{Attachment, CrashMetadata, StoredCrashContext};
