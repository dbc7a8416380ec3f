// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application-supplied crash attributes.
//!
//! Attributes are key/value pairs an application records during a session so
//! they can be attached to a crash from that session. Keys must be valid XML
//! entity names because each key becomes an element of `CrashContext.xml`;
//! values are escaped on the way in, so the set only ever holds XML-safe
//! text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AttributeError;
use crate::escape::{escape_ignoring_cdata_and_comments, is_valid_entity_name};
use crate::metadata::Attachment;

/// File name of the attribute document inside a crash archive.
pub const CRASH_CONTEXT_FILE_NAME: &str = "CrashContext.xml";
/// MIME type of the attribute document.
pub const CRASH_CONTEXT_MIME_TYPE: &str = "application/xml";
/// Text encoding of the attribute document.
pub const CRASH_CONTEXT_ENCODING: &str = "UTF-8";

/// Escaped attribute values keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet {
	values: BTreeMap<String, String>,
}

impl AttributeSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets or removes an attribute.
	///
	/// `None` and the empty string remove the key; removing a key that was
	/// never set succeeds without changing anything. An invalid name is
	/// rejected before the set is touched.
	pub fn set(&mut self, name: &str, value: Option<&str>) -> Result<(), AttributeError> {
		if !is_valid_entity_name(name) {
			return Err(AttributeError::InvalidName(name.to_string()));
		}

		match value {
			Some(value) if !value.is_empty() => {
				self
					.values
					.insert(name.to_string(), escape_ignoring_cdata_and_comments(value));
			}
			_ => {
				self.values.remove(name);
			}
		}
		Ok(())
	}

	pub fn remove(&mut self, name: &str) -> Option<String> {
		self.values.remove(name)
	}

	/// Returns the escaped value stored for `name`.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.values.get(name).map(String::as_str)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.values.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn clear(&mut self) {
		self.values.clear();
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn as_map(&self) -> &BTreeMap<String, String> {
		&self.values
	}

	/// Renders the set as the `CrashContext.xml` document.
	///
	/// Each attribute becomes an element named after its key.
	pub fn to_xml(&self) -> String {
		let mut xml = format!(
			"<?xml version=\"1.0\" encoding=\"{CRASH_CONTEXT_ENCODING}\"?>\n<CrashContext>\n"
		);
		xml.push_str("\t<Attributes>\n");
		for (name, value) in &self.values {
			xml.push_str(&format!("\t\t<{name}>{value}</{name}>\n"));
		}
		xml.push_str("\t</Attributes>\n</CrashContext>\n");
		xml
	}

	/// Wraps [`to_xml`](Self::to_xml) as an archive attachment.
	pub fn to_attachment(&self) -> Attachment {
		Attachment::new(
			CRASH_CONTEXT_FILE_NAME,
			CRASH_CONTEXT_MIME_TYPE,
			self.to_xml().into_bytes(),
		)
	}
}

impl FromIterator<(String, String)> for AttributeSet {
	/// Collects already-escaped pairs, skipping invalid names.
	fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
		Self {
			values: iter
				.into_iter()
				.filter(|(name, value)| is_valid_entity_name(name) && !value.is_empty())
				.collect(),
		}
	}
}
