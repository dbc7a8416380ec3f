// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! XML escaping for attribute values.
//!
//! Values supplied by the host application end up inside `CrashContext.xml`.
//! The five reserved characters (`&`, `<`, `>`, `"`, `'`) are replaced by
//! their entities, except inside CDATA sections and comments, which are
//! copied through untouched so applications can embed pre-formed XML.
//!
//! All ranges are half-open byte ranges into the scanned text.

use std::ops::Range;

const COMMENT_START: &str = "<!--";
const COMMENT_END: &str = "-->";
const CDATA_START: &str = "<![CDATA[";
const CDATA_END: &str = "]]>";

/// Find every `start_token ... end_token` pair in `text`.
///
/// Pairs are matched literally and never overlap: scanning resumes after the
/// end token of the previous pair. Each range covers both tokens. A start
/// token without a matching end token produces no range and ends the scan.
pub fn token_pair_ranges(text: &str, start_token: &str, end_token: &str) -> Vec<Range<usize>> {
	let mut ranges = Vec::new();
	if start_token.is_empty() || end_token.is_empty() {
		return ranges;
	}

	let mut cursor = 0;
	while let Some(offset) = text[cursor..].find(start_token) {
		let start = cursor + offset;
		let body = start + start_token.len();
		let Some(end_offset) = text[body..].find(end_token) else {
			break;
		};
		let end = body + end_offset + end_token.len();
		ranges.push(start..end);
		cursor = end;
	}

	ranges
}

/// Reduce `ranges` to a disjoint set sorted by start.
///
/// Ranges nested inside another range and ranges partially overlapping an
/// earlier kept range are dropped. When two ranges share a start the longer
/// one wins. Identical ranges are kept once and empty ranges are discarded.
pub fn prune_contained_or_overlapping(ranges: &[Range<usize>]) -> Vec<Range<usize>> {
	let mut sorted: Vec<Range<usize>> = ranges.iter().filter(|r| r.start < r.end).cloned().collect();
	sorted.sort_unstable_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

	let mut kept: Vec<Range<usize>> = Vec::with_capacity(sorted.len());
	for candidate in sorted {
		match kept.last() {
			Some(last) if candidate.start < last.end => continue,
			_ => kept.push(candidate),
		}
	}
	kept
}

/// Escape the reserved XML characters in `text` outside `exclusion_ranges`.
///
/// `exclusion_ranges` must be sorted by start and disjoint, as returned by
/// [`prune_contained_or_overlapping`].
pub fn escape_excluding(text: &str, exclusion_ranges: &[Range<usize>]) -> String {
	let mut escaped = String::with_capacity(text.len() + text.len() / 8);
	let mut ranges = exclusion_ranges.iter().peekable();

	for (index, ch) in text.char_indices() {
		while ranges.next_if(|r| r.end <= index).is_some() {}

		if ranges.peek().is_some_and(|r| r.start <= index) {
			escaped.push(ch);
		} else {
			push_escaped(&mut escaped, ch);
		}
	}

	escaped
}

/// Escape every reserved XML character in `text`.
pub fn escape_xml(text: &str) -> String {
	escape_excluding(text, &[])
}

/// Escape `text` for inclusion in an XML document, leaving `<!-- -->`
/// comments and `<![CDATA[ ]]>` sections verbatim.
pub fn escape_ignoring_cdata_and_comments(text: &str) -> String {
	let mut ranges = token_pair_ranges(text, COMMENT_START, COMMENT_END);
	ranges.extend(token_pair_ranges(text, CDATA_START, CDATA_END));
	let exclusions = prune_contained_or_overlapping(&ranges);
	escape_excluding(text, &exclusions)
}

/// Returns true if `name` is usable as an XML element or attribute name.
///
/// The first character must be a letter or `_`; the rest may be letters,
/// digits, `-`, `_`, `.` or `:`. Matching is case-sensitive and there is no
/// length limit. Names beginning with `xml` are reserved by XML 1.0 but
/// still accepted.
pub fn is_valid_entity_name(name: &str) -> bool {
	let mut chars = name.chars();
	match chars.next() {
		Some(first) if first.is_alphabetic() || first == '_' => {}
		_ => return false,
	}
	chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn push_escaped(out: &mut String, ch: char) {
	match ch {
		'&' => out.push_str("&amp;"),
		'<' => out.push_str("&lt;"),
		'>' => out.push_str("&gt;"),
		'"' => out.push_str("&quot;"),
		'\'' => out.push_str("&apos;"),
		other => out.push(other),
	}
}
