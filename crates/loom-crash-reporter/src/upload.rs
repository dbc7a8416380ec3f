// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Collector upload client.
//!
//! An upload runs three dependent stages:
//!
//! 1. **Negotiate**: `GET {base}/api/getCrashUploadUrl` returns a presigned
//!    destination for the archive.
//! 2. **Transfer**: `PUT` the archive bytes to that destination.
//! 3. **Finalize**: multipart `POST {base}/api/commitS3CrashUpload` with the
//!    destination as `s3key`, the archive MD5 and the crash metadata.
//!
//! A client runs one upload at a time. [`UploadClient::cancel_upload`] aborts
//! the outstanding stage and the `upload` future resolves with
//! [`UploadError::Cancelled`] for that stage.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use loom_crash_reporter_core::{BuiltArchive, CrashMetadata};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::Form;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{ConfigError, ReporterError, UploadError, UploadStage};
use crate::retry::{retry, RetryConfig};

/// Default collector URL; `{database}` is replaced with the database name.
pub const DEFAULT_COLLECTOR_URL_TEMPLATE: &str = "https://{database}.bugsplat.com";

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

fn user_agent() -> String {
	format!("loom-crash-reporter/{}", env!("CARGO_PKG_VERSION"))
}

/// One archive to send, plus the metadata that goes with it.
#[derive(Debug, Clone)]
pub struct UploadRequest {
	/// Storage identifier of the report, used for logging only.
	pub crash_filename: String,
	pub archive: BuiltArchive,
	pub metadata: CrashMetadata,
}

/// What the collector returned for a finalized report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
	/// Human-viewable report page.
	pub info_url: Option<String>,
	pub crash_id: Option<u64>,
}

/// Something that can move a built archive to the collector.
#[async_trait]
pub trait CrashUploader: Send + Sync {
	async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError>;

	/// Aborts the in-flight upload. Returns `false` when nothing was running.
	fn cancel_upload(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct NegotiateResponse {
	url: String,
}

#[derive(Debug, Deserialize)]
struct FinalizeResponse {
	#[serde(default, rename = "infoUrl")]
	info_url: Option<String>,
	#[serde(default, rename = "crashId")]
	crash_id: Option<u64>,
}

/// Builder for [`UploadClient`].
pub struct UploadClientBuilder {
	collector_url_template: String,
	database: Option<String>,
	application_name: Option<String>,
	application_version: Option<String>,
	request_timeout: Duration,
	retry_config: RetryConfig,
}

impl UploadClientBuilder {
	pub fn new() -> Self {
		Self {
			collector_url_template: DEFAULT_COLLECTOR_URL_TEMPLATE.to_string(),
			database: None,
			application_name: None,
			application_version: None,
			request_timeout: Duration::from_secs(30),
			retry_config: RetryConfig::default(),
		}
	}

	/// Sets the collector URL template.
	///
	/// Example: `http://127.0.0.1:8080` or `https://{database}.example.com`
	pub fn collector_url_template(mut self, template: impl Into<String>) -> Self {
		self.collector_url_template = template.into();
		self
	}

	/// Default database, used when the crash metadata does not name one.
	pub fn database(mut self, database: impl Into<String>) -> Self {
		self.database = Some(database.into());
		self
	}

	pub fn application_name(mut self, name: impl Into<String>) -> Self {
		self.application_name = Some(name.into());
		self
	}

	pub fn application_version(mut self, version: impl Into<String>) -> Self {
		self.application_version = Some(version.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	pub fn retry_config(mut self, config: RetryConfig) -> Self {
		self.retry_config = config;
		self
	}

	pub fn build(self) -> Result<UploadClient, ReporterError> {
		let database = self
			.database
			.filter(|d| !d.is_empty())
			.ok_or_else(|| ConfigError::missing_field("database"))?;

		if self.collector_url_template.trim().is_empty() {
			return Err(
				ConfigError::invalid_value("collector_url_template", "must not be empty").into(),
			);
		}

		let http = Client::builder()
			.user_agent(user_agent())
			.timeout(self.request_timeout)
			.build()
			.map_err(ReporterError::HttpClient)?;

		info!(
			database = %database,
			collector = %self.collector_url_template,
			"crash upload client initialized"
		);

		Ok(UploadClient {
			inner: Arc::new(UploadClientInner {
				http,
				collector_url_template: self.collector_url_template,
				database,
				application_name: self.application_name.unwrap_or_default(),
				application_version: self.application_version.unwrap_or_default(),
				retry_config: self.retry_config,
				active: Mutex::new(None),
			}),
		})
	}
}

impl Default for UploadClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct UploadClientInner {
	http: Client,
	collector_url_template: String,
	database: String,
	application_name: String,
	application_version: String,
	retry_config: RetryConfig,
	active: Mutex<Option<CancellationToken>>,
}

impl UploadClientInner {
	fn active(&self) -> MutexGuard<'_, Option<CancellationToken>> {
		self
			.active
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

/// Releases the in-flight slot when an upload resolves or is dropped.
struct ActiveUpload<'a> {
	inner: &'a UploadClientInner,
	token: CancellationToken,
}

impl Drop for ActiveUpload<'_> {
	fn drop(&mut self) {
		self.inner.active().take();
	}
}

/// Identifying fields resolved for one upload.
struct Identity {
	database: String,
	application_name: String,
	application_version: String,
}

/// HTTP client for the three-stage collector protocol.
#[derive(Clone)]
pub struct UploadClient {
	inner: Arc<UploadClientInner>,
}

impl UploadClient {
	pub fn builder() -> UploadClientBuilder {
		UploadClientBuilder::new()
	}

	pub fn is_upload_in_progress(&self) -> bool {
		self.inner.active().is_some()
	}

	/// Aborts the in-flight upload, if any.
	pub fn cancel_upload(&self) -> bool {
		match self.inner.active().as_ref() {
			Some(token) => {
				info!("cancelling crash upload");
				token.cancel();
				true
			}
			None => false,
		}
	}

	/// Collector base URL for `database`, without a trailing slash.
	pub fn collector_base_url(&self, database: &str) -> String {
		self
			.inner
			.collector_url_template
			.replace("{database}", database)
			.trim_end_matches('/')
			.to_string()
	}

	fn begin(&self) -> Result<ActiveUpload<'_>, UploadError> {
		let mut active = self.inner.active();
		if active.is_some() {
			return Err(UploadError::AlreadyInProgress);
		}
		let token = CancellationToken::new();
		*active = Some(token.clone());
		Ok(ActiveUpload {
			inner: &self.inner,
			token,
		})
	}

	fn identity(&self, metadata: &CrashMetadata) -> Identity {
		fn pick(value: &Option<String>, fallback: &str) -> String {
			value
				.as_deref()
				.filter(|v| !v.is_empty())
				.unwrap_or(fallback)
				.to_string()
		}
		Identity {
			database: pick(&metadata.database, &self.inner.database),
			application_name: pick(&metadata.application_name, &self.inner.application_name),
			application_version: pick(
				&metadata.application_version,
				&self.inner.application_version,
			),
		}
	}

	/// Runs all three stages for `request`.
	#[instrument(skip_all, fields(crash_filename = %request.crash_filename))]
	pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError> {
		let active = self.begin()?;
		let cancel = active.token.clone();

		let identity = self.identity(&request.metadata);
		let base_url = self.collector_base_url(&identity.database);
		let archive = Bytes::from(request.archive.bytes);
		let digest = request.archive.digest;

		debug!(
			database = %identity.database,
			bytes = archive.len(),
			md5 = %digest,
			"starting crash upload"
		);

		let destination = self
			.guarded(
				&cancel,
				UploadStage::Negotiate,
				self.negotiate(&base_url, &identity, archive.len(), &cancel),
			)
			.await?;

		self
			.guarded(
				&cancel,
				UploadStage::Transfer,
				self.transfer(&destination, archive, &cancel),
			)
			.await?;

		let receipt = self
			.guarded(
				&cancel,
				UploadStage::Finalize,
				self.finalize(
					&base_url,
					&identity,
					destination.as_str(),
					&digest,
					&request.metadata,
					&cancel,
				),
			)
			.await?;

		info!(
			info_url = receipt.info_url.as_deref().unwrap_or(""),
			crash_id = receipt.crash_id,
			"crash upload finalized"
		);
		drop(active);
		Ok(receipt)
	}

	/// Resolves with `Cancelled { stage }` as soon as `cancel` fires, dropping
	/// the outstanding request.
	async fn guarded<T>(
		&self,
		cancel: &CancellationToken,
		stage: UploadStage,
		operation: impl Future<Output = Result<T, UploadError>>,
	) -> Result<T, UploadError> {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				info!(stage = %stage, "crash upload cancelled");
				Err(UploadError::Cancelled { stage })
			}
			result = operation => result,
		}
	}

	async fn negotiate(
		&self,
		base_url: &str,
		identity: &Identity,
		size: usize,
		cancel: &CancellationToken,
	) -> Result<Url, UploadError> {
		let stage = UploadStage::Negotiate;
		let url = format!("{base_url}/api/getCrashUploadUrl");
		let size = size.to_string();

		let response = retry(&self.inner.retry_config, cancel, stage, || async {
			let response = self
				.inner
				.http
				.get(&url)
				.query(&[
					("database", identity.database.as_str()),
					("appName", identity.application_name.as_str()),
					("appVersion", identity.application_version.as_str()),
					("crashPostSize", size.as_str()),
				])
				.send()
				.await
				.map_err(|source| UploadError::Transport { stage, source })?;
			check_status(stage, response).await
		})
		.await?;

		let body: NegotiateResponse = response.json().await.map_err(|e| UploadError::InvalidResponse {
			stage,
			message: e.to_string(),
		})?;

		let destination = Url::parse(&body.url).map_err(|e| UploadError::InvalidResponse {
			stage,
			message: format!("invalid upload url {:?}: {e}", body.url),
		})?;

		debug!(destination = %destination.host_str().unwrap_or(""), "negotiated upload destination");
		Ok(destination)
	}

	async fn transfer(
		&self,
		destination: &Url,
		archive: Bytes,
		cancel: &CancellationToken,
	) -> Result<(), UploadError> {
		let stage = UploadStage::Transfer;

		retry(&self.inner.retry_config, cancel, stage, || async {
			let response = self
				.inner
				.http
				.put(destination.clone())
				.header(CONTENT_TYPE, ARCHIVE_CONTENT_TYPE)
				.body(archive.clone())
				.send()
				.await
				.map_err(|source| UploadError::Transport { stage, source })?;
			check_status(stage, response).await
		})
		.await?;

		debug!(bytes = archive.len(), "transferred crash archive");
		Ok(())
	}

	async fn finalize(
		&self,
		base_url: &str,
		identity: &Identity,
		s3key: &str,
		digest: &str,
		metadata: &CrashMetadata,
		cancel: &CancellationToken,
	) -> Result<UploadReceipt, UploadError> {
		let stage = UploadStage::Finalize;
		let url = format!("{base_url}/api/commitS3CrashUpload");
		let fields = finalize_fields(identity, s3key, digest, metadata);

		let response = retry(&self.inner.retry_config, cancel, stage, || async {
			// A multipart form is consumed by the request, so every attempt builds its own.
			let form = fields
				.iter()
				.fold(Form::new(), |form, (name, value)| form.text(*name, value.clone()));
			let response = self
				.inner
				.http
				.post(&url)
				.multipart(form)
				.send()
				.await
				.map_err(|source| UploadError::Transport { stage, source })?;
			check_status(stage, response).await
		})
		.await?;

		let body: FinalizeResponse = response.json().await.map_err(|e| UploadError::InvalidResponse {
			stage,
			message: e.to_string(),
		})?;

		Ok(UploadReceipt {
			info_url: body.info_url.filter(|u| !u.is_empty()),
			crash_id: body.crash_id,
		})
	}
}

#[async_trait]
impl CrashUploader for UploadClient {
	async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError> {
		UploadClient::upload(self, request).await
	}

	fn cancel_upload(&self) -> bool {
		UploadClient::cancel_upload(self)
	}
}

async fn check_status(stage: UploadStage, response: Response) -> Result<Response, UploadError> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	let message = response.text().await.unwrap_or_default();
	Err(UploadError::Rejected {
		stage,
		status: status.as_u16(),
		message,
	})
}

/// Multipart fields of the finalize request. Optional metadata is omitted
/// rather than sent empty.
fn finalize_fields(
	identity: &Identity,
	s3key: &str,
	digest: &str,
	metadata: &CrashMetadata,
) -> Vec<(&'static str, String)> {
	let mut fields = vec![
		("database", identity.database.clone()),
		("appName", identity.application_name.clone()),
		("appVersion", identity.application_version.clone()),
		("s3key", s3key.to_string()),
		("md5", digest.to_string()),
	];

	let optional = [
		("user", &metadata.user_name),
		("email", &metadata.user_email),
		("description", &metadata.user_description),
		("appLog", &metadata.application_log),
		("appKey", &metadata.application_key),
		("notes", &metadata.notes),
	];
	for (name, value) in optional {
		if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
			fields.push((name, value.to_string()));
		}
	}

	if !metadata.attributes.is_empty() {
		if let Ok(json) = serde_json::to_string(&metadata.attributes) {
			fields.push(("attributes", json));
		}
	}
	if let Some(crash_time) = metadata.crash_time_iso8601() {
		fields.push(("crashTime", crash_time));
	}
	fields
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{TimeZone, Utc};

	fn identity() -> Identity {
		Identity {
			database: "fred".to_string(),
			application_name: "MyApp".to_string(),
			application_version: "1.0".to_string(),
		}
	}

	fn field<'a>(fields: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
		fields
			.iter()
			.find(|(n, _)| *n == name)
			.map(|(_, v)| v.as_str())
	}

	#[test]
	fn build_requires_database() {
		let err = UploadClient::builder().build().err().unwrap();
		assert!(matches!(err, ReporterError::Config(ConfigError::MissingField(f)) if f == "database"));
	}

	#[test]
	fn base_url_substitutes_database() {
		let client = UploadClient::builder().database("fred").build().unwrap();
		assert_eq!(client.collector_base_url("fred"), "https://fred.bugsplat.com");

		let local = UploadClient::builder()
			.database("fred")
			.collector_url_template("http://127.0.0.1:9000/")
			.build()
			.unwrap();
		assert_eq!(local.collector_base_url("fred"), "http://127.0.0.1:9000");
	}

	#[test]
	fn metadata_identity_overrides_client_defaults() {
		let client = UploadClient::builder()
			.database("default-db")
			.application_name("Default")
			.application_version("0.1")
			.build()
			.unwrap();

		let metadata = CrashMetadata {
			database: Some("crash-db".to_string()),
			application_version: Some("2.0".to_string()),
			application_name: Some(String::new()),
			..Default::default()
		};
		let identity = client.identity(&metadata);
		assert_eq!(identity.database, "crash-db");
		assert_eq!(identity.application_name, "Default");
		assert_eq!(identity.application_version, "2.0");
	}

	#[test]
	fn finalize_fields_include_present_metadata_only() {
		let mut metadata = CrashMetadata {
			user_name: Some("Fred".to_string()),
			user_email: Some(String::new()),
			notes: Some("beta".to_string()),
			crash_time: Some(Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap()),
			..Default::default()
		};
		metadata.attributes.set("tier", Some("gold")).unwrap();

		let fields = finalize_fields(&identity(), "https://s3/key", "abc123", &metadata);

		assert_eq!(field(&fields, "database"), Some("fred"));
		assert_eq!(field(&fields, "s3key"), Some("https://s3/key"));
		assert_eq!(field(&fields, "md5"), Some("abc123"));
		assert_eq!(field(&fields, "user"), Some("Fred"));
		assert_eq!(field(&fields, "notes"), Some("beta"));
		assert_eq!(field(&fields, "attributes"), Some(r#"{"tier":"gold"}"#));
		assert_eq!(field(&fields, "crashTime"), Some("2025-02-03T04:05:06Z"));
		assert!(field(&fields, "email").is_none());
		assert!(field(&fields, "description").is_none());
	}

	#[test]
	fn cancel_without_upload_is_noop() {
		let client = UploadClient::builder().database("fred").build().unwrap();
		assert!(!client.cancel_upload());
		assert!(!client.is_upload_in_progress());
	}

	#[test]
	fn second_begin_is_rejected_until_first_releases() {
		let client = UploadClient::builder().database("fred").build().unwrap();
		let first = client.begin().unwrap();
		assert!(matches!(client.begin(), Err(UploadError::AlreadyInProgress)));
		assert!(client.is_upload_in_progress());
		drop(first);
		assert!(!client.is_upload_in_progress());
		assert!(client.begin().is_ok());
	}

	#[test]
	fn finalize_response_tolerates_missing_fields() {
		let body: FinalizeResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
		assert!(body.info_url.is_none());
		assert!(body.crash_id.is_none());

		let body: FinalizeResponse =
			serde_json::from_str(r#"{"infoUrl":"https://x/123","crashId":123}"#).unwrap();
		assert_eq!(body.info_url.as_deref(), Some("https://x/123"));
		assert_eq!(body.crash_id, Some(123));
	}
}
