// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pending report lifecycle.
//!
//! [`CrashReporter::start`] runs once per application launch:
//!
//! 1. A capture left behind by the crash trapper is copied into crash storage
//!    together with the context of the session that crashed.
//! 2. The session attributes are cleared and the trapper is re-armed with the
//!    current context. A capture that could not be stored stays with the
//!    trapper and the attributes are kept for the next attempt.
//! 3. Every pending report is processed, oldest first and one at a time:
//!    decide whether to ask the user, build the archive, upload, then either
//!    delete the record (sent or discarded) or keep it for the next launch
//!    (failed).
//!
//! ```text
//! Idle -> Checking -> NoPending | HasPending
//! HasPending -> Deciding -> SilentSend | AwaitingUserChoice
//! AwaitingUserChoice -> Send | Discard | AlwaysSend
//! Send | SilentSend | AlwaysSend -> Building -> Uploading -> Finalized | Failed
//! Finalized | Discard -> Cleanup -> Idle
//! Failed -> Idle
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use loom_crash_reporter_core::{ArchiveBundle, CrashMetadata, StoredCrashContext};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::attributes::AttributeStore;
use crate::config::ReporterConfig;
use crate::delegate::{NoopDelegate, ReportOutcome, ReporterDelegate, UploadOutcome};
use crate::error::{ConfigError, ErrorKind, ReporterError, Result, StorageError, UploadStage};
use crate::ports::{
	Collaborators, CrashPrompt, PromptRequest, PromptResponse, UserAction,
	BUNDLE_KEY_APPLICATION_NAME, BUNDLE_KEY_APPLICATION_VERSION, BUNDLE_KEY_DATABASE,
	PREF_AUTO_SUBMIT, PREF_USER_EMAIL, PREF_USER_NAME,
};
use crate::upload::{CrashUploader, UploadClient, UploadRequest};

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterState {
	#[default]
	Idle,
	Checking,
	NoPending,
	HasPending,
	Deciding,
	SilentSend,
	AwaitingUserChoice,
	Send,
	Discard,
	AlwaysSend,
	Building,
	Uploading,
	Finalized,
	Failed,
	Cleanup,
}

impl ReporterState {
	/// Whether a report is being built or uploaded.
	pub fn is_sending(&self) -> bool {
		matches!(self, ReporterState::Building | ReporterState::Uploading)
	}
}

/// State plus the report it applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
	pub state: ReporterState,
	pub crash_filename: Option<String>,
}

/// How one pending report was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDisposition {
	Sent { info_url: Option<String> },
	Discarded,
	Failed {
		kind: ErrorKind,
		stage: Option<UploadStage>,
	},
}

/// Result of one [`CrashReporter::start`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
	/// Identifier given to a capture taken over from the trapper.
	pub ingested: Option<String>,
	/// Reports in the order they were processed.
	pub reports: Vec<(String, ReportDisposition)>,
}

impl RunSummary {
	pub fn sent(&self) -> usize {
		self.count(|d| matches!(d, ReportDisposition::Sent { .. }))
	}

	pub fn discarded(&self) -> usize {
		self.count(|d| matches!(d, ReportDisposition::Discarded))
	}

	pub fn failed(&self) -> usize {
		self.count(|d| matches!(d, ReportDisposition::Failed { .. }))
	}

	fn count(&self, pred: impl Fn(&ReportDisposition) -> bool) -> usize {
		self.reports.iter().filter(|(_, d)| pred(d)).count()
	}
}

/// What happened to the trapper's pending capture during a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ingestion {
	NonePending,
	Ingested(String),
	/// Storage refused the capture; it stays with the trapper.
	Retained,
	/// The capture was unreadable and was dropped.
	Purged,
}

impl Ingestion {
	fn crash_filename(&self) -> Option<String> {
		match self {
			Ingestion::Ingested(id) => Some(id.clone()),
			_ => None,
		}
	}
}

/// Identifying fields of the running application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
	pub database: String,
	pub application_name: String,
	pub application_version: String,
}

/// Drives pending crash reports from capture to collector.
pub struct CrashReporter {
	config: ReporterConfig,
	collaborators: Collaborators,
	attributes: AttributeStore,
	uploader: Mutex<Option<Arc<dyn CrashUploader>>>,
	prompt: Option<Arc<dyn CrashPrompt>>,
	delegate: Arc<dyn ReporterDelegate>,
	state: watch::Sender<StateSnapshot>,
	started: AtomicBool,
}

impl CrashReporter {
	pub fn new(config: ReporterConfig, collaborators: Collaborators) -> Self {
		let attributes = AttributeStore::new(collaborators.preferences.clone());
		let (state, _) = watch::channel(StateSnapshot::default());
		Self {
			config,
			collaborators,
			attributes,
			uploader: Mutex::new(None),
			prompt: None,
			delegate: Arc::new(NoopDelegate),
			state,
			started: AtomicBool::new(false),
		}
	}

	/// Uses `uploader` instead of building an [`UploadClient`] from the
	/// configuration.
	pub fn with_uploader(self, uploader: Arc<dyn CrashUploader>) -> Self {
		*self
			.uploader
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(uploader);
		self
	}

	pub fn with_prompt(mut self, prompt: Arc<dyn CrashPrompt>) -> Self {
		self.prompt = Some(prompt);
		self
	}

	pub fn with_delegate(mut self, delegate: Arc<dyn ReporterDelegate>) -> Self {
		self.delegate = delegate;
		self
	}

	pub fn config(&self) -> &ReporterConfig {
		&self.config
	}

	pub fn state(&self) -> ReporterState {
		self.state.borrow().state
	}

	/// Receiver that sees every state change.
	pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
		self.state.subscribe()
	}

	pub fn is_sending_in_progress(&self) -> bool {
		self.state.borrow().state.is_sending()
	}

	/// Identifier of the report being built or uploaded.
	pub fn current_crash_filename(&self) -> Option<String> {
		let snapshot = self.state.borrow();
		if snapshot.state.is_sending() {
			snapshot.crash_filename.clone()
		} else {
			None
		}
	}

	/// Sets or clears a session attribute. Persisted before returning.
	pub fn set_attribute(&self, name: &str, value: Option<&str>) -> Result<()> {
		self.attributes.set(name, value)
	}

	/// Sets the user name sent with future crashes.
	pub fn set_user_name(&self, name: Option<&str>) -> Result<()> {
		self.set_user_detail(PREF_USER_NAME, name)
	}

	/// Sets the user email sent with future crashes.
	pub fn set_user_email(&self, email: Option<&str>) -> Result<()> {
		self.set_user_detail(PREF_USER_EMAIL, email)
	}

	fn set_user_detail(&self, key: &str, value: Option<&str>) -> Result<()> {
		let value = value.filter(|v| !v.is_empty());
		self.collaborators.preferences.set_string(key, value)?;
		if self.started.load(Ordering::SeqCst) {
			if let Ok(identity) = self.resolve_identity() {
				self.arm_trapper_context(&identity);
			}
		}
		Ok(())
	}

	/// Aborts the upload in flight, if any.
	pub fn cancel_upload(&self) -> bool {
		let uploader = self
			.uploader
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.clone();
		uploader.map(|u| u.cancel_upload()).unwrap_or(false)
	}

	/// Resolves database and application identity from configuration, then
	/// the application bundle.
	pub fn resolve_identity(&self) -> Result<AppIdentity> {
		let bundle = &self.collaborators.bundle;
		let pick = |configured: &Option<String>, key: &str| {
			configured
				.clone()
				.filter(|v| !v.is_empty())
				.or_else(|| bundle.info_value(key).filter(|v| !v.is_empty()))
		};

		let database = pick(&self.config.database, BUNDLE_KEY_DATABASE)
			.ok_or_else(|| ConfigError::missing_field("database"))?;

		Ok(AppIdentity {
			database,
			application_name: pick(&self.config.application_name, BUNDLE_KEY_APPLICATION_NAME)
				.unwrap_or_default(),
			application_version: pick(
				&self.config.application_version,
				BUNDLE_KEY_APPLICATION_VERSION,
			)
			.unwrap_or_default(),
		})
	}

	/// Processes the pending capture and every pending report.
	///
	/// May only be called once per reporter.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<RunSummary> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(ReporterError::AlreadyStarted);
		}

		let identity = self.resolve_identity()?;
		let uploader = self.uploader_for(&identity)?;
		let mut summary = RunSummary::default();

		self.transition(ReporterState::Checking, None);
		let ingestion = self.ingest_pending_capture(&identity);
		summary.ingested = ingestion.crash_filename();

		if ingestion == Ingestion::Retained {
			info!("keeping session attributes for the capture left with the trapper");
		} else if let Err(e) = self.attributes.clear() {
			warn!(error = %e, "failed to clear session attributes");
		}
		self.arm_trapper_context(&identity);
		if let Err(e) = self.collaborators.trapper.enable() {
			error!(error = %e, "crash trapper could not be enabled");
		}

		let pending = match self.collaborators.storage.pending_reports() {
			Ok(pending) => pending,
			Err(e) => {
				error!(error = %e, "crash storage unavailable, skipping pending reports");
				self.transition(ReporterState::Idle, None);
				return Err(e.into());
			}
		};

		if pending.is_empty() {
			self.transition(ReporterState::NoPending, None);
			self.transition(ReporterState::Idle, None);
			info!("no pending crash reports");
			return Ok(summary);
		}

		info!(count = pending.len(), "processing pending crash reports");
		for id in pending {
			self.transition(ReporterState::HasPending, Some(&id));
			let disposition = self.process_report(&id, &identity, uploader.as_ref()).await;
			summary.reports.push((id, disposition));
			self.transition(ReporterState::Idle, None);
		}

		info!(
			sent = summary.sent(),
			discarded = summary.discarded(),
			failed = summary.failed(),
			"finished processing crash reports"
		);
		Ok(summary)
	}

	fn uploader_for(&self, identity: &AppIdentity) -> Result<Arc<dyn CrashUploader>> {
		let mut slot = self
			.uploader
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		if let Some(uploader) = slot.as_ref() {
			return Ok(uploader.clone());
		}

		let client: Arc<dyn CrashUploader> = Arc::new(
			UploadClient::builder()
				.collector_url_template(&self.config.collector_url_template)
				.database(&identity.database)
				.application_name(&identity.application_name)
				.application_version(&identity.application_version)
				.request_timeout(self.config.request_timeout())
				.retry_config(self.config.retry.to_retry_config())
				.build()?,
		);
		*slot = Some(client.clone());
		Ok(client)
	}

	fn transition(&self, state: ReporterState, crash_filename: Option<&str>) {
		debug!(state = ?state, crash_filename, "crash reporter state");
		self.state.send_replace(StateSnapshot {
			state,
			crash_filename: crash_filename.map(str::to_string),
		});
	}

	/// Context of the running session, embedded in future captures.
	fn current_context(&self, identity: &AppIdentity) -> StoredCrashContext {
		let prefs = &self.collaborators.preferences;
		let mut context = StoredCrashContext::at(Utc::now());
		context.database = Some(identity.database.clone());
		context.application_name = Some(identity.application_name.clone()).filter(|v| !v.is_empty());
		context.application_version =
			Some(identity.application_version.clone()).filter(|v| !v.is_empty());
		context.user_name = prefs
			.string(PREF_USER_NAME)
			.or_else(|| self.config.user_name.clone());
		context.user_email = prefs
			.string(PREF_USER_EMAIL)
			.or_else(|| self.config.user_email.clone());
		context.application_key = self.config.application_key.clone();
		context.notes = self.config.notes.clone();
		context
	}

	fn arm_trapper_context(&self, identity: &AppIdentity) {
		match serde_json::to_vec(&self.current_context(identity)) {
			Ok(data) => self.collaborators.trapper.set_custom_data(data),
			Err(e) => warn!(error = %e, "failed to encode crash context for trapper"),
		}
	}

	/// Moves the trapper's pending capture into crash storage.
	///
	/// The record's metadata and attachments are written before its report
	/// bytes, so it only becomes pending once complete.
	fn ingest_pending_capture(&self, identity: &AppIdentity) -> Ingestion {
		let trapper = &self.collaborators.trapper;
		if !trapper.has_pending_report() {
			return Ingestion::NonePending;
		}

		let report = match trapper.load_pending_report() {
			Ok(report) => report,
			Err(e) => {
				error!(error = %e, "failed to load pending crash capture, purging it");
				if let Err(e) = trapper.purge_pending_report() {
					warn!(error = %e, "failed to purge pending crash capture");
				}
				return Ingestion::Purged;
			}
		};

		let mut context = trapper
			.pending_custom_data()
			.and_then(|data| match serde_json::from_slice::<StoredCrashContext>(&data) {
				Ok(context) => Some(context),
				Err(e) => {
					warn!(error = %e, "ignoring unreadable crash-time context");
					None
				}
			})
			.unwrap_or_else(|| self.current_context(identity));
		context.crash_time = trapper.pending_report_time().unwrap_or_else(Utc::now);
		context.attributes = self.attributes.load();
		context.application_log = self.delegate.application_log();
		let attachments = self.delegate.attachments();

		let id = new_crash_filename();
		let storage = &self.collaborators.storage;
		let persisted = storage
			.save_metadata(&id, &context)
			.and_then(|_| {
				if attachments.is_empty() {
					Ok(())
				} else {
					storage.save_attachments(&id, &attachments)
				}
			})
			.and_then(|_| storage.save_report(&id, &report));

		if let Err(e) = persisted {
			error!(crash_filename = %id, error = %e, "failed to persist crash capture");
			if let Err(e) = storage.cleanup(&id) {
				warn!(crash_filename = %id, error = %e, "failed to remove partial crash record");
			}
			return Ingestion::Retained;
		}

		if let Err(e) = trapper.purge_pending_report() {
			warn!(error = %e, "failed to purge pending crash capture");
		}
		info!(
			crash_filename = %id,
			bytes = report.len(),
			attributes = context.attributes.len(),
			attachments = attachments.len(),
			"took over pending crash capture"
		);
		Ingestion::Ingested(id)
	}

	#[instrument(skip_all, fields(crash_filename = %id))]
	async fn process_report(
		&self,
		id: &str,
		identity: &AppIdentity,
		uploader: &dyn CrashUploader,
	) -> ReportDisposition {
		let context = match self.collaborators.storage.load_metadata(id) {
			Ok(Some(context)) => context,
			Ok(None) => {
				debug!("no stored context, using current application context");
				self.current_context(identity)
			}
			Err(e) => return self.fail(id, e.into()),
		};

		self.transition(ReporterState::Deciding, Some(id));
		let response = if self.should_send_silently(&context) {
			self.transition(ReporterState::SilentSend, Some(id));
			None
		} else {
			self.transition(ReporterState::AwaitingUserChoice, Some(id));
			let response = match self.ask_user(id, identity, &context).await {
				Ok(response) => response,
				Err(e) => return self.fail(id, e),
			};
			match response.action {
				UserAction::Cancel => return self.discard(id),
				UserAction::Send => self.transition(ReporterState::Send, Some(id)),
				UserAction::AlwaysSend => {
					self.transition(ReporterState::AlwaysSend, Some(id));
					if let Err(e) = self
						.collaborators
						.preferences
						.set_bool(PREF_AUTO_SUBMIT, true)
					{
						warn!(error = %e, "failed to remember always-send choice");
					}
				}
			}
			self.remember_user_details(&response);
			Some(response)
		};

		self.transition(ReporterState::Building, Some(id));
		let request = match self.build_request(id, identity, &context, response.as_ref()) {
			Ok(request) => request,
			Err(e) => return self.fail(id, e),
		};

		self.delegate.will_send_crash_report(id);
		self.transition(ReporterState::Uploading, Some(id));
		match uploader.upload(request).await {
			Ok(receipt) => {
				self.transition(ReporterState::Finalized, Some(id));
				info!(info_url = receipt.info_url.as_deref().unwrap_or(""), "crash report sent");
				self.transition(ReporterState::Cleanup, Some(id));
				if let Err(e) = self.collaborators.storage.cleanup(id) {
					error!(error = %e, "sent crash report could not be removed");
				}
				self.notify(
					id,
					UploadOutcome::Success {
						info_url: receipt.info_url.clone(),
					},
				);
				ReportDisposition::Sent {
					info_url: receipt.info_url,
				}
			}
			Err(e) => self.fail(id, e.into()),
		}
	}

	fn should_send_silently(&self, context: &StoredCrashContext) -> bool {
		if self.config.auto_submit || self.collaborators.preferences.bool(PREF_AUTO_SUBMIT) {
			return true;
		}
		let Some(expiration) = self.config.expiration() else {
			return false;
		};
		match chrono::Duration::from_std(expiration) {
			Ok(expiration) => {
				let expired = context.age(Utc::now()) >= expiration;
				if expired {
					info!("crash report expired, sending without asking");
				}
				expired
			}
			Err(_) => false,
		}
	}

	async fn ask_user(
		&self,
		id: &str,
		identity: &AppIdentity,
		context: &StoredCrashContext,
	) -> Result<PromptResponse> {
		let Some(prompt) = self.prompt.clone() else {
			warn!("no crash prompt installed, sending report");
			return Ok(PromptResponse::new(UserAction::Send));
		};

		let report = self
			.collaborators
			.storage
			.load_report(id)?
			.ok_or_else(|| missing_report(id))?;
		let prefs = &self.collaborators.preferences;
		let request = PromptRequest {
			application_name: context
				.application_name
				.clone()
				.unwrap_or_else(|| identity.application_name.clone()),
			banner_image: self.config.banner_image.clone(),
			report_text: String::from_utf8_lossy(&report).into_owned(),
			ask_user_details: self.config.ask_user_details,
			prefill_name: prefs
				.string(PREF_USER_NAME)
				.or_else(|| context.user_name.clone()),
			prefill_email: prefs
				.string(PREF_USER_EMAIL)
				.or_else(|| context.user_email.clone()),
		};

		let response = prompt.show(request).await;
		debug!(action = ?response.action, "user answered crash prompt");
		Ok(response)
	}

	fn remember_user_details(&self, response: &PromptResponse) {
		if !self.config.persist_user_details {
			return;
		}
		let prefs = &self.collaborators.preferences;
		for (key, value) in [
			(PREF_USER_NAME, &response.name),
			(PREF_USER_EMAIL, &response.email),
		] {
			if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
				if let Err(e) = prefs.set_string(key, Some(value)) {
					warn!(key, error = %e, "failed to remember user details");
				}
			}
		}
	}

	/// Composes metadata and archive for one attempt.
	fn build_request(
		&self,
		id: &str,
		identity: &AppIdentity,
		context: &StoredCrashContext,
		response: Option<&PromptResponse>,
	) -> Result<UploadRequest> {
		let storage = &self.collaborators.storage;
		let report = storage.load_report(id)?.ok_or_else(|| missing_report(id))?;
		let attachments = storage.load_attachments(id)?;

		let metadata = compose_metadata(context, identity, response);

		let mut bundle = ArchiveBundle::new();
		let report_entry = format!("{id}.crash");
		bundle.push(report_entry.clone(), report);

		let context_document =
			(!metadata.attributes.is_empty()).then(|| metadata.attributes.to_attachment());
		let mut names: HashSet<String> = [report_entry].into();
		for attachment in context_document.into_iter().chain(attachments) {
			if !names.insert(attachment.filename.clone()) {
				warn!(attachment = %attachment.filename, "skipping attachment with duplicate name");
				continue;
			}
			debug!(
				attachment = %attachment.filename,
				mime_type = %attachment.mime_type,
				bytes = attachment.data.len(),
				"adding attachment to crash archive"
			);
			bundle.push(attachment.filename, attachment.data);
		}

		let archive = bundle.build()?;
		debug!(
			entries = bundle.len(),
			bytes = archive.len(),
			md5 = %archive.digest,
			"built crash archive"
		);

		Ok(UploadRequest {
			crash_filename: id.to_string(),
			archive,
			metadata,
		})
	}

	fn discard(&self, id: &str) -> ReportDisposition {
		self.transition(ReporterState::Discard, Some(id));
		info!("user discarded crash report");
		self.transition(ReporterState::Cleanup, Some(id));
		if let Err(e) = self.collaborators.storage.cleanup(id) {
			error!(error = %e, "discarded crash report could not be removed");
		}
		ReportDisposition::Discarded
	}

	fn fail(&self, id: &str, err: ReporterError) -> ReportDisposition {
		let kind = err.kind();
		let stage = match &err {
			ReporterError::Upload(upload) => upload.stage(),
			_ => None,
		};
		self.transition(ReporterState::Failed, Some(id));
		warn!(
			kind = ?kind,
			stage = stage.map(|s| s.as_str()).unwrap_or(""),
			error = %err,
			"crash report not sent, keeping it for the next launch"
		);
		self.notify(
			id,
			UploadOutcome::Failure {
				kind,
				stage,
				message: err.to_string(),
			},
		);
		ReportDisposition::Failed { kind, stage }
	}

	fn notify(&self, id: &str, outcome: UploadOutcome) {
		self.delegate.did_finish_sending(&ReportOutcome {
			crash_filename: id.to_string(),
			outcome,
		});
	}
}

/// Crash-time metadata for one attempt. What the user typed into the prompt
/// wins over stored values; identity gaps are filled from the running app.
fn compose_metadata(
	context: &StoredCrashContext,
	identity: &AppIdentity,
	response: Option<&PromptResponse>,
) -> CrashMetadata {
	fn entered(value: Option<&Option<String>>) -> Option<String> {
		value.and_then(|v| v.clone()).filter(|v| !v.is_empty())
	}

	let mut metadata = context.to_metadata();
	metadata.database = metadata.database.or_else(|| Some(identity.database.clone()));
	metadata.application_name = metadata
		.application_name
		.or_else(|| Some(identity.application_name.clone()).filter(|v| !v.is_empty()));
	metadata.application_version = metadata
		.application_version
		.or_else(|| Some(identity.application_version.clone()).filter(|v| !v.is_empty()));
	metadata.user_name = entered(response.map(|r| &r.name)).or(metadata.user_name);
	metadata.user_email = entered(response.map(|r| &r.email)).or(metadata.user_email);
	metadata.user_description = entered(response.map(|r| &r.comments));
	metadata
}

fn missing_report(id: &str) -> ReporterError {
	StorageError::Unavailable(format!("report bytes for {id} are missing")).into()
}

/// Time-ordered storage identifier for a new record.
fn new_crash_filename() -> String {
	format!("crash-{}", Uuid::now_v7())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::{MemoryCrashStorage, MemoryCrashTrapper, MemoryPreferences, StaticBundle};
	use crate::ports::PREF_ATTRIBUTES;
	use chrono::TimeZone;
	use loom_crash_reporter_core::{Attachment, CRASH_CONTEXT_FILE_NAME};

	fn collaborators(trapper: MemoryCrashTrapper, bundle: StaticBundle) -> Collaborators {
		Collaborators {
			trapper: Arc::new(trapper),
			storage: Arc::new(MemoryCrashStorage::new()),
			bundle: Arc::new(bundle),
			preferences: Arc::new(MemoryPreferences::new()),
		}
	}

	fn identity() -> AppIdentity {
		AppIdentity {
			database: "fred".to_string(),
			application_name: "MyApp".to_string(),
			application_version: "1.0".to_string(),
		}
	}

	#[test]
	fn identity_prefers_config_over_bundle() {
		let bundle = StaticBundle::new()
			.with(BUNDLE_KEY_DATABASE, "bundle-db")
			.with(BUNDLE_KEY_APPLICATION_NAME, "BundleApp")
			.with(BUNDLE_KEY_APPLICATION_VERSION, "9.9");
		let config = ReporterConfig {
			database: Some("config-db".to_string()),
			..Default::default()
		};
		let reporter = CrashReporter::new(config, collaborators(MemoryCrashTrapper::new(), bundle));

		let identity = reporter.resolve_identity().unwrap();
		assert_eq!(identity.database, "config-db");
		assert_eq!(identity.application_name, "BundleApp");
		assert_eq!(identity.application_version, "9.9");
	}

	#[test]
	fn missing_database_is_a_configuration_error() {
		let reporter = CrashReporter::new(
			ReporterConfig::default(),
			collaborators(MemoryCrashTrapper::new(), StaticBundle::new()),
		);
		let err = reporter.resolve_identity().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Configuration);
	}

	#[test]
	fn user_entries_override_stored_context() {
		let mut context = StoredCrashContext::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
		context.user_name = Some("Stored".to_string());
		context.user_email = Some("stored@example.com".to_string());

		let response = PromptResponse {
			action: UserAction::Send,
			name: Some("Typed".to_string()),
			email: Some(String::new()),
			comments: Some("it broke".to_string()),
		};
		let metadata = compose_metadata(&context, &identity(), Some(&response));

		assert_eq!(metadata.user_name.as_deref(), Some("Typed"));
		assert_eq!(metadata.user_email.as_deref(), Some("stored@example.com"));
		assert_eq!(metadata.user_description.as_deref(), Some("it broke"));
		assert_eq!(metadata.database.as_deref(), Some("fred"));
		assert_eq!(metadata.application_name.as_deref(), Some("MyApp"));
	}

	#[test]
	fn crash_time_identity_is_kept() {
		let mut context = StoredCrashContext::at(Utc::now());
		context.application_version = Some("0.9".to_string());
		let metadata = compose_metadata(&context, &identity(), None);
		assert_eq!(metadata.application_version.as_deref(), Some("0.9"));
		assert!(metadata.user_description.is_none());
	}

	#[test]
	fn crash_filenames_sort_by_creation() {
		let first = new_crash_filename();
		std::thread::sleep(std::time::Duration::from_millis(2));
		let second = new_crash_filename();
		assert!(first < second);
		assert!(first.starts_with("crash-"));
	}

	#[test]
	fn expired_reports_are_sent_silently() {
		let config = ReporterConfig {
			database: Some("fred".to_string()),
			expiration_secs: Some(60),
			..Default::default()
		};
		let reporter = CrashReporter::new(
			config,
			collaborators(MemoryCrashTrapper::new(), StaticBundle::new()),
		);

		let old = StoredCrashContext::at(Utc::now() - chrono::Duration::hours(1));
		let fresh = StoredCrashContext::at(Utc::now());
		assert!(reporter.should_send_silently(&old));
		assert!(!reporter.should_send_silently(&fresh));
	}

	#[test]
	fn auto_submit_preference_forces_silent_send() {
		let collaborators = collaborators(MemoryCrashTrapper::new(), StaticBundle::new());
		collaborators
			.preferences
			.set_bool(PREF_AUTO_SUBMIT, true)
			.unwrap();
		let reporter = CrashReporter::new(ReporterConfig::default(), collaborators);
		assert!(reporter.should_send_silently(&StoredCrashContext::at(Utc::now())));
	}

	#[test]
	fn attributes_are_persisted_through_the_reporter() {
		let collaborators = collaborators(MemoryCrashTrapper::new(), StaticBundle::new());
		let prefs = collaborators.preferences.clone();
		let reporter = CrashReporter::new(ReporterConfig::default(), collaborators);

		reporter.set_attribute("build", Some("42")).unwrap();
		assert!(prefs.string(PREF_ATTRIBUTES).unwrap().contains("42"));

		let err = reporter.set_attribute("1bad", Some("x")).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidAttributeName);
	}

	#[test]
	fn archive_carries_context_document_before_attachments() {
		let collaborators = collaborators(MemoryCrashTrapper::new(), StaticBundle::new());
		let storage = collaborators.storage.clone();
		let reporter = CrashReporter::new(ReporterConfig::default(), collaborators);

		let mut context = StoredCrashContext::at(Utc::now());
		context.attributes.set("screen", Some("a<b")).unwrap();
		storage.save_report("crash-a", b"report").unwrap();
		storage
			.save_attachments(
				"crash-a",
				&[
					Attachment::new(CRASH_CONTEXT_FILE_NAME, "text/plain", b"shadow".to_vec()),
					Attachment::new("app.log", "text/plain", b"log".to_vec()),
				],
			)
			.unwrap();

		let request = reporter
			.build_request("crash-a", &identity(), &context, None)
			.unwrap();

		let mut archive =
			zip::ZipArchive::new(std::io::Cursor::new(request.archive.bytes.clone())).unwrap();
		let names: Vec<String> = (0..archive.len())
			.map(|i| archive.by_index(i).unwrap().name().to_string())
			.collect();
		assert_eq!(names, vec!["crash-a.crash", CRASH_CONTEXT_FILE_NAME, "app.log"]);

		let mut xml = String::new();
		std::io::Read::read_to_string(
			&mut archive.by_name(CRASH_CONTEXT_FILE_NAME).unwrap(),
			&mut xml,
		)
		.unwrap();
		assert_eq!(xml, context.attributes.to_xml());
		assert!(xml.contains("<screen>a&lt;b</screen>"));
	}

	#[test]
	fn archive_without_attributes_has_no_context_document() {
		let collaborators = collaborators(MemoryCrashTrapper::new(), StaticBundle::new());
		let storage = collaborators.storage.clone();
		let reporter = CrashReporter::new(ReporterConfig::default(), collaborators);
		storage.save_report("crash-a", b"report").unwrap();

		let request = reporter
			.build_request("crash-a", &identity(), &StoredCrashContext::at(Utc::now()), None)
			.unwrap();

		let archive = zip::ZipArchive::new(std::io::Cursor::new(request.archive.bytes)).unwrap();
		assert_eq!(archive.len(), 1);
	}

	#[test]
	fn current_filename_hidden_outside_sending_states() {
		let reporter = CrashReporter::new(
			ReporterConfig::default(),
			collaborators(MemoryCrashTrapper::new(), StaticBundle::new()),
		);
		reporter.transition(ReporterState::AwaitingUserChoice, Some("crash-a"));
		assert!(reporter.current_crash_filename().is_none());
		assert!(!reporter.is_sending_in_progress());

		reporter.transition(ReporterState::Uploading, Some("crash-a"));
		assert_eq!(reporter.current_crash_filename().as_deref(), Some("crash-a"));
		assert!(reporter.is_sending_in_progress());
	}
}
