// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared fakes and collector mocks for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loom_crash_reporter::{
	Collaborators, CrashPrompt, CrashReporter, CrashStorage, CrashUploader, MemoryCrashStorage,
	MemoryCrashTrapper, MemoryPreferences, PromptRequest, PromptResponse, ReportOutcome,
	ReporterConfig, ReporterDelegate, RetrySettings, StaticBundle, UploadError, UploadReceipt,
	UploadRequest, UserAction,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn config() -> ReporterConfig {
	ReporterConfig {
		database: Some("fred".to_string()),
		application_name: Some("MyApp".to_string()),
		application_version: Some("1.2.3".to_string()),
		retry: RetrySettings {
			max_attempts: 1,
			base_delay_ms: 1,
			max_delay_ms: 1,
			jitter: false,
		},
		..Default::default()
	}
}

pub fn auto_submit_config() -> ReporterConfig {
	ReporterConfig {
		auto_submit: true,
		..config()
	}
}

/// Collaborators plus handles for inspecting them.
pub struct Harness {
	pub storage: Arc<MemoryCrashStorage>,
	pub preferences: Arc<MemoryPreferences>,
	pub trapper: Arc<MemoryCrashTrapper>,
	pub delegate: Arc<RecordingDelegate>,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_trapper(MemoryCrashTrapper::new())
	}

	pub fn with_trapper(trapper: MemoryCrashTrapper) -> Self {
		Self {
			storage: Arc::new(MemoryCrashStorage::new()),
			preferences: Arc::new(MemoryPreferences::new()),
			trapper: Arc::new(trapper),
			delegate: Arc::new(RecordingDelegate::default()),
		}
	}

	pub fn collaborators(&self) -> Collaborators {
		Collaborators {
			trapper: self.trapper.clone(),
			storage: self.storage.clone(),
			bundle: Arc::new(StaticBundle::new()),
			preferences: self.preferences.clone(),
		}
	}

	pub fn reporter(&self, config: ReporterConfig) -> CrashReporter {
		CrashReporter::new(config, self.collaborators()).with_delegate(self.delegate.clone())
	}

	pub fn pending(&self) -> Vec<String> {
		self.storage.pending_reports().unwrap()
	}
}

#[derive(Default)]
pub struct RecordingDelegate {
	pub log: Option<String>,
	pub will_send: Mutex<Vec<String>>,
	pub outcomes: Mutex<Vec<ReportOutcome>>,
}

impl RecordingDelegate {
	pub fn outcomes(&self) -> Vec<ReportOutcome> {
		self.outcomes.lock().unwrap().clone()
	}

	pub fn will_send(&self) -> Vec<String> {
		self.will_send.lock().unwrap().clone()
	}
}

impl ReporterDelegate for RecordingDelegate {
	fn application_log(&self) -> Option<String> {
		self.log.clone()
	}

	fn will_send_crash_report(&self, crash_filename: &str) {
		self.will_send.lock().unwrap().push(crash_filename.to_string());
	}

	fn did_finish_sending(&self, outcome: &ReportOutcome) {
		self.outcomes.lock().unwrap().push(outcome.clone());
	}
}

/// What the prompt saw when it was shown.
#[derive(Debug, Clone)]
pub struct PromptShown {
	pub request: PromptRequest,
	/// Pending identifiers in storage at that moment.
	pub pending: Vec<String>,
}

/// Prompt that answers from a script.
pub struct ScriptedPrompt {
	storage: Arc<MemoryCrashStorage>,
	answers: Mutex<VecDeque<PromptResponse>>,
	shown: Mutex<Vec<PromptShown>>,
}

impl ScriptedPrompt {
	pub fn new(storage: Arc<MemoryCrashStorage>, answers: Vec<PromptResponse>) -> Self {
		Self {
			storage,
			answers: Mutex::new(answers.into()),
			shown: Mutex::new(Vec::new()),
		}
	}

	pub fn answering(storage: Arc<MemoryCrashStorage>, actions: &[UserAction]) -> Self {
		Self::new(
			storage,
			actions.iter().copied().map(PromptResponse::new).collect(),
		)
	}

	pub fn shown(&self) -> Vec<PromptShown> {
		self.shown.lock().unwrap().clone()
	}
}

#[async_trait]
impl CrashPrompt for ScriptedPrompt {
	async fn show(&self, request: PromptRequest) -> PromptResponse {
		let pending = self.storage.pending_reports().unwrap();
		self.shown.lock().unwrap().push(PromptShown { request, pending });
		self
			.answers
			.lock()
			.unwrap()
			.pop_front()
			.unwrap_or_else(|| PromptResponse::new(UserAction::Cancel))
	}
}

/// Uploader that replays scripted results and records what it was given.
#[derive(Default)]
pub struct FakeUploader {
	results: Mutex<VecDeque<Result<UploadReceipt, UploadError>>>,
	requests: Mutex<Vec<UploadRequest>>,
}

impl FakeUploader {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn then(self, result: Result<UploadReceipt, UploadError>) -> Self {
		self.results.lock().unwrap().push_back(result);
		self
	}

	pub fn requests(&self) -> Vec<UploadRequest> {
		self.requests.lock().unwrap().clone()
	}
}

#[async_trait]
impl CrashUploader for FakeUploader {
	async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError> {
		self.requests.lock().unwrap().push(request);
		self.results.lock().unwrap().pop_front().unwrap_or(Ok(UploadReceipt {
			info_url: None,
			crash_id: None,
		}))
	}

	fn cancel_upload(&self) -> bool {
		false
	}
}

pub fn receipt(info_url: &str) -> UploadReceipt {
	UploadReceipt {
		info_url: Some(info_url.to_string()),
		crash_id: None,
	}
}

/// Config pointing the real upload client at `server`.
pub fn collector_config(server: &MockServer) -> ReporterConfig {
	ReporterConfig {
		collector_url_template: server.uri(),
		..auto_submit_config()
	}
}

/// Mounts a negotiate endpoint that hands out `{server}/upload/crash.zip`.
pub async fn mount_negotiate(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/api/getCrashUploadUrl"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"url": format!("{}/upload/crash.zip", server.uri())
		})))
		.mount(server)
		.await;
}

pub async fn mount_transfer(server: &MockServer, status: u16, delay: Option<Duration>) {
	let mut response = ResponseTemplate::new(status);
	if let Some(delay) = delay {
		response = response.set_delay(delay);
	}
	Mock::given(method("PUT"))
		.and(path("/upload/crash.zip"))
		.respond_with(response)
		.mount(server)
		.await;
}

pub async fn mount_finalize(server: &MockServer, info_url: &str) {
	Mock::given(method("POST"))
		.and(path("/api/commitS3CrashUpload"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"status": "success",
			"infoUrl": info_url,
			"crashId": 123
		})))
		.mount(server)
		.await;
}

/// Mounts all three stages succeeding.
pub async fn mount_collector(server: &MockServer, info_url: &str) {
	mount_negotiate(server).await;
	mount_transfer(server, 200, None).await;
	mount_finalize(server, info_url).await;
}

/// Entry names and contents of a zip archive.
pub fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
	let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
	(0..archive.len())
		.map(|i| {
			let mut file = archive.by_index(i).unwrap();
			let mut data = Vec::new();
			file.read_to_end(&mut data).unwrap();
			(file.name().to_string(), data)
		})
		.collect()
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
	for _ in 0..500 {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("condition not reached in time");
}
