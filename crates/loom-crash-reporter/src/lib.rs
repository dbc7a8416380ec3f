// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pending crash report processing for Loom applications.
//!
//! Once a crash has been recorded by a signal/exception trapper, this crate
//! decides whether to report it, keeps it across restarts, packages it with
//! the session's context and uploads it to a crash collector.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loom_crash_reporter::{
//!     Collaborators, CrashReporter, FileCrashStorage, FilePreferences, ReporterConfig,
//! };
//!
//! let config = ReporterConfig::load(None)?;
//! let reporter = CrashReporter::new(
//!     config,
//!     Collaborators {
//!         trapper: Arc::new(my_trapper),
//!         storage: Arc::new(FileCrashStorage::from_xdg()?),
//!         bundle: Arc::new(my_bundle),
//!         preferences: Arc::new(FilePreferences::from_xdg()?),
//!     },
//! )
//! .with_prompt(Arc::new(my_prompt));
//!
//! let summary = reporter.start().await?;
//! reporter.set_attribute("screen", Some("settings"))?;
//! ```

pub mod attributes;
pub mod config;
pub mod delegate;
pub mod error;
pub mod memory;
pub mod ports;
pub mod preferences;
pub mod reporter;
pub mod retry;
pub mod storage;
pub mod upload;

pub use attributes::AttributeStore;
pub use config::{ReporterConfig, RetrySettings};
pub use delegate::{NoopDelegate, ReportOutcome, ReporterDelegate, UploadOutcome};
pub use error::{
	ConfigError, ErrorKind, ReporterError, Result, StorageError, TrapperError, UploadError,
	UploadStage,
};
pub use memory::{MemoryCrashStorage, MemoryCrashTrapper, MemoryPreferences, StaticBundle};
pub use ports::{
	BundleInfo, Collaborators, CrashPrompt, CrashStorage, CrashTrapper, Preferences,
	PromptRequest, PromptResponse, UserAction,
};
pub use preferences::FilePreferences;
pub use reporter::{
	AppIdentity, CrashReporter, ReportDisposition, ReporterState, RunSummary, StateSnapshot,
};
pub use retry::RetryConfig;
pub use storage::FileCrashStorage;
pub use upload::{
	CrashUploader, UploadClient, UploadClientBuilder, UploadReceipt, UploadRequest,
	DEFAULT_COLLECTOR_URL_TEMPLATE,
};
