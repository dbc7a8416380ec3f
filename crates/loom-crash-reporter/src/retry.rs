// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry with exponential backoff for collector requests.
//!
//! Retries happen inside a single upload stage and only for transient
//! failures. A cancelled token stops the loop between attempts as well as
//! during a backoff sleep.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::UploadError;

/// Retry policy for collector requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	/// Randomise each delay by up to half of its value.
	pub jitter: bool,
	pub retryable_statuses: Vec<StatusCode>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
			retryable_statuses: vec![
				StatusCode::REQUEST_TIMEOUT,
				StatusCode::TOO_MANY_REQUESTS,
				StatusCode::INTERNAL_SERVER_ERROR,
				StatusCode::BAD_GATEWAY,
				StatusCode::SERVICE_UNAVAILABLE,
				StatusCode::GATEWAY_TIMEOUT,
			],
		}
	}
}

impl RetryConfig {
	/// A policy that makes exactly one attempt.
	pub fn no_retry() -> Self {
		Self {
			max_attempts: 1,
			..Self::default()
		}
	}

	/// Delay before retry number `attempt` (1-based), without jitter.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1) as i32;
		let factor = self.backoff_factor.max(1.0).powi(exponent);
		let scaled = self.base_delay.as_secs_f64() * factor;
		if scaled >= self.max_delay.as_secs_f64() {
			self.max_delay
		} else {
			Duration::from_secs_f64(scaled)
		}
	}

	fn jittered(&self, delay: Duration) -> Duration {
		if !self.jitter || delay.is_zero() {
			return delay;
		}
		let half = delay.as_secs_f64() / 2.0;
		Duration::from_secs_f64(half + fastrand::f64() * half)
	}

	fn is_retryable(&self, err: &UploadError) -> bool {
		match err {
			UploadError::Transport { source, .. } => {
				source.is_timeout() || source.is_connect() || source.is_request()
			}
			UploadError::Rejected { status, .. } => StatusCode::from_u16(*status)
				.map(|status| self.retryable_statuses.contains(&status))
				.unwrap_or(false),
			UploadError::InvalidResponse { .. }
			| UploadError::Cancelled { .. }
			| UploadError::AlreadyInProgress => false,
		}
	}
}

/// Runs `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires.
///
/// The returned error is the last one observed, or `Cancelled` tagged with
/// `stage` if the token fired while waiting to retry.
pub async fn retry<T, F, Fut>(
	config: &RetryConfig,
	cancel: &CancellationToken,
	stage: crate::error::UploadStage,
	mut operation: F,
) -> Result<T, UploadError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, UploadError>>,
{
	let max_attempts = config.max_attempts.max(1);
	let mut attempt = 1;

	loop {
		if cancel.is_cancelled() {
			return Err(UploadError::Cancelled { stage });
		}

		match operation().await {
			Ok(value) => return Ok(value),
			Err(err) if attempt < max_attempts && config.is_retryable(&err) => {
				let delay = config.jittered(config.delay_for(attempt));
				warn!(
					stage = %stage,
					attempt,
					max_attempts,
					delay_ms = delay.as_millis() as u64,
					error = %err,
					"transient collector failure, retrying"
				);
				tokio::select! {
					_ = cancel.cancelled() => return Err(UploadError::Cancelled { stage }),
					_ = tokio::time::sleep(delay) => {}
				}
				attempt += 1;
			}
			Err(err) => {
				debug!(stage = %stage, attempt, error = %err, "giving up on request");
				return Err(err);
			}
		}
	}
}
