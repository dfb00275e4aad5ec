// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Shared skeleton for readiness waiters: initial wait, then poll until the
//! check reports a value, honoring a deadline and the abort token.

use crate::error::{Result, TesterError};
use crate::ui::{Progress, Spinner};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Timing and cancellation for a single wait.
#[derive(Debug, Clone)]
pub struct PollParams {
    pub stop: CancellationToken,
    pub initial_wait: Duration,
    pub poll_interval: Duration,
    /// Outer deadline for the whole wait, initial wait included
    pub timeout: Duration,
    /// Where the initial-wait spinner draws
    pub progress: Progress,
}

impl PollParams {
    pub fn new(stop: CancellationToken, timeout: Duration) -> Self {
        Self {
            stop,
            initial_wait: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            timeout,
            progress: Progress::sink(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Poll `check` every `poll_interval` until it yields a value or fails.
///
/// `check` returns `Ok(None)` while the target state is not reached yet and an
/// error for a terminal failure. Cancelling `stop` aborts with
/// [`TesterError::Aborted`]; running out of time gives
/// [`TesterError::DeadlineExceeded`].
pub async fn poll_until<T, F, Fut>(what: &str, params: &PollParams, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let stop = &params.stop;

    let run = async {
        if !params.initial_wait.is_zero() {
            info!(what, initial_wait = ?params.initial_wait, "waiting before polling");
            let spinner = Spinner::start(&params.progress, format!("waiting for {what}"));
            let aborted = tokio::select! {
                _ = stop.cancelled() => true,
                _ = sleep(params.initial_wait) => false,
            };
            spinner.finish();
            if aborted {
                warn!(what, "initial wait aborted");
                return Err(TesterError::Aborted(format!("initial wait for {what}")));
            }
        }

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    warn!(what, "wait aborted");
                    return Err(TesterError::Aborted(format!("wait for {what}")));
                }
                _ = sleep(params.poll_interval) => {}
            }

            let checked = tokio::select! {
                _ = stop.cancelled() => {
                    warn!(what, "wait aborted");
                    return Err(TesterError::Aborted(format!("wait for {what}")));
                }
                checked = check() => checked?,
            };
            if let Some(value) = checked {
                return Ok(value);
            }
        }
    };

    match timeout(params.timeout, run).await {
        Ok(result) => result,
        Err(_) => {
            warn!(what, timeout = ?params.timeout, "wait timed out");
            Err(TesterError::DeadlineExceeded(what.to_string(), params.timeout))
        }
    }
}
