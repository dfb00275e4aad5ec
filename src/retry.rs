// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Error classification and exponential backoff for API calls.
//!
//! Every call into the API server is classified into an [`Outcome`]. Transient
//! failures are retried on a fixed exponential schedule; errors matched by an
//! `allow` predicate collapse to success so deletes and creates stay idempotent.

use crate::constants::backoff::{FACTOR, INITIAL_DELAY, JITTER, STEPS};
use crate::error::{Result, TesterError};
use kube::error::ErrorResponse;
use rand::Rng;
use std::error::Error as StdError;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, warn};

/// A predicate over API errors, used for `allow` and `retry` lists.
pub type Predicate = fn(&kube::Error) -> bool;

/// Classification of a single call result.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    RetryableApi(kube::Error),
    RetryableNetwork(kube::Error),
    Allowed(kube::Error),
    Fatal(kube::Error),
}

/// Allow and retry predicates carried into [`classify`].
#[derive(Debug, Clone, Default)]
pub struct Policy {
    allow: Vec<Predicate>,
    retry: Vec<Predicate>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, predicate: Predicate) -> Self {
        self.allow.push(predicate);
        self
    }

    pub fn retry(mut self, predicate: Predicate) -> Self {
        self.retry.push(predicate);
        self
    }

    pub fn allow_not_found() -> Self {
        Self::new().allow(is_not_found)
    }

    pub fn allow_already_exists() -> Self {
        Self::new().allow(is_already_exists)
    }
}

/// Exponential retry schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f64,
    pub jitter: f64,
    /// Maximum number of attempts
    pub steps: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: INITIAL_DELAY,
            factor: FACTOR,
            jitter: JITTER,
            steps: STEPS,
        }
    }
}

impl Backoff {
    /// Delay after the given zero-based attempt.
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.initial.as_nanos() as f64 * self.factor.powi(attempt as i32);
        let jittered = if self.jitter > 0.0 {
            base + rand::rng().random::<f64>() * self.jitter * base
        } else {
            base
        };
        Duration::from_nanos(jittered.round() as u64)
    }

    /// The full delay schedule, one entry per attempt.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.steps).map(|attempt| self.delay(attempt)).collect()
    }
}

/// Classify a call result against the given policy.
///
/// Retryable API errors win over retryable network errors, which win over
/// `allow` matches, which win over custom `retry` predicates.
pub fn classify<T>(result: std::result::Result<T, kube::Error>, policy: &Policy) -> Outcome<T> {
    let err = match result {
        Ok(value) => return Outcome::Done(value),
        Err(err) => err,
    };

    if is_retryable_api_error(&err) {
        Outcome::RetryableApi(err)
    } else if is_retryable_network_error(&err) {
        Outcome::RetryableNetwork(err)
    } else if policy.allow.iter().any(|allow| allow(&err)) {
        Outcome::Allowed(err)
    } else if policy.retry.iter().any(|retry| retry(&err)) {
        Outcome::RetryableApi(err)
    } else {
        Outcome::Fatal(err)
    }
}

/// Run `f` until it is done, allowed or fatal, sleeping between retryable attempts.
///
/// Returns `Ok(None)` when the final outcome was allowed. Once `steps` attempts
/// are used up the last error is returned as [`TesterError::RetriesExhausted`].
pub async fn retry_with_backoff<T, F, Fut>(backoff: &Backoff, mut f: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match f().await {
            Outcome::Done(value) => return Ok(Some(value)),
            Outcome::Allowed(err) => {
                debug!(error = %err, "ignoring allowed error");
                return Ok(None);
            }
            Outcome::Fatal(err) => return Err(TesterError::KubeError(err)),
            Outcome::RetryableApi(err) | Outcome::RetryableNetwork(err) => err,
        };

        if attempt >= backoff.steps {
            return Err(TesterError::RetriesExhausted {
                attempts: attempt,
                source: err,
            });
        }

        let delay = backoff.delay(attempt - 1);
        warn!(attempt, delay = ?delay, error = %err, "retrying request");
        tokio::time::sleep(delay).await;
    }
}

/// Classify every result of `f` with `policy` and retry on the default schedule.
pub async fn retry_call<T, F, Fut>(policy: &Policy, mut f: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, kube::Error>>,
{
    retry_with_backoff(&Backoff::default(), || {
        let call = f();
        async move { classify(call.await, policy) }
    })
    .await
}

fn api_response(err: &kube::Error) -> Option<&ErrorResponse> {
    match err {
        kube::Error::Api(resp) => Some(resp),
        _ => None,
    }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    api_response(err).is_some_and(|resp| resp.code == 404)
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    api_response(err).is_some_and(|resp| resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Server-side failures that are expected to clear on their own.
///
/// 401 counts as retryable since bearer tokens are refreshed while a run is in progress.
pub fn is_retryable_api_error(err: &kube::Error) -> bool {
    let Some(resp) = api_response(err) else {
        return is_probable_eof(err) || is_connection_reset(err);
    };

    if matches!(resp.code, 401 | 408 | 429 | 500 | 504) {
        return true;
    }
    if matches!(
        resp.reason.as_str(),
        "InternalError" | "Timeout" | "ServerTimeout" | "TooManyRequests" | "Unauthorized"
    ) {
        return true;
    }
    if resp.code == 409 && resp.reason == "Conflict" && resp.message.contains("resourcequotas") {
        return true;
    }
    suggests_client_delay(resp)
}

/// The API server attaches a Retry-After hint to throttling and unavailable answers.
fn suggests_client_delay(resp: &ErrorResponse) -> bool {
    matches!(resp.code, 429 | 503) || resp.reason == "ServerTimeout"
}

/// Transport failures that report themselves as temporary or as a timeout.
pub fn is_retryable_network_error(err: &kube::Error) -> bool {
    if api_response(err).is_some() {
        return false;
    }
    chain(err).any(|cause| {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::Interrupted
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionReset
            );
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            return hyper_err.is_timeout();
        }
        if cause.is::<tokio::time::error::Elapsed>() || cause.is::<tower::timeout::error::Elapsed>() {
            return true;
        }
        let msg = cause.to_string();
        msg.contains("i/o timeout") || msg.contains("timed out")
    })
}

fn is_probable_eof(err: &kube::Error) -> bool {
    chain(err).any(|cause| {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == ErrorKind::UnexpectedEof {
                return true;
            }
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return true;
            }
        }
        let msg = cause.to_string();
        msg.contains("unexpected EOF")
            || msg.contains("connection closed before message completed")
            || msg.contains("use of closed network connection")
    })
}

fn is_connection_reset(err: &kube::Error) -> bool {
    chain(err).any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == ErrorKind::ConnectionReset)
            || cause.to_string().contains("connection reset by peer")
    })
}

fn chain(err: &kube::Error) -> impl Iterator<Item = &(dyn StdError + 'static)> {
    std::iter::successors(Some(err as &(dyn StdError + 'static)), |cause| (*cause).source())
}
