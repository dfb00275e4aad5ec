// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes operation layer: client construction, paged listing, idempotent
//! creates and deletes, namespace force-deletion and readiness waiters.

pub mod client;
pub mod create;
pub mod daemonsets;
pub mod delete;
pub mod deployments;
pub mod eks;
pub mod jobs;
pub mod list;
pub mod namespaces;
pub mod options;
pub mod services;
pub mod wait;

pub use client::create_client;
pub use create::create_object;
pub use daemonsets::wait_for_daemon_set_completes;
pub use deployments::wait_for_deployment_available;
pub use jobs::{wait_for_job_completes, JobKind};
pub use list::{list_nodes, list_paged, list_pods};
pub use namespaces::{create_namespace, delete_namespace_and_wait};
pub use options::{query_fn, OpOptions};
pub use services::wait_for_service_ingress_hostname;
pub use wait::PollParams;

use crate::constants::request;
use std::future::Future;

/// Run a single API call under the per-request deadline.
///
/// An elapsed deadline surfaces as a transport error so the retry classifier
/// treats it like any other timeout.
pub(crate) async fn call<T, F>(fut: F) -> Result<T, kube::Error>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(request::TIMEOUT, fut).await {
        Ok(result) => result,
        Err(elapsed) => Err(kube::Error::Service(Box::new(elapsed))),
    }
}
