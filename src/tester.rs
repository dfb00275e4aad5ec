// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The lifecycle contract every add-on implements, plus the context testers
//! are built with.

use crate::config::Config;
use crate::error::{Result, TesterError};
use crate::kubectl::Kubectl;
use crate::kubernetes::options::QueryFn;
use crate::kubernetes::{list_nodes, query_fn, PollParams};
use crate::ui::Progress;
use async_trait::async_trait;
use kube::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[async_trait]
pub trait Tester: Send + Sync {
    /// Stable identifier used in banners and logs
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    /// Create the add-on's resources and wait until they are healthy.
    async fn apply(&mut self) -> Result<()>;

    /// Remove the add-on's resources. Keeps going after individual failures
    /// and reports them together.
    async fn delete(&mut self) -> Result<()>;

    /// Copy results of a successful apply back into the run configuration.
    fn record_outputs(&self, _cfg: &mut Config) {}
}

/// Shared handles every tester is constructed with.
#[derive(Clone)]
pub struct TesterContext {
    pub client: Client,
    pub stop: CancellationToken,
    pub progress: Progress,
    pub kubectl: Kubectl,
}

impl TesterContext {
    pub fn new(client: Client, stop: CancellationToken, progress: Progress, kubectl: Kubectl) -> Self {
        Self {
            client,
            stop,
            progress,
            kubectl,
        }
    }

    pub fn poll(&self, timeout: Duration) -> PollParams {
        PollParams::new(self.stop.clone(), timeout).with_progress(self.progress.clone())
    }

    /// Per-tick callback dumping `kubectl describe` output to the progress writer.
    pub fn describe_query(&self, kind: &str, name: &str, namespace: &str) -> QueryFn {
        let kubectl = self.kubectl.clone();
        let progress = self.progress.clone();
        let (kind, name, namespace) = (kind.to_string(), name.to_string(), namespace.to_string());
        query_fn(move || {
            let kubectl = kubectl.clone();
            let progress = progress.clone();
            let (kind, name, namespace) = (kind.clone(), name.clone(), namespace.clone());
            async move {
                let title = kubectl.describe_args(&kind, &name, &namespace).join(" ");
                match kubectl.describe(&kind, &name, &namespace).await {
                    Ok(output) => progress.block(&format!("'{title}' output:"), &output),
                    Err(e) => warn!(error = %e, "describe failed"),
                }
            }
        })
    }
}

/// Fail unless the cluster reports at least `required` nodes. Returns the count.
pub async fn check_minimum_nodes(client: &Client, required: i32) -> Result<usize> {
    let nodes = list_nodes(client).await?;
    info!(required, found = nodes.len(), "checked node count");
    if (nodes.len() as i64) < i64::from(required) {
        return Err(TesterError::MinimumNodes {
            required,
            found: nodes.len(),
        });
    }
    Ok(nodes.len())
}

/// Collapse accumulated delete failures into one error.
pub fn join_errors(errs: Vec<String>) -> Result<()> {
    if errs.is_empty() {
        Ok(())
    } else {
        Err(TesterError::DeleteFailed(errs.join(", ")))
    }
}
