// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The add-on catalogue. Each module carries its configuration record and a
//! [`Tester`](crate::tester::Tester) implementation.

pub mod agent;
pub mod cloudwatch_agent;
pub mod configmaps;
pub mod fluent_bit;
pub mod jobs_echo;
pub mod jobs_pi;
pub mod kubernetes_dashboard;
pub mod latency;
pub mod metrics_server;
pub mod nlb_hello_world;
pub mod secrets;
pub mod write_load;

use crate::config::unix_timestamp;
use crate::constants::namespace::{DELETION_TIMEOUT, POLL_INTERVAL};
use crate::error::{Result, TesterError};
use crate::kubernetes::{delete_namespace_and_wait, OpOptions};
use crate::tester::TesterContext;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;

/// Lowercase alphanumeric string, safe inside DNS labels.
pub fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// `<name>-<random>-<timestamp>` so repeated runs never collide.
pub fn default_namespace(name: &str) -> String {
    format!("{}-{}-{}", name.replace('_', "-"), random_suffix(10), unix_timestamp())
}

/// Checks shared by every add-on record.
pub(crate) fn validate_common(name: &str, namespace: &str, minimum_nodes: i32) -> Result<()> {
    if namespace.is_empty() {
        return Err(TesterError::InvalidConfig(format!("{name}: empty namespace")));
    }
    if minimum_nodes < 0 {
        return Err(TesterError::InvalidConfig(format!(
            "{name}: minimum_nodes must be non-negative (got {minimum_nodes})"
        )));
    }
    Ok(())
}

pub(crate) fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app.kubernetes.io/name".to_string(), app.to_string())])
}

/// Record a failed delete step as `failed to delete <what> (<err>)`.
pub(crate) fn collect(errs: &mut Vec<String>, what: &str, result: Result<()>) {
    if let Err(e) = result {
        errs.push(format!("failed to delete {what} ({e})"));
    }
}

/// Delete the add-on namespace, clearing finalizers if it gets stuck.
pub(crate) async fn delete_namespace(ctx: &TesterContext, namespace: &str) -> Result<()> {
    let opts = OpOptions::new()
        .with_force_delete(true)
        .with_force_delete_fn(ctx.describe_query("namespace", namespace, ""));
    delete_namespace_and_wait(&ctx.client, namespace, POLL_INTERVAL, DELETION_TIMEOUT, &opts).await
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::kubectl::Kubectl;
    use crate::test_utils::MockService;
    use crate::tester::TesterContext;
    use crate::ui::Progress;
    use tokio_util::sync::CancellationToken;

    pub fn context(mock: &MockService) -> TesterContext {
        TesterContext::new(
            mock.clone().into_client(),
            CancellationToken::new(),
            Progress::sink(),
            Kubectl::new("/nonexistent/kubectl", "", ""),
        )
    }
}
