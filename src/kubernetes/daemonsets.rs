// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::wait::{poll_until, PollParams};
use super::{call, OpOptions};
use crate::error::Result;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::{Api, Client};
use tracing::{info, instrument, warn};

/// A DaemonSet is complete once the scheduled count has caught up with the ready count.
pub fn daemon_set_complete(ds: &DaemonSet) -> bool {
    ds.status
        .as_ref()
        .is_some_and(|s| s.desired_number_scheduled >= s.number_ready)
}

#[instrument(skip(client, params, opts))]
pub async fn wait_for_daemon_set_completes(
    client: &Client,
    namespace: &str,
    name: &str,
    params: &PollParams,
    opts: &OpOptions,
) -> Result<DaemonSet> {
    let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
    let what = format!("daemonset {namespace}/{name}");

    poll_until(&what, params, || {
        let api = api.clone();
        async move {
            opts.run_query().await;

            let ds = match call(api.get(name)).await {
                Ok(ds) => ds,
                Err(err) => {
                    warn!(namespace, name, error = %err, "failed to get daemonset");
                    return Ok(None);
                }
            };
            if let Some(status) = &ds.status {
                info!(
                    namespace,
                    name,
                    desired = status.desired_number_scheduled,
                    ready = status.number_ready,
                    available = status.number_available.unwrap_or_default(),
                    "polling daemonset"
                );
            }
            Ok(daemon_set_complete(&ds).then_some(ds))
        }
    })
    .await
}
