// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Paged listing with continuation tokens

use super::{call, OpOptions};
use crate::constants::list::{
    DEFAULT_BATCH_INTERVAL, DEFAULT_BATCH_LIMIT, STALE_RESTARTS, STALE_RETRY_INTERVAL,
};
use crate::error::Result;
use crate::retry::is_retryable_api_error;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// List every object of `api` in batches of `batch_limit`, pausing
/// `batch_interval` between pages.
///
/// A continuation token that went stale restarts the listing from scratch
/// after a pause, at most [`STALE_RESTARTS`] times.
pub async fn list_paged<K>(
    api: &Api<K>,
    kind: &str,
    batch_limit: u32,
    batch_interval: Duration,
    opts: &OpOptions,
) -> Result<Vec<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let mut restarts_left = STALE_RESTARTS;

    'restart: loop {
        let mut items: Vec<K> = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut lp = opts.list_params(batch_limit);
            if let Some(token) = &continue_token {
                lp = lp.continue_token(token);
            }

            let page = match call(api.list(&lp)).await {
                Ok(page) => page,
                Err(err) if is_stale_list(&err) && !is_retryable_api_error(&err) && restarts_left > 0 => {
                    restarts_left -= 1;
                    warn!(
                        kind,
                        error = %err,
                        restarts_left,
                        "list went stale, restarting from the first page"
                    );
                    sleep(STALE_RETRY_INTERVAL).await;
                    continue 'restart;
                }
                Err(err) => return Err(err.into()),
            };

            let remained = page.metadata.remaining_item_count.unwrap_or_default();
            items.extend(page.items);
            info!(kind, remained, items = items.len(), "listing");

            continue_token = page.metadata.continue_.filter(|token| !token.is_empty());
            if continue_token.is_none() {
                return Ok(items);
            }
            sleep(batch_interval).await;
        }
    }
}

fn is_stale_list(err: &kube::Error) -> bool {
    let msg = err.to_string();
    msg.contains("too old to display a consistent") || msg.contains("inconsistent")
}

#[instrument(skip(client, opts))]
pub async fn list_pods(
    client: &Client,
    namespace: &str,
    batch_limit: u32,
    batch_interval: Duration,
    opts: &OpOptions,
) -> Result<Vec<Pod>> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    list_paged(&api, "Pod", batch_limit, batch_interval, opts).await
}

pub async fn list_nodes(client: &Client) -> Result<Vec<Node>> {
    let api: Api<Node> = Api::all(client.clone());
    list_paged(
        &api,
        "Node",
        DEFAULT_BATCH_LIMIT,
        DEFAULT_BATCH_INTERVAL,
        &OpOptions::default(),
    )
    .await
}

#[instrument(skip(client, opts))]
pub async fn list_daemon_sets(
    client: &Client,
    namespace: &str,
    batch_limit: u32,
    batch_interval: Duration,
    opts: &OpOptions,
) -> Result<Vec<DaemonSet>> {
    let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
    list_paged(&api, "DaemonSet", batch_limit, batch_interval, opts).await
}

#[instrument(skip(client, opts))]
pub async fn list_secrets(
    client: &Client,
    namespace: &str,
    batch_limit: u32,
    batch_interval: Duration,
    opts: &OpOptions,
) -> Result<Vec<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    list_paged(&api, "Secret", batch_limit, batch_interval, opts).await
}

#[instrument(skip(client, opts))]
pub async fn list_config_maps(
    client: &Client,
    namespace: &str,
    batch_limit: u32,
    batch_interval: Duration,
    opts: &OpOptions,
) -> Result<Vec<ConfigMap>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    list_paged(&api, "ConfigMap", batch_limit, batch_interval, opts).await
}

pub async fn list_namespaces(
    client: &Client,
    batch_limit: u32,
    batch_interval: Duration,
) -> Result<Vec<Namespace>> {
    let api: Api<Namespace> = Api::all(client.clone());
    list_paged(&api, "Namespace", batch_limit, batch_interval, &OpOptions::default()).await
}
