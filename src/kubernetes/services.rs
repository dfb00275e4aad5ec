// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::wait::{poll_until, PollParams};
use super::{call, OpOptions};
use crate::constants::wait::SERVICE_NOT_FOUND_WAIT;
use crate::error::Result;
use crate::retry::is_not_found;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// First load balancer ingress hostname of a Service, if assigned.
pub fn ingress_hostname(svc: &Service) -> Option<String> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .hostname
        .clone()
        .filter(|h| !h.is_empty())
}

/// Poll the Service until its load balancer hostname is published.
#[instrument(skip(client, params, opts))]
pub async fn wait_for_service_ingress_hostname(
    client: &Client,
    namespace: &str,
    name: &str,
    params: &PollParams,
    opts: &OpOptions,
) -> Result<String> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    let what = format!("service {namespace}/{name} ingress hostname");

    poll_until(&what, params, || {
        let api = api.clone();
        async move {
            opts.run_query().await;

            match call(api.get(name)).await {
                Ok(svc) => {
                    let hostname = ingress_hostname(&svc);
                    info!(namespace, name, hostname = ?hostname, "polling service");
                    Ok(hostname)
                }
                Err(err) if is_not_found(&err) => {
                    warn!(namespace, name, "service not found yet");
                    sleep(SERVICE_NOT_FOUND_WAIT).await;
                    Ok(None)
                }
                Err(err) => {
                    warn!(namespace, name, error = %err, "failed to get service");
                    Ok(None)
                }
            }
        }
    })
    .await
}

/// Classic and network load balancer names are the first DNS label up to the last dash.
pub fn load_balancer_name(hostname: &str) -> String {
    let label = hostname.split('.').next().unwrap_or_default();
    match label.rfind('-') {
        Some(idx) => label[..idx].to_string(),
        None => label.to_string(),
    }
}
