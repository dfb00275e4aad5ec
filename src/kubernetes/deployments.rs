// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::wait::{poll_until, PollParams};
use super::{call, OpOptions};
use crate::error::{Result, TesterError};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tracing::{info, instrument, warn};

/// Verdict on a single Deployment observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Pending,
    Failed(String),
}

/// Judge a Deployment against the wanted number of available replicas.
///
/// Only the first `True` condition counts: `ReplicaFailure` fails the wait,
/// `Available` completes it.
pub fn evaluate_deployment(deployment: &Deployment, target: i32) -> Availability {
    let Some(status) = deployment.status.as_ref() else {
        return Availability::Pending;
    };

    let first_true = status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|c| c.status == "True");

    if let Some(cond) = first_true {
        if cond.type_ == "ReplicaFailure" {
            return Availability::Failed(format!(
                "deployment {} has ReplicaFailure: {} {}",
                deployment.metadata.name.as_deref().unwrap_or_default(),
                cond.reason.as_deref().unwrap_or_default(),
                cond.message.as_deref().unwrap_or_default(),
            ));
        }
    }

    if status.available_replicas.unwrap_or_default() >= target {
        return Availability::Available;
    }
    match first_true {
        Some(cond) if cond.type_ == "Available" => Availability::Available,
        _ => Availability::Pending,
    }
}

/// Wait until the Deployment reports `target` available replicas.
#[instrument(skip(client, params, opts))]
pub async fn wait_for_deployment_available(
    client: &Client,
    namespace: &str,
    name: &str,
    target: i32,
    params: &PollParams,
    opts: &OpOptions,
) -> Result<Deployment> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let what = format!("deployment {namespace}/{name}");

    poll_until(&what, params, || {
        let api = api.clone();
        async move {
            opts.run_query().await;

            let deployment = match call(api.get(name)).await {
                Ok(deployment) => deployment,
                Err(err) => {
                    warn!(namespace, name, error = %err, "failed to get deployment");
                    return Ok(None);
                }
            };

            let available = deployment
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or_default();
            info!(namespace, name, available, target, "polling deployment");

            match evaluate_deployment(&deployment, target) {
                Availability::Available => Ok(Some(deployment)),
                Availability::Pending => Ok(None),
                Availability::Failed(reason) => Err(TesterError::WaitFailed(reason)),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockService;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const PATH: &str = "/apis/apps/v1/namespaces/ns/deployments/web";

    fn deployment_json(available: i32, condition: (&str, &str)) -> serde_json::Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "ns" },
            "status": {
                "availableReplicas": available,
                "conditions": [
                    { "type": condition.0, "status": condition.1 }
                ]
            }
        })
    }

    fn deployment(available: i32, condition: (&str, &str)) -> Deployment {
        serde_json::from_value(deployment_json(available, condition)).unwrap()
    }

    #[test]
    fn test_evaluate_deployment() {
        assert_eq!(
            evaluate_deployment(&deployment(3, ("Progressing", "True")), 3),
            Availability::Available
        );
        assert_eq!(
            evaluate_deployment(&deployment(1, ("Progressing", "True")), 3),
            Availability::Pending
        );
        assert_eq!(
            evaluate_deployment(&deployment(1, ("Available", "True")), 3),
            Availability::Available
        );
        assert_eq!(
            evaluate_deployment(&deployment(1, ("Available", "False")), 3),
            Availability::Pending
        );
        assert!(matches!(
            evaluate_deployment(&deployment(3, ("ReplicaFailure", "True")), 3),
            Availability::Failed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deployment_third_tick() {
        let mock = MockService::new()
            .on_get(PATH, 200, &deployment_json(0, ("Progressing", "True")).to_string())
            .on_get(PATH, 200, &deployment_json(1, ("Progressing", "True")).to_string())
            .on_get(PATH, 200, &deployment_json(3, ("Progressing", "True")).to_string());
        let client = mock.clone().into_client();
        let params = PollParams::new(CancellationToken::new(), Duration::from_secs(600));

        let dep = wait_for_deployment_available(&client, "ns", "web", 3, &params, &OpOptions::default())
            .await
            .unwrap();

        assert_eq!(dep.status.unwrap().available_replicas, Some(3));
        assert_eq!(mock.count("GET", PATH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deployment_replica_failure() {
        let mock = MockService::new()
            .on_get(PATH, 200, &deployment_json(0, ("Progressing", "True")).to_string())
            .on_get(PATH, 200, &deployment_json(0, ("ReplicaFailure", "True")).to_string());
        let client = mock.clone().into_client();
        let params = PollParams::new(CancellationToken::new(), Duration::from_secs(600));

        let result =
            wait_for_deployment_available(&client, "ns", "web", 3, &params, &OpOptions::default()).await;

        assert!(matches!(result, Err(TesterError::WaitFailed(_))));
        assert_eq!(mock.count("GET", PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deployment_aborted() {
        let mock = MockService::new().on_get(PATH, 200, &deployment_json(0, ("Progressing", "True")).to_string());
        let stop = CancellationToken::new();
        stop.cancel();
        let params = PollParams::new(stop, Duration::from_secs(600));

        let result =
            wait_for_deployment_available(&mock.into_client(), "ns", "web", 3, &params, &OpOptions::default())
                .await;
        assert!(matches!(result, Err(TesterError::Aborted(_))));
    }
}
