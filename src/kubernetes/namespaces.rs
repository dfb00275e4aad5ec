// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management utilities

use super::create::create_object;
use super::delete::delete_namespace;
use super::{call, OpOptions};
use crate::error::{Result, TesterError};
use crate::retry::{is_not_found, is_retryable_api_error};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

/// Create a namespace, treating "already exists" as success
#[instrument(skip(client))]
pub async fn create_namespace(client: &Client, namespace: &str) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    create_object(&namespaces, "Namespace", &ns).await
}

/// Delete a namespace and poll until the API server no longer reports it.
///
/// With `force_delete` set, metadata finalizers found on the terminating
/// namespace are cleared so the deletion can finish. `force_delete_fn` runs on
/// every tick the namespace is still there.
#[instrument(skip(client, opts))]
pub async fn delete_namespace_and_wait(
    client: &Client,
    namespace: &str,
    poll_interval: Duration,
    deadline: Duration,
    opts: &OpOptions,
) -> Result<()> {
    delete_namespace(client, namespace).await?;

    match timeout(deadline, wait_for_namespace_gone(client, namespace, poll_interval, opts)).await {
        Ok(result) => result,
        Err(_) => Err(TesterError::DeadlineExceeded(
            format!("namespace {namespace} deletion"),
            deadline,
        )),
    }
}

async fn wait_for_namespace_gone(
    client: &Client,
    namespace: &str,
    poll_interval: Duration,
    opts: &OpOptions,
) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    loop {
        match call(namespaces.get(namespace)).await {
            Err(err) if is_not_found(&err) => {
                info!(namespace, "namespace already deleted");
                return Ok(());
            }
            Err(err) if err.to_string().contains("i/o timeout") => {
                warn!(namespace, error = %err, "namespace get timed out, retrying");
            }
            Err(err) if !is_retryable_api_error(&err) => {
                warn!(namespace, error = %err, "failed to get namespace");
                return Err(err.into());
            }
            Err(err) => {
                warn!(namespace, error = %err, "failed to get namespace, retrying");
            }
            Ok(ns) => {
                let phase = ns
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_default();
                info!(namespace, phase = %phase, "namespace still exists");

                opts.run_query().await;

                let has_finalizers = ns
                    .metadata
                    .finalizers
                    .as_ref()
                    .is_some_and(|f| !f.is_empty());
                if opts.force_delete && has_finalizers {
                    remove_finalizers(&namespaces, ns).await;
                }
                if let Some(force_delete_fn) = &opts.force_delete_fn {
                    force_delete_fn().await;
                }
            }
        }

        sleep(poll_interval).await;
    }
}

async fn remove_finalizers(namespaces: &Api<Namespace>, mut ns: Namespace) {
    let name = ns.metadata.name.clone().unwrap_or_default();
    warn!(namespace = %name, finalizers = ?ns.metadata.finalizers, "removing finalizers");
    ns.metadata.finalizers = None;
    match call(namespaces.replace(&name, &PostParams::default(), &ns)).await {
        Ok(_) => info!(namespace = %name, "removed finalizers"),
        Err(err) => warn!(namespace = %name, error = %err, "failed to remove finalizers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::options::query_fn;
    use crate::test_utils::{
        already_exists_json, namespace_json, not_found_json, success_status_json,
        terminating_namespace_json, MockService,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const NS: &str = "/api/v1/namespaces/ns-x";

    #[tokio::test]
    async fn test_create_namespace_twice() {
        let mock = MockService::new()
            .on_post("/api/v1/namespaces", 201, &namespace_json("ns-x"))
            .on_post("/api/v1/namespaces", 409, &already_exists_json("namespaces", "ns-x"));
        let client = mock.clone().into_client();

        create_namespace(&client, "ns-x").await.unwrap();
        create_namespace(&client, "ns-x").await.unwrap();
        assert_eq!(mock.count("POST", "/api/v1/namespaces"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_namespace_and_wait_polls_until_gone() {
        let mock = MockService::new()
            .on_delete(NS, 200, &success_status_json())
            .on_get(NS, 200, &namespace_json("ns-x"))
            .on_get(NS, 200, &namespace_json("ns-x"))
            .on_get(NS, 404, &not_found_json("namespaces", "ns-x"));
        let client = mock.clone().into_client();

        let queries = Arc::new(AtomicUsize::new(0));
        let counter = queries.clone();
        let opts = OpOptions::new().with_query_fn(query_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        }));

        delete_namespace_and_wait(&client, "ns-x", Duration::from_secs(15), Duration::from_secs(600), &opts)
            .await
            .unwrap();

        assert_eq!(mock.count("GET", NS), 3);
        assert_eq!(queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_namespace_force_clears_finalizers() {
        let mock = MockService::new()
            .on_delete(NS, 200, &success_status_json())
            .on_get(NS, 200, &terminating_namespace_json("ns-x", &["example.com/hold"]))
            .on_get(NS, 404, &not_found_json("namespaces", "ns-x"))
            .on_put(NS, 200, &namespace_json("ns-x"));
        let client = mock.clone().into_client();

        let opts = OpOptions::new().with_force_delete(true);
        delete_namespace_and_wait(&client, "ns-x", Duration::from_secs(15), Duration::from_secs(600), &opts)
            .await
            .unwrap();

        assert_eq!(mock.count("PUT", NS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_delete_fn_runs_while_namespace_terminates() {
        let stuck = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": "ns-x",
                "uid": "test-uid",
                "deletionTimestamp": "2026-01-01T00:00:00Z"
            },
            "spec": { "finalizers": ["kubernetes"] },
            "status": { "phase": "Terminating" }
        })
        .to_string();
        let mock = MockService::new()
            .on_delete(NS, 200, &success_status_json())
            .on_get(NS, 200, &stuck)
            .on_get(NS, 200, &stuck)
            .on_get(NS, 404, &not_found_json("namespaces", "ns-x"));
        let client = mock.clone().into_client();

        let dumps = Arc::new(AtomicUsize::new(0));
        let counter = dumps.clone();
        let opts = OpOptions::new()
            .with_force_delete(true)
            .with_force_delete_fn(query_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            }));

        delete_namespace_and_wait(&client, "ns-x", Duration::from_secs(15), Duration::from_secs(600), &opts)
            .await
            .unwrap();

        assert_eq!(dumps.load(Ordering::SeqCst), 2);
        assert_eq!(mock.count("PUT", NS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_namespace_without_force_keeps_finalizers() {
        let mock = MockService::new()
            .on_delete(NS, 200, &success_status_json())
            .on_get(NS, 200, &terminating_namespace_json("ns-x", &["example.com/hold"]))
            .on_get(NS, 404, &not_found_json("namespaces", "ns-x"));
        let client = mock.clone().into_client();

        delete_namespace_and_wait(
            &client,
            "ns-x",
            Duration::from_secs(15),
            Duration::from_secs(600),
            &OpOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(mock.count("PUT", NS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_namespace_deadline() {
        let mock = MockService::new()
            .on_delete(NS, 200, &success_status_json())
            .on_get(NS, 200, &terminating_namespace_json("ns-x", &["kubernetes"]));
        let client = mock.into_client();

        let result = delete_namespace_and_wait(
            &client,
            "ns-x",
            Duration::from_secs(15),
            Duration::from_secs(60),
            &OpOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(TesterError::DeadlineExceeded(_, _))));
    }
}
