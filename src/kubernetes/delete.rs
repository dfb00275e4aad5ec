// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Idempotent deletes: zero grace period, foreground propagation, "not found" is success.

use super::call;
use crate::error::Result;
use crate::retry::{retry_call, Policy};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::DeleteParams;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{info, warn};

pub fn delete_params() -> DeleteParams {
    DeleteParams::foreground().grace_period(0)
}

/// Delete a single object through `api`.
pub async fn delete_object<K>(api: &Api<K>, kind: &str, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    info!(kind, name, "deleting");
    let dp = delete_params();
    let policy = Policy::allow_not_found();

    match retry_call(&policy, || call(api.delete(name, &dp))).await {
        Ok(Some(_)) => {
            info!(kind, name, "deleted");
            Ok(())
        }
        Ok(None) => {
            info!(kind, name, "already deleted");
            Ok(())
        }
        Err(err) => {
            warn!(kind, name, error = %err, "failed to delete");
            Err(err)
        }
    }
}

pub async fn delete_config_map(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "ConfigMap", name).await
}

pub async fn delete_secret(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "Secret", name).await
}

pub async fn delete_service(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "Service", name).await
}

pub async fn delete_service_account(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "ServiceAccount", name).await
}

pub async fn delete_role(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Role> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "Role", name).await
}

pub async fn delete_role_binding(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "RoleBinding", name).await
}

pub async fn delete_cluster_role(client: &Client, name: &str) -> Result<()> {
    let api: Api<ClusterRole> = Api::all(client.clone());
    delete_object(&api, "ClusterRole", name).await
}

pub async fn delete_cluster_role_binding(client: &Client, name: &str) -> Result<()> {
    let api: Api<ClusterRoleBinding> = Api::all(client.clone());
    delete_object(&api, "ClusterRoleBinding", name).await
}

pub async fn delete_deployment(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "Deployment", name).await
}

pub async fn delete_daemon_set(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "DaemonSet", name).await
}

pub async fn delete_pod(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "Pod", name).await
}

pub async fn delete_job(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Job> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "Job", name).await
}

pub async fn delete_cron_job(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<CronJob> = Api::namespaced(client.clone(), namespace);
    delete_object(&api, "CronJob", name).await
}

pub async fn delete_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    delete_object(&api, "Namespace", name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesterError;
    use crate::test_utils::{not_found_json, success_status_json, too_many_requests_json, MockService};
    use kube::api::PropagationPolicy;

    #[test]
    fn test_delete_params_are_immediate_and_foreground() {
        let dp = delete_params();
        assert_eq!(dp.grace_period_seconds, Some(0));
        assert!(matches!(dp.propagation_policy, Some(PropagationPolicy::Foreground)));
    }

    #[tokio::test]
    async fn test_delete_twice_is_idempotent() {
        let path = "/api/v1/namespaces/ns/configmaps/app-config";
        let mock = MockService::new()
            .on_delete(path, 200, &success_status_json())
            .on_delete(path, 404, &not_found_json("configmaps", "app-config"));
        let client = mock.clone().into_client();

        delete_config_map(&client, "ns", "app-config").await.unwrap();
        delete_config_map(&client, "ns", "app-config").await.unwrap();
        assert_eq!(mock.count("DELETE", path), 2);
    }

    #[tokio::test]
    async fn test_delete_cluster_scoped_role() {
        let path = "/apis/rbac.authorization.k8s.io/v1/clusterroles/reader";
        let mock = MockService::new().on_delete(path, 404, &not_found_json("clusterroles", "reader"));
        delete_cluster_role(&mock.clone().into_client(), "reader").await.unwrap();
        assert_eq!(mock.count("DELETE", path), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_retries_throttled_requests() {
        let path = "/apis/apps/v1/namespaces/ns/deployments/web";
        let mock = MockService::new()
            .on_delete(path, 429, &too_many_requests_json())
            .on_delete(path, 200, &success_status_json());

        delete_deployment(&mock.clone().into_client(), "ns", "web").await.unwrap();
        assert_eq!(mock.count("DELETE", path), 2);
    }

    #[tokio::test]
    async fn test_delete_forbidden_fails() {
        let body = serde_json::json!({
            "kind": "Status", "apiVersion": "v1", "status": "Failure",
            "message": "forbidden", "reason": "Forbidden", "code": 403
        })
        .to_string();
        let mock = MockService::new().on_delete("/apis/batch/v1/namespaces/ns/jobs/job-pi", 403, &body);

        let result = delete_job(&mock.into_client(), "ns", "job-pi").await;
        assert!(matches!(result, Err(TesterError::KubeError(_))));
    }
}
