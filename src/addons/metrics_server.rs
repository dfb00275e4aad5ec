// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource metrics pipeline in `kube-system`. The namespace is shared with the
//! cluster, so deleting the add-on removes its objects but never the namespace.

use super::agent::{cluster_role, cluster_role_binding, rule, service_account};
use super::collect;
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::delete::{
    delete_cluster_role, delete_cluster_role_binding, delete_deployment, delete_object, delete_role_binding,
    delete_service, delete_service_account,
};
use crate::kubernetes::{create_object, wait_for_deployment_available, OpOptions};
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use kube::api::{ApiResource, DynamicObject};
use kube::Api;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "metrics-server";

const NAMESPACE: &str = "kube-system";
const IMAGE: &str = "k8s.gcr.io/metrics-server-amd64:v0.3.6";
const READER_ROLE: &str = "system:aggregated-metrics-reader";
const SERVER_ROLE: &str = "system:metrics-server";
const AUTH_DELEGATOR_BINDING: &str = "metrics-server:system:auth-delegator";
const AUTH_READER_BINDING: &str = "metrics-server-auth-reader";
const API_SERVICE: &str = "v1beta1.metrics.k8s.io";

const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(7 * 60);
const DEPLOYMENT_INITIAL_WAIT: Duration = Duration::from_secs(60);
const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
        ]
    }
}

impl AddOnConfig for Config {
    fn enabled(&self) -> bool {
        self.enable
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enable = enabled;
    }

    fn validate_and_set_defaults(&mut self) -> Result<()> {
        if self.minimum_nodes < 0 {
            return Err(TesterError::InvalidConfig(format!(
                "{NAME}: minimum_nodes must be non-negative (got {})",
                self.minimum_nodes
            )));
        }
        Ok(())
    }
}

fn api_service_resource() -> ApiResource {
    ApiResource {
        group: "apiregistration.k8s.io".to_string(),
        version: "v1".to_string(),
        api_version: "apiregistration.k8s.io/v1".to_string(),
        kind: "APIService".to_string(),
        plural: "apiservices".to_string(),
    }
}

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("k8s-app".to_string(), NAME.to_string())])
}

struct Resources {
    service_account: ServiceAccount,
    reader_role: ClusterRole,
    server_role: ClusterRole,
    server_binding: ClusterRoleBinding,
    auth_delegator_binding: ClusterRoleBinding,
    auth_reader_binding: RoleBinding,
    deployment: Deployment,
    service: Service,
    api_service: DynamicObject,
}

fn resources() -> Result<Resources> {
    let mut reader_role = cluster_role(
        READER_ROLE,
        vec![rule(&["metrics.k8s.io"], &["pods", "nodes"], &["get", "list", "watch"])],
    );
    reader_role.metadata.labels = Some(
        ["view", "edit", "admin"]
            .iter()
            .map(|r| (format!("rbac.authorization.k8s.io/aggregate-to-{r}"), "true".to_string()))
            .collect(),
    );

    let auth_reader_binding: RoleBinding = serde_json::from_value(json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": { "name": AUTH_READER_BINDING, "namespace": NAMESPACE },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "Role",
            "name": "extension-apiserver-authentication-reader"
        },
        "subjects": [{ "kind": "ServiceAccount", "name": NAME, "namespace": NAMESPACE }]
    }))?;

    let deployment: Deployment = serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": NAME, "namespace": NAMESPACE, "labels": labels() },
        "spec": {
            "selector": { "matchLabels": labels() },
            "template": {
                "metadata": { "name": NAME, "labels": labels() },
                "spec": {
                    "serviceAccountName": NAME,
                    "volumes": [{ "name": "tmp-dir", "emptyDir": {} }],
                    "containers": [{
                        "name": NAME,
                        "image": IMAGE,
                        "imagePullPolicy": "IfNotPresent",
                        "args": [
                            "--cert-dir=/tmp",
                            "--secure-port=4443",
                            "--kubelet-insecure-tls",
                            "--kubelet-preferred-address-types=InternalIP"
                        ],
                        "ports": [{ "name": "main-port", "containerPort": 4443, "protocol": "TCP" }],
                        "securityContext": {
                            "readOnlyRootFilesystem": true,
                            "runAsNonRoot": true,
                            "runAsUser": 1000
                        },
                        "volumeMounts": [{ "name": "tmp-dir", "mountPath": "/tmp" }]
                    }],
                    "nodeSelector": { "kubernetes.io/os": "linux", "kubernetes.io/arch": "amd64" }
                }
            }
        }
    }))?;

    let service: Service = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": NAME,
            "namespace": NAMESPACE,
            "labels": { "kubernetes.io/name": "Metrics-server", "kubernetes.io/cluster-service": "true" }
        },
        "spec": {
            "selector": labels(),
            "ports": [{ "port": 443, "protocol": "TCP", "targetPort": "main-port" }]
        }
    }))?;

    let api_service: DynamicObject = serde_json::from_value(json!({
        "apiVersion": "apiregistration.k8s.io/v1",
        "kind": "APIService",
        "metadata": { "name": API_SERVICE },
        "spec": {
            "service": { "name": NAME, "namespace": NAMESPACE },
            "group": "metrics.k8s.io",
            "version": "v1beta1",
            "insecureSkipTLSVerify": true,
            "groupPriorityMinimum": 100,
            "versionPriority": 100
        }
    }))?;

    Ok(Resources {
        service_account: service_account(NAME, NAMESPACE),
        reader_role,
        server_role: cluster_role(
            SERVER_ROLE,
            vec![rule(
                &[""],
                &["pods", "nodes", "nodes/stats", "namespaces", "configmaps"],
                &["get", "list", "watch"],
            )],
        ),
        server_binding: cluster_role_binding(SERVER_ROLE, SERVER_ROLE, NAME, NAMESPACE),
        auth_delegator_binding: cluster_role_binding(AUTH_DELEGATOR_BINDING, "system:auth-delegator", NAME, NAMESPACE),
        auth_reader_binding,
        deployment,
        service,
        api_service,
    })
}

pub struct MetricsServerTester {
    ctx: TesterContext,
    cfg: Config,
}

impl MetricsServerTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for MetricsServerTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        check_minimum_nodes(&self.ctx.client, self.cfg.minimum_nodes).await?;

        let res = resources()?;
        let client = &self.ctx.client;
        let cluster_roles = Api::<ClusterRole>::all(client.clone());
        let cluster_role_bindings = Api::<ClusterRoleBinding>::all(client.clone());

        create_object(&cluster_roles, "ClusterRole", &res.reader_role).await?;
        create_object(&cluster_role_bindings, "ClusterRoleBinding", &res.auth_delegator_binding).await?;
        create_object(
            &Api::<RoleBinding>::namespaced(client.clone(), NAMESPACE),
            "RoleBinding",
            &res.auth_reader_binding,
        )
        .await?;
        create_object(
            &Api::<DynamicObject>::all_with(client.clone(), &api_service_resource()),
            "APIService",
            &res.api_service,
        )
        .await?;
        create_object(
            &Api::<ServiceAccount>::namespaced(client.clone(), NAMESPACE),
            "ServiceAccount",
            &res.service_account,
        )
        .await?;
        create_object(
            &Api::<Deployment>::namespaced(client.clone(), NAMESPACE),
            "Deployment",
            &res.deployment,
        )
        .await?;
        create_object(
            &Api::<Service>::namespaced(client.clone(), NAMESPACE),
            "Service",
            &res.service,
        )
        .await?;
        create_object(&cluster_roles, "ClusterRole", &res.server_role).await?;
        create_object(&cluster_role_bindings, "ClusterRoleBinding", &res.server_binding).await?;

        let params = self
            .ctx
            .poll(DEPLOYMENT_TIMEOUT)
            .with_initial_wait(DEPLOYMENT_INITIAL_WAIT)
            .with_poll_interval(DEPLOYMENT_POLL_INTERVAL);
        let opts = OpOptions::new().with_query_fn(self.ctx.describe_query("deployment", NAME, NAMESPACE));
        let deployment = wait_for_deployment_available(client, NAMESPACE, NAME, 1, &params, &opts).await?;
        info!(
            available = deployment
                .status
                .and_then(|s| s.available_replicas)
                .unwrap_or_default(),
            "metrics server ready"
        );
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let client = &self.ctx.client;
        let mut errs = Vec::new();

        let api_services = Api::<DynamicObject>::all_with(client.clone(), &api_service_resource());
        collect(&mut errs, "APIService", delete_object(&api_services, "APIService", API_SERVICE).await);
        collect(&mut errs, "Service", delete_service(client, NAMESPACE, NAME).await);
        collect(&mut errs, "Deployment", delete_deployment(client, NAMESPACE, NAME).await);
        collect(&mut errs, "ServiceAccount", delete_service_account(client, NAMESPACE, NAME).await);
        collect(
            &mut errs,
            "RoleBinding",
            delete_role_binding(client, NAMESPACE, AUTH_READER_BINDING).await,
        );
        for binding in [SERVER_ROLE, AUTH_DELEGATOR_BINDING] {
            collect(
                &mut errs,
                "ClusterRoleBinding",
                delete_cluster_role_binding(client, binding).await,
            );
        }
        for role in [SERVER_ROLE, READER_ROLE] {
            collect(&mut errs, "ClusterRole", delete_cluster_role(client, role).await);
        }
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        cfg.add_on_metrics_server = Some(self.cfg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::MockService;

    #[test]
    fn test_resources_live_in_kube_system() {
        let res = resources().unwrap();
        assert_eq!(res.deployment.metadata.namespace.as_deref(), Some(NAMESPACE));
        assert_eq!(res.service.metadata.namespace.as_deref(), Some(NAMESPACE));
        assert_eq!(res.server_binding.role_ref.name, SERVER_ROLE);
        assert_eq!(res.api_service.data["spec"]["service"]["name"], NAME);
        let labels = res.reader_role.metadata.labels.unwrap();
        assert_eq!(labels.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_keeps_namespace() {
        // every delete answers 404, which counts as already gone
        let mock = MockService::new();
        let mut tester = MetricsServerTester::new(
            context(&mock),
            Config {
                enable: true,
                ..Config::default()
            },
        );
        tester.delete().await.unwrap();

        assert!(mock.count("DELETE", "/apis/apps/v1/namespaces/kube-system/deployments/metrics-server") >= 1);
        assert!(mock.count("DELETE", "/apis/apiregistration.k8s.io/v1/apiservices/") >= 1);
        assert!(!mock
            .requests()
            .iter()
            .any(|(m, p)| m == "DELETE" && p == "/api/v1/namespaces/kube-system"));
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = MetricsServerTester::new(context(&mock), Config::default());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
