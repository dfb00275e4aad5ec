// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes Dashboard with its metrics scraper, plus an `eks-admin` service
//! account bound to `cluster-admin` whose token logs into the dashboard.

use super::agent::{cluster_role, cluster_role_binding, rule, service_account};
use super::{collect, delete_namespace};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::delete::{
    delete_cluster_role, delete_cluster_role_binding, delete_deployment, delete_secret, delete_service,
    delete_service_account,
};
use crate::kubernetes::wait::poll_until;
use crate::kubernetes::{call, create_namespace, create_object, wait_for_deployment_available, OpOptions};
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

pub const NAME: &str = "kubernetes-dashboard";

const NAMESPACE: &str = "kubernetes-dashboard";
const DASHBOARD_IMAGE: &str = "kubernetesui/dashboard:v2.2.0";
const SCRAPER: &str = "dashboard-metrics-scraper";
const SCRAPER_IMAGE: &str = "kubernetesui/metrics-scraper:v1.0.6";
const SECRETS: [&str; 3] = [
    "kubernetes-dashboard-certs",
    "kubernetes-dashboard-csrf",
    "kubernetes-dashboard-key-holder",
];
const SETTINGS: &str = "kubernetes-dashboard-settings";

const ADMIN: &str = "eks-admin";
const ADMIN_NAMESPACE: &str = "kube-system";
const ADMIN_TOKEN: &str = "eks-admin-token";

/// Reachable once `kubectl proxy` runs on the default port.
pub const PROXY_URL: &str =
    "http://localhost:8001/api/v1/namespaces/kubernetes-dashboard/services/https:kubernetes-dashboard:/proxy/#/login";

const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(7 * 60);
const DEPLOYMENT_INITIAL_WAIT: Duration = Duration::from_secs(60);
const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_secs(20);
const TOKEN_TIMEOUT: Duration = Duration::from_secs(60);
const TOKEN_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,

    /// Login page behind `kubectl proxy`
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            url: String::new(),
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("url", &mut self.url).read_only(),
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

fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("k8s-app".to_string(), app.to_string())])
}

struct Resources {
    service_account: ServiceAccount,
    service: Service,
    secrets: Vec<Secret>,
    settings: ConfigMap,
    role: Role,
    role_binding: RoleBinding,
    cluster_role: ClusterRole,
    cluster_role_binding: ClusterRoleBinding,
    deployment: Deployment,
    scraper_service: Service,
    scraper_deployment: Deployment,
    admin: ServiceAccount,
    admin_binding: ClusterRoleBinding,
    admin_token: Secret,
}

fn resources() -> Result<Resources> {
    let secrets = SECRETS
        .iter()
        .map(|name| -> Result<Secret> {
            let mut secret: Secret = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": { "name": name, "namespace": NAMESPACE, "labels": labels(NAME) },
                "type": "Opaque"
            }))?;
            if name.ends_with("-csrf") {
                secret.string_data = Some(BTreeMap::from([("csrf".to_string(), String::new())]));
            }
            Ok(secret)
        })
        .collect::<Result<Vec<_>>>()?;

    let service: Service = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": NAME, "namespace": NAMESPACE, "labels": labels(NAME) },
        "spec": {
            "selector": labels(NAME),
            "ports": [{ "port": 443, "targetPort": 8443 }]
        }
    }))?;

    let settings: ConfigMap = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": SETTINGS, "namespace": NAMESPACE, "labels": labels(NAME) }
    }))?;

    let role: Role = serde_json::from_value(json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "Role",
        "metadata": { "name": NAME, "namespace": NAMESPACE, "labels": labels(NAME) },
        "rules": [
            {
                "apiGroups": [""],
                "resources": ["secrets"],
                "resourceNames": SECRETS,
                "verbs": ["get", "update", "delete"]
            },
            {
                "apiGroups": [""],
                "resources": ["configmaps"],
                "resourceNames": [SETTINGS],
                "verbs": ["get", "update"]
            },
            {
                "apiGroups": [""],
                "resources": ["services"],
                "resourceNames": ["heapster", SCRAPER],
                "verbs": ["proxy"]
            },
            {
                "apiGroups": [""],
                "resources": ["services/proxy"],
                "resourceNames": ["heapster", "http:heapster:", "https:heapster:", SCRAPER, format!("http:{SCRAPER}")],
                "verbs": ["get"]
            }
        ]
    }))?;

    let role_binding: RoleBinding = serde_json::from_value(json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": { "name": NAME, "namespace": NAMESPACE, "labels": labels(NAME) },
        "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "Role", "name": NAME },
        "subjects": [{ "kind": "ServiceAccount", "name": NAME, "namespace": NAMESPACE }]
    }))?;

    let deployment: Deployment = serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": NAME, "namespace": NAMESPACE, "labels": labels(NAME) },
        "spec": {
            "replicas": 1,
            "revisionHistoryLimit": 10,
            "selector": { "matchLabels": labels(NAME) },
            "template": {
                "metadata": { "labels": labels(NAME) },
                "spec": {
                    "serviceAccountName": NAME,
                    "containers": [{
                        "name": NAME,
                        "image": DASHBOARD_IMAGE,
                        "imagePullPolicy": "Always",
                        "ports": [{ "containerPort": 8443, "protocol": "TCP" }],
                        "args": ["--auto-generate-certificates", format!("--namespace={NAMESPACE}")],
                        "volumeMounts": [
                            { "name": "kubernetes-dashboard-certs", "mountPath": "/certs" },
                            { "name": "tmp-volume", "mountPath": "/tmp" }
                        ],
                        "livenessProbe": {
                            "httpGet": { "scheme": "HTTPS", "path": "/", "port": 8443 },
                            "initialDelaySeconds": 30,
                            "timeoutSeconds": 30
                        },
                        "securityContext": {
                            "allowPrivilegeEscalation": false,
                            "readOnlyRootFilesystem": true,
                            "runAsUser": 1001,
                            "runAsGroup": 2001
                        }
                    }],
                    "volumes": [
                        { "name": "kubernetes-dashboard-certs", "secret": { "secretName": "kubernetes-dashboard-certs" } },
                        { "name": "tmp-volume", "emptyDir": {} }
                    ],
                    "nodeSelector": { "kubernetes.io/os": "linux" },
                    "tolerations": [{ "key": "node-role.kubernetes.io/master", "effect": "NoSchedule" }]
                }
            }
        }
    }))?;

    let scraper_service: Service = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": SCRAPER, "namespace": NAMESPACE, "labels": labels(SCRAPER) },
        "spec": {
            "selector": labels(SCRAPER),
            "ports": [{ "port": 8000, "targetPort": 8000 }]
        }
    }))?;

    let scraper_deployment: Deployment = serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": SCRAPER, "namespace": NAMESPACE, "labels": labels(SCRAPER) },
        "spec": {
            "replicas": 1,
            "revisionHistoryLimit": 10,
            "selector": { "matchLabels": labels(SCRAPER) },
            "template": {
                "metadata": { "labels": labels(SCRAPER) },
                "spec": {
                    "serviceAccountName": NAME,
                    "containers": [{
                        "name": SCRAPER,
                        "image": SCRAPER_IMAGE,
                        "ports": [{ "containerPort": 8000, "protocol": "TCP" }],
                        "livenessProbe": {
                            "httpGet": { "scheme": "HTTP", "path": "/", "port": 8000 },
                            "initialDelaySeconds": 30,
                            "timeoutSeconds": 30
                        },
                        "volumeMounts": [{ "name": "tmp-volume", "mountPath": "/tmp" }],
                        "securityContext": {
                            "allowPrivilegeEscalation": false,
                            "readOnlyRootFilesystem": true,
                            "runAsUser": 1001,
                            "runAsGroup": 2001
                        }
                    }],
                    "volumes": [{ "name": "tmp-volume", "emptyDir": {} }],
                    "nodeSelector": { "kubernetes.io/os": "linux" },
                    "tolerations": [{ "key": "node-role.kubernetes.io/master", "effect": "NoSchedule" }]
                }
            }
        }
    }))?;

    // token secrets are no longer generated for service accounts, so ask for one
    let admin_token: Secret = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": ADMIN_TOKEN,
            "namespace": ADMIN_NAMESPACE,
            "annotations": { "kubernetes.io/service-account.name": ADMIN }
        },
        "type": "kubernetes.io/service-account-token"
    }))?;

    Ok(Resources {
        service_account: service_account(NAME, NAMESPACE),
        service,
        secrets,
        settings,
        role,
        role_binding,
        cluster_role: cluster_role(
            NAME,
            vec![rule(&["metrics.k8s.io"], &["pods", "nodes"], &["get", "list", "watch"])],
        ),
        cluster_role_binding: cluster_role_binding(NAME, NAME, NAME, NAMESPACE),
        deployment,
        scraper_service,
        scraper_deployment,
        admin: service_account(ADMIN, ADMIN_NAMESPACE),
        admin_binding: cluster_role_binding(ADMIN, "cluster-admin", ADMIN, ADMIN_NAMESPACE),
        admin_token,
    })
}

/// Wait for the token controller to fill in the `eks-admin` token.
async fn wait_for_admin_token(client: &Client, ctx: &TesterContext) -> Result<String> {
    let api: Api<Secret> = Api::namespaced(client.clone(), ADMIN_NAMESPACE);
    let params = ctx.poll(TOKEN_TIMEOUT).with_poll_interval(TOKEN_POLL_INTERVAL);
    poll_until("eks-admin token", &params, || {
        let api = api.clone();
        async move {
            let secret = match call(api.get(ADMIN_TOKEN)).await {
                Ok(secret) => secret,
                Err(err) => {
                    warn!(error = %err, "failed to get token secret");
                    return Ok(None);
                }
            };
            let token = secret
                .data
                .as_ref()
                .and_then(|data| data.get("token"))
                .map(|token| String::from_utf8_lossy(&token.0).into_owned())
                .filter(|token| !token.is_empty());
            Ok(token)
        }
    })
    .await
}

pub struct KubernetesDashboardTester {
    ctx: TesterContext,
    cfg: Config,
}

impl KubernetesDashboardTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for KubernetesDashboardTester {
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
        let client = &self.ctx.client;
        check_minimum_nodes(client, self.cfg.minimum_nodes).await?;
        create_namespace(client, NAMESPACE).await?;

        let res = resources()?;
        create_object(
            &Api::<ServiceAccount>::namespaced(client.clone(), NAMESPACE),
            "ServiceAccount",
            &res.service_account,
        )
        .await?;
        let services = Api::<Service>::namespaced(client.clone(), NAMESPACE);
        create_object(&services, "Service", &res.service).await?;
        let secrets = Api::<Secret>::namespaced(client.clone(), NAMESPACE);
        for secret in &res.secrets {
            create_object(&secrets, "Secret", secret).await?;
        }
        create_object(
            &Api::<ConfigMap>::namespaced(client.clone(), NAMESPACE),
            "ConfigMap",
            &res.settings,
        )
        .await?;
        create_object(&Api::<Role>::namespaced(client.clone(), NAMESPACE), "Role", &res.role).await?;
        create_object(&Api::<ClusterRole>::all(client.clone()), "ClusterRole", &res.cluster_role).await?;
        create_object(
            &Api::<RoleBinding>::namespaced(client.clone(), NAMESPACE),
            "RoleBinding",
            &res.role_binding,
        )
        .await?;
        let cluster_role_bindings = Api::<ClusterRoleBinding>::all(client.clone());
        create_object(&cluster_role_bindings, "ClusterRoleBinding", &res.cluster_role_binding).await?;
        let deployments = Api::<Deployment>::namespaced(client.clone(), NAMESPACE);
        create_object(&deployments, "Deployment", &res.deployment).await?;
        create_object(&services, "Service", &res.scraper_service).await?;
        create_object(&deployments, "Deployment", &res.scraper_deployment).await?;

        let params = self
            .ctx
            .poll(DEPLOYMENT_TIMEOUT)
            .with_initial_wait(DEPLOYMENT_INITIAL_WAIT)
            .with_poll_interval(DEPLOYMENT_POLL_INTERVAL);
        let opts = OpOptions::new().with_query_fn(self.ctx.describe_query("deployment", NAME, NAMESPACE));
        wait_for_deployment_available(client, NAMESPACE, NAME, 1, &params, &opts).await?;

        create_object(
            &Api::<ServiceAccount>::namespaced(client.clone(), ADMIN_NAMESPACE),
            "ServiceAccount",
            &res.admin,
        )
        .await?;
        create_object(&cluster_role_bindings, "ClusterRoleBinding", &res.admin_binding).await?;
        create_object(
            &Api::<Secret>::namespaced(client.clone(), ADMIN_NAMESPACE),
            "Secret",
            &res.admin_token,
        )
        .await?;
        let token = wait_for_admin_token(client, &self.ctx).await?;

        self.cfg.url = PROXY_URL.to_string();
        info!(url = %self.cfg.url, "dashboard ready");
        self.ctx.progress.block("Kubernetes Dashboard Token", &token);
        self.ctx.progress.block(
            "Kubernetes Dashboard URL",
            &format!("kubectl proxy\n\n{}", self.cfg.url),
        );
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let client = &self.ctx.client;
        let mut errs = Vec::new();

        collect(&mut errs, "Secret", delete_secret(client, ADMIN_NAMESPACE, ADMIN_TOKEN).await);
        collect(
            &mut errs,
            "ClusterRoleBinding",
            delete_cluster_role_binding(client, ADMIN).await,
        );
        collect(
            &mut errs,
            "ServiceAccount",
            delete_service_account(client, ADMIN_NAMESPACE, ADMIN).await,
        );
        for name in [SCRAPER, NAME] {
            collect(&mut errs, "Deployment", delete_deployment(client, NAMESPACE, name).await);
            collect(&mut errs, "Service", delete_service(client, NAMESPACE, name).await);
        }
        collect(&mut errs, "ClusterRoleBinding", delete_cluster_role_binding(client, NAME).await);
        collect(&mut errs, "ClusterRole", delete_cluster_role(client, NAME).await);
        // the namespace takes the secrets, settings and role with it
        collect(&mut errs, "namespace", delete_namespace(&self.ctx, NAMESPACE).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        cfg.add_on_kubernetes_dashboard = Some(self.cfg.clone());
    }
}
