// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch agent collecting Container Insights metrics from every node.

use super::agent::{cluster_role, cluster_role_binding, config_map, rule, service_account, AgentResources};
use super::{app_labels, collect, default_namespace, delete_namespace, validate_common};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::create_namespace;
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

pub const NAME: &str = "cloudwatch-agent";

const SERVICE_ACCOUNT: &str = "cloudwatch-agent";
const ROLE: &str = "cloudwatch-agent-role";
const ROLE_BINDING: &str = "cloudwatch-agent-role-binding";
const CONFIG_MAP: &str = "cwagentconfig";
const IMAGE: &str = "amazon/cloudwatch-agent:1.247348.0b251302";
const DAEMON_SET_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,
    pub namespace: String,
    pub region: String,
    /// Cluster name reported with the metrics; the run's cluster name when empty
    pub cluster_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            region: "us-west-2".to_string(),
            cluster_name: String::new(),
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("namespace", &mut self.namespace),
            Field::string("region", &mut self.region),
            Field::string("cluster_name", &mut self.cluster_name),
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
        validate_common(NAME, &self.namespace, self.minimum_nodes)?;
        if self.region.is_empty() {
            return Err(TesterError::InvalidConfig(format!("{NAME}: empty region")));
        }
        if self.cluster_name.is_empty() {
            return Err(TesterError::InvalidConfig(format!("{NAME}: empty cluster_name")));
        }
        Ok(())
    }
}

fn agent_config(cfg: &Config) -> String {
    json!({
        "agent": { "region": cfg.region },
        "logs": {
            "metrics_collected": {
                "kubernetes": {
                    "cluster_name": cfg.cluster_name,
                    "metrics_collection_interval": 60
                }
            },
            "force_flush_interval": 5
        }
    })
    .to_string()
}

fn resources(cfg: &Config) -> Result<AgentResources> {
    let namespace = cfg.namespace.as_str();
    let host_path = |name: &str, path: &str| json!({ "name": name, "hostPath": { "path": path } });
    let field_env = |name: &str, path: &str| json!({ "name": name, "valueFrom": { "fieldRef": { "fieldPath": path } } });

    let daemon_set: DaemonSet = serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": { "name": NAME, "namespace": namespace },
        "spec": {
            "selector": { "matchLabels": app_labels(NAME) },
            "template": {
                "metadata": { "labels": app_labels(NAME) },
                "spec": {
                    "serviceAccountName": SERVICE_ACCOUNT,
                    "terminationGracePeriodSeconds": 60,
                    "containers": [{
                        "name": NAME,
                        "image": IMAGE,
                        "resources": {
                            "limits": { "cpu": "200m", "memory": "200Mi" },
                            "requests": { "cpu": "200m", "memory": "200Mi" }
                        },
                        "env": [
                            field_env("HOST_IP", "status.hostIP"),
                            field_env("HOST_NAME", "spec.nodeName"),
                            field_env("K8S_NAMESPACE", "metadata.namespace"),
                            { "name": "CI_VERSION", "value": "k8s/1.3.8" }
                        ],
                        "volumeMounts": [
                            { "name": CONFIG_MAP, "mountPath": "/etc/cwagentconfig" },
                            { "name": "rootfs", "mountPath": "/rootfs", "readOnly": true },
                            { "name": "dockersock", "mountPath": "/var/run/docker.sock", "readOnly": true },
                            { "name": "varlibdocker", "mountPath": "/var/lib/docker", "readOnly": true },
                            { "name": "sys", "mountPath": "/sys", "readOnly": true },
                            { "name": "devdisk", "mountPath": "/dev/disk", "readOnly": true }
                        ]
                    }],
                    "volumes": [
                        { "name": CONFIG_MAP, "configMap": { "name": CONFIG_MAP } },
                        host_path("rootfs", "/"),
                        host_path("dockersock", "/var/run/docker.sock"),
                        host_path("varlibdocker", "/var/lib/docker"),
                        host_path("sys", "/sys"),
                        host_path("devdisk", "/dev/disk/")
                    ]
                }
            }
        }
    }))?;

    Ok(AgentResources {
        service_account: service_account(SERVICE_ACCOUNT, namespace),
        cluster_role: cluster_role(
            ROLE,
            vec![
                rule(&[""], &["pods", "nodes", "endpoints"], &["list", "watch"]),
                rule(&["apps"], &["replicasets"], &["list", "watch"]),
                rule(&["batch"], &["jobs"], &["list", "watch"]),
                rule(&[""], &["nodes/proxy"], &["get"]),
                rule(&[""], &["nodes/stats", "configmaps", "events"], &["create"]),
                rule(&[""], &["configmaps"], &["get", "update"]),
            ],
        ),
        cluster_role_binding: cluster_role_binding(ROLE_BINDING, ROLE, SERVICE_ACCOUNT, namespace),
        config_map: config_map(
            CONFIG_MAP,
            namespace,
            BTreeMap::from([("cwagentconfig.json".to_string(), agent_config(cfg))]),
        ),
        daemon_set,
    })
}

pub struct CloudwatchAgentTester {
    ctx: TesterContext,
    cfg: Config,
}

impl CloudwatchAgentTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for CloudwatchAgentTester {
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
        create_namespace(&self.ctx.client, &self.cfg.namespace).await?;
        resources(&self.cfg)?
            .apply(&self.ctx, &self.cfg.namespace, DAEMON_SET_TIMEOUT)
            .await
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let mut errs = Vec::new();
        resources(&self.cfg)?
            .delete(&self.ctx, &self.cfg.namespace, &mut errs)
            .await;
        collect(&mut errs, "namespace", delete_namespace(&self.ctx, &self.cfg.namespace).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        cfg.add_on_cloudwatch_agent = Some(self.cfg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::MockService;

    fn enabled() -> Config {
        Config {
            enable: true,
            namespace: "metrics".to_string(),
            cluster_name: "demo".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_agent_config_carries_cluster_and_region() {
        let cfg = enabled();
        let doc: serde_json::Value = serde_json::from_str(&agent_config(&cfg)).unwrap();
        assert_eq!(doc["agent"]["region"], "us-west-2");
        assert_eq!(doc["logs"]["metrics_collected"]["kubernetes"]["cluster_name"], "demo");
    }

    #[test]
    fn test_validate_requires_cluster_name() {
        let mut cfg = enabled();
        assert!(cfg.validate_and_set_defaults().is_ok());
        cfg.cluster_name.clear();
        assert!(cfg.validate_and_set_defaults().is_err());
    }

    #[test]
    fn test_daemon_set_env() {
        let ds = resources(&enabled()).unwrap().daemon_set;
        let container = &ds.spec.unwrap().template.spec.unwrap().containers[0];
        let env: Vec<_> = container.env.as_ref().unwrap().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(env, vec!["HOST_IP", "HOST_NAME", "K8S_NAMESPACE", "CI_VERSION"]);
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = CloudwatchAgentTester::new(context(&mock), Config::default());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
