// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Fluent Bit log forwarder running on every node.

use super::agent::{cluster_role, cluster_role_binding, config_map, rule, service_account, AgentResources};
use super::{app_labels, default_namespace, delete_namespace, validate_common};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::Result;
use crate::kubernetes::create_namespace;
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

pub const NAME: &str = "fluent-bit";

const SERVICE_ACCOUNT: &str = "fluentbit-service-account";
const ROLE: &str = "fluentbit-rbac-role";
const ROLE_BINDING: &str = "fluentbit-rbac-role-binding";
const CONFIG_MAP: &str = "fluentbit-configmap-config";
const IMAGE: &str = "fluent/fluent-bit:1.5";
const DAEMON_SET_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const FLUENT_BIT_CONF: &str = "[SERVICE]
    Flush         5
    Log_Level     info
    Daemon        off
    Parsers_File  parsers.conf

@INCLUDE input-kubernetes.conf
@INCLUDE output.conf
";

const INPUT_CONF: &str = "[INPUT]
    Name              tail
    Tag               kube.*
    Path              /var/log/containers/*.log
    Parser            docker
    Mem_Buf_Limit     5MB
    Skip_Long_Lines   On
    Refresh_Interval  10
";

const PARSERS_CONF: &str = "[PARSER]
    Name        docker
    Format      json
    Time_Key    time
    Time_Format %Y-%m-%dT%H:%M:%S.%L
";

const OUTPUT_CONF: &str = "[OUTPUT]
    Name   stdout
    Match  *
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("namespace", &mut self.namespace),
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
        validate_common(NAME, &self.namespace, self.minimum_nodes)
    }
}

fn resources(namespace: &str) -> Result<AgentResources> {
    let data = BTreeMap::from([
        ("fluent-bit.conf".to_string(), FLUENT_BIT_CONF.to_string()),
        ("input-kubernetes.conf".to_string(), INPUT_CONF.to_string()),
        ("parsers.conf".to_string(), PARSERS_CONF.to_string()),
        ("output.conf".to_string(), OUTPUT_CONF.to_string()),
    ]);

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
                    "terminationGracePeriodSeconds": 10,
                    "containers": [{
                        "name": NAME,
                        "image": IMAGE,
                        "imagePullPolicy": "Always",
                        "resources": {
                            "limits": { "memory": "500Mi" },
                            "requests": { "cpu": "500m", "memory": "100Mi" }
                        },
                        "volumeMounts": [
                            { "name": CONFIG_MAP, "mountPath": "/fluent-bit/etc/" },
                            { "name": "varlog", "mountPath": "/var/log" },
                            { "name": "varlibdockercontainers", "mountPath": "/var/lib/docker/containers", "readOnly": true }
                        ]
                    }],
                    "volumes": [
                        { "name": CONFIG_MAP, "configMap": { "name": CONFIG_MAP } },
                        { "name": "varlog", "hostPath": { "path": "/var/log" } },
                        { "name": "varlibdockercontainers", "hostPath": { "path": "/var/lib/docker/containers" } }
                    ]
                }
            }
        }
    }))?;

    Ok(AgentResources {
        service_account: service_account(SERVICE_ACCOUNT, namespace),
        cluster_role: cluster_role(
            ROLE,
            vec![rule(&[""], &["namespaces", "pods", "pods/logs"], &["get", "list", "watch"])],
        ),
        cluster_role_binding: cluster_role_binding(ROLE_BINDING, ROLE, SERVICE_ACCOUNT, namespace),
        config_map: config_map(CONFIG_MAP, namespace, data),
        daemon_set,
    })
}

pub struct FluentBitTester {
    ctx: TesterContext,
    cfg: Config,
}

impl FluentBitTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for FluentBitTester {
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
        resources(&self.cfg.namespace)?
            .apply(&self.ctx, &self.cfg.namespace, DAEMON_SET_TIMEOUT)
            .await
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let mut errs = Vec::new();
        resources(&self.cfg.namespace)?
            .delete(&self.ctx, &self.cfg.namespace, &mut errs)
            .await;
        super::collect(&mut errs, "namespace", delete_namespace(&self.ctx, &self.cfg.namespace).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        cfg.add_on_fluent_bit = Some(self.cfg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::MockService;

    #[test]
    fn test_resources_reference_each_other() {
        let res = resources("logs").unwrap();
        let spec = res.daemon_set.spec.unwrap().template.spec.unwrap();
        assert_eq!(spec.service_account_name.as_deref(), Some(SERVICE_ACCOUNT));
        assert_eq!(spec.containers[0].image.as_deref(), Some(IMAGE));
        assert!(res.config_map.data.unwrap().contains_key("fluent-bit.conf"));
        assert_eq!(res.cluster_role_binding.role_ref.name, ROLE);
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = FluentBitTester::new(context(&mock), Config::default());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
