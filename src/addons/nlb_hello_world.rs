// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! "Hello World" web application exposed through a network load balancer.

use super::{collect, default_namespace, delete_namespace, validate_common};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::wait::SERVICE_POLL_INTERVAL;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::delete::{delete_deployment, delete_service};
use crate::kubernetes::services::load_balancer_name;
use crate::kubernetes::{
    create_namespace, create_object, wait_for_deployment_available, wait_for_service_ingress_hostname, OpOptions,
};
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "nlb-hello-world";

const DEPLOYMENT_NAME: &str = "hello-world-deployment";
const SERVICE_NAME: &str = "hello-world-service";
const APP_NAME: &str = "hello-world";
const APP_IMAGE: &str = "dockercloud/hello-world";
const NLB_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-type";

const DEPLOYMENT_INITIAL_WAIT: Duration = Duration::from_secs(60);
const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_secs(20);
const SERVICE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,
    pub namespace: String,

    pub partition: String,
    pub region: String,
    pub account_id: String,

    pub deployment_node_selector: BTreeMap<String, String>,
    pub deployment_replicas: i32,

    /// Load balancer name derived from the ingress hostname
    pub elb_name: String,
    pub elb_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            partition: "aws".to_string(),
            region: "us-west-2".to_string(),
            account_id: String::new(),
            deployment_node_selector: BTreeMap::new(),
            deployment_replicas: 2,
            elb_name: String::new(),
            elb_url: String::new(),
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("namespace", &mut self.namespace),
            Field::string("partition", &mut self.partition),
            Field::string("region", &mut self.region),
            Field::string("account_id", &mut self.account_id).read_only(),
            Field::map("deployment_node_selector", &mut self.deployment_node_selector),
            Field::i32("deployment_replicas", &mut self.deployment_replicas),
            Field::string("elb_name", &mut self.elb_name).read_only(),
            Field::string("elb_url", &mut self.elb_url).read_only(),
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
        if self.deployment_replicas <= 0 {
            return Err(TesterError::InvalidConfig(format!(
                "{NAME}: deployment_replicas must be positive (got {})",
                self.deployment_replicas
            )));
        }
        Ok(())
    }
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app.kubernetes.io/name".to_string(), APP_NAME.to_string())])
}

fn deployment(cfg: &Config) -> Result<Deployment> {
    let mut pod_spec = json!({
        "containers": [{
            "name": APP_NAME,
            "image": APP_IMAGE,
            "imagePullPolicy": "Always",
            "ports": [{ "protocol": "TCP", "containerPort": 80 }]
        }]
    });
    if !cfg.deployment_node_selector.is_empty() {
        pod_spec["nodeSelector"] = json!(cfg.deployment_node_selector);
    }

    Ok(serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": DEPLOYMENT_NAME, "namespace": cfg.namespace, "labels": app_labels() },
        "spec": {
            "replicas": cfg.deployment_replicas,
            "selector": { "matchLabels": app_labels() },
            "template": {
                "metadata": { "labels": app_labels() },
                "spec": pod_spec
            }
        }
    }))?)
}

fn service(namespace: &str) -> Result<Service> {
    Ok(serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": SERVICE_NAME,
            "namespace": namespace,
            "annotations": { NLB_ANNOTATION: "nlb" }
        },
        "spec": {
            "selector": app_labels(),
            "type": "LoadBalancer",
            "ports": [{ "protocol": "TCP", "port": 80, "targetPort": 80 }]
        }
    }))?)
}

fn deployment_timeout(replicas: i32) -> Duration {
    Duration::from_secs(7 * 60) + Duration::from_secs(60) * replicas.max(0) as u32
}

pub struct NlbHelloWorldTester {
    ctx: TesterContext,
    cfg: Config,
}

impl NlbHelloWorldTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for NlbHelloWorldTester {
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
        let namespace = self.cfg.namespace.clone();
        check_minimum_nodes(client, self.cfg.minimum_nodes).await?;
        create_namespace(client, &namespace).await?;

        create_object(
            &Api::<Deployment>::namespaced(client.clone(), &namespace),
            "Deployment",
            &deployment(&self.cfg)?,
        )
        .await?;
        let params = self
            .ctx
            .poll(deployment_timeout(self.cfg.deployment_replicas))
            .with_initial_wait(DEPLOYMENT_INITIAL_WAIT)
            .with_poll_interval(DEPLOYMENT_POLL_INTERVAL);
        let opts = OpOptions::new().with_query_fn(self.ctx.describe_query("deployment", DEPLOYMENT_NAME, &namespace));
        wait_for_deployment_available(
            client,
            &namespace,
            DEPLOYMENT_NAME,
            self.cfg.deployment_replicas,
            &params,
            &opts,
        )
        .await?;

        create_object(
            &Api::<Service>::namespaced(client.clone(), &namespace),
            "Service",
            &service(&namespace)?,
        )
        .await?;
        let params = self
            .ctx
            .poll(SERVICE_TIMEOUT)
            .with_poll_interval(SERVICE_POLL_INTERVAL);
        let opts = OpOptions::new().with_query_fn(self.ctx.describe_query("svc", SERVICE_NAME, &namespace));
        let hostname = wait_for_service_ingress_hostname(client, &namespace, SERVICE_NAME, &params, &opts).await?;

        self.cfg.elb_name = load_balancer_name(&hostname);
        self.cfg.elb_url = format!("http://{hostname}");
        info!(elb_name = %self.cfg.elb_name, elb_url = %self.cfg.elb_url, "service exposed");
        self.ctx
            .progress
            .success(&format!("{NAME} reachable at {}", self.cfg.elb_url));
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let client = &self.ctx.client;
        let namespace = &self.cfg.namespace;
        let mut errs = Vec::new();
        collect(&mut errs, "Service", delete_service(client, namespace, SERVICE_NAME).await);
        collect(
            &mut errs,
            "Deployment",
            delete_deployment(client, namespace, DEPLOYMENT_NAME).await,
        );
        collect(&mut errs, "namespace", delete_namespace(&self.ctx, namespace).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        cfg.add_on_nlb_hello_world = Some(self.cfg.clone());
    }
}
