// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Batch Job computing pi to 2000 places.

use super::{collect, default_namespace, delete_namespace, validate_common};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::delete::delete_job;
use crate::kubernetes::{create_namespace, create_object, wait_for_job_completes, JobKind, OpOptions};
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::Api;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "jobs-pi";

const JOB_NAME: &str = "job-pi";
const IMAGE: &str = "perl";

const INITIAL_WAIT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const MAX_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,
    pub namespace: String,
    /// Desired number of successfully finished pods
    pub completes: i32,
    /// Maximum number of pods running at any instant
    pub parallels: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            completes: 10,
            parallels: 10,
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("namespace", &mut self.namespace),
            Field::i32("completes", &mut self.completes),
            Field::i32("parallels", &mut self.parallels),
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
        if self.completes <= 0 || self.parallels <= 0 {
            return Err(TesterError::InvalidConfig(format!(
                "{NAME}: completes and parallels must be positive (got {}, {})",
                self.completes, self.parallels
            )));
        }
        Ok(())
    }
}

fn job(cfg: &Config) -> Result<Job> {
    Ok(serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": JOB_NAME, "namespace": cfg.namespace },
        "spec": {
            "completions": cfg.completes,
            "parallelism": cfg.parallels,
            "template": {
                "metadata": { "name": JOB_NAME },
                "spec": {
                    "restartPolicy": "OnFailure",
                    "containers": [{
                        "name": JOB_NAME,
                        "image": IMAGE,
                        "imagePullPolicy": "Always",
                        "command": ["perl", "-Mbignum=bpi", "-wle", "print bpi(2000)"]
                    }]
                }
            }
        }
    }))?)
}

/// Five minutes plus five per completion, at most three hours.
pub(crate) fn wait_timeout(completes: i32) -> Duration {
    let per_pod = Duration::from_secs(5 * 60);
    (per_pod + per_pod * completes.max(0) as u32).min(MAX_TIMEOUT)
}

pub struct JobsPiTester {
    ctx: TesterContext,
    cfg: Config,
}

impl JobsPiTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for JobsPiTester {
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
        let namespace = &self.cfg.namespace;
        check_minimum_nodes(client, self.cfg.minimum_nodes).await?;
        create_namespace(client, namespace).await?;
        create_object(&Api::<Job>::namespaced(client.clone(), namespace), "Job", &job(&self.cfg)?).await?;

        let params = self
            .ctx
            .poll(wait_timeout(self.cfg.completes))
            .with_initial_wait(INITIAL_WAIT)
            .with_poll_interval(POLL_INTERVAL);
        let opts = OpOptions::new().with_query_fn(self.ctx.describe_query("job", JOB_NAME, namespace));
        let pods = wait_for_job_completes(
            client,
            namespace,
            JOB_NAME,
            JobKind::Job,
            self.cfg.completes,
            &params,
            &opts,
        )
        .await?;
        info!(succeeded = pods.len(), "pi job completed");
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let mut errs = Vec::new();
        collect(
            &mut errs,
            "Job",
            delete_job(&self.ctx.client, &self.cfg.namespace, JOB_NAME).await,
        );
        collect(&mut errs, "namespace", delete_namespace(&self.ctx, &self.cfg.namespace).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        cfg.add_on_jobs_pi = Some(self.cfg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::{namespace_json, not_found_json, MockService};

    #[test]
    fn test_wait_timeout_is_capped() {
        assert_eq!(wait_timeout(10), Duration::from_secs(55 * 60));
        assert_eq!(wait_timeout(1000), MAX_TIMEOUT);
    }

    #[test]
    fn test_job_spec() {
        let cfg = Config {
            namespace: "pi".to_string(),
            completes: 3,
            parallels: 2,
            ..Config::default()
        };
        let spec = job(&cfg).unwrap().spec.unwrap();
        assert_eq!(spec.completions, Some(3));
        assert_eq!(spec.parallelism, Some(2));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.containers[0].command.as_ref().unwrap()[3], "print bpi(2000)");
    }

    #[tokio::test]
    async fn test_delete_removes_job_then_namespace() {
        let mock = MockService::new()
            .on_delete("/api/v1/namespaces/pi", 200, &namespace_json("pi"))
            .on_get("/api/v1/namespaces/pi", 404, &not_found_json("namespaces", "pi"));
        let cfg = Config {
            enable: true,
            namespace: "pi".to_string(),
            ..Config::default()
        };
        let mut tester = JobsPiTester::new(context(&mock), cfg);
        tester.delete().await.unwrap();

        let deletes: Vec<String> = mock
            .requests()
            .into_iter()
            .filter(|(m, _)| m == "DELETE")
            .map(|(_, p)| p)
            .collect();
        assert_eq!(deletes[0], "/apis/batch/v1/namespaces/pi/jobs/job-pi");
        assert_eq!(deletes[1], "/api/v1/namespaces/pi");
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = JobsPiTester::new(context(&mock), Config::default());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
