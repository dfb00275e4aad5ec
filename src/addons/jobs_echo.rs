// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Echo workload run either as a one-off Job or as a CronJob. Every pod
//! writes `echo_size` random bytes, which puts write load on etcd.

use super::jobs_pi::{wait_timeout, MAX_TIMEOUT};
use super::{collect, default_namespace, delete_namespace, random_suffix, validate_common};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::delete::{delete_cron_job, delete_job};
use crate::kubernetes::{create_namespace, create_object, wait_for_job_completes, JobKind, OpOptions};
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::Api;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const JOB_NAME: &str = "job-echo";
const DEFAULT_IMAGE: &str = "busybox";

/// Objects above this size are rejected by the API server.
const MAX_ECHO_SIZE: i32 = 256 * 1024;
const CRON_JOB_EXTRA_WAIT: Duration = Duration::from_secs(10 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Private ECR repository hosting the echo image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Repository {
    /// `aws-cn` selects the `amazonaws.com.cn` registry host
    pub partition: String,
    pub account_id: String,
    pub region: String,
    pub name: String,
    pub image_tag: String,
}

impl Repository {
    fn is_empty(&self) -> bool {
        self == &Repository::default()
    }

    /// Names of the fields an image reference still needs.
    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("partition", &self.partition),
            ("account_id", &self.account_id),
            ("region", &self.region),
            ("name", &self.name),
            ("image_tag", &self.image_tag),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect()
    }

    pub fn image(&self) -> String {
        let host = match self.partition.as_str() {
            "aws-cn" => "amazonaws.com.cn",
            _ => "amazonaws.com",
        };
        format!(
            "{}.dkr.ecr.{}.{host}/{}:{}",
            self.account_id, self.region, self.name, self.image_tag
        )
    }
}

impl EnvBinding for Repository {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::string("partition", &mut self.partition),
            Field::string("account_id", &mut self.account_id),
            Field::string("region", &mut self.region),
            Field::string("name", &mut self.name),
            Field::string("image_tag", &mut self.image_tag),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub enable: bool,
    pub minimum_nodes: i32,
    pub namespace: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,

    /// Fixed by the record: `jobs_echo` runs a Job, `cron_jobs_echo` a CronJob
    pub job_type: JobKind,

    pub completes: i32,
    pub parallels: i32,
    /// Bytes echoed by every pod
    pub echo_size: i32,

    pub schedule: String,
    pub successful_jobs_history_limit: i32,
    pub failed_jobs_history_limit: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self::job()
    }
}

impl Config {
    fn with_kind(job_type: JobKind) -> Self {
        let name = match job_type {
            JobKind::Job => "jobs-echo",
            JobKind::CronJob => "cron-jobs-echo",
        };
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(name),
            repository: None,
            job_type,
            completes: 10,
            parallels: 10,
            echo_size: 100 * 1024,
            schedule: "*/10 * * * *".to_string(),
            successful_jobs_history_limit: 3,
            failed_jobs_history_limit: 1,
        }
    }

    pub fn job() -> Self {
        Self::with_kind(JobKind::Job)
    }

    pub fn cron_job() -> Self {
        Self::with_kind(JobKind::CronJob)
    }

    fn name(&self) -> &'static str {
        match self.job_type {
            JobKind::Job => "jobs-echo",
            JobKind::CronJob => "cron-jobs-echo",
        }
    }

    fn image(&self) -> String {
        match &self.repository {
            Some(repo) if !repo.is_empty() => repo.image(),
            _ => DEFAULT_IMAGE.to_string(),
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("namespace", &mut self.namespace),
            Field::record("repository", &mut self.repository),
            Field::i32("completes", &mut self.completes),
            Field::i32("parallels", &mut self.parallels),
            Field::i32("echo_size", &mut self.echo_size),
            Field::string("schedule", &mut self.schedule),
            Field::i32("successful_jobs_history_limit", &mut self.successful_jobs_history_limit),
            Field::i32("failed_jobs_history_limit", &mut self.failed_jobs_history_limit),
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
        let name = self.name();
        validate_common(name, &self.namespace, self.minimum_nodes)?;
        if self.completes <= 0 || self.parallels <= 0 {
            return Err(TesterError::InvalidConfig(format!(
                "{name}: completes and parallels must be positive (got {}, {})",
                self.completes, self.parallels
            )));
        }
        if self.echo_size <= 0 || self.echo_size > MAX_ECHO_SIZE {
            return Err(TesterError::InvalidConfig(format!(
                "{name}: echo_size must be in 1..={MAX_ECHO_SIZE} (got {})",
                self.echo_size
            )));
        }
        if self.job_type == JobKind::CronJob && self.schedule.is_empty() {
            return Err(TesterError::InvalidConfig(format!("{name}: empty schedule")));
        }
        if let Some(repo) = self.repository.as_ref().filter(|r| !r.is_empty()) {
            let missing = repo.missing_fields();
            if !missing.is_empty() {
                return Err(TesterError::InvalidConfig(format!(
                    "{name}: repository is missing {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn job_spec(cfg: &Config) -> Value {
    let payload = random_suffix(cfg.echo_size.max(0) as usize);
    json!({
        "completions": cfg.completes,
        "parallelism": cfg.parallels,
        "template": {
            "spec": {
                "restartPolicy": "OnFailure",
                "containers": [{
                    "name": JOB_NAME,
                    "image": cfg.image(),
                    "imagePullPolicy": "Always",
                    "command": ["/bin/sh", "-ec", format!("echo -n '{payload}' >> /config/output.txt")],
                    "volumeMounts": [{ "name": "config", "mountPath": "/config" }]
                }],
                "volumes": [{ "name": "config", "emptyDir": {} }]
            }
        }
    })
}

fn job(cfg: &Config) -> Result<Job> {
    Ok(serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": JOB_NAME, "namespace": cfg.namespace },
        "spec": job_spec(cfg)
    }))?)
}

fn cron_job(cfg: &Config) -> Result<CronJob> {
    Ok(serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "CronJob",
        "metadata": { "name": JOB_NAME, "namespace": cfg.namespace },
        "spec": {
            "schedule": cfg.schedule,
            "successfulJobsHistoryLimit": cfg.successful_jobs_history_limit,
            "failedJobsHistoryLimit": cfg.failed_jobs_history_limit,
            "concurrencyPolicy": "Replace",
            "jobTemplate": {
                "metadata": { "name": JOB_NAME, "namespace": cfg.namespace },
                "spec": job_spec(cfg)
            }
        }
    }))?)
}

fn timeouts(cfg: &Config) -> (Duration, Duration) {
    let base = wait_timeout(cfg.completes);
    match cfg.job_type {
        JobKind::Job => (base, Duration::from_secs(60)),
        JobKind::CronJob => (
            (base + CRON_JOB_EXTRA_WAIT).min(MAX_TIMEOUT),
            Duration::from_secs(3 * 60),
        ),
    }
}

pub struct JobsEchoTester {
    ctx: TesterContext,
    cfg: Config,
}

impl JobsEchoTester {
    pub fn new(ctx: TesterContext, cfg: Config) -> Self {
        Self { ctx, cfg }
    }
}

#[async_trait]
impl Tester for JobsEchoTester {
    fn name(&self) -> &str {
        self.cfg.name()
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
        let kind = self.cfg.job_type;
        check_minimum_nodes(client, self.cfg.minimum_nodes).await?;
        create_namespace(client, namespace).await?;

        info!(%kind, image = %self.cfg.image(), echo_size = self.cfg.echo_size, "creating echo workload");
        match kind {
            JobKind::Job => {
                create_object(&Api::<Job>::namespaced(client.clone(), namespace), "Job", &job(&self.cfg)?).await?
            }
            JobKind::CronJob => {
                create_object(
                    &Api::<CronJob>::namespaced(client.clone(), namespace),
                    "CronJob",
                    &cron_job(&self.cfg)?,
                )
                .await?
            }
        }

        let (timeout, initial_wait) = timeouts(&self.cfg);
        let params = self
            .ctx
            .poll(timeout)
            .with_initial_wait(initial_wait)
            .with_poll_interval(POLL_INTERVAL);
        let describe_kind = match kind {
            JobKind::Job => "job",
            JobKind::CronJob => "cronjob",
        };
        let opts = OpOptions::new().with_query_fn(self.ctx.describe_query(describe_kind, JOB_NAME, namespace));
        let pods = wait_for_job_completes(client, namespace, JOB_NAME, kind, self.cfg.completes, &params, &opts).await?;

        let lines: Vec<String> = pods
            .iter()
            .map(|pod| {
                format!(
                    "{kind} Pod {:?}: {:?}",
                    pod.metadata.name.as_deref().unwrap_or_default(),
                    pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or_default()
                )
            })
            .collect();
        self.ctx.progress.block(&format!("{} pods", self.cfg.name()), &lines.join("\n"));
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let client = &self.ctx.client;
        let namespace = &self.cfg.namespace;
        let mut errs = Vec::new();
        match self.cfg.job_type {
            JobKind::Job => collect(&mut errs, "Job", delete_job(client, namespace, JOB_NAME).await),
            JobKind::CronJob => collect(&mut errs, "CronJob", delete_cron_job(client, namespace, JOB_NAME).await),
        }
        collect(&mut errs, "namespace", delete_namespace(&self.ctx, namespace).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        match self.cfg.job_type {
            JobKind::Job => cfg.add_on_jobs_echo = Some(self.cfg.clone()),
            JobKind::CronJob => cfg.add_on_cron_jobs_echo = Some(self.cfg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::MockService;

    fn repository() -> Repository {
        Repository {
            partition: "aws".to_string(),
            account_id: "123456789012".to_string(),
            region: "us-west-2".to_string(),
            name: "busybox".to_string(),
            image_tag: "latest".to_string(),
        }
    }

    #[test]
    fn test_image_selection() {
        let mut cfg = Config::job();
        assert_eq!(cfg.image(), "busybox");

        cfg.repository = Some(repository());
        assert_eq!(cfg.image(), "123456789012.dkr.ecr.us-west-2.amazonaws.com/busybox:latest");

        cfg.repository = Some(Repository {
            partition: "aws-cn".to_string(),
            region: "cn-north-1".to_string(),
            ..repository()
        });
        assert_eq!(cfg.image(), "123456789012.dkr.ecr.cn-north-1.amazonaws.com.cn/busybox:latest");
    }

    #[test]
    fn test_validate() {
        let mut cfg = Config::cron_job();
        assert!(cfg.validate_and_set_defaults().is_ok());

        cfg.echo_size = MAX_ECHO_SIZE + 1;
        assert!(cfg.validate_and_set_defaults().is_err());

        let mut cfg = Config::job();
        cfg.repository = Some(Repository {
            name: "busybox".to_string(),
            ..Repository::default()
        });
        let err = cfg.validate_and_set_defaults().unwrap_err();
        assert!(err.to_string().contains("account_id"));
    }

    #[test]
    fn test_cron_job_spec() {
        let cfg = Config {
            namespace: "echo".to_string(),
            echo_size: 16,
            ..Config::cron_job()
        };
        let spec = cron_job(&cfg).unwrap().spec.unwrap();
        assert_eq!(spec.schedule, "*/10 * * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Replace"));
        assert_eq!(spec.successful_jobs_history_limit, Some(3));
        assert_eq!(spec.failed_jobs_history_limit, Some(1));

        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        let script = &pod.containers[0].command.as_ref().unwrap()[2];
        // echo -n '<16 bytes>' >> /config/output.txt
        assert_eq!(script.len(), "echo -n '' >> /config/output.txt".len() + 16);
    }

    #[test]
    fn test_timeouts() {
        let job = Config::job();
        assert_eq!(timeouts(&job), (Duration::from_secs(55 * 60), Duration::from_secs(60)));

        let cron = Config::cron_job();
        assert_eq!(timeouts(&cron), (Duration::from_secs(65 * 60), Duration::from_secs(180)));

        let huge = Config {
            completes: 1000,
            ..Config::cron_job()
        };
        assert_eq!(timeouts(&huge).0, Duration::from_secs(3 * 60 * 60));
    }

    #[test]
    fn test_names_follow_job_type() {
        assert_eq!(Config::job().name(), "jobs-echo");
        assert_eq!(Config::cron_job().name(), "cron-jobs-echo");
        assert!(Config::cron_job().namespace.starts_with("cron-jobs-echo-"));
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = JobsEchoTester::new(context(&mock), Config::cron_job());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
