// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::list::list_pods;
use super::wait::{poll_until, PollParams};
use super::{call, OpOptions};
use crate::constants::wait::{JOB_POD_BATCH_INTERVAL, JOB_POD_BATCH_LIMIT};
use crate::error::{Result, TesterError};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobKind {
    #[default]
    Job,
    CronJob,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Job => write!(f, "Job"),
            JobKind::CronJob => write!(f, "CronJob"),
        }
    }
}

/// Whether `pod` was created for the job. CronJob pods carry the name of the
/// spawned Job, so for those a name prefix match is enough.
pub fn is_job_pod(pod: &Pod, job_name: &str, kind: JobKind) -> bool {
    let label_match = pod
        .labels()
        .get("job-name")
        .is_some_and(|name| name == job_name);
    label_match || (kind == JobKind::CronJob && pod.name_any().starts_with(job_name))
}

fn is_succeeded(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded")
}

/// Check the first terminal condition of a Job: `Ok(true)` when complete.
pub fn job_finished(job: &Job) -> Result<bool> {
    let conditions = job
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    for cond in conditions.iter().filter(|c| c.status == "True") {
        match cond.type_.as_str() {
            "Failed" => {
                return Err(TesterError::WaitFailed(format!(
                    "job {} failed: {} {}",
                    job.name_any(),
                    cond.reason.as_deref().unwrap_or_default(),
                    cond.message.as_deref().unwrap_or_default(),
                )))
            }
            "Complete" => return Ok(true),
            _ => {}
        }
    }
    Ok(false)
}

/// Wait until `target` pods of the job succeeded and the job object agrees.
///
/// Returns the succeeded pods.
#[instrument(skip(client, params, opts))]
pub async fn wait_for_job_completes(
    client: &Client,
    namespace: &str,
    job_name: &str,
    kind: JobKind,
    target: i32,
    params: &PollParams,
    opts: &OpOptions,
) -> Result<Vec<Pod>> {
    let what = format!("{kind} {namespace}/{job_name}");

    poll_until(&what, params, || async move {
        opts.run_query().await;

        let pods = match list_pods(client, namespace, JOB_POD_BATCH_LIMIT, JOB_POD_BATCH_INTERVAL, opts).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!(namespace, job_name, error = %err, "failed to list pods");
                return Ok(None);
            }
        };

        let mut succeeded = Vec::new();
        for pod in pods {
            if let Some(pod_fn) = &opts.pod_fn {
                pod_fn(&pod);
            }
            if is_job_pod(&pod, job_name, kind) && is_succeeded(&pod) {
                succeeded.push(pod);
            }
        }
        info!(namespace, job_name, %kind, succeeded = succeeded.len(), target, "polling job pods");
        if (succeeded.len() as i32) < target {
            return Ok(None);
        }

        match kind {
            JobKind::Job => {
                let api: Api<Job> = Api::namespaced(client.clone(), namespace);
                match call(api.get(job_name)).await {
                    Ok(job) => Ok(job_finished(&job)?.then_some(succeeded)),
                    Err(err) => {
                        warn!(namespace, job_name, error = %err, "failed to get job");
                        Ok(None)
                    }
                }
            }
            JobKind::CronJob => {
                let api: Api<CronJob> = Api::namespaced(client.clone(), namespace);
                match call(api.get(job_name)).await {
                    Ok(_) => Ok(Some(succeeded)),
                    Err(err) => {
                        warn!(namespace, job_name, error = %err, "failed to get cronjob");
                        Ok(None)
                    }
                }
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{list_json, pod_json, MockService};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const PODS: &str = "/api/v1/namespaces/jobs/pods";
    const JOB: &str = "/apis/batch/v1/namespaces/jobs/jobs/job-pi";

    fn job_pod(name: &str, phase: &str) -> serde_json::Value {
        pod_json(name, "jobs", json!({ "job-name": "job-pi" }), phase)
    }

    fn job_json(condition: &str) -> String {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "job-pi", "namespace": "jobs" },
            "status": { "conditions": [ { "type": condition, "status": "True" } ] }
        })
        .to_string()
    }

    #[test]
    fn test_is_job_pod() {
        let labelled: Pod = serde_json::from_value(job_pod("job-pi-x1", "Succeeded")).unwrap();
        assert!(is_job_pod(&labelled, "job-pi", JobKind::Job));

        let cron: Pod =
            serde_json::from_value(pod_json("job-echo-28391-abcde", "jobs", json!({}), "Succeeded")).unwrap();
        assert!(is_job_pod(&cron, "job-echo", JobKind::CronJob));
        assert!(!is_job_pod(&cron, "job-echo", JobKind::Job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_job_completes() {
        let mock = MockService::new()
            .on_get(
                PODS,
                200,
                &list_json("PodList", vec![job_pod("job-pi-1", "Succeeded"), job_pod("job-pi-2", "Running")], None),
            )
            .on_get(
                PODS,
                200,
                &list_json("PodList", vec![job_pod("job-pi-1", "Succeeded"), job_pod("job-pi-2", "Succeeded")], None),
            )
            .on_get(JOB, 200, &job_json("Complete"));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let opts = OpOptions::new().with_pod_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let params = PollParams::new(CancellationToken::new(), Duration::from_secs(600));

        let pods = wait_for_job_completes(
            &mock.clone().into_client(),
            "jobs",
            "job-pi",
            JobKind::Job,
            2,
            &params,
            &opts,
        )
        .await
        .unwrap();

        assert_eq!(pods.len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(mock.count("GET", JOB), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_job_failed_condition() {
        let mock = MockService::new()
            .on_get(PODS, 200, &list_json("PodList", vec![job_pod("job-pi-1", "Succeeded")], None))
            .on_get(JOB, 200, &job_json("Failed"));
        let params = PollParams::new(CancellationToken::new(), Duration::from_secs(600));

        let result = wait_for_job_completes(
            &mock.into_client(),
            "jobs",
            "job-pi",
            JobKind::Job,
            1,
            &params,
            &OpOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(TesterError::WaitFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cron_job_completes() {
        let pods = vec![
            pod_json("job-echo-1-a", "jobs", json!({ "job-name": "job-echo-1" }), "Succeeded"),
            pod_json("other-1", "jobs", json!({}), "Succeeded"),
        ];
        let cron = json!({
            "apiVersion": "batch/v1",
            "kind": "CronJob",
            "metadata": { "name": "job-echo", "namespace": "jobs" },
            "spec": { "schedule": "*/10 * * * *", "jobTemplate": {} }
        })
        .to_string();
        let mock = MockService::new()
            .on_get(PODS, 200, &list_json("PodList", pods, None))
            .on_get("/apis/batch/v1/namespaces/jobs/cronjobs/job-echo", 200, &cron);
        let params = PollParams::new(CancellationToken::new(), Duration::from_secs(600));

        let pods = wait_for_job_completes(
            &mock.into_client(),
            "jobs",
            "job-echo",
            JobKind::CronJob,
            1,
            &params,
            &OpOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(pods.len(), 1);
    }
}
