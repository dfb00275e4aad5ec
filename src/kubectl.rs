// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! `kubectl` invocations used to dump server-side state while waiting.

use crate::error::{Result, TesterError};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct Kubectl {
    pub path: String,
    pub kubeconfig: String,
    pub context: String,
}

impl Kubectl {
    pub fn new(path: &str, kubeconfig: &str, context: &str) -> Self {
        Self {
            path: path.to_string(),
            kubeconfig: kubeconfig.to_string(),
            context: context.to_string(),
        }
    }

    /// Full argument vector, binary first.
    pub fn describe_args(&self, kind: &str, name: &str, namespace: &str) -> Vec<String> {
        let binary = if self.path.is_empty() { "kubectl" } else { &self.path };
        let mut args = vec![binary.to_string()];
        if !self.kubeconfig.is_empty() {
            args.push(format!("--kubeconfig={}", self.kubeconfig));
        }
        if !self.context.is_empty() {
            args.push(format!("--context={}", self.context));
        }
        args.extend(["describe".to_string(), kind.to_string(), name.to_string()]);
        if !namespace.is_empty() {
            args.push(format!("--namespace={namespace}"));
        }
        args
    }

    /// Run `kubectl describe` and return its combined output.
    pub async fn describe(&self, kind: &str, name: &str, namespace: &str) -> Result<String> {
        let args = self.describe_args(kind, name, namespace);
        let command = args.join(" ");
        debug!(%command, "running kubectl");

        let output = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(DESCRIBE_TIMEOUT, output)
            .await
            .map_err(|_| TesterError::Kubectl(format!("'{command}' timed out")))?
            .map_err(|e| TesterError::Kubectl(format!("'{command}' failed to start: {e}")))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            warn!(%command, status = %output.status, "kubectl returned an error");
            return Err(TesterError::Kubectl(format!("'{command}' exited with {}: {}", output.status, text.trim())));
        }
        Ok(text)
    }
}
