// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesterError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to build Kubernetes client: {0}")]
    KubeconfigError(String),

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: kube::Error,
    },

    #[error("{0} did not complete within {1:?}")]
    DeadlineExceeded(String, Duration),

    #[error("{0} aborted")]
    Aborted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("'{key}={value}' is 'read-only' field; should not be set")]
    ReadOnlyField { key: String, value: String },

    #[error("failed to parse {value:?} (environmental variable key {key:?}, error {reason})")]
    EnvParse {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to validate minimum nodes requirement {required} (nodes {found})")]
    MinimumNodes { required: i32, found: usize },

    #[error("{0}")]
    WaitFailed(String),

    #[error("{0}")]
    DeleteFailed(String),

    #[error("Failed to mint EKS token: {0}")]
    EksToken(String),

    #[error("kubectl failed: {0}")]
    Kubectl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TesterError {
    /// True when the error is an API "not found" answer, directly or after retries.
    pub fn is_not_found(&self) -> bool {
        match self {
            TesterError::KubeError(kube::Error::Api(resp))
            | TesterError::RetriesExhausted {
                source: kube::Error::Api(resp),
                ..
            } => resp.code == 404,
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TesterError::Aborted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TesterError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TesterError>;
