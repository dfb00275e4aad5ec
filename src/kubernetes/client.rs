// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client creation from kubeconfig, EKS endpoint, in-cluster or inferred configuration

use super::eks::{EksSettings, TokenSource};
use crate::config::Config;
use crate::error::{Result, TesterError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::client::ClientBuilder;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KConfig};
use serde_json::json;
use std::time::Duration;
use tower::limit::{ConcurrencyLimitLayer, RateLimitLayer};
use tower::util::{option_layer, MapRequestLayer};
use tracing::{info, instrument, warn};

/// Where the client configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Kubeconfig,
    Eks,
    InCluster,
    Inferred,
}

/// Create the shared client for a run, applying the configured tuning.
#[instrument(skip(cfg))]
pub async fn create_client(cfg: &Config) -> Result<Client> {
    let (mut kconfig, source) = resolve_config(cfg).await?;
    info!(source = ?source, cluster_url = %kconfig.cluster_url, "resolved client configuration");

    kconfig.connect_timeout = Some(cfg.client_timeout);
    kconfig.read_timeout = Some(cfg.client_timeout);
    kconfig.write_timeout = Some(cfg.client_timeout);

    let token = match (source, cfg.eks.as_ref()) {
        (ConfigSource::Eks, Some(eks)) => Some(TokenSource::start(eks).await?),
        _ => None,
    };
    let authorize = token.map(|source| MapRequestLayer::new(move |req| source.authorize(req)));

    let client = ClientBuilder::try_from(kconfig)
        .map_err(|e| TesterError::KubeconfigError(format!("Failed to create client: {}", e)))?
        .with_layer(&option_layer(authorize))
        .with_layer(&ConcurrencyLimitLayer::new(cfg.client_burst.max(1) as usize))
        .with_layer(&RateLimitLayer::new(requests_per_second(cfg.client_qps), Duration::from_secs(1)))
        .build();
    Ok(client)
}

fn requests_per_second(qps: f32) -> u64 {
    qps.ceil().max(1.0) as u64
}

/// Try kubeconfig, then the EKS endpoint, then in-cluster, then inferred defaults.
async fn resolve_config(cfg: &Config) -> Result<(KConfig, ConfigSource)> {
    if !cfg.kubeconfig_path.is_empty() {
        match from_kubeconfig(&cfg.kubeconfig_path, &cfg.kubeconfig_context).await {
            Ok(kconfig) => return Ok((kconfig, ConfigSource::Kubeconfig)),
            Err(e) => warn!(path = %cfg.kubeconfig_path, error = %e, "failed to load kubeconfig"),
        }
    }

    if let Some(eks) = cfg.eks.as_ref().filter(|eks| eks.is_complete()) {
        match from_eks(eks).await {
            Ok(kconfig) => return Ok((kconfig, ConfigSource::Eks)),
            Err(e) => warn!(cluster = %eks.cluster_name, error = %e, "failed to build EKS configuration"),
        }
    }

    match KConfig::incluster() {
        Ok(kconfig) => return Ok((kconfig, ConfigSource::InCluster)),
        Err(e) => warn!(error = %e, "in-cluster configuration unavailable"),
    }

    KConfig::infer()
        .await
        .map(|kconfig| (kconfig, ConfigSource::Inferred))
        .map_err(|e| TesterError::KubeconfigError(format!("Failed to infer config: {}", e)))
}

async fn from_kubeconfig(path: &str, context: &str) -> Result<KConfig> {
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| TesterError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))?;

    let options = KubeConfigOptions {
        context: (!context.is_empty()).then(|| context.to_string()),
        ..Default::default()
    };
    KConfig::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| TesterError::KubeconfigError(format!("Failed to create config: {}", e)))
}

/// Describe the EKS endpoint as a one-cluster kubeconfig; kube decodes the CA
/// bundle. Credentials come from the token layer.
async fn from_eks(eks: &EksSettings) -> Result<KConfig> {
    let mut cluster = json!({ "server": eks.cluster_api_server_endpoint });
    if !eks.cluster_ca_decoded.is_empty() {
        cluster["certificate-authority-data"] = json!(STANDARD.encode(&eks.cluster_ca_decoded));
    }
    let kubeconfig: Kubeconfig = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": eks.cluster_name, "cluster": cluster }],
        "users": [{ "name": eks.cluster_name, "user": {} }],
        "contexts": [{
            "name": eks.cluster_name,
            "context": { "cluster": eks.cluster_name, "user": eks.cluster_name }
        }],
        "current-context": eks.cluster_name
    }))
    .map_err(|e| TesterError::KubeconfigError(format!("Invalid EKS settings: {}", e)))?;

    KConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| TesterError::KubeconfigError(format!("Failed to create EKS config: {}", e)))
}
