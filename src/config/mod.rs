// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Run configuration: a YAML document overlaid with `K8S_TESTER_*` variables.

pub mod env;

use crate::addons::{
    cloudwatch_agent, configmaps, fluent_bit, jobs_echo, jobs_pi, kubernetes_dashboard, metrics_server, nlb_hello_world,
    secrets,
};
use crate::constants::{client, log, CONFIG_FILE_SUFFIX, DEFAULT_MINIMUM_NODES, ENV_PREFIX};
use crate::error::{Result, TesterError};
use crate::kubernetes::eks::EksSettings;
use env::{apply_env, EnvBinding, Field, Lookup};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Contract shared by the per add-on configuration records.
pub trait AddOnConfig: EnvBinding + Default {
    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
    /// Called only for enabled add-ons.
    fn validate_and_set_defaults(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Serializes writes of the document to disk
    #[serde(skip)]
    sync_lock: Arc<RwLock<()>>,

    pub prompt: bool,

    pub cluster_name: String,
    pub config_path: String,

    pub log_color: bool,
    /// "true" or "false" forces colors regardless of `log_color`
    pub log_color_override: String,
    pub log_level: String,
    pub log_outputs: Vec<String>,

    pub kubectl_path: String,
    pub kubeconfig_path: String,
    pub kubeconfig_context: String,

    pub client_qps: f32,
    pub client_burst: u32,
    #[serde(with = "humantime_serde")]
    pub client_timeout: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_timeout_string: String,

    pub minimum_nodes: i32,
    /// Node count observed by the last run
    pub total_nodes: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eks: Option<EksSettings>,

    pub add_on_cloudwatch_agent: Option<cloudwatch_agent::Config>,
    pub add_on_metrics_server: Option<metrics_server::Config>,
    pub add_on_fluent_bit: Option<fluent_bit::Config>,
    pub add_on_kubernetes_dashboard: Option<kubernetes_dashboard::Config>,
    pub add_on_nlb_hello_world: Option<nlb_hello_world::Config>,
    pub add_on_jobs_pi: Option<jobs_pi::Config>,
    pub add_on_jobs_echo: Option<jobs_echo::Config>,
    pub add_on_cron_jobs_echo: Option<jobs_echo::Config>,
    pub add_on_configmaps: Option<configmaps::Config>,
    pub add_on_secrets: Option<secrets::Config>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_lock: Arc::default(),
            prompt: true,
            cluster_name: String::new(),
            config_path: String::new(),
            log_color: true,
            log_color_override: String::new(),
            log_level: log::DEFAULT_LEVEL.to_string(),
            log_outputs: vec![log::STDERR.to_string()],
            kubectl_path: String::new(),
            kubeconfig_path: String::new(),
            kubeconfig_context: String::new(),
            client_qps: client::DEFAULT_QPS,
            client_burst: client::DEFAULT_BURST,
            client_timeout: client::DEFAULT_TIMEOUT,
            client_timeout_string: String::new(),
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            total_nodes: 0,
            eks: None,
            add_on_cloudwatch_agent: Some(Default::default()),
            add_on_metrics_server: Some(Default::default()),
            add_on_fluent_bit: Some(Default::default()),
            add_on_kubernetes_dashboard: Some(Default::default()),
            add_on_nlb_hello_world: Some(Default::default()),
            add_on_jobs_pi: Some(Default::default()),
            add_on_jobs_echo: Some(jobs_echo::Config::job()),
            add_on_cron_jobs_echo: Some(jobs_echo::Config::cron_job()),
            add_on_configmaps: Some(Default::default()),
            add_on_secrets: Some(Default::default()),
        }
    }
}

impl EnvBinding for Config {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("prompt", &mut self.prompt),
            Field::string("cluster_name", &mut self.cluster_name),
            Field::string("config_path", &mut self.config_path),
            Field::bool("log_color", &mut self.log_color),
            Field::string("log_color_override", &mut self.log_color_override),
            Field::string("log_level", &mut self.log_level),
            Field::list("log_outputs", &mut self.log_outputs),
            Field::string("kubectl_path", &mut self.kubectl_path),
            Field::string("kubeconfig_path", &mut self.kubeconfig_path),
            Field::string("kubeconfig_context", &mut self.kubeconfig_context),
            Field::f32("client_qps", &mut self.client_qps),
            Field::u32("client_burst", &mut self.client_burst),
            Field::duration("client_timeout", &mut self.client_timeout),
            Field::string("client_timeout_string", &mut self.client_timeout_string).read_only(),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::i32("total_nodes", &mut self.total_nodes).read_only(),
            Field::record("eks", &mut self.eks),
            Field::add_on("add_on_cloudwatch_agent", &mut self.add_on_cloudwatch_agent),
            Field::add_on("add_on_metrics_server", &mut self.add_on_metrics_server),
            Field::add_on("add_on_fluent_bit", &mut self.add_on_fluent_bit),
            Field::add_on("add_on_kubernetes_dashboard", &mut self.add_on_kubernetes_dashboard),
            Field::add_on("add_on_nlb_hello_world", &mut self.add_on_nlb_hello_world),
            Field::add_on("add_on_jobs_pi", &mut self.add_on_jobs_pi),
            Field::add_on_with("add_on_jobs_echo", &mut self.add_on_jobs_echo, jobs_echo::Config::job),
            Field::add_on_with(
                "add_on_cron_jobs_echo",
                &mut self.add_on_cron_jobs_echo,
                jobs_echo::Config::cron_job,
            ),
            Field::add_on("add_on_configmaps", &mut self.add_on_configmaps),
            Field::add_on("add_on_secrets", &mut self.add_on_secrets),
        ]
    }
}

impl Config {
    /// Defaults with a generated cluster name, for runs without a document.
    pub fn new_default() -> Self {
        Self {
            cluster_name: format!("k8s-{}-{}", unix_timestamp(), crate::addons::random_suffix(12)),
            ..Self::default()
        }
    }

    /// Read the document at `path`, pin `config_path` to its absolute location
    /// and write the normalized document back.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = absolute(path.as_ref())?;
        let raw = std::fs::read_to_string(&path)?;
        let mut cfg: Config = serde_yaml::from_str(&raw)?;
        cfg.config_path = path.to_string_lossy().into_owned();
        cfg.sync()?;
        info!(path = %cfg.config_path, cluster = %cfg.cluster_name, "loaded configuration");
        Ok(cfg)
    }

    /// Persist the document, replacing the previous version atomically.
    pub fn sync(&self) -> Result<()> {
        if self.config_path.is_empty() {
            return Err(TesterError::InvalidConfig("empty config path".to_string()));
        }
        let _guard = self.sync_lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let path = PathBuf::from(&self.config_path);
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");

        let doc = serde_yaml::to_string(self)?;
        std::fs::write(&staging, doc)?;
        std::fs::rename(&staging, &path)?;
        debug!(path = %self.config_path, "synced configuration");
        Ok(())
    }

    /// Overlay `K8S_TESTER_*` variables from the process environment.
    pub fn update_from_envs(&mut self) -> Result<()> {
        self.update_from_envs_with(&|key| std::env::var(key).ok())
    }

    pub fn update_from_envs_with(&mut self, lookup: Lookup<'_>) -> Result<()> {
        let set = apply_env(ENV_PREFIX, self, lookup)?;
        debug!(set, "applied environment overrides");
        Ok(())
    }

    pub fn validate_and_set_defaults(&mut self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(TesterError::InvalidConfig("cluster_name is empty".to_string()));
        }
        if self.cluster_name != self.cluster_name.to_lowercase() {
            return Err(TesterError::InvalidConfig(format!(
                "cluster_name {:?} must be in lower-case",
                self.cluster_name
            )));
        }

        if self.client_qps < 0.0 {
            return Err(TesterError::InvalidConfig(format!(
                "client_qps must be positive (got {})",
                self.client_qps
            )));
        }
        if self.client_qps == 0.0 {
            self.client_qps = client::DEFAULT_QPS;
        }
        if self.client_burst == 0 {
            self.client_burst = client::DEFAULT_BURST;
        }
        if self.client_timeout.is_zero() {
            self.client_timeout = client::DEFAULT_TIMEOUT;
        }
        self.client_timeout_string = humantime::format_duration(self.client_timeout).to_string();

        if self.minimum_nodes < 0 {
            return Err(TesterError::InvalidConfig(format!(
                "minimum_nodes must be non-negative (got {})",
                self.minimum_nodes
            )));
        }

        let config_path = if self.config_path.is_empty() {
            std::env::current_dir()?.join(format!("{}{}", self.cluster_name, CONFIG_FILE_SUFFIX))
        } else {
            absolute(Path::new(&self.config_path))?
        };
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.config_path = config_path.to_string_lossy().into_owned();

        if !self.kubeconfig_path.is_empty() {
            self.kubeconfig_path = absolute(Path::new(&self.kubeconfig_path))?
                .to_string_lossy()
                .into_owned();
        }

        if self.log_level.is_empty() {
            self.log_level = log::DEFAULT_LEVEL.to_string();
        }
        let log_file = format!("{}.log", self.config_path.trim_end_matches(".yaml"));
        if !self.log_outputs.contains(&log_file) {
            self.log_outputs.push(log_file);
        }

        if let Some(cw) = self.add_on_cloudwatch_agent.as_mut() {
            if cw.cluster_name.is_empty() {
                cw.cluster_name = self.cluster_name.clone();
            }
        }
        validate_add_on(&mut self.add_on_cloudwatch_agent)?;
        validate_add_on(&mut self.add_on_metrics_server)?;
        validate_add_on(&mut self.add_on_fluent_bit)?;
        validate_add_on(&mut self.add_on_kubernetes_dashboard)?;
        validate_add_on(&mut self.add_on_nlb_hello_world)?;
        validate_add_on(&mut self.add_on_jobs_pi)?;
        validate_add_on(&mut self.add_on_jobs_echo)?;
        validate_add_on(&mut self.add_on_cron_jobs_echo)?;
        validate_add_on(&mut self.add_on_configmaps)?;
        validate_add_on(&mut self.add_on_secrets)?;
        Ok(())
    }

    /// Whether log lines carry ANSI colors.
    pub fn log_color_enabled(&self) -> bool {
        match self.log_color_override.as_str() {
            "true" => true,
            "false" => false,
            _ => self.log_color,
        }
    }

    /// Path of the log file every run writes next to the document.
    pub fn log_file_path(&self) -> Option<&str> {
        self.log_outputs
            .iter()
            .map(String::as_str)
            .find(|output| output.ends_with(".log"))
    }
}

fn validate_add_on<T: AddOnConfig>(slot: &mut Option<T>) -> Result<()> {
    match slot {
        Some(cfg) if cfg.enabled() => cfg.validate_and_set_defaults(),
        _ => Ok(()),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
