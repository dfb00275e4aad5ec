// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Drives the enabled add-ons: apply front to back, delete back to front.

use crate::addons::cloudwatch_agent::CloudwatchAgentTester;
use crate::addons::configmaps::ConfigMapsTester;
use crate::addons::fluent_bit::FluentBitTester;
use crate::addons::jobs_echo::JobsEchoTester;
use crate::addons::jobs_pi::JobsPiTester;
use crate::addons::kubernetes_dashboard::KubernetesDashboardTester;
use crate::addons::metrics_server::MetricsServerTester;
use crate::addons::nlb_hello_world::NlbHelloWorldTester;
use crate::addons::secrets::SecretsTester;
use crate::config::{AddOnConfig, Config};
use crate::error::{Result, TesterError};
use crate::tester::{check_minimum_nodes, Tester, TesterContext};
use crate::ui;
use tracing::{error, info, instrument, warn};

/// Instantiate a tester for every enabled add-on, in catalogue order.
pub fn build_testers(cfg: &Config, ctx: &TesterContext) -> Vec<Box<dyn Tester>> {
    fn enabled<T: AddOnConfig + Clone>(slot: &Option<T>) -> Option<T> {
        slot.as_ref().filter(|c| c.enabled()).cloned()
    }

    let mut testers: Vec<Box<dyn Tester>> = Vec::new();
    if let Some(c) = enabled(&cfg.add_on_cloudwatch_agent) {
        testers.push(Box::new(CloudwatchAgentTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_metrics_server) {
        testers.push(Box::new(MetricsServerTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_fluent_bit) {
        testers.push(Box::new(FluentBitTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_kubernetes_dashboard) {
        testers.push(Box::new(KubernetesDashboardTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_nlb_hello_world) {
        testers.push(Box::new(NlbHelloWorldTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_jobs_pi) {
        testers.push(Box::new(JobsPiTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_jobs_echo) {
        testers.push(Box::new(JobsEchoTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_cron_jobs_echo) {
        testers.push(Box::new(JobsEchoTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_configmaps) {
        testers.push(Box::new(ConfigMapsTester::new(ctx.clone(), c)));
    }
    if let Some(c) = enabled(&cfg.add_on_secrets) {
        testers.push(Box::new(SecretsTester::new(ctx.clone(), c)));
    }
    testers
}

pub struct Engine {
    cfg: Config,
    ctx: TesterContext,
    testers: Vec<Box<dyn Tester>>,
}

impl Engine {
    pub fn new(cfg: Config, ctx: TesterContext) -> Self {
        let testers = build_testers(&cfg, &ctx);
        Self::with_testers(cfg, ctx, testers)
    }

    pub fn with_testers(cfg: Config, ctx: TesterContext, testers: Vec<Box<dyn Tester>>) -> Self {
        info!(
            testers = ?testers.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            "assembled testers"
        );
        Self { cfg, ctx, testers }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn tester_names(&self) -> Vec<&str> {
        self.testers.iter().map(|t| t.name()).collect()
    }

    async fn confirm(&self, action: &str) -> Result<()> {
        if !self.cfg.prompt || !ui::is_interactive() {
            return Ok(());
        }
        let details = format!(
            "{:?} on cluster {:?} (config {:?})",
            self.tester_names(),
            self.cfg.cluster_name,
            self.cfg.config_path
        );
        if ui::confirm(action, &details).await? {
            Ok(())
        } else {
            warn!(action, "cancelled by user");
            Err(TesterError::Cancelled)
        }
    }

    /// Apply every tester in order, stopping at the first failure.
    ///
    /// Nothing is reverted on failure; the caller decides whether to run
    /// [`Engine::delete`].
    #[instrument(skip(self), fields(cluster = %self.cfg.cluster_name))]
    pub async fn apply(&mut self) -> Result<()> {
        self.confirm("apply").await?;

        let nodes = check_minimum_nodes(&self.ctx.client, self.cfg.minimum_nodes).await?;
        self.cfg.total_nodes = i32::try_from(nodes).unwrap_or(i32::MAX);
        self.cfg.sync()?;

        let progress = self.ctx.progress.clone();
        let stop = self.ctx.stop.clone();
        for (idx, tester) in self.testers.iter_mut().enumerate() {
            let name = tester.name().to_string();
            progress.banner(&format!("testers[{idx:02}].Apply [{name}]"));

            let result = tokio::select! {
                result = tester.apply() => result,
                _ = stop.cancelled() => Err(TesterError::Aborted(format!("{name} apply"))),
            };
            if let Err(err) = result {
                error!(tester = %name, error = %err, "apply failed");
                progress.failure(&format!("testers[{idx:02}].Apply [{name}] FAIL ({err})"));
                return Err(err);
            }

            progress.success(&format!("testers[{idx:02}].Apply [{name}] SUCCESS"));
            tester.record_outputs(&mut self.cfg);
            self.cfg.sync()?;
        }
        info!(testers = self.testers.len(), "apply complete");
        Ok(())
    }

    /// Delete every tester in reverse order, collecting failures.
    #[instrument(skip(self), fields(cluster = %self.cfg.cluster_name))]
    pub async fn delete(&mut self) -> Result<()> {
        self.confirm("delete").await?;

        let progress = self.ctx.progress.clone();
        let stop = self.ctx.stop.clone();
        let mut errs = Vec::new();
        for (idx, tester) in self.testers.iter_mut().enumerate().rev() {
            let name = tester.name().to_string();
            progress.banner(&format!("testers[{idx:02}].Delete [{name}]"));

            let result = tokio::select! {
                result = tester.delete() => result,
                _ = stop.cancelled() => Err(TesterError::Aborted(format!("{name} delete"))),
            };
            match result {
                Ok(()) => progress.success(&format!("testers[{idx:02}].Delete [{name}] SUCCESS")),
                Err(err) if err.is_not_found() => {
                    info!(tester = %name, "already deleted");
                    progress.success(&format!("testers[{idx:02}].Delete [{name}] SUCCESS (not found)"));
                }
                Err(err) => {
                    error!(tester = %name, error = %err, "delete failed");
                    progress.failure(&format!("testers[{idx:02}].Delete [{name}] FAIL ({err})"));
                    errs.push(format!("{name}: {err}"));
                }
            }
        }

        if !self.cfg.config_path.is_empty() {
            self.cfg.sync()?;
        }
        if errs.is_empty() {
            info!(testers = self.testers.len(), "delete complete");
            Ok(())
        } else {
            Err(TesterError::DeleteFailed(errs.join(", ")))
        }
    }
}
