// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use k8s_tester::config::Config;
use k8s_tester::constants::log;
use k8s_tester::engine::Engine;
use k8s_tester::kubectl::Kubectl;
use k8s_tester::kubernetes::create_client;
use k8s_tester::tester::TesterContext;
use k8s_tester::ui::Progress;

/// Install test add-ons on a Kubernetes cluster and tear them down again.
#[derive(Parser, Debug)]
#[command(name = "k8s-tester", version)]
struct Cli {
    /// Configuration document; created with defaults when missing
    #[arg(short, long, global = true, env = "K8S_TESTER_CONFIG_PATH")]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Apply every enabled add-on, in order
    Apply,
    /// Delete every enabled add-on, in reverse order
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = load_config(cli.path.as_deref()).context("failed to prepare configuration")?;
    init_tracing(&cfg).context("failed to initialize logging")?;
    info!(path = %cfg.config_path, cluster = %cfg.cluster_name, command = ?cli.command, "starting k8s-tester");

    let client = create_client(&cfg).await.context("failed to create Kubernetes client")?;
    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone());

    let progress = Progress::stderr(cfg.log_color_enabled());
    let kubectl = Kubectl::new(&cfg.kubectl_path, &cfg.kubeconfig_path, &cfg.kubeconfig_context);
    let ctx = TesterContext::new(client, stop, progress.clone(), kubectl);
    let mut engine = Engine::new(cfg, ctx);

    match cli.command {
        Command::Apply => {
            if let Err(e) = engine.apply().await {
                progress.failure(&format!(
                    "apply failed; clean up with: k8s-tester delete --path {}",
                    engine.config().config_path
                ));
                return Err(e).context("apply failed");
            }
            progress.success(&format!(
                "apply complete; delete with: k8s-tester delete --path {}",
                engine.config().config_path
            ));
        }
        Command::Delete => {
            engine.delete().await.context("delete failed")?;
            progress.success("delete complete");
        }
    }
    Ok(())
}

/// Load the document at `path`, or start from defaults when it does not exist,
/// then overlay the environment, validate and persist.
fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let mut cfg = match path {
        Some(p) if p.exists() => Config::load(p).with_context(|| format!("failed to load {}", p.display()))?,
        Some(p) => {
            let mut cfg = Config::new_default();
            cfg.config_path = p.to_string_lossy().into_owned();
            cfg
        }
        None => Config::new_default(),
    };
    cfg.update_from_envs().context("failed to apply environment overrides")?;
    cfg.validate_and_set_defaults().context("invalid configuration")?;
    cfg.sync().context("failed to write configuration")?;
    Ok(cfg)
}

fn init_tracing(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new(log::DEFAULT_LEVEL));
    let ansi = cfg.log_color_enabled();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    for output in &cfg.log_outputs {
        let layer = match output.as_str() {
            log::STDERR => fmt::layer().with_writer(std::io::stderr).with_ansi(ansi).boxed(),
            log::STDOUT => fmt::layer().with_writer(std::io::stdout).with_ansi(ansi).boxed(),
            file => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file)
                    .with_context(|| format!("failed to open log file {file}"))?;
                fmt::layer().with_writer(Mutex::new(file)).with_ansi(false).boxed()
            }
        };
        layers.push(layer);
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init()?;
    Ok(())
}

/// Cancel `stop` on SIGINT or SIGTERM; in-flight waits observe it and abort.
fn spawn_signal_handler(stop: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => warn!("received Ctrl+C, stopping"),
            () = terminate => warn!("received SIGTERM, stopping"),
        }
        stop.cancel();
    });
}
