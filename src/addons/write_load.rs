// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Write load on the API server: create a burst of small namespaced objects in
//! a fresh namespace and record the client-side latency of every write. The
//! ConfigMap and Secret add-ons only differ in the object they write.

use super::latency::{write_objects, Summary};
use super::{collect, default_namespace, delete_namespace, random_suffix, validate_common};
use crate::config::env::{EnvBinding, Field};
use crate::config::AddOnConfig;
use crate::constants::DEFAULT_MINIMUM_NODES;
use crate::error::{Result, TesterError};
use crate::kubernetes::create_namespace;
use crate::tester::{check_minimum_nodes, join_errors, Tester, TesterContext};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::PostParams;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::warn;

/// ConfigMaps and Secrets are capped at 1 MiB by the API server.
pub const MAX_OBJECT_SIZE: usize = 1024 * 1024;

/// An object kind the write loop can create.
pub trait WriteTarget:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Add-on name, also the prefix of the generated namespace
    const ADD_ON: &'static str;

    /// The `index`-th object of a run, carrying `value` as its only entry.
    fn object(namespace: &str, index: usize, value: &str) -> Self;

    /// Where the add-on's record lives in the run configuration.
    fn slot(cfg: &mut crate::config::Config) -> &mut Option<Config<Self>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, bound(serialize = "", deserialize = "K: WriteTarget"))]
pub struct Config<K> {
    pub enable: bool,
    pub minimum_nodes: i32,
    pub namespace: String,
    /// Number of objects to create
    pub objects: usize,
    /// Bytes of data per object
    pub object_size: usize,
    pub latency_summary: Summary,
    #[serde(skip)]
    kind: PhantomData<fn() -> K>,
}

impl<K: WriteTarget> Default for Config<K> {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(K::ADD_ON),
            objects: 10,
            object_size: 10 * 1024,
            latency_summary: Summary::default(),
            kind: PhantomData,
        }
    }
}

impl<K: WriteTarget> EnvBinding for Config<K> {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::bool("enable", &mut self.enable),
            Field::i32("minimum_nodes", &mut self.minimum_nodes),
            Field::string("namespace", &mut self.namespace),
            Field::usize("objects", &mut self.objects),
            Field::usize("object_size", &mut self.object_size),
            Field::nested("latency_summary", &mut self.latency_summary),
        ]
    }
}

impl<K: WriteTarget> AddOnConfig for Config<K> {
    fn enabled(&self) -> bool {
        self.enable
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enable = enabled;
    }

    fn validate_and_set_defaults(&mut self) -> Result<()> {
        let name = K::ADD_ON;
        validate_common(name, &self.namespace, self.minimum_nodes)?;
        if self.objects == 0 {
            return Err(TesterError::InvalidConfig(format!("{name}: objects must be positive")));
        }
        if self.object_size == 0 || self.object_size > MAX_OBJECT_SIZE {
            return Err(TesterError::InvalidConfig(format!(
                "{name}: object_size must be in 1..={MAX_OBJECT_SIZE} (got {})",
                self.object_size
            )));
        }
        Ok(())
    }
}

pub struct WriteLoadTester<K: WriteTarget> {
    ctx: TesterContext,
    cfg: Config<K>,
}

impl<K: WriteTarget> WriteLoadTester<K> {
    pub fn new(ctx: TesterContext, cfg: Config<K>) -> Self {
        Self { ctx, cfg }
    }

    pub fn config(&self) -> &Config<K> {
        &self.cfg
    }
}

#[async_trait]
impl<K: WriteTarget> Tester for WriteLoadTester<K> {
    fn name(&self) -> &str {
        K::ADD_ON
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

        let api: Api<K> = Api::namespaced(client.clone(), &namespace);
        let pp = PostParams::default();
        let value = random_suffix(self.cfg.object_size);
        let kind = K::kind(&());
        let writes = write_objects(&kind, &self.ctx.stop, self.cfg.objects, |i| {
            let obj = K::object(&namespace, i, &value);
            let (api, pp) = (api.clone(), pp.clone());
            async move { api.create(&pp, &obj).await }
        })
        .await;

        if writes.latencies.is_empty() {
            warn!(add_on = K::ADD_ON, "no latency collected");
            return Ok(());
        }
        self.cfg.latency_summary = writes.summary();
        self.ctx.progress.block(
            &format!("{} write latency", K::ADD_ON),
            &self.cfg.latency_summary.table(),
        );
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.cfg.enable {
            return Ok(());
        }
        let mut errs = Vec::new();
        collect(&mut errs, "namespace", delete_namespace(&self.ctx, &self.cfg.namespace).await);
        join_errors(errs)
    }

    fn record_outputs(&self, cfg: &mut crate::config::Config) {
        *K::slot(cfg) = Some(self.cfg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::{list_json, namespace_json, node_json, MockService};
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn test_default_namespace_follows_add_on() {
        let cfg = Config::<ConfigMap>::default();
        assert!(cfg.namespace.starts_with("configmaps-"));
    }

    #[test]
    fn test_validate_object_size() {
        let mut cfg = Config::<ConfigMap>::default();
        assert!(cfg.validate_and_set_defaults().is_ok());

        cfg.object_size = MAX_OBJECT_SIZE + 1;
        let err = cfg.validate_and_set_defaults().unwrap_err();
        assert!(err.to_string().contains("configmaps: object_size"));

        cfg.object_size = 1;
        cfg.objects = 0;
        assert!(cfg.validate_and_set_defaults().is_err());
    }

    #[tokio::test]
    async fn test_apply_stops_at_node_gate() {
        let mock = MockService::new()
            .on_get("/api/v1/nodes", 200, &list_json("NodeList", vec![node_json("a")], None))
            .on_post("/api/v1/namespaces", 201, &namespace_json("cm"));
        let mut cfg = Config::<ConfigMap>::default();
        cfg.enable = true;
        cfg.minimum_nodes = 2;

        let mut tester = WriteLoadTester::new(context(&mock), cfg);
        assert!(tester.apply().await.is_err());
        assert_eq!(mock.count("POST", "/api/v1/namespaces"), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_namespace() {
        let mock = MockService::new();
        let mut cfg = Config::<ConfigMap>::default();
        cfg.enable = true;
        cfg.namespace = "cm".to_string();

        let mut tester = WriteLoadTester::new(context(&mock), cfg);
        tester.delete().await.unwrap();
        assert!(mock.count("DELETE", "/api/v1/namespaces/cm") >= 1);
    }
}
