// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Write load on the API server through a burst of ConfigMaps.

use super::random_suffix;
use super::write_load::{self, WriteLoadTester, WriteTarget};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const NAME: &str = "configmaps";

pub type Config = write_load::Config<ConfigMap>;
pub type ConfigMapsTester = WriteLoadTester<ConfigMap>;

impl WriteTarget for ConfigMap {
    const ADD_ON: &'static str = NAME;

    fn object(namespace: &str, index: usize, value: &str) -> Self {
        let key = format!("configmap{index}{}", random_suffix(7));
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(key.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([("name".to_string(), key.clone())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(key, value.to_string())])),
            ..Default::default()
        }
    }

    fn slot(cfg: &mut crate::config::Config) -> &mut Option<Config> {
        &mut cfg.add_on_configmaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::{list_json, namespace_json, node_json, MockService};
    use crate::tester::Tester;
    use serde_json::json;

    const CONFIG_MAPS: &str = "/api/v1/namespaces/cm/configmaps";

    #[test]
    fn test_config_map_shape() {
        let cm = ConfigMap::object("cm", 3, "abc");
        let name = cm.metadata.name.clone().unwrap();
        assert!(name.starts_with("configmap3"));
        assert_eq!(name.len(), "configmap3".len() + 7);
        assert_eq!(cm.data.unwrap().get(&name).map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn test_apply_records_latency_summary() {
        let created = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "configmap0", "namespace": "cm" }
        })
        .to_string();
        let mock = MockService::new()
            .on_get("/api/v1/nodes", 200, &list_json("NodeList", vec![node_json("a")], None))
            .on_post("/api/v1/namespaces", 201, &namespace_json("cm"))
            .on_post(CONFIG_MAPS, 201, &created);

        let mut cfg = Config::default();
        cfg.enable = true;
        cfg.namespace = "cm".to_string();
        cfg.objects = 4;
        cfg.object_size = 16;
        let mut tester = ConfigMapsTester::new(context(&mock), cfg);
        tester.apply().await.unwrap();

        assert_eq!(mock.count("POST", CONFIG_MAPS), 4);
        let mut run = crate::config::Config::default();
        tester.record_outputs(&mut run);
        let summary = &run.add_on_configmaps.as_ref().unwrap().latency_summary;
        assert_eq!(summary.success_total, 4);
        assert_eq!(summary.failure_total, 0);
        assert!(!summary.test_id.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = ConfigMapsTester::new(context(&mock), Config::default());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
