// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Write load on the API server through a burst of opaque Secrets.

use super::random_suffix;
use super::write_load::{self, WriteLoadTester, WriteTarget};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const NAME: &str = "secrets";

pub type Config = write_load::Config<Secret>;
pub type SecretsTester = WriteLoadTester<Secret>;

impl WriteTarget for Secret {
    const ADD_ON: &'static str = NAME;

    fn object(namespace: &str, index: usize, value: &str) -> Self {
        let key = format!("secret{index}{}", random_suffix(7));
        Secret {
            metadata: ObjectMeta {
                name: Some(key.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([("name".to_string(), key.clone())])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([(key, ByteString(value.as_bytes().to_vec()))])),
            ..Default::default()
        }
    }

    fn slot(cfg: &mut crate::config::Config) -> &mut Option<Config> {
        &mut cfg.add_on_secrets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::testing::context;
    use crate::test_utils::{list_json, namespace_json, node_json, MockService};
    use crate::tester::Tester;
    use crate::ui::capture::Captured;
    use serde_json::json;

    const SECRETS: &str = "/api/v1/namespaces/sec/secrets";

    #[test]
    fn test_secret_shape() {
        let s = Secret::object("sec", 0, "xyz");
        let name = s.metadata.name.clone().unwrap();
        assert!(name.starts_with("secret0"));
        assert_eq!(s.type_.as_deref(), Some("Opaque"));
        assert_eq!(s.data.unwrap().get(&name).map(|b| b.0.clone()), Some(b"xyz".to_vec()));
    }

    #[tokio::test]
    async fn test_apply_counts_failed_writes() {
        let created = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "secret0", "namespace": "sec" }
        })
        .to_string();
        let forbidden = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": "exceeded quota",
            "reason": "Forbidden",
            "code": 403
        })
        .to_string();
        let mock = MockService::new()
            .on_get("/api/v1/nodes", 200, &list_json("NodeList", vec![node_json("a")], None))
            .on_post("/api/v1/namespaces", 201, &namespace_json("sec"))
            .on_post(SECRETS, 201, &created)
            .on_post(SECRETS, 403, &forbidden);

        let captured = Captured::default();
        let mut ctx = context(&mock);
        ctx.progress = captured.progress();
        let mut cfg = Config::default();
        cfg.enable = true;
        cfg.namespace = "sec".to_string();
        cfg.objects = 3;
        cfg.object_size = 8;
        let mut tester = SecretsTester::new(ctx, cfg);
        tester.apply().await.unwrap();

        let summary = &tester.config().latency_summary;
        assert_eq!(summary.success_total, 1);
        assert_eq!(summary.failure_total, 2);
        assert!(captured.text().contains("secrets write latency"));
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let mock = MockService::new();
        let mut tester = SecretsTester::new(context(&mock), Config::default());
        tester.apply().await.unwrap();
        tester.delete().await.unwrap();
        assert!(mock.requests().is_empty());
    }
}
