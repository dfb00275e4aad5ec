// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::call;
use crate::error::Result;
use crate::retry::{retry_call, Policy};
use kube::{api::PostParams, Api, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::info;

/// Create an object, treating "already exists" as success.
pub async fn create_object<K>(api: &Api<K>, kind: &str, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.name_any();
    info!(kind, name = %name, "creating");

    let pp = PostParams::default();
    let policy = Policy::allow_already_exists();
    match retry_call(&policy, || call(api.create(&pp, obj))).await? {
        Some(_) => info!(kind, name = %name, "created"),
        None => info!(kind, name = %name, "already exists"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{already_exists_json, MockService};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("app-config".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_object_tolerates_existing() {
        let mock = MockService::new().on_post(
            "/api/v1/namespaces/ns/configmaps",
            409,
            &already_exists_json("configmaps", "app-config"),
        );
        let api: Api<ConfigMap> = Api::namespaced(mock.clone().into_client(), "ns");

        create_object(&api, "ConfigMap", &config_map()).await.unwrap();
        assert_eq!(mock.count("POST", "/api/v1/namespaces/ns/configmaps"), 1);
    }

    #[tokio::test]
    async fn test_create_object_surfaces_invalid() {
        let body = serde_json::json!({
            "kind": "Status", "apiVersion": "v1", "status": "Failure",
            "message": "ConfigMap is invalid", "reason": "Invalid", "code": 422
        })
        .to_string();
        let mock = MockService::new().on_post("/api/v1/namespaces/ns/configmaps", 422, &body);
        let api: Api<ConfigMap> = Api::namespaced(mock.into_client(), "ns");

        assert!(create_object(&api, "ConfigMap", &config_map()).await.is_err());
    }
}
