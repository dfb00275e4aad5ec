// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Node agents deployed as a DaemonSet with its own service account, cluster
//! role and configuration. Shared by the CloudWatch agent and Fluent Bit.

use super::collect;
use crate::error::Result;
use crate::kubernetes::delete::{
    delete_cluster_role, delete_cluster_role_binding, delete_config_map, delete_daemon_set, delete_service_account,
};
use crate::kubernetes::{create_object, wait_for_daemon_set_completes, OpOptions};
use crate::tester::TesterContext;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::api::ObjectMeta;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub fn service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| Some(items.iter().map(|s| s.to_string()).collect());
    PolicyRule {
        api_groups: owned(api_groups),
        resources: owned(resources),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

pub fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

pub fn cluster_role_binding(name: &str, role: &str, service_account: &str, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

pub fn config_map(name: &str, namespace: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Everything one agent needs, created in this order and deleted in reverse.
pub struct AgentResources {
    pub service_account: ServiceAccount,
    pub cluster_role: ClusterRole,
    pub cluster_role_binding: ClusterRoleBinding,
    pub config_map: ConfigMap,
    pub daemon_set: DaemonSet,
}

impl AgentResources {
    pub async fn apply(&self, ctx: &TesterContext, namespace: &str, timeout: Duration) -> Result<()> {
        let client = &ctx.client;
        create_object(
            &Api::<ServiceAccount>::namespaced(client.clone(), namespace),
            "ServiceAccount",
            &self.service_account,
        )
        .await?;
        create_object(&Api::<ClusterRole>::all(client.clone()), "ClusterRole", &self.cluster_role).await?;
        create_object(
            &Api::<ClusterRoleBinding>::all(client.clone()),
            "ClusterRoleBinding",
            &self.cluster_role_binding,
        )
        .await?;
        create_object(
            &Api::<ConfigMap>::namespaced(client.clone(), namespace),
            "ConfigMap",
            &self.config_map,
        )
        .await?;
        create_object(
            &Api::<DaemonSet>::namespaced(client.clone(), namespace),
            "DaemonSet",
            &self.daemon_set,
        )
        .await?;

        let name = self.daemon_set.name_any();
        let opts = OpOptions::new().with_query_fn(ctx.describe_query("daemonset", &name, namespace));
        let ds = wait_for_daemon_set_completes(client, namespace, &name, &ctx.poll(timeout), &opts).await?;
        info!(
            namespace,
            name = %name,
            ready = ds.status.map(|s| s.number_ready).unwrap_or_default(),
            "daemonset ready"
        );
        Ok(())
    }

    /// Delete in reverse creation order, appending failures to `errs`.
    pub async fn delete(&self, ctx: &TesterContext, namespace: &str, errs: &mut Vec<String>) {
        let client = &ctx.client;
        collect(
            errs,
            "DaemonSet",
            delete_daemon_set(client, namespace, &self.daemon_set.name_any()).await,
        );
        collect(
            errs,
            "ConfigMap",
            delete_config_map(client, namespace, &self.config_map.name_any()).await,
        );
        collect(
            errs,
            "ClusterRoleBinding",
            delete_cluster_role_binding(client, &self.cluster_role_binding.name_any()).await,
        );
        collect(
            errs,
            "ClusterRole",
            delete_cluster_role(client, &self.cluster_role.name_any()).await,
        );
        collect(
            errs,
            "ServiceAccount",
            delete_service_account(client, namespace, &self.service_account.name_any()).await,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_role_binding_targets_service_account() {
        let crb = cluster_role_binding("agent-binding", "agent-role", "agent", "monitoring");
        assert_eq!(crb.role_ref.name, "agent-role");
        let subject = &crb.subjects.unwrap()[0];
        assert_eq!(subject.name, "agent");
        assert_eq!(subject.namespace.as_deref(), Some("monitoring"));
    }

    #[test]
    fn test_rule() {
        let r = rule(&[""], &["pods", "nodes"], &["get", "list", "watch"]);
        assert_eq!(r.api_groups, Some(vec!["".to_string()]));
        assert_eq!(r.resources.unwrap().len(), 2);
        assert_eq!(r.verbs.len(), 3);
    }
}
