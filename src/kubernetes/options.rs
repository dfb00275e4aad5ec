// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-call options for list, delete and wait operations.

use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Called on every poll tick, typically to dump cluster state.
pub type QueryFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`QueryFn`].
pub fn query_fn<F, Fut>(f: F) -> QueryFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Called for every Pod a waiter observes.
pub type PodFn = Arc<dyn Fn(&Pod) + Send + Sync>;

/// Options bundle carried into a single operation. Built per call, never shared.
#[derive(Clone, Default)]
pub struct OpOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub pod_fn: Option<PodFn>,
    pub query_fn: Option<QueryFn>,
    pub force_delete: bool,
    pub force_delete_fn: Option<QueryFn>,
}

impl OpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn with_pod_fn(mut self, f: impl Fn(&Pod) + Send + Sync + 'static) -> Self {
        self.pod_fn = Some(Arc::new(f));
        self
    }

    pub fn with_query_fn(mut self, f: QueryFn) -> Self {
        self.query_fn = Some(f);
        self
    }

    pub fn with_force_delete(mut self, force: bool) -> Self {
        self.force_delete = force;
        self
    }

    pub fn with_force_delete_fn(mut self, f: QueryFn) -> Self {
        self.force_delete_fn = Some(f);
        self
    }

    /// Apply the selectors to list parameters
    pub(crate) fn list_params(&self, limit: u32) -> ListParams {
        let mut lp = ListParams::default().limit(limit);
        if let Some(labels) = &self.label_selector {
            lp = lp.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            lp = lp.fields(fields);
        }
        lp
    }

    pub(crate) async fn run_query(&self) {
        if let Some(query) = &self.query_fn {
            query().await;
        }
    }
}

impl fmt::Debug for OpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpOptions")
            .field("label_selector", &self.label_selector)
            .field("field_selector", &self.field_selector)
            .field("pod_fn", &self.pod_fn.is_some())
            .field("query_fn", &self.query_fn.is_some())
            .field("force_delete", &self.force_delete)
            .field("force_delete_fn", &self.force_delete_fn.is_some())
            .finish()
    }
}
