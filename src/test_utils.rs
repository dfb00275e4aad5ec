// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking Kubernetes API responses.

use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

type Route = (String, String);

/// A mock HTTP service that returns predefined responses based on request paths.
///
/// Each route holds a queue of responses. Responses are served in order and the
/// last one keeps being returned once the queue is drained. A route may carry
/// query parameters (`/api/v1/pods?continue=abc`); it then only matches requests
/// carrying those parameters. When several routes match, the most specific wins.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<Route, VecDeque<(u16, String)>>>>,
    requests: Arc<Mutex<Vec<Route>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a response for requests with the given method and route
    pub fn on(self, method: &str, route: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry((method.to_string(), route.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn on_get(self, route: &str, status: u16, body: &str) -> Self {
        self.on("GET", route, status, body)
    }

    pub fn on_post(self, route: &str, status: u16, body: &str) -> Self {
        self.on("POST", route, status, body)
    }

    pub fn on_put(self, route: &str, status: u16, body: &str) -> Self {
        self.on("PUT", route, status, body)
    }

    pub fn on_delete(self, route: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", route, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    /// Every request seen so far as (method, path?query)
    pub fn requests(&self) -> Vec<Route> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests seen for a method whose path starts with `path`
    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p)| m == method && p.starts_with(path))
            .count()
    }

    fn find_response(&self, method: &str, path: &str, query: &str) -> Option<(u16, String)> {
        let mut responses = self.responses.lock().unwrap();
        let request_params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();

        let mut best: Option<(Route, usize)> = None;
        for (m, route) in responses.keys() {
            if m != method {
                continue;
            }
            let (route_path, route_query) = route.split_once('?').unwrap_or((route.as_str(), ""));
            if !path.starts_with(route_path) {
                continue;
            }
            let params_match = route_query
                .split('&')
                .filter(|p| !p.is_empty())
                .all(|p| request_params.contains(&p));
            if !params_match {
                continue;
            }
            // exact path beats prefix, longer route beats shorter
            let score = route.len() + if route_path == path { 10_000 } else { 0 };
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some(((m.clone(), route.clone()), score));
            }
        }

        let (key, _) = best?;
        let queue = responses.get_mut(&key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();

        let logged = if query.is_empty() {
            path.clone()
        } else {
            format!("{path}?{query}")
        };
        self.requests.lock().unwrap().push((method.clone(), logged));

        let response = self.find_response(&method, &path, &query);

        Box::pin(async move {
            let (status, body) = response.unwrap_or_else(|| (404, not_found_json("resource", "unknown")));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": "test-uid"
        }
    })
    .to_string()
}

/// A namespace stuck in Terminating with metadata finalizers
pub fn terminating_namespace_json(name: &str, finalizers: &[&str]) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": "test-uid",
            "finalizers": finalizers,
            "deletionTimestamp": "2026-01-01T00:00:00Z"
        },
        "status": { "phase": "Terminating" }
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
}

pub fn already_exists_json(resource: &str, name: &str) -> String {
    status_json(
        409,
        "AlreadyExists",
        &format!("{} \"{}\" already exists", resource, name),
    )
}

/// The answer for a continuation token that outlived the server's compaction window
pub fn expired_continue_json() -> String {
    status_json(
        410,
        "Expired",
        "The provided continue parameter is too old to display a consistent list result. \
         You can start a new list without the continue parameter.",
    )
}

pub fn too_many_requests_json() -> String {
    status_json(429, "TooManyRequests", "the server has received too many requests")
}

/// A successful Status answer, as returned by DELETE
pub fn success_status_json() -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Success",
        "metadata": {}
    })
    .to_string()
}

pub fn pod_json(name: &str, namespace: &str, labels: serde_json::Value, phase: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace, "labels": labels },
        "status": { "phase": phase }
    })
}

pub fn node_json(name: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": { "name": name }
    })
}

/// Wrap items in a list answer, with an optional continuation token
pub fn list_json(kind: &str, items: Vec<serde_json::Value>, continue_token: Option<&str>) -> String {
    let mut metadata = serde_json::json!({ "resourceVersion": "1" });
    if let Some(token) = continue_token {
        metadata["continue"] = serde_json::Value::String(token.to_string());
    }
    serde_json::json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": metadata,
        "items": items
    })
    .to_string()
}
