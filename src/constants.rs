// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Prefix of every environment variable the configuration binder reads
pub const ENV_PREFIX: &str = "K8S_TESTER_";

/// Suffix of the default configuration file name, `<cluster>.k8s-tester.yaml`
pub const CONFIG_FILE_SUFFIX: &str = ".k8s-tester.yaml";

/// Retry schedule for single API calls
pub mod backoff {
    use std::time::Duration;

    pub const INITIAL_DELAY: Duration = Duration::from_millis(100);
    pub const FACTOR: f64 = 3.0;
    pub const JITTER: f64 = 0.0;
    pub const STEPS: usize = 6;
}

/// Timeouts applied to every individual API request
pub mod request {
    use std::time::Duration;

    /// Inner deadline for a single call, independent of any outer deadline
    pub const TIMEOUT: Duration = Duration::from_secs(60);
}

/// Paged listing
pub mod list {
    use std::time::Duration;

    pub const DEFAULT_BATCH_LIMIT: u32 = 30;
    pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(5);
    /// Pause before restarting a listing whose continuation token went stale
    pub const STALE_RETRY_INTERVAL: Duration = Duration::from_secs(15);
    pub const STALE_RESTARTS: usize = 5;
}

/// Namespace deletion polling
pub mod namespace {
    use std::time::Duration;

    pub const POLL_INTERVAL: Duration = Duration::from_secs(15);
    pub const DELETION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
}

/// Readiness waiters
pub mod wait {
    use std::time::Duration;

    pub const JOB_POD_BATCH_LIMIT: u32 = 3000;
    pub const JOB_POD_BATCH_INTERVAL: Duration = Duration::from_secs(3);
    pub const SERVICE_POLL_INTERVAL: Duration = Duration::from_secs(5);
    /// Extra pause when the Service is not visible yet
    pub const SERVICE_NOT_FOUND_WAIT: Duration = Duration::from_secs(20);
}

/// EKS bearer token minting
pub mod eks {
    use std::time::Duration;

    pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";
    pub const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";
    pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(60);
    /// Effective lifetime of a minted token
    pub const TOKEN_EXPIRY: Duration = Duration::from_secs(14 * 60);
    /// Re-mint this long before expiry
    pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);
}

/// Client tuning defaults
pub mod client {
    use std::time::Duration;

    pub const DEFAULT_QPS: f32 = 10.0;
    pub const DEFAULT_BURST: u32 = 20;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
}

/// Pseudo-outputs accepted in `log_outputs`
pub mod log {
    pub const STDERR: &str = "stderr";
    pub const STDOUT: &str = "stdout";
    pub const DEFAULT_LEVEL: &str = "info";
}

/// Default number of nodes a cluster must report before anything is applied
pub const DEFAULT_MINIMUM_NODES: i32 = 1;

/// Interval between spinner frames
pub const SPINNER_TICK: Duration = Duration::from_millis(125);
