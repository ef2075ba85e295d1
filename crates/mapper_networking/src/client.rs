//! The process-wide HTTP client.
//!
//! Every component of the pipeline issues its requests through a single
//! pooled [`ClientWithMiddleware`]: shard workers hammer the same few hosts
//! with tens of thousands of requests per run, so connection reuse matters
//! more than anything else here. The client is initialized lazily and is safe
//! to use from any number of tasks.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::RetryTransientMiddleware;

use crate::{retry_policies::default_retry_policy, OciMiddleware};

/// Configuration for building the shared client. The defaults match the
/// production pipeline; tests construct their own clients instead.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of idle pooled connections kept per host.
    pub pool_max_idle_per_host: usize,

    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 100,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Builds a client with the retry and OCI middlewares installed.
    ///
    /// Request timeouts are not set here: every call site attaches its own
    /// deadline (repodata 60s, artifact fetches 120s, lookups 30s).
    pub fn build(&self) -> ClientWithMiddleware {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .connect_timeout(self.connect_timeout)
            .build()
            .expect("failed to construct the http client");

        reqwest_middleware::ClientBuilder::new(client)
            .with(OciMiddleware)
            .with(RetryTransientMiddleware::new_with_policy(
                default_retry_policy(),
            ))
            .build()
    }
}

static SHARED_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();

/// Returns the process-wide client, initializing it on first use.
pub fn shared_client() -> &'static ClientWithMiddleware {
    SHARED_CLIENT.get_or_init(|| ClientConfig::default().build())
}
