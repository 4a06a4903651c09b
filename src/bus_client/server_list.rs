use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::ClientError;

/// A single configured broker endpoint with its connection statistics.
///
/// Identity is the address; the success/failure counters are monotonic and
/// exposed for diagnostics.
#[derive(Debug)]
pub struct Endpoint {
    address: String,
    user: Option<String>,
    password: Option<String>,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_credentials(address, None, None)
    }

    pub fn with_credentials(
        address: impl Into<String>,
        user: Option<String>,
        password: Option<String>,
    ) -> Self {
        Endpoint {
            address: address.into(),
            user,
            password,
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ordered rotation over the configured broker endpoints.
///
/// `next_server` hands endpoints out strictly round-robin; health-based
/// selection is deliberately absent (the reconnect loop's backoff covers
/// it). Construction with an empty list is rejected.
#[derive(Debug)]
pub struct ServerList {
    servers: Vec<Arc<Endpoint>>,
    cursor: usize,
    current: Option<Arc<Endpoint>>,
}

impl ServerList {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, ClientError> {
        if endpoints.is_empty() {
            return Err(ClientError::Configuration {
                field: "hosts".to_string(),
                reason: "at least one host is required".to_string(),
            });
        }
        Ok(ServerList {
            servers: endpoints.into_iter().map(Arc::new).collect(),
            cursor: 0,
            current: None,
        })
    }

    pub fn add_endpoints(&mut self, endpoints: Vec<Endpoint>) {
        self.servers.extend(endpoints.into_iter().map(Arc::new));
    }

    /// Hand out the next endpoint in rotation, wrapping at the end.
    pub fn next_server(&mut self) -> Arc<Endpoint> {
        let server = Arc::clone(&self.servers[self.cursor]);
        self.cursor = (self.cursor + 1) % self.servers.len();
        self.current = Some(Arc::clone(&server));
        server
    }

    /// The endpoint most recently handed out by `next_server`, used to look
    /// up credentials when the handshake completes.
    pub fn current_server(&self) -> Option<Arc<Endpoint>> {
        self.current.clone()
    }
}
