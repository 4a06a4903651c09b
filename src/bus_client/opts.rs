use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use super::engine::ConnectionStateListener;
use super::executor::CallbackExecutor;
use super::server_list::Endpoint;

/// Client configuration. Build with [`ClientOptions::builder`].
pub struct ClientOptions {
    pub(crate) hosts: Vec<Endpoint>,
    // if true, the reconnect loop runs until close()
    pub(crate) automatic_reconnect: bool,
    pub(crate) reconnect_wait: Duration,
    // value sent in CONNECT; asks the broker for strict subject validation
    pub(crate) pedantic: bool,
    // upper bound on a single decoded frame, decoder-enforced
    pub(crate) max_frame_size: usize,
    // executor for user handlers and listeners; owned one created when None
    pub(crate) callback_executor: Option<CallbackExecutor>,
    pub(crate) listeners: Vec<Arc<dyn ConnectionStateListener>>,
    // runtime to spawn I/O and timer tasks on; ambient runtime when None
    pub(crate) runtime: Option<Handle>,
}

impl ClientOptions {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::new()
    }
}

/// Builder for [`ClientOptions`].
pub struct ClientOptionsBuilder {
    opts: ClientOptions,
}

impl ClientOptionsBuilder {
    pub fn new() -> Self {
        ClientOptionsBuilder {
            opts: ClientOptions {
                hosts: Vec::new(),
                automatic_reconnect: true,
                reconnect_wait: Duration::from_secs(2),
                pedantic: false,
                max_frame_size: 1024 * 1024,
                callback_executor: None,
                listeners: Vec::new(),
                runtime: None,
            },
        }
    }

    pub fn build(self) -> ClientOptions {
        self.opts
    }

    /// Add a broker endpoint (`host:port`). At least one is required.
    pub fn host(mut self, address: impl Into<String>) -> Self {
        self.opts.hosts.push(Endpoint::new(address));
        self
    }

    /// Add a broker endpoint with credentials for the CONNECT handshake.
    pub fn host_with_credentials(
        mut self,
        address: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.opts.hosts.push(Endpoint::with_credentials(
            address,
            Some(user.into()),
            Some(password.into()),
        ));
        self
    }

    /// Enable or disable automatic reconnection on connection loss.
    pub fn automatic_reconnect(mut self, enabled: bool) -> Self {
        self.opts.automatic_reconnect = enabled;
        self
    }

    /// Delay between reconnect attempts.
    pub fn reconnect_wait(mut self, wait: Duration) -> Self {
        self.opts.reconnect_wait = wait;
        self
    }

    /// Ask the broker for strict subject validation.
    pub fn pedantic(mut self, pedantic: bool) -> Self {
        self.opts.pedantic = pedantic;
        self
    }

    /// Upper bound on a single decoded frame.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.opts.max_frame_size = size;
        self
    }

    /// Supply the executor that runs handlers and listeners. A supplied
    /// executor is not shut down by `close()`.
    pub fn callback_executor(mut self, executor: CallbackExecutor) -> Self {
        self.opts.callback_executor = Some(executor);
        self
    }

    /// Register a connection-state listener before the first dial.
    pub fn listener(mut self, listener: Arc<dyn ConnectionStateListener>) -> Self {
        self.opts.listeners.push(listener);
        self
    }

    /// Spawn the client's tasks on this runtime instead of the ambient one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.opts.runtime = Some(handle);
        self
    }
}

impl Default for ClientOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
