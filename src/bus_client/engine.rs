use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::bus_wire::frame::{ClientFrame, ConnectBody, ServerFrame, ServerInfo};
use crate::bus_wire::stream::FrameParser;

use super::error::ClientError;
use super::executor::CallbackExecutor;
use super::opts::ClientOptions;
use super::server_list::{Endpoint, ServerList};
use super::subscription::{MessageHandler, Subscription, SubscriptionRegistry};
use super::transport::{BoxedTransport, TcpTransport, Transport};

/// Connection-state notifications delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport is established; the handshake has not completed yet.
    Connected,
    /// The transport dropped. The reconnect loop takes over when enabled.
    Disconnected,
    /// The handshake completed, subscriptions were replayed and queued
    /// publishes drained; user traffic flows directly.
    ServerReady,
}

/// Listener for connection lifecycle changes.
///
/// Both methods are invoked on the callback executor, never on the network
/// I/O tasks and never while the engine lock is held.
pub trait ConnectionStateListener: Send + Sync {
    fn on_state_change(&self, state: ConnectionState);

    /// The broker reported a protocol error (`-ERR`). The connection is
    /// dropped afterwards and recovered by the reconnect loop.
    fn on_server_error(&self, message: &str) {
        let _ = message;
    }
}

/// Engine lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Disconnected,
    Connecting,
    Connected,
    ServerReady,
    Closed,
}

/// A publish captured while the connection is not ready.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingPublish {
    pub(crate) subject: String,
    pub(crate) body: Vec<u8>,
    pub(crate) reply_to: Option<String>,
}

/// FIFO of publishes buffered while the link is down. Drained in insertion
/// order inside the same critical section that flips `server_ready`.
#[derive(Default)]
pub(crate) struct OutboundQueue {
    entries: VecDeque<PendingPublish>,
}

impl OutboundQueue {
    pub(crate) fn enqueue(&mut self, publish: PendingPublish) {
        self.entries.push_back(publish);
    }

    pub(crate) fn drain_into(&mut self, writer: &UnboundedSender<Vec<u8>>) {
        while let Some(publish) = self.entries.pop_front() {
            send_frame(
                writer,
                &ClientFrame::Publish {
                    subject: publish.subject,
                    reply_to: publish.reply_to,
                    body: publish.body,
                },
            );
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// All mutable engine state, guarded by one lock.
///
/// The state transitions are interlocked: lifecycle, ready flag, outbound
/// queue and subscription map all move together on reconnect, so a single
/// coarse lock with non-blocking critical sections is used throughout.
/// Nothing awaits while holding it; transport writes go through the writer
/// task's unbounded channel.
struct EngineState {
    lifecycle: Lifecycle,
    server_ready: bool,
    /// Connection epoch. Incremented on every install and teardown so that
    /// stale reader/writer tasks cannot tear down a newer connection.
    generation: u64,
    writer: Option<UnboundedSender<Vec<u8>>>,
    servers: ServerList,
    queue: OutboundQueue,
    registry: SubscriptionRegistry,
    listeners: Vec<Arc<dyn ConnectionStateListener>>,
}

/// The client connection engine.
///
/// Owns the transport, the outbound queue and the subscription registry,
/// and maintains one logical connection across the configured server list:
/// dial the next endpoint, handshake on `INFO`, replay subscriptions, drain
/// queued publishes, and on any transport fault schedule the next dial
/// after `reconnect_wait`. `close` is terminal and idempotent.
pub(crate) struct EngineShared {
    automatic_reconnect: bool,
    reconnect_wait: Duration,
    pedantic: bool,
    max_frame_size: usize,
    runtime: Handle,
    executor: CallbackExecutor,
    owns_executor: bool,
    next_sid: AtomicU64,
    weak_self: Weak<EngineShared>,
    state: Mutex<EngineState>,
}

impl EngineShared {
    pub(crate) fn new(options: ClientOptions) -> Result<Arc<Self>, ClientError> {
        let servers = ServerList::new(options.hosts)?;
        let runtime = options.runtime.unwrap_or_else(Handle::current);
        let owns_executor = options.callback_executor.is_none();
        let executor = options
            .callback_executor
            .unwrap_or_else(|| CallbackExecutor::new(&runtime));
        let listeners = options.listeners;

        Ok(Arc::new_cyclic(|weak_self| EngineShared {
            automatic_reconnect: options.automatic_reconnect,
            reconnect_wait: options.reconnect_wait,
            pedantic: options.pedantic,
            max_frame_size: options.max_frame_size,
            runtime,
            executor,
            owns_executor,
            next_sid: AtomicU64::new(0),
            weak_self: weak_self.clone(),
            state: Mutex::new(EngineState {
                lifecycle: Lifecycle::Disconnected,
                server_ready: false,
                generation: 0,
                writer: None,
                servers,
                queue: OutboundQueue::default(),
                registry: SubscriptionRegistry::default(),
                listeners,
            }),
        }))
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Start the first dial.
    pub(crate) fn start(&self) {
        let Some(shared) = self.weak_self.upgrade() else {
            return;
        };
        self.runtime.spawn(async move {
            connect_attempt(shared).await;
        });
    }

    pub(crate) fn is_connected(&self) -> bool {
        let st = self.state.lock().unwrap();
        matches!(st.lifecycle, Lifecycle::Connected | Lifecycle::ServerReady)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().lifecycle == Lifecycle::Closed
    }

    pub(crate) fn check_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn ConnectionStateListener>) {
        self.state.lock().unwrap().listeners.push(listener);
    }

    /// Publish path: write directly when the server is ready, buffer
    /// otherwise. Per-producer ordering is preserved because both paths run
    /// under the engine lock and the writer channel is FIFO.
    pub(crate) fn publish_frame(
        &self,
        subject: &str,
        body: Vec<u8>,
        reply_to: Option<String>,
    ) -> Result<(), ClientError> {
        let mut st = self.state.lock().unwrap();
        if st.lifecycle == Lifecycle::Closed {
            return Err(ClientError::Closed);
        }
        if st.server_ready {
            if let Some(writer) = &st.writer {
                send_frame(
                    writer,
                    &ClientFrame::Publish {
                        subject: subject.to_string(),
                        reply_to,
                        body,
                    },
                );
                return Ok(());
            }
        }
        st.queue.enqueue(PendingPublish {
            subject: subject.to_string(),
            body,
            reply_to,
        });
        Ok(())
    }

    /// Register a subscription; its `SUB` frame is written immediately when
    /// ready and replayed on every subsequent handshake.
    pub(crate) fn subscribe(
        &self,
        subject: String,
        queue_group: Option<String>,
        max_messages: Option<u64>,
        handlers: Vec<MessageHandler>,
    ) -> Result<Arc<Subscription>, ClientError> {
        self.check_open()?;
        let id = self.next_sid.fetch_add(1, Ordering::Relaxed) + 1;
        let subscription = Arc::new(Subscription::new(
            id,
            subject.clone(),
            queue_group.clone(),
            max_messages,
            handlers,
            self.weak_self.clone(),
        ));

        let mut st = self.state.lock().unwrap();
        if st.lifecycle == Lifecycle::Closed {
            return Err(ClientError::Closed);
        }
        st.registry.insert(Arc::clone(&subscription));
        if st.server_ready {
            if let Some(writer) = &st.writer {
                send_frame(
                    writer,
                    &ClientFrame::Subscribe {
                        sid: id,
                        subject,
                        queue_group,
                    },
                );
            }
        }
        Ok(subscription)
    }

    /// Drop a subscription from the registry, emitting `UNSUB` when ready.
    /// Called from `Subscription::close`.
    pub(crate) fn remove_subscription(&self, id: u64) {
        let mut st = self.state.lock().unwrap();
        if st.registry.remove(id).is_some() && st.server_ready {
            if let Some(writer) = &st.writer {
                send_frame(
                    writer,
                    &ClientFrame::Unsubscribe {
                        sid: id,
                        max_messages: None,
                    },
                );
            }
        }
    }

    /// Terminal shutdown. Idempotent; fires `Disconnected` at most once.
    pub(crate) fn close(&self) {
        let (was_active, listeners, subscriptions) = {
            let mut st = self.state.lock().unwrap();
            if st.lifecycle == Lifecycle::Closed {
                return;
            }
            let was_active =
                matches!(st.lifecycle, Lifecycle::Connected | Lifecycle::ServerReady);
            st.lifecycle = Lifecycle::Closed;
            st.server_ready = false;
            st.generation += 1;
            // Dropping the writer ends the writer task and shuts the
            // socket down.
            st.writer = None;
            (was_active, st.listeners.clone(), st.registry.snapshot())
        };

        for subscription in subscriptions {
            subscription.close();
        }
        if was_active {
            self.fire_state_change(&listeners, ConnectionState::Disconnected);
        }
        if self.owns_executor {
            self.executor.shutdown();
        }
        info!("client closed");
    }

    fn fire_state_change(
        &self,
        listeners: &[Arc<dyn ConnectionStateListener>],
        state: ConnectionState,
    ) {
        for listener in listeners {
            let listener = Arc::clone(listener);
            self.executor.submit(move || listener.on_state_change(state));
        }
    }

    fn fire_server_error(&self, listeners: &[Arc<dyn ConnectionStateListener>], message: &str) {
        for listener in listeners {
            let listener = Arc::clone(listener);
            let message = message.to_string();
            self.executor
                .submit(move || listener.on_server_error(&message));
        }
    }

    /// Schedule the next dial after `reconnect_wait`, unless closed or
    /// reconnection is disabled.
    fn schedule_reconnect(&self) {
        {
            let mut st = self.state.lock().unwrap();
            st.server_ready = false;
            if st.lifecycle == Lifecycle::Closed {
                return;
            }
            st.lifecycle = Lifecycle::Disconnected;
            if !self.automatic_reconnect {
                return;
            }
        }
        let wait = self.reconnect_wait;
        let weak = self.weak_self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(shared) = weak.upgrade() {
                connect_attempt(shared).await;
            }
        });
    }

    /// Tear down the connection identified by `generation`. Stale
    /// notifications from already-replaced connections are ignored.
    fn handle_transport_down(&self, generation: u64) {
        let listeners = {
            let mut st = self.state.lock().unwrap();
            if st.lifecycle == Lifecycle::Closed || st.generation != generation {
                return;
            }
            st.generation += 1;
            st.writer = None;
            st.server_ready = false;
            st.lifecycle = Lifecycle::Disconnected;
            st.listeners.clone()
        };
        warn!("connection to broker lost");
        self.fire_state_change(&listeners, ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    /// Install a freshly dialed transport and spawn its reader and writer
    /// tasks. The `Connected` notification is submitted before the reader
    /// starts so it cannot race the `ServerReady` one.
    fn install_transport(&self, transport: BoxedTransport, endpoint: Arc<Endpoint>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (generation, listeners) = {
            let mut st = self.state.lock().unwrap();
            if st.lifecycle == Lifecycle::Closed {
                // Closed while the dial was in flight; the dropped
                // transport closes the socket.
                return;
            }
            st.generation += 1;
            st.writer = Some(write_tx);
            st.lifecycle = Lifecycle::Connected;
            (st.generation, st.listeners.clone())
        };
        self.fire_state_change(&listeners, ConnectionState::Connected);

        let Some(shared) = self.weak_self.upgrade() else {
            return;
        };
        let (read_half, write_half) = tokio::io::split(transport);

        let writer_shared = Arc::clone(&shared);
        self.runtime.spawn(async move {
            writer_loop(writer_shared, write_half, write_rx, generation).await;
        });
        self.runtime.spawn(async move {
            reader_loop(shared, read_half, endpoint, generation).await;
        });
    }

    /// `INFO` arrival triggers the handshake: send `CONNECT` with the
    /// current endpoint's credentials, then atomically flip to ready,
    /// replay every live subscription and drain the queued publishes. The
    /// writer channel is FIFO, so subscriptions always hit the wire before
    /// the drained publishes.
    fn handle_info(&self, generation: u64, endpoint: &Endpoint, info: ServerInfo) {
        debug!(server_id = ?info.server_id, version = ?info.version, "server info received");
        let listeners = {
            let mut st = self.state.lock().unwrap();
            if st.lifecycle == Lifecycle::Closed || st.generation != generation || st.server_ready
            {
                return;
            }
            let writer = match &st.writer {
                Some(writer) => writer.clone(),
                None => return,
            };

            send_frame(
                &writer,
                &ClientFrame::Connect(ConnectBody {
                    user: endpoint.user().map(str::to_string),
                    pass: endpoint.password().map(str::to_string),
                    pedantic: self.pedantic,
                    verbose: false,
                }),
            );

            st.server_ready = true;
            st.lifecycle = Lifecycle::ServerReady;
            for subscription in st.registry.snapshot() {
                send_frame(
                    &writer,
                    &ClientFrame::Subscribe {
                        sid: subscription.id(),
                        subject: subscription.subject().to_string(),
                        queue_group: subscription.queue_group().map(str::to_string),
                    },
                );
            }
            debug!(
                subscriptions = st.registry.len(),
                queued_publishes = st.queue.len(),
                "server ready, replaying state"
            );
            st.queue.drain_into(&writer);
            st.listeners.clone()
        };
        self.fire_state_change(&listeners, ConnectionState::ServerReady);
    }

    /// Look up the target subscription under the lock, release it, then
    /// dispatch on the callback executor.
    fn dispatch_message(&self, subject: String, sid: u64, reply_to: Option<String>, body: Vec<u8>) {
        let subscription = self.state.lock().unwrap().registry.by_id(sid);
        match subscription {
            Some(subscription) => subscription.on_message(subject, body, reply_to, &self.executor),
            // Legitimate race with a just-closed subscription.
            None => debug!(%subject, sid, "message with no subscriber dropped"),
        }
    }

    /// Write a frame on the connection identified by `generation`, if it is
    /// still the current one.
    fn send_on_generation(&self, generation: u64, frame: &ClientFrame) {
        let st = self.state.lock().unwrap();
        if st.generation == generation {
            if let Some(writer) = &st.writer {
                send_frame(writer, frame);
            }
        }
    }

    /// Handle one inbound frame. Returns false when the connection must be
    /// dropped.
    fn handle_frame(&self, frame: ServerFrame, generation: u64, endpoint: &Endpoint) -> bool {
        match frame {
            ServerFrame::Info(info) => {
                self.handle_info(generation, endpoint, info);
                true
            }
            ServerFrame::Message {
                subject,
                sid,
                reply_to,
                body,
            } => {
                self.dispatch_message(subject, sid, reply_to, body);
                true
            }
            ServerFrame::Ping => {
                self.send_on_generation(generation, &ClientFrame::Pong);
                true
            }
            // Not using verbose, so +OK is not expected; both are ignored.
            ServerFrame::Pong | ServerFrame::Ok => true,
            ServerFrame::Err(message) => {
                error!(%message, "broker reported protocol error");
                let listeners = self.state.lock().unwrap().listeners.clone();
                self.fire_server_error(&listeners, &message);
                false
            }
        }
    }
}

fn send_frame(writer: &UnboundedSender<Vec<u8>>, frame: &ClientFrame) {
    match frame.to_bytes() {
        Ok(bytes) => {
            let _ = writer.send(bytes);
        }
        Err(e) => error!(error = %e, "failed to encode outbound frame"),
    }
}

/// Dial the next endpoint in rotation. Success installs the transport;
/// failure records the endpoint stat and schedules the next attempt.
async fn connect_attempt(shared: Arc<EngineShared>) {
    let endpoint = {
        let mut st = shared.state.lock().unwrap();
        if st.lifecycle == Lifecycle::Closed {
            return;
        }
        st.lifecycle = Lifecycle::Connecting;
        st.servers.next_server()
    };

    debug!(address = %endpoint.address(), user = ?endpoint.user(), "attempting connection");
    match TcpTransport::connect(endpoint.address()).await {
        Ok(transport) => {
            let _ = transport.set_nodelay(true);
            endpoint.record_success();
            info!(address = %endpoint.address(), "connection established");
            shared.install_transport(Box::new(transport), endpoint);
        }
        Err(e) => {
            endpoint.record_failure();
            warn!(address = %endpoint.address(), error = %e, "connection failed");
            shared.schedule_reconnect();
        }
    }
}

/// Drain the write channel onto the transport, flushing per frame. The
/// loop ends when the channel closes (orderly shutdown) or a write fails
/// (connection teardown).
async fn writer_loop(
    shared: Arc<EngineShared>,
    mut write_half: WriteHalf<BoxedTransport>,
    mut write_rx: UnboundedReceiver<Vec<u8>>,
    generation: u64,
) {
    while let Some(bytes) = write_rx.recv().await {
        if let Err(e) = write_half.write_all(&bytes).await {
            debug!(error = %e, "transport write failed");
            shared.handle_transport_down(generation);
            return;
        }
        if let Err(e) = write_half.flush().await {
            debug!(error = %e, "transport flush failed");
            shared.handle_transport_down(generation);
            return;
        }
    }
    let _ = write_half.shutdown().await;
}

/// Read transport bytes into the frame parser and dispatch every decoded
/// frame. Decode failures are fatal for the connection.
async fn reader_loop(
    shared: Arc<EngineShared>,
    mut read_half: ReadHalf<BoxedTransport>,
    endpoint: Arc<Endpoint>,
    generation: u64,
) {
    let mut parser = FrameParser::new(shared.max_frame_size);
    let mut buffer = vec![0u8; 8192];

    loop {
        match read_half.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                parser.feed(&buffer[..n]);
                loop {
                    match parser.next_frame() {
                        Ok(Some(frame)) => {
                            if !shared.handle_frame(frame, generation, &endpoint) {
                                shared.handle_transport_down(generation);
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!(error = %e, "inbound frame decode failed");
                            shared.handle_transport_down(generation);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "transport read failed");
                break;
            }
        }
    }
    shared.handle_transport_down(generation);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<EngineShared> {
        let options = ClientOptions::builder()
            .host("127.0.0.1:1")
            .automatic_reconnect(false)
            .build();
        EngineShared::new(options).unwrap()
    }

    #[tokio::test]
    async fn test_publish_queues_while_disconnected() {
        let shared = engine();
        shared.publish_frame("foo", b"a".to_vec(), None).unwrap();
        shared.publish_frame("foo", b"b".to_vec(), None).unwrap();
        assert_eq!(shared.state.lock().unwrap().queue.len(), 2);
    }

    #[tokio::test]
    async fn test_queue_drains_in_fifo_order() {
        let mut queue = OutboundQueue::default();
        for body in [b"1".to_vec(), b"2".to_vec(), b"3".to_vec()] {
            queue.enqueue(PendingPublish {
                subject: "x".to_string(),
                body,
                reply_to: None,
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.drain_into(&tx);
        assert_eq!(queue.len(), 0);

        let mut wire = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            wire.extend_from_slice(&bytes);
        }
        assert_eq!(wire, b"PUB x 1\r\n1\r\nPUB x 1\r\n2\r\nPUB x 1\r\n3\r\n");
    }

    #[tokio::test]
    async fn test_subscription_ids_are_monotonic_from_one() {
        let shared = engine();
        let first = shared
            .subscribe("a".to_string(), None, None, Vec::new())
            .unwrap();
        let second = shared
            .subscribe("b".to_string(), None, None, Vec::new())
            .unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(shared.state.lock().unwrap().registry.len(), 2);
    }

    #[tokio::test]
    async fn test_subscription_close_removes_registry_entry() {
        let shared = engine();
        let subscription = shared
            .subscribe("a".to_string(), None, None, Vec::new())
            .unwrap();
        subscription.close();
        assert!(subscription.is_closed());
        assert_eq!(shared.state.lock().unwrap().registry.len(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let shared = engine();
        let subscription = shared
            .subscribe("a".to_string(), None, None, Vec::new())
            .unwrap();

        shared.close();
        shared.close();

        assert!(shared.is_closed());
        assert!(subscription.is_closed());
        assert!(matches!(
            shared.publish_frame("foo", Vec::new(), None),
            Err(ClientError::Closed)
        ));
        assert!(matches!(
            shared.subscribe("b".to_string(), None, None, Vec::new()),
            Err(ClientError::Closed)
        ));
    }
}
