use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::{ConnectionStateListener, EngineShared};
use super::error::ClientError;
use super::opts::ClientOptions;
use super::subscription::{Message, MessageHandler, Subscription};

/// Generate a fresh private inbox subject for request/reply.
///
/// The format is the literal `_INBOX.` prefix followed by 128 bits of
/// randomness rendered as lower-case hex, which makes collisions negligible
/// over any realistic client lifetime.
pub(crate) fn create_inbox() -> String {
    format!("_INBOX.{:x}", rand::random::<u128>())
}

fn validate_subject(subject: &str) -> Result<(), ClientError> {
    if subject.is_empty() || subject.contains(char::is_whitespace) {
        return Err(ClientError::InvalidSubject {
            subject: subject.to_string(),
        });
    }
    Ok(())
}

/// Options for a subscription beyond its subject.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    subject: String,
    queue_group: Option<String>,
    max_messages: Option<u64>,
}

impl SubscribeOptions {
    pub fn new(subject: impl Into<String>) -> Self {
        SubscribeOptions {
            subject: subject.into(),
            queue_group: None,
            max_messages: None,
        }
    }

    /// Join a queue group: the broker load-balances the subject's messages
    /// across subscribers sharing the tag.
    pub fn queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    /// Auto-close the subscription after this many deliveries.
    pub fn max_messages(mut self, max: u64) -> Self {
        self.max_messages = Some(max);
        self
    }
}

/// Handle for a periodic publish; `remove` cancels it.
pub struct Registration {
    handle: JoinHandle<()>,
}

impl Registration {
    /// Cancel the periodic publish. Silent when already cancelled or when
    /// the client has been closed.
    pub fn remove(&self) {
        self.handle.abort();
    }
}

/// Handle for an in-flight request.
///
/// The reply subscription auto-closes when `max_replies` is reached or the
/// timeout fires, whichever comes first.
pub struct Request {
    subject: String,
    max_replies: Option<u64>,
    subscription: Arc<Subscription>,
}

impl Request {
    /// Stop accepting replies. The pending timeout becomes a no-op.
    pub fn close(&self) {
        self.subscription.close();
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn received_replies(&self) -> u64 {
        self.subscription.received_count()
    }

    pub fn max_replies(&self) -> Option<u64> {
        self.max_replies
    }
}

/// Thread-safe client handle for the broker connection.
///
/// All operations are safe to call from any thread; clones share the same
/// underlying connection engine. The connection is logical: publishes made
/// while the link is down are buffered and flushed after the next
/// handshake, and subscriptions survive reconnects.
///
/// Dropping the handle does not close the connection; call
/// [`close`](Self::close).
#[derive(Clone)]
pub struct BusClient {
    engine: Arc<EngineShared>,
}

impl BusClient {
    /// Validate the options, start the connection engine and return
    /// immediately; the first dial proceeds in the background.
    ///
    /// Must be called from within a Tokio runtime unless a runtime handle
    /// is supplied in the options.
    pub fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let engine = EngineShared::new(options)?;
        engine.start();
        Ok(BusClient { engine })
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, subject: &str, body: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.engine.check_open()?;
        validate_subject(subject)?;
        self.engine.publish_frame(subject, body.into(), None)
    }

    /// Publish with an empty body.
    pub fn publish_empty(&self, subject: &str) -> Result<(), ClientError> {
        self.publish(subject, Vec::new())
    }

    /// Publish carrying an explicit reply subject.
    pub fn publish_with_reply(
        &self,
        subject: &str,
        body: impl Into<Vec<u8>>,
        reply_to: &str,
    ) -> Result<(), ClientError> {
        self.engine.check_open()?;
        validate_subject(subject)?;
        validate_subject(reply_to)?;
        self.engine
            .publish_frame(subject, body.into(), Some(reply_to.to_string()))
    }

    /// Publish `body` to `subject` at a fixed rate, starting immediately.
    ///
    /// Ticks that fall while the client is disconnected are skipped, not
    /// queued. The returned [`Registration`] cancels the schedule.
    pub fn publish_periodic(
        &self,
        subject: &str,
        body: impl Into<Vec<u8>>,
        reply_to: Option<&str>,
        period: Duration,
    ) -> Result<Registration, ClientError> {
        self.engine.check_open()?;
        validate_subject(subject)?;
        if let Some(reply) = reply_to {
            validate_subject(reply)?;
        }
        if period.is_zero() {
            return Err(ClientError::InvalidArgument {
                message: "period must be non-zero".to_string(),
            });
        }

        let subject = subject.to_string();
        let body = body.into();
        let reply_to = reply_to.map(str::to_string);
        let weak = Arc::downgrade(&self.engine);
        let handle = self.engine.runtime().spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let engine = match weak.upgrade() {
                    Some(engine) => engine,
                    None => return,
                };
                if engine.is_closed() {
                    return;
                }
                if engine.is_connected() {
                    let _ = engine.publish_frame(&subject, body.clone(), reply_to.clone());
                }
            }
        });
        Ok(Registration { handle })
    }

    /// Subscribe to a subject with a single handler.
    pub fn subscribe(
        &self,
        subject: &str,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<Arc<Subscription>, ClientError> {
        self.subscribe_with(SubscribeOptions::new(subject), handler)
    }

    /// Subscribe with queue-group and max-messages options.
    pub fn subscribe_with(
        &self,
        options: SubscribeOptions,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<Arc<Subscription>, ClientError> {
        let handler: MessageHandler = Arc::new(handler);
        self.subscribe_handlers(options, vec![handler])
    }

    /// Subscribe with an explicit handler list.
    pub fn subscribe_handlers(
        &self,
        options: SubscribeOptions,
        handlers: Vec<MessageHandler>,
    ) -> Result<Arc<Subscription>, ClientError> {
        self.engine.check_open()?;
        validate_subject(&options.subject)?;
        if options.max_messages == Some(0) {
            return Err(ClientError::InvalidArgument {
                message: "max_messages must be positive".to_string(),
            });
        }
        self.engine.subscribe(
            options.subject,
            options.queue_group,
            options.max_messages,
            handlers,
        )
    }

    /// Issue a request and invoke `handler` for every reply until the
    /// timeout fires.
    pub fn request(
        &self,
        subject: &str,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<Request, ClientError> {
        self.request_with(subject, body, timeout, None, handler)
    }

    /// Issue a request, capping the number of accepted replies.
    ///
    /// A private inbox subject is subscribed with `max_replies` as its
    /// message cap, the request is published with the inbox as its reply
    /// subject, and a one-shot timer closes the inbox after `timeout`
    /// whether or not replies arrived.
    pub fn request_with(
        &self,
        subject: &str,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
        max_replies: Option<u64>,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<Request, ClientError> {
        self.engine.check_open()?;
        validate_subject(subject)?;
        if max_replies == Some(0) {
            return Err(ClientError::InvalidArgument {
                message: "max_replies must be positive".to_string(),
            });
        }

        let inbox = create_inbox();
        let handler: MessageHandler = Arc::new(handler);
        let subscription = self
            .engine
            .subscribe(inbox.clone(), None, max_replies, vec![handler])?;

        // Closing is idempotent, so a timer firing after an explicit close
        // or a filled reply cap is a no-op.
        let timed_out = Arc::clone(&subscription);
        self.engine.runtime().spawn(async move {
            tokio::time::sleep(timeout).await;
            timed_out.close();
        });

        self.engine
            .publish_frame(subject, body.into(), Some(inbox))?;

        Ok(Request {
            subject: subject.to_string(),
            max_replies,
            subscription,
        })
    }

    /// Register a connection-state listener.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionStateListener>) {
        self.engine.add_listener(listener);
    }

    /// True while the transport is established (the handshake may still be
    /// in flight).
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Shut the client down: terminal and idempotent. Every subscription is
    /// closed and subsequent operations fail fast.
    pub fn close(&self) {
        self.engine.close();
    }
}
