use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;

use super::engine::EngineShared;
use super::error::ClientError;
use super::executor::CallbackExecutor;

/// A user-supplied handler invoked for every delivered message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// A message delivered to a subscription handler.
///
/// When the message carries a reply subject it is a request and
/// [`reply`](Self::reply) becomes a valid operation. The body is owned by
/// the handler once delivered; the library never touches it again.
#[derive(Clone)]
pub struct Message {
    subject: String,
    body: Vec<u8>,
    queue_group: Option<String>,
    reply_to: Option<String>,
    engine: Weak<EngineShared>,
}

impl Message {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    pub fn reply_subject(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// True iff the message carries a non-empty reply subject.
    pub fn is_request(&self) -> bool {
        self.reply_to
            .as_deref()
            .is_some_and(|reply| !reply.trim().is_empty())
    }

    fn request_reply_subject(&self) -> Result<String, ClientError> {
        match self.reply_to.as_deref() {
            Some(reply) if !reply.trim().is_empty() => Ok(reply.to_string()),
            _ => Err(ClientError::NotARequest),
        }
    }

    /// Publish a reply to the message's reply subject.
    pub fn reply(&self, body: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        let engine = self.engine.upgrade().ok_or(ClientError::Closed)?;
        let reply_to = self.request_reply_subject()?;
        engine.publish_frame(&reply_to, body.into(), None)
    }

    /// Publish a reply after `delay`. The reply is dropped silently if the
    /// client closes before the delay elapses.
    pub fn reply_delayed(
        &self,
        body: impl Into<Vec<u8>>,
        delay: Duration,
    ) -> Result<(), ClientError> {
        let engine = self.engine.upgrade().ok_or(ClientError::Closed)?;
        let reply_to = self.request_reply_subject()?;
        let body = body.into();
        let weak = self.engine.clone();
        engine.runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                let _ = engine.publish_frame(&reply_to, body, None);
            }
        });
        Ok(())
    }
}

struct SubscriptionInner {
    received: u64,
    closed: bool,
    handlers: Vec<MessageHandler>,
}

/// A registered subject subscription.
///
/// Lives until explicitly closed or until `max_messages` deliveries have
/// occurred, and survives reconnects (the engine re-sends its `SUB` frame
/// on every handshake). The received count is monotonic across reconnects.
pub struct Subscription {
    id: u64,
    subject: String,
    queue_group: Option<String>,
    max_messages: Option<u64>,
    engine: Weak<EngineShared>,
    inner: Mutex<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        subject: String,
        queue_group: Option<String>,
        max_messages: Option<u64>,
        handlers: Vec<MessageHandler>,
        engine: Weak<EngineShared>,
    ) -> Self {
        Subscription {
            id,
            subject,
            queue_group,
            max_messages,
            engine,
            inner: Mutex::new(SubscriptionInner {
                received: 0,
                closed: false,
                handlers,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    pub fn max_messages(&self) -> Option<u64> {
        self.max_messages
    }

    /// Number of messages delivered so far. Never exceeds `max_messages`.
    pub fn received_count(&self) -> u64 {
        self.inner.lock().unwrap().received
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Attach an additional handler. Subsequent deliveries invoke every
    /// attached handler in registration order.
    pub fn add_handler(&self, handler: MessageHandler) {
        self.inner.lock().unwrap().handlers.push(handler);
    }

    /// Close the subscription: no further deliveries, the registry entry is
    /// removed and an `UNSUB` frame is written when the connection is ready.
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.remove_subscription(self.id);
        }
    }

    /// Deliver an inbound message to this subscription's handlers.
    ///
    /// Accounting happens under the subscription's own lock; the handlers
    /// run on the callback executor, never on the caller's thread. When the
    /// delivery reaches `max_messages` the subscription auto-closes after
    /// the dispatch is scheduled.
    pub(crate) fn on_message(
        &self,
        subject: String,
        body: Vec<u8>,
        reply_to: Option<String>,
        executor: &CallbackExecutor,
    ) {
        let (handlers, close_after) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            if let Some(max) = self.max_messages {
                if inner.received >= max {
                    // Late redelivery past the cap.
                    return;
                }
            }
            inner.received += 1;
            let close_after = self.max_messages == Some(inner.received);
            (inner.handlers.clone(), close_after)
        };

        let message = Message {
            subject,
            body,
            queue_group: self.queue_group.clone(),
            reply_to,
            engine: self.engine.clone(),
        };
        for handler in handlers {
            let message = message.clone();
            executor.submit(move || (*handler)(message));
        }

        if close_after {
            debug!(sid = self.id, subject = %self.subject, "subscription reached max messages");
            self.close();
        }
    }
}

/// Mapping from subscription id to live subscription.
///
/// Dispatch for an unknown id is the caller's concern (log-and-drop; it is
/// a legitimate race with a just-closed subscription).
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<u64, Arc<Subscription>>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(&mut self, subscription: Arc<Subscription>) {
        self.entries.insert(subscription.id(), subscription);
    }

    pub(crate) fn by_id(&self, id: u64) -> Option<Arc<Subscription>> {
        self.entries.get(&id).cloned()
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Arc<Subscription>> {
        self.entries.remove(&id)
    }

    /// All live subscriptions; used to resubscribe on reconnect. Ordering
    /// is not significant.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
