//! [`LoopbackTransport`] – in-memory [`ControlTransport`].
//!
//! Everything published is delivered to local subscribers of the same
//! channel and kept in a bounded log, oldest entries dropped first. Replies to [`ControlTransport::request`] come from a
//! scripted table. Used by the test suites and by the CLI's dry-run mode.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use strider_types::{Request, Response, StriderError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::{ControlTransport, Subscription, SubscriptionId, channel, envelope_value};

/// Published messages kept for inspection by default.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

struct Inner {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, (String, mpsc::UnboundedSender<Value>)>,
    published: VecDeque<(String, Value)>,
    log_capacity: usize,
    replies: HashMap<u32, Response>,
    offline: bool,
    auto_ack: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            next_id: 0,
            subscribers: HashMap::new(),
            published: VecDeque::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            replies: HashMap::new(),
            offline: false,
            auto_ack: false,
        }
    }
}

impl Inner {
    fn record(&mut self, channel: &str, message: Value) {
        if self.log_capacity == 0 {
            return;
        }
        while self.published.len() >= self.log_capacity {
            self.published.pop_front();
        }
        self.published.push_back((channel.to_string(), message));
    }

    fn deliver(&mut self, channel: &str, message: &Value) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|_, (ch, tx)| {
            if ch != channel {
                return true;
            }
            // A closed receiver means the subscription was dropped without
            // being removed; forget it.
            let alive = tx.send(message.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }
}

#[derive(Default)]
pub struct LoopbackTransport {
    inner: Mutex<Inner>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every published request envelope with a success response on
    /// the paired `.../response` channel, as an idle robot would.
    pub fn with_auto_ack(self) -> Self {
        self.inner.lock().auto_ack = true;
        self
    }

    /// Deliver `message` to every subscriber of `channel`, as if the robot
    /// had sent it. Returns how many subscribers received it.
    pub fn inject(&self, channel: &str, message: Value) -> usize {
        let delivered = self.inner.lock().deliver(channel, &message);
        debug!(channel, delivered, "loopback message injected");
        delivered
    }

    /// Reply with `response` whenever a request for its `api_id` is made.
    pub fn script_reply(&self, response: Response) {
        self.inner.lock().replies.insert(response.api_id, response);
    }

    /// Keep at most `capacity` published messages; zero disables the log.
    pub fn with_log_capacity(self, capacity: usize) -> Self {
        {
            let mut inner = self.inner.lock();
            inner.log_capacity = capacity;
            let excess = inner.published.len().saturating_sub(capacity);
            inner.published.drain(..excess);
        }
        self
    }

    /// Make every publish and request fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Snapshot of the retained published and requested messages, oldest
    /// first.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.inner.lock().published.iter().cloned().collect()
    }

    /// Drain the record of published messages.
    pub fn take_published(&self) -> Vec<(String, Value)> {
        self.inner.lock().published.drain(..).collect()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .subscribers
            .values()
            .filter(|(ch, _)| ch == channel)
            .count()
    }
}

#[async_trait]
impl ControlTransport for LoopbackTransport {
    async fn publish(&self, channel: &str, message: Value) -> Result<(), StriderError> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(StriderError::Transport(format!("loopback offline, dropped publish on {channel}")));
        }
        inner.deliver(channel, &message);

        if inner.auto_ack
            && let Some(response_channel) = channel::response_for(channel)
        {
            match serde_json::from_value::<Request>(message.clone()) {
                Ok(req) => {
                    let ack = Response {
                        api_id: req.api_id,
                        code: 0,
                        data: None,
                    };
                    if let Ok(value) = serde_json::to_value(&ack) {
                        inner.deliver(&response_channel, &value);
                    }
                }
                Err(e) => warn!(channel, error = %e, "auto-ack skipped non-envelope message"),
            }
        }

        inner.record(channel, message);
        Ok(())
    }

    async fn request(&self, channel: &str, request: &Request) -> Result<Option<Response>, StriderError> {
        let value = envelope_value(request)?;
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(StriderError::Transport(format!("loopback offline, dropped request on {channel}")));
        }
        inner.record(channel, value);
        Ok(inner.replies.get(&request.api_id).cloned())
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription, StriderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.insert(id, (channel.to_string(), tx));
        debug!(channel, id = id.0, "loopback subscription added");
        Ok(Subscription::new(id, channel, rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.lock().subscribers.remove(&id).is_some() {
            debug!(id = id.0, "loopback subscription removed");
        }
    }
}
