//! The publish/subscribe contract the control core needs from a transport.
//!
//! Strider never opens a socket at the control-channel layer. Whoever owns
//! the real-time link (a WebRTC data channel, a DDS participant, a test
//! double) implements [`ControlTransport`] and hands it to the executor.
//!
//! Messages are JSON values. Requests are serialized [`Request`] envelopes
//! whose `parameter` is itself a JSON string.

use async_trait::async_trait;
use serde_json::Value;
use strider_types::{Request, Response, StriderError};
use tokio::sync::mpsc;

/// Well-known channel names.
pub mod channel {
    pub const SPORT_REQUEST: &str = "rt/api/sport/request";
    pub const SPORT_RESPONSE: &str = "rt/api/sport/response";
    pub const ARM_REQUEST: &str = "rt/api/arm/request";
    pub const ARM_RESPONSE: &str = "rt/api/arm/response";
    pub const SLAM_REQUEST: &str = "rt/api/slam_operate/request";
    pub const SLAM_RESPONSE: &str = "rt/api/slam_operate/response";
    /// Joystick-style velocity input.
    pub const WIRELESS_CONTROLLER: &str = "rt/wirelesscontroller";
    /// Periodic locomotion state reports.
    pub const SPORT_MODE_STATE: &str = "rt/lf/sportmodestate";
    pub const LIDAR_SWITCH: &str = "rt/utlidar/switch";

    /// Reply channel paired with a `.../request` channel.
    pub fn response_for(request_channel: &str) -> Option<String> {
        request_channel
            .strip_suffix("/request")
            .map(|base| format!("{base}/response"))
    }
}

/// Handle identifying one subscription, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live subscription: messages published on `channel` after it was
/// created, in order.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channel: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, channel: impl Into<String>, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            id,
            channel: channel.into(),
            rx,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the transport dropped the subscription.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// Collaborator contract for the control channel.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, channel: &str, message: Value) -> Result<(), StriderError>;

    /// Send `request` and return the reply correlated by `api_id`, if any
    /// arrived. `Ok(None)` means "no answer", not failure.
    async fn request(&self, channel: &str, request: &Request) -> Result<Option<Response>, StriderError>;

    /// Start receiving messages published on `channel`.
    fn subscribe(&self, channel: &str) -> Result<Subscription, StriderError>;

    /// Stop delivering to a subscription. Unknown ids are ignored.
    ///
    /// Synchronous so scoped guards can call it when dropped.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Serialize a request envelope for [`ControlTransport::publish`].
pub fn envelope_value(request: &Request) -> Result<Value, StriderError> {
    serde_json::to_value(request).map_err(|e| StriderError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_channel_pairs_with_request() {
        assert_eq!(
            channel::response_for(channel::ARM_REQUEST).as_deref(),
            Some(channel::ARM_RESPONSE)
        );
        assert_eq!(
            channel::response_for(channel::SLAM_REQUEST).as_deref(),
            Some(channel::SLAM_RESPONSE)
        );
        assert_eq!(channel::response_for(channel::WIRELESS_CONTROLLER), None);
    }

    #[test]
    fn envelope_keeps_parameter_as_string() -> Result<(), Box<dyn std::error::Error>> {
        let req = Request {
            api_id: 7101,
            parameter: r#"{"data":500}"#.to_string(),
        };
        let value = envelope_value(&req)?;
        assert_eq!(value["api_id"], 7101);
        assert!(value["parameter"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn subscription_yields_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(SubscriptionId(1), "rt/test", rx);
        tx.send(Value::from(1)).unwrap();
        tx.send(Value::from(2)).unwrap();
        drop(tx);
        assert_eq!(sub.recv().await, Some(Value::from(1)));
        assert_eq!(sub.recv().await, Some(Value::from(2)));
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.channel(), "rt/test");
    }
}
