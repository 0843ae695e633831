//! State-feed adapter: robot state reports → [`StateMachine::update_state`].
//!
//! Reports arrive on [`channel::SPORT_MODE_STATE`] as
//! `{"data": {"fsm_id": 500, "fsm_mode": 0, "task_id": 0}}`. The `data`
//! member may also be a nested JSON string, or the fields may sit at top
//! level. Unknown ids and malformed reports are logged and skipped.
//!
//! [`StateMachine::update_state`]: strider_kernel::StateMachine::update_state

use serde::Deserialize;
use serde_json::Value;
use strider_kernel::SharedStateMachine;
use strider_types::{Event, EventPayload, FsmState, RobotState};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};
use crate::transport::{ControlTransport, Subscription, channel};

const SOURCE: &str = "strider-middleware::state_feed";

/// One decoded state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StateReport {
    pub fsm_id: u16,
    #[serde(default)]
    pub fsm_mode: Option<i32>,
    #[serde(default)]
    pub task_id: Option<i32>,
}

impl StateReport {
    /// Decode a feed message. Returns `None` for anything that is not a
    /// state report.
    pub fn from_message(message: &Value) -> Option<Self> {
        let body = match message.get("data") {
            Some(Value::String(nested)) => serde_json::from_str::<Value>(nested).ok()?,
            Some(inner) => inner.clone(),
            None => message.clone(),
        };
        serde_json::from_value(body).ok()
    }
}

/// Feeds reports into the shared state machine and republishes changes on
/// the bus.
#[derive(Clone)]
pub struct StateFeed {
    fsm: SharedStateMachine,
    bus: EventBus,
}

impl StateFeed {
    pub fn new(fsm: SharedStateMachine, bus: EventBus) -> Self {
        Self { fsm, bus }
    }

    /// Subscribe to the state channel on `transport`.
    pub fn subscribe(transport: &dyn ControlTransport) -> Result<Subscription, strider_types::StriderError> {
        transport.subscribe(channel::SPORT_MODE_STATE)
    }

    /// Apply one message. Returns the recorded snapshot when the message was
    /// a valid report.
    pub fn ingest(&self, message: &Value) -> Option<RobotState> {
        let Some(report) = StateReport::from_message(message) else {
            warn!(%message, "skipping malformed state report");
            return None;
        };
        let Some(state) = FsmState::from_id(report.fsm_id) else {
            warn!(fsm_id = report.fsm_id, "skipping report with unknown fsm id");
            return None;
        };

        let (before, snapshot) = {
            let mut fsm = self.fsm.lock();
            let before = fsm.current();
            (before, fsm.update_state(state, report.fsm_mode, report.task_id))
        };

        if before != state {
            let event = Event::new(
                SOURCE,
                EventPayload::StateChanged {
                    from: before,
                    to: state,
                    state: snapshot.clone(),
                },
            );
            if let Err(e) = self.bus.publish_to(Topic::State, event) {
                warn!(error = %e, "failed to publish state change");
            }
        } else {
            debug!(state = %state, "state report unchanged");
        }
        Some(snapshot)
    }

    /// Consume `subscription` until the transport closes it.
    pub async fn run(self, mut subscription: Subscription) {
        info!(channel = subscription.channel(), "state feed running");
        while let Some(message) = subscription.recv().await {
            self.ingest(&message);
        }
        info!("state feed subscription closed");
    }
}
