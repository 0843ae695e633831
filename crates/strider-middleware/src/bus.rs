//! In-process fan-out of [`Event`]s, one broadcast lane per [`Topic`].
//!
//! Every lane is an independent [`tokio::sync::broadcast`] channel, so a
//! slow reader on `State` never delays alert delivery.
//!
//! | Topic | Producers |
//! |---|---|
//! | [`Topic::State`] | state feed, optimistic updates after confirmed transitions |
//! | [`Topic::Commands`] | executor, once per request written to the control channel |
//! | [`Topic::Actions`] | executor, once per finished gesture or taught action |
//! | [`Topic::SystemAlerts`] | console interrupts, teach-session lifecycle |

use strider_types::{Event, StriderError};
use tokio::sync::broadcast;

/// Events buffered per lane before a lagging reader starts losing them.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    State,
    Commands,
    Actions,
    SystemAlerts,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::State, Topic::Commands, Topic::Actions, Topic::SystemAlerts];

    fn lane(self) -> usize {
        self as usize
    }
}

/// Cloneable handle; clones publish into the same lanes.
#[derive(Clone, Debug)]
pub struct EventBus {
    lanes: [broadcast::Sender<Event>; Topic::ALL.len()],
}

impl EventBus {
    /// `capacity` applies to each lane separately.
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: std::array::from_fn(|_| broadcast::channel(capacity).0),
        }
    }

    /// Deliver `event` to everyone subscribed to `topic` and return how many
    /// readers got it. An empty lane yields `Ok(0)`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, StriderError> {
        let lane = &self.lanes[topic.lane()];
        if lane.receiver_count() == 0 {
            return Ok(0);
        }
        lane.send(event)
            .map_err(|e| StriderError::Transport(format!("{topic:?} lane: {e}")))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.lanes[topic.lane()].subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Reader for a single lane. Sees only events published after it was created.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// `Lagged(n)` means `n` events were overwritten before this reader got
    /// to them; the next call resumes at the oldest retained event.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking poll, used by the console between prompts.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_types::EventPayload;

    fn alert(code: u32) -> Event {
        Event::new(
            "bus-test",
            EventPayload::SystemAlert {
                code,
                message: format!("alert {code}"),
            },
        )
    }

    #[test]
    fn empty_lane_accepts_publish() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        assert_eq!(bus.publish_to(Topic::Actions, alert(1))?, 0);
        Ok(())
    }

    #[test]
    fn lanes_follow_topic_order() {
        for (i, topic) in Topic::ALL.iter().enumerate() {
            assert_eq!(topic.lane(), i);
        }
    }

    #[tokio::test]
    async fn every_reader_on_a_lane_gets_the_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::SystemAlerts);
        let mut second = bus.clone().subscribe_to(Topic::SystemAlerts);

        let event = alert(911);
        assert_eq!(bus.publish_to(Topic::SystemAlerts, event.clone())?, 2);
        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        assert_eq!(second.topic(), Topic::SystemAlerts);
        Ok(())
    }

    #[test]
    fn lanes_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut receivers: Vec<_> = Topic::ALL.iter().map(|t| bus.subscribe_to(*t)).collect();

        bus.publish_to(Topic::Commands, alert(2))?;

        for rx in &mut receivers {
            let got = rx.try_recv();
            if rx.topic() == Topic::Commands {
                assert!(got.is_ok());
            } else {
                assert!(matches!(got, Err(broadcast::error::TryRecvError::Empty)));
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn overrun_reader_sees_lag_then_recovers() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new(4);
        let mut reader = bus.subscribe_to(Topic::State);

        for code in 0..10 {
            bus.publish_to(Topic::State, alert(code))?;
        }

        assert!(matches!(
            reader.recv().await,
            Err(broadcast::error::RecvError::Lagged(6))
        ));
        match reader.recv().await?.payload {
            EventPayload::SystemAlert { code, .. } => assert_eq!(code, 6),
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }
}
