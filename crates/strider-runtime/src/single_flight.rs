//! Single-slot guard for wait-for-completion actions.
//!
//! The robot's arm controller runs one gesture at a time. [`SingleFlight`]
//! hands out at most one [`FlightGuard`]; a second caller gets `None` and
//! must report itself busy. The slot is freed when the guard is dropped, so
//! every exit path of the holder (completion, timeout, error, cancellation)
//! releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strider_middleware::{ControlTransport, Subscription, SubscriptionId};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or `None` if it is held.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Holder of the slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        debug!("single-flight slot released");
    }
}

/// A transport subscription that is removed when dropped.
pub struct ScopedSubscription<'a> {
    transport: &'a dyn ControlTransport,
    inner: Subscription,
}

impl<'a> ScopedSubscription<'a> {
    pub fn new(transport: &'a dyn ControlTransport, inner: Subscription) -> Self {
        Self { transport, inner }
    }

    pub fn id(&self) -> SubscriptionId {
        self.inner.id()
    }

    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.inner.recv().await
    }
}

impl Drop for ScopedSubscription<'_> {
    fn drop(&mut self) {
        self.transport.unsubscribe(self.inner.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strider_middleware::LoopbackTransport;

    #[test]
    fn second_acquire_fails_until_release() {
        let slot = SingleFlight::new();
        let guard = slot.try_acquire();
        assert!(guard.is_some());
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());

        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn clones_share_the_slot() {
        let a = SingleFlight::new();
        let b = a.clone();
        let _held = a.try_acquire();
        assert!(b.try_acquire().is_none());
    }

    #[tokio::test]
    async fn scoped_subscription_unsubscribes_on_drop() -> Result<(), Box<dyn std::error::Error>> {
        let transport = LoopbackTransport::new();
        {
            let mut sub = ScopedSubscription::new(&transport, transport.subscribe("rt/status")?);
            transport.inject("rt/status", json!({"ok": true}));
            assert_eq!(sub.recv().await, Some(json!({"ok": true})));
            assert_eq!(transport.subscriber_count("rt/status"), 1);
        }
        assert_eq!(transport.subscriber_count("rt/status"), 0);
        Ok(())
    }
}
