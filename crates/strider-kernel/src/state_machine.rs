//! [`StateMachine`] – the locally accepted locomotion state.
//!
//! The machine answers two different questions and keeps them apart:
//!
//! - [`StateMachine::can_transition`] is advisory. Callers consult it before
//!   asking the robot for a new state.
//! - [`StateMachine::update_state`] is authoritative. It records whatever the
//!   robot (or an optimistic caller) reports, valid or not, and notifies
//!   subscribers only when the state actually changed.
//!
//! The machine knows nothing about transports. It is shared as a
//! [`SharedStateMachine`] between the command executor and the state feed.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use strider_types::{FsmState, RobotState, StriderError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::transition_table::TransitionTable;

/// Buffered notifications per subscriber before the oldest are dropped.
const NOTIFY_CAPACITY: usize = 64;

/// Shared handle used by every component that reads or reports state.
///
/// Never hold the lock across an `.await`.
pub type SharedStateMachine = Arc<Mutex<StateMachine>>;

/// Notification emitted when the recorded locomotion state changes.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub from: FsmState,
    pub to: FsmState,
    /// Full snapshot after the change.
    pub state: RobotState,
}

/// Locomotion state tracker validated against an injected [`TransitionTable`].
///
/// # Example
///
/// ```
/// use strider_kernel::{StateMachine, TransitionTable};
/// use strider_types::FsmState;
///
/// let mut fsm = StateMachine::new(TransitionTable::standard());
/// assert_eq!(fsm.current(), FsmState::ZeroTorque);
/// assert!(fsm.can_transition(FsmState::Damp));
/// assert!(!fsm.can_transition(FsmState::Run));
///
/// fsm.update_state(FsmState::Damp, None, None);
/// assert!(fsm.allowed_transitions().contains(&FsmState::Start));
/// ```
#[derive(Debug)]
pub struct StateMachine {
    table: TransitionTable,
    state: RobotState,
    notifier: broadcast::Sender<StateChange>,
}

impl StateMachine {
    /// Start in the low-power initial state with the given table.
    pub fn new(table: TransitionTable) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            table,
            state: RobotState::initial(),
            notifier,
        }
    }

    /// Wrap in the shared handle.
    pub fn into_shared(self) -> SharedStateMachine {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    pub fn current(&self) -> FsmState {
        self.state.locomotion_state
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Whether `target` may be requested from the current state.
    pub fn can_transition(&self, target: FsmState) -> bool {
        let allowed = self.table.allows(self.current(), target);
        if !allowed {
            debug!(from = %self.current(), to = %target, "transition not in table");
        }
        allowed
    }

    /// [`can_transition`](Self::can_transition) as an error the caller may
    /// show or override. Nothing is refused here.
    pub fn check_transition(&self, target: FsmState) -> Result<(), StriderError> {
        if self.can_transition(target) {
            Ok(())
        } else {
            Err(StriderError::InvalidTransition {
                from: self.current(),
                to: target,
            })
        }
    }

    /// Record an authoritative state report and return the new snapshot.
    ///
    /// A report replaces the whole snapshot: any recorded error is cleared,
    /// and on a locomotion change `sub_mode` and `task_id` take the passed
    /// values even when absent. A repeated report of the same state keeps
    /// the stored values unless new ones are given. Subscribers are notified
    /// only when the locomotion state differs from the previously recorded
    /// one.
    pub fn update_state(
        &mut self,
        new_state: FsmState,
        sub_mode: Option<i32>,
        task_id: Option<i32>,
    ) -> RobotState {
        let from = self.current();
        if !self.table.allows(from, new_state) {
            // Reports are facts; the robot may have been driven by its remote.
            warn!(from = %from, to = %new_state, "recording transition outside the table");
        }

        self.state.locomotion_state = new_state;
        self.state.indicator_color = new_state.indicator();
        self.state.error = None;
        if from != new_state {
            // Sub-modes belong to the state that reported them.
            self.state.sub_mode = sub_mode;
            self.state.task_id = task_id;
        } else {
            if sub_mode.is_some() {
                self.state.sub_mode = sub_mode;
            }
            if task_id.is_some() {
                self.state.task_id = task_id;
            }
        }

        if from != new_state {
            info!(from = %from, to = %new_state, sub_mode = ?self.state.sub_mode, "locomotion state changed");
            let _ = self.notifier.send(StateChange {
                from,
                to: new_state,
                state: self.state.clone(),
            });
        }
        self.state.clone()
    }

    /// Every state reachable in one step, including the current state and
    /// the escape hatches.
    pub fn allowed_transitions(&self) -> BTreeSet<FsmState> {
        self.table.reachable_from(self.current())
    }

    /// Record an error report. The locomotion state is left untouched.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(state = %self.current(), error = %message, "robot error recorded");
        self.state.error = Some(message);
    }

    pub fn clear_error(&mut self) {
        if self.state.error.take().is_some() {
            info!("robot error cleared");
        }
    }

    pub fn is_in_error(&self) -> bool {
        self.state.error.is_some()
    }

    /// Balanced states that accept velocity commands.
    pub fn is_ready_for_motion(&self) -> bool {
        matches!(
            self.current(),
            FsmState::LockStand | FsmState::LockStandAdvanced | FsmState::Run
        )
    }

    /// States in which the arm controller accepts gestures. Running only
    /// allows them in the walk-run sub-modes 0 and 3.
    pub fn allows_gestures(&self) -> bool {
        match self.current() {
            FsmState::LockStand | FsmState::LockStandAdvanced => true,
            FsmState::Run => matches!(self.state.sub_mode, Some(0) | Some(3)),
            _ => false,
        }
    }

    /// Receive a [`StateChange`] for every recorded change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(TransitionTable::standard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_types::IndicatorColor;
    use FsmState::*;

    #[test]
    fn starts_in_zero_torque() {
        let fsm = StateMachine::default();
        assert_eq!(fsm.current(), ZeroTorque);
        assert_eq!(fsm.state().indicator_color, IndicatorColor::Purple);
    }

    #[test]
    fn can_transition_follows_table() {
        let mut fsm = StateMachine::default();
        assert!(fsm.can_transition(ZeroTorque));
        assert!(fsm.can_transition(Damp));
        assert!(!fsm.can_transition(Start));

        fsm.update_state(Damp, None, None);
        assert!(fsm.can_transition(Start));
        assert!(fsm.can_transition(Sit));
        assert!(!fsm.can_transition(Run));
    }

    #[test]
    fn check_transition_names_both_ends() {
        let mut fsm = StateMachine::default();
        fsm.update_state(Sit, None, None);
        assert_eq!(
            fsm.check_transition(Run),
            Err(StriderError::InvalidTransition { from: Sit, to: Run })
        );
        assert!(fsm.check_transition(Damp).is_ok());
    }

    #[test]
    fn update_state_records_invalid_reports() {
        let mut fsm = StateMachine::default();
        let snapshot = fsm.update_state(Run, Some(3), Some(7));
        assert_eq!(snapshot.locomotion_state, Run);
        assert_eq!(snapshot.indicator_color, IndicatorColor::DarkBlue);
        assert_eq!(snapshot.sub_mode, Some(3));
        assert_eq!(snapshot.task_id, Some(7));
    }

    #[test]
    fn update_state_keeps_previous_sub_mode_when_absent() {
        let mut fsm = StateMachine::default();
        fsm.update_state(Run, Some(3), None);
        let snapshot = fsm.update_state(Run, None, None);
        assert_eq!(snapshot.sub_mode, Some(3));
    }

    #[test]
    fn state_change_drops_previous_sub_mode_and_error() {
        let mut fsm = StateMachine::default();
        fsm.update_state(LockStand, Some(0), Some(4));
        fsm.set_error("joint over-temperature");

        let snapshot = fsm.update_state(Run, None, None);
        assert_eq!(snapshot.sub_mode, None);
        assert_eq!(snapshot.task_id, None);
        assert!(snapshot.error.is_none());
        assert!(!fsm.allows_gestures());
    }

    #[test]
    fn allowed_transitions_from_damp() {
        let mut fsm = StateMachine::default();
        fsm.update_state(Damp, None, None);
        let allowed = fsm.allowed_transitions();
        for s in [Start, Sit, Squat, Damp, ZeroTorque] {
            assert!(allowed.contains(&s), "missing {s}");
        }
    }

    #[test]
    fn custom_table_is_honoured() {
        let table = TransitionTable::from_edges([(ZeroTorque, vec![Sit])]);
        let fsm = StateMachine::new(table);
        assert!(fsm.can_transition(Sit));
        assert!(!fsm.can_transition(Start));
    }

    #[test]
    fn error_does_not_touch_state_colour() {
        let mut fsm = StateMachine::default();
        fsm.update_state(Damp, None, None);
        fsm.set_error("joint over-temperature");
        assert!(fsm.is_in_error());
        assert_eq!(fsm.state().indicator_color, IndicatorColor::Orange);
        assert_eq!(fsm.state().effective_indicator(), IndicatorColor::Red);
        fsm.clear_error();
        assert!(!fsm.is_in_error());
        assert_eq!(fsm.state().effective_indicator(), IndicatorColor::Orange);
    }

    #[test]
    fn motion_and_gesture_readiness() {
        let mut fsm = StateMachine::default();
        assert!(!fsm.is_ready_for_motion());
        assert!(!fsm.allows_gestures());

        fsm.update_state(LockStand, Some(0), None);
        assert!(fsm.is_ready_for_motion());
        assert!(fsm.allows_gestures());

        fsm.update_state(Run, Some(1), None);
        assert!(fsm.is_ready_for_motion());
        assert!(!fsm.allows_gestures());

        fsm.update_state(Run, Some(3), None);
        assert!(fsm.allows_gestures());

        fsm.update_state(Start, None, None);
        assert!(!fsm.is_ready_for_motion());
    }

    #[tokio::test]
    async fn notifies_only_on_change() -> Result<(), Box<dyn std::error::Error>> {
        let mut fsm = StateMachine::default();
        let mut rx = fsm.subscribe();

        fsm.update_state(Damp, None, None);
        fsm.update_state(Damp, Some(1), None);
        fsm.update_state(Start, None, None);

        let first = rx.recv().await?;
        assert_eq!((first.from, first.to), (ZeroTorque, Damp));
        let second = rx.recv().await?;
        assert_eq!((second.from, second.to), (Damp, Start));
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
