//! [`CommandExecutor`] – typed operations in, control-channel envelopes out.
//!
//! Every outgoing request passes through one place so that:
//!
//! - locomotion-state and balance-mode changes always redeem an
//!   [`OperatorConfirmation`],
//! - motion requests are checked by the [`MotionGate`] against the current
//!   state,
//! - only one wait-for-completion action is in flight at a time.
//!
//! The executor has no retry or recovery path of its own. Transport failures
//! are returned to the caller; missing or malformed replies are logged and
//! reported as "no answer".

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use strider_kernel::{MotionGate, MotionIntent, OperatorConfirmation, SharedStateMachine};
use strider_middleware::transport::envelope_value;
use strider_middleware::{ControlTransport, EventBus, Topic, channel};
use strider_types::{
    ActionOutcome, Event, EventPayload, FsmState, Response, RobotState, SafetyAction, StriderError,
};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::operation::{ArmTask, Operation, Subsystem, api, parse_response, response_data};
use crate::single_flight::{ScopedSubscription, SingleFlight};
use crate::velocity::{self, JoystickMessage, NormalizedTwist, SpeedMode, VelocityLimits, VelocityRoute};

const SOURCE: &str = "strider-runtime::executor";

/// Tunables for [`CommandExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long to wait for a correlated reply before treating it as absent.
    pub reply_timeout: Duration,
    /// Default wait for gestures and taught actions.
    pub action_timeout: Duration,
    pub velocity_limits: VelocityLimits,
    pub velocity_route: VelocityRoute,
    /// Hold time sent with `SetVelocity` on the sport-API route, in seconds.
    pub velocity_duration: f32,
    /// Channel carrying action completion signals.
    pub status_channel: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(2000),
            action_timeout: Duration::from_millis(15_000),
            velocity_limits: VelocityLimits::default(),
            velocity_route: VelocityRoute::default(),
            velocity_duration: 1.0,
            status_channel: channel::ARM_RESPONSE.to_string(),
        }
    }
}

/// Whether an action call waits for the robot to report completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Send and return [`ActionOutcome::Dispatched`].
    NoWait,
    /// Hold the single-flight slot until completion or the deadline.
    UpTo(Duration),
}

pub struct CommandExecutor {
    transport: Arc<dyn ControlTransport>,
    fsm: SharedStateMachine,
    bus: EventBus,
    gate: MotionGate,
    config: ExecutorConfig,
    speed_mode: Mutex<SpeedMode>,
    flight: SingleFlight,
}

impl CommandExecutor {
    pub fn new(
        transport: Arc<dyn ControlTransport>,
        fsm: SharedStateMachine,
        bus: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            transport,
            fsm,
            bus,
            gate: MotionGate::standard(),
            config,
            speed_mode: Mutex::new(SpeedMode::default()),
            flight: SingleFlight::new(),
        }
    }

    /// Replace the built-in motion rules.
    pub fn with_gate(mut self, gate: MotionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn state_machine(&self) -> &SharedStateMachine {
        &self.fsm
    }

    /// Snapshot of the last accepted robot state.
    pub fn state(&self) -> RobotState {
        self.fsm.lock().state().clone()
    }

    pub fn speed_mode(&self) -> SpeedMode {
        *self.speed_mode.lock()
    }

    pub fn is_action_in_flight(&self) -> bool {
        self.flight.is_busy()
    }

    // ────────────────────────────────────────────────────────────────────
    // Confirmed operations
    // ────────────────────────────────────────────────────────────────────

    /// Request a locomotion-state change.
    ///
    /// The requested state is recorded as current immediately after the
    /// request is sent; the state feed overwrites it with the robot's report.
    /// Targets outside the transition table are logged and still sent.
    #[instrument(skip(self, confirmation))]
    pub async fn set_fsm_state(
        &self,
        target: FsmState,
        confirmation: OperatorConfirmation,
    ) -> Result<RobotState, StriderError> {
        confirmation.redeem(SafetyAction::Transition(target))?;

        let from = {
            let fsm = self.fsm.lock();
            if !fsm.can_transition(target) {
                warn!(from = %fsm.current(), to = %target, "confirmed transition is outside the table");
            }
            fsm.current()
        };

        self.dispatch(&Operation::SetFsmId(target)).await?;

        let snapshot = self.fsm.lock().update_state(target, None, None);
        if from != target {
            self.emit(
                Topic::State,
                EventPayload::StateChanged {
                    from,
                    to: target,
                    state: snapshot.clone(),
                },
            );
        }
        Ok(snapshot)
    }

    #[instrument(skip(self, confirmation))]
    pub async fn set_balance_mode(&self, mode: u8, confirmation: OperatorConfirmation) -> Result<(), StriderError> {
        confirmation.redeem(SafetyAction::BalanceMode(mode))?;
        self.dispatch(&Operation::SetBalanceMode(mode)).await
    }

    // ────────────────────────────────────────────────────────────────────
    // Motion
    // ────────────────────────────────────────────────────────────────────

    /// Send a velocity request in m/s and rad/s. Returns the normalized
    /// values that were sent.
    pub async fn set_velocity(&self, forward: f32, lateral: f32, turn: f32) -> Result<NormalizedTwist, StriderError> {
        let state = self.state();
        self.gate
            .verify(&MotionIntent::Velocity { forward, lateral, turn }, &state)?;

        let shaped = velocity::shape(
            forward,
            lateral,
            turn,
            state.locomotion_state,
            self.speed_mode(),
            &self.config.velocity_limits,
        );
        debug!(?shaped, "velocity shaped");
        self.send_velocity(shaped).await?;
        Ok(shaped)
    }

    /// Zero velocity. Not gated, so it can always be sent.
    pub async fn stop_motion(&self) -> Result<(), StriderError> {
        self.send_velocity(NormalizedTwist::default()).await
    }

    async fn send_velocity(&self, twist: NormalizedTwist) -> Result<(), StriderError> {
        match self.config.velocity_route {
            VelocityRoute::Joystick => {
                let message = serde_json::to_value(JoystickMessage::from(twist))
                    .map_err(|e| StriderError::Serialization(e.to_string()))?;
                self.transport.publish(channel::WIRELESS_CONTROLLER, message).await
            }
            VelocityRoute::SportApi => {
                self.dispatch(&Operation::SetVelocity {
                    forward: twist.forward,
                    lateral: twist.lateral,
                    turn: twist.turn,
                    duration: self.config.velocity_duration,
                })
                .await
            }
        }
    }

    pub async fn set_speed_mode(&self, mode: SpeedMode) -> Result<(), StriderError> {
        self.gate
            .verify(&MotionIntent::SpeedMode(mode.id()), &self.state())?;
        self.dispatch(&Operation::SetSpeedMode(mode)).await?;
        *self.speed_mode.lock() = mode;
        info!(?mode, "speed mode set");
        Ok(())
    }

    pub async fn set_stand_height(&self, height: f32) -> Result<(), StriderError> {
        self.dispatch(&Operation::SetStandHeight(height)).await
    }

    pub async fn set_swing_height(&self, height: f32) -> Result<(), StriderError> {
        self.dispatch(&Operation::SetSwingHeight(height)).await
    }

    pub async fn set_arm_task(&self, task: ArmTask) -> Result<(), StriderError> {
        self.gate.verify(
            &MotionIntent::Gesture {
                action_id: task as u32,
            },
            &self.state(),
        )?;
        self.dispatch(&Operation::SetArmTask(task)).await
    }

    // ────────────────────────────────────────────────────────────────────
    // Arm actions
    // ────────────────────────────────────────────────────────────────────

    /// Run a pre-programmed gesture.
    #[instrument(skip(self))]
    pub async fn execute_gesture(&self, gesture_id: u32, wait: Wait) -> Result<ActionOutcome, StriderError> {
        self.gate.verify(
            &MotionIntent::Gesture {
                action_id: gesture_id,
            },
            &self.state(),
        )?;
        self.run_action(Operation::ExecuteGesture(gesture_id), wait).await
    }

    /// Lower the arms from a held gesture. Not gated.
    pub async fn release_arm(&self) -> Result<(), StriderError> {
        self.dispatch(&Operation::ExecuteGesture(crate::operation::gesture::RELEASE_ARM))
            .await
    }

    /// Replay a taught action by name.
    #[instrument(skip(self))]
    pub async fn execute_custom_action(&self, name: &str, wait: Wait) -> Result<ActionOutcome, StriderError> {
        self.gate.verify(&MotionIntent::TaughtAction, &self.state())?;
        self.run_action(Operation::ExecuteCustomAction(name.to_string()), wait)
            .await
    }

    pub async fn stop_custom_action(&self) -> Result<(), StriderError> {
        self.dispatch(&Operation::StopCustomAction).await
    }

    pub async fn start_recording(&self) -> Result<Option<Response>, StriderError> {
        self.dispatch_with_reply(&Operation::StartRecord).await
    }

    pub async fn stop_recording(&self) -> Result<Option<Response>, StriderError> {
        self.dispatch_with_reply(&Operation::StopRecord).await
    }

    pub async fn save_recorded_action(&self, name: &str) -> Result<Option<Response>, StriderError> {
        self.dispatch_with_reply(&Operation::SaveRecordedAction(name.to_string()))
            .await
    }

    pub async fn delete_action(&self, name: &str) -> Result<Option<Response>, StriderError> {
        self.dispatch_with_reply(&Operation::DeleteAction(name.to_string()))
            .await
    }

    pub async fn rename_action(&self, old_name: &str, new_name: &str) -> Result<Option<Response>, StriderError> {
        self.dispatch_with_reply(&Operation::RenameAction {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        })
        .await
    }

    /// Taught actions stored on the robot, as the decoded reply payload.
    pub async fn get_action_list(&self) -> Result<Option<Value>, StriderError> {
        let reply = self.dispatch_with_reply(&Operation::GetActionList).await?;
        Ok(reply.as_ref().and_then(response_data))
    }

    // ────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────

    /// Ask the robot for its locomotion state and record the answer.
    pub async fn query_fsm_state(&self) -> Result<Option<RobotState>, StriderError> {
        let Some(id) = self.query_int(Operation::GetFsmId).await? else {
            return Ok(None);
        };
        let Some(state) = u16::try_from(id).ok().and_then(FsmState::from_id) else {
            warn!(fsm_id = id, "robot reported an unknown fsm id");
            return Ok(None);
        };

        let (from, snapshot) = {
            let mut fsm = self.fsm.lock();
            let from = fsm.current();
            (from, fsm.update_state(state, None, None))
        };
        if from != state {
            self.emit(
                Topic::State,
                EventPayload::StateChanged {
                    from,
                    to: state,
                    state: snapshot.clone(),
                },
            );
        }
        Ok(Some(snapshot))
    }

    pub async fn query_fsm_mode(&self) -> Result<Option<i64>, StriderError> {
        self.query_int(Operation::GetFsmMode).await
    }

    pub async fn query_balance_mode(&self) -> Result<Option<i64>, StriderError> {
        self.query_int(Operation::GetBalanceMode).await
    }

    async fn query_int(&self, op: Operation) -> Result<Option<i64>, StriderError> {
        let Some(reply) = self.dispatch_with_reply(&op).await? else {
            return Ok(None);
        };
        let value = response_data(&reply).and_then(|d| d.get("data").and_then(Value::as_i64));
        if value.is_none() {
            warn!(api_id = reply.api_id, data = ?reply.data, "reply carried no integer payload");
        }
        Ok(value)
    }

    // ────────────────────────────────────────────────────────────────────
    // Subsystems and passthrough
    // ────────────────────────────────────────────────────────────────────

    pub async fn set_subsystem(&self, subsystem: Subsystem, enabled: bool) -> Result<(), StriderError> {
        let switch = if enabled { "ON" } else { "OFF" };
        info!(?subsystem, switch, "switching subsystem");
        self.transport
            .publish(subsystem.switch_channel(), json!({ "data": switch }))
            .await
    }

    /// Send an operation by numeric id; the channel is inferred from the id.
    ///
    /// Ids of confirmed operations are refused here; use
    /// [`set_fsm_state`](Self::set_fsm_state) or
    /// [`set_balance_mode`](Self::set_balance_mode).
    pub async fn send_raw(
        &self,
        api_id: u32,
        parameter: Value,
        expect_reply: bool,
    ) -> Result<Option<Response>, StriderError> {
        if matches!(api_id, api::SET_FSM_ID | api::SET_BALANCE_MODE) {
            return Err(StriderError::ConfirmationMismatch {
                confirmed: "nothing".to_string(),
                requested: format!("raw operation {api_id}"),
            });
        }
        let op = Operation::Raw { api_id, parameter };
        if expect_reply {
            self.dispatch_with_reply(&op).await
        } else {
            self.dispatch(&op).await.map(|()| None)
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Plumbing
    // ────────────────────────────────────────────────────────────────────

    /// Publish the envelope for `op` without waiting for a reply.
    async fn dispatch(&self, op: &Operation) -> Result<(), StriderError> {
        let channel = op.channel()?;
        let message = envelope_value(&op.to_request()?)?;
        self.transport.publish(channel, message).await?;
        self.command_issued(op.api_id(), channel);
        Ok(())
    }

    /// Send `op` and wait up to the reply timeout for its answer.
    async fn dispatch_with_reply(&self, op: &Operation) -> Result<Option<Response>, StriderError> {
        let channel = op.channel()?;
        let request = op.to_request()?;
        let reply = match timeout(self.config.reply_timeout, self.transport.request(channel, &request)).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(api_id = request.api_id, channel, "no reply before timeout");
                None
            }
        };
        self.command_issued(request.api_id, channel);

        match reply {
            Some(resp) if resp.api_id != request.api_id => {
                warn!(expected = request.api_id, got = resp.api_id, "discarding uncorrelated reply");
                Ok(None)
            }
            Some(resp) => {
                if !resp.is_success() {
                    warn!(api_id = resp.api_id, code = resp.code, "robot rejected request");
                }
                Ok(Some(resp))
            }
            None => Ok(None),
        }
    }

    async fn run_action(&self, op: Operation, wait: Wait) -> Result<ActionOutcome, StriderError> {
        let Wait::UpTo(limit) = wait else {
            self.dispatch(&op).await?;
            return Ok(ActionOutcome::Dispatched);
        };

        let Some(_slot) = self.flight.try_acquire() else {
            info!(api_id = op.api_id(), "another action is in flight");
            return Ok(ActionOutcome::Busy);
        };
        let mut status = ScopedSubscription::new(
            self.transport.as_ref(),
            self.transport.subscribe(&self.config.status_channel)?,
        );

        self.dispatch(&op).await?;
        let api_id = op.api_id();

        let outcome = match timeout(limit, completion(&mut status, api_id)).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                return Err(StriderError::Transport(format!(
                    "status channel {} closed while waiting for {api_id}",
                    self.config.status_channel
                )));
            }
            Err(_) => {
                warn!(api_id, ?limit, "no completion signal before timeout; the action may still be running");
                ActionOutcome::TimedOut
            }
        };

        match outcome {
            ActionOutcome::Failed {
                code: api::ERR_INVALID_FSM_FOR_ACTION,
            } => warn!(api_id, "robot refused the action in its current state"),
            _ => info!(api_id, %outcome, "action finished"),
        }
        self.emit(Topic::Actions, EventPayload::ActionFinished { api_id, outcome });
        Ok(outcome)
    }

    fn command_issued(&self, api_id: u32, channel: &str) {
        self.emit(
            Topic::Commands,
            EventPayload::CommandIssued {
                api_id,
                channel: channel.to_string(),
            },
        );
    }

    fn emit(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            warn!(error = %e, ?topic, "failed to publish executor event");
        }
    }
}

/// Wait for the completion signal of `api_id`. `None` when the subscription
/// closed first.
async fn completion(status: &mut ScopedSubscription<'_>, api_id: u32) -> Option<ActionOutcome> {
    loop {
        let message = status.recv().await?;
        match parse_response(&message) {
            Some(resp) if resp.api_id == api_id => {
                return Some(if resp.is_success() {
                    ActionOutcome::Completed
                } else {
                    ActionOutcome::Failed { code: resp.code }
                });
            }
            Some(resp) => debug!(api_id = resp.api_id, "ignoring status for another operation"),
            None => warn!(%message, "ignoring undecodable status message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_kernel::StateMachine;
    use strider_middleware::LoopbackTransport;
    use tokio::task::yield_now;

    fn executor_at(state: FsmState) -> (CommandExecutor, Arc<LoopbackTransport>, EventBus) {
        let transport = Arc::new(LoopbackTransport::new());
        let fsm = StateMachine::default().into_shared();
        fsm.lock().update_state(state, Some(0), None);
        let bus = EventBus::default();
        let exec = CommandExecutor::new(
            transport.clone() as Arc<dyn ControlTransport>,
            fsm,
            bus.clone(),
            ExecutorConfig {
                reply_timeout: Duration::from_millis(100),
                ..ExecutorConfig::default()
            },
        );
        (exec, transport, bus)
    }

    fn sent_parameter(message: &Value) -> Result<Value, Box<dyn std::error::Error>> {
        let raw = message["parameter"].as_str().ok_or("envelope without parameter")?;
        Ok(serde_json::from_str(raw)?)
    }

    #[tokio::test]
    async fn confirmed_transition_is_sent_and_recorded() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, bus) = executor_at(FsmState::Damp);
        let mut state_events = bus.subscribe_to(Topic::State);

        let token = OperatorConfirmation::for_test(SafetyAction::Transition(FsmState::Start));
        let snapshot = exec.set_fsm_state(FsmState::Start, token).await?;
        assert_eq!(snapshot.locomotion_state, FsmState::Start);
        assert_eq!(exec.state().locomotion_state, FsmState::Start);

        let sent = transport.published();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, channel::SPORT_REQUEST);
        assert_eq!(sent[0].1["api_id"], 7101);
        assert_eq!(sent_parameter(&sent[0].1)?, json!({"data": 200}));

        match state_events.recv().await?.payload {
            EventPayload::StateChanged { from, to, .. } => assert_eq!((from, to), (FsmState::Damp, FsmState::Start)),
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn entering_run_waits_for_a_sub_mode_report_before_arm_actions() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        let token = OperatorConfirmation::for_test(SafetyAction::Transition(FsmState::Run));
        let snapshot = exec.set_fsm_state(FsmState::Run, token).await?;
        assert_eq!(snapshot.sub_mode, None);

        let result = exec.execute_gesture(26, Wait::NoWait).await;
        assert!(matches!(result, Err(StriderError::MotionNotAllowed { .. })));
        assert_eq!(transport.published().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn token_for_another_action_is_refused() {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        let token = OperatorConfirmation::for_test(SafetyAction::Transition(FsmState::Damp));
        let result = exec.set_fsm_state(FsmState::ZeroTorque, token).await;
        assert!(matches!(result, Err(StriderError::ConfirmationMismatch { .. })));
        assert!(transport.published().is_empty());
        assert_eq!(exec.state().locomotion_state, FsmState::LockStand);
    }

    #[tokio::test]
    async fn balance_mode_needs_matching_token() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        exec.set_balance_mode(1, OperatorConfirmation::for_test(SafetyAction::BalanceMode(1)))
            .await?;
        assert!(
            exec.set_balance_mode(0, OperatorConfirmation::for_test(SafetyAction::BalanceMode(1)))
                .await
                .is_err()
        );
        assert_eq!(transport.published().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let (exec, transport, _bus) = executor_at(FsmState::Damp);
        transport.set_offline(true);
        let token = OperatorConfirmation::for_test(SafetyAction::Transition(FsmState::Start));
        let result = exec.set_fsm_state(FsmState::Start, token).await;
        assert!(matches!(result, Err(StriderError::Transport(_))));
        assert_eq!(exec.state().locomotion_state, FsmState::Damp);
    }

    #[tokio::test]
    async fn small_forward_is_zeroed_on_the_joystick() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        let shaped = exec.set_velocity(0.02, 0.4, 0.0).await?;
        assert_eq!(shaped.forward, 0.0);

        let sent = transport.published();
        assert_eq!(sent[0].0, channel::WIRELESS_CONTROLLER);
        assert_eq!(sent[0].1["ly"], 0.0);
        assert_eq!(sent[0].1["rx"], 0.0);
        assert!((sent[0].1["lx"].as_f64().ok_or("lx")? - 0.4).abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn velocity_on_sport_route() -> Result<(), Box<dyn std::error::Error>> {
        let transport = Arc::new(LoopbackTransport::new());
        let fsm = StateMachine::default().into_shared();
        fsm.lock().update_state(FsmState::LockStand, None, None);
        let exec = CommandExecutor::new(
            transport.clone() as Arc<dyn ControlTransport>,
            fsm,
            EventBus::default(),
            ExecutorConfig {
                velocity_route: VelocityRoute::SportApi,
                ..ExecutorConfig::default()
            },
        );
        exec.set_velocity(2.0, 0.0, 0.0).await?;

        let sent = transport.published();
        assert_eq!(sent[0].0, channel::SPORT_REQUEST);
        assert_eq!(sent[0].1["api_id"], 7105);
        assert_eq!(sent_parameter(&sent[0].1)?, json!({"velocity": [1.0, 0.0, 0.0], "duration": 1.0}));
        Ok(())
    }

    #[tokio::test]
    async fn velocity_refused_while_sitting() {
        let (exec, transport, _bus) = executor_at(FsmState::Sit);
        let result = exec.set_velocity(0.5, 0.0, 0.0).await;
        assert!(matches!(result, Err(StriderError::MotionNotAllowed { .. })));
        assert!(transport.published().is_empty());
        assert!(exec.stop_motion().await.is_ok());
    }

    #[tokio::test]
    async fn speed_mode_changes_run_limits() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, _transport, _bus) = executor_at(FsmState::Run);
        exec.set_speed_mode(SpeedMode::Medium).await?;
        assert_eq!(exec.speed_mode(), SpeedMode::Medium);
        let shaped = exec.set_velocity(1.0, 0.0, 0.0).await?;
        assert_eq!(shaped.forward, 0.5);
        Ok(())
    }

    #[tokio::test]
    async fn gesture_completes_on_status_signal() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, bus) = executor_at(FsmState::LockStand);
        let mut actions = bus.subscribe_to(Topic::Actions);

        let gesture = exec.execute_gesture(26, Wait::UpTo(Duration::from_secs(5)));
        let robot = async {
            yield_now().await;
            transport.inject(channel::ARM_RESPONSE, json!({"api_id": 7001, "code": 0}));
            transport.inject(channel::ARM_RESPONSE, json!({"api_id": 7106, "code": 0}));
        };
        let (outcome, ()) = tokio::join!(gesture, robot);

        assert_eq!(outcome?, ActionOutcome::Completed);
        assert!(!exec.is_action_in_flight());
        assert_eq!(transport.subscriber_count(channel::ARM_RESPONSE), 0);
        match actions.recv().await?.payload {
            EventPayload::ActionFinished { api_id, outcome } => {
                assert_eq!((api_id, outcome), (7106, ActionOutcome::Completed));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn second_gesture_is_busy_and_first_still_completes() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);

        let first = exec.execute_gesture(26, Wait::UpTo(Duration::from_secs(5)));
        let second = async {
            yield_now().await;
            let outcome = exec.execute_gesture(18, Wait::UpTo(Duration::from_secs(5))).await;
            transport.inject(channel::ARM_RESPONSE, json!({"api_id": 7106, "code": 0}));
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(second?, ActionOutcome::Busy);
        assert_eq!(first?, ActionOutcome::Completed);
        let gestures_sent = transport
            .published()
            .iter()
            .filter(|(ch, _)| ch == channel::ARM_REQUEST)
            .count();
        assert_eq!(gestures_sent, 1);
        Ok(())
    }

    #[tokio::test]
    async fn gesture_failure_code_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        let gesture = exec.execute_gesture(26, Wait::UpTo(Duration::from_secs(5)));
        let robot = async {
            yield_now().await;
            transport.inject(
                channel::ARM_RESPONSE,
                json!({"header": {"identity": {"api_id": 7106}, "status": {"code": 7404}}}),
            );
        };
        let (outcome, ()) = tokio::join!(gesture, robot);
        assert_eq!(outcome?, ActionOutcome::Failed { code: 7404 });
        Ok(())
    }

    #[tokio::test]
    async fn gesture_times_out_softly_and_frees_the_slot() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        let outcome = exec
            .execute_gesture(26, Wait::UpTo(Duration::from_millis(30)))
            .await?;
        assert_eq!(outcome, ActionOutcome::TimedOut);
        assert!(!exec.is_action_in_flight());
        assert_eq!(transport.subscriber_count(channel::ARM_RESPONSE), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_send_frees_the_slot() {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        transport.set_offline(true);
        let result = exec
            .execute_custom_action("wave", Wait::UpTo(Duration::from_secs(1)))
            .await;
        assert!(matches!(result, Err(StriderError::Transport(_))));
        assert!(!exec.is_action_in_flight());
        assert_eq!(transport.subscriber_count(channel::ARM_RESPONSE), 0);
    }

    #[tokio::test]
    async fn gesture_refused_when_not_standing() {
        let (exec, transport, _bus) = executor_at(FsmState::Damp);
        let result = exec.execute_gesture(26, Wait::NoWait).await;
        assert!(matches!(result, Err(StriderError::MotionNotAllowed { .. })));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn no_wait_dispatches_custom_action() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, bus) = executor_at(FsmState::LockStand);
        let mut commands = bus.subscribe_to(Topic::Commands);
        let outcome = exec.execute_custom_action("bow", Wait::NoWait).await?;
        assert_eq!(outcome, ActionOutcome::Dispatched);

        let sent = transport.published();
        assert_eq!(sent_parameter(&sent[0].1)?, json!({"action_name": "bow"}));
        match commands.recv().await?.payload {
            EventPayload::CommandIssued { api_id, channel: ch } => {
                assert_eq!((api_id, ch.as_str()), (7108, channel::ARM_REQUEST));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn query_records_reported_state() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::Damp);
        transport.script_reply(Response {
            api_id: 7001,
            code: 0,
            data: Some(r#"{"data":500}"#.into()),
        });
        let snapshot = exec.query_fsm_state().await?.ok_or("no answer")?;
        assert_eq!(snapshot.locomotion_state, FsmState::LockStand);
        assert_eq!(exec.query_fsm_mode().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_reply_is_no_answer() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::Damp);
        transport.script_reply(Response {
            api_id: 7001,
            code: 0,
            data: Some("not json".into()),
        });
        assert_eq!(exec.query_fsm_state().await?, None);
        assert_eq!(exec.state().locomotion_state, FsmState::Damp);
        Ok(())
    }

    #[tokio::test]
    async fn raw_passthrough_routes_by_range() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        exec.send_raw(1801, json!({}), false).await?;
        exec.send_raw(7109, json!({}), false).await?;
        let channels: Vec<String> = transport.published().into_iter().map(|(ch, _)| ch).collect();
        assert_eq!(channels, vec![channel::SLAM_REQUEST.to_string(), channel::ARM_REQUEST.to_string()]);

        assert_eq!(
            exec.send_raw(4001, json!({}), false).await,
            Err(StriderError::UnroutableOperation(4001))
        );
        assert!(exec.send_raw(7101, json!({"data": 0}), false).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn lidar_switch_message() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        exec.set_subsystem(Subsystem::Lidar, false).await?;
        assert_eq!(
            transport.published(),
            vec![(channel::LIDAR_SWITCH.to_string(), json!({"data": "OFF"}))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn teach_control_replies() -> Result<(), Box<dyn std::error::Error>> {
        let (exec, transport, _bus) = executor_at(FsmState::LockStand);
        transport.script_reply(Response {
            api_id: 7113,
            code: 0,
            data: None,
        });
        let reply = exec.rename_action("a", "b").await?.ok_or("no reply")?;
        assert!(reply.is_success());
        assert_eq!(exec.start_recording().await?, None);
        Ok(())
    }
}
