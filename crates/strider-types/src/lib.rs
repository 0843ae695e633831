//! Shared vocabulary for the Strider workspace: locomotion states, the robot
//! state snapshot, the control-channel envelope, bus events and the global
//! error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Locomotion states
// ────────────────────────────────────────────────────────────────────────────

/// Gross locomotion posture reported and accepted by the robot.
///
/// The numeric ids are the wire contract with the robot firmware and must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum FsmState {
    /// No joint torque at all. The robot collapses if not supported.
    ZeroTorque = 0,
    /// Damped joints, used for recovery.
    Damp = 1,
    Squat = 2,
    Sit = 3,
    /// Stand-from-sit without active balance.
    LockStanding = 4,
    /// Preparatory ready state.
    Start = 200,
    /// Balanced standing and walking.
    LockStand = 500,
    /// Balanced walking with the 3-DOF waist unlocked.
    LockStandAdvanced = 501,
    /// Stand-from-lying recovery.
    StandUp = 702,
    /// Squat toggle recovery.
    SquatToStand = 706,
    /// Balanced running.
    Run = 801,
}

impl FsmState {
    /// Every known state, in ascending id order.
    pub const ALL: [FsmState; 11] = [
        FsmState::ZeroTorque,
        FsmState::Damp,
        FsmState::Squat,
        FsmState::Sit,
        FsmState::LockStanding,
        FsmState::Start,
        FsmState::LockStand,
        FsmState::LockStandAdvanced,
        FsmState::StandUp,
        FsmState::SquatToStand,
        FsmState::Run,
    ];

    /// Numeric id used on the wire.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Look up a state by its numeric id.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Upper-case name, also used as the operator confirmation phrase.
    pub fn name(self) -> &'static str {
        match self {
            FsmState::ZeroTorque => "ZERO_TORQUE",
            FsmState::Damp => "DAMP",
            FsmState::Squat => "SQUAT",
            FsmState::Sit => "SIT",
            FsmState::LockStanding => "LOCK_STANDING",
            FsmState::Start => "START",
            FsmState::LockStand => "LOCK_STAND",
            FsmState::LockStandAdvanced => "LOCK_STAND_ADV",
            FsmState::StandUp => "STAND_UP",
            FsmState::SquatToStand => "SQUAT_TO_STAND",
            FsmState::Run => "RUN",
        }
    }

    /// Indicator colour shown for this state.
    pub fn indicator(self) -> IndicatorColor {
        IndicatorColor::for_state(self)
    }

    /// `true` for the states that remove torque or active balance control.
    pub fn is_escape_hatch(self) -> bool {
        matches!(self, FsmState::Damp | FsmState::ZeroTorque)
    }
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

impl TryFrom<u16> for FsmState {
    type Error = StriderError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(StriderError::UnknownState(id))
    }
}

impl FromStr for FsmState {
    type Err = StriderError;

    /// Accepts either the numeric id (`"500"`) or the name, case-insensitive
    /// (`"lock_stand"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u16>() {
            return Self::try_from(id);
        }
        let upper = s.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|st| st.name() == upper)
            .ok_or_else(|| StriderError::Serialization(format!("unknown state name '{s}'")))
    }
}

/// Status light colour on the operator console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorColor {
    Purple,
    Orange,
    Green,
    Blue,
    DarkBlue,
    Red,
}

impl IndicatorColor {
    /// Colour for a locomotion state. `Red` is never returned here; it is
    /// reserved for error reports (see [`RobotState::effective_indicator`]).
    pub fn for_state(state: FsmState) -> Self {
        match state {
            FsmState::ZeroTorque => IndicatorColor::Purple,
            FsmState::Damp => IndicatorColor::Orange,
            FsmState::Sit => IndicatorColor::Green,
            FsmState::Run => IndicatorColor::DarkBlue,
            _ => IndicatorColor::Blue,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Robot state snapshot
// ────────────────────────────────────────────────────────────────────────────

/// Snapshot of the robot as last accepted by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub locomotion_state: FsmState,
    /// Always `IndicatorColor::for_state(locomotion_state)`.
    pub indicator_color: IndicatorColor,
    /// Firmware sub-mode reported alongside the state (e.g. gait variant).
    pub sub_mode: Option<i32>,
    pub task_id: Option<i32>,
    pub error: Option<String>,
}

impl RobotState {
    /// Low-power state the robot is assumed to be in before any report.
    pub fn initial() -> Self {
        Self::at(FsmState::ZeroTorque)
    }

    pub fn at(state: FsmState) -> Self {
        Self {
            locomotion_state: state,
            indicator_color: state.indicator(),
            sub_mode: None,
            task_id: None,
            error: None,
        }
    }

    /// Colour the console should actually show: `Red` while an error is
    /// recorded, the state colour otherwise.
    pub fn effective_indicator(&self) -> IndicatorColor {
        if self.error.is_some() {
            IndicatorColor::Red
        } else {
            self.indicator_color
        }
    }
}

impl Default for RobotState {
    fn default() -> Self {
        Self::initial()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Safety-relevant actions
// ────────────────────────────────────────────────────────────────────────────

/// An action that needs an explicit operator confirmation before it may be
/// sent to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyAction {
    /// Change of locomotion state.
    Transition(FsmState),
    /// Change of the balance controller mode.
    BalanceMode(u8),
    /// Release arm torque for hand-guided teaching.
    TeachCompliance,
}

impl SafetyAction {
    /// Phrase the operator has to type to confirm this action.
    pub fn phrase(&self) -> String {
        match self {
            SafetyAction::Transition(state) => state.name().to_string(),
            SafetyAction::BalanceMode(mode) => format!("BALANCE_{mode}"),
            SafetyAction::TeachCompliance => "RELEASE_ARMS".to_string(),
        }
    }
}

impl fmt::Display for SafetyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyAction::Transition(state) => write!(f, "transition to {state}"),
            SafetyAction::BalanceMode(mode) => write!(f, "balance mode {mode}"),
            SafetyAction::TeachCompliance => write!(f, "arm compliance for teaching"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Control-channel envelope
// ────────────────────────────────────────────────────────────────────────────

/// Outgoing request on the control channel.
///
/// `parameter` is itself a serialized JSON object, as the robot expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub api_id: u32,
    pub parameter: String,
}

/// Reply correlated to a [`Request`] by `api_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub api_id: u32,
    /// `0` on success, firmware error code otherwise.
    pub code: i32,
    /// Optional nested serialized payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// How a wait-for-completion action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    /// The robot reported completion.
    Completed,
    /// The robot reported a failure code.
    Failed { code: i32 },
    /// The wait expired. The physical action may still be running.
    TimedOut,
    /// Another action was already in flight; nothing was sent.
    Busy,
    /// The request was sent without waiting for completion.
    Dispatched,
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Completed => write!(f, "completed"),
            ActionOutcome::Failed { code } => write!(f, "failed (code {code})"),
            ActionOutcome::TimedOut => write!(f, "timed out"),
            ActionOutcome::Busy => write!(f, "busy"),
            ActionOutcome::Dispatched => write!(f, "dispatched"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event bus payloads
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "strider-middleware::state_feed"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// The accepted locomotion state changed.
    StateChanged {
        from: FsmState,
        to: FsmState,
        state: RobotState,
    },
    /// A request left the executor.
    CommandIssued { api_id: u32, channel: String },
    /// A wait-for-completion action ended.
    ActionFinished { api_id: u32, outcome: ActionOutcome },
    /// Teach-mode session lifecycle message.
    TeachSession(String),
    /// Operator-level alert such as an interrupt request.
    SystemAlert { code: u32, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning transport failures, rejected transitions and
/// missing confirmations.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StriderError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: FsmState, to: FsmState },

    #[error("Unknown locomotion state id {0}")]
    UnknownState(u16),

    #[error("Motion not allowed in {state}: {reason}")]
    MotionNotAllowed { state: FsmState, reason: String },

    #[error("Confirmation was issued for '{confirmed}' but '{requested}' was requested")]
    ConfirmationMismatch { confirmed: String, requested: String },

    #[error("No control channel serves operation id {0}")]
    UnroutableOperation(u32),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StriderError {
    fn from(e: std::io::Error) -> Self {
        StriderError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ids_are_stable() {
        assert_eq!(FsmState::ZeroTorque.id(), 0);
        assert_eq!(FsmState::Damp.id(), 1);
        assert_eq!(FsmState::LockStanding.id(), 4);
        assert_eq!(FsmState::Start.id(), 200);
        assert_eq!(FsmState::LockStandAdvanced.id(), 501);
        assert_eq!(FsmState::StandUp.id(), 702);
        assert_eq!(FsmState::SquatToStand.id(), 706);
        assert_eq!(FsmState::Run.id(), 801);
    }

    #[test]
    fn from_id_covers_every_state() {
        for state in FsmState::ALL {
            assert_eq!(FsmState::from_id(state.id()), Some(state));
        }
        assert_eq!(FsmState::from_id(999), None);
        assert!(matches!(
            FsmState::try_from(42),
            Err(StriderError::UnknownState(42))
        ));
    }

    #[test]
    fn parse_state_by_name_or_id() {
        assert_eq!("lock_stand".parse::<FsmState>().unwrap(), FsmState::LockStand);
        assert_eq!("801".parse::<FsmState>().unwrap(), FsmState::Run);
        assert!("flying".parse::<FsmState>().is_err());
    }

    #[test]
    fn indicator_is_a_function_of_state() {
        assert_eq!(FsmState::ZeroTorque.indicator(), IndicatorColor::Purple);
        assert_eq!(FsmState::Damp.indicator(), IndicatorColor::Orange);
        assert_eq!(FsmState::Sit.indicator(), IndicatorColor::Green);
        assert_eq!(FsmState::Start.indicator(), IndicatorColor::Blue);
        assert_eq!(FsmState::LockStand.indicator(), IndicatorColor::Blue);
        assert_eq!(FsmState::LockStandAdvanced.indicator(), IndicatorColor::Blue);
        assert_eq!(FsmState::Run.indicator(), IndicatorColor::DarkBlue);
        assert_eq!(FsmState::SquatToStand.indicator(), IndicatorColor::Blue);
        for state in FsmState::ALL {
            assert_ne!(state.indicator(), IndicatorColor::Red);
        }
    }

    #[test]
    fn initial_state_is_zero_torque_purple() {
        let s = RobotState::initial();
        assert_eq!(s.locomotion_state, FsmState::ZeroTorque);
        assert_eq!(s.indicator_color, IndicatorColor::Purple);
        assert!(s.error.is_none());
    }

    #[test]
    fn error_turns_effective_indicator_red_only() {
        let mut s = RobotState::at(FsmState::Sit);
        s.error = Some("over-temperature".into());
        assert_eq!(s.indicator_color, IndicatorColor::Green);
        assert_eq!(s.effective_indicator(), IndicatorColor::Red);
    }

    #[test]
    fn safety_action_phrases() {
        assert_eq!(SafetyAction::Transition(FsmState::Damp).phrase(), "DAMP");
        assert_eq!(SafetyAction::BalanceMode(1).phrase(), "BALANCE_1");
        assert_eq!(SafetyAction::TeachCompliance.phrase(), "RELEASE_ARMS");
    }

    #[test]
    fn response_without_data_omits_field() {
        let resp = Response { api_id: 7101, code: 0, data: None };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("data"));
        let back: Response = serde_json::from_str(r#"{"api_id":7106,"code":7404}"#).unwrap();
        assert!(!back.is_success());
        assert_eq!(back.data, None);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "strider-middleware::state_feed",
            EventPayload::StateChanged {
                from: FsmState::Damp,
                to: FsmState::Start,
                state: RobotState::at(FsmState::Start),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn error_display() {
        let err = StriderError::InvalidTransition {
            from: FsmState::Sit,
            to: FsmState::Run,
        };
        assert!(err.to_string().contains("SIT(3)"));
        assert!(err.to_string().contains("RUN(801)"));
        assert!(StriderError::UnroutableOperation(4242).to_string().contains("4242"));
    }
}
