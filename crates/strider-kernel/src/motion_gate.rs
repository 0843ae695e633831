//! [`MotionGate`] – state interlock for motion requests.
//!
//! Before a velocity, gesture or speed-mode request leaves the executor it is
//! passed through [`MotionGate::verify`] together with the current
//! [`RobotState`]. Every registered [`Rule`] is evaluated in order; the first
//! violation returns [`StriderError::MotionNotAllowed`] and nothing is sent.
//!
//! Locomotion-state changes are not gated here: they carry an operator
//! confirmation instead (see [`crate::confirmation`]).

use strider_types::{FsmState, RobotState, StriderError};

/// A motion request, reduced to what the rules need to see.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionIntent {
    Velocity { forward: f32, lateral: f32, turn: f32 },
    Gesture { action_id: u32 },
    /// Replay of a taught arm action.
    TaughtAction,
    SpeedMode(u8),
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single interlock that a motion intent must satisfy.
pub trait Rule: Send + Sync {
    /// Human-readable name used in rejection messages.
    fn name(&self) -> &str;

    /// Return `Ok(())` when `intent` may be sent in `state`.
    fn check(&self, intent: &MotionIntent, state: &RobotState) -> Result<(), StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// MotionGate
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine consulted before any motion request is dispatched.
///
/// # Example
///
/// ```
/// use strider_kernel::motion_gate::{MotionGate, MotionIntent};
/// use strider_types::{FsmState, RobotState};
///
/// let gate = MotionGate::standard();
/// let walk = MotionIntent::Velocity { forward: 0.3, lateral: 0.0, turn: 0.0 };
///
/// assert!(gate.verify(&walk, &RobotState::at(FsmState::LockStand)).is_ok());
/// assert!(gate.verify(&walk, &RobotState::at(FsmState::Sit)).is_err());
/// ```
#[derive(Default)]
pub struct MotionGate {
    rules: Vec<Box<dyn Rule>>,
}

impl MotionGate {
    /// Gate with no rules; everything passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate with the built-in rules: [`BalancedMotionRule`],
    /// [`GestureStateRule`] and [`SpeedModeRule`].
    pub fn standard() -> Self {
        let mut gate = Self::new();
        gate.add_rule(Box::new(BalancedMotionRule));
        gate.add_rule(Box::new(GestureStateRule));
        gate.add_rule(Box::new(SpeedModeRule));
        gate
    }

    /// Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, intent: &MotionIntent, state: &RobotState) -> Result<(), StriderError> {
        for rule in &self.rules {
            rule.check(intent, state)?;
        }
        Ok(())
    }
}

fn reject(state: &RobotState, rule: &str, why: String) -> StriderError {
    StriderError::MotionNotAllowed {
        state: state.locomotion_state,
        reason: format!("{rule}: {why}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Velocity commands need an actively balanced walking or running state.
pub struct BalancedMotionRule;

impl Rule for BalancedMotionRule {
    fn name(&self) -> &str {
        "balanced_motion"
    }

    fn check(&self, intent: &MotionIntent, state: &RobotState) -> Result<(), StriderError> {
        if let MotionIntent::Velocity { .. } = intent
            && !matches!(
                state.locomotion_state,
                FsmState::LockStand | FsmState::LockStandAdvanced | FsmState::Run
            )
        {
            return Err(reject(
                state,
                self.name(),
                "velocity requires LOCK_STAND, LOCK_STAND_ADV or RUN".into(),
            ));
        }
        Ok(())
    }
}

/// Gestures and taught actions need a balanced stance; while running only
/// sub-modes 0 and 3 keep the arms free.
pub struct GestureStateRule;

impl Rule for GestureStateRule {
    fn name(&self) -> &str {
        "gesture_state"
    }

    fn check(&self, intent: &MotionIntent, state: &RobotState) -> Result<(), StriderError> {
        if !matches!(intent, MotionIntent::Gesture { .. } | MotionIntent::TaughtAction) {
            return Ok(());
        }
        let ok = match state.locomotion_state {
            FsmState::LockStand | FsmState::LockStandAdvanced => true,
            FsmState::Run => matches!(state.sub_mode, Some(0) | Some(3)),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(reject(
                state,
                self.name(),
                format!("arm actions unavailable (sub-mode {:?})", state.sub_mode),
            ))
        }
    }
}

/// Speed modes only apply while running.
pub struct SpeedModeRule;

impl Rule for SpeedModeRule {
    fn name(&self) -> &str {
        "speed_mode"
    }

    fn check(&self, intent: &MotionIntent, state: &RobotState) -> Result<(), StriderError> {
        if let MotionIntent::SpeedMode(mode) = intent
            && state.locomotion_state != FsmState::Run
        {
            return Err(reject(
                state,
                self.name(),
                format!("speed mode {mode} needs RUN"),
            ));
        }
        Ok(())
    }
}
