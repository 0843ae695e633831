//! Velocity shaping: deadband, clamp and normalization.
//!
//! The robot takes velocity as fractions of the current gait's maximum. A raw
//! `(forward, lateral, turn)` request in m/s and rad/s is first zeroed per
//! axis below the deadband, then clamped to the gait's limits and divided by
//! them.

use serde::{Deserialize, Serialize};
use strider_types::{FsmState, StriderError};

/// Running speed ceiling, selected with `SetSpeedMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedMode {
    #[default]
    Low,
    Medium,
    High,
    Ultra,
}

impl SpeedMode {
    pub fn id(self) -> u8 {
        match self {
            SpeedMode::Low => 0,
            SpeedMode::Medium => 1,
            SpeedMode::High => 2,
            SpeedMode::Ultra => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, StriderError> {
        match id {
            0 => Ok(SpeedMode::Low),
            1 => Ok(SpeedMode::Medium),
            2 => Ok(SpeedMode::High),
            3 => Ok(SpeedMode::Ultra),
            other => Err(StriderError::Serialization(format!("unknown speed mode {other}"))),
        }
    }

    /// Forward speed limit in m/s while running.
    pub fn max_linear(self) -> f32 {
        match self {
            SpeedMode::Low => 1.0,
            SpeedMode::Medium => 2.0,
            SpeedMode::High => 2.7,
            SpeedMode::Ultra => 3.0,
        }
    }
}

/// Per-axis maxima used for normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub forward: f32,
    pub lateral: f32,
    pub turn: f32,
}

/// Gait limits and the deadband applied before them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityLimits {
    pub walk: AxisLimits,
    pub run_lateral: f32,
    pub run_turn: f32,
    /// Minimum magnitude per axis; smaller values become zero.
    pub deadband: f32,
}

impl Default for VelocityLimits {
    fn default() -> Self {
        Self {
            walk: AxisLimits {
                forward: 1.0,
                lateral: 1.0,
                turn: 1.0,
            },
            run_lateral: 1.0,
            run_turn: 1.5,
            deadband: 0.05,
        }
    }
}

impl VelocityLimits {
    /// Limits in effect for `state`. Running uses the speed-mode ceiling,
    /// every other state the walking limits.
    pub fn for_gait(&self, state: FsmState, speed_mode: SpeedMode) -> AxisLimits {
        if state == FsmState::Run {
            AxisLimits {
                forward: speed_mode.max_linear(),
                lateral: self.run_lateral,
                turn: self.run_turn,
            }
        } else {
            self.walk
        }
    }
}

/// Normalized velocity, every axis in `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedTwist {
    pub forward: f32,
    pub lateral: f32,
    pub turn: f32,
}

impl NormalizedTwist {
    pub fn is_zero(&self) -> bool {
        self.forward == 0.0 && self.lateral == 0.0 && self.turn == 0.0
    }
}

fn shape_axis(value: f32, max: f32, deadband: f32) -> f32 {
    if !value.is_finite() || value.abs() < deadband || max <= 0.0 {
        return 0.0;
    }
    value.clamp(-max, max) / max
}

/// Deadband, clamp and normalize a raw velocity request.
pub fn shape(
    forward: f32,
    lateral: f32,
    turn: f32,
    state: FsmState,
    speed_mode: SpeedMode,
    limits: &VelocityLimits,
) -> NormalizedTwist {
    let max = limits.for_gait(state, speed_mode);
    NormalizedTwist {
        forward: shape_axis(forward, max.forward, limits.deadband),
        lateral: shape_axis(lateral, max.lateral, limits.deadband),
        turn: shape_axis(turn, max.turn, limits.deadband),
    }
}

/// Where velocity requests are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityRoute {
    /// Joystick-style message on the wireless-controller channel.
    #[default]
    Joystick,
    /// `SetVelocity` envelope on the locomotion request channel.
    SportApi,
}

/// Wireless-controller message. `ly` is forward, `lx` lateral, `rx` turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoystickMessage {
    pub lx: f32,
    pub ly: f32,
    pub rx: f32,
    pub ry: f32,
    pub keys: u32,
}

impl From<NormalizedTwist> for JoystickMessage {
    fn from(t: NormalizedTwist) -> Self {
        Self {
            lx: t.lateral,
            ly: t.forward,
            rx: t.turn,
            ry: 0.0,
            keys: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> VelocityLimits {
        VelocityLimits::default()
    }

    #[test]
    fn below_deadband_is_zero() {
        let t = shape(0.03, 0.5, -0.04, FsmState::LockStand, SpeedMode::Low, &limits());
        assert_eq!(t.forward, 0.0);
        assert_eq!(t.lateral, 0.5);
        assert_eq!(t.turn, 0.0);
    }

    #[test]
    fn walking_clamps_to_unit() {
        let t = shape(3.0, -2.0, 0.5, FsmState::LockStand, SpeedMode::Ultra, &limits());
        assert_eq!(t.forward, 1.0);
        assert_eq!(t.lateral, -1.0);
        assert_eq!(t.turn, 0.5);
    }

    #[test]
    fn running_scales_by_speed_mode() {
        let t = shape(1.0, 0.0, 0.75, FsmState::Run, SpeedMode::Medium, &limits());
        assert_eq!(t.forward, 0.5);
        assert_eq!(t.turn, 0.5);

        let ultra = shape(6.0, 0.0, 0.0, FsmState::Run, SpeedMode::Ultra, &limits());
        assert_eq!(ultra.forward, 1.0);
    }

    #[test]
    fn non_finite_input_is_zero() {
        let t = shape(f32::NAN, f32::INFINITY, 0.2, FsmState::LockStand, SpeedMode::Low, &limits());
        assert_eq!((t.forward, t.lateral), (0.0, 0.0));
        assert!(!t.is_zero());
    }

    #[test]
    fn speed_mode_ids() {
        for mode in [SpeedMode::Low, SpeedMode::Medium, SpeedMode::High, SpeedMode::Ultra] {
            assert_eq!(SpeedMode::from_id(mode.id()), Ok(mode));
        }
        assert!(SpeedMode::from_id(4).is_err());
    }

    #[test]
    fn joystick_axes() -> Result<(), Box<dyn std::error::Error>> {
        let msg = JoystickMessage::from(NormalizedTwist {
            forward: 0.5,
            lateral: -0.25,
            turn: 0.1,
        });
        let value = serde_json::to_value(msg)?;
        assert_eq!(value["ly"], 0.5);
        assert_eq!(value["lx"], -0.25);
        assert_eq!(value["ry"], 0.0);
        assert_eq!(value["keys"], 0);
        Ok(())
    }
}
