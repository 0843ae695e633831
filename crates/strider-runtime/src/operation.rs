//! Typed control-channel operations and their envelopes.
//!
//! Every [`Operation`] knows its numeric `api_id`, the request channel that
//! serves it and the JSON parameter object it carries. Raw ids are routed by
//! range with [`route_raw`].

use serde_json::{Value, json};
use strider_middleware::channel;
use strider_types::{FsmState, Request, Response, StriderError};
use tracing::warn;

use crate::velocity::SpeedMode;

/// Numeric operation ids.
pub mod api {
    // Locomotion service.
    pub const GET_FSM_ID: u32 = 7001;
    pub const GET_FSM_MODE: u32 = 7002;
    pub const GET_BALANCE_MODE: u32 = 7003;
    pub const SET_FSM_ID: u32 = 7101;
    pub const SET_BALANCE_MODE: u32 = 7102;
    pub const SET_SWING_HEIGHT: u32 = 7103;
    pub const SET_STAND_HEIGHT: u32 = 7104;
    pub const SET_VELOCITY: u32 = 7105;
    pub const SET_ARM_TASK: u32 = 7106;
    pub const SET_SPEED_MODE: u32 = 7107;

    // Arm service. 7106 and 7107 collide with the locomotion ids above.
    pub const EXECUTE_ACTION: u32 = 7106;
    pub const GET_ACTION_LIST: u32 = 7107;
    pub const EXECUTE_CUSTOM_ACTION: u32 = 7108;
    pub const START_RECORD_ACTION: u32 = 7109;
    pub const STOP_RECORD_ACTION: u32 = 7110;
    pub const SAVE_RECORDED_ACTION: u32 = 7111;
    pub const DELETE_ACTION: u32 = 7112;
    pub const RENAME_ACTION: u32 = 7113;
    pub const STOP_CUSTOM_ACTION: u32 = 7114;

    /// Firmware code for "gesture not allowed in this FSM state".
    pub const ERR_INVALID_FSM_FOR_ACTION: i32 = 7404;
}

/// Pre-programmed arm gestures.
pub mod gesture {
    /// Return the arms from a held pose.
    pub const RELEASE_ARM: u32 = 99;
    pub const TWO_HAND_KISS: u32 = 11;
    pub const LEFT_KISS: u32 = 12;
    pub const HANDS_UP: u32 = 15;
    pub const CLAP: u32 = 17;
    pub const HIGH_FIVE: u32 = 18;
    pub const HUG: u32 = 19;
    pub const HEART: u32 = 20;
    pub const RIGHT_HEART: u32 = 21;
    pub const REJECT: u32 = 22;
    pub const RIGHT_HAND_UP: u32 = 23;
    pub const X_RAY: u32 = 24;
    pub const FACE_WAVE: u32 = 25;
    pub const HIGH_WAVE: u32 = 26;
    pub const SHAKE_HAND: u32 = 27;

    /// `(id, name)` for listing.
    pub const ALL: [(u32, &str); 15] = [
        (RELEASE_ARM, "release_arm"),
        (TWO_HAND_KISS, "two_hand_kiss"),
        (LEFT_KISS, "left_kiss"),
        (HANDS_UP, "hands_up"),
        (CLAP, "clap"),
        (HIGH_FIVE, "high_five"),
        (HUG, "hug"),
        (HEART, "heart"),
        (RIGHT_HEART, "right_heart"),
        (REJECT, "reject"),
        (RIGHT_HAND_UP, "right_hand_up"),
        (X_RAY, "x_ray"),
        (FACE_WAVE, "face_wave"),
        (HIGH_WAVE, "high_wave"),
        (SHAKE_HAND, "shake_hand"),
    ];

    pub fn by_name(name: &str) -> Option<u32> {
        ALL.iter().find(|(_, n)| *n == name).map(|(id, _)| *id)
    }
}

/// Simple arm tasks run by the locomotion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmTask {
    WaveHand = 0,
    WaveHandTurn = 1,
    ShakeHandStage1 = 2,
    ShakeHandStage2 = 3,
}

/// Off-board subsystems that can be switched on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Lidar,
}

impl Subsystem {
    pub fn switch_channel(self) -> &'static str {
        match self {
            Subsystem::Lidar => channel::LIDAR_SWITCH,
        }
    }
}

/// A control-channel request in typed form.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    GetFsmId,
    GetFsmMode,
    GetBalanceMode,
    SetFsmId(FsmState),
    SetBalanceMode(u8),
    SetSwingHeight(f32),
    SetStandHeight(f32),
    /// Normalized velocity triple and how long the robot should hold it.
    SetVelocity { forward: f32, lateral: f32, turn: f32, duration: f32 },
    SetArmTask(ArmTask),
    SetSpeedMode(SpeedMode),
    ExecuteGesture(u32),
    GetActionList,
    ExecuteCustomAction(String),
    StartRecord,
    StopRecord,
    SaveRecordedAction(String),
    DeleteAction(String),
    RenameAction { old_name: String, new_name: String },
    StopCustomAction,
    /// Passthrough; the channel is inferred from the id range.
    Raw { api_id: u32, parameter: Value },
}

impl Operation {
    pub fn api_id(&self) -> u32 {
        match self {
            Operation::GetFsmId => api::GET_FSM_ID,
            Operation::GetFsmMode => api::GET_FSM_MODE,
            Operation::GetBalanceMode => api::GET_BALANCE_MODE,
            Operation::SetFsmId(_) => api::SET_FSM_ID,
            Operation::SetBalanceMode(_) => api::SET_BALANCE_MODE,
            Operation::SetSwingHeight(_) => api::SET_SWING_HEIGHT,
            Operation::SetStandHeight(_) => api::SET_STAND_HEIGHT,
            Operation::SetVelocity { .. } => api::SET_VELOCITY,
            Operation::SetArmTask(_) => api::SET_ARM_TASK,
            Operation::SetSpeedMode(_) => api::SET_SPEED_MODE,
            Operation::ExecuteGesture(_) => api::EXECUTE_ACTION,
            Operation::GetActionList => api::GET_ACTION_LIST,
            Operation::ExecuteCustomAction(_) => api::EXECUTE_CUSTOM_ACTION,
            Operation::StartRecord => api::START_RECORD_ACTION,
            Operation::StopRecord => api::STOP_RECORD_ACTION,
            Operation::SaveRecordedAction(_) => api::SAVE_RECORDED_ACTION,
            Operation::DeleteAction(_) => api::DELETE_ACTION,
            Operation::RenameAction { .. } => api::RENAME_ACTION,
            Operation::StopCustomAction => api::STOP_CUSTOM_ACTION,
            Operation::Raw { api_id, .. } => *api_id,
        }
    }

    /// Request channel serving this operation.
    pub fn channel(&self) -> Result<&'static str, StriderError> {
        Ok(match self {
            Operation::GetFsmId
            | Operation::GetFsmMode
            | Operation::GetBalanceMode
            | Operation::SetFsmId(_)
            | Operation::SetBalanceMode(_)
            | Operation::SetSwingHeight(_)
            | Operation::SetStandHeight(_)
            | Operation::SetVelocity { .. }
            | Operation::SetArmTask(_)
            | Operation::SetSpeedMode(_) => channel::SPORT_REQUEST,
            Operation::ExecuteGesture(_)
            | Operation::GetActionList
            | Operation::ExecuteCustomAction(_)
            | Operation::StartRecord
            | Operation::StopRecord
            | Operation::SaveRecordedAction(_)
            | Operation::DeleteAction(_)
            | Operation::RenameAction { .. }
            | Operation::StopCustomAction => channel::ARM_REQUEST,
            Operation::Raw { api_id, .. } => return route_raw(*api_id),
        })
    }

    /// Parameter object, before serialization into the envelope.
    pub fn parameter(&self) -> Value {
        match self {
            Operation::GetFsmId
            | Operation::GetFsmMode
            | Operation::GetBalanceMode
            | Operation::GetActionList
            | Operation::StartRecord
            | Operation::StopRecord
            | Operation::StopCustomAction => json!({}),
            Operation::SetFsmId(state) => json!({ "data": state.id() }),
            Operation::SetBalanceMode(mode) => json!({ "data": mode }),
            Operation::SetSwingHeight(h) | Operation::SetStandHeight(h) => json!({ "data": h }),
            Operation::SetVelocity {
                forward,
                lateral,
                turn,
                duration,
            } => json!({ "velocity": [forward, lateral, turn], "duration": duration }),
            Operation::SetArmTask(task) => json!({ "data": *task as u8 }),
            Operation::SetSpeedMode(mode) => json!({ "data": mode.id() }),
            Operation::ExecuteGesture(id) => json!({ "action_id": id }),
            Operation::ExecuteCustomAction(name)
            | Operation::SaveRecordedAction(name)
            | Operation::DeleteAction(name) => json!({ "action_name": name }),
            Operation::RenameAction { old_name, new_name } => {
                json!({ "old_name": old_name, "new_name": new_name })
            }
            Operation::Raw { parameter, .. } => parameter.clone(),
        }
    }

    /// Envelope with the parameter object serialized to a string.
    pub fn to_request(&self) -> Result<Request, StriderError> {
        let parameter = serde_json::to_string(&self.parameter())
            .map_err(|e| StriderError::Serialization(e.to_string()))?;
        Ok(Request {
            api_id: self.api_id(),
            parameter,
        })
    }
}

/// Infer the request channel of a raw operation id.
///
/// | Range | Channel |
/// |---|---|
/// | 1000–1999 | SLAM |
/// | 7001–7105 | locomotion |
/// | 7106–7199 | arm |
///
/// 7106 and 7107 also name locomotion operations (`SET_ARM_TASK`,
/// `SET_SPEED_MODE`); raw requests with those ids go to the arm service.
/// Use the typed [`Operation`] variants to reach the locomotion ones.
pub fn route_raw(api_id: u32) -> Result<&'static str, StriderError> {
    match api_id {
        1000..=1999 => Ok(channel::SLAM_REQUEST),
        7001..=7105 => Ok(channel::SPORT_REQUEST),
        7106..=7199 => {
            if matches!(api_id, api::SET_ARM_TASK | api::SET_SPEED_MODE) {
                warn!(api_id, "raw id is ambiguous between locomotion and arm; routing to arm");
            }
            Ok(channel::ARM_REQUEST)
        }
        _ => Err(StriderError::UnroutableOperation(api_id)),
    }
}

/// Decode a reply message.
///
/// Accepts the flat [`Response`] shape and the robot's nested form
/// `{"header": {"identity": {"api_id"}, "status": {"code"}}, "data": "..."}`.
pub fn parse_response(message: &Value) -> Option<Response> {
    if let Ok(resp) = serde_json::from_value::<Response>(message.clone()) {
        return Some(resp);
    }
    let body = message.get("data").filter(|d| d.get("header").is_some()).unwrap_or(message);
    let header = body.get("header")?;
    let api_id = header.get("identity")?.get("api_id")?.as_u64()?;
    let code = header
        .get("status")
        .and_then(|s| s.get("code"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let data = match body.get("data") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    Some(Response {
        api_id: u32::try_from(api_id).ok()?,
        code: i32::try_from(code).ok()?,
        data,
    })
}

/// Parse the nested payload of a reply.
pub fn response_data(response: &Response) -> Option<Value> {
    response
        .data
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsm_request_envelope() -> Result<(), Box<dyn std::error::Error>> {
        let req = Operation::SetFsmId(FsmState::LockStand).to_request()?;
        assert_eq!(req.api_id, 7101);
        let param: Value = serde_json::from_str(&req.parameter)?;
        assert_eq!(param, json!({"data": 500}));
        Ok(())
    }

    #[test]
    fn arm_operations_use_arm_channel() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(Operation::ExecuteGesture(26).channel()?, channel::ARM_REQUEST);
        assert_eq!(Operation::ExecuteGesture(26).api_id(), 7106);
        assert_eq!(Operation::SetArmTask(ArmTask::WaveHand).channel()?, channel::SPORT_REQUEST);
        assert_eq!(Operation::SetArmTask(ArmTask::WaveHand).api_id(), 7106);
        Ok(())
    }

    #[test]
    fn action_name_parameters() {
        assert_eq!(
            Operation::ExecuteCustomAction("wave".into()).parameter(),
            json!({"action_name": "wave"})
        );
        assert_eq!(
            Operation::RenameAction {
                old_name: "a".into(),
                new_name: "b".into()
            }
            .parameter(),
            json!({"old_name": "a", "new_name": "b"})
        );
    }

    #[test]
    fn raw_routing_by_range() {
        assert_eq!(route_raw(1801), Ok(channel::SLAM_REQUEST));
        assert_eq!(route_raw(7001), Ok(channel::SPORT_REQUEST));
        assert_eq!(route_raw(7105), Ok(channel::SPORT_REQUEST));
        assert_eq!(route_raw(7106), Ok(channel::ARM_REQUEST));
        assert_eq!(route_raw(7114), Ok(channel::ARM_REQUEST));
        assert_eq!(route_raw(4001), Err(StriderError::UnroutableOperation(4001)));
        assert_eq!(route_raw(7000), Err(StriderError::UnroutableOperation(7000)));
    }

    #[test]
    fn parse_flat_and_nested_responses() {
        let flat = json!({"api_id": 7106, "code": 0});
        assert_eq!(parse_response(&flat).map(|r| r.api_id), Some(7106));

        let nested = json!({
            "type": "res",
            "data": {
                "header": {"identity": {"id": 1, "api_id": 7001}, "status": {"code": 0}},
                "data": "{\"data\":500}"
            }
        });
        let resp = parse_response(&nested).unwrap();
        assert_eq!(resp.api_id, 7001);
        assert_eq!(response_data(&resp), Some(json!({"data": 500})));

        let failed = json!({"header": {"identity": {"api_id": 7106}, "status": {"code": 7404}}});
        assert_eq!(parse_response(&failed).map(|r| r.code), Some(api::ERR_INVALID_FSM_FOR_ACTION));

        assert_eq!(parse_response(&json!({"hello": 1})), None);
    }

    #[test]
    fn gesture_lookup() {
        assert_eq!(gesture::by_name("high_wave"), Some(26));
        assert_eq!(gesture::by_name("moonwalk"), None);
    }
}
