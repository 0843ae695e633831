//! `strider-kernel` – Safety & State
//!
//! Decides what may be asked of the robot. It never talks to the robot
//! itself.
//!
//! # Modules
//!
//! - [`transition_table`] – [`TransitionTable`][transition_table::TransitionTable]:
//!   immutable map of directly reachable locomotion states, with the escape
//!   hatches (`Damp`, `ZeroTorque`) always reachable.
//! - [`state_machine`] – [`StateMachine`][state_machine::StateMachine]:
//!   the locally accepted [`RobotState`][strider_types::RobotState], advisory
//!   transition checks and change notifications.
//! - [`confirmation`] – [`OperatorConfirmation`][confirmation::OperatorConfirmation]:
//!   move-only, thread-bound proof that an operator approved one
//!   torque- or balance-removing action.
//! - [`motion_gate`] – [`MotionGate`][motion_gate::MotionGate]:
//!   rule engine that rejects velocity and arm requests the current state
//!   cannot carry out.

pub mod confirmation;
pub mod motion_gate;
pub mod state_machine;
pub mod transition_table;

pub use confirmation::{ConfirmationError, ConfirmationRequest, OperatorConfirmation};
pub use motion_gate::{MotionGate, MotionIntent, Rule};
pub use state_machine::{SharedStateMachine, StateChange, StateMachine};
pub use transition_table::{ESCAPE_HATCHES, TransitionTable};
