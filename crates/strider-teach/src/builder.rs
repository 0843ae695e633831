//! [`TeachCommandBuilder`] – the fixed vocabulary of teaching-mode frames.
//!
//! Each builder owns one sequence counter. It is incremented for every frame
//! produced, keep-alives included, and wraps at 65536.

use bytes::Bytes;
use strider_kernel::OperatorConfirmation;
use strider_types::{SafetyAction, StriderError};

use crate::frame::encode_small;

/// Command ids understood by the teaching-mode endpoint.
pub mod command {
    pub const KEEP_ALIVE: u8 = 0x00;
    /// Sent in this order to open a session.
    pub const HANDSHAKE: [u8; 4] = [0x09, 0x0A, 0x0B, 0x0C];
    pub const ENTER_COMPLIANCE: u8 = 0x0D;
    pub const EXIT_COMPLIANCE: u8 = 0x0E;
    pub const START_RECORDING: u8 = 0x0F;
    pub const QUERY_ACTIONS: u8 = 0x1A;
    pub const PLAY: u8 = 0x41;
    /// Stops the action currently playing or recording.
    pub const STOP: u8 = 0x42;
    pub const RENAME: u8 = 0x43;
}

/// Payload width of the fixed-size control frames.
pub const CONTROL_PAYLOAD_LEN: usize = 46;
/// Width of a NUL-padded action name.
pub const NAME_FIELD_LEN: usize = 32;

/// Produces encoded teaching-mode frames with a running sequence number.
#[derive(Debug, Default)]
pub struct TeachCommandBuilder {
    next_sequence: u16,
}

impl TeachCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose first frame carries `sequence`.
    pub fn starting_at(sequence: u16) -> Self {
        Self {
            next_sequence: sequence,
        }
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u16 {
        self.next_sequence
    }

    fn frame(&mut self, command_id: u8, payload: &[u8]) -> Bytes {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        encode_small(seq, command_id, payload)
    }

    fn control(&mut self, command_id: u8) -> Bytes {
        self.frame(command_id, &[0u8; CONTROL_PAYLOAD_LEN])
    }

    /// The four handshake frames, in send order.
    pub fn handshake(&mut self) -> [Bytes; 4] {
        command::HANDSHAKE.map(|id| self.control(id))
    }

    /// Ask for the stored action list. Carries no payload.
    pub fn query_action_list(&mut self) -> Bytes {
        self.frame(command::QUERY_ACTIONS, &[])
    }

    /// Play the action at `index` in the action list.
    pub fn play(&mut self, index: u16) -> Bytes {
        let mut payload = [0u8; CONTROL_PAYLOAD_LEN];
        payload[..2].copy_from_slice(&index.to_le_bytes());
        self.frame(command::PLAY, &payload)
    }

    pub fn stop(&mut self) -> Bytes {
        self.control(command::STOP)
    }

    /// Zero frame that keeps the session alive.
    pub fn keep_alive(&mut self) -> Bytes {
        self.control(command::KEEP_ALIVE)
    }

    /// Release arm torque so the arms can be guided by hand.
    pub fn enter_compliance(&mut self, confirmation: OperatorConfirmation) -> Result<Bytes, StriderError> {
        confirmation.redeem(SafetyAction::TeachCompliance)?;
        Ok(self.control(command::ENTER_COMPLIANCE))
    }

    pub fn exit_compliance(&mut self) -> Bytes {
        self.control(command::EXIT_COMPLIANCE)
    }

    pub fn start_recording(&mut self) -> Bytes {
        self.control(command::START_RECORDING)
    }

    /// Rename a stored action. Names longer than 32 bytes are truncated.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Bytes {
        let mut payload = [0u8; 2 * NAME_FIELD_LEN];
        payload[..NAME_FIELD_LEN].copy_from_slice(&name_field(old_name));
        payload[NAME_FIELD_LEN..].copy_from_slice(&name_field(new_name));
        self.frame(command::RENAME, &payload)
    }
}

/// NUL-padded name, cut at the last character boundary that fits.
pub fn name_field(name: &str) -> [u8; NAME_FIELD_LEN] {
    let mut end = name.len().min(NAME_FIELD_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut field = [0u8; NAME_FIELD_LEN];
    field[..end].copy_from_slice(&name.as_bytes()[..end]);
    field
}
