//! `strider-teach` – Teaching-Mode Sub-Protocol
//!
//! Byte-exact codec and session handling for the legacy binary protocol used
//! to list, replay and record taught arm actions.
//!
//! # Modules
//!
//! - [`frame`] – [`encode`][frame::encode] / [`decode`][frame::decode] with
//!   CRC-32 framing. Checksum mismatches are flagged, not fatal.
//! - [`builder`] – [`TeachCommandBuilder`][builder::TeachCommandBuilder]:
//!   handshake, query, play, stop and keep-alive frames with a wrapping
//!   sequence counter.
//! - [`action_list`] – fixed-width action-list records in either
//!   [`RecordLayout`][action_list::RecordLayout].
//! - [`session`] – [`TeachSession`][session::TeachSession]: the UDP socket,
//!   handshake pacing and the background keep-alive.

pub mod action_list;
pub mod builder;
pub mod frame;
pub mod session;

pub use action_list::{ActionListEntry, RecordLayout};
pub use builder::TeachCommandBuilder;
pub use frame::{Frame, FramingError, IntegrityWarning, decode, encode};
pub use session::{
    ALTERNATE_TEACH_PORT, DEFAULT_TEACH_PORT, KeepAlive, MAX_KEEP_ALIVE_INTERVAL, TeachError, TeachSession,
    TeachSessionConfig,
};
