//! `strider-runtime` – The Motor Cortex
//!
//! Turns typed operations into control-channel traffic and keeps the
//! process observable.
//!
//! # Modules
//!
//! - [`operation`] – [`Operation`]: every control-channel request the robot
//!   understands, with its numeric id, channel and parameter object, plus
//!   range routing for raw ids.
//! - [`velocity`] – deadband, clamp and normalization of velocity requests
//!   against the gait's limits.
//! - [`single_flight`] – [`SingleFlight`]: one wait-for-completion action at
//!   a time, released by scope.
//! - [`executor`] – [`CommandExecutor`]: the single dispatch point. Redeems
//!   operator confirmations, consults the motion gate, waits for completion
//!   signals and publishes executor events on the bus.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod executor;
pub mod operation;
pub mod single_flight;
pub mod telemetry;
pub mod velocity;

pub use executor::{CommandExecutor, ExecutorConfig, Wait};
pub use operation::{ArmTask, Operation, Subsystem, route_raw};
pub use single_flight::{FlightGuard, SingleFlight};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use velocity::{NormalizedTwist, SpeedMode, VelocityLimits, VelocityRoute};
