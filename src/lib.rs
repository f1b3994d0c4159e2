#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

//! Field-oriented BLDC servo control core.
//!
//! The heart of the crate is [`servo::BldcServo`]: the body of a hard
//! real-time 40kHz control cycle that samples phase currents and rotor
//! position, runs cascaded PID loops (position -> current -> voltage ->
//! PWM) and drives a three-phase gate driver through small hardware
//! capability traits. A wait-free double buffer carries commands from the
//! foreground into the control cycle; a millisecond poller completes the
//! gate-driver enable handshake; an optional 12-byte debug frame streams
//! out every cycle.
//!
//! Platform glue (timer/ADC/DMA register programming, pin maps, the
//! interrupt vector itself) lives outside this crate and talks to it
//! through the traits in [`hardware`].

mod fmt;

pub mod command;
pub mod config;
pub mod debug_stream;
pub mod foc;
pub mod hardware;
pub mod servo;
pub mod state;

pub use config::{ConfigStore, ServoConfig};
pub use servo::{isr_dispatch, BldcServo, Options};
pub use state::{CommandData, Control, FaultCode, Mode, Status, Vec3};

/// Registry of named read-only snapshots for external observation.
///
/// The transport behind it (CAN, UART, shared memory) is out of scope; the
/// servo announces its snapshot names at construction and the transport
/// polls [`BldcServo::status`], [`BldcServo::control`] and
/// [`BldcServo::command_snapshot`] at whatever rate it likes.
pub trait Telemetry {
    fn register(&mut self, name: &'static str);
}
