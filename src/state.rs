//! Controller data model: operating modes, fault codes, command payloads
//! and the telemetry-visible status/control blocks.

use crate::foc::pid::PidState;

/// Operating mode of the controller state machine.
///
/// `Enabling`, `Calibrating` and `CalibrationComplete` are internal rungs
/// on the way from `Stopped` to an active mode; they cannot be requested
/// through [`CommandData`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Gate driver disabled, outputs idle.
    Stopped = 0,
    /// Latched fault; leaves only via a `Stopped` command.
    Fault = 1,
    /// Waiting for the foreground to power the gate driver.
    Enabling = 2,
    /// Averaging current-sense ADCs to find their zero offset.
    Calibrating = 3,
    /// Offsets stored; ready to enter the commanded mode.
    CalibrationComplete = 4,
    /// Raw per-phase duty ratios.
    Pwm = 5,
    /// Per-phase output voltages.
    Voltage = 6,
    /// Fixed voltage vector at a commanded electrical angle.
    VoltageFoc = 7,
    /// Closed-loop d/q current.
    Current = 8,
    /// Closed-loop position, cascaded onto the current loop.
    Position = 9,
}

impl Mode {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stopped),
            1 => Some(Self::Fault),
            2 => Some(Self::Enabling),
            3 => Some(Self::Calibrating),
            4 => Some(Self::CalibrationComplete),
            5 => Some(Self::Pwm),
            6 => Some(Self::Voltage),
            7 => Some(Self::VoltageFoc),
            8 => Some(Self::Current),
            9 => Some(Self::Position),
            _ => None,
        }
    }

    /// Modes that only the controller machinery may enter.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        matches!(
            self,
            Self::Fault | Self::Enabling | Self::Calibrating | Self::CalibrationComplete
        )
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Cause of the most recent fault.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCode {
    Success = 0,
    /// Position sensor moved more than the per-cycle limit.
    EncoderFault = 1,
    /// Gate driver reported its hardware fault latch.
    MotorDriverFault = 2,
    /// Bus voltage above the configured maximum.
    OverVoltage = 3,
    /// ADC offset mean outside the acceptance band.
    CalibrationFault = 4,
}

impl Default for FaultCode {
    fn default() -> Self {
        Self::Success
    }
}

/// Per-phase triple (a, b, c).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vec3 {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl Vec3 {
    pub const fn new(a: f32, b: f32, c: f32) -> Self {
        Self { a, b, c }
    }
}

/// One command from the foreground. Only the payload fields for the
/// requested mode are read.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandData {
    /// Requested mode; must not be one of the reserved internal modes.
    pub mode: Mode,

    /// Pwm: per-phase duty ratios, 0..1 before clamping.
    pub pwm: Vec3,
    /// Voltage: per-phase output voltages [V].
    pub phase_v: Vec3,
    /// VoltageFoc: electrical angle [rad].
    pub theta: f32,
    /// VoltageFoc: voltage vector magnitude [V].
    pub voltage: f32,
    /// Current: d axis current command [A].
    pub i_d_amps: f32,
    /// Current: q axis current command [A].
    pub i_q_amps: f32,
    /// Position: position command [user units].
    pub position: f32,
    /// Position: velocity command [user units/s].
    pub velocity: f32,
    /// Position: symmetric current limit [A].
    pub max_current: f32,

    /// When set, seeds the unwrapped position on the next control cycle,
    /// then clears itself.
    pub set_position: Option<f32>,
}

/// Controller status, written by the control cycle, snapshotted by the
/// foreground for telemetry.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub mode: Mode,
    pub fault: FaultCode,

    /// Oversampled current-sense ADC means, raw counts.
    pub adc1_raw: u16,
    pub adc2_raw: u16,
    /// Bus voltage ADC mean, raw counts.
    pub adc3_raw: u16,

    /// Calibrated zero offsets for the two current channels (Q12, nominal
    /// mid-scale 2048).
    pub adc1_offset: u16,
    pub adc2_offset: u16,

    /// Phase currents [A].
    pub cur1_amps: f32,
    pub cur2_amps: f32,
    /// DC bus voltage [V].
    pub bus_volts: f32,
    /// Measured d/q currents [A].
    pub d_amps: f32,
    pub q_amps: f32,

    /// Raw rotor angle, wraps at 65536.
    pub position_raw: u16,
    /// Sum of signed per-cycle deltas.
    pub unwrapped_position_raw: i32,
    /// Unwrapped position [user units].
    pub unwrapped_position: f32,
    /// Rotor electrical angle [rad], in [0, 2pi).
    pub electrical_theta: f32,
    /// Windowed velocity estimate [user units/s].
    pub velocity: f32,

    pub pid_d: PidState,
    pub pid_q: PidState,
    pub pid_position: PidState,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            mode: Mode::Stopped,
            fault: FaultCode::Success,
            adc1_raw: 0,
            adc2_raw: 0,
            adc3_raw: 0,
            adc1_offset: 2048,
            adc2_offset: 2048,
            cur1_amps: 0.0,
            cur2_amps: 0.0,
            bus_volts: 0.0,
            d_amps: 0.0,
            q_amps: 0.0,
            position_raw: 0,
            unwrapped_position_raw: 0,
            unwrapped_position: 0.0,
            electrical_theta: 0.0,
            velocity: 0.0,
            pid_d: PidState::default(),
            pid_q: PidState::default(),
            pid_position: PidState::default(),
        }
    }
}

/// Outputs of the most recent control cycle, exposed for telemetry.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Control {
    /// Clamped duty ratios actually written to the compare registers.
    pub pwm: Vec3,
    /// Commanded phase voltages [V].
    pub voltage: Vec3,
    /// d/q current commands [A].
    pub i_d_amps: f32,
    pub i_q_amps: f32,
    /// d/q voltage commands [V].
    pub d_volts: f32,
    pub q_volts: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for raw in 0..=9u8 {
            let mode = Mode::from_u8(raw).unwrap();
            assert_eq!(mode as u8, raw);
        }
        assert!(Mode::from_u8(10).is_none());
        assert!(Mode::from_u8(255).is_none());
    }

    #[test]
    fn test_reserved_modes() {
        assert!(Mode::Fault.is_reserved());
        assert!(Mode::Enabling.is_reserved());
        assert!(Mode::Calibrating.is_reserved());
        assert!(Mode::CalibrationComplete.is_reserved());

        assert!(!Mode::Stopped.is_reserved());
        assert!(!Mode::Pwm.is_reserved());
        assert!(!Mode::Voltage.is_reserved());
        assert!(!Mode::VoltageFoc.is_reserved());
        assert!(!Mode::Current.is_reserved());
        assert!(!Mode::Position.is_reserved());
    }

    #[test]
    fn test_status_defaults() {
        let status = Status::default();
        assert_eq!(status.mode, Mode::Stopped);
        assert_eq!(status.fault, FaultCode::Success);
        // Offsets default to ADC mid-scale until calibration replaces them.
        assert_eq!(status.adc1_offset, 2048);
        assert_eq!(status.adc2_offset, 2048);
    }
}
