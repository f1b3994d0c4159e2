//! Hardware capability contracts.
//!
//! The control core never touches registers; each peripheral it needs is a
//! small capability object implemented by the platform glue. The glue is
//! also responsible for the PWM timer setup this core is calibrated
//! against: 90MHz timer clock, center-aligned up/down counting, buffered
//! ARR, repetition counter 1 (one update interrupt per up/down pair) and
//! `ARR = PWM_COUNTS`, giving a 40kHz control rate. The update interrupt
//! must invoke the control cycle only on the up-count.

/// Control cycle rate [Hz].
pub const RATE_HZ: f32 = 40_000.0;

/// PWM timer auto-reload value: 90MHz / 80kHz up/down rate.
pub const PWM_COUNTS: u16 = (90_000_000 / 80_000) as u16;

/// Absolute rotor position sensor.
pub trait PositionSensor {
    /// Current raw rotor angle; wraps at 65536. Must not block.
    fn sample(&mut self) -> u16;
}

/// Three-phase gate driver.
pub trait MotorDriver {
    /// Switch the gate-driver power rail.
    fn enable(&mut self, enabled: bool);
    /// Engage or float the bridge outputs.
    fn power(&mut self, powered: bool);
    /// Hardware fault latch.
    fn fault(&mut self) -> bool;
}

/// Simultaneous three-channel conversion: two current shunts plus the bus
/// voltage divider.
pub trait CurrentSense {
    /// Kick off one simultaneous conversion on all three channels.
    fn start_conversion(&mut self);
    /// Busy-wait for end of conversion; returns raw counts as
    /// `[current1, current2, vsense]`. The wait is bounded by the
    /// programmed sample time.
    fn read_result(&mut self) -> [u16; 3];
}

/// Compare registers of the three PWM output channels.
pub trait PwmControl {
    /// Write one compare register. `channel` is the timer channel, 1..=3.
    fn set_compare(&mut self, channel: u8, value: u16);
}

/// DMA-driven debug UART transmitter.
pub trait DebugStream {
    /// Hand one frame to the DMA engine and return immediately. The frame
    /// must be drained before the next control cycle ends (5Mbaud line
    /// rate against a 25us cycle).
    fn transmit(&mut self, frame: &[u8; crate::debug_stream::FRAME_SIZE]);
}

/// Scope trigger output used to measure control-cycle timing.
pub trait TimingPin {
    fn set(&mut self, high: bool);
}

/// "Not connected" implementations for the optional capabilities.
impl DebugStream for () {
    fn transmit(&mut self, _frame: &[u8; crate::debug_stream::FRAME_SIZE]) {}
}

impl TimingPin for () {
    fn set(&mut self, _high: bool) {}
}
