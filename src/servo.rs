//! The 40kHz control core.
//!
//! [`BldcServo::isr_update`] is the body of the PWM timer's update
//! interrupt: sense, transform, dispatch on the current mode, actuate,
//! emit one debug frame. Everything it touches is either owned by it or
//! shared through one of two atomic words (the mode and the command-buffer
//! index), so the cycle never blocks and never allocates.
//!
//! Execution contexts:
//!
//! * control cycle (highest interrupt priority): [`BldcServo::isr_update`]
//!   only, via [`isr_dispatch`] once attached.
//! * foreground (~1kHz): [`BldcServo::command`],
//!   [`BldcServo::poll_millisecond`], the snapshot accessors and
//!   [`BldcServo::update_config`].

use core::f32::consts::TAU;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};

use crate::command::CommandExchange;
use crate::config::{ConfigStore, ServoConfig};
use crate::debug_stream::pack_frame;
use crate::fmt::*;
use crate::foc::{
    dq_transform, frac, inverse_dq_transform, limit, SinCos, WindowedAverage,
};
use crate::hardware::{
    CurrentSense, DebugStream, MotorDriver, PositionSensor, PwmControl, TimingPin, PWM_COUNTS,
    RATE_HZ,
};
use crate::state::{CommandData, Control, FaultCode, Mode, Status, Vec3};
use crate::Telemetry;

/// Samples averaged while calibrating the current-sense offsets.
const CALIBRATE_COUNT: u16 = 256;

/// Calibrated offsets must land within this band around ADC mid-scale.
const CALIBRATE_BAND: i32 = 200;

/// The maximum amount the absolute encoder can change in one cycle
/// without triggering a fault.
const MAX_POSITION_DELTA: i16 = 1000;

/// Velocity filter window, in control cycles.
const VELOCITY_WINDOW: usize = 32;

// Board-specific phase wiring: phase b drives timer channel 3 and phase c
// drives channel 2.
const PWM_CHANNEL_A: u8 = 1;
const PWM_CHANNEL_B: u8 = 3;
const PWM_CHANNEL_C: u8 = 2;

/// We can't go full duty cycle or we wouldn't have time to sample the
/// current.
#[inline]
fn limit_pwm(duty: f32) -> f32 {
    limit(duty, 0.1, 0.9)
}

/// Output capabilities handed to the servo at construction. The pin
/// assignments live inside the capability objects the platform glue built.
pub struct Options<PWM, ADC, DBG = (), PIN = ()> {
    pub pwm: PWM,
    pub adc: ADC,
    pub debug_stream: Option<DBG>,
    pub timing_pin: Option<PIN>,
}

impl<PWM, ADC> Options<PWM, ADC> {
    pub fn new(pwm: PWM, adc: ADC) -> Self {
        Self {
            pwm,
            adc,
            debug_stream: None,
            timing_pin: None,
        }
    }
}

impl<PWM, ADC, DBG, PIN> Options<PWM, ADC, DBG, PIN> {
    /// Attach a DMA-driven debug UART transmitter.
    pub fn debug_stream<D2>(self, stream: D2) -> Options<PWM, ADC, D2, PIN> {
        Options {
            pwm: self.pwm,
            adc: self.adc,
            debug_stream: Some(stream),
            timing_pin: self.timing_pin,
        }
    }

    /// Attach a scope trigger pin toggled around the ADC burst.
    pub fn timing_pin<P2>(self, pin: P2) -> Options<PWM, ADC, DBG, P2> {
        Options {
            pwm: self.pwm,
            adc: self.adc,
            debug_stream: self.debug_stream,
            timing_pin: Some(pin),
        }
    }
}

// Process-wide cell the interrupt trampoline dispatches through. Written
// by attach/detach, read by isr_dispatch.
static ISR_TARGET: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());
static ISR_VECTOR: AtomicUsize = AtomicUsize::new(0);

/// Interrupt trampoline: runs one control cycle on the attached servo, or
/// nothing if none is attached.
///
/// The platform's timer-update interrupt handler calls this once per
/// up-count of the center-aligned PWM timer.
pub fn isr_dispatch() {
    let target = ISR_TARGET.load(Ordering::Acquire);
    if target.is_null() {
        return;
    }
    let vector = ISR_VECTOR.load(Ordering::Relaxed);
    let run: unsafe fn(*mut ()) = unsafe { core::mem::transmute(vector) };
    unsafe { run(target) }
}

pub struct BldcServo<S, D, PWM, ADC, DBG = (), PIN = ()> {
    config: ServoConfig,

    position_sensor: S,
    motor_driver: D,
    pwm: PWM,
    adc: ADC,
    debug_stream: Option<DBG>,
    timing_pin: Option<PIN>,

    /// Authoritative mode word, shared across both contexts.
    mode: AtomicU8,
    exchange: CommandExchange,
    /// Copy of the last submitted command, foreground-owned, telemetry
    /// only.
    command_snapshot: CommandData,

    // Everything below is written only by the control cycle.
    status: Status,
    control: Control,
    velocity_filter: WindowedAverage<VELOCITY_WINDOW>,
    calibrate_adc1: u32,
    calibrate_adc2: u32,
    calibrate_count: u16,
}

impl<S, D, PWM, ADC, DBG, PIN> BldcServo<S, D, PWM, ADC, DBG, PIN>
where
    S: PositionSensor,
    D: MotorDriver,
    PWM: PwmControl,
    ADC: CurrentSense,
    DBG: DebugStream,
    PIN: TimingPin,
{
    /// Build the servo: load (or default) the `servo` config block and
    /// announce the telemetry snapshots.
    pub fn new(
        config_store: &mut dyn ConfigStore,
        telemetry: &mut dyn Telemetry,
        position_sensor: S,
        motor_driver: D,
        options: Options<PWM, ADC, DBG, PIN>,
    ) -> Self {
        let config = config_store.load("servo").unwrap_or_default();

        telemetry.register("servo_stats");
        telemetry.register("servo_cmd");
        telemetry.register("servo_control");

        info!(
            "servo core ready: poles={} rate={}Hz",
            config.motor_poles, RATE_HZ as u32
        );

        Self {
            config,
            position_sensor,
            motor_driver,
            pwm: options.pwm,
            adc: options.adc,
            debug_stream: options.debug_stream,
            timing_pin: options.timing_pin,
            mode: AtomicU8::new(Mode::Stopped as u8),
            exchange: CommandExchange::new(),
            command_snapshot: CommandData::default(),
            status: Status::default(),
            control: Control::default(),
            velocity_filter: WindowedAverage::new(),
            calibrate_adc1: 0,
            calibrate_adc2: 0,
            calibrate_count: 0,
        }
    }

    /// Install this servo as the target of [`isr_dispatch`].
    ///
    /// At most one servo may be attached at a time; a second attach
    /// panics.
    ///
    /// # Safety
    ///
    /// The servo must not move or drop while attached without its `Drop`
    /// running (pin it in a static cell), and the platform must unmask the
    /// update interrupt only after this returns.
    pub unsafe fn attach(&mut self) {
        unsafe fn trampoline<S, D, PWM, ADC, DBG, PIN>(target: *mut ())
        where
            S: PositionSensor,
            D: MotorDriver,
            PWM: PwmControl,
            ADC: CurrentSense,
            DBG: DebugStream,
            PIN: TimingPin,
        {
            (*(target as *mut BldcServo<S, D, PWM, ADC, DBG, PIN>)).isr_update();
        }

        ISR_VECTOR.store(
            trampoline::<S, D, PWM, ADC, DBG, PIN> as usize,
            Ordering::Relaxed,
        );
        let claimed = ISR_TARGET.compare_exchange(
            ptr::null_mut(),
            self as *mut Self as *mut (),
            Ordering::Release,
            Ordering::Relaxed,
        );
        assert!(claimed.is_ok(), "a servo is already attached");
    }

    /// Foreground: submit a new command. Takes effect at the top of the
    /// next control cycle; a newer command supersedes an unconsumed one.
    ///
    /// `data.mode` must not be one of the reserved internal modes.
    pub fn command(&mut self, data: &CommandData) {
        debug_assert!(
            !data.mode.is_reserved(),
            "reserved mode requested via command"
        );

        debug!("command: mode={}", data.mode as u8);
        self.command_snapshot = *data;
        self.exchange.write(data);
    }

    /// Foreground: status snapshot by value.
    pub fn status(&self) -> Status {
        let mut status = self.status;
        status.mode = self.mode();
        status
    }

    /// Foreground: last cycle's outputs, by value.
    pub fn control(&self) -> Control {
        self.control
    }

    /// Foreground: the last submitted command, by value.
    pub fn command_snapshot(&self) -> CommandData {
        self.command_snapshot
    }

    /// Foreground: re-apply a mutated configuration.
    pub fn update_config(&mut self, config: &ServoConfig) {
        self.config = *config;
        info!("servo config updated");
    }

    /// Foreground, ~1kHz: completes the `Enabling -> Calibrating`
    /// transition once the gate driver can be powered. This is the only
    /// mode transition performed outside the control cycle.
    pub fn poll_millisecond(&mut self) {
        if self.mode() == Mode::Enabling {
            self.motor_driver.enable(true);
            // Release/acquire on the mode word: the control cycle must not
            // observe Calibrating before the driver is enabled.
            self.set_mode(Mode::Calibrating);
            info!("gate driver enabled, calibrating current offsets");
        }
    }

    /// One full control cycle. Called from the timer update interrupt, on
    /// the up-count only.
    pub fn isr_update(&mut self) {
        if let Some(pin) = &mut self.timing_pin {
            pin.set(true);
        }

        // No matter what mode we are in, always sample the ADCs and the
        // position sensor.
        self.isr_do_sense();

        let sin_cos = SinCos::from_theta(self.status.electrical_theta);

        self.isr_calculate_current_state(&sin_cos);
        self.isr_do_control(&sin_cos);

        self.isr_emit_debug();
    }

    #[inline]
    fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire)).unwrap_or(Mode::Fault)
    }

    #[inline]
    fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    fn isr_fault(&mut self, fault: FaultCode) {
        warn!("servo fault: {}", fault as u8);
        self.set_mode(Mode::Fault);
        self.status.fault = fault;
    }

    fn isr_do_sense(&mut self) {
        let samples = self.config.adc_sample_count.max(1);
        let mut sum = [0u32; 3];
        for _ in 0..samples {
            self.adc.start_conversion();
            let result = self.adc.read_result();
            sum[0] += result[0] as u32;
            sum[1] += result[1] as u32;
            sum[2] += result[2] as u32;
        }

        // Time spent up to here limits the maximum usable duty cycle;
        // everything below just eats cycles.
        if let Some(pin) = &mut self.timing_pin {
            pin.set(false);
        }

        self.status.adc1_raw = (sum[0] / samples as u32) as u16;
        self.status.adc2_raw = (sum[1] / samples as u32) as u16;
        self.status.adc3_raw = (sum[2] / samples as u32) as u16;

        let old_position = self.status.position_raw;
        self.status.position_raw = self.position_sensor.sample();

        self.status.electrical_theta = TAU
            * frac(
                self.status.position_raw as f32 / 65536.0
                    * (self.config.motor_poles as f32 / 2.0)
                    - self.config.motor_offset,
            );

        // Signed modular distance; the encoder wraps at 65536.
        let delta = self.status.position_raw.wrapping_sub(old_position) as i16;
        if self.mode() != Mode::Stopped && (delta as i32).abs() > MAX_POSITION_DELTA as i32 {
            // We probably had an error when reading the position.
            self.isr_fault(FaultCode::EncoderFault);
        }

        self.status.unwrapped_position_raw =
            self.status.unwrapped_position_raw.wrapping_add(delta as i32);
        self.velocity_filter.add(
            delta as f32 * self.config.unwrapped_position_scale * (1.0 / 65536.0) * RATE_HZ,
        );
        self.status.velocity = self.velocity_filter.average();

        self.status.unwrapped_position = self.status.unwrapped_position_raw as f32
            * self.config.unwrapped_position_scale
            * (1.0 / 65536.0);
    }

    fn isr_calculate_current_state(&mut self, sin_cos: &SinCos) {
        let status = &mut self.status;
        status.cur1_amps =
            (status.adc1_raw as f32 - status.adc1_offset as f32) * self.config.i_scale;
        status.cur2_amps =
            (status.adc2_raw as f32 - status.adc2_offset as f32) * self.config.i_scale;
        status.bus_volts = status.adc3_raw as f32 * self.config.v_scale;

        // Only two shunts exist; the third phase current is implied.
        let dq = dq_transform(
            sin_cos,
            status.cur1_amps,
            -(status.cur1_amps + status.cur2_amps),
            status.cur2_amps,
        );
        status.d_amps = dq.d;
        status.q_amps = dq.q;
    }

    fn isr_do_control(&mut self, sin_cos: &SinCos) {
        // The published command cell is stable for the whole cycle; the
        // foreground only ever writes the other one.
        let data = unsafe { &mut *self.exchange.active() };

        self.control = Control::default();

        if let Some(position) = data.set_position.take() {
            self.status.unwrapped_position_raw = (position * 65536.0) as i32;
        }

        if data.mode != self.mode() {
            self.isr_maybe_change_mode(data.mode);

            if self.mode() != Mode::Stopped {
                if self.motor_driver.fault() {
                    self.isr_fault(FaultCode::MotorDriverFault);
                    return;
                }
                if self.status.bus_volts > self.config.max_voltage {
                    self.isr_fault(FaultCode::OverVoltage);
                    return;
                }
            }
        }

        // Controllers that the current mode does not use hold zeroed state.
        self.isr_clear_pid();

        match self.mode() {
            Mode::Stopped => self.isr_do_stopped(),
            Mode::Fault => self.isr_do_fault(),
            Mode::Enabling | Mode::CalibrationComplete => {}
            Mode::Calibrating => self.isr_do_calibrating(),
            Mode::Pwm => self.isr_do_pwm(data.pwm),
            Mode::Voltage => self.isr_do_voltage(data.phase_v),
            Mode::VoltageFoc => self.isr_do_voltage_foc(data.theta, data.voltage),
            Mode::Current => self.isr_do_current(sin_cos, data.i_d_amps, data.i_q_amps),
            Mode::Position => {
                self.isr_do_position(sin_cos, data.position, data.velocity, data.max_current)
            }
        }
    }

    /// A command asked for a different mode than the current one; advance
    /// if the state machine allows it.
    fn isr_maybe_change_mode(&mut self, requested: Mode) {
        match requested {
            Mode::Fault | Mode::Calibrating | Mode::CalibrationComplete => {
                // command() rejects these before they reach the exchange.
                debug_assert!(false, "reserved mode in command buffer");
            }
            Mode::Stopped => {
                // It is always valid to enter stopped mode.
                self.set_mode(Mode::Stopped);
            }
            Mode::Enabling => {
                // Only the millisecond poller advances out of Enabling.
            }
            Mode::Pwm | Mode::Voltage | Mode::VoltageFoc | Mode::Current | Mode::Position => {
                match self.mode() {
                    Mode::Fault => {
                        // We cannot leave a fault state directly into an
                        // active state.
                    }
                    Mode::Stopped => {
                        // From stopped, every active mode first passes
                        // through calibration.
                        self.isr_start_calibrating();
                    }
                    Mode::Enabling | Mode::Calibrating => {
                        // Must finish calibration first.
                    }
                    Mode::CalibrationComplete
                    | Mode::Pwm
                    | Mode::Voltage
                    | Mode::VoltageFoc
                    | Mode::Current
                    | Mode::Position => {
                        self.set_mode(requested);
                    }
                }
            }
        }
    }

    fn isr_start_calibrating(&mut self) {
        self.set_mode(Mode::Enabling);
        // A fresh arming attempt clears the previous fault cause.
        self.status.fault = FaultCode::Success;

        // The millisecond poller will advance to Calibrating once the gate
        // driver is powered.
        self.isr_zero_pwm();
        self.motor_driver.power(false);

        self.calibrate_adc1 = 0;
        self.calibrate_adc2 = 0;
        self.calibrate_count = 0;
    }

    fn isr_clear_pid(&mut self) {
        let mode = self.mode();

        if !matches!(mode, Mode::Current | Mode::Position) {
            self.status.pid_d = Default::default();
            self.status.pid_q = Default::default();
        }
        if mode != Mode::Position {
            self.status.pid_position = Default::default();
        }
    }

    fn isr_zero_pwm(&mut self) {
        self.pwm.set_compare(PWM_CHANNEL_A, 0);
        self.pwm.set_compare(PWM_CHANNEL_B, 0);
        self.pwm.set_compare(PWM_CHANNEL_C, 0);
    }

    fn isr_do_stopped(&mut self) {
        self.motor_driver.enable(false);
        self.motor_driver.power(false);
        self.isr_zero_pwm();
    }

    fn isr_do_fault(&mut self) {
        self.motor_driver.power(false);
        self.isr_zero_pwm();
    }

    fn isr_do_calibrating(&mut self) {
        self.calibrate_adc1 += self.status.adc1_raw as u32;
        self.calibrate_adc2 += self.status.adc2_raw as u32;
        self.calibrate_count += 1;

        if self.calibrate_count < CALIBRATE_COUNT {
            return;
        }

        let adc1_offset = (self.calibrate_adc1 / CALIBRATE_COUNT as u32) as u16;
        let adc2_offset = (self.calibrate_adc2 / CALIBRATE_COUNT as u32) as u16;

        if (adc1_offset as i32 - 2048).abs() > CALIBRATE_BAND
            || (adc2_offset as i32 - 2048).abs() > CALIBRATE_BAND
        {
            self.isr_fault(FaultCode::CalibrationFault);
            return;
        }

        self.status.adc1_offset = adc1_offset;
        self.status.adc2_offset = adc2_offset;
        self.set_mode(Mode::CalibrationComplete);
        info!("current offsets calibrated: {} {}", adc1_offset, adc2_offset);
    }

    fn isr_do_pwm(&mut self, pwm: Vec3) {
        self.control.pwm = Vec3::new(limit_pwm(pwm.a), limit_pwm(pwm.b), limit_pwm(pwm.c));

        self.pwm.set_compare(
            PWM_CHANNEL_A,
            (self.control.pwm.a * PWM_COUNTS as f32) as u16,
        );
        self.pwm.set_compare(
            PWM_CHANNEL_B,
            (self.control.pwm.b * PWM_COUNTS as f32) as u16,
        );
        self.pwm.set_compare(
            PWM_CHANNEL_C,
            (self.control.pwm.c * PWM_COUNTS as f32) as u16,
        );

        self.motor_driver.power(true);
    }

    fn isr_do_voltage(&mut self, voltage: Vec3) {
        self.control.voltage = voltage;

        let bus_volts = self.status.bus_volts;
        let voltage_to_pwm = |v: f32| 0.5 + 2.0 * v / bus_volts;

        self.isr_do_pwm(Vec3::new(
            voltage_to_pwm(voltage.a),
            voltage_to_pwm(voltage.b),
            voltage_to_pwm(voltage.c),
        ));
    }

    fn isr_do_voltage_foc(&mut self, theta: f32, voltage: f32) {
        let sin_cos = SinCos::from_theta(theta);
        let (a, b, c) = inverse_dq_transform(&sin_cos, 0.0, voltage);
        self.isr_do_voltage(Vec3::new(a, b, c));
    }

    fn isr_do_current(&mut self, sin_cos: &SinCos, i_d_amps: f32, i_q_amps: f32) {
        self.control.i_d_amps = i_d_amps;
        self.control.i_q_amps = i_q_amps;

        let config = &self.config;

        // Resistive + back-EMF feedforward, then the PID correction.
        self.control.d_volts = config.feedforward_scale
            * (i_d_amps * config.motor_resistance
                - self.status.velocity * config.motor_v_per_hz)
            + config.pid_dq.apply(
                &mut self.status.pid_d,
                self.status.d_amps,
                i_d_amps,
                0.0,
                0.0,
                RATE_HZ,
            );
        self.control.q_volts = config.feedforward_scale * (i_q_amps * config.motor_resistance)
            + config.pid_dq.apply(
                &mut self.status.pid_q,
                self.status.q_amps,
                i_q_amps,
                0.0,
                0.0,
                RATE_HZ,
            );

        let (a, b, c) = inverse_dq_transform(sin_cos, self.control.d_volts, self.control.q_volts);
        self.isr_do_voltage(Vec3::new(a, b, c));
    }

    fn isr_do_position(
        &mut self,
        sin_cos: &SinCos,
        position: f32,
        velocity: f32,
        max_current: f32,
    ) {
        let measured_velocity = self.status.velocity;

        let unlimited_amps = self.config.pid_position.apply(
            &mut self.status.pid_position,
            self.status.unwrapped_position,
            position,
            measured_velocity,
            velocity,
            RATE_HZ,
        );
        let d_amps = limit(unlimited_amps, -max_current, max_current);
        debug_assert!(d_amps >= -max_current && d_amps <= max_current);

        self.isr_do_current(sin_cos, d_amps, 0.0);
    }

    fn isr_emit_debug(&mut self) {
        if let Some(stream) = &mut self.debug_stream {
            let frame = pack_frame(&self.status, &self.control);
            stream.transmit(&frame);
        }
    }
}

impl<S, D, PWM, ADC, DBG, PIN> Drop for BldcServo<S, D, PWM, ADC, DBG, PIN> {
    fn drop(&mut self) {
        // Detach from the interrupt trampoline if we were the target.
        let _ = ISR_TARGET.compare_exchange(
            self as *mut Self as *mut (),
            ptr::null_mut(),
            Ordering::Release,
            Ordering::Relaxed,
        );
    }
}
