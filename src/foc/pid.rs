// PID controller with feedforward-friendly split config/state layout.
//
// The gain set lives in the persistent config; the runtime terms live in
// the status structure so they are visible to telemetry without extra
// copying.

use super::transforms::limit;

/// PID gain set. One instance is shared by the d and q current loops,
/// another drives the position loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidConfig {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
    /// Symmetric clamp on the raw integral accumulator
    pub ilimit: f32,
    /// Symmetric clamp on the controller output
    pub limit: f32,
}

/// Runtime terms of one PID controller, exposed for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidState {
    /// Proportional term (kp * error)
    pub p: f32,
    /// Integral accumulator (before ki)
    pub integral: f32,
    /// Derivative term (kd * rate error)
    pub d: f32,
    /// Last clamped output
    pub command: f32,
}

impl PidConfig {
    /// Run one controller update.
    ///
    /// The derivative acts on the rate error supplied by the caller
    /// (`desired_rate - measured_rate`) rather than on the error signal, so
    /// a setpoint step produces no derivative kick.
    ///
    /// # Arguments
    /// * `state` - controller state, updated in place
    /// * `measured` - measured process value
    /// * `desired` - setpoint
    /// * `measured_rate` - measured rate of change of the process value
    /// * `desired_rate` - commanded rate of change
    /// * `rate_hz` - caller's sample rate
    ///
    /// # Returns
    /// The clamped controller output.
    pub fn apply(
        &self,
        state: &mut PidState,
        measured: f32,
        desired: f32,
        measured_rate: f32,
        desired_rate: f32,
        rate_hz: f32,
    ) -> f32 {
        let error = desired - measured;

        state.integral = limit(
            state.integral + error / rate_hz,
            -self.ilimit,
            self.ilimit,
        );

        state.p = self.kp * error;
        state.d = self.kd * (desired_rate - measured_rate);

        state.command = limit(
            state.p + self.ki * state.integral + state.d,
            -self.limit,
            self.limit,
        );
        state.command
    }
}
