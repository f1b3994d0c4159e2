//! Servo configuration parameters.
//!
//! One flat block, loaded from the persistent store at startup and pushed
//! back through [`BldcServo::update_config`](crate::servo::BldcServo) when
//! the foreground mutates it. How the block is persisted (flash pages,
//! checksums, versioning) belongs to the [`ConfigStore`] implementation.

use crate::foc::pid::PidConfig;

/// ADC sample-time ladder, in ADC clock cycles. `adc_cycles` selects the
/// first entry at least as long as the requested time.
pub const ADC_CYCLE_LADDER: [u16; 8] = [3, 15, 28, 56, 84, 112, 144, 480];

/// Index of the first ladder entry `>= value`, capped at the last entry.
pub fn map_config(ladder: &[u16], value: u16) -> usize {
    for (index, entry) in ladder.iter().enumerate() {
        if value <= *entry {
            return index;
        }
    }
    ladder.len() - 1
}

/// Persistent servo configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServoConfig {
    /// Motor pole count (not pole pairs).
    pub motor_poles: u8,
    /// Electrical zero offset, as a fraction of an electrical revolution.
    pub motor_offset: f32,
    /// Phase resistance [ohm], used by the current-loop feedforward.
    pub motor_resistance: f32,
    /// Back-EMF constant [V per mechanical Hz].
    pub motor_v_per_hz: f32,

    /// Current-sense scale [A/LSB].
    pub i_scale: f32,
    /// Bus-voltage scale [V/LSB].
    pub v_scale: f32,
    /// Raw position counts to user units, per full 65536-count revolution.
    pub unwrapped_position_scale: f32,

    /// Bus voltage fault threshold [V].
    pub max_voltage: f32,

    /// Requested ADC sample time, mapped onto [`ADC_CYCLE_LADDER`].
    pub adc_cycles: u16,
    /// Oversampling factor per control cycle (>= 1).
    pub adc_sample_count: u16,

    /// Scale on the resistive/back-EMF feedforward terms, 0.0..=1.0.
    pub feedforward_scale: f32,

    /// Gains shared by the d and q current loops.
    pub pid_dq: PidConfig,
    /// Position loop gains; output is a d-axis current command.
    pub pid_position: PidConfig,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            motor_poles: 14,
            motor_offset: 0.0,
            motor_resistance: 0.030,
            motor_v_per_hz: 0.0,
            i_scale: 0.04,
            v_scale: 0.012,
            unwrapped_position_scale: 1.0,
            max_voltage: 28.0,
            adc_cycles: 15,
            adc_sample_count: 4,
            feedforward_scale: 1.0,
            pid_dq: PidConfig {
                kp: 0.08,
                ki: 40.0,
                kd: 0.0,
                ilimit: 0.3,
                limit: 12.0,
            },
            pid_position: PidConfig {
                kp: 50.0,
                ki: 0.0,
                kd: 2.0,
                ilimit: 0.0,
                limit: 100.0,
            },
        }
    }
}

impl ServoConfig {
    /// Ladder index the platform glue programs into the ADC sample-time
    /// registers.
    pub fn adc_cycle_index(&self) -> usize {
        map_config(&ADC_CYCLE_LADDER, self.adc_cycles)
    }
}

/// Persistent storage for named configuration blocks.
///
/// The store owns the on-flash format; after it mutates a block it is
/// expected to push the new value back through
/// [`BldcServo::update_config`](crate::servo::BldcServo).
pub trait ConfigStore {
    /// Fetch the named block, or `None` when the store holds nothing valid
    /// under that name.
    fn load(&mut self, name: &'static str) -> Option<ServoConfig>;
}
