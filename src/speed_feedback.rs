// Shared speed/position feedback state and reliability policy.
//
// Every rotor feedback implementation in the drive (sensored or sensorless)
// exposes the same estimates and the same range-based fallback reliability
// policy; the state observer embeds this state and mutates it from its own
// update steps.

use crate::config::params;

/// Rotor position/speed feedback capability.
///
/// Implementations that cannot support an operation keep the default no-op
/// body rather than pretending to handle it.
pub trait SpeedPosFeedback {
    /// Latest electrical angle as a wrapping s16 turn.
    fn el_angle(&self) -> i16;

    /// Latest averaged electrical speed in digits per control period.
    fn el_speed_dpp(&self) -> i16;

    /// Latest averaged mechanical speed in 0.1 Hz units.
    fn avr_mec_speed_01hz(&self) -> i16;

    /// Seeds the rotor mechanical angle, for feedbacks that track it.
    /// Sensorless estimators have nothing to store.
    fn set_mec_angle(&mut self, _mec_angle: i16) {}
}

/// Range limits and error budget of the fallback reliability policy.
#[derive(Debug, Clone, Copy)]
pub struct SpeedFeedbackConfig {
    /// Control cycles per second driving the angle estimation.
    pub measurement_frequency: u16,
    /// Electrical-to-mechanical ratio (pole pairs).
    pub el_to_mec_ratio: u8,
    /// Highest mechanical speed magnitude considered plausible [0.1 Hz].
    pub max_reliable_mec_speed_01hz: u16,
    /// Lowest mechanical speed magnitude considered plausible [0.1 Hz].
    pub min_reliable_mec_speed_01hz: u16,
    /// Out-of-range samples tolerated before the feedback is declared
    /// unreliable.
    pub maximum_speed_errors: u8,
}

impl Default for SpeedFeedbackConfig {
    fn default() -> Self {
        Self {
            measurement_frequency: params::DEFAULT_MEASUREMENT_FREQUENCY,
            el_to_mec_ratio: params::DEFAULT_EL_TO_MEC_RATIO,
            max_reliable_mec_speed_01hz: params::DEFAULT_MAX_RELIABLE_MEC_SPEED_01HZ,
            min_reliable_mec_speed_01hz: params::DEFAULT_MIN_RELIABLE_MEC_SPEED_01HZ,
            maximum_speed_errors: params::DEFAULT_MAX_SPEED_ERRORS,
        }
    }
}

/// Feedback state embedded by a rotor position/speed estimator.
#[derive(Debug, Clone)]
pub struct SpeedFeedback {
    pub(crate) el_angle: i16,
    pub(crate) el_speed_dpp: i16,
    pub(crate) avr_mec_speed_01hz: i16,
    pub(crate) speed_error_number: u8,
    pub(crate) maximum_speed_errors: u8,
    pub(crate) measurement_frequency: u16,
    pub(crate) el_to_mec_ratio: u8,
    pub(crate) max_reliable_mec_speed_01hz: u16,
    pub(crate) min_reliable_mec_speed_01hz: u16,
}

impl SpeedFeedback {
    pub fn new(config: &SpeedFeedbackConfig) -> Self {
        Self {
            el_angle: 0,
            el_speed_dpp: 0,
            avr_mec_speed_01hz: 0,
            speed_error_number: 0,
            maximum_speed_errors: config.maximum_speed_errors,
            measurement_frequency: config.measurement_frequency,
            el_to_mec_ratio: config.el_to_mec_ratio,
            max_reliable_mec_speed_01hz: config.max_reliable_mec_speed_01hz,
            min_reliable_mec_speed_01hz: config.min_reliable_mec_speed_01hz,
        }
    }

    /// Resets the estimates and the error counter for a motor restart.
    pub fn clear(&mut self) {
        self.el_angle = 0;
        self.el_speed_dpp = 0;
        self.avr_mec_speed_01hz = 0;
        self.speed_error_number = 0;
    }

    /// Fallback reliability policy: screens the speed magnitude against the
    /// plausible range, counting consecutive violations. Once the counter
    /// reaches the configured maximum the feedback stays unreliable until
    /// the counter is externally reset (convergence or restart).
    pub fn is_mec_speed_reliable(&mut self, mec_speed_01hz: i16) -> bool {
        let abs_speed = (mec_speed_01hz as i32).unsigned_abs();

        let out_of_range = abs_speed > self.max_reliable_mec_speed_01hz as u32
            || abs_speed < self.min_reliable_mec_speed_01hz as u32;

        if out_of_range {
            if self.speed_error_number < self.maximum_speed_errors {
                self.speed_error_number += 1;
            }
        } else if self.speed_error_number < self.maximum_speed_errors {
            self.speed_error_number = 0;
        }

        self.speed_error_number < self.maximum_speed_errors
    }

    /// Current value of the error counter.
    pub fn speed_error_number(&self) -> u8 {
        self.speed_error_number
    }
}
