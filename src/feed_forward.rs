// Feed-forward voltage computation for the q/d current loops.
//
// Computes an open-loop estimate of the stator voltage from the commanded
// currents, the measured bus voltage and the electrical speed, and adds it
// to the closed-loop PI output. The PI regulators then only have to correct
// the model error, which improves dynamic response and keeps them out of
// saturation. A low-pass-filtered average of the raw PI output is folded
// back into the estimate so the model self-centers on the operating point.

use crate::config::{is_power_of_two, log2, params, ConfigError};
use crate::pi_regulator::PiRegulator;
use crate::speed_feedback::SpeedPosFeedback;
use crate::types::{CurrentQd, VoltageQd};

/// Average DC bus voltage supplier.
///
/// The drive's bus sensing (resistor divider plus filtering) lives outside
/// this crate; the controller only borrows a reading per cycle.
pub trait BusVoltageSensor {
    /// Average bus voltage in 16-bit sensor counts.
    fn average_bus_voltage(&self) -> u16;
}

/// Tuning constants of the feed-forward voltage model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeedForwardTuning {
    /// d-current coupling constant of the q-axis equation (inductance
    /// term).
    pub constant_1d: i32,
    /// q-current coupling constant of the d-axis equation (inductance
    /// term).
    pub constant_1q: i32,
    /// Speed-proportional constant (permanent-magnet flux term).
    pub constant_2: i32,
}

impl Default for FeedForwardTuning {
    fn default() -> Self {
        Self {
            constant_1d: params::feed_forward::DEFAULT_CONSTANT_1D,
            constant_1q: params::feed_forward::DEFAULT_CONSTANT_1Q,
            constant_2: params::feed_forward::DEFAULT_CONSTANT_2,
        }
    }
}

/// Feed-forward controller configuration.
#[derive(Debug, Clone)]
pub struct FeedForwardConfig {
    /// Default tuning constants loaded at construction.
    pub default_tuning: FeedForwardTuning,
    /// Low-pass time constant for the averaged PI output (power of two).
    pub vqd_low_pass_filter_bw: i16,
}

impl Default for FeedForwardConfig {
    fn default() -> Self {
        Self {
            default_tuning: FeedForwardTuning::default(),
            vqd_low_pass_filter_bw: params::feed_forward::DEFAULT_VQD_LOW_PASS_FILTER_BW,
        }
    }
}

#[inline]
fn saturate_to_i16(value: i64) -> i16 {
    value.clamp(-(i16::MAX as i64), i16::MAX as i64) as i16
}

/// Feed-forward controller state.
///
/// The bus sensor and the current-loop PI regulators are collaborators
/// owned by the caller and borrowed per call.
#[derive(Debug, Clone)]
pub struct FeedForward {
    constant_1d: i32,
    constant_1q: i32,
    constant_2: i32,
    vqd_ff: VoltageQd,
    vqd_av_pi_out: VoltageQd,
    vqd_pi_out: VoltageQd,
    #[cfg_attr(feature = "shift-scaling", allow(dead_code))]
    low_pass_filter_bw: i16,
    #[cfg_attr(not(feature = "shift-scaling"), allow(dead_code))]
    low_pass_filter_bw_log: u8,
}

impl FeedForward {
    pub fn new(config: &FeedForwardConfig) -> Result<Self, ConfigError> {
        if config.vqd_low_pass_filter_bw <= 0
            || !is_power_of_two(config.vqd_low_pass_filter_bw as u32)
        {
            return Err(ConfigError::FilterBandwidthNotPowerOfTwo);
        }

        Ok(Self {
            constant_1d: config.default_tuning.constant_1d,
            constant_1q: config.default_tuning.constant_1q,
            constant_2: config.default_tuning.constant_2,
            vqd_ff: VoltageQd::default(),
            vqd_av_pi_out: VoltageQd::default(),
            vqd_pi_out: VoltageQd::default(),
            low_pass_filter_bw: config.vqd_low_pass_filter_bw,
            low_pass_filter_bw_log: log2(config.vqd_low_pass_filter_bw as u32),
        })
    }

    /// Zeroes the feed-forward output. Call before each motor restart.
    pub fn clear(&mut self) {
        self.vqd_ff = VoltageQd::default();
    }

    /// Computes the feed-forward voltage pair from the commanded currents,
    /// the electrical speed and the averaged bus voltage. The result is
    /// applied by [`vqd_conditioning`](Self::vqd_conditioning).
    pub fn vqdff_computation(
        &mut self,
        iqd_ref: CurrentQd,
        speed: &dyn SpeedPosFeedback,
        bus: &dyn BusVoltageSensor,
    ) {
        let speed_dpp = speed.el_speed_dpp() as i64;
        // Halved bus voltage; clamped away from zero so an unpowered bus
        // reading cannot fault the division.
        let av_bus_voltage = (bus.average_bus_voltage() / 2).max(1) as i64;

        // q-axis: d-current inductance coupling plus the flux term, on top
        // of the averaged PI output.
        let temp1 = speed_dpp * iqd_ref.d as i64 / 32768;
        let temp2 = temp1 * self.constant_1d as i64 / av_bus_voltage * 2;
        let temp1 = self.constant_2 as i64 * speed_dpp / av_bus_voltage * 16;
        self.vqd_ff.q = saturate_to_i16(temp1 + temp2 + self.vqd_av_pi_out.q as i64);

        // d-axis: the q-current coupling opposes the applied voltage, so
        // the term is subtracted.
        let temp1 = speed_dpp * iqd_ref.q as i64 / 32768;
        let temp2 = temp1 * self.constant_1q as i64 / av_bus_voltage * 2;
        self.vqd_ff.d = saturate_to_i16(self.vqd_av_pi_out.d as i64 - temp2);
    }

    /// Adds the stored feed-forward pair to the PI output and caches the
    /// raw PI output for the next low-pass update.
    pub fn vqd_conditioning(&mut self, vqd: VoltageQd) -> VoltageQd {
        self.vqd_pi_out = vqd;

        VoltageQd {
            q: saturate_to_i16(vqd.q as i64 + self.vqd_ff.q as i64),
            d: saturate_to_i16(vqd.d as i64 + self.vqd_ff.d as i64),
        }
    }

    /// First-order low-pass of the cached PI output, accumulate-and-shift
    /// style: `avg += (sample - avg) / bw` without intermediate rounding
    /// loss.
    pub fn data_process(&mut self) {
        #[cfg(not(feature = "shift-scaling"))]
        {
            let bw = self.low_pass_filter_bw as i32;

            let aux = self.vqd_av_pi_out.q as i32 * (bw - 1) + self.vqd_pi_out.q as i32;
            self.vqd_av_pi_out.q = (aux / bw) as i16;

            let aux = self.vqd_av_pi_out.d as i32 * (bw - 1) + self.vqd_pi_out.d as i32;
            self.vqd_av_pi_out.d = (aux / bw) as i16;
        }
        #[cfg(feature = "shift-scaling")]
        {
            let bw_log = self.low_pass_filter_bw_log;

            let aux = ((self.vqd_av_pi_out.q as i32) << bw_log) - self.vqd_av_pi_out.q as i32
                + self.vqd_pi_out.q as i32;
            self.vqd_av_pi_out.q = (aux >> bw_log) as i16;

            let aux = ((self.vqd_av_pi_out.d as i32) << bw_log) - self.vqd_av_pi_out.d as i32
                + self.vqd_pi_out.d as i32;
            self.vqd_av_pi_out.d = (aux >> bw_log) as i16;
        }
    }

    /// Prepares the additional FOC methods when entering the closed-loop
    /// run state: zeroes the averaged PI output and both current-loop
    /// integral terms.
    pub fn init_foc_additional_methods(&mut self, pi_q: &mut PiRegulator, pi_d: &mut PiRegulator) {
        self.vqd_av_pi_out = VoltageQd::default();
        pi_q.set_integral_term(0);
        pi_d.set_integral_term(0);
    }

    pub fn constants(&self) -> FeedForwardTuning {
        FeedForwardTuning {
            constant_1d: self.constant_1d,
            constant_1q: self.constant_1q,
            constant_2: self.constant_2,
        }
    }

    pub fn set_constants(&mut self, tuning: FeedForwardTuning) {
        self.constant_1d = tuning.constant_1d;
        self.constant_1q = tuning.constant_1q;
        self.constant_2 = tuning.constant_2;
    }

    /// Latest feed-forward voltage pair.
    pub fn vqd_ff(&self) -> VoltageQd {
        self.vqd_ff
    }

    /// Low-pass-filtered average of the current-loop PI output.
    pub fn vqd_av_pi_out(&self) -> VoltageQd {
        self.vqd_av_pi_out
    }
}
