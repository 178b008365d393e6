// Luenberger state observer with PLL rotor position/speed extraction.
//
// The observer tracks the stator currents and the back-EMF in the
// stationary alpha/beta frame as scaled wide accumulators and extracts the
// electrical angle by phase-locking onto the estimated back-EMF vector.
// Estimate quality is screened two ways: the variance of the speed history
// against a speed-proportional bound, and the observed back-EMF energy
// against the magnitude the speed estimate predicts. The second check is
// what catches a low-variance lock onto a wrong operating point.
//
// All arithmetic is integer fixed point. Scale factors are powers of two,
// validated at construction; divisions by them become shifts with the
// `shift-scaling` feature.

use crate::config::{log2, ConfigError, ObserverConfig};
use crate::fmt::*;
use crate::observer::speed_buffer::SpeedBuffer;
use crate::pi_regulator::PiRegulator;
use crate::speed_feedback::{SpeedFeedback, SpeedPosFeedback};
use crate::trig;
use crate::types::{CurrentAlphaBeta, ObserverInputs, VoltageAlphaBeta};

// Ratio constants tying the cross-coupling scale F3 and coefficient C6 to
// the back-EMF scale factor.
const F3_RATIO_CONST: i32 = 1_043_038;
const C6_RATIO_CONST: i32 = 10_430;

#[cfg(not(feature = "shift-scaling"))]
#[inline]
fn scale_i32(value: i32, divisor: i32, _pow2: u8) -> i32 {
    value / divisor
}

#[cfg(feature = "shift-scaling")]
#[inline]
fn scale_i32(value: i32, _divisor: i32, pow2: u8) -> i32 {
    value >> pow2
}

#[inline]
fn scale_to_i16(value: i32, divisor: i32, pow2: u8) -> i16 {
    scale_i32(value, divisor, pow2) as i16
}

#[inline]
fn saturate_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// State observer + PLL speed and position feedback.
///
/// One instance per motor, driven synchronously by the control interrupt:
/// [`calc_el_angle`](Self::calc_el_angle) every current-loop cycle,
/// [`calc_avrg_el_speed_dpp`](Self::calc_avrg_el_speed_dpp) at the same
/// rate, and
/// [`calc_avrg_mec_speed_01hz`](Self::calc_avrg_mec_speed_01hz) at the
/// (possibly slower) speed-loop rate.
#[derive(Debug, Clone)]
pub struct StateObserver {
    feedback: SpeedFeedback,

    // Model coefficients and fixed-point scales.
    c1: i16,
    c2: i16,
    c3: i16,
    c4: i16,
    c5: i16,
    c6: i16,
    f1: i16,
    f2: i16,
    f3: i16,
    f1_log: u8,
    f2_log: u8,
    f3_pow2: u8,

    // Wide estimate accumulators (current scaled by F1, back-EMF by F2).
    i_alpha_acc: i32,
    i_beta_acc: i32,
    bemf_alpha_acc: i32,
    bemf_beta_acc: i32,

    // 16-bit back-EMF estimates latched for the PLL and the consistency
    // check.
    bemf_alpha_est: i16,
    bemf_beta_est: i16,

    pll: PiRegulator,

    speed_buffer: SpeedBuffer,
    speed_buffer_size_01hz: u8,
    speed_buffer_size_dpp: u8,
    speed_buffer_size_dpp_log: u8,
    dpp_buffer_sum: i32,

    consistency_counter: u8,
    reliability_counter: u8,
    is_algorithm_converged: bool,
    is_speed_reliable: bool,
    is_bemf_consistent: bool,
    enable_dual_check: bool,
    force_convergence: bool,
    force_convergence_to_measured: bool,
    obs_bemf_level: i32,
    est_bemf_level: i32,

    variance_percentage: u16,
    bemf_consistency_gain: u8,
    bemf_consistency_check: u8,
    reliability_hysteresis: u8,
    startup_consist_threshold: u8,
    speed_validation_band_h: u16,
    speed_validation_band_l: u16,
    min_startup_valid_speed: u16,
    max_app_positive_mec_speed_01hz: u16,
}

impl StateObserver {
    /// Builds the observer, validating every power-of-two precondition and
    /// deriving the cross-coupling scale from the back-EMF scale factor.
    pub fn new(config: &ObserverConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        // F3 is the power of two that normalizes the speed-scaled
        // cross-coupling term: double it once per halving of the ratio
        // constant over F2.
        let mut tempk = (F3_RATIO_CONST / config.f2 as i32) as i16;
        let mut aux: i32 = 1;
        let mut f3_pow2: u8 = 0;
        while tempk != 0 {
            tempk /= 2;
            aux *= 2;
            f3_pow2 += 1;
        }
        let f3 = aux as i16;
        let c6 = ((config.f2 as i32 * f3 as i32) / C6_RATIO_CONST) as i16;

        let mut observer = Self {
            feedback: SpeedFeedback::new(&config.feedback),
            c1: config.c1,
            c2: config.c2,
            c3: config.c3,
            c4: config.c4,
            c5: config.c5,
            c6,
            f1: config.f1,
            f2: config.f2,
            f3,
            f1_log: log2(config.f1 as u32),
            f2_log: log2(config.f2 as u32),
            f3_pow2,
            i_alpha_acc: 0,
            i_beta_acc: 0,
            bemf_alpha_acc: 0,
            bemf_beta_acc: 0,
            bemf_alpha_est: 0,
            bemf_beta_est: 0,
            pll: PiRegulator::new(&config.pll)?,
            speed_buffer: SpeedBuffer::new(config.speed_buffer_size_01hz),
            speed_buffer_size_01hz: config.speed_buffer_size_01hz,
            speed_buffer_size_dpp: config.speed_buffer_size_dpp,
            speed_buffer_size_dpp_log: log2(config.speed_buffer_size_dpp as u32),
            dpp_buffer_sum: 0,
            consistency_counter: 0,
            reliability_counter: 0,
            is_algorithm_converged: false,
            is_speed_reliable: false,
            is_bemf_consistent: false,
            enable_dual_check: true,
            force_convergence: false,
            force_convergence_to_measured: false,
            obs_bemf_level: 0,
            est_bemf_level: 0,
            variance_percentage: config.variance_percentage,
            bemf_consistency_gain: config.bemf_consistency_gain,
            bemf_consistency_check: config.bemf_consistency_check,
            reliability_hysteresis: config.reliability_hysteresis,
            startup_consist_threshold: config.startup_consist_threshold,
            speed_validation_band_h: config.speed_validation_band_h,
            speed_validation_band_l: config.speed_validation_band_l,
            min_startup_valid_speed: config.min_startup_valid_speed,
            max_app_positive_mec_speed_01hz: config.max_app_positive_mec_speed_01hz,
        };
        observer.clear();
        Ok(observer)
    }

    /// Re-initializes the estimation state for a motor restart.
    pub fn clear(&mut self) {
        self.i_alpha_acc = 0;
        self.i_beta_acc = 0;
        self.bemf_alpha_acc = 0;
        self.bemf_beta_acc = 0;
        self.feedback.clear();
        self.consistency_counter = 0;
        self.reliability_counter = 0;
        self.is_algorithm_converged = false;
        self.is_bemf_consistent = false;
        self.obs_bemf_level = 0;
        self.est_bemf_level = 0;
        self.dpp_buffer_sum = 0;
        self.force_convergence = false;
        self.force_convergence_to_measured = false;
        self.speed_buffer.clear();
        self.pll.set_integral_term(0);
    }

    /// Runs the two-axis Luenberger update and the PLL for one control
    /// cycle and returns the new electrical angle.
    pub fn calc_el_angle(&mut self, inputs: &ObserverInputs) -> i16 {
        let f1 = self.f1 as i32;
        let f2 = self.f2 as i32;
        let bemf_bound = i16::MAX as i32 * f2;
        let current_bound = i16::MAX as i32 * f1;

        // Divergence guard: pull every accumulator back inside the
        // representable 16-bit range before it is consumed. This is the
        // primary protection against numerical blow-up from bad gains or
        // sensor faults.
        if self.bemf_alpha_acc > bemf_bound {
            self.bemf_alpha_acc = bemf_bound;
        } else if self.bemf_alpha_acc <= -bemf_bound {
            self.bemf_alpha_acc = -bemf_bound;
        }
        let aux_alpha = scale_to_i16(self.bemf_alpha_acc, f2, self.f2_log);

        if self.bemf_beta_acc > bemf_bound {
            self.bemf_beta_acc = bemf_bound;
        } else if self.bemf_beta_acc <= -bemf_bound {
            self.bemf_beta_acc = -bemf_bound;
        }
        let aux_beta = scale_to_i16(self.bemf_beta_acc, f2, self.f2_log);

        if self.i_alpha_acc > current_bound {
            self.i_alpha_acc = current_bound;
        } else if self.i_alpha_acc <= -current_bound {
            self.i_alpha_acc = -current_bound;
        }
        if self.i_beta_acc > current_bound {
            self.i_beta_acc = current_bound;
        } else if self.i_beta_acc <= -current_bound {
            self.i_beta_acc = -current_bound;
        }

        let i_alpha_scaled = scale_to_i16(self.i_alpha_acc, f1, self.f1_log);
        let i_beta_scaled = scale_to_i16(self.i_beta_acc, f1, self.f1_log);

        // Current tracking error per axis.
        let i_alpha_err = (i_alpha_scaled as i32 - inputs.i_alpha_beta.alpha as i32) as i16;
        let i_beta_err = (i_beta_scaled as i32 - inputs.i_alpha_beta.beta as i32) as i16;

        // Applied voltage, weighted by the measured bus voltage.
        let v_alpha = scale_to_i16(
            inputs.vbus as i32 * inputs.v_alpha_beta.alpha as i32,
            65536,
            16,
        );
        let v_beta = scale_to_i16(
            inputs.vbus as i32 * inputs.v_alpha_beta.beta as i32,
            65536,
            16,
        );

        let el_speed_dpp = self.feedback.el_speed_dpp;

        // Alpha-axis observer.
        let mut i_alpha_next = self
            .i_alpha_acc
            .saturating_sub(self.c1 as i32 * i_alpha_scaled as i32);
        i_alpha_next = i_alpha_next.saturating_add(self.c2 as i32 * i_alpha_err as i32);
        i_alpha_next = i_alpha_next.saturating_add(self.c5 as i32 * v_alpha as i32);
        i_alpha_next = i_alpha_next.saturating_sub(self.c3 as i32 * aux_alpha as i32);

        let mut bemf_alpha_next = self
            .bemf_alpha_acc
            .saturating_add(self.c4 as i32 * i_alpha_err as i32);
        // The cross-axis term couples the axes through rotor rotation: this
        // is how the speed estimate feeds back into the EMF model.
        let cross = scale_i32(aux_beta as i32, self.f3 as i32, self.f3_pow2) * self.c6 as i32;
        let cross = saturate_i32(el_speed_dpp as i64 * cross as i64);
        bemf_alpha_next = bemf_alpha_next.saturating_add(cross);

        // Beta-axis observer.
        let mut i_beta_next = self
            .i_beta_acc
            .saturating_sub(self.c1 as i32 * i_beta_scaled as i32);
        i_beta_next = i_beta_next.saturating_add(self.c2 as i32 * i_beta_err as i32);
        i_beta_next = i_beta_next.saturating_add(self.c5 as i32 * v_beta as i32);
        i_beta_next = i_beta_next.saturating_sub(self.c3 as i32 * aux_beta as i32);

        let mut bemf_beta_next = self
            .bemf_beta_acc
            .saturating_add(self.c4 as i32 * i_beta_err as i32);
        let cross = scale_i32(aux_alpha as i32, self.f3 as i32, self.f3_pow2) * self.c6 as i32;
        let cross = saturate_i32(el_speed_dpp as i64 * cross as i64);
        bemf_beta_next = bemf_beta_next.saturating_sub(cross);

        // Direction-correct the back-EMF pair so the PLL tracking
        // convention holds for both rotation senses.
        let direction: i32 = if el_speed_dpp >= 0 { 1 } else { -1 };

        self.bemf_alpha_est = aux_alpha;
        self.bemf_beta_est = aux_beta;

        let pll_alpha = (aux_alpha as i32 * direction) as i16;
        let pll_beta = (aux_beta as i32 * direction) as i16;

        let rotor_speed = self.execute_pll(pll_alpha, -pll_beta);

        self.speed_buffer.store(rotor_speed);
        self.feedback.el_angle = self.feedback.el_angle.wrapping_add(rotor_speed);

        // Commit the next-cycle estimates.
        self.i_alpha_acc = i_alpha_next;
        self.bemf_alpha_acc = bemf_alpha_next;
        self.i_beta_acc = i_beta_next;
        self.bemf_beta_acc = bemf_beta_next;

        self.feedback.el_angle
    }

    /// PLL step: the cross product of the estimated back-EMF vector with
    /// the unit vector at the current angle is a phase-error proxy; the PI
    /// output is this cycle's electrical speed increment.
    fn execute_pll(&mut self, bemf_alpha: i16, bemf_beta: i16) -> i16 {
        let (sin, cos) = trig::sin_cos(self.feedback.el_angle);

        let alpha_sin = bemf_alpha as i32 * sin as i32;
        let beta_cos = bemf_beta as i32 * cos as i32;

        let error =
            scale_to_i16(beta_cos, 32768, 15) as i32 - scale_to_i16(alpha_sin, 32768, 15) as i32;

        self.pll.compute(error)
    }

    /// Averages the speed history into a mechanical speed in 0.1 Hz units
    /// and decides whether the feedback is reliable. Call at the speed-loop
    /// rate.
    pub fn calc_avrg_mec_speed_01hz(&mut self) -> (i16, bool) {
        let window_size = self.speed_buffer_size_01hz as i32;

        let mut avr_speed_dpp: i32 = 0;
        for &sample in self.speed_buffer.window() {
            avr_speed_dpp += sample as i32;
        }
        avr_speed_dpp /= window_size;

        let mut avr_quadratic_error: i64 = 0;
        for &sample in self.speed_buffer.window() {
            let error = sample as i64 - avr_speed_dpp as i64;
            avr_quadratic_error += error * error;
        }
        avr_quadratic_error /= window_size as i64;

        // The acceptable noise floor scales with the operating speed rather
        // than being an absolute bound.
        let avr_square_speed =
            avr_speed_dpp as i64 * avr_speed_dpp as i64 / 128 * self.variance_percentage as i64;
        let is_speed_reliable = avr_quadratic_error <= avr_square_speed;

        // Mechanical speed in 0.1 Hz.
        let mut aux = avr_speed_dpp as i64 * self.feedback.measurement_frequency as i64;
        aux *= 10;
        aux /= 65536;
        aux /= self.feedback.el_to_mec_ratio as i64;

        let mec_speed_01hz = aux as i16;
        self.feedback.avr_mec_speed_01hz = mec_speed_01hz;
        self.is_speed_reliable = is_speed_reliable;

        // Back-EMF consistency check: an independent cross-check of the
        // observed EMF energy against what the speed estimate predicts.
        let mut is_bemf_consistent = false;
        if self.enable_dual_check {
            let mut obs_bemf_sq: i64 = 0;
            let mut est_bemf_sq: i64 = 0;

            let abs_speed = if aux < 0 { -aux } else { aux };
            if abs_speed < self.max_app_positive_mec_speed_01hz as i64 {
                let alpha = self.bemf_alpha_est as i64;
                let beta = self.bemf_beta_est as i64;
                obs_bemf_sq = alpha * alpha + beta * beta;

                let est_bemf =
                    abs_speed * 32767 / self.feedback.max_reliable_mec_speed_01hz as i64;
                est_bemf_sq = est_bemf * self.bemf_consistency_gain as i64 / 64 * est_bemf;

                let est_bemf_sq_lo =
                    est_bemf_sq - est_bemf_sq / 64 * self.bemf_consistency_check as i64;

                if obs_bemf_sq > est_bemf_sq_lo {
                    is_bemf_consistent = true;
                }
            }

            // Zeroed levels mark a skipped evaluation; a spinning motor
            // never produces exactly zero from a real one.
            self.is_bemf_consistent = is_bemf_consistent;
            self.obs_bemf_level = saturate_i32(obs_bemf_sq);
            self.est_bemf_level = saturate_i32(est_bemf_sq);
        } else {
            is_bemf_consistent = true;
        }

        // Decision making: before convergence defer to the range policy;
        // after it, debounce gate failures so a single noisy cycle cannot
        // trip a hard fault.
        let reliable = if !self.is_algorithm_converged {
            self.feedback.is_mec_speed_reliable(mec_speed_01hz)
        } else if !is_speed_reliable || !is_bemf_consistent {
            self.reliability_counter += 1;
            if self.reliability_counter >= self.reliability_hysteresis {
                self.reliability_counter = 0;
                self.feedback.speed_error_number = self.feedback.maximum_speed_errors;
                warn!("observer speed feedback declared unreliable");
                false
            } else {
                self.feedback.is_mec_speed_reliable(mec_speed_01hz)
            }
        } else {
            self.reliability_counter = 0;
            self.feedback.is_mec_speed_reliable(mec_speed_01hz)
        };

        (mec_speed_01hz, reliable)
    }

    /// Maintains the incremental average of the electrical speed over its
    /// own (possibly shorter) window. Call at the observer rate, after
    /// [`calc_el_angle`](Self::calc_el_angle).
    pub fn calc_avrg_el_speed_dpp(&mut self) {
        let index_new = self.speed_buffer.index() as i16;
        let size_dpp = self.speed_buffer_size_dpp as i16;
        let size_01hz = self.speed_buffer_size_01hz as i16;
        let size_diff = size_01hz - size_dpp;

        let mut sum = self.dpp_buffer_sum;
        if size_diff == 0 {
            // Same window: the displaced sample tracked by the buffer is
            // exactly the one leaving the sum.
            sum = sum + self.speed_buffer.at(index_new as u8) as i32
                - self.speed_buffer.oldest_evicted() as i32;
        } else {
            // Shorter window: the slot leaving it trails the write index by
            // the window length, i.e. leads it by the size difference.
            let mut index_old = index_new + size_diff;
            if index_old >= size_01hz {
                index_old -= size_01hz;
            }

            sum = sum + self.speed_buffer.at(index_new as u8) as i32
                - self.speed_buffer.at(index_old as u8) as i32;
        }

        self.feedback.el_speed_dpp =
            scale_i32(sum, size_dpp as i32, self.speed_buffer_size_dpp_log) as i16;
        self.dpp_buffer_sum = sum;
    }

    /// Convergence check for the open-loop ramp-up: the averaged estimate
    /// must be tight, above the startup minimum, and inside the validation
    /// band around the ramp reference for enough consecutive calls.
    pub fn is_observer_converged(&mut self, forced_mec_speed_01hz: i16) -> bool {
        let mut forced_mec_speed_01hz = forced_mec_speed_01hz;
        if self.force_convergence_to_measured {
            forced_mec_speed_01hz = self.feedback.avr_mec_speed_01hz;
        }

        if self.force_convergence {
            self.is_algorithm_converged = true;
            self.feedback.speed_error_number = 0;
            return true;
        }

        let estimated = self.feedback.avr_mec_speed_01hz as i32;
        let forced = forced_mec_speed_01hz as i32;

        let mut converged = false;
        if estimated * forced > 0 {
            let estimated = if estimated < 0 { -estimated } else { estimated };
            let forced = if forced < 0 { -forced } else { forced };

            let upper_threshold = forced * self.speed_validation_band_h as i32 / 16;
            let lower_threshold = forced * self.speed_validation_band_l as i32 / 16;

            let in_band = self.is_speed_reliable
                && estimated > self.min_startup_valid_speed as i32
                && estimated >= lower_threshold
                && estimated <= upper_threshold;

            if in_band {
                self.consistency_counter = self.consistency_counter.saturating_add(1);
                if self.consistency_counter >= self.startup_consist_threshold {
                    converged = true;
                    self.is_algorithm_converged = true;
                    self.feedback.speed_error_number = 0;
                    debug!("state observer converged");
                }
            } else {
                self.consistency_counter = 0;
            }
        } else {
            // Estimate and reference disagree on direction.
            self.consistency_counter = 0;
        }

        converged
    }

    /// Estimated back-EMF pair, in the voltage scale of the PLL inputs.
    pub fn estimated_bemf(&self) -> VoltageAlphaBeta {
        VoltageAlphaBeta {
            alpha: self.bemf_alpha_est,
            beta: self.bemf_beta_est,
        }
    }

    /// Estimated stator current pair.
    pub fn estimated_current(&self) -> CurrentAlphaBeta {
        CurrentAlphaBeta {
            alpha: scale_to_i16(self.i_alpha_acc, self.f1 as i32, self.f1_log),
            beta: scale_to_i16(self.i_beta_acc, self.f1 as i32, self.f1_log),
        }
    }

    /// Current-error and back-EMF correction gains (K1, K2).
    pub fn observer_gains(&self) -> (i16, i16) {
        (self.c2, self.c4)
    }

    pub fn set_observer_gains(&mut self, k1: i16, k2: i16) {
        self.c2 = k1;
        self.c4 = k2;
    }

    pub fn pll_gains(&self) -> (i16, i16) {
        (self.pll.kp(), self.pll.ki())
    }

    pub fn set_pll_gains(&mut self, kp: i16, ki: i16) {
        self.pll.set_kp(kp);
        self.pll.set_ki(ki);
    }

    /// Resets the PLL integral term.
    pub fn reset_pll(&mut self) {
        self.pll.set_integral_term(0);
    }

    /// Locks the PLL onto known speed/angle values, e.g. when handing over
    /// from another feedback source.
    pub fn set_pll(&mut self, el_speed_dpp: i16, el_angle: i16) {
        self.pll
            .set_integral_term(el_speed_dpp as i32 * self.pll.ki_divisor() as i32);
        self.feedback.el_angle = el_angle;
    }

    /// Model-predicted back-EMF squared level of the last consistency
    /// evaluation (zero when it was skipped).
    pub fn estimated_bemf_level(&self) -> i32 {
        self.est_bemf_level
    }

    /// Observed back-EMF squared level of the last consistency evaluation
    /// (zero when it was skipped).
    pub fn observed_bemf_level(&self) -> i32 {
        self.obs_bemf_level
    }

    /// Enables or disables the back-EMF consistency gate.
    pub fn enable_bemf_consistency_check(&mut self, enable: bool) {
        self.enable_dual_check = enable;
    }

    /// Result of the last back-EMF consistency evaluation.
    pub fn is_bemf_consistent(&self) -> bool {
        self.is_bemf_consistent
    }

    /// Result of the last variance gate evaluation.
    pub fn is_variance_tight(&self) -> bool {
        self.is_speed_reliable
    }

    /// Unconditionally declares convergence on the next
    /// [`is_observer_converged`](Self::is_observer_converged) call.
    pub fn force_convergence(&mut self) {
        self.force_convergence = true;
    }

    /// Validates convergence against the last measured average instead of
    /// the externally supplied ramp reference.
    pub fn force_convergence_to_measured(&mut self) {
        self.force_convergence_to_measured = true;
    }

    /// Minimum mechanical speed magnitude (0.1 Hz) required to validate the
    /// start-up.
    pub fn set_min_startup_valid_speed_01hz(&mut self, speed_01hz: u16) {
        self.min_startup_valid_speed = speed_01hz;
    }

    /// Shared feedback state (error counter, averaged estimates).
    pub fn feedback(&self) -> &SpeedFeedback {
        &self.feedback
    }
}

impl SpeedPosFeedback for StateObserver {
    fn el_angle(&self) -> i16 {
        self.feedback.el_angle
    }

    fn el_speed_dpp(&self) -> i16 {
        self.feedback.el_speed_dpp
    }

    fn avr_mec_speed_01hz(&self) -> i16 {
        self.feedback.avr_mec_speed_01hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObserverInputs;

    fn observer() -> StateObserver {
        StateObserver::new(&ObserverConfig::default()).unwrap()
    }

    fn small_observer() -> StateObserver {
        let config = ObserverConfig {
            speed_buffer_size_01hz: 8,
            speed_buffer_size_dpp: 4,
            ..ObserverConfig::default()
        };
        StateObserver::new(&config).unwrap()
    }

    fn fill_speed_buffer(observer: &mut StateObserver, value: i16) {
        for _ in 0..observer.speed_buffer_size_01hz {
            observer.speed_buffer.store(value);
        }
    }

    #[test]
    fn test_derived_scales() {
        let obs = observer();
        // F2 = 8192: 1_043_038 / 8192 = 127 halves to zero in seven steps.
        assert_eq!(obs.f3, 128);
        assert_eq!(obs.f3_pow2, 7);
        assert_eq!(obs.c6, (8192i32 * 128 / 10_430) as i16);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ObserverConfig {
            f1: 12345,
            ..ObserverConfig::default()
        };
        assert!(StateObserver::new(&config).is_err());
    }

    #[test]
    fn test_zero_inputs_hold_zero_state() {
        let mut obs = observer();
        for _ in 0..10 {
            assert_eq!(obs.calc_el_angle(&ObserverInputs::default()), 0);
        }
        assert_eq!(obs.el_angle(), 0);
        assert_eq!(obs.estimated_bemf(), VoltageAlphaBeta::default());
        assert_eq!(obs.estimated_current(), CurrentAlphaBeta::default());
    }

    #[test]
    fn test_accumulator_clamping() {
        let mut obs = observer();
        obs.bemf_alpha_acc = i32::MAX;
        obs.bemf_beta_acc = i32::MIN;
        obs.i_alpha_acc = i32::MAX;
        obs.i_beta_acc = i32::MIN;

        obs.calc_el_angle(&ObserverInputs::default());

        // The latched estimates reflect the post-clamp accumulators.
        assert_eq!(obs.estimated_bemf().alpha, i16::MAX);
        assert_eq!(obs.estimated_bemf().beta, -i16::MAX);

        // The correction terms may push the committed accumulators past the
        // bound again; the next cycle re-clamps before consuming them.
        obs.calc_el_angle(&ObserverInputs::default());
        assert!((obs.estimated_bemf().alpha as i32).abs() <= i16::MAX as i32);
        assert!((obs.estimated_bemf().beta as i32).abs() <= i16::MAX as i32);
    }

    #[test]
    fn test_clamped_estimates_stay_in_range() {
        let mut obs = observer();
        let inputs = ObserverInputs {
            i_alpha_beta: CurrentAlphaBeta {
                alpha: i16::MAX,
                beta: -i16::MAX,
            },
            v_alpha_beta: crate::types::VoltageAlphaBeta {
                alpha: i16::MAX,
                beta: -i16::MAX,
            },
            vbus: u16::MAX,
        };
        for _ in 0..1000 {
            obs.calc_el_angle(&inputs);
            let bemf = obs.estimated_bemf();
            assert!((bemf.alpha as i32).abs() <= i16::MAX as i32);
            assert!((bemf.beta as i32).abs() <= i16::MAX as i32);
        }
    }

    #[test]
    fn test_dpp_average_matches_window_sum() {
        let mut obs = small_observer();
        let mut shadow: [i16; 4] = [0; 4];

        for step in 0..50i32 {
            let value = ((step * 73) % 331 - 165) as i16;
            obs.speed_buffer.store(value);
            obs.calc_avrg_el_speed_dpp();

            shadow[(step % 4) as usize] = value;
            let direct: i32 = shadow.iter().map(|&s| s as i32).sum();
            assert_eq!(obs.dpp_buffer_sum, direct);
            assert_eq!(obs.el_speed_dpp(), (direct / 4) as i16);
        }
    }

    #[test]
    fn test_dpp_average_equal_windows() {
        let config = ObserverConfig {
            speed_buffer_size_01hz: 4,
            speed_buffer_size_dpp: 4,
            ..ObserverConfig::default()
        };
        let mut obs = StateObserver::new(&config).unwrap();
        let mut shadow: [i16; 4] = [0; 4];

        for step in 0..50i32 {
            let value = ((step * 41) % 199 - 99) as i16;
            obs.speed_buffer.store(value);
            obs.calc_avrg_el_speed_dpp();

            shadow[(step % 4) as usize] = value;
            let direct: i32 = shadow.iter().map(|&s| s as i32).sum();
            assert_eq!(obs.dpp_buffer_sum, direct);
        }
    }

    #[test]
    fn test_variance_gate_accepts_identical_samples() {
        let mut obs = observer();
        fill_speed_buffer(&mut obs, 100);
        obs.calc_avrg_mec_speed_01hz();
        assert!(obs.is_variance_tight());

        // The gate must hold for identical values of any magnitude.
        fill_speed_buffer(&mut obs, 3);
        obs.calc_avrg_mec_speed_01hz();
        assert!(obs.is_variance_tight());
    }

    #[test]
    fn test_variance_gate_rejects_noise() {
        let mut obs = observer();
        for step in 0..obs.speed_buffer_size_01hz {
            let value = if step % 2 == 0 { 2000 } else { -2000 };
            obs.speed_buffer.store(value);
        }
        obs.calc_avrg_mec_speed_01hz();
        assert!(!obs.is_variance_tight());
    }

    #[test]
    fn test_mechanical_speed_conversion() {
        let mut obs = observer();
        fill_speed_buffer(&mut obs, 100);
        // 100 dpp * 16 kHz * 10 / 65536 / 2 pole pairs = 122 (0.1 Hz).
        let (speed, _) = obs.calc_avrg_mec_speed_01hz();
        assert_eq!(speed, 122);
        assert_eq!(obs.avr_mec_speed_01hz(), 122);
    }

    #[test]
    fn test_bemf_consistency_evaluation() {
        let mut obs = observer();
        fill_speed_buffer(&mut obs, 100);

        // A healthy observed back-EMF dominates the model lower bound.
        obs.bemf_alpha_est = 1000;
        obs.bemf_beta_est = 500;
        obs.calc_avrg_mec_speed_01hz();
        assert!(obs.is_bemf_consistent());
        assert_eq!(obs.observed_bemf_level(), 1000 * 1000 + 500 * 500);
        assert!(obs.estimated_bemf_level() > 0);

        // A vanished back-EMF at a claimed nonzero speed is the spurious
        // fixed point the check exists for.
        obs.bemf_alpha_est = 0;
        obs.bemf_beta_est = 0;
        obs.calc_avrg_mec_speed_01hz();
        assert!(!obs.is_bemf_consistent());
    }

    #[test]
    fn test_bemf_consistency_skipped_above_max_speed() {
        let mut obs = observer();
        fill_speed_buffer(&mut obs, 32767);
        obs.bemf_alpha_est = 1000;
        obs.bemf_beta_est = 1000;
        obs.calc_avrg_mec_speed_01hz();
        // Skipped evaluations zero the diagnostic levels.
        assert!(!obs.is_bemf_consistent());
        assert_eq!(obs.observed_bemf_level(), 0);
        assert_eq!(obs.estimated_bemf_level(), 0);
    }

    #[test]
    fn test_convergence_on_exact_threshold() {
        let mut obs = observer();
        obs.is_speed_reliable = true;
        obs.feedback.avr_mec_speed_01hz = 100;

        // Default threshold is two consecutive in-band calls.
        assert!(!obs.is_observer_converged(100));
        assert!(obs.is_observer_converged(100));
        assert!(obs.is_algorithm_converged);
        assert_eq!(obs.feedback().speed_error_number(), 0);
    }

    #[test]
    fn test_convergence_sign_mismatch_resets_counter() {
        let mut obs = observer();
        obs.is_speed_reliable = true;
        obs.feedback.avr_mec_speed_01hz = 100;

        assert!(!obs.is_observer_converged(100));
        // Opposite-sign reference restarts the consecutive count.
        assert!(!obs.is_observer_converged(-100));
        assert_eq!(obs.consistency_counter, 0);
        assert!(!obs.is_observer_converged(100));
        assert!(obs.is_observer_converged(100));
    }

    #[test]
    fn test_convergence_requires_band_and_minimum_speed() {
        let mut obs = observer();
        obs.is_speed_reliable = true;

        // Below the startup minimum (default 40) nothing counts.
        obs.feedback.avr_mec_speed_01hz = 30;
        for _ in 0..10 {
            assert!(!obs.is_observer_converged(30));
        }

        // Out of band: estimate 100 against reference 200.
        obs.feedback.avr_mec_speed_01hz = 100;
        for _ in 0..10 {
            assert!(!obs.is_observer_converged(200));
        }

        // Loose variance blocks convergence too.
        obs.is_speed_reliable = false;
        for _ in 0..10 {
            assert!(!obs.is_observer_converged(100));
        }
    }

    #[test]
    fn test_force_convergence() {
        let mut obs = observer();
        obs.force_convergence();
        assert!(obs.is_observer_converged(0));
        assert!(obs.is_algorithm_converged);
    }

    #[test]
    fn test_force_convergence_to_measured() {
        let mut obs = observer();
        obs.is_speed_reliable = true;
        obs.feedback.avr_mec_speed_01hz = 100;
        obs.force_convergence_to_measured();

        // The reference argument is ignored in favor of the measured
        // average, so a mismatched ramp value still converges.
        assert!(!obs.is_observer_converged(9999));
        assert!(obs.is_observer_converged(9999));
    }

    #[test]
    fn test_reliability_hysteresis_trips_once() {
        let mut obs = observer();
        obs.is_algorithm_converged = true;
        obs.enable_bemf_consistency_check(false);

        // Noisy buffer: variance gate fails every call.
        for step in 0..obs.speed_buffer_size_01hz {
            let value = if step % 2 == 0 { 2000 } else { -2000 };
            obs.speed_buffer.store(value);
        }

        // Two failing cycles stay provisional, the third (default
        // hysteresis) trips the fault counter to its maximum.
        assert!(obs.calc_avrg_mec_speed_01hz().1);
        assert!(obs.calc_avrg_mec_speed_01hz().1);
        let (_, reliable) = obs.calc_avrg_mec_speed_01hz();
        assert!(!reliable);
        assert_eq!(
            obs.feedback().speed_error_number(),
            obs.feedback.maximum_speed_errors
        );
    }

    #[test]
    fn test_reliability_hysteresis_resets_on_success() {
        let mut obs = observer();
        obs.is_algorithm_converged = true;
        obs.enable_bemf_consistency_check(false);

        for step in 0..obs.speed_buffer_size_01hz {
            let value = if step % 2 == 0 { 2000 } else { -2000 };
            obs.speed_buffer.store(value);
        }
        assert!(obs.calc_avrg_mec_speed_01hz().1);
        assert!(obs.calc_avrg_mec_speed_01hz().1);
        assert_eq!(obs.reliability_counter, 2);

        // One healthy cycle resets the debounce.
        fill_speed_buffer(&mut obs, 100);
        assert!(obs.calc_avrg_mec_speed_01hz().1);
        assert_eq!(obs.reliability_counter, 0);
        assert_eq!(obs.feedback().speed_error_number(), 0);
    }

    #[test]
    fn test_set_pll_seeds_integral_term() {
        let mut obs = observer();
        obs.set_pll(10, 1234);
        assert_eq!(obs.el_angle(), 1234);
        assert_eq!(obs.pll.integral_term(), 10 * obs.pll.ki_divisor() as i32);

        obs.reset_pll();
        assert_eq!(obs.pll.integral_term(), 0);
    }

    #[test]
    fn test_gain_accessors_round_trip() {
        let mut obs = observer();
        obs.set_observer_gains(-1234, 5678);
        assert_eq!(obs.observer_gains(), (-1234, 5678));

        obs.set_pll_gains(300, 20);
        assert_eq!(obs.pll_gains(), (300, 20));
    }

    #[test]
    fn test_clear_resets_estimation_state() {
        let mut obs = observer();
        obs.bemf_alpha_acc = 12345;
        obs.feedback.el_angle = 4321;
        obs.is_algorithm_converged = true;
        obs.dpp_buffer_sum = 99;
        obs.set_pll(10, 0);

        obs.clear();

        assert_eq!(obs.bemf_alpha_acc, 0);
        assert_eq!(obs.el_angle(), 0);
        assert!(!obs.is_algorithm_converged);
        assert_eq!(obs.dpp_buffer_sum, 0);
        assert_eq!(obs.pll.integral_term(), 0);
    }
}
