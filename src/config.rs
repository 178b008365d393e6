//! Configuration module
//!
//! このモジュールはオブザーバ・PLL・フィードフォワード制御の設定と、
//! モーター電気定数からのオブザーバ係数導出を提供します。
//!
//! 固定小数点のスケール係数と平均ウィンドウ長はすべて2のべき乗である
//! 必要があり、ここで構築時に検証されます（実行時パスは検証しません）。

pub mod params;

use crate::fmt::*;
use crate::pi_regulator::PiRegulatorConfig;
use crate::speed_feedback::SpeedFeedbackConfig;

/// Configuration rejected at construction time.
///
/// The periodic estimation paths divide by scale factors and window sizes
/// (or shift by their logarithms with the `shift-scaling` feature), so a
/// value that is not a power of two is a caller error, not a runtime case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A current/back-EMF scale factor is not a positive power of two.
    ScaleFactorNotPowerOfTwo,

    /// The back-EMF scale factor is too small for the derived shift scale
    /// to fit 16 bits.
    ScaleFactorOutOfRange,

    /// A speed-averaging window size is not a power of two.
    WindowSizeNotPowerOfTwo,

    /// A speed-averaging window exceeds the buffer capacity.
    WindowTooLarge,

    /// The electrical-speed window is longer than the mechanical one.
    DppWindowExceedsSpeedWindow,

    /// A PI regulator gain divisor is not a positive power of two.
    DivisorNotPowerOfTwo,

    /// The feed-forward low-pass time constant is not a positive power of
    /// two.
    FilterBandwidthNotPowerOfTwo,

    /// A derived observer coefficient does not fit the 16-bit gain range.
    GainOutOfRange,
}

/// `true` when `value` is a positive power of two.
pub(crate) fn is_power_of_two(value: u32) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// Base-two logarithm of a validated power of two.
pub(crate) fn log2(value: u32) -> u8 {
    value.trailing_zeros() as u8
}

/// State observer + PLL configuration.
///
/// Defaults come from [`params`]; observer coefficients can be derived from
/// motor electrical constants with [`ObserverGains::from_motor`].
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Current scale factor F1 (power of two).
    pub f1: i16,
    /// Back-EMF scale factor F2 (power of two, at least 64).
    pub f2: i16,
    /// Observer coefficient C1 (stator resistance term).
    pub c1: i16,
    /// Observer coefficient C2 (current-error correction gain K1).
    pub c2: i16,
    /// Observer coefficient C3 (back-EMF term).
    pub c3: i16,
    /// Observer coefficient C4 (back-EMF correction gain K2).
    pub c4: i16,
    /// Observer coefficient C5 (applied-voltage term).
    pub c5: i16,
    /// Mechanical-speed averaging window (power of two, at most
    /// [`crate::observer::MAX_SPEED_BUFFER_SIZE`]).
    pub speed_buffer_size_01hz: u8,
    /// Electrical-speed averaging window (power of two, at most the
    /// mechanical window).
    pub speed_buffer_size_dpp: u8,
    /// Variance gate threshold as a fraction of the squared average speed,
    /// in 1/128 units.
    pub variance_percentage: u16,
    /// Back-EMF consistency model gain, in 1/64 units.
    pub bemf_consistency_gain: u8,
    /// Back-EMF consistency tolerance, in 1/64 units.
    pub bemf_consistency_check: u8,
    /// Consecutive failing speed-loop cycles before the fault counter trips.
    pub reliability_hysteresis: u8,
    /// Consecutive in-band estimates required to declare convergence.
    pub startup_consist_threshold: u8,
    /// Upper convergence band multiplier, in 1/16 units.
    pub speed_validation_band_h: u16,
    /// Lower convergence band multiplier, in 1/16 units.
    pub speed_validation_band_l: u16,
    /// Minimum mechanical speed magnitude validating the start-up [0.1 Hz].
    pub min_startup_valid_speed: u16,
    /// Speed magnitude above which the consistency check is skipped
    /// [0.1 Hz].
    pub max_app_positive_mec_speed_01hz: u16,
    /// PLL regulator gains and limits.
    pub pll: PiRegulatorConfig,
    /// Shared speed-feedback parameters.
    pub feedback: SpeedFeedbackConfig,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            f1: params::DEFAULT_F1,
            f2: params::DEFAULT_F2,
            c1: params::DEFAULT_C1,
            c2: params::DEFAULT_C2,
            c3: params::DEFAULT_C3,
            c4: params::DEFAULT_C4,
            c5: params::DEFAULT_C5,
            speed_buffer_size_01hz: params::DEFAULT_SPEED_BUFFER_SIZE_01HZ,
            speed_buffer_size_dpp: params::DEFAULT_SPEED_BUFFER_SIZE_DPP,
            variance_percentage: params::DEFAULT_VARIANCE_PERCENTAGE,
            bemf_consistency_gain: params::DEFAULT_BEMF_CONSISTENCY_GAIN,
            bemf_consistency_check: params::DEFAULT_BEMF_CONSISTENCY_CHECK,
            reliability_hysteresis: params::DEFAULT_RELIABILITY_HYSTERESIS,
            startup_consist_threshold: params::DEFAULT_STARTUP_CONSIST_THRESHOLD,
            speed_validation_band_h: params::DEFAULT_SPEED_VALIDATION_BAND_H,
            speed_validation_band_l: params::DEFAULT_SPEED_VALIDATION_BAND_L,
            min_startup_valid_speed: params::DEFAULT_MIN_STARTUP_VALID_SPEED_01HZ,
            max_app_positive_mec_speed_01hz: params::DEFAULT_MAX_APP_POSITIVE_MEC_SPEED_01HZ,
            pll: PiRegulatorConfig::default(),
            feedback: SpeedFeedbackConfig::default(),
        }
    }
}

impl ObserverConfig {
    /// Validates the power-of-two and range preconditions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.f1 <= 0 || !is_power_of_two(self.f1 as u32) {
            error!("observer config rejected: F1 = {} is not a power of two", self.f1);
            return Err(ConfigError::ScaleFactorNotPowerOfTwo);
        }
        if self.f2 <= 0 || !is_power_of_two(self.f2 as u32) {
            error!("observer config rejected: F2 = {} is not a power of two", self.f2);
            return Err(ConfigError::ScaleFactorNotPowerOfTwo);
        }
        // The derived shift scale F3 doubles once per halving of
        // 1_043_038 / F2 and must stay a positive i16.
        if self.f2 < 64 {
            error!("observer config rejected: F2 = {} below minimum of 64", self.f2);
            return Err(ConfigError::ScaleFactorOutOfRange);
        }
        if !is_power_of_two(self.speed_buffer_size_01hz as u32)
            || !is_power_of_two(self.speed_buffer_size_dpp as u32)
        {
            error!(
                "observer config rejected: window sizes {}/{} must be powers of two",
                self.speed_buffer_size_01hz, self.speed_buffer_size_dpp
            );
            return Err(ConfigError::WindowSizeNotPowerOfTwo);
        }
        if self.speed_buffer_size_01hz as usize > crate::observer::MAX_SPEED_BUFFER_SIZE {
            error!(
                "observer config rejected: window size {} exceeds capacity",
                self.speed_buffer_size_01hz
            );
            return Err(ConfigError::WindowTooLarge);
        }
        if self.speed_buffer_size_dpp > self.speed_buffer_size_01hz {
            error!(
                "observer config rejected: dpp window {} exceeds mechanical window {}",
                self.speed_buffer_size_dpp, self.speed_buffer_size_01hz
            );
            return Err(ConfigError::DppWindowExceedsSpeedWindow);
        }
        self.pll.validate()
    }
}

/// Motor electrical constants used to derive the observer coefficients.
///
/// The derivation runs in f32 once at configuration time; the periodic
/// estimation paths never touch floating point.
#[derive(Debug, Clone, Copy)]
pub struct MotorParams {
    /// Stator phase resistance [ohm].
    pub rs: f32,
    /// Stator phase inductance [H].
    pub ls: f32,
    /// Current full scale of the acquisition stage [A].
    pub max_current: f32,
    /// Voltage full scale of the modulator [V].
    pub max_voltage: f32,
    /// Back-EMF magnitude at maximum application speed [V].
    pub max_bemf_voltage: f32,
    /// Observer execution rate [Hz].
    pub control_frequency: f32,
    /// Current scale factor F1 (power of two).
    pub f1: i16,
    /// Back-EMF scale factor F2 (power of two).
    pub f2: i16,
    /// Current-error correction gain K1.
    pub gain1: i16,
    /// Back-EMF correction gain K2.
    pub gain2: i16,
}

/// Observer coefficients derived from [`MotorParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverGains {
    pub f1: i16,
    pub f2: i16,
    pub c1: i16,
    pub c2: i16,
    pub c3: i16,
    pub c4: i16,
    pub c5: i16,
}

impl ObserverGains {
    /// Derives the model coefficients from the motor electrical constants:
    /// `C1 = F1*Rs/(Ls*Fs)`, `C3 = F1*Emax/(Ls*Imax*Fs)`,
    /// `C5 = F1*Vmax/(Ls*Imax*Fs)`, with `C2`/`C4` taken directly from the
    /// correction gains.
    pub fn from_motor(motor: &MotorParams) -> Result<Self, ConfigError> {
        if motor.f1 <= 0 || !is_power_of_two(motor.f1 as u32) {
            return Err(ConfigError::ScaleFactorNotPowerOfTwo);
        }
        if motor.f2 <= 0 || !is_power_of_two(motor.f2 as u32) {
            return Err(ConfigError::ScaleFactorNotPowerOfTwo);
        }

        let f1 = motor.f1 as f32;
        let denom = motor.ls * motor.control_frequency;
        let c1 = libm::roundf(f1 * motor.rs / denom);
        let denom_i = motor.ls * motor.max_current * motor.control_frequency;
        let c3 = libm::roundf(f1 * motor.max_bemf_voltage / denom_i);
        let c5 = libm::roundf(f1 * motor.max_voltage / denom_i);

        for coefficient in [c1, c3, c5] {
            if !(coefficient.is_finite()
                && coefficient >= i16::MIN as f32
                && coefficient <= i16::MAX as f32)
            {
                error!("observer gain derivation out of 16-bit range");
                return Err(ConfigError::GainOutOfRange);
            }
        }

        Ok(Self {
            f1: motor.f1,
            f2: motor.f2,
            c1: c1 as i16,
            c2: motor.gain1,
            c3: c3 as i16,
            c4: motor.gain2,
            c5: c5 as i16,
        })
    }
}

impl ObserverConfig {
    /// Overwrites the scale factors and model coefficients with derived
    /// gains, leaving the tuning thresholds untouched.
    pub fn apply_gains(&mut self, gains: &ObserverGains) {
        self.f1 = gains.f1;
        self.f2 = gains.f2;
        self.c1 = gains.c1;
        self.c2 = gains.c2;
        self.c3 = gains.c3;
        self.c4 = gains.c4;
        self.c5 = gains.c5;
    }
}
