// Fixed-point PI regulator with separate power-of-two gain divisors.
//
// Serves as the PLL phase regulator embedded in the state observer and as
// the current-loop regulator seam consumed by the feed-forward controller.
// Gains are 16-bit with their effective magnitude set by the divisors, so
// the integral accumulator keeps full pre-division resolution between
// cycles.

use crate::config::{is_power_of_two, log2, ConfigError};

/// PI regulator gains and output limits.
#[derive(Debug, Clone, Copy)]
pub struct PiRegulatorConfig {
    /// Proportional gain numerator.
    pub kp: i16,
    /// Integral gain numerator.
    pub ki: i16,
    /// Proportional gain divisor (power of two).
    pub kp_divisor: u16,
    /// Integral gain divisor (power of two).
    pub ki_divisor: u16,
    /// Upper output clamp.
    pub upper_output_limit: i16,
    /// Lower output clamp.
    pub lower_output_limit: i16,
}

impl Default for PiRegulatorConfig {
    fn default() -> Self {
        use crate::config::params::pll;
        Self {
            kp: pll::DEFAULT_KP,
            ki: pll::DEFAULT_KI,
            kp_divisor: pll::DEFAULT_KP_DIVISOR,
            ki_divisor: pll::DEFAULT_KI_DIVISOR,
            upper_output_limit: i16::MAX,
            lower_output_limit: -i16::MAX,
        }
    }
}

impl PiRegulatorConfig {
    /// Validates the power-of-two divisor precondition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_power_of_two(self.kp_divisor as u32) || !is_power_of_two(self.ki_divisor as u32) {
            return Err(ConfigError::DivisorNotPowerOfTwo);
        }
        Ok(())
    }
}

/// Discrete PI regulator on 16-bit fixed-point quantities.
#[derive(Debug, Clone)]
pub struct PiRegulator {
    kp: i16,
    ki: i16,
    kp_divisor: u16,
    ki_divisor: u16,
    #[cfg_attr(not(feature = "shift-scaling"), allow(dead_code))]
    kp_divisor_pow2: u8,
    #[cfg_attr(not(feature = "shift-scaling"), allow(dead_code))]
    ki_divisor_pow2: u8,
    integral_term: i32,
    upper_integral_limit: i32,
    lower_integral_limit: i32,
    upper_output_limit: i16,
    lower_output_limit: i16,
}

impl PiRegulator {
    pub fn new(config: &PiRegulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        // Integral clamp sized so the post-division contribution can just
        // reach the output clamp.
        let upper_integral_limit = config.upper_output_limit as i32 * config.ki_divisor as i32;
        let lower_integral_limit = config.lower_output_limit as i32 * config.ki_divisor as i32;

        Ok(Self {
            kp: config.kp,
            ki: config.ki,
            kp_divisor: config.kp_divisor,
            ki_divisor: config.ki_divisor,
            kp_divisor_pow2: log2(config.kp_divisor as u32),
            ki_divisor_pow2: log2(config.ki_divisor as u32),
            integral_term: 0,
            upper_integral_limit,
            lower_integral_limit,
            upper_output_limit: config.upper_output_limit,
            lower_output_limit: config.lower_output_limit,
        })
    }

    /// One regulation step: accumulates the integral term and returns the
    /// clamped proportional + integral output.
    pub fn compute(&mut self, error: i32) -> i16 {
        let proportional = self.kp as i64 * error as i64;

        if self.ki == 0 {
            // A zeroed integral gain empties the accumulator so a later
            // re-enable starts clean.
            self.integral_term = 0;
        } else {
            let sum = self.integral_term as i64 + self.ki as i64 * error as i64;
            self.integral_term = sum.clamp(
                self.lower_integral_limit as i64,
                self.upper_integral_limit as i64,
            ) as i32;
        }

        #[cfg(not(feature = "shift-scaling"))]
        let output = proportional / self.kp_divisor as i64
            + (self.integral_term / self.ki_divisor as i32) as i64;
        #[cfg(feature = "shift-scaling")]
        let output = (proportional >> self.kp_divisor_pow2)
            + (self.integral_term >> self.ki_divisor_pow2) as i64;

        output.clamp(self.lower_output_limit as i64, self.upper_output_limit as i64) as i16
    }

    pub fn kp(&self) -> i16 {
        self.kp
    }

    pub fn set_kp(&mut self, kp: i16) {
        self.kp = kp;
    }

    pub fn ki(&self) -> i16 {
        self.ki
    }

    pub fn set_ki(&mut self, ki: i16) {
        self.ki = ki;
    }

    pub fn kp_divisor(&self) -> u16 {
        self.kp_divisor
    }

    pub fn ki_divisor(&self) -> u16 {
        self.ki_divisor
    }

    /// Raw integral accumulator (pre-division).
    pub fn integral_term(&self) -> i32 {
        self.integral_term
    }

    /// Overwrites the integral accumulator, clamped to the integral limits.
    pub fn set_integral_term(&mut self, integral_term: i32) {
        self.integral_term =
            integral_term.clamp(self.lower_integral_limit, self.upper_integral_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regulator(kp: i16, ki: i16) -> PiRegulator {
        PiRegulator::new(&PiRegulatorConfig {
            kp,
            ki,
            kp_divisor: 16,
            ki_divisor: 16,
            upper_output_limit: i16::MAX,
            lower_output_limit: -i16::MAX,
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_non_power_of_two_divisor() {
        let config = PiRegulatorConfig {
            kp_divisor: 100,
            ..PiRegulatorConfig::default()
        };
        assert_eq!(PiRegulator::new(&config).err(), Some(ConfigError::DivisorNotPowerOfTwo));
    }

    #[test]
    fn test_zero_error_zero_state_gives_zero() {
        let mut pi = regulator(448, 16);
        assert_eq!(pi.compute(0), 0);
        assert_eq!(pi.integral_term(), 0);
    }

    #[test]
    fn test_proportional_term() {
        let mut pi = regulator(32, 0);
        // 32 * 100 / 16 = 200, no integral contribution
        assert_eq!(pi.compute(100), 200);
    }

    #[test]
    fn test_integral_accumulation() {
        let mut pi = regulator(0, 16);
        // Each step adds 16 * 100 = 1600 to the accumulator; output is the
        // accumulator divided by 16.
        assert_eq!(pi.compute(100), 100);
        assert_eq!(pi.compute(100), 200);
        assert_eq!(pi.integral_term(), 3200);
    }

    #[test]
    fn test_output_clamp() {
        let mut pi = regulator(i16::MAX, 0);
        assert_eq!(pi.compute(1_000_000), i16::MAX);
        assert_eq!(pi.compute(-1_000_000), -i16::MAX);
    }

    #[test]
    fn test_integral_clamp() {
        let mut pi = regulator(0, i16::MAX);
        for _ in 0..100 {
            pi.compute(1_000_000);
        }
        assert_eq!(pi.integral_term(), i16::MAX as i32 * 16);
        assert_eq!(pi.compute(0), i16::MAX);
    }

    #[test]
    fn test_zero_ki_empties_accumulator() {
        let mut pi = regulator(0, 16);
        pi.compute(100);
        assert!(pi.integral_term() != 0);
        pi.set_ki(0);
        pi.compute(100);
        assert_eq!(pi.integral_term(), 0);
    }

    #[test]
    fn test_set_integral_term_is_clamped() {
        let mut pi = regulator(0, 16);
        pi.set_integral_term(i32::MAX);
        assert_eq!(pi.integral_term(), i16::MAX as i32 * 16);
    }
}
