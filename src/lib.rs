//! Sensorless rotor position/speed estimation for PMSM field-oriented
//! control.
//!
//! Two cooperating components, driven synchronously by the drive's control
//! interrupt:
//!
//! - [`StateObserver`]: a fixed-point Luenberger observer of the stator
//!   currents and back-EMF in the stationary alpha/beta frame, with a
//!   software PLL extracting the electrical angle and speed, a variance
//!   gate on the speed history and a redundant back-EMF consistency check.
//! - [`FeedForward`]: an open-loop voltage estimate from the commanded
//!   currents, bus voltage and speed, added to the current-loop PI output.
//!
//! No allocation, no floating point in the periodic paths, every update
//! bounded by the averaging window size. ADC sampling, PWM generation and
//! the outer speed/torque loop are the caller's collaborators, reached
//! through the narrow traits in [`speed_feedback`] and [`feed_forward`].

#![cfg_attr(not(test), no_std)]

// This must go first so the other modules see its macros.
mod fmt;

pub mod config;
pub mod feed_forward;
pub mod observer;
pub mod pi_regulator;
pub mod speed_feedback;
pub mod trig;
pub mod types;

// Re-export main types for easier access
pub use config::{ConfigError, MotorParams, ObserverConfig, ObserverGains};
pub use feed_forward::{BusVoltageSensor, FeedForward, FeedForwardConfig, FeedForwardTuning};
pub use observer::StateObserver;
pub use pi_regulator::{PiRegulator, PiRegulatorConfig};
pub use speed_feedback::{SpeedFeedback, SpeedFeedbackConfig, SpeedPosFeedback};
pub use types::{CurrentAlphaBeta, CurrentQd, ObserverInputs, VoltageAlphaBeta, VoltageQd};
