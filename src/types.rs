// Fixed-point vector types shared by the estimation components.
//
// All quantities are 16-bit signed counts in the scaling of the surrounding
// drive firmware: currents in ADC counts, voltages as a fraction of the bus
// voltage, angles as wrapping s16 turns (-32768..32767 spans -pi..pi).

/// Stator current pair in the stationary alpha/beta frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentAlphaBeta {
    pub alpha: i16,
    pub beta: i16,
}

/// Applied voltage pair in the stationary alpha/beta frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageAlphaBeta {
    pub alpha: i16,
    pub beta: i16,
}

/// Current pair in the rotor-synchronous q/d frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentQd {
    pub q: i16,
    pub d: i16,
}

/// Voltage pair in the rotor-synchronous q/d frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageQd {
    pub q: i16,
    pub d: i16,
}

/// Per-cycle observer inputs, sampled by the acquisition stage.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverInputs {
    /// Measured stator currents.
    pub i_alpha_beta: CurrentAlphaBeta,
    /// Voltages applied by the modulator during the sampled cycle.
    pub v_alpha_beta: VoltageAlphaBeta,
    /// DC bus voltage in 16-bit sensor counts.
    pub vbus: u16,
}
