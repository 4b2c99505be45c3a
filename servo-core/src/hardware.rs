// Hardware contracts consumed by the control loop
//
// The loop never touches a peripheral directly; the platform crate supplies
// these implementations and the test suite supplies mocks.

/// Raw result of one simultaneous conversion across the three converters.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcFrame {
    /// Phase 1 current sense
    pub current1: u16,
    /// Phase 2 current sense
    pub current2: u16,
    /// Bus voltage sense
    pub vsense: u16,
}

/// Absolute rotor position sensor, one revolution per 65536 counts.
pub trait PositionSensor {
    fn sample(&mut self) -> u16;
}

/// Gate driver for the three half bridges.
///
/// `enable` powers the gate driver itself (slow, handled by the millisecond
/// poll), `power` enables the output stage. Both sides of the loop touch the
/// driver, so implementations use interior mutability.
pub trait MotorDriver {
    fn enable(&self, on: bool);
    fn power(&self, on: bool);
    fn fault(&self) -> bool;
}

/// The three output-compare registers of the center-aligned PWM timer.
///
/// Arguments arrive in logical phase order U/V/W; the implementation owns
/// the mapping to timer channels (V and W are swapped on the board, see the
/// platform crate).
pub trait PwmOutput {
    fn set_compare(&mut self, u: u16, v: u16, w: u16);
}

/// Software-started simultaneous conversion of the two phase currents and
/// the bus voltage. Busy-waits for end-of-conversion; the oversample loop in
/// the sense stage bounds the total wait.
pub trait CurrentSense {
    fn convert(&mut self) -> AdcFrame;
}

/// Sink for the per-tick debug frame. Must be fire-and-forget; dropping
/// frames under load is acceptable, blocking the interrupt is not.
pub trait DebugSink {
    fn emit(&mut self, frame: &[u8; crate::telemetry::DEBUG_FRAME_LEN]);
}

/// Debug output disabled.
impl DebugSink for () {
    fn emit(&mut self, _frame: &[u8; crate::telemetry::DEBUG_FRAME_LEN]) {}
}
