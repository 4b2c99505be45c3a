// Operating modes, fault codes and the foreground command payload

use crate::math::Uvw;

/// Operating mode of the drive.
///
/// `Enabling`, `Calibrating`, `CalibrationComplete` and `Fault` are internal
/// states and cannot be requested through the command interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    Stopped = 0,
    Fault = 1,
    Enabling = 2,
    Calibrating = 3,
    CalibrationComplete = 4,
    Pwm = 5,
    Voltage = 6,
    VoltageFoc = 7,
    Current = 8,
    Position = 9,
}

impl Mode {
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// Decode a mode previously stored with [`Mode::as_raw`].
    pub const fn from_raw(raw: u8) -> Mode {
        match raw {
            0 => Mode::Stopped,
            1 => Mode::Fault,
            2 => Mode::Enabling,
            3 => Mode::Calibrating,
            4 => Mode::CalibrationComplete,
            5 => Mode::Pwm,
            6 => Mode::Voltage,
            7 => Mode::VoltageFoc,
            8 => Mode::Current,
            9 => Mode::Position,
            _ => Mode::Fault,
        }
    }

    /// Whether the foreground may request this mode.
    pub const fn is_commandable(self) -> bool {
        matches!(
            self,
            Mode::Stopped
                | Mode::Pwm
                | Mode::Voltage
                | Mode::VoltageFoc
                | Mode::Current
                | Mode::Position
        )
    }

    /// Whether this mode drives the power stage.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Mode::Pwm | Mode::Voltage | Mode::VoltageFoc | Mode::Current | Mode::Position
        )
    }
}

/// Latched fault cause, `Success` outside of `Mode::Fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FaultCode {
    Success = 0,
    /// Per-tick encoder delta exceeded the plausibility limit
    EncoderFault = 1,
    /// Gate driver reported a fault while entering an active mode
    MotorDriverFault = 2,
    /// Bus voltage above the configured maximum while entering an active mode
    OverVoltage = 3,
    /// Current-sense zero offset out of range during calibration
    CalibrationFault = 4,
}

/// Command rejected at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The requested mode is internal and cannot be commanded
    InvalidMode,
}

/// Foreground command payload.
///
/// All mode payloads are carried side by side; the dispatcher only reads the
/// fields belonging to the requested mode.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandData {
    pub mode: Mode,

    /// `Mode::Pwm`: per-phase duty cycles
    pub pwm: Uvw,
    /// `Mode::Voltage`: per-phase voltages [V]
    pub phase_v: Uvw,
    /// `Mode::VoltageFoc`: fixed electrical angle [rad] and voltage [V]
    pub theta: f32,
    pub voltage: f32,
    /// `Mode::Current`: target rotor-frame currents [A]
    pub i_d_a: f32,
    pub i_q_a: f32,
    /// `Mode::Position`: position target [rev], velocity feed-forward [rev/s]
    /// and current clamp [A]
    pub position: f32,
    pub velocity: f32,
    pub max_current: f32,

    /// One-shot override of the integrated position [rev]; consumed and
    /// cleared by the control interrupt.
    pub set_position: Option<f32>,
}

impl CommandData {
    pub const fn new() -> Self {
        Self {
            mode: Mode::Stopped,
            pwm: Uvw::ZERO,
            phase_v: Uvw::ZERO,
            theta: 0.0,
            voltage: 0.0,
            i_d_a: 0.0,
            i_q_a: 0.0,
            position: 0.0,
            velocity: 0.0,
            max_current: 0.0,
            set_position: None,
        }
    }
}

impl Default for CommandData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_raw_round_trip() {
        for raw in 0..=9u8 {
            let mode = Mode::from_raw(raw);
            assert_eq!(mode.as_raw(), raw);
        }
    }

    #[test]
    fn test_mode_from_invalid_raw() {
        assert_eq!(Mode::from_raw(200), Mode::Fault);
    }

    #[test]
    fn test_commandable_modes() {
        assert!(Mode::Stopped.is_commandable());
        assert!(Mode::Pwm.is_commandable());
        assert!(Mode::Position.is_commandable());

        assert!(!Mode::Fault.is_commandable());
        assert!(!Mode::Enabling.is_commandable());
        assert!(!Mode::Calibrating.is_commandable());
        assert!(!Mode::CalibrationComplete.is_commandable());
    }

    #[test]
    fn test_active_modes() {
        assert!(Mode::Pwm.is_active());
        assert!(Mode::Current.is_active());
        assert!(!Mode::Stopped.is_active());
        assert!(!Mode::Calibrating.is_active());
    }
}
