// Control-loop parameters and fixed loop constants

use crate::pid::PidGains;

/// Control loop rate [Hz]. PID integration and the velocity estimate both
/// assume this exact rate; tick jitter is the platform's problem.
pub const RATE_HZ: f32 = 40_000.0;

/// Timer counts for one PWM half-period.
/// The center-aligned timer runs at 90MHz and updates at 80kHz (once up,
/// once down per 40kHz control tick): 90MHz / 80kHz = 1125.
pub const PWM_COUNTS: u16 = (90_000_000 / 80_000) as u16;

/// Number of ticks spent accumulating current-sense offsets.
pub const CALIBRATE_COUNT: u16 = 256;

/// Maximum encoder delta per tick (out of 65536 per revolution) before the
/// reading is treated as corrupt and the drive faults.
pub const MAX_POSITION_DELTA: u16 = 1000;

/// Expected current-sense zero point on a 12-bit ADC.
pub const ADC_MIDSCALE: u16 = 2048;

/// Maximum tolerated deviation of a calibrated offset from mid-scale.
pub const CALIBRATION_TOLERANCE: u16 = 200;

/// Selectable ADC sample times [ADC clock cycles]; `Config::adc_cycles`
/// picks the smallest entry that covers the requested value.
pub const ADC_CYCLE_MAP: [u16; 8] = [3, 15, 28, 56, 84, 112, 144, 480];

/// Map a requested cycle count to an index into [`ADC_CYCLE_MAP`].
pub fn adc_cycle_index(cycles: u16) -> usize {
    for (index, entry) in ADC_CYCLE_MAP.iter().enumerate() {
        if cycles <= *entry {
            return index;
        }
    }
    // Never return past the end
    ADC_CYCLE_MAP.len() - 1
}

/// Servo configuration.
///
/// Owned by the foreground context; the ISR sees a coherent per-tick
/// snapshot through the double-buffered publication in [`crate::servo`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Motor pole count (pole pairs * 2)
    pub motor_poles: u8,
    /// Encoder-to-electrical offset [fraction of an electrical revolution]
    pub motor_offset: f32,
    /// Scale from raw unwrapped position to user units [per revolution]
    pub unwrapped_position_scale: f32,
    /// Phase current per ADC count [A]
    pub i_scale_a: f32,
    /// Bus voltage per ADC count [V]
    pub v_scale_v: f32,
    /// Bus voltage above which entering an active mode faults [V]
    pub max_voltage: f32,
    /// Phase resistance [ohm]
    pub motor_resistance: f32,
    /// Back-EMF constant [V per electrical Hz]
    pub motor_v_per_hz: f32,
    /// Feed-forward contribution, 0.0 disables
    pub feedforward_scale: f32,
    /// Requested ADC sample time [cycles], see [`ADC_CYCLE_MAP`]
    pub adc_cycles: u16,
    /// Conversions averaged per tick
    pub adc_sample_count: u16,
    /// Shared gains for the d/q current loops
    pub pid_dq: PidGains,
    /// Gains for the position loop
    pub pid_position: PidGains,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            motor_poles: 14,
            motor_offset: 0.0,
            unwrapped_position_scale: 1.0,
            // 0.5 mOhm shunt, 40x amplifier, 3.3V / 12bit ADC
            i_scale_a: 0.04028,
            // 100k / 4.7k divider on the 3.3V / 12bit ADC
            v_scale_v: 0.017957,
            max_voltage: 30.0,
            motor_resistance: 0.030,
            motor_v_per_hz: 0.126,
            feedforward_scale: 1.0,
            adc_cycles: 15,
            adc_sample_count: 4,
            pid_dq: PidGains::new(0.5, 120.0, 0.0),
            pid_position: PidGains::new(50.0, 0.0, 2.0),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
