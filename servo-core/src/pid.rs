// Discrete PID with externally stored gains and state
//
// The gain block lives in `Config` and the state block in `Status`, so the
// mode arbiter can zero the state of an inactive controller in place and the
// telemetry layer can stream the individual terms.

/// PID gain block.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
}

impl PidGains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    /// Run one controller step at a fixed sample rate.
    ///
    /// The derivative term uses the externally supplied rates instead of
    /// differentiating the error, so a noisy measurement does not get
    /// amplified by the 40kHz sample rate.
    pub fn apply(
        &self,
        state: &mut PidState,
        measured: f32,
        desired: f32,
        measured_rate: f32,
        desired_rate: f32,
        sample_rate: f32,
    ) -> f32 {
        let error = desired - measured;
        let error_rate = desired_rate - measured_rate;

        state.integral += error * self.ki / sample_rate;
        state.p = self.kp * error;
        state.d = self.kd * error_rate;
        state.command = state.p + state.integral + state.d;

        state.command
    }
}

/// PID state block, zeroed whenever the controller is inactive.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidState {
    /// Proportional term of the last step
    pub p: f32,
    /// Derivative term of the last step
    pub d: f32,
    /// Integral accumulator (gain already applied)
    pub integral: f32,
    /// Last commanded output
    pub command: f32,
}

impl PidState {
    pub const fn new() -> Self {
        Self {
            p: 0.0,
            d: 0.0,
            integral: 0.0,
            command: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let gains = PidGains::new(2.0, 0.0, 0.0);
        let mut state = PidState::new();
        let out = gains.apply(&mut state, 1.0, 4.0, 0.0, 0.0, 1000.0);
        assert_eq!(out, 6.0);
        assert_eq!(state.p, 6.0);
        assert_eq!(state.integral, 0.0);
    }

    #[test]
    fn test_integral_accumulation() {
        let gains = PidGains::new(0.0, 10.0, 0.0);
        let mut state = PidState::new();
        // error = 1.0 at 1kHz: the integral grows by ki/rate each step
        gains.apply(&mut state, 0.0, 1.0, 0.0, 0.0, 1000.0);
        assert!((state.integral - 0.01).abs() < 1e-6);
        gains.apply(&mut state, 0.0, 1.0, 0.0, 0.0, 1000.0);
        assert!((state.integral - 0.02).abs() < 1e-6);
        assert!((state.command - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_derivative_from_supplied_rates() {
        let gains = PidGains::new(0.0, 0.0, 0.5);
        let mut state = PidState::new();
        let out = gains.apply(&mut state, 0.0, 0.0, 2.0, 5.0, 1000.0);
        // error_rate = desired_rate - measured_rate = 3.0
        assert_eq!(out, 1.5);
        assert_eq!(state.d, 1.5);
    }

    #[test]
    fn test_combined_terms() {
        let gains = PidGains::new(1.0, 100.0, 0.1);
        let mut state = PidState::new();
        let out = gains.apply(&mut state, 1.0, 2.0, 0.0, 1.0, 100.0);
        // p = 1.0, integral = 1.0 * 100 / 100 = 1.0, d = 0.1
        assert!((out - 2.1).abs() < 1e-6);
        assert_eq!(out, state.command);
    }

    #[test]
    fn test_state_reset_in_place() {
        let gains = PidGains::new(1.0, 1.0, 1.0);
        let mut state = PidState::new();
        gains.apply(&mut state, 0.0, 1.0, 0.0, 1.0, 100.0);
        assert_ne!(state, PidState::default());
        state = PidState::default();
        assert_eq!(state.integral, 0.0);
        assert_eq!(state.command, 0.0);
    }
}
