// The 40kHz servo loop and its two-context access structure
//
// `ServoLoop` is the interrupt body and owns every per-tick mutable field.
// `ServoHandle` is the foreground API (command ingest, snapshots, the
// millisecond poll). The two meet only in `ServoShared`: the double-buffered
// command and config slots, the atomic mode word and the published
// status/control snapshots.

use core::cell::Cell;
use core::sync::atomic::{AtomicU8, Ordering};

use critical_section::Mutex;
use libm::roundf;

use crate::command::{CommandData, CommandError, FaultCode, Mode};
use crate::config::{
    Config, ADC_MIDSCALE, CALIBRATE_COUNT, CALIBRATION_TOLERANCE, MAX_POSITION_DELTA, PWM_COUNTS,
    RATE_HZ,
};
use crate::filter::MovingAverage;
use crate::handoff::DoubleBuffered;
use crate::hardware::{CurrentSense, DebugSink, MotorDriver, PositionSensor, PwmOutput};
use crate::math::{self, SinCos, Uvw};
use crate::pid::PidState;
use crate::telemetry;

/// Length of the velocity moving-average window (0.8ms at 40kHz).
pub const VELOCITY_FILTER_LEN: usize = 32;

/// Duty-cycle floor while power is applied; reserves the low side of the
/// PWM period for current sampling.
pub const MIN_PWM: f32 = 0.1;
/// Duty-cycle ceiling while power is applied.
pub const MAX_PWM: f32 = 0.9;

/// Snapshot of the loop state, published once per tick.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub mode: Mode,
    pub fault: FaultCode,

    /// Oversampled raw conversions of the last tick
    pub adc1_raw: u16,
    pub adc2_raw: u16,
    pub adc3_raw: u16,
    /// Calibrated current-sense zero points
    pub adc1_offset: u16,
    pub adc2_offset: u16,

    pub cur1_a: f32,
    pub cur2_a: f32,
    pub bus_v: f32,
    /// Measured rotor-frame currents
    pub d_a: f32,
    pub q_a: f32,

    pub position_raw: u16,
    /// Integrated position [1/65536 revolution], wraps with the i32 range
    pub unwrapped_position_raw: i32,
    /// Integrated position scaled to user units
    pub unwrapped_position: f32,
    /// Velocity estimate [rev/s]
    pub velocity: f32,
    /// Electrical angle [rad], always in [0, 2*pi)
    pub electrical_theta: f32,

    pub pid_d: PidState,
    pub pid_q: PidState,
    pub pid_position: PidState,
}

impl Status {
    pub const fn new() -> Self {
        Self {
            mode: Mode::Stopped,
            fault: FaultCode::Success,
            adc1_raw: 0,
            adc2_raw: 0,
            adc3_raw: 0,
            adc1_offset: ADC_MIDSCALE,
            adc2_offset: ADC_MIDSCALE,
            cur1_a: 0.0,
            cur2_a: 0.0,
            bus_v: 0.0,
            d_a: 0.0,
            q_a: 0.0,
            position_raw: 0,
            unwrapped_position_raw: 0,
            unwrapped_position: 0.0,
            velocity: 0.0,
            electrical_theta: 0.0,
            pid_d: PidState::new(),
            pid_q: PidState::new(),
            pid_position: PidState::new(),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

/// Trace of what the dispatcher commanded on the last tick.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Control {
    pub pwm: Uvw,
    pub voltage: Uvw,
    pub i_d_a: f32,
    pub i_q_a: f32,
    pub d_v: f32,
    pub q_v: f32,
}

impl Control {
    pub const fn new() -> Self {
        Self {
            pwm: Uvw::ZERO,
            voltage: Uvw::ZERO,
            i_d_a: 0.0,
            i_q_a: 0.0,
            d_v: 0.0,
            q_v: 0.0,
        }
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the interrupt and the foreground.
///
/// Designed for placement in a `static`; everything is interior-mutable and
/// the command/config slots follow the double-buffer protocol.
pub struct ServoShared {
    mode: AtomicU8,
    command: DoubleBuffered<CommandData>,
    config: DoubleBuffered<Config>,
    status: Mutex<Cell<Status>>,
    control: Mutex<Cell<Control>>,
    /// Copy of the last accepted command, kept foreground-side for
    /// telemetry. Never read by the interrupt.
    last_command: Mutex<Cell<CommandData>>,
}

impl ServoShared {
    pub const fn new(config: Config) -> Self {
        Self {
            mode: AtomicU8::new(Mode::Stopped as u8),
            command: DoubleBuffered::new(CommandData::new()),
            config: DoubleBuffered::new(config),
            status: Mutex::new(Cell::new(Status::new())),
            control: Mutex::new(Cell::new(Control::new())),
            last_command: Mutex::new(Cell::new(CommandData::new())),
        }
    }

    /// Current operating mode.
    pub fn mode(&self) -> Mode {
        Mode::from_raw(self.mode.load(Ordering::Acquire))
    }

    fn store_mode(&self, mode: Mode) {
        self.mode.store(mode.as_raw(), Ordering::Release);
    }

    /// Advance `from -> to` only if no other context changed the mode in
    /// between. Returns whether the transition happened.
    fn try_advance_mode(&self, from: Mode, to: Mode) -> bool {
        self.mode
            .compare_exchange(
                from.as_raw(),
                to.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Foreground access to a running servo.
pub struct ServoHandle<'a, D> {
    shared: &'a ServoShared,
    driver: &'a D,
}

impl<'a, D: MotorDriver> ServoHandle<'a, D> {
    pub fn new(shared: &'a ServoShared, driver: &'a D) -> Self {
        Self { shared, driver }
    }

    /// Hand a command to the interrupt.
    ///
    /// Internal modes are rejected here and leave the running command
    /// untouched. The actual mode transition happens on the next tick.
    pub fn command(&self, data: &CommandData) -> Result<(), CommandError> {
        if !data.mode.is_commandable() {
            return Err(CommandError::InvalidMode);
        }

        self.shared.command.write(*data);
        critical_section::with(|cs| self.shared.last_command.borrow(cs).set(*data));
        Ok(())
    }

    /// Publish a new configuration; the interrupt picks it up as a coherent
    /// snapshot at the start of its next tick.
    pub fn update_config(&self, config: Config) {
        self.shared.config.write(config);
    }

    pub fn status(&self) -> Status {
        critical_section::with(|cs| self.shared.status.borrow(cs).get())
    }

    pub fn control(&self) -> Control {
        critical_section::with(|cs| self.shared.control.borrow(cs).get())
    }

    /// The last command accepted at the boundary, for telemetry.
    pub fn last_command(&self) -> CommandData {
        critical_section::with(|cs| self.shared.last_command.borrow(cs).get())
    }

    /// Millisecond-rate supervision.
    ///
    /// Completes the `Enabling -> Calibrating` transition once the gate
    /// driver has been told to power up. The compare-exchange keeps a
    /// concurrent fault transition from the interrupt from being lost.
    pub fn poll_millisecond(&self) {
        if self.shared.mode() == Mode::Enabling {
            self.driver.enable(true);
            let _ = self
                .shared
                .try_advance_mode(Mode::Enabling, Mode::Calibrating);
        }
    }
}

/// The interrupt body. `isr_update` must run to completion within one
/// 25us sample window.
pub struct ServoLoop<'a, S, D, P, A, L = ()> {
    shared: &'a ServoShared,
    sensor: S,
    driver: &'a D,
    pwm: P,
    adc: A,
    debug: L,

    status: Status,
    control: Control,
    velocity_filter: MovingAverage<VELOCITY_FILTER_LEN>,
    calibrate_adc1: u32,
    calibrate_adc2: u32,
    calibrate_count: u16,
}

impl<'a, S, D, P, A, L> ServoLoop<'a, S, D, P, A, L>
where
    S: PositionSensor,
    D: MotorDriver,
    P: PwmOutput,
    A: CurrentSense,
    L: DebugSink,
{
    pub fn new(
        shared: &'a ServoShared,
        sensor: S,
        driver: &'a D,
        pwm: P,
        adc: A,
        debug: L,
    ) -> Self {
        Self {
            shared,
            sensor,
            driver,
            pwm,
            adc,
            debug,
            status: Status::new(),
            control: Control::new(),
            velocity_filter: MovingAverage::new(),
            calibrate_adc1: 0,
            calibrate_adc2: 0,
            calibrate_count: 0,
        }
    }

    /// One timer-update tick.
    pub fn isr_update(&mut self) {
        let shared = self.shared;
        // Coherent for the whole tick; the foreground only writes the other slot.
        let config: &Config = unsafe { shared.config.read() };

        self.do_sense(config);

        let sin_cos = SinCos::new(self.status.electrical_theta);

        self.update_current_state(&sin_cos, config);
        self.do_control(&sin_cos, config);

        self.emit_debug();
        self.publish();
    }

    fn mode(&self) -> Mode {
        self.shared.mode()
    }

    fn set_mode(&self, mode: Mode) {
        self.shared.store_mode(mode);
    }

    fn enter_fault(&mut self, code: FaultCode) {
        self.set_mode(Mode::Fault);
        self.status.fault = code;
    }

    /// Sample the converters and the position sensor, no matter what mode
    /// we are in.
    fn do_sense(&mut self, config: &Config) {
        let count = config.adc_sample_count.max(1);
        let mut adc1: u32 = 0;
        let mut adc2: u32 = 0;
        let mut adc3: u32 = 0;

        for _ in 0..count {
            let frame = self.adc.convert();
            adc1 += frame.current1 as u32;
            adc2 += frame.current2 as u32;
            adc3 += frame.vsense as u32;
        }

        // Time spent up to here limits the maximum usable duty cycle; the
        // rest of the tick only eats headroom.
        self.status.adc1_raw = (adc1 / count as u32) as u16;
        self.status.adc2_raw = (adc2 / count as u32) as u16;
        self.status.adc3_raw = (adc3 / count as u32) as u16;

        let old_position_raw = self.status.position_raw;
        self.status.position_raw = self.sensor.sample();

        self.status.electrical_theta = math::electrical_theta(
            self.status.position_raw,
            config.motor_poles,
            config.motor_offset,
        );

        let delta_position = self.status.position_raw.wrapping_sub(old_position_raw) as i16;
        if self.mode() != Mode::Stopped && delta_position.unsigned_abs() > MAX_POSITION_DELTA {
            // The reading is not physically plausible at this rate.
            self.enter_fault(FaultCode::EncoderFault);
        }

        self.status.unwrapped_position_raw = self
            .status
            .unwrapped_position_raw
            .wrapping_add(delta_position as i32);

        self.velocity_filter.add(
            delta_position as f32 * config.unwrapped_position_scale * (1.0 / 65536.0) * RATE_HZ,
        );
        self.status.velocity = self.velocity_filter.average();

        self.status.unwrapped_position = self.status.unwrapped_position_raw as f32
            * config.unwrapped_position_scale
            * (1.0 / 65536.0);
    }

    /// Scale the raw conversions and rotate the phase currents into the
    /// rotor frame. The third phase current follows from Kirchhoff.
    fn update_current_state(&mut self, sin_cos: &SinCos, config: &Config) {
        let status = &mut self.status;

        status.cur1_a = (status.adc1_raw as f32 - status.adc1_offset as f32) * config.i_scale_a;
        status.cur2_a = (status.adc2_raw as f32 - status.adc2_offset as f32) * config.i_scale_a;
        status.bus_v = status.adc3_raw as f32 * config.v_scale_v;

        let dq = math::dq(
            sin_cos,
            status.cur1_a,
            -(status.cur1_a + status.cur2_a),
            status.cur2_a,
        );
        status.d_a = dq.d;
        status.q_a = dq.q;
    }

    fn do_control(&mut self, sin_cos: &SinCos, config: &Config) {
        let shared = self.shared;
        // Read the published command slot once and keep the reference for
        // the rest of the tick.
        let command: &mut CommandData = unsafe { shared.command.read() };

        self.control = Control::new();

        if let Some(position) = command.set_position.take() {
            // One shot: cleared in the buffer so it cannot re-apply.
            self.status.unwrapped_position_raw = roundf(position * 65536.0) as i32;
        }

        if command.mode != self.mode() {
            self.maybe_change_mode(command.mode);

            if self.mode() != Mode::Stopped {
                if self.driver.fault() {
                    self.enter_fault(FaultCode::MotorDriverFault);
                    return;
                }
                if self.status.bus_v > config.max_voltage {
                    self.enter_fault(FaultCode::OverVoltage);
                    return;
                }
            }
        }

        self.clear_inactive_pids();

        if self.mode() != Mode::Fault {
            self.status.fault = FaultCode::Success;
        }

        match self.mode() {
            Mode::Stopped => self.do_stopped(),
            Mode::Fault => self.do_fault(),
            Mode::Enabling | Mode::CalibrationComplete => {}
            Mode::Calibrating => self.do_calibrating(),
            Mode::Pwm => self.do_pwm(command.pwm),
            Mode::Voltage => self.do_voltage(command.phase_v),
            Mode::VoltageFoc => self.do_voltage_foc(command.theta, command.voltage),
            Mode::Current => self.do_current(sin_cos, command.i_d_a, command.i_q_a, config),
            Mode::Position => {
                let (position, velocity, max_current) =
                    (command.position, command.velocity, command.max_current);
                self.do_position(sin_cos, position, velocity, max_current, config);
            }
        }
    }

    /// Transition rules, total over (current, requested).
    fn maybe_change_mode(&mut self, requested: Mode) {
        match requested {
            // Internal states are rejected at the API boundary already;
            // ignore them if one ever arrives.
            Mode::Fault | Mode::Calibrating | Mode::CalibrationComplete => {}
            // Only the foreground poll advances out of Enabling.
            Mode::Enabling => {}
            Mode::Stopped => {
                // Always valid.
                self.set_mode(Mode::Stopped);
            }
            Mode::Pwm | Mode::Voltage | Mode::VoltageFoc | Mode::Current | Mode::Position => {
                match self.mode() {
                    // Leaving a fault requires passing through Stopped.
                    Mode::Fault => {}
                    // Calibration has to finish first.
                    Mode::Enabling | Mode::Calibrating => {}
                    Mode::Stopped => self.start_calibrating(),
                    Mode::CalibrationComplete
                    | Mode::Pwm
                    | Mode::Voltage
                    | Mode::VoltageFoc
                    | Mode::Current
                    | Mode::Position => self.set_mode(requested),
                }
            }
        }
    }

    fn start_calibrating(&mut self) {
        self.set_mode(Mode::Enabling);

        // The foreground poll advances to Calibrating once the gate driver
        // is powered up.
        self.pwm.set_compare(0, 0, 0);

        // Power should already be off in any state that can reach here.
        self.driver.power(false);

        self.calibrate_adc1 = 0;
        self.calibrate_adc2 = 0;
        self.calibrate_count = 0;
    }

    /// Zero the state of every PID that is not active under the current
    /// mode, so a controller never resumes from stale windup.
    fn clear_inactive_pids(&mut self) {
        let mode = self.mode();

        if !matches!(mode, Mode::Current | Mode::Position) {
            self.status.pid_d = PidState::new();
            self.status.pid_q = PidState::new();
        }
        if mode != Mode::Position {
            self.status.pid_position = PidState::new();
        }
    }

    fn do_stopped(&mut self) {
        self.driver.enable(false);
        self.driver.power(false);
        self.pwm.set_compare(0, 0, 0);
    }

    fn do_fault(&mut self) {
        self.driver.power(false);
        self.pwm.set_compare(0, 0, 0);
    }

    fn do_calibrating(&mut self) {
        self.calibrate_adc1 += self.status.adc1_raw as u32;
        self.calibrate_adc2 += self.status.adc2_raw as u32;
        self.calibrate_count += 1;

        if self.calibrate_count < CALIBRATE_COUNT {
            return;
        }

        let adc1_offset = (self.calibrate_adc1 / CALIBRATE_COUNT as u32) as u16;
        let adc2_offset = (self.calibrate_adc2 / CALIBRATE_COUNT as u32) as u16;

        let deviation1 = adc1_offset.abs_diff(ADC_MIDSCALE);
        let deviation2 = adc2_offset.abs_diff(ADC_MIDSCALE);
        if deviation1 > CALIBRATION_TOLERANCE || deviation2 > CALIBRATION_TOLERANCE {
            self.enter_fault(FaultCode::CalibrationFault);
            return;
        }

        self.status.adc1_offset = adc1_offset;
        self.status.adc2_offset = adc2_offset;
        self.set_mode(Mode::CalibrationComplete);
    }

    fn do_pwm(&mut self, pwm: Uvw) {
        self.control.pwm = Uvw {
            u: limit_pwm(pwm.u),
            v: limit_pwm(pwm.v),
            w: limit_pwm(pwm.w),
        };

        self.pwm.set_compare(
            (self.control.pwm.u * PWM_COUNTS as f32) as u16,
            (self.control.pwm.v * PWM_COUNTS as f32) as u16,
            (self.control.pwm.w * PWM_COUNTS as f32) as u16,
        );

        self.driver.power(true);
    }

    fn do_voltage(&mut self, voltage: Uvw) {
        self.control.voltage = voltage;

        let bus_v = self.status.bus_v;
        let to_pwm = |v: f32| 0.5 + 2.0 * v / bus_v;

        self.do_pwm(Uvw {
            u: to_pwm(voltage.u),
            v: to_pwm(voltage.v),
            w: to_pwm(voltage.w),
        });
    }

    fn do_voltage_foc(&mut self, theta: f32, voltage: f32) {
        let sin_cos = SinCos::new(theta);
        let out = math::inverse_dq(&sin_cos, 0.0, voltage);
        self.do_voltage(out);
    }

    fn do_current(&mut self, sin_cos: &SinCos, i_d_a: f32, i_q_a: f32, config: &Config) {
        self.control.i_d_a = i_d_a;
        self.control.i_q_a = i_q_a;

        // Back-EMF compensation rides on the d axis here.
        let feedforward_d = config.feedforward_scale
            * (i_d_a * config.motor_resistance - self.status.velocity * config.motor_v_per_hz);
        let pid_d = config.pid_dq.apply(
            &mut self.status.pid_d,
            self.status.d_a,
            i_d_a,
            0.0,
            0.0,
            RATE_HZ,
        );
        self.control.d_v = feedforward_d + pid_d;

        let feedforward_q = config.feedforward_scale * i_q_a * config.motor_resistance;
        let pid_q = config.pid_dq.apply(
            &mut self.status.pid_q,
            self.status.q_a,
            i_q_a,
            0.0,
            0.0,
            RATE_HZ,
        );
        self.control.q_v = feedforward_q + pid_q;

        let out = math::inverse_dq(sin_cos, self.control.d_v, self.control.q_v);
        self.do_voltage(out);
    }

    fn do_position(
        &mut self,
        sin_cos: &SinCos,
        position: f32,
        velocity: f32,
        max_current: f32,
        config: &Config,
    ) {
        let unlimited_d_a = config.pid_position.apply(
            &mut self.status.pid_position,
            self.status.unwrapped_position,
            position,
            self.status.velocity,
            velocity,
            RATE_HZ,
        );
        let d_a = math::limit(unlimited_d_a, -max_current, max_current);

        self.do_current(sin_cos, d_a, 0.0, config);
    }

    fn emit_debug(&mut self) {
        let frame = telemetry::encode_debug_frame(&self.status, &self.control);
        self.debug.emit(&frame);
    }

    fn publish(&mut self) {
        self.status.mode = self.mode();
        critical_section::with(|cs| {
            self.shared.status.borrow(cs).set(self.status);
            self.shared.control.borrow(cs).set(self.control);
        });
    }
}

fn limit_pwm(duty: f32) -> f32 {
    math::limit(duty, MIN_PWM, MAX_PWM)
}
