// Debug frame encoding and telemetry registration keys
//
// The registration keys are consumed by the external persistence and
// telemetry services; the drive only promises the names and the layouts.

use core::f32::consts::TAU;

use libm::roundf;

use crate::servo::{Control, Status};

/// Registration key for the configuration block.
pub const CONFIG_KEY: &str = "servo";
/// Registration key for the status snapshot.
pub const STATUS_KEY: &str = "servo_stats";
/// Registration key for the last accepted command.
pub const COMMAND_KEY: &str = "servo_cmd";
/// Registration key for the control trace of the last tick.
pub const CONTROL_KEY: &str = "servo_control";

/// Length of the fixed debug frame emitted once per tick.
pub const DEBUG_FRAME_LEN: usize = 12;

/// Frame sync byte.
pub const DEBUG_SYNC: u8 = 0x5a;

/// Pack the scaled d-axis trace into the 12-byte wire frame.
/// Multi-byte fields are little-endian.
pub fn encode_debug_frame(status: &Status, control: &Control) -> [u8; DEBUG_FRAME_LEN] {
    let mut frame = [0u8; DEBUG_FRAME_LEN];

    frame[0] = DEBUG_SYNC;
    frame[1] = roundf(255.0 * status.electrical_theta / TAU) as u8;
    frame[2] = roundf(2.0 * control.i_d_a) as i8 as u8;
    frame[3..5].copy_from_slice(&(roundf(500.0 * status.d_a) as i16).to_le_bytes());
    frame[5..7].copy_from_slice(&(roundf(32767.0 * status.pid_d.p / 12.0) as i16).to_le_bytes());
    frame[7..9]
        .copy_from_slice(&(roundf(32767.0 * status.pid_d.integral / 12.0) as i16).to_le_bytes());
    frame[9..11].copy_from_slice(&(roundf(32767.0 * control.d_v / 12.0) as i16).to_le_bytes());
    frame[11] = roundf(127.0 * status.velocity / 10.0) as i8 as u8;

    frame
}
