// Field-oriented servo control core for 3-phase BLDC drives.
//
// Everything hardware-specific is reached through the traits in `hardware`,
// so the full 40kHz control loop (sense -> transforms -> mode arbitration ->
// control -> PWM) can run and be tested on the host.

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod config;
pub mod filter;
pub mod handoff;
pub mod hardware;
pub mod math;
pub mod pid;
pub mod servo;
pub mod telemetry;

// Re-export the main types for easier access
pub use command::{CommandData, CommandError, FaultCode, Mode};
pub use config::Config;
pub use hardware::{AdcFrame, CurrentSense, DebugSink, MotorDriver, PositionSensor, PwmOutput};
pub use servo::{Control, ServoHandle, ServoLoop, ServoShared, Status};
