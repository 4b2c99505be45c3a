//! グローバル共有状態管理
//!
//! 制御割り込みとフォアグラウンドタスクの接点をまとめます。

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use servo_core::{Config, ServoLoop, ServoShared};

use crate::encoder::Encoder;
use crate::gate_driver::GateDriver;
use crate::hardware::{TimPwm, TripleAdc};
use crate::tasks::telemetry::DebugPipe;

/// コマンド/設定/ステータスの共有ブロック
pub static SERVO_SHARED: ServoShared = ServoShared::new(Config::new());

/// ゲートドライバ（ISRとフォアグラウンドの両方が操作する）
pub static GATE_DRIVER: GateDriver = GateDriver::new();

pub type ServoInstance = ServoLoop<'static, Encoder, GateDriver, TimPwm, TripleAdc, DebugPipe>;

/// 40kHz制御ループ本体（TIM1 UPDATE割り込みが専有）
pub static SERVO: Mutex<CriticalSectionRawMutex, RefCell<Option<ServoInstance>>> =
    Mutex::new(RefCell::new(None));

/// 制御ループを割り込みから見える位置に登録する
pub fn install_servo(servo: ServoInstance) {
    SERVO.lock(|cell| {
        cell.replace(Some(servo));
    });
}
