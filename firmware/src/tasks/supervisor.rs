//! サーボ監視タスク
//!
//! 1msごとの監視処理（ゲートドライバ有効化の完了待ち）と
//! 1Hzのステータスログを実行します。

use embassy_time::{Duration, Ticker};

use servo_core::ServoHandle;

use crate::fmt::*;
use crate::state::{GATE_DRIVER, SERVO_SHARED};

#[embassy_executor::task]
pub async fn supervisor_task() {
    info!("Supervisor task started");

    let handle = ServoHandle::new(&SERVO_SHARED, &GATE_DRIVER);
    let mut ticker = Ticker::every(Duration::from_millis(1));
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        // Enabling -> Calibrating の遷移はここで完了する
        handle.poll_millisecond();

        // ステータスログ（1秒ごと = 1000回に1回）
        log_counter += 1;
        if log_counter >= 1000 {
            log_counter = 0;
            let status = handle.status();
            info!(
                "[Servo] mode={} fault={} bus={}V pos={} vel={}rev/s",
                status.mode,
                status.fault,
                status.bus_v,
                status.unwrapped_position,
                status.velocity
            );
        }
    }
}
