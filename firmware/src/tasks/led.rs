//! LED表示タスク
//!
//! 動作確認用ハートビートとフォルト表示を行います。

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

use servo_core::Mode;

use crate::fmt::*;
use crate::state::SERVO_SHARED;

/// LED表示タスク
///
/// 500msごとにハートビートLEDを反転し、フォルト中はフォルトLEDを
/// 点灯させます。
#[embassy_executor::task]
pub async fn led_task(mut led_run: Output<'static>, mut led_fault: Output<'static>) {
    info!("LED task started");

    loop {
        if SERVO_SHARED.mode() == Mode::Fault {
            led_fault.set_high();
        } else {
            led_fault.set_low();
        }

        led_run.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
