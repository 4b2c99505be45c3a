//! デバッグフレーム送出タスク
//!
//! 制御割り込みはSPSCキューへフレームを積むだけで、UART DMA転送は
//! このタスクが行います。キューが満杯の間はフレームが間引かれるため、
//! 割り込みがUARTやDMAの都合で待たされることはありません。

use embassy_stm32::mode::Async;
use embassy_stm32::usart::UartTx;
use embassy_time::{Duration, Timer};
use heapless::spsc::{Consumer, Producer};

use servo_core::telemetry::DEBUG_FRAME_LEN;
use servo_core::DebugSink;

use crate::fmt::*;

/// キュー段数（1フレーム12バイト × 8）
pub const DEBUG_QUEUE_LEN: usize = 8;

/// ISR側: キューへの書き込みハンドル
pub struct DebugPipe {
    producer: Producer<'static, [u8; DEBUG_FRAME_LEN], DEBUG_QUEUE_LEN>,
}

impl DebugPipe {
    pub fn new(producer: Producer<'static, [u8; DEBUG_FRAME_LEN], DEBUG_QUEUE_LEN>) -> Self {
        Self { producer }
    }
}

impl DebugSink for DebugPipe {
    fn emit(&mut self, frame: &[u8; DEBUG_FRAME_LEN]) {
        // 満杯なら黙って捨てる
        let _ = self.producer.enqueue(*frame);
    }
}

/// フレームをUART（DMA転送）へ流すタスク
#[embassy_executor::task]
pub async fn telemetry_task(
    mut uart: UartTx<'static, Async>,
    mut frames: Consumer<'static, [u8; DEBUG_FRAME_LEN], DEBUG_QUEUE_LEN>,
) {
    info!("Telemetry task started");

    loop {
        match frames.dequeue() {
            Some(frame) => {
                if uart.write(&frame).await.is_err() {
                    error!("Telemetry UART write failed");
                }
            }
            None => Timer::after(Duration::from_micros(100)).await,
        }
    }
}
