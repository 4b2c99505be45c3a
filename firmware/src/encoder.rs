//! SPI磁気エンコーダインターフェース（AS5047P系）
//!
//! 制御割り込みの中からブロッキングSPIで角度レジスタを読み出します。
//! 10MHzクロックで16ビット転送は約2μsであり、25μsのティック予算に
//! 収まります。

use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::Spi;

use servo_core::PositionSensor;

pub struct Encoder {
    spi: Spi<'static, Blocking>,
    cs: Output<'static>,
}

impl Encoder {
    pub fn new(spi: Spi<'static, Blocking>, cs: Output<'static>) -> Self {
        Self { spi, cs }
    }
}

impl PositionSensor for Encoder {
    fn sample(&mut self) -> u16 {
        // ANGLECOMレジスタ読み出しコマンド（14ビット角度）
        let mut frame = [0xFFu8, 0xFF];

        self.cs.set_low();
        let _ = self.spi.blocking_transfer_in_place(&mut frame);
        self.cs.set_high();

        // パリティ/エラービットを落として14ビット → 16ビット角度へ
        let raw = u16::from_be_bytes(frame) & 0x3FFF;
        raw << 2
    }
}
