//! ゲートドライバインターフェース（DRV8353系）
//!
//! EN（ドライバ電源）とPWR_EN（出力段）の2本の制御線とnFAULT入力を
//! 扱います。制御割り込みとフォアグラウンドの両方から呼ばれるため、
//! ピンはクリティカルセクションで保護した内部可変構造に置きます。

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_stm32::gpio::{Input, Output};

use servo_core::MotorDriver;

type SharedPin<T> = Mutex<RefCell<Option<T>>>;

pub struct GateDriver {
    enable: SharedPin<Output<'static>>,
    power: SharedPin<Output<'static>>,
    fault: SharedPin<Input<'static>>,
}

impl GateDriver {
    pub const fn new() -> Self {
        Self {
            enable: Mutex::new(RefCell::new(None)),
            power: Mutex::new(RefCell::new(None)),
            fault: Mutex::new(RefCell::new(None)),
        }
    }

    /// ピンを登録する（起動時に1回だけ呼ぶ）
    pub fn init(&self, enable: Output<'static>, power: Output<'static>, fault: Input<'static>) {
        critical_section::with(|cs| {
            self.enable.borrow(cs).replace(Some(enable));
            self.power.borrow(cs).replace(Some(power));
            self.fault.borrow(cs).replace(Some(fault));
        });
    }

    fn set(pin: &SharedPin<Output<'static>>, on: bool) {
        critical_section::with(|cs| {
            if let Some(pin) = pin.borrow(cs).borrow_mut().as_mut() {
                if on {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
        });
    }
}

impl MotorDriver for GateDriver {
    fn enable(&self, on: bool) {
        Self::set(&self.enable, on);
    }

    fn power(&self, on: bool) {
        Self::set(&self.power, on);
    }

    fn fault(&self) -> bool {
        // nFAULTはアクティブロー
        critical_section::with(|cs| {
            self.fault
                .borrow(cs)
                .borrow()
                .as_ref()
                .map(|pin| pin.is_low())
                .unwrap_or(false)
        })
    }
}
