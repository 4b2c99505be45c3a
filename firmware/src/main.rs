#![no_std]
#![no_main]

mod encoder;
mod fmt;
mod gate_driver;
mod hardware;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    gpio::{Input, Level, Output, Pull, Speed},
    spi,
    time::Hertz,
    usart,
};
use embassy_time::{Duration, Timer};
use heapless::spsc::Queue;
use static_cell::StaticCell;

use servo_core::config::adc_cycle_index;
use servo_core::telemetry::DEBUG_FRAME_LEN;
use servo_core::{Config, ServoLoop};

use fmt::*;
use tasks::telemetry::{DebugPipe, DEBUG_QUEUE_LEN};
use tasks::{led_task, supervisor_task, telemetry_task};

static DEBUG_QUEUE: StaticCell<Queue<[u8; DEBUG_FRAME_LEN], DEBUG_QUEUE_LEN>> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化（TIM1カーネルクロック90MHz）
    let p = embassy_stm32::init(hardware::create_clock_config());

    info!("═══════════════════════════════════════════════════════");
    info!("    G4 SERVO • BLDC Servo Drive • STM32G474RE @ 90MHz");
    info!("═══════════════════════════════════════════════════════");

    let config = Config::new();
    info!("Servo config:");
    info!("  Motor poles: {}", config.motor_poles);
    info!("  Max bus voltage: {}V", config.max_voltage);
    info!("  ADC oversample: {}x", config.adc_sample_count);

    // LED初期化＆タスク起動
    let led_run = Output::new(p.PC13, Level::High, Speed::Low);
    let led_fault = Output::new(p.PC14, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(led_task(led_run, led_fault)));

    // ゲートドライバ初期化（EN=PB5、PWR_EN=PB4、nFAULT=PB3）
    let enable = Output::new(p.PB5, Level::Low, Speed::Low);
    let power = Output::new(p.PB4, Level::Low, Speed::Low);
    let fault = Input::new(p.PB3, Pull::Up);
    state::GATE_DRIVER.init(enable, power, fault);

    // 位置センサ初期化（SPI2: PB13=SCK、PB15=MOSI、PB14=MISO、PB12=CS）
    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(10_000_000);
    let encoder_spi = spi::Spi::new_blocking(p.SPI2, p.PB13, p.PB15, p.PB14, spi_config);
    let encoder_cs = Output::new(p.PB12, Level::High, Speed::VeryHigh);
    let encoder = encoder::Encoder::new(encoder_spi, encoder_cs);

    // デバッグUART初期化（USART2 TX=PA2、DMA転送）
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = 5_000_000;
    let debug_uart = unwrap!(usart::UartTx::new(
        p.USART2,
        p.PA2,
        p.DMA1_CH1,
        uart_config
    ));

    let queue = DEBUG_QUEUE.init(Queue::new());
    let (producer, consumer) = queue.split();
    unwrap!(spawner.spawn(telemetry_task(debug_uart, consumer)));

    // ADCとPWMタイマー初期化（レジスタ直接設定）
    unsafe {
        hardware::init_adc(adc_cycle_index(config.adc_cycles));
        hardware::init_pwm_timer();
    }

    // 制御ループを構築して割り込みへ登録
    let servo = ServoLoop::new(
        &state::SERVO_SHARED,
        encoder,
        &state::GATE_DRIVER,
        hardware::TimPwm::new(),
        hardware::TripleAdc::new(),
        DebugPipe::new(producer),
    );
    state::install_servo(servo);

    unwrap!(spawner.spawn(supervisor_task()));

    info!("Servo control loop running at 40kHz");

    // メインループ（将来の拡張用）
    loop {
        Timer::after(Duration::from_millis(100)).await;
    }
}
