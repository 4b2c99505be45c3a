//! ハードウェア初期化モジュール
//!
//! クロックツリー、TIM1（中央整列PWM + 40kHz更新割り込み）、
//! 3系統同時サンプリングADCの初期化を集約します。
//!
//! ## タイマー構成
//! - TIM1カーネルクロック: 90MHz（PWM周期1125カウントの前提）
//! - 中央整列モード2 + RCR=1: アップ/ダウン1往復ごとに1回UPDATE
//! - UPDATE割り込みは最高優先度(0,0)で40kHzの制御ループを駆動
//!
//! ## ADC構成
//! - ADC1_IN1 (PA0): U相電流センス
//! - ADC2_IN3 (PA6): V相電流センス
//! - ADC3_IN12 (PB0): DCバス電圧センス

use embassy_stm32::pac;
use embassy_stm32::Config;

use servo_core::config::PWM_COUNTS;
use servo_core::{AdcFrame, CurrentSense, PwmOutput};

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 45 ÷ 2）で90MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL45,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R; // システムクロック = 90MHz

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        clock_mux.adc345sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// TIM1 3相PWM + 制御ループ割り込みの初期化
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_pwm_timer() {
    let rcc = pac::RCC;
    let tim1 = pac::TIM1;
    let gpioa = pac::GPIOA;

    // 1. クロック有効化
    rcc.ahb2enr().modify(|w| w.set_gpioaen(true));
    rcc.apb2enr().modify(|w| w.set_tim1en(true));

    // 2. GPIO設定（PA8/PA9/PA10をTIM1_CH1/CH2/CH3 = AF6に設定）
    for pin in [8usize, 9, 10] {
        gpioa
            .moder()
            .modify(|w| w.set_moder(pin, pac::gpio::vals::Moder::ALTERNATE));
        gpioa
            .ospeedr()
            .modify(|w| w.set_ospeedr(pin, pac::gpio::vals::Ospeedr::VERY_HIGH_SPEED));
    }
    gpioa.afr(1).modify(|w| {
        w.set_afr(0, 6); // PA8 -> AF6
        w.set_afr(1, 6); // PA9 -> AF6
        w.set_afr(2, 6); // PA10 -> AF6
    });

    // 3. タイマーを停止して基本設定
    tim1.cr1().modify(|w| w.set_cen(false));

    tim1.psc().write_value(0); // プリスケーラ無し（90MHz直結）
    tim1.arr()
        .write_value(pac::timer::regs::ArrCore(PWM_COUNTS as u32));

    // 中央整列モード2: アップ/ダウンを交互にカウント
    tim1.cr1().modify(|w| {
        w.set_cms(pac::timer::vals::Cms::CENTER_ALIGNED2);
        w.set_arpe(true); // ARRはバッファリング
    });

    // RCR=1: アップ/ダウン1往復につき1回のUPDATEイベント（80kHz/2 = 40kHz）
    tim1.rcr().modify(|w| w.set_rep(1));

    // 4. CH1-3をPWMモード1に設定（プリロード有効）
    tim1.ccmr_output(0).modify(|w| {
        w.set_ocm(0, pac::timer::vals::Ocm::PWM_MODE1);
        w.set_ocpe(0, true);
        w.set_ocm(1, pac::timer::vals::Ocm::PWM_MODE1);
        w.set_ocpe(1, true);
    });
    tim1.ccmr_output(1).modify(|w| {
        w.set_ocm(0, pac::timer::vals::Ocm::PWM_MODE1);
        w.set_ocpe(0, true);
    });
    tim1.ccer().modify(|w| {
        w.set_cce(0, true);
        w.set_cce(1, true);
        w.set_cce(2, true);
    });

    // アドバンストタイマーは主出力有効化が必要
    tim1.bdtr().modify(|w| w.set_moe(true));

    // 5. UPDATE割り込み有効化
    tim1.dier().modify(|w| w.set_uie(true));

    // 6. NVIC: 制御ループは最高優先度(0,0)
    cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM1_UP_TIM16);
    let mut cp = cortex_m::Peripherals::steal();
    cp.NVIC.set_priority(pac::Interrupt::TIM1_UP_TIM16, 0x00);

    // 7. カウンタをリセットしてタイマー開始
    tim1.cnt().write_value(pac::timer::regs::CntCore(0));
    tim1.sr().write(|w| w.0 = 0); // ステータスフラグクリア
    tim1.egr().write(|w| w.set_ug(true)); // レジスタ反映
    tim1.cr1().modify(|w| {
        w.set_urs(pac::timer::vals::Urs::COUNTER_ONLY);
        w.set_cen(true);
    });
}

/// TIM1の出力コンペアレジスタ
///
/// 論理相U/V/Wを受け取り、基板配線に合わせてV相をCH3、W相をCH2へ
/// マッピングします（ハーフブリッジへの端子対応を変えないこと）。
pub struct TimPwm {
    _private: (),
}

impl TimPwm {
    /// `init_pwm_timer`の後に1個だけ生成すること
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl PwmOutput for TimPwm {
    fn set_compare(&mut self, u: u16, v: u16, w: u16) {
        let tim1 = pac::TIM1;
        tim1.ccr(0).write(|r| r.set_ccr(u)); // U相 -> CH1
        tim1.ccr(2).write(|r| r.set_ccr(v)); // V相 -> CH3（配線都合）
        tim1.ccr(1).write(|r| r.set_ccr(w)); // W相 -> CH2（配線都合）
    }
}

/// 3系統ADCの初期化
///
/// `sample_time_index`は共通サンプル時間選択（SMPビット値0-7）。
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_adc(sample_time_index: usize) {
    let rcc = pac::RCC;
    let gpioa = pac::GPIOA;
    let gpiob = pac::GPIOB;

    // 1. クロック有効化
    rcc.ahb2enr().modify(|w| {
        w.set_gpioaen(true);
        w.set_gpioben(true);
        w.set_adc12en(true);
        w.set_adc345en(true);
    });

    // 2. アナログ入力設定
    gpioa
        .moder()
        .modify(|w| w.set_moder(0, pac::gpio::vals::Moder::ANALOG)); // PA0
    gpioa
        .moder()
        .modify(|w| w.set_moder(6, pac::gpio::vals::Moder::ANALOG)); // PA6
    gpiob
        .moder()
        .modify(|w| w.set_moder(0, pac::gpio::vals::Moder::ANALOG)); // PB0

    let smp = pac::adc::vals::SampleTime::from_bits(sample_time_index as u8);

    for (adc, channel) in [(pac::ADC1, 1usize), (pac::ADC2, 3), (pac::ADC3, 12)] {
        // 3. ディープパワーダウン解除 → 電圧レギュレータ有効化
        adc.cr().modify(|w| w.set_deeppwd(false));
        adc.cr().modify(|w| w.set_advregen(true));
        cortex_m::asm::delay(2_000); // T_ADCVREG_STUP待ち（20us @ 90MHz）

        // 4. シングルエンドキャリブレーション
        adc.cr().modify(|w| w.set_adcal(true));
        while adc.cr().read().adcal() {}
        cortex_m::asm::delay(100);

        // 5. ADC有効化
        adc.isr().modify(|w| w.set_adrdy(true)); // フラグクリア
        adc.cr().modify(|w| w.set_aden(true));
        while !adc.isr().read().adrdy() {}

        // 6. 1チャネルのレギュラーシーケンス + サンプル時間
        adc.sqr1().modify(|w| {
            w.set_l(0);
            w.set_sq(0, channel as u8);
        });
        adc.smpr(channel / 10)
            .modify(|w| w.set_smp(channel % 10, smp));
    }
}

/// ソフトウェアスタートの同時3変換
pub struct TripleAdc {
    _private: (),
}

impl TripleAdc {
    /// `init_adc`の後に1個だけ生成すること
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl CurrentSense for TripleAdc {
    fn convert(&mut self) -> AdcFrame {
        let adc1 = pac::ADC1;
        let adc2 = pac::ADC2;
        let adc3 = pac::ADC3;

        // 3台を連続でソフトウェアスタート（実質同時に変換が走る）
        adc1.cr().modify(|w| w.set_adstart(true));
        adc2.cr().modify(|w| w.set_adstart(true));
        adc3.cr().modify(|w| w.set_adstart(true));

        // 変換完了をビジーウェイト（サンプル時間はconfigで制限される）
        while !adc1.isr().read().eoc() {}
        let current1 = adc1.dr().read().rdata();
        while !adc2.isr().read().eoc() {}
        let current2 = adc2.dr().read().rdata();
        while !adc3.isr().read().eoc() {}
        let vsense = adc3.dr().read().rdata();

        AdcFrame {
            current1,
            current2,
            vsense,
        }
    }
}

/// TIM1 UPDATE割り込みハンドラー（40kHz制御ループ）
///
/// アップカウント終端のUPDATEイベントのみ処理します
/// （DIRビットがダウンカウントを示した直後）。
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM1_UP_TIM16() {
    let tim1 = pac::TIM1;
    let sr = tim1.sr().read();

    if sr.uif() && tim1.cr1().read().dir() == pac::timer::vals::Dir::DOWN {
        crate::state::SERVO.lock(|cell| {
            if let Some(servo) = cell.borrow_mut().as_mut() {
                servo.isr_update();
            }
        });
    }

    // ステータスレジスタをリセット
    tim1.sr().write(|w| w.0 = 0);
}
