#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

//! ATmega128 wiring for the e-bike application layer.
//!
//! Everything time critical runs in interrupts: the LCD receive path, the
//! PAS and wheel-sensor period capture and the 64 us PWM-cycle time base.
//! The main loop wakes on the 10 Hz tick, snapshots the interrupt-published
//! values under a short critical section and hands them to the application
//! core. Set-points travel to the commutation layer through a mailbox the
//! PWM interrupt reads on its own schedule.

#[cfg(target_arch = "avr")]
mod firmware {
    use core::cell::{Cell, RefCell};
    use core::convert::Infallible;

    use avr_device::atmega128a::{Peripherals, ADC, PORTC, PORTE, USART0};
    #[cfg(feature = "debug")]
    use avr_device::atmega128a::USART1;
    use avr_device::interrupt::{self, Mutex};
    use embedded_hal::digital::v2::InputPin;
    use embedded_hal::serial;
    use panic_halt as _;

    use ebike_controller_firmware::app::{Application, TickInputs};
    use ebike_controller_firmware::config;
    #[cfg(feature = "debug")]
    use ebike_controller_firmware::console::DebugConsole;
    use ebike_controller_firmware::hal::{MotorController, SettingsStore};
    use ebike_controller_firmware::protocol::{FrameReceiver, LcdConfig};

    // Board assignment
    const BRAKE_PIN: u8 = 2; // PC2, lever switch, active low
    const PAS_DIRECTION_PIN: u8 = 6; // PE6, second PAS hall phase
    const THROTTLE_ADC_CHANNEL: u8 = 6;

    // (16_000_000 / (16 * 9600)) - 1
    const UBRR_9600: u16 = 103;

    const UCSR_A_UDRE: u8 = 1 << 5;
    const UCSR_A_TXC: u8 = 1 << 6;
    const UCSR_B_RXCIE: u8 = 1 << 7;
    const UCSR_B_RXEN: u8 = 1 << 4;
    const UCSR_B_TXEN: u8 = 1 << 3;

    const ADMUX_REF_AVCC: u8 = 0x40;
    const ADMUX_ADLAR: u8 = 0x20;
    const ADCSRA_ENABLE_DIV128: u8 = 0x87;
    const ADCSRA_ADSC: u8 = 0x40;

    const TCCR0_CTC_DIV8: u8 = 0x0A;
    const TIMSK_OCIE0: u8 = 0x02;
    // INT4/INT5 falling edge
    const EICRB_INT4_INT5_FALLING: u8 = 0x0A;
    const EIMSK_INT4_INT5: u8 = 0x30;

    const EECR_EERE: u8 = 0x01;
    const EECR_EEWE: u8 = 0x02;
    const EECR_EEMWE: u8 = 0x04;

    // EEPROM layout: marker byte, then the six settings bytes
    const EEPROM_MARKER_ADDR: u16 = 0;
    const EEPROM_MARKER: u8 = 0x5A;
    const EEPROM_CONFIG_ADDR: u16 = 1;

    /// Wheel sensor windows without an edge before the sensor counts as
    /// disconnected (two windows, a little over 8 s)
    const WHEEL_SENSOR_MISS_LIMIT: u8 = 2;

    // ---- interrupt-published state ----
    static TICK_DIVIDER: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static TICK_PENDING: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));

    static PAS_CYCLES: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static PAS_PERIOD_TICKS: Mutex<Cell<u16>> =
        Mutex::new(Cell::new(config::PAS_ABSOLUTE_MIN_CADENCE_PWM_CYCLE_TICKS));
    static PAS_REVERSE: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));

    static WHEEL_CYCLES: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static WHEEL_PERIOD_TICKS: Mutex<Cell<u16>> =
        Mutex::new(Cell::new(config::WHEEL_SPEED_SENSOR_MIN_PWM_CYCLE_TICKS));
    static WHEEL_SENSOR_MISSES: Mutex<Cell<u8>> = Mutex::new(Cell::new(0));
    static WHEEL_DISCONNECTED: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));

    static LCD_RX: Mutex<RefCell<FrameReceiver>> = Mutex::new(RefCell::new(FrameReceiver::new()));

    // ---- mailbox shared with the commutation layer in the PWM interrupt ----
    static MOTOR_TARGET_CURRENT_10B: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static MOTOR_TARGET_SPEED_ERPS: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static MOTOR_MAX_SPEED_ERPS: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static MOTOR_DUTY_CYCLE: Mutex<Cell<u8>> = Mutex::new(Cell::new(0));
    static MOTOR_ERPS_MEASURED: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));
    static MOTOR_CURRENT_FILTERED_10B: Mutex<Cell<i16>> = Mutex::new(Cell::new(0));
    static MOTOR_BATTERY_ADC: Mutex<Cell<u8>> = Mutex::new(Cell::new(0));
    static MOTOR_ERROR: Mutex<Cell<u8>> = Mutex::new(Cell::new(0));

    /// Application-side handle on the commutation mailbox.
    struct MotorLink;

    impl MotorController for MotorLink {
        fn battery_voltage_filtered_adc(&self) -> u8 {
            interrupt::free(|cs| MOTOR_BATTERY_ADC.borrow(cs).get())
        }
        fn current_filtered_10b(&self) -> i16 {
            interrupt::free(|cs| MOTOR_CURRENT_FILTERED_10B.borrow(cs).get())
        }
        fn erps_measured(&self) -> u16 {
            interrupt::free(|cs| MOTOR_ERPS_MEASURED.borrow(cs).get())
        }
        fn error_code(&self) -> u8 {
            interrupt::free(|cs| MOTOR_ERROR.borrow(cs).get())
        }
        fn set_target_current_10b(&mut self, target: u16) {
            interrupt::free(|cs| MOTOR_TARGET_CURRENT_10B.borrow(cs).set(target));
        }
        fn set_target_speed_erps(&mut self, erps: u16) {
            interrupt::free(|cs| MOTOR_TARGET_SPEED_ERPS.borrow(cs).set(erps));
        }
        fn set_max_speed_erps(&mut self, erps: u16) {
            interrupt::free(|cs| MOTOR_MAX_SPEED_ERPS.borrow(cs).set(erps));
        }
        fn target_speed_erps_max(&self) -> u16 {
            interrupt::free(|cs| MOTOR_MAX_SPEED_ERPS.borrow(cs).get())
        }
        fn set_duty_cycle(&mut self, duty: u8) {
            interrupt::free(|cs| MOTOR_DUTY_CYCLE.borrow(cs).set(duty));
        }
    }

    /// LCD link on USART0.
    struct LcdUart;

    impl serial::Write<u8> for LcdUart {
        type Error = Infallible;

        fn write(&mut self, byte: u8) -> nb::Result<(), Infallible> {
            unsafe {
                let usart = &(*USART0::ptr());
                if usart.ucsr0a.read().bits() & UCSR_A_UDRE == 0 {
                    return Err(nb::Error::WouldBlock);
                }
                usart.udr0.write(|w| w.bits(byte));
            }
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), Infallible> {
            unsafe {
                if (*USART0::ptr()).ucsr0a.read().bits() & UCSR_A_TXC == 0 {
                    return Err(nb::Error::WouldBlock);
                }
            }
            Ok(())
        }
    }

    /// Brake lever on PC2, closed to ground when pulled.
    struct BrakePin;

    impl InputPin for BrakePin {
        type Error = Infallible;

        fn is_high(&self) -> Result<bool, Infallible> {
            let pins = unsafe { (*PORTC::ptr()).pinc.read().bits() };
            Ok(pins & (1 << BRAKE_PIN) != 0)
        }

        fn is_low(&self) -> Result<bool, Infallible> {
            Ok(!self.is_high()?)
        }
    }

    #[cfg(feature = "debug")]
    struct DebugUart;

    #[cfg(feature = "debug")]
    impl ufmt::uWrite for DebugUart {
        type Error = Infallible;

        fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
            for byte in s.bytes() {
                unsafe {
                    let usart = &(*USART1::ptr());
                    while usart.ucsr1a.read().bits() & UCSR_A_UDRE == 0 {}
                    usart.udr1.write(|w| w.bits(byte));
                }
            }
            Ok(())
        }
    }

    /// EEPROM-backed settings with a cached copy to skip no-op writes.
    struct EepromSettings {
        cached: LcdConfig,
    }

    impl EepromSettings {
        /// Load the stored settings, seeding the defaults on a fresh part.
        fn load() -> Self {
            if eeprom_read(EEPROM_MARKER_ADDR) != EEPROM_MARKER {
                let mut store = Self {
                    cached: LcdConfig::default(),
                };
                store.write_out();
                eeprom_write(EEPROM_MARKER_ADDR, EEPROM_MARKER);
                return store;
            }
            Self {
                cached: LcdConfig {
                    assist_level: eeprom_read(EEPROM_CONFIG_ADDR),
                    motor_characteristic: eeprom_read(EEPROM_CONFIG_ADDR + 1),
                    wheel_size: eeprom_read(EEPROM_CONFIG_ADDR + 2),
                    max_speed: eeprom_read(EEPROM_CONFIG_ADDR + 3),
                    power_assist_control_mode: eeprom_read(EEPROM_CONFIG_ADDR + 4) != 0,
                    controller_max_current: eeprom_read(EEPROM_CONFIG_ADDR + 5),
                },
            }
        }

        fn config(&self) -> LcdConfig {
            self.cached
        }

        fn write_out(&mut self) {
            let config = self.cached;
            eeprom_write(EEPROM_CONFIG_ADDR, config.assist_level);
            eeprom_write(EEPROM_CONFIG_ADDR + 1, config.motor_characteristic);
            eeprom_write(EEPROM_CONFIG_ADDR + 2, config.wheel_size);
            eeprom_write(EEPROM_CONFIG_ADDR + 3, config.max_speed);
            eeprom_write(
                EEPROM_CONFIG_ADDR + 4,
                config.power_assist_control_mode as u8,
            );
            eeprom_write(EEPROM_CONFIG_ADDR + 5, config.controller_max_current);
        }
    }

    impl SettingsStore for EepromSettings {
        fn write_if_changed(&mut self, config: &LcdConfig) {
            if *config == self.cached {
                return;
            }
            self.cached = *config;
            self.write_out();
        }
    }

    fn eeprom_read(address: u16) -> u8 {
        unsafe {
            let eeprom = &(*avr_device::atmega128a::EEPROM::ptr());
            while eeprom.eecr.read().bits() & EECR_EEWE != 0 {}
            eeprom.eear.write(|w| w.bits(address));
            eeprom.eecr.modify(|r, w| w.bits(r.bits() | EECR_EERE));
            eeprom.eedr.read().bits()
        }
    }

    fn eeprom_write(address: u16, value: u8) {
        unsafe {
            let eeprom = &(*avr_device::atmega128a::EEPROM::ptr());
            while eeprom.eecr.read().bits() & EECR_EEWE != 0 {}
            eeprom.eear.write(|w| w.bits(address));
            eeprom.eedr.write(|w| w.bits(value));
            // EEMWE then EEWE within four cycles, so no interrupts between
            interrupt::free(|_| {
                eeprom.eecr.modify(|r, w| w.bits(r.bits() | EECR_EEMWE));
                eeprom.eecr.modify(|r, w| w.bits(r.bits() | EECR_EEWE));
            });
        }
    }

    fn read_throttle_adc() -> u8 {
        unsafe {
            let adc = &(*ADC::ptr());
            adc.admux
                .write(|w| w.bits(ADMUX_REF_AVCC | ADMUX_ADLAR | THROTTLE_ADC_CHANNEL));
            adc.adcsra.modify(|r, w| w.bits(r.bits() | ADCSRA_ADSC));
            while adc.adcsra.read().bits() & ADCSRA_ADSC != 0 {}
            // left adjusted, the high byte is the 8-bit result
            adc.adch.read().bits()
        }
    }

    fn init_peripherals(dp: &Peripherals) {
        // LCD link, 9600 8N1, receive interrupt armed
        dp.USART0.ubrr0.write(|w| w.bits(UBRR_9600));
        dp.USART0
            .ucsr0b
            .write(|w| w.bits(UCSR_B_RXCIE | UCSR_B_RXEN | UCSR_B_TXEN));

        #[cfg(feature = "debug")]
        {
            dp.USART1.ubrr1.write(|w| w.bits(UBRR_9600));
            dp.USART1.ucsr1b.write(|w| w.bits(UCSR_B_TXEN));
        }

        // throttle ADC: AVCC reference, left adjusted for 8-bit reads
        dp.ADC.adcsra.write(|w| w.bits(ADCSRA_ENABLE_DIV128));
        dp.ADC
            .admux
            .write(|w| w.bits(ADMUX_REF_AVCC | ADMUX_ADLAR | THROTTLE_ADC_CHANNEL));

        // 64 us time base: timer0 CTC at clk/8, compare at 128 counts
        dp.TC0.ocr0.write(|w| w.bits(127));
        dp.TC0.tccr0.write(|w| w.bits(TCCR0_CTC_DIV8));
        dp.TC0.timsk.modify(|r, w| w.bits(r.bits() | TIMSK_OCIE0));

        // PAS on INT4, wheel sensor on INT5, both falling edge
        dp.EXINT.eicrb.write(|w| w.bits(EICRB_INT4_INT5_FALLING));
        dp.EXINT
            .eimsk
            .modify(|r, w| w.bits(r.bits() | EIMSK_INT4_INT5));

        // brake lever input with pull-up
        dp.PORTC
            .ddrc
            .modify(|r, w| w.bits(r.bits() & !(1 << BRAKE_PIN)));
        dp.PORTC
            .portc
            .modify(|r, w| w.bits(r.bits() | (1 << BRAKE_PIN)));

        // PAS direction phase input
        dp.PORTE
            .ddre
            .modify(|r, w| w.bits(r.bits() & !(1 << PAS_DIRECTION_PIN)));
    }

    /// 64 us PWM-cycle time base: period counters and the 10 Hz tick.
    #[avr_device::interrupt(atmega128a)]
    fn TIMER0_COMP() {
        interrupt::free(|cs| {
            // PAS period counter, pinned at the not-pedalling bound
            let pas = PAS_CYCLES.borrow(cs);
            if pas.get() < config::PAS_ABSOLUTE_MIN_CADENCE_PWM_CYCLE_TICKS {
                pas.set(pas.get() + 1);
            } else {
                PAS_PERIOD_TICKS
                    .borrow(cs)
                    .set(config::PAS_ABSOLUTE_MIN_CADENCE_PWM_CYCLE_TICKS);
            }

            // wheel period counter; repeated silent windows mean the
            // sensor is gone, not just a slow wheel
            let wheel = WHEEL_CYCLES.borrow(cs);
            if wheel.get() < config::WHEEL_SPEED_SENSOR_MIN_PWM_CYCLE_TICKS {
                wheel.set(wheel.get() + 1);
            } else {
                wheel.set(0);
                WHEEL_PERIOD_TICKS
                    .borrow(cs)
                    .set(config::WHEEL_SPEED_SENSOR_MIN_PWM_CYCLE_TICKS);
                let misses = WHEEL_SENSOR_MISSES.borrow(cs);
                misses.set(misses.get().saturating_add(1));
                if misses.get() >= WHEEL_SENSOR_MISS_LIMIT {
                    WHEEL_DISCONNECTED.borrow(cs).set(true);
                }
            }

            let divider = TICK_DIVIDER.borrow(cs);
            divider.set(divider.get() + 1);
            if divider.get() >= config::PWM_CYCLES_PER_TICK {
                divider.set(0);
                TICK_PENDING.borrow(cs).set(true);
            }
        });
    }

    /// PAS magnet edge.
    #[avr_device::interrupt(atmega128a)]
    fn INT4() {
        interrupt::free(|cs| {
            let period = PAS_CYCLES.borrow(cs).replace(0);
            PAS_PERIOD_TICKS
                .borrow(cs)
                .set(period.max(config::PAS_ABSOLUTE_MAX_CADENCE_PWM_CYCLE_TICKS));
            // the second hall phase is still high here when pedalling
            // backwards
            let phase = unsafe { (*PORTE::ptr()).pine.read().bits() };
            PAS_REVERSE
                .borrow(cs)
                .set(phase & (1 << PAS_DIRECTION_PIN) != 0);
        });
    }

    /// Wheel sensor magnet edge.
    #[avr_device::interrupt(atmega128a)]
    fn INT5() {
        interrupt::free(|cs| {
            let period = WHEEL_CYCLES.borrow(cs).replace(0);
            WHEEL_PERIOD_TICKS
                .borrow(cs)
                .set(period.max(config::WHEEL_SPEED_SENSOR_MAX_PWM_CYCLE_TICKS));
            WHEEL_SENSOR_MISSES.borrow(cs).set(0);
            WHEEL_DISCONNECTED.borrow(cs).set(false);
        });
    }

    /// LCD byte received. Kept minimal: push the byte, and once a frame is
    /// complete mask this interrupt until the main loop takes the frame.
    #[avr_device::interrupt(atmega128a)]
    fn USART0_RX() {
        unsafe {
            let usart = &(*USART0::ptr());
            let byte = usart.udr0.read().bits();
            interrupt::free(|cs| {
                if LCD_RX.borrow(cs).borrow_mut().push_byte(byte) {
                    usart
                        .ucsr0b
                        .modify(|r, w| w.bits(r.bits() & !UCSR_B_RXCIE));
                }
            });
        }
    }

    #[avr_device::entry]
    fn main() -> ! {
        let dp = Peripherals::take().unwrap();
        init_peripherals(&dp);

        let mut settings = EepromSettings::load();
        let mut app = Application::new(settings.config());
        let mut motor = MotorLink;
        let mut lcd = LcdUart;
        let brake = BrakePin;
        #[cfg(feature = "debug")]
        let mut console = DebugConsole::new(DebugUart);

        // interrupts stayed off through init; settings are loaded, go live
        unsafe { interrupt::enable() };

        loop {
            let tick_due = interrupt::free(|cs| TICK_PENDING.borrow(cs).replace(false));
            if !tick_due {
                avr_device::asm::sleep();
                continue;
            }

            let adc_throttle = read_throttle_adc();
            let brake_is_set = brake.is_low().unwrap_or(false);

            let inputs = interrupt::free(|cs| TickInputs {
                adc_throttle,
                brake_is_set,
                pas_period_ticks: PAS_PERIOD_TICKS.borrow(cs).get(),
                pas_reverse: PAS_REVERSE.borrow(cs).get(),
                wheel_period_ticks: WHEEL_PERIOD_TICKS.borrow(cs).get(),
                wheel_sensor_disconnected: WHEEL_DISCONNECTED.borrow(cs).get(),
                lcd_frame: LCD_RX.borrow(cs).borrow_mut().take_frame(),
            });

            if brake_is_set {
                app.stop_cruise_control();
            }

            app.update(&inputs, &mut motor, &mut lcd, &mut settings);

            if inputs.lcd_frame.is_some() {
                // frame consumed, reopen the receive path
                unsafe {
                    (*USART0::ptr())
                        .ucsr0b
                        .modify(|r, w| w.bits(r.bits() | UCSR_B_RXCIE));
                }
            }

            #[cfg(feature = "debug")]
            console.log_tick(
                app.wheel_speed_kmh() as u8,
                app.pas_cadence_rpm(),
                interrupt::free(|cs| MOTOR_TARGET_CURRENT_10B.borrow(cs).get()),
            );
        }
    }
}

#[cfg(not(target_arch = "avr"))]
fn main() {}
