//! High-level e-bike application logic: the 10 Hz pipeline between the
//! rider, the handlebar LCD and the motor-control layer.

pub mod cruise;
pub mod limits;
pub mod pas;
pub mod strategy;
pub mod throttle;
pub mod wheel;

use embedded_hal::serial::Write;

use crate::config;
use crate::hal::{MotorController, SettingsStore};
use crate::protocol::{frame, LcdConfig, RX_FRAME_LEN};
use cruise::CruiseControl;
use strategy::{ControlStrategy, DriveInputs};
use throttle::Throttle;

/// Snapshot of the interrupt-published inputs, captured once per tick by
/// the firmware glue under a short critical section.
#[derive(Clone, Copy)]
pub struct TickInputs {
    pub adc_throttle: u8,
    pub brake_is_set: bool,
    /// PAS magnet period in 64 us PWM cycles
    pub pas_period_ticks: u16,
    pub pas_reverse: bool,
    /// wheel magnet period in 64 us PWM cycles
    pub wheel_period_ticks: u16,
    pub wheel_sensor_disconnected: bool,
    /// a configuration frame taken from the receiver, if one arrived
    pub lcd_frame: Option<[u8; RX_FRAME_LEN]>,
}

/// Application state; a single instance lives for the whole firmware run.
pub struct Application {
    config: LcdConfig,
    throttle: Throttle,
    cruise: CruiseControl,
    strategy: strategy::Active,
    pas_cadence_rpm: u8,
    wheel_perimeter_m: f32,
    wheel_speed_kmh: f32,
    wheel_period_ms: u16,
    max_current_10b: u16,
}

impl Application {
    pub fn new(config: LcdConfig) -> Self {
        Self {
            config,
            throttle: Throttle::new(),
            cruise: CruiseControl::new(),
            strategy: Default::default(),
            pas_cadence_rpm: 0,
            wheel_perimeter_m: limits::wheel_perimeter_m(config.wheel_size),
            wheel_speed_kmh: 0.0,
            wheel_period_ms: 0,
            max_current_10b: limits::max_current_10b(config.controller_max_current),
        }
    }

    /// One 100 ms control tick: condition the rider inputs, talk to the
    /// LCD, refresh the configured limits, then let the control strategy
    /// set the motor targets.
    pub fn update<M, L, S>(
        &mut self,
        inputs: &TickInputs,
        motor: &mut M,
        lcd: &mut L,
        settings: &mut S,
    ) where
        M: MotorController,
        L: Write<u8>,
        S: SettingsStore,
    {
        self.wheel_speed_kmh = wheel::speed_kmh(
            inputs.wheel_period_ticks,
            inputs.wheel_sensor_disconnected,
            motor.erps_measured(),
            self.config.motor_characteristic,
            self.wheel_perimeter_m,
        );
        self.throttle.update(inputs.adc_throttle);
        self.pas_cadence_rpm = pas::cadence_rpm(inputs.pas_period_ticks, inputs.pas_reverse);

        self.communications(inputs, motor, lcd, settings);
        self.apply_config(motor);
        self.run_strategy(motor);
    }

    /// Send the status frame, then pick up whatever the LCD sent us.
    fn communications<M, L, S>(
        &mut self,
        inputs: &TickInputs,
        motor: &mut M,
        lcd: &mut L,
        settings: &mut S,
    ) where
        M: MotorController,
        L: Write<u8>,
        S: SettingsStore,
    {
        self.wheel_period_ms = wheel::period_ms(self.wheel_speed_kmh, self.wheel_perimeter_m);

        let battery_volts_q8 =
            u16::from(motor.battery_voltage_filtered_adc()) * config::ADC_BATTERY_VOLTAGE_K;
        let mut battery_soc = battery_soc_code(battery_volts_q8);
        let mut error = motor.error_code();
        if error == config::MOTOR_CONTROLLER_ERROR_BATTERY_UNDER_VOLTAGE {
            // flash the empty battery symbol instead of a cryptic code
            battery_soc = 1;
            error = 0;
        }

        let mut moving_indication = 0u8;
        if inputs.brake_is_set {
            moving_indication |= frame::FLAG_BRAKE;
        }
        if self.cruise.is_set() {
            moving_indication |= frame::FLAG_CRUISE;
        }
        if self.throttle.is_set() {
            moving_indication |= frame::FLAG_THROTTLE;
        }
        if self.pas_cadence_rpm > 0 {
            moving_indication |= frame::FLAG_PAS;
        }

        let report = frame::StatusReport {
            battery_soc,
            wheel_period_ms: self.wheel_period_ms,
            error,
            moving_indication,
            current_10b: motor.current_filtered_10b(),
        };
        for byte in report.encode() {
            // 12 bytes at the wire baud fit well inside a tick
            nb::block!(lcd.write(byte)).ok();
        }

        if let Some(rx) = &inputs.lcd_frame {
            // a bad frame is dropped without a reply; the LCD resends
            if let Ok(new_config) = frame::parse_config_frame(rx) {
                self.config = new_config;
                settings.write_if_changed(&self.config);
            }
        }
    }

    /// Refresh everything the LCD configuration controls.
    fn apply_config<M: MotorController>(&mut self, motor: &mut M) {
        self.wheel_perimeter_m = limits::wheel_perimeter_m(self.config.wheel_size);
        self.max_current_10b = limits::max_current_10b(self.config.controller_max_current);
        motor.set_max_speed_erps(limits::max_speed_erps(
            self.config.max_speed,
            self.config.motor_characteristic,
            self.wheel_perimeter_m,
        ));
    }

    fn run_strategy<M: MotorController>(&mut self, motor: &mut M) {
        let effective_throttle = self
            .cruise
            .update(self.wheel_speed_kmh, self.throttle.filtered());

        let drive = DriveInputs {
            throttle: effective_throttle,
            pas_cadence_rpm: self.pas_cadence_rpm,
            assist_gain: limits::assist_gain(self.config.assist_level),
            max_current_10b: self.max_current_10b,
            speed_cap_only: self.config.power_assist_control_mode,
        };
        self.strategy.apply(&drive, motor);
    }

    pub fn config(&self) -> &LcdConfig {
        &self.config
    }

    pub fn wheel_speed_kmh(&self) -> f32 {
        self.wheel_speed_kmh
    }

    pub fn pas_cadence_rpm(&self) -> u8 {
        self.pas_cadence_rpm
    }

    pub fn throttle_released(&self) -> bool {
        self.throttle.is_released()
    }

    pub fn cruise_is_set(&self) -> bool {
        self.cruise.is_set()
    }

    /// Unconditionally drop the cruise latch (brake lever).
    pub fn stop_cruise_control(&mut self) {
        self.cruise.stop();
    }
}

/// Coarse battery gauge from the pack voltage in volts x 256.
fn battery_soc_code(battery_volts_q8: u16) -> u8 {
    if battery_volts_q8 > config::BATTERY_PACK_VOLTS_80 {
        16 // 4 bars
    } else if battery_volts_q8 > config::BATTERY_PACK_VOLTS_60 {
        12 // 3 bars
    } else if battery_volts_q8 > config::BATTERY_PACK_VOLTS_40 {
        8 // 2 bars
    } else if battery_volts_q8 > config::BATTERY_PACK_VOLTS_20 {
        4 // 1 bar
    } else {
        3 // empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::serial::{Mock as SerialMock, Transaction};

    struct MockMotor {
        battery_adc: u8,
        current_10b: i16,
        erps: u16,
        error: u8,
        target_current_10b: u16,
        target_speed_erps: u16,
        max_speed_erps: u16,
    }

    impl Default for MockMotor {
        fn default() -> Self {
            Self {
                battery_adc: 110,
                current_10b: 0,
                erps: 0,
                error: 0,
                target_current_10b: 0,
                target_speed_erps: 0,
                max_speed_erps: 0,
            }
        }
    }

    impl MotorController for MockMotor {
        fn battery_voltage_filtered_adc(&self) -> u8 {
            self.battery_adc
        }
        fn current_filtered_10b(&self) -> i16 {
            self.current_10b
        }
        fn erps_measured(&self) -> u16 {
            self.erps
        }
        fn error_code(&self) -> u8 {
            self.error
        }
        fn set_target_current_10b(&mut self, target: u16) {
            self.target_current_10b = target;
        }
        fn set_target_speed_erps(&mut self, erps: u16) {
            self.target_speed_erps = erps;
        }
        fn set_max_speed_erps(&mut self, erps: u16) {
            self.max_speed_erps = erps;
        }
        fn target_speed_erps_max(&self) -> u16 {
            self.max_speed_erps
        }
        fn set_duty_cycle(&mut self, _duty: u8) {}
    }

    #[derive(Default)]
    struct MockSettings {
        writes: Vec<LcdConfig>,
    }

    impl SettingsStore for MockSettings {
        fn write_if_changed(&mut self, config: &LcdConfig) {
            self.writes.push(*config);
        }
    }

    fn coasting_inputs() -> TickInputs {
        TickInputs {
            adc_throttle: 45,
            brake_is_set: false,
            pas_period_ticks: config::PAS_ABSOLUTE_MIN_CADENCE_PWM_CYCLE_TICKS,
            pas_reverse: false,
            wheel_period_ticks: 6400,
            wheel_sensor_disconnected: false,
            lcd_frame: None,
        }
    }

    fn expect_frame(frame: [u8; frame::TX_FRAME_LEN]) -> SerialMock<u8> {
        let transactions: Vec<Transaction<u8>> =
            frame.iter().map(|&byte| Transaction::write(byte)).collect();
        SerialMock::new(&transactions)
    }

    #[test]
    fn a_tick_reports_status_and_sets_targets() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor {
            current_10b: 5,
            ..Default::default()
        };
        let mut settings = MockSettings::default();

        let inputs = TickInputs {
            adc_throttle: 150,
            brake_is_set: true,
            wheel_period_ticks: 1562,
            ..coasting_inputs()
        };

        // speed 74.3 km/h -> period 99 ms; SOC full at 8030 q8 volts;
        // brake and throttle flags; display current 5 - 1
        let mut lcd = expect_frame([0x41, 16, 24, 0, 99, 0, 77, 0x22, 4, 0, 0, 0]);

        app.update(&inputs, &mut motor, &mut lcd, &mut settings);
        lcd.done();

        // defaults: 25 km/h cap on a 26'' wheel
        assert_eq!(motor.max_speed_erps, 340);
        // filtered throttle 36 at assist level 2
        assert_eq!(motor.target_current_10b, 5);
        assert_eq!(motor.target_speed_erps, 340);
        assert!(settings.writes.is_empty());
        assert!(!app.throttle_released());
    }

    #[test]
    fn a_valid_lcd_frame_reconfigures_and_persists() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor {
            battery_adc: 100,
            ..Default::default()
        };
        let mut settings = MockSettings::default();

        let inputs = TickInputs {
            lcd_frame: Some([
                0x32, 0x0E, 0, 0x03, 0x28, 0xCA, 0x48, 0x9F ^ 5, 0, 0x0A, 0, 0, 0,
            ]),
            ..coasting_inputs()
        };

        let mut lcd = expect_frame([0x41, 16, 24, 1, 153, 0, 144, 0, 0, 0, 0, 0]);
        app.update(&inputs, &mut motor, &mut lcd, &mut settings);
        lcd.done();

        let expected = LcdConfig {
            assist_level: 3,
            motor_characteristic: 0xCA,
            wheel_size: 1,
            max_speed: 15,
            power_assist_control_mode: true,
            controller_max_current: 10,
        };
        assert_eq!(settings.writes, vec![expected]);
        assert_eq!(*app.config(), expected);
        // the new 15 km/h cap lands on the motor the same tick
        assert_eq!(motor.max_speed_erps, 204);
    }

    #[test]
    fn a_corrupted_lcd_frame_changes_nothing() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor {
            battery_adc: 100,
            ..Default::default()
        };
        let mut settings = MockSettings::default();

        let mut bad_frame = [
            0x32, 0x0E, 0, 0x03, 0x28, 0xCA, 0x48, 0x9F ^ 5, 0, 0x0A, 0, 0, 0,
        ];
        bad_frame[5] ^= 0xFF;
        let inputs = TickInputs {
            lcd_frame: Some(bad_frame),
            ..coasting_inputs()
        };

        let mut lcd = expect_frame([0x41, 16, 24, 1, 153, 0, 144, 0, 0, 0, 0, 0]);
        app.update(&inputs, &mut motor, &mut lcd, &mut settings);
        lcd.done();

        assert!(settings.writes.is_empty());
        assert_eq!(*app.config(), LcdConfig::default());
    }

    #[test]
    fn released_throttle_without_cadence_drives_nothing() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor::default();
        let mut settings = MockSettings::default();

        for _ in 0..8 {
            let mut lcd = expect_frame([0x41, 16, 24, 1, 153, 0, 144, 0, 0, 0, 0, 0]);
            app.update(&coasting_inputs(), &mut motor, &mut lcd, &mut settings);
            lcd.done();
            assert!(app.throttle_released());
            assert!(!app.cruise_is_set());
            assert_eq!(motor.target_current_10b, 0);
        }
    }

    #[test]
    fn under_voltage_flashes_the_battery_symbol() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor {
            battery_adc: 100,
            error: config::MOTOR_CONTROLLER_ERROR_BATTERY_UNDER_VOLTAGE,
            ..Default::default()
        };
        let mut settings = MockSettings::default();

        // SOC byte forced to 1 and the error byte cleared
        let mut lcd = expect_frame([0x41, 1, 24, 1, 153, 0, 129, 0, 0, 0, 0, 0]);
        app.update(&coasting_inputs(), &mut motor, &mut lcd, &mut settings);
        lcd.done();
    }

    #[test]
    fn other_errors_reach_the_display() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor {
            battery_adc: 100,
            error: 7,
            ..Default::default()
        };
        let mut settings = MockSettings::default();

        let mut lcd = expect_frame([0x41, 16, 24, 1, 153, 7, 151, 0, 0, 0, 0, 0]);
        app.update(&coasting_inputs(), &mut motor, &mut lcd, &mut settings);
        lcd.done();
    }

    #[test]
    fn soc_steps_follow_the_pack_thresholds() {
        assert_eq!(battery_soc_code(110 * 73), 16);
        assert_eq!(battery_soc_code(97 * 73), 12);
        assert_eq!(battery_soc_code(94 * 73), 8);
        assert_eq!(battery_soc_code(92 * 73), 4);
        assert_eq!(battery_soc_code(80 * 73), 3);
    }

    #[test]
    fn pedalling_backwards_never_assists() {
        let mut app = Application::new(LcdConfig::default());
        let mut motor = MockMotor::default();
        let mut settings = MockSettings::default();

        let inputs = TickInputs {
            pas_period_ticks: 1953,
            pas_reverse: true,
            ..coasting_inputs()
        };
        let mut lcd = expect_frame([0x41, 16, 24, 1, 153, 0, 144, 0, 0, 0, 0, 0]);
        app.update(&inputs, &mut motor, &mut lcd, &mut settings);
        lcd.done();

        assert_eq!(app.pas_cadence_rpm(), 0);
        assert_eq!(motor.target_current_10b, 0);
    }
}
