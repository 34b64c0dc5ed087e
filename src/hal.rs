//! Seams to the layers below the application: the motor controller (current
//! and speed loops running in the PWM interrupt) and the settings store.
//! The core only sees these traits; the firmware binary provides the
//! implementations, and host tests substitute mocks. The LCD UART is an
//! `embedded_hal::serial::Write<u8>` and the brake lever an
//! `embedded_hal::digital::v2::InputPin`, wired up by the same binary.

use crate::protocol::LcdConfig;

/// Measurements published by the motor-control layer and the set-points it
/// accepts from us.
pub trait MotorController {
    /// Filtered battery voltage in 8-bit ADC counts
    fn battery_voltage_filtered_adc(&self) -> u8;

    /// Filtered battery current in 10-bit counts, 0.25 A per LSB; negative
    /// values are regen
    fn current_filtered_10b(&self) -> i16;

    /// Electrical revolutions per second from the hall sensors
    fn erps_measured(&self) -> u16;

    /// 0 when healthy, otherwise the code shown on the LCD
    fn error_code(&self) -> u8;

    fn set_target_current_10b(&mut self, target: u16);
    fn set_target_speed_erps(&mut self, erps: u16);

    /// Speed ceiling; the speed loop never drives past it
    fn set_max_speed_erps(&mut self, erps: u16);
    fn target_speed_erps_max(&self) -> u16;

    /// Open-loop drive, only used by the duty-cycle strategy variant
    fn set_duty_cycle(&mut self, duty: u8);
}

/// Persistent storage for the LCD-adjustable settings.
pub trait SettingsStore {
    /// Persist the configuration, skipping the write when nothing changed
    fn write_if_changed(&mut self, config: &LcdConfig);
}
