//! Tuning constants for the e-bike application layer

/// PWM carrier frequency in Hz; one PWM cycle (64 us) is the time base of
/// every period measurement
pub const PWM_CYCLES_SECOND: u32 = 15_625;

/// PWM cycles per 100 ms application tick
pub const PWM_CYCLES_PER_TICK: u16 = (PWM_CYCLES_SECOND / 10) as u16;

/// Upper bound of the open-loop duty-cycle command
pub const PWM_DUTY_CYCLE_MAX: u8 = 254;

// Throttle ADC window, 8-bit reads. The torque sensor shares the throttle
// ADC channel but sits on a narrower electrical range.
#[cfg(feature = "throttle-pas")]
pub const ADC_THROTTLE_MIN_VALUE: u8 = 45;
#[cfg(feature = "throttle-pas")]
pub const ADC_THROTTLE_MAX_VALUE: u8 = 229;
#[cfg(all(feature = "torque-sensor", not(feature = "throttle-pas")))]
pub const ADC_THROTTLE_MIN_VALUE: u8 = 51;
#[cfg(all(feature = "torque-sensor", not(feature = "throttle-pas")))]
pub const ADC_THROTTLE_MAX_VALUE: u8 = 183;

pub const THROTTLE_MIN_VALUE: u8 = 0;
pub const THROTTLE_MAX_VALUE: u8 = 255;

/// Throttle band treated as "same position" while cruise control arms, and
/// the floor below which the throttle counts as released for cruise purposes
pub const CRUISE_CONTROL_MIN: u8 = 20;

/// Cruise control disengages below this speed
pub const CRUISE_CONTROL_MIN_SPEED_KMH: f32 = 6.0;

/// Ticks the throttle must sit inside the capture window before the cruise
/// latch closes (80 * 100 ms = 8 s)
pub const CRUISE_CONTROL_HOLD_TICKS: u8 = 80;

// PAS
pub const PAS_NUMBER_MAGNETS: u32 = 8;

/// (1 / (150 rpm / 60)) / (PAS_NUMBER_MAGNETS * 64 us): hard ceiling
pub const PAS_ABSOLUTE_MAX_CADENCE_PWM_CYCLE_TICKS: u16 =
    (6_250 / PAS_NUMBER_MAGNETS) as u16;

/// (1 / (6 rpm / 60)) / (PAS_NUMBER_MAGNETS * 64 us): slower counts as not
/// pedalling at all
pub const PAS_ABSOLUTE_MIN_CADENCE_PWM_CYCLE_TICKS: u16 =
    (156_250 / PAS_NUMBER_MAGNETS) as u16;

pub const PAS_MAX_CADENCE_RPM: u8 = 150;

// Wheel speed sensor period bounds, in PWM cycles
pub const WHEEL_SPEED_SENSOR_MAX_PWM_CYCLE_TICKS: u16 = 135;
/// Kept just under 2^16 so the stopped-wheel clamp stays a valid divisor
pub const WHEEL_SPEED_SENSOR_MIN_PWM_CYCLE_TICKS: u16 = 64_000;

// Motor current, 0.25 A per 10-bit ADC count
pub const ADC_MOTOR_CURRENT_MAX: u16 = 16;
pub const ADC_MOTOR_CURRENT_MAX_10B: u16 = ADC_MOTOR_CURRENT_MAX << 2;

/// Error code the motor controller raises on battery under-voltage; shown
/// as a flashing-empty battery symbol instead of an error number
pub const MOTOR_CONTROLLER_ERROR_BATTERY_UNDER_VOLTAGE: u8 = 91;

// Battery, 7S li-ion
pub const BATTERY_LI_ION_CELLS_NUMBER: u8 = 7;

/// One 8-bit ADC step in volts, scaled by 256 (0.272 << 8)
pub const ADC_BATTERY_VOLTAGE_K: u16 = 73;

/// Nominal pack voltage byte reported to the LCD (cells x 3.45, truncated)
pub const COMMUNICATIONS_BATTERY_VOLTAGE: u8 =
    (BATTERY_LI_ION_CELLS_NUMBER as f32 * 3.45) as u8;

// Per-cell thresholds of the coarse gauge
pub const LI_ION_CELL_VOLTS_80: f32 = 4.02;
pub const LI_ION_CELL_VOLTS_60: f32 = 3.87;
pub const LI_ION_CELL_VOLTS_40: f32 = 3.80;
pub const LI_ION_CELL_VOLTS_20: f32 = 3.73;

// Pack thresholds in volts x 256 fixed point
pub const BATTERY_PACK_VOLTS_80: u16 =
    (LI_ION_CELL_VOLTS_80 * BATTERY_LI_ION_CELLS_NUMBER as f32 * 256.0) as u16;
pub const BATTERY_PACK_VOLTS_60: u16 =
    (LI_ION_CELL_VOLTS_60 * BATTERY_LI_ION_CELLS_NUMBER as f32 * 256.0) as u16;
pub const BATTERY_PACK_VOLTS_40: u16 =
    (LI_ION_CELL_VOLTS_40 * BATTERY_LI_ION_CELLS_NUMBER as f32 * 256.0) as u16;
pub const BATTERY_PACK_VOLTS_20: u16 =
    (LI_ION_CELL_VOLTS_20 * BATTERY_LI_ION_CELLS_NUMBER as f32 * 256.0) as u16;

// Settings defaults for a fresh EEPROM
pub const DEFAULT_ASSIST_LEVEL: u8 = 2;
/// Q85 motor, 12.6 rpm per volt x 16
pub const DEFAULT_MOTOR_CHARACTERISTIC: u8 = 202;
/// 26'' wheel
pub const DEFAULT_WHEEL_SIZE: u8 = 20;
pub const DEFAULT_MAX_SPEED: u8 = 25;
pub const DEFAULT_POWER_ASSIST_CONTROL_MODE: bool = true;
pub const DEFAULT_CONTROLLER_MAX_CURRENT: u8 = 10;

// Assist level multipliers; level 0 rides unassisted
pub const ASSIST_LEVEL_0: f32 = 0.0;
pub const ASSIST_LEVEL_1: f32 = 0.4;
pub const ASSIST_LEVEL_2: f32 = 0.6;
pub const ASSIST_LEVEL_3: f32 = 0.8;
pub const ASSIST_LEVEL_4: f32 = 0.9;
pub const ASSIST_LEVEL_5: f32 = 1.0;
