//! Limits derived from the LCD configuration: wheel geometry, the current
//! ceiling and the electrical speed ceiling.

use crate::config;

/// Rolling circumference in metres for the 5-bit LCD wheel-size code.
/// Unknown codes fall back to a 26'' wheel.
pub fn wheel_perimeter_m(wheel_size: u8) -> f32 {
    match wheel_size {
        0x12 => 0.46875, // 6''
        0x0a => 0.62847, // 8''
        0x0e => 0.78819, // 10''
        0x02 => 0.94791, // 12''
        0x06 => 1.10764, // 14''
        0x00 => 1.26736, // 16''
        0x04 => 1.42708, // 18''
        0x08 => 1.57639, // 20''
        0x0c => 1.74305, // 22''
        0x10 => 1.89583, // 24''
        0x14 => 2.0625,  // 26''
        0x18 => 2.17361, // 700c
        0x1c => 2.19444, // 28''
        0x1e => 2.25,    // 29''
        _ => 2.0625,
    }
}

/// Current ceiling in 10-bit counts for the 0..10 LCD current code.
pub fn max_current_10b(controller_max_current: u8) -> u16 {
    let fraction = match controller_max_current {
        0 => 0.10,
        1 => 0.25,
        2 => 0.33,
        3 => 0.50,
        4 => 0.667,
        5 => 0.752,
        6 => 0.80,
        7 => 0.833,
        8 => 0.87,
        9 => 0.91,
        _ => 1.0,
    };
    (f32::from(config::ADC_MOTOR_CURRENT_MAX_10B) * fraction) as u16
}

/// Assist multiplier for the LCD level. Levels past 5 are undefined on the
/// display side and assist fully.
pub fn assist_gain(assist_level: u8) -> f32 {
    match assist_level {
        0 => config::ASSIST_LEVEL_0,
        1 => config::ASSIST_LEVEL_1,
        2 => config::ASSIST_LEVEL_2,
        3 => config::ASSIST_LEVEL_3,
        4 => config::ASSIST_LEVEL_4,
        _ => config::ASSIST_LEVEL_5,
    }
}

/// Electrical speed matching the configured speed cap on the configured
/// wheel: max_speed * 1000 * (characteristic / 2) / (3600 * perimeter).
pub fn max_speed_erps(max_speed_kmh: u8, motor_characteristic: u8, wheel_perimeter_m: f32) -> u16 {
    let metres_per_hour =
        u32::from(max_speed_kmh) * 1000 * u32::from(motor_characteristic >> 1);
    (metres_per_hour as f32 / (3600.0 * wheel_perimeter_m)) as u16
}
