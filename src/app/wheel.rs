//! Wheel speed estimation and the LCD period encoding.

use crate::config;

/// Road speed in km/h.
///
/// The external wheel sensor is the primary source. With the sensor
/// disconnected, motor electrical speed and the rpm-per-volt characteristic
/// stand in for it. The period counter saturates at a nonzero bound when the
/// wheel stops, so the division is always safe.
pub fn speed_kmh(
    sensor_period_ticks: u16,
    sensor_disconnected: bool,
    motor_erps: u16,
    motor_characteristic: u8,
    wheel_perimeter_m: f32,
) -> f32 {
    if sensor_disconnected {
        let metres_per_hour = u32::from(motor_erps) * 3600;
        let characteristic_scaled = u32::from(motor_characteristic >> 1) * 1000;
        (metres_per_hour as f32 * wheel_perimeter_m) / characteristic_scaled as f32
    } else {
        let rps = config::PWM_CYCLES_SECOND as f32 / f32::from(sensor_period_ticks);
        rps * wheel_perimeter_m * 3.6
    }
}

/// Wheel rotation period in ms, the unit the LCD computes speed from.
///
/// Below walking pace the reported period pins high so the display shows
/// 0 km/h; the value intentionally wraps to the low 16 bits, matching what
/// deployed displays were calibrated against.
pub fn period_ms(speed_kmh: f32, wheel_perimeter_m: f32) -> u16 {
    if speed_kmh < 1.0 {
        (36_000.0 * wheel_perimeter_m) as u32 as u16
    } else {
        ((3_600.0 * wheel_perimeter_m) / speed_kmh) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_speed_from_the_wheel_sensor() {
        // 1562 ticks is 10 revolutions per second
        let speed = speed_kmh(1562, false, 0, 202, 2.0625);
        assert!((speed - 74.27).abs() < 0.01, "speed {}", speed);
    }

    #[test]
    fn falls_back_to_motor_speed_when_disconnected() {
        let speed = speed_kmh(135, true, 100, 202, 2.0625);
        assert!((speed - 7.3514).abs() < 0.001, "speed {}", speed);
    }

    #[test]
    fn pins_the_period_high_at_standstill() {
        // 36000 * 2.0625 truncated to u16, the 26'' standstill marker
        assert_eq!(period_ms(0.0, 2.0625), 8714);
        assert_eq!(period_ms(0.99, 2.0625), 8714);
    }

    #[test]
    fn encodes_the_rotation_period_when_rolling() {
        let speed = speed_kmh(1562, false, 0, 202, 2.0625);
        assert_eq!(period_ms(speed, 2.0625), 99);
    }
}
