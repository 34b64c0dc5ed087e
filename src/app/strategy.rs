//! Control strategies: rider intent in, motor set-points out.
//!
//! Exactly one strategy is compiled in; the cargo features mirror the
//! factory build options of the controller.

use crate::config;
use crate::hal::MotorController;
use crate::util::map;

#[cfg(all(feature = "throttle-pas", feature = "torque-sensor"))]
compile_error!("features `throttle-pas` and `torque-sensor` are mutually exclusive");

#[cfg(not(any(feature = "throttle-pas", feature = "torque-sensor")))]
compile_error!("select a control strategy: feature `throttle-pas` or `torque-sensor`");

#[cfg(all(feature = "current-speed", feature = "duty-cycle"))]
compile_error!("features `current-speed` and `duty-cycle` are mutually exclusive");

#[cfg(all(
    feature = "throttle-pas",
    not(any(feature = "current-speed", feature = "duty-cycle"))
))]
compile_error!("select a throttle-pas variant: feature `current-speed` or `duty-cycle`");

/// Per-tick values every strategy works from.
pub struct DriveInputs {
    /// filtered throttle after cruise control
    pub throttle: u8,
    pub pas_cadence_rpm: u8,
    pub assist_gain: f32,
    pub max_current_10b: u16,
    /// true: the speed loop only enforces the configured cap
    pub speed_cap_only: bool,
}

pub trait ControlStrategy {
    fn apply<M: MotorController>(&self, drive: &DriveInputs, motor: &mut M);
}

/// Scale the 0..255 drive value onto the current ceiling, and either cap or
/// modulate the speed target depending on the LCD P3 setting.
fn set_current_and_speed<M: MotorController>(
    drive_value: u8,
    drive: &DriveInputs,
    motor: &mut M,
) {
    motor.set_target_current_10b(map(
        u32::from(drive_value),
        0,
        255,
        0,
        u32::from(drive.max_current_10b),
    ) as u16);

    if drive.speed_cap_only {
        motor.set_target_speed_erps(motor.target_speed_erps_max());
    } else {
        motor.set_target_speed_erps(map(
            u32::from(drive_value),
            0,
            255,
            0,
            u32::from(motor.target_speed_erps_max()),
        ) as u16);
    }
}

/// Throttle plus cadence sensor: whichever asks for more wins, scaled by the
/// assist level.
#[derive(Default, Clone, Copy)]
pub struct ThrottlePas;

impl ControlStrategy for ThrottlePas {
    #[cfg(not(feature = "duty-cycle"))]
    fn apply<M: MotorController>(&self, drive: &DriveInputs, motor: &mut M) {
        let pas_scaled = map(
            u32::from(drive.pas_cadence_rpm),
            0,
            u32::from(config::PAS_MAX_CADENCE_RPM),
            0,
            255,
        ) as u8;

        #[cfg(not(feature = "pas-assist-only"))]
        let drive_value = {
            let stronger = drive.throttle.max(pas_scaled);
            (f32::from(stronger) * drive.assist_gain) as u8
        };
        #[cfg(feature = "pas-assist-only")]
        let drive_value = {
            // the assist level shapes the cadence contribution only; a
            // direct throttle request can still win
            let assisted = (f32::from(pas_scaled) * drive.assist_gain) as u8;
            drive.throttle.max(assisted)
        };

        set_current_and_speed(drive_value, drive, motor);
    }

    #[cfg(feature = "duty-cycle")]
    fn apply<M: MotorController>(&self, drive: &DriveInputs, motor: &mut M) {
        // open loop: the speed target only arms the controller-side cap
        motor.set_target_speed_erps(motor.target_speed_erps_max());

        let assisted = (f32::from(drive.throttle) * drive.assist_gain) as u8;
        motor.set_duty_cycle(map(
            u32::from(assisted),
            0,
            255,
            0,
            u32::from(config::PWM_DUTY_CYCLE_MAX),
        ) as u8);
    }
}

/// Torque sensor on the throttle ADC path; the sensor only swings half the
/// range, so the reading is halved before the assist gain.
#[derive(Default, Clone, Copy)]
pub struct TorqueSensor;

impl ControlStrategy for TorqueSensor {
    fn apply<M: MotorController>(&self, drive: &DriveInputs, motor: &mut M) {
        let torque = f32::from(drive.throttle >> 1) * drive.assist_gain;

        // torque times cadence approximates the rider's mechanical power
        #[cfg(feature = "human-power")]
        let torque =
            torque * (f32::from(drive.pas_cadence_rpm) / f32::from(config::PAS_MAX_CADENCE_RPM));

        set_current_and_speed(torque as u8, drive, motor);
    }
}

#[cfg(feature = "throttle-pas")]
pub type Active = ThrottlePas;
#[cfg(all(feature = "torque-sensor", not(feature = "throttle-pas")))]
pub type Active = TorqueSensor;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingMotor {
        target_current_10b: u16,
        target_speed_erps: u16,
        max_speed_erps: u16,
        duty_cycle: Option<u8>,
    }

    impl MotorController for RecordingMotor {
        fn battery_voltage_filtered_adc(&self) -> u8 {
            0
        }
        fn current_filtered_10b(&self) -> i16 {
            0
        }
        fn erps_measured(&self) -> u16 {
            0
        }
        fn error_code(&self) -> u8 {
            0
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
        fn set_duty_cycle(&mut self, duty: u8) {
            self.duty_cycle = Some(duty);
        }
    }

    fn drive(throttle: u8, cadence: u8, gain: f32, speed_cap_only: bool) -> DriveInputs {
        DriveInputs {
            throttle,
            pas_cadence_rpm: cadence,
            assist_gain: gain,
            max_current_10b: 64,
            speed_cap_only,
        }
    }

    #[cfg(not(feature = "duty-cycle"))]
    #[test]
    fn full_throttle_reaches_the_current_ceiling() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        ThrottlePas.apply(&drive(255, 0, 1.0, true), &mut motor);
        assert_eq!(motor.target_current_10b, 64);
        assert_eq!(motor.target_speed_erps, 340);
    }

    #[cfg(not(feature = "duty-cycle"))]
    #[test]
    fn cadence_alone_drives_the_motor() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        // 75 rpm of 150 maps to mid scale
        ThrottlePas.apply(&drive(0, 75, 0.8, true), &mut motor);
        assert_eq!(motor.target_current_10b, 25);
    }

    #[cfg(not(feature = "duty-cycle"))]
    #[test]
    fn cadence_modulates_speed_without_the_cap_mode() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        ThrottlePas.apply(&drive(128, 0, 1.0, false), &mut motor);
        assert_eq!(motor.target_current_10b, 32);
        assert_eq!(motor.target_speed_erps, 170);
    }

    #[cfg(not(feature = "duty-cycle"))]
    #[test]
    fn zero_drive_means_zero_current() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        ThrottlePas.apply(&drive(0, 0, 1.0, false), &mut motor);
        assert_eq!(motor.target_current_10b, 0);
        assert_eq!(motor.target_speed_erps, 0);
    }

    #[cfg(not(feature = "duty-cycle"))]
    #[test]
    fn targets_never_exceed_the_limits() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        for throttle in (0..=255u16).step_by(5) {
            for cadence in [0u8, 40, 90, 150] {
                for cap in [false, true] {
                    ThrottlePas.apply(&drive(throttle as u8, cadence, 1.0, cap), &mut motor);
                    assert!(motor.target_current_10b <= 64);
                    assert!(motor.target_speed_erps <= 340);
                }
            }
        }
    }

    #[cfg(not(feature = "human-power"))]
    #[test]
    fn torque_sensor_uses_half_the_range() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        TorqueSensor.apply(&drive(200, 0, 1.0, true), &mut motor);
        // 200 >> 1 scaled onto the 64-count ceiling
        assert_eq!(motor.target_current_10b, 25);
        assert_eq!(motor.target_speed_erps, 340);
    }

    #[cfg(feature = "human-power")]
    #[test]
    fn stalled_cranks_cancel_the_torque_request() {
        let mut motor = RecordingMotor::default();
        motor.max_speed_erps = 340;
        TorqueSensor.apply(&drive(200, 0, 1.0, true), &mut motor);
        assert_eq!(motor.target_current_10b, 0);
    }
}
