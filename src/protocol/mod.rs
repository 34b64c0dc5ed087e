//! LCD communication protocol: a fixed 12-byte status frame out every tick,
//! a fixed 13-byte configuration frame in whenever the rider changes a
//! setting on the handlebar unit.

pub mod frame;
pub mod transport;

pub use frame::{parse_config_frame, StatusReport, RX_FRAME_LEN, TX_FRAME_LEN};
pub use transport::FrameReceiver;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidChecksum,
    InvalidFrame,
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

/// Rider-adjustable settings mirrored from the LCD and persisted in EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcdConfig {
    /// 0..5 are defined; anything else assists like level 5
    pub assist_level: u8,
    /// motor rpm per volt x 16
    pub motor_characteristic: u8,
    /// 5-bit wheel size code, see the perimeter table
    pub wheel_size: u8,
    /// speed cap in km/h
    pub max_speed: u8,
    /// true: the speed loop only enforces the cap; false: cadence and
    /// throttle modulate the speed target as well
    pub power_assist_control_mode: bool,
    /// 0..10 index into the current-fraction table
    pub controller_max_current: u8,
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self {
            assist_level: config::DEFAULT_ASSIST_LEVEL,
            motor_characteristic: config::DEFAULT_MOTOR_CHARACTERISTIC,
            wheel_size: config::DEFAULT_WHEEL_SIZE,
            max_speed: config::DEFAULT_MAX_SPEED,
            power_assist_control_mode: config::DEFAULT_POWER_ASSIST_CONTROL_MODE,
            controller_max_current: config::DEFAULT_CONTROLLER_MAX_CURRENT,
        }
    }
}
