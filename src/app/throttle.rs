//! Throttle conditioning: ADC remap, smoothing, release detection.

use crate::config;
use crate::util::map;

pub struct Throttle {
    /// 4-sample running sum feeding the low-pass filter
    accumulated: u16,
    adc_value: u8,
    mapped: u8,
    filtered: u8,
}

impl Throttle {
    pub const fn new() -> Self {
        Self {
            accumulated: 0,
            adc_value: 0,
            mapped: 0,
            filtered: 0,
        }
    }

    /// Take one ADC reading: remap the usable electrical range onto 0..255
    /// and run the exponential moving average over it.
    pub fn update(&mut self, adc_value: u8) {
        self.adc_value = adc_value;
        self.mapped = map(
            u32::from(adc_value),
            u32::from(config::ADC_THROTTLE_MIN_VALUE),
            u32::from(config::ADC_THROTTLE_MAX_VALUE),
            u32::from(config::THROTTLE_MIN_VALUE),
            u32::from(config::THROTTLE_MAX_VALUE),
        ) as u8;

        self.accumulated -= self.accumulated >> 2;
        self.accumulated += u16::from(self.mapped);
        self.filtered = (self.accumulated >> 2) as u8;
    }

    pub fn mapped(&self) -> u8 {
        self.mapped
    }

    pub fn filtered(&self) -> u8 {
        self.filtered
    }

    /// Fully backed off. Judged on the remapped value, so the flag clears
    /// only once the mapped position climbs past the same threshold.
    pub fn is_released(&self) -> bool {
        self.mapped <= config::ADC_THROTTLE_MIN_VALUE
    }

    /// Raw reading above the dead zone, for the LCD moving indication
    pub fn is_set(&self) -> bool {
        self.adc_value > config::ADC_THROTTLE_MIN_VALUE
    }
}
