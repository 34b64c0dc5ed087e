//! Cruise control: hold the throttle steady long enough and the latched
//! value keeps driving the motor after the hand backs off.

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CruiseState {
    Idle,
    /// latched; the stored value drives the motor
    Hold,
    /// throttle released while latched, still driving on the stored value
    ArmedRelease,
}

pub struct CruiseControl {
    state: CruiseState,
    counter: u8,
    captured_value: u8,
    output: u8,
}

impl CruiseControl {
    pub const fn new() -> Self {
        Self {
            state: CruiseState::Idle,
            counter: 0,
            captured_value: 0,
            output: 0,
        }
    }

    /// Run one 100 ms step with the live throttle value and return the
    /// effective throttle.
    ///
    /// Arming needs the value above `CRUISE_CONTROL_MIN` and inside a
    /// `CRUISE_CONTROL_MIN`-wide window around the captured position for a
    /// little over 8 seconds.
    pub fn update(&mut self, wheel_speed_kmh: f32, value: u8) -> u8 {
        // too slow to latch, or to stay latched
        if wheel_speed_kmh < config::CRUISE_CONTROL_MIN_SPEED_KMH {
            self.state = CruiseState::Idle;
            self.counter = 0;
            return value;
        }

        match self.state {
            CruiseState::Idle => {
                let deviation =
                    (i16::from(value) - i16::from(self.captured_value)).unsigned_abs();
                if value > config::CRUISE_CONTROL_MIN
                    && deviation < u16::from(config::CRUISE_CONTROL_MIN)
                {
                    self.counter += 1;
                    self.output = value;

                    if self.counter > config::CRUISE_CONTROL_HOLD_TICKS {
                        self.state = CruiseState::Hold;
                        self.output = value;
                        self.counter = 0;
                        self.captured_value = 0;
                    }
                } else {
                    self.counter = 0;
                    self.captured_value = value;
                    self.output = self.captured_value;
                }
            }
            CruiseState::Hold => {
                if value < config::CRUISE_CONTROL_MIN {
                    self.state = CruiseState::ArmedRelease;
                }
            }
            CruiseState::ArmedRelease => {
                if value > config::CRUISE_CONTROL_MIN {
                    self.state = CruiseState::Idle;
                    self.output = value;
                }
            }
        }

        self.output
    }

    pub fn state(&self) -> CruiseState {
        self.state
    }

    pub fn is_set(&self) -> bool {
        self.state != CruiseState::Idle
    }

    /// Drop the latch, whatever the state. Wired to the brake lever.
    pub fn stop(&mut self) {
        self.state = CruiseState::Idle;
    }
}
