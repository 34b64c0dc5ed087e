//! Debug console on the secondary UART, enabled with the `debug` feature.

use ufmt::{uwriteln, uWrite};

use crate::protocol::LcdConfig;

pub struct DebugConsole<W> {
    writer: W,
}

impl<W: uWrite> DebugConsole<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// One status line per tick. Output is best effort; a wedged debug
    /// port must never stall the control loop.
    pub fn log_tick(&mut self, speed_kmh: u8, cadence_rpm: u8, target_current_10b: u16) {
        uwriteln!(
            &mut self.writer,
            "spd={} cad={} cur={}",
            speed_kmh,
            cadence_rpm,
            target_current_10b
        )
        .ok();
    }

    pub fn log_config(&mut self, config: &LcdConfig) {
        uwriteln!(
            &mut self.writer,
            "cfg assist={} char={} wheel={} vmax={} p3={} imax={}",
            config.assist_level,
            config.motor_characteristic,
            config.wheel_size,
            config.max_speed,
            config.power_assist_control_mode as u8,
            config.controller_max_current
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Default)]
    struct StringWriter(String);

    impl uWrite for StringWriter {
        type Error = Infallible;

        fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
            self.0.push_str(s);
            Ok(())
        }
    }

    #[test]
    fn formats_a_tick_line() {
        let mut console = DebugConsole::new(StringWriter::default());
        console.log_tick(25, 60, 48);
        assert_eq!(console.writer.0, "spd=25 cad=60 cur=48\n");
    }

    #[test]
    fn formats_a_config_line() {
        let mut console = DebugConsole::new(StringWriter::default());
        console.log_config(&LcdConfig::default());
        assert_eq!(
            console.writer.0,
            "cfg assist=2 char=202 wheel=20 vmax=25 p3=1 imax=10\n"
        );
    }
}
