use std::env;

fn main() {
    let target = env::var("TARGET").unwrap_or_default();

    // AVR link configuration; host builds (unit tests) skip it
    if target.contains("avr") {
        println!("cargo:rustc-link-arg=-mmcu=atmega128");

        // Pass CPU frequency for timing calculations
        println!("cargo:rustc-env=MCU_FREQ_HZ=16000000");
    }
}
