use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait until `done` returns true or `timeout` expires. Sleeps in small
/// intervals to avoid CPU spinning.
pub fn wait_until_with_timeout(
    mut done: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() >= deadline {
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}

/// Parse a GPIO binding such as `gpio:17` into its BCM pin number.
pub fn parse_gpio_binding(binding: &str) -> Result<u8> {
    let pin = binding
        .trim()
        .strip_prefix("gpio:")
        .ok_or_else(|| HwError::UnknownBinding(binding.to_string()))?;
    pin.trim()
        .parse::<u8>()
        .ok()
        .filter(|p| *p <= 27)
        .ok_or_else(|| HwError::UnknownBinding(binding.to_string()))
}
