//! Device backends for the chemistry controller.
//!
//! `sim` provides in-process relays, chlorinators and pool status for
//! development and the CLI's simulation mode. With the `hardware` feature,
//! `gpio` drives relays and reads switches on Raspberry Pi GPIO.
pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;
pub mod sim;
pub mod util;

pub use error::HwError;
#[cfg(feature = "hardware")]
pub use gpio::GpioTransport;
pub use sim::{SimChlorinators, SimPool, SimTransport};
