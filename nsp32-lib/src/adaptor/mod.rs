pub mod serial;

#[cfg(test)]
pub(crate) mod mock;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{fmt::Display, time::Duration};

use thiserror::Error;

pub use serial::SerialAdaptor;

/// Host MCU operations the engine needs. No protocol knowledge lives here.
///
/// Bus failures are not reported back: the engine judges every exchange by the
/// validity of the return packet alone.
pub trait McuAdaptor {
    fn init(&mut self);

    fn delay_micros(&mut self, us: u32);
    fn delay_millis(&mut self, ms: u32);

    /// Configure the reset line as output and drive it low.
    fn reset_pin_low(&mut self);
    /// Drive the reset line high, then release it.
    fn reset_pin_high_then_input(&mut self);

    /// Full-duplex buses may clock received bytes back into `buffer`.
    fn spi_send(&mut self, buffer: &mut [u8]);
    fn spi_receive(&mut self, buffer: &mut [u8]);

    fn uart_start_timer(&mut self);
    /// Milliseconds since the last [`McuAdaptor::uart_start_timer`].
    fn uart_millis_elapsed(&mut self) -> u32;
    fn uart_byte_available(&mut self) -> bool;
    fn uart_read_byte(&mut self) -> u8;
    fn uart_send(&mut self, buffer: &[u8]);
}

/// The "ready trigger" flag raised by the sensor's ready line.
///
/// Clones share one flag, so a handle can be moved into an interrupt handler
/// or a watcher thread while the engine keeps polling it.
#[derive(Clone, Debug, Default)]
pub struct ReadyTrigger(Arc<AtomicBool>);

impl ReadyTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Spi,
    Uart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    B9600 = 9600,
    B19200 = 19200,
    B38400 = 38400,
    B115200 = 115200,
}

impl BaudRate {
    pub const LOWEST: BaudRate = BaudRate::B9600;

    pub const fn bps(self) -> u32 {
        self as u32
    }

    /// Wire time of `bytes` at this rate, 8 bits per byte.
    pub const fn transfer_time(self, bytes: usize) -> Duration {
        Duration::from_millis(bytes as u64 * 8 * 1000 / self.bps() as u64)
    }
}

impl Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.bps().fmt(f)
    }
}

#[derive(Error, Debug)]
pub enum BaudRateError {
    #[error("unsupported baud rate '{0}'")]
    BadBaudRate(String),
}

impl FromStr for BaudRate {
    type Err = BaudRateError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "9600" => Ok(BaudRate::B9600),
            "19200" => Ok(BaudRate::B19200),
            "38400" => Ok(BaudRate::B38400),
            "115200" => Ok(BaudRate::B115200),
            _ => Err(BaudRateError::BadBaudRate(input.to_string())),
        }
    }
}
