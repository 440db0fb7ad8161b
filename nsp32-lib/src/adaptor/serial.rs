use std::fmt::Display;
use std::io::{Read, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};
use serialport::{ClearBuffer, SerialPort};

use super::{BaudRate, McuAdaptor, ReadyTrigger};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Drives the sensor's UART from a host through a USB-UART bridge.
///
/// The reset line is wired to DTR and the ready line to CTS. Bridges invert
/// DTR, so asserting it pulls reset low. SPI is not available.
pub struct SerialAdaptor {
    port: Box<dyn SerialPort>,
    baudrate: BaudRate,
    timer: Instant,
}

fn log_err<T, E: Display>(res: std::result::Result<T, E>, what: &str) -> Option<T> {
    res.map_err(|e| warn!("{} failed: {}", what, e)).ok()
}

impl SerialAdaptor {
    pub fn new(port: Box<dyn SerialPort>, baudrate: BaudRate) -> Self {
        Self {
            port,
            baudrate,
            timer: Instant::now(),
        }
    }

    /// Fires `trigger` on every rising edge of CTS until the port goes away.
    pub fn watch_ready_line(&self, trigger: ReadyTrigger) -> Result<JoinHandle<()>> {
        let mut line = self.port.try_clone()?;

        Ok(thread::spawn(move || {
            let mut last = false;
            loop {
                match line.read_clear_to_send() {
                    Ok(level) => {
                        if level && !last {
                            debug!("ready trigger");
                            trigger.fire();
                        }
                        last = level;
                    }
                    Err(e) => {
                        warn!("ready line watch stopped: {}", e);
                        return;
                    }
                }
                thread::sleep(READY_POLL_INTERVAL);
            }
        }))
    }
}

impl McuAdaptor for SerialAdaptor {
    fn init(&mut self) {
        log_err(self.port.set_baud_rate(self.baudrate.bps()), "set baud rate");
        log_err(self.port.clear(ClearBuffer::All), "clear buffers");
    }

    fn delay_micros(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(us.into()));
    }

    fn delay_millis(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }

    fn reset_pin_low(&mut self) {
        log_err(self.port.write_data_terminal_ready(true), "reset low");
    }

    fn reset_pin_high_then_input(&mut self) {
        log_err(self.port.write_data_terminal_ready(false), "reset release");
    }

    fn spi_send(&mut self, _buffer: &mut [u8]) {
        warn!("spi is not available on a serial adaptor");
    }

    fn spi_receive(&mut self, buffer: &mut [u8]) {
        warn!("spi is not available on a serial adaptor");
        buffer.fill(0);
    }

    fn uart_start_timer(&mut self) {
        self.timer = Instant::now();
    }

    fn uart_millis_elapsed(&mut self) -> u32 {
        self.timer.elapsed().as_millis() as u32
    }

    fn uart_byte_available(&mut self) -> bool {
        log_err(self.port.bytes_to_read(), "bytes to read").map_or(false, |n| n > 0)
    }

    fn uart_read_byte(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        log_err(self.port.read_exact(&mut byte), "uart read");
        byte[0]
    }

    fn uart_send(&mut self, buffer: &[u8]) {
        log_err(self.port.write_all(buffer), "uart write");
        log_err(self.port.flush(), "uart flush");
    }
}
