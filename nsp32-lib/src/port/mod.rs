#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod other;

#[cfg(target_os = "linux")]
use linux::is_port_open;
#[cfg(not(target_os = "linux"))]
use other::is_port_open;

pub use serialport::SerialPort;

use anyhow::Result;
use core::time::Duration;
use log::debug;
use serialport::{self, SerialPortType};
use thiserror::Error;

use crate::adaptor::BaudRate;

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("no compatible USB-UART bridge found")]
    NoCompatiblePort,
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
}

#[derive(PartialEq)]
struct UsbId(u16, u16);

static COMPATIBLE_IDS: &[UsbId] = &[
    UsbId(0x0403, 0x6001), // FTDI FT232R USB UART
    UsbId(0x0403, 0x6014), // FTDI FT232H Single HS USB-UART/FIFO IC
    UsbId(0x10c4, 0xea60), // Silicon Labs CP210x UART Bridge
    UsbId(0x1a86, 0x7523), // QinHeng Electronics HL-340 USB-Serial adapter
    UsbId(0x0483, 0x5740), // STMicroelectronics Virtual COM Port
];

pub fn open_port(
    port_name: &str,
    baudrate: BaudRate,
    force: bool,
) -> Result<Box<dyn SerialPort>> {
    let true_name: String = if port_name == "auto" {
        guess_port()?
    } else {
        port_name.to_string()
    };

    if !force && is_port_open(&true_name) {
        return Err(OpenPortError::PortBusy {
            port_name: true_name,
        }
        .into());
    }

    let port = serialport::new(&true_name, baudrate.bps())
        .timeout(Duration::from_millis(10))
        .open()?;

    debug!("open_port OK: {} @ {} baud", &true_name, baudrate);
    Ok(port)
}

fn guess_port() -> Result<String> {
    serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                COMPATIBLE_IDS.contains(&UsbId(usb_info.vid, usb_info.pid))
                    && !is_port_open(&info.port_name)
            }
            SerialPortType::Unknown
            | SerialPortType::PciPort
            | SerialPortType::BluetoothPort => false,
        })
        .map(|info| info.port_name)
        .next()
        .ok_or_else(|| OpenPortError::NoCompatiblePort.into())
}
