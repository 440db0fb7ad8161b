use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use hex::FromHex;
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

use nsp32_lib::record::AcqSettings;
use nsp32_lib::BaudRate;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid frame '{0}'")]
    BadFrame(String),
}

/// Hex bytes of a command frame without its checksum, optionally separated
/// by spaces, colons or dashes.
#[derive(Debug)]
pub struct HexFrame(Vec<u8>);

impl Deref for HexFrame {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for HexFrame {
    type Err = FrameError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref SEP: Regex = Regex::new(r"[\s:\-]").unwrap();
        }

        let digits = SEP.replace_all(input, "");
        let bytes =
            Vec::from_hex(digits.as_ref()).map_err(|_| FrameError::BadFrame(input.to_string()))?;

        if bytes.len() < 4 {
            return Err(FrameError::BadFrame(input.to_string()));
        }

        Ok(HexFrame(bytes))
    }
}

fn parse_with_radix<T>(input: &str) -> Result<T, T::FromStrRadixErr>
where
    T: num::Num,
    <T as num::Num>::FromStrRadixErr: std::error::Error + Send + Sync,
{
    if input.starts_with("0x") {
        T::from_str_radix(input.trim_start_matches("0x"), 16)
    } else if input.starts_with("0b") {
        T::from_str_radix(input.trim_start_matches("0b"), 2)
    } else {
        T::from_str_radix(input, 10)
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct AcqArgs {
    /// Integration time
    #[clap(long, short = 't', default_value_t = 32, parse(try_from_str=parse_with_radix))]
    pub integration_time: u16,

    /// Number of frames to average
    #[clap(long, short = 'a', default_value_t = 3, parse(try_from_str=parse_with_radix))]
    pub frame_avg: u8,

    /// Enable auto exposure
    #[clap(long, short = 'e')]
    pub auto_exposure: bool,

    /// Print a csv header and row instead
    #[clap(long)]
    pub csv: bool,
}

impl From<AcqArgs> for AcqSettings {
    fn from(args: AcqArgs) -> Self {
        AcqSettings {
            integration_time: args.integration_time,
            frame_avg: args.frame_avg,
            auto_exposure: args.auto_exposure,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// UART baud rate (9600, 19200, 38400 or 115200)
    #[clap(long, short, default_value = "115200")]
    pub baudrate: BaudRate,

    /// Retry count on packet errors, 0 retries forever
    #[clap(long, short, default_value_t = 0)]
    pub retries: usize,

    /// Give up waiting for the ready line after this many milliseconds
    #[clap(long)]
    pub ready_timeout: Option<u32>,

    /// User code echoed back by the sensor
    #[clap(long, short, default_value = "0", parse(try_from_str=parse_with_radix))]
    pub user_code: u8,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the sensor answers
    Hello,

    /// Put the sensor in standby
    Standby,

    /// Read the sensor id
    SensorId,

    /// Read the wavelength table
    Wavelength,

    /// Acquire a spectrum
    Spectrum(AcqArgs),

    /// Acquire XYZ tristimulus values
    Xyz(AcqArgs),

    /// Send a raw command frame, checksum is appended
    Raw { frame: HexFrame },

    /// Relay command frames from stdin, write return packets to stdout
    Forward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_frame() {
        let frame: HexFrame = "03 BB 26:01-6400030100".parse().unwrap();
        assert_eq!(*frame, vec![0x03, 0xBB, 0x26, 0x01, 0x64, 0x00, 0x03, 0x01, 0x00]);

        assert!("03 BB 2".parse::<HexFrame>().is_err());
        assert!("03BB".parse::<HexFrame>().is_err());
    }

    #[test]
    fn parse_radix() {
        assert_eq!(parse_with_radix::<u8>("0x2A").unwrap(), 42);
        assert_eq!(parse_with_radix::<u8>("0b101").unwrap(), 5);
        assert_eq!(parse_with_radix::<u16>("800").unwrap(), 800);
    }
}
