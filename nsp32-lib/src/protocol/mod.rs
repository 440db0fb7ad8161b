pub mod forward;
pub mod master;

use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt::Display;
use thiserror::Error;

pub const PREFIX0: u8 = 0x03;
pub const PREFIX1: u8 = 0xBB;

/// Header length shared by command and return frames.
pub const HEADER_LEN: usize = 4;

/// Number of wavelength points reported by the sensor.
pub const NUM_POINTS: usize = 135;

pub const CMD_BUF_SIZE: usize = 20;
/// Largest return frame (GetSpectrum).
pub const RET_BUF_SIZE: usize = 12 + NUM_POINTS * 4 + 12 + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    Unknown = 0x00,
    Hello = 0x01,
    Standby = 0x04,
    GetSensorId = 0x06,
    GetWavelength = 0x24,
    AcqSpectrum = 0x26,
    GetSpectrum = 0x28,
    AcqXyz = 0x2A,
    GetXyz = 0x2C,
}

impl FunctionCode {
    /// Total command frame length, checksum included.
    pub fn command_len(self) -> usize {
        match self {
            FunctionCode::AcqSpectrum | FunctionCode::AcqXyz => HEADER_LEN + 5 + 1,
            _ => HEADER_LEN + 1,
        }
    }

    /// Total return frame length, checksum included.
    pub fn return_len(self) -> usize {
        match self {
            FunctionCode::GetSensorId => HEADER_LEN + 5 + 1,
            FunctionCode::GetWavelength => 8 + NUM_POINTS * 2 + 1,
            FunctionCode::GetSpectrum => RET_BUF_SIZE,
            FunctionCode::GetXyz => 8 + 12 + 1,
            _ => HEADER_LEN + 1,
        }
    }

    /// Length of a frame an upstream controller may forward, i.e. the codes
    /// that map onto a public command method.
    pub fn forward_len(self) -> Option<usize> {
        match self {
            FunctionCode::Hello
            | FunctionCode::Standby
            | FunctionCode::GetSensorId
            | FunctionCode::GetWavelength
            | FunctionCode::AcqSpectrum
            | FunctionCode::AcqXyz => Some(self.command_len()),
            _ => None,
        }
    }

    /// The fetch command that retrieves the result of an async acquisition.
    pub fn fetch_code(self) -> Option<FunctionCode> {
        match self {
            FunctionCode::AcqSpectrum => Some(FunctionCode::GetSpectrum),
            FunctionCode::AcqXyz => Some(FunctionCode::GetXyz),
            _ => None,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, *self as u8)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("return packet checksum mismatch")]
    ChecksumMismatch,
    #[error("return packet header mismatch")]
    HeaderMismatch,
    #[error("timed out waiting for return packet")]
    TransportTimeout,
    #[error("frame prefix mismatch")]
    FrameDesync,
    #[error("unrecognized function code 0x{0:02X}")]
    UnrecognizedFunctionCode(u8),
    #[error("retry limit reached")]
    RetriesExhausted(#[source] Box<ProtocolError>),
    #[error("sensor did not pass the wakeup check")]
    WakeupFailed(#[source] Box<ProtocolError>),
    #[error("timed out waiting for ready trigger")]
    ReadyTimeout,
}

impl ProtocolError {
    /// The failure that ended the last attempt, with retry wrappers removed.
    pub fn kind(&self) -> &ProtocolError {
        match self {
            ProtocolError::RetriesExhausted(last) | ProtocolError::WakeupFailed(last) => {
                last.kind()
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

fn modular_sum(buffer: &[u8]) -> u8 {
    buffer.iter().fold(0u8, |x, &y| x.wrapping_add(y))
}

/// Computes the checksum over `buffer[..len]` and stores it at `buffer[len]`.
pub fn place_checksum(buffer: &mut [u8], len: usize) {
    buffer[len] = modular_sum(&buffer[..len]).wrapping_neg();
}

/// `buffer` must include the trailing checksum byte.
pub fn is_checksum_valid(buffer: &[u8]) -> bool {
    modular_sum(buffer) == 0
}

/// Validates a return frame against the command that produced it.
pub fn check_return_frame(
    buffer: &[u8],
    code: FunctionCode,
    user_code: u8,
) -> Result<()> {
    if buffer.len() < HEADER_LEN + 1
        || buffer[..HEADER_LEN] != [PREFIX0, PREFIX1, code as u8, user_code]
    {
        return Err(ProtocolError::HeaderMismatch);
    }

    if !is_checksum_valid(buffer) {
        return Err(ProtocolError::ChecksumMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn checksum_hello() {
        let mut check = [PREFIX0, PREFIX1, 0x01, 0x00, 0x00];
        place_checksum(&mut check, 4);

        assert_eq!(check, [0x03, 0xBB, 0x01, 0x00, 0x41]);
        assert!(is_checksum_valid(&check));
    }

    #[test]
    fn checksum_wraps() {
        let mut check = [0xFF, 0xFF, 0xFF, 0x00];
        place_checksum(&mut check, 3);

        assert_eq!(check[3], 0x03);
        assert!(is_checksum_valid(&check));
    }

    #[test]
    fn checksum_rejects_corruption() {
        let mut check = [PREFIX0, PREFIX1, 0x26, 0x07, 0x64, 0x00, 0x03, 0x01, 0x00, 0x00];
        place_checksum(&mut check, 9);
        assert!(is_checksum_valid(&check));

        for i in 0..check.len() {
            let mut corrupted = check;
            corrupted[i] ^= 0x10;
            assert!(!is_checksum_valid(&corrupted), "byte {} not covered", i);
        }
    }

    #[test]
    fn return_frame_header() {
        let mut frame = [PREFIX0, PREFIX1, 0x04, 0x09, 0x00];
        place_checksum(&mut frame, 4);

        assert_eq!(check_return_frame(&frame, FunctionCode::Standby, 0x09), Ok(()));
        assert_eq!(
            check_return_frame(&frame, FunctionCode::Standby, 0x0A),
            Err(ProtocolError::HeaderMismatch)
        );
        assert_eq!(
            check_return_frame(&frame, FunctionCode::Hello, 0x09),
            Err(ProtocolError::HeaderMismatch)
        );

        frame[4] ^= 1;
        assert_eq!(
            check_return_frame(&frame, FunctionCode::Standby, 0x09),
            Err(ProtocolError::ChecksumMismatch)
        );
    }

    #[test]
    fn frame_lengths() {
        assert_eq!(RET_BUF_SIZE, 565);
        assert_eq!(FunctionCode::GetWavelength.return_len(), 279);
        assert_eq!(FunctionCode::GetXyz.return_len(), 21);
        assert_eq!(FunctionCode::AcqXyz.command_len(), 10);
        assert_eq!(FunctionCode::AcqXyz.forward_len(), Some(10));
        assert_eq!(FunctionCode::GetSpectrum.forward_len(), None);
        assert_eq!(FunctionCode::from_u8(0x2A), Some(FunctionCode::AcqXyz));
        assert_eq!(FunctionCode::from_u8(0x02), None);
    }
}
