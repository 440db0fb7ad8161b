use log::debug;
use num_traits::FromPrimitive;

use super::{is_checksum_valid, FunctionCode, ProtocolError, Result, CMD_BUF_SIZE, PREFIX0, PREFIX1};

/// Accumulates raw protocol bytes coming from an upstream controller until a
/// complete, checksum-valid command frame is available.
///
/// While a frame is filled and not yet taken, further bytes are dropped.
#[derive(Debug)]
pub struct ForwardBuffer {
    buf: [u8; CMD_BUF_SIZE],
    write_idx: usize,
    frame_len: usize,
    filled: bool,
}

impl Default for ForwardBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; CMD_BUF_SIZE],
            write_idx: 0,
            frame_len: 0,
            filled: false,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Number of bytes of the frame currently being assembled.
    pub fn pending(&self) -> usize {
        self.write_idx
    }

    /// Feeds one byte. Returns `Ok(true)` when the byte completed a valid
    /// frame, and an error describing why buffered bytes were discarded.
    pub fn push(&mut self, byte: u8) -> Result<bool> {
        if self.filled {
            return Ok(false);
        }

        if ((self.write_idx == 0 && byte == PREFIX0) || self.write_idx > 0)
            && self.write_idx < CMD_BUF_SIZE
        {
            self.buf[self.write_idx] = byte;
            self.write_idx += 1;
        }

        if self.write_idx > 1 && self.buf[1] != PREFIX1 {
            self.write_idx = 0;
            return Err(ProtocolError::FrameDesync);
        }

        if self.write_idx <= 2 {
            return Ok(false);
        }

        let code = self.buf[2];
        self.frame_len = match FunctionCode::from_u8(code).and_then(FunctionCode::forward_len) {
            Some(len) => len,
            None => {
                self.write_idx = 0;
                return Err(ProtocolError::UnrecognizedFunctionCode(code));
            }
        };

        if self.write_idx < self.frame_len {
            return Ok(false);
        }

        self.write_idx = 0;
        if !is_checksum_valid(&self.buf[..self.frame_len]) {
            return Err(ProtocolError::ChecksumMismatch);
        }

        self.filled = true;
        Ok(true)
    }

    /// Same as [`ForwardBuffer::push`], with discarded frames only logged.
    pub fn feed(&mut self, byte: u8) {
        match self.push(byte) {
            Ok(true) => debug!("fwd frame: {:02X?}", &self.buf[..self.frame_len]),
            Ok(false) => (),
            Err(e) => debug!("fwd drop: {}", e),
        }
    }

    /// Hands out the filled frame and reopens the buffer for new bytes.
    pub fn take(&mut self) -> Option<&[u8]> {
        if !self.filled {
            return None;
        }

        self.filled = false;
        Some(&self.buf[..self.frame_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::place_checksum;

    fn acq_spectrum_frame() -> [u8; 10] {
        let mut frame = [PREFIX0, PREFIX1, 0x26, 0x05, 0x64, 0x00, 0x03, 0x01, 0x00, 0x00];
        place_checksum(&mut frame, 9);
        frame
    }

    #[test]
    fn accepts_valid_frame() {
        let frame = acq_spectrum_frame();
        let mut fwd = ForwardBuffer::new();

        let completed: Vec<bool> = frame.iter().map(|&b| fwd.push(b).unwrap()).collect();

        assert_eq!(completed.iter().filter(|&&c| c).count(), 1);
        assert!(completed[9]);
        assert!(fwd.is_filled());
        assert_eq!(fwd.take(), Some(&frame[..]));
        assert!(!fwd.is_filled());
        assert_eq!(fwd.take(), None);
    }

    #[test]
    fn drops_corrupted_frame() {
        let mut frame = acq_spectrum_frame();
        frame[6] ^= 0x01;
        let mut fwd = ForwardBuffer::new();

        for &b in &frame[..9] {
            assert_eq!(fwd.push(b), Ok(false));
        }
        assert_eq!(fwd.push(frame[9]), Err(ProtocolError::ChecksumMismatch));
        assert!(!fwd.is_filled());
        assert_eq!(fwd.pending(), 0);
    }

    #[test]
    fn resyncs_after_bad_prefix() {
        let mut hello = [PREFIX0, PREFIX1, 0x01, 0x11, 0x00];
        place_checksum(&mut hello, 4);
        let mut fwd = ForwardBuffer::new();

        assert_eq!(fwd.push(0x55), Ok(false));
        assert_eq!(fwd.pending(), 0);
        assert_eq!(fwd.push(PREFIX0), Ok(false));
        assert_eq!(fwd.push(0x42), Err(ProtocolError::FrameDesync));
        assert_eq!(fwd.pending(), 0);

        for &b in &hello {
            fwd.feed(b);
        }
        assert_eq!(fwd.take(), Some(&hello[..]));
    }

    #[test]
    fn drops_unknown_function_code() {
        let mut fwd = ForwardBuffer::new();

        fwd.push(PREFIX0).unwrap();
        fwd.push(PREFIX1).unwrap();
        assert_eq!(
            fwd.push(0x28),
            Err(ProtocolError::UnrecognizedFunctionCode(0x28))
        );
        assert_eq!(fwd.pending(), 0);
    }

    #[test]
    fn rejects_bytes_while_filled() {
        let mut hello = [PREFIX0, PREFIX1, 0x01, 0x11, 0x00];
        place_checksum(&mut hello, 4);
        let mut fwd = ForwardBuffer::new();

        hello.iter().for_each(|&b| fwd.feed(b));
        assert!(fwd.is_filled());

        let mut standby = [PREFIX0, PREFIX1, 0x04, 0x12, 0x00];
        place_checksum(&mut standby, 4);
        standby.iter().for_each(|&b| fwd.feed(b));

        assert_eq!(fwd.pending(), 0);
        assert_eq!(fwd.take(), Some(&hello[..]));
    }
}
