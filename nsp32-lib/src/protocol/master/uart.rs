use log::debug;

use crate::adaptor::{BaudRate, McuAdaptor};
use crate::protocol::{ProtocolError, Result, RET_BUF_SIZE};

/// Twice the wire time of the largest return frame at the lowest baud rate.
pub const UART_TIMEOUT_MS: u32 =
    2 * BaudRate::LOWEST.transfer_time(RET_BUF_SIZE).as_millis() as u32;

pub(super) fn exchange<A: McuAdaptor>(adaptor: &mut A, cmd: &[u8], ret: &mut [u8]) -> Result<()> {
    let mut stale = 0usize;
    while adaptor.uart_byte_available() {
        adaptor.uart_read_byte();
        stale += 1;
    }
    if stale > 0 {
        debug!("uart flushed {} stale bytes", stale);
    }

    debug!("uart send {:02X?}", cmd);
    adaptor.uart_send(cmd);
    adaptor.uart_start_timer();

    let mut write_idx = 0;
    while write_idx < ret.len() {
        if adaptor.uart_millis_elapsed() > UART_TIMEOUT_MS {
            debug!("uart timeout after {} of {} bytes", write_idx, ret.len());
            return Err(ProtocolError::TransportTimeout);
        }

        while write_idx < ret.len() && adaptor.uart_byte_available() {
            ret[write_idx] = adaptor.uart_read_byte();
            write_idx += 1;
        }
    }

    debug!("uart recv {} bytes: {:02X?}", ret.len(), &ret[..ret.len().min(16)]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_bound() {
        assert_eq!(UART_TIMEOUT_MS, 940);
    }
}
