use std::collections::VecDeque;

use num_traits::FromPrimitive;

use super::{McuAdaptor, ReadyTrigger};
use crate::protocol::{place_checksum, FunctionCode, HEADER_LEN};

/// Scripted adaptor for engine tests.
///
/// Queued replies are served first; an empty reply means the sensor stays
/// silent. With the queue drained, a valid zero-payload frame echoing the last
/// command header is produced.
#[derive(Debug, Default)]
pub struct MockAdaptor {
    pub trigger: Option<ReadyTrigger>,
    pub replies: VecDeque<Vec<u8>>,
    /// Bytes clocked back into the command buffer during `spi_send`.
    pub spi_garbage: Option<u8>,
    /// Milliseconds of delays between reset release and the ready trigger.
    pub ready_after_ms: u32,

    pub sent: Vec<Vec<u8>>,
    pub delays_ms: Vec<u32>,
    pub resets: usize,
    pub initialized: bool,

    pub rx: VecDeque<u8>,
    clock_ms: u32,
    ready_countdown: Option<u32>,
    last_cmd: Vec<u8>,
}

impl MockAdaptor {
    pub fn new(trigger: ReadyTrigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Default::default()
        }
    }

    pub fn queue(&mut self, reply: &[u8]) {
        self.replies.push_back(reply.to_vec());
    }

    pub fn sent_codes(&self) -> Vec<u8> {
        self.sent.iter().map(|cmd| cmd[2]).collect()
    }

    fn next_reply(&mut self, len: usize) -> Vec<u8> {
        if let Some(reply) = self.replies.pop_front() {
            return reply;
        }

        let mut reply = vec![0u8; len];
        reply[..HEADER_LEN].copy_from_slice(&self.last_cmd[..HEADER_LEN]);
        place_checksum(&mut reply, len - 1);
        reply
    }
}

impl McuAdaptor for MockAdaptor {
    fn init(&mut self) {
        self.initialized = true;
    }

    fn delay_micros(&mut self, _us: u32) {}

    fn delay_millis(&mut self, ms: u32) {
        self.clock_ms = self.clock_ms.wrapping_add(ms);
        self.delays_ms.push(ms);

        if let Some(left) = self.ready_countdown {
            let left = left.saturating_sub(ms);
            self.ready_countdown = Some(left);
            if left == 0 {
                self.ready_countdown = None;
                self.trigger.iter().for_each(ReadyTrigger::fire);
            }
        }
    }

    fn reset_pin_low(&mut self) {
        self.resets += 1;
    }

    fn reset_pin_high_then_input(&mut self) {
        match self.ready_after_ms {
            0 => self.trigger.iter().for_each(ReadyTrigger::fire),
            ms => self.ready_countdown = Some(ms),
        }
    }

    fn spi_send(&mut self, buffer: &mut [u8]) {
        self.sent.push(buffer.to_vec());
        self.last_cmd = buffer.to_vec();
        if let Some(garbage) = self.spi_garbage {
            buffer.iter_mut().for_each(|b| *b = garbage);
        }
    }

    fn spi_receive(&mut self, buffer: &mut [u8]) {
        let reply = self.next_reply(buffer.len());
        let n = reply.len().min(buffer.len());
        buffer[..n].copy_from_slice(&reply[..n]);
    }

    fn uart_start_timer(&mut self) {
        self.clock_ms = 0;
    }

    fn uart_millis_elapsed(&mut self) -> u32 {
        self.clock_ms += 1;
        self.clock_ms
    }

    fn uart_byte_available(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn uart_read_byte(&mut self) -> u8 {
        self.rx.pop_front().unwrap_or(0)
    }

    fn uart_send(&mut self, buffer: &[u8]) {
        self.sent.push(buffer.to_vec());
        self.last_cmd = buffer.to_vec();

        let len = FunctionCode::from_u8(buffer[2])
            .map(FunctionCode::return_len)
            .unwrap_or(HEADER_LEN + 1);
        let reply = self.next_reply(len);
        self.rx.extend(reply);
    }
}
