mod spi;
mod uart;

pub use uart::UART_TIMEOUT_MS;

use log::{debug, warn};
use num_traits::FromPrimitive;

use super::forward::ForwardBuffer;
use super::{
    check_return_frame, place_checksum, FunctionCode, ProtocolError, Result, CMD_BUF_SIZE,
    HEADER_LEN, PREFIX0, PREFIX1, RET_BUF_SIZE,
};
use crate::adaptor::{Channel, McuAdaptor, ReadyTrigger};
use crate::extract::{self, SensorId, SpectrumInfo, WavelengthInfo, XyzInfo};

const RESET_HOLD_MS: u32 = 25;
const RESET_RELEASE_MS: u32 = 50;
const CMD_RETRY_INTERVAL_MS: u32 = 150;
const READY_POLL_MS: u32 = 1;

/// How many times a failing operation is repeated.
///
/// `Unbounded` keeps the sensor's contract of retrying until it answers: a
/// sensor that never does blocks the caller forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    Unbounded,
    /// Number of repeats after the first attempt.
    Limited(usize),
}

impl RetryPolicy {
    fn allows(self, retries_done: usize) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Limited(max) => retries_done < max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    /// Applies to commands sent with retry enabled.
    pub error_retry: RetryPolicy,
    /// Applies to the reset/hello handshake.
    pub wakeup: RetryPolicy,
    /// `None` waits for the ready trigger forever.
    pub ready_timeout_ms: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Active,
    Standby,
}

#[derive(Debug, Clone, Copy)]
struct SendOptions {
    keep_silent: bool,
    wait_ready_trigger: bool,
    error_retry: bool,
}

impl SendOptions {
    const SYNC: SendOptions = SendOptions {
        keep_silent: false,
        wait_ready_trigger: false,
        error_retry: true,
    };
    const ACQUIRE: SendOptions = SendOptions {
        keep_silent: true,
        wait_ready_trigger: true,
        error_retry: true,
    };
    const PROBE: SendOptions = SendOptions {
        keep_silent: true,
        wait_ready_trigger: false,
        error_retry: false,
    };
    const ONCE: SendOptions = SendOptions {
        keep_silent: false,
        wait_ready_trigger: false,
        error_retry: false,
    };
}

/// NSP32 protocol engine.
///
/// All calls block: commands with retry enabled and the wakeup handshake run
/// until the sensor answers correctly unless [`EngineConfig`] bounds them.
/// The engine owns its buffers and must stay on a single thread of control;
/// only the [`ReadyTrigger`] may be shared with an interrupt context.
pub struct Nsp32<A: McuAdaptor> {
    adaptor: A,
    channel: Channel,
    config: EngineConfig,

    state: Option<EngineState>,
    user_code: u8,
    async_code: FunctionCode,
    ready: ReadyTrigger,
    cmd_buf: [u8; CMD_BUF_SIZE],

    ret_size: usize,
    ret_buf: [u8; RET_BUF_SIZE],

    fwd: ForwardBuffer,
}

impl<A: McuAdaptor> Nsp32<A> {
    pub fn new(adaptor: A, channel: Channel) -> Self {
        Self::with_config(adaptor, channel, ReadyTrigger::new(), EngineConfig::default())
    }

    pub fn with_config(
        adaptor: A,
        channel: Channel,
        ready: ReadyTrigger,
        config: EngineConfig,
    ) -> Self {
        Self {
            adaptor,
            channel,
            config,
            state: None,
            user_code: 0,
            async_code: FunctionCode::Unknown,
            ready,
            cmd_buf: [0u8; CMD_BUF_SIZE],
            ret_size: 0,
            ret_buf: [0u8; RET_BUF_SIZE],
            fwd: ForwardBuffer::new(),
        }
    }

    pub fn adaptor(&self) -> &A {
        &self.adaptor
    }

    pub fn adaptor_mut(&mut self) -> &mut A {
        &mut self.adaptor
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// A handle to hand to whatever observes the sensor's ready line.
    pub fn ready_trigger(&self) -> ReadyTrigger {
        self.ready.clone()
    }

    pub fn init(&mut self) -> Result<()> {
        self.adaptor.init();
        self.wakeup()
    }

    pub fn state(&self) -> Option<EngineState> {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == Some(EngineState::Active)
    }

    /// The acquisition whose result has not been fetched yet.
    pub fn pending_async(&self) -> Option<FunctionCode> {
        self.async_code.fetch_code().map(|_| self.async_code)
    }

    /// Resets the sensor until it answers a hello probe.
    pub fn wakeup(&mut self) -> Result<()> {
        let mut retries = 0;

        loop {
            self.adaptor.reset_pin_low();
            self.adaptor.delay_millis(RESET_HOLD_MS);

            self.ready.clear();

            self.adaptor.reset_pin_high_then_input();
            self.adaptor.delay_millis(RESET_RELEASE_MS);

            let probe = self
                .wait_ready_trigger()
                .and_then(|_| self.send_cmd(FunctionCode::Hello, 0, SendOptions::PROBE));

            match probe {
                Ok(()) => break,
                Err(e) if self.config.wakeup.allows(retries) => {
                    warn!("wakeup attempt {} failed: {}", retries + 1, e);
                    retries += 1;
                }
                Err(e) => {
                    warn!("wakeup gave up: {}", e);
                    return Err(ProtocolError::WakeupFailed(Box::new(e)));
                }
            }
        }

        debug!("sensor active");
        self.state = Some(EngineState::Active);
        Ok(())
    }

    fn wait_ready_trigger(&mut self) -> Result<()> {
        let mut waited = 0;

        while !self.ready.is_fired() {
            if let Some(limit) = self.config.ready_timeout_ms {
                if waited >= limit {
                    return Err(ProtocolError::ReadyTimeout);
                }
            }
            self.adaptor.delay_millis(READY_POLL_MS);
            waited = waited.saturating_add(READY_POLL_MS);
        }

        Ok(())
    }

    fn ensure_active(&mut self) -> Result<()> {
        if !self.is_active() {
            self.wakeup()?;
        }
        Ok(())
    }

    pub fn hello(&mut self, user_code: u8) -> Result<()> {
        self.ensure_active()?;
        self.send_cmd(FunctionCode::Hello, user_code, SendOptions::SYNC)
    }

    /// Puts the sensor in standby. Without an active sensor the return packet
    /// is produced locally.
    pub fn standby(&mut self, user_code: u8) -> Result<()> {
        if !self.is_active() {
            self.ret_buf[..HEADER_LEN].copy_from_slice(&[
                PREFIX0,
                PREFIX1,
                FunctionCode::Standby as u8,
                user_code,
            ]);
            place_checksum(&mut self.ret_buf, HEADER_LEN);
            self.ret_size = FunctionCode::Standby.return_len();
            return Ok(());
        }

        let mut retries = 0;
        loop {
            match self.send_cmd(FunctionCode::Standby, user_code, SendOptions::ONCE) {
                Ok(()) => {
                    debug!("sensor in standby");
                    self.state = Some(EngineState::Standby);
                    return Ok(());
                }
                Err(e) if self.config.error_retry.allows(retries) => {
                    warn!("standby failed ({}), resetting sensor", e);
                    retries += 1;
                    self.wakeup()?;
                }
                Err(e) => return Err(ProtocolError::RetriesExhausted(Box::new(e))),
            }
        }
    }

    pub fn get_sensor_id(&mut self, user_code: u8) -> Result<()> {
        self.ensure_active()?;
        self.send_cmd(FunctionCode::GetSensorId, user_code, SendOptions::SYNC)
    }

    pub fn get_wavelength(&mut self, user_code: u8) -> Result<()> {
        self.ensure_active()?;
        self.send_cmd(FunctionCode::GetWavelength, user_code, SendOptions::SYNC)
    }

    /// Starts a spectrum acquisition. The result is fetched by
    /// [`Nsp32::update_status`] once the ready trigger fires.
    pub fn acq_spectrum(
        &mut self,
        user_code: u8,
        integration_time: u16,
        frame_avg: u8,
        enable_ae: bool,
    ) -> Result<()> {
        self.acquire(FunctionCode::AcqSpectrum, user_code, integration_time, frame_avg, enable_ae)
    }

    /// Starts an XYZ acquisition, see [`Nsp32::acq_spectrum`].
    pub fn acq_xyz(
        &mut self,
        user_code: u8,
        integration_time: u16,
        frame_avg: u8,
        enable_ae: bool,
    ) -> Result<()> {
        self.acquire(FunctionCode::AcqXyz, user_code, integration_time, frame_avg, enable_ae)
    }

    fn acquire(
        &mut self,
        code: FunctionCode,
        user_code: u8,
        integration_time: u16,
        frame_avg: u8,
        enable_ae: bool,
    ) -> Result<()> {
        self.ensure_active()?;

        self.cmd_buf[4..6].copy_from_slice(&integration_time.to_le_bytes());
        self.cmd_buf[6] = frame_avg;
        self.cmd_buf[7] = enable_ae as u8;
        self.cmd_buf[8] = 0; // no active return
        self.send_cmd(code, user_code, SendOptions::ACQUIRE)
    }

    /// Ready-line handler. Safe to call from an interrupt context through
    /// [`Nsp32::ready_trigger`].
    pub fn on_pin_ready_triggered(&self) {
        self.ready.fire();
    }

    /// Fetches a finished async result and dispatches a forwarded command, if
    /// any. Must be polled faster than acquisitions complete.
    pub fn update_status(&mut self) -> Result<()> {
        let fetched = match self.async_code.fetch_code() {
            Some(fetch) if self.ready.is_fired() => {
                let user_code = self.user_code;
                self.send_cmd(fetch, user_code, SendOptions::SYNC)
            }
            _ => Ok(()),
        };

        let forwarded = self.dispatch_forwarded();
        fetched.and(forwarded)
    }

    /// Feeds one byte received from an upstream controller.
    pub fn fwd_cmd_byte(&mut self, byte: u8) {
        self.fwd.feed(byte);
    }

    /// True while a forwarded frame waits for [`Nsp32::update_status`];
    /// bytes fed meanwhile are dropped.
    pub fn fwd_cmd_filled(&self) -> bool {
        self.fwd.is_filled()
    }

    fn dispatch_forwarded(&mut self) -> Result<()> {
        let len = match self.fwd.take() {
            Some(frame) => {
                self.cmd_buf[..frame.len()].copy_from_slice(frame);
                frame.len()
            }
            None => return Ok(()),
        };

        let cmd = self.cmd_buf;
        let user_code = cmd[3];
        debug!("dispatch forwarded {:02X?}", &cmd[..len]);

        match FunctionCode::from_u8(cmd[2]) {
            Some(FunctionCode::Hello) => self.hello(user_code),
            Some(FunctionCode::Standby) => self.standby(user_code),
            Some(FunctionCode::GetSensorId) => self.get_sensor_id(user_code),
            Some(FunctionCode::GetWavelength) => self.get_wavelength(user_code),
            Some(FunctionCode::AcqSpectrum) => self.acq_spectrum(
                user_code,
                u16::from_le_bytes([cmd[4], cmd[5]]),
                cmd[6],
                cmd[7] != 0,
            ),
            Some(FunctionCode::AcqXyz) => self.acq_xyz(
                user_code,
                u16::from_le_bytes([cmd[4], cmd[5]]),
                cmd[6],
                cmd[7] != 0,
            ),
            _ => Ok(()),
        }
    }

    fn send_cmd(&mut self, code: FunctionCode, user_code: u8, opts: SendOptions) -> Result<()> {
        let cmd_len = code.command_len();
        let ret_len = code.return_len();

        self.cmd_buf[..HEADER_LEN].copy_from_slice(&[PREFIX0, PREFIX1, code as u8, user_code]);
        place_checksum(&mut self.cmd_buf, cmd_len - 1);

        self.ret_size = 0;
        self.async_code = if opts.wait_ready_trigger {
            code
        } else {
            FunctionCode::Unknown
        };
        self.user_code = user_code;
        self.ready.clear();

        // some buses clock received bytes into the command buffer while sending
        let backup = self.cmd_buf;
        let mut retries = 0;

        loop {
            // some buses clock out the receive buffer while receiving
            self.ret_buf.fill(0);

            let ret = &mut self.ret_buf[..ret_len];
            let exchanged = match self.channel {
                Channel::Spi => spi::exchange(&mut self.adaptor, &mut self.cmd_buf[..cmd_len], ret),
                Channel::Uart => uart::exchange(&mut self.adaptor, &self.cmd_buf[..cmd_len], ret),
            };

            match exchanged.and_then(|_| check_return_frame(&self.ret_buf[..ret_len], code, user_code)) {
                Ok(()) => {
                    self.ret_size = if opts.keep_silent { 0 } else { ret_len };
                    return Ok(());
                }
                Err(e) if !opts.error_retry => {
                    debug!("{} failed: {}", code, e);
                    return Err(e);
                }
                Err(e) if self.config.error_retry.allows(retries) => {
                    warn!("{} failed ({}), retrying", code, e);
                    retries += 1;
                    self.cmd_buf[..cmd_len].copy_from_slice(&backup[..cmd_len]);
                    self.adaptor.delay_millis(CMD_RETRY_INTERVAL_MS);
                }
                Err(e) => {
                    warn!("{} failed ({}), giving up after {} retries", code, e, retries);
                    return Err(ProtocolError::RetriesExhausted(Box::new(e)));
                }
            }
        }
    }

    pub fn clear_return_packet(&mut self) {
        self.ret_size = 0;
    }

    /// 0 when no return packet is available.
    pub fn return_packet_size(&self) -> usize {
        self.ret_size
    }

    /// The last return packet, valid until the next command.
    pub fn return_packet(&self) -> Option<&[u8]> {
        match self.ret_size {
            0 => None,
            size => Some(&self.ret_buf[..size]),
        }
    }

    fn packet_or_empty(&self) -> &[u8] {
        self.return_packet().unwrap_or(&[])
    }

    pub fn extract_sensor_id(&self) -> SensorId {
        extract::sensor_id(self.packet_or_empty())
    }

    pub fn extract_wavelength_info(&self) -> WavelengthInfo<'_> {
        extract::wavelength_info(self.packet_or_empty())
    }

    pub fn extract_spectrum_info(&self) -> SpectrumInfo<'_> {
        extract::spectrum_info(self.packet_or_empty())
    }

    pub fn extract_xyz_info(&self) -> XyzInfo {
        extract::xyz_info(self.packet_or_empty())
    }
}
