//! Driver for the NSP32 spectral sensor.
//!
//! [`Nsp32`] speaks the sensor's framed command protocol over SPI or UART
//! through an [`McuAdaptor`], retries corrupted exchanges, fetches results of
//! asynchronous acquisitions once the ready line fires, and can relay raw
//! command frames from an upstream controller.

pub mod adaptor;
pub mod extract;
pub mod port;
pub mod protocol;
pub mod record;

pub use adaptor::{BaudRate, Channel, McuAdaptor, ReadyTrigger};
pub use protocol::master::{EngineConfig, EngineState, Nsp32, RetryPolicy};
pub use protocol::{FunctionCode, ProtocolError};
