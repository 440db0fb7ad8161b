use log::debug;

use crate::adaptor::McuAdaptor;
use crate::protocol::Result;

/// Time between the end of the command transfer and the start of the return
/// transfer.
const CMD_PROCESS_TIME_MS: u32 = 1;

pub(super) fn exchange<A: McuAdaptor>(adaptor: &mut A, cmd: &mut [u8], ret: &mut [u8]) -> Result<()> {
    debug!("spi send {:02X?}", cmd);
    adaptor.spi_send(cmd);
    adaptor.delay_millis(CMD_PROCESS_TIME_MS);
    adaptor.spi_receive(ret);
    debug!("spi recv {} bytes: {:02X?}", ret.len(), &ret[..ret.len().min(16)]);

    Ok(())
}
