//! Bus trait definitions

use super::timing::TimingParams;
use crate::error::{Error, Result};

/// Interval between ready/busy samples when no edge interrupt is available
pub const POLL_INTERVAL_US: u32 = 10;

/// Which latch a write cycle targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    /// CLE high: byte is an opcode
    Command,
    /// ALE high: byte is an address cycle
    Address,
    /// CLE and ALE low: byte is page data
    Data,
}

/// Cycle-level access to an 8-bit asynchronous NAND bus
///
/// Implementations own the pin sequencing and timing. They know nothing
/// about NAND opcodes; [`BusDriver`](super::BusDriver) builds the command
/// sequences on top.
///
/// Both strategies must be indistinguishable to callers: the same call
/// sequence produces the same bus cycles and returns the same bytes.
pub trait NandBus {
    /// Short strategy name for logging
    fn name(&self) -> &'static str;

    /// Assert (`true`) or release (`false`) CE#
    fn select(&mut self, active: bool);

    /// Clock bytes out through the given latch
    fn write(&mut self, latch: Latch, bytes: &[u8]) -> Result<()>;

    /// Clock bytes in with RE# pulses
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Sample the ready/busy line
    fn is_ready(&mut self) -> bool;

    /// Block for at least `us` microseconds
    fn delay_us(&mut self, us: u32);

    /// Current cycle timing
    fn timing(&self) -> TimingParams;

    /// Apply new cycle timing
    fn set_timing(&mut self, timing: TimingParams) -> Result<()>;

    /// Wait until R/B# reports ready
    ///
    /// The default implementation polls every [`POLL_INTERVAL_US`].
    /// Strategies with an edge interrupt on R/B# override this to sleep until
    /// the rising edge.
    fn wait_ready(&mut self, timeout_us: u32) -> Result<()> {
        let mut waited = 0u32;
        loop {
            if self.is_ready() {
                return Ok(());
            }
            if waited >= timeout_us {
                return Err(Error::BusTimeout);
            }
            self.delay_us(POLL_INTERVAL_US);
            waited = waited.saturating_add(POLL_INTERVAL_US);
        }
    }
}
