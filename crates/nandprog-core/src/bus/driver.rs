//! NAND command sequences over a bus strategy

use alloc::{vec, vec::Vec};

use super::timing::{AutotuneConfig, TimingParams};
use super::traits::{Latch, NandBus};
use crate::chip::ChipProfile;
use crate::error::{Error, Result};
use crate::nand::{self, Address, Status, ID_LEN};

/// Upper bounds on R/B# busy time per operation, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyTimeouts {
    /// After RESET and READ ID
    pub reset_us: u32,
    /// Array-to-register transfer of a page read
    pub read_us: u32,
    /// Page program
    pub program_us: u32,
    /// Block erase
    pub erase_us: u32,
}

impl Default for ReadyTimeouts {
    fn default() -> Self {
        Self {
            reset_us: 1_000_000,
            read_us: 5_000_000,
            program_us: 5_000_000,
            erase_us: 10_000_000,
        }
    }
}

/// Page, block and ID transactions on top of a [`NandBus`]
///
/// Every public transaction asserts CE# for its duration and releases it
/// on every exit path.
pub struct BusDriver<B: NandBus> {
    bus: B,
    timeouts: ReadyTimeouts,
}

impl<B: NandBus> BusDriver<B> {
    /// Wrap a bus with default ready timeouts
    pub fn new(bus: B) -> Self {
        Self::with_timeouts(bus, ReadyTimeouts::default())
    }

    /// Wrap a bus with explicit ready timeouts
    pub fn with_timeouts(bus: B, timeouts: ReadyTimeouts) -> Self {
        Self { bus, timeouts }
    }

    /// Access the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Access the underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Current ready timeouts
    pub fn timeouts(&self) -> ReadyTimeouts {
        self.timeouts
    }

    /// Release the bus (CE# deasserted)
    pub fn into_inner(mut self) -> B {
        self.bus.select(false);
        self.bus
    }

    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.bus.select(true);
        let result = f(self);
        self.bus.select(false);
        result
    }

    /// Latch one opcode (CE# must already be asserted)
    pub fn send_command(&mut self, opcode: u8) -> Result<()> {
        self.bus.write(Latch::Command, &[opcode])
    }

    /// Latch address cycles (CE# must already be asserted)
    pub fn send_address(&mut self, bytes: &[u8]) -> Result<()> {
        self.bus.write(Latch::Address, bytes)
    }

    /// Wait for R/B# with an explicit bound
    pub fn wait_ready(&mut self, timeout_us: u32) -> Result<()> {
        self.bus.wait_ready(timeout_us)
    }

    /// RESET the die
    pub fn reset(&mut self) -> Result<()> {
        let timeout = self.timeouts.reset_us;
        self.transaction(|d| {
            d.send_command(nand::RESET)?;
            d.wait_ready(timeout)
        })
    }

    /// READ ID
    pub fn read_id(&mut self) -> Result<[u8; ID_LEN]> {
        let timeout = self.timeouts.reset_us;
        self.transaction(|d| {
            d.wait_ready(timeout)?;
            d.send_command(nand::READ_ID)?;
            d.send_address(Address::id().as_bytes())?;
            let mut id = [0u8; ID_LEN];
            d.bus.read(&mut id)?;
            Ok(id)
        })
    }

    /// READ STATUS
    pub fn read_status(&mut self) -> Result<Status> {
        self.transaction(|d| d.status())
    }

    fn status(&mut self) -> Result<Status> {
        self.send_command(nand::READ_STATUS)?;
        let mut raw = [0u8; 1];
        self.bus.read(&mut raw)?;
        Ok(Status::from_bits_retain(raw[0]))
    }

    fn check_page(profile: &ChipProfile, page: u32, len: usize) -> Result<()> {
        if page >= profile.total_pages() || len > profile.page_total_size() as usize {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(())
    }

    /// Read the first `buf.len()` bytes of a page (main area then OOB)
    pub fn read_page_into(&mut self, profile: &ChipProfile, page: u32, buf: &mut [u8]) -> Result<()> {
        Self::check_page(profile, page, buf.len())?;
        let timeout = self.timeouts.read_us;
        self.transaction(|d| {
            d.send_command(nand::READ_1ST)?;
            d.send_address(Address::page(profile, page, 0).as_bytes())?;
            d.send_command(nand::READ_2ND)?;
            d.wait_ready(timeout)?;
            d.bus.read(buf)
        })
    }

    /// Read a page including its OOB area
    pub fn read_page(&mut self, profile: &ChipProfile, page: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; profile.page_total_size() as usize];
        self.read_page_into(profile, page, &mut buf)?;
        Ok(buf)
    }

    /// Program a page (main area then OOB) and check the status register
    pub fn write_page(&mut self, profile: &ChipProfile, page: u32, data: &[u8]) -> Result<()> {
        Self::check_page(profile, page, data.len())?;
        let timeout = self.timeouts.program_us;
        self.transaction(|d| {
            d.send_command(nand::PROGRAM_1ST)?;
            d.send_address(Address::page(profile, page, 0).as_bytes())?;
            d.bus.write(Latch::Data, data)?;
            d.send_command(nand::PROGRAM_2ND)?;
            d.wait_ready(timeout)?;
            if d.status()?.failed() {
                return Err(Error::ProgramFailed { page });
            }
            Ok(())
        })
    }

    /// Erase a block and check the status register
    pub fn erase_block(&mut self, profile: &ChipProfile, block: u32) -> Result<()> {
        if block >= profile.block_count {
            return Err(Error::AddressOutOfBounds);
        }
        let timeout = self.timeouts.erase_us;
        self.transaction(|d| {
            d.send_command(nand::ERASE_1ST)?;
            d.send_address(Address::block(profile, block).as_bytes())?;
            d.send_command(nand::ERASE_2ND)?;
            d.wait_ready(timeout)?;
            if d.status()?.failed() {
                return Err(Error::EraseFailed { block });
            }
            Ok(())
        })
    }

    /// Search for the fastest timing that still reads back consistently
    ///
    /// A reference READ ID and page read are taken at [`TimingParams::SAFE`].
    /// Each trial shortens the cycle times and repeats both reads; the last
    /// setting whose reads match the reference is kept. If the reference
    /// reads fail the bus stays at the safe timing.
    pub fn autotune(&mut self, profile: &ChipProfile, config: &AutotuneConfig) -> TimingParams {
        let safe = TimingParams::SAFE;
        if let Err(e) = self.bus.set_timing(safe) {
            log::warn!("bus: cannot apply safe timing: {}", e);
            return self.bus.timing();
        }

        let reference = match (self.read_id(), self.read_page(profile, config.probe_page)) {
            (Ok(id), Ok(page)) => (id, page),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("bus: autotune reference read failed ({}), keeping safe timing", e);
                return safe;
            }
        };

        let mut best = safe;
        let mut candidate = safe;
        for trial in 0..config.max_trials {
            candidate = match candidate.faster(config.step_ns) {
                Some(next) => next,
                None => break,
            };
            if self.bus.set_timing(candidate).is_err() {
                break;
            }
            let passed = matches!(self.read_id(), Ok(id) if id == reference.0)
                && matches!(self.read_page(profile, config.probe_page), Ok(ref page) if *page == reference.1);
            log::debug!("bus: autotune trial {} tRC={}ns: {}", trial, candidate.t_rc_ns, if passed { "pass" } else { "fail" });
            if !passed {
                break;
            }
            best = candidate;
        }

        if self.bus.set_timing(best).is_err() {
            let _ = self.bus.set_timing(safe);
            return safe;
        }
        log::info!(
            "bus: autotune settled on tWC={}ns tRC={}ns tREA={}ns",
            best.t_wc_ns,
            best.t_rc_ns,
            best.t_rea_ns
        );
        best
    }
}
