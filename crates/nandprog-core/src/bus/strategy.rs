//! Strategy selection between the accelerated and direct paths

use super::accelerated::{AcceleratedBus, TransferEngine};
use super::bitbang::{BitbangBus, BitbangNandPins};
use super::timing::TimingParams;
use super::traits::{Latch, NandBus};
use crate::error::Result;

/// The bus strategy chosen at session start
pub enum BusStrategy<E: TransferEngine, P: BitbangNandPins> {
    /// Transfer engine is up
    Accelerated(AcceleratedBus<E>),
    /// Engine failed to initialize; toggling pins directly
    Direct(BitbangBus<P>),
}

impl<E: TransferEngine, P: BitbangNandPins> BusStrategy<E, P> {
    /// Try the accelerated path first, fall back to direct toggling
    pub fn init(engine: E, pins: P, timing: TimingParams) -> Self {
        match AcceleratedBus::new(engine, timing) {
            Ok(bus) => {
                log::info!("bus: using accelerated transfer engine");
                Self::Accelerated(bus)
            }
            Err(e) => {
                log::warn!("bus: transfer engine unavailable ({}), falling back to direct pin toggling", e);
                Self::Direct(BitbangBus::new(pins, timing))
            }
        }
    }

    /// Check whether the accelerated path is in use
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Accelerated(_))
    }
}

macro_rules! delegate {
    ($self:ident, $bus:ident => $body:expr) => {
        match $self {
            BusStrategy::Accelerated($bus) => $body,
            BusStrategy::Direct($bus) => $body,
        }
    };
}

impl<E: TransferEngine, P: BitbangNandPins> NandBus for BusStrategy<E, P> {
    fn name(&self) -> &'static str {
        delegate!(self, bus => bus.name())
    }

    fn select(&mut self, active: bool) {
        delegate!(self, bus => bus.select(active))
    }

    fn write(&mut self, latch: Latch, bytes: &[u8]) -> Result<()> {
        delegate!(self, bus => bus.write(latch, bytes))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        delegate!(self, bus => bus.read(buf))
    }

    fn is_ready(&mut self) -> bool {
        delegate!(self, bus => bus.is_ready())
    }

    fn delay_us(&mut self, us: u32) {
        delegate!(self, bus => bus.delay_us(us))
    }

    fn timing(&self) -> TimingParams {
        delegate!(self, bus => bus.timing())
    }

    fn set_timing(&mut self, timing: TimingParams) -> Result<()> {
        delegate!(self, bus => bus.set_timing(timing))
    }

    fn wait_ready(&mut self, timeout_us: u32) -> Result<()> {
        delegate!(self, bus => bus.wait_ready(timeout_us))
    }
}
