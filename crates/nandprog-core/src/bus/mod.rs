//! NAND bus strategies
//!
//! This module provides the cycle-level bus abstraction and its two
//! implementations:
//!
//! - [`AcceleratedBus`] offloads strobe timing and bulk transfer to a
//!   hardware [`TransferEngine`] (PIO state machines, SMC, FSMC, ...) with
//!   double-buffered slots so consecutive transfers leave no gap.
//! - [`BitbangBus`] toggles CE#/CLE/ALE/WE#/RE# and the I/O lines directly
//!   through [`BitbangNandPins`], honouring [`TimingParams`] in software.
//!
//! [`BusStrategy`] picks the accelerated path when its engine comes up and
//! falls back to bit-toggling otherwise. [`BusDriver`] layers the NAND
//! command sequences on top of whichever strategy is in use.

mod accelerated;
mod bitbang;
mod driver;
mod strategy;
mod timing;
mod traits;

pub use accelerated::{AcceleratedBus, TransferEngine, MAX_IN_FLIGHT, SLOT_SIZE};
pub use bitbang::{cycle, BitbangBus, BitbangNandPins};
pub use driver::{BusDriver, ReadyTimeouts};
pub use strategy::BusStrategy;
pub use timing::{AutotuneConfig, TimingParams};
pub use traits::{Latch, NandBus, POLL_INTERVAL_US};
