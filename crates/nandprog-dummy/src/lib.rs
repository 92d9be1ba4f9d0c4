//! nandprog-dummy - Emulated NAND die for testing
//!
//! This crate provides a cycle-level model of an asynchronous NAND die and
//! the board-side pieces a session needs around it: GPIO pins for the
//! direct strategy, a transfer engine for the accelerated strategy, a clock
//! sharing the die's virtual time, a scripted voltage sensor and an
//! in-memory byte link. It's useful for exercising the device engine and the
//! host driver without real hardware.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod clock;
mod die;
mod engine;
mod link;
mod pins;

use alloc::rc::Rc;
use core::cell::{Ref, RefCell, RefMut};

use embedded_io::{Read, ReadReady, Write};
use nandprog_core::bus::{BitbangBus, BusStrategy, TimingParams};
use nandprog_core::checkpoint::CheckpointStore;
use nandprog_core::chip::{ChipProfile, ChipRegistry};
use nandprog_core::power::VoltageSensor;
use nandprog_core::session::{Engine, Session, SessionConfig};

pub use clock::{DieClock, ScriptedSensor};
#[cfg(feature = "std")]
pub use clock::StdClock;
pub use die::{DieFaults, DieTimings, NandDie};
pub use engine::DummyEngine;
pub use link::{LinkClosed, MemoryLink};
pub use pins::DummyPins;

/// Bus strategy over the emulated engine and pins
pub type DummyBus = BusStrategy<DummyEngine, DummyPins>;

/// Configuration for the emulated die
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Geometry and READ ID answer
    pub profile: ChipProfile,
    /// Array busy times
    pub timings: DieTimings,
    /// Injected faults
    pub faults: DieFaults,
}

impl Default for DummyConfig {
    fn default() -> Self {
        let profile = ChipRegistry::builtin()
            .select("K9F1G08U0A")
            .cloned()
            .unwrap_or_else(|_| ChipProfile::new("Samsung", "K9F1G08U0A", &[0xEC, 0xF1, 0x80, 0x15], 2048, 128, 2048));
        Self {
            profile,
            timings: DieTimings::default(),
            faults: DieFaults::default(),
        }
    }
}

impl DummyConfig {
    /// Small 64-byte-page part, quick to sweep end to end
    pub fn small() -> Self {
        Self {
            profile: ChipProfile::new("Dummy", "NAND64", &[0xDA, 0x64], 64, 4, 16),
            ..Self::default()
        }
    }
}

/// A die wired to everything a device session needs
///
/// Every part handed out shares the same die, so tests can inspect or
/// sabotage it while a session runs.
pub struct DummyBench {
    die: Rc<RefCell<NandDie>>,
}

impl DummyBench {
    /// Power up a blank die
    pub fn new(config: DummyConfig) -> Self {
        let mut die = NandDie::new(config.profile, config.timings);
        die.faults = config.faults;
        log::debug!("dummy: emulating {}", die.profile().full_name());
        Self {
            die: Rc::new(RefCell::new(die)),
        }
    }

    /// Inspect the die
    pub fn die(&self) -> Ref<'_, NandDie> {
        self.die.borrow()
    }

    /// Modify the die (contents, faults, time)
    pub fn die_mut(&self) -> RefMut<'_, NandDie> {
        self.die.borrow_mut()
    }

    /// GPIO view of the die
    pub fn pins(&self) -> DummyPins {
        DummyPins::new(self.die.clone())
    }

    /// Transfer-engine view of the die
    pub fn transfer_engine(&self) -> DummyEngine {
        DummyEngine::new(self.die.clone())
    }

    /// Clock running on die time
    pub fn clock(&self) -> DieClock {
        DieClock::new(self.die.clone())
    }

    /// Bus with the accelerated strategy, falling back to direct toggling
    pub fn bus(&self) -> DummyBus {
        BusStrategy::init(self.transfer_engine(), self.pins(), TimingParams::SAFE)
    }

    /// Bus forced onto the direct strategy
    pub fn direct_bus(&self) -> DummyBus {
        BusStrategy::Direct(BitbangBus::new(self.pins(), TimingParams::SAFE))
    }

    /// Built-in parts plus the emulated one
    pub fn registry(&self) -> ChipRegistry {
        let mut registry = ChipRegistry::builtin();
        let profile = self.die().profile().clone();
        if registry.select(&profile.full_name()).is_err() {
            registry.extend([profile]);
        }
        registry
    }

    /// Device engine on the default bus
    pub fn device<S: CheckpointStore, V: VoltageSensor>(
        &self,
        store: S,
        sensor: V,
        config: SessionConfig,
    ) -> Engine<DummyBus, S, V> {
        Engine::new(self.bus(), self.registry(), store, sensor, config)
    }

    /// Device session serving `link`
    pub fn session<L, S, V>(
        &self,
        link: L,
        store: S,
        sensor: V,
        config: SessionConfig,
    ) -> Session<L, DieClock, DummyBus, S, V>
    where
        L: Read + Write + ReadReady,
        S: CheckpointStore,
        V: VoltageSensor,
    {
        Session::new(link, self.clock(), self.device(store, sensor, config))
    }
}

impl Default for DummyBench {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}
