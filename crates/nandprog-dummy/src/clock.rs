//! Clock and voltage sensor for emulated sessions

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

use nandprog_core::clock::Clock;
use nandprog_core::power::VoltageSensor;

use crate::die::NandDie;

/// Session clock that shares the die's virtual time
///
/// Waiting for ready/busy and waiting for the host advance the same
/// timeline, so busy times and inactivity timeouts interact as on hardware.
pub struct DieClock {
    die: Rc<RefCell<NandDie>>,
}

impl DieClock {
    /// Attach to a die
    pub fn new(die: Rc<RefCell<NandDie>>) -> Self {
        Self { die }
    }
}

impl Clock for DieClock {
    fn now_ms(&self) -> u64 {
        self.die.borrow().now_ns() / 1_000_000
    }

    fn delay_us(&mut self, us: u32) {
        self.die.borrow_mut().advance_ns(us as u64 * 1000);
    }
}

/// Voltage samples from a script, then a steady level
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    samples: VecDeque<Option<u32>>,
    steady: u32,
    taken: u32,
}

impl ScriptedSensor {
    /// Always report `millivolts`
    pub fn steady(millivolts: u32) -> Self {
        Self {
            steady: millivolts,
            ..Self::default()
        }
    }

    /// Report `samples` first (`None` = failed conversion)
    pub fn with_samples(steady: u32, samples: impl IntoIterator<Item = Option<u32>>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            steady,
            taken: 0,
        }
    }

    /// Samples taken so far
    pub fn taken(&self) -> u32 {
        self.taken
    }
}

impl VoltageSensor for ScriptedSensor {
    fn read_millivolts(&mut self) -> Option<u32> {
        self.taken += 1;
        self.samples.pop_front().unwrap_or(Some(self.steady))
    }
}

/// Wall-clock session clock, for serving a real host
///
/// The die keeps its own virtual time for busy periods; only the session's
/// inactivity timeout and idle polling run on real time.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Clock starting now
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }
}
