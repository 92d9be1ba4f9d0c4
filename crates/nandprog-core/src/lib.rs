//! nandprog-core - Device-side engine for a raw NAND flash programmer
//!
//! This crate holds everything the programmer firmware needs to talk to an
//! 8-bit asynchronous NAND die and to a host over a byte link: chip
//! profiles, the two bus strategies, NAND command sequences, the wire
//! framing, the streaming codec, integrity hashing, checkpoints, power
//! monitoring and the operation state machine. It is `no_std` + `alloc` so
//! it can run on a microcontroller; the `std` feature adds file-backed
//! checkpoints and the RON chip database loader.
//!
//! # Features
//!
//! - `std` - Enable standard library support
//!
//! # Example
//!
//! ```ignore
//! use nandprog_core::session::{Engine, Session, SessionConfig};
//!
//! let engine = Engine::new(bus, ChipRegistry::builtin(), store, power, SessionConfig::default());
//! let mut session = Session::new(link, clock, engine);
//! session.run()?;
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod bus;
pub mod checkpoint;
pub mod chip;
pub mod clock;
pub mod error;
pub mod integrity;
pub mod nand;
pub mod power;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod stream;

#[cfg(test)]
mod testing;

pub use error::{Error, FailureCause, Result};
