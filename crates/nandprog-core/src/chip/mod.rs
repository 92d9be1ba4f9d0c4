//! NAND chip profiles and the identifier registry
//!
//! This module provides the geometry description of a NAND die and the
//! registry used to resolve a READ ID response to a profile.

mod registry;
mod types;

#[cfg(feature = "std")]
mod database;

pub use registry::ChipRegistry;
pub use types::*;

#[cfg(feature = "std")]
pub use database::*;
