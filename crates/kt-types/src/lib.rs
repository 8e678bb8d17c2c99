//! Core types shared by the KernelTune search strategies.

pub mod device;
pub mod errors;
pub mod params;
pub mod record;

pub use device::*;
pub use errors::*;
pub use params::*;
pub use record::*;
