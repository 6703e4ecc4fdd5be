//! VMI utilities
//!
//! Building blocks of the breakpoint and event coordination layer:
//!
//! - [`bpm`]: address-space scoped breakpoint store and hardware ledger
//! - [`tsi`]: task-switch interest table
//! - [`sstep`]: single-step coordinator
//! - [`queue`]: event queue with single-step priority

#[cfg(feature = "bpm")]
pub mod bpm;

#[cfg(feature = "queue")]
pub mod queue;

#[cfg(feature = "sstep")]
pub mod sstep;

#[cfg(feature = "tsi")]
pub mod tsi;
