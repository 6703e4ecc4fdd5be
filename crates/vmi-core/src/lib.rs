//! Core types for VMI breakpoint and event coordination.
//!
//! This crate defines the vocabulary shared by the rest of the workspace:
//! guest addresses and address-space identifiers, breakpoints, the events
//! produced on guest exits, the notifications delivered to the external
//! monitor, and the traits through which the hypervisor is driven.

pub mod arch;
mod breakpoint;
mod core;
mod driver;
mod error;
mod event;
mod feature;
mod monitor;
mod state;

pub use self::{
    arch::{Architecture, Registers},
    breakpoint::{Breakpoint, BreakpointKind},
    core::{Asid, Va, VcpuId, VmiInfo},
    driver::{VmiDebug, VmiDriver, VmiFeatures, VmiHypervisor, VmiVcpu},
    error::VmiError,
    event::{EventDebug, EventTaskSwitch, PendingEvent, WatchpointFlags},
    feature::{Feature, LbrInfo},
    monitor::{Notification, VmiMonitor},
    state::{RunState, VmState},
};
