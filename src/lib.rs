//! Breakpoint and event coordination for KVM-based Virtual Machine
//! Introspection.
//!
//! A [`VmiSession`] sits in the exit-handling path of the hypervisor. It lets
//! an external monitor place breakpoints and watchpoints scoped to a single
//! guest address space, single-step one vCPU at a time, and stop on guest
//! task switches.
//!
//! The hypervisor drives the session from two sides:
//!
//! - vCPU threads report guest exits with [`VmiSession::add_event`] and
//!   request a VMI stop.
//! - The main loop dispatches queued events with [`VmiSession::handle_vmi`]
//!   and reports scheduler transitions with
//!   [`VmiSession::handle_run_state_change`].
//!
//! The monitor issues commands such as [`VmiSession::add_breakpoint`] and
//! receives [`Notification`]s through its [`VmiMonitor`].

mod command;
mod dispatch;
mod options;
mod session;

pub use vmi_core::*;

pub use self::{options::VmiOptions, session::VmiSession};

/// Architecture-specific definitions.
pub mod arch {
    /// AMD64 architecture.
    #[cfg(feature = "arch-amd64")]
    pub mod amd64 {
        pub use vmi_arch_amd64::*;
    }
}

/// Drivers for the kernel virtualization engine.
pub mod driver {
    /// KVM VMI extension.
    #[cfg(feature = "driver-kvm")]
    pub mod kvm {
        pub use vmi_driver_kvm::*;
    }
}

/// Coordination building blocks.
pub mod utils {
    pub use vmi_utils::*;
}
