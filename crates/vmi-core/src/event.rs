use crate::{Asid, BreakpointKind, Va};

bitflags::bitflags! {
    /// Memory access flags reported with a watchpoint hit.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatchpointFlags: i32 {
        /// The watched region was read.
        const READ   = 1 << 0;

        /// The watched region was written.
        const WRITE  = 1 << 1;

        /// The watched region was read and written.
        const ACCESS = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl WatchpointFlags {
    /// Classifies the access into the watchpoint kind it can match.
    ///
    /// Anything that is neither a pure read nor a read-write access is
    /// treated as a write.
    pub fn kind(self) -> BreakpointKind {
        let access = self & Self::ACCESS;

        if access == Self::READ {
            BreakpointKind::WatchpointRead
        } else if access == Self::ACCESS {
            BreakpointKind::WatchpointAccess
        } else {
            BreakpointKind::WatchpointWrite
        }
    }
}

/// Event generated when the guest switches address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTaskSwitch {
    /// The address space being left.
    pub old_asid: Asid,

    /// The address space being entered.
    pub new_asid: Asid,
}

/// Event generated by a debug exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDebug {
    /// The exception was raised by hardware single-stepping.
    pub single_step: bool,

    /// The exception was raised by a watchpoint.
    pub watchpoint: bool,

    /// The accessed address, valid when [`watchpoint`] is set.
    ///
    /// [`watchpoint`]: Self::watchpoint
    pub watchpoint_va: Va,

    /// The kind of access, valid when [`watchpoint`] is set.
    ///
    /// [`watchpoint`]: Self::watchpoint
    pub watchpoint_flags: WatchpointFlags,

    /// The exception vector.
    pub exception: i32,
}

impl EventDebug {
    /// Creates a software breakpoint event.
    pub fn breakpoint() -> Self {
        Self {
            single_step: false,
            watchpoint: false,
            watchpoint_va: Va(0),
            watchpoint_flags: WatchpointFlags::empty(),
            exception: 3,
        }
    }

    /// Creates a watchpoint event.
    pub fn watchpoint(va: Va, flags: WatchpointFlags) -> Self {
        Self {
            single_step: false,
            watchpoint: true,
            watchpoint_va: va,
            watchpoint_flags: flags,
            exception: 1,
        }
    }
}

/// An event produced by a guest exit, waiting to be dispatched.
///
/// Every pending event belongs to the virtual CPU that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingEvent {
    /// The guest switched address spaces.
    TaskSwitch(EventTaskSwitch),

    /// A debug exception (breakpoint or watchpoint) occurred.
    Debug(EventDebug),

    /// A requested single-step reached the next instruction boundary.
    SingleStepComplete,
}

impl PendingEvent {
    /// Creates a task-switch event.
    pub fn task_switch(old_asid: impl Into<Asid>, new_asid: impl Into<Asid>) -> Self {
        Self::TaskSwitch(EventTaskSwitch {
            old_asid: old_asid.into(),
            new_asid: new_asid.into(),
        })
    }

    /// Checks if the event is a single-step completion.
    pub fn is_single_step_complete(&self) -> bool {
        matches!(self, Self::SingleStepComplete)
    }
}
