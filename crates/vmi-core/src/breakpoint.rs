use serde::{Deserialize, Serialize};

use crate::{Asid, Va};

/// The kind of a breakpoint.
///
/// Discriminants follow the GDB remote protocol breakpoint types used by the
/// hypervisor's debug interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BreakpointKind {
    /// Software breakpoint (patched instruction).
    Software = 0,

    /// Watchpoint triggered by data writes.
    WatchpointWrite = 2,

    /// Watchpoint triggered by data reads.
    WatchpointRead = 3,

    /// Watchpoint triggered by data reads or writes.
    WatchpointAccess = 4,
}

impl std::fmt::Display for BreakpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::Software => "software",
            Self::WatchpointWrite => "watchpoint-write",
            Self::WatchpointRead => "watchpoint-read",
            Self::WatchpointAccess => "watchpoint-access",
        })
    }
}

/// A breakpoint or watchpoint scoped to an address space.
///
/// A breakpoint is uniquely identified by `(asid, va)`. Breakpoints
/// registered for [`Asid::GLOBAL`] apply to every address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Breakpoint {
    /// The address space the breakpoint applies to.
    pub asid: Asid,

    /// The guest virtual address (canonical).
    pub va: Va,

    /// The length of the watched region in bytes.
    pub length: u64,

    /// The kind of the breakpoint.
    pub kind: BreakpointKind,
}

impl Breakpoint {
    /// Creates a new breakpoint.
    pub fn new(asid: Asid, va: Va, length: u64, kind: BreakpointKind) -> Self {
        Self {
            asid,
            va,
            length,
            kind,
        }
    }

    /// Returns whether the breakpoint is global.
    pub fn global(&self) -> bool {
        self.asid.is_global()
    }
}
