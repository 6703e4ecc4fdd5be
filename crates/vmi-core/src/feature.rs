use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::Asid;

/// A feature of the kernel virtualization engine that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Trap guest switches into and/or out of an address space.
    TaskSwitch {
        /// Enables or disables the trap.
        enable: bool,

        /// The address space to trap.
        asid: Asid,

        /// Trap switches into `asid`.
        trap_in: bool,

        /// Trap switches out of `asid`.
        trap_out: bool,
    },

    /// Record taken branches.
    LastBranchRecord {
        /// Enables or disables recording.
        enable: bool,

        /// The branch-record selector (`MSR_LBR_SELECT` value).
        select: u64,
    },

    /// Exit after every guest instruction.
    MonitorTrapFlag {
        /// Enables or disables the monitor trap flag.
        enable: bool,
    },
}

/// Snapshot of the last-branch record stack of a virtual CPU.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbrInfo {
    /// Number of valid entries.
    pub entries: u32,

    /// Index of the top of the stack.
    pub tos: u8,

    /// Branch source addresses.
    pub from: SmallVec<[u64; LbrInfo::MAX_ENTRIES]>,

    /// Branch destination addresses.
    pub to: SmallVec<[u64; LbrInfo::MAX_ENTRIES]>,
}

impl LbrInfo {
    /// Maximum number of entries the hardware reports.
    pub const MAX_ENTRIES: usize = 16;

    /// Returns an iterator over `(from, to)` pairs.
    pub fn branches(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.from.iter().copied().zip(self.to.iter().copied())
    }
}
