//! Task-switch interest tracking.
//!
//! Two independent reasons make the kernel trap switches of an address
//! space:
//!
//! - The monitor explicitly asked to be stopped when the guest switches into
//!   or out of it ([`InterestTable::set_interest`]). Only these requests
//!   decide whether a switch pauses the VM.
//! - The address space owns breakpoints, so the switch must be observed to
//!   swap hardware breakpoints ([`InterestTable::isolate`]). Such a switch
//!   resumes the guest right away.
//!
//! The kernel only knows the union of both, see [`InterestTable::trap`].

use std::collections::{HashMap, HashSet};

use vmi_core::{Asid, Feature, VmiError};

/// Trap directions registered for an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskSwitchInterest {
    /// The address space.
    pub asid: Asid,

    /// Switches into the address space are trapped.
    pub trap_on_enter: bool,

    /// Switches out of the address space are trapped.
    pub trap_on_exit: bool,
}

impl TaskSwitchInterest {
    /// Creates a new interest entry.
    pub fn new(asid: Asid, trap_on_enter: bool, trap_on_exit: bool) -> Self {
        Self {
            asid,
            trap_on_enter,
            trap_on_exit,
        }
    }

    /// Returns the kernel feature update that enables this interest.
    pub fn feature(&self) -> Feature {
        Feature::TaskSwitch {
            enable: true,
            asid: self.asid,
            trap_in: self.trap_on_enter,
            trap_out: self.trap_on_exit,
        }
    }
}

/// Task-switch interest table.
#[derive(Debug, Default)]
pub struct InterestTable {
    /// Interest explicitly requested by the monitor.
    requested: HashMap<Asid, TaskSwitchInterest>,

    /// Address spaces trapped in both directions because they own
    /// breakpoints.
    isolated: HashSet<Asid>,
}

impl InterestTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an explicit request to trap switches of `asid`.
    ///
    /// Replaces any previous request for the same address space.
    pub fn set_interest(
        &mut self,
        asid: Asid,
        trap_on_enter: bool,
        trap_on_exit: bool,
    ) -> Result<(), VmiError> {
        self.requested
            .try_reserve(1)
            .map_err(|_| VmiError::OutOfMemory)?;

        self.requested.insert(
            asid,
            TaskSwitchInterest::new(asid, trap_on_enter, trap_on_exit),
        );

        tracing::debug!(%asid, trap_on_enter, trap_on_exit, "task-switch interest set");
        Ok(())
    }

    /// Drops the explicit request for `asid`.
    ///
    /// Returns `false` if there was none.
    pub fn clear_interest(&mut self, asid: Asid) -> bool {
        let removed = self.requested.remove(&asid).is_some();

        if removed {
            tracing::debug!(%asid, "task-switch interest cleared");
        }

        removed
    }

    /// Returns the explicit request for `asid`.
    pub fn requested(&self, asid: Asid) -> Option<&TaskSwitchInterest> {
        self.requested.get(&asid)
    }

    /// Decides whether a switch from `old` to `new` pauses the VM.
    ///
    /// True if `old` is trapped on exit or `new` is trapped on enter.
    pub fn needs_stop_on_switch(&self, old: Asid, new: Asid) -> bool {
        let exit = self
            .requested
            .get(&old)
            .is_some_and(|interest| interest.trap_on_exit);

        let enter = self
            .requested
            .get(&new)
            .is_some_and(|interest| interest.trap_on_enter);

        exit || enter
    }

    /// Marks `asid` as owning breakpoints.
    ///
    /// Returns `true` if the address space was not isolated before.
    pub fn isolate(&mut self, asid: Asid) -> Result<bool, VmiError> {
        if self.isolated.contains(&asid) {
            return Ok(false);
        }

        self.isolated
            .try_reserve(1)
            .map_err(|_| VmiError::OutOfMemory)?;

        self.isolated.insert(asid);
        Ok(true)
    }

    /// Marks `asid` as no longer owning breakpoints.
    ///
    /// Returns `true` if the address space was isolated.
    pub fn release(&mut self, asid: Asid) -> bool {
        self.isolated.remove(&asid)
    }

    /// Checks if `asid` is isolated.
    pub fn is_isolated(&self, asid: Asid) -> bool {
        self.isolated.contains(&asid)
    }

    /// Returns the trap directions the kernel must apply to `asid`.
    ///
    /// An isolated address space is trapped in both directions, otherwise
    /// the explicit request applies.
    pub fn interest(&self, asid: Asid) -> Option<TaskSwitchInterest> {
        if self.isolated.contains(&asid) {
            return Some(TaskSwitchInterest::new(asid, true, true));
        }

        self.requested.get(&asid).copied()
    }

    /// Returns the kernel feature update matching the effective interest of
    /// `asid`.
    ///
    /// Disables the trap when nothing is interested in the address space.
    pub fn trap(&self, asid: Asid) -> Feature {
        match self.interest(asid) {
            Some(interest) => interest.feature(),
            None => Feature::TaskSwitch {
                enable: false,
                asid,
                trap_in: false,
                trap_out: false,
            },
        }
    }

    /// Restores the explicit request of `asid` to a value previously
    /// returned by [`requested`].
    ///
    /// [`requested`]: Self::requested
    pub fn restore(&mut self, asid: Asid, previous: Option<TaskSwitchInterest>) {
        match previous {
            Some(interest) => {
                self.requested.insert(asid, interest);
            }
            None => {
                self.requested.remove(&asid);
            }
        }
    }

    /// Returns an iterator over the address spaces the kernel traps.
    pub fn asids(&self) -> impl Iterator<Item = Asid> + '_ {
        self.requested.keys().copied().chain(
            self.isolated
                .iter()
                .copied()
                .filter(|asid| !self.requested.contains_key(asid)),
        )
    }

    /// Returns the number of address spaces the kernel traps.
    pub fn len(&self) -> usize {
        self.asids().count()
    }

    /// Checks if no address space is trapped.
    pub fn is_empty(&self) -> bool {
        self.requested.is_empty() && self.isolated.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.requested.clear();
        self.isolated.clear();
    }
}
