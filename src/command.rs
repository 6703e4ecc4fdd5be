//! Control-plane commands.
//!
//! Every command returns [`VmiError::NotInitialized`] while the session is
//! not initialized.

use vmi_core::{
    Architecture, Asid, Breakpoint, BreakpointKind, Feature, LbrInfo, Va, VcpuId, VmiError,
    VmiHypervisor, VmiMonitor,
};
use vmi_utils::tsi::TaskSwitchInterest;

use crate::{VmiSession, session::ControlState};

impl<Driver, Monitor> VmiSession<Driver, Monitor>
where
    Driver: VmiHypervisor,
    Monitor: VmiMonitor,
{
    /// Registers a breakpoint or watchpoint.
    ///
    /// `va` is canonicalized first. Any breakpoint previously registered at
    /// the same `(asid, va)` is replaced and pulled from hardware.
    ///
    /// The first breakpoint of a non-global address space makes the kernel
    /// trap every switch into and out of it, so that its breakpoints can be
    /// swapped in and out. Such switches do not pause the VM by themselves.
    pub fn add_breakpoint(
        &self,
        asid: Asid,
        va: Va,
        length: u64,
        kind: BreakpointKind,
    ) -> Result<(), VmiError> {
        let va = <Driver::Architecture as Architecture>::canonical_address(va);
        let breakpoint = Breakpoint::new(asid, va, length, kind);

        self.with_control(|control| {
            let isolate = !asid.is_global() && !control.breakpoints.has_any(asid);

            if isolate {
                control.interest.isolate(asid)?;

                if let Err(err) = self.driver.update_feature(control.interest.trap(asid)) {
                    control.interest.release(asid);
                    return Err(err);
                }
            }

            match control.breakpoints.insert(breakpoint) {
                Ok(Some(replaced)) if replaced != breakpoint => {
                    control.breakpoints.deactivate(&self.driver, &replaced)
                }
                Ok(_) => Ok(()),
                Err(err) => {
                    if isolate {
                        self.release_address_space(control, asid);
                    }

                    Err(err)
                }
            }
        })
    }

    /// Unregisters the breakpoint at `(asid, va)` and pulls it from every
    /// vCPU it is installed on.
    ///
    /// `va` is canonicalized first. Removing the last breakpoint of an
    /// address space stops the kernel from trapping its switches, unless the
    /// monitor asked for them with [`set_task_switch_trap`].
    ///
    /// Returns `false` if no such breakpoint was registered.
    ///
    /// [`set_task_switch_trap`]: Self::set_task_switch_trap
    pub fn remove_breakpoint(&self, asid: Asid, va: Va) -> Result<bool, VmiError> {
        let va = <Driver::Architecture as Architecture>::canonical_address(va);

        self.with_control(|control| {
            let removed = control.breakpoints.remove(&self.driver, asid, va);

            if !control.breakpoints.has_any(asid) && control.interest.is_isolated(asid) {
                control.interest.release(asid);
                self.driver.update_feature(control.interest.trap(asid))?;
            }

            Ok(removed?.is_some())
        })
    }

    /// Returns a snapshot of every registered breakpoint.
    pub fn breakpoints(&self) -> Result<Vec<Breakpoint>, VmiError> {
        self.with_control(|control| Ok(control.breakpoints.iter().copied().collect()))
    }

    /// Single-steps `vcpu` and pauses the VM once the next instruction
    /// boundary is reached.
    ///
    /// Fails with [`VmiError::SingleStepPending`] while another vCPU is
    /// single-stepping.
    pub fn request_single_step(&self, vcpu: VcpuId) -> Result<(), VmiError> {
        if !self.driver.info()?.contains(vcpu) {
            return Err(VmiError::VcpuNotFound(vcpu));
        }

        self.with_control(|_| self.single_step(vcpu, true, true))
    }

    /// Enables or disables trapping of guest switches into and out of
    /// `asid`.
    ///
    /// An enabled trap pauses the VM and notifies the monitor on every
    /// matching switch. The kernel is updated first and the request is only
    /// recorded if the update succeeded.
    pub fn set_task_switch_trap(
        &self,
        enable: bool,
        asid: Asid,
        trap_in: bool,
        trap_out: bool,
    ) -> Result<(), VmiError> {
        self.with_control(|control| {
            let previous = control.interest.requested(asid).copied();

            if enable {
                control.interest.set_interest(asid, trap_in, trap_out)?;
            } else {
                control.interest.clear_interest(asid);
            }

            if let Err(err) = self.driver.update_feature(control.interest.trap(asid)) {
                tracing::error!(%asid, enable, %err, "failed to update task-switch trap");
                control.interest.restore(asid, previous);
                return Err(err);
            }

            Ok(())
        })
    }

    /// Returns the explicitly requested task-switch trap of `asid`.
    pub fn task_switch_trap(&self, asid: Asid) -> Result<Option<TaskSwitchInterest>, VmiError> {
        self.with_control(|control| Ok(control.interest.requested(asid).copied()))
    }

    /// Returns the trap directions the kernel currently applies to `asid`,
    /// including the trapping caused by its breakpoints.
    pub fn effective_task_switch_trap(
        &self,
        asid: Asid,
    ) -> Result<Option<TaskSwitchInterest>, VmiError> {
        self.with_control(|control| Ok(control.interest.interest(asid)))
    }

    /// Enables or disables last-branch recording with the given selector.
    pub fn set_last_branch_record(&self, enable: bool, select: u64) -> Result<(), VmiError> {
        self.with_control(|_| {
            self.driver
                .update_feature(Feature::LastBranchRecord { enable, select })
        })
    }

    /// Returns the last-branch record of `vcpu`.
    pub fn last_branch_record(&self, vcpu: VcpuId) -> Result<LbrInfo, VmiError> {
        self.with_control(|_| self.driver.last_branch_record(vcpu))
    }

    fn with_control<T>(
        &self,
        f: impl FnOnce(&mut ControlState) -> Result<T, VmiError>,
    ) -> Result<T, VmiError> {
        match self.lock_control().as_mut() {
            Some(control) => f(control),
            None => Err(VmiError::NotInitialized),
        }
    }

    /// Drops the breakpoint-driven trap of `asid` after a failed insert.
    fn release_address_space(&self, control: &mut ControlState, asid: Asid) {
        if !control.interest.release(asid) {
            return;
        }

        if let Err(err) = self.driver.update_feature(control.interest.trap(asid)) {
            tracing::error!(%asid, %err, "failed to restore task-switch trap");
        }
    }
}
