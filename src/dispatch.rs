//! Event dispatcher and VM-state controller.

use vmi_core::{
    Architecture, BreakpointKind, EventDebug, EventTaskSwitch, Notification, PendingEvent,
    Registers as _, RunState, Va, VcpuId, VmState, VmiError, VmiHypervisor, VmiMonitor,
};
use vmi_utils::queue::QueuedEvent;

use crate::{VmiSession, session::ControlState};

impl<Driver, Monitor> VmiSession<Driver, Monitor>
where
    Driver: VmiHypervisor,
    Monitor: VmiMonitor,
{
    /// Queues an event produced by a guest exit on `vcpu`.
    ///
    /// A single-step completion takes the priority slot of the queue.
    /// Does nothing if the session is not initialized.
    ///
    /// # Panics
    ///
    /// Panics if a single-step completion arrives for a vCPU that does not
    /// own the pending single-step.
    pub fn add_event(&self, vcpu: VcpuId, event: PendingEvent) -> Result<(), VmiError> {
        match self.lock_events().as_mut() {
            Some(queue) => queue.push(vcpu, event),
            None => Ok(()),
        }
    }

    /// Queues an event in the raw kernel layout of the KVM VMI extension.
    ///
    /// # Panics
    ///
    /// Panics if the event is malformed, see also [`add_event`].
    ///
    /// [`add_event`]: Self::add_event
    #[cfg(feature = "driver-kvm")]
    pub fn add_kvm_event(&self, vcpu: VcpuId, raw: &[u8]) -> Result<(), VmiError> {
        let event = match vmi_driver_kvm::decode_event(raw) {
            Ok(event) => event,
            Err(err) => panic!("malformed VMI event on vCPU {vcpu}: {err}"),
        };

        self.add_event(vcpu, event)
    }

    /// Returns the number of events [`handle_vmi`] can currently dispatch.
    ///
    /// Returns `0` if the session is not initialized.
    ///
    /// [`handle_vmi`]: Self::handle_vmi
    pub fn events_pending(&self) -> u64 {
        self.lock_events()
            .as_ref()
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    fn next_event(&self) -> Option<QueuedEvent> {
        self.lock_events().as_mut()?.pop()
    }

    /// Dispatches the next queued event and returns the resulting state.
    ///
    /// If nothing can be dispatched, the state is left untouched. Whenever
    /// the result is not [`VmState::Running`], every hardware breakpoint is
    /// removed.
    ///
    /// A hypervisor error during dispatch pauses the VM and is returned.
    ///
    /// # Panics
    ///
    /// Panics on a raw single-step debug event.
    pub fn handle_vmi(&self) -> Result<VmState, VmiError> {
        let mut guard = self.lock_control();
        let control = match guard.as_mut() {
            Some(control) => control,
            None => return Ok(VmState::Paused),
        };

        let QueuedEvent { vcpu, event } = match self.next_event() {
            Some(event) => event,
            None => {
                tracing::trace!("no event to dispatch");
                return Ok(control.vm_state);
            }
        };

        control.current = vcpu;

        let mut result = match event {
            PendingEvent::TaskSwitch(event) => self.handle_task_switch(control, vcpu, event),
            PendingEvent::Debug(event) => self.handle_debug(control, vcpu, event),
            PendingEvent::SingleStepComplete => self.handle_single_step(control, vcpu),
        };

        if let Err(err) = &result {
            tracing::error!(%vcpu, ?event, %err, "event dispatch failed");
            control.vm_state = VmState::Paused;
        }

        if !control.vm_state.is_running()
            && let Err(err) = control.breakpoints.remove_all_active(&self.driver)
        {
            result = result.and(Err(err));
        }

        tracing::debug!(%vcpu, vm_state = ?control.vm_state, "event dispatched");
        result.map(|()| control.vm_state)
    }

    /// Reacts to a run-state change reported by the hypervisor scheduler.
    ///
    /// - [`RunState::Running`] resumes the guest and installs breakpoints,
    ///   unless a single-step is pending.
    /// - [`RunState::Vmi`] dispatches the next event.
    /// - [`RunState::Paused`] records the initial vCPU as current, then
    ///   behaves like every other state.
    /// - Any other state pauses the guest and removes every hardware
    ///   breakpoint when `running` is `false`.
    ///
    /// Does nothing if the session is not initialized.
    ///
    /// # Panics
    ///
    /// Panics on [`RunState::Debug`].
    pub fn handle_run_state_change(&self, running: bool, state: RunState) -> Result<(), VmiError> {
        if !self.is_initialized() {
            return Ok(());
        }

        tracing::debug!(running, ?state, "run state changed");

        match state {
            RunState::Debug => panic!("the built-in debugger cannot run alongside VMI"),
            RunState::Running => return self.handle_running(),
            RunState::Vmi => return self.handle_vmi().map(|_| ()),
            _ => {}
        }

        let mut guard = self.lock_control();
        let control = match guard.as_mut() {
            Some(control) => control,
            None => return Ok(()),
        };

        if state == RunState::Paused {
            control.current = self.options.initial_vcpu;
        }

        if !running {
            control.vm_state = VmState::Paused;
            return control.breakpoints.remove_all_active(&self.driver);
        }

        Ok(())
    }

    /// Resumes the guest.
    ///
    /// Breakpoints are installed on every vCPU if the guest was not running
    /// and no single-step is pending. A pending single-step instead removes
    /// every hardware breakpoint.
    pub fn handle_running(&self) -> Result<(), VmiError> {
        let mut guard = self.lock_control();
        let control = match guard.as_mut() {
            Some(control) => control,
            None => return Ok(()),
        };

        let single_step_pending = self
            .lock_events()
            .as_ref()
            .is_some_and(|queue| queue.single_step().is_pending());

        let result = if single_step_pending {
            control.breakpoints.remove_all_active(&self.driver)
        } else if !control.vm_state.is_running() {
            control.breakpoints.install_all(&self.driver)
        } else {
            Ok(())
        };

        control.vm_state = VmState::Running;
        result
    }

    fn handle_task_switch(
        &self,
        control: &mut ControlState,
        vcpu: VcpuId,
        event: EventTaskSwitch,
    ) -> Result<(), VmiError> {
        let EventTaskSwitch { old_asid, new_asid } = event;

        if control.interest.needs_stop_on_switch(old_asid, new_asid) {
            self.notify(Notification::TaskSwitch {
                vcpu,
                old_asid,
                new_asid,
            });

            control.vm_state = VmState::Paused;
            return Ok(());
        }

        control
            .breakpoints
            .refresh(&self.driver, vcpu, old_asid, new_asid)?;

        control.vm_state = VmState::Running;
        Ok(())
    }

    fn handle_debug(
        &self,
        control: &mut ControlState,
        vcpu: VcpuId,
        event: EventDebug,
    ) -> Result<(), VmiError> {
        if event.single_step {
            panic!("unexpected single-step debug event on vCPU {vcpu}");
        }

        if !event.watchpoint {
            // Software breakpoints patch guest code.
            self.driver.flush_translation_cache(vcpu)?;
        }

        self.driver.synchronize(vcpu)?;
        let registers = self.driver.registers(vcpu)?;
        let asid = registers.address_space();

        let (va, kind) = if event.watchpoint {
            (event.watchpoint_va, event.watchpoint_flags.kind())
        } else {
            (
                Va(registers.instruction_pointer()),
                BreakpointKind::Software,
            )
        };

        let va = <Driver::Architecture as Architecture>::canonical_address(va);

        match control.breakpoints.lookup(asid, va, kind).copied() {
            Some(breakpoint) => {
                tracing::info!(%vcpu, %asid, %va, %kind, "breakpoint hit");

                self.notify(Notification::Breakpoint {
                    vcpu,
                    va,
                    kind: breakpoint.kind,
                });

                control.vm_state = VmState::Paused;
            }
            None => {
                tracing::debug!(%vcpu, %asid, %va, %kind, "no breakpoint registered");
                control.vm_state = VmState::Running;
            }
        }

        // Step past the trapping instruction before the breakpoints return.
        match self.single_step(vcpu, true, false) {
            Ok(()) => Ok(()),
            Err(err @ VmiError::SingleStepPending { .. }) => {
                tracing::warn!(%vcpu, %err, "cannot step past breakpoint");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn handle_single_step(&self, control: &mut ControlState, vcpu: VcpuId) -> Result<(), VmiError> {
        let need_stop = self
            .lock_events()
            .as_ref()
            .and_then(|queue| queue.single_step().pending())
            .is_some_and(|pending| pending.vcpu == vcpu && pending.need_stop);

        let result = if need_stop {
            tracing::info!(%vcpu, "single-step completed");
            self.notify(Notification::SingleStep { vcpu });

            control.vm_state = VmState::Paused;
            Ok(())
        } else {
            tracing::debug!(%vcpu, "stepped past breakpoint");

            control.vm_state = VmState::Running;
            control.breakpoints.install_all(&self.driver)
        };

        result.and(self.single_step(vcpu, false, false))
    }

    /// Arms or disarms the single-step of `vcpu`.
    ///
    /// The coordinator is updated under the event lock and the hardware flag
    /// is toggled after it was released. If the hardware refuses the toggle,
    /// in either direction, the previous coordinator state is restored and
    /// the owner keeps the step.
    pub(crate) fn single_step(
        &self,
        vcpu: VcpuId,
        enable: bool,
        need_stop: bool,
    ) -> Result<(), VmiError> {
        let rollback = match self.lock_events().as_mut() {
            Some(queue) => queue.single_step_mut().request(vcpu, enable, need_stop)?,
            None => return Err(VmiError::NotInitialized),
        };

        if let Err(err) = self.driver.set_single_step(vcpu, enable) {
            tracing::error!(%vcpu, enable, %err, "failed to toggle single-step");

            if let Some(queue) = self.lock_events().as_mut() {
                queue.single_step_mut().restore(rollback);
            }

            return Err(err);
        }

        Ok(())
    }

    fn notify(&self, notification: Notification) {
        if let Err(err) = self.monitor.notify(notification) {
            tracing::warn!(?notification, %err, "failed to notify monitor");
        }
    }
}
