use std::sync::{Mutex, MutexGuard, PoisonError};

use vmi_core::{Feature, VcpuId, VmState, VmiError, VmiHypervisor, VmiMonitor};
use vmi_utils::{bpm::BreakpointManager, queue::EventQueue, tsi::InterestTable};

use crate::VmiOptions;

/// State owned by the dispatcher and the control-plane commands.
pub(crate) struct ControlState {
    pub(crate) vm_state: VmState,
    pub(crate) current: VcpuId,
    pub(crate) breakpoints: BreakpointManager,
    pub(crate) interest: InterestTable,
}

/// A VMI coordination session.
///
/// The session is created uninitialized. [`initialize`] allocates the
/// coordination state and [`uninitialize`] tears it down again, pulling
/// every breakpoint from hardware.
///
/// # Locking
///
/// The session holds two locks, always acquired in this order:
///
/// 1. The control lock guards the run state, the current vCPU, the
///    breakpoint store and the task-switch interest table. It serializes
///    the dispatcher and the control-plane commands.
/// 2. The event lock guards the event queue and the single-step
///    coordinator. It is the only lock taken on the guest-exit path and is
///    never held across a hypervisor call.
///
/// The monitor is notified with the control lock held, so it must not call
/// back into the session synchronously. See [`VmiMonitor`].
///
/// [`initialize`]: Self::initialize
/// [`uninitialize`]: Self::uninitialize
pub struct VmiSession<Driver, Monitor>
where
    Driver: VmiHypervisor,
    Monitor: VmiMonitor,
{
    pub(crate) driver: Driver,
    pub(crate) monitor: Monitor,
    pub(crate) options: VmiOptions,
    pub(crate) control: Mutex<Option<ControlState>>,
    pub(crate) events: Mutex<Option<EventQueue>>,
}

impl<Driver, Monitor> VmiSession<Driver, Monitor>
where
    Driver: VmiHypervisor,
    Monitor: VmiMonitor,
{
    /// Creates a new, uninitialized session.
    pub fn new(driver: Driver, monitor: Monitor) -> Self {
        Self {
            driver,
            monitor,
            options: VmiOptions::default(),
            control: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    /// Replaces the options applied by the next [`initialize`].
    ///
    /// [`initialize`]: Self::initialize
    pub fn with_options(mut self, options: VmiOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Returns the monitor.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Returns the options.
    pub fn options(&self) -> &VmiOptions {
        &self.options
    }

    /// Allocates the coordination state.
    ///
    /// Does nothing if the session is already initialized.
    pub fn initialize(&self) {
        let mut control = self.lock_control();
        let mut events = self.lock_events();

        if control.is_some() {
            return;
        }

        *events = Some(EventQueue::with_capacity(self.options.queue_capacity));
        *control = Some(ControlState {
            vm_state: VmState::Paused,
            current: self.options.initial_vcpu,
            breakpoints: BreakpointManager::new(),
            interest: InterestTable::new(),
        });

        tracing::info!(
            initial_vcpu = %self.options.initial_vcpu,
            queue_capacity = self.options.queue_capacity,
            "VMI initialized"
        );
    }

    /// Tears down the coordination state.
    ///
    /// Every hardware breakpoint is removed, every kernel task-switch trap
    /// is disabled and a pending single-step is cancelled. The teardown
    /// always completes and the first hypervisor error is returned.
    ///
    /// Does nothing if the session is not initialized.
    pub fn uninitialize(&self) -> Result<(), VmiError> {
        let mut control = self.lock_control();
        let mut events = self.lock_events();

        let mut state = match control.take() {
            Some(state) => state,
            None => return Ok(()),
        };

        let pending = events
            .take()
            .and_then(|queue| queue.single_step().pending());

        drop(events);

        let mut result = state.breakpoints.clear(&self.driver);

        for asid in state.interest.asids() {
            let feature = Feature::TaskSwitch {
                enable: false,
                asid,
                trap_in: false,
                trap_out: false,
            };

            if let Err(err) = self.driver.update_feature(feature) {
                tracing::error!(%asid, %err, "failed to disable task-switch trap");
                result = result.and(Err(err));
            }
        }

        if let Some(pending) = pending
            && let Err(err) = self.driver.set_single_step(pending.vcpu, false)
        {
            tracing::error!(vcpu = %pending.vcpu, %err, "failed to cancel single-step");
            result = result.and(Err(err));
        }

        tracing::info!("VMI uninitialized");
        result
    }

    /// Checks if the session is initialized.
    pub fn is_initialized(&self) -> bool {
        self.lock_control().is_some()
    }

    /// Returns whether the guest is currently permitted to execute.
    ///
    /// An uninitialized session reports [`VmState::Paused`].
    pub fn vm_state(&self) -> VmState {
        self.lock_control()
            .as_ref()
            .map(|control| control.vm_state)
            .unwrap_or_default()
    }

    /// Returns the vCPU whose event was dispatched last.
    pub fn current_vcpu(&self) -> Option<VcpuId> {
        self.lock_control().as_ref().map(|control| control.current)
    }

    pub(crate) fn lock_control(&self) -> MutexGuard<'_, Option<ControlState>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_events(&self) -> MutexGuard<'_, Option<EventQueue>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Driver, Monitor> Drop for VmiSession<Driver, Monitor>
where
    Driver: VmiHypervisor,
    Monitor: VmiMonitor,
{
    fn drop(&mut self) {
        if let Err(err) = self.uninitialize() {
            tracing::error!(%err, "failed to uninitialize VMI");
        }
    }
}
