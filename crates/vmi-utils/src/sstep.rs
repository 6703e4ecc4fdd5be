//! Single-step coordination.
//!
//! At most one vCPU may single-step at a time. A request for a second vCPU
//! is rejected rather than queued, and ownership is never stolen.
//!
//! The coordinator only tracks ownership. Toggling the hardware single-step
//! flag is left to the caller, which must not hold its coordination lock
//! while doing so.

use vmi_core::{VcpuId, VmiError};

/// The single-step owned by a vCPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleStep {
    /// The stepping vCPU.
    pub vcpu: VcpuId,

    /// Completing the step pauses the VM and notifies the monitor.
    ///
    /// When unset, the step completes silently and the guest resumes.
    pub need_stop: bool,
}

/// The coordinator state before a [`SingleStepCoordinator::request`].
///
/// Passing it to [`SingleStepCoordinator::restore`] undoes the request, e.g.
/// when the hardware refused to arm the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Rollback {
    pending: Option<SingleStep>,
    finished: Option<VcpuId>,
}

/// Single-step coordinator.
#[derive(Debug, Default)]
pub struct SingleStepCoordinator {
    pending: Option<SingleStep>,
    finished: Option<VcpuId>,
}

impl SingleStepCoordinator {
    /// Creates an idle coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests (or cancels) a single-step of `vcpu`.
    ///
    /// Fails with [`VmiError::SingleStepPending`] while another vCPU owns
    /// the step, whether enabling or disabling. Disabling with no step
    /// pending succeeds. On success, any recorded completion is discarded.
    pub fn request(
        &mut self,
        vcpu: VcpuId,
        enable: bool,
        need_stop: bool,
    ) -> Result<Rollback, VmiError> {
        if let Some(pending) = self.pending
            && pending.vcpu != vcpu
        {
            return Err(VmiError::SingleStepPending {
                requested: vcpu,
                pending: pending.vcpu,
            });
        }

        let rollback = Rollback {
            pending: self.pending,
            finished: self.finished,
        };

        self.pending = enable.then_some(SingleStep { vcpu, need_stop });
        self.finished = None;

        tracing::debug!(%vcpu, enable, need_stop, "single-step requested");
        Ok(rollback)
    }

    /// Undoes a previous [`request`].
    ///
    /// [`request`]: Self::request
    pub fn restore(&mut self, rollback: Rollback) {
        self.pending = rollback.pending;
        self.finished = rollback.finished;
    }

    /// Records that the pending step of `vcpu` completed.
    ///
    /// # Panics
    ///
    /// Panics if `vcpu` does not own the pending step.
    pub fn finish(&mut self, vcpu: VcpuId) {
        match self.pending {
            Some(pending) if pending.vcpu == vcpu => {
                tracing::trace!(%vcpu, "single-step finished");
                self.finished = Some(vcpu);
            }
            Some(pending) => panic!(
                "single-step completion on vCPU {vcpu}, but vCPU {} owns the step",
                pending.vcpu
            ),
            None => panic!("single-step completion on vCPU {vcpu} without a pending step"),
        }
    }

    /// Takes the completed vCPU, if the pending step finished.
    ///
    /// The step itself stays pending until it is resolved with a disabling
    /// [`request`] or [`reset`].
    ///
    /// [`request`]: Self::request
    /// [`reset`]: Self::reset
    pub fn take_finished(&mut self) -> Option<VcpuId> {
        self.finished.take()
    }

    /// Returns the pending step.
    pub fn pending(&self) -> Option<SingleStep> {
        self.pending
    }

    /// Checks if a step is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Checks if the pending step completed and was not taken yet.
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Drops ownership and any recorded completion.
    pub fn reset(&mut self) {
        self.pending = None;
        self.finished = None;
    }
}
