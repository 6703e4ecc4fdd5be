//! Event queue.
//!
//! Carries events from the guest-exit path to the dispatcher. A pending
//! single-step owns the head of the queue: while one is pending, the queue
//! only ever yields its completion, and ordinary events wait in the FIFO
//! until the step is resolved.

use std::collections::VecDeque;

use vmi_core::{PendingEvent, VcpuId, VmiError};

use crate::sstep::SingleStepCoordinator;

/// An event together with the vCPU that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedEvent {
    /// The vCPU that produced the event.
    pub vcpu: VcpuId,

    /// The event.
    pub event: PendingEvent,
}

impl QueuedEvent {
    /// Creates a new queued event.
    pub fn new(vcpu: VcpuId, event: PendingEvent) -> Self {
        Self { vcpu, event }
    }
}

/// Event queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    fifo: VecDeque<QueuedEvent>,
    single_step: SingleStepCoordinator,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fifo: VecDeque::with_capacity(capacity),
            single_step: SingleStepCoordinator::new(),
        }
    }

    /// Enqueues an event of `vcpu`.
    ///
    /// A single-step completion is recorded in the priority slot instead of
    /// the FIFO.
    ///
    /// # Panics
    ///
    /// Panics if a single-step completion arrives for a vCPU that does not
    /// own the pending step.
    pub fn push(&mut self, vcpu: VcpuId, event: PendingEvent) -> Result<(), VmiError> {
        if event.is_single_step_complete() {
            self.single_step.finish(vcpu);
            return Ok(());
        }

        self.fifo
            .try_reserve(1)
            .map_err(|_| VmiError::OutOfMemory)?;

        tracing::trace!(%vcpu, ?event, len = self.fifo.len(), "event queued");
        self.fifo.push_back(QueuedEvent::new(vcpu, event));
        Ok(())
    }

    /// Dequeues the next event.
    ///
    /// While a single-step is pending, returns its completion once it
    /// finished, or nothing before that. The FIFO is not touched in either
    /// case.
    pub fn pop(&mut self) -> Option<QueuedEvent> {
        if self.single_step.is_pending() {
            return self
                .single_step
                .take_finished()
                .map(|vcpu| QueuedEvent::new(vcpu, PendingEvent::SingleStepComplete));
        }

        let event = self.fifo.pop_front();

        if let Some(event) = &event {
            tracing::trace!(vcpu = %event.vcpu, event = ?event.event, "event dequeued");
        }

        event
    }

    /// Returns the number of events [`pop`] can currently yield.
    ///
    /// While a single-step is pending this is `1` once it finished and `0`
    /// before that.
    ///
    /// [`pop`]: Self::pop
    pub fn len(&self) -> u64 {
        if self.single_step.is_pending() {
            return u64::from(self.single_step.is_finished());
        }

        self.fifo.len() as u64
    }

    /// Checks if [`pop`] currently yields nothing.
    ///
    /// [`pop`]: Self::pop
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of ordinary events waiting in the FIFO.
    pub fn backlog(&self) -> usize {
        self.fifo.len()
    }

    /// Returns the single-step coordinator.
    pub fn single_step(&self) -> &SingleStepCoordinator {
        &self.single_step
    }

    /// Returns the single-step coordinator.
    pub fn single_step_mut(&mut self) -> &mut SingleStepCoordinator {
        &mut self.single_step
    }

    /// Drops every event and resets the single-step coordinator.
    pub fn clear(&mut self) {
        self.fifo.clear();
        self.single_step.reset();
    }
}
