use std::sync::mpsc;

use crate::{Asid, BreakpointKind, Va, VcpuId, VmiError};

/// An asynchronous notification delivered to the external monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A trapped task switch paused the guest.
    TaskSwitch {
        /// The virtual CPU that switched.
        vcpu: VcpuId,

        /// The address space being left.
        old_asid: Asid,

        /// The address space being entered.
        new_asid: Asid,
    },

    /// A registered breakpoint or watchpoint was hit.
    Breakpoint {
        /// The virtual CPU that hit the breakpoint.
        vcpu: VcpuId,

        /// The address of the breakpoint.
        va: Va,

        /// The kind of the breakpoint.
        kind: BreakpointKind,
    },

    /// A requested single-step completed.
    SingleStep {
        /// The virtual CPU that stepped.
        vcpu: VcpuId,
    },
}

impl Notification {
    /// Returns the virtual CPU the notification refers to.
    pub fn vcpu(&self) -> VcpuId {
        match self {
            Self::TaskSwitch { vcpu, .. }
            | Self::Breakpoint { vcpu, .. }
            | Self::SingleStep { vcpu } => *vcpu,
        }
    }
}

/// The sink for notifications addressed to the external monitor.
///
/// # Reentrancy
///
/// The session calls [`notify`] while holding its control lock, which is
/// not reentrant. An implementation must not call back into the session
/// (e.g. to request a single-step) before returning, or the calling thread
/// deadlocks. It should not block either: hand the notification off to
/// another thread, as the channel implementations below do.
///
/// [`notify`]: Self::notify
pub trait VmiMonitor {
    /// Delivers a notification.
    ///
    /// A failed delivery is logged by the session and does not abort the
    /// dispatch.
    fn notify(&self, notification: Notification) -> Result<(), VmiError>;
}

impl VmiMonitor for mpsc::Sender<Notification> {
    fn notify(&self, notification: Notification) -> Result<(), VmiError> {
        self.send(notification)
            .map_err(|err| VmiError::Monitor(Box::new(err)))
    }
}

impl VmiMonitor for mpsc::SyncSender<Notification> {
    fn notify(&self, notification: Notification) -> Result<(), VmiError> {
        self.try_send(notification)
            .map_err(|err| VmiError::Monitor(Box::new(err)))
    }
}

impl<T> VmiMonitor for &T
where
    T: VmiMonitor + ?Sized,
{
    fn notify(&self, notification: Notification) -> Result<(), VmiError> {
        (**self).notify(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_monitor_forwards_notifications() {
        let (tx, rx) = mpsc::channel();
        tx.notify(Notification::SingleStep { vcpu: VcpuId(1) })
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::SingleStep { vcpu: VcpuId(1) }
        );
    }

    #[test]
    fn closed_channel_surfaces_as_monitor_error() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let err = tx
            .notify(Notification::SingleStep { vcpu: VcpuId(0) })
            .unwrap_err();
        assert!(matches!(err, VmiError::Monitor(_)));
    }

    #[test]
    fn full_sync_channel_does_not_block() {
        let (tx, rx) = mpsc::sync_channel(1);
        tx.notify(Notification::SingleStep { vcpu: VcpuId(0) })
            .unwrap();

        let err = tx
            .notify(Notification::SingleStep { vcpu: VcpuId(1) })
            .unwrap_err();
        assert!(matches!(err, VmiError::Monitor(_)));
        assert_eq!(rx.try_iter().count(), 1);
    }
}
