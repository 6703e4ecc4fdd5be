use serde::{Deserialize, Serialize};

/// Whether the guest is currently permitted to execute.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    /// The guest is held for external inspection.
    #[default]
    Paused,

    /// The guest may execute.
    Running,
}

impl VmState {
    /// Checks if the guest may execute.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A run state reported by the hypervisor's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Stopped by the built-in debugger stub.
    Debug,

    /// Executing guest code.
    Running,

    /// Stopped because a VMI event is waiting to be dispatched.
    Vmi,

    /// Paused by the operator.
    Paused,

    /// Shut down.
    Shutdown,

    /// Stopped on an I/O error.
    IoError,

    /// Stopped by the watchdog.
    Watchdog,

    /// Stopped on an internal hypervisor error.
    InternalError,

    /// Saving a snapshot.
    SaveVm,

    /// Restoring a snapshot.
    RestoreVm,

    /// Finishing a migration.
    FinishMigrate,

    /// Any other scheduler state.
    Other,
}
