use serde::{Deserialize, Serialize};
use vmi_core::VcpuId;

/// Options applied when a [`VmiSession`] is initialized.
///
/// [`VmiSession`]: crate::VmiSession
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmiOptions {
    /// The vCPU recorded as current at initialization and whenever the
    /// scheduler pauses the VM.
    pub initial_vcpu: VcpuId,

    /// Number of event slots reserved up front.
    pub queue_capacity: usize,
}

impl Default for VmiOptions {
    fn default() -> Self {
        Self {
            initial_vcpu: VcpuId(0),
            queue_capacity: 64,
        }
    }
}

impl VmiOptions {
    /// Sets the initial vCPU.
    pub fn with_initial_vcpu(self, initial_vcpu: VcpuId) -> Self {
        Self {
            initial_vcpu,
            ..self
        }
    }

    /// Sets the number of event slots reserved up front.
    pub fn with_queue_capacity(self, queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            ..self
        }
    }
}
