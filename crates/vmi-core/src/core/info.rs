use serde::{Deserialize, Serialize};

use crate::VcpuId;

/// Represents information about the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmiInfo {
    /// The number of virtual CPUs.
    pub vcpus: u16,
}

impl VmiInfo {
    /// Returns an iterator over the identifiers of all virtual CPUs.
    pub fn vcpu_ids(&self) -> impl Iterator<Item = VcpuId> + use<> {
        (0..self.vcpus).map(VcpuId)
    }

    /// Checks if the given virtual CPU exists.
    pub fn contains(&self, vcpu: VcpuId) -> bool {
        vcpu.0 < self.vcpus
    }
}
