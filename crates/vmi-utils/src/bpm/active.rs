use std::collections::{HashMap, hash_map::Entry};

use indexmap::IndexMap;
use vmi_core::{Breakpoint, Va, VcpuId};

/// Ledger of the breakpoints currently present in hardware.
///
/// * Key: vCPU
/// * Value: Map of installed breakpoints, keyed by their virtual address
///
/// A vCPU holds at most one hardware breakpoint per address. When an
/// ASID-scoped and a global breakpoint share an address, only the scoped one
/// is installed.
#[derive(Debug, Default)]
pub(super) struct ActiveBreakpoints {
    vcpus: HashMap<VcpuId, IndexMap<Va, Breakpoint>>,
}

impl ActiveBreakpoints {
    pub fn get(&self, vcpu: VcpuId, va: Va) -> Option<&Breakpoint> {
        self.vcpus.get(&vcpu)?.get(&va)
    }

    pub fn insert(&mut self, vcpu: VcpuId, breakpoint: Breakpoint) {
        self.vcpus
            .entry(vcpu)
            .or_default()
            .insert(breakpoint.va, breakpoint);
    }

    pub fn remove(&mut self, vcpu: VcpuId, va: Va) -> Option<Breakpoint> {
        match self.vcpus.entry(vcpu) {
            Entry::Occupied(mut entry) => {
                let breakpoint = entry.get_mut().shift_remove(&va);

                if entry.get().is_empty() {
                    entry.remove();
                }

                breakpoint
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Returns the vCPUs on which `breakpoint` is installed.
    pub fn vcpus_with(&self, breakpoint: &Breakpoint) -> Vec<VcpuId> {
        let mut vcpus = self
            .vcpus
            .iter()
            .filter(|(_, installed)| installed.get(&breakpoint.va) == Some(breakpoint))
            .map(|(vcpu, _)| *vcpu)
            .collect::<Vec<_>>();

        vcpus.sort_unstable();
        vcpus
    }

    pub fn iter(&self, vcpu: VcpuId) -> impl Iterator<Item = &Breakpoint> {
        self.vcpus.get(&vcpu).into_iter().flat_map(|map| map.values())
    }

    pub fn clear(&mut self) {
        self.vcpus.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.vcpus.is_empty()
    }
}
