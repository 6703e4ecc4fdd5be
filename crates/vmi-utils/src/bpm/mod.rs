//! Breakpoint management.
//!
//! The [`BreakpointManager`] owns every breakpoint and watchpoint registered
//! by the monitor, grouped by the address space they apply to. Breakpoints
//! registered for [`Asid::GLOBAL`] apply to every address space.
//!
//! Resolution is two-level: a breakpoint scoped to the current address space
//! takes precedence over a global breakpoint at the same address, and a
//! global breakpoint is only consulted when no scoped one exists.
//!
//! The manager also keeps a per-vCPU ledger of the breakpoints that are
//! actually present in hardware. Breakpoints are only pushed to a vCPU when
//! it executes in the address space they belong to, and are pulled whenever
//! the execution context changes or the VM pauses.

mod active;
#[cfg(test)]
mod tests;

use indexmap::IndexMap;
use vmi_core::{
    Asid, Breakpoint, BreakpointKind, Registers as _, Va, VcpuId, VmiDebug, VmiError, VmiVcpu,
};

use self::active::ActiveBreakpoints;

/// Breakpoint manager.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    /// Registered breakpoints.
    ///
    /// * Key: ASID
    /// * Value: Map of breakpoints, keyed by their virtual address
    ///
    /// An inner map is never empty. It is removed together with its last
    /// breakpoint.
    breakpoints: IndexMap<Asid, IndexMap<Va, Breakpoint>>,

    /// Breakpoints currently installed in hardware.
    active: ActiveBreakpoints,
}

impl BreakpointManager {
    /// Creates a new breakpoint manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a breakpoint.
    ///
    /// Replaces any breakpoint previously registered at the same
    /// `(asid, va)` pair and returns it. The breakpoint is not installed in
    /// hardware until the next [`install_active`] for its address space.
    ///
    /// Fails with [`VmiError::OutOfMemory`] without any side effect when
    /// memory for the new entry cannot be reserved.
    ///
    /// [`install_active`]: Self::install_active
    pub fn insert(&mut self, breakpoint: Breakpoint) -> Result<Option<Breakpoint>, VmiError> {
        self.breakpoints
            .try_reserve(1)
            .map_err(|_| VmiError::OutOfMemory)?;

        let breakpoints = self.breakpoints.entry(breakpoint.asid).or_default();

        if !breakpoints.contains_key(&breakpoint.va) && breakpoints.try_reserve(1).is_err() {
            if breakpoints.is_empty() {
                self.breakpoints.shift_remove(&breakpoint.asid);
            }

            return Err(VmiError::OutOfMemory);
        }

        let previous = breakpoints.insert(breakpoint.va, breakpoint);

        tracing::debug!(
            asid = %breakpoint.asid,
            va = %breakpoint.va,
            kind = %breakpoint.kind,
            replaced = previous.is_some(),
            "breakpoint registered"
        );

        Ok(previous)
    }

    /// Unregisters the breakpoint at `(asid, va)`.
    ///
    /// The breakpoint is also pulled from every vCPU it is installed on. If
    /// it shadowed a global breakpoint at the same address, the global one
    /// takes its place there.
    ///
    /// Returns `None` if no such breakpoint was registered.
    pub fn remove<Driver>(
        &mut self,
        driver: &Driver,
        asid: Asid,
        va: Va,
    ) -> Result<Option<Breakpoint>, VmiError>
    where
        Driver: VmiDebug,
    {
        let breakpoint = match self.breakpoints.get_mut(&asid) {
            Some(breakpoints) => {
                let breakpoint = breakpoints.shift_remove(&va);

                if breakpoints.is_empty() {
                    self.breakpoints.shift_remove(&asid);
                }

                breakpoint
            }
            None => None,
        };

        let breakpoint = match breakpoint {
            Some(breakpoint) => breakpoint,
            None => return Ok(None),
        };

        tracing::debug!(%asid, %va, "breakpoint unregistered");

        self.deactivate(driver, &breakpoint)?;
        Ok(Some(breakpoint))
    }

    /// Pulls `breakpoint` from every vCPU it is installed on.
    ///
    /// On each of those vCPUs, the breakpoint that now resolves at the same
    /// address (a replacement registered for the same address space, or the
    /// global breakpoint it shadowed) is installed in its place.
    pub fn deactivate<Driver>(
        &mut self,
        driver: &Driver,
        breakpoint: &Breakpoint,
    ) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        let successor = self.resolve(breakpoint.asid, breakpoint.va).copied();

        for vcpu in self.active.vcpus_with(breakpoint) {
            self.uninstall(driver, vcpu, breakpoint)?;

            if let Some(successor) = successor {
                self.install(driver, vcpu, successor)?;
            }
        }

        Ok(())
    }

    /// Returns the breakpoint registered at exactly `(asid, va)`.
    pub fn get(&self, asid: Asid, va: Va) -> Option<&Breakpoint> {
        self.breakpoints.get(&asid)?.get(&va)
    }

    /// Resolves a breakpoint hit.
    ///
    /// Looks up `(asid, va)` first and falls back to the global breakpoint
    /// at `va`. A breakpoint of a different kind is treated as a miss at
    /// that level.
    pub fn lookup(&self, asid: Asid, va: Va, kind: BreakpointKind) -> Option<&Breakpoint> {
        self.get(asid, va)
            .filter(|breakpoint| breakpoint.kind == kind)
            .or_else(|| {
                self.get(Asid::GLOBAL, va)
                    .filter(|breakpoint| breakpoint.kind == kind)
            })
    }

    /// Returns the breakpoint that applies at `va` in `asid`, regardless of
    /// its kind.
    fn resolve(&self, asid: Asid, va: Va) -> Option<&Breakpoint> {
        self.get(asid, va).or_else(|| self.get(Asid::GLOBAL, va))
    }

    /// Checks if at least one breakpoint is registered for `asid`.
    pub fn has_any(&self, asid: Asid) -> bool {
        self.breakpoints.contains_key(&asid)
    }

    /// Returns the number of registered breakpoints.
    pub fn len(&self) -> usize {
        self.breakpoints.values().map(IndexMap::len).sum()
    }

    /// Checks if no breakpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Returns an iterator over the address spaces owning breakpoints.
    pub fn asids(&self) -> impl Iterator<Item = Asid> + '_ {
        self.breakpoints.keys().copied()
    }

    /// Returns an iterator over all registered breakpoints.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values().flat_map(IndexMap::values)
    }

    /// Returns an iterator over the breakpoints installed on `vcpu`.
    pub fn installed(&self, vcpu: VcpuId) -> impl Iterator<Item = &Breakpoint> {
        self.active.iter(vcpu)
    }

    /// Checks if `breakpoint` is installed on `vcpu`.
    pub fn is_installed(&self, vcpu: VcpuId, breakpoint: &Breakpoint) -> bool {
        self.active.get(vcpu, breakpoint.va) == Some(breakpoint)
    }

    /// Checks if any breakpoint is installed on any vCPU.
    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Installs the breakpoints that apply to `asid` on `vcpu`.
    ///
    /// After this call, `vcpu` holds exactly the breakpoints registered for
    /// `asid` plus every global breakpoint not shadowed by them. Installed
    /// breakpoints that no longer apply are pulled. Breakpoints already in
    /// place are left untouched.
    ///
    /// The register and debug state of `vcpu` must already be synchronized
    /// from hardware.
    pub fn install_active<Driver>(
        &mut self,
        driver: &Driver,
        vcpu: VcpuId,
        asid: Asid,
    ) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        let mut desired = IndexMap::new();

        if let Some(breakpoints) = self.breakpoints.get(&Asid::GLOBAL) {
            desired.extend(breakpoints.iter().map(|(va, bp)| (*va, *bp)));
        }

        if !asid.is_global()
            && let Some(breakpoints) = self.breakpoints.get(&asid)
        {
            desired.extend(breakpoints.iter().map(|(va, bp)| (*va, *bp)));
        }

        let stale = self
            .active
            .iter(vcpu)
            .filter(|breakpoint| desired.get(&breakpoint.va) != Some(*breakpoint))
            .copied()
            .collect::<Vec<_>>();

        for breakpoint in &stale {
            self.uninstall(driver, vcpu, breakpoint)?;
        }

        for breakpoint in desired.into_values() {
            if self.is_installed(vcpu, &breakpoint) {
                continue;
            }

            self.install(driver, vcpu, breakpoint)?;
        }

        Ok(())
    }

    /// Pulls the breakpoints registered for `asid`, and every global
    /// breakpoint, from `vcpu`.
    pub fn uninstall_active<Driver>(
        &mut self,
        driver: &Driver,
        vcpu: VcpuId,
        asid: Asid,
    ) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        let installed = self
            .active
            .iter(vcpu)
            .filter(|breakpoint| breakpoint.global() || breakpoint.asid == asid)
            .copied()
            .collect::<Vec<_>>();

        for breakpoint in &installed {
            self.uninstall(driver, vcpu, breakpoint)?;
        }

        Ok(())
    }

    /// Swaps the breakpoints of `vcpu` after it switched from `old` to
    /// `new`.
    ///
    /// Global breakpoints stay in place unless the new address space
    /// shadows them.
    pub fn refresh<Driver>(
        &mut self,
        driver: &Driver,
        vcpu: VcpuId,
        old: Asid,
        new: Asid,
    ) -> Result<(), VmiError>
    where
        Driver: VmiVcpu + VmiDebug,
    {
        driver.synchronize(vcpu)?;

        tracing::debug!(%vcpu, %old, %new, "refreshing breakpoints");
        self.install_active(driver, vcpu, new)
    }

    /// Installs the applicable breakpoints on every vCPU, each according to
    /// the address space it is currently executing in.
    pub fn install_all<Driver>(&mut self, driver: &Driver) -> Result<(), VmiError>
    where
        Driver: VmiVcpu + VmiDebug,
    {
        for vcpu in driver.info()?.vcpu_ids() {
            driver.synchronize(vcpu)?;
            let asid = driver.registers(vcpu)?.address_space();
            self.install_active(driver, vcpu, asid)?;
        }

        Ok(())
    }

    /// Clears every hardware breakpoint on every vCPU.
    ///
    /// Every vCPU is cleared even if some of them fail. The ledger is emptied
    /// and the first error is returned.
    pub fn remove_all_active<Driver>(&mut self, driver: &Driver) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        let info = match driver.info() {
            Ok(info) => info,
            Err(err) => {
                self.active.clear();
                return Err(err);
            }
        };

        let mut result = Ok(());

        for vcpu in info.vcpu_ids() {
            if let Err(err) = driver.remove_all_breakpoints(vcpu) {
                tracing::error!(%vcpu, %err, "failed to remove breakpoints");

                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        self.active.clear();
        result
    }

    /// Pulls every breakpoint from hardware and unregisters all of them.
    pub fn clear<Driver>(&mut self, driver: &Driver) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        let result = self.remove_all_active(driver);
        self.breakpoints.clear();
        result
    }

    fn install<Driver>(
        &mut self,
        driver: &Driver,
        vcpu: VcpuId,
        breakpoint: Breakpoint,
    ) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        if let Some(installed) = self.active.get(vcpu, breakpoint.va).copied() {
            self.uninstall(driver, vcpu, &installed)?;
        }

        driver.insert_breakpoint(vcpu, breakpoint.va, breakpoint.length, breakpoint.kind)?;
        self.active.insert(vcpu, breakpoint);

        tracing::debug!(
            %vcpu,
            asid = %breakpoint.asid,
            va = %breakpoint.va,
            kind = %breakpoint.kind,
            "breakpoint installed"
        );

        Ok(())
    }

    fn uninstall<Driver>(
        &mut self,
        driver: &Driver,
        vcpu: VcpuId,
        breakpoint: &Breakpoint,
    ) -> Result<(), VmiError>
    where
        Driver: VmiDebug,
    {
        driver.remove_breakpoint(vcpu, breakpoint.va, breakpoint.length, breakpoint.kind)?;
        self.active.remove(vcpu, breakpoint.va);

        tracing::debug!(
            %vcpu,
            asid = %breakpoint.asid,
            va = %breakpoint.va,
            "breakpoint uninstalled"
        );

        Ok(())
    }
}
