use crate::{
    Architecture, BreakpointKind, Feature, LbrInfo, Va, VcpuId, VmiError, VmiInfo,
};

/// A trait for implementing a VMI driver.
///
/// The driver is the boundary to the hypervisor. The capabilities it offers
/// are split across [`VmiVcpu`], [`VmiDebug`] and [`VmiFeatures`].
pub trait VmiDriver {
    /// The architecture supported by the driver.
    type Architecture: Architecture + ?Sized;

    /// Retrieves information about the virtual machine.
    fn info(&self) -> Result<VmiInfo, VmiError>;
}

/// Access to the per-vCPU state of the hypervisor.
pub trait VmiVcpu: VmiDriver {
    /// Synchronizes the cached register and debug state of a virtual CPU
    /// from the hardware.
    fn synchronize(&self, vcpu: VcpuId) -> Result<(), VmiError>;

    /// Retrieves the registers of a specific virtual CPU.
    fn registers(
        &self,
        vcpu: VcpuId,
    ) -> Result<<Self::Architecture as Architecture>::Registers, VmiError>;

    /// Sets the registers of a specific virtual CPU.
    fn set_registers(
        &self,
        vcpu: VcpuId,
        registers: <Self::Architecture as Architecture>::Registers,
    ) -> Result<(), VmiError>;

    /// Enables or disables hardware single-stepping of a virtual CPU.
    fn set_single_step(&self, vcpu: VcpuId, enable: bool) -> Result<(), VmiError>;

    /// Flushes cached translations (e.g. translated code blocks) of a
    /// virtual CPU.
    fn flush_translation_cache(&self, vcpu: VcpuId) -> Result<(), VmiError>;
}

/// Access to the per-vCPU hardware breakpoint registers.
pub trait VmiDebug: VmiDriver {
    /// Inserts a hardware breakpoint into a virtual CPU.
    fn insert_breakpoint(
        &self,
        vcpu: VcpuId,
        va: Va,
        length: u64,
        kind: BreakpointKind,
    ) -> Result<(), VmiError>;

    /// Removes a hardware breakpoint from a virtual CPU.
    fn remove_breakpoint(
        &self,
        vcpu: VcpuId,
        va: Va,
        length: u64,
        kind: BreakpointKind,
    ) -> Result<(), VmiError>;

    /// Removes every hardware breakpoint from a virtual CPU.
    fn remove_all_breakpoints(&self, vcpu: VcpuId) -> Result<(), VmiError>;
}

/// Access to the feature-toggle interface of the kernel virtualization
/// engine.
pub trait VmiFeatures: VmiDriver {
    /// Applies a feature update to every virtual CPU.
    fn update_feature(&self, feature: Feature) -> Result<(), VmiError>;

    /// Retrieves the last-branch record of a virtual CPU.
    fn last_branch_record(&self, vcpu: VcpuId) -> Result<LbrInfo, VmiError>;
}

/// A driver offering every capability the coordination logic consumes.
pub trait VmiHypervisor: VmiVcpu + VmiDebug + VmiFeatures {}
impl<T> VmiHypervisor for T where T: VmiVcpu + VmiDebug + VmiFeatures {}
