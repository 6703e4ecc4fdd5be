//! VMI driver for the KVM VMI kernel extension.
//!
//! The extension adds a per-vCPU feature-toggle ioctl (task-switch trapping,
//! last-branch recording, monitor trap flag), a branch-record query, and a
//! dedicated exit reason carrying a [`PendingEvent`] in raw form.
//!
//! Register access, single-stepping and hardware breakpoints are owned by
//! the hypervisor's vCPU objects and are not part of this driver.
//!
//! # Composing a hypervisor
//!
//! [`VmiKvmDriver`] implements [`VmiDriver`] and [`VmiFeatures`] only. To
//! drive a `VmiSession`, wrap it in a type that owns the hypervisor's vCPU
//! side as well. The wrapper forwards [`VmiDriver`] and [`VmiFeatures`] to
//! the inner [`VmiKvmDriver`] and implements [`VmiVcpu`] and [`VmiDebug`]
//! over the hypervisor's register and debug accessors. The blanket
//! [`VmiHypervisor`] impl then applies to the wrapper.
//!
//! Every method of the wrapper must be callable from any thread, since the
//! session dispatches events from the control thread while vCPU threads
//! queue them.
//!
//! [`PendingEvent`]: vmi_core::PendingEvent
//! [`VmiDebug`]: vmi_core::VmiDebug
//! [`VmiHypervisor`]: vmi_core::VmiHypervisor
//! [`VmiVcpu`]: vmi_core::VmiVcpu

mod driver;
mod error;
mod event;
pub mod sys;

use std::{marker::PhantomData, os::fd::OwnedFd};

use vmi_arch_amd64::Amd64;
use vmi_core::{Architecture, Feature, LbrInfo, VcpuId, VmiDriver, VmiError, VmiFeatures, VmiInfo};

pub use self::{error::Error, event::decode_event};
use self::driver::KvmDriver;

/// VMI driver for the KVM VMI kernel extension.
pub struct VmiKvmDriver<Arch = Amd64>
where
    Arch: Architecture,
{
    inner: KvmDriver,
    _marker: PhantomData<Arch>,
}

impl<Arch> VmiKvmDriver<Arch>
where
    Arch: Architecture,
{
    /// Creates a new driver over the file descriptors of every vCPU, in
    /// vCPU order.
    pub fn new(vcpus: Vec<OwnedFd>) -> Self {
        Self {
            inner: KvmDriver::new(vcpus),
            _marker: PhantomData,
        }
    }
}

impl<Arch> VmiDriver for VmiKvmDriver<Arch>
where
    Arch: Architecture,
{
    type Architecture = Arch;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        Ok(self.inner.info()?)
    }
}

impl<Arch> VmiFeatures for VmiKvmDriver<Arch>
where
    Arch: Architecture,
{
    fn update_feature(&self, feature: Feature) -> Result<(), VmiError> {
        Ok(self.inner.update_feature(feature)?)
    }

    fn last_branch_record(&self, vcpu: VcpuId) -> Result<LbrInfo, VmiError> {
        Ok(self.inner.last_branch_record(vcpu)?)
    }
}
