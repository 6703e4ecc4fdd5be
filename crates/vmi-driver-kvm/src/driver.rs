use std::os::fd::{AsRawFd as _, OwnedFd};

use smallvec::SmallVec;
use vmi_core::{Feature, LbrInfo, VcpuId, VmiInfo};
use zerocopy::FromZeros as _;

use crate::{
    Error,
    sys::{
        KVM_VMI_FEATURE_LBR, KVM_VMI_FEATURE_MTF, KVM_VMI_FEATURE_TRAP_TASK_SWITCH,
        KVM_VMI_FEATURE_UPDATE, KVM_VMI_GET_LBR, KvmVmiFeature, KvmVmiLbrInfo, MAX_LBR_ENTRIES,
    },
};

/// Encodes a feature update into its kernel layout.
pub(crate) fn encode_feature(feature: Feature) -> KvmVmiFeature {
    match feature {
        Feature::TaskSwitch {
            enable,
            asid,
            trap_in,
            trap_out,
        } => KvmVmiFeature {
            feature: KVM_VMI_FEATURE_TRAP_TASK_SWITCH,
            enable: enable.into(),
            value: asid.0,
            trap_in: trap_in.into(),
            trap_out: trap_out.into(),
            ..Default::default()
        },
        Feature::LastBranchRecord { enable, select } => KvmVmiFeature {
            feature: KVM_VMI_FEATURE_LBR,
            enable: enable.into(),
            value: select,
            ..Default::default()
        },
        Feature::MonitorTrapFlag { enable } => KvmVmiFeature {
            feature: KVM_VMI_FEATURE_MTF,
            enable: enable.into(),
            ..Default::default()
        },
    }
}

/// Converts a kernel branch record into [`LbrInfo`].
///
/// Each list is built exactly once from the valid prefix of the record.
pub(crate) fn decode_lbr(info: &KvmVmiLbrInfo) -> Result<LbrInfo, Error> {
    let entries = info.entries as usize;
    if entries > MAX_LBR_ENTRIES {
        return Err(Error::InvalidLbrEntries(info.entries));
    }

    Ok(LbrInfo {
        entries: info.entries,
        tos: info.tos,
        from: SmallVec::from_slice(&info.from[..entries]),
        to: SmallVec::from_slice(&info.to[..entries]),
    })
}

/// Feature interface of the KVM VMI extension over vCPU file descriptors.
pub struct KvmDriver {
    vcpus: Vec<OwnedFd>,
}

impl KvmDriver {
    pub fn new(vcpus: Vec<OwnedFd>) -> Self {
        Self { vcpus }
    }

    pub fn info(&self) -> Result<VmiInfo, Error> {
        Ok(VmiInfo {
            vcpus: vcpu_count(self.vcpus.len())?,
        })
    }

    pub fn update_feature(&self, feature: Feature) -> Result<(), Error> {
        let request = encode_feature(feature);

        for (index, fd) in self.vcpus.iter().enumerate() {
            // SAFETY: `fd` is an open vCPU descriptor and `request` is a valid
            // `union kvm_vmi_feature` that outlives the call.
            let result = unsafe {
                libc::ioctl(
                    fd.as_raw_fd(),
                    KVM_VMI_FEATURE_UPDATE as _,
                    &raw const request,
                )
            };

            if result < 0 {
                let err = std::io::Error::last_os_error();
                tracing::error!(vcpu = index, ?feature, %err, "feature update failed");
                return Err(Error::Io(err));
            }
        }

        tracing::debug!(?feature, "feature updated");
        Ok(())
    }

    pub fn last_branch_record(&self, vcpu: VcpuId) -> Result<LbrInfo, Error> {
        let fd = self
            .vcpus
            .get(vcpu.index())
            .ok_or(Error::VcpuNotFound(vcpu))?;

        let mut info = KvmVmiLbrInfo::new_zeroed();

        // SAFETY: `fd` is an open vCPU descriptor and `info` is a writable
        // `struct kvm_vmi_lbr_info` that outlives the call.
        let result = unsafe { libc::ioctl(fd.as_raw_fd(), KVM_VMI_GET_LBR as _, &raw mut info) };

        if result < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        decode_lbr(&info)
    }
}

fn vcpu_count(count: usize) -> Result<u16, Error> {
    u16::try_from(count).map_err(|_| Error::TooManyVcpus(count))
}
