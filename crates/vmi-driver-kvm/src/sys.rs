//! Kernel ABI of the KVM VMI extension (`linux/kvm_vmi.h`).
//!
//! Every structure mirrors the C layout on x86_64, with the implicit padding
//! spelled out. Booleans are carried as `u8`.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The KVM ioctl type.
pub const KVMIO: u32 = 0xAE;

/// Maximum number of branch records reported by the kernel.
pub const MAX_LBR_ENTRIES: usize = 16;

/// `KVM_VMI_FEATURE_TRAP_TASK_SWITCH`
pub const KVM_VMI_FEATURE_TRAP_TASK_SWITCH: u32 = 0;
/// `KVM_VMI_FEATURE_LBR`
pub const KVM_VMI_FEATURE_LBR: u32 = 1;
/// `KVM_VMI_FEATURE_MTF`
pub const KVM_VMI_FEATURE_MTF: u32 = 2;

/// `KVM_VMI_EVENT_TASK_SWITCH`
pub const KVM_VMI_EVENT_TASK_SWITCH: u32 = 0;
/// `KVM_VMI_EVENT_DEBUG`
pub const KVM_VMI_EVENT_DEBUG: u32 = 1;
/// `KVM_VMI_EVENT_MTF`
pub const KVM_VMI_EVENT_MTF: u32 = 2;

/// Exit reason reported in `kvm_run` when a VMI event is pending.
pub const KVM_EXIT_VMI_EVENT: u32 = 1337;

/// Encodes the number of an ioctl that passes data to the kernel.
pub const fn iow(ty: u32, nr: u32, size: usize) -> u32 {
    const IOC_WRITE: u32 = 1;

    (IOC_WRITE << 30) | ((size as u32) << 16) | (ty << 8) | nr
}

/// `KVM_VMI_FEATURE_UPDATE`
pub const KVM_VMI_FEATURE_UPDATE: u32 = iow(KVMIO, 0xc0, size_of::<KvmVmiFeature>());

/// `KVM_VMI_GET_LBR`
pub const KVM_VMI_GET_LBR: u32 = iow(KVMIO, 0xc2, size_of::<KvmVmiLbrInfo>());

/// `union kvm_vmi_feature`.
///
/// The layout matches every member of the union. `value` holds `dtb` for a
/// task-switch trap and `lbr_select` for the last-branch record. `trap_in`
/// and `trap_out` are only meaningful for a task-switch trap.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct KvmVmiFeature {
    /// `KVM_VMI_FEATURE_*`
    pub feature: u32,

    /// Enables or disables the feature.
    pub enable: u8,

    #[doc(hidden)]
    pub _pad0: [u8; 3],

    /// Address-space base or branch-record selector.
    pub value: u64,

    /// Trap switches into the address space.
    pub trap_in: u8,

    /// Trap switches out of the address space.
    pub trap_out: u8,

    #[doc(hidden)]
    pub _pad1: [u8; 6],
}

/// `struct kvm_vmi_event_task_switch`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct KvmVmiEventTaskSwitch {
    /// `KVM_VMI_EVENT_TASK_SWITCH`
    pub ty: u32,

    #[doc(hidden)]
    pub _pad0: [u8; 4],

    /// `CR3` being left.
    pub old_cr3: u64,

    /// `CR3` being entered.
    pub new_cr3: u64,
}

/// `struct kvm_vmi_event_debug`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct KvmVmiEventDebug {
    /// `KVM_VMI_EVENT_DEBUG`
    pub ty: u32,

    /// Raised by hardware single-stepping.
    pub single_step: u8,

    /// Raised by a watchpoint.
    pub watchpoint: u8,

    #[doc(hidden)]
    pub _pad0: [u8; 2],

    /// The accessed address.
    pub watchpoint_gva: u64,

    /// `BP_MEM_*` access flags.
    pub watchpoint_flags: i32,

    /// The exception vector.
    pub exception: i32,
}

/// Size of `union kvm_vmi_event`.
pub const KVM_VMI_EVENT_SIZE: usize = 24;

/// `struct kvm_vmi_lbr_info`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct KvmVmiLbrInfo {
    /// Number of valid entries.
    pub entries: u32,

    /// Index of the top of the stack.
    pub tos: u8,

    #[doc(hidden)]
    pub _pad0: [u8; 3],

    /// Branch sources.
    pub from: [u64; MAX_LBR_ENTRIES],

    /// Branch destinations.
    pub to: [u64; MAX_LBR_ENTRIES],
}
