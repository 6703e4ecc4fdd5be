use vmi_core::Asid;

/// `CR3` control register.
///
/// Contains the physical address of the page directory base and controls page
/// directory caching.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cr3(pub u64);

impl From<u64> for Cr3 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Cr3> for u64 {
    fn from(value: Cr3) -> Self {
        value.0
    }
}

/// The address space is identified by the raw register value, exactly as the
/// kernel reports it in task-switch events.
impl From<Cr3> for Asid {
    fn from(value: Cr3) -> Self {
        Self(value.0)
    }
}
