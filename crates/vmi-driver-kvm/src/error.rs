/// Error type for the KVM driver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The kernel reported an event of an unknown type.
    #[error("unknown VMI event type {0}")]
    UnknownEvent(u32),

    /// A raw event or record was shorter than its kernel layout.
    #[error("truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        /// The record being decoded.
        what: &'static str,

        /// The size of the kernel layout.
        expected: usize,

        /// The size of the supplied buffer.
        actual: usize,
    },

    /// The kernel reported more branch records than the hardware holds.
    #[error("invalid LBR entry count {0}")]
    InvalidLbrEntries(u32),

    /// More vCPU descriptors were supplied than a [`VcpuId`] can address.
    ///
    /// [`VcpuId`]: vmi_core::VcpuId
    #[error("{0} vCPUs exceed the addressable range")]
    TooManyVcpus(usize),

    /// The given virtual CPU has no file descriptor.
    #[error("vCPU {0} not found")]
    VcpuNotFound(vmi_core::VcpuId),
}

impl From<Error> for vmi_core::VmiError {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(error) => Self::Io(error),
            Error::VcpuNotFound(vcpu) => Self::VcpuNotFound(vcpu),
            error => Self::driver(error),
        }
    }
}
