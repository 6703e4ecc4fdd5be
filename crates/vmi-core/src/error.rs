use crate::VcpuId;

/// An error that can occur when working with the VMI.
#[derive(thiserror::Error, Debug)]
pub enum VmiError {
    /// An error occurred in the VMI driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync>),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Memory for a new entry could not be reserved.
    #[error("out of memory")]
    OutOfMemory,

    /// Another virtual CPU already owns the pending single-step.
    #[error("single-step already pending on vCPU {pending} (requested for vCPU {requested})")]
    SingleStepPending {
        /// The virtual CPU the request was made for.
        requested: VcpuId,

        /// The virtual CPU that currently owns the single-step.
        pending: VcpuId,
    },

    /// The given virtual CPU does not exist.
    #[error("vCPU {0} not found")]
    VcpuNotFound(VcpuId),

    /// The VMI session is not initialized.
    #[error("VMI is not initialized")]
    NotInitialized,

    /// The monitor could not be notified.
    #[error("monitor notification failed: {0}")]
    Monitor(Box<dyn std::error::Error + Send + Sync>),

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}

impl VmiError {
    /// Wraps a driver-specific error.
    pub fn driver(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Driver(Box::new(error))
    }
}
