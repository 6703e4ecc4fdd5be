mod address;
mod info;
pub(crate) mod macros;
mod vcpu_id;

pub use self::{
    address::{Asid, Va},
    info::VmiInfo,
    vcpu_id::VcpuId,
};
