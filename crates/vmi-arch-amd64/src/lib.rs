//! AMD64 architecture definitions.

mod address;
mod cr3;
mod registers;

use vmi_core::Architecture;

pub use self::{
    address::{is_canonical, sign_extend},
    cr3::Cr3,
    registers::Registers,
};

/// AMD64 architecture.
#[derive(Debug)]
pub struct Amd64;

impl Architecture for Amd64 {
    const VIRTUAL_ADDRESS_WIDTH: u32 = 48;

    type Registers = Registers;
}
