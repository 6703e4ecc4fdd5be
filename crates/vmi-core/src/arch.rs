//! Architecture abstraction.
//!
//! The coordination logic never touches a concrete register layout. It only
//! needs the current instruction pointer, the current address-space base and
//! the rule that turns a raw guest virtual address into its canonical form.

use std::fmt::Debug;

use crate::{Asid, Va};

/// Defines an interface for CPU architecture-specific operations and constants.
pub trait Architecture {
    /// Number of significant bits in a guest virtual address.
    ///
    /// # Architecture-specific
    ///
    /// - **AMD64**: `48` (4-level paging)
    const VIRTUAL_ADDRESS_WIDTH: u32;

    /// The complete set of CPU registers for the architecture.
    type Registers: Registers;

    /// Converts a raw virtual address into its canonical form.
    ///
    /// Addresses are sign-extended from bit [`VIRTUAL_ADDRESS_WIDTH`]` - 1`,
    /// so low and high canonical ranges compare equal to their mathematically
    /// signed representation.
    ///
    /// [`VIRTUAL_ADDRESS_WIDTH`]: Self::VIRTUAL_ADDRESS_WIDTH
    fn canonical_address(va: Va) -> Va {
        let shift = 64 - Self::VIRTUAL_ADDRESS_WIDTH;
        Va((((va.0 as i64) << shift) >> shift) as u64)
    }
}

/// Complete set of CPU registers for a specific architecture.
pub trait Registers
where
    Self: Debug + Default + Clone + Copy,
{
    /// The specific CPU architecture implementation.
    type Architecture: Architecture + ?Sized;

    /// Returns the current value of the instruction pointer.
    ///
    /// # Architecture-specific
    ///
    /// - **AMD64**: `RIP`
    fn instruction_pointer(&self) -> u64;

    /// Returns the identifier of the address space the vCPU is executing in.
    ///
    /// # Architecture-specific
    ///
    /// - **AMD64**: the raw `CR3` value
    fn address_space(&self) -> Asid;
}
