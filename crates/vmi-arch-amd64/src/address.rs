use vmi_core::{Architecture as _, Va};

use crate::Amd64;

/// Sign-extends a virtual address from bit 47.
///
/// `sign_extend(Va(0x0000_8000_0000_0000)) == Va(0xffff_8000_0000_0000)`.
pub fn sign_extend(va: Va) -> Va {
    Amd64::canonical_address(va)
}

/// Checks if a virtual address is already in canonical form.
pub fn is_canonical(va: Va) -> bool {
    sign_extend(va) == va
}
