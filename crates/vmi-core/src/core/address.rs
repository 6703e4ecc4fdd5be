use super::macros::impl_ops;

impl_ops!(Va, u64, "Guest Virtual Address");
impl_ops!(Asid, u64, "Guest Address-Space Identifier (the page-table base)");

impl Asid {
    /// The reserved identifier for breakpoints that apply regardless of the
    /// active address space.
    pub const GLOBAL: Self = Self(0);

    /// Checks if this is the reserved [`GLOBAL`] identifier.
    ///
    /// [`GLOBAL`]: Self::GLOBAL
    pub fn is_global(self) -> bool {
        self.0 == 0
    }
}
