use vmi_core::Asid;

use super::{Amd64, Cr3};

/// The state of the CPU registers.
#[expect(missing_docs)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,

    pub cr0: u64,
    pub cr2: u64,
    pub cr3: Cr3,
    pub cr4: u64,
}

impl vmi_core::Registers for Registers {
    type Architecture = Amd64;

    fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    fn address_space(&self) -> Asid {
        Asid::from(self.cr3)
    }
}
