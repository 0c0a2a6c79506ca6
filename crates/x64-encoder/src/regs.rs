//! x86-64 general-purpose registers.

/// x86-64 general-purpose register, numbered per the ModR/M `reg`/`rm`
/// field encoding (0=RAX .. 7=RDI, 8=R8 .. 15=R15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(u8);

impl Reg {
    /// Create a new register from its encoding number (0-15).
    ///
    /// # Panics
    ///
    /// Panics if the register number is >= 16.
    pub fn new(num: u8) -> Self {
        assert!(num < 16, "register number must be < 16");
        Self(num)
    }

    /// Get the register's encoding number (0-15).
    pub fn num(&self) -> u8 {
        self.0
    }

    /// True for R8-R15: the extended registers that need REX.B/R/X to
    /// address and whose low 3 bits alias a non-extended register.
    pub fn is_extended(&self) -> bool {
        self.0 >= 8
    }

    /// The 3-bit field stored directly in a ModR/M byte.
    pub fn low3(&self) -> u8 {
        self.0 & 0b111
    }
}

// Named registers, in System V AMD64 calling convention order.
impl Reg {
    // caller-saved, holds return values
    pub const RAX: Reg = Reg(0);
    // argument 4
    pub const RCX: Reg = Reg(1);
    // argument 3
    pub const RDX: Reg = Reg(2);
    // callee-saved
    pub const RBX: Reg = Reg(3);
    // stack pointer
    pub const RSP: Reg = Reg(4);
    // callee-saved, frame pointer
    pub const RBP: Reg = Reg(5);
    // argument 2
    pub const RSI: Reg = Reg(6);
    // argument 1
    pub const RDI: Reg = Reg(7);
    // argument 5
    pub const R8: Reg = Reg(8);
    // argument 6
    pub const R9: Reg = Reg(9);
    // caller-saved
    pub const R10: Reg = Reg(10);
    // caller-saved
    pub const R11: Reg = Reg(11);
    // callee-saved
    pub const R12: Reg = Reg(12);
    // callee-saved
    pub const R13: Reg = Reg(13);
    // callee-saved
    pub const R14: Reg = Reg(14);
    // callee-saved
    pub const R15: Reg = Reg(15);
}
