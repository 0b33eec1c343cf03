//! x86-64 general-purpose registers and the fixed ABI assignment a trace
//! uses throughout its body.

/// A general-purpose x86-64 register, by its 64-bit name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// The 3-bit field encoded in ModRM/opcode bytes.
    pub fn low_bits(self) -> u8 {
        self as u8 & 0x7
    }

    /// Whether this register needs `REX.B`/`REX.R`/`REX.X` set, i.e. is one
    /// of r8-r15.
    pub fn needs_rex_extension(self) -> bool {
        (self as u8) >= 8
    }
}

/// Condition codes used by `Jcc`/`SETcc`, named the way the comparison
/// opcodes (`=`, `(`, `)`) use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    /// Equal / zero (ZF=1).
    Eq,
    /// Not equal (ZF=0).
    Ne,
    /// Signed less-than.
    Lt,
    /// Signed less-or-equal.
    Le,
    /// Signed greater-than.
    Gt,
    /// Signed greater-or-equal.
    Ge,
    /// CF=1 ("below"). `FUCOMIP`/`FCOMIP` never touch SF/OF, only ZF/PF/CF,
    /// so a float less-than test after one of those needs this instead of
    /// the signed `Lt`.
    Below,
    /// CF=0 and ZF=0 ("above"), the `FUCOMIP`/`FCOMIP` counterpart to `Gt`.
    Above,
}

impl Cond {
    /// The `cc` nibble used by both `0F 8x` (Jcc) and `0F 9x` (SETcc).
    pub fn cc_bits(self) -> u8 {
        match self {
            Cond::Eq => 0x4,
            Cond::Ne => 0x5,
            Cond::Lt => 0xC,
            Cond::Ge => 0xD,
            Cond::Le => 0xE,
            Cond::Gt => 0xF,
            Cond::Below => 0x2,
            Cond::Above => 0x7,
        }
    }

    /// Flip the sense, used when a fused `?!` predicate inverts the skip.
    pub fn inverted(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Below => Cond::Above,
            Cond::Above => Cond::Below,
        }
    }
}

/// Fixed register assignments held across an entire trace.
/// Callee-saved registers are used so a single prologue/epilogue pair can
/// save and restore them without the emitters needing to know about it.
pub mod fixed {
    use super::Reg;

    /// Pointer one cell past the last used stack cell.
    pub const R_STACKTOP: Reg = Reg::R12;
    /// Count of items currently on the stack.
    pub const R_STACKNUM: Reg = Reg::R13;
    /// Pointer to the caller-supplied stack descriptor.
    pub const R_STACK: Reg = Reg::R14;
    /// Pointer to the caller-supplied end-state slot.
    pub const END_STATE: Reg = Reg::R15;
    /// Return value register (0 success, 1 underflow, 2 division by zero)
    /// — also the first scratch register for emitters that don't need it
    /// live yet.
    pub const R_RET: Reg = Reg::Rax;

    /// General scratch registers free for emitters to clobber between
    /// instructions (never live across an opcode boundary).
    pub const SCRATCH0: Reg = Reg::Rbx;
    pub const SCRATCH1: Reg = Reg::Rcx;
    pub const SCRATCH2: Reg = Reg::Rdx;
}
