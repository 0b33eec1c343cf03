//! A thin macro assembler over x86-64: encodes the handful of instruction
//! forms the opcode emitters need directly into a `CodeBuffer`, with
//! label references routed through `Labels`. It only implements what the
//! opcode catalogue actually uses; there is no general-purpose
//! disassembler or operand-sum-type the way a full backend would have
//! (a richer version would add one).

use super::buffer::CodeBuffer;
use super::labels::Labels;
use super::regs::{Cond, Reg};

const REX_W: u8 = 0x48;

fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// The assembler state for one trace: the byte buffer plus its label table.
#[derive(Debug, Default)]
pub struct Assembler {
    /// Bytes emitted so far.
    pub buf: CodeBuffer,
    /// Forward/backward label table for this trace.
    pub labels: Labels,
}

impl Assembler {
    /// A fresh assembler with an empty buffer.
    pub fn new() -> Self {
        Assembler::default()
    }

    /// Current emission offset.
    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    // -- data movement -----------------------------------------------------

    /// `mov dst, imm64` — the only way to materialize a 64-bit constant.
    pub fn mov_reg_imm64(&mut self, dst: Reg, imm: i64) {
        self.buf.push_u8(rex(true, false, false, dst.needs_rex_extension()));
        self.buf.push_u8(0xB8 | dst.low_bits());
        self.buf.push_i64(imm);
    }

    /// `mov dst, src` (64-bit register to register).
    pub fn mov_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.buf.push_u8(rex(true, src.needs_rex_extension(), false, dst.needs_rex_extension()));
        self.buf.push_u8(0x89);
        self.buf.push_u8(modrm(0b11, src.low_bits(), dst.low_bits()));
    }

    /// `mov dst, [base+disp]` — 64-bit load.
    pub fn mov_reg_mem(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.buf.push_u8(rex(true, dst.needs_rex_extension(), false, base.needs_rex_extension()));
        self.buf.push_u8(0x8B);
        self.emit_modrm_disp(dst, base, disp);
    }

    /// `mov [base+disp], src` — 64-bit store.
    pub fn mov_mem_reg(&mut self, base: Reg, disp: i32, src: Reg) {
        self.buf.push_u8(rex(true, src.needs_rex_extension(), false, base.needs_rex_extension()));
        self.buf.push_u8(0x89);
        self.emit_modrm_disp(src, base, disp);
    }

    /// `mov byte [base+disp], imm8` — used for the 1-byte tag write.
    pub fn mov_mem8_imm8(&mut self, base: Reg, disp: i32, imm: u8) {
        if base.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0xC6);
        self.emit_modrm_disp(Reg::Rax, base, disp); // reg field is the /0 extension for this opcode
        self.buf.push_u8(imm);
    }

    /// `mov byte [base+disp], src8` — store the low byte of a register,
    /// used to copy a tag byte whose value isn't known until runtime
    /// (dup/swap/rotate move a cell without deciding its tag).
    pub fn mov_mem8_reg8(&mut self, base: Reg, disp: i32, src: Reg) {
        if src.needs_rex_extension() || base.needs_rex_extension() {
            self.buf.push_u8(rex(false, src.needs_rex_extension(), false, base.needs_rex_extension()));
        }
        self.buf.push_u8(0x88);
        self.emit_modrm_disp(src, base, disp);
    }

    /// `movzx dst, byte [base+disp]` — used for the 1-byte tag read.
    pub fn movzx_reg_mem8(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.buf.push_u8(rex(true, dst.needs_rex_extension(), false, base.needs_rex_extension()));
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0xB6);
        self.emit_modrm_disp(dst, base, disp);
    }

    /// `movzx dst64, src8` — zero-extend a byte register (e.g. after `setcc`).
    pub fn movzx_reg_reg8(&mut self, dst: Reg, src: Reg) {
        self.buf.push_u8(rex(true, dst.needs_rex_extension(), false, src.needs_rex_extension()));
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0xB6);
        self.buf.push_u8(modrm(0b11, dst.low_bits(), src.low_bits()));
    }

    // -- arithmetic ----------------------------------------------------------

    /// `add dst, src`.
    pub fn add_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.buf.push_u8(rex(true, src.needs_rex_extension(), false, dst.needs_rex_extension()));
        self.buf.push_u8(0x01);
        self.buf.push_u8(modrm(0b11, src.low_bits(), dst.low_bits()));
    }

    /// `sub dst, src`.
    pub fn sub_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.buf.push_u8(rex(true, src.needs_rex_extension(), false, dst.needs_rex_extension()));
        self.buf.push_u8(0x29);
        self.buf.push_u8(modrm(0b11, src.low_bits(), dst.low_bits()));
    }

    /// `imul dst, src`.
    pub fn imul_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.buf.push_u8(rex(true, dst.needs_rex_extension(), false, src.needs_rex_extension()));
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0xAF);
        self.buf.push_u8(modrm(0b11, dst.low_bits(), src.low_bits()));
    }

    /// `cqo` — sign-extend RAX into RDX:RAX, ahead of `idiv`.
    pub fn cqo(&mut self) {
        self.buf.push_u8(REX_W);
        self.buf.push_u8(0x99);
    }

    /// `idiv divisor` — signed divide RDX:RAX by `divisor`; quotient in
    /// RAX, remainder in RDX (`%`'s contract reads RDX).
    pub fn idiv_reg(&mut self, divisor: Reg) {
        self.buf.push_u8(rex(true, false, false, divisor.needs_rex_extension()));
        self.buf.push_u8(0xF7);
        self.buf.push_u8(modrm(0b11, 7, divisor.low_bits()));
    }

    /// `add dst, imm32`.
    pub fn add_reg_imm32(&mut self, dst: Reg, imm: i32) {
        self.buf.push_u8(rex(true, false, false, dst.needs_rex_extension()));
        self.buf.push_u8(0x81);
        self.buf.push_u8(modrm(0b11, 0, dst.low_bits()));
        self.buf.push_i32(imm);
    }

    /// `sub dst, imm32`.
    pub fn sub_reg_imm32(&mut self, dst: Reg, imm: i32) {
        self.buf.push_u8(rex(true, false, false, dst.needs_rex_extension()));
        self.buf.push_u8(0x81);
        self.buf.push_u8(modrm(0b11, 5, dst.low_bits()));
        self.buf.push_i32(imm);
    }

    /// `xor dst, dst` — the usual zeroing idiom.
    pub fn xor_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.buf.push_u8(rex(true, src.needs_rex_extension(), false, dst.needs_rex_extension()));
        self.buf.push_u8(0x31);
        self.buf.push_u8(modrm(0b11, src.low_bits(), dst.low_bits()));
    }

    /// `and dst, imm32` — used to mask `rand()`'s result to two bits for `x`.
    pub fn and_reg_imm32(&mut self, dst: Reg, imm: i32) {
        self.buf.push_u8(rex(true, false, false, dst.needs_rex_extension()));
        self.buf.push_u8(0x81);
        self.buf.push_u8(modrm(0b11, 4, dst.low_bits()));
        self.buf.push_i32(imm);
    }

    // -- comparisons -----------------------------------------------------

    /// `cmp lhs, rhs`.
    pub fn cmp_reg_reg(&mut self, lhs: Reg, rhs: Reg) {
        self.buf.push_u8(rex(true, rhs.needs_rex_extension(), false, lhs.needs_rex_extension()));
        self.buf.push_u8(0x39);
        self.buf.push_u8(modrm(0b11, rhs.low_bits(), lhs.low_bits()));
    }

    /// `cmp reg, imm32`.
    pub fn cmp_reg_imm32(&mut self, reg: Reg, imm: i32) {
        self.buf.push_u8(rex(true, false, false, reg.needs_rex_extension()));
        self.buf.push_u8(0x81);
        self.buf.push_u8(modrm(0b11, 7, reg.low_bits()));
        self.buf.push_i32(imm);
    }

    /// `test reg, reg` — used for the `?` zero check on an integer payload.
    pub fn test_reg_reg(&mut self, lhs: Reg, rhs: Reg) {
        self.buf.push_u8(rex(true, rhs.needs_rex_extension(), false, lhs.needs_rex_extension()));
        self.buf.push_u8(0x85);
        self.buf.push_u8(modrm(0b11, rhs.low_bits(), lhs.low_bits()));
    }

    /// `setcc dst8` — sets the low byte of `dst` to 0/1 per `cond`.
    pub fn setcc(&mut self, cond: Cond, dst: Reg) {
        if dst.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x90 | cond.cc_bits());
        self.buf.push_u8(modrm(0b11, 0, dst.low_bits()));
    }

    // -- x87 (float path) --------------------------------------------------

    /// `fld qword [base+disp]` — push a float payload onto the x87 stack.
    pub fn fld_mem64(&mut self, base: Reg, disp: i32) {
        if base.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0xDD);
        self.emit_modrm_disp(Reg::Rax, base, disp); // /0
    }

    /// `fstp qword [base+disp]` — pop the x87 top-of-stack into memory.
    pub fn fstp_mem64(&mut self, base: Reg, disp: i32) {
        if base.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0xDD);
        self.emit_modrm_disp(Reg::Rbx, base, disp); // /3
    }

    /// `fild qword [base+disp]` — load a 64-bit integer, converting it to
    /// double precision, and push it onto the x87 stack.
    pub fn fild_mem64(&mut self, base: Reg, disp: i32) {
        if base.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0xDF);
        self.emit_modrm_disp(Reg::Rbp, base, disp); // /5
    }

    /// `fisttp qword [base+disp]` — pop the x87 top-of-stack, truncating it
    /// to a 64-bit integer, and store it (SSE3).
    pub fn fisttp_mem64(&mut self, base: Reg, disp: i32) {
        if base.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0xDD);
        self.emit_modrm_disp(Reg::Rcx, base, disp); // /1
    }

    /// `fldz` — push +0.0.
    pub fn fldz(&mut self) {
        self.buf.push_u8(0xD9);
        self.buf.push_u8(0xEE);
    }

    /// `fucomip st0, st1` — compare ST(0) to ST(1), set integer flags,
    /// pop one register. Leaves the other operand on the x87 stack.
    pub fn fucomip_st1(&mut self) {
        self.buf.push_u8(0xDF);
        self.buf.push_u8(0xE9);
    }

    /// `fstp st0` — discard the x87 top-of-stack (cleans up the leftover
    /// operand after a comparison).
    pub fn fstp_st0(&mut self) {
        self.buf.push_u8(0xDD);
        self.buf.push_u8(0xD8);
    }

    /// `faddp st1, st0` — add and pop, used after two `fld`s.
    pub fn faddp(&mut self) {
        self.buf.push_u8(0xDE);
        self.buf.push_u8(0xC1);
    }

    /// `fsubp st1, st0`.
    pub fn fsubp(&mut self) {
        self.buf.push_u8(0xDE);
        self.buf.push_u8(0xE9);
    }

    /// `fmulp st1, st0`.
    pub fn fmulp(&mut self) {
        self.buf.push_u8(0xDE);
        self.buf.push_u8(0xC9);
    }

    /// `fdivp st1, st0`.
    pub fn fdivp(&mut self) {
        self.buf.push_u8(0xDE);
        self.buf.push_u8(0xF9);
    }

    /// `movsd xmm0, [base+disp]` — marshal a float payload for the
    /// variadic-float argument of `printf("%.16g", ...)`.
    pub fn movsd_xmm0_mem(&mut self, base: Reg, disp: i32) {
        self.buf.push_u8(0xF2);
        if base.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x10);
        self.emit_modrm_disp(Reg::Rax, base, disp); // xmm0 is register field 0
    }

    // -- stack & control flow ----------------------------------------------

    /// `push reg`.
    pub fn push(&mut self, reg: Reg) {
        if reg.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0x50 | reg.low_bits());
    }

    /// `pop reg`.
    pub fn pop(&mut self, reg: Reg) {
        if reg.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0x58 | reg.low_bits());
    }

    /// `call reg` — indirect call through a register (used for foreign
    /// calls into runtime helpers and libc, after the address is loaded
    /// with `mov_reg_imm64`).
    pub fn call_reg(&mut self, reg: Reg) {
        if reg.needs_rex_extension() {
            self.buf.push_u8(rex(false, false, false, true));
        }
        self.buf.push_u8(0xFF);
        self.buf.push_u8(modrm(0b11, 2, reg.low_bits()));
    }

    /// `ret`.
    pub fn ret(&mut self) {
        self.buf.push_u8(0xC3);
    }

    /// Unconditional `jmp rel32` to local label `n`, resolved forward.
    pub fn jmp_local_forward(&mut self, n: u8) {
        self.buf.push_u8(0xE9);
        self.labels.local(n).ref_forward(&mut self.buf);
    }

    /// Unconditional `jmp rel32` to local label `n`, resolved backward.
    pub fn jmp_local_backward(&mut self, n: u8) {
        self.buf.push_u8(0xE9);
        self.labels.local(n).ref_backward(&mut self.buf);
    }

    /// `jcc rel32` to local label `n`, resolved forward.
    pub fn jcc_local_forward(&mut self, cond: Cond, n: u8) {
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x80 | cond.cc_bits());
        self.labels.local(n).ref_forward(&mut self.buf);
    }

    /// Unconditional `jmp rel32` to the trace's epilogue.
    pub fn jmp_epilogue(&mut self) {
        self.buf.push_u8(0xE9);
        self.labels.epilogue.ref_forward(&mut self.buf);
    }

    /// `jcc rel32` to the trace's epilogue.
    pub fn jcc_epilogue(&mut self, cond: Cond) {
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x80 | cond.cc_bits());
        self.labels.epilogue.ref_forward(&mut self.buf);
    }

    /// Define local label `n` at the current position.
    pub fn define_local(&mut self, n: u8) {
        self.labels.local(n).define(&mut self.buf);
    }

    /// Define the epilogue label at the current position.
    pub fn define_epilogue(&mut self) {
        self.labels.epilogue.define(&mut self.buf);
    }

    // -- helpers ------------------------------------------------------------

    /// Emit the ModRM (+ SIB for RSP-based addressing) and displacement
    /// bytes for `[base+disp]`, with `reg_field` as the reg/opcode-extension
    /// field. Always uses disp32 form to keep patch math simple — a real
    /// optimizing assembler would prefer disp8 when it fits.
    fn emit_modrm_disp(&mut self, reg_field: Reg, base: Reg, disp: i32) {
        self.buf.push_u8(modrm(0b10, reg_field.low_bits(), base.low_bits()));
        if base.low_bits() == Reg::Rsp.low_bits() {
            // RSP/R12 in the rm field requires a SIB byte with no index.
            self.buf.push_u8(0x24);
        }
        self.buf.push_i32(disp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_imm64_emits_rex_w_and_eight_bytes() {
        let mut asm = Assembler::new();
        asm.mov_reg_imm64(Reg::Rax, 42);
        assert_eq!(asm.buf.len(), 10); // REX + opcode + 8-byte imm
    }

    #[test]
    fn jmp_local_forward_then_define_patches_to_zero_distance() {
        let mut asm = Assembler::new();
        asm.jmp_local_forward(9);
        asm.define_local(9);
        let bytes = asm.buf.as_slice();
        let rel = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(rel, 0);
    }

    #[test]
    fn rsp_base_addressing_emits_sib_byte() {
        let mut asm = Assembler::new();
        asm.mov_reg_mem(Reg::Rax, Reg::Rsp, 8);
        // REX + opcode + modrm + SIB + disp32
        assert_eq!(asm.buf.len(), 1 + 1 + 1 + 1 + 4);
    }
}
