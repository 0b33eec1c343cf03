//! Per-opcode emitters, grouped by shape. Each function appends the machine-code sequence
//! implementing one ><> instruction (or, for the direction mutators and
//! mirrors, mutates the compile-time IP direction and emits nothing).
//!
//! The two pointer-register ABI (`r_stacktop`/`r_stacknum` in
//! `assembler::fixed`) means push/pop never need a multiply: pushing
//! stores at `[r_stacktop]` and advances the pointer by `CELL_SIZE`;
//! popping retreats the pointer first and reads from the new position.

use crate::codebox::{Codebox, Direction, IpState};
use crate::error::CompileError;
use crate::jit::assembler::{fixed, Assembler, Cond, Reg};
use crate::stack::CELL_SIZE;
use crate::value::Tag;

const ROW_OFFSET: i32 = 0;
const COL_OFFSET: i32 = 8;
const DIR_OFFSET: i32 = 16;

const CELL_SIZE_I32: i32 = CELL_SIZE as i32;

/// Scratch registers free between opcode boundaries — only `fixed`'s four
/// ABI registers are live across an instruction.
mod scratch {
    use crate::jit::assembler::Reg;
    pub const RHS_PAYLOAD: Reg = Reg::Rax;
    pub const RHS_TAG: Reg = Reg::Rbx;
    pub const LHS_PAYLOAD: Reg = Reg::Rdx;
    pub const LHS_TAG: Reg = Reg::Rcx;
    pub const TMP: Reg = Reg::R10;
    pub const TMP2: Reg = Reg::R11;
}

/// The simple-opcode whitelist `?` fusion uses to decide whether the next
/// instruction is cheap and side-effect-compatible enough to inline under
/// a predicate.
pub fn is_simple_opcode(ch: char) -> bool {
    matches!(
        ch,
        '0'..='9'
            | 'a'..='f'
            | '+' | '-' | '*' | ',' | '%' | '=' | '(' | ')'
            | ':' | '~' | '$' | '@'
            | 'o' | 'n' | 'i' | 'g' | 'p'
            | ';'
    )
}

/// Whether a character pushes exactly one new value onto the stack.
pub fn pushes_one_value(ch: char) -> bool {
    matches!(ch, '0'..='9' | 'a'..='f' | ':' | 'l' | 'i' | 'g' | '&')
}

fn digit_value(ch: char) -> Option<i64> {
    match ch {
        '0'..='9' => Some(ch as i64 - '0' as i64),
        'a'..='f' => Some(ch as i64 - 'a' as i64 + 10),
        _ => None,
    }
}

// -- shared low-level helpers ------------------------------------------------

/// Write `row`/`col`/`dir` into the caller-supplied end-state slot.
pub fn emit_write_end_state(asm: &mut Assembler, row: usize, col: usize, dir: Direction) {
    asm.mov_reg_imm64(scratch::TMP, row as i64);
    asm.mov_mem_reg(fixed::END_STATE, ROW_OFFSET, scratch::TMP);
    asm.mov_reg_imm64(scratch::TMP, col as i64);
    asm.mov_mem_reg(fixed::END_STATE, COL_OFFSET, scratch::TMP);
    asm.mov_mem8_imm8(fixed::END_STATE, DIR_OFFSET, dir as u8);
}

/// Write a *runtime* end state whose row/col live in registers (used by
/// `x` and `.`, whose target is only known once the emitted code runs).
fn emit_write_end_state_regs(asm: &mut Assembler, row_src: Reg, col_src: Reg, dir: Direction) {
    asm.mov_mem_reg(fixed::END_STATE, ROW_OFFSET, row_src);
    asm.mov_mem_reg(fixed::END_STATE, COL_OFFSET, col_src);
    asm.mov_mem8_imm8(fixed::END_STATE, DIR_OFFSET, dir as u8);
}

/// Emit the underflow guard every binary/unary op needs: if fewer than
/// `min_items` are on the stack, set `r_ret = 1`, write `state` into the
/// end-state slot as the faulting IP, and jump to the epilogue.
fn emit_underflow_guard(asm: &mut Assembler, min_items: i32, state: IpState) {
    asm.cmp_reg_imm32(fixed::R_STACKNUM, min_items);
    asm.jcc_local_forward(Cond::Ge, 1);
    emit_write_end_state(asm, state.row, state.col, state.dir);
    asm.mov_reg_imm64(fixed::R_RET, 1);
    asm.jmp_epilogue();
    asm.define_local(1);
}

/// Pop one cell's payload and tag into `payload` and `tag`.
fn emit_pop(asm: &mut Assembler, payload: Reg, tag: Reg) {
    asm.sub_reg_imm32(fixed::R_STACKTOP, CELL_SIZE_I32);
    asm.sub_reg_imm32(fixed::R_STACKNUM, 1);
    asm.mov_reg_mem(payload, fixed::R_STACKTOP, 0);
    asm.movzx_reg_mem8(tag, fixed::R_STACKTOP, 8);
}

/// Push one cell with a tag known at emit time (the common case: every
/// arithmetic result's tag is decided by which code path produced it).
fn emit_push(asm: &mut Assembler, payload: Reg, tag: Tag) {
    asm.mov_mem_reg(fixed::R_STACKTOP, 0, payload);
    asm.mov_mem8_imm8(fixed::R_STACKTOP, 8, tag as u8);
    asm.add_reg_imm32(fixed::R_STACKTOP, CELL_SIZE_I32);
    asm.add_reg_imm32(fixed::R_STACKNUM, 1);
}

/// Push one cell whose tag is only known at runtime (dup/swap/rotate move
/// a cell without ever deciding its tag).
fn emit_push_dynamic_tag(asm: &mut Assembler, payload: Reg, tag: Reg) {
    asm.mov_mem_reg(fixed::R_STACKTOP, 0, payload);
    asm.mov_mem8_reg8(fixed::R_STACKTOP, 8, tag);
    asm.add_reg_imm32(fixed::R_STACKTOP, CELL_SIZE_I32);
    asm.add_reg_imm32(fixed::R_STACKNUM, 1);
}

/// Read the cell `depth` below the top (0 = top) without popping it.
fn emit_peek(asm: &mut Assembler, depth: i32, payload: Reg, tag: Reg) {
    let disp = -(depth + 1) * CELL_SIZE_I32;
    asm.mov_reg_mem(payload, fixed::R_STACKTOP, disp);
    asm.movzx_reg_mem8(tag, fixed::R_STACKTOP, disp + 8);
}

// -- direction mutators -------------------------------------------------------

/// `>`/`<`/`^`/`v`: assign the new compile-time direction; emit nothing.
pub fn direction_mutator(ch: char) -> Direction {
    match ch {
        '>' => Direction::Right,
        '<' => Direction::Left,
        '^' => Direction::Up,
        'v' => Direction::Down,
        _ => unreachable!("not a direction mutator"),
    }
}

// -- mirrors ------------------------------------------------------------------

/// `/`, `\`, `|`, `_`, `#`: the standard ><> reflection tables. Emits
/// nothing; returns the post-reflection direction.
pub fn mirror(ch: char, dir: Direction) -> Direction {
    use Direction::*;
    match ch {
        '/' => match dir {
            Right => Up,
            Left => Down,
            Up => Right,
            Down => Left,
            Finished => Finished,
        },
        '\\' => match dir {
            Right => Down,
            Left => Up,
            Up => Left,
            Down => Right,
            Finished => Finished,
        },
        '|' => match dir {
            Right => Left,
            Left => Right,
            other => other,
        },
        '_' => match dir {
            Up => Down,
            Down => Up,
            other => other,
        },
        '#' => match dir {
            Right => Left,
            Left => Right,
            Up => Down,
            Down => Up,
            Finished => Finished,
        },
        _ => unreachable!("not a mirror"),
    }
}

// -- random direction ---------------------------------------------------------

/// `x`: call a host random source, mask to two bits, branch four ways,
/// each writing the corresponding next IP state. Sets direction=FINISHED
/// in the caller afterward.
pub fn emit_random_direction(asm: &mut Assembler, codebox: &Codebox, state: IpState, rand_addr: usize) {
    asm.mov_reg_imm64(Reg::Rax, rand_addr as i64);
    asm.call_reg(Reg::Rax);
    asm.and_reg_imm32(Reg::Rax, 0x3);

    let targets = [Direction::Right, Direction::Left, Direction::Up, Direction::Down];
    for (i, &dir) in targets.iter().enumerate() {
        let mut next = state;
        next.dir = dir;
        codebox.next(&mut next);

        asm.cmp_reg_imm32(Reg::Rax, i as i32);
        asm.jcc_local_forward(Cond::Ne, 2);
        emit_write_end_state(asm, next.row, next.col, next.dir);
        asm.jmp_epilogue();
        asm.define_local(2);
    }
}

// -- jump ---------------------------------------------------------------------

/// `.`: pop column then row, write them into end-state with a caller-chosen
/// resting direction, jump to epilogue. Sets direction=FINISHED afterward.
pub fn emit_jump(asm: &mut Assembler, state: IpState, resting_direction: Direction) {
    emit_underflow_guard(asm, 2, state);
    emit_pop(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG); // row
    emit_pop(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG); // col
    emit_write_end_state_regs(asm, scratch::RHS_PAYLOAD, scratch::LHS_PAYLOAD, resting_direction);
    asm.mov_reg_imm64(fixed::R_RET, 0);
    asm.jmp_epilogue();
}

// -- literal pushes -------------------------------------------------------------

/// `0`-`9`, `a`-`f`: push the immediate value as an INTEGER.
pub fn emit_literal_push(asm: &mut Assembler, ch: char) {
    let value = digit_value(ch).expect("caller only dispatches digit/hex characters here");
    asm.mov_reg_imm64(scratch::TMP, value);
    emit_push(asm, scratch::TMP, Tag::Integer);
}

// -- string literals -------------------------------------------------------------

/// `"`, `'`: collect the enclosed characters via the codebox's string
/// reader and push each as an INTEGER. `max_stack_change` grows by the
/// returned length; the caller (trace driver) applies that.
pub fn emit_string_literal(asm: &mut Assembler, codebox: &Codebox, state: &mut IpState) -> Result<usize, CompileError> {
    let chars = codebox.read_string(state)?;
    for ch in &chars {
        asm.mov_reg_imm64(scratch::TMP, *ch as i64);
        emit_push(asm, scratch::TMP, Tag::Integer);
    }
    Ok(chars.len())
}

// -- arithmetic and comparison ----------------------------------------------------

/// The eight binary arithmetic/comparison opcodes: each asserts 2 items,
/// pops two, promotes to float if either tag is FLOAT or the op is
/// inherently fractional (`,`), computes, pushes the tagged result. `%` is
/// the one exception: it always computes on integers, truncating a
/// FLOAT-tagged operand rather than promoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Lt,
    Gt,
}

impl ArithOp {
    pub fn from_char(ch: char) -> Option<ArithOp> {
        Some(match ch {
            '+' => ArithOp::Add,
            '-' => ArithOp::Sub,
            '*' => ArithOp::Mul,
            ',' => ArithOp::Div,
            '%' => ArithOp::Mod,
            '=' => ArithOp::Eq,
            '(' => ArithOp::Lt,
            ')' => ArithOp::Gt,
            _ => return None,
        })
    }

    /// `,` always produces a float regardless of operand tags.
    fn forces_float(self) -> bool {
        matches!(self, ArithOp::Div)
    }

    /// Comparisons push an INTEGER 0/1 regardless of operand tags.
    fn is_comparison(self) -> bool {
        matches!(self, ArithOp::Eq | ArithOp::Lt | ArithOp::Gt)
    }
}

/// `+ - * , % = ( )`. `lhs` was pushed before `rhs`, so `rhs` pops first.
pub fn emit_arith(asm: &mut Assembler, op: ArithOp, state: IpState) {
    emit_underflow_guard(asm, 2, state);
    emit_pop(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG);
    emit_pop(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG);

    if op == ArithOp::Mod {
        // `%` always computes on integers, regardless of what tag either
        // operand carries: truncate a FLOAT-tagged operand down to its i64
        // value first, then fall straight into the int path (never the
        // float path — it has no modulo operation to offer).
        emit_coerce_to_int(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG);
        emit_coerce_to_int(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG);
        emit_arith_int_path(asm, op, state);
        return;
    }

    if op.forces_float() {
        emit_arith_float_path(asm, op);
        return;
    }

    // Either operand carrying Tag::Float (== 1) routes to the float path;
    // a bitwise OR of the two tag bytes is nonzero exactly when at least
    // one is FLOAT.
    asm.mov_reg_reg(scratch::TMP, scratch::LHS_TAG);
    asm.add_reg_reg(scratch::TMP, scratch::RHS_TAG); // 0+0, 0+1, 1+0, 1+1 — all distinguish "any float" via != 0
    asm.cmp_reg_imm32(scratch::TMP, 0);
    asm.jcc_local_forward(Cond::Ne, 3);
    emit_arith_int_path(asm, op, state);
    asm.jmp_local_forward(4);
    asm.define_local(3);
    emit_arith_float_path(asm, op);
    asm.define_local(4);
}

/// Truncate `payload` to an `i64` in place if `tag` marks it FLOAT; leaves
/// both registers untouched if it's already an INTEGER. Used only by `%`,
/// which mirrors the interpreter fallback's `as_i64` rather than promoting
/// to float the way the other six arithmetic ops do.
fn emit_coerce_to_int(asm: &mut Assembler, payload: Reg, tag: Reg) {
    asm.cmp_reg_imm32(tag, Tag::Float as i32);
    asm.jcc_local_forward(Cond::Ne, 3);
    asm.push(payload);
    asm.fld_mem64(Reg::Rsp, 0);
    asm.fisttp_mem64(Reg::Rsp, 0);
    asm.pop(payload);
    asm.define_local(3);
}

fn emit_arith_int_path(asm: &mut Assembler, op: ArithOp, state: IpState) {
    match op {
        ArithOp::Add => {
            asm.add_reg_reg(scratch::LHS_PAYLOAD, scratch::RHS_PAYLOAD);
            emit_push(asm, scratch::LHS_PAYLOAD, Tag::Integer);
        }
        ArithOp::Sub => {
            asm.sub_reg_reg(scratch::LHS_PAYLOAD, scratch::RHS_PAYLOAD);
            emit_push(asm, scratch::LHS_PAYLOAD, Tag::Integer);
        }
        ArithOp::Mul => {
            asm.imul_reg_reg(scratch::LHS_PAYLOAD, scratch::RHS_PAYLOAD);
            emit_push(asm, scratch::LHS_PAYLOAD, Tag::Integer);
        }
        ArithOp::Mod => {
            // Integer divide-by-zero raises #DE (SIGFPE) rather than
            // producing a result; guard it the same shape as the underflow
            // check above instead of crashing the process.
            asm.cmp_reg_imm32(scratch::RHS_PAYLOAD, 0);
            asm.jcc_local_forward(Cond::Ne, 3);
            emit_write_end_state(asm, state.row, state.col, state.dir);
            asm.mov_reg_imm64(fixed::R_RET, 2);
            asm.jmp_epilogue();
            asm.define_local(3);

            asm.mov_reg_reg(Reg::Rax, scratch::LHS_PAYLOAD);
            asm.cqo();
            asm.idiv_reg(scratch::RHS_PAYLOAD);
            emit_push(asm, Reg::Rdx, Tag::Integer);
        }
        ArithOp::Div => unreachable!("division always forces the float path"),
        ArithOp::Eq | ArithOp::Lt | ArithOp::Gt => {
            asm.cmp_reg_reg(scratch::LHS_PAYLOAD, scratch::RHS_PAYLOAD);
            let cond = match op {
                ArithOp::Eq => Cond::Eq,
                ArithOp::Lt => Cond::Lt,
                ArithOp::Gt => Cond::Gt,
                _ => unreachable!(),
            };
            asm.setcc(cond, scratch::TMP2);
            asm.movzx_reg_reg8(scratch::TMP2, scratch::TMP2);
            emit_push(asm, scratch::TMP2, Tag::Integer);
        }
    }
}

/// Load one float-path operand onto the x87 stack: `fild`s it (converting)
/// if `tag` says INTEGER, or `fld`s it (bits-as-double, no conversion) if
/// `tag` says FLOAT. The pushed 8-byte scratch slot is left on the native
/// stack for the caller to reclaim once both operands are loaded.
fn emit_load_x87_operand(asm: &mut Assembler, payload: Reg, tag: Reg) {
    asm.push(payload);
    asm.cmp_reg_imm32(tag, Tag::Float as i32);
    asm.jcc_local_forward(Cond::Eq, 5);
    asm.fild_mem64(Reg::Rsp, 0);
    asm.jmp_local_forward(6);
    asm.define_local(5);
    asm.fld_mem64(Reg::Rsp, 0);
    asm.define_local(6);
}

fn emit_arith_float_path(asm: &mut Assembler, op: ArithOp) {
    if op.is_comparison() {
        // Load RHS then LHS so ST(0)=LHS, ST(1)=RHS: `fucomip_st1` compares
        // ST(0) to ST(1), i.e. LHS to RHS directly. The FCOMI family only
        // ever sets ZF/PF/CF (never SF/OF), so the ordered tests use the
        // CF/ZF-based `Below`/`Above` conditions rather than the signed
        // `Lt`/`Gt` the integer path's plain `cmp` produces.
        emit_load_x87_operand(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG);
        emit_load_x87_operand(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG);
        asm.fucomip_st1();
        asm.fstp_st0();
        let cond = match op {
            ArithOp::Eq => Cond::Eq,
            ArithOp::Lt => Cond::Below,
            ArithOp::Gt => Cond::Above,
            _ => unreachable!(),
        };
        asm.setcc(cond, scratch::TMP2);
        asm.movzx_reg_reg8(scratch::TMP2, scratch::TMP2);
        asm.add_reg_imm32(Reg::Rsp, 16); // drop the two scratch slots
        emit_push(asm, scratch::TMP2, Tag::Integer);
        return;
    }

    // Load LHS then RHS so ST(0)=RHS, ST(1)=LHS: `fsubp`/`fdivp` compute
    // ST(1) := ST(1) op ST(0), i.e. LHS op RHS, matching the int path's
    // `sub_reg_reg(LHS, RHS)` convention.
    emit_load_x87_operand(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG);
    emit_load_x87_operand(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG);

    match op {
        ArithOp::Add => asm.faddp(),
        ArithOp::Sub => asm.fsubp(),
        ArithOp::Mul => asm.fmulp(),
        ArithOp::Div => asm.fdivp(),
        ArithOp::Mod => unreachable!("`%` always routes through the int path before reaching here"),
        _ => unreachable!(),
    }
    asm.fstp_mem64(Reg::Rsp, 0);
    asm.mov_reg_mem(scratch::TMP, Reg::Rsp, 0);
    asm.add_reg_imm32(Reg::Rsp, 16);
    emit_push(asm, scratch::TMP, Tag::Float);
}

// -- stack manipulation -----------------------------------------------------------

/// `:` dup.
pub fn emit_dup(asm: &mut Assembler, state: IpState) {
    emit_underflow_guard(asm, 1, state);
    emit_peek(asm, 0, scratch::TMP, scratch::TMP2);
    emit_push_dynamic_tag(asm, scratch::TMP, scratch::TMP2);
}

/// `$` swap top two.
pub fn emit_swap(asm: &mut Assembler, state: IpState) {
    emit_underflow_guard(asm, 2, state);
    emit_pop(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG);
    emit_pop(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG);
    emit_push_dynamic_tag(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG);
    emit_push_dynamic_tag(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG);
}

/// `@` rotate the top three: `a b c -> b c a`.
pub fn emit_rotate(asm: &mut Assembler, state: IpState) {
    emit_underflow_guard(asm, 3, state);
    emit_pop(asm, Reg::Rax, Reg::Rbx); // c
    emit_pop(asm, Reg::Rdx, Reg::Rcx); // b
    emit_pop(asm, Reg::R10, Reg::R11); // a
    emit_push_dynamic_tag(asm, Reg::Rdx, Reg::Rcx); // b
    emit_push_dynamic_tag(asm, Reg::Rax, Reg::Rbx); // c
    emit_push_dynamic_tag(asm, Reg::R10, Reg::R11); // a
}

/// `~` drop.
pub fn emit_drop(asm: &mut Assembler, state: IpState) {
    emit_underflow_guard(asm, 1, state);
    asm.sub_reg_imm32(fixed::R_STACKTOP, CELL_SIZE_I32);
    asm.sub_reg_imm32(fixed::R_STACKNUM, 1);
}

/// `l` push stack length as INTEGER.
pub fn emit_push_length(asm: &mut Assembler) {
    asm.mov_reg_reg(scratch::TMP, fixed::R_STACKNUM);
    emit_push(asm, scratch::TMP, Tag::Integer);
}

/// A runtime helper `r`/`{`/`}`/`&` spills `r_stacknum` to, calls, and (for
/// `r`/`{`/`}`) reloads the cached pointer registers from afterward — the
/// helper may have moved the stack's backing allocation only in principle;
/// in practice it rewrites in place, but reloading keeps the contract honest.
fn emit_spill_call_reload(asm: &mut Assembler, helper_addr: usize) {
    asm.mov_mem_reg(fixed::R_STACK, 0, fixed::R_STACKNUM); // num_items at offset 0
    asm.mov_reg_reg(Reg::Rdi, fixed::R_STACK);
    asm.mov_reg_imm64(Reg::Rax, helper_addr as i64);
    asm.call_reg(Reg::Rax);
    asm.mov_reg_mem(fixed::R_STACKNUM, fixed::R_STACK, 0);
    asm.mov_reg_mem(scratch::TMP, fixed::R_STACK, 8); // data ptr
    asm.mov_reg_reg(fixed::R_STACKTOP, scratch::TMP);
    asm.mov_reg_reg(Reg::Rax, fixed::R_STACKNUM);
    asm.mov_reg_imm64(scratch::TMP2, CELL_SIZE as i64);
    asm.imul_reg_reg(Reg::Rax, scratch::TMP2);
    asm.add_reg_reg(fixed::R_STACKTOP, Reg::Rax);
}

/// `r` reverse.
pub fn emit_reverse(asm: &mut Assembler, helper_addr: usize) {
    emit_spill_call_reload(asm, helper_addr);
}

/// `{` shift left.
pub fn emit_shift_left(asm: &mut Assembler, helper_addr: usize) {
    emit_spill_call_reload(asm, helper_addr);
}

/// `}` shift right.
pub fn emit_shift_right(asm: &mut Assembler, helper_addr: usize) {
    emit_spill_call_reload(asm, helper_addr);
}

/// `&` register swap: exchange top-of-stack with a single-cell side
/// register the runtime owns. Implemented as a foreign call taking the
/// stack descriptor, mirroring `r`/`{`/`}`.
pub fn emit_register_swap(asm: &mut Assembler, helper_addr: usize) {
    emit_spill_call_reload(asm, helper_addr);
}

// -- I/O ----------------------------------------------------------------------

/// `o`: pop and print a character.
pub fn emit_output_char(asm: &mut Assembler, state: IpState, putchar_addr: usize) {
    emit_underflow_guard(asm, 1, state);
    emit_pop(asm, Reg::Rdi, scratch::TMP);
    asm.mov_reg_imm64(Reg::Rax, putchar_addr as i64);
    asm.call_reg(Reg::Rax);
}

/// `n`: pop and print as `%ld` (INTEGER) or `%.16g` (FLOAT), selecting the
/// format string, argument register, and xmm0/variadic-count by tag.
pub fn emit_output_number(asm: &mut Assembler, state: IpState, printf_addr: usize, int_fmt: usize, float_fmt: usize) {
    emit_underflow_guard(asm, 1, state);
    emit_pop(asm, scratch::TMP, scratch::TMP2);
    asm.cmp_reg_imm32(scratch::TMP2, Tag::Float as i32);
    asm.jcc_local_forward(Cond::Eq, 5);

    // INTEGER path: printf(int_fmt, value), 0 vector regs used.
    asm.mov_reg_imm64(Reg::Rdi, int_fmt as i64);
    asm.mov_reg_reg(Reg::Rsi, scratch::TMP);
    asm.xor_reg_reg(Reg::Rax, Reg::Rax);
    asm.mov_reg_imm64(scratch::TMP2, printf_addr as i64);
    asm.call_reg(scratch::TMP2);
    asm.jmp_local_forward(6);

    asm.define_local(5);
    // FLOAT path: printf(float_fmt, value), 1 vector register used (AL=1).
    asm.push(scratch::TMP);
    asm.movsd_xmm0_mem(Reg::Rsp, 0);
    asm.add_reg_imm32(Reg::Rsp, 8);
    asm.mov_reg_imm64(Reg::Rdi, float_fmt as i64);
    asm.mov_reg_imm64(Reg::Rax, 1);
    asm.mov_reg_imm64(scratch::TMP2, printf_addr as i64);
    asm.call_reg(scratch::TMP2);

    asm.define_local(6);
}

/// `i`: read one character from the host, converting EOF to -1, push as
/// INTEGER.
pub fn emit_input_char(asm: &mut Assembler, getchar_addr: usize) {
    asm.mov_reg_imm64(Reg::Rax, getchar_addr as i64);
    asm.call_reg(Reg::Rax);
    // getchar already returns -1 (EOF) as a sign-extended int; no further
    // conversion needed once widened to 64 bits.
    asm.mov_reg_reg(scratch::TMP, Reg::Rax);
    emit_push(asm, scratch::TMP, Tag::Integer);
}

/// `g`: pop `(y, x)` and read the codebox cell at that position via a
/// runtime helper, pushing the result as INTEGER. The codebox pointer is
/// not part of the fixed ABI (which reserves only the stack/end-state
/// registers); it is instead baked into the trace as an immediate, the
/// same way every other foreign-call target address is.
pub fn emit_codebox_get(asm: &mut Assembler, state: IpState, codebox_ptr: usize, helper_addr: usize) {
    emit_underflow_guard(asm, 2, state);
    emit_pop(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG); // y
    emit_pop(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG); // x
    asm.mov_reg_imm64(Reg::Rdi, codebox_ptr as i64);
    asm.mov_reg_reg(Reg::Rsi, scratch::LHS_PAYLOAD);
    asm.mov_reg_reg(Reg::Rdx, scratch::RHS_PAYLOAD);
    asm.mov_reg_imm64(Reg::Rax, helper_addr as i64);
    asm.call_reg(Reg::Rax);
    emit_push(asm, Reg::Rax, Tag::Integer);
}

/// `p`: pop `(y, x, value)` and write `value` into the codebox at `(x, y)`
/// via a runtime helper (included per the
/// source's whitelist).
pub fn emit_codebox_put(asm: &mut Assembler, state: IpState, codebox_ptr: usize, helper_addr: usize) {
    emit_underflow_guard(asm, 3, state);
    emit_pop(asm, scratch::RHS_PAYLOAD, scratch::RHS_TAG); // y
    emit_pop(asm, scratch::LHS_PAYLOAD, scratch::LHS_TAG); // x
    emit_pop(asm, scratch::TMP, scratch::TMP2); // value
    asm.mov_reg_imm64(Reg::Rdi, codebox_ptr as i64);
    asm.mov_reg_reg(Reg::Rsi, scratch::TMP); // value
    asm.mov_reg_reg(Reg::Rdx, scratch::LHS_PAYLOAD); // x
    asm.mov_reg_reg(Reg::Rcx, scratch::RHS_PAYLOAD); // y
    asm.mov_reg_imm64(Reg::Rax, helper_addr as i64);
    asm.call_reg(Reg::Rax);
}

// -- conditional skip -----------------------------------------------------------

/// What `?`'s fusion decision turned into, reported back to the trace
/// driver so it can update `condskip`/direction bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    /// The following instruction is simple; `condskip` should be set so the
    /// driver fuses it in-line and places label 9 right after.
    Fused,
    /// The following instruction can't be fused; both continuations were
    /// written to end-state and the trace is closed.
    Bailout,
}

/// `?`: the central fusion opcode. `state` is the `?`'s own position;
/// `cursor` starts there too and is advanced past any consumed `!`s so the
/// driver's normal one-step advance lands it on the instruction right after
/// the last `!` (fused) or is irrelevant (bailout, since the trace ends).
pub fn emit_conditional_skip(asm: &mut Assembler, codebox: &Codebox, state: IpState, cursor: &mut IpState) -> SkipOutcome {
    emit_underflow_guard(asm, 1, state);

    let payload = scratch::TMP;
    let tag = scratch::TMP2;
    emit_pop(asm, payload, tag);

    asm.cmp_reg_imm32(tag, Tag::Float as i32);
    asm.jcc_local_forward(Cond::Eq, 7);
    asm.cmp_reg_imm32(payload, 0); // ZF=1 iff the integer payload was zero
    asm.jmp_local_forward(8);
    asm.define_local(7);
    asm.push(payload);
    asm.fld_mem64(Reg::Rsp, 0);
    asm.fldz();
    asm.fucomip_st1(); // ZF=1 iff the float payload compared equal to 0.0
    asm.fstp_st0();
    asm.add_reg_imm32(Reg::Rsp, 8);
    asm.define_local(8);

    let mut inverted = false;
    while codebox.peek_next(*cursor) == '!' {
        codebox.next(cursor);
        inverted = !inverted;
    }
    let following = codebox.peek_next(*cursor);
    let base_cond = Cond::Eq; // ZF=1 ("skipped value was zero") triggers the skip
    let skip_cond = if inverted { base_cond.inverted() } else { base_cond };

    if is_simple_opcode(following) {
        asm.jcc_local_forward(skip_cond, 9);
        SkipOutcome::Fused
    } else {
        let mut no_skip_state = *cursor;
        codebox.next(&mut no_skip_state);
        let mut skip_state = no_skip_state;
        codebox.next(&mut skip_state);

        // Labels 7/8 already resolved above (the tag-dispatch merge point);
        // reusing their numbers here is legal local-label redefinition.
        asm.jcc_local_forward(skip_cond, 7);
        emit_write_end_state(asm, no_skip_state.row, no_skip_state.col, no_skip_state.dir);
        asm.jmp_local_forward(8);
        asm.define_local(7);
        emit_write_end_state(asm, skip_state.row, skip_state.col, skip_state.dir);
        asm.define_local(8);
        asm.mov_reg_imm64(fixed::R_RET, 0);
        asm.jmp_epilogue();
        SkipOutcome::Bailout
    }
}

// -- program end ----------------------------------------------------------------

/// `;`: write FINISHED into end_state.direction, zero `r_ret`, jump to
/// epilogue.
pub fn emit_program_end(asm: &mut Assembler, state: IpState) {
    emit_write_end_state(asm, state.row, state.col, Direction::Finished);
    asm.mov_reg_imm64(fixed::R_RET, 0);
    asm.jmp_epilogue();
}
