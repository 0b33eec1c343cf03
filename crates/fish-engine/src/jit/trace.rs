//! The trace-discovery state machine: walks the IP through
//! the codebox, dispatches to opcode emitters, detects cycles, manages `?`
//! fusion, and decides when to stop extending the trace.

use crate::codebox::{Codebox, Direction, IpState};
use crate::error::CompileError;
use crate::jit::assembler::{fixed, Assembler, Reg};
use crate::jit::block::CompiledBlock;
use crate::jit::finalize;
use crate::jit::opcodes::{self, ArithOp, SkipOutcome};
use crate::jit::state_cache::StateCache;
use crate::stack::CELL_SIZE;

/// Addresses of every foreign function and runtime helper emitted code may
/// call, resolved once by the caller (`JitEngine`) and threaded through
/// `compile`. The fixed ABI reserves registers for the stack and
/// end-state only, so each call site bakes its target in as an
/// immediate the same way the assembler already handles absolute calls.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeAddrs {
    /// `printf`.
    pub printf: usize,
    /// `putchar`, used by `o`.
    pub putchar: usize,
    /// `getchar`, used by `i`.
    pub getchar: usize,
    /// `rand`, used by `x`.
    pub rand: usize,
    /// `fish_reverse_stack`, used by `r`.
    pub reverse_stack: usize,
    /// `fish_shift_left`, used by `{`.
    pub shift_left: usize,
    /// `fish_shift_right`, used by `}`.
    pub shift_right: usize,
    /// `fish_register_swap`, used by `&`.
    pub register_swap: usize,
    /// `fish_codebox_get`, used by `g`.
    pub codebox_get: usize,
    /// `fish_codebox_put`, used by `p`.
    pub codebox_put: usize,
    /// Address of a live `"%ld"` C string, used by `n`'s integer path.
    pub int_format: usize,
    /// Address of a live `"%.16g"` C string, used by `n`'s float path.
    pub float_format: usize,
    /// Address of the `Codebox` this trace belongs to, passed to
    /// `fish_codebox_get`/`put` as their first argument.
    pub codebox_ptr: usize,
}

/// Trace-local emitter state.
struct TraceState {
    /// The previously emitted instruction was a fused skip predicate.
    condskip: bool,
    /// Request to emit local label 9 after the current instruction.
    addskip: bool,
    /// Upper bound on net stack growth, handed back in the finished block.
    max_stack_change: usize,
    /// States already emitted in this trace, for cycle detection.
    seen: StateCache,
}

/// Build one native trace starting at `start_state` (the JIT's single
/// public entry point). `runtime` supplies every foreign-call address the
/// opcode emitters need baked in.
pub fn compile(codebox: &Codebox, start_state: IpState, runtime: &RuntimeAddrs) -> Result<CompiledBlock, CompileError> {
    let mut asm = Assembler::new();
    let mut trace = TraceState {
        condskip: false,
        addskip: false,
        max_stack_change: 0,
        seen: StateCache::new(),
    };

    emit_prologue(&mut asm);

    let mut state = start_state;
    loop {
        if state.dir == Direction::Finished {
            break;
        }
        let ch = codebox.get(state.row, state.col);

        if !trace.condskip {
            if trace.seen.contains(state) {
                opcodes::emit_write_end_state(&mut asm, state.row, state.col, state.dir);
                asm.mov_reg_imm64(fixed::R_RET, 0);
                asm.jmp_epilogue();
                break;
            }
            trace.seen.insert(state);
        } else {
            trace.condskip = false;
            trace.addskip = true;
        }

        dispatch(&mut asm, codebox, &mut state, ch, runtime, &mut trace)?;

        if opcodes::pushes_one_value(ch) {
            trace.max_stack_change += 1;
        }
        if trace.addskip {
            asm.define_local(9);
            trace.addskip = false;
        }

        if state.dir == Direction::Finished {
            break;
        }
        codebox.next(&mut state);
    }

    emit_epilogue(&mut asm);

    log::trace!(
        "compiled trace from {:?}: {} bytes, max_stack_change={}, {} states visited",
        start_state,
        asm.pos(),
        trace.max_stack_change,
        trace.seen.len()
    );

    finalize::finalize(asm, trace.max_stack_change)
}

fn dispatch(
    asm: &mut Assembler,
    codebox: &Codebox,
    state: &mut IpState,
    ch: char,
    runtime: &RuntimeAddrs,
    trace: &mut TraceState,
) -> Result<(), CompileError> {
    match ch {
        '>' | '<' | '^' | 'v' => state.dir = opcodes::direction_mutator(ch),
        '/' | '\\' | '|' | '_' | '#' => state.dir = opcodes::mirror(ch, state.dir),

        'x' => {
            opcodes::emit_random_direction(asm, codebox, *state, runtime.rand);
            state.dir = Direction::Finished;
        }
        '.' => {
            let resting_direction = state.dir;
            opcodes::emit_jump(asm, *state, resting_direction);
            state.dir = Direction::Finished;
        }

        '0'..='9' | 'a'..='f' => opcodes::emit_literal_push(asm, ch),

        '"' | '\'' => {
            opcodes::emit_string_literal(asm, codebox, state)?;
        }

        '+' | '-' | '*' | ',' | '%' | '=' | '(' | ')' => {
            let op = ArithOp::from_char(ch).expect("ch was matched as an arithmetic character");
            opcodes::emit_arith(asm, op, *state);
        }

        ':' => opcodes::emit_dup(asm, *state),
        '$' => opcodes::emit_swap(asm, *state),
        '@' => opcodes::emit_rotate(asm, *state),
        '~' => opcodes::emit_drop(asm, *state),
        'l' => opcodes::emit_push_length(asm),
        '&' => opcodes::emit_register_swap(asm, runtime.register_swap),
        'r' => opcodes::emit_reverse(asm, runtime.reverse_stack),
        '{' => opcodes::emit_shift_left(asm, runtime.shift_left),
        '}' => opcodes::emit_shift_right(asm, runtime.shift_right),

        'o' => opcodes::emit_output_char(asm, *state, runtime.putchar),
        'n' => opcodes::emit_output_number(asm, *state, runtime.printf, runtime.int_format, runtime.float_format),
        'i' => opcodes::emit_input_char(asm, runtime.getchar),
        'g' => opcodes::emit_codebox_get(asm, *state, runtime.codebox_ptr, runtime.codebox_get),
        'p' => opcodes::emit_codebox_put(asm, *state, runtime.codebox_ptr, runtime.codebox_put),

        '?' => {
            let mut cursor = *state;
            let outcome = opcodes::emit_conditional_skip(asm, codebox, *state, &mut cursor);
            *state = cursor;
            match outcome {
                SkipOutcome::Fused => trace.condskip = true,
                SkipOutcome::Bailout => state.dir = Direction::Finished,
            }
        }

        ';' => {
            opcodes::emit_program_end(asm, *state);
            if !trace.addskip {
                state.dir = Direction::Finished;
            }
        }

        ' ' => {}

        other => {
            return Err(CompileError::UnknownOpcode { ch: other, row: state.row, col: state.col });
        }
    }
    Ok(())
}

/// Push the callee-saved ABI registers, load the stack descriptor's fields
/// into the cached pointer/count registers.
fn emit_prologue(asm: &mut Assembler) {
    asm.push(Reg::Rbx);
    asm.push(fixed::R_STACKTOP);
    asm.push(fixed::R_STACKNUM);
    asm.push(fixed::R_STACK);
    asm.push(fixed::END_STATE);

    asm.mov_reg_reg(fixed::R_STACK, Reg::Rdi);
    asm.mov_reg_reg(fixed::END_STATE, Reg::Rsi);

    asm.mov_reg_mem(fixed::R_STACKNUM, fixed::R_STACK, 0); // num_items
    asm.mov_reg_mem(fixed::R_STACKTOP, fixed::R_STACK, 8); // data

    asm.mov_reg_reg(Reg::Rax, fixed::R_STACKNUM);
    asm.mov_reg_imm64(Reg::Rcx, CELL_SIZE as i64);
    asm.imul_reg_reg(Reg::Rax, Reg::Rcx);
    asm.add_reg_reg(fixed::R_STACKTOP, Reg::Rax);
}

/// The trace's single exit point ("emitted code always
/// restores the shared ABI registers on exit via a single epilogue
/// label"). `r_ret` (rax) is left untouched — every emitter sets it
/// immediately before jumping here.
fn emit_epilogue(asm: &mut Assembler) {
    asm.define_epilogue();
    asm.pop(fixed::END_STATE);
    asm.pop(fixed::R_STACK);
    asm.pop(fixed::R_STACKNUM);
    asm.pop(fixed::R_STACKTOP);
    asm.pop(Reg::Rbx);
    asm.ret();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_runtime() -> RuntimeAddrs {
        RuntimeAddrs {
            printf: 1,
            putchar: 1,
            getchar: 1,
            rand: 1,
            reverse_stack: 1,
            shift_left: 1,
            shift_right: 1,
            register_swap: 1,
            codebox_get: 1,
            codebox_put: 1,
            int_format: 1,
            float_format: 1,
            codebox_ptr: 1,
        }
    }

    #[test]
    fn unknown_opcode_is_a_compile_error() {
        let codebox = Codebox::parse("1Q;");
        let runtime = dummy_runtime();
        let start = IpState::new(0, 0, Direction::Right);
        let err = compile(&codebox, start, &runtime).unwrap_err();
        assert!(matches!(err, CompileError::UnknownOpcode { ch: 'Q', .. }));
    }

    #[test]
    fn halting_program_compiles_to_a_nonempty_block() {
        let codebox = Codebox::parse("1n;");
        let runtime = dummy_runtime();
        let start = IpState::new(0, 0, Direction::Right);
        let block = compile(&codebox, start, &runtime).unwrap();
        assert!(block.size() > 0);
        assert_eq!(block.max_stack_change(), 1);
    }

    #[test]
    fn pure_mirror_cycle_closes_without_error() {
        let codebox = Codebox::parse(">v\n^<");
        let runtime = dummy_runtime();
        let start = IpState::new(0, 0, Direction::Right);
        let block = compile(&codebox, start, &runtime).unwrap();
        assert_eq!(block.max_stack_change(), 0);
    }

    #[test]
    fn empty_codebox_compiles_to_a_trivial_block() {
        let codebox = Codebox::parse("");
        let runtime = dummy_runtime();
        let start = IpState::new(0, 0, Direction::Right);
        let block = compile(&codebox, start, &runtime).unwrap();
        assert!(block.size() > 0);
    }
}
