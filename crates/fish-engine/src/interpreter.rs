//! Outer interpreter driver: repeatedly invokes the JIT and runs the trace
//! it returns, looping trace-to-trace until the program halts. The JIT core
//! itself treats the driver as an external collaborator, but a runnable
//! crate needs one concrete implementation of it.
//!
//! When `JitConfig::jit_disabled` is set, `run` instead single-steps every
//! instruction directly in `step`, which re-implements the same ><>
//! semantics `jit::opcodes` compiles — in plain Rust rather than emitted
//! machine code. This is the interpreter's fallback path when it chooses
//! not to compile, and the independent reference the JIT's output must
//! agree with: the same codebox and starting stack must produce the same
//! observable side effects and end-state whichever path runs it.

use crate::codebox::{Codebox, Direction, IpState};
use crate::error::{RunError, RuntimeError};
use crate::jit::opcodes::{self, ArithOp};
use crate::jit::{JitConfig, JitEngine};
use crate::stack::{fish_register_swap, fish_reverse_stack, fish_shift_left, fish_shift_right};
use crate::value::Cell;

/// Drives a codebox to completion, alternating between JIT-compiled traces
/// and (when `jit_disabled`) direct interpretation of one instruction at a
/// time.
pub struct Interpreter {
    /// Boxed so its address stays stable across `self` moving — every
    /// compiled trace bakes this address in as `RuntimeAddrs::codebox_ptr`
    /// (see `jit::engine::build_runtime_addrs`).
    codebox: Box<Codebox>,
    stack: crate::stack::StackDescriptor,
    state: IpState,
    engine: JitEngine,
}

impl Interpreter {
    /// A new interpreter starting at `(0, 0, Right)`, the conventional ><>
    /// entry point, with default `JitConfig`.
    pub fn new(codebox: Codebox) -> Self {
        Interpreter::with_config(codebox, JitConfig::default())
    }

    /// A new interpreter with a custom `JitConfig` (trace-cache capacity,
    /// or forcing pure interpretation).
    pub fn with_config(codebox: Codebox, config: JitConfig) -> Self {
        let codebox = Box::new(codebox);
        let codebox_ptr = codebox.as_ref() as *const Codebox as usize;
        Interpreter {
            engine: JitEngine::with_config(config, codebox_ptr),
            codebox,
            stack: crate::stack::StackDescriptor::default(),
            state: IpState::new(0, 0, Direction::Right),
        }
    }

    /// The current IP state, mostly useful for tests and debugging.
    pub fn state(&self) -> IpState {
        self.state
    }

    /// The runtime value stack, for inspecting results after `run` returns.
    pub fn stack(&self) -> &crate::stack::StackDescriptor {
        &self.stack
    }

    /// Number of traces the JIT has compiled and cached so far.
    pub fn cached_trace_count(&self) -> usize {
        self.engine.cached_trace_count()
    }

    /// Run until the program halts (`;`, or any opcode that sets
    /// direction=FINISHED), alternating compile-and-call with the JIT or
    /// single-stepping directly per `JitConfig::jit_disabled`.
    pub fn run(&mut self) -> Result<(), RunError> {
        loop {
            if self.state.dir == Direction::Finished {
                return Ok(());
            }

            if self.engine.config().jit_disabled {
                self.step()?;
                continue;
            }

            let block = self.engine.get_or_compile(&self.codebox, self.state)?;
            self.stack.reserve(block.max_stack_change());
            let mut end_state = self.state;
            // Safety: `stack` and `end_state` are both live for the
            // duration of the call, and `reserve` above guarantees the
            // spare capacity the block's ABI contract requires.
            let ret = unsafe { block.call(&mut self.stack, &mut end_state) };
            match ret {
                0 => {}
                1 => return Err(RuntimeError::StackUnderflow { row: end_state.row, col: end_state.col }.into()),
                2 => return Err(RuntimeError::DivisionByZero { row: end_state.row, col: end_state.col }.into()),
                other => unreachable!("compiled trace returned an undefined status code {other}"),
            }
            self.state = end_state;
        }
    }

    fn require(&self, n: usize) -> Result<(), RuntimeError> {
        if self.stack.len() < n {
            Err(RuntimeError::StackUnderflow { row: self.state.row, col: self.state.col })
        } else {
            Ok(())
        }
    }

    fn pop(&mut self) -> Result<Cell, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { row: self.state.row, col: self.state.col })
    }

    /// Interpret exactly one instruction directly, without emitting any
    /// machine code, and advance `self.state`. Mirrors `jit::opcodes` and
    /// `jit::trace::dispatch` op-for-op, including `?`'s `!`-parity and
    /// skip-one-cell behavior — but since there is no fused-vs-bailout
    /// distinction to make outside a compiled trace, `?` collapses to one
    /// branch: consume the `!`s, then skip the next cell or don't.
    fn step(&mut self) -> Result<(), RunError> {
        let ch = self.codebox.get(self.state.row, self.state.col);
        let mut advance = true;

        match ch {
            '>' | '<' | '^' | 'v' => self.state.dir = opcodes::direction_mutator(ch),
            '/' | '\\' | '|' | '_' | '#' => self.state.dir = opcodes::mirror(ch, self.state.dir),

            'x' => {
                let pick = unsafe { libc::rand() } & 0x3;
                let dirs = [Direction::Right, Direction::Left, Direction::Up, Direction::Down];
                self.state.dir = dirs[pick as usize];
            }

            '.' => {
                self.require(2)?;
                let row = self.pop()?;
                let col = self.pop()?;
                self.state.row = row.payload_bits() as usize;
                self.state.col = col.payload_bits() as usize;
                advance = false;
            }

            '0'..='9' | 'a'..='f' => {
                let value = ('0'..='9').contains(&ch).then(|| ch as i64 - '0' as i64).unwrap_or(ch as i64 - 'a' as i64 + 10);
                self.stack.push(Cell::Integer(value));
            }

            '"' | '\'' => {
                let chars = self.codebox.read_string(&mut self.state)?;
                for c in chars {
                    self.stack.push(Cell::Integer(c as i64));
                }
            }

            '+' | '-' | '*' | ',' | '%' | '=' | '(' | ')' => {
                let op = ArithOp::from_char(ch).expect("ch was matched as an arithmetic character");
                self.require(2)?;
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let (row, col) = (self.state.row, self.state.col);
                self.stack.push(eval_arith(op, lhs, rhs, row, col)?);
            }

            ':' => {
                self.require(1)?;
                let top = self.stack.peek(0).expect("require(1) guaranteed a top cell");
                self.stack.push(top);
            }
            '$' => {
                self.require(2)?;
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.stack.push(rhs);
                self.stack.push(lhs);
            }
            '@' => {
                self.require(3)?;
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(b);
                self.stack.push(c);
                self.stack.push(a);
            }
            '~' => {
                self.require(1)?;
                self.pop()?;
            }
            'l' => self.stack.push(Cell::Integer(self.stack.len() as i64)),
            '&' => unsafe { fish_register_swap(&mut self.stack) },
            'r' => unsafe { fish_reverse_stack(&mut self.stack) },
            '{' => unsafe { fish_shift_left(&mut self.stack) },
            '}' => unsafe { fish_shift_right(&mut self.stack) },

            'o' => {
                self.require(1)?;
                let cell = self.pop()?;
                unsafe { libc::putchar(cell.payload_bits() as i32) };
            }
            'n' => {
                self.require(1)?;
                let cell = self.pop()?;
                unsafe {
                    match cell {
                        Cell::Integer(n) => {
                            libc::printf(crate::jit::engine::INT_FORMAT.as_ptr() as *const libc::c_char, n);
                        }
                        Cell::Float(f) => {
                            libc::printf(crate::jit::engine::FLOAT_FORMAT.as_ptr() as *const libc::c_char, f);
                        }
                    }
                };
            }
            'i' => {
                let got = unsafe { libc::getchar() };
                self.stack.push(Cell::Integer(got as i64));
            }
            'g' => {
                self.require(2)?;
                let y = self.pop()?;
                let x = self.pop()?;
                let ch = self.codebox.get(y.payload_bits() as usize, x.payload_bits() as usize);
                self.stack.push(Cell::Integer(ch as i64));
            }
            'p' => {
                self.require(3)?;
                let y = self.pop()?;
                let x = self.pop()?;
                let value = self.pop()?;
                let ch = char::from_u32(value.payload_bits() as u32).unwrap_or(' ');
                self.codebox.set(y.payload_bits() as usize, x.payload_bits() as usize, ch);
            }

            '?' => {
                self.require(1)?;
                let top = self.pop()?;
                let mut cursor = self.state;
                let mut inverted = false;
                while self.codebox.peek_next(cursor) == '!' {
                    self.codebox.next(&mut cursor);
                    inverted = !inverted;
                }
                let zero = top.is_zero();
                let should_skip = if inverted { !zero } else { zero };
                self.state = cursor;
                self.codebox.next(&mut self.state);
                if should_skip {
                    self.codebox.next(&mut self.state);
                }
                advance = false;
            }

            ';' => self.state.dir = Direction::Finished,

            ' ' => {}

            other => {
                return Err(crate::error::CompileError::UnknownOpcode { ch: other, row: self.state.row, col: self.state.col }.into());
            }
        }

        if advance && self.state.dir != Direction::Finished {
            self.codebox.next(&mut self.state);
        }
        Ok(())
    }
}

/// The same tag-promotion rule `jit::opcodes::emit_arith` compiles:
/// integer-integer stays integer (except `,`, which always forces float),
/// any float operand promotes both to float, comparisons always yield an
/// INTEGER 0/1. `%` is the one exception to promotion: it always computes
/// on integers, truncating a float-tagged operand via `as_i64` instead.
fn eval_arith(op: ArithOp, lhs: Cell, rhs: Cell, row: usize, col: usize) -> Result<Cell, RuntimeError> {
    use ArithOp::*;

    if matches!(op, Mod) {
        let (l, r) = (as_i64(lhs), as_i64(rhs));
        return Ok(Cell::Integer(l.checked_rem(r).ok_or(RuntimeError::DivisionByZero { row, col })?));
    }

    let use_float = matches!(op, Div) || matches!(lhs, Cell::Float(_)) || matches!(rhs, Cell::Float(_));

    if matches!(op, Eq | Lt | Gt) {
        let result = if use_float {
            let (l, r) = (lhs.as_f64(), rhs.as_f64());
            match op {
                Eq => l == r,
                Lt => l < r,
                Gt => l > r,
                _ => unreachable!(),
            }
        } else {
            let (l, r) = (as_i64(lhs), as_i64(rhs));
            match op {
                Eq => l == r,
                Lt => l < r,
                Gt => l > r,
                _ => unreachable!(),
            }
        };
        return Ok(Cell::Integer(result as i64));
    }

    if use_float {
        let (l, r) = (lhs.as_f64(), rhs.as_f64());
        return Ok(Cell::Float(match op {
            Add => l + r,
            Sub => l - r,
            Mul => l * r,
            Div => l / r,
            Mod | Eq | Lt | Gt => unreachable!(),
        }));
    }

    let (l, r) = (as_i64(lhs), as_i64(rhs));
    Ok(Cell::Integer(match op {
        Add => l.wrapping_add(r),
        Sub => l.wrapping_sub(r),
        Mul => l.wrapping_mul(r),
        Div | Mod | Eq | Lt | Gt => unreachable!(),
    }))
}

fn as_i64(cell: Cell) -> i64 {
    match cell {
        Cell::Integer(n) => n,
        Cell::Float(f) => f as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> JitConfig {
        JitConfig { jit_disabled: true, ..JitConfig::default() }
    }

    #[test]
    fn halts_immediately_on_semicolon() {
        let mut interp = Interpreter::with_config(Codebox::parse(";"), disabled_config());
        interp.run().unwrap();
        assert_eq!(interp.state().dir, Direction::Finished);
    }

    #[test]
    fn addition_leaves_the_sum_on_the_stack() {
        let mut interp = Interpreter::with_config(Codebox::parse("12+;"), disabled_config());
        interp.run().unwrap();
        assert_eq!(interp.stack().peek(0), Some(Cell::Integer(3)));
    }

    #[test]
    fn underflow_on_empty_stack_is_reported_at_the_faulting_cell() {
        let mut interp = Interpreter::with_config(Codebox::parse("~;"), disabled_config());
        let err = interp.run().unwrap_err();
        match err {
            RunError::Runtime(RuntimeError::StackUnderflow { row, col }) => {
                assert_eq!((row, col), (0, 0));
            }
            other => panic!("expected StackUnderflow, got {other:?}"),
        }
    }

    #[test]
    fn skip_with_zero_top_skips_the_next_cell() {
        // 0 ? 1 n ; 2 n ;  -- top-of-stack is 0, so `1n` is skipped.
        let mut interp = Interpreter::with_config(Codebox::parse("0?1n;2n;"), disabled_config());
        interp.run().unwrap();
        assert_eq!(interp.state().dir, Direction::Finished);
    }

    #[test]
    fn double_bang_cancels_and_behaves_like_bare_skip() {
        let mut interp = Interpreter::with_config(Codebox::parse("0?!!1n;2n;"), disabled_config());
        interp.run().unwrap();
        assert_eq!(interp.state().dir, Direction::Finished);
    }

    #[test]
    fn mod_by_zero_is_a_runtime_error_not_a_panic() {
        let mut interp = Interpreter::with_config(Codebox::parse("50%;"), disabled_config());
        assert!(interp.run().is_err());
    }

    #[test]
    fn jit_path_compiles_and_runs_a_halting_program() {
        let mut interp = Interpreter::new(Codebox::parse("12+;"));
        interp.run().unwrap();
        assert_eq!(interp.stack().peek(0), Some(Cell::Integer(3)));
        assert_eq!(interp.cached_trace_count(), 1);
    }
}
