//! Error types for compilation and execution: a small `thiserror` enum
//! per failure domain rather than a single catch-all. Compile-time
//! failures always collapse to `compile()` returning `Err`/`None`; there
//! is no partial success.

/// Failure while building a trace. Every variant here means `compile`
/// frees whatever it had built and returns without a usable block.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The codebox contained a character with no opcode meaning.
    #[error("unknown opcode {ch:?} at ({row}, {col})")]
    UnknownOpcode {
        /// The offending character.
        ch: char,
        /// Row of the offending character.
        row: usize,
        /// Column of the offending character.
        col: usize,
    },

    /// A string literal (`"`/`'`) was never closed before the codebox ended.
    #[error("unterminated string literal starting at ({row}, {col})")]
    UnterminatedString {
        /// Row the opening quote was read at.
        row: usize,
        /// Column the opening quote was read at.
        col: usize,
    },

    /// Allocating a seen-state record, block struct, or executable mapping failed.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// The macro assembler failed to link, encode, or re-protect the buffer.
    #[error("assembler failure: {0}")]
    Assembler(String),
}

/// Failure surfaced by an emitted trace at runtime, or by the interpreter
/// fallback path stepping the same opcode.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A binary or unary op ran with too few items on the stack.
    #[error("stack underflow at ({row}, {col})")]
    StackUnderflow {
        /// Row of the faulting instruction.
        row: usize,
        /// Column of the faulting instruction.
        col: usize,
    },

    /// `%` (integer modulo) by zero. `,` (float division) by zero is not
    /// an error — it produces the host's float infinity/NaN instead.
    #[error("division by zero at ({row}, {col})")]
    DivisionByZero {
        /// Row of the faulting instruction.
        row: usize,
        /// Column of the faulting instruction.
        col: usize,
    },
}

/// Either failure kind an `Interpreter` run can end in: a bad program that
/// never should have compiled, or a runtime fault an emitted trace (or the
/// `jit_disabled` fallback) hit while executing a well-formed one.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Propagated from `jit::compile`.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Propagated from executing a trace or single-stepping.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
