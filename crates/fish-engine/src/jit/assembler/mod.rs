//! Hand-rolled x86-64 macro assembler: built for one
//! job — emitting a single straight-line trace — rather than as a
//! general-purpose codegen backend. There is no register allocator; the
//! fixed ABI in `regs::fixed` is the whole allocation story.

mod buffer;
mod labels;
mod regs;
mod x86;

pub use buffer::CodeBuffer;
pub use labels::{Label, Labels};
pub use regs::{fixed, Cond, Reg};
pub use x86::Assembler;
