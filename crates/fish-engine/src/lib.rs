//! Fish Engine
//!
//! This crate provides the complete runtime for ><> ("Fish"), the
//! two-dimensional stack-based esoteric language:
//! - **Codebox**: the 2-D program grid and instruction-pointer walk (`codebox` module)
//! - **Value stack**: the typed runtime stack and its helpers (`value`, `stack` modules)
//! - **JIT**: the tracing compiler that turns a straight-line run of the
//!   codebox into native x86-64 machine code (`jit` module)
//! - **Interpreter**: the outer driver that alternates between running
//!   JIT-compiled traces and single-stepping (`interpreter` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use fish_engine::{Codebox, Interpreter};
//!
//! let codebox = Codebox::parse("\"Hello, world!\"o;\n");
//! let mut interp = Interpreter::new(codebox);
//! interp.run().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Codebox module: the 2-D program grid, instruction-pointer state, and wrapping walk.
pub mod codebox;

/// Value module: the typed cell that lives on the runtime stack.
pub mod value;

/// Stack module: the runtime value stack and its native-layout helpers.
pub mod stack;

/// Error types shared across compilation and execution.
pub mod error;

/// JIT compilation module: the tracing compiler core.
pub mod jit;

/// Outer interpreter driver: repeatedly invokes the JIT and runs its output.
pub mod interpreter;

pub use codebox::{Codebox, Direction, IpState};
pub use error::{CompileError, RunError, RuntimeError};
pub use interpreter::Interpreter;
pub use jit::{JitConfig, JitEngine};
pub use stack::StackDescriptor;
pub use value::{Cell, Tag};
