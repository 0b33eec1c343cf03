//! Top-level JIT engine: owns the trace cache and the resolved
//! `RuntimeAddrs` an `Interpreter` needs to call `trace::compile`
//! repeatedly without re-resolving every foreign-call address each time.
//!
//! A key-and-evict cache over a single-threaded `FxHashMap` — there is no
//! `parking_lot::RwLock` here because only one `Interpreter` ever touches
//! a given engine, and the JIT never runs concurrently with itself.

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::codebox::{Codebox, IpState};
use crate::error::CompileError;
use crate::jit::block::CompiledBlock;
use crate::jit::trace::{self, RuntimeAddrs};

/// `printf` format string for the INTEGER path of `n`, shared by the JIT's
/// baked-in pointer and the interpreter fallback's direct call so both
/// paths print identically.
pub(crate) static INT_FORMAT: &[u8] = b"%ld\0";
/// `printf` format string for the FLOAT path of `n`.
pub(crate) static FLOAT_FORMAT: &[u8] = b"%.16g\0";

/// Configuration for the JIT engine.
#[derive(Debug, Clone, Copy)]
pub struct JitConfig {
    /// Maximum number of compiled traces kept in the cache before the
    /// oldest is evicted to make room for a new one.
    pub max_cached_traces: usize,
    /// Forces pure interpretation (`Interpreter::step`), bypassing
    /// `compile` entirely — useful for exercising the fallback path
    /// independently of the JIT.
    pub jit_disabled: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig { max_cached_traces: 256, jit_disabled: false }
    }
}

/// Owns the trace cache and the resolved runtime addresses for one codebox.
pub struct JitEngine {
    config: JitConfig,
    runtime: RuntimeAddrs,
    cache: FxHashMap<IpState, Rc<CompiledBlock>>,
    /// Insertion order, for FIFO eviction once `max_cached_traces` is hit.
    order: VecDeque<IpState>,
}

impl JitEngine {
    /// A new engine with default configuration. `codebox_ptr` is the stable
    /// address of the `Codebox` every compiled trace's `g`/`p` opcodes will
    /// call back into — it must remain live and unmoved for the engine's
    /// lifetime (see `Interpreter`, which boxes its codebox for this reason).
    pub fn new(codebox_ptr: usize) -> Self {
        JitEngine::with_config(JitConfig::default(), codebox_ptr)
    }

    /// A new engine with custom configuration.
    pub fn with_config(config: JitConfig, codebox_ptr: usize) -> Self {
        JitEngine {
            config,
            runtime: build_runtime_addrs(codebox_ptr),
            cache: FxHashMap::default(),
            order: VecDeque::new(),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Number of traces currently cached.
    pub fn cached_trace_count(&self) -> usize {
        self.cache.len()
    }

    /// Fetch the trace starting at `state` from cache, compiling and
    /// inserting it on a miss. Evicts the oldest entry first if the cache
    /// is already at `max_cached_traces`.
    pub fn get_or_compile(&mut self, codebox: &Codebox, state: IpState) -> Result<Rc<CompiledBlock>, CompileError> {
        if let Some(block) = self.cache.get(&state) {
            log::trace!("trace cache hit for {:?}", state);
            return Ok(Rc::clone(block));
        }

        log::debug!("compiling new trace from {:?}", state);
        let block = Rc::new(trace::compile(codebox, state, &self.runtime)?);

        if self.cache.len() >= self.config.max_cached_traces {
            if let Some(oldest) = self.order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(state, Rc::clone(&block));
        self.order.push_back(state);
        Ok(block)
    }
}

fn build_runtime_addrs(codebox_ptr: usize) -> RuntimeAddrs {
    RuntimeAddrs {
        printf: libc::printf as usize,
        putchar: libc::putchar as usize,
        getchar: libc::getchar as usize,
        rand: libc::rand as usize,
        reverse_stack: crate::stack::fish_reverse_stack as usize,
        shift_left: crate::stack::fish_shift_left as usize,
        shift_right: crate::stack::fish_shift_right as usize,
        register_swap: crate::stack::fish_register_swap as usize,
        codebox_get: crate::codebox::fish_codebox_get as usize,
        codebox_put: crate::codebox::fish_codebox_put as usize,
        int_format: INT_FORMAT.as_ptr() as usize,
        float_format: FLOAT_FORMAT.as_ptr() as usize,
        codebox_ptr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebox::Direction;

    #[test]
    fn cache_starts_empty() {
        let codebox = Codebox::parse("1n;");
        let engine = JitEngine::new(&codebox as *const Codebox as usize);
        assert_eq!(engine.cached_trace_count(), 0);
    }

    #[test]
    fn second_compile_of_same_state_is_a_cache_hit() {
        let codebox = Codebox::parse("1n;");
        let mut engine = JitEngine::new(&codebox as *const Codebox as usize);
        let start = IpState::new(0, 0, Direction::Right);
        let first = engine.get_or_compile(&codebox, start).unwrap();
        assert_eq!(engine.cached_trace_count(), 1);
        let second = engine.get_or_compile(&codebox, start).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(engine.cached_trace_count(), 1);
    }

    #[test]
    fn cache_evicts_oldest_once_full() {
        let codebox = Codebox::parse("1n;2n;3n;");
        let config = JitConfig { max_cached_traces: 2, jit_disabled: false };
        let mut engine = JitEngine::with_config(config, &codebox as *const Codebox as usize);

        let a = IpState::new(0, 0, Direction::Right);
        let b = IpState::new(0, 3, Direction::Right);
        let c = IpState::new(0, 6, Direction::Right);

        engine.get_or_compile(&codebox, a).unwrap();
        engine.get_or_compile(&codebox, b).unwrap();
        assert_eq!(engine.cached_trace_count(), 2);
        engine.get_or_compile(&codebox, c).unwrap();
        assert_eq!(engine.cached_trace_count(), 2);
    }
}
