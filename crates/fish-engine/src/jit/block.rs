//! The compiled block handle: `{ entry_point, buffer,
//! size, max_stack_change }`, owning the executable mapping for its
//! lifetime. One entry point, no stack maps or deopt info — this backend
//! has no use for either.

use crate::codebox::IpState;
use crate::stack::StackDescriptor;

/// The signature every compiled trace's entry point has: invoked as
/// `entry(stack_descriptor, end_state_ptr) -> small_int`.
/// 0 means normal exit; 1 means stack underflow; 2 means `%` by zero —
/// in both fault cases `end_state` is still written with the faulting IP.
pub type TraceEntryFn = unsafe extern "C" fn(*mut StackDescriptor, *mut IpState) -> i32;

/// One compiled trace: an executable mapping plus bookkeeping the caller
/// needs. Dropping a `CompiledBlock` unmaps the executable buffer — the
/// matching destroy falls out of `region::Allocation`'s own `Drop`, so
/// there is no separate destroy function to call by hand.
pub struct CompiledBlock {
    mapping: region::Allocation,
    entry_offset: usize,
    size: usize,
    max_stack_change: usize,
}

impl CompiledBlock {
    /// Wrap an already-protected (read+execute) mapping. `entry_offset` is
    /// always 0 for this backend — a trace has exactly one entry point —
    /// but is kept explicit in case a future backend packs more than one
    /// entry into a single mapping.
    pub(super) fn new(mapping: region::Allocation, entry_offset: usize, size: usize, max_stack_change: usize) -> Self {
        CompiledBlock { mapping, entry_offset, size, max_stack_change }
    }

    /// Total size in bytes of the linked, encoded trace.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Upper bound on the net stack growth this trace can cause.
    pub fn max_stack_change(&self) -> usize {
        self.max_stack_change
    }

    /// Raw entry point, for callers that need the pointer itself (logging,
    /// tests) rather than invoking it.
    pub fn entry_point(&self) -> *const u8 {
        // Safety: entry_offset was verified to be within the mapping when
        // the block was finalized.
        unsafe { (self.mapping.as_ptr::<u8>()).add(self.entry_offset) }
    }

    /// Invoke the trace.
    ///
    /// # Safety
    /// `stack` and `end_state` must point to a live `StackDescriptor` and a
    /// live `IpState` slot respectively, and `stack` must already have
    /// `max_stack_change()` cells of spare capacity reserved, since
    /// emitted code never reallocates the stack's backing buffer itself.
    pub unsafe fn call(&self, stack: *mut StackDescriptor, end_state: *mut IpState) -> i32 {
        let entry: TraceEntryFn = unsafe { std::mem::transmute(self.entry_point()) };
        unsafe { entry(stack, end_state) }
    }
}
