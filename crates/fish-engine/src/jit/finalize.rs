//! Block finalizer: label linking already happened eagerly
//! as the assembler emitted each jump (see `assembler::labels`), so what's
//! left here is allocate → encode → protect → package. Any failure frees
//! the assembler state and returns without leaking a mapping.

use crate::error::CompileError;
use crate::jit::assembler::Assembler;
use crate::jit::block::CompiledBlock;

/// Turn a finished assembler buffer into an executable block.
pub fn finalize(asm: Assembler, max_stack_change: usize) -> Result<CompiledBlock, CompileError> {
    let bytes = asm.buf.into_bytes();
    let size = bytes.len();

    let mut mapping = region::alloc(size.max(1), region::Protection::READ_WRITE)
        .map_err(|e| CompileError::Allocation(e.to_string()))?;

    // Safety: `mapping` was just allocated read-write with room for at
    // least `size` bytes, and nothing else holds a view into it yet.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapping.as_mut_ptr::<u8>(), size);
    }

    // Safety: the mapping's full extent is exactly what we just wrote;
    // re-protecting it read+execute is the documented transition before
    // handing the block to a caller.
    unsafe {
        region::protect(mapping.as_ptr::<u8>(), mapping.len(), region::Protection::READ_EXECUTE)
            .map_err(|e| CompileError::Assembler(e.to_string()))?;
    }

    Ok(CompiledBlock::new(mapping, 0, size, max_stack_change))
}
