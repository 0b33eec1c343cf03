//! Forward/backward label resolution: "a two-pass link
//! (label collection then distance resolution)". Every label here is
//! resolved eagerly instead — a backward reference patches immediately
//! against the last definition, and a forward reference queues a patch
//! that fires the next time that label is defined. Redefining a label
//! mid-trace is legal; a later forward reference always resolves against
//! whichever definition comes next, never an earlier one.

use super::buffer::CodeBuffer;

/// One label site: either a numeric local label (1-9, reusable within a
/// trace) or a single global site such as `epilogue`.
#[derive(Debug, Default)]
pub struct Label {
    last_def: Option<usize>,
    pending_forward: Vec<(usize, usize)>,
}

impl Label {
    /// Define this label at the buffer's current position, resolving any
    /// forward references recorded since the last definition.
    pub fn define(&mut self, buf: &mut CodeBuffer) {
        let pos = buf.len();
        for (patch_at, instr_end) in self.pending_forward.drain(..) {
            buf.patch_i32(patch_at, pos as i32 - instr_end as i32);
        }
        self.last_def = Some(pos);
    }

    /// Reserve a `rel32` field for a reference that resolves the next time
    /// this label is defined (`>N` in NASM-style notation).
    pub fn ref_forward(&mut self, buf: &mut CodeBuffer) -> usize {
        let patch_at = buf.reserve_i32();
        let instr_end = buf.len();
        self.pending_forward.push((patch_at, instr_end));
        patch_at
    }

    /// Reserve and immediately resolve a `rel32` field against the most
    /// recent definition (`<N`). Panics if the label was never defined —
    /// the trace driver only emits backward references it knows are valid.
    pub fn ref_backward(&mut self, buf: &mut CodeBuffer) -> usize {
        let patch_at = buf.reserve_i32();
        let instr_end = buf.len();
        let target = self
            .last_def
            .expect("backward label reference with no prior definition in this trace");
        buf.patch_i32(patch_at, target as i32 - instr_end as i32);
        patch_at
    }

    /// Whether this label has been defined at least once.
    pub fn is_defined(&self) -> bool {
        self.last_def.is_some()
    }
}

/// The label table for one trace: numeric locals 1-9 plus the single
/// `epilogue` global site every exit path jumps to.
#[derive(Debug, Default)]
pub struct Labels {
    /// Index 0 unused; 1-9 are the numeric local labels the assembler
    /// describes, with label 9 reserved by the trace driver as the
    /// fused-skip merge point.
    locals: [Label; 10],
    /// The trace's single exit point.
    pub epilogue: Label,
}

impl Labels {
    /// A fresh, empty label table.
    pub fn new() -> Self {
        Labels::default()
    }

    /// The numeric local label `n` (1-9).
    pub fn local(&mut self, n: u8) -> &mut Label {
        assert!((1..=9).contains(&n), "local labels are numbered 1-9");
        &mut self.locals[n as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_reference_resolves_on_definition() {
        let mut buf = CodeBuffer::new();
        let mut label = Label::default();
        buf.push_u8(0xEB); // jmp rel8 placeholder byte, just to offset things
        let patch_at = label.ref_forward(&mut buf);
        buf.push_u8(0x90); // filler between reference and definition
        label.define(&mut buf);
        // instr_end was right after the reserved i32; the nop sits between
        // instr_end and the definition, so the relative offset is 1.
        let mut expected = vec![0u8; 4];
        expected.copy_from_slice(&1i32.to_le_bytes());
        assert_eq!(&buf.as_slice()[patch_at..patch_at + 4], &expected[..]);
    }

    #[test]
    fn backward_reference_resolves_immediately() {
        let mut buf = CodeBuffer::new();
        let mut label = Label::default();
        label.define(&mut buf);
        buf.push_u8(0x90);
        let patch_at = label.ref_backward(&mut buf);
        let rel = i32::from_le_bytes(buf.as_slice()[patch_at..patch_at + 4].try_into().unwrap());
        assert_eq!(rel, -5); // definition was at 0, instr_end is at 5
    }

    #[test]
    fn redefinition_only_resolves_later_forward_refs() {
        let mut buf = CodeBuffer::new();
        let mut label = Label::default();
        label.define(&mut buf); // def #1 at 0
        buf.push_u8(0x90);
        let patch_at = label.ref_forward(&mut buf); // queued against def #2
        buf.push_u8(0x90);
        label.define(&mut buf); // def #2
        let rel = i32::from_le_bytes(buf.as_slice()[patch_at..patch_at + 4].try_into().unwrap());
        assert_eq!(rel, 1);
    }
}
