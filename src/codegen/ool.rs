// This module collects out-of-line code requests made while the main
// instruction stream is being emitted. Rare paths (bounds-check misses, slow
// float-to-int conversion) jump forward to an entry label, run a short body
// emitted after the last block, and jump back to an exit label in the main
// stream. Bodies are a closed enum rather than boxed closures: every rare path
// the emitter can request is known statically, and the enum keeps the entries
// storable in the session arena without lifetime gymnastics. The list
// preserves request order, which is also emission order.

//! Out-of-line code for rare paths.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use iced_x86::code_asm::CodeLabel;

use crate::isa::AsmReg;

/// Body of one out-of-line stanza.
#[derive(Debug, Clone, Copy)]
pub enum OolBody {
    /// Bounds-check miss on an integer load: produce 0 in the destination.
    IntZeroSentinel { dst: AsmReg },
    /// Bounds-check miss on a float load: produce a quiet NaN.
    FloatNaNSentinel { dst: AsmReg },
    /// cvttsd2si overflowed: convert via the runtime helper. The input is
    /// passed on the stack, the result comes back in the helper's return
    /// register and is moved to `dst`.
    TruncateFallback {
        dst: AsmReg,
        src: AsmReg,
        helper: u64,
    },
}

/// One out-of-line stanza: entry label (jump target of the rare branch), exit
/// label (resume point in the main stream) and the body to emit.
#[derive(Debug, Clone, Copy)]
pub struct OolEntry {
    pub entry: CodeLabel,
    pub exit: CodeLabel,
    pub body: OolBody,
}

/// Arena-backed list of pending out-of-line stanzas.
pub struct OolList<'arena> {
    entries: BumpVec<'arena, OolEntry>,
}

impl<'arena> OolList<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            entries: BumpVec::new_in(arena),
        }
    }

    pub fn push(&mut self, entry: OolEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drain in request order for emission after the last block.
    pub fn take(&mut self) -> Vec<OolEntry> {
        let mut out = Vec::with_capacity(self.entries.len());
        out.extend(self.entries.drain(..));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masm::MacroAssembler;

    #[test]
    fn test_list_preserves_request_order() {
        let arena = Bump::new();
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut list = OolList::new(&arena);

        for id in 0..3 {
            list.push(OolEntry {
                entry: masm.create_label(),
                exit: masm.create_label(),
                body: OolBody::IntZeroSentinel {
                    dst: AsmReg::gp(id),
                },
            });
        }
        assert_eq!(list.len(), 3);

        let drained = list.take();
        assert!(list.is_empty());
        for (id, entry) in drained.iter().enumerate() {
            match entry.body {
                OolBody::IntZeroSentinel { dst } => assert_eq!(dst, AsmReg::gp(id as u8)),
                other => panic!("unexpected body: {other:?}"),
            }
        }
    }
}
