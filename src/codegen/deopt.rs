// This module emits deoptimization call sites and keeps them patchable. The
// runtime replaces a deopt call in place with a jump to a different entry, and
// the patch overwrites a fixed number of bytes starting at the site; two sites
// that sit closer together than the patch size would corrupt each other. The
// assembler does not know byte offsets until finalization, so the tracker uses
// the emitted-instruction count as a lower bound on distance (every x86
// instruction encodes to at least one byte) and pads with single-byte NOPs
// until the bound reaches the patch size. This over-pads occasionally and is
// never wrong. Each site records its bailout id, kind and a label that
// finalization resolves to the site's code offset.

//! Deoptimization call sites.

use iced_x86::code_asm::CodeLabel;

use crate::core::error::CodegenResult;
use crate::isa::ScratchPair;
use crate::masm::MacroAssembler;

/// When the deoptimization takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeoptKind {
    /// Bail out immediately at this site.
    Eager,
    /// Patched in after a call returns; the site follows a normal call.
    Lazy,
    /// Eager, but triggered by profile counters rather than a failed check.
    Soft,
}

/// One recorded deoptimization site, label still unresolved.
#[derive(Debug, Clone, Copy)]
pub struct PendingDeoptSite {
    pub id: u32,
    pub kind: DeoptKind,
    pub label: CodeLabel,
    /// Address of the deoptimization entry this site calls.
    pub entry: u64,
}

/// Emits deopt calls and enforces the minimum patch distance between sites.
pub struct DeoptSupport {
    patch_size: u32,
    /// Instruction count at the start of the previous patchable site.
    last_site_start: Option<usize>,
    sites: Vec<PendingDeoptSite>,
}

impl DeoptSupport {
    pub fn new(patch_size: u32) -> Self {
        Self {
            patch_size,
            last_site_start: None,
            sites: Vec::new(),
        }
    }

    /// Pad with single-byte NOPs until the lower bound on the byte distance
    /// from the previous site start reaches the patch size. Called before an
    /// eager site and before the call whose return address becomes a lazy
    /// site.
    pub fn pad_before_site(&self, masm: &mut MacroAssembler) -> CodegenResult<()> {
        if let Some(start) = self.last_site_start {
            let gap = masm.instrs_emitted() - start;
            for _ in gap..self.patch_size as usize {
                masm.nop()?;
            }
        }
        Ok(())
    }

    /// Emit one deoptimization call: load the entry address into the scratch
    /// register and call through it.
    pub fn emit_deopt_call(
        &mut self,
        masm: &mut MacroAssembler,
        scratch: &mut ScratchPair,
        kind: DeoptKind,
        id: u32,
        entry: u64,
    ) -> CodegenResult<()> {
        self.pad_before_site(masm)?;
        let mut site = masm.create_label();
        masm.bind(&mut site)?;
        self.sites.push(PendingDeoptSite {
            id,
            kind,
            label: site,
            entry,
        });
        self.last_site_start = Some(masm.instrs_emitted());
        let target = scratch.gp();
        masm.mov_ri(masm.ptr_size(), target, entry as i64)?;
        masm.call_r(target)
    }

    /// Record the return point of a normal call as a lazily patchable site.
    /// The call itself was already emitted; the runtime patches at its return
    /// address, so the same distance rule applies.
    pub fn record_lazy_site(
        &mut self,
        masm: &mut MacroAssembler,
        id: u32,
        entry: u64,
    ) -> CodegenResult<()> {
        let mut site = masm.create_label();
        masm.bind(&mut site)?;
        self.sites.push(PendingDeoptSite {
            id,
            kind: DeoptKind::Lazy,
            label: site,
            entry,
        });
        self.last_site_start = Some(masm.instrs_emitted());
        Ok(())
    }

    pub fn sites(&self) -> &[PendingDeoptSite] {
        &self.sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{TargetIsa, X64};
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn decode(code: &[u8]) -> Vec<iced_x86::Instruction> {
        let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode());
        }
        out
    }

    #[test]
    fn test_first_site_is_not_padded() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut scratch = ScratchPair::new(&isa);
        let mut deopt = DeoptSupport::new(isa.deopt_patch_size());
        deopt
            .emit_deopt_call(&mut masm, &mut scratch, DeoptKind::Eager, 0, 0x1000)
            .unwrap();

        let code = masm.finalize().unwrap();
        let mnemonics: Vec<_> = decode(code.bytes()).iter().map(|i| i.mnemonic()).collect();
        assert_eq!(mnemonics, vec![Mnemonic::Mov, Mnemonic::Call]);
    }

    #[test]
    fn test_adjacent_sites_are_padded_apart() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut scratch = ScratchPair::new(&isa);
        let mut deopt = DeoptSupport::new(isa.deopt_patch_size());
        deopt
            .emit_deopt_call(&mut masm, &mut scratch, DeoptKind::Eager, 0, 0x1000)
            .unwrap();
        deopt
            .emit_deopt_call(&mut masm, &mut scratch, DeoptKind::Eager, 1, 0x2000)
            .unwrap();

        let code = masm.finalize().unwrap();
        let instrs = decode(code.bytes());
        let nops = instrs
            .iter()
            .filter(|i| i.mnemonic() == Mnemonic::Nop)
            .count();
        // Two instructions counted since the first site; 13 - 2 NOPs of
        // padding before the second.
        assert_eq!(nops, 11);

        // The real byte distance between the two sites must cover the patch.
        let first = code.label_offset(deopt.sites()[0].label).unwrap();
        let second = code.label_offset(deopt.sites()[1].label).unwrap();
        assert!(second - first >= isa.deopt_patch_size());
    }

    #[test]
    fn test_intervening_code_reduces_padding() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut scratch = ScratchPair::new(&isa);
        let mut deopt = DeoptSupport::new(isa.deopt_patch_size());
        deopt
            .emit_deopt_call(&mut masm, &mut scratch, DeoptKind::Eager, 0, 0x1000)
            .unwrap();
        for _ in 0..20 {
            masm.nop().unwrap();
        }
        deopt
            .emit_deopt_call(&mut masm, &mut scratch, DeoptKind::Eager, 1, 0x2000)
            .unwrap();

        let code = masm.finalize().unwrap();
        let instrs = decode(code.bytes());
        // 22 instructions since the first site start; no extra padding.
        let nops = instrs
            .iter()
            .filter(|i| i.mnemonic() == Mnemonic::Nop)
            .count();
        assert_eq!(nops, 20);
    }

    #[test]
    fn test_lazy_site_recorded_after_call() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut deopt = DeoptSupport::new(isa.deopt_patch_size());
        masm.mov_ri(crate::masm::OpSize::S64, crate::isa::AsmReg::gp(0), 0x3000)
            .unwrap();
        masm.call_r(crate::isa::AsmReg::gp(0)).unwrap();
        deopt.record_lazy_site(&mut masm, 7, 0x4000).unwrap();
        masm.ret().unwrap();

        assert_eq!(deopt.sites().len(), 1);
        assert_eq!(deopt.sites()[0].kind, DeoptKind::Lazy);
        assert_eq!(deopt.sites()[0].id, 7);

        let code = masm.finalize().unwrap();
        // The lazy site label points at the instruction after the call.
        let off = code.label_offset(deopt.sites()[0].label).unwrap() as usize;
        assert_eq!(off, code.bytes().len() - 1);
    }
}
