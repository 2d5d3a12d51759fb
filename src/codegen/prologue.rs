// This module emits function entry and exit sequences for the three calling
// conventions. Raw-address frames push the callee-saved registers they use and
// restore them in reverse; managed and stub frames instead lay down the two
// standard fields (context, frame marker) right below the saved frame pointer.
// Managed functions pop their parameters on return with ret imm16, the other
// conventions leave the arguments to the caller. An on-stack-replacement entry
// arrives with the unoptimized function's frame already in place, so the
// prologue skips frame construction entirely and only grows the spill area by
// the slots the unoptimized frame does not already provide. The frame
// descriptor is finalized here, exactly once, which is what makes slot offsets
// queryable for the rest of emission.

//! Prologue and epilogue emission.

use crate::core::error::CodegenResult;
use crate::core::frame::{CallConvention, Frame};
use crate::isa::{AsmReg, TargetIsa};
use crate::masm::MacroAssembler;

/// Frame marker values stored in the second standard field.
pub const FRAME_MARKER_MANAGED: i32 = 2;
pub const FRAME_MARKER_STUB: i32 = 4;

/// Emit the entry sequence and finalize the frame layout.
///
/// `incoming_context` is the register holding the context on entry to managed
/// and stub frames; raw-address frames ignore it.
pub fn emit_prologue(
    masm: &mut MacroAssembler,
    isa: &dyn TargetIsa,
    frame: &mut Frame,
    incoming_context: AsmReg,
) -> CodegenResult<()> {
    let sp = isa.stack_pointer();
    let fp = isa.frame_pointer();
    let word = masm.ptr_size();

    if frame.is_osr() {
        // The unoptimized frame is already constructed and its standard
        // fields are live; only the additional spill slots are missing.
        assert!(
            frame.convention() == CallConvention::Managed,
            "OSR entry requires a managed frame"
        );
        frame.finalize(0);
        let reservation = frame.spill_reservation(isa.slot_size());
        if reservation > 0 {
            masm.sub_ri(word, sp, reservation as i32)?;
        }
        return Ok(());
    }

    masm.push_r(fp)?;
    masm.mov_rr(word, fp, sp)?;

    let saved = match frame.convention() {
        CallConvention::RawAddress => {
            let regs = frame.callee_saved_list(isa.num_gp_regs());
            for &reg in &regs {
                masm.push_r(reg)?;
            }
            regs.len() as u32
        }
        CallConvention::Managed => {
            masm.push_r(incoming_context)?;
            masm.push_i(FRAME_MARKER_MANAGED)?;
            0
        }
        CallConvention::Stub => {
            masm.push_r(incoming_context)?;
            masm.push_i(FRAME_MARKER_STUB)?;
            0
        }
    };

    frame.finalize(saved);
    let reservation = frame.spill_reservation(isa.slot_size());
    if reservation > 0 {
        masm.sub_ri(word, sp, reservation as i32)?;
    }
    Ok(())
}

/// Emit the return sequence for a finalized frame.
pub fn emit_epilogue(
    masm: &mut MacroAssembler,
    isa: &dyn TargetIsa,
    frame: &Frame,
) -> CodegenResult<()> {
    assert!(frame.is_finalized(), "epilogue before prologue");
    let sp = isa.stack_pointer();
    let fp = isa.frame_pointer();
    let word = masm.ptr_size();

    match frame.convention() {
        CallConvention::RawAddress => {
            // Drop the spill area, restore saves in reverse push order.
            let regs = frame.callee_saved_list(isa.num_gp_regs());
            let reservation = frame.spill_reservation(isa.slot_size());
            if reservation > 0 {
                masm.add_ri(word, sp, reservation as i32)?;
            }
            for &reg in regs.iter().rev() {
                masm.pop_r(reg)?;
            }
            masm.pop_r(fp)?;
            masm.ret()
        }
        CallConvention::Managed => {
            masm.mov_rr(word, sp, fp)?;
            masm.pop_r(fp)?;
            let pop_bytes = frame.pop_bytes_on_return(isa.pointer_size());
            if pop_bytes > 0 {
                masm.ret_imm(pop_bytes)
            } else {
                masm.ret()
            }
        }
        CallConvention::Stub => {
            masm.mov_rr(word, sp, fp)?;
            masm.pop_r(fp)?;
            masm.ret()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Ia32, X64};
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn decode(bitness: u32, code: &[u8]) -> Vec<iced_x86::Instruction> {
        let mut decoder = Decoder::with_ip(bitness, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode());
        }
        out
    }

    #[test]
    fn test_managed_prologue_and_return_pops_parameters() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut frame = Frame::new(CallConvention::Managed, 3, 2);
        emit_prologue(&mut masm, &isa, &mut frame, AsmReg::gp(6)).unwrap();
        emit_epilogue(&mut masm, &isa, &frame).unwrap();

        let code = masm.finalize().unwrap();
        let instrs = decode(64, code.bytes());
        let mnemonics: Vec<_> = instrs.iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            mnemonics,
            vec![
                Mnemonic::Push, // fp
                Mnemonic::Mov,  // fp <- sp
                Mnemonic::Push, // context
                Mnemonic::Push, // marker
                Mnemonic::Sub,  // spill reservation
                Mnemonic::Mov,  // sp <- fp
                Mnemonic::Pop,  // fp
                Mnemonic::Ret,
            ]
        );
        // Two spill slots of 8 bytes.
        let sub = &instrs[4];
        assert_eq!(sub.immediate(1), 16);
        // Three parameters popped on return.
        let ret = instrs.last().unwrap();
        assert_eq!(ret.immediate(0), 24);
    }

    #[test]
    fn test_raw_address_saves_and_restores_in_reverse() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut frame =
            Frame::new(CallConvention::RawAddress, 0, 0).with_callee_saved(isa.callee_saved());
        emit_prologue(&mut masm, &isa, &mut frame, AsmReg::gp(6)).unwrap();
        emit_epilogue(&mut masm, &isa, &frame).unwrap();

        let code = masm.finalize().unwrap();
        let instrs = decode(64, code.bytes());
        let pushes: Vec<_> = instrs
            .iter()
            .filter(|i| i.mnemonic() == Mnemonic::Push)
            .map(|i| i.op0_register())
            .collect();
        let pops: Vec<_> = instrs
            .iter()
            .filter(|i| i.mnemonic() == Mnemonic::Pop)
            .map(|i| i.op0_register())
            .collect();
        // fp plus five callee-saved registers, restored mirror-wise.
        assert_eq!(pushes.len(), 6);
        assert_eq!(pops.len(), 6);
        let mut mirrored = pushes.clone();
        mirrored.reverse();
        assert_eq!(pops, mirrored);
        assert_eq!(frame.fixed_slot_count(), 5);
    }

    #[test]
    fn test_osr_entry_skips_frame_construction() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut frame = Frame::new(CallConvention::Managed, 0, 5).with_osr_entry(3);
        emit_prologue(&mut masm, &isa, &mut frame, AsmReg::gp(6)).unwrap();

        let code = masm.finalize().unwrap();
        let instrs = decode(64, code.bytes());
        // Only the incremental reservation, no push/mov.
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].mnemonic(), Mnemonic::Sub);
        assert_eq!(instrs[0].immediate(1), 16);
        assert!(frame.is_finalized());
    }

    #[test]
    fn test_stub_frame_never_pops_parameters() {
        let isa = Ia32;
        let mut masm = MacroAssembler::new(32).unwrap();
        let mut frame = Frame::new(CallConvention::Stub, 4, 0);
        emit_prologue(&mut masm, &isa, &mut frame, AsmReg::gp(2)).unwrap();
        emit_epilogue(&mut masm, &isa, &frame).unwrap();

        let code = masm.finalize().unwrap();
        let instrs = decode(32, code.bytes());
        let ret = instrs.last().unwrap();
        assert_eq!(ret.mnemonic(), Mnemonic::Ret);
        assert_eq!(ret.op_count(), 0);
    }

    #[test]
    #[should_panic(expected = "OSR entry requires a managed frame")]
    fn test_osr_on_stub_frame_panics() {
        let isa = X64;
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut frame = Frame::new(CallConvention::Stub, 0, 0).with_osr_entry(0);
        let _ = emit_prologue(&mut masm, &isa, &mut frame, AsmReg::gp(6));
    }
}
