// This module turns abstract flag conditions into branch and boolean
// sequences. IEEE-754 comparisons leave the parity flag set when an operand
// was NaN, which makes the primary condition meaningless; the unordered
// conditions therefore emit a parity pre-check that routes NaN to the correct
// outcome before testing the primary condition. Boolean materialization uses
// setcc plus a zero-extension when the destination has a byte view, and an
// equally flag-preserving mov/jcc/mov sequence when it does not (mov does not
// touch flags). Switch dispatch covers both lowering shapes: an indexed jump
// through an in-code table and a compare/jump chain.

//! Branches, boolean materialization and switch dispatch.

use iced_x86::code_asm::CodeLabel;

use crate::core::error::CodegenResult;
use crate::core::instruction::FlagsCondition;
use crate::isa::AsmReg;
use crate::masm::{CondCode, MacroAssembler, Mem, OpSize};

/// Primary condition code for a flags condition. For the unordered variants
/// this is the condition tested after the parity pre-check.
pub fn cond_code(condition: FlagsCondition) -> CondCode {
    use FlagsCondition::*;
    match condition {
        Equal | UnorderedEqual => CondCode::E,
        NotEqual | UnorderedNotEqual => CondCode::Ne,
        SignedLessThan => CondCode::L,
        SignedGreaterThanOrEqual => CondCode::Ge,
        SignedLessThanOrEqual => CondCode::Le,
        SignedGreaterThan => CondCode::G,
        UnsignedLessThan => CondCode::B,
        UnsignedGreaterThanOrEqual => CondCode::Ae,
        UnsignedLessThanOrEqual => CondCode::Be,
        UnsignedGreaterThan => CondCode::A,
        Overflow => CondCode::O,
        NotOverflow => CondCode::No,
    }
}

/// Emit a two-way branch on the current flags.
///
/// Jumps to `tlabel` when the condition holds, otherwise to `flabel`. When the
/// false block is the fallthrough successor the final unconditional jump is
/// elided. A NaN operand routes UnorderedEqual to the false target and
/// UnorderedNotEqual to the true target via the parity flag.
pub fn assemble_branch(
    masm: &mut MacroAssembler,
    condition: FlagsCondition,
    tlabel: CodeLabel,
    flabel: CodeLabel,
    false_is_fallthrough: bool,
) -> CodegenResult<()> {
    match condition {
        FlagsCondition::UnorderedEqual => masm.jcc(CondCode::P, flabel)?,
        FlagsCondition::UnorderedNotEqual => masm.jcc(CondCode::P, tlabel)?,
        _ => {}
    }
    masm.jcc(cond_code(condition), tlabel)?;
    if !false_is_fallthrough {
        masm.jmp(flabel)?;
    }
    Ok(())
}

/// Materialize the current flags as 0 or 1 in `dst`.
///
/// The fast path is setcc into the low byte followed by a zero extension; when
/// the destination has no byte view the fallback loads 1, conditionally skips,
/// and loads 0, which preserves the flags just as well since mov does not
/// write them.
pub fn materialize_bool(
    masm: &mut MacroAssembler,
    condition: FlagsCondition,
    dst: AsmReg,
    byte_addressable: bool,
) -> CodegenResult<()> {
    let mut done = masm.create_label();

    if condition.is_unordered() {
        // NaN outcome: false for equality, true for inequality.
        let nan_value = match condition {
            FlagsCondition::UnorderedEqual => 0,
            FlagsCondition::UnorderedNotEqual => 1,
            _ => unreachable!(),
        };
        let mut ordered = masm.create_label();
        masm.jcc(CondCode::Np, ordered)?;
        masm.mov_ri(OpSize::S32, dst, nan_value)?;
        masm.jmp(done)?;
        masm.bind(&mut ordered)?;
    }

    let cc = cond_code(condition);
    if byte_addressable {
        masm.setcc(cc, dst)?;
        masm.movzx_b_rr(dst, dst)?;
    } else {
        masm.mov_ri(OpSize::S32, dst, 1)?;
        masm.jcc(cc, done)?;
        masm.mov_ri(OpSize::S32, dst, 0)?;
    }

    masm.bind(&mut done)?;
    Ok(())
}

/// Emit the dispatch half of a dense switch: bounds check against the case
/// count, then an indexed jump through the table bound at `table_label`.
/// Case values are normalized to start at zero upstream, so no base
/// subtraction is emitted here.
pub fn emit_table_dispatch(
    masm: &mut MacroAssembler,
    index: AsmReg,
    scratch: AsmReg,
    case_count: u32,
    default_label: CodeLabel,
    table_label: CodeLabel,
) -> CodegenResult<()> {
    // Zero-extend the 32-bit index before using it in an address.
    masm.mov_rr(OpSize::S32, index, index)?;
    masm.cmp_ri(OpSize::S32, index, case_count as i32)?;
    masm.jcc(CondCode::Ae, default_label)?;
    masm.lea_label(scratch, table_label)?;
    let ptr = if masm.bitness() == 64 { 8 } else { 4 };
    masm.jmp_m(&Mem::base_index(scratch, index, ptr, 0))?;
    Ok(())
}

/// Emit a sparse switch as a compare/jump chain over (value, target) pairs,
/// ending with a jump to the default block.
pub fn emit_lookup_chain(
    masm: &mut MacroAssembler,
    index: AsmReg,
    cases: &[(i32, CodeLabel)],
    default_label: CodeLabel,
) -> CodegenResult<()> {
    for &(value, target) in cases {
        masm.cmp_ri(OpSize::S32, index, value)?;
        masm.jcc(CondCode::E, target)?;
    }
    masm.jmp(default_label)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn decode(bitness: u32, code: &[u8]) -> Vec<Mnemonic> {
        let mut decoder = Decoder::with_ip(bitness, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode().mnemonic());
        }
        out
    }

    #[test]
    fn test_ordered_branch_with_fallthrough_elision() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut t = masm.create_label();
        let mut f = masm.create_label();
        assemble_branch(&mut masm, FlagsCondition::Equal, t, f, true).unwrap();
        masm.bind(&mut f).unwrap();
        masm.nop().unwrap();
        masm.bind(&mut t).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        // Only the je, no trailing jmp.
        assert_eq!(
            decode(64, code.bytes()),
            vec![Mnemonic::Je, Mnemonic::Nop, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_unordered_not_equal_routes_nan_to_true() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut t = masm.create_label();
        let mut f = masm.create_label();
        assemble_branch(&mut masm, FlagsCondition::UnorderedNotEqual, t, f, false).unwrap();
        masm.bind(&mut t).unwrap();
        masm.nop().unwrap();
        masm.bind(&mut f).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        // jp true, jne true, jmp false.
        assert_eq!(
            decode(64, code.bytes()),
            vec![
                Mnemonic::Jp,
                Mnemonic::Jne,
                Mnemonic::Jmp,
                Mnemonic::Nop,
                Mnemonic::Ret
            ]
        );
    }

    #[test]
    fn test_unordered_equal_routes_nan_to_false() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut t = masm.create_label();
        let mut f = masm.create_label();
        assemble_branch(&mut masm, FlagsCondition::UnorderedEqual, t, f, true).unwrap();
        masm.bind(&mut f).unwrap();
        masm.nop().unwrap();
        masm.bind(&mut t).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        assert_eq!(
            decode(64, code.bytes()),
            vec![Mnemonic::Jp, Mnemonic::Je, Mnemonic::Nop, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_bool_fast_path_uses_setcc() {
        let mut masm = MacroAssembler::new(64).unwrap();
        materialize_bool(&mut masm, FlagsCondition::SignedLessThan, AsmReg::gp(0), true).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        assert_eq!(
            decode(64, code.bytes()),
            vec![Mnemonic::Setl, Mnemonic::Movzx, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_bool_fallback_preserves_flags() {
        let mut masm = MacroAssembler::new(32).unwrap();
        // edi has no byte view in 32-bit mode.
        materialize_bool(&mut masm, FlagsCondition::Equal, AsmReg::gp(7), false).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        assert_eq!(
            decode(32, code.bytes()),
            vec![Mnemonic::Mov, Mnemonic::Je, Mnemonic::Mov, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_table_dispatch_shape() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut default_label = masm.create_label();
        let mut table_label = masm.create_label();
        emit_table_dispatch(
            &mut masm,
            AsmReg::gp(0),
            AsmReg::gp(10),
            4,
            default_label,
            table_label,
        )
        .unwrap();
        masm.bind(&mut default_label).unwrap();
        masm.ret().unwrap();
        masm.bind(&mut table_label).unwrap();
        for _ in 0..4 {
            masm.data_ptr_zero().unwrap();
        }

        let code = masm.finalize().unwrap();
        let table_off = code.label_offset(table_label).unwrap() as usize;
        // Four pointer-sized entries after the code.
        assert_eq!(code.bytes().len() - table_off, 4 * 8);
        let mnemonics = decode(64, &code.bytes()[..table_off]);
        assert_eq!(
            mnemonics,
            vec![
                Mnemonic::Mov,
                Mnemonic::Cmp,
                Mnemonic::Jae,
                Mnemonic::Lea,
                Mnemonic::Jmp,
                Mnemonic::Ret
            ]
        );
    }

    #[test]
    fn test_lookup_chain_shape() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut a = masm.create_label();
        let mut default_label = masm.create_label();
        emit_lookup_chain(
            &mut masm,
            AsmReg::gp(1),
            &[(10, a), (700, a)],
            default_label,
        )
        .unwrap();
        masm.bind(&mut a).unwrap();
        masm.nop().unwrap();
        masm.bind(&mut default_label).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        assert_eq!(
            decode(64, code.bytes()),
            vec![
                Mnemonic::Cmp,
                Mnemonic::Je,
                Mnemonic::Cmp,
                Mnemonic::Je,
                Mnemonic::Jmp,
                Mnemonic::Nop,
                Mnemonic::Ret
            ]
        );
    }
}
