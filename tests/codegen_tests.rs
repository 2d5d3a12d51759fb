//! End-to-end code generation tests.
//!
//! Each test builds a small allocated instruction stream, runs the generator
//! and decodes the produced bytes with iced-x86 to assert the emitted
//! instruction shapes and the artifact tables.

use bumpalo::Bump;
use iced_x86::{Decoder, DecoderOptions, Mnemonic};
use machinist::core::instruction::{
    AddressingMode, FlagsCondition, FlagsMode, InstructionCode, GAP_START,
};
use machinist::{
    AsmReg, CallConvention, CodeArtifact, CodeGenerator, Constant, DeoptKind, Frame, Ia32,
    Instruction, InstructionOperand, MoveOp, Opcode, ParallelMove, RelocKind, SlotWidth, TargetIsa,
    X64,
};

fn reg(id: u8) -> InstructionOperand {
    InstructionOperand::Reg(AsmReg::gp(id))
}

fn fpreg(id: u8) -> InstructionOperand {
    InstructionOperand::Reg(AsmReg::fp(id))
}

fn imm(value: i32) -> InstructionOperand {
    InstructionOperand::Imm(Constant::Int32(value))
}

fn label(block: u32) -> InstructionOperand {
    InstructionOperand::Imm(Constant::Label(block))
}

fn bind(block: u32) -> Instruction {
    Instruction::new(Opcode::BindBlock, vec![], vec![label(block)])
}

fn generate_x64(frame: Frame, instructions: &[Instruction]) -> CodeArtifact {
    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Bump::new();
    let generator = CodeGenerator::new(&X64, &arena, frame, AsmReg::gp(6)).unwrap();
    generator.generate(instructions).unwrap()
}

fn decode(bitness: u32, code: &[u8]) -> Vec<iced_x86::Instruction> {
    let mut decoder = Decoder::with_ip(bitness, code, 0, DecoderOptions::NONE);
    let mut out = Vec::new();
    while decoder.can_decode() {
        out.push(decoder.decode());
    }
    out
}

fn count(instrs: &[iced_x86::Instruction], mnemonic: Mnemonic) -> usize {
    instrs.iter().filter(|i| i.mnemonic() == mnemonic).count()
}

#[test]
fn test_checked_load_add_function() {
    // Roughly `return a[i] + 1` with a dynamic bounds check.
    let frame = Frame::new(CallConvention::Managed, 2, 0);
    let instructions = vec![
        Instruction::new(
            Opcode::CheckedLoadInt32,
            vec![reg(0)],
            vec![reg(3), reg(1), imm(10)],
        ),
        Instruction::new(Opcode::Add32, vec![reg(0)], vec![reg(0), imm(1)]),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    // One bounds check, one miss branch, and the out-of-line zero sentinel
    // jumping back.
    assert_eq!(count(&instrs, Mnemonic::Cmp), 1);
    assert_eq!(count(&instrs, Mnemonic::Jae), 1);
    assert_eq!(count(&instrs, Mnemonic::Xor), 1);
    assert_eq!(count(&instrs, Mnemonic::Add), 1);
    // Managed epilogue pops both parameters.
    let ret = instrs
        .iter()
        .find(|i| i.mnemonic() == Mnemonic::Ret)
        .unwrap();
    assert_eq!(ret.immediate(0), 16);
}

#[test]
fn test_bounds_check_elided_by_index_range() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let checked = Instruction::new(
        Opcode::CheckedLoadInt32,
        vec![reg(0)],
        vec![reg(3), reg(1), imm(10)],
    )
    .with_index_range(0, 10);
    let instructions = vec![checked, Instruction::new(Opcode::Ret, vec![], vec![])];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    // Range [0, 10) fits the constant length; no compare, no miss branch,
    // no out-of-line stanza.
    assert_eq!(count(&instrs, Mnemonic::Cmp), 0);
    assert_eq!(count(&instrs, Mnemonic::Jae), 0);
    assert_eq!(count(&instrs, Mnemonic::Xor), 0);
}

#[test]
fn test_checked_store_skips_on_miss_in_line() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(
            Opcode::CheckedStoreInt32,
            vec![],
            vec![reg(3), reg(1), reg(2), reg(0)],
        ),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    // The miss branch stays in line; nothing is emitted after the return
    // except nothing at all (no OOL stanza, so no trailing jmp).
    assert_eq!(count(&instrs, Mnemonic::Jae), 1);
    assert_eq!(count(&instrs, Mnemonic::Jmp), 0);
    assert_eq!(instrs.last().unwrap().mnemonic(), Mnemonic::Ret);
}

#[test]
fn test_compare_branch_with_fallthrough() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let code = InstructionCode::encode(
        Opcode::Cmp32,
        AddressingMode::None,
        FlagsMode::Branch,
        FlagsCondition::SignedLessThan,
    );
    let instructions = vec![
        Instruction::new(code, vec![], vec![reg(0), reg(1), label(1), label(2)]),
        bind(2),
        Instruction::new(Opcode::Ret, vec![], vec![]),
        bind(1),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    // False target is the fallthrough block: a single jl and no jmp.
    assert_eq!(count(&instrs, Mnemonic::Jl), 1);
    assert_eq!(count(&instrs, Mnemonic::Jmp), 0);
    // Both block offsets recorded.
    assert!(artifact.block_offsets.contains_key(&1));
    assert!(artifact.block_offsets.contains_key(&2));
}

#[test]
fn test_table_switch_artifact() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(
            Opcode::TableSwitch,
            vec![],
            vec![reg(0), label(9), label(1), label(2), label(3)],
        ),
        bind(1),
        Instruction::new(Opcode::Jump, vec![], vec![label(9)]),
        bind(2),
        Instruction::new(Opcode::Jump, vec![], vec![label(9)]),
        bind(3),
        bind(9),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);

    assert_eq!(artifact.jump_tables.len(), 1);
    let table = &artifact.jump_tables[0];
    assert_eq!(table.entry_size, 8);
    assert_eq!(table.targets.len(), 3);
    for (case, &target) in [1u32, 2, 3].iter().zip(table.targets.iter()) {
        assert_eq!(target, artifact.block_offsets[case]);
    }
    // The table data sits at the end of the buffer, one pointer per case.
    assert_eq!(
        table.offset as usize + 3 * 8,
        artifact.code.len(),
        "table data must be the trailing section"
    );
    // Dispatch shape in the code section.
    let instrs = decode(64, &artifact.code[..table.offset as usize]);
    assert_eq!(count(&instrs, Mnemonic::Jae), 1);
    assert!(instrs.iter().any(|i| i.mnemonic() == Mnemonic::Lea));
}

#[test]
fn test_lookup_switch_chain() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(
            Opcode::LookupSwitch,
            vec![],
            vec![reg(0), label(9), imm(10), label(1), imm(7000), label(2)],
        ),
        bind(1),
        bind(2),
        bind(9),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    assert_eq!(count(&instrs, Mnemonic::Cmp), 2);
    assert_eq!(count(&instrs, Mnemonic::Je), 2);
    assert_eq!(count(&instrs, Mnemonic::Jmp), 1);
    assert!(artifact.jump_tables.is_empty());
}

#[test]
fn test_deopt_sites_keep_patch_distance() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let deopt = |id: u16, entry: u64| {
        Instruction::new(
            InstructionCode::from(Opcode::DeoptCall).with_misc(id),
            vec![],
            vec![InstructionOperand::Imm(Constant::External(entry))],
        )
    };
    let instructions = vec![
        deopt(0, 0x1000),
        deopt(1, 0x2000),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);

    assert_eq!(artifact.deopt_sites.len(), 2);
    assert_eq!(artifact.deopt_sites[0].id, 0);
    assert_eq!(artifact.deopt_sites[1].id, 1);
    let distance = artifact.deopt_sites[1].offset - artifact.deopt_sites[0].offset;
    assert!(
        distance >= X64.deopt_patch_size(),
        "sites {distance} bytes apart, need {}",
        X64.deopt_patch_size()
    );
}

#[test]
fn test_lazy_sites_keep_patch_distance() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let stub = |id: u16| {
        Instruction::new(
            InstructionCode::from(Opcode::CallStub).with_misc(id),
            vec![],
            vec![reg(0)],
        )
    };
    let instructions = vec![
        stub(0),
        stub(1),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);

    // Back-to-back stub calls: the second return address must still sit a
    // full patch width past the first, NOP-padded if need be.
    assert_eq!(artifact.deopt_sites.len(), 2);
    assert!(artifact
        .deopt_sites
        .iter()
        .all(|site| site.kind == DeoptKind::Lazy));
    let distance = artifact.deopt_sites[1].offset - artifact.deopt_sites[0].offset;
    assert!(
        distance >= X64.deopt_patch_size(),
        "lazy sites {distance} bytes apart, need {}",
        X64.deopt_patch_size()
    );
}

#[test]
fn test_soft_deopt_kind_from_selector_input() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(
            InstructionCode::from(Opcode::DeoptCall).with_misc(3),
            vec![],
            vec![InstructionOperand::Imm(Constant::External(0x1000)), imm(1)],
        ),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);

    assert_eq!(artifact.deopt_sites.len(), 1);
    assert_eq!(artifact.deopt_sites[0].kind, DeoptKind::Soft);
    assert_eq!(artifact.deopt_sites[0].id, 3);
}

#[test]
fn test_call_external_records_relocation() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(
            Opcode::Call,
            vec![],
            vec![InstructionOperand::Imm(Constant::External(0x1234_5678))],
        ),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);

    assert_eq!(artifact.relocations.len(), 1);
    let reloc = &artifact.relocations[0];
    assert_eq!(reloc.kind, RelocKind::External(0x1234_5678));
    // The relocation points at the mov loading the address.
    let instrs = decode(64, &artifact.code[reloc.offset as usize..]);
    assert_eq!(instrs[0].mnemonic(), Mnemonic::Mov);
    assert_eq!(instrs[0].immediate(1), 0x1234_5678);
    assert_eq!(instrs[1].mnemonic(), Mnemonic::Call);
}

#[test]
fn test_gap_moves_realized_around_instruction() {
    let frame = Frame::new(CallConvention::Stub, 0, 2);
    let swap = ParallelMove::new(vec![
        MoveOp {
            src: reg(0),
            dst: reg(1),
        },
        MoveOp {
            src: reg(1),
            dst: reg(0),
        },
    ]);
    let instructions = vec![
        Instruction::new(Opcode::Nop, vec![], vec![]).with_gap_move(GAP_START, swap),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    assert_eq!(count(&instrs, Mnemonic::Xchg), 1);
}

#[test]
fn test_float_truncation_has_out_of_line_fallback() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(
            Opcode::Float64ToInt32,
            vec![reg(0)],
            vec![fpreg(2), InstructionOperand::Imm(Constant::External(0x9000))],
        ),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    assert_eq!(count(&instrs, Mnemonic::Cvttsd2si), 1);
    assert_eq!(count(&instrs, Mnemonic::Jo), 1);
    // The fallback passes the value on the stack and calls the helper.
    assert_eq!(count(&instrs, Mnemonic::Call), 1);
    assert!(artifact
        .relocations
        .iter()
        .any(|r| r.kind == RelocKind::External(0x9000)));
}

#[test]
fn test_float_compare_unordered_branch() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let code = InstructionCode::encode(
        Opcode::Float64Cmp,
        AddressingMode::None,
        FlagsMode::Branch,
        FlagsCondition::UnorderedEqual,
    );
    let instructions = vec![
        Instruction::new(code, vec![], vec![fpreg(0), fpreg(1), label(1), label(2)]),
        bind(2),
        Instruction::new(Opcode::Ret, vec![], vec![]),
        bind(1),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    // NaN routes to the false target via the parity pre-check.
    assert_eq!(count(&instrs, Mnemonic::Ucomisd), 1);
    assert_eq!(count(&instrs, Mnemonic::Jp), 1);
    assert_eq!(count(&instrs, Mnemonic::Je), 1);
}

#[test]
fn test_vector_ops_are_table_driven() {
    let frame = Frame::new(CallConvention::Stub, 0, 0);
    let instructions = vec![
        Instruction::new(Opcode::F32x4Add, vec![fpreg(0)], vec![fpreg(0), fpreg(1)]),
        Instruction::new(Opcode::I32x4Sub, vec![fpreg(2)], vec![fpreg(2), fpreg(3)]),
        Instruction::new(Opcode::S128Xor, vec![fpreg(4)], vec![fpreg(4), fpreg(5)]),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    assert_eq!(count(&instrs, Mnemonic::Addps), 1);
    assert_eq!(count(&instrs, Mnemonic::Psubd), 1);
    assert_eq!(count(&instrs, Mnemonic::Pxor), 1);
}

#[test]
fn test_ia32_generation_end_to_end() {
    let arena = Bump::new();
    let frame = Frame::new(CallConvention::Managed, 3, 1);
    let generator = CodeGenerator::new(&Ia32, &arena, frame, AsmReg::gp(2)).unwrap();
    let instructions = vec![
        Instruction::new(Opcode::Add32, vec![reg(0)], vec![reg(0), imm(5)]),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generator.generate(&instructions).unwrap();
    let instrs = decode(32, &artifact.code);

    // 32-bit managed frame: three 4-byte parameters popped on return.
    let ret = instrs
        .iter()
        .find(|i| i.mnemonic() == Mnemonic::Ret)
        .unwrap();
    assert_eq!(ret.immediate(0), 12);
}

#[test]
fn test_spill_slot_operand_reads_frame_memory() {
    let frame = Frame::new(CallConvention::Managed, 0, 2);
    let slot = InstructionOperand::Slot {
        index: 0,
        width: SlotWidth::Word,
    };
    let instructions = vec![
        Instruction::new(Opcode::Add64, vec![reg(0)], vec![reg(0), slot]),
        Instruction::new(Opcode::Ret, vec![], vec![]),
    ];
    let artifact = generate_x64(frame, &instructions);
    let instrs = decode(64, &artifact.code);

    // add rax, [rbp - 24]: first spill slot below the two standard fields.
    let add = instrs
        .iter()
        .find(|i| i.mnemonic() == Mnemonic::Add)
        .unwrap();
    assert_eq!(add.memory_base(), iced_x86::Register::RBP);
    assert_eq!(add.memory_displacement64() as i64, -24);
}
