// This module drives code generation for one function. CodeGenerator walks the
// allocated instruction stream in order: it emits the prologue, realizes the
// gap moves around every instruction, dispatches exhaustively on the opcode,
// then emits the collected out-of-line stanzas and jump tables after the last
// block. Binary operations pick the cheapest right-hand form the operands
// allow (register, immediate or stack slot read straight from memory).
// Checked accesses compare the index against the length and route the miss to
// an out-of-line sentinel; when the statically known index range already fits
// a constant length the check is not emitted at all. Finalization assembles
// the buffer at base zero and resolves every recorded label into the artifact:
// relocations, jump tables with their target offsets, deopt sites and block
// start offsets.

//! Code generation driver and output artifact.

pub mod control_flow;
pub mod deopt;
pub mod moves;
pub mod ool;
pub mod operands;
pub mod prologue;

use bumpalo::Bump;
use hashbrown::HashMap;
use iced_x86::code_asm::CodeLabel;
use log::{debug, trace};

use crate::core::error::CodegenResult;
use crate::core::frame::Frame;
use crate::core::instruction::{
    Constant, FlagsMode, Instruction, InstructionOperand, Opcode, GAP_END, GAP_START,
};
use crate::isa::{AsmReg, ScratchPair, TargetIsa};
use crate::masm::{CondCode, MacroAssembler, Mem, OpSize};
use deopt::{DeoptKind, DeoptSupport};
use moves::{GapResolver, RelocSink};
use ool::{OolBody, OolEntry, OolList};
use operands::OperandResolver;

/// What a relocation site refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// Absolute address outside the managed heap.
    External(u64),
    /// Managed heap reference by handle id.
    HeapObject(u32),
}

/// A resolved relocation: code offset of the instruction holding the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u32,
    pub kind: RelocKind,
}

/// A resolved jump table: offset of the table data and the code offsets its
/// entries must point at once the loader writes absolute addresses.
#[derive(Debug, Clone)]
pub struct JumpTable {
    pub offset: u32,
    pub entry_size: u32,
    pub targets: Vec<u32>,
}

/// A resolved deoptimization site.
#[derive(Debug, Clone, Copy)]
pub struct DeoptSite {
    pub id: u32,
    pub kind: DeoptKind,
    pub offset: u32,
    pub entry: u64,
}

/// Finished output of one generation run.
pub struct CodeArtifact {
    pub code: Vec<u8>,
    pub relocations: Vec<Relocation>,
    pub jump_tables: Vec<JumpTable>,
    pub deopt_sites: Vec<DeoptSite>,
    pub block_offsets: HashMap<u32, u32>,
}

struct PendingRelocation {
    label: CodeLabel,
    kind: RelocKind,
}

struct PendingJumpTable {
    table_label: CodeLabel,
    targets: Vec<u32>,
}

struct RelocRecorder<'r> {
    relocations: &'r mut Vec<PendingRelocation>,
}

impl RelocSink for RelocRecorder<'_> {
    fn record_external(&mut self, label: CodeLabel, address: u64) {
        self.relocations.push(PendingRelocation {
            label,
            kind: RelocKind::External(address),
        });
    }

    fn record_heap_object(&mut self, label: CodeLabel, handle: u32) {
        self.relocations.push(PendingRelocation {
            label,
            kind: RelocKind::HeapObject(handle),
        });
    }
}

/// Generates machine code for one function from its allocated instruction
/// stream.
pub struct CodeGenerator<'a> {
    isa: &'a dyn TargetIsa,
    masm: MacroAssembler,
    frame: Frame,
    scratch: ScratchPair,
    resolver: GapResolver,
    ool: OolList<'a>,
    deopt: DeoptSupport,
    block_labels: HashMap<u32, CodeLabel>,
    relocations: Vec<PendingRelocation>,
    jump_tables: Vec<PendingJumpTable>,
    incoming_context: AsmReg,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        isa: &'a dyn TargetIsa,
        arena: &'a Bump,
        frame: Frame,
        incoming_context: AsmReg,
    ) -> CodegenResult<Self> {
        let masm = MacroAssembler::new(isa.bitness())?;
        Ok(Self {
            isa,
            masm,
            frame,
            scratch: ScratchPair::new(isa),
            resolver: GapResolver::new(isa.frame_pointer(), isa.stack_pointer(), isa.slot_size()),
            ool: OolList::new(arena),
            deopt: DeoptSupport::new(isa.deopt_patch_size()),
            block_labels: HashMap::new(),
            relocations: Vec::new(),
            jump_tables: Vec::new(),
            incoming_context,
        })
    }

    /// Generate code for the whole instruction stream and finalize.
    pub fn generate(mut self, instructions: &[Instruction]) -> CodegenResult<CodeArtifact> {
        debug!(
            "generating {} instructions for {} ({} spill slots)",
            instructions.len(),
            self.isa.name(),
            self.frame.spill_slot_count()
        );

        prologue::emit_prologue(
            &mut self.masm,
            self.isa,
            &mut self.frame,
            self.incoming_context,
        )?;

        for (index, instr) in instructions.iter().enumerate() {
            let next_block = instructions.get(index + 1).and_then(|next| {
                if next.opcode() == Opcode::BindBlock {
                    match next.input_at(0) {
                        InstructionOperand::Imm(Constant::Label(block)) => Some(*block),
                        _ => None,
                    }
                } else {
                    None
                }
            });
            self.resolve_gap(instr, GAP_START)?;
            self.assemble_instruction(instr, next_block)?;
            self.resolve_gap(instr, GAP_END)?;
        }

        self.emit_out_of_line()?;
        self.emit_jump_tables()?;
        self.finalize()
    }

    fn resolve_gap(&mut self, instr: &Instruction, position: usize) -> CodegenResult<()> {
        if let Some(parallel_move) = instr.gap_move(position) {
            let mut sink = RelocRecorder {
                relocations: &mut self.relocations,
            };
            self.resolver.resolve(
                &mut self.masm,
                &mut self.scratch,
                &self.frame,
                parallel_move,
                &mut sink,
            )?;
        }
        Ok(())
    }

    fn block_label(&mut self, block: u32) -> CodeLabel {
        *self
            .block_labels
            .entry(block)
            .or_insert_with(|| self.masm.create_label())
    }

    /// Branch or boolean reaction of a flags-producing instruction.
    fn flags_reaction(
        &mut self,
        ops: &OperandResolver,
        next_block: Option<u32>,
    ) -> CodegenResult<()> {
        let code = ops.instr().code();
        match code.flags_mode() {
            FlagsMode::None => Ok(()),
            FlagsMode::Branch => {
                let inputs = ops.instr().input_count();
                let tblock = ops.input_label(inputs - 2);
                let fblock = ops.input_label(inputs - 1);
                let tlabel = self.block_label(tblock);
                let flabel = self.block_label(fblock);
                control_flow::assemble_branch(
                    &mut self.masm,
                    code.flags_condition(),
                    tlabel,
                    flabel,
                    next_block == Some(fblock),
                )
            }
            FlagsMode::Set => {
                let dst = ops.output_gp(0);
                control_flow::materialize_bool(
                    &mut self.masm,
                    code.flags_condition(),
                    dst,
                    self.isa.is_byte_addressable(dst),
                )
            }
        }
    }

    fn assemble_instruction(
        &mut self,
        instr: &Instruction,
        next_block: Option<u32>,
    ) -> CodegenResult<()> {
        trace!("assemble {:?}", instr.opcode());
        let frame = self.frame.clone();
        let ops =
            OperandResolver::new(instr, &frame, self.isa.frame_pointer(), self.isa.slot_size());

        macro_rules! binop_gp {
            ($size:expr, $rr:ident, $ri:ident, $rm:ident) => {{
                let dst = ops.output_gp(0);
                assert_eq!(dst, ops.input_gp(0), "two-address form requires dst == lhs");
                if ops.input_is_imm(1) {
                    self.masm.$ri($size, dst, ops.input_i32(1))?;
                } else if ops.input_is_slot(1) {
                    self.masm.$rm($size, dst, &ops.input_slot_mem(1))?;
                } else {
                    self.masm.$rr($size, dst, ops.input_gp(1))?;
                }
                self.flags_reaction(&ops, next_block)?;
            }};
        }

        macro_rules! shift_gp {
            ($size:expr, $ri:ident, $cl:ident) => {{
                let dst = ops.output_gp(0);
                assert_eq!(dst, ops.input_gp(0), "two-address form requires dst == lhs");
                if ops.input_is_imm(1) {
                    self.masm.$ri($size, dst, ops.input_i32(1) as u32)?;
                } else {
                    let count = ops.input_gp(1);
                    assert_eq!(count.id, 1, "variable shift count must be in cl");
                    self.masm.$cl($size, dst)?;
                }
            }};
        }

        macro_rules! fp_binop {
            ($rr:ident, $rm:ident) => {{
                let dst = ops.output_fp(0);
                assert_eq!(dst, ops.input_fp(0), "two-address form requires dst == lhs");
                if ops.input_is_slot(1) {
                    self.masm.$rm(dst, &ops.input_slot_mem(1))?;
                } else {
                    self.masm.$rr(dst, ops.input_fp(1))?;
                }
            }};
        }

        let word64 = {
            let isa = self.isa;
            move || {
                assert!(isa.supports_word64(), "64-bit operation on a 32-bit target");
                OpSize::S64
            }
        };

        match instr.opcode() {
            Opcode::Add32 => binop_gp!(OpSize::S32, add_rr, add_ri, add_rm),
            Opcode::Add64 => binop_gp!(word64(), add_rr, add_ri, add_rm),
            Opcode::Sub32 => binop_gp!(OpSize::S32, sub_rr, sub_ri, sub_rm),
            Opcode::Sub64 => binop_gp!(word64(), sub_rr, sub_ri, sub_rm),
            Opcode::And32 => binop_gp!(OpSize::S32, and_rr, and_ri, and_rm),
            Opcode::And64 => binop_gp!(word64(), and_rr, and_ri, and_rm),
            Opcode::Or32 => binop_gp!(OpSize::S32, or_rr, or_ri, or_rm),
            Opcode::Or64 => binop_gp!(word64(), or_rr, or_ri, or_rm),
            Opcode::Xor32 => binop_gp!(OpSize::S32, xor_rr, xor_ri, xor_rm),
            Opcode::Xor64 => binop_gp!(word64(), xor_rr, xor_ri, xor_rm),
            Opcode::Mul32 | Opcode::Mul64 => {
                let size = if instr.opcode() == Opcode::Mul32 {
                    OpSize::S32
                } else {
                    word64()
                };
                let dst = ops.output_gp(0);
                assert_eq!(dst, ops.input_gp(0), "two-address form requires dst == lhs");
                self.masm.imul_rr(size, dst, ops.input_gp(1))?;
                self.flags_reaction(&ops, next_block)?;
            }
            Opcode::Shl32 => shift_gp!(OpSize::S32, shl_ri, shl_cl),
            Opcode::Shl64 => shift_gp!(word64(), shl_ri, shl_cl),
            Opcode::Shr32 => shift_gp!(OpSize::S32, shr_ri, shr_cl),
            Opcode::Shr64 => shift_gp!(word64(), shr_ri, shr_cl),
            Opcode::Sar32 => shift_gp!(OpSize::S32, sar_ri, sar_cl),
            Opcode::Sar64 => shift_gp!(word64(), sar_ri, sar_cl),
            Opcode::Not32 => {
                let dst = ops.output_gp(0);
                assert_eq!(dst, ops.input_gp(0), "unary form requires dst == src");
                self.masm.not_r(OpSize::S32, dst)?;
            }
            Opcode::Neg32 => {
                let dst = ops.output_gp(0);
                assert_eq!(dst, ops.input_gp(0), "unary form requires dst == src");
                self.masm.neg_r(OpSize::S32, dst)?;
            }
            Opcode::Cmp32 | Opcode::Cmp64 => {
                let size = if instr.opcode() == Opcode::Cmp32 {
                    OpSize::S32
                } else {
                    word64()
                };
                let left = ops.input_gp(0);
                if ops.input_is_imm(1) {
                    self.masm.cmp_ri(size, left, ops.input_i32(1))?;
                } else if ops.input_is_slot(1) {
                    self.masm.cmp_rm(size, left, &ops.input_slot_mem(1))?;
                } else {
                    self.masm.cmp_rr(size, left, ops.input_gp(1))?;
                }
                self.flags_reaction(&ops, next_block)?;
            }
            Opcode::Test32 | Opcode::Test64 => {
                let size = if instr.opcode() == Opcode::Test32 {
                    OpSize::S32
                } else {
                    word64()
                };
                let left = ops.input_gp(0);
                if ops.input_is_imm(1) {
                    self.masm.test_ri(size, left, ops.input_i32(1))?;
                } else {
                    self.masm.test_rr(size, left, ops.input_gp(1))?;
                }
                self.flags_reaction(&ops, next_block)?;
            }
            Opcode::Lea => self.assemble_lea(&ops)?,

            Opcode::Load8U => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.load8u(ops.output_gp(0), &mem)?;
            }
            Opcode::Load8S => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.load8s(ops.output_gp(0), &mem)?;
            }
            Opcode::Load16U => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.load16u(ops.output_gp(0), &mem)?;
            }
            Opcode::Load16S => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.load16s(ops.output_gp(0), &mem)?;
            }
            Opcode::Load32 => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.mov_rm(OpSize::S32, ops.output_gp(0), &mem)?;
            }
            Opcode::Load64 => {
                let size = word64();
                let (mem, _) = ops.memory_operand(0);
                self.masm.mov_rm(size, ops.output_gp(0), &mem)?;
            }
            Opcode::Store8 | Opcode::Store16 | Opcode::Store32 | Opcode::Store64 => {
                let size = match instr.opcode() {
                    Opcode::Store8 => OpSize::S8,
                    Opcode::Store16 => OpSize::S16,
                    Opcode::Store32 => OpSize::S32,
                    _ => word64(),
                };
                let (mem, value_index) = ops.memory_operand(0);
                if ops.input_is_imm(value_index) {
                    self.masm.mov_mi(size, &mem, ops.input_i32(value_index))?;
                } else {
                    self.masm.mov_mr(size, &mem, ops.input_gp(value_index))?;
                }
            }
            Opcode::LoadFloat64 => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.movsd_rm(ops.output_fp(0), &mem)?;
            }
            Opcode::StoreFloat64 => {
                let (mem, value_index) = ops.memory_operand(0);
                self.masm.movsd_mr(&mem, ops.input_fp(value_index))?;
            }
            Opcode::LoadVec128 => {
                let (mem, _) = ops.memory_operand(0);
                self.masm.movdqu_rm(ops.output_fp(0), &mem)?;
            }
            Opcode::StoreVec128 => {
                let (mem, value_index) = ops.memory_operand(0);
                self.masm.movdqu_mr(&mem, ops.input_fp(value_index))?;
            }

            Opcode::CheckedLoadInt32 => self.assemble_checked_load(&ops, 4)?,
            Opcode::CheckedLoadFloat64 => self.assemble_checked_load(&ops, 8)?,
            Opcode::CheckedStoreInt32 => self.assemble_checked_store(&ops, 4)?,
            Opcode::CheckedStoreFloat64 => self.assemble_checked_store(&ops, 8)?,

            Opcode::Float64Add => fp_binop!(addsd_rr, addsd_rm),
            Opcode::Float64Sub => fp_binop!(subsd_rr, subsd_rm),
            Opcode::Float64Mul => fp_binop!(mulsd_rr, mulsd_rm),
            Opcode::Float64Div => fp_binop!(divsd_rr, divsd_rm),
            Opcode::Float64Sqrt => {
                self.masm.sqrtsd_rr(ops.output_fp(0), ops.input_fp(0))?;
            }
            Opcode::Float64Cmp => {
                self.masm.ucomisd_rr(ops.input_fp(0), ops.input_fp(1))?;
                self.flags_reaction(&ops, next_block)?;
            }
            Opcode::Float64ToInt32 => self.assemble_truncate(&ops)?,
            Opcode::Int32ToFloat64 => {
                self.masm.cvtsi2sd_rr(ops.output_fp(0), ops.input_gp(0))?;
            }

            Opcode::F32x4Add
            | Opcode::F32x4Sub
            | Opcode::F32x4Mul
            | Opcode::F32x4Div
            | Opcode::F32x4Min
            | Opcode::F32x4Max
            | Opcode::I32x4Add
            | Opcode::I32x4Sub
            | Opcode::S128And
            | Opcode::S128Or
            | Opcode::S128Xor => {
                let dst = ops.output_fp(0);
                assert_eq!(dst, ops.input_fp(0), "two-address form requires dst == lhs");
                let code = vector_code(instr.opcode());
                self.masm.emit_vec_rr(code, dst, ops.input_fp(1))?;
            }

            Opcode::BindBlock => {
                let block = ops.input_label(0);
                let mut label = self.block_label(block);
                self.masm.bind(&mut label)?;
                self.block_labels.insert(block, label);
            }
            Opcode::Jump => {
                let target = ops.input_label(0);
                if next_block != Some(target) {
                    let label = self.block_label(target);
                    self.masm.jmp(label)?;
                }
            }
            Opcode::TableSwitch => self.assemble_table_switch(&ops)?,
            Opcode::LookupSwitch => self.assemble_lookup_switch(&ops)?,
            Opcode::Ret => {
                prologue::emit_epilogue(&mut self.masm, self.isa, &self.frame)?;
            }
            Opcode::Call | Opcode::CallStub => {
                self.assemble_call(&ops)?;
            }
            Opcode::DeoptCall => {
                let entry = match ops.input_constant(0) {
                    Constant::External(addr) => *addr,
                    other => panic!("DeoptCall target must be external, got {other:?}"),
                };
                // An optional second input marks the bailout as soft
                // (profile-triggered rather than a failed check).
                let kind = if instr.input_count() > 1 && ops.input_i32(1) != 0 {
                    DeoptKind::Soft
                } else {
                    DeoptKind::Eager
                };
                let id = u32::from(instr.code().misc());
                self.deopt
                    .emit_deopt_call(&mut self.masm, &mut self.scratch, kind, id, entry)?;
            }
            Opcode::Nop => {}
        }
        Ok(())
    }

    /// Address computation, folded to cheaper forms when the base register is
    /// also the destination.
    fn assemble_lea(&mut self, ops: &OperandResolver) -> CodegenResult<()> {
        let dst = ops.output_gp(0);
        let (mem, _) = ops.memory_operand(0);
        let size = self.masm.ptr_size();
        match (mem.base, mem.index) {
            (Some(base), None) if base == dst => {
                if mem.disp == 1 {
                    self.masm.inc_r(size, dst)
                } else {
                    self.masm.add_ri(size, dst, mem.disp)
                }
            }
            (Some(base), Some(index)) if base == dst && mem.scale == 1 && mem.disp == 0 => {
                self.masm.add_rr(size, dst, index)
            }
            _ => self.masm.lea(size, dst, &mem),
        }
    }

    /// Bounds-checked load: compare the index against the length and route
    /// the miss out of line to a sentinel producer. The check is elided when
    /// the statically known index range fits a constant length.
    fn assemble_checked_load(
        &mut self,
        ops: &OperandResolver,
        element_size: u32,
    ) -> CodegenResult<()> {
        let base = ops.input_gp(0);
        let index = ops.input_gp(1);
        let mem = Mem::base_index(base, index, element_size, 0);
        let float = element_size == 8;

        if self.check_elidable(ops) {
            trace!("bounds check elided by index range");
            return if float {
                self.masm.movsd_rm(ops.output_fp(0), &mem)
            } else {
                self.masm.mov_rm(OpSize::S32, ops.output_gp(0), &mem)
            };
        }

        if ops.input_is_imm(2) {
            self.masm.cmp_ri(OpSize::S32, index, ops.input_i32(2))?;
        } else {
            self.masm.cmp_rr(OpSize::S32, index, ops.input_gp(2))?;
        }
        let entry = self.masm.create_label();
        let mut exit = self.masm.create_label();
        self.masm.jcc(CondCode::Ae, entry)?;
        let body = if float {
            let dst = ops.output_fp(0);
            self.masm.movsd_rm(dst, &mem)?;
            OolBody::FloatNaNSentinel { dst }
        } else {
            let dst = ops.output_gp(0);
            self.masm.mov_rm(OpSize::S32, dst, &mem)?;
            OolBody::IntZeroSentinel { dst }
        };
        self.masm.bind(&mut exit)?;
        self.ool.push(OolEntry { entry, exit, body });
        Ok(())
    }

    /// Bounds-checked store: out-of-bounds stores are simply skipped, so the
    /// miss branches forward within the line instead of out of line.
    fn assemble_checked_store(
        &mut self,
        ops: &OperandResolver,
        element_size: u32,
    ) -> CodegenResult<()> {
        let base = ops.input_gp(0);
        let index = ops.input_gp(1);
        let mem = Mem::base_index(base, index, element_size, 0);
        let float = element_size == 8;

        if self.check_elidable(ops) {
            trace!("bounds check elided by index range");
            return self.emit_checked_store_value(ops, &mem, float);
        }

        if ops.input_is_imm(2) {
            self.masm.cmp_ri(OpSize::S32, index, ops.input_i32(2))?;
        } else {
            self.masm.cmp_rr(OpSize::S32, index, ops.input_gp(2))?;
        }
        let mut done = self.masm.create_label();
        self.masm.jcc(CondCode::Ae, done)?;
        self.emit_checked_store_value(ops, &mem, float)?;
        self.masm.bind(&mut done)?;
        Ok(())
    }

    fn emit_checked_store_value(
        &mut self,
        ops: &OperandResolver,
        mem: &Mem,
        float: bool,
    ) -> CodegenResult<()> {
        if float {
            self.masm.movsd_mr(mem, ops.input_fp(3))
        } else if ops.input_is_imm(3) {
            self.masm.mov_mi(OpSize::S32, mem, ops.input_i32(3))
        } else {
            self.masm.mov_mr(OpSize::S32, mem, ops.input_gp(3))
        }
    }

    /// The upstream type lattice proves the check redundant when the index
    /// range already sits inside a constant length.
    fn check_elidable(&self, ops: &OperandResolver) -> bool {
        let Some((lo, hi)) = ops.instr().index_range() else {
            return false;
        };
        if !ops.input_is_imm(2) {
            return false;
        }
        let length = i64::from(ops.input_i32(2));
        lo >= 0 && hi <= length
    }

    /// Float-to-int truncation. cvttsd2si produces the integer indefinite
    /// value on overflow and NaN; `cmp dst, 1` overflows exactly for that
    /// value, which routes the slow conversion out of line.
    fn assemble_truncate(&mut self, ops: &OperandResolver) -> CodegenResult<()> {
        let dst = ops.output_gp(0);
        let src = ops.input_fp(0);
        let helper = match ops.input_constant(1) {
            Constant::External(addr) => *addr,
            other => panic!("truncation helper must be external, got {other:?}"),
        };
        self.masm.cvttsd2si_rr(dst, src)?;
        self.masm.cmp_ri(OpSize::S32, dst, 1)?;
        let entry = self.masm.create_label();
        let mut exit = self.masm.create_label();
        self.masm.jcc(CondCode::O, entry)?;
        self.masm.bind(&mut exit)?;
        self.ool.push(OolEntry {
            entry,
            exit,
            body: OolBody::TruncateFallback { dst, src, helper },
        });
        Ok(())
    }

    fn assemble_table_switch(&mut self, ops: &OperandResolver) -> CodegenResult<()> {
        let index = ops.input_gp(0);
        let default_block = ops.input_label(1);
        let case_count = ops.instr().input_count() - 2;
        let targets: Vec<u32> = (0..case_count)
            .map(|case| ops.input_label(2 + case))
            .collect();

        let default_label = self.block_label(default_block);
        let table_label = self.masm.create_label();
        let scratch = self.scratch.gp();
        control_flow::emit_table_dispatch(
            &mut self.masm,
            index,
            scratch,
            case_count as u32,
            default_label,
            table_label,
        )?;
        self.jump_tables.push(PendingJumpTable {
            table_label,
            targets,
        });
        Ok(())
    }

    fn assemble_lookup_switch(&mut self, ops: &OperandResolver) -> CodegenResult<()> {
        let index = ops.input_gp(0);
        let default_block = ops.input_label(1);
        let pair_count = (ops.instr().input_count() - 2) / 2;
        let mut cases = Vec::with_capacity(pair_count);
        for pair in 0..pair_count {
            let value = ops.input_i32(2 + pair * 2);
            let block = ops.input_label(3 + pair * 2);
            cases.push((value, self.block_label(block)));
        }
        let default_label = self.block_label(default_block);
        control_flow::emit_lookup_chain(&mut self.masm, index, &cases, default_label)
    }

    fn assemble_call(&mut self, ops: &OperandResolver) -> CodegenResult<()> {
        let stub = ops.instr().opcode() == Opcode::CallStub;
        if stub {
            // The return address becomes a patchable site; it must sit at
            // least a patch width past the previous one.
            self.deopt.pad_before_site(&mut self.masm)?;
        }
        match ops.instr().input_at(0) {
            InstructionOperand::Reg(target) => {
                assert!(target.is_gp(), "call target must be a GP register");
                self.masm.call_r(*target)?;
            }
            InstructionOperand::Imm(Constant::External(addr)) => {
                let target = self.scratch.gp();
                let mut site = self.masm.create_label();
                self.masm.bind(&mut site)?;
                self.masm
                    .mov_ri(self.masm.ptr_size(), target, *addr as i64)?;
                self.relocations.push(PendingRelocation {
                    label: site,
                    kind: RelocKind::External(*addr),
                });
                self.masm.call_r(target)?;
            }
            other => panic!("call target must be a register or external, got {other:?}"),
        }
        if stub {
            // Stub calls are lazily patchable at their return address; the
            // entry is filled in by the runtime when it patches.
            let id = u32::from(ops.instr().code().misc());
            self.deopt.record_lazy_site(&mut self.masm, id, 0)?;
        }
        Ok(())
    }

    /// Emit the collected rare-path stanzas after the last block.
    fn emit_out_of_line(&mut self) -> CodegenResult<()> {
        let entries = self.ool.take();
        if !entries.is_empty() {
            debug!("emitting {} out-of-line stanzas", entries.len());
        }
        for mut ool_entry in entries {
            self.masm.bind(&mut ool_entry.entry)?;
            match ool_entry.body {
                OolBody::IntZeroSentinel { dst } => {
                    self.masm.xor_rr(OpSize::S32, dst, dst)?;
                }
                OolBody::FloatNaNSentinel { dst } => {
                    // All-ones shifted right once per 64-bit lane is a quiet
                    // NaN bit pattern.
                    self.masm.pcmpeqd_rr(dst, dst)?;
                    self.masm.psrlq_ri(dst, 1)?;
                }
                OolBody::TruncateFallback { dst, src, helper } => {
                    self.emit_truncate_fallback(dst, src, helper)?;
                }
            }
            self.masm.jmp(ool_entry.exit)?;
        }
        Ok(())
    }

    /// Slow float-to-int conversion: pass the value on the stack and call the
    /// runtime helper; the result comes back in the first GP register.
    fn emit_truncate_fallback(
        &mut self,
        dst: AsmReg,
        src: AsmReg,
        helper: u64,
    ) -> CodegenResult<()> {
        let word = self.masm.ptr_size();
        let sp = self.isa.stack_pointer();
        self.masm.sub_ri(word, sp, 8)?;
        self.masm.movsd_mr(&Mem::base(sp), src)?;
        let target = self.scratch.gp();
        let mut site = self.masm.create_label();
        self.masm.bind(&mut site)?;
        self.masm.mov_ri(word, target, helper as i64)?;
        self.relocations.push(PendingRelocation {
            label: site,
            kind: RelocKind::External(helper),
        });
        self.masm.call_r(target)?;
        let ret = AsmReg::gp(0);
        if dst != ret {
            self.masm.mov_rr(OpSize::S32, dst, ret)?;
        }
        self.masm.add_ri(word, sp, 8)
    }

    /// Emit the jump table data sections after everything else. Entries are
    /// pointer-sized zero placeholders; the artifact records the target
    /// offsets the loader writes in.
    fn emit_jump_tables(&mut self) -> CodegenResult<()> {
        for table_index in 0..self.jump_tables.len() {
            let mut label = self.jump_tables[table_index].table_label;
            self.masm.bind(&mut label)?;
            self.jump_tables[table_index].table_label = label;
            for _ in 0..self.jump_tables[table_index].targets.len() {
                self.masm.data_ptr_zero()?;
            }
        }
        Ok(())
    }

    fn finalize(self) -> CodegenResult<CodeArtifact> {
        let entry_size = self.isa.pointer_size();
        let code = self.masm.finalize()?;

        let mut block_offsets = HashMap::new();
        for (&block, &label) in &self.block_labels {
            block_offsets.insert(block, code.label_offset(label)?);
        }

        let mut relocations = Vec::with_capacity(self.relocations.len());
        for pending in &self.relocations {
            relocations.push(Relocation {
                offset: code.label_offset(pending.label)?,
                kind: pending.kind,
            });
        }

        let mut jump_tables = Vec::with_capacity(self.jump_tables.len());
        for pending in &self.jump_tables {
            let mut targets = Vec::with_capacity(pending.targets.len());
            for &block in &pending.targets {
                let offset = block_offsets
                    .get(&block)
                    .copied()
                    .unwrap_or_else(|| panic!("jump table references unbound block {block}"));
                targets.push(offset);
            }
            jump_tables.push(JumpTable {
                offset: code.label_offset(pending.table_label)?,
                entry_size,
                targets,
            });
        }

        let mut deopt_sites = Vec::new();
        for site in self.deopt.sites() {
            deopt_sites.push(DeoptSite {
                id: site.id,
                kind: site.kind,
                offset: code.label_offset(site.label)?,
                entry: site.entry,
            });
        }

        debug!(
            "finalized {} bytes, {} relocations, {} jump tables, {} deopt sites",
            code.bytes().len(),
            relocations.len(),
            jump_tables.len(),
            deopt_sites.len()
        );

        Ok(CodeArtifact {
            code: code.into_bytes(),
            relocations,
            jump_tables,
            deopt_sites,
            block_offsets,
        })
    }
}

/// Raw encoding for one table-driven vector operation.
fn vector_code(opcode: Opcode) -> iced_x86::Code {
    use iced_x86::Code;
    match opcode {
        Opcode::F32x4Add => Code::Addps_xmm_xmmm128,
        Opcode::F32x4Sub => Code::Subps_xmm_xmmm128,
        Opcode::F32x4Mul => Code::Mulps_xmm_xmmm128,
        Opcode::F32x4Div => Code::Divps_xmm_xmmm128,
        Opcode::F32x4Min => Code::Minps_xmm_xmmm128,
        Opcode::F32x4Max => Code::Maxps_xmm_xmmm128,
        Opcode::I32x4Add => Code::Paddd_xmm_xmmm128,
        Opcode::I32x4Sub => Code::Psubd_xmm_xmmm128,
        Opcode::S128And => Code::Pand_xmm_xmmm128,
        Opcode::S128Or => Code::Por_xmm_xmmm128,
        Opcode::S128Xor => Code::Pxor_xmm_xmmm128,
        other => panic!("not a vector opcode: {other:?}"),
    }
}
