// This module realizes the parallel moves the register allocator attaches to
// instruction gaps. A parallel move is a set of location transfers that must
// behave as if simultaneous; sequentializing them requires ordering moves so
// no source is clobbered before it is read, and breaking cycles with a swap.
// The resolver runs a depth-first walk over the move graph: each move first
// performs every unstarted move whose source its destination would clobber,
// then emits itself; meeting a move already on the walk stack means a cycle,
// which is resolved by emitting a swap and rewriting the sources of the
// not-yet-performed moves that referenced the swapped locations. Swap and
// stack-to-stack forms go through the reserved scratch registers. Constant
// sources are materialized here as well, including the relocatable external
// and heap-object loads and the context reload from its frame slot.

//! Parallel move sequentialization.

use iced_x86::code_asm::CodeLabel;

use crate::core::error::CodegenResult;
use crate::core::frame::Frame;
use crate::core::instruction::{Constant, InstructionOperand, MoveOp, ParallelMove, SlotWidth};
use crate::isa::{AsmReg, ScratchPair};
use crate::masm::{MacroAssembler, Mem, OpSize};

/// Destination for relocation records produced while materializing constants.
pub trait RelocSink {
    /// An absolute external address was just emitted; the label marks the
    /// instruction holding it.
    fn record_external(&mut self, label: CodeLabel, address: u64);
    /// A heap-object handle placeholder was just emitted.
    fn record_heap_object(&mut self, label: CodeLabel, handle: u32);
}

/// Relocation sink that records nothing; for moves known constant-free.
pub struct NoRelocs;

impl RelocSink for NoRelocs {
    fn record_external(&mut self, _label: CodeLabel, _address: u64) {}
    fn record_heap_object(&mut self, _label: CodeLabel, _handle: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    Todo,
    /// On the walk stack; a dependency on a pending move is a cycle.
    Pending,
    Done,
}

/// Sequentializes parallel moves against one target's frame parameters.
pub struct GapResolver {
    frame_pointer: AsmReg,
    stack_pointer: AsmReg,
    slot_size: u32,
}

impl GapResolver {
    pub fn new(frame_pointer: AsmReg, stack_pointer: AsmReg, slot_size: u32) -> Self {
        Self {
            frame_pointer,
            stack_pointer,
            slot_size,
        }
    }

    /// Emit a parallel move as an equivalent sequential program.
    pub fn resolve(
        &self,
        masm: &mut MacroAssembler,
        scratch: &mut ScratchPair,
        frame: &Frame,
        parallel_move: &ParallelMove,
        relocs: &mut dyn RelocSink,
    ) -> CodegenResult<()> {
        let mut moves: Vec<MoveOp> = parallel_move
            .moves
            .iter()
            .copied()
            .filter(|m| m.src != m.dst)
            .collect();
        let mut states = vec![MoveState::Todo; moves.len()];

        for i in 0..moves.len() {
            if states[i] == MoveState::Todo {
                self.perform_move(masm, scratch, frame, &mut moves, &mut states, i, relocs)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn perform_move(
        &self,
        masm: &mut MacroAssembler,
        scratch: &mut ScratchPair,
        frame: &Frame,
        moves: &mut Vec<MoveOp>,
        states: &mut Vec<MoveState>,
        index: usize,
        relocs: &mut dyn RelocSink,
    ) -> CodegenResult<()> {
        states[index] = MoveState::Pending;
        let dst = moves[index].dst;

        // Perform every unstarted move this destination would clobber.
        for other in 0..moves.len() {
            if other != index
                && states[other] == MoveState::Todo
                && interferes(&moves[other].src, &dst)
            {
                self.perform_move(masm, scratch, frame, moves, states, other, relocs)?;
            }
        }

        // Sources may have been rewritten by a swap further down the stack.
        let src = moves[index].src;
        if src == dst {
            states[index] = MoveState::Done;
            return Ok(());
        }

        // A pending move still reading our destination closes a cycle.
        let blocked = (0..moves.len()).any(|other| {
            other != index
                && states[other] == MoveState::Pending
                && interferes(&moves[other].src, &dst)
        });

        if blocked {
            self.emit_swap(masm, scratch, frame, &src, &dst)?;
            states[index] = MoveState::Done;
            // The swap exchanged the contents of src and dst; redirect the
            // sources of every move not yet performed.
            for other in 0..moves.len() {
                if states[other] == MoveState::Done {
                    continue;
                }
                if interferes(&moves[other].src, &dst) {
                    moves[other].src = src;
                } else if interferes(&moves[other].src, &src) {
                    moves[other].src = dst;
                }
            }
        } else {
            self.emit_move(masm, scratch, frame, &src, &dst, relocs)?;
            states[index] = MoveState::Done;
        }
        Ok(())
    }

    fn slot_mem(&self, frame: &Frame, index: i32) -> Mem {
        Mem::base_disp(self.frame_pointer, frame.slot_offset(index, self.slot_size))
    }

    fn word_size(&self, masm: &MacroAssembler) -> OpSize {
        masm.ptr_size()
    }

    /// Width of a transfer, taken from whichever side knows it best.
    fn width_of(src: &InstructionOperand, dst: &InstructionOperand) -> SlotWidth {
        match (src, dst) {
            (InstructionOperand::Slot { width, .. }, _) => *width,
            (_, InstructionOperand::Slot { width, .. }) => *width,
            _ => src.width(),
        }
    }

    fn emit_move(
        &self,
        masm: &mut MacroAssembler,
        scratch: &mut ScratchPair,
        frame: &Frame,
        src: &InstructionOperand,
        dst: &InstructionOperand,
        relocs: &mut dyn RelocSink,
    ) -> CodegenResult<()> {
        let width = Self::width_of(src, dst);
        match (src, dst) {
            (InstructionOperand::Reg(s), InstructionOperand::Reg(d)) => {
                match (s.is_gp(), d.is_gp()) {
                    (true, true) => masm.mov_rr(self.word_size(masm), *d, *s),
                    (false, false) => masm.movaps_rr(*d, *s),
                    _ => panic!("move between register banks: {s:?} -> {d:?}"),
                }
            }
            (InstructionOperand::Reg(s), InstructionOperand::Slot { index, .. }) => {
                let mem = self.slot_mem(frame, *index);
                if s.is_gp() {
                    masm.mov_mr(self.word_size(masm), &mem, *s)
                } else {
                    match width {
                        SlotWidth::Vec128 => masm.movdqu_mr(&mem, *s),
                        _ => masm.movsd_mr(&mem, *s),
                    }
                }
            }
            (InstructionOperand::Slot { index, .. }, InstructionOperand::Reg(d)) => {
                let mem = self.slot_mem(frame, *index);
                if d.is_gp() {
                    masm.mov_rm(self.word_size(masm), *d, &mem)
                } else {
                    match width {
                        SlotWidth::Vec128 => masm.movdqu_rm(*d, &mem),
                        _ => masm.movsd_rm(*d, &mem),
                    }
                }
            }
            (InstructionOperand::Slot { index: si, .. }, InstructionOperand::Slot { index: di, .. }) => {
                let smem = self.slot_mem(frame, *si);
                let dmem = self.slot_mem(frame, *di);
                match width {
                    SlotWidth::Word => {
                        let tmp = scratch.gp();
                        masm.mov_rm(self.word_size(masm), tmp, &smem)?;
                        masm.mov_mr(self.word_size(masm), &dmem, tmp)
                    }
                    SlotWidth::Double => {
                        let tmp = scratch.fp();
                        masm.movsd_rm(tmp, &smem)?;
                        masm.movsd_mr(&dmem, tmp)
                    }
                    SlotWidth::Vec128 => {
                        let tmp = scratch.fp();
                        masm.movdqu_rm(tmp, &smem)?;
                        masm.movdqu_mr(&dmem, tmp)
                    }
                }
            }
            (InstructionOperand::Imm(constant), _) => {
                self.materialize(masm, scratch, frame, constant, dst, relocs)
            }
            (_, InstructionOperand::Imm(_)) => {
                panic!("move into an immediate: {src:?} -> {dst:?}")
            }
        }
    }

    fn materialize(
        &self,
        masm: &mut MacroAssembler,
        scratch: &mut ScratchPair,
        frame: &Frame,
        constant: &Constant,
        dst: &InstructionOperand,
        relocs: &mut dyn RelocSink,
    ) -> CodegenResult<()> {
        let word = self.word_size(masm);
        match (constant, dst) {
            (Constant::Int32(v), InstructionOperand::Reg(d)) => {
                masm.mov_ri(OpSize::S32, *d, i64::from(*v))
            }
            (Constant::Int32(v), InstructionOperand::Slot { index, .. }) => {
                let mem = self.slot_mem(frame, *index);
                masm.mov_mi(word, &mem, *v)
            }
            (Constant::Int64(v), InstructionOperand::Reg(d)) => masm.mov_ri(OpSize::S64, *d, *v),
            (Constant::Int64(v), InstructionOperand::Slot { index, .. }) => {
                let mem = self.slot_mem(frame, *index);
                if let Ok(small) = i32::try_from(*v) {
                    masm.mov_mi(OpSize::S64, &mem, small)
                } else {
                    let tmp = scratch.gp();
                    masm.mov_ri(OpSize::S64, tmp, *v)?;
                    masm.mov_mr(OpSize::S64, &mem, tmp)
                }
            }
            (Constant::Float32(v), InstructionOperand::Reg(d)) => {
                let tmp = scratch.gp();
                masm.mov_ri(OpSize::S32, tmp, i64::from(v.to_bits() as i32))?;
                masm.movd_xr(*d, tmp)
            }
            (Constant::Float32(v), InstructionOperand::Slot { index, .. }) => {
                let mem = self.slot_mem(frame, *index);
                masm.mov_mi(OpSize::S32, &mem, v.to_bits() as i32)
            }
            (Constant::Float64(v), InstructionOperand::Reg(d)) => {
                let bits = v.to_bits();
                if masm.bitness() == 64 {
                    let tmp = scratch.gp();
                    masm.mov_ri(OpSize::S64, tmp, bits as i64)?;
                    masm.movq_xr(*d, tmp)
                } else {
                    // No 64-bit GP path; bounce through the stack.
                    let sp = Mem::base(self.stack_pointer);
                    let sp_hi = Mem::base_disp(self.stack_pointer, 4);
                    masm.sub_ri(OpSize::S32, self.stack_pointer, 8)?;
                    masm.mov_mi(OpSize::S32, &sp, bits as u32 as i32)?;
                    masm.mov_mi(OpSize::S32, &sp_hi, (bits >> 32) as u32 as i32)?;
                    masm.movsd_rm(*d, &sp)?;
                    masm.add_ri(OpSize::S32, self.stack_pointer, 8)
                }
            }
            (Constant::Float64(v), InstructionOperand::Slot { index, .. }) => {
                let bits = v.to_bits();
                let mem = self.slot_mem(frame, *index);
                if masm.bitness() == 64 {
                    let tmp = scratch.gp();
                    masm.mov_ri(OpSize::S64, tmp, bits as i64)?;
                    masm.mov_mr(OpSize::S64, &mem, tmp)
                } else {
                    let hi = Mem::base_disp(self.frame_pointer, mem.disp + 4);
                    masm.mov_mi(OpSize::S32, &mem, bits as u32 as i32)?;
                    masm.mov_mi(OpSize::S32, &hi, (bits >> 32) as u32 as i32)
                }
            }
            (Constant::External(addr), InstructionOperand::Reg(d)) => {
                assert!(d.is_gp(), "external address into FP register: {d:?}");
                let mut site = masm.create_label();
                masm.bind(&mut site)?;
                masm.mov_ri(word, *d, *addr as i64)?;
                relocs.record_external(site, *addr);
                Ok(())
            }
            (Constant::HeapObject(handle), InstructionOperand::Reg(d)) => {
                assert!(d.is_gp(), "heap reference into FP register: {d:?}");
                let mut site = masm.create_label();
                masm.bind(&mut site)?;
                // Placeholder value; the loader patches the handle's address.
                masm.mov_ri(word, *d, i64::from(*handle))?;
                relocs.record_heap_object(site, *handle);
                Ok(())
            }
            (
                constant @ (Constant::External(_) | Constant::HeapObject(_)),
                InstructionOperand::Slot { index, .. },
            ) => {
                let tmp = scratch.gp();
                self.materialize(
                    masm,
                    scratch,
                    frame,
                    constant,
                    &InstructionOperand::Reg(tmp),
                    relocs,
                )?;
                let mem = self.slot_mem(frame, *index);
                masm.mov_mr(word, &mem, tmp)
            }
            (Constant::Context, InstructionOperand::Reg(d)) => {
                let mem = Mem::base_disp(
                    self.frame_pointer,
                    frame.context_offset(self.slot_size),
                );
                masm.mov_rm(word, *d, &mem)
            }
            (Constant::Context, InstructionOperand::Slot { index, .. }) => {
                let tmp = scratch.gp();
                let ctx = Mem::base_disp(
                    self.frame_pointer,
                    frame.context_offset(self.slot_size),
                );
                masm.mov_rm(word, tmp, &ctx)?;
                let mem = self.slot_mem(frame, *index);
                masm.mov_mr(word, &mem, tmp)
            }
            (constant, dst) => panic!("cannot materialize {constant:?} into {dst:?}"),
        }
    }

    fn emit_swap(
        &self,
        masm: &mut MacroAssembler,
        scratch: &mut ScratchPair,
        frame: &Frame,
        a: &InstructionOperand,
        b: &InstructionOperand,
    ) -> CodegenResult<()> {
        let width = Self::width_of(a, b);
        match (a, b) {
            (InstructionOperand::Reg(x), InstructionOperand::Reg(y)) => {
                match (x.is_gp(), y.is_gp()) {
                    (true, true) => masm.xchg_rr(*x, *y),
                    (false, false) => {
                        let tmp = scratch.fp();
                        masm.movaps_rr(tmp, *x)?;
                        masm.movaps_rr(*x, *y)?;
                        masm.movaps_rr(*y, tmp)
                    }
                    _ => panic!("swap between register banks: {x:?} <-> {y:?}"),
                }
            }
            (InstructionOperand::Reg(r), InstructionOperand::Slot { index, .. })
            | (InstructionOperand::Slot { index, .. }, InstructionOperand::Reg(r)) => {
                let mem = self.slot_mem(frame, *index);
                if r.is_gp() {
                    let tmp = scratch.gp();
                    masm.mov_rm(self.word_size(masm), tmp, &mem)?;
                    masm.mov_mr(self.word_size(masm), &mem, *r)?;
                    masm.mov_rr(self.word_size(masm), *r, tmp)
                } else {
                    let tmp = scratch.fp();
                    match width {
                        SlotWidth::Vec128 => {
                            masm.movdqu_rm(tmp, &mem)?;
                            masm.movdqu_mr(&mem, *r)?;
                            masm.movaps_rr(*r, tmp)
                        }
                        _ => {
                            masm.movsd_rm(tmp, &mem)?;
                            masm.movsd_mr(&mem, *r)?;
                            masm.movaps_rr(*r, tmp)
                        }
                    }
                }
            }
            (
                InstructionOperand::Slot { index: ai, .. },
                InstructionOperand::Slot { index: bi, .. },
            ) => {
                let amem = self.slot_mem(frame, *ai);
                let bmem = self.slot_mem(frame, *bi);
                let bytes = match width {
                    SlotWidth::Word => self.slot_size,
                    SlotWidth::Double => 8,
                    SlotWidth::Vec128 => 16,
                };
                // Hold one side in the FP scratch, copy the other across in
                // pointer-sized pieces through the GP scratch, then store.
                let fp_tmp = scratch.fp();
                match (width, masm.bitness()) {
                    (SlotWidth::Vec128, _) => masm.movdqu_rm(fp_tmp, &amem)?,
                    (SlotWidth::Word, 32) => masm.movss_rm(fp_tmp, &amem)?,
                    _ => masm.movsd_rm(fp_tmp, &amem)?,
                }
                let step = self.slot_size;
                let gp_tmp = scratch.gp();
                let mut off = 0;
                while off < bytes {
                    let bsrc = Mem::base_disp(self.frame_pointer, bmem.disp + off as i32);
                    let adst = Mem::base_disp(self.frame_pointer, amem.disp + off as i32);
                    masm.mov_rm(self.word_size(masm), gp_tmp, &bsrc)?;
                    masm.mov_mr(self.word_size(masm), &adst, gp_tmp)?;
                    off += step;
                }
                match (width, masm.bitness()) {
                    (SlotWidth::Vec128, _) => masm.movdqu_mr(&bmem, fp_tmp),
                    (SlotWidth::Word, 32) => masm.movss_mr(&bmem, fp_tmp),
                    _ => masm.movsd_mr(&bmem, fp_tmp),
                }
            }
            _ => panic!("cannot swap {a:?} <-> {b:?}"),
        }
    }
}

fn interferes(a: &InstructionOperand, b: &InstructionOperand) -> bool {
    match (a, b) {
        (InstructionOperand::Reg(x), InstructionOperand::Reg(y)) => x == y,
        (InstructionOperand::Slot { index: x, .. }, InstructionOperand::Slot { index: y, .. }) => {
            x == y
        }
        _ => false,
    }
}
