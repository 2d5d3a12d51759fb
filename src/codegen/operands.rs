// This module converts the abstract operands attached to an instruction into
// the forms the macro-assembler consumes: typed registers, frame-relative
// memory operands and immediate values. The resolver also decodes the
// addressing mode of an instruction into a concrete memory operand by walking
// the input list (base register, then index register, then displacement, in
// that order). Operand-kind mismatches are bugs in the upstream selection or
// allocation stage; every accessor that hits one aborts with the opcode and
// operand position in the message.

//! Operand resolution against the instruction and the finalized frame.

use crate::core::frame::Frame;
use crate::core::instruction::{
    AddressingMode, Constant, Instruction, InstructionOperand,
};
use crate::isa::AsmReg;
use crate::masm::Mem;

/// Resolves the operands of one instruction.
///
/// Holds the instruction, the finalized frame and the target's frame pointer
/// and slot size; all accessors are cheap lookups.
pub struct OperandResolver<'a> {
    instr: &'a Instruction,
    frame: &'a Frame,
    frame_pointer: AsmReg,
    slot_size: u32,
}

impl<'a> OperandResolver<'a> {
    pub fn new(instr: &'a Instruction, frame: &'a Frame, frame_pointer: AsmReg, slot_size: u32) -> Self {
        Self {
            instr,
            frame,
            frame_pointer,
            slot_size,
        }
    }

    pub fn instr(&self) -> &Instruction {
        self.instr
    }

    fn expect_reg(&self, operand: &InstructionOperand, what: &str, index: usize) -> AsmReg {
        match operand {
            InstructionOperand::Reg(reg) => *reg,
            other => panic!(
                "{:?}: {what} {index} must be a register, got {other:?}",
                self.instr.opcode()
            ),
        }
    }

    /// General purpose register input.
    pub fn input_gp(&self, index: usize) -> AsmReg {
        let reg = self.expect_reg(self.instr.input_at(index), "input", index);
        assert!(
            reg.is_gp(),
            "{:?}: input {index} must be a GP register, got {reg:?}",
            self.instr.opcode()
        );
        reg
    }

    /// Float/vector register input.
    pub fn input_fp(&self, index: usize) -> AsmReg {
        let reg = self.expect_reg(self.instr.input_at(index), "input", index);
        assert!(
            reg.is_fp(),
            "{:?}: input {index} must be an FP register, got {reg:?}",
            self.instr.opcode()
        );
        reg
    }

    pub fn output_gp(&self, index: usize) -> AsmReg {
        let reg = self.expect_reg(self.instr.output_at(index), "output", index);
        assert!(
            reg.is_gp(),
            "{:?}: output {index} must be a GP register, got {reg:?}",
            self.instr.opcode()
        );
        reg
    }

    pub fn output_fp(&self, index: usize) -> AsmReg {
        let reg = self.expect_reg(self.instr.output_at(index), "output", index);
        assert!(
            reg.is_fp(),
            "{:?}: output {index} must be an FP register, got {reg:?}",
            self.instr.opcode()
        );
        reg
    }

    /// Immediate input constant.
    pub fn input_constant(&self, index: usize) -> &Constant {
        match self.instr.input_at(index) {
            InstructionOperand::Imm(constant) => constant,
            other => panic!(
                "{:?}: input {index} must be an immediate, got {other:?}",
                self.instr.opcode()
            ),
        }
    }

    /// Immediate input as a 32-bit integer; wider constants must fit.
    pub fn input_i32(&self, index: usize) -> i32 {
        match self.input_constant(index) {
            Constant::Int32(v) => *v,
            Constant::Int64(v) => i32::try_from(*v).unwrap_or_else(|_| {
                panic!(
                    "{:?}: input {index} does not fit in 32 bits: {v}",
                    self.instr.opcode()
                )
            }),
            other => panic!(
                "{:?}: input {index} must be an integer immediate, got {other:?}",
                self.instr.opcode()
            ),
        }
    }

    /// Immediate input naming a block label.
    pub fn input_label(&self, index: usize) -> u32 {
        match self.input_constant(index) {
            Constant::Label(block) => *block,
            other => panic!(
                "{:?}: input {index} must be a label, got {other:?}",
                self.instr.opcode()
            ),
        }
    }

    /// Whether an input is an immediate (used for form selection).
    pub fn input_is_imm(&self, index: usize) -> bool {
        self.instr.input_at(index).is_imm()
    }

    pub fn input_is_slot(&self, index: usize) -> bool {
        self.instr.input_at(index).is_slot()
    }

    /// Frame-relative memory operand for a stack slot operand.
    pub fn slot_mem(&self, operand: &InstructionOperand) -> Mem {
        match operand {
            InstructionOperand::Slot { index, .. } => Mem::base_disp(
                self.frame_pointer,
                self.frame.slot_offset(*index, self.slot_size),
            ),
            other => panic!(
                "{:?}: expected a stack slot operand, got {other:?}",
                self.instr.opcode()
            ),
        }
    }

    /// Memory operand for a slot input.
    pub fn input_slot_mem(&self, index: usize) -> Mem {
        self.slot_mem(self.instr.input_at(index))
    }

    /// Decode the instruction's addressing mode into a memory operand,
    /// consuming inputs starting at `first_input`. Returns the operand and the
    /// index of the first input after the address components.
    pub fn memory_operand(&self, first_input: usize) -> (Mem, usize) {
        let mode = self.instr.code().addressing_mode();
        let mut next = first_input;

        if mode == AddressingMode::None {
            panic!(
                "{:?}: memory operand requested but addressing mode is None",
                self.instr.opcode()
            );
        }
        if mode == AddressingMode::Absolute {
            let addr = match self.input_constant(next) {
                Constant::External(addr) => *addr,
                other => panic!(
                    "{:?}: absolute address must be external, got {other:?}",
                    self.instr.opcode()
                ),
            };
            return (Mem::absolute(addr), next + 1);
        }

        let base = if mode.has_base() {
            let reg = self.input_gp(next);
            next += 1;
            Some(reg)
        } else {
            None
        };
        let index = if mode.has_index() {
            let reg = self.input_gp(next);
            next += 1;
            Some(reg)
        } else {
            None
        };
        let disp = if mode.has_displacement() {
            let v = self.input_i32(next);
            next += 1;
            v
        } else {
            0
        };

        let mem = Mem {
            base,
            index,
            scale: mode.scale(),
            disp,
            abs: None,
        };
        (mem, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::CallConvention;
    use crate::core::instruction::{FlagsCondition, FlagsMode, InstructionCode, Opcode, SlotWidth};

    fn finalized_frame() -> Frame {
        let mut frame = Frame::new(CallConvention::Managed, 2, 4);
        frame.finalize(0);
        frame
    }

    #[test]
    fn test_register_accessors() {
        let frame = finalized_frame();
        let instr = Instruction::new(
            Opcode::Add32,
            vec![InstructionOperand::Reg(AsmReg::gp(0))],
            vec![
                InstructionOperand::Reg(AsmReg::gp(0)),
                InstructionOperand::Reg(AsmReg::gp(1)),
            ],
        );
        let ops = OperandResolver::new(&instr, &frame, AsmReg::gp(5), 8);
        assert_eq!(ops.output_gp(0), AsmReg::gp(0));
        assert_eq!(ops.input_gp(1), AsmReg::gp(1));
    }

    #[test]
    #[should_panic(expected = "must be a GP register")]
    fn test_bank_mismatch_panics() {
        let frame = finalized_frame();
        let instr = Instruction::new(
            Opcode::Add32,
            vec![InstructionOperand::Reg(AsmReg::fp(0))],
            vec![],
        );
        let ops = OperandResolver::new(&instr, &frame, AsmReg::gp(5), 8);
        let _ = ops.output_gp(0);
    }

    #[test]
    #[should_panic(expected = "must be an immediate")]
    fn test_imm_kind_mismatch_panics() {
        let frame = finalized_frame();
        let instr = Instruction::new(
            Opcode::Add32,
            vec![],
            vec![InstructionOperand::Reg(AsmReg::gp(0))],
        );
        let ops = OperandResolver::new(&instr, &frame, AsmReg::gp(5), 8);
        let _ = ops.input_i32(0);
    }

    #[test]
    fn test_slot_mem_uses_frame_offset() {
        let frame = finalized_frame();
        let instr = Instruction::new(
            Opcode::Load32,
            vec![],
            vec![InstructionOperand::Slot {
                index: 1,
                width: SlotWidth::Word,
            }],
        );
        let ops = OperandResolver::new(&instr, &frame, AsmReg::gp(5), 8);
        let mem = ops.input_slot_mem(0);
        assert_eq!(mem.base, Some(AsmReg::gp(5)));
        assert_eq!(mem.disp, frame.slot_offset(1, 8));
    }

    #[test]
    fn test_memory_operand_decoding() {
        let frame = finalized_frame();
        let code = InstructionCode::encode(
            Opcode::Load32,
            AddressingMode::MR4I,
            FlagsMode::None,
            FlagsCondition::Equal,
        );
        let instr = Instruction::new(
            code,
            vec![InstructionOperand::Reg(AsmReg::gp(0))],
            vec![
                InstructionOperand::Reg(AsmReg::gp(3)),
                InstructionOperand::Reg(AsmReg::gp(1)),
                InstructionOperand::Imm(Constant::Int32(16)),
            ],
        );
        let ops = OperandResolver::new(&instr, &frame, AsmReg::gp(5), 8);
        let (mem, next) = ops.memory_operand(0);
        assert_eq!(mem.base, Some(AsmReg::gp(3)));
        assert_eq!(mem.index, Some(AsmReg::gp(1)));
        assert_eq!(mem.scale, 4);
        assert_eq!(mem.disp, 16);
        assert_eq!(next, 3);
    }

    #[test]
    fn test_absolute_memory_operand() {
        let frame = finalized_frame();
        let code = InstructionCode::encode(
            Opcode::Load32,
            AddressingMode::Absolute,
            FlagsMode::None,
            FlagsCondition::Equal,
        );
        let instr = Instruction::new(
            code,
            vec![InstructionOperand::Reg(AsmReg::gp(0))],
            vec![InstructionOperand::Imm(Constant::External(0x1000))],
        );
        let ops = OperandResolver::new(&instr, &frame, AsmReg::gp(5), 8);
        let (mem, next) = ops.memory_operand(0);
        assert_eq!(mem.abs, Some(0x1000));
        assert_eq!(next, 1);
    }
}
