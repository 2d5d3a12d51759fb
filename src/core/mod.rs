// This module collects the data model the code generator consumes: the packed
// instruction vocabulary and operand types produced by the upstream selection
// and allocation stage, the per-function frame descriptor, and the error types
// shared by every emission path. Nothing here emits code; the model is
// deliberately read-only to the generator so a generation run can never feed
// back into the instruction stream it is walking.

//! Shared data model: instructions, operands, frames, errors.

pub mod error;
pub mod frame;
pub mod instruction;

pub use error::{CodegenError, CodegenResult};
pub use frame::{CallConvention, Frame, CONTEXT_SLOT, STANDARD_FRAME_SLOTS};
pub use instruction::{
    AddressingMode, Constant, FlagsCondition, FlagsMode, Instruction, InstructionCode,
    InstructionOperand, MoveOp, Opcode, ParallelMove, SlotWidth, GAP_END, GAP_START,
};
