//! Machinist - final-stage machine code generation.
//!
//! Machinist turns the register-allocated instruction stream produced by an
//! optimizing compiler's earlier stages into executable x86 machine code. It
//! consumes a closed, architecture-neutral instruction vocabulary (packed
//! opcodes, operands naming registers, stack slots and typed constants, and
//! the parallel moves the allocator leaves in instruction gaps) and produces a
//! finished artifact: code bytes plus relocation, jump-table and
//! deoptimization-site tables.
//!
//! # Primary Usage
//!
//! ```ignore
//! use machinist::codegen::CodeGenerator;
//! use machinist::core::{CallConvention, Frame};
//! use machinist::isa::{AsmReg, X64};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let frame = Frame::new(CallConvention::Managed, param_count, spill_slots);
//! let generator = CodeGenerator::new(&X64, &arena, frame, AsmReg::gp(6))?;
//! let artifact = generator.generate(&instructions)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Instruction/operand model, frame layout, errors
//! - [`isa`] - Target contract and its two instantiations (x64, ia32)
//! - [`masm`] - Macro-assembler over iced-x86
//! - [`codegen`] - Generation driver, moves, control flow, deopt support

pub mod codegen;
pub mod core;
pub mod isa;
pub mod masm;

pub use codegen::deopt::DeoptKind;
pub use codegen::{CodeArtifact, CodeGenerator, DeoptSite, JumpTable, RelocKind, Relocation};
pub use core::{
    CallConvention, CodegenError, CodegenResult, Constant, FlagsCondition, FlagsMode, Frame,
    Instruction, InstructionCode, InstructionOperand, MoveOp, Opcode, ParallelMove, SlotWidth,
};
pub use isa::{AsmReg, Ia32, RegBitSet, ScratchPair, TargetIsa, X64};
pub use masm::{CondCode, MacroAssembler, Mem, OpSize};
