// This module defines the closed instruction vocabulary consumed by the code
// generator: Opcode (the semantic operation), AddressingMode (shape of a memory
// operand), FlagsMode/FlagsCondition (whether an instruction also yields a
// branch decision or boolean and under which condition), and the packed
// InstructionCode that combines them into one u32 with named pack/unpack
// accessors instead of ad hoc shift arithmetic. It also defines the operand
// model: InstructionOperand as a tagged union over registers, stack slots and
// typed constants, ParallelMove lists attached to instructions by the register
// allocator, and the read-only Instruction record itself. Everything here is
// produced by the upstream selection/allocation stage; this subsystem only
// decodes and dispatches on it. Decoding is total over validly encoded values;
// a malformed code indicates an upstream bug and aborts.

//! Instruction and operand model.
//!
//! The closed vocabulary of the backend. `InstructionCode` packs opcode,
//! addressing mode and flags information into one integer with named,
//! tested accessors; `Instruction` carries ordered outputs, inputs and
//! temporaries plus the gap moves left behind by the register allocator.

use crate::isa::AsmReg;

/// Semantic operations the emitter can lower.
///
/// The enum is closed and exhaustively matched by the instruction emitter, so
/// an opcode the target cannot emit is caught at build time rather than at
/// generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    // Word ALU.
    Add32,
    Add64,
    Sub32,
    Sub64,
    Mul32,
    Mul64,
    And32,
    And64,
    Or32,
    Or64,
    Xor32,
    Xor64,
    Shl32,
    Shl64,
    Shr32,
    Shr64,
    Sar32,
    Sar64,
    Not32,
    Neg32,
    Cmp32,
    Cmp64,
    Test32,
    Test64,
    /// Address computation; subject to the optional add/inc fold.
    Lea,

    // Loads and stores.
    Load8U,
    Load8S,
    Load16U,
    Load16S,
    Load32,
    Load64,
    Store8,
    Store16,
    Store32,
    Store64,
    LoadFloat64,
    StoreFloat64,
    LoadVec128,
    StoreVec128,

    // Checked accesses: fast path plus out-of-line sentinel.
    CheckedLoadInt32,
    CheckedLoadFloat64,
    CheckedStoreInt32,
    CheckedStoreFloat64,

    // Scalar float.
    Float64Add,
    Float64Sub,
    Float64Mul,
    Float64Div,
    Float64Sqrt,
    Float64Cmp,
    Float64ToInt32,
    Int32ToFloat64,

    // 128-bit vector; emission is table-driven.
    F32x4Add,
    F32x4Sub,
    F32x4Mul,
    F32x4Div,
    F32x4Min,
    F32x4Max,
    I32x4Add,
    I32x4Sub,
    S128And,
    S128Or,
    S128Xor,

    // Control and structure.
    BindBlock,
    Jump,
    TableSwitch,
    LookupSwitch,
    Ret,
    Call,
    CallStub,
    DeoptCall,
    Nop,
}

impl Opcode {
    /// Total number of opcode variants; used by the pack/unpack round-trip test.
    pub const COUNT: u8 = Opcode::Nop as u8 + 1;

    /// Decode from the packed representation.
    ///
    /// Total over values produced by `encode`; anything else is an upstream
    /// bug and aborts.
    pub fn from_bits(bits: u8) -> Self {
        assert!(bits < Self::COUNT, "invalid opcode bits: {bits}");
        // Safety not needed: match through a table keeps this a plain lookup.
        Self::ALL[bits as usize]
    }

    const ALL: [Opcode; Opcode::COUNT as usize] = [
        Opcode::Add32,
        Opcode::Add64,
        Opcode::Sub32,
        Opcode::Sub64,
        Opcode::Mul32,
        Opcode::Mul64,
        Opcode::And32,
        Opcode::And64,
        Opcode::Or32,
        Opcode::Or64,
        Opcode::Xor32,
        Opcode::Xor64,
        Opcode::Shl32,
        Opcode::Shl64,
        Opcode::Shr32,
        Opcode::Shr64,
        Opcode::Sar32,
        Opcode::Sar64,
        Opcode::Not32,
        Opcode::Neg32,
        Opcode::Cmp32,
        Opcode::Cmp64,
        Opcode::Test32,
        Opcode::Test64,
        Opcode::Lea,
        Opcode::Load8U,
        Opcode::Load8S,
        Opcode::Load16U,
        Opcode::Load16S,
        Opcode::Load32,
        Opcode::Load64,
        Opcode::Store8,
        Opcode::Store16,
        Opcode::Store32,
        Opcode::Store64,
        Opcode::LoadFloat64,
        Opcode::StoreFloat64,
        Opcode::LoadVec128,
        Opcode::StoreVec128,
        Opcode::CheckedLoadInt32,
        Opcode::CheckedLoadFloat64,
        Opcode::CheckedStoreInt32,
        Opcode::CheckedStoreFloat64,
        Opcode::Float64Add,
        Opcode::Float64Sub,
        Opcode::Float64Mul,
        Opcode::Float64Div,
        Opcode::Float64Sqrt,
        Opcode::Float64Cmp,
        Opcode::Float64ToInt32,
        Opcode::Int32ToFloat64,
        Opcode::F32x4Add,
        Opcode::F32x4Sub,
        Opcode::F32x4Mul,
        Opcode::F32x4Div,
        Opcode::F32x4Min,
        Opcode::F32x4Max,
        Opcode::I32x4Add,
        Opcode::I32x4Sub,
        Opcode::S128And,
        Opcode::S128Or,
        Opcode::S128Xor,
        Opcode::BindBlock,
        Opcode::Jump,
        Opcode::TableSwitch,
        Opcode::LookupSwitch,
        Opcode::Ret,
        Opcode::Call,
        Opcode::CallStub,
        Opcode::DeoptCall,
        Opcode::Nop,
    ];
}

/// Shape of a memory operand: which of base/index/scale/displacement are
/// present. `MRnI` modes scale the index by n; `MnI` modes have no base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressingMode {
    /// No memory operand.
    None,
    /// [base]
    MR,
    /// [base + disp]
    MRI,
    /// [base + index*1 + disp]
    MR1I,
    /// [base + index*2 + disp]
    MR2I,
    /// [base + index*4 + disp]
    MR4I,
    /// [base + index*8 + disp]
    MR8I,
    /// [index*1 + disp]
    M1I,
    /// [index*2 + disp]
    M2I,
    /// [index*4 + disp]
    M4I,
    /// [index*8 + disp]
    M8I,
    /// [disp] absolute.
    Absolute,
}

impl AddressingMode {
    pub const COUNT: u8 = AddressingMode::Absolute as u8 + 1;

    pub fn from_bits(bits: u8) -> Self {
        const ALL: [AddressingMode; AddressingMode::COUNT as usize] = [
            AddressingMode::None,
            AddressingMode::MR,
            AddressingMode::MRI,
            AddressingMode::MR1I,
            AddressingMode::MR2I,
            AddressingMode::MR4I,
            AddressingMode::MR8I,
            AddressingMode::M1I,
            AddressingMode::M2I,
            AddressingMode::M4I,
            AddressingMode::M8I,
            AddressingMode::Absolute,
        ];
        assert!(bits < Self::COUNT, "invalid addressing mode bits: {bits}");
        ALL[bits as usize]
    }

    /// Whether the mode consumes a base register input.
    pub fn has_base(self) -> bool {
        matches!(
            self,
            AddressingMode::MR
                | AddressingMode::MRI
                | AddressingMode::MR1I
                | AddressingMode::MR2I
                | AddressingMode::MR4I
                | AddressingMode::MR8I
        )
    }

    /// Whether the mode consumes an index register input.
    pub fn has_index(self) -> bool {
        matches!(
            self,
            AddressingMode::MR1I
                | AddressingMode::MR2I
                | AddressingMode::MR4I
                | AddressingMode::MR8I
                | AddressingMode::M1I
                | AddressingMode::M2I
                | AddressingMode::M4I
                | AddressingMode::M8I
        )
    }

    /// Whether the mode consumes a displacement immediate input.
    pub fn has_displacement(self) -> bool {
        !matches!(self, AddressingMode::None | AddressingMode::MR)
    }

    /// Index scale factor, 1 when no index is present.
    pub fn scale(self) -> u32 {
        match self {
            AddressingMode::MR2I | AddressingMode::M2I => 2,
            AddressingMode::MR4I | AddressingMode::M4I => 4,
            AddressingMode::MR8I | AddressingMode::M8I => 8,
            _ => 1,
        }
    }
}

/// Whether an instruction also produces a control-flow or boolean result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlagsMode {
    /// Flags are not consumed.
    None,
    /// The last two inputs are (true block, false block) branch targets.
    Branch,
    /// The first output receives a materialized 0/1 value.
    Set,
}

impl FlagsMode {
    pub const COUNT: u8 = FlagsMode::Set as u8 + 1;

    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => FlagsMode::None,
            1 => FlagsMode::Branch,
            2 => FlagsMode::Set,
            _ => panic!("invalid flags mode bits: {bits}"),
        }
    }
}

/// Condition under which a flags-producing instruction branches or sets.
///
/// The `Unordered*` variants exist for IEEE-754 comparisons where a NaN
/// operand makes the primary condition meaningless and requires a parity
/// pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlagsCondition {
    Equal,
    NotEqual,
    SignedLessThan,
    SignedGreaterThanOrEqual,
    SignedLessThanOrEqual,
    SignedGreaterThan,
    UnsignedLessThan,
    UnsignedGreaterThanOrEqual,
    UnsignedLessThanOrEqual,
    UnsignedGreaterThan,
    Overflow,
    NotOverflow,
    UnorderedEqual,
    UnorderedNotEqual,
}

impl FlagsCondition {
    pub const COUNT: u8 = FlagsCondition::UnorderedNotEqual as u8 + 1;

    pub fn from_bits(bits: u8) -> Self {
        const ALL: [FlagsCondition; FlagsCondition::COUNT as usize] = [
            FlagsCondition::Equal,
            FlagsCondition::NotEqual,
            FlagsCondition::SignedLessThan,
            FlagsCondition::SignedGreaterThanOrEqual,
            FlagsCondition::SignedLessThanOrEqual,
            FlagsCondition::SignedGreaterThan,
            FlagsCondition::UnsignedLessThan,
            FlagsCondition::UnsignedGreaterThanOrEqual,
            FlagsCondition::UnsignedLessThanOrEqual,
            FlagsCondition::UnsignedGreaterThan,
            FlagsCondition::Overflow,
            FlagsCondition::NotOverflow,
            FlagsCondition::UnorderedEqual,
            FlagsCondition::UnorderedNotEqual,
        ];
        assert!(bits < Self::COUNT, "invalid flags condition bits: {bits}");
        ALL[bits as usize]
    }

    /// The logically negated condition.
    pub fn negate(self) -> Self {
        use FlagsCondition::*;
        match self {
            Equal => NotEqual,
            NotEqual => Equal,
            SignedLessThan => SignedGreaterThanOrEqual,
            SignedGreaterThanOrEqual => SignedLessThan,
            SignedLessThanOrEqual => SignedGreaterThan,
            SignedGreaterThan => SignedLessThanOrEqual,
            UnsignedLessThan => UnsignedGreaterThanOrEqual,
            UnsignedGreaterThanOrEqual => UnsignedLessThan,
            UnsignedLessThanOrEqual => UnsignedGreaterThan,
            UnsignedGreaterThan => UnsignedLessThanOrEqual,
            Overflow => NotOverflow,
            NotOverflow => Overflow,
            UnorderedEqual => UnorderedNotEqual,
            UnorderedNotEqual => UnorderedEqual,
        }
    }

    /// Whether a NaN parity pre-check is required before the primary jump.
    pub fn is_unordered(self) -> bool {
        matches!(
            self,
            FlagsCondition::UnorderedEqual | FlagsCondition::UnorderedNotEqual
        )
    }
}

/// Packed instruction code: opcode, addressing mode, flags mode, flags
/// condition and a small misc field in one u32.
///
/// Field layout (named here once; all access goes through the accessors):
/// opcode bits 0..8, addressing mode bits 8..13, flags mode bits 13..15,
/// flags condition bits 15..20, misc bits 20..32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionCode(u32);

impl InstructionCode {
    const OPCODE_SHIFT: u32 = 0;
    const OPCODE_MASK: u32 = 0xff;
    const MODE_SHIFT: u32 = 8;
    const MODE_MASK: u32 = 0x1f;
    const FLAGS_MODE_SHIFT: u32 = 13;
    const FLAGS_MODE_MASK: u32 = 0x3;
    const FLAGS_COND_SHIFT: u32 = 15;
    const FLAGS_COND_MASK: u32 = 0x1f;
    const MISC_SHIFT: u32 = 20;
    const MISC_MASK: u32 = 0xfff;

    pub fn encode(
        opcode: Opcode,
        mode: AddressingMode,
        flags_mode: FlagsMode,
        flags_condition: FlagsCondition,
    ) -> Self {
        Self(
            ((opcode as u32) & Self::OPCODE_MASK) << Self::OPCODE_SHIFT
                | ((mode as u32) & Self::MODE_MASK) << Self::MODE_SHIFT
                | ((flags_mode as u32) & Self::FLAGS_MODE_MASK) << Self::FLAGS_MODE_SHIFT
                | ((flags_condition as u32) & Self::FLAGS_COND_MASK) << Self::FLAGS_COND_SHIFT,
        )
    }

    /// Attach the 12-bit misc field (rounding mode, switch base, ...).
    pub fn with_misc(self, misc: u16) -> Self {
        assert!(u32::from(misc) <= Self::MISC_MASK, "misc field overflow: {misc}");
        Self(self.0 & !(Self::MISC_MASK << Self::MISC_SHIFT) | u32::from(misc) << Self::MISC_SHIFT)
    }

    pub fn opcode(self) -> Opcode {
        Opcode::from_bits(((self.0 >> Self::OPCODE_SHIFT) & Self::OPCODE_MASK) as u8)
    }

    pub fn addressing_mode(self) -> AddressingMode {
        AddressingMode::from_bits(((self.0 >> Self::MODE_SHIFT) & Self::MODE_MASK) as u8)
    }

    pub fn flags_mode(self) -> FlagsMode {
        FlagsMode::from_bits(((self.0 >> Self::FLAGS_MODE_SHIFT) & Self::FLAGS_MODE_MASK) as u8)
    }

    pub fn flags_condition(self) -> FlagsCondition {
        FlagsCondition::from_bits(((self.0 >> Self::FLAGS_COND_SHIFT) & Self::FLAGS_COND_MASK) as u8)
    }

    pub fn misc(self) -> u16 {
        ((self.0 >> Self::MISC_SHIFT) & Self::MISC_MASK) as u16
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl From<Opcode> for InstructionCode {
    fn from(opcode: Opcode) -> Self {
        InstructionCode::encode(
            opcode,
            AddressingMode::None,
            FlagsMode::None,
            FlagsCondition::Equal,
        )
    }
}

/// Width class of a stack slot or move operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWidth {
    /// One pointer-sized slot.
    Word,
    /// 8 bytes; two slots on the 32-bit target.
    Double,
    /// 16 bytes; vector operand.
    Vec128,
}

/// Typed constant payload of an immediate operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Address outside the managed heap; needs a relocatable load.
    External(u64),
    /// Managed heap reference by handle id; needs a relocatable load.
    HeapObject(u32),
    /// Relative block label, used by branch and switch inputs.
    Label(u32),
    /// The current context; reloaded from the frame, never re-materialized.
    Context,
}

impl Constant {
    /// Whether materializing this constant requires a relocation entry.
    pub fn needs_relocation(&self) -> bool {
        matches!(self, Constant::External(_) | Constant::HeapObject(_))
    }
}

/// Tagged union over the locations an instruction operand can name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstructionOperand {
    /// Register operand; the bank distinguishes general purpose from
    /// float/vector.
    Reg(AsmReg),
    /// Stack slot relative to the finalized frame. Non-negative indices are
    /// spill slots below the frame pointer, negative indices are parameter
    /// slots above it.
    Slot { index: i32, width: SlotWidth },
    /// Immediate constant.
    Imm(Constant),
}

impl InstructionOperand {
    pub fn is_reg(&self) -> bool {
        matches!(self, InstructionOperand::Reg(_))
    }

    pub fn is_slot(&self) -> bool {
        matches!(self, InstructionOperand::Slot { .. })
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, InstructionOperand::Imm(_))
    }

    /// Width class of this operand for move/swap purposes.
    pub fn width(&self) -> SlotWidth {
        match self {
            InstructionOperand::Reg(r) if r.bank == 1 => SlotWidth::Double,
            InstructionOperand::Reg(_) => SlotWidth::Word,
            InstructionOperand::Slot { width, .. } => *width,
            InstructionOperand::Imm(_) => SlotWidth::Word,
        }
    }
}

/// One relocation required by the register allocator: dst receives src.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOp {
    pub src: InstructionOperand,
    pub dst: InstructionOperand,
}

/// A set of relocations that must take effect as if simultaneous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelMove {
    pub moves: Vec<MoveOp>,
}

impl ParallelMove {
    pub fn new(moves: Vec<MoveOp>) -> Self {
        Self { moves }
    }
}

/// Gap position of a parallel move relative to its instruction.
pub const GAP_START: usize = 0;
pub const GAP_END: usize = 1;

/// One machine-independent instruction as produced by the upstream
/// selection/allocation stage. Read-only to the code generator.
#[derive(Debug, Clone)]
pub struct Instruction {
    code: InstructionCode,
    outputs: Vec<InstructionOperand>,
    inputs: Vec<InstructionOperand>,
    temps: Vec<InstructionOperand>,
    gap_moves: [Option<ParallelMove>; 2],
    /// Statically known inclusive-exclusive range of an index input, supplied
    /// by the upstream type lattice for checked accesses.
    index_range: Option<(i64, i64)>,
}

impl Instruction {
    pub fn new(
        code: impl Into<InstructionCode>,
        outputs: Vec<InstructionOperand>,
        inputs: Vec<InstructionOperand>,
    ) -> Self {
        Self {
            code: code.into(),
            outputs,
            inputs,
            temps: Vec::new(),
            gap_moves: [None, None],
            index_range: None,
        }
    }

    pub fn with_temps(mut self, temps: Vec<InstructionOperand>) -> Self {
        self.temps = temps;
        self
    }

    pub fn with_gap_move(mut self, position: usize, moves: ParallelMove) -> Self {
        assert!(position <= GAP_END, "invalid gap position: {position}");
        self.gap_moves[position] = Some(moves);
        self
    }

    pub fn with_index_range(mut self, lo: i64, hi: i64) -> Self {
        self.index_range = Some((lo, hi));
        self
    }

    pub fn code(&self) -> InstructionCode {
        self.code
    }

    pub fn opcode(&self) -> Opcode {
        self.code.opcode()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Input operand accessor; out-of-range access is an upstream bug.
    pub fn input_at(&self, index: usize) -> &InstructionOperand {
        self.inputs.get(index).unwrap_or_else(|| {
            panic!(
                "{:?}: input {index} out of range ({} inputs)",
                self.opcode(),
                self.inputs.len()
            )
        })
    }

    /// Output operand accessor; out-of-range access is an upstream bug.
    pub fn output_at(&self, index: usize) -> &InstructionOperand {
        self.outputs.get(index).unwrap_or_else(|| {
            panic!(
                "{:?}: output {index} out of range ({} outputs)",
                self.opcode(),
                self.outputs.len()
            )
        })
    }

    pub fn temp_at(&self, index: usize) -> &InstructionOperand {
        self.temps.get(index).unwrap_or_else(|| {
            panic!(
                "{:?}: temp {index} out of range ({} temps)",
                self.opcode(),
                self.temps.len()
            )
        })
    }

    pub fn gap_move(&self, position: usize) -> Option<&ParallelMove> {
        self.gap_moves[position].as_ref()
    }

    pub fn index_range(&self) -> Option<(i64, i64)> {
        self.index_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_code_round_trip() {
        // Every (opcode, mode, flags mode, condition) combination must decode
        // back to the exact triple it encoded.
        for op_bits in 0..Opcode::COUNT {
            let opcode = Opcode::from_bits(op_bits);
            for mode_bits in 0..AddressingMode::COUNT {
                let mode = AddressingMode::from_bits(mode_bits);
                for fm_bits in 0..FlagsMode::COUNT {
                    let flags_mode = FlagsMode::from_bits(fm_bits);
                    for fc_bits in 0..FlagsCondition::COUNT {
                        let cond = FlagsCondition::from_bits(fc_bits);
                        let code = InstructionCode::encode(opcode, mode, flags_mode, cond);
                        assert_eq!(code.opcode(), opcode);
                        assert_eq!(code.addressing_mode(), mode);
                        assert_eq!(code.flags_mode(), flags_mode);
                        assert_eq!(code.flags_condition(), cond);
                    }
                }
            }
        }
    }

    #[test]
    fn test_misc_field_round_trip() {
        let code = InstructionCode::encode(
            Opcode::TableSwitch,
            AddressingMode::None,
            FlagsMode::None,
            FlagsCondition::Equal,
        )
        .with_misc(0xabc);
        assert_eq!(code.misc(), 0xabc);
        assert_eq!(code.opcode(), Opcode::TableSwitch);
        // Re-setting misc replaces, not ors.
        assert_eq!(code.with_misc(0x5).misc(), 0x5);
    }

    #[test]
    #[should_panic(expected = "misc field overflow")]
    fn test_misc_field_overflow_panics() {
        let _ = InstructionCode::from(Opcode::Nop).with_misc(0x1000);
    }

    #[test]
    fn test_addressing_mode_helpers() {
        assert!(AddressingMode::MR4I.has_base());
        assert!(AddressingMode::MR4I.has_index());
        assert_eq!(AddressingMode::MR4I.scale(), 4);
        assert!(!AddressingMode::M8I.has_base());
        assert_eq!(AddressingMode::M8I.scale(), 8);
        assert!(!AddressingMode::MR.has_displacement());
        assert!(AddressingMode::MRI.has_displacement());
        assert!(!AddressingMode::Absolute.has_base());
        assert!(!AddressingMode::Absolute.has_index());
    }

    #[test]
    fn test_condition_negation_is_involutive() {
        for bits in 0..FlagsCondition::COUNT {
            let cond = FlagsCondition::from_bits(bits);
            assert_eq!(cond.negate().negate(), cond);
        }
    }

    #[test]
    fn test_instruction_accessors() {
        let rax = AsmReg::new(0, 0);
        let instr = Instruction::new(
            Opcode::Add32,
            vec![InstructionOperand::Reg(rax)],
            vec![
                InstructionOperand::Reg(rax),
                InstructionOperand::Imm(Constant::Int32(7)),
            ],
        );
        assert_eq!(instr.opcode(), Opcode::Add32);
        assert!(instr.output_at(0).is_reg());
        assert!(instr.input_at(1).is_imm());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_instruction_bad_input_panics() {
        let instr = Instruction::new(Opcode::Nop, vec![], vec![]);
        let _ = instr.input_at(0);
    }
}
