// This module defines the per-function stack frame descriptor consumed by the
// prologue/epilogue builder and the operand resolver. Frame carries the spill
// slot count computed by the upstream register allocator, the callee-saved set,
// the calling convention kind (raw-address, managed, stub) and whether the
// function is entered via on-stack replacement. The frame is finalized exactly
// once during prologue emission; slot offset queries before finalization are an
// internal contract violation and abort. Offset arithmetic distinguishes spill
// slots below the frame pointer from parameter slots above it, and accounts for
// the standard frame fields (context, marker) pushed by the managed and stub
// conventions or the callee-saved pushes of the raw-address convention.

//! Per-function frame layout.

use crate::isa::{AsmReg, RegBitSet};

/// Calling convention of the function being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConvention {
    /// Plain native code: callee-saved registers are preserved explicitly.
    RawAddress,
    /// Managed function frame with standard context/marker fields.
    Managed,
    /// Stub frame: standard fields, no parameter pop on return.
    Stub,
}

/// Standard frame fields pushed below the saved frame pointer by the managed
/// and stub conventions: context and frame marker.
pub const STANDARD_FRAME_SLOTS: u32 = 2;

/// Slot index (below fp, in slots) of the saved context in managed frames.
pub const CONTEXT_SLOT: i32 = 1;

/// Per-function frame descriptor.
///
/// The spill slot count is computed by the upstream allocator; this subsystem
/// only consumes it. `finalize` is called exactly once by the prologue
/// builder, after which slot offsets become valid.
#[derive(Debug, Clone)]
pub struct Frame {
    convention: CallConvention,
    parameter_count: u32,
    spill_slot_count: u32,
    callee_saved: RegBitSet,
    is_osr: bool,
    /// Slots already present in the unoptimized frame an OSR entry reuses.
    osr_inherited_slots: u32,
    /// Number of callee-saved registers actually pushed; set at finalization.
    saved_reg_count: u32,
    finalized: bool,
}

impl Frame {
    pub fn new(convention: CallConvention, parameter_count: u32, spill_slot_count: u32) -> Self {
        Self {
            convention,
            parameter_count,
            spill_slot_count,
            callee_saved: RegBitSet::new(),
            is_osr: false,
            osr_inherited_slots: 0,
            saved_reg_count: 0,
            finalized: false,
        }
    }

    pub fn with_callee_saved(mut self, set: RegBitSet) -> Self {
        self.callee_saved = set;
        self
    }

    pub fn with_osr_entry(mut self, inherited_slots: u32) -> Self {
        self.is_osr = true;
        self.osr_inherited_slots = inherited_slots;
        self
    }

    pub fn convention(&self) -> CallConvention {
        self.convention
    }

    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    pub fn spill_slot_count(&self) -> u32 {
        self.spill_slot_count
    }

    pub fn is_osr(&self) -> bool {
        self.is_osr
    }

    pub fn osr_inherited_slots(&self) -> u32 {
        self.osr_inherited_slots
    }

    pub fn callee_saved(&self) -> &RegBitSet {
        &self.callee_saved
    }

    /// Callee-saved registers in push order (ascending id).
    pub fn callee_saved_list(&self, num_gp_regs: u8) -> Vec<AsmReg> {
        let mut regs = Vec::new();
        for id in 0..num_gp_regs {
            let reg = AsmReg::new(0, id);
            if self.callee_saved.contains(reg) {
                regs.push(reg);
            }
        }
        regs
    }

    /// Mark the layout complete. Called exactly once by the prologue builder.
    pub fn finalize(&mut self, saved_reg_count: u32) {
        assert!(!self.finalized, "frame finalized twice");
        self.saved_reg_count = saved_reg_count;
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Slots between the frame pointer and the first spill slot: standard
    /// fields for managed/stub frames, pushed callee-saved registers for
    /// raw-address frames.
    pub fn fixed_slot_count(&self) -> u32 {
        assert!(self.finalized, "frame layout queried before finalization");
        match self.convention {
            CallConvention::RawAddress => self.saved_reg_count,
            CallConvention::Managed | CallConvention::Stub => STANDARD_FRAME_SLOTS,
        }
    }

    /// Frame-pointer-relative byte offset of a stack slot.
    ///
    /// Non-negative indices are spill slots below fp; negative indices are
    /// parameter slots above fp (past the saved fp and return address).
    pub fn slot_offset(&self, index: i32, slot_size: u32) -> i32 {
        assert!(self.finalized, "slot offset queried before finalization");
        if index >= 0 {
            assert!(
                (index as u32) < self.spill_slot_count,
                "spill slot {index} out of range ({} slots)",
                self.spill_slot_count
            );
            -((self.fixed_slot_count() + index as u32 + 1) as i32) * slot_size as i32
        } else {
            let param = -index - 1;
            assert!(
                (param as u32) < self.parameter_count,
                "parameter slot {param} out of range ({} parameters)",
                self.parameter_count
            );
            // Saved fp at [fp], return address at [fp + slot], then parameters.
            (2 + param) * slot_size as i32
        }
    }

    /// Byte offset of the saved context in a managed or stub frame.
    pub fn context_offset(&self, slot_size: u32) -> i32 {
        assert!(
            matches!(
                self.convention,
                CallConvention::Managed | CallConvention::Stub
            ),
            "context slot only exists in managed and stub frames"
        );
        -CONTEXT_SLOT * slot_size as i32
    }

    /// Spill area size in bytes reserved by the prologue. OSR entries only
    /// reserve the slots not already present in the unoptimized frame.
    pub fn spill_reservation(&self, slot_size: u32) -> u32 {
        let slots = if self.is_osr {
            self.spill_slot_count.saturating_sub(self.osr_inherited_slots)
        } else {
            self.spill_slot_count
        };
        slots * slot_size
    }

    /// Bytes of parameters the return sequence pops, per convention.
    pub fn pop_bytes_on_return(&self, pointer_size: u32) -> u32 {
        match self.convention {
            CallConvention::Managed => self.parameter_count * pointer_size,
            CallConvention::RawAddress | CallConvention::Stub => 0,
        }
    }
}
