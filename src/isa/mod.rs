// This module defines the abstract target contract the generic code generator
// is written against. AsmReg is the compact (bank, id) register identifier and
// RegBitSet an efficient register set, both shared with the upstream register
// allocator. TargetIsa describes one architecture instantiation: bitness,
// pointer and slot sizes, register counts, the reserved scratch registers,
// byte-addressability of general purpose registers, the callee-saved set and
// the deoptimization patch size. Two instantiations exist, X64 and Ia32, which
// are near-duplicates at the hardware level and differ only in these
// parameters; the instruction emitter, control-flow assembler and move/swap
// resolver never depend on either one directly. ScratchPair models the fixed
// hardware scratch registers as an explicitly owned token that emission paths
// must receive by mutable reference, keeping the shared-resource discipline
// visible in the type system.

//! Target instruction set contract.
//!
//! [`TargetIsa`] is the seam between the generic emitter and a concrete
//! architecture; [`X64`] and [`Ia32`] are its two instantiations.

mod ia32;
mod x64;

pub use ia32::Ia32;
pub use x64::X64;

/// Maximum number of register banks supported (GP, FP).
pub const MAX_REGISTER_BANKS: usize = 2;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// General purpose register bank.
pub const BANK_GP: RegBank = 0;
/// Float/vector register bank.
pub const BANK_FP: RegBank = 1;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn gp(id: RegId) -> Self {
        Self::new(BANK_GP, id)
    }

    pub const fn fp(id: RegId) -> Self {
        Self::new(BANK_FP, id)
    }

    pub fn is_gp(&self) -> bool {
        self.bank == BANK_GP
    }

    pub fn is_fp(&self) -> bool {
        self.bank == BANK_FP
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegBitSet {
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    /// Create a set from explicit register ids in one bank.
    pub fn from_ids(bank: RegBank, ids: &[RegId]) -> Self {
        let mut set = Self::new();
        for &id in ids {
            set.set(AsmReg::new(bank, id));
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Count number of set registers in bank.
    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        if bank as usize >= MAX_REGISTER_BANKS {
            return 0;
        }
        self.banks[bank as usize].count_ones()
    }
}

/// One concrete architecture instantiation of the shared backend contract.
///
/// Implementations describe only the register environment and size
/// parameters; all emission logic lives in the generic components.
pub trait TargetIsa {
    /// Human-readable target name for diagnostics.
    fn name(&self) -> &'static str;

    /// Assembler bitness (32 or 64).
    fn bitness(&self) -> u32;

    /// Size of a pointer in bytes.
    fn pointer_size(&self) -> u32;

    /// Size of one stack slot in bytes (equals the pointer size).
    fn slot_size(&self) -> u32 {
        self.pointer_size()
    }

    /// Number of addressable general purpose registers.
    fn num_gp_regs(&self) -> u8;

    /// Number of addressable float/vector registers.
    fn num_fp_regs(&self) -> u8;

    /// The frame pointer register.
    fn frame_pointer(&self) -> AsmReg;

    /// The stack pointer register.
    fn stack_pointer(&self) -> AsmReg;

    /// The reserved general purpose scratch register. Never handed out by
    /// the upstream allocator.
    fn scratch_gp(&self) -> AsmReg;

    /// The reserved float/vector scratch register.
    fn scratch_fp(&self) -> AsmReg;

    /// Whether setcc can target the low byte of this register directly.
    fn is_byte_addressable(&self, reg: AsmReg) -> bool;

    /// Callee-saved registers of the raw-address convention.
    fn callee_saved(&self) -> RegBitSet;

    /// Bytes a lazily patchable call site must keep free before itself so the
    /// runtime can patch the call in place.
    fn deopt_patch_size(&self) -> u32;

    /// Whether 64-bit general purpose operations exist on this target.
    fn supports_word64(&self) -> bool {
        self.bitness() == 64
    }
}

/// Owned token for the fixed scratch registers shared by several emission
/// paths (stack-to-stack moves, swaps, slow conversions, relocatable loads).
///
/// Exclusive use is guaranteed by the single-pass, single-threaded model, but
/// the token keeps ownership visible: every routine that clobbers a scratch
/// register takes this by `&mut`.
#[derive(Debug)]
pub struct ScratchPair {
    gp: AsmReg,
    fp: AsmReg,
}

impl ScratchPair {
    pub fn new(isa: &dyn TargetIsa) -> Self {
        Self {
            gp: isa.scratch_gp(),
            fp: isa.scratch_fp(),
        }
    }

    pub fn gp(&mut self) -> AsmReg {
        self.gp
    }

    pub fn fp(&mut self) -> AsmReg {
        self.fp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regbitset_operations() {
        let mut set = RegBitSet::new();
        let reg = AsmReg::new(0, 5);

        assert!(!set.contains(reg));
        set.set(reg);
        assert!(set.contains(reg));
        set.clear(reg);
        assert!(!set.contains(reg));
    }

    #[test]
    fn test_regbitset_from_ids() {
        let set = RegBitSet::from_ids(BANK_GP, &[3, 12, 13]);
        assert!(set.contains(AsmReg::gp(3)));
        assert!(set.contains(AsmReg::gp(12)));
        assert!(!set.contains(AsmReg::gp(4)));
        assert_eq!(set.count_in_bank(BANK_GP), 3);
        assert_eq!(set.count_in_bank(BANK_FP), 0);
    }

    #[test]
    fn test_target_parameters() {
        let x64 = X64;
        assert_eq!(x64.bitness(), 64);
        assert_eq!(x64.pointer_size(), 8);
        assert_eq!(x64.num_gp_regs(), 16);
        assert!(x64.supports_word64());

        let ia32 = Ia32;
        assert_eq!(ia32.bitness(), 32);
        assert_eq!(ia32.pointer_size(), 4);
        assert_eq!(ia32.num_gp_regs(), 8);
        assert!(!ia32.supports_word64());
    }

    #[test]
    fn test_scratch_not_frame_or_stack_pointer() {
        for isa in [&X64 as &dyn TargetIsa, &Ia32 as &dyn TargetIsa] {
            assert_ne!(isa.scratch_gp(), isa.frame_pointer());
            assert_ne!(isa.scratch_gp(), isa.stack_pointer());
            assert!(isa.scratch_gp().is_gp());
            assert!(isa.scratch_fp().is_fp());
        }
    }

    #[test]
    fn test_byte_addressability() {
        let x64 = X64;
        // All GP registers are byte addressable in 64-bit mode.
        for id in 0..16 {
            assert!(x64.is_byte_addressable(AsmReg::gp(id)));
        }
        let ia32 = Ia32;
        // Only eax, ecx, edx, ebx have byte views in 32-bit mode.
        assert!(ia32.is_byte_addressable(AsmReg::gp(0)));
        assert!(ia32.is_byte_addressable(AsmReg::gp(3)));
        assert!(!ia32.is_byte_addressable(AsmReg::gp(6)));
        assert!(!ia32.is_byte_addressable(AsmReg::gp(7)));
    }
}
