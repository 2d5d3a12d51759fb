// 32-bit instantiation of the target contract. Eight general purpose and
// eight XMM registers; esi and xmm7 are reserved as scratch by contract with
// the upstream allocator. Only eax, ecx, edx and ebx expose a low-byte view,
// which the control-flow assembler consults when materializing booleans. The
// deoptimization patch size is the length of a direct call with a 32-bit
// displacement.

//! 32-bit target instantiation.

use super::{AsmReg, RegBitSet, TargetIsa, BANK_GP};

/// ESP register id.
pub const ESP: u8 = 4;
/// EBP register id.
pub const EBP: u8 = 5;
/// ESI, the reserved scratch register.
pub const SCRATCH: u8 = 6;

/// The 32-bit target.
pub struct Ia32;

impl TargetIsa for Ia32 {
    fn name(&self) -> &'static str {
        "ia32"
    }

    fn bitness(&self) -> u32 {
        32
    }

    fn pointer_size(&self) -> u32 {
        4
    }

    fn num_gp_regs(&self) -> u8 {
        8
    }

    fn num_fp_regs(&self) -> u8 {
        8
    }

    fn frame_pointer(&self) -> AsmReg {
        AsmReg::gp(EBP)
    }

    fn stack_pointer(&self) -> AsmReg {
        AsmReg::gp(ESP)
    }

    fn scratch_gp(&self) -> AsmReg {
        AsmReg::gp(SCRATCH)
    }

    fn scratch_fp(&self) -> AsmReg {
        AsmReg::fp(7)
    }

    fn is_byte_addressable(&self, reg: AsmReg) -> bool {
        // Only eax, ecx, edx, ebx have 8-bit views without REX.
        reg.bank == BANK_GP && reg.id < 4
    }

    fn callee_saved(&self) -> RegBitSet {
        // ebx, edi; esi is the reserved scratch, ebp the frame pointer.
        RegBitSet::from_ids(BANK_GP, &[3, 7])
    }

    fn deopt_patch_size(&self) -> u32 {
        // call rel32.
        5
    }
}
