// 64-bit instantiation of the target contract. Sixteen general purpose and
// sixteen XMM registers; r10 and xmm15 are reserved as scratch and never
// allocated upstream. The callee-saved set follows the native convention
// (rbx, r12-r15). The deoptimization patch size covers the widest call
// sequence the runtime patches in place: a 10-byte mov of a 64-bit entry
// address into the scratch register plus a 3-byte indirect call.

//! 64-bit target instantiation.

use super::{AsmReg, RegBitSet, TargetIsa, BANK_GP};

/// RSP register id.
pub const RSP: u8 = 4;
/// RBP register id.
pub const RBP: u8 = 5;
/// R10, the reserved scratch register.
pub const SCRATCH: u8 = 10;

/// The 64-bit target.
pub struct X64;

impl TargetIsa for X64 {
    fn name(&self) -> &'static str {
        "x64"
    }

    fn bitness(&self) -> u32 {
        64
    }

    fn pointer_size(&self) -> u32 {
        8
    }

    fn num_gp_regs(&self) -> u8 {
        16
    }

    fn num_fp_regs(&self) -> u8 {
        16
    }

    fn frame_pointer(&self) -> AsmReg {
        AsmReg::gp(RBP)
    }

    fn stack_pointer(&self) -> AsmReg {
        AsmReg::gp(RSP)
    }

    fn scratch_gp(&self) -> AsmReg {
        AsmReg::gp(SCRATCH)
    }

    fn scratch_fp(&self) -> AsmReg {
        AsmReg::fp(15)
    }

    fn is_byte_addressable(&self, reg: AsmReg) -> bool {
        // With a REX prefix every GP register has a low-byte view.
        reg.bank == BANK_GP && reg.id < 16
    }

    fn callee_saved(&self) -> RegBitSet {
        RegBitSet::from_ids(BANK_GP, &[3, 12, 13, 14, 15])
    }

    fn deopt_patch_size(&self) -> u32 {
        // mov r10, imm64 (10 bytes) + call r10 (3 bytes).
        13
    }
}
