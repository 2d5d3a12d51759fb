// This module provides the machine-code emission layer using the iced-x86
// library. MacroAssembler wraps CodeAssembler behind AsmReg-typed methods and
// serves both target instantiations: it is constructed at 64- or 32-bit
// bitness and converts (bank, id) register identifiers through constant tables
// into the typed iced-x86 registers of the right width. It covers moves,
// zero/sign extension, the ALU family, shifts, LEA, stack manipulation,
// conditional jumps and setcc for condition materialization, the SSE2 scalar
// and 128-bit vector subsets the emitter needs, raw table-driven vector
// emission via Code values, label management, and data directives for jump
// tables. The assembler also counts emitted instructions as a lower bound on
// byte distance (every instruction encodes to at least one byte, a NOP to
// exactly one), which the deoptimization support uses for call-site padding.
// finalize() assembles at base zero and returns a handle that resolves labels
// to code offsets for the relocation, jump-table and deopt-site tables.

//! x86 instruction encoding using iced-x86.
//!
//! One wrapper serves both target instantiations; only the bitness and the
//! register conversion width differ. Requesting a 64-bit GP operation on the
//! 32-bit target, or a register id outside the target's file, is an internal
//! contract violation and aborts.

use crate::core::error::{CodegenError, CodegenResult};
use crate::isa::AsmReg;
use iced_x86::code_asm::{registers::cl, *};
use iced_x86::{BlockEncoderOptions, IcedError};

/// Operand size for GP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSize {
    S8,
    S16,
    S32,
    S64,
}

/// Condition codes at the assembler level. The mapping from abstract flag
/// conditions lives in the control-flow assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    E,
    Ne,
    L,
    Ge,
    Le,
    G,
    B,
    Ae,
    Be,
    A,
    O,
    No,
    /// Parity even: set after a float compare with a NaN operand.
    P,
    Np,
}

/// An abstract memory operand; converted to the target's addressing form at
/// emission time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mem {
    pub base: Option<AsmReg>,
    pub index: Option<AsmReg>,
    pub scale: u32,
    pub disp: i32,
    /// Absolute address; only valid when base and index are absent.
    pub abs: Option<u64>,
}

impl Mem {
    pub fn base(base: AsmReg) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            disp: 0,
            abs: None,
        }
    }

    pub fn base_disp(base: AsmReg, disp: i32) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            disp,
            abs: None,
        }
    }

    pub fn base_index(base: AsmReg, index: AsmReg, scale: u32, disp: i32) -> Self {
        Self {
            base: Some(base),
            index: Some(index),
            scale,
            disp,
            abs: None,
        }
    }

    pub fn index_only(index: AsmReg, scale: u32, disp: i32) -> Self {
        Self {
            base: None,
            index: Some(index),
            scale,
            disp,
            abs: None,
        }
    }

    pub fn absolute(addr: u64) -> Self {
        Self {
            base: None,
            index: None,
            scale: 1,
            disp: 0,
            abs: Some(addr),
        }
    }
}

const GP64_REGS: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];

const GP32_REGS: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];

const GP16_REGS: [AsmRegister16; 16] = [
    ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
];

const GP8_REGS: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];

const XMM_REGS: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14,
    xmm15,
];

/// Applies the access-size tag to a memory operand expression.
macro_rules! sized_ptr {
    ($size:expr, $expr:expr) => {
        match $size {
            OpSize::S8 => byte_ptr($expr),
            OpSize::S16 => word_ptr($expr),
            OpSize::S32 => dword_ptr($expr),
            OpSize::S64 => qword_ptr($expr),
        }
    };
}

/// x86 macro-assembler shared by both target instantiations.
pub struct MacroAssembler {
    asm: CodeAssembler,
    bitness: u32,
    /// Number of instructions emitted so far; ≥1 byte each, NOPs exactly one.
    instr_count: usize,
    /// A label was bound since the last instruction; the next bind needs a
    /// zero-width separator (iced allows one label per instruction).
    label_pending: bool,
}

impl MacroAssembler {
    pub fn new(bitness: u32) -> CodegenResult<Self> {
        assert!(bitness == 32 || bitness == 64, "unsupported bitness: {bitness}");
        let asm = CodeAssembler::new(bitness)?;
        Ok(Self {
            asm,
            bitness,
            instr_count: 0,
            label_pending: false,
        })
    }

    pub fn bitness(&self) -> u32 {
        self.bitness
    }

    /// Operand size of a pointer on this target.
    pub fn ptr_size(&self) -> OpSize {
        if self.bitness == 64 {
            OpSize::S64
        } else {
            OpSize::S32
        }
    }

    /// Lower bound tracker for byte distances; see the deopt support.
    pub fn instrs_emitted(&self) -> usize {
        self.instr_count
    }

    fn emitted(&mut self) {
        self.instr_count += 1;
        self.label_pending = false;
    }

    // ==== REGISTER CONVERSION ====

    fn check_gp(&self, reg: AsmReg) -> usize {
        assert!(reg.is_gp(), "expected GP register, got {reg:?}");
        let limit = if self.bitness == 64 { 16 } else { 8 };
        assert!((reg.id as usize) < limit, "GP register id out of range: {reg:?}");
        reg.id as usize
    }

    fn gp64(&self, reg: AsmReg) -> AsmRegister64 {
        assert!(self.bitness == 64, "64-bit GP operand on 32-bit target: {reg:?}");
        GP64_REGS[self.check_gp(reg)]
    }

    fn gp32(&self, reg: AsmReg) -> AsmRegister32 {
        GP32_REGS[self.check_gp(reg)]
    }

    fn gp16(&self, reg: AsmReg) -> AsmRegister16 {
        GP16_REGS[self.check_gp(reg)]
    }

    fn gp8(&self, reg: AsmReg) -> AsmRegister8 {
        let idx = self.check_gp(reg);
        assert!(
            self.bitness == 64 || idx < 4,
            "register has no byte view on this target: {reg:?}"
        );
        GP8_REGS[idx]
    }

    fn xmm(&self, reg: AsmReg) -> AsmRegisterXmm {
        assert!(reg.is_fp(), "expected FP register, got {reg:?}");
        let limit = if self.bitness == 64 { 16 } else { 8 };
        assert!((reg.id as usize) < limit, "FP register id out of range: {reg:?}");
        XMM_REGS[reg.id as usize]
    }

    fn mem(&self, size: OpSize, m: &Mem) -> AsmMemoryOperand {
        if let Some(addr) = m.abs {
            assert!(m.base.is_none() && m.index.is_none(), "absolute operand with registers");
            return sized_ptr!(size, addr);
        }
        if self.bitness == 64 {
            let disp = m.disp;
            match (m.base.map(|b| self.gp64(b)), m.index.map(|i| self.gp64(i))) {
                (Some(b), Some(i)) => match m.scale {
                    1 => sized_ptr!(size, b + i + disp),
                    2 => sized_ptr!(size, b + i * 2 + disp),
                    4 => sized_ptr!(size, b + i * 4 + disp),
                    8 => sized_ptr!(size, b + i * 8 + disp),
                    s => panic!("invalid scale: {s}"),
                },
                (Some(b), None) => sized_ptr!(size, b + disp),
                (None, Some(i)) => match m.scale {
                    1 => sized_ptr!(size, i + disp),
                    2 => sized_ptr!(size, i * 2 + disp),
                    4 => sized_ptr!(size, i * 4 + disp),
                    8 => sized_ptr!(size, i * 8 + disp),
                    s => panic!("invalid scale: {s}"),
                },
                (None, None) => panic!("memory operand without base, index or address"),
            }
        } else {
            let disp = m.disp;
            match (m.base.map(|b| self.gp32(b)), m.index.map(|i| self.gp32(i))) {
                (Some(b), Some(i)) => match m.scale {
                    1 => sized_ptr!(size, b + i + disp),
                    2 => sized_ptr!(size, b + i * 2 + disp),
                    4 => sized_ptr!(size, b + i * 4 + disp),
                    8 => sized_ptr!(size, b + i * 8 + disp),
                    s => panic!("invalid scale: {s}"),
                },
                (Some(b), None) => sized_ptr!(size, b + disp),
                (None, Some(i)) => match m.scale {
                    1 => sized_ptr!(size, i + disp),
                    2 => sized_ptr!(size, i * 2 + disp),
                    4 => sized_ptr!(size, i * 4 + disp),
                    8 => sized_ptr!(size, i * 8 + disp),
                    s => panic!("invalid scale: {s}"),
                },
                (None, None) => panic!("memory operand without base, index or address"),
            }
        }
    }

    fn xmm_mem(&self, m: &Mem) -> AsmMemoryOperand {
        // Size tag is irrelevant for xmm moves; iced infers it from the
        // register operand.
        self.mem(if self.bitness == 64 { OpSize::S64 } else { OpSize::S32 }, m)
    }

    fn enc(&mut self, r: Result<(), IcedError>) -> CodegenResult<()> {
        r.map_err(CodegenError::from)?;
        self.emitted();
        Ok(())
    }

    // ==== LABELS AND DATA ====

    pub fn create_label(&mut self) -> CodeLabel {
        self.asm.create_label()
    }

    /// Place a label at the current position.
    pub fn bind(&mut self, label: &mut CodeLabel) -> CodegenResult<()> {
        if self.label_pending {
            // iced attaches one label per instruction; separate with a
            // zero-width directive.
            self.asm.zero_bytes().map_err(CodegenError::from)?;
        }
        self.asm.set_label(label).map_err(|e| CodegenError::Label {
            reason: e.to_string(),
        })?;
        self.label_pending = true;
        Ok(())
    }

    /// Emit one pointer-sized zero data entry (jump table placeholder).
    pub fn data_ptr_zero(&mut self) -> CodegenResult<()> {
        if self.bitness == 64 {
            self.asm.dq(&[0u64]).map_err(CodegenError::from)?;
        } else {
            self.asm.dd(&[0u32]).map_err(CodegenError::from)?;
        }
        self.label_pending = false;
        Ok(())
    }

    pub fn nop(&mut self) -> CodegenResult<()> {
        let r = self.asm.nop();
        self.enc(r)
    }

    // ==== MOVES ====

    pub fn mov_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S8 => {
                let (d, s) = (self.gp8(dst), self.gp8(src));
                self.asm.mov(d, s)
            }
            OpSize::S16 => {
                let (d, s) = (self.gp16(dst), self.gp16(src));
                self.asm.mov(d, s)
            }
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.mov(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.mov(d, s)
            }
        };
        self.enc(r)
    }

    pub fn mov_ri(&mut self, size: OpSize, dst: AsmReg, imm: i64) -> CodegenResult<()> {
        let r = match size {
            OpSize::S8 => {
                let d = self.gp8(dst);
                self.asm.mov(d, imm as i32)
            }
            OpSize::S16 => {
                let d = self.gp16(dst);
                self.asm.mov(d, imm as i32)
            }
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.mov(d, imm as i32)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.mov(d, imm)
            }
        };
        self.enc(r)
    }

    pub fn mov_rm(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S8 => {
                let d = self.gp8(dst);
                self.asm.mov(d, mem)
            }
            OpSize::S16 => {
                let d = self.gp16(dst);
                self.asm.mov(d, mem)
            }
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.mov(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.mov(d, mem)
            }
        };
        self.enc(r)
    }

    pub fn mov_mr(&mut self, size: OpSize, m: &Mem, src: AsmReg) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S8 => {
                let s = self.gp8(src);
                self.asm.mov(mem, s)
            }
            OpSize::S16 => {
                let s = self.gp16(src);
                self.asm.mov(mem, s)
            }
            OpSize::S32 => {
                let s = self.gp32(src);
                self.asm.mov(mem, s)
            }
            OpSize::S64 => {
                let s = self.gp64(src);
                self.asm.mov(mem, s)
            }
        };
        self.enc(r)
    }

    pub fn mov_mi(&mut self, size: OpSize, m: &Mem, imm: i32) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = self.asm.mov(mem, imm);
        self.enc(r)
    }

    // ==== LOADS WITH EXTENSION ====

    pub fn load8u(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(OpSize::S8, m);
        let d = self.gp32(dst);
        let r = self.asm.movzx(d, mem);
        self.enc(r)
    }

    pub fn load8s(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(OpSize::S8, m);
        let d = self.gp32(dst);
        let r = self.asm.movsx(d, mem);
        self.enc(r)
    }

    pub fn load16u(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(OpSize::S16, m);
        let d = self.gp32(dst);
        let r = self.asm.movzx(d, mem);
        self.enc(r)
    }

    pub fn load16s(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(OpSize::S16, m);
        let d = self.gp32(dst);
        let r = self.asm.movsx(d, mem);
        self.enc(r)
    }

    /// Zero-extending byte-to-dword register move, used when materializing
    /// booleans from setcc results.
    pub fn movzx_b_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.gp32(dst), self.gp8(src));
        let r = self.asm.movzx(d, s);
        self.enc(r)
    }

    // ==== ALU ====

    pub fn add_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.add(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.add(d, s)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn add_ri(&mut self, size: OpSize, dst: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.add(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.add(d, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn add_rm(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.add(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.add(d, mem)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn sub_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.sub(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.sub(d, s)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn sub_ri(&mut self, size: OpSize, dst: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.sub(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.sub(d, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn sub_rm(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.sub(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.sub(d, mem)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn and_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.and(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.and(d, s)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn and_ri(&mut self, size: OpSize, dst: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.and(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.and(d, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn and_rm(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.and(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.and(d, mem)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn or_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.or(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.or(d, s)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn or_ri(&mut self, size: OpSize, dst: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.or(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.or(d, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn or_rm(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.or(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.or(d, mem)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn xor_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.xor(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.xor(d, s)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn xor_ri(&mut self, size: OpSize, dst: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.xor(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.xor(d, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn xor_rm(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.xor(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.xor(d, mem)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn cmp_rr(&mut self, size: OpSize, left: AsmReg, right: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (l, rr) = (self.gp32(left), self.gp32(right));
                self.asm.cmp(l, rr)
            }
            OpSize::S64 => {
                let (l, rr) = (self.gp64(left), self.gp64(right));
                self.asm.cmp(l, rr)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn cmp_ri(&mut self, size: OpSize, left: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let l = self.gp32(left);
                self.asm.cmp(l, imm)
            }
            OpSize::S64 => {
                let l = self.gp64(left);
                self.asm.cmp(l, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn cmp_rm(&mut self, size: OpSize, left: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let l = self.gp32(left);
                self.asm.cmp(l, mem)
            }
            OpSize::S64 => {
                let l = self.gp64(left);
                self.asm.cmp(l, mem)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn test_rr(&mut self, size: OpSize, left: AsmReg, right: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (l, rr) = (self.gp32(left), self.gp32(right));
                self.asm.test(l, rr)
            }
            OpSize::S64 => {
                let (l, rr) = (self.gp64(left), self.gp64(right));
                self.asm.test(l, rr)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn test_ri(&mut self, size: OpSize, left: AsmReg, imm: i32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let l = self.gp32(left);
                self.asm.test(l, imm)
            }
            OpSize::S64 => {
                let l = self.gp64(left);
                self.asm.test(l, imm)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn imul_rr(&mut self, size: OpSize, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let (d, s) = (self.gp32(dst), self.gp32(src));
                self.asm.imul_2(d, s)
            }
            OpSize::S64 => {
                let (d, s) = (self.gp64(dst), self.gp64(src));
                self.asm.imul_2(d, s)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn neg_r(&mut self, size: OpSize, dst: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.neg(d)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.neg(d)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn not_r(&mut self, size: OpSize, dst: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.not(d)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.not(d)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn inc_r(&mut self, size: OpSize, dst: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.inc(d)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.inc(d)
            }
            _ => panic!("unsupported ALU size: {size:?}"),
        };
        self.enc(r)
    }

    /// Exchange two pointer-width GP registers.
    pub fn xchg_rr(&mut self, a: AsmReg, b: AsmReg) -> CodegenResult<()> {
        let r = if self.bitness == 64 {
            let (x, y) = (self.gp64(a), self.gp64(b));
            self.asm.xchg(x, y)
        } else {
            let (x, y) = (self.gp32(a), self.gp32(b));
            self.asm.xchg(x, y)
        };
        self.enc(r)
    }

    // ==== SHIFTS ====

    pub fn shl_cl(&mut self, size: OpSize, dst: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.shl(d, cl)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.shl(d, cl)
            }
            _ => panic!("unsupported shift size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn shr_cl(&mut self, size: OpSize, dst: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.shr(d, cl)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.shr(d, cl)
            }
            _ => panic!("unsupported shift size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn sar_cl(&mut self, size: OpSize, dst: AsmReg) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.sar(d, cl)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.sar(d, cl)
            }
            _ => panic!("unsupported shift size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn shl_ri(&mut self, size: OpSize, dst: AsmReg, imm: u32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.shl(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.shl(d, imm)
            }
            _ => panic!("unsupported shift size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn shr_ri(&mut self, size: OpSize, dst: AsmReg, imm: u32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.shr(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.shr(d, imm)
            }
            _ => panic!("unsupported shift size: {size:?}"),
        };
        self.enc(r)
    }

    pub fn sar_ri(&mut self, size: OpSize, dst: AsmReg, imm: u32) -> CodegenResult<()> {
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.sar(d, imm)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.sar(d, imm)
            }
            _ => panic!("unsupported shift size: {size:?}"),
        };
        self.enc(r)
    }

    // ==== ADDRESSES AND STACK ====

    pub fn lea(&mut self, size: OpSize, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(size, m);
        let r = match size {
            OpSize::S32 => {
                let d = self.gp32(dst);
                self.asm.lea(d, mem)
            }
            OpSize::S64 => {
                let d = self.gp64(dst);
                self.asm.lea(d, mem)
            }
            _ => panic!("unsupported lea size: {size:?}"),
        };
        self.enc(r)
    }

    /// Load the address of a label into a register.
    pub fn lea_label(&mut self, dst: AsmReg, label: CodeLabel) -> CodegenResult<()> {
        let r = if self.bitness == 64 {
            let d = self.gp64(dst);
            self.asm.lea(d, qword_ptr(label))
        } else {
            let d = self.gp32(dst);
            self.asm.lea(d, dword_ptr(label))
        };
        self.enc(r)
    }

    pub fn push_r(&mut self, reg: AsmReg) -> CodegenResult<()> {
        let r = if self.bitness == 64 {
            let s = self.gp64(reg);
            self.asm.push(s)
        } else {
            let s = self.gp32(reg);
            self.asm.push(s)
        };
        self.enc(r)
    }

    pub fn push_i(&mut self, imm: i32) -> CodegenResult<()> {
        let r = self.asm.push(imm);
        self.enc(r)
    }

    pub fn pop_r(&mut self, reg: AsmReg) -> CodegenResult<()> {
        let r = if self.bitness == 64 {
            let d = self.gp64(reg);
            self.asm.pop(d)
        } else {
            let d = self.gp32(reg);
            self.asm.pop(d)
        };
        self.enc(r)
    }

    // ==== CONTROL FLOW ====

    pub fn ret(&mut self) -> CodegenResult<()> {
        let r = self.asm.ret();
        self.enc(r)
    }

    pub fn ret_imm(&mut self, bytes: u32) -> CodegenResult<()> {
        let r = self.asm.ret_1(bytes);
        self.enc(r)
    }

    pub fn jmp(&mut self, label: CodeLabel) -> CodegenResult<()> {
        let r = self.asm.jmp(label);
        self.enc(r)
    }

    pub fn jmp_m(&mut self, m: &Mem) -> CodegenResult<()> {
        let mem = self.mem(self.ptr_size(), m);
        let r = self.asm.jmp(mem);
        self.enc(r)
    }

    pub fn call_r(&mut self, reg: AsmReg) -> CodegenResult<()> {
        let r = if self.bitness == 64 {
            let t = self.gp64(reg);
            self.asm.call(t)
        } else {
            let t = self.gp32(reg);
            self.asm.call(t)
        };
        self.enc(r)
    }

    pub fn jcc(&mut self, cc: CondCode, label: CodeLabel) -> CodegenResult<()> {
        let r = match cc {
            CondCode::E => self.asm.je(label),
            CondCode::Ne => self.asm.jne(label),
            CondCode::L => self.asm.jl(label),
            CondCode::Ge => self.asm.jge(label),
            CondCode::Le => self.asm.jle(label),
            CondCode::G => self.asm.jg(label),
            CondCode::B => self.asm.jb(label),
            CondCode::Ae => self.asm.jae(label),
            CondCode::Be => self.asm.jbe(label),
            CondCode::A => self.asm.ja(label),
            CondCode::O => self.asm.jo(label),
            CondCode::No => self.asm.jno(label),
            CondCode::P => self.asm.jp(label),
            CondCode::Np => self.asm.jnp(label),
        };
        self.enc(r)
    }

    pub fn setcc(&mut self, cc: CondCode, dst: AsmReg) -> CodegenResult<()> {
        let d = self.gp8(dst);
        let r = match cc {
            CondCode::E => self.asm.sete(d),
            CondCode::Ne => self.asm.setne(d),
            CondCode::L => self.asm.setl(d),
            CondCode::Ge => self.asm.setge(d),
            CondCode::Le => self.asm.setle(d),
            CondCode::G => self.asm.setg(d),
            CondCode::B => self.asm.setb(d),
            CondCode::Ae => self.asm.setae(d),
            CondCode::Be => self.asm.setbe(d),
            CondCode::A => self.asm.seta(d),
            CondCode::O => self.asm.seto(d),
            CondCode::No => self.asm.setno(d),
            CondCode::P => self.asm.setp(d),
            CondCode::Np => self.asm.setnp(d),
        };
        self.enc(r)
    }

    // ==== SSE SCALAR ====

    // movsd_2 is the two-operand SSE2 form; plain movsd is the string
    // instruction in iced's code_asm.
    pub fn movsd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.movsd_2(d, s);
        self.enc(r)
    }

    pub fn movsd_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.movsd_2(d, mem);
        self.enc(r)
    }

    pub fn movsd_mr(&mut self, m: &Mem, src: AsmReg) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let s = self.xmm(src);
        let r = self.asm.movsd_2(mem, s);
        self.enc(r)
    }

    pub fn movss_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.movss(d, mem);
        self.enc(r)
    }

    pub fn movss_mr(&mut self, m: &Mem, src: AsmReg) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let s = self.xmm(src);
        let r = self.asm.movss(mem, s);
        self.enc(r)
    }

    /// Register-to-register vector move; also used for scalar FP moves since
    /// it copies the full 128 bits.
    pub fn movaps_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.movaps(d, s);
        self.enc(r)
    }

    pub fn addsd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.addsd(d, s);
        self.enc(r)
    }

    pub fn addsd_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.addsd(d, mem);
        self.enc(r)
    }

    pub fn subsd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.subsd(d, s);
        self.enc(r)
    }

    pub fn subsd_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.subsd(d, mem);
        self.enc(r)
    }

    pub fn mulsd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.mulsd(d, s);
        self.enc(r)
    }

    pub fn mulsd_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.mulsd(d, mem);
        self.enc(r)
    }

    pub fn divsd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.divsd(d, s);
        self.enc(r)
    }

    pub fn divsd_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.divsd(d, mem);
        self.enc(r)
    }

    pub fn sqrtsd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.sqrtsd(d, s);
        self.enc(r)
    }

    pub fn ucomisd_rr(&mut self, left: AsmReg, right: AsmReg) -> CodegenResult<()> {
        let (l, rr) = (self.xmm(left), self.xmm(right));
        let r = self.asm.ucomisd(l, rr);
        self.enc(r)
    }

    pub fn cvttsd2si_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.gp32(dst), self.xmm(src));
        let r = self.asm.cvttsd2si(d, s);
        self.enc(r)
    }

    pub fn cvtsi2sd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.gp32(src));
        let r = self.asm.cvtsi2sd(d, s);
        self.enc(r)
    }

    /// Move a 64-bit GP value into an XMM register (64-bit target only).
    pub fn movq_xr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.gp64(src));
        let r = self.asm.movq(d, s);
        self.enc(r)
    }

    /// Move a 32-bit GP value into an XMM register.
    pub fn movd_xr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.gp32(src));
        let r = self.asm.movd(d, s);
        self.enc(r)
    }

    // ==== SSE VECTOR ====

    pub fn movdqu_rm(&mut self, dst: AsmReg, m: &Mem) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let d = self.xmm(dst);
        let r = self.asm.movdqu(d, mem);
        self.enc(r)
    }

    pub fn movdqu_mr(&mut self, m: &Mem, src: AsmReg) -> CodegenResult<()> {
        let mem = self.xmm_mem(m);
        let s = self.xmm(src);
        let r = self.asm.movdqu(mem, s);
        self.enc(r)
    }

    pub fn pcmpeqd_rr(&mut self, dst: AsmReg, src: AsmReg) -> CodegenResult<()> {
        let (d, s) = (self.xmm(dst), self.xmm(src));
        let r = self.asm.pcmpeqd(d, s);
        self.enc(r)
    }

    pub fn psrlq_ri(&mut self, dst: AsmReg, imm: u32) -> CodegenResult<()> {
        let d = self.xmm(dst);
        let r = self.asm.psrlq(d, imm);
        self.enc(r)
    }

    /// Table-driven vector emission: one raw reg-reg instruction from the
    /// opcode table, replacing a per-mnemonic method family.
    pub fn emit_vec_rr(
        &mut self,
        code: iced_x86::Code,
        dst: AsmReg,
        src: AsmReg,
    ) -> CodegenResult<()> {
        const XMM_RAW: [iced_x86::Register; 16] = [
            iced_x86::Register::XMM0,
            iced_x86::Register::XMM1,
            iced_x86::Register::XMM2,
            iced_x86::Register::XMM3,
            iced_x86::Register::XMM4,
            iced_x86::Register::XMM5,
            iced_x86::Register::XMM6,
            iced_x86::Register::XMM7,
            iced_x86::Register::XMM8,
            iced_x86::Register::XMM9,
            iced_x86::Register::XMM10,
            iced_x86::Register::XMM11,
            iced_x86::Register::XMM12,
            iced_x86::Register::XMM13,
            iced_x86::Register::XMM14,
            iced_x86::Register::XMM15,
        ];
        // Validate bank/id through the usual conversion first.
        let _ = self.xmm(dst);
        let _ = self.xmm(src);
        let instr = iced_x86::Instruction::with2(
            code,
            XMM_RAW[dst.id as usize],
            XMM_RAW[src.id as usize],
        )
        .map_err(CodegenError::from)?;
        let r = self.asm.add_instruction(instr);
        self.enc(r)
    }

    // ==== FINALIZATION ====

    /// Assemble the buffer at base address zero and return the finalized code
    /// with label offsets resolvable.
    pub fn finalize(mut self) -> CodegenResult<FinalizedCode> {
        let result = self
            .asm
            .assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)
            .map_err(|e| CodegenError::Finalize {
                reason: e.to_string(),
            })?;
        Ok(FinalizedCode { result })
    }
}

/// Assembled code buffer with resolvable label offsets.
pub struct FinalizedCode {
    result: CodeAssemblerResult,
}

impl FinalizedCode {
    pub fn bytes(&self) -> &[u8] {
        &self.result.inner.code_buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.result.inner.code_buffer
    }

    /// Code offset a label resolved to.
    pub fn label_offset(&self, label: CodeLabel) -> CodegenResult<u32> {
        let ip = self
            .result
            .label_ip(&label)
            .map_err(|e| CodegenError::Label {
                reason: e.to_string(),
            })?;
        Ok(ip as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn decode_mnemonics(bitness: u32, code: &[u8]) -> Vec<Mnemonic> {
        let mut decoder = Decoder::with_ip(bitness, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode().mnemonic());
        }
        out
    }

    #[test]
    fn test_basic_encoding() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let dst = AsmReg::gp(0);
        let src = AsmReg::gp(1);

        masm.mov_rr(OpSize::S64, dst, src).unwrap();
        masm.add_ri(OpSize::S32, dst, 42).unwrap();
        masm.ret().unwrap();
        assert_eq!(masm.instrs_emitted(), 3);

        let code = masm.finalize().unwrap();
        let mnemonics = decode_mnemonics(64, code.bytes());
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Mov, Mnemonic::Add, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_32bit_encoding() {
        let mut masm = MacroAssembler::new(32).unwrap();
        let dst = AsmReg::gp(0);
        let src = AsmReg::gp(2);

        masm.mov_ri(OpSize::S32, dst, 7).unwrap();
        masm.sub_rr(OpSize::S32, dst, src).unwrap();
        masm.ret_imm(8).unwrap();

        let code = masm.finalize().unwrap();
        let mnemonics = decode_mnemonics(32, code.bytes());
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Mov, Mnemonic::Sub, Mnemonic::Ret]
        );
    }

    #[test]
    #[should_panic(expected = "64-bit GP operand on 32-bit target")]
    fn test_word64_on_ia32_panics() {
        let mut masm = MacroAssembler::new(32).unwrap();
        let _ = masm.mov_rr(OpSize::S64, AsmReg::gp(0), AsmReg::gp(1));
    }

    #[test]
    #[should_panic(expected = "no byte view")]
    fn test_byte_view_contract_on_ia32() {
        let mut masm = MacroAssembler::new(32).unwrap();
        // edi has no low byte in 32-bit mode.
        let _ = masm.setcc(CondCode::E, AsmReg::gp(7));
    }

    #[test]
    fn test_memory_operands() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let dst = AsmReg::gp(0);
        let base = AsmReg::gp(3);
        let index = AsmReg::gp(1);

        masm.mov_rm(OpSize::S64, dst, &Mem::base_disp(base, 16))
            .unwrap();
        masm.mov_rm(OpSize::S32, dst, &Mem::base_index(base, index, 4, -8))
            .unwrap();
        masm.lea(OpSize::S64, dst, &Mem::index_only(index, 8, 0x100))
            .unwrap();

        let code = masm.finalize().unwrap();
        let mnemonics = decode_mnemonics(64, code.bytes());
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Mov, Mnemonic::Mov, Mnemonic::Lea]
        );
    }

    #[test]
    fn test_labels_and_offsets() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let acc = AsmReg::gp(0);
        let mut target = masm.create_label();

        masm.cmp_ri(OpSize::S32, acc, 0).unwrap();
        masm.jcc(CondCode::E, target).unwrap();
        masm.mov_ri(OpSize::S32, acc, 1).unwrap();
        masm.bind(&mut target).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        let off = code.label_offset(target).unwrap();
        // The label must point at the final ret, which is the last byte.
        assert_eq!(off as usize, code.bytes().len() - 1);
    }

    #[test]
    fn test_adjacent_labels_allowed() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let mut a = masm.create_label();
        let mut b = masm.create_label();
        masm.nop().unwrap();
        masm.bind(&mut a).unwrap();
        masm.bind(&mut b).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        assert_eq!(
            code.label_offset(a).unwrap(),
            code.label_offset(b).unwrap()
        );
    }

    #[test]
    fn test_vector_table_emission() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let x0 = AsmReg::fp(0);
        let x1 = AsmReg::fp(1);
        masm.emit_vec_rr(iced_x86::Code::Addps_xmm_xmmm128, x0, x1)
            .unwrap();
        masm.emit_vec_rr(iced_x86::Code::Paddd_xmm_xmmm128, x0, x1)
            .unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        let mnemonics = decode_mnemonics(64, code.bytes());
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Addps, Mnemonic::Paddd, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_scalar_double_moves() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let x0 = AsmReg::fp(0);
        let x1 = AsmReg::fp(1);
        let base = AsmReg::gp(3);
        masm.movsd_rr(x0, x1).unwrap();
        masm.movsd_rm(x0, &Mem::base_disp(base, 8)).unwrap();
        masm.movsd_mr(&Mem::base(base), x1).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        let mnemonics = decode_mnemonics(64, code.bytes());
        assert_eq!(
            mnemonics,
            vec![
                Mnemonic::Movsd,
                Mnemonic::Movsd,
                Mnemonic::Movsd,
                Mnemonic::Ret
            ]
        );
    }

    #[test]
    fn test_nan_pattern_materialization() {
        let mut masm = MacroAssembler::new(64).unwrap();
        let x0 = AsmReg::fp(0);
        masm.pcmpeqd_rr(x0, x0).unwrap();
        masm.psrlq_ri(x0, 1).unwrap();
        masm.ret().unwrap();

        let code = masm.finalize().unwrap();
        let mnemonics = decode_mnemonics(64, code.bytes());
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Pcmpeqd, Mnemonic::Psrlq, Mnemonic::Ret]
        );
    }
}
