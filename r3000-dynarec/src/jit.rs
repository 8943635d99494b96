//! The virtual host machine that translated blocks run on
//!
//! Blocks are emitted as sequences of [`HostOp`] against a fixed register
//! file: three caller-saved temporaries (`R0`-`R2`) and six callee-saved
//! registers (`V0`-`V5`). The highest callee-saved register is reserved by
//! convention as `REG_STATE` and holds the engine-state address for the
//! duration of a wrapper invocation.
//!
//! ABI agreement with the emitter and the trampolines:
//! - Generated subroutines take their argument and return their result in
//!   `R0`.
//! - Translated blocks never execute a host return; they exit by jumping to
//!   the address published in `state.end_of_block`, which lands on the
//!   wrapper's epilogue.
//! - Ops that touch guest state require `REG_STATE` to have been installed
//!   by the wrapper (checked in debug builds).

use crate::api::{BlockExit, Recompiler};
use crate::disasm::Opcode;
use crate::memory;
use std::rc::Rc;

pub const NUM_TEMP_REGS: usize = 3;
pub const NUM_SAVED_REGS: usize = 6;
pub const NUM_HOST_REGS: usize = NUM_TEMP_REGS + NUM_SAVED_REGS;
pub const NUM_SPILL_SLOTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostReg(pub u8);

pub const R0: HostReg = HostReg(0);
pub const R1: HostReg = HostReg(1);
pub const R2: HostReg = HostReg(2);

#[must_use]
pub const fn v(i: u8) -> HostReg {
    HostReg(NUM_TEMP_REGS as u8 + i)
}

/// Callee-saved register holding the engine-state address across translated
/// code. Not available to the register cache.
pub const REG_STATE: HostReg = v(NUM_SAVED_REGS as u8 - 1);

impl HostReg {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Guest register index as seen by the host ISA: 0-31 are the GPRs, 32 and 33
/// are HI and LO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestReg(pub u8);

impl GuestReg {
    pub const HI: Self = Self(32);
    pub const LO: Self = Self(33);
}

#[derive(Debug, Clone, Copy)]
pub struct Label(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopAccess {
    Mfc,
    Cfc,
    Mtc,
    Ctc,
    Op,
}

/// One instruction of the virtual host. 32-bit ALU ops operate on the low
/// half of the 64-bit registers and zero-extend their result; the plain `Add`
/// is 64-bit and exists for trampoline pointer math.
#[derive(Debug, Clone, Copy)]
pub enum HostOp {
    LoadImm { dst: HostReg, imm: u64 },
    Move { dst: HostReg, src: HostReg },
    Add { dst: HostReg, lhs: HostReg, rhs: HostReg },
    Add32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    Sub32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    And32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    Or32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    Xor32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    Nor32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    SllImm32 { dst: HostReg, src: HostReg, amount: u8 },
    SrlImm32 { dst: HostReg, src: HostReg, amount: u8 },
    SraImm32 { dst: HostReg, src: HostReg, amount: u8 },
    Sll32 { dst: HostReg, src: HostReg, amount: HostReg },
    Srl32 { dst: HostReg, src: HostReg, amount: HostReg },
    Sra32 { dst: HostReg, src: HostReg, amount: HostReg },
    SltS32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    SltU32 { dst: HostReg, lhs: HostReg, rhs: HostReg },
    MulHiLo { hi: HostReg, lo: HostReg, lhs: HostReg, rhs: HostReg, signed: bool },
    DivHiLo { hi: HostReg, lo: HostReg, lhs: HostReg, rhs: HostReg, signed: bool },
    LoadGuest { dst: HostReg, guest: GuestReg },
    StoreGuest { guest: GuestReg, src: HostReg },
    StoreNextPc { src: HostReg },
    StoreExitCycles { cycles: u32 },
    StoreExitFlag { flag: BlockExit },
    StoreSpill { slot: u8, src: HostReg },
    LoadSpill { dst: HostReg, slot: u8 },
    Jump { target: Label },
    BranchZero { src: HostReg, target: Label },
    BranchNonZero { src: HostReg, target: Label },
    CallRw { op: Opcode, addr: HostReg, data: HostReg, dst: HostReg },
    CallCop { access: CopAccess, cop: u8, reg: u8, raw: u32, data: HostReg, dst: HostReg },
    CallAddrLookup,
    CallSegfault { addr: HostReg },
    Ret,
    JumpEndOfBlock,
    JumpToArg,
    SaveCallees,
    RestoreCallees,
    InstallState,
}

/// Per-block emission state. Acquired at recompile start; `finalize` consumes
/// it and hands the finished code to the block.
pub struct Assembler {
    ops: Vec<HostOp>,
    labels: Vec<Option<usize>>,
}

impl Assembler {
    pub fn new() -> Self {
        Self { ops: Vec::new(), labels: Vec::new() }
    }

    pub fn emit(&mut self, op: HostOp) {
        self.ops.push(op);
    }

    /// Creates an unbound label for a forward reference.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Binds `label` to the current emission position.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0 as usize];
        assert!(slot.is_none(), "label bound twice");
        *slot = Some(self.ops.len());
    }

    /// Creates a label already bound to the current position.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.bind(label);
        label
    }

    pub fn finalize(self) -> CodeBuffer {
        let labels = self
            .labels
            .into_iter()
            .map(|slot| slot.expect("unbound label at finalize"))
            .collect();
        CodeBuffer { ops: self.ops.into_boxed_slice(), labels }
    }
}

/// Finished, immutable host code. Reference-counted so a buffer outlives any
/// engine-state mutation that happens while it is executing.
pub struct CodeBuffer {
    ops: Box<[HostOp]>,
    labels: Box<[usize]>,
}

impl CodeBuffer {
    fn target(&self, label: Label) -> usize {
        self.labels[label.0 as usize]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[cfg(test)]
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }
}

/// Entry point into a code buffer; the host equivalent of a function pointer.
#[derive(Clone)]
pub struct HostFn {
    code: Rc<CodeBuffer>,
    entry: usize,
}

impl HostFn {
    pub fn new(code: Rc<CodeBuffer>, entry: usize) -> Self {
        Self { code, entry }
    }

    /// Entry point at a label of a finished buffer (used for the wrapper's
    /// `end_of_block` landing).
    pub fn at_label(code: Rc<CodeBuffer>, label: Label) -> Self {
        let entry = code.target(label);
        Self { code, entry }
    }
}

/// The wrapper's scratch frame: register file, spill slots, the save area for
/// callee-saved registers, and the return-address stack for generated
/// subroutine calls.
pub struct Frame {
    pub regs: [u64; NUM_HOST_REGS],
    spill: [u64; NUM_SPILL_SLOTS],
    saved: [u64; NUM_SAVED_REGS],
    ret_stack: Vec<(Rc<CodeBuffer>, usize)>,
    state_installed: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            regs: [0; NUM_HOST_REGS],
            spill: [0; NUM_SPILL_SLOTS],
            saved: [0; NUM_SAVED_REGS],
            ret_stack: Vec::with_capacity(4),
            state_installed: false,
        }
    }
}

fn guest_read(state: &Recompiler, guest: GuestReg) -> u32 {
    match guest {
        GuestReg::HI => state.regs.hi,
        GuestReg::LO => state.regs.lo,
        GuestReg(r) => state.regs.gpr[r as usize],
    }
}

fn guest_write(state: &mut Recompiler, guest: GuestReg, value: u32) {
    match guest {
        GuestReg::HI => state.regs.hi = value,
        GuestReg::LO => state.regs.lo = value,
        // Writes to $zero are discarded
        GuestReg(0) => {}
        GuestReg(r) => state.regs.gpr[r as usize] = value,
    }
}

/// Runs host code starting at `entry` until the outermost return. `arg` is
/// the block argument consumed by the wrapper's indirect jump; `r0` pre-arms
/// the argument register for directly invoked subroutines (address lookup).
pub fn run(state: &mut Recompiler, entry: &HostFn, arg: Option<&HostFn>, r0: u64) -> Frame {
    let state_addr = std::ptr::from_mut(state) as u64;

    let mut frame = Frame::new();
    frame.regs[R0.index()] = r0;

    let mut code = Rc::clone(&entry.code);
    let mut idx = entry.entry;

    loop {
        let op = code.ops[idx];
        idx += 1;

        match op {
            HostOp::LoadImm { dst, imm } => frame.regs[dst.index()] = imm,
            HostOp::Move { dst, src } => frame.regs[dst.index()] = frame.regs[src.index()],
            HostOp::Add { dst, lhs, rhs } => {
                frame.regs[dst.index()] =
                    frame.regs[lhs.index()].wrapping_add(frame.regs[rhs.index()]);
            }
            HostOp::Add32 { dst, lhs, rhs } => {
                let value =
                    (frame.regs[lhs.index()] as u32).wrapping_add(frame.regs[rhs.index()] as u32);
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::Sub32 { dst, lhs, rhs } => {
                let value =
                    (frame.regs[lhs.index()] as u32).wrapping_sub(frame.regs[rhs.index()] as u32);
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::And32 { dst, lhs, rhs } => {
                let value = (frame.regs[lhs.index()] as u32) & (frame.regs[rhs.index()] as u32);
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::Or32 { dst, lhs, rhs } => {
                let value = (frame.regs[lhs.index()] as u32) | (frame.regs[rhs.index()] as u32);
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::Xor32 { dst, lhs, rhs } => {
                let value = (frame.regs[lhs.index()] as u32) ^ (frame.regs[rhs.index()] as u32);
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::Nor32 { dst, lhs, rhs } => {
                let value = !((frame.regs[lhs.index()] as u32) | (frame.regs[rhs.index()] as u32));
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::SllImm32 { dst, src, amount } => {
                let value = (frame.regs[src.index()] as u32) << amount;
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::SrlImm32 { dst, src, amount } => {
                let value = (frame.regs[src.index()] as u32) >> amount;
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::SraImm32 { dst, src, amount } => {
                let value = (frame.regs[src.index()] as i32) >> amount;
                frame.regs[dst.index()] = u64::from(value as u32);
            }
            HostOp::Sll32 { dst, src, amount } => {
                let amount = (frame.regs[amount.index()] as u32) & 0x1F;
                let value = (frame.regs[src.index()] as u32) << amount;
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::Srl32 { dst, src, amount } => {
                let amount = (frame.regs[amount.index()] as u32) & 0x1F;
                let value = (frame.regs[src.index()] as u32) >> amount;
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::Sra32 { dst, src, amount } => {
                let amount = (frame.regs[amount.index()] as u32) & 0x1F;
                let value = (frame.regs[src.index()] as i32) >> amount;
                frame.regs[dst.index()] = u64::from(value as u32);
            }
            HostOp::SltS32 { dst, lhs, rhs } => {
                let set = (frame.regs[lhs.index()] as i32) < (frame.regs[rhs.index()] as i32);
                frame.regs[dst.index()] = u64::from(set);
            }
            HostOp::SltU32 { dst, lhs, rhs } => {
                let set = (frame.regs[lhs.index()] as u32) < (frame.regs[rhs.index()] as u32);
                frame.regs[dst.index()] = u64::from(set);
            }
            HostOp::MulHiLo { hi, lo, lhs, rhs, signed } => {
                let product = if signed {
                    (i64::from(frame.regs[lhs.index()] as i32)
                        * i64::from(frame.regs[rhs.index()] as i32)) as u64
                } else {
                    u64::from(frame.regs[lhs.index()] as u32)
                        * u64::from(frame.regs[rhs.index()] as u32)
                };
                frame.regs[lo.index()] = u64::from(product as u32);
                frame.regs[hi.index()] = product >> 32;
            }
            HostOp::DivHiLo { hi, lo, lhs, rhs, signed } => {
                let (quotient, remainder) =
                    divide(frame.regs[lhs.index()] as u32, frame.regs[rhs.index()] as u32, signed);
                frame.regs[lo.index()] = u64::from(quotient);
                frame.regs[hi.index()] = u64::from(remainder);
            }
            HostOp::LoadGuest { dst, guest } => {
                debug_assert!(
                    frame.state_installed && frame.regs[REG_STATE.index()] == state_addr
                );
                frame.regs[dst.index()] = u64::from(guest_read(state, guest));
            }
            HostOp::StoreGuest { guest, src } => {
                debug_assert!(
                    frame.state_installed && frame.regs[REG_STATE.index()] == state_addr
                );
                guest_write(state, guest, frame.regs[src.index()] as u32);
            }
            HostOp::StoreNextPc { src } => {
                debug_assert!(frame.state_installed);
                state.control.next_pc = frame.regs[src.index()] as u32;
            }
            HostOp::StoreExitCycles { cycles } => {
                debug_assert!(frame.state_installed);
                state.control.block_exit_cycles = cycles;
            }
            HostOp::StoreExitFlag { flag } => {
                debug_assert!(frame.state_installed);
                state.control.block_exit_flags = flag;
            }
            HostOp::StoreSpill { slot, src } => {
                frame.spill[slot as usize] = frame.regs[src.index()];
            }
            HostOp::LoadSpill { dst, slot } => {
                frame.regs[dst.index()] = frame.spill[slot as usize];
            }
            HostOp::Jump { target } => idx = code.target(target),
            HostOp::BranchZero { src, target } => {
                if frame.regs[src.index()] == 0 {
                    idx = code.target(target);
                }
            }
            HostOp::BranchNonZero { src, target } => {
                if frame.regs[src.index()] != 0 {
                    idx = code.target(target);
                }
            }
            HostOp::CallRw { op, addr, data, dst } => {
                let rw = state.rw_op;
                let value =
                    rw(state, &op, frame.regs[addr.index()] as u32, frame.regs[data.index()] as u32);
                frame.regs[dst.index()] = u64::from(value);
            }
            HostOp::CallCop { access, cop, reg, raw, data, dst } => {
                if let Some(cop_ops) = state.cop_ops.as_mut() {
                    let control = &mut state.control;
                    match access {
                        CopAccess::Mfc => {
                            frame.regs[dst.index()] =
                                u64::from(cop_ops.mfc(control, cop, reg));
                        }
                        CopAccess::Cfc => {
                            frame.regs[dst.index()] =
                                u64::from(cop_ops.cfc(control, cop, reg));
                        }
                        CopAccess::Mtc => {
                            cop_ops.mtc(control, cop, reg, frame.regs[data.index()] as u32);
                        }
                        CopAccess::Ctc => {
                            cop_ops.ctc(control, cop, reg, frame.regs[data.index()] as u32);
                        }
                        CopAccess::Op => cop_ops.op(control, cop, raw),
                    }
                } else {
                    log::warn!("Coprocessor {cop} access with no coprocessor ops installed");
                }
            }
            HostOp::CallAddrLookup => {
                frame.ret_stack.push((Rc::clone(&code), idx));
                let lookup = state.addr_lookup.clone();
                code = lookup.code;
                idx = lookup.entry;
            }
            HostOp::CallSegfault { addr } => {
                memory::segfault(&mut state.control, frame.regs[addr.index()] as u32);
            }
            HostOp::Ret => match frame.ret_stack.pop() {
                Some((ret_code, ret_idx)) => {
                    code = ret_code;
                    idx = ret_idx;
                }
                None => break,
            },
            HostOp::JumpEndOfBlock => {
                let end = state.end_of_block.clone();
                code = end.code;
                idx = end.entry;
            }
            HostOp::JumpToArg => {
                let arg = arg.expect("wrapper invoked without a block argument");
                code = Rc::clone(&arg.code);
                idx = arg.entry;
            }
            HostOp::SaveCallees => {
                for i in 0..NUM_SAVED_REGS {
                    frame.saved[i] = frame.regs[NUM_TEMP_REGS + i];
                }
            }
            HostOp::RestoreCallees => {
                for i in 0..NUM_SAVED_REGS {
                    frame.regs[NUM_TEMP_REGS + i] = frame.saved[i];
                }
            }
            HostOp::InstallState => {
                frame.regs[REG_STATE.index()] = state_addr;
                frame.state_installed = true;
            }
        }
    }

    frame
}

// R3000 divide results; division never traps on the guest
fn divide(dividend: u32, divisor: u32, signed: bool) -> (u32, u32) {
    if signed {
        let dividend = dividend as i32;
        let divisor = divisor as i32;
        if divisor == 0 {
            // Divide by zero sets LO to $00000001 if the dividend is negative
            // and $FFFFFFFF otherwise; HI is always set to the dividend
            let quotient = if dividend < 0 { 1 } else { u32::MAX };
            return (quotient, dividend as u32);
        }

        (dividend.wrapping_div(divisor) as u32, dividend.wrapping_rem(divisor) as u32)
    } else {
        if divisor == 0 {
            // Divide by zero sets LO to $FFFFFFFF and HI to the dividend
            return (u32::MAX, dividend);
        }

        (dividend / divisor, dividend % divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_forward_reference() {
        let mut asm = Assembler::new();
        let skip = asm.label();
        asm.emit(HostOp::LoadImm { dst: R0, imm: 1 });
        asm.emit(HostOp::Jump { target: skip });
        asm.emit(HostOp::LoadImm { dst: R0, imm: 2 });
        asm.bind(skip);
        asm.emit(HostOp::Ret);

        let buffer = asm.finalize();
        assert_eq!(buffer.target(skip), 3);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    #[should_panic(expected = "unbound label")]
    fn unbound_label_panics() {
        let mut asm = Assembler::new();
        let dangling = asm.label();
        asm.emit(HostOp::Jump { target: dangling });
        let _ = asm.finalize();
    }

    #[test]
    fn call_addr_lookup_returns_through_ret_stack() {
        use crate::api::{MemMap, Recompiler};

        let mut engine =
            Recompiler::builder().with_map(MemMap::zeroed(0, 0x1000)).build().unwrap();
        let direct = engine.address_lookup(0x100);
        assert_ne!(direct, 0);

        // A generated caller: resolve the address in R0, stash the result,
        // and return to the native invoker
        let mut asm = Assembler::new();
        asm.emit(HostOp::CallAddrLookup);
        asm.emit(HostOp::Move { dst: R1, src: R0 });
        asm.emit(HostOp::Ret);
        let caller = HostFn::new(Rc::new(asm.finalize()), 0);

        let frame = run(&mut engine, &caller, None, 0x100);
        assert_eq!(frame.regs[R1.index()], direct);
    }

    #[test]
    fn divide_by_zero_results() {
        assert_eq!(divide(100, 0, false), (u32::MAX, 100));
        assert_eq!(divide(100, 0, true), (u32::MAX, 100));
        assert_eq!(divide(-100_i32 as u32, 0, true), (1, -100_i32 as u32));
        assert_eq!(divide(-7_i32 as u32, 2, true), (-3_i32 as u32, -1_i32 as u32));
        assert_eq!(divide(7, 2, false), (3, 1));
        // The one overflowing signed case wraps instead of trapping
        assert_eq!(divide(i32::MIN as u32, u32::MAX, true), (i32::MIN as u32, 0));
    }
}
