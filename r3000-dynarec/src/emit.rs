//! Per-opcode code emission
//!
//! Translates one decoded guest instruction into host ops against the
//! register cache. Control transfers evaluate their condition (or indirect
//! target) before the delay slot is emitted, fold the delay slot into their
//! own emission, and report [`EmitResult::SkipDelaySlot`] so the recompiler
//! does not emit it a second time.
//!
//! All guest loads and stores go through the engine's `rw` callback: whether
//! an address hits a direct region or an MMIO region is only known at run
//! time, so a direct host access cannot be proven safe during translation.

use crate::api::BlockExit;
use crate::disasm::{self, Opcode};
use crate::jit::{Assembler, CopAccess, GuestReg, HostOp, HostReg, R0, R1};
use crate::regcache::RegCache;

const COND_SPILL_SLOT: u8 = 0;
const TARGET_SPILL_SLOT: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitResult {
    Normal,
    /// The delay slot was folded into this instruction's emission.
    SkipDelaySlot,
}

pub struct TranslationCtx<'a> {
    pub asm: &'a mut Assembler,
    pub regs: &'a mut RegCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    Eq,
    Ne,
    Lez,
    Gtz,
    Ltz,
    Gez,
}

fn gpr(register: u32) -> GuestReg {
    GuestReg(register as u8)
}

/// Emits host code for the opcode at `index`. `pc` is the guest address of
/// the instruction; `cycles` is the block's cycle count through it, stored
/// into the exit state by block-ending instructions.
pub fn rec_opcode(
    ctx: &mut TranslationCtx<'_>,
    opcodes: &[Opcode],
    index: usize,
    pc: u32,
    cycles: u32,
) -> EmitResult {
    let op = opcodes[index];

    match op.primary() {
        0x00 => match op.funct() {
            // SLL / SRL / SRA
            0x00 => rec_shift_imm(ctx, op, |dst, src, amount| HostOp::SllImm32 {
                dst,
                src,
                amount,
            }),
            0x02 => rec_shift_imm(ctx, op, |dst, src, amount| HostOp::SrlImm32 {
                dst,
                src,
                amount,
            }),
            0x03 => rec_shift_imm(ctx, op, |dst, src, amount| HostOp::SraImm32 {
                dst,
                src,
                amount,
            }),
            // SLLV / SRLV / SRAV
            0x04 => rec_shift_reg(ctx, op, |dst, src, amount| HostOp::Sll32 { dst, src, amount }),
            0x06 => rec_shift_reg(ctx, op, |dst, src, amount| HostOp::Srl32 { dst, src, amount }),
            0x07 => rec_shift_reg(ctx, op, |dst, src, amount| HostOp::Sra32 { dst, src, amount }),
            // JR / JALR
            0x08 => return rec_jump_reg(ctx, opcodes, index, pc, cycles, None),
            0x09 => return rec_jump_reg(ctx, opcodes, index, pc, cycles, Some(op.rd())),
            // SYSCALL / BREAK
            0x0C => return rec_trap(ctx, pc, cycles, BlockExit::Syscall),
            0x0D => return rec_trap(ctx, pc, cycles, BlockExit::Breakpoint),
            // MFHI / MTHI / MFLO / MTLO
            0x10 => rec_move(ctx, GuestReg::HI, gpr(op.rd())),
            0x11 => rec_move(ctx, gpr(op.rs()), GuestReg::HI),
            0x12 => rec_move(ctx, GuestReg::LO, gpr(op.rd())),
            0x13 => rec_move(ctx, gpr(op.rs()), GuestReg::LO),
            // MULT / MULTU / DIV / DIVU
            0x18 => rec_mult_div(ctx, op, true, true),
            0x19 => rec_mult_div(ctx, op, true, false),
            0x1A => rec_mult_div(ctx, op, false, true),
            0x1B => rec_mult_div(ctx, op, false, false),
            // ADD / ADDU / SUB / SUBU: overflow traps are not generated, the
            // signed forms emit the same code as their unsigned counterparts
            0x20 | 0x21 => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::Add32 { dst, lhs, rhs }),
            0x22 | 0x23 => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::Sub32 { dst, lhs, rhs }),
            // AND / OR / XOR / NOR
            0x24 => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::And32 { dst, lhs, rhs }),
            0x25 => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::Or32 { dst, lhs, rhs }),
            0x26 => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::Xor32 { dst, lhs, rhs }),
            0x27 => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::Nor32 { dst, lhs, rhs }),
            // SLT / SLTU
            0x2A => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::SltS32 { dst, lhs, rhs }),
            0x2B => rec_alu_reg(ctx, op, |dst, lhs, rhs| HostOp::SltU32 { dst, lhs, rhs }),
            _ => log::warn!("Unhandled opcode {:08X} at PC {pc:08X}", op.raw),
        },
        // REGIMM: BLTZAL and BGEZAL, otherwise BLTZ/BGEZ on bit 16
        0x01 => {
            let (kind, link) = match op.rt() {
                0x10 => (BranchKind::Ltz, true),
                0x11 => (BranchKind::Gez, true),
                rt if rt & 1 == 0 => (BranchKind::Ltz, false),
                _ => (BranchKind::Gez, false),
            };
            return rec_branch(ctx, opcodes, index, pc, cycles, kind, link);
        }
        // J / JAL
        0x02 => return rec_jump_imm(ctx, opcodes, index, pc, cycles, false),
        0x03 => return rec_jump_imm(ctx, opcodes, index, pc, cycles, true),
        // BEQ / BNE / BLEZ / BGTZ
        0x04 => return rec_branch(ctx, opcodes, index, pc, cycles, BranchKind::Eq, false),
        0x05 => return rec_branch(ctx, opcodes, index, pc, cycles, BranchKind::Ne, false),
        0x06 => return rec_branch(ctx, opcodes, index, pc, cycles, BranchKind::Lez, false),
        0x07 => return rec_branch(ctx, opcodes, index, pc, cycles, BranchKind::Gtz, false),
        // ADDI / ADDIU (no overflow trap, see above)
        0x08 | 0x09 => {
            rec_alu_imm(ctx, op, op.simm() as u32, |dst, lhs, rhs| HostOp::Add32 {
                dst,
                lhs,
                rhs,
            });
        }
        // SLTI / SLTIU (both compare against the sign-extended immediate)
        0x0A => rec_alu_imm(ctx, op, op.simm() as u32, |dst, lhs, rhs| HostOp::SltS32 {
            dst,
            lhs,
            rhs,
        }),
        0x0B => rec_alu_imm(ctx, op, op.simm() as u32, |dst, lhs, rhs| HostOp::SltU32 {
            dst,
            lhs,
            rhs,
        }),
        // ANDI / ORI / XORI (zero-extended immediate)
        0x0C => rec_alu_imm(ctx, op, op.imm(), |dst, lhs, rhs| HostOp::And32 { dst, lhs, rhs }),
        0x0D => rec_alu_imm(ctx, op, op.imm(), |dst, lhs, rhs| HostOp::Or32 { dst, lhs, rhs }),
        0x0E => rec_alu_imm(ctx, op, op.imm(), |dst, lhs, rhs| HostOp::Xor32 { dst, lhs, rhs }),
        // LUI
        0x0F => {
            let hrt = ctx.regs.alloc_out(ctx.asm, gpr(op.rt()));
            ctx.asm.emit(HostOp::LoadImm { dst: hrt, imm: u64::from(op.imm() << 16) });
            ctx.regs.unlock_all();
        }
        // Coprocessor 0-3: bits 21-25 specify the operation
        0x10..=0x13 => {
            let cop = (op.primary() & 3) as u8;
            match op.rs() {
                0x00 => rec_cop_move_from(ctx, op, cop, CopAccess::Mfc),
                0x02 => rec_cop_move_from(ctx, op, cop, CopAccess::Cfc),
                0x04 => rec_cop_move_to(ctx, op, cop, CopAccess::Mtc),
                0x06 => rec_cop_move_to(ctx, op, cop, CopAccess::Ctc),
                0x10..=0x1F => ctx.asm.emit(HostOp::CallCop {
                    access: CopAccess::Op,
                    cop,
                    reg: 0,
                    raw: op.raw,
                    data: R0,
                    dst: R0,
                }),
                _ => log::warn!("Unhandled coprocessor opcode {:08X} at PC {pc:08X}", op.raw),
            }
        }
        // LB / LH / LWL / LW / LBU / LHU / LWR
        0x20..=0x26 => rec_load(ctx, op),
        // SB / SH / SWL / SW / SWR
        0x28..=0x2B | 0x2E => rec_store(ctx, op),
        // LWC2: word load handed to the coprocessor
        0x32 => {
            let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
            ctx.asm.emit(HostOp::CallRw { op, addr: hrs, data: hrs, dst: R0 });
            ctx.asm.emit(HostOp::CallCop {
                access: CopAccess::Mtc,
                cop: 2,
                reg: op.rt() as u8,
                raw: op.raw,
                data: R0,
                dst: R0,
            });
            ctx.regs.unlock_all();
        }
        // SWC2: coprocessor data stored as a word
        0x3A => {
            ctx.asm.emit(HostOp::CallCop {
                access: CopAccess::Mfc,
                cop: 2,
                reg: op.rt() as u8,
                raw: op.raw,
                data: R0,
                dst: R0,
            });
            let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
            ctx.asm.emit(HostOp::CallRw {
                op: op.with_primary(0x2B),
                addr: hrs,
                data: R0,
                dst: R1,
            });
            ctx.regs.unlock_all();
        }
        _ => log::warn!("Unhandled opcode {:08X} at PC {pc:08X}", op.raw),
    }

    EmitResult::Normal
}

fn rec_alu_reg(
    ctx: &mut TranslationCtx<'_>,
    op: Opcode,
    host_op: fn(HostReg, HostReg, HostReg) -> HostOp,
) {
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
    let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
    let hrd = ctx.regs.alloc_out(ctx.asm, gpr(op.rd()));
    ctx.asm.emit(host_op(hrd, hrs, hrt));
    ctx.regs.unlock_all();
}

fn rec_alu_imm(
    ctx: &mut TranslationCtx<'_>,
    op: Opcode,
    imm: u32,
    host_op: fn(HostReg, HostReg, HostReg) -> HostOp,
) {
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
    ctx.asm.emit(HostOp::LoadImm { dst: R0, imm: u64::from(imm) });
    let hrt = ctx.regs.alloc_out(ctx.asm, gpr(op.rt()));
    ctx.asm.emit(host_op(hrt, hrs, R0));
    ctx.regs.unlock_all();
}

fn rec_shift_imm(
    ctx: &mut TranslationCtx<'_>,
    op: Opcode,
    host_op: fn(HostReg, HostReg, u8) -> HostOp,
) {
    let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
    let hrd = ctx.regs.alloc_out(ctx.asm, gpr(op.rd()));
    ctx.asm.emit(host_op(hrd, hrt, op.shamt() as u8));
    ctx.regs.unlock_all();
}

fn rec_shift_reg(
    ctx: &mut TranslationCtx<'_>,
    op: Opcode,
    host_op: fn(HostReg, HostReg, HostReg) -> HostOp,
) {
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
    let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
    let hrd = ctx.regs.alloc_out(ctx.asm, gpr(op.rd()));
    ctx.asm.emit(host_op(hrd, hrt, hrs));
    ctx.regs.unlock_all();
}

fn rec_move(ctx: &mut TranslationCtx<'_>, from: GuestReg, to: GuestReg) {
    let src = ctx.regs.alloc_in(ctx.asm, from);
    let dst = ctx.regs.alloc_out(ctx.asm, to);
    ctx.asm.emit(HostOp::Move { dst, src });
    ctx.regs.unlock_all();
}

fn rec_mult_div(ctx: &mut TranslationCtx<'_>, op: Opcode, multiply: bool, signed: bool) {
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
    let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
    let hi = ctx.regs.alloc_out(ctx.asm, GuestReg::HI);
    let lo = ctx.regs.alloc_out(ctx.asm, GuestReg::LO);

    let host_op = if multiply {
        HostOp::MulHiLo { hi, lo, lhs: hrs, rhs: hrt, signed }
    } else {
        HostOp::DivHiLo { hi, lo, lhs: hrs, rhs: hrt, signed }
    };
    ctx.asm.emit(host_op);
    ctx.regs.unlock_all();
}

fn rec_load(ctx: &mut TranslationCtx<'_>, op: Opcode) {
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));

    // LWL and LWR merge with the destination register's prior value, which
    // travels through the interpreter's data argument
    let data = match op.primary() {
        0x22 | 0x26 => ctx.regs.alloc_in(ctx.asm, gpr(op.rt())),
        _ => hrs,
    };

    ctx.asm.emit(HostOp::CallRw { op, addr: hrs, data, dst: R0 });
    let hrt = ctx.regs.alloc_out(ctx.asm, gpr(op.rt()));
    ctx.asm.emit(HostOp::Move { dst: hrt, src: R0 });
    ctx.regs.unlock_all();
}

fn rec_store(ctx: &mut TranslationCtx<'_>, op: Opcode) {
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
    let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
    ctx.asm.emit(HostOp::CallRw { op, addr: hrs, data: hrt, dst: R0 });
    ctx.regs.unlock_all();
}

fn rec_cop_move_from(ctx: &mut TranslationCtx<'_>, op: Opcode, cop: u8, access: CopAccess) {
    ctx.asm.emit(HostOp::CallCop {
        access,
        cop,
        reg: op.rd() as u8,
        raw: op.raw,
        data: R0,
        dst: R0,
    });
    let hrt = ctx.regs.alloc_out(ctx.asm, gpr(op.rt()));
    ctx.asm.emit(HostOp::Move { dst: hrt, src: R0 });
    ctx.regs.unlock_all();
}

fn rec_cop_move_to(ctx: &mut TranslationCtx<'_>, op: Opcode, cop: u8, access: CopAccess) {
    let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
    ctx.asm.emit(HostOp::CallCop {
        access,
        cop,
        reg: op.rd() as u8,
        raw: op.raw,
        data: hrt,
        dst: R0,
    });
    ctx.regs.unlock_all();
}

/// Emits the delay-slot instruction of a control transfer and returns its
/// cycle cost. The condition/target of the transfer has already been
/// evaluated and spilled at this point.
fn emit_delay_slot(ctx: &mut TranslationCtx<'_>, opcodes: &[Opcode], index: usize, pc: u32) -> u32 {
    let Some(&delay) = opcodes.get(index + 1) else {
        return 0;
    };

    if delay.raw != 0 {
        if disasm::is_block_terminal(delay) {
            // Branch in a delay slot is undefined on MIPS-I
            log::warn!("Control transfer in delay slot at PC {:08X}; not emitted", pc.wrapping_add(4));
        } else {
            rec_opcode(ctx, opcodes, index + 1, pc.wrapping_add(4), 0);
        }
    }

    disasm::cycles_of_opcode(delay)
}

fn emit_exit(asm: &mut Assembler, next_pc: u32, cycles: u32) {
    asm.emit(HostOp::LoadImm { dst: R1, imm: u64::from(next_pc) });
    asm.emit(HostOp::StoreNextPc { src: R1 });
    asm.emit(HostOp::StoreExitCycles { cycles });
    asm.emit(HostOp::JumpEndOfBlock);
}

fn rec_branch(
    ctx: &mut TranslationCtx<'_>,
    opcodes: &[Opcode],
    index: usize,
    pc: u32,
    cycles: u32,
    kind: BranchKind,
    link: bool,
) -> EmitResult {
    let op = opcodes[index];
    let target = pc.wrapping_add(4).wrapping_add((op.simm() << 2) as u32);

    // Evaluate the condition with pre-delay-slot register values
    let taken_if_nonzero = match kind {
        BranchKind::Eq | BranchKind::Ne => {
            let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
            let hrt = ctx.regs.alloc_in(ctx.asm, gpr(op.rt()));
            ctx.asm.emit(HostOp::Xor32 { dst: R0, lhs: hrs, rhs: hrt });
            kind == BranchKind::Ne
        }
        BranchKind::Ltz | BranchKind::Gez => {
            let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
            ctx.asm.emit(HostOp::LoadImm { dst: R1, imm: 0 });
            ctx.asm.emit(HostOp::SltS32 { dst: R0, lhs: hrs, rhs: R1 });
            kind == BranchKind::Ltz
        }
        BranchKind::Gtz | BranchKind::Lez => {
            let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
            ctx.asm.emit(HostOp::LoadImm { dst: R1, imm: 0 });
            ctx.asm.emit(HostOp::SltS32 { dst: R0, lhs: R1, rhs: hrs });
            kind == BranchKind::Gtz
        }
    };
    ctx.asm.emit(HostOp::StoreSpill { slot: COND_SPILL_SLOT, src: R0 });
    ctx.regs.unlock_all();

    if link {
        // BLTZAL/BGEZAL write the return address whether or not the branch is
        // taken
        let hra = ctx.regs.alloc_out(ctx.asm, gpr(31));
        ctx.asm.emit(HostOp::LoadImm { dst: hra, imm: u64::from(pc.wrapping_add(8)) });
        ctx.regs.unlock_all();
    }

    let total_cycles = cycles + emit_delay_slot(ctx, opcodes, index, pc);
    ctx.regs.writeback_all(ctx.asm);

    ctx.asm.emit(HostOp::LoadSpill { dst: R0, slot: COND_SPILL_SLOT });
    let not_taken = ctx.asm.label();
    if taken_if_nonzero {
        ctx.asm.emit(HostOp::BranchZero { src: R0, target: not_taken });
    } else {
        ctx.asm.emit(HostOp::BranchNonZero { src: R0, target: not_taken });
    }
    emit_exit(ctx.asm, target, total_cycles);
    ctx.asm.bind(not_taken);
    emit_exit(ctx.asm, pc.wrapping_add(8), total_cycles);

    EmitResult::SkipDelaySlot
}

fn rec_jump_imm(
    ctx: &mut TranslationCtx<'_>,
    opcodes: &[Opcode],
    index: usize,
    pc: u32,
    cycles: u32,
    link: bool,
) -> EmitResult {
    let op = opcodes[index];
    let target = (pc.wrapping_add(4) & 0xF000_0000) | (op.target() << 2);

    if link {
        let hra = ctx.regs.alloc_out(ctx.asm, gpr(31));
        ctx.asm.emit(HostOp::LoadImm { dst: hra, imm: u64::from(pc.wrapping_add(8)) });
        ctx.regs.unlock_all();
    }

    let total_cycles = cycles + emit_delay_slot(ctx, opcodes, index, pc);
    ctx.regs.writeback_all(ctx.asm);
    emit_exit(ctx.asm, target, total_cycles);

    EmitResult::SkipDelaySlot
}

fn rec_jump_reg(
    ctx: &mut TranslationCtx<'_>,
    opcodes: &[Opcode],
    index: usize,
    pc: u32,
    cycles: u32,
    link_reg: Option<u32>,
) -> EmitResult {
    let op = opcodes[index];

    // Read the target before the delay slot can clobber it
    let hrs = ctx.regs.alloc_in(ctx.asm, gpr(op.rs()));
    ctx.asm.emit(HostOp::StoreSpill { slot: TARGET_SPILL_SLOT, src: hrs });
    ctx.regs.unlock_all();

    if let Some(rd) = link_reg {
        let hrd = ctx.regs.alloc_out(ctx.asm, gpr(rd));
        ctx.asm.emit(HostOp::LoadImm { dst: hrd, imm: u64::from(pc.wrapping_add(8)) });
        ctx.regs.unlock_all();
    }

    let total_cycles = cycles + emit_delay_slot(ctx, opcodes, index, pc);
    ctx.regs.writeback_all(ctx.asm);

    ctx.asm.emit(HostOp::LoadSpill { dst: R1, slot: TARGET_SPILL_SLOT });
    ctx.asm.emit(HostOp::StoreNextPc { src: R1 });
    ctx.asm.emit(HostOp::StoreExitCycles { cycles: total_cycles });
    ctx.asm.emit(HostOp::JumpEndOfBlock);

    EmitResult::SkipDelaySlot
}

fn rec_trap(ctx: &mut TranslationCtx<'_>, pc: u32, cycles: u32, flag: BlockExit) -> EmitResult {
    // The driver re-raises the exception; hand it the faulting PC
    ctx.regs.writeback_all(ctx.asm);
    ctx.asm.emit(HostOp::LoadImm { dst: R1, imm: u64::from(pc) });
    ctx.asm.emit(HostOp::StoreNextPc { src: R1 });
    ctx.asm.emit(HostOp::StoreExitFlag { flag });
    ctx.asm.emit(HostOp::StoreExitCycles { cycles });
    ctx.asm.emit(HostOp::JumpEndOfBlock);

    EmitResult::Normal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit_one(words: &[u32]) -> (Vec<HostOp>, EmitResult) {
        let opcodes: Vec<Opcode> = words.iter().map(|&raw| Opcode::new(raw)).collect();
        let mut asm = Assembler::new();
        let mut regs = RegCache::new();
        let mut ctx = TranslationCtx { asm: &mut asm, regs: &mut regs };
        let result = rec_opcode(&mut ctx, &opcodes, 0, 0x1000, 1);
        (asm.finalize().ops().to_vec(), result)
    }

    #[test]
    fn addiu_emits_alu_sequence() {
        // ADDIU R1, R2, 5
        let (ops, result) = emit_one(&[(0x09 << 26) | (2 << 21) | (1 << 16) | 5]);

        assert_eq!(result, EmitResult::Normal);
        assert!(matches!(ops[0], HostOp::LoadGuest { guest: GuestReg(2), .. }));
        assert!(matches!(ops[1], HostOp::LoadImm { imm: 5, .. }));
        assert!(matches!(ops[2], HostOp::Add32 { .. }));
    }

    #[test]
    fn branch_folds_delay_slot_and_exits_twice() {
        // BEQ R1, R2, +4 with ADDIU R3, R0, 7 in the delay slot
        let branch = (0x04 << 26) | (1 << 21) | (2 << 16) | 1;
        let delay = (0x09 << 26) | (3 << 16) | 7;
        let (ops, result) = emit_one(&[branch, delay]);

        assert_eq!(result, EmitResult::SkipDelaySlot);
        let exits = ops.iter().filter(|op| matches!(op, HostOp::JumpEndOfBlock)).count();
        assert_eq!(exits, 2);
        // The delay slot's destination register is written back before exit
        assert!(ops.iter().any(
            |op| matches!(op, HostOp::StoreGuest { guest: GuestReg(3), .. })
        ));
    }

    #[test]
    fn store_routes_through_rw() {
        // SW R1, 8(R2)
        let (ops, _) = emit_one(&[(0x2B << 26) | (2 << 21) | (1 << 16) | 8]);
        assert!(ops.iter().any(|op| matches!(op, HostOp::CallRw { .. })));
    }

    #[test]
    fn syscall_stores_exit_flag() {
        let (ops, result) = emit_one(&[0x0000_000C]);
        assert_eq!(result, EmitResult::Normal);
        assert!(ops.iter().any(
            |op| matches!(op, HostOp::StoreExitFlag { flag: BlockExit::Syscall })
        ));
    }
}
