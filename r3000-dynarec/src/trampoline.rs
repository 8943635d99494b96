//! The two permanently resident trampoline blocks
//!
//! The wrapper bridges the native caller and translated code: it saves the
//! callee-saved registers, installs the engine-state address in `REG_STATE`,
//! and jumps to the block passed as its argument. Translated code comes back
//! by jumping to the fixed landing past the indirect jump; that address is
//! published on the engine state as `end_of_block`.
//!
//! The address-lookup block resolves a guest address to a host pointer for
//! generated code. The map table is immutable after init, so each entry's
//! bounds and base address are baked into the emitted compares, iterated from
//! the last map to the first.

use crate::block::Block;
use crate::jit::{Assembler, HostFn, HostOp, R0, R1, R2};
use crate::memory::MemMap;
use std::rc::Rc;

fn trampoline_block(function: HostFn) -> Block {
    Block {
        pc: 0,
        kunseg_pc: 0,
        code: None,
        opcode_list: None,
        function,
        cycles: 0,
        hash: 0,
    }
}

/// Emits the wrapper. Returns the block and the `end_of_block` landing that
/// translated code jumps to in lieu of returning.
pub(crate) fn generate_wrapper() -> (Block, HostFn) {
    let mut asm = Assembler::new();

    // Force the callee-saved registers into known spill slots; translated
    // code does not know to save them
    asm.emit(HostOp::SaveCallees);
    asm.emit(HostOp::InstallState);
    asm.emit(HostOp::JumpToArg);

    // The block will not return, but jump right here
    let end = asm.here();
    asm.emit(HostOp::RestoreCallees);
    asm.emit(HostOp::Ret);

    let buffer = Rc::new(asm.finalize());
    let end_of_block = HostFn::at_label(Rc::clone(&buffer), end);

    (trampoline_block(HostFn::new(buffer, 0)), end_of_block)
}

/// Emits the address-lookup subroutine: guest address in `R0` in, host
/// pointer in `R0` out. A miss reports a segfault and returns null.
pub(crate) fn generate_address_lookup(maps: &[MemMap]) -> Block {
    let mut asm = Assembler::new();
    let done = asm.label();

    for map in maps.iter().rev() {
        let next = asm.label();

        // Skip unless map.pc <= addr < map.pc + map.length
        asm.emit(HostOp::LoadImm { dst: R1, imm: u64::from(map.pc) });
        asm.emit(HostOp::SltU32 { dst: R2, lhs: R0, rhs: R1 });
        asm.emit(HostOp::BranchNonZero { src: R2, target: next });
        asm.emit(HostOp::LoadImm { dst: R1, imm: u64::from(map.pc.wrapping_add(map.length)) });
        asm.emit(HostOp::SltU32 { dst: R2, lhs: R0, rhs: R1 });
        asm.emit(HostOp::BranchZero { src: R2, target: next });

        // Found: host pointer is base + (addr - map.pc)
        asm.emit(HostOp::LoadImm { dst: R1, imm: u64::from(map.pc) });
        asm.emit(HostOp::Sub32 { dst: R2, lhs: R0, rhs: R1 });
        asm.emit(HostOp::LoadImm { dst: R1, imm: map.host_address() });
        asm.emit(HostOp::Add { dst: R0, lhs: R1, rhs: R2 });
        asm.emit(HostOp::Jump { target: done });

        asm.bind(next);
    }

    // No map matched
    asm.emit(HostOp::CallSegfault { addr: R0 });
    asm.emit(HostOp::LoadImm { dst: R0, imm: 0 });

    asm.bind(done);
    asm.emit(HostOp::Ret);

    trampoline_block(HostFn::new(Rc::new(asm.finalize()), 0))
}
