//! Public engine interface and the recompile/execute loop

use crate::block::Block;
use crate::blockcache::{self, BlockCache};
use crate::disasm;
use crate::emit::{self, EmitResult, TranslationCtx};
use crate::jit::{self, Assembler, HostFn, HostOp, R1};
use crate::memory;
use crate::regcache::RegCache;
use crate::trampoline;
use std::rc::Rc;
use thiserror::Error;

pub use crate::disasm::Opcode;
pub use crate::memory::{IoOps, MemMap};

#[derive(Debug, Error)]
pub enum DynarecError {
    #[error("No code mapped at PC {pc:08X}")]
    NoCodeAtPc { pc: u32 },
    #[error("Memory map at {pc:08X} (length {length:08X}) overlaps another map")]
    OverlappingMap { pc: u32, length: u32 },
    #[error("Memory map base address {pc:08X} is not word-aligned")]
    UnalignedMap { pc: u32 },
}

pub type DynarecResult<T> = Result<T, DynarecError>;

/// Why the last executed block exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExit {
    Normal,
    Segfault,
    Breakpoint,
    Syscall,
}

/// Exit state written by translated code and runtime callbacks. MMIO and
/// coprocessor handlers receive this to request a stop or flag an exit of
/// their own.
pub struct ExitControl {
    pub stop: bool,
    pub block_exit_flags: BlockExit,
    pub block_exit_cycles: u32,
    pub(crate) next_pc: u32,
    pub(crate) segfault_addr: Option<u32>,
}

impl ExitControl {
    fn new() -> Self {
        Self {
            stop: false,
            block_exit_flags: BlockExit::Normal,
            block_exit_cycles: 0,
            next_pc: 0,
            segfault_addr: None,
        }
    }
}

/// Coprocessor operation table, dispatched from translated code for COP0 and
/// COP2 (GTE) instructions.
pub trait Coprocessor {
    fn mfc(&mut self, control: &mut ExitControl, cop: u8, reg: u8) -> u32;
    fn cfc(&mut self, control: &mut ExitControl, cop: u8, reg: u8) -> u32;
    fn mtc(&mut self, control: &mut ExitControl, cop: u8, reg: u8, value: u32);
    fn ctc(&mut self, control: &mut ExitControl, cop: u8, reg: u8, value: u32);
    fn op(&mut self, control: &mut ExitControl, cop: u8, opcode: u32);
}

/// Guest register file. GPR 0 is hardwired to zero; HI and LO hold
/// multiply/divide results.
pub(crate) struct Registers {
    pub gpr: [u32; 32],
    pub hi: u32,
    pub lo: u32,
}

impl Registers {
    fn new() -> Self {
        Self { gpr: [0; 32], hi: 0, lo: 0 }
    }
}

pub(crate) type RwFn = fn(&mut Recompiler, &Opcode, u32, u32) -> u32;

/// The engine state: memory maps, caches, trampolines, and the guest
/// register file. Single-threaded and non-reentrant; `execute` blocks its
/// caller until the entered block jumps back through `end_of_block`.
pub struct Recompiler {
    // Fields are dropped in declaration order, mirroring the teardown
    // sequence: register cache, block cache, then the trampolines
    pub(crate) reg_cache: RegCache,
    pub(crate) block_cache: BlockCache,
    pub(crate) wrapper: Block,
    pub(crate) addr_lookup_block: Block,
    /// Hot cached copy of `addr_lookup_block.function`.
    pub(crate) addr_lookup: HostFn,
    /// Landing inside the wrapper that translated code jumps to in lieu of
    /// returning.
    pub(crate) end_of_block: HostFn,
    pub(crate) mem_maps: Vec<MemMap>,
    pub(crate) cop_ops: Option<Box<dyn Coprocessor>>,
    pub(crate) rw_op: RwFn,
    pub(crate) current: Option<Rc<Block>>,
    pub(crate) regs: Registers,
    pub(crate) control: ExitControl,
}

pub struct RecompilerBuilder {
    maps: Vec<MemMap>,
    cop_ops: Option<Box<dyn Coprocessor>>,
}

impl RecompilerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { maps: Vec::new(), cop_ops: None }
    }

    #[must_use]
    pub fn with_map(mut self, map: MemMap) -> Self {
        self.maps.push(map);
        self
    }

    #[must_use]
    pub fn with_coprocessor(mut self, cop_ops: Box<dyn Coprocessor>) -> Self {
        self.cop_ops = Some(cop_ops);
        self
    }

    /// # Errors
    ///
    /// Will return an error if the memory maps overlap or are misaligned.
    pub fn build(self) -> DynarecResult<Recompiler> {
        validate_maps(&self.maps)?;

        let (wrapper, end_of_block) = trampoline::generate_wrapper();
        let addr_lookup_block = trampoline::generate_address_lookup(&self.maps);
        let addr_lookup = addr_lookup_block.function.clone();

        Ok(Recompiler {
            reg_cache: RegCache::new(),
            block_cache: BlockCache::new(),
            wrapper,
            addr_lookup_block,
            addr_lookup,
            end_of_block,
            mem_maps: self.maps,
            cop_ops: self.cop_ops,
            rw_op: memory::rw,
            current: None,
            regs: Registers::new(),
            control: ExitControl::new(),
        })
    }
}

impl Default for RecompilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_maps(maps: &[MemMap]) -> DynarecResult<()> {
    for (i, map) in maps.iter().enumerate() {
        if map.pc % 4 != 0 {
            return Err(DynarecError::UnalignedMap { pc: map.pc });
        }

        for other in &maps[i + 1..] {
            let disjoint =
                map.pc.wrapping_add(map.length) <= other.pc
                    || other.pc.wrapping_add(other.length) <= map.pc;
            if !disjoint {
                return Err(DynarecError::OverlappingMap { pc: map.pc, length: map.length });
            }
        }
    }

    Ok(())
}

impl Recompiler {
    #[must_use]
    pub fn builder() -> RecompilerBuilder {
        RecompilerBuilder::new()
    }

    /// Finds or translates the block at `pc`, runs it through the wrapper,
    /// and returns the guest PC execution left off at. A translation failure
    /// is logged and returns `pc` unchanged.
    ///
    /// The caller is responsible for inspecting [`Self::stop`] and
    /// [`Self::block_exit_flags`] before re-entering.
    pub fn execute(&mut self, pc: u32) -> u32 {
        let block = match self.block_cache.find(pc) {
            Some(block) => Rc::clone(block),
            None => {
                let block = match recompile_block(self, pc) {
                    Ok(block) => Rc::new(block),
                    Err(err) => {
                        log::error!("Unable to recompile block at PC {pc:08X}: {err}");
                        return pc;
                    }
                };

                // Registration is unconditional; the engine is non-reentrant,
                // so a competing translation of the same PC cannot exist
                self.block_cache.register(Rc::clone(&block));
                block
            }
        };

        self.control.block_exit_flags = BlockExit::Normal;
        self.control.block_exit_cycles = 0;
        self.current = Some(Rc::clone(&block));

        let wrapper = self.wrapper.function.clone();
        jit::run(self, &wrapper, Some(&block.function), 0);

        self.control.next_pc
    }

    /// Resolves a guest address to a host pointer through the generated
    /// lookup subroutine. A miss reports a segfault and returns null.
    pub fn address_lookup(&mut self, addr: u32) -> u64 {
        let lookup = self.addr_lookup.clone();
        let frame = jit::run(self, &lookup, None, u64::from(addr));
        frame.regs[jit::R0.index()]
    }

    /// Drops the translated block at `pc`, if any. The next `execute` at that
    /// PC retranslates from the current guest bytes.
    pub fn invalidate_block(&mut self, pc: u32) -> bool {
        self.block_cache.unregister(pc).is_some()
    }

    /// Whether the guest bytes covered by the block at `pc` have changed
    /// since it was translated.
    pub fn block_is_outdated(&self, pc: u32) -> Option<bool> {
        self.block_cache.find(pc).map(|block| blockcache::is_outdated(&self.mem_maps, block))
    }

    pub fn gpr(&self, register: u32) -> u32 {
        self.regs.gpr[register as usize]
    }

    pub fn set_gpr(&mut self, register: u32, value: u32) {
        if register != 0 {
            self.regs.gpr[register as usize] = value;
        }
    }

    pub fn hi(&self) -> u32 {
        self.regs.hi
    }

    pub fn lo(&self) -> u32 {
        self.regs.lo
    }

    pub fn stop(&self) -> bool {
        self.control.stop
    }

    pub fn clear_stop(&mut self) {
        self.control.stop = false;
    }

    pub fn block_exit_flags(&self) -> BlockExit {
        self.control.block_exit_flags
    }

    pub fn block_exit_cycles(&self) -> u32 {
        self.control.block_exit_cycles
    }

    pub fn next_pc(&self) -> u32 {
        self.control.next_pc
    }

    /// Address reported by the most recent guest segfault.
    pub fn segfault_addr(&self) -> Option<u32> {
        self.control.segfault_addr
    }

    /// Guest PC of the block most recently entered.
    pub fn current_pc(&self) -> Option<u32> {
        self.current.as_ref().map(|block| block.pc)
    }

    pub fn map_bytes(&self, index: usize) -> Option<&[u8]> {
        self.mem_maps.get(index).and_then(MemMap::bytes)
    }

    pub fn map_bytes_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.mem_maps.get_mut(index).and_then(MemMap::bytes_mut)
    }
}

fn recompile_block(state: &mut Recompiler, pc: u32) -> DynarecResult<Block> {
    let Some(range) = memory::find_code_address(&state.mem_maps, pc) else {
        return Err(DynarecError::NoCodeAtPc { pc });
    };

    let opcode_list = disasm::disassemble(memory::code_bytes(&state.mem_maps, range));

    if log::log_enabled!(log::Level::Trace) {
        log::trace!("Recompiling block at PC {pc:08X}");
        for (i, op) in opcode_list.iter().enumerate() {
            log::trace!(
                "  {:08X}: {}",
                pc.wrapping_add(4 * i as u32),
                disasm::instruction_str(*op)
            );
        }
    }

    let mut asm = Assembler::new();
    state.reg_cache.reset();

    let mut cycles = 0_u32;
    let mut skip_next = false;
    let mut current_pc = pc;
    for (index, &op) in opcode_list.iter().enumerate() {
        // A delay slot folded into the previous instruction's emission still
        // executes; its cycles always count
        cycles += disasm::cycles_of_opcode(op);

        if skip_next {
            skip_next = false;
        } else if op.raw != 0 {
            // NOPs are not recompiled
            let mut ctx = TranslationCtx { asm: &mut asm, regs: &mut state.reg_cache };
            let result = emit::rec_opcode(&mut ctx, &opcode_list, index, current_pc, cycles);
            skip_next = result == EmitResult::SkipDelaySlot;
        }

        current_pc = current_pc.wrapping_add(4);
    }

    // Fall-through exit for a block cut off by the end of its region
    state.reg_cache.writeback_all(&mut asm);
    asm.emit(HostOp::LoadImm { dst: R1, imm: u64::from(current_pc) });
    asm.emit(HostOp::StoreNextPc { src: R1 });
    asm.emit(HostOp::StoreExitCycles { cycles });
    asm.emit(HostOp::JumpEndOfBlock);

    let mut block = Block {
        pc,
        kunseg_pc: memory::kunseg(pc),
        code: Some(range),
        opcode_list: Some(opcode_list),
        function: HostFn::new(Rc::new(asm.finalize()), 0),
        cycles,
        hash: 0,
    };
    block.hash = blockcache::calculate_block_hash(&state.mem_maps, &block);

    log::debug!(
        "Recompiled block at PC {:08X} (kunseg {:08X}): {} opcodes, {} guest cycles",
        block.pc,
        block.kunseg_pc,
        block.opcode_list.as_ref().map_or(0, Vec::len),
        block.cycles
    );

    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram_engine(len: u32) -> Recompiler {
        Recompiler::builder().with_map(MemMap::zeroed(0, len)).build().unwrap()
    }

    #[test]
    fn builder_rejects_overlapping_maps() {
        let result = Recompiler::builder()
            .with_map(MemMap::zeroed(0x1000, 0x1000))
            .with_map(MemMap::zeroed(0x1800, 0x1000))
            .build();
        assert!(matches!(result, Err(DynarecError::OverlappingMap { pc: 0x1000, .. })));
    }

    #[test]
    fn builder_rejects_unaligned_maps() {
        let result = Recompiler::builder().with_map(MemMap::zeroed(0x1002, 0x100)).build();
        assert!(matches!(result, Err(DynarecError::UnalignedMap { pc: 0x1002 })));
    }

    #[test]
    fn address_lookup_agrees_with_find_code_address() {
        let mut engine = Recompiler::builder()
            .with_map(MemMap::zeroed(0, 0x2000))
            .with_map(MemMap::zeroed(0x1F80_0000, 0x400))
            .with_map(MemMap::zeroed(0x1FC0_0000, 0x1000))
            .build()
            .unwrap();

        for map_index in 0..3 {
            let (pc, length) = {
                let map = &engine.mem_maps[map_index];
                (map.pc, map.length)
            };

            for offset in (0..length).step_by(0x40) {
                let kaddr = pc + offset;
                let range = memory::find_code_address(&engine.mem_maps, kaddr).unwrap();
                let expected = engine.mem_maps[range.map].host_address()
                    + u64::from(range.offset);

                assert_eq!(engine.address_lookup(kaddr), expected);
                // kseg0/kseg1 addresses resolve through the same map once
                // kunsegged
                let range_kseg1 =
                    memory::find_code_address(&engine.mem_maps, kaddr + 0xA000_0000).unwrap();
                assert_eq!(range_kseg1, range);
            }
        }

        assert!(!engine.stop());
    }

    #[test]
    fn address_lookup_miss_reports_segfault() {
        let mut engine = ram_engine(0x1000);

        let pointer = engine.address_lookup(0xFFFF_0000);
        assert_eq!(pointer, 0);
        assert!(engine.stop());
        assert_eq!(engine.block_exit_flags(), BlockExit::Segfault);
        assert_eq!(engine.segfault_addr(), Some(0xFFFF_0000));
    }

    #[test]
    fn execute_registers_block() {
        let mut engine = ram_engine(0x1000);

        // ADDIU R1, R0, 1 followed by region end
        engine.map_bytes_mut(0).unwrap()[..4]
            .copy_from_slice(&((0x09_u32 << 26) | (1 << 16) | 1).to_le_bytes());

        let next = engine.execute(0);
        assert!(engine.block_cache.find(0).is_some());
        assert_eq!(engine.gpr(1), 1);
        assert_eq!(next, engine.next_pc());
        assert_eq!(engine.block_is_outdated(0), Some(false));
    }

    #[test]
    fn execute_outside_maps_returns_pc_unchanged() {
        let mut engine = ram_engine(0x1000);

        let next = engine.execute(0x0100_0000);
        assert_eq!(next, 0x0100_0000);
        // The failure happens at translation time, not during execution
        assert_eq!(engine.block_exit_flags(), BlockExit::Normal);
        assert!(!engine.stop());
    }
}
