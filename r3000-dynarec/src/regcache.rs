//! Guest-to-host register allocation with dirty tracking
//!
//! Guest registers (the 32 GPRs plus HI and LO) are assigned to the
//! callee-saved host registers below `REG_STATE`. A register allocated for
//! the instruction currently being emitted is locked so it cannot be chosen
//! as an eviction victim; the emitter unlocks everything once the instruction
//! is done.

use crate::jit::{self, Assembler, GuestReg, HostOp, HostReg, NUM_SAVED_REGS};

const NUM_ALLOCATABLE: usize = NUM_SAVED_REGS - 1;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    guest: Option<GuestReg>,
    dirty: bool,
    locked: bool,
    last_use: u32,
}

pub struct RegCache {
    slots: [Slot; NUM_ALLOCATABLE],
    tick: u32,
}

impl RegCache {
    pub fn new() -> Self {
        Self { slots: [Slot::default(); NUM_ALLOCATABLE], tick: 0 }
    }

    /// Forgets all residency; called at the start of each block recompile.
    pub fn reset(&mut self) {
        self.slots = [Slot::default(); NUM_ALLOCATABLE];
        self.tick = 0;
    }

    fn host_reg(slot: usize) -> HostReg {
        jit::v(slot as u8)
    }

    fn touch(&mut self, slot: usize) {
        self.tick += 1;
        self.slots[slot].last_use = self.tick;
        self.slots[slot].locked = true;
    }

    fn find_resident(&self, guest: GuestReg) -> Option<usize> {
        self.slots.iter().position(|slot| slot.guest == Some(guest))
    }

    /// Picks an eviction victim: an empty slot if one exists, otherwise the
    /// least recently used unlocked slot (preferring clean ones, which need
    /// no writeback).
    fn pick_victim(&mut self, asm: &mut Assembler) -> usize {
        if let Some(i) = self.slots.iter().position(|slot| slot.guest.is_none() && !slot.locked) {
            return i;
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.locked)
            .min_by_key(|(_, slot)| (slot.dirty, slot.last_use))
            .map(|(i, _)| i)
            .expect("all host registers locked by a single instruction");

        self.writeback(asm, victim);
        self.slots[victim] = Slot::default();
        victim
    }

    fn writeback(&mut self, asm: &mut Assembler, slot: usize) {
        let Slot { guest: Some(guest), dirty: true, .. } = self.slots[slot] else {
            return;
        };

        asm.emit(HostOp::StoreGuest { guest, src: Self::host_reg(slot) });
        self.slots[slot].dirty = false;
    }

    /// Allocates a host register holding the current value of `guest`,
    /// emitting a load from the guest register file if it is not resident.
    pub fn alloc_in(&mut self, asm: &mut Assembler, guest: GuestReg) -> HostReg {
        if let Some(i) = self.find_resident(guest) {
            self.touch(i);
            return Self::host_reg(i);
        }

        let i = self.pick_victim(asm);
        self.slots[i] = Slot { guest: Some(guest), dirty: false, locked: true, last_use: 0 };
        self.touch(i);
        asm.emit(HostOp::LoadGuest { dst: Self::host_reg(i), guest });
        Self::host_reg(i)
    }

    /// Allocates a host register that will receive a new value for `guest`;
    /// no load is emitted and the slot is marked dirty.
    ///
    /// A write to GPR 0 gets a scratch register that is never marked
    /// resident: $zero cannot be written, so the value must not be observable
    /// by later reads through the cache.
    pub fn alloc_out(&mut self, asm: &mut Assembler, guest: GuestReg) -> HostReg {
        if guest == GuestReg(0) {
            let i = self.pick_victim(asm);
            self.slots[i] = Slot { guest: None, dirty: false, locked: true, last_use: 0 };
            return Self::host_reg(i);
        }

        if let Some(i) = self.find_resident(guest) {
            self.touch(i);
            self.slots[i].dirty = true;
            return Self::host_reg(i);
        }

        let i = self.pick_victim(asm);
        self.slots[i] = Slot { guest: Some(guest), dirty: true, locked: true, last_use: 0 };
        self.touch(i);
        Self::host_reg(i)
    }

    /// Releases the per-instruction locks.
    pub fn unlock_all(&mut self) {
        for slot in &mut self.slots {
            slot.locked = false;
        }
    }

    /// Writes every dirty guest register back to the register file. Residency
    /// is kept; called before any block exit.
    pub fn writeback_all(&mut self, asm: &mut Assembler) {
        for i in 0..NUM_ALLOCATABLE {
            self.writeback(asm, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops_of(asm: Assembler) -> Vec<HostOp> {
        asm.finalize().ops().to_vec()
    }

    #[test]
    fn alloc_in_loads_once() {
        let mut cache = RegCache::new();
        let mut asm = Assembler::new();

        let first = cache.alloc_in(&mut asm, GuestReg(4));
        cache.unlock_all();
        let second = cache.alloc_in(&mut asm, GuestReg(4));
        assert_eq!(first, second);

        let ops = ops_of(asm);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], HostOp::LoadGuest { guest: GuestReg(4), .. }));
    }

    #[test]
    fn eviction_writes_back_dirty_registers() {
        let mut cache = RegCache::new();
        let mut asm = Assembler::new();

        // Fill every allocatable register with a dirty value
        for guest in 1..=NUM_ALLOCATABLE as u8 {
            cache.alloc_out(&mut asm, GuestReg(guest));
            cache.unlock_all();
        }

        // One more allocation must evict the least recently used slot and
        // write it back first
        cache.alloc_in(&mut asm, GuestReg(20));
        let ops = ops_of(asm);

        assert!(ops.iter().any(
            |op| matches!(op, HostOp::StoreGuest { guest: GuestReg(1), .. })
        ));
        assert!(matches!(ops.last(), Some(HostOp::LoadGuest { guest: GuestReg(20), .. })));
    }

    #[test]
    fn writeback_all_stores_only_dirty() {
        let mut cache = RegCache::new();
        let mut asm = Assembler::new();

        cache.alloc_in(&mut asm, GuestReg(5));
        cache.alloc_out(&mut asm, GuestReg(6));
        cache.unlock_all();
        cache.writeback_all(&mut asm);

        let ops = ops_of(asm);
        // One load for R5, one store for dirty R6, nothing for clean R5
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[1], HostOp::StoreGuest { guest: GuestReg(6), .. }));

        // A second writeback emits nothing
        let mut asm = Assembler::new();
        cache.writeback_all(&mut asm);
        assert!(ops_of(asm).is_empty());
    }

    #[test]
    fn zero_register_writes_are_scratch() {
        let mut cache = RegCache::new();
        let mut asm = Assembler::new();

        cache.alloc_out(&mut asm, GuestReg(0));
        cache.unlock_all();

        // The discarded write must not satisfy a later read of $zero
        cache.alloc_in(&mut asm, GuestReg(0));
        let ops = ops_of(asm);
        assert!(matches!(ops.last(), Some(HostOp::LoadGuest { guest: GuestReg(0), .. })));

        // And nothing gets written back for it
        let mut cache = RegCache::new();
        let mut asm = Assembler::new();
        cache.alloc_out(&mut asm, GuestReg(0));
        cache.unlock_all();
        cache.writeback_all(&mut asm);
        assert!(ops_of(asm).is_empty());
    }

    #[test]
    fn hi_and_lo_are_allocatable() {
        let mut cache = RegCache::new();
        let mut asm = Assembler::new();

        let hi = cache.alloc_out(&mut asm, GuestReg::HI);
        let lo = cache.alloc_out(&mut asm, GuestReg::LO);
        assert_ne!(hi, lo);
    }
}
