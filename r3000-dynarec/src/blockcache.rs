//! Cache of translated blocks, keyed by guest PC

use crate::block::Block;
use crate::memory::MemMap;
use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::HashMap;
use std::rc::Rc;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct BlockCache {
    blocks: HashMap<u32, Rc<Block>>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self { blocks: HashMap::new() }
    }

    pub fn find(&self, pc: u32) -> Option<&Rc<Block>> {
        self.blocks.get(&pc)
    }

    pub fn register(&mut self, block: Rc<Block>) {
        self.blocks.insert(block.pc, block);
    }

    pub fn unregister(&mut self, pc: u32) -> Option<Rc<Block>> {
        self.blocks.remove(&pc)
    }
}

/// Checksum over the source instruction words the block was translated from.
/// Trampoline blocks have no source; their hash is zero.
pub fn calculate_block_hash(maps: &[MemMap], block: &Block) -> u32 {
    let (Some(range), Some(opcode_list)) = (block.code, block.opcode_list.as_ref()) else {
        return 0;
    };

    let bytes = maps[range.map].bytes().expect("block code range points at an MMIO region");
    let start = range.offset as usize;
    let end = start + opcode_list.len() * 4;
    CRC32.checksum(&bytes[start..end])
}

/// Whether the guest bytes covered by the block have changed since it was
/// translated.
pub fn is_outdated(maps: &[MemMap], block: &Block) -> bool {
    calculate_block_hash(maps, block) != block.hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::Opcode;
    use crate::jit::{Assembler, HostFn, HostOp};
    use crate::memory::CodeRange;
    use std::rc::Rc;

    fn dummy_block(pc: u32, maps: &[MemMap], range: CodeRange) -> Block {
        let mut asm = Assembler::new();
        asm.emit(HostOp::Ret);

        let mut block = Block {
            pc,
            kunseg_pc: pc,
            code: Some(range),
            opcode_list: Some(vec![Opcode::new(0); 4]),
            function: HostFn::new(Rc::new(asm.finalize()), 0),
            cycles: 4,
            hash: 0,
        };
        block.hash = calculate_block_hash(maps, &block);
        block
    }

    #[test]
    fn register_and_find() {
        let maps = [MemMap::zeroed(0, 0x1000)];
        let range = CodeRange { map: 0, offset: 0x100 };

        let mut cache = BlockCache::new();
        assert!(cache.find(0x100).is_none());

        cache.register(Rc::new(dummy_block(0x100, &maps, range)));
        assert!(cache.find(0x100).is_some());

        cache.unregister(0x100);
        assert!(cache.find(0x100).is_none());
    }

    #[test]
    fn hash_drifts_when_code_changes() {
        let mut maps = [MemMap::zeroed(0, 0x1000)];
        let range = CodeRange { map: 0, offset: 0x100 };
        let block = dummy_block(0x100, &maps, range);

        assert!(!is_outdated(&maps, &block));

        // Mutating a covered byte must be detected
        maps[0].bytes_mut().unwrap()[0x104] = 0xFF;
        assert!(is_outdated(&maps, &block));

        // Bytes outside the covered range do not matter
        maps[0].bytes_mut().unwrap()[0x104] = 0;
        maps[0].bytes_mut().unwrap()[0x200] = 0xFF;
        assert!(!is_outdated(&maps, &block));
    }
}
