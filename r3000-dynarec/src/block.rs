//! Translated block records

use crate::disasm::Opcode;
use crate::jit::HostFn;
use crate::memory::CodeRange;

/// One translated block: a straight-line run of guest instructions ending at
/// the first control transfer, callable through `function`.
///
/// The two resident trampolines are also blocks; they have no source code
/// range and no opcode list. Dropping a block releases its decoded opcodes
/// and its finished host code.
pub struct Block {
    /// Guest PC the block was translated from.
    pub pc: u32,
    pub kunseg_pc: u32,
    /// Location of the source instruction words, absent for trampolines.
    pub code: Option<CodeRange>,
    pub opcode_list: Option<Vec<Opcode>>,
    /// Host entry point of the translated code.
    pub function: HostFn,
    /// Total guest cycles of the block, delay slots included.
    pub cycles: u32,
    /// Checksum of the source words at translation time.
    pub hash: u32,
}
