//! MIPS-I instruction decoding and block-level disassembly

/// One decoded guest instruction. Fields are extracted on demand from the raw
/// word; the first 6 bits identify the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub raw: u32,
}

impl Opcode {
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self { raw }
    }

    pub fn primary(self) -> u32 {
        self.raw >> 26
    }

    pub fn rs(self) -> u32 {
        (self.raw >> 21) & 0x1F
    }

    pub fn rt(self) -> u32 {
        (self.raw >> 16) & 0x1F
    }

    pub fn rd(self) -> u32 {
        (self.raw >> 11) & 0x1F
    }

    pub fn shamt(self) -> u32 {
        (self.raw >> 6) & 0x1F
    }

    pub fn funct(self) -> u32 {
        self.raw & 0x3F
    }

    pub fn imm(self) -> u32 {
        self.raw & 0xFFFF
    }

    pub fn simm(self) -> i32 {
        i32::from(self.raw as i16)
    }

    /// 26-bit jump target field (word index within the 256MB region).
    pub fn target(self) -> u32 {
        self.raw & 0x03FF_FFFF
    }

    /// Same instruction with the primary opcode replaced; used when an access
    /// needs to be replayed through the interpreter as a different width.
    #[must_use]
    pub fn with_primary(self, primary: u32) -> Self {
        Self { raw: (self.raw & 0x03FF_FFFF) | (primary << 26) }
    }
}

/// Whether this instruction ends a block (control transfer or trap).
pub(crate) fn is_block_terminal(op: Opcode) -> bool {
    match op.primary() {
        // REGIMM branches, J, JAL, BEQ, BNE, BLEZ, BGTZ
        0x01..=0x07 => true,
        0x00 => matches!(op.funct(), 0x08 | 0x09 | 0x0C | 0x0D),
        _ => false,
    }
}

/// Control transfers execute one more instruction before the transfer takes
/// effect; traps do not.
pub(crate) fn has_delay_slot(op: Opcode) -> bool {
    is_block_terminal(op) && !(op.primary() == 0x00 && matches!(op.funct(), 0x0C | 0x0D))
}

/// Decodes one block's worth of instructions from a little-endian code
/// stream: everything up to and including the first control transfer and its
/// delay slot, bounded by the end of the stream.
pub(crate) fn disassemble(code: &[u8]) -> Vec<Opcode> {
    let mut list = Vec::new();

    let mut words = code.chunks_exact(4);
    while let Some(chunk) = words.next() {
        let op = Opcode::new(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        list.push(op);

        if is_block_terminal(op) {
            if has_delay_slot(op) {
                if let Some(chunk) = words.next() {
                    list.push(Opcode::new(u32::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                    ])));
                }
            }
            break;
        }
    }

    list
}

/// Guest cycle cost of one instruction. Most R3000 instructions retire in a
/// single cycle; multiply and divide stall the pipeline for longer.
pub(crate) fn cycles_of_opcode(op: Opcode) -> u32 {
    if op.primary() == 0x00 {
        match op.funct() {
            // MULT, MULTU
            0x18 | 0x19 => 12,
            // DIV, DIVU
            0x1A | 0x1B => 35,
            _ => 1,
        }
    } else {
        1
    }
}

/// Human-readable rendering for trace logs.
pub(crate) fn instruction_str(op: Opcode) -> String {
    let (rs, rt, rd) = (op.rs(), op.rt(), op.rd());

    match op.primary() {
        0x00 => match op.funct() {
            0x00 if op.raw == 0 => "NOP".into(),
            0x00 => format!("SLL R{rd}, R{rt}, {}", op.shamt()),
            0x02 => format!("SRL R{rd}, R{rt}, {}", op.shamt()),
            0x03 => format!("SRA R{rd}, R{rt}, {}", op.shamt()),
            0x04 => format!("SLLV R{rd}, R{rt}, R{rs}"),
            0x06 => format!("SRLV R{rd}, R{rt}, R{rs}"),
            0x07 => format!("SRAV R{rd}, R{rt}, R{rs}"),
            0x08 => format!("JR R{rs}"),
            0x09 => format!("JALR R{rd}, R{rs}"),
            0x0C => "SYSCALL".into(),
            0x0D => "BREAK".into(),
            0x10 => format!("MFHI R{rd}"),
            0x11 => format!("MTHI R{rs}"),
            0x12 => format!("MFLO R{rd}"),
            0x13 => format!("MTLO R{rs}"),
            0x18 => format!("MULT R{rs}, R{rt}"),
            0x19 => format!("MULTU R{rs}, R{rt}"),
            0x1A => format!("DIV R{rs}, R{rt}"),
            0x1B => format!("DIVU R{rs}, R{rt}"),
            0x20 => format!("ADD R{rd}, R{rs}, R{rt}"),
            0x21 => format!("ADDU R{rd}, R{rs}, R{rt}"),
            0x22 => format!("SUB R{rd}, R{rs}, R{rt}"),
            0x23 => format!("SUBU R{rd}, R{rs}, R{rt}"),
            0x24 => format!("AND R{rd}, R{rs}, R{rt}"),
            0x25 => format!("OR R{rd}, R{rs}, R{rt}"),
            0x26 => format!("XOR R{rd}, R{rs}, R{rt}"),
            0x27 => format!("NOR R{rd}, R{rs}, R{rt}"),
            0x2A => format!("SLT R{rd}, R{rs}, R{rt}"),
            0x2B => format!("SLTU R{rd}, R{rs}, R{rt}"),
            _ => format!("??? ({:08X})", op.raw),
        },
        0x01 => match rt {
            0x10 => format!("BLTZAL R{rs}, {}", op.simm() << 2),
            0x11 => format!("BGEZAL R{rs}, {}", op.simm() << 2),
            _ if rt & 1 == 0 => format!("BLTZ R{rs}, {}", op.simm() << 2),
            _ => format!("BGEZ R{rs}, {}", op.simm() << 2),
        },
        0x02 => format!("J {:08X}", op.target() << 2),
        0x03 => format!("JAL {:08X}", op.target() << 2),
        0x04 => format!("BEQ R{rs}, R{rt}, {}", op.simm() << 2),
        0x05 => format!("BNE R{rs}, R{rt}, {}", op.simm() << 2),
        0x06 => format!("BLEZ R{rs}, {}", op.simm() << 2),
        0x07 => format!("BGTZ R{rs}, {}", op.simm() << 2),
        0x08 => format!("ADDI R{rt}, R{rs}, {}", op.simm()),
        0x09 => format!("ADDIU R{rt}, R{rs}, {}", op.simm()),
        0x0A => format!("SLTI R{rt}, R{rs}, {}", op.simm()),
        0x0B => format!("SLTIU R{rt}, R{rs}, {}", op.simm()),
        0x0C => format!("ANDI R{rt}, R{rs}, {:04X}", op.imm()),
        0x0D => format!("ORI R{rt}, R{rs}, {:04X}", op.imm()),
        0x0E => format!("XORI R{rt}, R{rs}, {:04X}", op.imm()),
        0x0F => format!("LUI R{rt}, {:04X}", op.imm()),
        0x10..=0x13 => {
            let cop = op.primary() & 3;
            match rs {
                0x00 => format!("MFC{cop} R{rt}, {rd}"),
                0x02 => format!("CFC{cop} R{rt}, {rd}"),
                0x04 => format!("MTC{cop} R{rt}, {rd}"),
                0x06 => format!("CTC{cop} R{rt}, {rd}"),
                0x10..=0x1F => format!("COP{cop} {:07X}", op.raw & 0x01FF_FFFF),
                _ => format!("??? ({:08X})", op.raw),
            }
        }
        0x20 => format!("LB R{rt}, {}(R{rs})", op.simm()),
        0x21 => format!("LH R{rt}, {}(R{rs})", op.simm()),
        0x22 => format!("LWL R{rt}, {}(R{rs})", op.simm()),
        0x23 => format!("LW R{rt}, {}(R{rs})", op.simm()),
        0x24 => format!("LBU R{rt}, {}(R{rs})", op.simm()),
        0x25 => format!("LHU R{rt}, {}(R{rs})", op.simm()),
        0x26 => format!("LWR R{rt}, {}(R{rs})", op.simm()),
        0x28 => format!("SB R{rt}, {}(R{rs})", op.simm()),
        0x29 => format!("SH R{rt}, {}(R{rs})", op.simm()),
        0x2A => format!("SWL R{rt}, {}(R{rs})", op.simm()),
        0x2B => format!("SW R{rt}, {}(R{rs})", op.simm()),
        0x2E => format!("SWR R{rt}, {}(R{rs})", op.simm()),
        0x32 => format!("LWC2 R{rt}, {}(R{rs})", op.simm()),
        0x3A => format!("SWC2 R{rt}, {}(R{rs})", op.simm()),
        _ => format!("??? ({:08X})", op.raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(ops: &[u32]) -> Vec<u8> {
        ops.iter().flat_map(|op| op.to_le_bytes()).collect()
    }

    #[test]
    fn field_extraction() {
        // ADDIU R1, R2, -4
        let op = Opcode::new((0x09 << 26) | (2 << 21) | (1 << 16) | 0xFFFC);
        assert_eq!(op.primary(), 0x09);
        assert_eq!(op.rs(), 2);
        assert_eq!(op.rt(), 1);
        assert_eq!(op.imm(), 0xFFFC);
        assert_eq!(op.simm(), -4);
    }

    #[test]
    fn block_ends_after_jump_delay_slot() {
        let code = words(&[
            (0x09 << 26) | (1 << 16) | 1,          // ADDIU R1, R0, 1
            (0x00 << 26) | (31 << 21) | 0x08,      // JR R31
            (0x09 << 26) | (2 << 16) | 2,          // ADDIU R2, R0, 2 (delay slot)
            (0x09 << 26) | (3 << 16) | 3,          // never disassembled
        ]);

        let list = disassemble(&code);
        assert_eq!(list.len(), 3);
        assert!(is_block_terminal(list[1]));
        assert!(has_delay_slot(list[1]));
    }

    #[test]
    fn block_ends_at_syscall_without_delay_slot() {
        let code = words(&[
            0x0000_000C,                           // SYSCALL
            (0x09 << 26) | (1 << 16) | 1,
        ]);

        let list = disassemble(&code);
        assert_eq!(list.len(), 1);
        assert!(!has_delay_slot(list[0]));
    }

    #[test]
    fn block_bounded_by_region_end() {
        let code = words(&[(0x09 << 26) | (1 << 16) | 1, (0x0F << 26) | (2 << 16) | 0x8000]);

        let list = disassemble(&code);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn regimm_decode_quirk() {
        // Any regimm field other than BLTZAL/BGEZAL decodes as BLTZ/BGEZ on
        // bit 16
        let bltz = Opcode::new((0x01 << 26) | (5 << 21) | (0x02 << 16) | 4);
        let bgez = Opcode::new((0x01 << 26) | (5 << 21) | (0x03 << 16) | 4);
        assert!(instruction_str(bltz).starts_with("BLTZ"));
        assert!(instruction_str(bgez).starts_with("BGEZ"));
    }

    #[test]
    fn mult_and_div_cost_more() {
        let mult = Opcode::new((1 << 21) | (2 << 16) | 0x18);
        let div = Opcode::new((1 << 21) | (2 << 16) | 0x1A);
        let addu = Opcode::new((1 << 21) | (2 << 16) | (3 << 11) | 0x21);
        assert_eq!(cycles_of_opcode(mult), 12);
        assert_eq!(cycles_of_opcode(div), 35);
        assert_eq!(cycles_of_opcode(addu), 1);
    }
}
