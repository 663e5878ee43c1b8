//! Bytecode encoding: opcode tags, instruction sizes, chunks and the
//! constant pool (spec §4.4).
//!
//! A [`Chunk`] is a flat byte buffer plus a parallel, per-instruction source
//! location table. Branch/jump operands are absolute byte offsets within the
//! owning function's chunk.

use std::fmt;

/// One-byte opcode tags. Values are assigned once and must stay stable: they
/// are also the wire-format tag (spec §6.1).
pub mod op {
    pub const RETURN: u8 = 0x00;
    pub const LABEL: u8 = 0x01;
    pub const DROP: u8 = 0x02;
    pub const DUP: u8 = 0x03;
    pub const PUSH_NONE: u8 = 0x04;
    pub const IADD: u8 = 0x05;
    pub const ISUB: u8 = 0x06;
    pub const IMUL: u8 = 0x07;
    pub const IDIV: u8 = 0x08;
    pub const IMOD: u8 = 0x09;
    pub const IAND: u8 = 0x0A;
    pub const IOR: u8 = 0x0B;
    pub const INEG: u8 = 0x0C;
    pub const EQ: u8 = 0x0D;
    pub const NEQ: u8 = 0x0E;
    pub const ILT: u8 = 0x0F;
    pub const ILE: u8 = 0x10;
    pub const IGT: u8 = 0x11;
    pub const IGE: u8 = 0x12;

    // 2-byte: opcode + u8
    pub const DROPN: u8 = 0x20;
    pub const PUSH_BOOL: u8 = 0x21;
    pub const PRINT: u8 = 0x22;
    pub const CALL: u8 = 0x23;

    // 3-byte: opcode + u16 (or i16)
    pub const PUSH_SHORT: u8 = 0x30;
    pub const JMP_SHORT: u8 = 0x31;
    pub const BRANCH_SHORT: u8 = 0x32;
    pub const BRANCH_FALSE_SHORT: u8 = 0x33;
    pub const GET_LOCAL: u8 = 0x34;
    pub const SET_LOCAL: u8 = 0x35;

    // 5-byte: opcode + u32/i32
    pub const PUSH_INT: u8 = 0x40;
    pub const PUSH_LITERAL: u8 = 0x41;
    pub const JMP: u8 = 0x42;
    pub const BRANCH: u8 = 0x43;
    pub const BRANCH_FALSE: u8 = 0x44;
    pub const GET_GLOBAL: u8 = 0x45;
    pub const SET_GLOBAL: u8 = 0x46;
    pub const VAL_GLOBAL: u8 = 0x47;
    pub const VAR_GLOBAL: u8 = 0x48;
    pub const NEW_OBJECT: u8 = 0x49;
    pub const GET_MEMBER: u8 = 0x4A;
    pub const SET_MEMBER: u8 = 0x4B;

    // 6-byte: opcode + u32 + u8
    pub const DISPATCH_METHOD: u8 = 0x50;
}

/// Total encoded size (opcode byte included) for a given opcode tag, or
/// `None` for an unrecognized byte. `BRANCH_FALSE_LONG` from early drafts is
/// deliberately absent (spec §9's open question): encountering an unknown
/// byte here surfaces as `VMError::UnknownOpcode`.
pub fn instruction_size(opcode: u8) -> Option<usize> {
    use op::*;
    Some(match opcode {
        RETURN | LABEL | DROP | DUP | PUSH_NONE | IADD | ISUB | IMUL | IDIV | IMOD | IAND
        | IOR | INEG | EQ | NEQ | ILT | ILE | IGT | IGE => 1,
        DROPN | PUSH_BOOL | PRINT | CALL => 2,
        PUSH_SHORT | JMP_SHORT | BRANCH_SHORT | BRANCH_FALSE_SHORT | GET_LOCAL | SET_LOCAL => 3,
        PUSH_INT | PUSH_LITERAL | JMP | BRANCH | BRANCH_FALSE | GET_GLOBAL | SET_GLOBAL
        | VAL_GLOBAL | VAR_GLOBAL | NEW_OBJECT | GET_MEMBER | SET_MEMBER => 5,
        DISPATCH_METHOD => 6,
        _ => return None,
    })
}

/// Human-readable mnemonic, for the disassembler and error messages.
pub fn mnemonic(opcode: u8) -> &'static str {
    use op::*;
    match opcode {
        RETURN => "RETURN",
        LABEL => "LABEL",
        DROP => "DROP",
        DUP => "DUP",
        PUSH_NONE => "PUSH_NONE",
        IADD => "IADD",
        ISUB => "ISUB",
        IMUL => "IMUL",
        IDIV => "IDIV",
        IMOD => "IMOD",
        IAND => "IAND",
        IOR => "IOR",
        INEG => "INEG",
        EQ => "EQ",
        NEQ => "NEQ",
        ILT => "ILT",
        ILE => "ILE",
        IGT => "IGT",
        IGE => "IGE",
        DROPN => "DROPN",
        PUSH_BOOL => "PUSH_BOOL",
        PRINT => "PRINT",
        CALL => "CALL",
        PUSH_SHORT => "PUSH_SHORT",
        JMP_SHORT => "JMP_SHORT",
        BRANCH_SHORT => "BRANCH_SHORT",
        BRANCH_FALSE_SHORT => "BRANCH_FALSE_SHORT",
        GET_LOCAL => "GET_LOCAL",
        SET_LOCAL => "SET_LOCAL",
        PUSH_INT => "PUSH_INT",
        PUSH_LITERAL => "PUSH_LITERAL",
        JMP => "JMP",
        BRANCH => "BRANCH",
        BRANCH_FALSE => "BRANCH_FALSE",
        GET_GLOBAL => "GET_GLOBAL",
        SET_GLOBAL => "SET_GLOBAL",
        VAL_GLOBAL => "VAL_GLOBAL",
        VAR_GLOBAL => "VAR_GLOBAL",
        NEW_OBJECT => "NEW_OBJECT",
        GET_MEMBER => "GET_MEMBER",
        SET_MEMBER => "SET_MEMBER",
        DISPATCH_METHOD => "DISPATCH_METHOD",
        _ => "UNKNOWN",
    }
}

/// Source-location span attached to a single instruction, `[begin, end]`
/// byte offsets into the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    pub begin: u64,
    pub end: u64,
}

/// A function's compiled bytecode: instruction bytes plus one location entry
/// per instruction (spec §3's `BytecodeChunk`).
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub locations: Vec<Loc>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one instruction (opcode byte already the first element of
    /// `bytes`) together with its source location.
    pub fn push_instruction(&mut self, bytes: &[u8], loc: Loc) {
        self.code.extend_from_slice(bytes);
        self.locations.push(loc);
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Finds the location entry covering `byte_offset` by counting
    /// instructions from the start of the chunk (spec §3: "computed by
    /// counting instructions starting at offset 0 using the per-opcode size
    /// table").
    pub fn location_at(&self, byte_offset: usize) -> Option<Loc> {
        let mut ip = 0usize;
        for (i, loc) in self.locations.iter().enumerate() {
            if ip == byte_offset {
                return Some(*loc);
            }
            let size = instruction_size(self.code[ip])?;
            ip += size;
            let _ = i;
        }
        None
    }
}

/// Program-wide literal pool: an ordered, immutable-after-load sequence of
/// heap object references (spec §3's `ConstantPool`). Entries are indices
/// into the VM's `Gc` heap.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<usize>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, obj_ref: usize) -> u32 {
        let idx = self.entries.len() as u32;
        self.entries.push(obj_ref);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<usize> {
        self.entries.get(idx as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().copied()
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}
