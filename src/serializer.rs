//! Binary bytecode wire format (spec §6.1): a flat, length-prefixed stream of
//! constant-pool entries followed by an entry-point index. Grounded on
//! `original_source/Caby/src/serializer.c`'s tag-then-payload layout, using
//! `byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt}` the way
//! `DESIGN.md` notes the teacher's own loader should have (hand-rolled
//! `from_le_bytes` there; this crate uses the crate the ecosystem reaches for).

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::vm::gc::{Gc, Roots};
use crate::vm::opcode::{instruction_size, Chunk, Loc};
use crate::vm::value::{ClassObj, FunctionObj, Object, ObjRef, StringObj, Value};
use crate::vm::{Table, VMError, VMResult};

const TAG_FUNCTION: u8 = 0x00;
const TAG_STRING: u8 = 0x01;
const TAG_CLASS: u8 = 0x02;

/// Serializes every constant-pool entry reachable through `gc`'s pool, in
/// pool order, followed by `entry_idx`.
pub fn write_program<W: Write>(gc: &Gc, entry_idx: u32, out: &mut W) -> VMResult<()> {
    let entries: Vec<ObjRef> = gc.const_pool().iter().collect();
    out.write_u32::<LittleEndian>(entries.len() as u32)?;
    for r in entries {
        write_entry(gc, r, out)?;
    }
    out.write_u32::<LittleEndian>(entry_idx)?;
    Ok(())
}

fn write_entry<W: Write>(gc: &Gc, r: ObjRef, out: &mut W) -> VMResult<()> {
    match gc.get(r) {
        Object::String(s) => {
            out.write_u8(TAG_STRING)?;
            out.write_u32::<LittleEndian>(s.bytes.len() as u32)?;
            out.write_all(&s.bytes)?;
        }
        Object::Function(f) => {
            out.write_u8(TAG_FUNCTION)?;
            write_function_body(f, out)?;
        }
        Object::Class(c) => {
            out.write_u8(TAG_CLASS)?;
            out.write_u32::<LittleEndian>(c.name)?;
            let methods: Vec<ObjRef> = c
                .methods
                .iter_live()
                .map(|(_, v)| match v {
                    Value::Object(mr) => mr,
                    _ => unreachable!("class method table values are always functions"),
                })
                .collect();
            out.write_u16::<LittleEndian>(methods.len() as u16)?;
            for mr in methods {
                match gc.get(mr) {
                    Object::Function(f) => write_function_body(f, out)?,
                    _ => unreachable!("class method table values are always functions"),
                }
            }
        }
        other => {
            return Err(VMError::IoError(format!(
                "constant pool entries must be string/function/class, found {other:?}"
            )))
        }
    }
    Ok(())
}

/// Writes a FUNCTION payload's fields (no leading tag byte — used both for
/// top-level entries and for a class's embedded methods, per spec §6.1).
fn write_function_body<W: Write>(f: &FunctionObj, out: &mut W) -> VMResult<()> {
    out.write_u32::<LittleEndian>(f.name)?;
    out.write_u8(f.arity)?;
    out.write_u16::<LittleEndian>(f.locals_max)?;
    let instructions = chunk_instructions(&f.chunk);
    out.write_u32::<LittleEndian>(instructions.len() as u32)?;
    for (bytes, loc) in instructions {
        out.write_all(bytes)?;
        out.write_u64::<LittleEndian>(loc.begin)?;
        out.write_u64::<LittleEndian>(loc.end)?;
    }
    Ok(())
}

/// Splits a chunk's flat byte buffer back into one slice per instruction,
/// paired with its parallel `locations` entry.
fn chunk_instructions(chunk: &Chunk) -> Vec<(&[u8], Loc)> {
    let mut out = Vec::with_capacity(chunk.locations.len());
    let mut ip = 0usize;
    for loc in &chunk.locations {
        let size = instruction_size(chunk.code[ip]).unwrap_or(1);
        out.push((&chunk.code[ip..ip + size], *loc));
        ip += size;
    }
    out
}

/// Deserializes a program written by [`write_program`], allocating every
/// constant-pool entry into `gc` in file order and returning the entry-point
/// index. `gc` should have its normal root set at this point (the VM hasn't
/// started running yet, so `Roots` here are all empty — matches the
/// compiler's own bootstrap convention of building with GC collection
/// effectively moot since nothing is garbage yet).
pub fn read_program<R: Read>(gc: &mut Gc, input: &mut R) -> VMResult<u32> {
    gc.enabled = false;
    let result = read_program_inner(gc, input);
    gc.enabled = true;
    result
}

fn read_program_inner<R: Read>(gc: &mut Gc, input: &mut R) -> VMResult<u32> {
    let count = input.read_u32::<LittleEndian>()?;
    for _ in 0..count {
        let tag = input.read_u8()?;
        let r = read_entry(gc, tag, input)?;
        gc.const_pool_mut().push(r);
    }
    let entry_idx = input.read_u32::<LittleEndian>()?;
    Ok(entry_idx)
}

fn read_entry<R: Read>(gc: &mut Gc, tag: u8, input: &mut R) -> VMResult<ObjRef> {
    match tag {
        TAG_STRING => {
            let len = input.read_u32::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            input.read_exact(&mut bytes)?;
            alloc(gc, Object::String(StringObj::new(bytes)))
        }
        TAG_FUNCTION => {
            let f = read_function_body(input)?;
            alloc(gc, Object::Function(f))
        }
        TAG_CLASS => {
            let name = input.read_u32::<LittleEndian>()?;
            let method_count = input.read_u16::<LittleEndian>()?;
            let mut methods = Table::new();
            for _ in 0..method_count {
                let f = read_function_body(input)?;
                let name_idx = f.name;
                let func_ref = alloc(gc, Object::Function(f))?;
                let key_ref = gc
                    .const_pool()
                    .get(name_idx)
                    .ok_or_else(|| VMError::IoError("method name references an unknown constant".to_string()))?;
                methods.set(Value::Object(key_ref), Value::Object(func_ref), gc);
            }
            alloc(gc, Object::Class(ClassObj { name, methods }))
        }
        other => Err(VMError::IoError(format!("unknown constant-pool tag 0x{other:02X}"))),
    }
}

fn read_function_body<R: Read>(input: &mut R) -> VMResult<FunctionObj> {
    let name = input.read_u32::<LittleEndian>()?;
    let arity = input.read_u8()?;
    let locals_max = input.read_u16::<LittleEndian>()?;
    let instruction_count = input.read_u32::<LittleEndian>()?;
    let mut chunk = Chunk::new();
    for _ in 0..instruction_count {
        let opcode = input.read_u8()?;
        let size = instruction_size(opcode)
            .ok_or_else(|| VMError::IoError(format!("unknown opcode 0x{opcode:02X} in bytecode file")))?;
        let mut bytes = vec![opcode];
        if size > 1 {
            let mut operand = vec![0u8; size - 1];
            input.read_exact(&mut operand)?;
            bytes.extend_from_slice(&operand);
        }
        let begin = input.read_u64::<LittleEndian>()?;
        let end = input.read_u64::<LittleEndian>()?;
        chunk.push_instruction(&bytes, Loc { begin, end });
    }
    Ok(FunctionObj {
        arity,
        locals_max,
        chunk,
        name,
    })
}

fn alloc(gc: &mut Gc, object: Object) -> VMResult<ObjRef> {
    let roots = Roots {
        constant_pool: &[],
        stack: &[],
        globals: &[],
        frame_locals: &[],
    };
    gc.alloc_object(object, &roots)
}

/// A thin helper used by the CLI: reads a whole file's bytes, then
/// deserializes it.
pub fn read_program_from_bytes(gc: &mut Gc, bytes: &[u8]) -> VMResult<u32> {
    let mut cursor = io::Cursor::new(bytes);
    read_program(gc, &mut cursor)
}
