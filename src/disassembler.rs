//! Pretty-printer for a compiled program (spec §6.2's `disassemble`
//! command). One instruction per row: offset, mnemonic, operand, and the
//! resolved constant for opcodes that reference the pool. Grounded on
//! `original_source/Caby/src/dissasembler.c`'s one-instruction-per-line
//! textual form, rendered through `comfy-table` the way teacher's
//! `cli/commands.rs` renders its summary tables (`UTF8_FULL` preset).

use comfy_table::{Cell, Table as ComfyTable};

use crate::vm::gc::Gc;
use crate::vm::opcode::{instruction_size, mnemonic, op, Chunk};
use crate::vm::value::{Object, ObjRef};

/// Disassembles every function reachable from the constant pool (top-level
/// functions and class methods), returning one table per function alongside
/// its display name.
pub fn disassemble_program(gc: &Gc) -> Vec<(String, ComfyTable)> {
    let mut out = Vec::new();
    for r in gc.const_pool().iter() {
        match gc.get(r) {
            Object::Function(f) => {
                let name = constant_string(gc, f.name).unwrap_or_else(|| format!("<fn@{r}>"));
                out.push((name, disassemble_chunk(gc, &f.chunk)));
            }
            Object::Class(c) => {
                let class_name = constant_string(gc, c.name).unwrap_or_else(|| format!("<class@{r}>"));
                for (_, v) in c.methods.iter_live() {
                    if let crate::vm::value::Value::Object(mr) = v {
                        if let Object::Function(f) = gc.get(mr) {
                            let method_name = constant_string(gc, f.name).unwrap_or_else(|| "?".to_string());
                            out.push((format!("{class_name}.{method_name}"), disassemble_chunk(gc, &f.chunk)));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Disassembles one function's chunk into a `comfy-table` with columns
/// `offset | mnemonic | operand | constant`.
pub fn disassemble_chunk(gc: &Gc, chunk: &Chunk) -> ComfyTable {
    let mut table = ComfyTable::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["offset", "op", "operand", "constant"]);

    let mut ip = 0usize;
    for loc in &chunk.locations {
        let opcode = chunk.code[ip];
        let size = instruction_size(opcode).unwrap_or(1);
        let operand_bytes = &chunk.code[ip + 1..ip + size];
        let operand_text = render_operand(opcode, operand_bytes);
        let constant_text = resolve_constant(gc, opcode, operand_bytes).unwrap_or_default();
        table.add_row(vec![
            Cell::new(format!("{ip:04}")),
            Cell::new(mnemonic(opcode)),
            Cell::new(operand_text),
            Cell::new(constant_text),
        ]);
        let _ = loc;
        ip += size;
    }
    table
}

fn render_operand(opcode: u8, bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match opcode {
        op::PUSH_BOOL => format!("{}", bytes[0] != 0),
        op::DROPN | op::PRINT | op::CALL => format!("{}", bytes[0]),
        op::PUSH_SHORT | op::JMP_SHORT | op::BRANCH_SHORT | op::BRANCH_FALSE_SHORT => {
            format!("{}", u16::from_le_bytes([bytes[0], bytes[1]]))
        }
        op::GET_LOCAL | op::SET_LOCAL => format!("slot {}", u16::from_le_bytes([bytes[0], bytes[1]])),
        op::PUSH_INT => format!("{}", i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        op::JMP | op::BRANCH | op::BRANCH_FALSE => {
            format!("-> {:04}", u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        op::PUSH_LITERAL | op::GET_GLOBAL | op::SET_GLOBAL | op::VAL_GLOBAL | op::VAR_GLOBAL | op::NEW_OBJECT
        | op::GET_MEMBER | op::SET_MEMBER => {
            format!("#{}", u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        op::DISPATCH_METHOD => format!(
            "#{} argc={}",
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            bytes[4]
        ),
        _ => bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" "),
    }
}

/// For constant-referencing opcodes, resolves and renders the referenced
/// pool entry (string text, `<function ...>`, `<class ...>`) for readability.
fn resolve_constant(gc: &Gc, opcode: u8, bytes: &[u8]) -> Option<String> {
    let idx = match opcode {
        op::PUSH_LITERAL | op::GET_GLOBAL | op::SET_GLOBAL | op::VAL_GLOBAL | op::VAR_GLOBAL | op::NEW_OBJECT
        | op::GET_MEMBER | op::SET_MEMBER => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        op::DISPATCH_METHOD => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        _ => return None,
    };
    let r: ObjRef = gc.const_pool().get(idx)?;
    Some(match gc.get(r) {
        Object::String(s) => format!("{:?}", s.as_str()),
        Object::Function(_) => "<function>".to_string(),
        Object::Class(_) => "<class>".to_string(),
        _ => return None,
    })
}

fn constant_string(gc: &Gc, name_idx: u32) -> Option<String> {
    let r = gc.const_pool().get(name_idx)?;
    match gc.get(r) {
        Object::String(s) => Some(s.as_str().into_owned()),
        _ => None,
    }
}
