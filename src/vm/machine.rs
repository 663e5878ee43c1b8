//! The interpreter loop (spec §4.5): the `VM` struct, its dispatch loop over
//! a function's bytecode, and the allocation/GC-trigger path every opcode
//! that allocates goes through.
//!
//! Grounded on teacher's `src/vm/machine.rs` for the struct shape
//! (`debug_mode`/`trace_enabled` fields, `new_with_config` convention),
//! generalized from the teacher's `HashMap<String, Value>`-scoped variables
//! to spec §3's slot-window locals plus a single globals table. Opcode
//! semantics are grounded on `original_source/Caby/src/vm.c`'s `push`/`pop`/
//! `peek`, frame push/pop and `runtime_error` (which attaches the *current*
//! instruction's source location to the error, reproduced here by `fetch`
//! capturing `Loc` before dispatch).

use std::time::Instant;

use super::errors::{LocatedError, VMError, VMResult};
use super::frame::{CallFrame, MAX_FRAME_DEPTH};
use super::gc::{Gc, Roots};
use super::opcode::{self, mnemonic, op, Loc};
use super::table::Table;
use super::value::{NativeFn, Object, ObjRef, StringObj, Value};

/// The bytecode interpreter: operand stack, frame stack, a single
/// VM-wide `locals` array windowed per frame by `slots_base`, the globals
/// table, and the heap (`Gc`).
pub struct VM {
    pub gc: Gc,
    pub stack: Vec<Value>,
    pub locals: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub globals: Table,
    pub ip: usize,
    pub debug_mode: bool,
    pub trace_enabled: bool,
    pub start_time: Instant,
}

/// A small owned snapshot of one instruction: the opcode byte, its operand
/// bytes (zero-padded into a fixed buffer, since the longest encoding is
/// `DISPATCH_METHOD`'s 6 bytes), the total instruction size, and the source
/// location to blame if executing it fails.
struct Fetched {
    opcode: u8,
    operand: [u8; 5],
    size: usize,
    loc: Loc,
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_i16(b: &[u8]) -> i16 {
    i16::from_le_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

impl VM {
    pub fn new(gc: Gc) -> Self {
        Self::new_with_config(gc, false, false)
    }

    pub fn new_with_config(gc: Gc, debug_mode: bool, trace_enabled: bool) -> Self {
        VM {
            gc,
            stack: Vec::with_capacity(256),
            locals: Vec::new(),
            frames: Vec::with_capacity(MAX_FRAME_DEPTH),
            globals: Table::new(),
            ip: 0,
            debug_mode,
            trace_enabled,
            start_time: Instant::now(),
        }
    }

    /// Binds the three host natives (spec §4.6) as globals before the first
    /// frame runs. Disables the GC for the duration, matching
    /// `compiler::compile`'s and `serializer::read_program`'s bootstrap
    /// convention: `define_native` allocates a name string and then a
    /// `NativeFunction` object before either is reachable from `globals`, so
    /// a `--gc-stress` collection between the two would sweep the unrooted
    /// name and leave a dangling `ObjRef` key behind.
    pub fn bootstrap_natives(&mut self) -> VMResult<()> {
        self.gc.enabled = false;
        let result = self.bootstrap_natives_inner();
        self.gc.enabled = true;
        result
    }

    fn bootstrap_natives_inner(&mut self) -> VMResult<()> {
        self.define_native("clock", Some(0), super::native::native_clock)?;
        self.define_native("pow", Some(2), super::native::native_pow)?;
        self.define_native("print", None, super::native::native_print)?;
        Ok(())
    }

    fn define_native(&mut self, name: &'static str, arity: Option<usize>, func: NativeFn) -> VMResult<()> {
        let name_ref = self.alloc(Object::String(StringObj::new(name.as_bytes().to_vec())))?;
        let native_ref = self.alloc(Object::NativeFunction(super::value::NativeFunctionObj {
            name,
            arity,
            func,
        }))?;
        self.globals.set(Value::Object(name_ref), Value::Object(native_ref), &self.gc);
        Ok(())
    }

    /// Allocates `object`, building the root set from the VM's current
    /// state (spec §4.2: constant pool, stack, globals, every frame's live
    /// locals window).
    fn alloc(&mut self, object: Object) -> VMResult<ObjRef> {
        let const_scratch: Vec<Value> = self.gc.const_pool().iter().map(Value::Object).collect();
        let global_scratch: Vec<(Value, Value)> = self.globals.iter_live().collect();
        let mut frame_scratch: Vec<&[Value]> = Vec::with_capacity(self.frames.len());
        for f in &self.frames {
            let locals_max = match self.gc.get(f.function) {
                Object::Function(func) => func.locals_max as usize,
                _ => 0,
            };
            frame_scratch.push(&self.locals[f.slots_base..f.slots_base + locals_max]);
        }
        let roots = Roots {
            constant_pool: &const_scratch,
            stack: &self.stack,
            globals: &global_scratch,
            frame_locals: &frame_scratch,
        };
        self.gc.alloc_object(object, &roots)
    }

    fn must_pop(&mut self, op_name: &'static str) -> VMResult<Value> {
        self.stack.pop().ok_or(VMError::StackUnderflow(op_name))
    }

    fn const_value(&self, idx: u32) -> VMResult<Value> {
        self.gc
            .const_pool()
            .get(idx)
            .map(Value::Object)
            .ok_or(VMError::IndexOutOfBounds {
                index: idx as usize,
                length: self.gc.const_pool().len(),
            })
    }

    fn const_string(&self, idx: u32) -> VMResult<String> {
        match self.const_value(idx)? {
            Value::Object(r) => match self.gc.get(r) {
                Object::String(s) => Ok(s.as_str().into_owned()),
                _ => Err(VMError::TypeMismatch {
                    expected: "string constant".to_string(),
                    got: "non-string constant".to_string(),
                    operation: "name lookup",
                }),
            },
            _ => unreachable!("const_value always yields Value::Object"),
        }
    }

    /// Reads the instruction at the current `ip` in the active frame's
    /// chunk without advancing anything, so callers can copy it into owned
    /// locals before running any logic that might need `&mut self.gc`.
    fn fetch(&self) -> Fetched {
        let frame = *self.frames.last().expect("at least one frame while running");
        match self.gc.get(frame.function) {
            Object::Function(f) => {
                let code = &f.chunk.code;
                let opcode = code[self.ip];
                let size = opcode::instruction_size(opcode).unwrap_or(1);
                let mut operand = [0u8; 5];
                let end = (self.ip + size).min(code.len());
                let operand_len = end - self.ip - 1;
                if operand_len > 0 {
                    operand[..operand_len].copy_from_slice(&code[self.ip + 1..end]);
                }
                let loc = f.chunk.location_at(self.ip).unwrap_or_default();
                Fetched { opcode, operand, size, loc }
            }
            _ => unreachable!("a call frame's function is always an Object::Function"),
        }
    }

    /// Runs the function at `entry_idx` in the constant pool as the
    /// program's entry point, returning the single value left on the stack
    /// when the outermost frame executes `RETURN` (spec §3's "operand stack
    /// length after RETURN equals 1 at the top frame" invariant).
    pub fn run(&mut self, entry_idx: u32) -> Result<Value, LocatedError> {
        let entry_ref = match self.const_value(entry_idx) {
            Ok(Value::Object(r)) => r,
            Ok(_) => unreachable!(),
            Err(e) => return Err(LocatedError { error: e, loc: None }),
        };
        let locals_max = match self.gc.get(entry_ref) {
            Object::Function(f) => f.locals_max as usize,
            _ => {
                return Err(LocatedError {
                    error: VMError::NotCallable("non-function entry point".to_string()),
                    loc: None,
                })
            }
        };
        self.locals.resize(locals_max, Value::None);
        self.frames.push(CallFrame {
            function: entry_ref,
            return_ip: 0,
            slots_base: 0,
        });
        self.ip = 0;

        loop {
            let fetched = self.fetch();
            self.ip += fetched.size;
            if self.trace_enabled {
                eprintln!(
                    "trace: ip={:04} op={:<18} stack_depth={}",
                    self.ip - fetched.size,
                    mnemonic(fetched.opcode),
                    self.stack.len()
                );
            }
            match self.dispatch(fetched.opcode, &fetched.operand[..fetched.size.saturating_sub(1)]) {
                Ok(true) => return Ok(self.stack.pop().unwrap_or(Value::None)),
                Ok(false) => continue,
                Err(e) => return Err(LocatedError { error: e, loc: Some(fetched.loc) }),
            }
        }
    }

    /// Executes one instruction. Returns `Ok(true)` when the program has
    /// halted (the outermost frame executed `RETURN`).
    fn dispatch(&mut self, opcode: u8, operand: &[u8]) -> VMResult<bool> {
        match opcode {
            op::RETURN => {
                if self.frames.len() > 1 {
                    let frame = self.frames.pop().expect("just checked len > 1");
                    self.ip = frame.return_ip;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            op::LABEL => Ok(false),
            op::DROP => {
                self.must_pop("DROP")?;
                Ok(false)
            }
            op::DROPN => {
                let n = operand[0] as usize;
                if self.stack.len() < n {
                    return Err(VMError::StackUnderflow("DROPN"));
                }
                self.stack.truncate(self.stack.len() - n);
                Ok(false)
            }
            op::DUP => {
                let top = *self.stack.last().ok_or(VMError::StackUnderflow("DUP"))?;
                self.stack.push(top);
                Ok(false)
            }
            op::PUSH_NONE => {
                self.stack.push(Value::None);
                Ok(false)
            }
            op::PUSH_BOOL => {
                self.stack.push(Value::Bool(operand[0] != 0));
                Ok(false)
            }
            op::PUSH_SHORT => {
                self.stack.push(Value::Int(read_i16(operand) as i32));
                Ok(false)
            }
            op::PUSH_INT => {
                self.stack.push(Value::Int(read_i32(operand)));
                Ok(false)
            }
            op::PUSH_LITERAL => {
                let v = self.const_value(read_u32(operand))?;
                self.stack.push(v);
                Ok(false)
            }
            op::IADD | op::ISUB | op::IMUL | op::IDIV | op::IMOD | op::IAND | op::IOR => {
                self.exec_arith(opcode)?;
                Ok(false)
            }
            op::INEG => {
                self.exec_neg()?;
                Ok(false)
            }
            op::EQ => {
                let a = self.must_pop("EQ")?;
                let b = self.must_pop("EQ")?;
                self.stack.push(Value::Bool(a.equals(&b, &self.gc)));
                Ok(false)
            }
            op::NEQ => {
                let a = self.must_pop("NEQ")?;
                let b = self.must_pop("NEQ")?;
                self.stack.push(Value::Bool(!a.equals(&b, &self.gc)));
                Ok(false)
            }
            op::ILT | op::ILE | op::IGT | op::IGE => {
                self.exec_compare(opcode)?;
                Ok(false)
            }
            op::JMP => {
                self.ip = read_u32(operand) as usize;
                Ok(false)
            }
            op::JMP_SHORT => {
                self.ip = read_u16(operand) as usize;
                Ok(false)
            }
            op::BRANCH => {
                self.exec_branch(read_u32(operand) as usize, true)?;
                Ok(false)
            }
            op::BRANCH_SHORT => {
                self.exec_branch(read_u16(operand) as usize, true)?;
                Ok(false)
            }
            op::BRANCH_FALSE => {
                self.exec_branch(read_u32(operand) as usize, false)?;
                Ok(false)
            }
            op::BRANCH_FALSE_SHORT => {
                self.exec_branch(read_u16(operand) as usize, false)?;
                Ok(false)
            }
            op::GET_LOCAL => {
                let slot = read_u16(operand) as usize;
                let frame = self.frames.last().expect("at least one frame while running");
                let idx = frame.slots_base + slot;
                self.stack.push(self.locals[idx]);
                Ok(false)
            }
            op::SET_LOCAL => {
                let slot = read_u16(operand) as usize;
                let value = self.must_pop("SET_LOCAL")?;
                let frame = self.frames.last().expect("at least one frame while running");
                let idx = frame.slots_base + slot;
                self.locals[idx] = value;
                Ok(false)
            }
            op::GET_GLOBAL => {
                let idx = read_u32(operand);
                let key = self.const_value(idx)?;
                match self.globals.get(&key, &self.gc) {
                    Some(v) => {
                        self.stack.push(v);
                        Ok(false)
                    }
                    None => Err(VMError::UndefinedVariable(self.const_string(idx)?)),
                }
            }
            op::SET_GLOBAL => {
                let idx = read_u32(operand);
                let key = self.const_value(idx)?;
                let value = self.must_pop("SET_GLOBAL")?;
                if !self.globals.contains(&key, &self.gc) {
                    return Err(VMError::UndefinedVariable(self.const_string(idx)?));
                }
                self.globals.set(key, value, &self.gc);
                Ok(false)
            }
            op::VAL_GLOBAL | op::VAR_GLOBAL => {
                let idx = read_u32(operand);
                let key = self.const_value(idx)?;
                let value = self.must_pop("VAL_GLOBAL/VAR_GLOBAL")?;
                if self.globals.contains(&key, &self.gc) {
                    return Err(VMError::DuplicateGlobal(self.const_string(idx)?));
                }
                self.globals.set(key, value, &self.gc);
                Ok(false)
            }
            op::NEW_OBJECT => {
                self.exec_new_object(read_u32(operand))?;
                Ok(false)
            }
            op::GET_MEMBER => {
                self.exec_get_member(read_u32(operand))?;
                Ok(false)
            }
            op::SET_MEMBER => {
                self.exec_set_member(read_u32(operand))?;
                Ok(false)
            }
            op::CALL => {
                self.exec_call(operand[0] as usize)?;
                Ok(false)
            }
            op::DISPATCH_METHOD => {
                let name_idx = read_u32(&operand[0..4]);
                let argcount = operand[4] as usize;
                self.exec_dispatch_method(name_idx, argcount)?;
                Ok(false)
            }
            op::PRINT => {
                self.exec_print(operand[0] as usize)?;
                Ok(false)
            }
            other => Err(VMError::UnknownOpcode(other)),
        }
    }

    fn exec_branch(&mut self, target: usize, jump_on: bool) -> VMResult<()> {
        let v = self.must_pop("BRANCH")?;
        let b = match v {
            Value::Bool(b) => b,
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "bool".to_string(),
                    got: other.type_name(&self.gc).to_string(),
                    operation: "BRANCH",
                })
            }
        };
        if b == jump_on {
            self.ip = target;
        }
        Ok(())
    }

    fn int_arith(&self, opcode: u8, x: i32, y: i32) -> VMResult<i32> {
        Ok(match opcode {
            op::IADD => x.wrapping_add(y),
            op::ISUB => x.wrapping_sub(y),
            op::IMUL => x.wrapping_mul(y),
            op::IDIV => {
                if y == 0 {
                    return Err(VMError::DivisionByZero);
                }
                x.wrapping_div(y)
            }
            op::IMOD => {
                if y == 0 {
                    return Err(VMError::DivisionByZero);
                }
                x.wrapping_rem(y)
            }
            _ => unreachable!("exec_arith only dispatches arithmetic opcodes"),
        })
    }

    fn double_arith(&self, opcode: u8, x: f64, y: f64) -> VMResult<f64> {
        Ok(match opcode {
            op::IADD => x + y,
            op::ISUB => x - y,
            op::IMUL => x * y,
            op::IDIV => {
                if y == 0.0 {
                    return Err(VMError::DivisionByZero);
                }
                x / y
            }
            op::IMOD => {
                if y == 0.0 {
                    return Err(VMError::DivisionByZero);
                }
                x % y
            }
            _ => unreachable!("exec_arith only dispatches arithmetic opcodes"),
        })
    }

    fn concat_strings(&mut self, ra: ObjRef, rb: ObjRef) -> VMResult<Value> {
        let mut bytes = match self.gc.get(ra) {
            Object::String(s) => s.bytes.clone(),
            _ => unreachable!("caller already checked both operands are strings"),
        };
        match self.gc.get(rb) {
            Object::String(s) => bytes.extend_from_slice(&s.bytes),
            _ => unreachable!("caller already checked both operands are strings"),
        }
        let r = self.alloc(Object::String(StringObj::new(bytes)))?;
        Ok(Value::Object(r))
    }

    /// Pops `a, b` (top first) and computes `a OP b` (spec §4.5's "pop two
    /// values in order `a, b` (top first)", combined with `compiler.rs`'s
    /// decision to push the right operand first so the left ends up on
    /// top — see DESIGN.md).
    fn exec_arith(&mut self, opcode: u8) -> VMResult<()> {
        let a = self.must_pop(mnemonic(opcode))?;
        let b = self.must_pop(mnemonic(opcode))?;
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(self.int_arith(opcode, x, y)?),
            (Value::Double(x), Value::Double(y)) => Value::Double(self.double_arith(opcode, x, y)?),
            (Value::Bool(x), Value::Bool(y)) if opcode == op::IAND => Value::Bool(x && y),
            (Value::Bool(x), Value::Bool(y)) if opcode == op::IOR => Value::Bool(x || y),
            (Value::Object(ra), Value::Object(rb))
                if opcode == op::IADD && a.is_object_string(&self.gc) && b.is_object_string(&self.gc) =>
            {
                self.concat_strings(ra, rb)?
            }
            _ => {
                return Err(VMError::TypeMismatch {
                    expected: "two ints, two doubles, two bools (IAND/IOR only) or (IADD only) two strings"
                        .to_string(),
                    got: format!("{} and {}", a.type_name(&self.gc), b.type_name(&self.gc)),
                    operation: mnemonic(opcode),
                })
            }
        };
        self.stack.push(result);
        Ok(())
    }

    fn exec_neg(&mut self) -> VMResult<()> {
        let v = self.must_pop("INEG")?;
        let result = match v {
            Value::Int(x) => Value::Int(x.wrapping_neg()),
            Value::Double(x) => Value::Double(-x),
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "int or double".to_string(),
                    got: other.type_name(&self.gc).to_string(),
                    operation: "INEG",
                })
            }
        };
        self.stack.push(result);
        Ok(())
    }

    fn exec_compare(&mut self, opcode: u8) -> VMResult<()> {
        let a = self.must_pop(mnemonic(opcode))?;
        let b = self.must_pop(mnemonic(opcode))?;
        let ord = match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.partial_cmp(&y),
            (Value::Double(x), Value::Double(y)) => x.partial_cmp(&y),
            _ => None,
        };
        use std::cmp::Ordering::*;
        let result = match (opcode, ord) {
            (_, None) => false,
            (op::ILT, Some(Less)) => true,
            (op::ILE, Some(Less)) | (op::ILE, Some(Equal)) => true,
            (op::IGT, Some(Greater)) => true,
            (op::IGE, Some(Greater)) | (op::IGE, Some(Equal)) => true,
            _ => false,
        };
        self.stack.push(Value::Bool(result));
        Ok(())
    }

    fn exec_new_object(&mut self, class_idx: u32) -> VMResult<()> {
        let class_val = self.const_value(class_idx)?;
        let class_ref = match class_val {
            Value::Object(r) => r,
            _ => unreachable!(),
        };
        match self.gc.get(class_ref) {
            Object::Class(_) => {}
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "class".to_string(),
                    got: format!("{other:?}"),
                    operation: "NEW_OBJECT",
                })
            }
        }
        let instance = Object::Instance(super::value::InstanceObj {
            class: class_ref,
            members: Table::new(),
        });
        let r = self.alloc(instance)?;
        self.stack.push(Value::Object(r));
        Ok(())
    }

    fn exec_get_member(&mut self, name_idx: u32) -> VMResult<()> {
        let key = self.const_value(name_idx)?;
        let inst_val = self.must_pop("GET_MEMBER")?;
        let r = match inst_val {
            Value::Object(r) => r,
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "instance".to_string(),
                    got: other.type_name(&self.gc).to_string(),
                    operation: "GET_MEMBER",
                })
            }
        };
        let found = match self.gc.get(r) {
            Object::Instance(inst) => inst.members.get(&key, &self.gc),
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "instance".to_string(),
                    got: format!("{other:?}"),
                    operation: "GET_MEMBER",
                })
            }
        };
        match found {
            Some(v) => {
                self.stack.push(v);
                Ok(())
            }
            None => Err(VMError::MissingMember {
                name: self.const_string(name_idx)?,
            }),
        }
    }

    fn exec_set_member(&mut self, name_idx: u32) -> VMResult<()> {
        let key = self.const_value(name_idx)?;
        let value = self.must_pop("SET_MEMBER")?;
        let inst_val = self.must_pop("SET_MEMBER")?;
        let r = match inst_val {
            Value::Object(r) => r,
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "instance".to_string(),
                    got: other.type_name(&self.gc).to_string(),
                    operation: "SET_MEMBER",
                })
            }
        };
        let mut obj = self.gc.take_object(r);
        let result = match &mut obj {
            Object::Instance(inst) => {
                inst.members.set(key, value, &self.gc);
                Ok(())
            }
            other => Err(VMError::TypeMismatch {
                expected: "instance".to_string(),
                got: format!("{other:?}"),
                operation: "SET_MEMBER",
            }),
        };
        self.gc.restore_object(r, obj);
        result
    }

    /// Pops `argcount` call arguments (bottom-to-top is natural source
    /// order, per DESIGN.md's call-argument-convention decision), then pops
    /// the callee and dispatches on its kind.
    fn exec_call(&mut self, argcount: usize) -> VMResult<()> {
        let callee = self.must_pop("CALL")?;
        let callee_ref = match callee {
            Value::Object(r) => r,
            other => return Err(VMError::NotCallable(other.type_name(&self.gc).to_string())),
        };
        enum Callee {
            Function { arity: usize, locals_max: usize },
            Native(NativeFn),
        }
        let decision = match self.gc.get(callee_ref) {
            Object::Function(f) => Callee::Function {
                arity: f.arity as usize,
                locals_max: f.locals_max as usize,
            },
            Object::NativeFunction(nf) => Callee::Native(nf.func),
            other => return Err(VMError::NotCallable(format!("{other:?}"))),
        };
        if self.stack.len() < argcount {
            return Err(VMError::StackUnderflow("CALL args"));
        }
        let start = self.stack.len() - argcount;
        let args: Vec<Value> = self.stack[start..].to_vec();
        self.stack.truncate(start);
        match decision {
            Callee::Function { arity, locals_max } => {
                if arity != argcount {
                    return Err(VMError::Arity {
                        expected: arity,
                        got: argcount,
                    });
                }
                self.push_call_frame(callee_ref, locals_max, &args)
            }
            Callee::Native(func) => {
                let result = func(self, &args)?;
                self.stack.push(result);
                Ok(())
            }
        }
    }

    fn exec_dispatch_method(&mut self, name_idx: u32, argcount: usize) -> VMResult<()> {
        let key = self.const_value(name_idx)?;
        let inst_val = self.must_pop("DISPATCH_METHOD")?;
        let inst_ref = match inst_val {
            Value::Object(r) => r,
            other => return Err(VMError::NotCallable(other.type_name(&self.gc).to_string())),
        };
        let class_ref = match self.gc.get(inst_ref) {
            Object::Instance(i) => i.class,
            other => return Err(VMError::NotCallable(format!("{other:?}"))),
        };
        let method_val = match self.gc.get(class_ref) {
            Object::Class(c) => c.methods.get(&key, &self.gc),
            _ => None,
        };
        let method_ref = match method_val {
            Some(Value::Object(r)) => r,
            _ => {
                return Err(VMError::MissingMethod {
                    name: self.const_string(name_idx)?,
                })
            }
        };
        let (arity, locals_max) = match self.gc.get(method_ref) {
            Object::Function(f) => (f.arity as usize, f.locals_max as usize),
            other => return Err(VMError::NotCallable(format!("{other:?}"))),
        };
        if arity != argcount + 1 {
            return Err(VMError::Arity {
                expected: arity,
                got: argcount + 1,
            });
        }
        if self.stack.len() < argcount {
            return Err(VMError::StackUnderflow("DISPATCH_METHOD args"));
        }
        let start = self.stack.len() - argcount;
        let mut bindings = Vec::with_capacity(argcount + 1);
        bindings.push(inst_val);
        bindings.extend_from_slice(&self.stack[start..]);
        self.stack.truncate(start);
        self.push_call_frame(method_ref, locals_max, &bindings)
    }

    fn exec_print(&mut self, n: usize) -> VMResult<()> {
        if self.stack.len() < n || n == 0 {
            return Err(VMError::StackUnderflow("PRINT"));
        }
        let start = self.stack.len() - n;
        let window: Vec<Value> = self.stack[start..].to_vec();
        self.stack.truncate(start);
        let fmt_val = window[0];
        let fmt = match fmt_val {
            Value::Object(r) if fmt_val.is_object_string(&self.gc) => match self.gc.get(r) {
                Object::String(s) => s.as_str().into_owned(),
                _ => unreachable!(),
            },
            other => {
                return Err(VMError::TypeMismatch {
                    expected: "string".to_string(),
                    got: other.type_name(&self.gc).to_string(),
                    operation: "PRINT",
                })
            }
        };
        let mut out = std::io::stdout();
        super::native::format_print(&self.gc, &mut out, &fmt, &window[1..])
    }

    /// Pushes a new call frame bound to `func_ref`, with `bindings` written
    /// into its locals window starting at slot 0 (a method's `self` first,
    /// for `DISPATCH_METHOD`; plain call arguments otherwise). `slots_base`
    /// follows the caller's `slots_base + locals_max`, mirroring
    /// `original_source/Caby/src/vm.c`'s frame-push arithmetic.
    fn push_call_frame(&mut self, func_ref: ObjRef, locals_max: usize, bindings: &[Value]) -> VMResult<()> {
        if self.frames.len() >= MAX_FRAME_DEPTH {
            return Err(VMError::FrameOverflow);
        }
        let slots_base = match self.frames.last() {
            Some(f) => {
                let prev_locals_max = match self.gc.get(f.function) {
                    Object::Function(pf) => pf.locals_max as usize,
                    _ => 0,
                };
                f.slots_base + prev_locals_max
            }
            None => 0,
        };
        let needed = slots_base + locals_max;
        if self.locals.len() < needed {
            self.locals.resize(needed, Value::None);
        }
        for slot in self.locals[slots_base..slots_base + locals_max].iter_mut() {
            *slot = Value::None;
        }
        for (i, v) in bindings.iter().enumerate() {
            self.locals[slots_base + i] = *v;
        }
        self.frames.push(CallFrame {
            function: func_ref,
            return_ip: self.ip,
            slots_base,
        });
        self.ip = 0;
        Ok(())
    }
}
