//! Single-pass AST-to-bytecode compiler (spec §1's "external collaborator"
//! front end, implemented here as working scaffolding so the core is
//! exercisable end-to-end — see DESIGN.md).
//!
//! Grounded on `original_source/Caby/src/compiler.c`'s single-pass,
//! scope-depth-tracked local-variable scheme (no separate resolution pass,
//! à la `clox`) and on its constant-pool bootstrap convention: the GC is
//! disabled for the whole compile (`gc.enabled = false`), since the object
//! graph under construction isn't yet reachable from the normal root set
//! (spec §4.2).

use std::collections::HashMap;

use crate::ast::{BinOp, Expr, Program, Stmt, UnOp};
use crate::error::Loc as SrcLoc;
use crate::vm::errors::{LocatedError, VMError};
use crate::vm::gc::{Gc, Roots};
use crate::vm::opcode::{op, Chunk, Loc as OpLoc};
use crate::vm::value::{ClassObj, FunctionObj, Object, ObjRef, StringObj, Value};
use crate::vm::Table;

type CResult<T> = Result<T, LocatedError>;

/// One function's in-progress compilation state: its growing `Chunk` and
/// the local-variable scope stack (spec's `clox`-style "declare at the
/// current scope depth, pop on scope exit" scheme).
struct FuncCtx {
    chunk: Chunk,
    locals: Vec<LocalVar>,
    scope_depth: u32,
    next_slot: u16,
    max_slot: u16,
    /// True only for the implicit top-level "script" function: a `val`/`var`
    /// declared at `scope_depth == 0` here becomes a *global*, not a local
    /// (spec §3). Every other function's own parameter scope also starts at
    /// depth 0, but any `Let` a function body contains is necessarily nested
    /// inside at least one `Block` (the body itself), so it's never reached
    /// at depth 0 for non-script functions.
    is_script: bool,
}

struct LocalVar {
    name: String,
    depth: u32,
    mutable: bool,
    slot: u16,
}

enum DeclTarget {
    Global,
    Local(u16),
}

impl FuncCtx {
    fn new(is_script: bool) -> Self {
        FuncCtx {
            chunk: Chunk::new(),
            locals: Vec::new(),
            scope_depth: 0,
            next_slot: 0,
            max_slot: 0,
            is_script,
        }
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while let Some(l) = self.locals.last() {
            if l.depth > self.scope_depth {
                self.locals.pop();
                self.next_slot -= 1;
            } else {
                break;
            }
        }
    }

    fn declare(&mut self, name: &str, mutable: bool, depth: u32) -> u16 {
        let slot = self.next_slot;
        self.locals.push(LocalVar {
            name: name.to_string(),
            depth,
            mutable,
            slot,
        });
        self.next_slot += 1;
        if self.next_slot > self.max_slot {
            self.max_slot = self.next_slot;
        }
        slot
    }

    fn resolve(&self, name: &str) -> Option<&LocalVar> {
        self.locals.iter().rev().find(|l| l.name == name)
    }
}

/// Compiles a whole program into the constant pool of `gc`, returning the
/// constant-pool index of the implicit entry-point function. Disables `gc`
/// for the duration (spec §4.2's bootstrap note) and re-enables it before
/// returning, so the interpreter's own allocations are collectible again.
pub fn compile(program: &Program, gc: &mut Gc) -> CResult<u32> {
    gc.enabled = false;
    let result = Compiler::new(gc).compile_program(program);
    gc.enabled = true;
    result
}

struct Compiler<'a> {
    gc: &'a mut Gc,
    funcs: Vec<FuncCtx>,
    string_consts: HashMap<Vec<u8>, u32>,
    globals_mutable: HashMap<String, bool>,
    globals_classes: HashMap<String, u32>,
}

impl<'a> Compiler<'a> {
    fn new(gc: &'a mut Gc) -> Self {
        Compiler {
            gc,
            funcs: vec![FuncCtx::new(true)],
            string_consts: HashMap::new(),
            globals_mutable: HashMap::new(),
            globals_classes: HashMap::new(),
        }
    }

    fn compile_program(mut self, program: &Program) -> CResult<u32> {
        self.compile_top_level(&program.statements)?;
        let main_ctx = self.funcs.pop().expect("script FuncCtx always present");
        let name_idx = self.intern_string(b"<script>")?;
        let main_ref = self
            .alloc(Object::Function(FunctionObj {
                arity: 0,
                locals_max: main_ctx.max_slot,
                chunk: main_ctx.chunk,
                name: name_idx,
            }))
            .map_err(alloc_err)?;
        Ok(self.gc.const_pool_mut().push(main_ref))
    }

    /// The top-level statement list is compiled like a `Block`'s `stmts`,
    /// except the *last* statement's value (if it's a bare expression) is
    /// kept rather than dropped, becoming the program's result (spec §8's
    /// scenario table: a lone `1` leaves `Int(1)` on the stack at halt).
    fn compile_top_level(&mut self, stmts: &[Stmt]) -> CResult<()> {
        if stmts.is_empty() {
            self.emit(op::PUSH_NONE, &[], SrcLoc::default());
            self.emit(op::RETURN, &[], SrcLoc::default());
            return Ok(());
        }
        let (init, last) = stmts.split_at(stmts.len() - 1);
        for s in init {
            self.compile_stmt(s)?;
        }
        let last = &last[0];
        if let Stmt::Expr(e) = last {
            self.compile_expr(e)?;
        } else {
            self.compile_stmt(last)?;
            self.emit(op::PUSH_NONE, &[], last.loc());
        }
        self.emit(op::RETURN, &[], last.loc());
        Ok(())
    }

    // ---- allocation / interning -------------------------------------

    fn alloc(&mut self, object: Object) -> Result<ObjRef, VMError> {
        let roots = Roots {
            constant_pool: &[],
            stack: &[],
            globals: &[],
            frame_locals: &[],
        };
        self.gc.alloc_object(object, &roots)
    }

    fn intern_string(&mut self, bytes: &[u8]) -> CResult<u32> {
        if let Some(&idx) = self.string_consts.get(bytes) {
            return Ok(idx);
        }
        let r = self
            .alloc(Object::String(StringObj::new(bytes.to_vec())))
            .map_err(alloc_err)?;
        let idx = self.gc.const_pool_mut().push(r);
        self.string_consts.insert(bytes.to_vec(), idx);
        Ok(idx)
    }

    fn intern_string_value(&mut self, bytes: &[u8]) -> CResult<Value> {
        let idx = self.intern_string(bytes)?;
        Ok(Value::Object(self.gc.const_pool().get(idx).expect("just interned")))
    }

    // ---- emission helpers ---------------------------------------------

    fn emit(&mut self, opcode: u8, operand: &[u8], loc: SrcLoc) {
        let mut bytes = Vec::with_capacity(1 + operand.len());
        bytes.push(opcode);
        bytes.extend_from_slice(operand);
        let op_loc = OpLoc {
            begin: loc.begin,
            end: loc.end,
        };
        self.funcs
            .last_mut()
            .expect("at least the script FuncCtx")
            .chunk
            .push_instruction(&bytes, op_loc);
    }

    fn here(&self) -> u32 {
        self.funcs.last().expect("at least the script FuncCtx").chunk.len() as u32
    }

    /// Emits `opcode` with a placeholder 4-byte operand, returning the byte
    /// offset of that operand for a later `patch_jump`.
    fn emit_jump(&mut self, opcode: u8, loc: SrcLoc) -> usize {
        self.emit(opcode, &[0, 0, 0, 0], loc);
        self.funcs.last().expect("at least the script FuncCtx").chunk.len() - 4
    }

    fn patch_jump(&mut self, operand_pos: usize) {
        let target = self.here();
        let ctx = self.funcs.last_mut().expect("at least the script FuncCtx");
        ctx.chunk.code[operand_pos..operand_pos + 4].copy_from_slice(&target.to_le_bytes());
    }

    fn err(&self, msg: String, loc: SrcLoc) -> LocatedError {
        LocatedError {
            error: VMError::CompileError(msg),
            loc: Some(OpLoc {
                begin: loc.begin,
                end: loc.end,
            }),
        }
    }

    // ---- bindings -------------------------------------------------------

    fn declare_binding(&mut self, name: &str, mutable: bool) -> DeclTarget {
        let ctx = self.funcs.last_mut().expect("at least the script FuncCtx");
        if ctx.is_script && ctx.scope_depth == 0 {
            DeclTarget::Global
        } else {
            let depth = ctx.scope_depth;
            DeclTarget::Local(ctx.declare(name, mutable, depth))
        }
    }

    // ---- statements -----------------------------------------------------

    /// Compiles `s` as a statement: every path leaves the operand stack at
    /// the depth it found it (bare expressions get an explicit `DROP`).
    fn compile_stmt(&mut self, s: &Stmt) -> CResult<()> {
        match s {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.emit(op::DROP, &[], e.loc());
            }
            Stmt::Let { name, mutable, value, loc } => {
                self.compile_expr(value)?;
                match self.declare_binding(name, *mutable) {
                    DeclTarget::Global => {
                        let name_idx = self.intern_string(name.as_bytes())?;
                        let opcode = if *mutable { op::VAR_GLOBAL } else { op::VAL_GLOBAL };
                        self.emit(opcode, &name_idx.to_le_bytes(), *loc);
                        self.globals_mutable.insert(name.clone(), *mutable);
                    }
                    DeclTarget::Local(slot) => {
                        self.emit(op::SET_LOCAL, &slot.to_le_bytes(), *loc);
                    }
                }
            }
            Stmt::Assign { name, value, loc } => {
                self.compile_expr(value)?;
                let local_slot = self.funcs.last().expect("at least the script FuncCtx").resolve(name).map(|l| (l.slot, l.mutable));
                match local_slot {
                    Some((slot, mutable)) => {
                        if !mutable {
                            return Err(self.err(format!("cannot assign to immutable binding '{name}'"), *loc));
                        }
                        self.emit(op::SET_LOCAL, &slot.to_le_bytes(), *loc);
                    }
                    None => {
                        if matches!(self.globals_mutable.get(name), Some(false)) {
                            return Err(self.err(format!("cannot assign to immutable binding '{name}'"), *loc));
                        }
                        let name_idx = self.intern_string(name.as_bytes())?;
                        self.emit(op::SET_GLOBAL, &name_idx.to_le_bytes(), *loc);
                    }
                }
            }
            Stmt::AssignMember { target, name, value, loc } => {
                self.compile_expr(target)?;
                self.compile_expr(value)?;
                let name_idx = self.intern_string(name.as_bytes())?;
                self.emit(op::SET_MEMBER, &name_idx.to_le_bytes(), *loc);
            }
            Stmt::FunctionDef { name, params, body, loc } => {
                let func_ref = self.compile_function(name, params, body, false)?;
                let func_idx = self.gc.const_pool_mut().push(func_ref);
                self.emit(op::PUSH_LITERAL, &func_idx.to_le_bytes(), *loc);
                let name_idx = self.intern_string(name.as_bytes())?;
                self.emit(op::VAL_GLOBAL, &name_idx.to_le_bytes(), *loc);
                self.globals_mutable.insert(name.clone(), false);
            }
            Stmt::ClassDef { name, methods, loc } => {
                let mut table = Table::new();
                for (mname, mparams, mbody) in methods {
                    let func_ref = self.compile_function(mname, mparams, mbody, true)?;
                    let key = self.intern_string_value(mname.as_bytes())?;
                    table.set(key, Value::Object(func_ref), self.gc);
                }
                let class_name_idx = self.intern_string(name.as_bytes())?;
                let class_ref = self
                    .alloc(Object::Class(ClassObj {
                        name: class_name_idx,
                        methods: table,
                    }))
                    .map_err(alloc_err)?;
                let class_idx = self.gc.const_pool_mut().push(class_ref);
                self.emit(op::PUSH_LITERAL, &class_idx.to_le_bytes(), *loc);
                self.emit(op::VAL_GLOBAL, &class_name_idx.to_le_bytes(), *loc);
                self.globals_mutable.insert(name.clone(), false);
                self.globals_classes.insert(name.clone(), class_idx);
            }
            Stmt::While { cond, body, loc } => {
                let loop_start = self.here();
                self.compile_expr(cond)?;
                let exit_patch = self.emit_jump(op::BRANCH_FALSE, *loc);
                self.compile_expr(body)?;
                self.emit(op::DROP, &[], *loc);
                self.emit(op::JMP, &loop_start.to_le_bytes(), *loc);
                self.patch_jump(exit_patch);
            }
            Stmt::Return { value, loc } => {
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit(op::PUSH_NONE, &[], *loc),
                }
                self.emit(op::RETURN, &[], *loc);
            }
        }
        Ok(())
    }

    /// Compiles a `def`/method body into its own `Function` object, pushing
    /// a fresh [`FuncCtx`] for the duration. `implicit_self` declares an
    /// extra leading parameter named `self` for class methods (spec §4.5's
    /// `DISPATCH_METHOD` binding convention).
    fn compile_function(&mut self, name: &str, params: &[String], body: &Expr, implicit_self: bool) -> CResult<ObjRef> {
        let mut ctx = FuncCtx::new(false);
        if implicit_self {
            ctx.declare("self", true, 0);
        }
        for p in params {
            ctx.declare(p, true, 0);
        }
        self.funcs.push(ctx);
        self.compile_expr(body)?;
        self.emit(op::RETURN, &[], body.loc());
        let ctx = self.funcs.pop().expect("just pushed it");
        let arity = params.len() + if implicit_self { 1 } else { 0 };
        if arity > u8::MAX as usize {
            return Err(self.err(format!("function '{name}' has too many parameters"), body.loc()));
        }
        let name_idx = self.intern_string(name.as_bytes())?;
        self.alloc(Object::Function(FunctionObj {
            arity: arity as u8,
            locals_max: ctx.max_slot,
            chunk: ctx.chunk,
            name: name_idx,
        }))
        .map_err(alloc_err)
    }

    // ---- expressions ------------------------------------------------------

    /// Compiles `e`, leaving exactly one value on the stack.
    fn compile_expr(&mut self, e: &Expr) -> CResult<()> {
        match e {
            Expr::Int(n, loc) => self.emit(op::PUSH_INT, &n.to_le_bytes(), *loc),
            Expr::Double(_, loc) => {
                return Err(self.err("double literals are not part of this language's grammar".to_string(), *loc))
            }
            Expr::Bool(b, loc) => self.emit(op::PUSH_BOOL, &[*b as u8], *loc),
            Expr::None_(loc) => self.emit(op::PUSH_NONE, &[], *loc),
            Expr::Str(bytes, loc) => {
                let idx = self.intern_string(bytes)?;
                self.emit(op::PUSH_LITERAL, &idx.to_le_bytes(), *loc);
            }
            Expr::Id(name, loc) => {
                let local = self.funcs.last().expect("at least the script FuncCtx").resolve(name).map(|l| l.slot);
                match local {
                    Some(slot) => self.emit(op::GET_LOCAL, &slot.to_le_bytes(), *loc),
                    None => {
                        let name_idx = self.intern_string(name.as_bytes())?;
                        self.emit(op::GET_GLOBAL, &name_idx.to_le_bytes(), *loc);
                    }
                }
            }
            Expr::Unary { op: UnOp::Neg, operand, loc } => {
                self.compile_expr(operand)?;
                self.emit(op::INEG, &[], *loc);
            }
            Expr::Binary { op: bop, left, right, loc } => {
                // Right first, then left: the left operand ends up on top,
                // matching §4.5's "pop a, b (top first)" against `a OP b`.
                self.compile_expr(right)?;
                self.compile_expr(left)?;
                let opcode = binop_opcode(*bop);
                self.emit(opcode, &[], *loc);
            }
            Expr::Call { target, args, loc } => {
                if let Expr::Id(name, _) = target.as_ref() {
                    if let Some(&class_idx) = self.globals_classes.get(name) {
                        if !args.is_empty() {
                            return Err(self.err(format!("class '{name}' takes no constructor arguments"), *loc));
                        }
                        self.emit(op::NEW_OBJECT, &class_idx.to_le_bytes(), *loc);
                        return Ok(());
                    }
                }
                if args.len() > u8::MAX as usize {
                    return Err(self.err("too many call arguments".to_string(), *loc));
                }
                for a in args {
                    self.compile_expr(a)?;
                }
                self.compile_expr(target)?;
                self.emit(op::CALL, &[args.len() as u8], *loc);
            }
            Expr::MethodCall { target, method, args, loc } => {
                if args.len() > u8::MAX as usize {
                    return Err(self.err("too many call arguments".to_string(), *loc));
                }
                for a in args {
                    self.compile_expr(a)?;
                }
                self.compile_expr(target)?;
                let name_idx = self.intern_string(method.as_bytes())?;
                let mut operand = name_idx.to_le_bytes().to_vec();
                operand.push(args.len() as u8);
                self.emit(op::DISPATCH_METHOD, &operand, *loc);
            }
            Expr::Member { target, name, loc } => {
                self.compile_expr(target)?;
                let name_idx = self.intern_string(name.as_bytes())?;
                self.emit(op::GET_MEMBER, &name_idx.to_le_bytes(), *loc);
            }
            Expr::If { cond, then_branch, else_branch, loc } => {
                self.compile_expr(cond)?;
                let else_patch = self.emit_jump(op::BRANCH_FALSE, *loc);
                self.compile_expr(then_branch)?;
                let end_patch = self.emit_jump(op::JMP, *loc);
                self.patch_jump(else_patch);
                match else_branch {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit(op::PUSH_NONE, &[], *loc),
                }
                self.patch_jump(end_patch);
            }
            Expr::Block { stmts, value, loc } => {
                self.funcs.last_mut().expect("at least the script FuncCtx").begin_scope();
                for s in stmts {
                    self.compile_stmt(s)?;
                }
                self.compile_expr(value)?;
                self.funcs.last_mut().expect("at least the script FuncCtx").end_scope();
                let _ = loc;
            }
            Expr::Print { format, args, loc } => {
                let n = 1 + args.len();
                if n > u8::MAX as usize {
                    return Err(self.err("too many print arguments".to_string(), *loc));
                }
                self.compile_expr(format)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit(op::PRINT, &[n as u8], *loc);
            }
        }
        Ok(())
    }
}

fn binop_opcode(op: BinOp) -> u8 {
    match op {
        BinOp::Add => crate::vm::opcode::op::IADD,
        BinOp::Sub => crate::vm::opcode::op::ISUB,
        BinOp::Mul => crate::vm::opcode::op::IMUL,
        BinOp::Div => crate::vm::opcode::op::IDIV,
        BinOp::Mod => crate::vm::opcode::op::IMOD,
        BinOp::And => crate::vm::opcode::op::IAND,
        BinOp::Or => crate::vm::opcode::op::IOR,
        BinOp::Eq => crate::vm::opcode::op::EQ,
        BinOp::Neq => crate::vm::opcode::op::NEQ,
        BinOp::Lt => crate::vm::opcode::op::ILT,
        BinOp::Le => crate::vm::opcode::op::ILE,
        BinOp::Gt => crate::vm::opcode::op::IGT,
        BinOp::Ge => crate::vm::opcode::op::IGE,
    }
}

fn alloc_err(e: VMError) -> LocatedError {
    LocatedError { error: e, loc: None }
}
