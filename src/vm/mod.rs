//! The execution engine: value model, heap allocator, garbage collector,
//! hash table, bytecode representation and the interpreter loop itself
//! (spec §4). This module is the core the rest of the crate (lexer, parser,
//! compiler, CLI) feeds.

pub mod alloc;
pub mod errors;
pub mod frame;
pub mod gc;
pub mod machine;
pub mod native;
pub mod opcode;
pub mod table;
pub mod value;

pub use alloc::BlockAllocator;
pub use errors::{LocatedError, VMError, VMResult};
pub use frame::{CallFrame, MAX_FRAME_DEPTH};
pub use gc::{Gc, GcStats, Roots};
pub use machine::VM;
pub use opcode::{op, ConstantPool, Chunk, Loc};
pub use table::Table;
pub use value::{Object, ObjRef, Value};
