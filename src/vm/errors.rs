use std::fmt;

use super::opcode::Loc;

/// The runtime error taxonomy (spec §7). All variants are fatal: there is no
/// `try`/recover surface inside the bytecode language itself.
#[derive(Debug, Clone)]
pub enum VMError {
    StackUnderflow(&'static str),
    TypeMismatch {
        expected: String,
        got: String,
        operation: &'static str,
    },
    UndefinedVariable(String),
    DuplicateGlobal(String),
    IndexOutOfBounds {
        index: usize,
        length: usize,
    },
    CallStackUnderflow,
    FrameOverflow,
    MissingMember {
        name: String,
    },
    MissingMethod {
        name: String,
    },
    Arity {
        expected: usize,
        got: usize,
    },
    DivisionByZero,
    FormatArity(&'static str),
    UnknownOpcode(u8),
    NotCallable(String),
    AllocatorExhausted,
    ParseError(String),
    CompileError(String),
    IoError(String),
}

/// A runtime error paired with the source location of the instruction that
/// raised it, used to drive `error::report` (spec §7's propagation policy).
#[derive(Debug, Clone)]
pub struct LocatedError {
    pub error: VMError,
    pub loc: Option<Loc>,
}

pub type VMResult<T> = Result<T, VMError>;

impl fmt::Display for VMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VMError::StackUnderflow(op) => write!(f, "Stack underflow during {op}"),
            VMError::TypeMismatch {
                expected,
                got,
                operation,
            } => write!(f, "{operation} expects {expected} but got {got}"),
            VMError::UndefinedVariable(name) => {
                write!(f, "Access to undefined variable '{name}'")
            }
            VMError::DuplicateGlobal(name) => {
                write!(f, "Variable '{name}' is already defined")
            }
            VMError::IndexOutOfBounds { index, length } => {
                write!(f, "Index {index} out of bounds for length {length}")
            }
            VMError::CallStackUnderflow => write!(f, "Call stack underflow"),
            VMError::FrameOverflow => write!(f, "Call frame stack overflow"),
            VMError::MissingMember { name } => write!(f, "No such member '{name}'"),
            VMError::MissingMethod { name } => write!(f, "No such method '{name}'"),
            VMError::Arity { expected, got } => {
                write!(f, "Expected {expected} arguments but got {got}")
            }
            VMError::DivisionByZero => write!(f, "Division by zero"),
            VMError::FormatArity(msg) => write!(f, "{msg}"),
            VMError::UnknownOpcode(b) => write!(f, "Unknown opcode: 0x{b:02X}"),
            VMError::NotCallable(got) => write!(f, "Value of type {got} is not callable"),
            VMError::AllocatorExhausted => write!(f, "Heap exhausted after forced collection"),
            VMError::ParseError(msg) => write!(f, "{msg}"),
            VMError::CompileError(msg) => write!(f, "{msg}"),
            VMError::IoError(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for VMError {}

impl From<std::io::Error> for VMError {
    fn from(e: std::io::Error) -> Self {
        VMError::IoError(e.to_string())
    }
}
