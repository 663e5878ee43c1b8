//! Native function interface (spec §4.6). Grounded on
//! `original_source/Caby/src/native.c`: arity checks, `pow`'s int-or-double
//! coercion, and `print`'s format-string engine, which is shared verbatim
//! with the `PRINT` opcode per the Design Notes' "PRINT duplication" note.

use std::io::Write;

use super::errors::VMError;
use super::gc::Gc;
use super::machine::VM;
use super::value::Value;

pub fn native_clock(vm: &mut VM, args: &[Value]) -> Result<Value, VMError> {
    if !args.is_empty() {
        return Err(VMError::Arity {
            expected: 0,
            got: args.len(),
        });
    }
    Ok(Value::Double(vm.start_time.elapsed().as_secs_f64()))
}

fn coerce_double(v: Value) -> Result<f64, VMError> {
    match v {
        Value::Int(n) => Ok(n as f64),
        Value::Double(d) => Ok(d),
        other => Err(VMError::TypeMismatch {
            expected: "int or double".to_string(),
            got: format!("{other:?}"),
            operation: "pow",
        }),
    }
}

/// `args` is in natural left-to-right parameter order: `args[0]` is the
/// base, `args[1]` the exponent, same as every other native in this module
/// (spec §9's native calling-convention decision).
pub fn native_pow(_vm: &mut VM, args: &[Value]) -> Result<Value, VMError> {
    if args.len() != 2 {
        return Err(VMError::Arity {
            expected: 2,
            got: args.len(),
        });
    }
    let base = coerce_double(args[0])?;
    let exponent = coerce_double(args[1])?;
    Ok(Value::Double(base.powf(exponent)))
}

/// `args[0]` is the format string, `args[1..]` the interpolation values in
/// left-to-right source order, matching `native_pow`'s convention and the
/// `PRINT` opcode's compiled argument order.
pub fn native_print(vm: &mut VM, args: &[Value]) -> Result<Value, VMError> {
    if args.is_empty() {
        return Err(VMError::Arity {
            expected: 1,
            got: 0,
        });
    }
    let fmt_val = args[0];
    let fmt = match fmt_val {
        Value::Object(r) if fmt_val.is_object_string(&vm.gc) => match vm.gc.get(r) {
            super::value::Object::String(s) => s.as_str().into_owned(),
            _ => unreachable!(),
        },
        _ => {
            return Err(VMError::TypeMismatch {
                expected: "string".to_string(),
                got: fmt_val.type_name(&vm.gc).to_string(),
                operation: "print",
            })
        }
    };
    let rest = &args[1..];
    let mut out = std::io::stdout();
    format_print(&vm.gc, &mut out, &fmt, rest)?;
    Ok(Value::None)
}

/// The shared format engine behind both the `print` native and the `PRINT`
/// opcode (spec §4.5): pops/consumes the format string first, then for each
/// `{}` occurrence consumes the next value from `args` (top-first order).
/// Backslash-n becomes a newline; other escapes pass through unchanged.
pub fn format_print(
    gc: &Gc,
    out: &mut dyn Write,
    fmt: &str,
    args: &[Value],
) -> Result<(), VMError> {
    let bytes = fmt.as_bytes();
    let mut i = 0;
    let mut arg_idx = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'}' {
            if arg_idx >= args.len() {
                return Err(VMError::FormatArity("There are more '{}' than arguments"));
            }
            let rendered = args[arg_idx].render(gc);
            let _ = out.write_all(rendered.as_bytes());
            arg_idx += 1;
            i += 2;
        } else if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'n' => {
                    let _ = out.write_all(b"\n");
                }
                other => {
                    let _ = out.write_all(&[b'\\', other]);
                }
            }
            i += 2;
        } else {
            let _ = out.write_all(&bytes[i..i + 1]);
            i += 1;
        }
    }
    if arg_idx < args.len() {
        return Err(VMError::FormatArity("There are fewer '{}' than arguments"));
    }
    Ok(())
}
