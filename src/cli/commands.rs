//! Command bodies for `run` / `execute` / `disassemble` (spec §6.2), wired
//! to the library's `compile_source`/`serializer`/`disassembler` surface.
//! Summary tables follow the teacher's `cli/commands.rs` conventions:
//! `comfy_table`'s `UTF8_FULL` preset plus `colored`'s `.bright_*().bold()`.

use std::fs;

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};

use crate::error::{render, Report};
use crate::vm::machine::VM;
use crate::vm::value::Value;
use crate::vm::{BlockAllocator, Gc, GcStats};
use crate::{disassembler, serializer, CabyConfig, CabyError};

use super::args::{CliArgs, CliCommand};

pub fn execute_command(args: &CliArgs) -> Result<(), String> {
    match &args.command {
        CliCommand::Run { file } => run_file(file, args),
        CliCommand::Execute { file } => execute_file(file, args),
        CliCommand::Disassemble { file } => disassemble_file(file),
    }
}

fn run_file(file: &str, args: &CliArgs) -> Result<(), String> {
    let source = fs::read_to_string(file).map_err(|e| format!("Could not read {file}: {e}"))?;
    let config = args.to_config();

    let (gc, entry_idx) =
        crate::compile_source(&source, &config).map_err(|e| render_error(&e, Some(file), Some(&source)))?;

    run_and_report(gc, entry_idx, &config, Some(file), Some(&source))
}

fn execute_file(file: &str, args: &CliArgs) -> Result<(), String> {
    let bytes = fs::read(file).map_err(|e| format!("Could not read {file}: {e}"))?;
    let config = args.to_config();

    let mut gc = new_gc(&config);
    let entry_idx =
        serializer::read_program_from_bytes(&mut gc, &bytes).map_err(|e| format!("{file}: {e}"))?;

    let source = match &args.source {
        Some(path) => Some(fs::read_to_string(path).map_err(|e| format!("Could not read {path}: {e}"))?),
        None => None,
    };

    run_and_report(gc, entry_idx, &config, args.source.as_deref(), source.as_deref())
}

fn disassemble_file(file: &str) -> Result<(), String> {
    let bytes = fs::read(file).map_err(|e| format!("Could not read {file}: {e}"))?;
    let mut gc = new_gc(&CabyConfig::default());
    serializer::read_program_from_bytes(&mut gc, &bytes).map_err(|e| format!("{file}: {e}"))?;

    println!("{}", "=== Disassembly ===".bright_cyan().bold());
    for (name, table) in disassembler::disassemble_program(&gc) {
        println!();
        println!("{}", format!("fn {name}").bright_green().bold());
        println!("{table}");
    }
    Ok(())
}

fn new_gc(config: &CabyConfig) -> Gc {
    let mut gc = Gc::new(BlockAllocator::new(config.heap_size), config.gc_stress);
    gc.debug_mode = config.gc_debug;
    gc
}

fn run_and_report(
    gc: Gc,
    entry_idx: u32,
    config: &CabyConfig,
    file: Option<&str>,
    source: Option<&str>,
) -> Result<(), String> {
    let mut vm = VM::new_with_config(gc, config.debug_mode, config.trace_enabled);
    let result = vm
        .bootstrap_natives()
        .map_err(|error| CabyError::Runtime(crate::vm::LocatedError { error, loc: None }))
        .and_then(|_| vm.run(entry_idx).map_err(CabyError::Runtime));

    if config.gc_stats {
        print_gc_stats(&vm.gc.stats());
    }

    match result {
        Ok(value) => {
            print_result(&value, &vm.gc);
            Ok(())
        }
        Err(e) => Err(render_error(&e, file, source)),
    }
}

fn print_result(value: &Value, gc: &Gc) {
    println!("{}", value.render(gc));
}

fn render_error(error: &CabyError, file: Option<&str>, source: Option<&str>) -> String {
    render(&Report {
        message: error.to_string(),
        loc: error.loc(),
        file,
        source,
    })
}

fn print_gc_stats(stats: &GcStats) {
    println!();
    println!("{}", "=== GC Stats ===".bright_cyan().bold());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![Cell::new("Metric"), Cell::new("Value")]);
    table.add_row(vec!["Live objects", &stats.live_objects.to_string()]);
    table.add_row(vec!["Total allocated", &stats.total_allocated.to_string()]);
    table.add_row(vec!["Total freed", &stats.total_freed.to_string()]);
    table.add_row(vec!["Collections", &stats.collections.to_string()]);
    table.add_row(vec!["Taken bytes", &stats.taken_bytes.to_string()]);
    table.add_row(vec!["Total bytes", &stats.total_bytes.to_string()]);
    println!("{table}");
}
