//! Hand-rolled argv parsing (spec §6.2): no `clap`, matching the teacher's
//! `while ... starts_with("--")` convention in its own `cli/args.rs`.

use std::env;

use crate::CabyConfig;

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub debug_mode: bool,
    pub gc_stress: bool,
    pub gc_debug: bool,
    pub gc_stats: bool,
    pub trace_enabled: bool,
    pub source: Option<String>,
    pub command: CliCommand,
}

#[derive(Debug, Clone)]
pub enum CliCommand {
    Run { file: String },
    Execute { file: String },
    Disassemble { file: String },
}

impl CliArgs {
    pub fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();

        if args.len() < 2 {
            return Err(Self::usage_string());
        }

        let mut debug_mode = false;
        let mut gc_stress = false;
        let mut gc_debug = false;
        let mut gc_stats = false;
        let mut trace_enabled = false;
        let mut source = None;
        let mut positional: Vec<String> = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--debug" => {
                    debug_mode = true;
                    i += 1;
                }
                "--gc-stress" => {
                    gc_stress = true;
                    i += 1;
                }
                "--gc-debug" => {
                    gc_debug = true;
                    i += 1;
                }
                "--gc-stats" => {
                    gc_stats = true;
                    i += 1;
                }
                "--trace" => {
                    trace_enabled = true;
                    i += 1;
                }
                "--source" => {
                    if i + 1 >= args.len() {
                        return Err("--source flag requires a file path".to_string());
                    }
                    source = Some(args[i + 1].clone());
                    i += 2;
                }
                flag if flag.starts_with("--") => {
                    return Err(format!("Unknown flag: {flag}"));
                }
                _ => {
                    positional.push(args[i].clone());
                    i += 1;
                }
            }
        }

        if positional.is_empty() {
            return Err("No program file specified".to_string());
        }

        let command = match positional[0].as_str() {
            "execute" => {
                if positional.len() != 2 {
                    return Err("Usage: caby execute <bytecode-file> [--source <src>]".to_string());
                }
                CliCommand::Execute {
                    file: positional[1].clone(),
                }
            }
            "disassemble" => {
                if positional.len() != 2 {
                    return Err("Usage: caby disassemble <bytecode-file>".to_string());
                }
                CliCommand::Disassemble {
                    file: positional[1].clone(),
                }
            }
            _ => {
                if positional.len() != 1 {
                    return Err(Self::usage_string());
                }
                CliCommand::Run {
                    file: positional[0].clone(),
                }
            }
        };

        Ok(CliArgs {
            debug_mode,
            gc_stress,
            gc_debug,
            gc_stats,
            trace_enabled,
            source,
            command,
        })
    }

    pub fn to_config(&self) -> CabyConfig {
        CabyConfig {
            gc_stress: self.gc_stress,
            gc_debug: self.gc_debug,
            gc_stats: self.gc_stats,
            debug_mode: self.debug_mode,
            trace_enabled: self.trace_enabled,
            ..CabyConfig::default()
        }
    }

    fn usage_string() -> String {
        "Usage: caby [--debug] [--gc-stress] [--gc-debug] [--gc-stats] [--trace] <source-file>\n\
         \x20      caby execute <bytecode-file> [--source <src>]\n\
         \x20      caby disassemble <bytecode-file>"
            .to_string()
    }
}
