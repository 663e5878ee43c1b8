//! Shared fatal-error reporting (spec §7). One routine renders every fatal
//! error the front-end, the compiler and the VM can raise: `error.c`'s
//! `print_error` is the source of this format (`<file>:<line>:<col>:
//! Fatal: <message>` plus a `^~~~` caret-underline spanning the offending
//! instruction's `[begin, end]` source range).

use std::fmt;

/// A byte-offset span into the original source text, `[begin, end]`
/// inclusive, shared by the lexer/parser/compiler and the VM's per-
/// instruction location table (`vm::opcode::Loc` mirrors this exactly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    pub begin: u64,
    pub end: u64,
}

impl Loc {
    pub fn new(begin: u64, end: u64) -> Self {
        Loc { begin, end }
    }

    pub fn point(at: u64) -> Self {
        Loc { begin: at, end: at }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}

impl From<crate::vm::opcode::Loc> for Loc {
    fn from(l: crate::vm::opcode::Loc) -> Self {
        Loc {
            begin: l.begin,
            end: l.end,
        }
    }
}

/// Everything needed to render one fatal error: the message, the location
/// it occurred at, and (optionally) the file name plus full source text so
/// a caret-underlined source line can be shown.
pub struct Report<'a> {
    pub message: String,
    pub loc: Option<Loc>,
    pub file: Option<&'a str>,
    pub source: Option<&'a str>,
}

/// Finds the 1-based line number, 0-based column of `offset` within
/// `source`, along with the `(start, end)` byte range of that line
/// (newline excluded).
fn locate(source: &str, offset: u64) -> (usize, usize, usize, usize) {
    let offset = offset as usize;
    let mut line = 1usize;
    let mut line_start = 0usize;
    for (i, b) in source.bytes().enumerate() {
        if i >= offset {
            break;
        }
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(source.len());
    let col = offset.saturating_sub(line_start);
    (line, col, line_start, line_end)
}

/// Renders a fatal error to a string in the spec §7 user-visible form. When
/// no source file is attached, the file name and caret underline are
/// omitted but the bytecode location range is still printed.
pub fn render(report: &Report<'_>) -> String {
    let mut out = String::new();
    match (report.file, report.source, report.loc) {
        (Some(file), Some(source), Some(loc)) => {
            let (line, col, line_start, line_end) = locate(source, loc.begin);
            out.push_str(&format!(
                "{file}:{line}:{}: Fatal: {}\n",
                col + 1,
                report.message
            ));
            let line_text = &source[line_start..line_end];
            out.push_str(&format!(" | {line_text}\n   "));
            let end_col = (loc.end as usize).saturating_sub(line_start).min(line_text.len().saturating_sub(1));
            for i in 0..line_text.len() {
                if i < col {
                    out.push(' ');
                } else if i == col {
                    out.push('^');
                } else if i <= end_col {
                    out.push('~');
                } else {
                    break;
                }
            }
            out.push('\n');
        }
        (_, _, Some(loc)) => {
            out.push_str(&format!("Fatal at {loc}: {}\n", report.message));
        }
        (_, _, None) => {
            out.push_str(&format!("Fatal: {}\n", report.message));
        }
    }
    out
}

/// Prints a fatal error to stderr in the spec §7 form.
pub fn report(message: &str, loc: Option<Loc>, file: Option<&str>, source: Option<&str>) {
    eprint!(
        "{}",
        render(&Report {
            message: message.to_string(),
            loc,
            file,
            source,
        })
    );
}
