//! Call frames (spec §4.4). Grounded on
//! `original_source/Caby/src/vm.h`'s `struct call_frame` / `FRAME_DEPTH`.

use super::value::ObjRef;

/// Maximum simultaneous call frames; exceeding this is a runtime error
/// (spec §4.4), not a panic.
pub const MAX_FRAME_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// The `Function` object this frame is executing.
    pub function: ObjRef,
    /// Absolute byte offset to resume at in the *caller's* chunk.
    pub return_ip: usize,
    /// Base index into the VM-wide locals array for this frame's window.
    pub slots_base: usize,
}
