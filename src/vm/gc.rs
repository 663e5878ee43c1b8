//! Tracing mark-and-sweep garbage collector (spec §4.2).
//!
//! Grounded on `original_source/Caby/src/gc.c` (root set: stack, globals,
//! frame locals, constant pool; grey-worklist marking) and on
//! `other_examples/b47ac4fc_ceronman-loxido__src-gc.rs.rs`'s idiomatic Rust
//! realization of the same intrusive list (header with `marked`/`next`,
//! cursor-based sweep) — adapted here to slab indices (`ObjRef`) instead of
//! raw pointers, per spec §9's arena-with-references note.

use super::alloc::{BlockAllocator, BlockHandle};
use super::errors::VMError;
use super::opcode::ConstantPool;
use super::value::{Object, ObjRef, Value};

/// Heap growth factor applied to the threshold after every collection.
pub const GROW_FACTOR: usize = 2;

/// Initial GC threshold (bytes of `taken_bytes` before the first forced
/// collection).
const INITIAL_THRESHOLD: usize = 1024 * 1024;

struct Header {
    marked: bool,
    next: Option<ObjRef>,
    handle: BlockHandle,
    size: usize,
    object: Object,
}

/// Owns the object slab, the intrusive "all live objects" list (realized as
/// a chain of slab indices rather than raw pointers), and the block
/// allocator whose budget drives the trigger policy.
pub struct Gc {
    slots: Vec<Option<Header>>,
    head: Option<ObjRef>,
    alloc: BlockAllocator,
    const_pool: ConstantPool,
    next_gc: usize,
    /// Compile-time "stress" mode: collect on every allocation.
    pub stress: bool,
    /// Disabled during constant-pool bootstrap, when the object graph isn't
    /// yet consistent (spec §4.2).
    pub enabled: bool,
    pub debug_mode: bool,
    total_allocated: usize,
    total_freed: usize,
    collections: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub live_objects: usize,
    pub total_allocated: usize,
    pub total_freed: usize,
    pub collections: usize,
    pub taken_bytes: usize,
    pub total_bytes: usize,
}

/// Approximates an object's footprint for the allocator's byte budget. The
/// exact figure doesn't matter for correctness, only that it scales with an
/// object's real size, since it only ever drives the GC trigger policy.
fn object_size(object: &Object) -> usize {
    match object {
        Object::String(s) => 32 + s.bytes.len(),
        Object::Function(f) => 48 + f.chunk.code.len() + f.chunk.locations.len() * 16,
        Object::NativeFunction(_) => 32,
        Object::Class(c) => 32 + c.methods.capacity() * 32,
        Object::Instance(i) => 32 + i.members.capacity() * 32,
    }
}

impl Gc {
    pub fn new(alloc: BlockAllocator, stress: bool) -> Self {
        Gc {
            slots: Vec::new(),
            head: None,
            alloc,
            const_pool: ConstantPool::new(),
            next_gc: INITIAL_THRESHOLD,
            stress,
            enabled: true,
            debug_mode: false,
            total_allocated: 0,
            total_freed: 0,
            collections: 0,
        }
    }

    pub fn const_pool(&self) -> &ConstantPool {
        &self.const_pool
    }

    pub fn const_pool_mut(&mut self) -> &mut ConstantPool {
        &mut self.const_pool
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        &self.slots[r].as_ref().expect("dangling ObjRef").object
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        &mut self.slots[r].as_mut().expect("dangling ObjRef").object
    }

    /// Temporarily removes the object stored at `r`, leaving an inert
    /// placeholder in its slot. Pairs with [`Gc::restore_object`] so a
    /// mutation that itself needs `&Gc` (e.g. hashing a `Value` key into a
    /// `Table` that lives inside this same slab) doesn't alias `self`.
    pub fn take_object(&mut self, r: ObjRef) -> Object {
        let placeholder = Object::String(super::value::StringObj::new(Vec::new()));
        std::mem::replace(&mut self.slots[r].as_mut().expect("dangling ObjRef").object, placeholder)
    }

    pub fn restore_object(&mut self, r: ObjRef, object: Object) {
        self.slots[r].as_mut().expect("dangling ObjRef").object = object;
    }

    /// Allocates `object` on the heap, threading it into the live-objects
    /// list. `roots` is the root set to mark from if a collection is
    /// triggered first (spec §4.2's trigger policy runs before every
    /// allocation). Fails with `AllocatorExhausted` when a fit still can't
    /// be found after a forced collection (spec §4.1/§7).
    pub fn alloc_object(&mut self, object: Object, roots: &Roots<'_>) -> Result<ObjRef, VMError> {
        let size = object_size(&object);

        if self.enabled && (self.stress || self.alloc.taken_bytes() > self.next_gc) {
            self.collect(roots);
        }

        let handle = match self.alloc.alloc(size) {
            Some(h) => h,
            None => {
                self.collect(roots);
                self.alloc.alloc(size).ok_or(VMError::AllocatorExhausted)?
            }
        };

        let next = self.head;
        let r = self.push_slot(Header {
            marked: false,
            next,
            handle,
            size,
            object,
        });
        self.head = Some(r);
        self.total_allocated += 1;

        if self.debug_mode {
            eprintln!("gc: allocated object {r} ({size} bytes)");
        }
        Ok(r)
    }

    fn push_slot(&mut self, header: Header) -> ObjRef {
        self.slots.push(Some(header));
        self.slots.len() - 1
    }

    /// Runs one mark-sweep cycle: marks the transitive closure from `roots`,
    /// then sweeps the live-objects list, freeing anything left unmarked.
    /// No allocation occurs during mark or sweep.
    pub fn collect(&mut self, roots: &Roots<'_>) {
        if self.debug_mode {
            eprintln!("gc: collection begin (taken={})", self.alloc.taken_bytes());
        }
        self.mark_from_roots(roots);
        let collected = self.sweep();
        self.collections += 1;
        self.next_gc = self.alloc.taken_bytes() * GROW_FACTOR;
        if self.debug_mode {
            eprintln!(
                "gc: collection end, freed {collected} objects, next_gc={}",
                self.next_gc
            );
        }
    }

    fn mark_from_roots(&mut self, roots: &Roots<'_>) {
        let mut worklist: Vec<ObjRef> = Vec::new();

        for v in roots.constant_pool {
            self.mark_value(*v, &mut worklist);
        }
        for v in roots.stack {
            self.mark_value(*v, &mut worklist);
        }
        for (k, v) in roots.globals {
            self.mark_value(*k, &mut worklist);
            self.mark_value(*v, &mut worklist);
        }
        for frame_slots in roots.frame_locals {
            for v in *frame_slots {
                self.mark_value(*v, &mut worklist);
            }
        }

        while let Some(r) = worklist.pop() {
            self.scan_object(r, &mut worklist);
        }
    }

    fn mark_value(&mut self, v: Value, worklist: &mut Vec<ObjRef>) {
        if let Value::Object(r) = v {
            self.mark_object(r, worklist);
        }
    }

    fn mark_object(&mut self, r: ObjRef, worklist: &mut Vec<ObjRef>) {
        let header = match self.slots.get_mut(r).and_then(|s| s.as_mut()) {
            Some(h) => h,
            None => return,
        };
        if header.marked {
            return;
        }
        header.marked = true;
        worklist.push(r);
    }

    fn scan_object(&mut self, r: ObjRef, worklist: &mut Vec<ObjRef>) {
        // Grab what we need to recurse on without holding a borrow of
        // `self.slots` across the recursive mark calls.
        enum Scan {
            None,
            Table(Vec<(Value, Value)>),
            Instance { class: ObjRef, members: Vec<(Value, Value)> },
        }
        let scan = match &self.slots[r].as_ref().unwrap().object {
            Object::String(_) | Object::Function(_) | Object::NativeFunction(_) => Scan::None,
            Object::Class(c) => Scan::Table(c.methods.iter_live().collect()),
            Object::Instance(i) => Scan::Instance {
                class: i.class,
                members: i.members.iter_live().collect(),
            },
        };
        match scan {
            Scan::None => {}
            Scan::Table(entries) => {
                for (k, v) in entries {
                    self.mark_value(k, worklist);
                    self.mark_value(v, worklist);
                }
            }
            Scan::Instance { class, members } => {
                self.mark_object(class, worklist);
                for (k, v) in members {
                    self.mark_value(k, worklist);
                    self.mark_value(v, worklist);
                }
            }
        }
    }

    /// Traverses the live-objects list with a `previous`/`current` cursor so
    /// unmarked nodes can be unlinked in place; marked nodes have their mark
    /// bit cleared for the next cycle.
    fn sweep(&mut self) -> usize {
        let mut collected = 0;
        let mut previous: Option<ObjRef> = None;
        let mut current = self.head;

        while let Some(r) = current {
            let next = self.slots[r].as_ref().unwrap().next;
            let marked = self.slots[r].as_ref().unwrap().marked;
            if marked {
                self.slots[r].as_mut().unwrap().marked = false;
                previous = Some(r);
            } else {
                match previous {
                    Some(p) => self.slots[p].as_mut().unwrap().next = next,
                    None => self.head = next,
                }
                let header = self.slots[r].take().unwrap();
                self.alloc.free(header.handle);
                self.total_freed += 1;
                collected += 1;
            }
            current = next;
        }
        collected
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            live_objects: self.slots.iter().filter(|s| s.is_some()).count(),
            total_allocated: self.total_allocated,
            total_freed: self.total_freed,
            collections: self.collections,
            taken_bytes: self.alloc.taken_bytes(),
            total_bytes: self.alloc.total_bytes(),
        }
    }

    /// For tests: walks the live list and returns the `ObjRef`s in order,
    /// verifying invariant #1 (no duplicates) by construction of the
    /// traversal itself.
    pub fn live_list(&self) -> Vec<ObjRef> {
        let mut out = Vec::new();
        let mut current = self.head;
        while let Some(r) = current {
            out.push(r);
            current = self.slots[r].as_ref().unwrap().next;
        }
        out
    }
}

/// The root set for one mark phase (spec §4.2): constant pool, operand
/// stack (live prefix only), globals table entries, and every active call
/// frame's full `locals_max` slice.
pub struct Roots<'a> {
    pub constant_pool: &'a [Value],
    pub stack: &'a [Value],
    pub globals: &'a [(Value, Value)],
    pub frame_locals: &'a [&'a [Value]],
}
