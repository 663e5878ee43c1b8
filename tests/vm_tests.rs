//! Cross-module tests for the allocator/GC/table/value/serializer layer
//! (spec §8's invariants #3, #5, #6), beyond what `vm::alloc`'s and
//! `vm::table`'s own inline `#[cfg(test)]` modules already cover in
//! isolation.

use caby::vm::value::{fnv1a, Object, StringObj, Value};
use caby::vm::{BlockAllocator, Gc, Roots};
use caby::{serializer, CabyConfig};

fn empty_roots<'a>() -> Roots<'a> {
    Roots {
        constant_pool: &[],
        stack: &[],
        globals: &[],
        frame_locals: &[],
    }
}

#[test]
fn string_hash_matches_fnv1a_and_equality_is_content_based() {
    let mut gc = Gc::new(BlockAllocator::new(1 << 16), false);

    let a = gc
        .alloc_object(Object::String(StringObj::new(b"hello".to_vec())), &empty_roots())
        .unwrap();
    let b = gc
        .alloc_object(Object::String(StringObj::new(b"hello".to_vec())), &empty_roots())
        .unwrap();
    let c = gc
        .alloc_object(Object::String(StringObj::new(b"world".to_vec())), &empty_roots())
        .unwrap();

    let va = Value::Object(a);
    let vb = Value::Object(b);
    let vc = Value::Object(c);

    assert_eq!(va.hash(&gc), fnv1a(b"hello"));
    assert!(va.equals(&vb, &gc), "distinct objects with equal bytes must compare equal");
    assert!(!va.equals(&vc, &gc));
}

#[test]
fn gc_sweep_keeps_only_reachable_objects() {
    let mut gc = Gc::new(BlockAllocator::new(1 << 16), false);

    let kept = gc
        .alloc_object(Object::String(StringObj::new(b"kept".to_vec())), &empty_roots())
        .unwrap();
    let _garbage = gc
        .alloc_object(Object::String(StringObj::new(b"garbage".to_vec())), &empty_roots())
        .unwrap();

    assert_eq!(gc.live_list().len(), 2);

    let stack = [Value::Object(kept)];
    let roots = Roots {
        constant_pool: &[],
        stack: &stack,
        globals: &[],
        frame_locals: &[],
    };
    gc.collect(&roots);

    let live = gc.live_list();
    assert_eq!(live, vec![kept], "sweep must drop every object unreachable from roots");

    let mut seen = std::collections::HashSet::new();
    assert!(live.iter().all(|r| seen.insert(*r)), "live list must contain no duplicates");
}

#[test]
fn bytecode_round_trips_through_the_wire_format() {
    let config = CabyConfig {
        heap_size: 1 << 16,
        ..CabyConfig::default()
    };
    let (gc, entry_idx) = caby::compile_source("1 + 2 * 3", &config).expect("compiles");

    let mut bytes = Vec::new();
    serializer::write_program(&gc, entry_idx, &mut bytes).expect("serializes");

    let mut gc2 = Gc::new(BlockAllocator::new(config.heap_size), false);
    let entry_idx2 = serializer::read_program_from_bytes(&mut gc2, &bytes).expect("deserializes");

    assert_eq!(entry_idx, entry_idx2);
    assert_eq!(gc.const_pool().len(), gc2.const_pool().len());

    for i in 0..gc.const_pool().len() as u32 {
        let r1 = gc.const_pool().get(i).unwrap();
        let r2 = gc2.const_pool().get(i).unwrap();
        match (gc.get(r1), gc2.get(r2)) {
            (Object::Function(f1), Object::Function(f2)) => {
                assert_eq!(f1.arity, f2.arity);
                assert_eq!(f1.locals_max, f2.locals_max);
                assert_eq!(f1.chunk.code, f2.chunk.code);
                assert_eq!(f1.chunk.locations.len(), f2.chunk.locations.len());
            }
            (Object::String(s1), Object::String(s2)) => assert_eq!(s1.bytes, s2.bytes),
            _ => panic!("round-tripped constant pool entry {i} changed kind"),
        }
    }

    let result = caby::run_compiled(gc2, entry_idx2, &config).expect("runs");
    match result {
        Value::Int(7) => {}
        other => panic!("expected Int(7), got {other:?}"),
    }
}

#[test]
fn allocator_reclaims_bytes_on_free() {
    let mut pool = BlockAllocator::new(4096);
    let handles: Vec<_> = (0..8).map(|_| pool.alloc(64).unwrap()).collect();
    assert!(pool.taken_bytes() > 0);
    for h in handles {
        pool.free(h);
    }
    assert_eq!(pool.taken_bytes(), 0);
}
