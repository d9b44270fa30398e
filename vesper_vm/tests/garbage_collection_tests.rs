// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collector stress from the interpreter side: allocation churn across
//! many minor cycles with live closures, capture cells and object graphs
//! that must survive relocation intact.

use vesper_vm::bytecode::{
    CaptureSpec, FunctionMeta, OpCode, Program, ProgramBuilder, ScopeKind,
};
use vesper_vm::vm::{Vm, VmOptions};

const GLOBAL: i32 = ScopeKind::Global as i32;
const LOCAL: i32 = ScopeKind::Local as i32;
const CLOSURE: i32 = ScopeKind::Closure as i32;

fn run_small_heap(program: Program) -> (Vec<String>, vesper_vm::heap::GcStats) {
    let mut vm = Vm::new(program, VmOptions {
        heap_size_mb: 2,
        worker_threads: 1,
        ..VmOptions::default()
    });
    vm.run().expect("top-level execution failed");
    let stats = vm.gc_stats();
    (vm.take_log(), stats)
}

// A long allocation loop keeps one object graph and one closure live; both
// must read back correctly after the churn forced several collections.
#[test]
fn live_graph_survives_allocation_churn() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_mark = b.atom("mark");
    let k_a = b.atom("a");
    let k_get = b.atom("get");
    let k_inc = b.atom("inc");
    let k_left = b.atom("abcdefgh");
    let k_right = b.atom("ijklmnop");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_make = b.add_meta(FunctionMeta::default());
    let m_get = b.add_meta(FunctionMeta::default());
    let m_inc = b.add_meta(FunctionMeta::default());

    const ROUNDS: i32 = 20_000;

    // Global locals: [keep, counter, i, tmp].
    let g_start = b.here();
    // keep = {mark: 42}
    b.emit(OpCode::MakeObj);
    b.emit1(OpCode::PushAtom, k_mark as i32);
    b.emit1(OpCode::PushI32, 42);
    b.emit1(OpCode::AddProps, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    // counter = make()
    b.emit1(OpCode::MakeFunc, m_make as i32);
    b.emit2(OpCode::Call, 0, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    // i = 0
    b.emit1(OpCode::PushI32, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 2);
    let loop_head = b.here();
    b.emit2(OpCode::PushVar, GLOBAL, 2);
    b.emit1(OpCode::PushI32, ROUNDS);
    b.emit(OpCode::Lt);
    let exit_jmp = b.emit1(OpCode::JmpFalsePop, 0);
    // tmp = {a: i} — transient garbage.
    b.emit(OpCode::MakeObj);
    b.emit1(OpCode::PushAtom, k_a as i32);
    b.emit2(OpCode::PushVar, GLOBAL, 2);
    b.emit1(OpCode::AddProps, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 3);
    // "abcdefgh" + "ijklmnop" — transient heap string.
    b.emit1(OpCode::PushStr, k_left as i32);
    b.emit1(OpCode::PushStr, k_right as i32);
    b.emit(OpCode::Add);
    b.emit(OpCode::PopDrop);
    // counter.inc()
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit1(OpCode::GetPropAtom2, k_inc as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit2(OpCode::Call, 0, 1);
    b.emit(OpCode::PopDrop);
    b.emit2(OpCode::Inc, GLOBAL, 2);
    b.emit1(OpCode::Jmp, loop_head as i32);
    let loop_exit = b.here();
    b.patch_target(exit_jmp, loop_exit);
    // print(keep.mark); print(counter.get())
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit1(OpCode::GetPropAtom, k_mark as i32);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit1(OpCode::GetPropAtom2, k_get as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit2(OpCode::Call, 0, 1);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    // make: let x = 0; return {get, inc} capturing x.
    let make_start = b.here();
    b.emit1(OpCode::PushI32, 0);
    b.emit2(OpCode::PopVar, LOCAL, 0);
    b.emit(OpCode::MakeObj);
    b.emit1(OpCode::PushAtom, k_get as i32);
    b.emit1(OpCode::MakeFunc, m_get as i32);
    b.emit1(OpCode::PushAtom, k_inc as i32);
    b.emit1(OpCode::MakeFunc, m_inc as i32);
    b.emit1(OpCode::AddProps, 2);
    b.emit(OpCode::Ret);

    let get_start = b.here();
    b.emit2(OpCode::PushVar, CLOSURE, 0);
    b.emit(OpCode::Ret);
    let inc_start = b.here();
    b.emit2(OpCode::Inc, CLOSURE, 0);
    b.emit2(OpCode::PushVar, CLOSURE, 0);
    b.emit(OpCode::Ret);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 4,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: make_start,
        ..FunctionMeta::default()
    };
    let name = b.atom("make");
    b.metas[m_make as usize] = FunctionMeta {
        name_atom: name,
        local_var_count: 1,
        stack_size: 8,
        bytecode_start: make_start,
        bytecode_end: get_start,
        ..FunctionMeta::default()
    };
    b.metas[m_get as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 4,
        bytecode_start: get_start,
        bytecode_end: inc_start,
        captures: vec![CaptureSpec { kind: ScopeKind::Local, index: 0 }],
        ..FunctionMeta::default()
    };
    b.metas[m_inc as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 4,
        bytecode_start: inc_start,
        bytecode_end: end,
        captures: vec![CaptureSpec { kind: ScopeKind::Local, index: 0 }],
        ..FunctionMeta::default()
    };

    let (log, stats) = run_small_heap(b.finish(m_global));
    assert_eq!(log, ["42", "20000"]);
    // The whole point of the small heap: the loop must actually have
    // collected.
    assert!(stats.newgen_gc_count > 0, "no minor collection ran");
}

// Strings pinned in an array survive promotion to the old generation and
// keep their contents.
#[test]
fn promoted_strings_keep_contents() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_payload = b.atom("payload-XYZ");
    let k_junk = b.atom("junkjunkjunkjunk");
    let m_global = b.add_meta(FunctionMeta::default());

    const ROUNDS: i32 = 30_000;

    // Global locals: [pinned, i].
    let g_start = b.here();
    // pinned = ["payload-XYZ" + ""]  (forces a heap string)
    b.emit(OpCode::MakeArray);
    b.emit1(OpCode::PushStr, k_payload as i32);
    b.emit1(OpCode::PushAtom, 0); // the empty string
    b.emit(OpCode::Add);
    b.emit1(OpCode::AddElements, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit1(OpCode::PushI32, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    let loop_head = b.here();
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit1(OpCode::PushI32, ROUNDS);
    b.emit(OpCode::Lt);
    let exit_jmp = b.emit1(OpCode::JmpFalsePop, 0);
    b.emit1(OpCode::PushStr, k_junk as i32);
    b.emit1(OpCode::PushStr, k_junk as i32);
    b.emit(OpCode::Add);
    b.emit(OpCode::PopDrop);
    b.emit2(OpCode::Inc, GLOBAL, 1);
    b.emit1(OpCode::Jmp, loop_head as i32);
    let loop_exit = b.here();
    b.patch_target(exit_jmp, loop_exit);
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit1(OpCode::PushI32, 0);
    b.emit(OpCode::GetPropIndex);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 2,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    let (log, stats) = run_small_heap(b.finish(m_global));
    assert_eq!(log, ["payload-XYZ"]);
    assert!(stats.newgen_gc_count > 1, "expected repeated minor collections");
    assert!(stats.promoted_objects > 0, "expected survivors to promote");
}
