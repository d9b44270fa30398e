// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Microtask ordering, async/await resumption, timers, and worker-thread
//! task posting, end to end.

use vesper_vm::bytecode::{
    FunctionMeta, OpCode, Program, ProgramBuilder, ScopeKind,
};
use vesper_vm::event_loop::TaskPayload;
use vesper_vm::vm::{Vm, VmOptions};

const GLOBAL: i32 = ScopeKind::Global as i32;
const ARG: i32 = ScopeKind::Arg as i32;
const LOCAL: i32 = ScopeKind::Local as i32;

fn new_vm(program: Program) -> Box<Vm> {
    Vm::new(program, VmOptions {
        heap_size_mb: 8,
        worker_threads: 2,
        ..VmOptions::default()
    })
}

fn run(program: Program) -> Vec<String> {
    let mut vm = new_vm(program);
    vm.run().expect("top-level execution failed");
    vm.take_log()
}

fn emit_print_i32(b: &mut ProgramBuilder, print_atom: u32, value: i32) {
    b.emit1(OpCode::DynGetVar, print_atom as i32);
    b.emit1(OpCode::PushI32, value);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
}

// Promise microtask ordering:
//   log(1);Promise.resolve().then(()=>log(3));log(2)
#[test]
fn promise_microtask_ordering() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_promise = b.atom("Promise");
    let k_resolve = b.atom("resolve");
    let k_then = b.atom("then");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_cb = b.add_meta(FunctionMeta::default());

    let g_start = b.here();
    emit_print_i32(&mut b, k_print, 1);
    b.emit1(OpCode::DynGetVar, k_promise as i32);
    b.emit1(OpCode::GetPropAtom2, k_resolve as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit2(OpCode::Call, 0, 1);
    b.emit1(OpCode::GetPropAtom2, k_then as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit1(OpCode::MakeFunc, m_cb as i32);
    b.emit2(OpCode::Call, 1, 1);
    b.emit(OpCode::PopDrop);
    emit_print_i32(&mut b, k_print, 2);
    b.emit(OpCode::Halt);

    let cb_start = b.here();
    emit_print_i32(&mut b, k_print, 3);
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: cb_start,
        ..FunctionMeta::default()
    };
    b.metas[m_cb as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 8,
        bytecode_start: cb_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1", "2", "3"]);
}

// Async suspension and resumption:
//   async function a(){log(2);let v=await 5;log(v);return 10}
//   log(1);a().then(r=>log(r));log(3)
#[test]
fn async_await_resumes_through_microtasks() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_then = b.atom("then");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_async = b.add_meta(FunctionMeta::default());
    let m_then_cb = b.add_meta(FunctionMeta::default());

    // Global locals: [a].
    let g_start = b.here();
    b.emit1(OpCode::MakeFunc, m_async as i32);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    emit_print_i32(&mut b, k_print, 1);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 0, 0);
    b.emit1(OpCode::GetPropAtom2, k_then as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit1(OpCode::MakeFunc, m_then_cb as i32);
    b.emit2(OpCode::Call, 1, 1);
    b.emit(OpCode::PopDrop);
    emit_print_i32(&mut b, k_print, 3);
    b.emit(OpCode::Halt);

    // async a: locals [v].
    let a_start = b.here();
    emit_print_i32(&mut b, k_print, 2);
    b.emit1(OpCode::PushI32, 5);
    b.emit(OpCode::Await);
    b.emit2(OpCode::PopVar, LOCAL, 0);
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, LOCAL, 0);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::PushI32, 10);
    b.emit(OpCode::Ret);

    // r => log(r)
    let cb_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, ARG, 0);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 1,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: a_start,
        ..FunctionMeta::default()
    };
    let name = b.atom("a");
    b.metas[m_async as usize] = FunctionMeta {
        name_atom: name,
        is_async: true,
        local_var_count: 1,
        stack_size: 8,
        bytecode_start: a_start,
        bytecode_end: cb_start,
        ..FunctionMeta::default()
    };
    b.metas[m_then_cb as usize] = FunctionMeta {
        is_arrow: true,
        param_count: 1,
        stack_size: 8,
        bytecode_start: cb_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1", "2", "3", "5", "10"]);
}

// Timer macrotasks run after the script:
//   log('a');setTimeout(()=>log('c'),5);log('b')
#[test]
fn timers_run_after_script_completion() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_set_timeout = b.atom("setTimeout");
    let k_a = b.atom("a");
    let k_b = b.atom("b");
    let k_c = b.atom("c");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_cb = b.add_meta(FunctionMeta::default());

    let g_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit1(OpCode::PushStr, k_a as i32);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::DynGetVar, k_set_timeout as i32);
    b.emit1(OpCode::MakeFunc, m_cb as i32);
    b.emit1(OpCode::PushI32, 5);
    b.emit2(OpCode::Call, 2, 0);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit1(OpCode::PushStr, k_b as i32);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    let cb_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit1(OpCode::PushStr, k_c as i32);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: cb_start,
        ..FunctionMeta::default()
    };
    b.metas[m_cb as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 8,
        bytecode_start: cb_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["a", "b", "c"]);
}

// Canceled timers are skipped at dispatch:
//   let id=setTimeout(()=>log('x'),30);clearTimeout(id);
//   setTimeout(()=>log('y'),5)
#[test]
fn cleared_timers_do_not_fire() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_set_timeout = b.atom("setTimeout");
    let k_clear_timeout = b.atom("clearTimeout");
    let k_x = b.atom("x");
    let k_y = b.atom("y");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_x = b.add_meta(FunctionMeta::default());
    let m_y = b.add_meta(FunctionMeta::default());

    // Global locals: [id].
    let g_start = b.here();
    b.emit1(OpCode::DynGetVar, k_set_timeout as i32);
    b.emit1(OpCode::MakeFunc, m_x as i32);
    b.emit1(OpCode::PushI32, 30);
    b.emit2(OpCode::Call, 2, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit1(OpCode::DynGetVar, k_clear_timeout as i32);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::DynGetVar, k_set_timeout as i32);
    b.emit1(OpCode::MakeFunc, m_y as i32);
    b.emit1(OpCode::PushI32, 5);
    b.emit2(OpCode::Call, 2, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    let x_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit1(OpCode::PushStr, k_x as i32);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::RetUndef);
    let y_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit1(OpCode::PushStr, k_y as i32);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 1,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: x_start,
        ..FunctionMeta::default()
    };
    b.metas[m_x as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 8,
        bytecode_start: x_start,
        bytecode_end: y_start,
        ..FunctionMeta::default()
    };
    b.metas[m_y as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 8,
        bytecode_start: y_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["y"]);
}

// Promise.all joins results in input order.
#[test]
fn promise_all_collects_in_order() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_promise = b.atom("Promise");
    let k_resolve = b.atom("resolve");
    let k_all = b.atom("all");
    let k_then = b.atom("then");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_cb = b.add_meta(FunctionMeta::default());

    let g_start = b.here();
    b.emit1(OpCode::DynGetVar, k_promise as i32);
    b.emit1(OpCode::GetPropAtom2, k_all as i32);
    b.emit(OpCode::MoveToTop1);
    // [Promise.resolve(1), 2]
    b.emit(OpCode::MakeArray);
    b.emit1(OpCode::DynGetVar, k_promise as i32);
    b.emit1(OpCode::GetPropAtom2, k_resolve as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit1(OpCode::PushI32, 1);
    b.emit2(OpCode::Call, 1, 1);
    b.emit1(OpCode::PushI32, 2);
    b.emit1(OpCode::AddElements, 2);
    b.emit2(OpCode::Call, 1, 1);
    b.emit1(OpCode::GetPropAtom2, k_then as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit1(OpCode::MakeFunc, m_cb as i32);
    b.emit2(OpCode::Call, 1, 1);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    // arr => { log(arr[0]); log(arr[1]) }
    let cb_start = b.here();
    for index in 0..2 {
        b.emit1(OpCode::DynGetVar, k_print as i32);
        b.emit2(OpCode::PushVar, ARG, 0);
        b.emit1(OpCode::PushI32, index);
        b.emit(OpCode::GetPropIndex);
        b.emit2(OpCode::Call, 1, 0);
        b.emit(OpCode::PopDrop);
    }
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: cb_start,
        ..FunctionMeta::default()
    };
    b.metas[m_cb as usize] = FunctionMeta {
        is_arrow: true,
        param_count: 1,
        stack_size: 8,
        bytecode_start: cb_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1", "2"]);
}

// Settling is monotonic: a second resolve is a no-op.
//   new Promise((res, rej) => { res(1); res(2) }).then(v => log(v))
#[test]
fn promise_settling_is_monotonic() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_promise = b.atom("Promise");
    let k_then = b.atom("then");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_executor = b.add_meta(FunctionMeta::default());
    let m_cb = b.add_meta(FunctionMeta::default());

    let g_start = b.here();
    b.emit1(OpCode::DynGetVar, k_promise as i32);
    b.emit1(OpCode::MakeFunc, m_executor as i32);
    b.emit1(OpCode::JsNew, 1);
    b.emit1(OpCode::GetPropAtom2, k_then as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit1(OpCode::MakeFunc, m_cb as i32);
    b.emit2(OpCode::Call, 1, 1);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    // (res, rej) => { res(1); res(2) }
    let executor_start = b.here();
    for value in [1, 2] {
        b.emit2(OpCode::PushVar, ARG, 0);
        b.emit1(OpCode::PushI32, value);
        b.emit2(OpCode::Call, 1, 0);
        b.emit(OpCode::PopDrop);
    }
    b.emit(OpCode::RetUndef);

    // v => log(v)
    let cb_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, ARG, 0);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: executor_start,
        ..FunctionMeta::default()
    };
    b.metas[m_executor as usize] = FunctionMeta {
        is_arrow: true,
        param_count: 2,
        stack_size: 8,
        bytecode_start: executor_start,
        bytecode_end: cb_start,
        ..FunctionMeta::default()
    };
    b.metas[m_cb as usize] = FunctionMeta {
        is_arrow: true,
        param_count: 1,
        stack_size: 8,
        bytecode_start: cb_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1"]);
}

// Worker-thread results become macrotask arguments on the main thread.
#[test]
fn blocking_work_posts_back_as_macrotask() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_on_data = b.atom("onData");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_handler = b.add_meta(FunctionMeta::default());

    let g_start = b.here();
    b.emit1(OpCode::MakeFunc, m_handler as i32);
    b.emit1(OpCode::DynSetVar, k_on_data as i32);
    b.emit(OpCode::Halt);

    let handler_start = b.here();
    b.emit1(OpCode::DynGetVar, k_print as i32);
    b.emit2(OpCode::PushVar, ARG, 0);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: handler_start,
        ..FunctionMeta::default()
    };
    let name = b.atom("onData");
    b.metas[m_handler as usize] = FunctionMeta {
        name_atom: name,
        param_count: 1,
        stack_size: 8,
        bytecode_start: handler_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    let mut vm = new_vm(b.finish(m_global));
    vm.run().expect("top-level execution failed");
    let handler = vm.global_value("onData").expect("handler registered");
    vm.post_blocking_task(
        handler,
        Box::new(|| TaskPayload::Text("from the worker".to_string())),
    );
    vm.run_pending();
    assert_eq!(vm.take_log(), ["from the worker"]);
}
