// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end interpreter scenarios, hand-assembled the way the external
//! codegen would emit them. Each test builds a program, runs it, and
//! asserts on the console log.

use vesper_vm::bytecode::{
    CatchEntry, FunctionMeta, OpCode, Program, ProgramBuilder, ScopeKind,
};
use vesper_vm::vm::{Vm, VmOptions};

const GLOBAL: i32 = ScopeKind::Global as i32;
const LOCAL: i32 = ScopeKind::Local as i32;
const ARG: i32 = ScopeKind::Arg as i32;
const CLOSURE: i32 = ScopeKind::Closure as i32;

fn run(program: Program) -> Vec<String> {
    let mut vm = Vm::new(program, VmOptions {
        heap_size_mb: 8,
        worker_threads: 1,
        ..VmOptions::default()
    });
    vm.run().expect("top-level execution failed");
    vm.take_log()
}

/// `print(<push the argument>)`.
fn emit_print(
    b: &mut ProgramBuilder,
    print_atom: u32,
    push_arg: impl FnOnce(&mut ProgramBuilder),
) {
    b.emit1(OpCode::DynGetVar, print_atom as i32);
    push_arg(b);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
}

/// `receiver.method(...)` with zero arguments, leaving the result pushed.
fn emit_method_call_0(
    b: &mut ProgramBuilder,
    method_atom: u32,
    push_receiver: impl FnOnce(&mut ProgramBuilder),
) {
    push_receiver(b);
    b.emit1(OpCode::GetPropAtom2, method_atom as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit2(OpCode::Call, 0, 1);
}

// Closures share cells:
//   function make(){let x=0;return{get:()=>x,inc:()=>++x}}
//   let o=make();o.inc();o.inc();log(o.get())
#[test]
fn closures_share_cells() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_get = b.atom("get");
    let k_inc = b.atom("inc");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_make = b.add_meta(FunctionMeta::default());
    let m_get = b.add_meta(FunctionMeta::default());
    let m_inc = b.add_meta(FunctionMeta::default());

    // Global: locals are [make, o].
    let g_start = b.here();
    b.emit1(OpCode::MakeFunc, m_make as i32);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 0, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    for _ in 0..2 {
        emit_method_call_0(&mut b, k_inc, |b| {
            b.emit2(OpCode::PushVar, GLOBAL, 1);
        });
        b.emit(OpCode::PopDrop);
    }
    b.emit1(OpCode::DynGetVar, k_print as i32);
    emit_method_call_0(&mut b, k_get, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
    });
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    // make: one local, x.
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

    // get: () => x
    let get_start = b.here();
    b.emit2(OpCode::PushVar, CLOSURE, 0);
    b.emit(OpCode::Ret);

    // inc: () => ++x
    let inc_start = b.here();
    b.emit2(OpCode::Inc, CLOSURE, 0);
    b.emit2(OpCode::PushVar, CLOSURE, 0);
    b.emit(OpCode::Ret);
    let end = b.here();

    let name = b.atom("make");
    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 2,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: make_start,
        ..FunctionMeta::default()
    };
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
        captures: vec![vesper_vm::bytecode::CaptureSpec {
            kind: ScopeKind::Local,
            index: 0,
        }],
        ..FunctionMeta::default()
    };
    b.metas[m_inc as usize] = FunctionMeta {
        is_arrow: true,
        stack_size: 4,
        bytecode_start: inc_start,
        bytecode_end: end,
        captures: vec![vesper_vm::bytecode::CaptureSpec {
            kind: ScopeKind::Local,
            index: 0,
        }],
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["2"]);
}

// Generator protocol:
//   function*g(){yield 1;yield 2;return 3}
//   let it=g();log(it.next().value);log(it.next().value);
//   let r=it.next();log(r.value);log(r.done)
#[test]
fn generator_protocol() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_next = b.atom("next");
    let k_value = b.atom("value");
    let k_done = b.atom("done");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_gen = b.add_meta(FunctionMeta::default());

    // Global locals: [g, it, r].
    let g_start = b.here();
    b.emit1(OpCode::MakeFunc, m_gen as i32);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 0, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    for _ in 0..2 {
        b.emit1(OpCode::DynGetVar, k_print as i32);
        emit_method_call_0(&mut b, k_next, |b| {
            b.emit2(OpCode::PushVar, GLOBAL, 1);
        });
        b.emit1(OpCode::GetPropAtom, k_value as i32);
        b.emit2(OpCode::Call, 1, 0);
        b.emit(OpCode::PopDrop);
    }
    emit_method_call_0(&mut b, k_next, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
    });
    b.emit2(OpCode::PopVar, GLOBAL, 2);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 2);
        b.emit1(OpCode::GetPropAtom, k_value as i32);
    });
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 2);
        b.emit1(OpCode::GetPropAtom, k_done as i32);
    });
    b.emit(OpCode::Halt);

    let gen_start = b.here();
    b.emit1(OpCode::PushI32, 1);
    b.emit(OpCode::Yield);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::PushI32, 2);
    b.emit(OpCode::Yield);
    b.emit(OpCode::PopDrop);
    b.emit1(OpCode::PushI32, 3);
    b.emit(OpCode::Ret);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 3,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: gen_start,
        ..FunctionMeta::default()
    };
    let name = b.atom("g");
    b.metas[m_gen as usize] = FunctionMeta {
        name_atom: name,
        is_generator: true,
        stack_size: 4,
        bytecode_start: gen_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1", "2", "3", "true"]);
}

// Exception unwinding across a call:
//   function f(){throw new TypeError('x')}
//   try{f()}catch(e){log(e.message)}
#[test]
fn try_catch_across_call() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_type_error = b.atom("TypeError");
    let k_message = b.atom("message");
    let k_x = b.atom("x");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_f = b.add_meta(FunctionMeta::default());

    // Global locals: [f, e].
    let g_start = b.here();
    b.emit1(OpCode::MakeFunc, m_f as i32);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    let try_start = b.here();
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 0, 0);
    b.emit(OpCode::PopDrop);
    let try_end = b.here();
    let jmp_over = b.emit1(OpCode::Jmp, 0);
    let handler = b.here();
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
        b.emit1(OpCode::GetPropAtom, k_message as i32);
    });
    let after = b.here();
    b.patch_target(jmp_over, after);
    b.emit(OpCode::Halt);

    // f: throw compiles to build + ret_err (no enclosing handler).
    let f_start = b.here();
    b.emit1(OpCode::DynGetVar, k_type_error as i32);
    b.emit1(OpCode::PushStr, k_x as i32);
    b.emit1(OpCode::JsNew, 1);
    b.emit(OpCode::RetErr);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 2,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: f_start,
        catch_table: vec![CatchEntry {
            start_pc: try_start,
            end_pc: try_end,
            handler_pc: handler,
            locals_begin: 1,
            locals_end: 2,
        }],
        ..FunctionMeta::default()
    };
    let name = b.atom("f");
    b.metas[m_f as usize] = FunctionMeta {
        name_atom: name,
        stack_size: 4,
        bytecode_start: f_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["x"]);
}

// Array growth and iteration over holes:
//   let a=[];a[2]=7;log(a.length);
//   let s=0;for(const v of a)s+=(v===undefined?0:v);log(s)
#[test]
fn array_growth_and_iteration() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_length = b.atom("length");
    let m_global = b.add_meta(FunctionMeta::default());

    // Global locals: [a, s, v].
    let g_start = b.here();
    b.emit(OpCode::MakeArray);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit1(OpCode::PushI32, 2);
    b.emit1(OpCode::PushI32, 7);
    b.emit(OpCode::SetPropIndex);
    b.emit(OpCode::PopDrop);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 0);
        b.emit1(OpCode::GetPropAtom, k_length as i32);
    });
    b.emit1(OpCode::PushI32, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit(OpCode::ForOfInit);
    let loop_head = b.here();
    b.emit(OpCode::ForOfNext);
    let iter_jmp = b.emit1(OpCode::IterEndJmp, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 2);
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit2(OpCode::PushVar, GLOBAL, 2);
    b.emit(OpCode::PushUndef);
    b.emit(OpCode::EqStrict);
    let jmp_else = b.emit1(OpCode::JmpFalsePop, 0);
    b.emit1(OpCode::PushI32, 0);
    let jmp_cont = b.emit1(OpCode::Jmp, 0);
    let else_at = b.here();
    b.patch_target(jmp_else, else_at);
    b.emit2(OpCode::PushVar, GLOBAL, 2);
    let cont_at = b.here();
    b.patch_target(jmp_cont, cont_at);
    b.emit(OpCode::Add);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    b.emit1(OpCode::Jmp, loop_head as i32);
    let loop_end = b.here();
    b.patch_target(iter_jmp, loop_end);
    b.emit(OpCode::PopDrop);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
    });
    b.emit(OpCode::Halt);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 3,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["3", "7"]);
}

// Prototype chain with shadowing:
//   let p={f:1};let o=Object.create(p);
//   log(o.f);o.f=2;log(o.f);log(p.f)
#[test]
fn prototype_chain_shadowing() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_object = b.atom("Object");
    let k_create = b.atom("create");
    let k_f = b.atom("f");
    let m_global = b.add_meta(FunctionMeta::default());

    // Global locals: [p, o].
    let g_start = b.here();
    b.emit(OpCode::MakeObj);
    b.emit1(OpCode::PushAtom, k_f as i32);
    b.emit1(OpCode::PushI32, 1);
    b.emit1(OpCode::AddProps, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit1(OpCode::DynGetVar, k_object as i32);
    b.emit1(OpCode::GetPropAtom2, k_create as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 1, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
        b.emit1(OpCode::GetPropAtom, k_f as i32);
    });
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit1(OpCode::PushI32, 2);
    b.emit1(OpCode::SetPropAtom, k_f as i32);
    b.emit(OpCode::PopDrop);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
        b.emit1(OpCode::GetPropAtom, k_f as i32);
    });
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 0);
        b.emit1(OpCode::GetPropAtom, k_f as i32);
    });
    b.emit(OpCode::Halt);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 2,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1", "2", "1"]);
}

// Bound-function argument composition:
//   function f(a,b,c){log(a);log(b);log(c)}
//   let g=f.bind(null,1,2);g(3)
#[test]
fn bound_function_argument_composition() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_bind = b.atom("bind");
    let m_global = b.add_meta(FunctionMeta::default());
    let m_f = b.add_meta(FunctionMeta::default());

    // Global locals: [f, g].
    let g_start = b.here();
    b.emit1(OpCode::MakeFunc, m_f as i32);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit1(OpCode::GetPropAtom2, k_bind as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit(OpCode::PushNull);
    b.emit1(OpCode::PushI32, 1);
    b.emit1(OpCode::PushI32, 2);
    b.emit2(OpCode::Call, 3, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit1(OpCode::PushI32, 3);
    b.emit2(OpCode::Call, 1, 0);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);

    let f_start = b.here();
    for i in 0..3 {
        emit_print(&mut b, k_print, |b| {
            b.emit2(OpCode::PushVar, ARG, i);
        });
    }
    b.emit(OpCode::RetUndef);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 2,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: f_start,
        ..FunctionMeta::default()
    };
    let name = b.atom("f");
    b.metas[m_f as usize] = FunctionMeta {
        name_atom: name,
        param_count: 3,
        stack_size: 8,
        bytecode_start: f_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["1", "2", "3"]);
}

// for-in snapshots own keys before prototype keys:
//   let p={x:1};let o=Object.create(p);o.y=2;
//   for(let k in o)log(k)
#[test]
fn for_in_walks_own_then_prototype_keys() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_object = b.atom("Object");
    let k_create = b.atom("create");
    let k_x = b.atom("x");
    let k_y = b.atom("y");
    let m_global = b.add_meta(FunctionMeta::default());

    // Global locals: [p, o, k].
    let g_start = b.here();
    b.emit(OpCode::MakeObj);
    b.emit1(OpCode::PushAtom, k_x as i32);
    b.emit1(OpCode::PushI32, 1);
    b.emit1(OpCode::AddProps, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 0);
    b.emit1(OpCode::DynGetVar, k_object as i32);
    b.emit1(OpCode::GetPropAtom2, k_create as i32);
    b.emit(OpCode::MoveToTop1);
    b.emit2(OpCode::PushVar, GLOBAL, 0);
    b.emit2(OpCode::Call, 1, 1);
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit1(OpCode::PushI32, 2);
    b.emit1(OpCode::SetPropAtom, k_y as i32);
    b.emit(OpCode::PopDrop);
    b.emit2(OpCode::PushVar, GLOBAL, 1);
    b.emit(OpCode::ForInInit);
    let loop_head = b.here();
    b.emit(OpCode::ForInNext);
    let iter_jmp = b.emit1(OpCode::IterEndJmp, 0);
    b.emit2(OpCode::PopVar, GLOBAL, 2);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 2);
    });
    b.emit1(OpCode::Jmp, loop_head as i32);
    let loop_end = b.here();
    b.patch_target(iter_jmp, loop_end);
    b.emit(OpCode::PopDrop);
    b.emit(OpCode::Halt);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 3,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["y", "x"]);
}

// TDZ reads throw ReferenceError; the handler observes it.
#[test]
fn tdz_read_throws_reference_error() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_name = b.atom("name");
    let m_global = b.add_meta(FunctionMeta::default());

    // Global locals: [x, e].
    let g_start = b.here();
    b.emit2(OpCode::VarDeinit, 0, 0);
    let try_start = b.here();
    b.emit2(OpCode::PushVarCheck, GLOBAL, 0);
    b.emit(OpCode::PopDrop);
    let try_end = b.here();
    let jmp_over = b.emit1(OpCode::Jmp, 0);
    let handler = b.here();
    b.emit2(OpCode::PopVar, GLOBAL, 1);
    emit_print(&mut b, k_print, |b| {
        b.emit2(OpCode::PushVar, GLOBAL, 1);
        b.emit1(OpCode::GetPropAtom, k_name as i32);
    });
    let after = b.here();
    b.patch_target(jmp_over, after);
    b.emit(OpCode::Halt);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        local_var_count: 2,
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: end,
        catch_table: vec![CatchEntry {
            start_pc: try_start,
            end_pc: try_end,
            handler_pc: handler,
            locals_begin: 1,
            locals_end: 2,
        }],
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["ReferenceError"]);
}

// try/finally through the internal sub-procedure call.
#[test]
fn finally_runs_through_proc_call() {
    let mut b = ProgramBuilder::new();
    let k_print = b.atom("print");
    let k_done_text = b.atom("finally");
    let m_global = b.add_meta(FunctionMeta::default());

    let g_start = b.here();
    let proc_call = b.emit1(OpCode::ProcCall, 0);
    b.emit(OpCode::Halt);
    let finally_block = b.here();
    b.patch_target(proc_call, finally_block);
    emit_print(&mut b, k_print, |b| {
        b.emit1(OpCode::PushStr, k_done_text as i32);
    });
    b.emit(OpCode::ProcRet);
    let end = b.here();

    b.metas[m_global as usize] = FunctionMeta {
        stack_size: 8,
        bytecode_start: g_start,
        bytecode_end: end,
        ..FunctionMeta::default()
    };

    assert_eq!(run(b.finish(m_global)), ["finally"]);
}
