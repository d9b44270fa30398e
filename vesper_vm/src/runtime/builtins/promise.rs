// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Promise` constructor (executor protocol), its statics, and
//! `Promise.prototype.then/catch/finally`. The state machine itself lives
//! in the VM's promise machinery.

use crate::error::ErrorKind;
use crate::object::{ClassTag, PromiseState};
use crate::runtime::{add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.natives.promise_all_step_meta =
        vm.register_native_meta("", 1, promise_all_step_native, 0);
    vm.natives.promise_all_reject_meta =
        vm.register_native_meta("", 1, promise_all_reject_native, 0);

    let proto = vm.protos.promise;
    add_method(vm, proto, "then", 2, promise_then);
    let proto = vm.protos.promise;
    add_method(vm, proto, "catch", 1, promise_catch);
    let proto = vm.protos.promise;
    add_method(vm, proto, "finally", 1, promise_finally);

    let proto = vm.protos.promise;
    let ctor =
        crate::runtime::add_constructor(vm, "Promise", 1, constructor, 0, proto);
    add_method(vm, ctor, "resolve", 1, promise_resolve);
    add_method(vm, ctor, "reject", 1, promise_reject);
    add_method(vm, ctor, "all", 1, promise_all);
}

/// `new Promise(executor)`: run the executor with the settle pair; a throw
/// before settling rejects.
fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let executor = arg(args, 0);
    if !executor.is_function() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Promise resolver is not a function",
        ));
    }
    let promise = vm.new_pending_promise();
    vm.heap.push_temp_root(promise);
    let (resolve, reject) = {
        let promise = vm.heap.temp_root(0);
        vm.build_settle_pair(promise)
    };
    let executor = arg(args, 0);
    let completion = vm.call_with_vec_args(
        executor,
        Value::Undefined,
        Value::Undefined,
        vec![resolve, reject],
        CallFlags::default(),
    );
    let promise = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    if let Completion::Throw(err) = completion {
        vm.promise_settle(promise, PromiseState::Rejected, err);
    }
    Completion::Normal(promise)
}

fn promise_then(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if this.class() != Some(ClassTag::Promise) {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Receiver is not a promise",
        ));
    }
    let next =
        vm.promise_then_internal(this, arg(args, 0), arg(args, 1));
    Completion::Normal(next)
}

fn promise_catch(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if this.class() != Some(ClassTag::Promise) {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Receiver is not a promise",
        ));
    }
    let next =
        vm.promise_then_internal(this, Value::Undefined, arg(args, 0));
    Completion::Normal(next)
}

/// `finally(cb)`: the callback observes nothing and alters nothing; the
/// settled value passes through.
fn promise_finally(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if this.class() != Some(ClassTag::Promise) {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Receiver is not a promise",
        ));
    }
    let callback = arg(args, 0);
    let next = vm.promise_then_internal(this, callback, callback);
    Completion::Normal(next)
}

fn promise_resolve(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(vm.promise_resolve_value(arg(args, 0)))
}

fn promise_reject(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let promise = vm.new_pending_promise();
    let reason = arg(args, 0);
    vm.promise_settle(promise, PromiseState::Rejected, reason);
    Completion::Normal(promise)
}

/// `Promise.all(array)`: resolve with the array of results once every
/// input promise fulfills; reject on the first rejection.
fn promise_all(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let Some(input) = arg(args, 0)
        .as_object()
        .filter(|obj| obj.as_ref().class() == ClassTag::Array)
    else {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Promise.all expects an array",
        ));
    };
    let count = input.as_ref().as_array().unwrap().len();

    let result_promise = vm.new_pending_promise();
    vm.heap.push_temp_root(result_promise);
    let results = vm.new_array_from(&vec![Value::Undefined; count as usize]);
    vm.heap.push_temp_root(Value::Object(results));
    // Roots: [result_promise, results].

    if count == 0 {
        let results = vm.heap.temp_root(0);
        let result_promise = vm.heap.temp_root(1);
        vm.heap.pop_temp_roots(2);
        vm.promise_settle(result_promise, PromiseState::Fulfilled, results);
        return Completion::Normal(result_promise);
    }

    // A shared countdown cell: [remaining]. Stored on each continuation
    // through a bound argument trio (results, countdown, index).
    let countdown = vm.heap.new_cell(Value::U32(count));
    vm.heap.push_temp_root(Value::HeapCell(countdown));
    // Roots: [result_promise, results, countdown].

    for index in 0..count {
        let element = {
            let input = arg(args, 0).as_object().unwrap();
            input.as_ref().as_array().unwrap().get(index)
        };
        let element_promise = vm.promise_resolve_value(element);
        vm.heap.push_temp_root(element_promise);
        // Continuation: settle one slot, then count down.
        let on_fulfilled = {
            let aux_args = vec![
                vm.heap.temp_root(2),          // results array
                vm.heap.temp_root(1),          // countdown cell
                Value::U32(index),
                vm.heap.temp_root(3),          // result promise
            ];
            let pack = vm.new_array_from(&aux_args);
            vm.new_function_with_aux(
                vm.natives_all_step_meta(),
                Value::Object(pack),
            )
        };
        vm.heap.push_temp_root(on_fulfilled);
        let on_rejected = {
            let result_promise = vm.heap.temp_root(4);
            vm.new_function_with_aux(
                vm.natives_all_reject_meta(),
                result_promise,
            )
        };
        let on_fulfilled = vm.heap.temp_root(0);
        let element_promise = vm.heap.temp_root(1);
        vm.heap.pop_temp_roots(2);
        vm.promise_then_internal(element_promise, on_fulfilled, on_rejected);
    }

    let result_promise = vm.heap.temp_root(2);
    vm.heap.pop_temp_roots(3);
    Completion::Normal(result_promise)
}

/// One fulfilled input of `Promise.all`: record the value, and fulfill the
/// joint promise when the countdown reaches zero.
pub(crate) fn promise_all_step_native(
    vm: &mut Vm,
    func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let pack = {
        let obj = func.as_object().unwrap();
        obj.as_ref().as_function().unwrap().this_or_aux
    };
    let Some(pack_obj) = pack.as_object() else {
        return Completion::Normal(Value::Undefined);
    };
    let (results, countdown, index, joint) = {
        let array = pack_obj.as_ref().as_array().unwrap();
        (array.get(0), array.get(1), array.get(2), array.get(3))
    };
    let value = args.first().copied().unwrap_or(Value::Undefined);
    if let (Some(results_obj), Value::U32(index)) =
        (results.as_object(), index)
    {
        vm.heap.write_barrier(results_obj, value);
        results_obj.as_mut().as_array_mut().unwrap().set(index, value);
    }
    if let Value::HeapCell(cell) = countdown {
        let remaining = match cell.as_ref().value {
            Value::U32(n) => n.saturating_sub(1),
            _ => 0,
        };
        cell.as_mut().value = Value::U32(remaining);
        if remaining == 0 {
            vm.promise_settle(joint, PromiseState::Fulfilled, results);
        }
    }
    Completion::Normal(Value::Undefined)
}

/// First rejected input of `Promise.all` rejects the joint promise.
pub(crate) fn promise_all_reject_native(
    vm: &mut Vm,
    func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let joint = {
        let obj = func.as_object().unwrap();
        obj.as_ref().as_function().unwrap().this_or_aux
    };
    let reason = args.first().copied().unwrap_or(Value::Undefined);
    vm.promise_settle(joint, PromiseState::Rejected, reason);
    Completion::Normal(Value::Undefined)
}
