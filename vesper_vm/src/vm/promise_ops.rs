// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Promise machinery shared between the interpreter, the async-function
//! driver and the `Promise` builtins: settling, `then` registration, the
//! microtask job that resolves chaining, and the paired resolve/reject
//! natives that carry their promise in the function's auxiliary slot.

use crate::atom;
use crate::conversion::to_boolean;
use crate::error::ErrorKind;
use crate::event_loop::Task;
use crate::object::{ClassTag, JsObject, ObjectExtra, PromiseState, ThenRecord};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

impl Vm {
    pub(crate) fn new_pending_promise(&mut self) -> Value {
        let proto = self.protos.promise;
        let promise = self.heap.new_object_payload(JsObject::with_extra(
            ClassTag::Promise,
            proto,
            ObjectExtra::Promise(Box::default()),
        ));
        Value::Object(promise)
    }

    /// The `resolve`/`reject` pair for `promise`, as the shared settle
    /// native parameterized by magic and the auxiliary slot.
    pub(crate) fn build_settle_pair(&mut self, promise: Value) -> (Value, Value) {
        self.heap.push_temp_root(promise);
        let aux = self.heap.temp_root(0);
        let resolve =
            self.new_function_with_aux(self.natives.promise_resolve_meta, aux);
        self.heap.push_temp_root(resolve);
        let aux = self.heap.temp_root(1);
        let reject =
            self.new_function_with_aux(self.natives.promise_reject_meta, aux);
        let resolve = self.heap.temp_root(0);
        self.heap.pop_temp_roots(2);
        (resolve, reject)
    }

    /// Settle a promise. Monotonic: a settled promise ignores later
    /// attempts. Draining the then-records enqueues one microtask each.
    pub(crate) fn promise_settle(
        &mut self,
        promise: Value,
        state: PromiseState,
        value: Value,
    ) {
        debug_assert!(state != PromiseState::Pending);
        let Some(obj) = promise.as_object() else {
            return;
        };
        self.heap.write_barrier(obj, value);
        let (records, unhandled) = {
            let Some(data) = obj.as_mut().as_promise_mut() else {
                return;
            };
            if data.state != PromiseState::Pending {
                return;
            }
            data.state = state;
            data.result = value;
            let unhandled =
                state == PromiseState::Rejected && !data.handled;
            (data.drain_records(), unhandled)
        };
        let is_reject = state == PromiseState::Rejected;
        for record in records {
            let callback = if is_reject {
                record.on_rejected
            } else {
                record.on_fulfilled
            };
            self.enqueue_then_job(
                is_reject,
                callback,
                record.next_resolve,
                record.next_reject,
                value,
            );
        }
        if unhandled {
            eprintln!("vesper: unhandled promise rejection");
        }
    }

    /// `then` registration: build the derived promise, record the handlers
    /// on a pending promise, or enqueue the job right away on a settled
    /// one.
    pub(crate) fn promise_then_internal(
        &mut self,
        promise: Value,
        on_fulfilled: Value,
        on_rejected: Value,
    ) -> Value {
        self.heap.push_temp_root(promise);
        self.heap.push_temp_root(on_fulfilled);
        self.heap.push_temp_root(on_rejected);
        let next = self.new_pending_promise();
        self.heap.push_temp_root(next);
        let (next_resolve, next_reject) = {
            let next = self.heap.temp_root(0);
            self.build_settle_pair(next)
        };
        let next = self.heap.temp_root(0);
        let on_rejected = self.heap.temp_root(1);
        let on_fulfilled = self.heap.temp_root(2);
        let promise = self.heap.temp_root(3);
        self.heap.pop_temp_roots(4);

        let obj = promise.as_object().expect("then on a non-promise");
        let pending = obj
            .as_ref()
            .as_promise()
            .is_some_and(|data| data.is_pending());
        if pending {
            self.heap.write_barrier(obj, on_fulfilled);
            self.heap.write_barrier(obj, on_rejected);
            self.heap.write_barrier(obj, next_resolve);
            self.heap.write_barrier(obj, next_reject);
            obj.as_mut().as_promise_mut().unwrap().put_record(ThenRecord {
                on_fulfilled,
                on_rejected,
                next_resolve,
                next_reject,
            });
        } else {
            let (state, result) = {
                let data = obj.as_mut().as_promise_mut().unwrap();
                data.handled = true;
                (data.state, data.result)
            };
            let is_reject = state == PromiseState::Rejected;
            let callback = if is_reject { on_rejected } else { on_fulfilled };
            self.enqueue_then_job(
                is_reject,
                callback,
                next_resolve,
                next_reject,
                result,
            );
        }
        next
    }

    /// A promise already fulfilled with `value`, or `value` itself when it
    /// is a promise.
    pub(crate) fn promise_resolve_value(&mut self, value: Value) -> Value {
        if value.class() == Some(ClassTag::Promise) {
            return value;
        }
        self.heap.push_temp_root(value);
        let promise = self.new_pending_promise();
        let value = self.heap.temp_root(0);
        self.heap.pop_temp_roots(1);
        self.promise_settle(promise, PromiseState::Fulfilled, value);
        promise
    }

    /// One microtask per then-record; the body is
    /// [`promise_then_task_native`].
    fn enqueue_then_job(
        &mut self,
        is_reject: bool,
        callback: Value,
        next_resolve: Value,
        next_reject: Value,
        result: Value,
    ) {
        self.micro_tasks.push_back(Task {
            id: 0,
            callable: Value::Undefined,
            native: Some(promise_then_task_native),
            args: vec![
                Value::Bool(is_reject),
                callback,
                next_resolve,
                next_reject,
                result,
            ],
            pending_text: None,
            timeout: 0,
            repeat: false,
            canceled: false,
        });
    }

    fn aux_of(&self, func: Value) -> Value {
        func.as_object()
            .and_then(|o| o.as_ref().as_function())
            .map_or(Value::Undefined, |f| f.this_or_aux)
    }
}

/// The shared resolve/reject native. `magic` 0 fulfills, 1 rejects; the
/// targeted promise rides in the auxiliary slot.
pub(crate) fn promise_settle_native(
    vm: &mut Vm,
    func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let (promise, magic) = {
        let obj = func.as_object().expect("settle native without a function");
        let data = obj.as_ref().as_function().expect("settle native data");
        (data.this_or_aux, vm.metas[data.meta_idx as usize].magic)
    };
    let arg = args.first().copied().unwrap_or(Value::Undefined);
    if magic == 0 && arg.same_reference(&promise) {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Promise self resolution detected",
        ));
    }
    let state = if magic == 0 {
        PromiseState::Fulfilled
    } else {
        PromiseState::Rejected
    };
    vm.promise_settle(promise, state, arg);
    Completion::Normal(Value::Undefined)
}

/// Microtask body resolving `then` chaining.
///
/// Arguments: `[is_reject, callback, next_resolve, next_reject, result]`.
/// The argument span is rooted by the running task and rewritten in place
/// by the collector, so every use after a call re-reads it.
pub(crate) fn promise_then_task_native(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    debug_assert_eq!(args.len(), 5);
    let is_reject = to_boolean(args[0]);
    let callback = args[1];

    if !callback.is_function() {
        let target = if is_reject { args[3] } else { args[2] };
        let result = args[4];
        return vm.call_with_vec_args(
            target,
            Value::Undefined,
            Value::Undefined,
            vec![result],
            CallFlags::default(),
        );
    }

    let completion = vm.call_with_vec_args(
        callback,
        Value::Undefined,
        Value::Undefined,
        vec![args[4]],
        CallFlags::default(),
    );
    match completion {
        Completion::Normal(ret) => {
            vm.heap.push_temp_root(ret);
            let maybe_then = if ret.is_object() {
                let ret = vm.heap.temp_root(0);
                vm.get_prop_atom_value(ret, atom::K_THEN)
            } else {
                Ok(Value::Undefined)
            };
            let outcome = match maybe_then {
                Err(err) => {
                    let next_reject = args[3];
                    vm.call_with_vec_args(
                        next_reject,
                        Value::Undefined,
                        Value::Undefined,
                        vec![err.value()],
                        CallFlags::default(),
                    )
                }
                Ok(then) if then.is_function() => {
                    let ret = vm.heap.temp_root(0);
                    let next_promise = vm.aux_of(args[2]);
                    if ret.same_reference(&next_promise) {
                        let err = vm.build_error_value(
                            ErrorKind::TypeError,
                            "Chaining cycle detected for promise #<Promise>",
                        );
                        let next_reject = args[3];
                        vm.call_with_vec_args(
                            next_reject,
                            Value::Undefined,
                            Value::Undefined,
                            vec![err],
                            CallFlags::default(),
                        )
                    } else {
                        // Adopt the thenable: its settling drives the next
                        // promise through our resolve/reject pair.
                        let ret = vm.heap.temp_root(0);
                        vm.call_with_vec_args(
                            then,
                            ret,
                            Value::Undefined,
                            vec![args[2], args[3]],
                            CallFlags::default(),
                        )
                    }
                }
                Ok(_) => {
                    let ret = vm.heap.temp_root(0);
                    let next_resolve = args[2];
                    vm.call_with_vec_args(
                        next_resolve,
                        Value::Undefined,
                        Value::Undefined,
                        vec![ret],
                        CallFlags::default(),
                    )
                }
            };
            vm.heap.pop_temp_roots(1);
            if outcome.is_throw() {
                return outcome;
            }
        }
        Completion::Throw(err) => {
            let next_reject = args[3];
            let outcome = vm.call_with_vec_args(
                next_reject,
                Value::Undefined,
                Value::Undefined,
                vec![err],
                CallFlags::default(),
            );
            if outcome.is_throw() {
                return outcome;
            }
        }
        suspension => return suspension,
    }
    Completion::Normal(Value::Undefined)
}

/// The await continuation pair. `magic` 0 resumes normally with the
/// resolved value, 1 re-enters through the throw path with the rejection.
pub(crate) fn async_on_settled_native(
    vm: &mut Vm,
    func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let (promise, magic) = {
        let obj = func.as_object().expect("async continuation without data");
        let data = obj.as_ref().as_function().expect("async continuation data");
        (data.this_or_aux, vm.metas[data.meta_idx as usize].magic)
    };
    let value = args.first().copied().unwrap_or(Value::Undefined);
    let has_state = promise
        .as_object()
        .and_then(|o| o.as_mut().as_promise_mut().map(|p| p.resume.is_some()))
        .unwrap_or(false);
    if !has_state {
        return Completion::Normal(Value::Undefined);
    }
    {
        let state = vm.state_of(promise);
        state.put_sent_value(value);
        state.resume_with_throw = magic == 1;
    }
    vm.async_resume(promise);
    Completion::Normal(Value::Undefined)
}
