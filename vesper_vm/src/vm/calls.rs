// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Call plumbing: `call_internal`, bound-function chains, constructor
//! calls, closure creation, and the async/generator drivers that check a
//! suspended frame out of and back into its resumable state.

use crate::atom;
use crate::bytecode::{CaptureSpec, ScopeKind};
use crate::conversion::to_display_string;
use crate::error::{ErrorKind, JsResult};
use crate::heap::GcRef;
use crate::object::{
    ClassTag, GeneratorData, JsObject, ObjectExtra, PromiseState,
};
use crate::value::Value;
use crate::vm::frame::{ResumableState, StackFrame};
use crate::vm::{CallFlags, Completion, Vm};

impl Vm {
    /// Public call entry: ordinary call semantics, no new target.
    pub fn call_function(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Completion {
        self.call_internal(
            callee,
            this,
            Value::Undefined,
            args,
            CallFlags::default(),
            None,
        )
    }

    pub(crate) fn call_checked(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> JsResult<Value> {
        self.call_function(callee, this, args).into_result()
    }

    /// Call with an argument vector the VM keeps rooted for the duration.
    pub(crate) fn call_with_vec_args(
        &mut self,
        callee: Value,
        this: Value,
        new_target: Value,
        args: Vec<Value>,
        flags: CallFlags,
    ) -> Completion {
        self.native_arg_stack.push(args);
        let (ptr, len) = {
            let parked = self.native_arg_stack.last().unwrap();
            (parked.as_ptr(), parked.len())
        };
        // The slice aliases the parked vector, which only the collector
        // rewrites while the call runs.
        let args = unsafe { std::slice::from_raw_parts(ptr, len) };
        let completion =
            self.call_internal(callee, this, new_target, args, flags, None);
        self.native_arg_stack.pop();
        completion
    }

    /// The call core. With `state_owner` set, the callee's suspended frame
    /// is checked out of the owning generator/promise and resumed instead
    /// of building a fresh frame.
    pub(crate) fn call_internal(
        &mut self,
        callee: Value,
        this: Value,
        new_target: Value,
        args: &[Value],
        flags: CallFlags,
        state_owner: Option<Value>,
    ) -> Completion {
        let Some(callee_obj) = callee.as_object() else {
            return self.not_callable_throw(callee);
        };
        let class = callee_obj.as_ref().class();
        if !class.is_callable() {
            return self.not_callable_throw(callee);
        }
        if class == ClassTag::BoundFunction {
            return self.bound_call(callee_obj, this, new_target, args, flags);
        }
        if state_owner.is_none() {
            match class {
                ClassTag::AsyncFunction => {
                    return self.async_initial_call(callee, this, args);
                }
                ClassTag::GeneratorFunction if !flags.generator => {
                    return self.generator_initial_call(callee, this, args);
                }
                _ => {}
            }
        }

        let meta = self.meta_of(callee_obj).expect("callable without metadata");
        let is_native = meta.is_native;
        let native = meta.native;
        let is_arrow = meta.is_arrow;
        let param_count = meta.param_count as usize;
        let local_count = meta.local_var_count as usize;
        let stack_size = meta.stack_size as usize;
        let entry_pc = meta.bytecode_start;
        let prepare_arguments = meta.prepare_arguments_array;

        if is_native {
            let native = native.expect("native metadata without entry point");
            let mut flags = flags;
            let has_new_target = new_target.is_object();
            flags.this_is_new_target = has_new_target;
            let this_arg = if has_new_target { new_target } else { this };
            self.frames
                .push(Box::new(StackFrame::new_native(callee, this_arg)));
            let completion = native(self, callee, this_arg, args, flags);
            self.frames.pop();
            return completion;
        }

        let frame = match state_owner {
            None => {
                // Arrow functions run with their captured `this`; sloppy
                // calls of ordinary functions with no receiver get the
                // global object.
                let this_val = if is_arrow {
                    callee_obj
                        .as_ref()
                        .as_function()
                        .map_or(Value::Undefined, |f| f.this_or_aux)
                } else if this.is_nil() && !flags.constructor {
                    self.global_object
                } else {
                    this
                };
                StackFrame::new_call(
                    callee,
                    this_val,
                    args,
                    param_count,
                    local_count,
                    stack_size,
                    entry_pc,
                )
            }
            Some(owner) => {
                let state = self.state_of(owner);
                state.active = true;
                StackFrame {
                    function: state.callee,
                    this_val: state.this,
                    buffer: std::mem::take(&mut state.buffer),
                    args_len: state.args_len,
                    locals_start: state.locals_start,
                    stack_start: state.stack_start,
                    sp: state.sp,
                    pc: state.pc,
                    is_native: false,
                    state_owner: Some(owner),
                }
            }
        };

        self.frames.push(Box::new(frame));
        let frame_ptr: *mut StackFrame =
            &mut **self.frames.last_mut().unwrap();

        let mut pending_throw = None;
        if let Some(owner) = state_owner {
            let state = self.state_of(owner);
            if state.resume_with_throw {
                state.resume_with_throw = false;
                pending_throw =
                    Some(unsafe { (*frame_ptr).pop() });
            }
        } else if prepare_arguments && local_count > 0 {
            // `arguments` lives in the first local slot.
            let frame = unsafe { &mut *frame_ptr };
            let arg_values: Vec<Value> =
                frame.buffer[..frame.args_len].to_vec();
            let array = self.new_array_from(&arg_values);
            let frame = unsafe { &mut *frame_ptr };
            let at = frame.locals_start;
            frame.buffer[at] = Value::Object(array);
        }

        let completion = self.exec_bytecode(frame_ptr, pending_throw);

        let mut frame = self.frames.pop().expect("frame stack imbalance");
        match completion {
            Completion::Await(_) | Completion::Yield(_) => {
                let owner =
                    frame.state_owner.expect("suspension outside a resumable");
                let state = self.state_of(owner);
                state.buffer = std::mem::take(&mut frame.buffer);
                state.sp = frame.sp;
                state.pc = frame.pc;
                state.active = false;
            }
            _ => {
                // The first completed top-level call is the global script;
                // its locals must outlive the call for later tasks.
                if self.frames.is_empty() && self.global_frame.is_none() {
                    self.global_frame = Some(frame);
                }
            }
        }
        completion
    }

    fn not_callable_throw(&mut self, callee: Value) -> Completion {
        let shown = to_display_string(self, callee)
            .unwrap_or_else(|_| "value".to_string());
        Completion::Throw(
            self.build_error_value(
                ErrorKind::TypeError,
                &format!("{shown} is not a function"),
            ),
        )
    }

    /// Invocation through a bound function: walk the chain, concatenate
    /// prepended arguments outermost-first, and delegate to the innermost
    /// callee with the outermost bound `this` (or the fresh receiver on
    /// construct calls).
    fn bound_call(
        &mut self,
        bound: GcRef<JsObject>,
        this: Value,
        new_target: Value,
        args: &[Value],
        flags: CallFlags,
    ) -> Completion {
        let mut all_args: Vec<Value> = Vec::new();
        let mut effective_this = this;
        let mut picked_this = flags.constructor;
        let mut target = Value::Object(bound);
        while let Some(obj) = target.as_object() {
            let Some(bound_data) = obj.as_ref().as_bound() else {
                break;
            };
            if !picked_this {
                effective_this = bound_data.bound_this;
                picked_this = true;
            }
            all_args.extend_from_slice(&bound_data.bound_args);
            target = bound_data.target;
        }
        all_args.extend_from_slice(args);
        self.call_with_vec_args(target, effective_this, new_target, all_args, flags)
    }

    /// `js_new`: allocate the receiver from the callee's `prototype`, run
    /// the body as a constructor, and keep the receiver unless the body
    /// returned an object.
    pub(crate) fn construct(
        &mut self,
        callee: Value,
        args: &[Value],
    ) -> JsResult<Value> {
        self.heap.push_temp_root(callee);
        let proto = self.get_prop_atom_value(callee, atom::K_PROTOTYPE)?;
        let proto = if proto.is_object() { proto } else { self.protos.object };
        self.heap.push_temp_root(proto);
        let receiver = {
            let proto = self.heap.temp_root(0);
            self.heap
                .new_object_payload(JsObject::new(ClassTag::Object, proto))
        };
        self.heap.pop_temp_roots(1);
        self.heap.push_temp_root(Value::Object(receiver));
        let callee = self.heap.temp_root(1);
        let completion = self.call_internal(
            callee,
            Value::Object(receiver),
            callee,
            args,
            CallFlags { constructor: true, ..CallFlags::default() },
            None,
        );
        let receiver = self.heap.temp_root(0);
        self.heap.pop_temp_roots(2);
        match completion {
            Completion::Normal(result) if result.is_object() => Ok(result),
            Completion::Normal(_) => Ok(receiver),
            other => other.into_result(),
        }
    }

    // -----------------------------------------------------------------
    // Closure creation
    // -----------------------------------------------------------------

    /// `make_func`: instantiate a function and populate its capture cells.
    /// Captured locals and arguments are promoted to shared heap cells in
    /// place; captures of the enclosing function's captures copy the cell.
    pub(crate) fn exec_make_func(
        &mut self,
        frame_ptr: *mut StackFrame,
        meta_idx: u32,
    ) -> Value {
        let meta = &self.metas[meta_idx as usize];
        let captures: Vec<CaptureSpec> = meta.captures.clone();
        let is_arrow = meta.is_arrow;

        let func = self.new_function_object(meta_idx);
        if is_arrow {
            let this_val = unsafe { (*frame_ptr).this_val };
            let data = func.as_mut().as_function_mut().unwrap();
            data.this_or_aux = this_val;
            self.heap.write_barrier(func, this_val);
        }
        if captures.is_empty() {
            return Value::Object(func);
        }

        self.heap.push_temp_root(Value::Object(func));
        let cells = self.heap.new_value_array(captures.len());
        let func = self.heap.temp_root(0).as_object().unwrap();
        {
            let value = Value::HeapArray(cells);
            func.as_mut().as_function_mut().unwrap().captures = value;
            self.heap.write_barrier(func, value);
        }

        for (i, spec) in captures.iter().enumerate() {
            let cell_value = match spec.kind {
                ScopeKind::Local | ScopeKind::Arg => {
                    let slot_ptr = unsafe {
                        let frame = &mut *frame_ptr;
                        let base = match spec.kind {
                            ScopeKind::Local => frame.locals_start,
                            _ => 0,
                        };
                        frame
                            .buffer
                            .as_mut_ptr()
                            .add(base + spec.index as usize)
                    };
                    let current = unsafe { *slot_ptr };
                    match current {
                        Value::HeapCell(cell) => Value::HeapCell(cell),
                        plain => {
                            // First capture: box the slot.
                            let cell = self.heap.new_cell(plain);
                            unsafe { *slot_ptr = Value::HeapCell(cell) };
                            Value::HeapCell(cell)
                        }
                    }
                }
                ScopeKind::Closure => {
                    let frame_func = unsafe { (*frame_ptr).function };
                    let enclosing = frame_func
                        .as_object()
                        .and_then(|o| o.as_ref().as_function().map(|f| f.captures))
                        .unwrap_or(Value::Undefined);
                    match enclosing {
                        Value::HeapArray(arr) => {
                            arr.as_ref().values[spec.index as usize]
                        }
                        _ => Value::Undefined,
                    }
                }
                ScopeKind::Global => Value::Undefined,
            };
            // Re-read through the root: the cell allocation may have moved
            // both the function and its capture array.
            let func = self.heap.temp_root(0).as_object().unwrap();
            let Value::HeapArray(cells) =
                func.as_ref().as_function().unwrap().captures
            else {
                unreachable!("capture array vanished");
            };
            cells.as_mut().values[i] = cell_value;
            self.heap.write_barrier(cells, cell_value);
        }

        let func = self.heap.temp_root(0);
        self.heap.pop_temp_roots(1);
        func
    }

    // -----------------------------------------------------------------
    // Async functions
    // -----------------------------------------------------------------

    /// Calling an async function: build the fronting promise with a
    /// suspended initial state, then drive the first resume.
    fn async_initial_call(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Completion {
        self.heap.push_temp_root(callee);
        self.heap.push_temp_root(this);
        let promise = self.new_pending_promise();
        self.heap.push_temp_root(promise);
        let this = self.heap.temp_root(1);
        let callee = self.heap.temp_root(2);
        let promise = self.heap.temp_root(0);
        self.install_initial_state(promise, callee, this, args);
        let promise = self.heap.temp_root(0);
        self.async_resume(promise);
        let promise = self.heap.temp_root(0);
        self.heap.pop_temp_roots(3);
        Completion::Normal(promise)
    }

    /// Drive one resume step of an async function's body.
    pub(crate) fn async_resume(&mut self, promise: Value) {
        self.heap.push_temp_root(promise);
        let completion = self.resume_state_call(promise);
        let promise = self.heap.temp_root(0);
        match completion {
            Completion::Await(awaited) => {
                // Wrap the awaited value and re-enter on settle.
                self.heap.push_temp_root(awaited);
                let inner = self.promise_resolve_value(awaited);
                self.heap.pop_temp_roots(1);
                self.heap.push_temp_root(inner);
                let promise = self.heap.temp_root(1);
                let on_fulfilled = self.new_function_with_aux(
                    self.natives.async_on_fulfilled_meta,
                    promise,
                );
                self.heap.push_temp_root(on_fulfilled);
                let promise = self.heap.temp_root(2);
                let on_rejected = self.new_function_with_aux(
                    self.natives.async_on_rejected_meta,
                    promise,
                );
                let on_fulfilled = self.heap.temp_root(0);
                let inner = self.heap.temp_root(1);
                self.heap.pop_temp_roots(2);
                self.promise_then_internal(inner, on_fulfilled, on_rejected);
            }
            Completion::Normal(value) => {
                self.dispose_promise_state(promise);
                self.promise_settle(promise, PromiseState::Fulfilled, value);
            }
            Completion::Throw(err) => {
                self.dispose_promise_state(promise);
                self.promise_settle(promise, PromiseState::Rejected, err);
            }
            Completion::Yield(_) => {
                unreachable!("yield inside an async function body")
            }
        }
        self.heap.pop_temp_roots(1);
    }

    fn dispose_promise_state(&mut self, promise: Value) {
        if let Some(obj) = promise.as_object() {
            if let Some(data) = obj.as_mut().as_promise_mut() {
                data.resume = None;
            }
        }
    }

    // -----------------------------------------------------------------
    // Generators
    // -----------------------------------------------------------------

    /// Calling a generator function builds the generator object without
    /// running any of the body.
    fn generator_initial_call(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Completion {
        self.heap.push_temp_root(callee);
        self.heap.push_temp_root(this);
        let proto = self.protos.generator;
        let generator = self.heap.new_object_payload(JsObject::with_extra(
            ClassTag::Generator,
            proto,
            ObjectExtra::Generator(Box::new(GeneratorData::default())),
        ));
        let generator = Value::Object(generator);
        self.heap.push_temp_root(generator);
        let this = self.heap.temp_root(1);
        let callee = self.heap.temp_root(2);
        self.install_initial_state(generator, callee, this, args);
        let generator = self.heap.temp_root(0);
        self.heap.pop_temp_roots(3);
        Completion::Normal(generator)
    }

    /// `next`/`return`/`throw` driver. Writes the sent value into the slot
    /// `yield` left on the saved stack and re-enters the body.
    pub(crate) fn generator_resume(
        &mut self,
        generator: Value,
        sent: Value,
        with_throw: bool,
    ) -> Completion {
        let Some(gen_obj) = generator.as_object() else {
            return Completion::Throw(
                self.build_error_value(
                    ErrorKind::TypeError,
                    "Generator.prototype.next called on a non-generator",
                ),
            );
        };
        let done = {
            let Some(data) = gen_obj.as_mut().as_generator_mut() else {
                return Completion::Throw(self.build_error_value(
                    ErrorKind::TypeError,
                    "Generator.prototype.next called on a non-generator",
                ));
            };
            if data.state.as_ref().is_some_and(|state| state.active) {
                return Completion::Throw(self.build_error_value(
                    ErrorKind::TypeError,
                    "Generator is already running",
                ));
            }
            if !data.done {
                if let Some(state) = data.state.as_mut() {
                    state.put_sent_value(sent);
                    state.resume_with_throw = with_throw;
                }
            }
            data.done
        };
        if done {
            if with_throw {
                return Completion::Throw(sent);
            }
            let result = self.make_iter_result(Value::Undefined, true);
            return Completion::Normal(result);
        }

        self.heap.push_temp_root(generator);
        let completion = self.resume_state_call(generator);
        let generator = self.heap.temp_root(0);
        self.heap.pop_temp_roots(1);
        match completion {
            Completion::Yield(value) => {
                Completion::Normal(self.make_iter_result(value, false))
            }
            Completion::Normal(value) => {
                if let Some(data) = generator
                    .as_object()
                    .and_then(|o| o.as_mut().as_generator_mut())
                {
                    data.dispose_state();
                }
                Completion::Normal(self.make_iter_result(value, true))
            }
            Completion::Throw(err) => {
                if let Some(data) = generator
                    .as_object()
                    .and_then(|o| o.as_mut().as_generator_mut())
                {
                    data.dispose_state();
                }
                Completion::Throw(err)
            }
            Completion::Await(_) => {
                unreachable!("await inside a generator body")
            }
        }
    }

    // -----------------------------------------------------------------
    // Resumable-state helpers
    // -----------------------------------------------------------------

    /// Build the initial suspended frame for an async function or
    /// generator and attach it to `owner`.
    fn install_initial_state(
        &mut self,
        owner: Value,
        callee: Value,
        this: Value,
        args: &[Value],
    ) {
        let callee_obj = callee.as_object().unwrap();
        let meta = self.meta_of(callee_obj).unwrap();
        let param_count = meta.param_count as usize;
        let local_count = meta.local_var_count as usize;
        let stack_size = meta.stack_size as usize;
        let entry_pc = meta.bytecode_start;

        let this = if this.is_nil() { self.global_object } else { this };
        let args_len = args.len().max(param_count);
        let mut buffer =
            vec![Value::Undefined; args_len + local_count + stack_size];
        buffer[..args.len()].copy_from_slice(args);
        let state = ResumableState {
            callee,
            this,
            buffer,
            args_len,
            locals_start: args_len,
            stack_start: args_len + local_count,
            sp: 0,
            pc: entry_pc,
            active: false,
            resume_with_throw: false,
        };
        let owner_obj = owner.as_object().unwrap();
        self.heap.write_barrier(owner_obj, callee);
        self.heap.write_barrier(owner_obj, this);
        for arg in args {
            self.heap.write_barrier(owner_obj, *arg);
        }
        match &mut owner_obj.as_mut().extra {
            ObjectExtra::Generator(data) => data.state = Some(Box::new(state)),
            ObjectExtra::Promise(data) => data.resume = Some(Box::new(state)),
            _ => unreachable!("initial state on a non-resumable object"),
        }
    }

    fn resume_state_call(&mut self, owner: Value) -> Completion {
        let callee = self.state_of(owner).callee;
        self.call_internal(
            callee,
            Value::Undefined,
            Value::Undefined,
            &[],
            CallFlags { generator: true, ..CallFlags::default() },
            Some(owner),
        )
    }

    pub(crate) fn state_of(&mut self, owner: Value) -> &mut ResumableState {
        let obj = owner.as_object().expect("resumable owner is not an object");
        match &mut obj.as_mut().extra {
            ObjectExtra::Generator(data) => {
                data.state.as_mut().expect("generator state already disposed")
            }
            ObjectExtra::Promise(data) => {
                data.resume.as_mut().expect("promise has no resumable state")
            }
            _ => unreachable!("resumable owner of the wrong class"),
        }
    }
}
