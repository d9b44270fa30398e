// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bytecode dispatch loop and the opcode bodies.
//!
//! Dispatch is a `match` over the opcode (the portable stand-in for a
//! computed-goto table). Every potentially-throwing step funnels through
//! `handle_throw`, which consults the current function's catch table,
//! resets the operand stack to hold just the error, zeroes the protected
//! locals and jumps to the handler; an uncovered throw propagates to the
//! caller as a `Throw` completion.
//!
//! GC discipline inside opcodes: operands stay in their stack slots while
//! any allocating or calling step runs, and intermediate values are written
//! back into the slots they came from. Rust locals only ever hold values
//! across steps that cannot collect.

use crate::atom;
use crate::bytecode::{OpCode, ScopeKind};
use crate::conversion::{
    abstract_equals, abstract_less_than, f64_to_int32, f64_to_uint32,
    strict_equals, to_boolean, to_number, typeof_atom,
};
use crate::error::{ErrorKind, JsError, JsResult};
use crate::object::regexp::{ReBytecode, RegExpData, re_compile};
use crate::object::{ClassTag, JsObject, ObjectExtra, PropFlags, PropertyKey};
use crate::value::Value;
use crate::vm::frame::StackFrame;
use crate::vm::{CallFlags, Completion, Vm};

impl Vm {
    pub(crate) fn exec_bytecode(
        &mut self,
        frame_ptr: *mut StackFrame,
        pending_throw: Option<Value>,
    ) -> Completion {
        macro_rules! frame {
            () => {
                // The frame is boxed in `self.frames`; the raw pointer keeps
                // it reachable without borrowing `self`.
                unsafe { &mut *frame_ptr }
            };
        }
        macro_rules! handle {
            ($expr:expr) => {
                match $expr {
                    Ok(value) => value,
                    Err(err) => {
                        let err: JsError = err;
                        let err = err.value();
                        if self.handle_throw(frame_ptr, err) {
                            continue;
                        }
                        return Completion::Throw(err);
                    }
                }
            };
        }

        if let Some(err) = pending_throw {
            if !self.handle_throw(frame_ptr, err) {
                return Completion::Throw(err);
            }
        }

        loop {
            // Safepoint: a collection deferred by a pause region runs here.
            self.heap.gc_if_requested();

            let inst = {
                let frame = frame!();
                let inst = self.bytecode[frame.pc as usize];
                frame.pc += 1;
                inst
            };
            match inst.op {
                OpCode::Nop => {}
                OpCode::Halt => return Completion::Normal(Value::Undefined),
                OpCode::HaltErr => {
                    let err = frame!().pop();
                    return Completion::Throw(err);
                }

                // -- constants ------------------------------------------
                OpCode::PushI32 => frame!().push(Value::I32(inst.a())),
                OpCode::PushF64 => frame!().push(Value::F64(inst.num())),
                OpCode::PushNum => {
                    let n = self.numbers[inst.a() as usize];
                    frame!().push(Value::F64(n));
                }
                OpCode::PushStr | OpCode::PushAtom => {
                    frame!().push(Value::Atom(inst.a() as u32));
                }
                OpCode::PushBool => frame!().push(Value::Bool(inst.a() != 0)),
                OpCode::PushNull => frame!().push(Value::Null),
                OpCode::PushUndef => frame!().push(Value::Undefined),
                OpCode::PushUninit => frame!().push(Value::Uninit),
                OpCode::PushThis => {
                    let this = frame!().this_val;
                    frame!().push(this);
                }
                OpCode::PushGlobalThis => {
                    let global = self.global_object;
                    frame!().push(global);
                }

                // -- stack shuffling ------------------------------------
                OpCode::PopDrop => {
                    frame!().pop();
                }
                OpCode::Dup => {
                    let top = frame!().top();
                    frame!().push(top);
                }
                OpCode::MoveToTop1 => {
                    let frame = frame!();
                    let (a, b) = (frame.peek(1), frame.peek(0));
                    frame.set_peek(1, b);
                    frame.set_peek(0, a);
                }
                OpCode::MoveToTop2 => {
                    let frame = frame!();
                    let (a, b, c) =
                        (frame.peek(2), frame.peek(1), frame.peek(0));
                    frame.set_peek(2, b);
                    frame.set_peek(1, c);
                    frame.set_peek(0, a);
                }

                // -- variable access ------------------------------------
                OpCode::PushVar | OpCode::PushVarCheck => {
                    let value = self.read_var(
                        frame_ptr,
                        inst.scope(),
                        inst.b() as usize,
                    );
                    if inst.op == OpCode::PushVarCheck && value.is_uninit() {
                        handle!(Err::<(), _>(self.tdz_error()));
                    }
                    frame!().push(value);
                }
                OpCode::PopVar | OpCode::PopVarCheck => {
                    if inst.op == OpCode::PopVarCheck {
                        let current = self.read_var(
                            frame_ptr,
                            inst.scope(),
                            inst.b() as usize,
                        );
                        if current.is_uninit() {
                            handle!(Err::<(), _>(self.tdz_error()));
                        }
                    }
                    let value = frame!().pop();
                    self.write_var(
                        frame_ptr,
                        inst.scope(),
                        inst.b() as usize,
                        value,
                    );
                }
                OpCode::StoreVar | OpCode::StoreVarCheck => {
                    if inst.op == OpCode::StoreVarCheck {
                        let current = self.read_var(
                            frame_ptr,
                            inst.scope(),
                            inst.b() as usize,
                        );
                        if current.is_uninit() {
                            handle!(Err::<(), _>(self.tdz_error()));
                        }
                    }
                    let value = frame!().top();
                    self.write_var(
                        frame_ptr,
                        inst.scope(),
                        inst.b() as usize,
                        value,
                    );
                }

                // -- locals bookkeeping ---------------------------------
                OpCode::VarUndef => {
                    self.set_local_raw(frame_ptr, inst.a() as usize, Value::Undefined);
                }
                OpCode::VarDeinit => {
                    self.set_local_raw(frame_ptr, inst.a() as usize, Value::Uninit);
                }
                OpCode::VarDeinitRange => {
                    for idx in inst.a()..inst.b() {
                        self.set_local_raw(frame_ptr, idx as usize, Value::Uninit);
                    }
                }
                OpCode::VarDispose => {
                    self.set_local_raw(frame_ptr, inst.a() as usize, Value::Undefined);
                }
                OpCode::VarDisposeRange => {
                    for idx in inst.a()..inst.b() {
                        self.set_local_raw(
                            frame_ptr,
                            idx as usize,
                            Value::Undefined,
                        );
                    }
                }
                OpCode::LoopVarRenew => {
                    // Give each loop iteration's closures a fresh cell while
                    // carrying the current value over.
                    for idx in inst.a()..inst.b() {
                        let frame = frame!();
                        let at = frame.locals_start + idx as usize;
                        if let Value::HeapCell(cell) = frame.buffer[at] {
                            let fresh = self.heap.new_cell(cell.as_ref().value);
                            frame!().buffer[at] = Value::HeapCell(fresh);
                        }
                    }
                }
                OpCode::StoreCurrFunc => {
                    let function = frame!().function;
                    self.set_local_raw(frame_ptr, inst.a() as usize, function);
                }

                // -- arithmetic -----------------------------------------
                OpCode::Add => handle!(self.exec_add(frame_ptr, false)),
                OpCode::AddToLeft => handle!(self.exec_add(frame_ptr, true)),
                OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                    handle!(self.exec_arith(frame_ptr, inst.op));
                }
                OpCode::Neg => {
                    let value = frame!().top();
                    let n = handle!(to_number(self, value));
                    frame!().set_peek(0, Value::F64(-n));
                }
                OpCode::Inc | OpCode::Dec => {
                    let value = self.read_var(
                        frame_ptr,
                        inst.scope(),
                        inst.b() as usize,
                    );
                    let n = handle!(to_number(self, value));
                    let n = if inst.op == OpCode::Inc { n + 1.0 } else { n - 1.0 };
                    self.write_var(
                        frame_ptr,
                        inst.scope(),
                        inst.b() as usize,
                        Value::F64(n),
                    );
                }

                // -- bit operations -------------------------------------
                OpCode::BitsAnd | OpCode::BitsOr | OpCode::BitsXor => {
                    handle!(self.exec_bits(frame_ptr, inst.op));
                }
                OpCode::BitsNot => {
                    let value = frame!().top();
                    let n = handle!(to_number(self, value));
                    frame!().set_peek(0, Value::I32(!f64_to_int32(n)));
                }
                OpCode::Lsh | OpCode::Rsh | OpCode::Ursh => {
                    handle!(self.exec_shift(frame_ptr, inst.op, None));
                }
                OpCode::LshI | OpCode::RshI | OpCode::UrshI => {
                    handle!(self.exec_shift(frame_ptr, inst.op, Some(inst.a())));
                }

                // -- logic ----------------------------------------------
                OpCode::LogiNot => {
                    let value = frame!().top();
                    frame!().set_peek(0, Value::Bool(!to_boolean(value)));
                }
                OpCode::LogiAnd | OpCode::LogiOr => {
                    let frame = frame!();
                    let (a, b) = (frame.peek(1), frame.peek(0));
                    let take_right = to_boolean(a) == (inst.op == OpCode::LogiAnd);
                    frame.set_peek(1, if take_right { b } else { a });
                    frame.drop_n(1);
                }

                // -- comparison -----------------------------------------
                OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                    handle!(self.exec_compare(frame_ptr, inst.op));
                }
                OpCode::Eq | OpCode::Ne => {
                    let frame = frame!();
                    let (a, b) = (frame.peek(1), frame.peek(0));
                    let eq = handle!(abstract_equals(self, a, b));
                    let result = eq == (inst.op == OpCode::Eq);
                    let frame = frame!();
                    frame.set_peek(1, Value::Bool(result));
                    frame.drop_n(1);
                }
                OpCode::EqStrict | OpCode::NeStrict => {
                    let frame = frame!();
                    let (a, b) = (frame.peek(1), frame.peek(0));
                    let eq = strict_equals(self, a, b);
                    let result = eq == (inst.op == OpCode::EqStrict);
                    frame.set_peek(1, Value::Bool(result));
                    frame.drop_n(1);
                }

                // -- control flow ---------------------------------------
                OpCode::Jmp => frame!().pc = inst.a() as u32,
                OpCode::JmpPop => {
                    let frame = frame!();
                    frame.pop();
                    frame.pc = inst.a() as u32;
                }
                OpCode::JmpTrue => {
                    if to_boolean(frame!().top()) {
                        frame!().pc = inst.a() as u32;
                    }
                }
                OpCode::JmpFalse => {
                    if !to_boolean(frame!().top()) {
                        frame!().pc = inst.a() as u32;
                    }
                }
                OpCode::JmpTruePop => {
                    let value = frame!().pop();
                    if to_boolean(value) {
                        frame!().pc = inst.a() as u32;
                    }
                }
                OpCode::JmpFalsePop => {
                    let value = frame!().pop();
                    if !to_boolean(value) {
                        frame!().pc = inst.a() as u32;
                    }
                }
                OpCode::JmpCond => {
                    let target = if to_boolean(frame!().top()) {
                        inst.a()
                    } else {
                        inst.b()
                    };
                    frame!().pc = target as u32;
                }
                OpCode::JmpCondPop => {
                    let value = frame!().pop();
                    let target =
                        if to_boolean(value) { inst.a() } else { inst.b() };
                    frame!().pc = target as u32;
                }

                // -- object and array literals --------------------------
                OpCode::MakeObj => {
                    let obj = self.new_plain_object();
                    frame!().push(Value::Object(obj));
                }
                OpCode::MakeArray => {
                    let array = self.new_array_from(&[]);
                    frame!().push(Value::Object(array));
                }
                OpCode::AddProps => {
                    handle!(self.exec_add_props(frame_ptr, inst.a() as usize));
                }
                OpCode::AddElements => {
                    let count = inst.a() as usize;
                    let array = frame!()
                        .peek(count)
                        .as_object()
                        .expect("add_elements below a non-array");
                    for i in 0..count {
                        let value = frame!().peek(count - 1 - i);
                        self.heap.write_barrier(array, value);
                        array.as_mut().as_array_mut().unwrap().push(value);
                    }
                    frame!().drop_n(count);
                }

                // -- property access ------------------------------------
                OpCode::GetPropAtom => {
                    let target = frame!().top();
                    let value = handle!(self
                        .get_prop(target, PropertyKey::Atom(inst.a() as u32)));
                    frame!().set_peek(0, value);
                }
                OpCode::GetPropAtom2 => {
                    let target = frame!().top();
                    let value = handle!(self
                        .get_prop(target, PropertyKey::Atom(inst.a() as u32)));
                    frame!().push(value);
                }
                OpCode::GetPropIndex | OpCode::GetPropIndex2 => {
                    let index = frame!().top();
                    let key = handle!(self.to_property_key(index));
                    let target = frame!().peek(1);
                    let value = handle!(self.get_prop(target, key));
                    let frame = frame!();
                    if inst.op == OpCode::GetPropIndex {
                        frame.set_peek(1, value);
                        frame.drop_n(1);
                    } else {
                        frame.push(value);
                    }
                }
                OpCode::SetPropAtom => {
                    let frame = frame!();
                    let (target, value) = (frame.peek(1), frame.peek(0));
                    handle!(self.set_prop(
                        target,
                        PropertyKey::Atom(inst.a() as u32),
                        value
                    ));
                    let frame = frame!();
                    let value = frame.peek(0);
                    frame.set_peek(1, value);
                    frame.drop_n(1);
                }
                OpCode::SetPropIndex => {
                    let index = frame!().peek(1);
                    let key = handle!(self.to_property_key(index));
                    let frame = frame!();
                    let (target, value) = (frame.peek(2), frame.peek(0));
                    handle!(self.set_prop(target, key, value));
                    let frame = frame!();
                    let value = frame.peek(0);
                    frame.set_peek(2, value);
                    frame.drop_n(2);
                }

                // -- free identifiers -----------------------------------
                OpCode::DynGetVar | OpCode::DynGetVarUndef => {
                    let key = PropertyKey::Atom(inst.a() as u32);
                    let global = self.global_object;
                    if self.has_own_prop(global, key) {
                        let value = handle!(self.get_prop(global, key));
                        frame!().push(value);
                    } else if inst.op == OpCode::DynGetVarUndef {
                        frame!().push(Value::Undefined);
                    } else {
                        let name = self.key_utf8(key);
                        handle!(Err::<(), _>(self.throw_error(
                            ErrorKind::ReferenceError,
                            &format!("{name} is not defined"),
                        )));
                    }
                }
                OpCode::DynSetVar => {
                    let value = frame!().top();
                    let global = self.global_object;
                    handle!(self.set_prop(
                        global,
                        PropertyKey::Atom(inst.a() as u32),
                        value
                    ));
                    frame!().drop_n(1);
                }

                // -- calls ----------------------------------------------
                OpCode::Call => {
                    handle!(self.exec_call_op(
                        frame_ptr,
                        inst.a() as usize,
                        inst.b() != 0
                    ));
                }
                OpCode::JsNew => {
                    handle!(self.exec_js_new(frame_ptr, inst.a() as usize));
                }
                OpCode::MakeFunc => {
                    let func = self.exec_make_func(frame_ptr, inst.a() as u32);
                    frame!().push(func);
                }
                OpCode::Ret => {
                    let value = frame!().pop();
                    return Completion::Normal(value);
                }
                OpCode::RetUndef => {
                    return Completion::Normal(Value::Undefined);
                }
                OpCode::RetErr => {
                    let err = frame!().pop();
                    return Completion::Throw(err);
                }
                OpCode::Await => {
                    // The awaited value's slot stays reserved; resolution
                    // overwrites it before the resume.
                    let value = frame!().top();
                    return Completion::Await(value);
                }
                OpCode::Yield => {
                    let value = frame!().top();
                    return Completion::Yield(value);
                }
                OpCode::ProcCall => {
                    let frame = frame!();
                    frame.push(Value::ProcMeta(frame.pc));
                    frame.pc = inst.a() as u32;
                }
                OpCode::ProcRet => {
                    let frame = frame!();
                    match frame.pop() {
                        Value::ProcMeta(return_pc) => frame.pc = return_pc,
                        other => {
                            unreachable!("proc_ret over {other:?}")
                        }
                    }
                }

                // -- iteration ------------------------------------------
                OpCode::ForInInit => {
                    let target = frame!().top();
                    let iterator = self.build_for_in_iterator(target);
                    frame!().set_peek(0, Value::Object(iterator));
                }
                OpCode::ForInNext => {
                    let iterator = frame!().top().as_object();
                    let next = iterator.and_then(|obj| {
                        match &mut obj.as_mut().extra {
                            ObjectExtra::ForIn(data) => data.next_key(),
                            _ => None,
                        }
                    });
                    let frame = frame!();
                    match next {
                        Some(key) => {
                            frame.push(Value::Atom(key));
                            frame.push(Value::Bool(false));
                        }
                        None => {
                            frame.push(Value::Undefined);
                            frame.push(Value::Bool(true));
                        }
                    }
                }
                OpCode::ForOfInit => {
                    let target = frame!().top();
                    let method = handle!(self.get_prop(
                        target,
                        PropertyKey::Symbol(atom::K_SYM_ITERATOR)
                    ));
                    let target = frame!().top();
                    let iterator =
                        handle!(self.call_checked(method, target, &[]));
                    if !iterator.is_object() {
                        handle!(Err::<(), _>(self.throw_error(
                            ErrorKind::TypeError,
                            "Result of the Symbol.iterator method is not an object",
                        )));
                    }
                    frame!().set_peek(0, iterator);
                }
                OpCode::ForOfNext => {
                    let iterator = frame!().top();
                    let next =
                        handle!(self.get_prop_atom_value(iterator, atom::K_NEXT));
                    let iterator = frame!().top();
                    let result =
                        handle!(self.call_checked(next, iterator, &[]));
                    if !result.is_object() {
                        handle!(Err::<(), _>(self.throw_error(
                            ErrorKind::TypeError,
                            "Iterator result is not an object",
                        )));
                    }
                    // Park the result on the stack while its properties are
                    // read; either read may run a getter.
                    frame!().push(result);
                    let result = frame!().top();
                    let done_value =
                        handle!(self.get_prop_atom_value(result, atom::K_DONE));
                    let done = to_boolean(done_value);
                    let result = frame!().top();
                    let value =
                        handle!(self.get_prop_atom_value(result, atom::K_VALUE));
                    let frame = frame!();
                    frame.set_peek(0, value);
                    frame.push(Value::Bool(done));
                }
                OpCode::IterEndJmp => {
                    let frame = frame!();
                    let done = to_boolean(frame.top());
                    if done {
                        frame.drop_n(2);
                        frame.pc = inst.a() as u32;
                    } else {
                        frame.drop_n(1);
                    }
                }

                // -- miscellaneous operators ----------------------------
                OpCode::In => {
                    let key_value = frame!().peek(1);
                    let key = handle!(self.to_property_key(key_value));
                    let target = frame!().peek(0);
                    let found = handle!(self.has_prop(target, key));
                    let frame = frame!();
                    frame.set_peek(1, Value::Bool(found));
                    frame.drop_n(1);
                }
                OpCode::InstanceOf => {
                    let frame = frame!();
                    let (value, ctor) = (frame.peek(1), frame.peek(0));
                    let result = handle!(self.instance_of(value, ctor));
                    let frame = frame!();
                    frame.set_peek(1, Value::Bool(result));
                    frame.drop_n(1);
                }
                OpCode::TypeOf => {
                    let value = frame!().top();
                    frame!().set_peek(0, Value::Atom(typeof_atom(value)));
                }
                OpCode::Delete => {
                    let key_value = frame!().peek(0);
                    let key = handle!(self.to_property_key(key_value));
                    let target = frame!().peek(1);
                    let removed = handle!(self.delete_prop(target, key));
                    let frame = frame!();
                    frame.set_peek(1, Value::Bool(removed));
                    frame.drop_n(1);
                }
                OpCode::ToNumber => {
                    let value = frame!().top();
                    let n = handle!(to_number(self, value));
                    frame!().set_peek(0, Value::F64(n));
                }
                OpCode::RegexpBuild => {
                    handle!(self.exec_regexp_build(
                        frame_ptr,
                        inst.a() as u32,
                        inst.b() as u8
                    ));
                }
            }
        }
    }

    /// Route a thrown value through the current function's catch table.
    /// Returns false when no entry (not even the unwind sentinel) applies;
    /// the caller then propagates the throw.
    pub(crate) fn handle_throw(
        &mut self,
        frame_ptr: *mut StackFrame,
        err: Value,
    ) -> bool {
        let frame = unsafe { &mut *frame_ptr };
        let Some(meta_idx) = frame
            .function
            .as_object()
            .and_then(|o| o.as_ref().as_function())
            .map(|f| f.meta_idx)
        else {
            return false;
        };
        let throw_pc = frame.pc.saturating_sub(1);
        let table = &self.metas[meta_idx as usize].catch_table;
        let entry = table
            .iter()
            .copied()
            .find(|entry| entry.covers(throw_pc))
            .or_else(|| table.iter().copied().find(|entry| entry.is_sentinel()));
        let Some(entry) = entry else {
            return false;
        };
        frame.sp = 0;
        frame.push(err);
        for idx in entry.locals_begin..entry.locals_end {
            frame.buffer[frame.locals_start + idx as usize] = Value::Undefined;
        }
        frame.pc = entry.handler_pc;
        true
    }

    fn tdz_error(&mut self) -> JsError {
        self.throw_error(
            ErrorKind::ReferenceError,
            "Cannot access variable before initialization",
        )
    }

    // -----------------------------------------------------------------
    // Variable slots
    // -----------------------------------------------------------------

    /// Raw pointer to the addressed slot. `Closure` slots point into the
    /// callee's capture-cell array.
    fn scope_slot_ptr(
        &mut self,
        frame_ptr: *mut StackFrame,
        scope: ScopeKind,
        index: usize,
    ) -> *mut Value {
        match scope {
            ScopeKind::Global => {
                let global = self.global_frame_ptr();
                unsafe {
                    let frame = &mut *global;
                    frame.buffer.as_mut_ptr().add(frame.locals_start + index)
                }
            }
            ScopeKind::Local => unsafe {
                let frame = &mut *frame_ptr;
                frame.buffer.as_mut_ptr().add(frame.locals_start + index)
            },
            ScopeKind::Arg => unsafe {
                let frame = &mut *frame_ptr;
                frame.buffer.as_mut_ptr().add(index)
            },
            ScopeKind::Closure => {
                let function = unsafe { (*frame_ptr).function };
                let captures = function
                    .as_object()
                    .and_then(|o| o.as_ref().as_function())
                    .map(|f| f.captures)
                    .expect("closure access outside a function");
                match captures {
                    Value::HeapArray(cells) => unsafe {
                        cells.as_mut().values.as_mut_ptr().add(index)
                    },
                    _ => unreachable!("closure access without capture cells"),
                }
            }
        }
    }

    /// Read a variable, reading through its heap cell if the slot escaped.
    fn read_var(
        &mut self,
        frame_ptr: *mut StackFrame,
        scope: ScopeKind,
        index: usize,
    ) -> Value {
        let slot = self.scope_slot_ptr(frame_ptr, scope, index);
        unsafe { (*slot).deref_cell() }
    }

    /// Write a variable; writes through heap cells run the write barrier.
    fn write_var(
        &mut self,
        frame_ptr: *mut StackFrame,
        scope: ScopeKind,
        index: usize,
        value: Value,
    ) {
        let slot = self.scope_slot_ptr(frame_ptr, scope, index);
        match unsafe { *slot } {
            Value::HeapCell(cell) => {
                cell.as_mut().value = value;
                self.heap.write_barrier(cell, value);
            }
            _ => unsafe { *slot = value },
        }
    }

    /// Overwrite a local slot itself, cell or not (declaration bookkeeping).
    fn set_local_raw(
        &mut self,
        frame_ptr: *mut StackFrame,
        index: usize,
        value: Value,
    ) {
        let frame = unsafe { &mut *frame_ptr };
        let at = frame.locals_start + index;
        frame.buffer[at] = value;
    }

    // -----------------------------------------------------------------
    // Operator bodies
    // -----------------------------------------------------------------

    /// `add` and the in-place `add_to_left` used by string `+=`. Operands
    /// stay on the stack across every coercion; intermediates are written
    /// back into their slots.
    fn exec_add(
        &mut self,
        frame_ptr: *mut StackFrame,
        in_place: bool,
    ) -> JsResult<()> {
        let frame = unsafe { &mut *frame_ptr };
        let (left, right) = (frame.peek(1), frame.peek(0));

        // Fast path: two numbers.
        if left.is_number() && right.is_number() {
            frame.set_peek(1, Value::F64(left.number() + right.number()));
            frame.drop_n(1);
            return Ok(());
        }
        // Fast path: two strings.
        if left.is_string() && right.is_string() {
            let result = self.concat_string_slots(frame_ptr, in_place);
            let frame = unsafe { &mut *frame_ptr };
            frame.set_peek(1, result);
            frame.drop_n(1);
            return Ok(());
        }

        // Generic path: ToPrimitive both (written back into the slots),
        // then string concatenation or numeric addition.
        let prim = crate::conversion::to_primitive(
            self,
            left,
            crate::conversion::PreferredType::Default,
        )?;
        unsafe { (*frame_ptr).set_peek(1, prim) };
        let right = unsafe { (*frame_ptr).peek(0) };
        let prim = crate::conversion::to_primitive(
            self,
            right,
            crate::conversion::PreferredType::Default,
        )?;
        unsafe { (*frame_ptr).set_peek(0, prim) };

        let frame = unsafe { &mut *frame_ptr };
        let (left, right) = (frame.peek(1), frame.peek(0));
        if left.is_string() || right.is_string() {
            let text = crate::conversion::to_string_value(self, left)?;
            unsafe { (*frame_ptr).set_peek(1, text) };
            let right = unsafe { (*frame_ptr).peek(0) };
            let text = crate::conversion::to_string_value(self, right)?;
            unsafe { (*frame_ptr).set_peek(0, text) };
            let result = self.concat_string_slots(frame_ptr, in_place);
            let frame = unsafe { &mut *frame_ptr };
            frame.set_peek(1, result);
            frame.drop_n(1);
        } else {
            let a = to_number(self, left)?;
            let right = unsafe { (*frame_ptr).peek(0) };
            let b = to_number(self, right)?;
            let frame = unsafe { &mut *frame_ptr };
            frame.set_peek(1, Value::F64(a + b));
            frame.drop_n(1);
        }
        Ok(())
    }

    /// Concatenate the two string-ish values at the stack top. With
    /// `in_place` set and an unshared left heap string, extends it instead
    /// of allocating.
    fn concat_string_slots(
        &mut self,
        frame_ptr: *mut StackFrame,
        in_place: bool,
    ) -> Value {
        let frame = unsafe { &mut *frame_ptr };
        let (left, right) = (frame.peek(1), frame.peek(0));
        let right_units =
            crate::conversion::string_value_units(self, &right).into_owned();
        if in_place {
            if let Value::String(left_string) = left {
                let result = self.heap.string_append(left_string, &right_units);
                return Value::String(result);
            }
        }
        let mut units =
            crate::conversion::string_value_units(self, &left).into_owned();
        units.extend_from_slice(&right_units);
        Value::String(self.heap.new_string(units))
    }

    fn exec_arith(
        &mut self,
        frame_ptr: *mut StackFrame,
        op: OpCode,
    ) -> JsResult<()> {
        let left = unsafe { (*frame_ptr).peek(1) };
        let a = to_number(self, left)?;
        let right = unsafe { (*frame_ptr).peek(0) };
        let b = to_number(self, right)?;
        let result = match op {
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div => a / b,
            OpCode::Mod => {
                // JS `%` truncates toward zero, unlike `rem_euclid`.
                a % b
            }
            _ => unreachable!(),
        };
        let frame = unsafe { &mut *frame_ptr };
        frame.set_peek(1, Value::F64(result));
        frame.drop_n(1);
        Ok(())
    }

    fn exec_bits(
        &mut self,
        frame_ptr: *mut StackFrame,
        op: OpCode,
    ) -> JsResult<()> {
        let left = unsafe { (*frame_ptr).peek(1) };
        let a = f64_to_int32(to_number(self, left)?);
        let right = unsafe { (*frame_ptr).peek(0) };
        let b = f64_to_int32(to_number(self, right)?);
        let result = match op {
            OpCode::BitsAnd => a & b,
            OpCode::BitsOr => a | b,
            OpCode::BitsXor => a ^ b,
            _ => unreachable!(),
        };
        let frame = unsafe { &mut *frame_ptr };
        frame.set_peek(1, Value::I32(result));
        frame.drop_n(1);
        Ok(())
    }

    fn exec_shift(
        &mut self,
        frame_ptr: *mut StackFrame,
        op: OpCode,
        immediate: Option<i32>,
    ) -> JsResult<()> {
        let value_depth = if immediate.is_some() { 0 } else { 1 };
        let value = unsafe { (*frame_ptr).peek(value_depth) };
        let n = to_number(self, value)?;
        let count = match immediate {
            Some(imm) => imm as u32,
            None => {
                let count_value = unsafe { (*frame_ptr).peek(0) };
                f64_to_uint32(to_number(self, count_value)?)
            }
        } & 31;
        let result = match op {
            OpCode::Lsh | OpCode::LshI => {
                Value::I32(f64_to_int32(n).wrapping_shl(count))
            }
            OpCode::Rsh | OpCode::RshI => {
                Value::I32(f64_to_int32(n) >> count)
            }
            OpCode::Ursh | OpCode::UrshI => {
                Value::U32(f64_to_uint32(n) >> count)
            }
            _ => unreachable!(),
        };
        let frame = unsafe { &mut *frame_ptr };
        frame.set_peek(value_depth, result);
        frame.drop_n(value_depth);
        Ok(())
    }

    fn exec_compare(
        &mut self,
        frame_ptr: *mut StackFrame,
        op: OpCode,
    ) -> JsResult<()> {
        let frame = unsafe { &mut *frame_ptr };
        let (a, b) = (frame.peek(1), frame.peek(0));
        let result = match op {
            OpCode::Lt => abstract_less_than(self, a, b)?.unwrap_or(false),
            OpCode::Gt => abstract_less_than(self, b, a)?.unwrap_or(false),
            OpCode::Le => {
                !abstract_less_than(self, b, a)?.unwrap_or(true)
            }
            OpCode::Ge => {
                !abstract_less_than(self, a, b)?.unwrap_or(true)
            }
            _ => unreachable!(),
        };
        let frame = unsafe { &mut *frame_ptr };
        frame.set_peek(1, Value::Bool(result));
        frame.drop_n(1);
        Ok(())
    }

    /// `add_props count`: pop `count` key/value pairs into the object below
    /// them.
    fn exec_add_props(
        &mut self,
        frame_ptr: *mut StackFrame,
        count: usize,
    ) -> JsResult<()> {
        let object_depth = 2 * count;
        for i in 0..count {
            let key_value =
                unsafe { (*frame_ptr).peek(object_depth - 1 - 2 * i) };
            let key = self.to_property_key(key_value)?;
            let frame = unsafe { &mut *frame_ptr };
            let object = frame
                .peek(object_depth)
                .as_object()
                .expect("add_props below a non-object");
            let value = frame.peek(object_depth - 2 - 2 * i);
            self.define_prop(object, key, value, PropFlags::ECW);
        }
        unsafe { (*frame_ptr).drop_n(object_depth) };
        Ok(())
    }

    /// `call argc hasThis`: resolve the callee below the arguments, pick
    /// the receiver, invoke, and leave the result in the callee slot.
    fn exec_call_op(
        &mut self,
        frame_ptr: *mut StackFrame,
        argc: usize,
        has_this: bool,
    ) -> JsResult<()> {
        let (callee, this, args_ptr) = unsafe {
            let frame = &mut *frame_ptr;
            let callee = frame.peek(argc + usize::from(has_this));
            let this =
                if has_this { frame.peek(argc) } else { Value::Undefined };
            let args_at = frame.stack_start + frame.sp - argc;
            (callee, this, frame.buffer.as_ptr().add(args_at))
        };
        // The argument span aliases the caller's stack, which stays rooted
        // (and collector-updated) for the whole call.
        let args = unsafe { std::slice::from_raw_parts(args_ptr, argc) };
        let completion = self.call_internal(
            callee,
            this,
            Value::Undefined,
            args,
            CallFlags::default(),
            None,
        );
        let result = completion.into_result()?;
        let frame = unsafe { &mut *frame_ptr };
        frame.drop_n(argc + usize::from(has_this));
        frame.set_peek(0, result);
        Ok(())
    }

    /// `js_new argc`.
    fn exec_js_new(
        &mut self,
        frame_ptr: *mut StackFrame,
        argc: usize,
    ) -> JsResult<()> {
        let (callee, args_ptr) = unsafe {
            let frame = &mut *frame_ptr;
            let callee = frame.peek(argc);
            let args_at = frame.stack_start + frame.sp - argc;
            (callee, frame.buffer.as_ptr().add(args_at))
        };
        let args = unsafe { std::slice::from_raw_parts(args_ptr, argc) };
        let result = self.construct(callee, args)?;
        let frame = unsafe { &mut *frame_ptr };
        frame.drop_n(argc);
        frame.set_peek(0, result);
        Ok(())
    }

    fn exec_regexp_build(
        &mut self,
        frame_ptr: *mut StackFrame,
        pattern_atom: u32,
        flag_bits: u8,
    ) -> JsResult<()> {
        let pattern = self.atoms.atom_text(pattern_atom);
        let compiled: ReBytecode = match re_compile(&pattern, flag_bits) {
            Ok(compiled) => compiled,
            Err(message) => {
                return Err(self.throw_error(
                    ErrorKind::SyntaxError,
                    &format!("Invalid regular expression: {message}"),
                ));
            }
        };
        let proto = self.protos.regexp;
        let regexp = self.heap.new_object_payload(JsObject::with_extra(
            ClassTag::RegExp,
            proto,
            ObjectExtra::RegExp(Box::new(RegExpData {
                source: Value::Atom(pattern_atom),
                compiled,
            })),
        ));
        self.define_prop(
            regexp,
            PropertyKey::Atom(atom::K_LAST_INDEX),
            Value::U32(0),
            PropFlags::WRITABLE,
        );
        unsafe { (*frame_ptr).push(Value::Object(regexp)) };
        Ok(())
    }
}
