// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The nine error constructors and `Error.prototype`. All constructors
//! share one native entry parameterized by magic (the error kind).

use crate::atom;
use crate::conversion::{string_value_units, to_string_value};
use crate::error::ErrorKind;
use crate::object::{ClassTag, JsObject, PropFlags, PropertyKey};
use crate::runtime::{add_data, add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    for kind in ErrorKind::ALL {
        let proto = vm.protos.errors[kind as usize];
        add_data(
            vm,
            proto,
            "name",
            Value::Atom(kind.name_atom()),
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
        let proto = vm.protos.errors[kind as usize];
        add_data(
            vm,
            proto,
            "message",
            Value::Atom(atom::K_EMPTY),
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
        let proto = vm.protos.errors[kind as usize];
        crate::runtime::add_constructor(
            vm,
            kind.name(),
            1,
            constructor,
            kind as u32,
            proto,
        );
    }
    let proto = vm.protos.errors[ErrorKind::Error as usize];
    add_method(vm, proto, "toString", 0, to_string_method);
}

/// Shared constructor body: allocate the error object (with or without
/// `new`), set `message`, and snapshot `stack` from the live frame chain.
fn constructor(
    vm: &mut Vm,
    func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let kind = {
        let obj = func.as_object().unwrap();
        let data = obj.as_ref().as_function().unwrap();
        ErrorKind::ALL[vm.metas[data.meta_idx as usize].magic as usize]
    };
    let proto = vm.protos.errors[kind as usize];
    let error = Value::Object(
        vm.heap.new_object_payload(JsObject::new(ClassTag::Error, proto)),
    );
    vm.heap.push_temp_root(error);

    if !arg(args, 0).is_undefined() {
        let message = match to_string_value(vm, arg(args, 0)) {
            Ok(text) => text,
            Err(err) => {
                vm.heap.pop_temp_roots(1);
                return Completion::Throw(err.value());
            }
        };
        let error_obj = vm.heap.temp_root(0).as_object().unwrap();
        vm.define_prop(
            error_obj,
            PropertyKey::Atom(atom::K_MESSAGE),
            message,
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
    }
    let stack_text =
        crate::error::format_stack_trace(&vm.capture_stack_trace());
    let stack = Value::String(vm.heap.new_string_utf8(&stack_text));
    let error_obj = vm.heap.temp_root(0).as_object().unwrap();
    vm.define_prop(
        error_obj,
        PropertyKey::Atom(atom::K_STACK),
        stack,
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
    let error = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    Completion::Normal(error)
}

fn to_string_method(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if !this.is_object() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Error.prototype.toString requires an object receiver",
        ));
    }
    let name = match vm.get_prop_atom_value(this, atom::K_NAME) {
        Ok(Value::Undefined) => "Error".to_string(),
        Ok(v) => match to_string_value(vm, v) {
            Ok(text) => {
                String::from_utf16_lossy(&string_value_units(vm, &text))
            }
            Err(err) => return Completion::Throw(err.value()),
        },
        Err(err) => return Completion::Throw(err.value()),
    };
    let message = match vm.get_prop_atom_value(this, atom::K_MESSAGE) {
        Ok(Value::Undefined) => String::new(),
        Ok(v) => match to_string_value(vm, v) {
            Ok(text) => {
                String::from_utf16_lossy(&string_value_units(vm, &text))
            }
            Err(err) => return Completion::Throw(err.value()),
        },
        Err(err) => return Completion::Throw(err.value()),
    };
    let text = if message.is_empty() {
        name
    } else if name.is_empty() {
        message
    } else {
        format!("{name}: {message}")
    };
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}
