// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Boolean` constructor and prototype.

use crate::atom;
use crate::conversion::to_boolean;
use crate::object::ClassTag;
use crate::runtime::builtins::global::wrap_primitive;
use crate::runtime::{add_method, arg, this_boolean};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.boolean;
    add_method(vm, proto, "toString", 0, to_string_method);
    let proto = vm.protos.boolean;
    add_method(vm, proto, "valueOf", 0, value_of);

    let proto = vm.protos.boolean;
    crate::runtime::add_constructor(vm, "Boolean", 1, constructor, 0, proto);
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    flags: CallFlags,
) -> Completion {
    let b = to_boolean(arg(args, 0));
    if flags.constructor || flags.this_is_new_target {
        let proto = vm.protos.boolean;
        return Completion::Normal(wrap_primitive(
            vm,
            ClassTag::BooleanObject,
            proto,
            Value::Bool(b),
        ));
    }
    Completion::Normal(Value::Bool(b))
}

fn to_string_method(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_boolean(vm, this) {
        Ok(b) => Completion::Normal(Value::Atom(if b {
            atom::K_TRUE
        } else {
            atom::K_FALSE
        })),
        Err(err) => Completion::Throw(err.value()),
    }
}

fn value_of(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_boolean(vm, this) {
        Ok(b) => Completion::Normal(Value::Bool(b)),
        Err(err) => Completion::Throw(err.value()),
    }
}
