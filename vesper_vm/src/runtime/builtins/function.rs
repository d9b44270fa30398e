// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Function.prototype`: `call`, `apply`, `bind`, `toString`. The
//! `Function` constructor's source-compiling form is an admitted stub.

use crate::error::ErrorKind;
use crate::object::{BoundData, ClassTag, JsObject, ObjectExtra};
use crate::runtime::{add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.function;
    add_method(vm, proto, "call", 1, function_call);
    let proto = vm.protos.function;
    add_method(vm, proto, "apply", 2, function_apply);
    let proto = vm.protos.function;
    add_method(vm, proto, "bind", 1, function_bind);
    let proto = vm.protos.function;
    add_method(vm, proto, "toString", 0, function_to_string);

    let proto = vm.protos.function;
    crate::runtime::add_constructor(vm, "Function", 1, constructor, 0, proto);
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    // Compiling function bodies from source needs the parser, which is an
    // external collaborator.
    Completion::Throw(vm.build_error_value(
        ErrorKind::InternalError,
        "The Function constructor is not supported",
    ))
}

fn function_call(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let target_this = arg(args, 0);
    let rest = args.get(1..).unwrap_or(&[]).to_vec();
    vm.call_with_vec_args(
        this,
        target_this,
        Value::Undefined,
        rest,
        CallFlags::default(),
    )
}

fn function_apply(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let target_this = arg(args, 0);
    let arg_list = arg(args, 1);
    let spread = match arg_list {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Object(obj) if obj.as_ref().class() == ClassTag::Array => {
            let array = obj.as_ref().as_array().unwrap();
            (0..array.len()).map(|i| array.get(i)).collect()
        }
        _ => {
            return Completion::Throw(vm.build_error_value(
                ErrorKind::TypeError,
                "CreateListFromArrayLike called on non-object",
            ));
        }
    };
    vm.call_with_vec_args(
        this,
        target_this,
        Value::Undefined,
        spread,
        CallFlags::default(),
    )
}

fn function_bind(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if !this.is_function() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Bind must be called on a function",
        ));
    }
    let bound_this = arg(args, 0);
    let bound_args = args.get(1..).unwrap_or(&[]).to_vec();
    let proto = vm.protos.function;
    let bound = vm.heap.new_object_payload(JsObject::with_extra(
        ClassTag::BoundFunction,
        proto,
        ObjectExtra::Bound(Box::new(BoundData {
            target: this,
            bound_this,
            bound_args,
        })),
    ));
    Completion::Normal(Value::Object(bound))
}

fn function_to_string(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let Some(obj) = this.as_object() else {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Function.prototype.toString requires a function",
        ));
    };
    if !obj.as_ref().class().is_callable() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Function.prototype.toString requires a function",
        ));
    }
    let name = vm.function_name(obj);
    let text = format!("function {name}() {{ [native code] }}");
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}
