// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Number` constructor, its statics and constants, and
//! `Number.prototype`.

use crate::conversion::{
    f64_to_fixed_string, f64_to_radix_string, to_number,
};
use crate::error::ErrorKind;
use crate::object::{ClassTag, PropFlags};
use crate::runtime::builtins::global::wrap_primitive;
use crate::runtime::{add_data, add_method, arg, this_number};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.number;
    add_method(vm, proto, "toString", 1, to_string_method);
    let proto = vm.protos.number;
    add_method(vm, proto, "toFixed", 1, to_fixed);
    let proto = vm.protos.number;
    add_method(vm, proto, "valueOf", 0, value_of);

    let proto = vm.protos.number;
    let ctor =
        crate::runtime::add_constructor(vm, "Number", 1, constructor, 0, proto);
    add_method(vm, ctor, "isInteger", 1, is_integer);
    add_method(vm, ctor, "isFinite", 1, is_finite);
    add_method(vm, ctor, "isNaN", 1, is_nan);
    // Number.parseInt / Number.parseFloat alias the globals.
    for name in ["parseInt", "parseFloat"] {
        let key = vm.atoms.atomize_str(name);
        let global = vm.global_object;
        let aliased =
            vm.get_prop_atom_value(global, key).unwrap_or(Value::Undefined);
        add_data(
            vm,
            ctor,
            name,
            aliased,
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
    }
    for (name, value) in [
        ("MAX_SAFE_INTEGER", 9007199254740991.0),
        ("MIN_SAFE_INTEGER", -9007199254740991.0),
        ("MAX_VALUE", f64::MAX),
        ("MIN_VALUE", f64::MIN_POSITIVE),
        ("EPSILON", f64::EPSILON),
        ("POSITIVE_INFINITY", f64::INFINITY),
        ("NEGATIVE_INFINITY", f64::NEG_INFINITY),
        ("NaN", f64::NAN),
    ] {
        add_data(vm, ctor, name, Value::F64(value), PropFlags::NONE);
    }
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    flags: CallFlags,
) -> Completion {
    let n = if args.is_empty() {
        0.0
    } else {
        match to_number(vm, arg(args, 0)) {
            Ok(n) => n,
            Err(err) => return Completion::Throw(err.value()),
        }
    };
    if flags.constructor || flags.this_is_new_target {
        let proto = vm.protos.number;
        return Completion::Normal(wrap_primitive(
            vm,
            ClassTag::NumberObject,
            proto,
            Value::F64(n),
        ));
    }
    Completion::Normal(Value::F64(n))
}

fn to_string_method(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let n = match this_number(vm, this) {
        Ok(n) => n,
        Err(err) => return Completion::Throw(err.value()),
    };
    let radix = match arg(args, 0) {
        Value::Undefined => 10,
        other => match to_number(vm, other) {
            Ok(r) if (2.0..=36.0).contains(&r) && r.trunc() == r => r as u32,
            Ok(_) => {
                return Completion::Throw(vm.build_error_value(
                    ErrorKind::RangeError,
                    "toString() radix must be between 2 and 36",
                ));
            }
            Err(err) => return Completion::Throw(err.value()),
        },
    };
    let text = f64_to_radix_string(n, radix);
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}

fn to_fixed(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let n = match this_number(vm, this) {
        Ok(n) => n,
        Err(err) => return Completion::Throw(err.value()),
    };
    let digits = match to_number(vm, arg(args, 0)) {
        Ok(d) if (0.0..=100.0).contains(&d) => d as u8,
        Ok(_) => {
            return Completion::Throw(vm.build_error_value(
                ErrorKind::RangeError,
                "toFixed() digits argument must be between 0 and 100",
            ));
        }
        Err(err) => return Completion::Throw(err.value()),
    };
    let text = f64_to_fixed_string(n, digits);
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}

fn value_of(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_number(vm, this) {
        Ok(n) => Completion::Normal(Value::F64(n)),
        Err(err) => Completion::Throw(err.value()),
    }
}

fn is_integer(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let result = match arg(args, 0) {
        v if v.is_number() => {
            let n = v.number();
            n.is_finite() && n.trunc() == n
        }
        _ => false,
    };
    Completion::Normal(Value::Bool(result))
}

fn is_finite(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let result = match arg(args, 0) {
        v if v.is_number() => v.number().is_finite(),
        _ => false,
    };
    Completion::Normal(Value::Bool(result))
}

fn is_nan(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let result = match arg(args, 0) {
        v if v.is_number() => v.number().is_nan(),
        _ => false,
    };
    Completion::Normal(Value::Bool(result))
}
