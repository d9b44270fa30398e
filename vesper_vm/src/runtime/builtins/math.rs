// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Math` namespace object.

use rand::Rng;

use crate::conversion::to_number;
use crate::object::PropFlags;
use crate::runtime::{add_data, add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let math = Value::Object(vm.new_plain_object());
    let global = vm.global_object;
    add_data(
        vm,
        global,
        "Math",
        math,
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
    add_data(vm, math, "PI", Value::F64(std::f64::consts::PI), PropFlags::NONE);
    add_data(vm, math, "E", Value::F64(std::f64::consts::E), PropFlags::NONE);
    add_method(vm, math, "floor", 1, math_floor);
    add_method(vm, math, "ceil", 1, math_ceil);
    add_method(vm, math, "round", 1, math_round);
    add_method(vm, math, "trunc", 1, math_trunc);
    add_method(vm, math, "abs", 1, math_abs);
    add_method(vm, math, "sqrt", 1, math_sqrt);
    add_method(vm, math, "pow", 2, math_pow);
    add_method(vm, math, "min", 2, math_min);
    add_method(vm, math, "max", 2, math_max);
    add_method(vm, math, "random", 0, math_random);
}

macro_rules! unary_math {
    ($name:ident, |$n:ident| $body:expr) => {
        fn $name(
            vm: &mut Vm,
            _func: Value,
            _this: Value,
            args: &[Value],
            _flags: CallFlags,
        ) -> Completion {
            match to_number(vm, arg(args, 0)) {
                Ok($n) => Completion::Normal(Value::F64($body)),
                Err(err) => Completion::Throw(err.value()),
            }
        }
    };
}

unary_math!(math_floor, |n| n.floor());
unary_math!(math_ceil, |n| n.ceil());
unary_math!(math_trunc, |n| n.trunc());
unary_math!(math_abs, |n| n.abs());
unary_math!(math_sqrt, |n| n.sqrt());

fn math_round(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match to_number(vm, arg(args, 0)) {
        // JS rounds .5 toward positive infinity, unlike `f64::round`.
        Ok(n) => Completion::Normal(Value::F64((n + 0.5).floor())),
        Err(err) => Completion::Throw(err.value()),
    }
}

fn math_pow(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let base = match to_number(vm, arg(args, 0)) {
        Ok(n) => n,
        Err(err) => return Completion::Throw(err.value()),
    };
    let exponent = match to_number(vm, arg(args, 1)) {
        Ok(n) => n,
        Err(err) => return Completion::Throw(err.value()),
    };
    Completion::Normal(Value::F64(base.powf(exponent)))
}

fn fold_args(
    vm: &mut Vm,
    args: &[Value],
    seed: f64,
    pick: fn(f64, f64) -> f64,
) -> Completion {
    let mut acc = seed;
    for i in 0..args.len() {
        match to_number(vm, args[i]) {
            Ok(n) if n.is_nan() => {
                return Completion::Normal(Value::F64(f64::NAN));
            }
            Ok(n) => acc = pick(acc, n),
            Err(err) => return Completion::Throw(err.value()),
        }
    }
    Completion::Normal(Value::F64(acc))
}

fn math_min(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    fold_args(vm, args, f64::INFINITY, f64::min)
}

fn math_max(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    fold_args(vm, args, f64::NEG_INFINITY, f64::max)
}

fn math_random(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let n: f64 = rand::rng().random();
    Completion::Normal(Value::F64(n))
}
