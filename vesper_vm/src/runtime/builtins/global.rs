// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The global object's own surface: `console.log`, timers, number parsing
//! and the global value constants.

use crate::conversion::{to_display_string, to_number};
use crate::object::{ClassTag, JsObject, PropFlags};
use crate::runtime::{add_data, add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let global = vm.global_object;
    add_data(
        vm,
        global,
        "globalThis",
        global,
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
    add_data(vm, global, "undefined", Value::Undefined, PropFlags::NONE);
    add_data(vm, global, "NaN", Value::F64(f64::NAN), PropFlags::NONE);
    add_data(
        vm,
        global,
        "Infinity",
        Value::F64(f64::INFINITY),
        PropFlags::NONE,
    );

    let console = Value::Object(vm.new_plain_object());
    let global = vm.global_object;
    add_data(
        vm,
        global,
        "console",
        console,
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
    add_method(vm, console, "log", 0, console_log);
    let global = vm.global_object;
    add_method(vm, global, "print", 0, console_log);
    let global = vm.global_object;
    add_method(vm, global, "setTimeout", 2, set_timeout);
    let global = vm.global_object;
    add_method(vm, global, "clearTimeout", 1, clear_timer);
    let global = vm.global_object;
    add_method(vm, global, "setInterval", 2, set_interval);
    let global = vm.global_object;
    add_method(vm, global, "clearInterval", 1, clear_timer);
    let global = vm.global_object;
    add_method(vm, global, "parseInt", 2, parse_int);
    let global = vm.global_object;
    add_method(vm, global, "parseFloat", 1, parse_float);
    let global = vm.global_object;
    add_method(vm, global, "isNaN", 1, global_is_nan);
    let global = vm.global_object;
    add_method(vm, global, "isFinite", 1, global_is_finite);
}

fn console_log(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut line = String::new();
    for i in 0..args.len() {
        if i > 0 {
            line.push(' ');
        }
        // Re-read through the span: rendering may collect.
        match to_display_string(vm, args[i]) {
            Ok(text) => line.push_str(&text),
            Err(err) => return Completion::Throw(err.value()),
        }
    }
    vm.push_log(line);
    Completion::Normal(Value::Undefined)
}

fn set_timeout(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    schedule_timer(vm, args, false)
}

fn set_interval(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    schedule_timer(vm, args, true)
}

fn schedule_timer(vm: &mut Vm, args: &[Value], repeat: bool) -> Completion {
    let callable = arg(args, 0);
    if !callable.is_function() {
        return Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "Timer callback is not a function",
        ));
    }
    let delay = match to_number(vm, arg(args, 1)) {
        Ok(n) if n.is_finite() && n > 0.0 => n as u64,
        Ok(_) => 0,
        Err(err) => return Completion::Throw(err.value()),
    };
    let callable = arg(args, 0);
    let extra = args.get(2..).unwrap_or(&[]).to_vec();
    let id = vm.event_loop.add_timer_task(callable, extra, delay, repeat);
    Completion::Normal(Value::F64(id as f64))
}

fn clear_timer(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if let Ok(id) = to_number(vm, arg(args, 0)) {
        if id.is_finite() && id >= 0.0 {
            vm.event_loop.remove_timer(id as u64);
        }
    }
    Completion::Normal(Value::Undefined)
}

fn parse_int(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let text = match crate::conversion::to_string_value(vm, arg(args, 0)) {
        Ok(v) => crate::conversion::string_value_units(vm, &v).into_owned(),
        Err(err) => return Completion::Throw(err.value()),
    };
    let radix = match to_number(vm, arg(args, 1)) {
        Ok(n) if n.is_finite() && (2.0..=36.0).contains(&n) => n as u32,
        Ok(_) => 10,
        Err(err) => return Completion::Throw(err.value()),
    };
    let text: String = String::from_utf16_lossy(&text);
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    let mut value: f64 = 0.0;
    let mut any = false;
    for ch in digits.chars() {
        match ch.to_digit(radix) {
            Some(digit) => {
                value = value * radix as f64 + digit as f64;
                any = true;
            }
            None => break,
        }
    }
    let result = if !any {
        f64::NAN
    } else if negative {
        -value
    } else {
        value
    };
    Completion::Normal(Value::F64(result))
}

fn parse_float(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let text = match crate::conversion::to_string_value(vm, arg(args, 0)) {
        Ok(v) => crate::conversion::string_value_units(vm, &v).into_owned(),
        Err(err) => return Completion::Throw(err.value()),
    };
    let text: String = String::from_utf16_lossy(&text);
    let trimmed = text.trim();
    // Longest numeric prefix, the way the spec trims trailing garbage.
    let mut end = trimmed.len();
    while end > 0 {
        if let Ok(n) = trimmed[..end].parse::<f64>() {
            return Completion::Normal(Value::F64(n));
        }
        end -= 1;
    }
    Completion::Normal(Value::F64(f64::NAN))
}

fn global_is_nan(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match to_number(vm, arg(args, 0)) {
        Ok(n) => Completion::Normal(Value::Bool(n.is_nan())),
        Err(err) => Completion::Throw(err.value()),
    }
}

fn global_is_finite(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match to_number(vm, arg(args, 0)) {
        Ok(n) => Completion::Normal(Value::Bool(n.is_finite())),
        Err(err) => Completion::Throw(err.value()),
    }
}

/// Wrap a primitive for `new Number(x)` / `new String(x)` /
/// `new Boolean(x)`.
pub(crate) fn wrap_primitive(
    vm: &mut Vm,
    class: ClassTag,
    proto: Value,
    value: Value,
) -> Value {
    let object = JsObject::with_extra(
        class,
        proto,
        crate::object::ObjectExtra::Primitive { value },
    );
    Value::Object(vm.heap.new_object_payload(object))
}
