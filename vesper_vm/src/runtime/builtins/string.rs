// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `String` constructor and `String.prototype`. All methods operate on
//! UTF-16 code units; case mapping is ASCII-only.

use crate::atom;
use crate::conversion::{to_number, to_string_value};
use crate::object::iterator::StringIterData;
use crate::object::{ClassTag, JsObject, ObjectExtra};
use crate::runtime::builtins::global::wrap_primitive;
use crate::runtime::{add_method, add_symbol_method, arg, this_string_units};
use crate::string::NPOS;
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.string;
    add_method(vm, proto, "charAt", 1, char_at);
    let proto = vm.protos.string;
    add_method(vm, proto, "charCodeAt", 1, char_code_at);
    let proto = vm.protos.string;
    add_method(vm, proto, "indexOf", 1, index_of);
    let proto = vm.protos.string;
    add_method(vm, proto, "lastIndexOf", 1, last_index_of);
    let proto = vm.protos.string;
    add_method(vm, proto, "includes", 1, includes);
    let proto = vm.protos.string;
    add_method(vm, proto, "startsWith", 1, starts_with);
    let proto = vm.protos.string;
    add_method(vm, proto, "endsWith", 1, ends_with);
    let proto = vm.protos.string;
    add_method(vm, proto, "slice", 2, slice);
    let proto = vm.protos.string;
    add_method(vm, proto, "substring", 2, substring);
    let proto = vm.protos.string;
    add_method(vm, proto, "trim", 0, trim);
    let proto = vm.protos.string;
    add_method(vm, proto, "split", 2, split);
    let proto = vm.protos.string;
    add_method(vm, proto, "repeat", 1, repeat);
    let proto = vm.protos.string;
    add_method(vm, proto, "replace", 2, replace);
    let proto = vm.protos.string;
    add_method(vm, proto, "toUpperCase", 0, to_upper_case);
    let proto = vm.protos.string;
    add_method(vm, proto, "toLowerCase", 0, to_lower_case);
    let proto = vm.protos.string;
    add_method(vm, proto, "concat", 1, concat);
    let proto = vm.protos.string;
    add_method(vm, proto, "toString", 0, to_string_method);
    let proto = vm.protos.string;
    add_method(vm, proto, "valueOf", 0, to_string_method);
    let proto = vm.protos.string;
    add_symbol_method(vm, proto, atom::K_SYM_ITERATOR, "[Symbol.iterator]", iterator);

    let proto = vm.protos.string;
    let ctor =
        crate::runtime::add_constructor(vm, "String", 1, constructor, 0, proto);
    add_method(vm, ctor, "fromCharCode", 1, from_char_code);
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    flags: CallFlags,
) -> Completion {
    let text = if args.is_empty() {
        Value::Atom(atom::K_EMPTY)
    } else {
        match to_string_value(vm, arg(args, 0)) {
            Ok(text) => text,
            Err(err) => return Completion::Throw(err.value()),
        }
    };
    if flags.constructor || flags.this_is_new_target {
        let proto = vm.protos.string;
        return Completion::Normal(wrap_primitive(
            vm,
            ClassTag::StringObject,
            proto,
            text,
        ));
    }
    Completion::Normal(text)
}

fn from_char_code(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut units = Vec::with_capacity(args.len());
    for i in 0..args.len() {
        match to_number(vm, args[i]) {
            Ok(n) => units.push(crate::conversion::f64_to_uint32(n) as u16),
            Err(err) => return Completion::Throw(err.value()),
        }
    }
    Completion::Normal(Value::String(vm.heap.new_string(units)))
}

/// Resolve the receiver's units, or throw.
macro_rules! receiver_units {
    ($vm:ident, $this:ident) => {
        match this_string_units($vm, $this) {
            Ok(units) => units,
            Err(err) => return Completion::Throw(err.value()),
        }
    };
}

/// One string argument's units.
macro_rules! arg_units {
    ($vm:ident, $args:ident, $i:expr) => {
        match to_string_value($vm, arg($args, $i)) {
            Ok(text) => {
                crate::conversion::string_value_units($vm, &text).into_owned()
            }
            Err(err) => return Completion::Throw(err.value()),
        }
    };
}

fn index_arg(vm: &mut Vm, args: &[Value], i: usize, default: f64) -> Result<f64, Completion> {
    match arg(args, i) {
        Value::Undefined => Ok(default),
        other => match to_number(vm, other) {
            Ok(n) if n.is_nan() => Ok(0.0),
            Ok(n) => Ok(n.trunc()),
            Err(err) => Err(Completion::Throw(err.value())),
        },
    }
}

fn char_at(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let index = match index_arg(vm, args, 0, 0.0) {
        Ok(n) => n,
        Err(c) => return c,
    };
    if index < 0.0 || index >= units.len() as f64 {
        return Completion::Normal(Value::Atom(atom::K_EMPTY));
    }
    let unit = [units[index as usize]];
    Completion::Normal(Value::String(vm.heap.new_string_units(&unit)))
}

fn char_code_at(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let index = match index_arg(vm, args, 0, 0.0) {
        Ok(n) => n,
        Err(c) => return c,
    };
    if index < 0.0 || index >= units.len() as f64 {
        return Completion::Normal(Value::F64(f64::NAN));
    }
    Completion::Normal(Value::U32(units[index as usize] as u32))
}

fn find_in(haystack: &[u16], needle: &[u16], from: usize) -> u32 {
    if from > haystack.len() {
        return NPOS;
    }
    if needle.is_empty() {
        return from as u32;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map_or(NPOS, |p| (p + from) as u32)
}

fn index_of(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let needle = arg_units!(vm, args, 0);
    let from = match index_arg(vm, args, 1, 0.0) {
        Ok(n) => n.max(0.0) as usize,
        Err(c) => return c,
    };
    let at = find_in(&units, &needle, from);
    Completion::Normal(if at == NPOS {
        Value::I32(-1)
    } else {
        Value::U32(at)
    })
}

fn last_index_of(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let needle = arg_units!(vm, args, 0);
    if needle.is_empty() {
        return Completion::Normal(Value::U32(units.len() as u32));
    }
    let at = units
        .windows(needle.len())
        .rposition(|w| w == needle)
        .map_or(-1i64, |p| p as i64);
    Completion::Normal(Value::F64(at as f64))
}

fn includes(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let needle = arg_units!(vm, args, 0);
    Completion::Normal(Value::Bool(find_in(&units, &needle, 0) != NPOS))
}

fn starts_with(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let needle = arg_units!(vm, args, 0);
    Completion::Normal(Value::Bool(units.starts_with(&needle)))
}

fn ends_with(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let needle = arg_units!(vm, args, 0);
    Completion::Normal(Value::Bool(units.ends_with(&needle)))
}

fn slice(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let len = units.len() as f64;
    let start = match index_arg(vm, args, 0, 0.0) {
        Ok(n) => n,
        Err(c) => return c,
    };
    let end = match index_arg(vm, args, 1, len) {
        Ok(n) => n,
        Err(c) => return c,
    };
    let from = if start < 0.0 { (len + start).max(0.0) } else { start.min(len) };
    let to = if end < 0.0 { (len + end).max(0.0) } else { end.min(len) };
    let to = to.max(from);
    let out = units[from as usize..to as usize].to_vec();
    Completion::Normal(Value::String(vm.heap.new_string(out)))
}

fn substring(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let len = units.len() as f64;
    let a = match index_arg(vm, args, 0, 0.0) {
        Ok(n) => n.clamp(0.0, len),
        Err(c) => return c,
    };
    let b = match index_arg(vm, args, 1, len) {
        Ok(n) => n.clamp(0.0, len),
        Err(c) => return c,
    };
    let (from, to) = if a <= b { (a, b) } else { (b, a) };
    let out = units[from as usize..to as usize].to_vec();
    Completion::Normal(Value::String(vm.heap.new_string(out)))
}

fn trim(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let is_space = |u: &u16| {
        matches!(*u, 0x09 | 0x0a | 0x0b | 0x0c | 0x0d | 0x20 | 0xa0 | 0xfeff)
    };
    let start = units.iter().position(|u| !is_space(u)).unwrap_or(units.len());
    let end = units.iter().rposition(|u| !is_space(u)).map_or(start, |p| p + 1);
    let out = units[start..end].to_vec();
    Completion::Normal(Value::String(vm.heap.new_string(out)))
}

fn split(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let separator = arg(args, 0);
    if separator.is_undefined() {
        let whole = vm.heap.new_string(units);
        let array = vm.new_array_from(&[Value::String(whole)]);
        return Completion::Normal(Value::Object(array));
    }
    let sep_units = arg_units!(vm, args, 0);
    let mut parts: Vec<Vec<u16>> = Vec::new();
    if sep_units.is_empty() {
        for unit in &units {
            parts.push(vec![*unit]);
        }
    } else {
        let mut from = 0usize;
        loop {
            let at = find_in(&units, &sep_units, from);
            if at == NPOS {
                parts.push(units[from..].to_vec());
                break;
            }
            parts.push(units[from..at as usize].to_vec());
            from = at as usize + sep_units.len();
        }
    }
    // Allocate the strings into a rooted output array one by one.
    let array = vm.new_array_from(&[]);
    vm.heap.push_temp_root(Value::Object(array));
    for part in parts {
        let s = Value::String(vm.heap.new_string(part));
        let array = vm.heap.temp_root(0).as_object().unwrap();
        vm.heap.write_barrier(array, s);
        array.as_mut().as_array_mut().unwrap().push(s);
    }
    let array = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    Completion::Normal(array)
}

fn repeat(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let count = match to_number(vm, arg(args, 0)) {
        Ok(n) if n >= 0.0 && n.is_finite() => n.trunc() as usize,
        Ok(_) => {
            return Completion::Throw(vm.build_error_value(
                crate::error::ErrorKind::RangeError,
                "Invalid count value",
            ));
        }
        Err(err) => return Completion::Throw(err.value()),
    };
    let mut out = Vec::with_capacity(units.len() * count);
    for _ in 0..count {
        out.extend_from_slice(&units);
    }
    Completion::Normal(Value::String(vm.heap.new_string(out)))
}

/// First-occurrence string replacement; pattern regexps and `$` patterns
/// stay with the regexp surface.
fn replace(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    let pattern = arg_units!(vm, args, 0);
    let replacement = arg_units!(vm, args, 1);
    let at = find_in(&units, &pattern, 0);
    if at == NPOS {
        return Completion::Normal(Value::String(vm.heap.new_string(units)));
    }
    let mut out =
        Vec::with_capacity(units.len() - pattern.len() + replacement.len());
    out.extend_from_slice(&units[..at as usize]);
    out.extend_from_slice(&replacement);
    out.extend_from_slice(&units[at as usize + pattern.len()..]);
    Completion::Normal(Value::String(vm.heap.new_string(out)))
}

fn to_upper_case(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut units = receiver_units!(vm, this);
    for unit in units.iter_mut() {
        if (b'a' as u16..=b'z' as u16).contains(unit) {
            *unit -= 32;
        }
    }
    Completion::Normal(Value::String(vm.heap.new_string(units)))
}

fn to_lower_case(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut units = receiver_units!(vm, this);
    for unit in units.iter_mut() {
        if (b'A' as u16..=b'Z' as u16).contains(unit) {
            *unit += 32;
        }
    }
    Completion::Normal(Value::String(vm.heap.new_string(units)))
}

fn concat(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut units = receiver_units!(vm, this);
    for i in 0..args.len() {
        let more = arg_units!(vm, args, i);
        units.extend_from_slice(&more);
    }
    Completion::Normal(Value::String(vm.heap.new_string(units)))
}

fn to_string_method(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let units = receiver_units!(vm, this);
    Completion::Normal(Value::String(vm.heap.new_string(units)))
}

fn iterator(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if !this.is_string() && this.class() != Some(ClassTag::StringObject) {
        return Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "String iterator requires a string receiver",
        ));
    }
    let proto = vm.protos.string_iterator;
    let iterator = vm.heap.new_object_payload(JsObject::with_extra(
        ClassTag::StringIterator,
        proto,
        ObjectExtra::StringIter(Box::new(StringIterData {
            target: this,
            index: 0,
        })),
    ));
    Completion::Normal(Value::Object(iterator))
}
