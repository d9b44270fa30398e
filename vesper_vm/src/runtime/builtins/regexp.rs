// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `RegExp` constructor and `RegExp.prototype.test/exec/toString`.
//! Pattern execution is the black-box backend; `matchAll`, `search` and
//! `split` remain the upstream stubs.

use crate::atom;
use crate::conversion::{to_number, to_string_value};
use crate::error::ErrorKind;
use crate::object::regexp::{
    FLAG_GLOBAL, FLAG_STICKY, RegExpData, flags_to_string, parse_flags,
    re_compile, re_exec,
};
use crate::object::{ClassTag, JsObject, ObjectExtra, PropFlags, PropertyKey};
use crate::runtime::{add_method, arg, this_string_units};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.regexp;
    add_method(vm, proto, "test", 1, regexp_test);
    let proto = vm.protos.regexp;
    add_method(vm, proto, "exec", 1, regexp_exec);
    let proto = vm.protos.regexp;
    add_method(vm, proto, "toString", 0, regexp_to_string);
    for stub in ["matchAll", "search", "split"] {
        let proto = vm.protos.regexp;
        add_method(vm, proto, stub, 1, unimplemented_stub);
    }

    let proto = vm.protos.regexp;
    crate::runtime::add_constructor(vm, "RegExp", 2, constructor, 0, proto);
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let pattern = match to_string_value(vm, arg(args, 0)) {
        Ok(text) => {
            crate::conversion::string_value_units(vm, &text).into_owned()
        }
        Err(err) => return Completion::Throw(err.value()),
    };
    let flag_text = match arg(args, 1) {
        Value::Undefined => Vec::new(),
        other => match to_string_value(vm, other) {
            Ok(text) => {
                crate::conversion::string_value_units(vm, &text).into_owned()
            }
            Err(err) => return Completion::Throw(err.value()),
        },
    };
    let flag_bits = match parse_flags(&flag_text) {
        Ok(bits) => bits,
        Err(message) => {
            return Completion::Throw(
                vm.build_error_value(ErrorKind::SyntaxError, &message),
            );
        }
    };
    let compiled = match re_compile(&pattern, flag_bits) {
        Ok(compiled) => compiled,
        Err(message) => {
            return Completion::Throw(vm.build_error_value(
                ErrorKind::SyntaxError,
                &format!("Invalid regular expression: {message}"),
            ));
        }
    };
    let source_atom = vm.atoms.atomize_no_uint(&pattern);
    let proto = vm.protos.regexp;
    let regexp = vm.heap.new_object_payload(JsObject::with_extra(
        ClassTag::RegExp,
        proto,
        ObjectExtra::RegExp(Box::new(RegExpData {
            source: Value::Atom(source_atom),
            compiled,
        })),
    ));
    vm.define_prop(
        regexp,
        PropertyKey::Atom(atom::K_LAST_INDEX),
        Value::U32(0),
        PropFlags::WRITABLE,
    );
    Completion::Normal(Value::Object(regexp))
}

fn receiver_regexp(
    vm: &mut Vm,
    this: Value,
) -> Result<crate::heap::GcRef<JsObject>, Completion> {
    match this.as_object() {
        Some(obj) if obj.as_ref().class() == ClassTag::RegExp => Ok(obj),
        _ => Err(Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Receiver is not a RegExp",
        ))),
    }
}

fn read_last_index(vm: &mut Vm, this: Value) -> Result<u32, Completion> {
    match vm.get_prop_atom_value(this, atom::K_LAST_INDEX) {
        Ok(v) => match to_number(vm, v) {
            Ok(n) if n.is_finite() && n >= 0.0 => Ok(n as u32),
            Ok(_) => Ok(0),
            Err(err) => Err(Completion::Throw(err.value())),
        },
        Err(err) => Err(Completion::Throw(err.value())),
    }
}

fn write_last_index(vm: &mut Vm, this: Value, value: u32) {
    let _ = vm.set_prop(
        this,
        PropertyKey::Atom(atom::K_LAST_INDEX),
        Value::U32(value),
    );
}

/// Shared match driver honoring the `g`/`y` lastIndex protocol. Returns
/// the capture spans, or `None` on a miss.
fn run_match(
    vm: &mut Vm,
    this: Value,
    args: &[Value],
) -> Result<Option<crate::object::regexp::ReMatch>, Completion> {
    let regexp = receiver_regexp(vm, this)?;
    let flag_bits = regexp.as_ref().as_regexp().unwrap().compiled.flag_bits;
    let tracks_last_index = flag_bits & (FLAG_GLOBAL | FLAG_STICKY) != 0;
    let start = if tracks_last_index { read_last_index(vm, this)? } else { 0 };
    let text = match this_string_units(vm, arg(args, 0)) {
        Ok(units) => units,
        Err(err) => return Err(Completion::Throw(err.value())),
    };
    if start as usize > text.len() {
        if tracks_last_index {
            let this = vm.current_this();
            write_last_index(vm, this, 0);
        }
        return Ok(None);
    }
    // The subject coercion may have collected; re-read the receiver.
    let this = vm.current_this();
    let regexp = receiver_regexp(vm, this)?;
    let found = {
        let data = regexp.as_ref().as_regexp().unwrap();
        re_exec(&data.compiled, &text, start)
    };
    if tracks_last_index {
        let this = vm.current_this();
        match &found {
            Some(m) => {
                let end = m.groups[0].map_or(0, |(_, end)| end);
                write_last_index(vm, this, end);
            }
            None => write_last_index(vm, this, 0),
        }
    }
    Ok(found)
}

fn regexp_test(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match run_match(vm, this, args) {
        Ok(found) => Completion::Normal(Value::Bool(found.is_some())),
        Err(completion) => completion,
    }
}

/// `exec`: `null` on a miss; on a hit, an array of the capture texts with
/// `index` and `input` properties.
fn regexp_exec(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let found = match run_match(vm, this, args) {
        Ok(Some(found)) => found,
        Ok(None) => return Completion::Normal(Value::Null),
        Err(completion) => return completion,
    };
    let text = match this_string_units(vm, arg(args, 0)) {
        Ok(units) => units,
        Err(err) => return Completion::Throw(err.value()),
    };

    let output = vm.new_array_from(&[]);
    vm.heap.push_temp_root(Value::Object(output));
    for span in &found.groups {
        let value = match span {
            Some((from, to)) => {
                let slice = text[*from as usize..*to as usize].to_vec();
                Value::String(vm.heap.new_string(slice))
            }
            None => Value::Undefined,
        };
        let output = vm.heap.temp_root(0).as_object().unwrap();
        vm.heap.write_barrier(output, value);
        output.as_mut().as_array_mut().unwrap().push(value);
    }
    let match_start = found.groups[0].map_or(0, |(from, _)| from);
    let index_key = vm.atoms.atomize_str("index");
    let output_obj = vm.heap.temp_root(0).as_object().unwrap();
    vm.define_prop(
        output_obj,
        PropertyKey::Atom(index_key),
        Value::U32(match_start),
        PropFlags::ECW,
    );
    let input = Value::String(vm.heap.new_string(text));
    let input_key = vm.atoms.atomize_str("input");
    let output_obj = vm.heap.temp_root(0).as_object().unwrap();
    vm.define_prop(
        output_obj,
        PropertyKey::Atom(input_key),
        input,
        PropFlags::ECW,
    );
    let output = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    Completion::Normal(output)
}

fn regexp_to_string(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let regexp = match receiver_regexp(vm, this) {
        Ok(regexp) => regexp,
        Err(completion) => return completion,
    };
    let (source, flag_bits) = {
        let data = regexp.as_ref().as_regexp().unwrap();
        (data.source, data.compiled.flag_bits)
    };
    let source_text = match source {
        Value::Atom(a) => vm.atoms.atom_utf8(a),
        Value::String(s) => s.as_ref().to_utf8(),
        _ => String::new(),
    };
    let text = format!("/{}/{}", source_text, flags_to_string(flag_bits));
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}

fn unimplemented_stub(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Throw(vm.build_error_value(
        ErrorKind::InternalError,
        "This RegExp method is not implemented",
    ))
}
