// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `JSON.stringify` over plain data graphs. `JSON.parse` needs the parser
//! and is not part of this runtime.

use crate::conversion::f64_to_js_string;
use crate::error::ErrorKind;
use crate::object::{ClassTag, PropFlags};
use crate::runtime::{add_data, add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let json = Value::Object(vm.new_plain_object());
    let global = vm.global_object;
    add_data(
        vm,
        global,
        "JSON",
        json,
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
    add_method(vm, json, "stringify", 3, stringify);
}

fn stringify(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut out = String::new();
    match write_value(vm, arg(args, 0), &mut out, 0) {
        Ok(true) => {
            Completion::Normal(Value::String(vm.heap.new_string_utf8(&out)))
        }
        Ok(false) => Completion::Normal(Value::Undefined),
        Err(completion) => completion,
    }
}

/// Serialize one value; `false` means the value is not representable
/// (functions, undefined) and the caller drops it.
fn write_value(
    vm: &mut Vm,
    value: Value,
    out: &mut String,
    depth: u32,
) -> Result<bool, Completion> {
    if depth > 64 {
        return Err(Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Converting circular structure to JSON",
        )));
    }
    match value {
        Value::Null => {
            out.push_str("null");
            Ok(true)
        }
        Value::Bool(b) => {
            out.push_str(if b { "true" } else { "false" });
            Ok(true)
        }
        Value::U32(_) | Value::I32(_) | Value::F64(_) => {
            let n = value.number();
            if n.is_finite() {
                out.push_str(&f64_to_js_string(n));
            } else {
                out.push_str("null");
            }
            Ok(true)
        }
        Value::Atom(_) | Value::String(_) => {
            let units =
                crate::conversion::string_value_units(vm, &value).into_owned();
            write_json_string(&units, out);
            Ok(true)
        }
        Value::Object(obj) => match obj.as_ref().class() {
            class if class.is_callable() => Ok(false),
            ClassTag::Array => {
                out.push('[');
                let len = obj.as_ref().as_array().map_or(0, |a| a.len());
                // Serializing an element may collect; re-resolve the array
                // through the rooted value each round.
                vm.heap.push_temp_root(value);
                for i in 0..len {
                    if i > 0 {
                        out.push(',');
                    }
                    let array = vm.heap.temp_root(0).as_object().unwrap();
                    let element = array
                        .as_ref()
                        .as_array()
                        .map_or(Value::Null, |a| a.get(i));
                    match write_value(vm, element, out, depth + 1) {
                        Ok(true) => {}
                        Ok(false) => out.push_str("null"),
                        Err(completion) => {
                            vm.heap.pop_temp_roots(1);
                            return Err(completion);
                        }
                    }
                }
                vm.heap.pop_temp_roots(1);
                out.push(']');
                Ok(true)
            }
            _ => {
                out.push('{');
                let keys: Vec<_> = obj
                    .as_ref()
                    .own_entries()
                    .filter(|(key, prop)| {
                        !key.is_symbol() && prop.flags.is_enumerable()
                    })
                    .map(|(key, _)| key)
                    .collect();
                let mut first = true;
                vm.heap.push_temp_root(value);
                for key in keys {
                    let value = vm.heap.temp_root(0);
                    let member = match vm.get_prop(value, key) {
                        Ok(member) => member,
                        Err(err) => {
                            vm.heap.pop_temp_roots(1);
                            return Err(Completion::Throw(err.value()));
                        }
                    };
                    let mut piece = String::new();
                    match write_value(vm, member, &mut piece, depth + 1) {
                        Ok(true) => {
                            if !first {
                                out.push(',');
                            }
                            first = false;
                            let name = vm.atoms.atom_text(key.atom());
                            write_json_string(&name, out);
                            out.push(':');
                            out.push_str(&piece);
                        }
                        Ok(false) => {}
                        Err(completion) => {
                            vm.heap.pop_temp_roots(1);
                            return Err(completion);
                        }
                    }
                }
                vm.heap.pop_temp_roots(1);
                out.push('}');
                Ok(true)
            }
        },
        _ => Ok(false),
    }
}

fn write_json_string(units: &[u16], out: &mut String) {
    out.push('"');
    for &unit in units {
        match unit {
            0x22 => out.push_str("\\\""),
            0x5c => out.push_str("\\\\"),
            0x08 => out.push_str("\\b"),
            0x0c => out.push_str("\\f"),
            0x0a => out.push_str("\\n"),
            0x0d => out.push_str("\\r"),
            0x09 => out.push_str("\\t"),
            u if u < 0x20 => out.push_str(&format!("\\u{u:04x}")),
            u => match char::from_u32(u as u32) {
                Some(c) => out.push(c),
                None => out.push_str(&format!("\\u{u:04x}")),
            },
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::utf16_of;

    #[test]
    fn json_string_escapes() {
        let mut out = String::new();
        write_json_string(&utf16_of("a\"b\\c\nd"), &mut out);
        assert_eq!(out, "\"a\\\"b\\\\c\\nd\"");
    }
}
