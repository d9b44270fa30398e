// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Object` constructor, its statics, and `Object.prototype`.

use crate::atom;
use crate::conversion::to_boolean;
use crate::error::ErrorKind;
use crate::object::{
    ClassTag, JsObject, PropData, PropFlags, Property, PropertyKey,
};
use crate::runtime::{add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.object;
    add_method(vm, proto, "toString", 0, proto_to_string);
    let proto = vm.protos.object;
    add_method(vm, proto, "valueOf", 0, proto_value_of);
    let proto = vm.protos.object;
    add_method(vm, proto, "hasOwnProperty", 1, has_own_property);
    let proto = vm.protos.object;
    add_method(vm, proto, "isPrototypeOf", 1, is_prototype_of);

    let proto = vm.protos.object;
    let ctor =
        crate::runtime::add_constructor(vm, "Object", 1, constructor, 0, proto);
    add_method(vm, ctor, "create", 2, object_create);
    add_method(vm, ctor, "keys", 1, object_keys);
    add_method(vm, ctor, "values", 1, object_values);
    add_method(vm, ctor, "entries", 1, object_entries);
    add_method(vm, ctor, "getPrototypeOf", 1, get_prototype_of);
    add_method(vm, ctor, "setPrototypeOf", 2, set_prototype_of);
    add_method(vm, ctor, "defineProperty", 3, define_property);
    add_method(vm, ctor, "freeze", 1, object_freeze);
    add_method(vm, ctor, "preventExtensions", 1, prevent_extensions);
    add_method(vm, ctor, "isExtensible", 1, is_extensible);
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let value = arg(args, 0);
    if value.is_object() {
        return Completion::Normal(value);
    }
    Completion::Normal(Value::Object(vm.new_plain_object()))
}

fn proto_to_string(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let class = this.class().unwrap_or(ClassTag::Object);
    let text = format!("[object {}]", class.name());
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}

fn proto_value_of(
    _vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(this)
}

fn has_own_property(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let key = match vm.to_property_key(arg(args, 0)) {
        Ok(key) => key,
        Err(err) => return Completion::Throw(err.value()),
    };
    // Key coercion may have collected; re-read the receiver.
    let this = vm.current_this();
    Completion::Normal(Value::Bool(vm.has_own_prop(this, key)))
}

fn is_prototype_of(
    _vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let Some(target) = arg(args, 0).as_object() else {
        return Completion::Normal(Value::Bool(false));
    };
    let Some(this_obj) = this.as_object() else {
        return Completion::Normal(Value::Bool(false));
    };
    let mut cursor = target.as_ref().prototype();
    while let Value::Object(parent) = cursor {
        if parent.same(this_obj) {
            return Completion::Normal(Value::Bool(true));
        }
        cursor = parent.as_ref().prototype();
    }
    Completion::Normal(Value::Bool(false))
}

fn object_create(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let proto = arg(args, 0);
    if !proto.is_object() && !proto.is_null() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Object prototype may only be an Object or null",
        ));
    }
    let object =
        vm.heap.new_object_payload(JsObject::new(ClassTag::Object, proto));
    Completion::Normal(Value::Object(object))
}

/// Enumerable own string-keyed property names, in insertion order.
fn enumerable_keys(target: Value) -> Vec<PropertyKey> {
    let Some(obj) = target.as_object() else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    if let Some(array) = obj.as_ref().as_array() {
        for i in 0..array.len() {
            if !array.is_hole(i) {
                keys.push(PropertyKey::Atom(crate::atom::int_atom(i)));
            }
        }
    }
    for (key, prop) in obj.as_ref().own_entries() {
        if !key.is_symbol() && prop.flags.is_enumerable() {
            keys.push(key);
        }
    }
    keys
}

fn object_keys(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let keys = enumerable_keys(arg(args, 0));
    let values: Vec<Value> =
        keys.iter().map(|k| Value::Atom(k.atom())).collect();
    let array = vm.new_array_from(&values);
    Completion::Normal(Value::Object(array))
}

fn object_values(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    collect_entries(vm, args, false)
}

fn object_entries(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    collect_entries(vm, args, true)
}

fn collect_entries(vm: &mut Vm, args: &[Value], pairs: bool) -> Completion {
    let keys = enumerable_keys(arg(args, 0));
    // Accumulate into a rooted array so getter-triggered collections keep
    // everything alive.
    let result = vm.new_array_from(&[]);
    vm.heap.push_temp_root(Value::Object(result));
    for key in keys {
        let target = arg(args, 0);
        let value = match vm.get_prop(target, key) {
            Ok(value) => value,
            Err(err) => {
                vm.heap.pop_temp_roots(1);
                return Completion::Throw(err.value());
            }
        };
        let element = if pairs {
            vm.heap.push_temp_root(value);
            let pair = vm.new_array_from(&[Value::Atom(key.atom()), Value::Undefined]);
            let value = vm.heap.temp_root(0);
            vm.heap.pop_temp_roots(1);
            vm.heap.write_barrier(pair, value);
            pair.as_mut().as_array_mut().unwrap().set(1, value);
            Value::Object(pair)
        } else {
            value
        };
        let result = vm.heap.temp_root(0).as_object().unwrap();
        vm.heap.write_barrier(result, element);
        result.as_mut().as_array_mut().unwrap().push(element);
    }
    let result = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    Completion::Normal(result)
}

fn get_prototype_of(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(vm.proto_of_value(arg(args, 0)))
}

fn set_prototype_of(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let target = arg(args, 0);
    let proto = arg(args, 1);
    if let Some(obj) = target.as_object() {
        if proto.is_object() || proto.is_null() {
            vm.heap.write_barrier(obj, proto);
            obj.as_mut().set_prototype(proto);
        }
    }
    Completion::Normal(target)
}

/// `Object.defineProperty(target, key, descriptor)`.
fn define_property(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if arg(args, 0).as_object().is_none() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Object.defineProperty called on non-object",
        ));
    }
    let key = match vm.to_property_key(arg(args, 1)) {
        Ok(key) => key,
        Err(err) => return Completion::Throw(err.value()),
    };
    let descriptor = arg(args, 2);
    if !descriptor.is_object() {
        return Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Property description must be an object",
        ));
    }

    let read = |vm: &mut Vm, name: u32| -> Result<Value, Completion> {
        let descriptor = arg(args, 2);
        vm.get_prop_atom_value(descriptor, name)
            .map_err(|err| Completion::Throw(err.value()))
    };
    let mut flags = PropFlags::NONE;
    match read(vm, atom::K_ENUMERABLE) {
        Ok(v) if to_boolean(v) => flags = flags.with(PropFlags::ENUMERABLE),
        Ok(_) => {}
        Err(c) => return c,
    }
    match read(vm, atom::K_CONFIGURABLE) {
        Ok(v) if to_boolean(v) => flags = flags.with(PropFlags::CONFIGURABLE),
        Ok(_) => {}
        Err(c) => return c,
    }
    match read(vm, atom::K_WRITABLE) {
        Ok(v) if to_boolean(v) => flags = flags.with(PropFlags::WRITABLE),
        Ok(_) => {}
        Err(c) => return c,
    }
    let getter = match read(vm, atom::K_GET) {
        Ok(v) => v,
        Err(c) => return c,
    };
    let setter = match read(vm, atom::K_SET) {
        Ok(v) => v,
        Err(c) => return c,
    };

    let target = arg(args, 0).as_object().unwrap();
    if getter.is_function() || setter.is_function() {
        vm.define_accessor(target, key, getter, setter, flags);
    } else {
        let value = match read(vm, atom::K_VALUE) {
            Ok(v) => v,
            Err(c) => return c,
        };
        let target = arg(args, 0).as_object().unwrap();
        vm.heap.write_barrier(target, value);
        target
            .as_mut()
            .set_own(key, Property { flags, data: PropData::Value(value) });
    }
    Completion::Normal(arg(args, 0))
}

fn object_freeze(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if let Some(obj) = arg(args, 0).as_object() {
        obj.as_mut().prevent_extensions();
        obj.as_mut().harden_all_props();
    }
    Completion::Normal(arg(args, 0))
}

fn prevent_extensions(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if let Some(obj) = arg(args, 0).as_object() {
        obj.as_mut().prevent_extensions();
    }
    Completion::Normal(arg(args, 0))
}

fn is_extensible(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let extensible = arg(args, 0)
        .as_object()
        .is_some_and(|obj| obj.as_ref().is_extensible());
    Completion::Normal(Value::Bool(extensible))
}
