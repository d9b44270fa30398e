// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime setup: wire the prototype graph, build the global object, and
//! register every native builtin. Runs once, from `Vm::new`.

pub mod builtins;

use crate::atom;
use crate::bytecode::NativeFn;
use crate::error::{ErrorKind, JsResult};
use crate::object::{ClassTag, JsObject, PropFlags, PropertyKey};
use crate::value::Value;
use crate::vm::Vm;
use crate::vm::promise_ops::{async_on_settled_native, promise_settle_native};

pub(crate) fn setup(vm: &mut Vm) {
    // The prototype graph first; everything else hangs off it. Each freshly
    // allocated prototype is stored into its root slot immediately, so the
    // next allocation's possible collection keeps it alive and updated.
    vm.protos.object = alloc_proto(vm, Value::Null);
    let root = vm.protos.object;
    vm.protos.function = alloc_proto(vm, root);
    vm.protos.array = alloc_proto(vm, vm.protos.object);
    vm.protos.number = alloc_proto(vm, vm.protos.object);
    vm.protos.string = alloc_proto(vm, vm.protos.object);
    vm.protos.boolean = alloc_proto(vm, vm.protos.object);
    vm.protos.promise = alloc_proto(vm, vm.protos.object);
    vm.protos.iterator = alloc_proto(vm, vm.protos.object);
    vm.protos.generator = alloc_proto(vm, vm.protos.iterator);
    vm.protos.array_iterator = alloc_proto(vm, vm.protos.iterator);
    vm.protos.string_iterator = alloc_proto(vm, vm.protos.iterator);
    vm.protos.regexp = alloc_proto(vm, vm.protos.object);
    vm.protos.date = alloc_proto(vm, vm.protos.object);
    // Error prototypes: `Error.prototype` first, the derived kinds chain to
    // it.
    vm.protos.errors[ErrorKind::Error as usize] =
        alloc_proto(vm, vm.protos.object);
    for kind in ErrorKind::ALL {
        if kind != ErrorKind::Error {
            vm.protos.errors[kind as usize] =
                alloc_proto(vm, vm.protos.errors[ErrorKind::Error as usize]);
        }
    }

    let global = alloc_proto(vm, vm.protos.object);
    vm.global_object = global;

    // Shared native entry points the interpreter instantiates directly.
    vm.natives.promise_resolve_meta =
        vm.register_native_meta("resolve", 1, promise_settle_native, 0);
    vm.natives.promise_reject_meta =
        vm.register_native_meta("reject", 1, promise_settle_native, 1);
    vm.natives.async_on_fulfilled_meta =
        vm.register_native_meta("", 1, async_on_settled_native, 0);
    vm.natives.async_on_rejected_meta =
        vm.register_native_meta("", 1, async_on_settled_native, 1);

    builtins::global::install(vm);
    builtins::object::install(vm);
    builtins::function::install(vm);
    builtins::array::install(vm);
    builtins::string::install(vm);
    builtins::number::install(vm);
    builtins::boolean::install(vm);
    builtins::error::install(vm);
    builtins::promise::install(vm);
    builtins::iterator::install(vm);
    builtins::generator::install(vm);
    builtins::regexp::install(vm);
    builtins::date::install(vm);
    builtins::math::install(vm);
    builtins::json::install(vm);

    // The top-level script runs as an ordinary function call.
    let entry = vm.entry_meta();
    let global_func = vm.new_function_object(entry);
    vm.global_func = Value::Object(global_func);
}

fn alloc_proto(vm: &mut Vm, proto: Value) -> Value {
    Value::Object(
        vm.heap.new_object_payload(JsObject::new(ClassTag::Object, proto)),
    )
}

// ---------------------------------------------------------------------
// Registration helpers, shared by the builtin modules
// ---------------------------------------------------------------------

/// Attach a native method to `target` as a writable, configurable
/// property.
pub(crate) fn add_method(
    vm: &mut Vm,
    target: Value,
    name: &str,
    param_count: u16,
    func: NativeFn,
) {
    add_method_magic(vm, target, name, param_count, func, 0);
}

pub(crate) fn add_method_magic(
    vm: &mut Vm,
    target: Value,
    name: &str,
    param_count: u16,
    func: NativeFn,
    magic: u32,
) {
    let meta = vm.register_native_meta(name, param_count, func, magic);
    vm.heap.push_temp_root(target);
    let method = vm.new_function_object(meta);
    let target = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    let key = PropertyKey::Atom(vm.atoms.atomize_str(name));
    vm.define_prop(
        target.as_object().unwrap(),
        key,
        Value::Object(method),
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
}

/// Attach a native method under a symbol key (`@@iterator`).
pub(crate) fn add_symbol_method(
    vm: &mut Vm,
    target: Value,
    symbol: u32,
    name: &str,
    func: NativeFn,
) {
    let meta = vm.register_native_meta(name, 0, func, 0);
    vm.heap.push_temp_root(target);
    let method = vm.new_function_object(meta);
    let target = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    vm.define_prop(
        target.as_object().unwrap(),
        PropertyKey::Symbol(symbol),
        Value::Object(method),
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
}

/// Attach a plain data property.
pub(crate) fn add_data(
    vm: &mut Vm,
    target: Value,
    name: &str,
    value: Value,
    flags: PropFlags,
) {
    let key = PropertyKey::Atom(vm.atoms.atomize_str(name));
    vm.define_prop(target.as_object().unwrap(), key, value, flags);
}

/// Build a constructor function, link `ctor.prototype` and
/// `proto.constructor`, and install the constructor on the global object.
pub(crate) fn add_constructor(
    vm: &mut Vm,
    name: &str,
    param_count: u16,
    func: NativeFn,
    magic: u32,
    proto: Value,
) -> Value {
    let meta = vm.register_native_meta(name, param_count, func, magic);
    vm.heap.push_temp_root(proto);
    let ctor = Value::Object(vm.new_function_object(meta));
    let proto = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    vm.define_prop(
        ctor.as_object().unwrap(),
        PropertyKey::Atom(atom::K_PROTOTYPE),
        proto,
        PropFlags::NONE,
    );
    if let Some(proto_obj) = proto.as_object() {
        vm.define_prop(
            proto_obj,
            PropertyKey::Atom(atom::K_CONSTRUCTOR),
            ctor,
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
    }
    let global = vm.global_object;
    add_data(
        vm,
        global,
        name,
        ctor,
        PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
    );
    ctor
}

/// `arguments.get(i)`, absent arguments reading as `undefined`.
pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or(Value::Undefined)
}

/// Coerce `this` to the dense array it must be, or throw.
pub(crate) fn this_array(
    vm: &mut Vm,
    this: Value,
) -> JsResult<crate::heap::GcRef<JsObject>> {
    match this.as_object() {
        Some(obj) if obj.as_ref().class() == ClassTag::Array => Ok(obj),
        _ => Err(vm.throw_error(
            ErrorKind::TypeError,
            "Receiver is not an array",
        )),
    }
}

/// `this` as string text, unwrapping String objects and coercing the rest.
pub(crate) fn this_string_units(vm: &mut Vm, this: Value) -> JsResult<Vec<u16>> {
    use crate::conversion::{string_value_units, to_string_value};
    use crate::object::ObjectExtra;
    if let Some(obj) = this.as_object() {
        if obj.as_ref().class() == ClassTag::StringObject {
            if let ObjectExtra::Primitive { value } = obj.as_ref().extra {
                return Ok(string_value_units(vm, &value).into_owned());
            }
        }
    }
    let text = to_string_value(vm, this)?;
    Ok(string_value_units(vm, &text).into_owned())
}

/// `this` as a number, unwrapping Number objects.
pub(crate) fn this_number(vm: &mut Vm, this: Value) -> JsResult<f64> {
    use crate::object::ObjectExtra;
    if this.is_number() {
        return Ok(this.number());
    }
    if let Some(obj) = this.as_object() {
        if obj.as_ref().class() == ClassTag::NumberObject {
            if let ObjectExtra::Primitive { value } = obj.as_ref().extra {
                if value.is_number() {
                    return Ok(value.number());
                }
            }
        }
    }
    Err(vm.throw_error(ErrorKind::TypeError, "Not a number or Number object"))
}

/// `this` as a boolean, unwrapping Boolean objects.
pub(crate) fn this_boolean(vm: &mut Vm, this: Value) -> JsResult<bool> {
    use crate::object::ObjectExtra;
    if let Value::Bool(b) = this {
        return Ok(b);
    }
    if let Some(obj) = this.as_object() {
        if obj.as_ref().class() == ClassTag::BooleanObject {
            if let ObjectExtra::Primitive { value } = obj.as_ref().extra {
                if let Value::Bool(b) = value {
                    return Ok(b);
                }
            }
        }
    }
    Err(vm.throw_error(
        ErrorKind::TypeError,
        "Not a Boolean or Boolean object",
    ))
}
