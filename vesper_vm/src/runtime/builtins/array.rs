// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Array` constructor and `Array.prototype`. Everything operates on
//! the dense element vector; callbacks re-read the receiver through the
//! argument span after every call because any of them may move the heap.

use crate::atom;
use crate::conversion::{
    strict_equals, string_value_units, to_number, to_string_value,
};
use crate::object::iterator::{ArrayIterData, IterKind};
use crate::object::{ClassTag, JsObject, ObjectExtra};
use crate::runtime::{add_method, add_symbol_method, arg, this_array};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.array;
    add_method(vm, proto, "push", 1, array_push);
    let proto = vm.protos.array;
    add_method(vm, proto, "pop", 0, array_pop);
    let proto = vm.protos.array;
    add_method(vm, proto, "shift", 0, array_shift);
    let proto = vm.protos.array;
    add_method(vm, proto, "unshift", 1, array_unshift);
    let proto = vm.protos.array;
    add_method(vm, proto, "indexOf", 1, array_index_of);
    let proto = vm.protos.array;
    add_method(vm, proto, "includes", 1, array_includes);
    let proto = vm.protos.array;
    add_method(vm, proto, "join", 1, array_join);
    let proto = vm.protos.array;
    add_method(vm, proto, "toString", 0, array_to_string);
    let proto = vm.protos.array;
    add_method(vm, proto, "slice", 2, array_slice);
    let proto = vm.protos.array;
    add_method(vm, proto, "concat", 1, array_concat);
    let proto = vm.protos.array;
    add_method(vm, proto, "reverse", 0, array_reverse);
    let proto = vm.protos.array;
    add_method(vm, proto, "forEach", 1, array_for_each);
    let proto = vm.protos.array;
    add_method(vm, proto, "map", 1, array_map);
    let proto = vm.protos.array;
    add_method(vm, proto, "filter", 1, array_filter);
    let proto = vm.protos.array;
    add_method(vm, proto, "reduce", 1, array_reduce);
    let proto = vm.protos.array;
    add_method(vm, proto, "find", 1, array_find);
    let proto = vm.protos.array;
    add_method(vm, proto, "findIndex", 1, array_find_index);
    let proto = vm.protos.array;
    add_method(vm, proto, "some", 1, array_some);
    let proto = vm.protos.array;
    add_method(vm, proto, "every", 1, array_every);
    let proto = vm.protos.array;
    add_method(vm, proto, "keys", 0, array_keys);
    let proto = vm.protos.array;
    add_method(vm, proto, "values", 0, array_values);
    let proto = vm.protos.array;
    add_method(vm, proto, "entries", 0, array_entries);
    let proto = vm.protos.array;
    add_symbol_method(vm, proto, atom::K_SYM_ITERATOR, "values", array_values);

    let proto = vm.protos.array;
    let ctor =
        crate::runtime::add_constructor(vm, "Array", 1, constructor, 0, proto);
    add_method(vm, ctor, "isArray", 1, array_is_array);
    add_method(vm, ctor, "of", 0, array_of);
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    // `Array(n)` presizes with holes; any other argument list is elements.
    if args.len() == 1 && args[0].is_number() {
        let n = args[0].number();
        if n.trunc() != n || !(0.0..=u32::MAX as f64).contains(&n) {
            return Completion::Throw(vm.build_error_value(
                crate::error::ErrorKind::RangeError,
                "Invalid array length",
            ));
        }
        let array = vm.new_array_from(&[]);
        array.as_mut().as_array_mut().unwrap().set_length(n as u32);
        return Completion::Normal(Value::Object(array));
    }
    let array = vm.new_array_from(args);
    Completion::Normal(Value::Object(array))
}

fn array_is_array(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(Value::Bool(
        arg(args, 0).class() == Some(ClassTag::Array),
    ))
}

fn array_of(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(Value::Object(vm.new_array_from(args)))
}

fn array_push(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    for value in args {
        vm.heap.write_barrier(array, *value);
        array.as_mut().as_array_mut().unwrap().push(*value);
    }
    let len = array.as_ref().as_array().unwrap().len();
    Completion::Normal(Value::U32(len))
}

fn array_pop(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_array(vm, this) {
        Ok(array) => {
            Completion::Normal(array.as_mut().as_array_mut().unwrap().pop())
        }
        Err(err) => Completion::Throw(err.value()),
    }
}

fn array_shift(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_array(vm, this) {
        Ok(array) => {
            Completion::Normal(array.as_mut().as_array_mut().unwrap().shift())
        }
        Err(err) => Completion::Throw(err.value()),
    }
}

fn array_unshift(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    for value in args.iter().rev() {
        vm.heap.write_barrier(array, *value);
        array.as_mut().as_array_mut().unwrap().unshift(*value);
    }
    let len = array.as_ref().as_array().unwrap().len();
    Completion::Normal(Value::U32(len))
}

fn array_index_of(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    let needle = arg(args, 0);
    let len = array.as_ref().as_array().unwrap().len();
    for i in 0..len {
        let element = array.as_ref().as_array().unwrap().get(i);
        if strict_equals(vm, element, needle) {
            return Completion::Normal(Value::U32(i));
        }
    }
    Completion::Normal(Value::I32(-1))
}

fn array_includes(
    vm: &mut Vm,
    func: Value,
    this: Value,
    args: &[Value],
    flags: CallFlags,
) -> Completion {
    match array_index_of(vm, func, this, args, flags) {
        Completion::Normal(Value::I32(-1)) => {
            Completion::Normal(Value::Bool(false))
        }
        Completion::Normal(_) => Completion::Normal(Value::Bool(true)),
        other => other,
    }
}

fn array_join(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if this_array(vm, this).is_err() {
        return Completion::Throw(
            vm.build_error_value(
                crate::error::ErrorKind::TypeError,
                "Receiver is not an array",
            ),
        );
    }
    let separator = match arg(args, 0) {
        Value::Undefined => vec![b',' as u16],
        other => match to_string_value(vm, other) {
            Ok(text) => string_value_units(vm, &text).into_owned(),
            Err(err) => return Completion::Throw(err.value()),
        },
    };
    let mut units: Vec<u16> = Vec::new();
    let mut index = 0u32;
    loop {
        // Re-read the receiver every round: the ToString of an element may
        // run arbitrary code.
        let this = vm.current_this();
        let array = match this_array(vm, this) {
            Ok(array) => array,
            Err(err) => return Completion::Throw(err.value()),
        };
        let len = array.as_ref().as_array().unwrap().len();
        if index >= len {
            break;
        }
        if index > 0 {
            units.extend_from_slice(&separator);
        }
        let element = array.as_ref().as_array().unwrap().get(index);
        if !element.is_nil() {
            let text = match to_string_value(vm, element) {
                Ok(text) => text,
                Err(err) => return Completion::Throw(err.value()),
            };
            units.extend_from_slice(&string_value_units(vm, &text));
        }
        index += 1;
    }
    Completion::Normal(Value::String(vm.heap.new_string(units)))
}

fn array_to_string(
    vm: &mut Vm,
    func: Value,
    this: Value,
    _args: &[Value],
    flags: CallFlags,
) -> Completion {
    array_join(vm, func, this, &[], flags)
}

fn normalize_range(len: u32, start: f64, end: f64) -> (u32, u32) {
    let len = len as f64;
    let from = if start < 0.0 { (len + start).max(0.0) } else { start.min(len) };
    let to = if end < 0.0 { (len + end).max(0.0) } else { end.min(len) };
    (from as u32, to.max(from) as u32)
}

fn array_slice(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    let len = array.as_ref().as_array().unwrap().len();
    let start = match to_number(vm, arg(args, 0)) {
        Ok(n) if !n.is_nan() => n.trunc(),
        Ok(_) => 0.0,
        Err(err) => return Completion::Throw(err.value()),
    };
    let end = match arg(args, 1) {
        Value::Undefined => len as f64,
        other => match to_number(vm, other) {
            Ok(n) if !n.is_nan() => n.trunc(),
            Ok(_) => 0.0,
            Err(err) => return Completion::Throw(err.value()),
        },
    };
    let (from, to) = normalize_range(len, start, end);
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    let elements: Vec<Value> = (from..to)
        .map(|i| array.as_ref().as_array().unwrap().get(i))
        .collect();
    Completion::Normal(Value::Object(vm.new_array_from(&elements)))
}

fn array_concat(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    let mut elements: Vec<Value> =
        array.as_ref().as_array().unwrap().elements.clone();
    for value in args {
        match value.as_object() {
            Some(obj) if obj.as_ref().class() == ClassTag::Array => {
                elements
                    .extend_from_slice(&obj.as_ref().as_array().unwrap().elements);
            }
            _ => elements.push(*value),
        }
    }
    Completion::Normal(Value::Object(vm.new_array_from(&elements)))
}

fn array_reverse(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_array(vm, this) {
        Ok(array) => {
            array.as_mut().as_array_mut().unwrap().reverse();
            Completion::Normal(this)
        }
        Err(err) => Completion::Throw(err.value()),
    }
}

/// Shared iteration driver for the callback-based prototype methods. The
/// callback receives `(element, index, array)`.
fn iterate<F>(
    vm: &mut Vm,
    this: Value,
    args: &[Value],
    mut visit: F,
) -> Result<(), Completion>
where
    F: FnMut(&mut Vm, Value, u32) -> Result<bool, Completion>,
{
    if this_array(vm, this).is_err() {
        return Err(Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "Receiver is not an array",
        )));
    }
    let callback = arg(args, 0);
    if !callback.is_function() {
        return Err(Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "Callback is not a function",
        )));
    }
    let mut index = 0u32;
    loop {
        // Re-read the receiver through the frame: the previous round's
        // callback may have collected.
        let this = vm.current_this();
        let array = match this_array(vm, this) {
            Ok(array) => array,
            Err(err) => return Err(Completion::Throw(err.value())),
        };
        let len = array.as_ref().as_array().unwrap().len();
        if index >= len {
            return Ok(());
        }
        let element = array.as_ref().as_array().unwrap().get(index);
        let callback = arg(args, 0);
        let this_arg = arg(args, 1);
        let result = vm.call_with_vec_args(
            callback,
            this_arg,
            Value::Undefined,
            vec![element, Value::U32(index), this],
            CallFlags::default(),
        );
        let result = match result {
            Completion::Normal(value) => value,
            other => return Err(other),
        };
        if !visit(vm, result, index)? {
            return Ok(());
        }
        index += 1;
    }
}

fn array_for_each(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match iterate(vm, this, args, |_, _, _| Ok(true)) {
        Ok(()) => Completion::Normal(Value::Undefined),
        Err(completion) => completion,
    }
}

fn array_map(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let output = vm.new_array_from(&[]);
    vm.heap.push_temp_root(Value::Object(output));
    let outcome = iterate(vm, this, args, |vm, mapped, _| {
        let output = vm.heap.temp_root(0).as_object().unwrap();
        vm.heap.write_barrier(output, mapped);
        output.as_mut().as_array_mut().unwrap().push(mapped);
        Ok(true)
    });
    let output = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    match outcome {
        Ok(()) => Completion::Normal(output),
        Err(completion) => completion,
    }
}

fn array_filter(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let output = vm.new_array_from(&[]);
    vm.heap.push_temp_root(Value::Object(output));
    let outcome = iterate(vm, this, args, |vm, keep, index| {
        if crate::conversion::to_boolean(keep) {
            let this = vm.current_this();
            let array = this_array(vm, this)
                .map_err(|err| Completion::Throw(err.value()))?;
            let element = array.as_ref().as_array().unwrap().get(index);
            let output = vm.heap.temp_root(0).as_object().unwrap();
            vm.heap.write_barrier(output, element);
            output.as_mut().as_array_mut().unwrap().push(element);
        }
        Ok(true)
    });
    let output = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    match outcome {
        Ok(()) => Completion::Normal(output),
        Err(completion) => completion,
    }
}

fn array_reduce(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let array = match this_array(vm, this) {
        Ok(array) => array,
        Err(err) => return Completion::Throw(err.value()),
    };
    let callback = arg(args, 0);
    if !callback.is_function() {
        return Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "Callback is not a function",
        ));
    }
    let len = array.as_ref().as_array().unwrap().len();
    let (mut index, mut has_acc) = (0u32, args.len() > 1);
    let acc = if has_acc { arg(args, 1) } else { Value::Undefined };
    vm.heap.push_temp_root(acc);
    loop {
        let this = vm.current_this();
        let array = match this_array(vm, this) {
            Ok(array) => array,
            Err(err) => {
                vm.heap.pop_temp_roots(1);
                return Completion::Throw(err.value());
            }
        };
        let len_now = array.as_ref().as_array().unwrap().len().min(len);
        if index >= len_now {
            break;
        }
        let element = array.as_ref().as_array().unwrap().get(index);
        if !has_acc {
            // First element seeds the accumulator.
            let at = vm.heap.temp_root_len() - 1;
            vm.heap.set_temp_root(at, element);
            has_acc = true;
            index += 1;
            continue;
        }
        let acc = vm.heap.temp_root(0);
        let callback = arg(args, 0);
        let result = vm.call_with_vec_args(
            callback,
            Value::Undefined,
            Value::Undefined,
            vec![acc, element, Value::U32(index), vm.current_this()],
            CallFlags::default(),
        );
        match result {
            Completion::Normal(value) => {
                let at = vm.heap.temp_root_len() - 1;
                vm.heap.set_temp_root(at, value);
            }
            other => {
                vm.heap.pop_temp_roots(1);
                return other;
            }
        }
        index += 1;
    }
    let acc = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    if !has_acc {
        return Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "Reduce of empty array with no initial value",
        ));
    }
    Completion::Normal(acc)
}

fn array_find(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut found = Value::Undefined;
    let outcome = iterate(vm, this, args, |vm, matched, index| {
        if crate::conversion::to_boolean(matched) {
            let this = vm.current_this();
            let array = this_array(vm, this)
                .map_err(|err| Completion::Throw(err.value()))?;
            found = array.as_ref().as_array().unwrap().get(index);
            return Ok(false);
        }
        Ok(true)
    });
    match outcome {
        Ok(()) => Completion::Normal(found),
        Err(completion) => completion,
    }
}

fn array_find_index(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut found = Value::I32(-1);
    let outcome = iterate(vm, this, args, |_, matched, index| {
        if crate::conversion::to_boolean(matched) {
            found = Value::U32(index);
            return Ok(false);
        }
        Ok(true)
    });
    match outcome {
        Ok(()) => Completion::Normal(found),
        Err(completion) => completion,
    }
}

fn array_some(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut any = false;
    let outcome = iterate(vm, this, args, |_, matched, _| {
        if crate::conversion::to_boolean(matched) {
            any = true;
            return Ok(false);
        }
        Ok(true)
    });
    match outcome {
        Ok(()) => Completion::Normal(Value::Bool(any)),
        Err(completion) => completion,
    }
}

fn array_every(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let mut all = true;
    let outcome = iterate(vm, this, args, |_, matched, _| {
        if !crate::conversion::to_boolean(matched) {
            all = false;
            return Ok(false);
        }
        Ok(true)
    });
    match outcome {
        Ok(()) => Completion::Normal(Value::Bool(all)),
        Err(completion) => completion,
    }
}

fn new_array_iterator(vm: &mut Vm, target: Value, kind: IterKind) -> Completion {
    if target.class() != Some(ClassTag::Array) {
        return Completion::Throw(vm.build_error_value(
            crate::error::ErrorKind::TypeError,
            "Receiver is not an array",
        ));
    }
    let proto = vm.protos.array_iterator;
    let iterator = vm.heap.new_object_payload(JsObject::with_extra(
        ClassTag::ArrayIterator,
        proto,
        ObjectExtra::ArrayIter(Box::new(ArrayIterData {
            target,
            index: 0,
            kind,
        })),
    ));
    Completion::Normal(Value::Object(iterator))
}

fn array_keys(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    new_array_iterator(vm, this, IterKind::Keys)
}

fn array_values(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    new_array_iterator(vm, this, IterKind::Values)
}

fn array_entries(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    new_array_iterator(vm, this, IterKind::Entries)
}
