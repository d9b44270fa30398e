// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The iterator prototypes: the base prototype whose `@@iterator` returns
//! the receiver, plus `next` for the array, string and for-in iterators.

use crate::atom;
use crate::error::ErrorKind;
use crate::object::iterator::IterKind;
use crate::object::{ClassTag, ObjectExtra};
use crate::runtime::{add_method, add_symbol_method};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.iterator;
    add_symbol_method(
        vm,
        proto,
        atom::K_SYM_ITERATOR,
        "[Symbol.iterator]",
        return_self,
    );
    let proto = vm.protos.array_iterator;
    add_method(vm, proto, "next", 0, array_iterator_next);
    let proto = vm.protos.string_iterator;
    add_method(vm, proto, "next", 0, string_iterator_next);
}

fn return_self(
    _vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(this)
}

fn array_iterator_next(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let Some(obj) = this.as_object() else {
        return bad_receiver(vm);
    };
    if obj.as_ref().class() != ClassTag::ArrayIterator {
        return bad_receiver(vm);
    }
    let (target, index, kind) = match &obj.as_ref().extra {
        ObjectExtra::ArrayIter(data) => (data.target, data.index, data.kind),
        _ => return bad_receiver(vm),
    };
    let len = target
        .as_object()
        .and_then(|t| t.as_ref().as_array().map(|a| a.len()))
        .unwrap_or(0);
    if index >= len {
        let result = vm.make_iter_result(Value::Undefined, true);
        return Completion::Normal(result);
    }
    if let Some(obj) = this.as_object() {
        if let ObjectExtra::ArrayIter(data) = &mut obj.as_mut().extra {
            data.index = index + 1;
        }
    }
    let element = target
        .as_object()
        .and_then(|t| t.as_ref().as_array().map(|a| a.get(index)))
        .unwrap_or(Value::Undefined);
    let value = match kind {
        IterKind::Keys => Value::U32(index),
        IterKind::Values => element,
        IterKind::Entries => {
            let pair = vm.new_array_from(&[Value::U32(index), element]);
            Value::Object(pair)
        }
    };
    Completion::Normal(vm.make_iter_result(value, false))
}

fn string_iterator_next(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let Some(obj) = this.as_object() else {
        return bad_receiver(vm);
    };
    let (target, index) = match &obj.as_ref().extra {
        ObjectExtra::StringIter(data) => (data.target, data.index),
        _ => return bad_receiver(vm),
    };
    let units = match crate::runtime::this_string_units(vm, target) {
        Ok(units) => units,
        Err(err) => return Completion::Throw(err.value()),
    };
    if index as usize >= units.len() {
        let result = vm.make_iter_result(Value::Undefined, true);
        return Completion::Normal(result);
    }
    // One code point per step: consume a surrogate pair together.
    let first = units[index as usize];
    let pair_len = if (0xd800..0xdc00).contains(&first)
        && (index as usize + 1) < units.len()
        && (0xdc00..0xe000).contains(&units[index as usize + 1])
    {
        2
    } else {
        1
    };
    if let Some(obj) = this.as_object() {
        if let ObjectExtra::StringIter(data) = &mut obj.as_mut().extra {
            data.index = index + pair_len;
        }
    }
    let slice =
        units[index as usize..index as usize + pair_len as usize].to_vec();
    let value = Value::String(vm.heap.new_string(slice));
    Completion::Normal(vm.make_iter_result(value, false))
}

fn bad_receiver(vm: &mut Vm) -> Completion {
    Completion::Throw(vm.build_error_value(
        ErrorKind::TypeError,
        "next called on an incompatible receiver",
    ))
}
