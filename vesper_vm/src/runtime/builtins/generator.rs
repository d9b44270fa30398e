// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Generator.prototype`: `next`, `return`, `throw`. The resume machinery
//! lives in the VM; this surface only validates the receiver and shapes
//! the results.

use crate::error::ErrorKind;
use crate::object::ClassTag;
use crate::runtime::{add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.generator;
    add_method(vm, proto, "next", 1, generator_next);
    let proto = vm.protos.generator;
    add_method(vm, proto, "return", 1, generator_return);
    let proto = vm.protos.generator;
    add_method(vm, proto, "throw", 1, generator_throw);
}

fn check_receiver(vm: &mut Vm, this: Value) -> Result<(), Completion> {
    if this.class() == Some(ClassTag::Generator) {
        Ok(())
    } else {
        Err(Completion::Throw(vm.build_error_value(
            ErrorKind::TypeError,
            "Generator method called on an incompatible receiver",
        )))
    }
}

fn generator_next(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if let Err(completion) = check_receiver(vm, this) {
        return completion;
    }
    vm.generator_resume(this, arg(args, 0), false)
}

/// `return(v)`: finish the generator immediately with `{value: v, done:
/// true}`.
fn generator_return(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if let Err(completion) = check_receiver(vm, this) {
        return completion;
    }
    if let Some(data) =
        this.as_object().and_then(|o| o.as_mut().as_generator_mut())
    {
        data.dispose_state();
    }
    let result = vm.make_iter_result(arg(args, 0), true);
    Completion::Normal(result)
}

fn generator_throw(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    if let Err(completion) = check_receiver(vm, this) {
        return completion;
    }
    vm.generator_resume(this, arg(args, 0), true)
}
