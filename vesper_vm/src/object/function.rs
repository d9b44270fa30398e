// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Function instance state. The immutable parts (parameter counts, bytecode
//! range, capture list, native entry) live in the shared
//! [`crate::bytecode::FunctionMeta`]; an instance adds its capture cells and
//! the captured `this` of arrow functions.

use crate::value::Value;

#[derive(Debug)]
pub struct FunctionData {
    /// Index into the VM's function metadata table.
    pub meta_idx: u32,
    /// `Value::HeapArray` of capture cells, or `Undefined` when the function
    /// captures nothing.
    pub captures: Value,
    /// For arrow functions, the enclosing `this`. For the promise
    /// resolve/reject pair and other auxiliary-carrying natives, the value
    /// they operate on.
    pub this_or_aux: Value,
    pub has_aux: bool,
}

impl FunctionData {
    pub fn new(meta_idx: u32) -> Self {
        Self {
            meta_idx,
            captures: Value::Undefined,
            this_or_aux: Value::Undefined,
            has_aux: false,
        }
    }
}
