// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bound function state: the target callable, the bound `this`, and the
//! prepended arguments. Invocation walks chained bound functions so that
//! the effective argument list is
//! `outermost_bound_args ++ .. ++ innermost_bound_args ++ call_args` with
//! the outermost bound `this`.

use crate::value::Value;

#[derive(Debug)]
pub struct BoundData {
    pub target: Value,
    pub bound_this: Value,
    pub bound_args: Vec<Value>,
}
