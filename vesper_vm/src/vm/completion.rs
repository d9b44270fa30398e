// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Call completions and call flags.

use crate::error::{JsError, JsResult};
use crate::value::Value;

/// How a call finished. `Await` and `Yield` are suspensions: the callee's
/// frame has been saved into its resumable state and the carried value is
/// the awaited/yielded one.
#[derive(Debug, Clone, Copy)]
pub enum Completion {
    Normal(Value),
    Throw(Value),
    Await(Value),
    Yield(Value),
}

impl Completion {
    pub fn is_throw(&self) -> bool {
        matches!(self, Completion::Throw(_))
    }

    pub fn value(&self) -> Value {
        match self {
            Completion::Normal(v)
            | Completion::Throw(v)
            | Completion::Await(v)
            | Completion::Yield(v) => *v,
        }
    }

    /// Collapse into a result; suspensions are not expected by callers that
    /// use this.
    pub fn into_result(self) -> JsResult<Value> {
        match self {
            Completion::Normal(v) => Ok(v),
            Completion::Throw(err) => Err(JsError::new(err)),
            Completion::Await(_) | Completion::Yield(_) => {
                unreachable!("suspension escaped its driver")
            }
        }
    }
}

impl From<JsResult<Value>> for Completion {
    fn from(result: JsResult<Value>) -> Self {
        match result {
            Ok(v) => Completion::Normal(v),
            Err(err) => Completion::Throw(err.value()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallFlags {
    /// Constructor call: `this` is the freshly allocated receiver.
    pub constructor: bool,
    /// Force the callee frame to copy its argument span.
    pub copy_args: bool,
    /// Run a generator function's body instead of building its generator.
    pub generator: bool,
    /// For natives: the `this` argument is actually the new target.
    pub this_is_new_target: bool,
}
