// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JS-level error plumbing. A runtime error is an ordinary object whose
//! class tag is `Error`, rooted at one of the nine native error prototypes
//! and carrying `message` and `stack` own properties. [`JsError`] wraps the
//! thrown value on the Rust side so fallible operations compose with `?`.

use crate::atom::{self, Atom};
use crate::value::Value;

pub type JsResult<T> = Result<T, JsError>;

/// A thrown JS value.
#[derive(Debug, Clone, Copy)]
pub struct JsError(Value);

impl JsError {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(self) -> Value {
        self.0
    }
}

/// The nine native error kinds, each with its own prototype object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    Error = 0,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
    InternalError,
    AggregateError,
}

pub const ERROR_KIND_COUNT: usize = 9;

impl ErrorKind {
    pub const ALL: [ErrorKind; ERROR_KIND_COUNT] = [
        ErrorKind::Error,
        ErrorKind::EvalError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
        ErrorKind::UriError,
        ErrorKind::InternalError,
        ErrorKind::AggregateError,
    ];

    pub fn name_atom(self) -> Atom {
        match self {
            ErrorKind::Error => atom::K_ERROR,
            ErrorKind::EvalError => atom::K_EVAL_ERROR,
            ErrorKind::RangeError => atom::K_RANGE_ERROR,
            ErrorKind::ReferenceError => atom::K_REFERENCE_ERROR,
            ErrorKind::SyntaxError => atom::K_SYNTAX_ERROR,
            ErrorKind::TypeError => atom::K_TYPE_ERROR,
            ErrorKind::UriError => atom::K_URI_ERROR,
            ErrorKind::InternalError => atom::K_INTERNAL_ERROR,
            ErrorKind::AggregateError => atom::K_AGGREGATE_ERROR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::UriError => "URIError",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::AggregateError => "AggregateError",
        }
    }
}

/// One line of a captured stack trace.
#[derive(Debug, Clone)]
pub struct StackTraceItem {
    pub func_name: String,
    pub source_line: u32,
    pub is_native: bool,
}

/// Render the trace the way the `stack` property and the uncaught-error
/// diagnostic print it: one `    at name (line N)` row per live frame, from
/// the throw site outward.
pub fn format_stack_trace(items: &[StackTraceItem]) -> String {
    let mut out = String::new();
    for item in items {
        let name = if item.func_name.is_empty() {
            "<anonymous>"
        } else {
            &item.func_name
        };
        if item.is_native {
            out.push_str(&format!("    at {name} (native)\n"));
        } else {
            out.push_str(&format!(
                "    at {name} (line {})\n",
                item.source_line
            ));
        }
    }
    out
}
