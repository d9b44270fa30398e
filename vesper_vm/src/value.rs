// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tagged runtime value.
//!
//! Small values are stored inline; everything else is a [`GcRef`] into the
//! managed heap. The variant order mirrors the partition the interpreter
//! relies on: inline values first, then GC-managed non-objects, then the
//! single object variant (object kinds are distinguished by the class tag on
//! [`JsObject`]).

use crate::atom::Atom;
use crate::heap::{GcRef, HeapCell, ValueArray};
use crate::object::{ClassTag, JsObject};
use crate::string::PrimString;

#[derive(Debug, Clone, Copy, Default)]
pub enum Value {
    #[default]
    Undefined,
    /// A `let`/`const` binding before initialization (the temporal dead
    /// zone), and the hole value in dense arrays.
    Uninit,
    Null,
    /// An interned string or an integer array index.
    Atom(Atom),
    /// A symbol; unique per `Symbol()` call, stored as its pool slot.
    Symbol(Atom),
    Bool(bool),
    U32(u32),
    I32(i32),
    F64(f64),
    /// Non-owning reference to another value slot. Lives only on the operand
    /// stack, between a reference-producing access and the store through it.
    Handle(*mut Value),
    /// Return-PC marker for internal sub-procedure calls (`proc_call`).
    ProcMeta(u32),
    String(GcRef<PrimString>),
    /// A boxed stack slot that escaped into a closure.
    HeapCell(GcRef<HeapCell>),
    /// Raw array of values; the capture-cell table of a function.
    HeapArray(GcRef<ValueArray>),
    Object(GcRef<JsObject>),
}

impl Value {
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_uninit(&self) -> bool {
        matches!(self, Value::Uninit)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `undefined` or `null`.
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null | Value::Uninit)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::U32(_) | Value::I32(_) | Value::F64(_))
    }

    #[inline]
    pub fn is_atom(&self) -> bool {
        matches!(self, Value::Atom(_))
    }

    #[inline]
    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_) | Value::Atom(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    #[inline]
    pub fn needs_gc(&self) -> bool {
        matches!(
            self,
            Value::String(_)
                | Value::HeapCell(_)
                | Value::HeapArray(_)
                | Value::Object(_)
        )
    }

    #[inline]
    pub fn as_object(&self) -> Option<GcRef<JsObject>> {
        match self {
            Value::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<GcRef<PrimString>> {
        match self {
            Value::String(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        match self {
            Value::Object(obj) => obj.as_ref().class().is_callable(),
            _ => false,
        }
    }

    pub fn class(&self) -> Option<ClassTag> {
        self.as_object().map(|obj| obj.as_ref().class())
    }

    /// The numeric value of a number variant. Callers check `is_number`.
    #[inline]
    pub fn number(&self) -> f64 {
        match self {
            Value::U32(n) => *n as f64,
            Value::I32(n) => *n as f64,
            Value::F64(n) => *n,
            _ => unreachable!("number() on non-number value"),
        }
    }

    #[inline]
    pub fn bool_value(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            _ => unreachable!("bool_value() on non-bool value"),
        }
    }

    /// Follow a `Handle` to the slot it references.
    ///
    /// # Safety contract
    /// Handles only ever point into a live frame buffer or property slot and
    /// never survive past the instruction that consumed them.
    #[inline]
    pub fn deref_handle(&self) -> Value {
        match self {
            Value::Handle(slot) => unsafe { **slot },
            _ => *self,
        }
    }

    /// If this slot holds an escaped-variable cell, read through it.
    #[inline]
    pub fn deref_cell(&self) -> Value {
        match self {
            Value::HeapCell(cell) => cell.as_ref().value,
            _ => *self,
        }
    }

    /// Pointer identity for heap values, bit identity for the rest. This is
    /// the identity test used by `same_value` on objects and by the promise
    /// self-resolution check.
    pub fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.same(*b),
            (Value::String(a), Value::String(b)) => a.same(*b),
            (Value::HeapCell(a), Value::HeapCell(b)) => a.same(*b),
            (Value::HeapArray(a), Value::HeapArray(b)) => a.same(*b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::F64(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::I32(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::U32(n)
    }
}

impl From<GcRef<JsObject>> for Value {
    fn from(obj: GcRef<JsObject>) -> Self {
        Value::Object(obj)
    }
}

impl From<GcRef<PrimString>> for Value {
    fn from(s: GcRef<PrimString>) -> Self {
        Value::String(s)
    }
}
