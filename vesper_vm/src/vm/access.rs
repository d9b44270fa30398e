// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property access: key coercion, get/set/has/delete with prototype-chain
//! walks, the array and string fast paths, `__proto__` interception, lazy
//! `prototype` materialization, `in`/`instanceof`, and the for-in snapshot.

use hashbrown::HashSet;

use crate::atom::{self, Atom, atom_int_value, atom_is_int, int_atom};
use crate::conversion::{f64_array_index, f64_to_js_string, to_number, to_string_value};
use crate::error::{ErrorKind, JsResult};
use crate::object::{
    ArrayData, ClassTag, ForInData, JsObject, ObjectExtra, PropData,
    PropFlags, PropertyKey,
};
use crate::heap::GcRef;
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    /// ### ToPropertyKey ( argument )
    ///
    /// Float array indices collapse into integer atoms; everything else is
    /// stringified (or kept as a symbol).
    pub fn to_property_key(&mut self, value: Value) -> JsResult<PropertyKey> {
        match value {
            Value::Atom(a) => Ok(PropertyKey::Atom(a)),
            Value::Symbol(s) => Ok(PropertyKey::Symbol(s)),
            Value::U32(_) | Value::I32(_) | Value::F64(_) => {
                let n = value.number();
                if let Some(index) = f64_array_index(n) {
                    Ok(PropertyKey::Atom(int_atom(index)))
                } else {
                    let text = f64_to_js_string(n);
                    Ok(PropertyKey::Atom(self.atoms.atomize_str(&text)))
                }
            }
            Value::String(s) => {
                let units = s.as_ref().units().to_vec();
                Ok(PropertyKey::Atom(self.atoms.atomize(&units)))
            }
            Value::Bool(true) => Ok(PropertyKey::Atom(atom::K_TRUE)),
            Value::Bool(false) => Ok(PropertyKey::Atom(atom::K_FALSE)),
            Value::Null => Ok(PropertyKey::Atom(atom::K_NULL)),
            Value::Undefined | Value::Uninit => {
                Ok(PropertyKey::Atom(atom::K_UNDEFINED))
            }
            Value::Object(_) => {
                let text = to_string_value(self, value)?;
                self.to_property_key(text)
            }
            _ => Err(self.throw_error(
                ErrorKind::TypeError,
                "Value cannot be used as a property key",
            )),
        }
    }

    pub fn get_prop_atom_value(
        &mut self,
        target: Value,
        key_atom: Atom,
    ) -> JsResult<Value> {
        self.get_prop(target, PropertyKey::Atom(key_atom))
    }

    /// Property get with receiver semantics: accessors run with `this`
    /// bound to the original target.
    pub fn get_prop(
        &mut self,
        target: Value,
        key: PropertyKey,
    ) -> JsResult<Value> {
        if key == PropertyKey::Atom(atom::K_DUNDER_PROTO) {
            return Ok(self.proto_of_value(target));
        }
        match target {
            Value::Object(obj) => self.object_get(obj, key, target),
            Value::Null | Value::Undefined | Value::Uninit => {
                let name = self.key_utf8(key);
                Err(self.throw_error(
                    ErrorKind::TypeError,
                    &format!(
                        "Cannot read properties of {} (reading '{name}')",
                        if target.is_null() { "null" } else { "undefined" }
                    ),
                ))
            }
            _ => self.primitive_get(target, key),
        }
    }

    fn object_get(
        &mut self,
        obj: GcRef<JsObject>,
        key: PropertyKey,
        receiver: Value,
    ) -> JsResult<Value> {
        // Array fast path: dense elements and `length`.
        if obj.as_ref().class() == ClassTag::Array {
            if let PropertyKey::Atom(a) = key {
                if atom_is_int(a) {
                    let index = atom_int_value(a);
                    if let Some(array) = obj.as_ref().as_array() {
                        if index < array.len() {
                            return Ok(array.get(index));
                        }
                    }
                } else if a == atom::K_LENGTH {
                    let len = obj.as_ref().as_array().map_or(0, ArrayData::len);
                    return Ok(Value::U32(len));
                }
            }
        }
        // String wrapper objects answer length/index from the primitive.
        if obj.as_ref().class() == ClassTag::StringObject {
            if let ObjectExtra::Primitive { value } = obj.as_ref().extra {
                if let Some(result) = self.string_fast_get(value, key)? {
                    return Ok(result);
                }
            }
        }
        self.chain_get(obj, key, receiver)
    }

    fn chain_get(
        &mut self,
        start: GcRef<JsObject>,
        key: PropertyKey,
        receiver: Value,
    ) -> JsResult<Value> {
        let mut cursor = start;
        loop {
            if let Some(prop) = cursor.as_ref().get_own(key) {
                let prop = *prop;
                if prop.flags.contains(PropFlags::LAZY_PROTO) {
                    return Ok(self.materialize_lazy_proto(cursor));
                }
                return match prop.data {
                    PropData::Value(value) => Ok(value),
                    PropData::Accessor { getter, .. } => {
                        if getter.is_function() {
                            self.call_checked(getter, receiver, &[])
                        } else {
                            Ok(Value::Undefined)
                        }
                    }
                };
            }
            match cursor.as_ref().prototype() {
                Value::Object(parent) => cursor = parent,
                _ => return Ok(Value::Undefined),
            }
        }
    }

    /// Boxing-free primitive access: fast paths on strings, otherwise a
    /// lookup on the matching prototype with the primitive as receiver.
    fn primitive_get(
        &mut self,
        target: Value,
        key: PropertyKey,
    ) -> JsResult<Value> {
        if target.is_string() {
            if let Some(result) = self.string_fast_get(target, key)? {
                return Ok(result);
            }
        }
        let proto = match target {
            Value::U32(_) | Value::I32(_) | Value::F64(_) => self.protos.number,
            Value::Bool(_) => self.protos.boolean,
            _ if target.is_string() => self.protos.string,
            _ => self.protos.object,
        };
        match proto.as_object() {
            Some(proto) => self.chain_get(proto, key, target),
            None => Ok(Value::Undefined),
        }
    }

    /// `length` and integer indexing on a string value; `None` falls back
    /// to the prototype chain.
    fn string_fast_get(
        &mut self,
        target: Value,
        key: PropertyKey,
    ) -> JsResult<Option<Value>> {
        let PropertyKey::Atom(a) = key else {
            return Ok(None);
        };
        let (len, unit_at) = {
            let units = crate::conversion::string_value_units(self, &target);
            let unit_at = atom_is_int(a)
                .then(|| units.get(atom_int_value(a) as usize).copied());
            (units.len() as u32, unit_at)
        };
        if a == atom::K_LENGTH {
            return Ok(Some(Value::U32(len)));
        }
        match unit_at {
            Some(Some(unit)) => {
                let unit = [unit];
                let s = self.heap.new_string_units(&unit);
                Ok(Some(Value::String(s)))
            }
            Some(None) => Ok(Some(Value::Undefined)),
            None => Ok(None),
        }
    }

    /// Property set. Missing properties are created `{writable,
    /// enumerable, configurable}` on extensible receivers; failed writes
    /// are silent (strict-mode throwing is out of scope).
    pub fn set_prop(
        &mut self,
        target: Value,
        key: PropertyKey,
        value: Value,
    ) -> JsResult<()> {
        if key == PropertyKey::Atom(atom::K_DUNDER_PROTO) {
            if let Some(obj) = target.as_object() {
                if value.is_object() || value.is_null() {
                    self.heap.write_barrier(obj, value);
                    obj.as_mut().set_prototype(value);
                }
            }
            return Ok(());
        }
        match target {
            Value::Object(obj) => self.object_set(obj, key, value, target),
            Value::Null | Value::Undefined | Value::Uninit => {
                let name = self.key_utf8(key);
                Err(self.throw_error(
                    ErrorKind::TypeError,
                    &format!(
                        "Cannot set properties of {} (setting '{name}')",
                        if target.is_null() { "null" } else { "undefined" }
                    ),
                ))
            }
            // Writes to other primitives are silently dropped.
            _ => Ok(()),
        }
    }

    fn object_set(
        &mut self,
        obj: GcRef<JsObject>,
        key: PropertyKey,
        value: Value,
        receiver: Value,
    ) -> JsResult<()> {
        if obj.as_ref().class() == ClassTag::Array {
            if let PropertyKey::Atom(a) = key {
                if atom_is_int(a) {
                    self.heap.write_barrier(obj, value);
                    obj.as_mut()
                        .as_array_mut()
                        .unwrap()
                        .set(atom_int_value(a), value);
                    return Ok(());
                }
                if a == atom::K_LENGTH {
                    // The length coercion can run arbitrary code; re-derive
                    // the receiver afterwards.
                    self.heap.push_temp_root(receiver);
                    let len = to_number(self, value);
                    let receiver = self.heap.temp_root(0);
                    self.heap.pop_temp_roots(1);
                    let len = crate::conversion::f64_to_uint32(len?);
                    receiver
                        .as_object()
                        .unwrap()
                        .as_mut()
                        .as_array_mut()
                        .unwrap()
                        .set_length(len);
                    return Ok(());
                }
            }
        }

        // Own data property: honor `writable` directly.
        if let Some(prop) = obj.as_ref().get_own(key) {
            let prop = *prop;
            return match prop.data {
                PropData::Value(_) => {
                    if prop.flags.is_writable() {
                        self.heap.write_barrier(obj, value);
                        let own = obj.as_mut().get_own_mut(key).unwrap();
                        own.data = PropData::Value(value);
                    }
                    Ok(())
                }
                PropData::Accessor { setter, .. } => {
                    if setter.is_function() {
                        self.call_checked(setter, receiver, &[value])?;
                    }
                    Ok(())
                }
            };
        }

        // Walk the chain: a setter anywhere runs; a non-writable data
        // property anywhere blocks the assignment.
        let mut cursor = obj.as_ref().prototype();
        while let Value::Object(parent) = cursor {
            if let Some(prop) = parent.as_ref().get_own(key) {
                let prop = *prop;
                match prop.data {
                    PropData::Accessor { setter, .. } => {
                        if setter.is_function() {
                            self.call_checked(setter, receiver, &[value])?;
                        }
                        return Ok(());
                    }
                    PropData::Value(_) => {
                        if !prop.flags.is_writable() {
                            return Ok(());
                        }
                        break;
                    }
                }
            }
            cursor = parent.as_ref().prototype();
        }

        if obj.as_ref().is_extensible() {
            self.define_prop(obj, key, value, PropFlags::ECW);
        }
        Ok(())
    }

    /// The `in` operator and `Object.prototype.hasOwnProperty`'s chain-free
    /// sibling share this walk.
    pub fn has_prop(&mut self, target: Value, key: PropertyKey) -> JsResult<bool> {
        let Some(obj) = target.as_object() else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Cannot use 'in' operator on a non-object",
            ));
        };
        if obj.as_ref().class() == ClassTag::Array {
            if let PropertyKey::Atom(a) = key {
                if atom_is_int(a) {
                    let index = atom_int_value(a);
                    if let Some(array) = obj.as_ref().as_array() {
                        if index < array.len() && !array.is_hole(index) {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        let mut cursor = obj;
        loop {
            if cursor.as_ref().has_own(key) {
                return Ok(true);
            }
            match cursor.as_ref().prototype() {
                Value::Object(parent) => cursor = parent,
                _ => return Ok(false),
            }
        }
    }

    /// `delete target[key]`: own configurable properties only.
    pub fn delete_prop(
        &mut self,
        target: Value,
        key: PropertyKey,
    ) -> JsResult<bool> {
        let Some(obj) = target.as_object() else {
            return Ok(true);
        };
        if obj.as_ref().class() == ClassTag::Array {
            if let PropertyKey::Atom(a) = key {
                if atom_is_int(a) {
                    let index = atom_int_value(a);
                    if let Some(array) = obj.as_mut().as_array_mut() {
                        if index < array.len() {
                            array.elements[index as usize] = Value::Uninit;
                        }
                        return Ok(true);
                    }
                }
            }
        }
        match obj.as_ref().get_own(key) {
            Some(prop) if !prop.flags.is_configurable() => Ok(false),
            Some(_) => {
                obj.as_mut().remove_own(key);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    /// ### InstanceofOperator ( V, target )
    pub fn instance_of(&mut self, value: Value, ctor: Value) -> JsResult<bool> {
        let Some(ctor_obj) = ctor.as_object() else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Right-hand side of 'instanceof' is not callable",
            ));
        };
        if !ctor_obj.as_ref().class().is_callable() {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
        // Bound functions test against the innermost target's prototype.
        let mut resolved = ctor_obj;
        while let Some(bound) = resolved.as_ref().as_bound() {
            match bound.target.as_object() {
                Some(inner) => resolved = inner,
                None => break,
            }
        }
        let proto =
            self.get_prop_atom_value(Value::Object(resolved), atom::K_PROTOTYPE)?;
        let Some(obj) = value.as_object() else {
            return Ok(false);
        };
        let mut cursor = obj.as_ref().prototype();
        while let Value::Object(parent) = cursor {
            if let Some(proto_obj) = proto.as_object() {
                if parent.same(proto_obj) {
                    return Ok(true);
                }
            }
            cursor = parent.as_ref().prototype();
        }
        Ok(false)
    }

    /// The prototype read behind `__proto__` and `Object.getPrototypeOf`.
    pub(crate) fn proto_of_value(&mut self, target: Value) -> Value {
        match target {
            Value::Object(obj) => obj.as_ref().prototype(),
            Value::U32(_) | Value::I32(_) | Value::F64(_) => self.protos.number,
            Value::Bool(_) => self.protos.boolean,
            Value::Atom(_) | Value::String(_) => self.protos.string,
            _ => Value::Null,
        }
    }

    /// First read of a function's `prototype`: materialize the plain object
    /// with its `constructor` back-reference and store it.
    pub(crate) fn materialize_lazy_proto(
        &mut self,
        func: GcRef<JsObject>,
    ) -> Value {
        self.heap.push_temp_root(Value::Object(func));
        let proto_obj = self.new_plain_object();
        let func = self.heap.temp_root(0).as_object().unwrap();
        self.heap.pop_temp_roots(1);
        self.define_prop(
            proto_obj,
            PropertyKey::Atom(atom::K_CONSTRUCTOR),
            Value::Object(func),
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
        self.define_prop(
            func,
            PropertyKey::Atom(atom::K_PROTOTYPE),
            Value::Object(proto_obj),
            PropFlags::WRITABLE,
        );
        Value::Object(proto_obj)
    }

    // -----------------------------------------------------------------
    // Iteration support
    // -----------------------------------------------------------------

    /// `for_in_init`: snapshot the enumerable string-keyed properties of
    /// the target and its prototype chain.
    pub(crate) fn build_for_in_iterator(
        &mut self,
        target: Value,
    ) -> GcRef<JsObject> {
        let mut keys = Vec::new();
        let mut seen: HashSet<Atom> = HashSet::new();
        let mut cursor = target;
        while let Value::Object(obj) = cursor {
            match &obj.as_ref().extra {
                ObjectExtra::Array(array) => {
                    for (i, element) in array.elements.iter().enumerate() {
                        if !matches!(element, Value::Uninit) {
                            let a = int_atom(i as u32);
                            if seen.insert(a) {
                                keys.push(a);
                            }
                        }
                    }
                }
                ObjectExtra::Primitive { value }
                    if obj.as_ref().class() == ClassTag::StringObject =>
                {
                    let len = crate::conversion::string_value_units(self, value)
                        .len();
                    for i in 0..len {
                        let a = int_atom(i as u32);
                        if seen.insert(a) {
                            keys.push(a);
                        }
                    }
                }
                _ => {}
            }
            for (key, prop) in obj.as_ref().own_entries() {
                if let PropertyKey::Atom(a) = key {
                    if prop.flags.is_enumerable() && seen.insert(a) {
                        keys.push(a);
                    }
                }
            }
            cursor = obj.as_ref().prototype();
        }
        let proto = self.protos.iterator;
        self.heap.new_object_payload(JsObject::with_extra(
            ClassTag::ForInIterator,
            proto,
            ObjectExtra::ForIn(Box::new(ForInData { keys, index: 0 })),
        ))
    }

    /// Allocate a `{ value, done }` iteration result.
    pub(crate) fn make_iter_result(&mut self, value: Value, done: bool) -> Value {
        self.heap.push_temp_root(value);
        let result = self.new_plain_object();
        let value = self.heap.temp_root(0);
        self.heap.pop_temp_roots(1);
        self.define_prop(
            result,
            PropertyKey::Atom(atom::K_VALUE),
            value,
            PropFlags::ECW,
        );
        self.define_prop(
            result,
            PropertyKey::Atom(atom::K_DONE),
            Value::Bool(done),
            PropFlags::ECW,
        );
        Value::Object(result)
    }

    /// Allocate a dense array holding `values`. The allocation roots the
    /// elements itself; the barrier runs over the stored (possibly
    /// relocated) copies.
    pub(crate) fn new_array_from(&mut self, values: &[Value]) -> GcRef<JsObject> {
        let proto = self.protos.array;
        let array = self.heap.new_object_payload(JsObject::with_extra(
            ClassTag::Array,
            proto,
            ObjectExtra::Array(Box::new(ArrayData::with_elements(
                values.to_vec(),
            ))),
        ));
        for i in 0..values.len() {
            let element = array.as_ref().as_array().unwrap().get(i as u32);
            self.heap.write_barrier(array, element);
        }
        array
    }

    pub(crate) fn key_utf8(&self, key: PropertyKey) -> String {
        self.atoms.atom_utf8(key.atom())
    }

    /// Own-property existence without the prototype chain, for
    /// `hasOwnProperty` and the global-lookup opcodes.
    pub(crate) fn has_own_prop(&self, target: Value, key: PropertyKey) -> bool {
        let Some(obj) = target.as_object() else {
            return false;
        };
        if obj.as_ref().class() == ClassTag::Array {
            if let PropertyKey::Atom(a) = key {
                if atom_is_int(a) {
                    let index = atom_int_value(a);
                    return obj
                        .as_ref()
                        .as_array()
                        .is_some_and(|arr| {
                            index < arr.len() && !arr.is_hole(index)
                        });
                }
                if a == atom::K_LENGTH {
                    return true;
                }
            }
        }
        obj.as_ref().has_own(key)
    }
}
