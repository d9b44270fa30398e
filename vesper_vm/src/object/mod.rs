// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The object and property model.
//!
//! Every object is one [`JsObject`] layout: a class tag, a prototype value,
//! an extensibility flag and an insertion-ordered property map. Kind
//! specific state (the dense element vector of arrays, a promise's
//! then-records, a function's capture cells) lives in the [`ObjectExtra`]
//! extension reached through the class tag.

pub mod array;
pub mod bound_function;
pub mod function;
pub mod generator;
pub mod iterator;
pub mod promise;
pub mod regexp;

use ahash::RandomState;
use indexmap::IndexMap;

use crate::atom::Atom;
use crate::value::Value;

pub use array::ArrayData;
pub use bound_function::BoundData;
pub use function::FunctionData;
pub use generator::GeneratorData;
pub use iterator::{ArrayIterData, ForInData, IterKind, StringIterData};
pub use promise::{PromiseData, PromiseState, ThenRecord};
pub use regexp::RegExpData;

/// Class tag: which kind of object this is. One data layout serves all of
/// them; behavior dispatches on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClassTag {
    Object,
    Array,
    Function,
    AsyncFunction,
    GeneratorFunction,
    BoundFunction,
    NumberObject,
    StringObject,
    BooleanObject,
    Error,
    Date,
    RegExp,
    Promise,
    Generator,
    ForInIterator,
    ArrayIterator,
    StringIterator,
}

impl ClassTag {
    pub fn is_callable(self) -> bool {
        matches!(
            self,
            ClassTag::Function
                | ClassTag::AsyncFunction
                | ClassTag::GeneratorFunction
                | ClassTag::BoundFunction
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ClassTag::Object => "Object",
            ClassTag::Array => "Array",
            ClassTag::Function
            | ClassTag::AsyncFunction
            | ClassTag::GeneratorFunction
            | ClassTag::BoundFunction => "Function",
            ClassTag::NumberObject => "Number",
            ClassTag::StringObject => "String",
            ClassTag::BooleanObject => "Boolean",
            ClassTag::Error => "Error",
            ClassTag::Date => "Date",
            ClassTag::RegExp => "RegExp",
            ClassTag::Promise => "Promise",
            ClassTag::Generator => "Generator",
            ClassTag::ForInIterator | ClassTag::ArrayIterator => {
                "Array Iterator"
            }
            ClassTag::StringIterator => "String Iterator",
        }
    }
}

/// A property key: an interned string atom (possibly an integer atom) or a
/// symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Atom(Atom),
    Symbol(Atom),
}

impl PropertyKey {
    pub fn atom(self) -> Atom {
        match self {
            PropertyKey::Atom(a) | PropertyKey::Symbol(a) => a,
        }
    }

    pub fn is_symbol(self) -> bool {
        matches!(self, PropertyKey::Symbol(_))
    }
}

/// Property descriptor flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropFlags(u8);

impl PropFlags {
    pub const ENUMERABLE: PropFlags = PropFlags(1 << 0);
    pub const CONFIGURABLE: PropFlags = PropFlags(1 << 1);
    pub const WRITABLE: PropFlags = PropFlags(1 << 2);
    /// Materialize on first read: a function's `prototype` object.
    pub const LAZY_PROTO: PropFlags = PropFlags(1 << 3);

    pub const NONE: PropFlags = PropFlags(0);
    /// The default for assignment-created properties.
    pub const ECW: PropFlags = PropFlags(0b111);

    pub fn contains(self, other: PropFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn with(self, other: PropFlags) -> PropFlags {
        PropFlags(self.0 | other.0)
    }

    #[must_use]
    pub fn without(self, other: PropFlags) -> PropFlags {
        PropFlags(self.0 & !other.0)
    }

    pub fn is_enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }

    pub fn is_configurable(self) -> bool {
        self.contains(Self::CONFIGURABLE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PropData {
    Value(Value),
    Accessor { getter: Value, setter: Value },
}

#[derive(Debug, Clone, Copy)]
pub struct Property {
    pub flags: PropFlags,
    pub data: PropData,
}

impl Property {
    pub fn data_value(value: Value, flags: PropFlags) -> Self {
        Self { flags, data: PropData::Value(value) }
    }

    pub fn accessor(getter: Value, setter: Value, flags: PropFlags) -> Self {
        Self { flags, data: PropData::Accessor { getter, setter } }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.data, PropData::Accessor { .. })
    }
}

/// Kind-specific extension state.
#[derive(Debug, Default)]
pub enum ObjectExtra {
    #[default]
    None,
    Array(Box<ArrayData>),
    Function(Box<FunctionData>),
    Bound(Box<BoundData>),
    Promise(Box<PromiseData>),
    Generator(Box<GeneratorData>),
    RegExp(Box<RegExpData>),
    Date {
        timestamp: f64,
    },
    ForIn(Box<ForInData>),
    ArrayIter(Box<ArrayIterData>),
    StringIter(Box<StringIterData>),
    /// The wrapped primitive of a Number/String/Boolean object.
    Primitive {
        value: Value,
    },
}

type PropMap = IndexMap<PropertyKey, Property, RandomState>;

#[derive(Debug)]
pub struct JsObject {
    class: ClassTag,
    proto: Value,
    extensible: bool,
    props: PropMap,
    pub extra: ObjectExtra,
}

impl JsObject {
    pub fn new(class: ClassTag, proto: Value) -> Self {
        debug_assert!(proto.is_object() || proto.is_null());
        Self {
            class,
            proto,
            extensible: true,
            props: PropMap::default(),
            extra: ObjectExtra::None,
        }
    }

    pub fn with_extra(class: ClassTag, proto: Value, extra: ObjectExtra) -> Self {
        Self { extra, ..Self::new(class, proto) }
    }

    #[inline]
    pub fn class(&self) -> ClassTag {
        self.class
    }

    #[inline]
    pub fn prototype(&self) -> Value {
        self.proto
    }

    pub fn set_prototype(&mut self, proto: Value) {
        debug_assert!(proto.is_object() || proto.is_null());
        self.proto = proto;
    }

    #[inline]
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    pub fn get_own(&self, key: PropertyKey) -> Option<&Property> {
        self.props.get(&key)
    }

    pub fn get_own_mut(&mut self, key: PropertyKey) -> Option<&mut Property> {
        self.props.get_mut(&key)
    }

    pub fn has_own(&self, key: PropertyKey) -> bool {
        self.props.contains_key(&key)
    }

    /// Insert or overwrite a property wholesale. Callers are responsible for
    /// the write barrier on the stored values.
    pub fn set_own(&mut self, key: PropertyKey, prop: Property) {
        self.props.insert(key, prop);
    }

    /// Remove an own property, preserving insertion order of the rest.
    pub fn remove_own(&mut self, key: PropertyKey) -> bool {
        self.props.shift_remove(&key).is_some()
    }

    pub fn own_keys(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        self.props.keys().copied()
    }

    pub fn own_entries(
        &self,
    ) -> impl Iterator<Item = (PropertyKey, &Property)> + '_ {
        self.props.iter().map(|(k, p)| (*k, p))
    }

    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Mark every data property non-writable and non-configurable. Used by
    /// `Object.freeze` together with `prevent_extensions`.
    pub fn harden_all_props(&mut self) {
        for prop in self.props.values_mut() {
            prop.flags = prop
                .flags
                .without(PropFlags::WRITABLE)
                .without(PropFlags::CONFIGURABLE);
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.extra {
            ObjectExtra::Array(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut ArrayData> {
        match &mut self.extra {
            ObjectExtra::Array(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.extra {
            ObjectExtra::Function(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionData> {
        match &mut self.extra {
            ObjectExtra::Function(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_bound(&self) -> Option<&BoundData> {
        match &self.extra {
            ObjectExtra::Bound(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_promise_mut(&mut self) -> Option<&mut PromiseData> {
        match &mut self.extra {
            ObjectExtra::Promise(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&PromiseData> {
        match &self.extra {
            ObjectExtra::Promise(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_generator_mut(&mut self) -> Option<&mut GeneratorData> {
        match &mut self.extra {
            ObjectExtra::Generator(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_regexp(&self) -> Option<&RegExpData> {
        match &self.extra {
            ObjectExtra::RegExp(data) => Some(data),
            _ => None,
        }
    }

    /// Visit every value slot reachable from this object: the prototype,
    /// all property data, and the kind-specific extension. The collector
    /// relocates through the `&mut` it is handed.
    pub fn visit_children(&mut self, f: &mut dyn FnMut(&mut Value)) {
        f(&mut self.proto);
        for prop in self.props.values_mut() {
            match &mut prop.data {
                PropData::Value(value) => f(value),
                PropData::Accessor { getter, setter } => {
                    f(getter);
                    f(setter);
                }
            }
        }
        match &mut self.extra {
            ObjectExtra::None | ObjectExtra::Date { .. } => {}
            ObjectExtra::Array(data) => {
                for element in data.elements.iter_mut() {
                    f(element);
                }
            }
            ObjectExtra::Function(data) => {
                f(&mut data.captures);
                f(&mut data.this_or_aux);
            }
            ObjectExtra::Bound(data) => {
                f(&mut data.target);
                f(&mut data.bound_this);
                for arg in data.bound_args.iter_mut() {
                    f(arg);
                }
            }
            ObjectExtra::Promise(data) => data.visit_children(f),
            ObjectExtra::Generator(data) => data.visit_children(f),
            ObjectExtra::RegExp(data) => f(&mut data.source),
            ObjectExtra::ForIn(_) => {}
            ObjectExtra::ArrayIter(data) => f(&mut data.target),
            ObjectExtra::StringIter(data) => f(&mut data.target),
            ObjectExtra::Primitive { value } => f(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{K_LENGTH, K_VALUE, int_atom};

    #[test]
    fn property_map_preserves_insertion_order() {
        let mut obj = JsObject::new(ClassTag::Object, Value::Null);
        let keys = [
            PropertyKey::Atom(K_VALUE),
            PropertyKey::Atom(int_atom(3)),
            PropertyKey::Atom(K_LENGTH),
        ];
        for (i, key) in keys.iter().enumerate() {
            obj.set_own(
                *key,
                Property::data_value(Value::I32(i as i32), PropFlags::ECW),
            );
        }
        let seen: Vec<_> = obj.own_keys().collect();
        assert_eq!(seen, keys);

        assert!(obj.remove_own(PropertyKey::Atom(int_atom(3))));
        let seen: Vec<_> = obj.own_keys().collect();
        assert_eq!(seen, [keys[0], keys[2]]);
    }

    #[test]
    fn flags_operations() {
        let flags = PropFlags::ECW;
        assert!(flags.is_writable());
        let frozen = flags
            .without(PropFlags::WRITABLE)
            .without(PropFlags::CONFIGURABLE);
        assert!(!frozen.is_writable());
        assert!(!frozen.is_configurable());
        assert!(frozen.is_enumerable());
    }

    #[test]
    fn harden_all_props_clears_write_access() {
        let mut obj = JsObject::new(ClassTag::Object, Value::Null);
        obj.set_own(
            PropertyKey::Atom(K_VALUE),
            Property::data_value(Value::I32(1), PropFlags::ECW),
        );
        obj.harden_all_props();
        let prop = obj.get_own(PropertyKey::Atom(K_VALUE)).unwrap();
        assert!(!prop.flags.is_writable());
    }
}
