// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interned strings and symbols.
//!
//! An [`Atom`] is a `u32`. The high bit distinguishes integer atoms, whose
//! low 31 bits carry an array-index value directly, from pool atoms, which
//! index into the [`AtomPool`]'s slot list. Symbols are pool slots with no
//! interned text; every `atomize_symbol` call mints a fresh slot, which is
//! what makes symbols unique.

use std::rc::Rc;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::string::{utf16_of, utf16_to_utf8};

pub type Atom = u32;

pub const ATOM_INT_TAG: u32 = 1 << 31;
pub const ATOM_INT_MAX: u32 = i32::MAX as u32;

#[inline]
pub fn atom_is_int(atom: Atom) -> bool {
    atom & ATOM_INT_TAG != 0
}

#[inline]
pub fn atom_int_value(atom: Atom) -> u32 {
    debug_assert!(atom_is_int(atom));
    atom & !ATOM_INT_TAG
}

#[inline]
pub fn int_atom(value: u32) -> Atom {
    debug_assert!(value <= ATOM_INT_MAX);
    ATOM_INT_TAG | value
}

/// Parse a canonical base-10 array index: no sign, no leading zeros (except
/// `"0"` itself), value within `[0, 2^31 - 1]`.
pub fn scan_index_literal(units: &[u16]) -> Option<u32> {
    if units.is_empty() || units.len() > 10 {
        return None;
    }
    if units[0] == b'0' as u16 && units.len() > 1 {
        return None;
    }
    let mut value: u64 = 0;
    for &unit in units {
        if !(b'0' as u16..=b'9' as u16).contains(&unit) {
            return None;
        }
        value = value * 10 + (unit - b'0' as u16) as u64;
    }
    (value <= ATOM_INT_MAX as u64).then_some(value as u32)
}

// Static atoms. These are interned by `AtomPool::new` in exactly this order,
// so their indices are compile-time constants shared with any codegen that
// targets this runtime.
pub const K_EMPTY: Atom = 0;
pub const K_UNDEFINED: Atom = 1;
pub const K_NULL: Atom = 2;
pub const K_TRUE: Atom = 3;
pub const K_FALSE: Atom = 4;
pub const K_NUMBER: Atom = 5;
pub const K_BOOLEAN: Atom = 6;
pub const K_STRING: Atom = 7;
pub const K_OBJECT: Atom = 8;
pub const K_SYMBOL: Atom = 9;
pub const K_FUNCTION: Atom = 10;
pub const K_NAN: Atom = 11;
pub const K_INFINITY: Atom = 12;
pub const K_LENGTH: Atom = 13;
pub const K_PROTOTYPE: Atom = 14;
pub const K_CONSTRUCTOR: Atom = 15;
pub const K_DUNDER_PROTO: Atom = 16;
pub const K_TO_STRING: Atom = 17;
pub const K_VALUE_OF: Atom = 18;
pub const K_NAME: Atom = 19;
pub const K_MESSAGE: Atom = 20;
pub const K_STACK: Atom = 21;
pub const K_NEXT: Atom = 22;
pub const K_DONE: Atom = 23;
pub const K_VALUE: Atom = 24;
pub const K_THEN: Atom = 25;
pub const K_GET: Atom = 26;
pub const K_SET: Atom = 27;
pub const K_ENUMERABLE: Atom = 28;
pub const K_CONFIGURABLE: Atom = 29;
pub const K_WRITABLE: Atom = 30;
pub const K_LAST_INDEX: Atom = 31;
pub const K_SOURCE: Atom = 32;
pub const K_FLAGS: Atom = 33;
pub const K_ARGUMENTS: Atom = 34;
pub const K_GLOBAL_THIS: Atom = 35;
pub const K_ANONYMOUS: Atom = 36;
pub const K_ERROR: Atom = 37;
pub const K_EVAL_ERROR: Atom = 38;
pub const K_RANGE_ERROR: Atom = 39;
pub const K_REFERENCE_ERROR: Atom = 40;
pub const K_SYNTAX_ERROR: Atom = 41;
pub const K_TYPE_ERROR: Atom = 42;
pub const K_URI_ERROR: Atom = 43;
pub const K_INTERNAL_ERROR: Atom = 44;
pub const K_AGGREGATE_ERROR: Atom = 45;
/// The `Symbol.iterator` well-known symbol. Interned right after the static
/// strings.
pub const K_SYM_ITERATOR: Atom = 46;

pub const STATIC_ATOM_COUNT: u32 = 47;

const STATIC_ATOM_TEXT: [&str; 46] = [
    "",
    "undefined",
    "null",
    "true",
    "false",
    "number",
    "boolean",
    "string",
    "object",
    "symbol",
    "function",
    "NaN",
    "Infinity",
    "length",
    "prototype",
    "constructor",
    "__proto__",
    "toString",
    "valueOf",
    "name",
    "message",
    "stack",
    "next",
    "done",
    "value",
    "then",
    "get",
    "set",
    "enumerable",
    "configurable",
    "writable",
    "lastIndex",
    "source",
    "flags",
    "arguments",
    "globalThis",
    "anonymous",
    "Error",
    "EvalError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
    "InternalError",
    "AggregateError",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct AtomStats {
    pub atomize_count: u64,
    pub static_atomize_count: u64,
}

#[derive(Debug)]
struct Slot {
    is_symbol: bool,
    // None for description-less symbols; interned text otherwise.
    text: Option<Rc<[u16]>>,
}

/// The interned string/symbol pool. Populated at codegen time, extended at
/// runtime by `atomize` and friends.
#[derive(Debug)]
pub struct AtomPool {
    slots: Vec<Slot>,
    intern: HashMap<Rc<[u16]>, u32, RandomState>,
    static_count: u32,
    pub stats: AtomStats,
}

impl Default for AtomPool {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomPool {
    pub fn new() -> Self {
        let mut pool = Self {
            slots: Vec::with_capacity(64),
            intern: HashMap::default(),
            static_count: 0,
            stats: AtomStats::default(),
        };
        for (i, text) in STATIC_ATOM_TEXT.iter().enumerate() {
            let atom = pool.atomize_no_uint(&utf16_of(text));
            debug_assert_eq!(atom, i as u32);
        }
        let iter_sym = pool.atomize_symbol_desc(&utf16_of("Symbol.iterator"));
        debug_assert_eq!(iter_sym, K_SYM_ITERATOR);
        pool.static_count = pool.slots.len() as u32;
        pool.stats.static_atomize_count = pool.stats.atomize_count;
        pool
    }

    /// Intern `units`, returning an integer atom without touching the pool
    /// when the text is a canonical array index.
    pub fn atomize(&mut self, units: &[u16]) -> Atom {
        self.stats.atomize_count += 1;
        if let Some(&atom) = self.intern.get(units) {
            return atom;
        }
        if let Some(index) = scan_index_literal(units) {
            return int_atom(index);
        }
        self.insert_string(units)
    }

    /// Intern `units` unconditionally as a pool entry, even when the text
    /// looks like an array index. Used for symbol descriptions and for keys
    /// that must stay observable as strings.
    pub fn atomize_no_uint(&mut self, units: &[u16]) -> Atom {
        self.stats.atomize_count += 1;
        if let Some(&atom) = self.intern.get(units) {
            return atom;
        }
        self.insert_string(units)
    }

    pub fn atomize_str(&mut self, text: &str) -> Atom {
        self.atomize(&utf16_of(text))
    }

    pub fn atomize_u32(&mut self, value: u32) -> Atom {
        if value <= ATOM_INT_MAX {
            int_atom(value)
        } else {
            self.atomize_str(&value.to_string())
        }
    }

    pub fn atomize_symbol(&mut self) -> Atom {
        let id = self.slots.len() as u32;
        assert!(id <= ATOM_INT_MAX, "atom pool exhausted");
        self.slots.push(Slot { is_symbol: true, text: None });
        id
    }

    pub fn atomize_symbol_desc(&mut self, desc: &[u16]) -> Atom {
        let id = self.slots.len() as u32;
        assert!(id <= ATOM_INT_MAX, "atom pool exhausted");
        self.slots.push(Slot { is_symbol: true, text: Some(Rc::from(desc)) });
        id
    }

    fn insert_string(&mut self, units: &[u16]) -> Atom {
        let id = self.slots.len() as u32;
        assert!(id <= ATOM_INT_MAX, "atom pool exhausted");
        let text: Rc<[u16]> = Rc::from(units);
        self.slots.push(Slot { is_symbol: false, text: Some(text.clone()) });
        self.intern.insert(text, id);
        id
    }

    pub fn is_symbol(&self, atom: Atom) -> bool {
        !atom_is_int(atom) && self.slots[atom as usize].is_symbol
    }

    /// The interned text of a string atom. Panics on integer atoms and
    /// symbols; use [`AtomPool::atom_text`] for the general case.
    pub fn get_string(&self, atom: Atom) -> &[u16] {
        debug_assert!(!atom_is_int(atom));
        let slot = &self.slots[atom as usize];
        debug_assert!(!slot.is_symbol);
        slot.text.as_deref().unwrap()
    }

    pub fn symbol_desc(&self, atom: Atom) -> Option<&[u16]> {
        let slot = &self.slots[atom as usize];
        debug_assert!(slot.is_symbol);
        slot.text.as_deref()
    }

    /// Text of any non-symbol atom, materializing integer atoms.
    pub fn atom_text(&self, atom: Atom) -> Vec<u16> {
        if atom_is_int(atom) {
            utf16_of(&atom_int_value(atom).to_string())
        } else {
            self.get_string(atom).to_vec()
        }
    }

    pub fn atom_utf8(&self, atom: Atom) -> String {
        if atom_is_int(atom) {
            atom_int_value(atom).to_string()
        } else if self.is_symbol(atom) {
            match self.symbol_desc(atom) {
                Some(desc) => format!("Symbol({})", utf16_to_utf8(desc)),
                None => "Symbol()".to_string(),
            }
        } else {
            utf16_to_utf8(self.get_string(atom))
        }
    }

    pub fn has_string(&self, units: &[u16]) -> bool {
        self.intern.contains_key(units) || scan_index_literal(units).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Raw view of one pool slot, for the image writer:
    /// `(is_symbol, text-or-description)`.
    pub fn slot_view(&self, atom: Atom) -> (bool, Option<&[u16]>) {
        let slot = &self.slots[atom as usize];
        (slot.is_symbol, slot.text.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_atoms_round_trip() {
        let pool = AtomPool::new();
        assert_eq!(pool.get_string(K_LENGTH), &utf16_of("length")[..]);
        assert_eq!(pool.get_string(K_DUNDER_PROTO), &utf16_of("__proto__")[..]);
        assert!(pool.is_symbol(K_SYM_ITERATOR));
    }

    #[test]
    fn atomize_is_stable() {
        let mut pool = AtomPool::new();
        let a = pool.atomize(&utf16_of("foo"));
        let b = pool.atomize(&utf16_of("foo"));
        assert_eq!(a, b);
        let text = pool.get_string(a).to_vec();
        assert_eq!(pool.atomize(&text), a);
    }

    #[test]
    fn integer_atoms_bypass_the_pool() {
        let mut pool = AtomPool::new();
        let before = pool.len();
        for n in [0u32, 1, 42, 4096, ATOM_INT_MAX] {
            let atom = pool.atomize(&utf16_of(&n.to_string()));
            assert!(atom_is_int(atom));
            assert_eq!(atom_int_value(atom), n);
        }
        assert_eq!(pool.len(), before);
    }

    #[test]
    fn non_canonical_indices_are_strings() {
        let mut pool = AtomPool::new();
        for text in ["01", "-1", "2147483648", "1.5", "0x10"] {
            let atom = pool.atomize(&utf16_of(text));
            assert!(!atom_is_int(atom), "{text} must not be an integer atom");
        }
    }

    #[test]
    fn symbols_are_unique() {
        let mut pool = AtomPool::new();
        let a = pool.atomize_symbol();
        let b = pool.atomize_symbol();
        assert_ne!(a, b);
        assert!(pool.is_symbol(a));
        assert_eq!(pool.symbol_desc(a), None);
        let c = pool.atomize_symbol_desc(&utf16_of("tag"));
        assert_eq!(pool.symbol_desc(c), Some(&utf16_of("tag")[..]));
    }

    #[test]
    fn atomize_no_uint_forces_pool_entry() {
        let mut pool = AtomPool::new();
        let atom = pool.atomize_no_uint(&utf16_of("7"));
        assert!(!atom_is_int(atom));
        assert_eq!(pool.get_string(atom), &utf16_of("7")[..]);
    }
}
