// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Abstract operations on values: ToBoolean, ToPrimitive, ToNumber,
//! ToString, the equality and relational comparisons, and number/string
//! formatting.

use std::borrow::Cow;

use crate::atom::{self, Atom, atom_int_value, atom_is_int};
use crate::error::{ErrorKind, JsResult};
use crate::object::ClassTag;
use crate::string::{units_cmp, utf16_of};
use crate::value::Value;
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    Default,
    Number,
    String,
}

/// ### ToBoolean ( argument )
pub fn to_boolean(value: Value) -> bool {
    match value {
        Value::Undefined | Value::Uninit | Value::Null => false,
        Value::Bool(b) => b,
        Value::U32(n) => n != 0,
        Value::I32(n) => n != 0,
        Value::F64(n) => n != 0.0 && !n.is_nan(),
        Value::Atom(a) => a != atom::K_EMPTY,
        Value::String(s) => !s.as_ref().is_empty(),
        _ => true,
    }
}

/// The UTF-16 units of a string-ish value. Integer atoms materialize.
pub fn string_value_units<'a>(vm: &'a Vm, value: &Value) -> Cow<'a, [u16]> {
    match value {
        Value::Atom(a) if atom_is_int(*a) => {
            Cow::Owned(utf16_of(&atom_int_value(*a).to_string()))
        }
        Value::Atom(a) => Cow::Borrowed(vm.atoms.get_string(*a)),
        Value::String(s) => Cow::Borrowed(s.as_ref().units()),
        _ => unreachable!("string_value_units on a non-string value"),
    }
}

/// ### OrdinaryToPrimitive ( O, hint )
///
/// Tries `valueOf`/`toString` in hint order; the first call producing a
/// non-object wins.
pub fn to_primitive(
    vm: &mut Vm,
    value: Value,
    hint: PreferredType,
) -> JsResult<Value> {
    if !value.is_object() {
        return Ok(value);
    }
    let methods = if hint == PreferredType::String {
        [atom::K_TO_STRING, atom::K_VALUE_OF]
    } else {
        [atom::K_VALUE_OF, atom::K_TO_STRING]
    };
    // The receiver is rooted across both method calls; either one may
    // collect.
    vm.heap.push_temp_root(value);
    for method_atom in methods {
        let value = vm.heap.temp_root(0);
        let method = match vm.get_prop_atom_value(value, method_atom) {
            Ok(method) => method,
            Err(err) => {
                vm.heap.pop_temp_roots(1);
                return Err(err);
            }
        };
        if method.is_function() {
            let value = vm.heap.temp_root(0);
            match vm.call_checked(method, value, &[]) {
                Ok(result) if !result.is_object() => {
                    vm.heap.pop_temp_roots(1);
                    return Ok(result);
                }
                Ok(_) => {}
                Err(err) => {
                    vm.heap.pop_temp_roots(1);
                    return Err(err);
                }
            }
        }
    }
    vm.heap.pop_temp_roots(1);
    Err(vm.throw_error(
        ErrorKind::TypeError,
        "Cannot convert object to primitive value",
    ))
}

/// ### ToNumber ( argument )
pub fn to_number(vm: &mut Vm, value: Value) -> JsResult<f64> {
    match value {
        Value::U32(n) => Ok(n as f64),
        Value::I32(n) => Ok(n as f64),
        Value::F64(n) => Ok(n),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::Undefined | Value::Uninit => Ok(f64::NAN),
        Value::Atom(_) | Value::String(_) => {
            let units = string_value_units(vm, &value);
            Ok(string_units_to_number(&units))
        }
        Value::Symbol(_) => Err(vm.throw_error(
            ErrorKind::TypeError,
            "Cannot convert a Symbol value to a number",
        )),
        Value::Object(_) => {
            let primitive = to_primitive(vm, value, PreferredType::Number)?;
            to_number(vm, primitive)
        }
        _ => Ok(f64::NAN),
    }
}

/// ### StringToNumber ( str )
pub fn string_units_to_number(units: &[u16]) -> f64 {
    let text: String = String::from_utf16_lossy(units);
    let trimmed = text.trim_matches(|c: char| {
        c.is_whitespace() || c == '\u{feff}' || c == '\u{a0}'
    });
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    if let Some(oct) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        return u64::from_str_radix(oct, 8).map_or(f64::NAN, |n| n as f64);
    }
    if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        return u64::from_str_radix(bin, 2).map_or(f64::NAN, |n| n as f64);
    }
    fast_float::parse(trimmed).unwrap_or(f64::NAN)
}

/// ### ToString ( argument ), producing a string-ish value (atom or heap
/// string).
pub fn to_string_value(vm: &mut Vm, value: Value) -> JsResult<Value> {
    match value {
        Value::Atom(_) | Value::String(_) => Ok(value),
        Value::Undefined | Value::Uninit => Ok(Value::Atom(atom::K_UNDEFINED)),
        Value::Null => Ok(Value::Atom(atom::K_NULL)),
        Value::Bool(true) => Ok(Value::Atom(atom::K_TRUE)),
        Value::Bool(false) => Ok(Value::Atom(atom::K_FALSE)),
        Value::U32(_) | Value::I32(_) | Value::F64(_) => {
            let text = f64_to_js_string(value.number());
            Ok(Value::String(vm.heap.new_string_utf8(&text)))
        }
        Value::Symbol(_) => Err(vm.throw_error(
            ErrorKind::TypeError,
            "Cannot convert a Symbol value to a string",
        )),
        Value::Object(_) => {
            let primitive = to_primitive(vm, value, PreferredType::String)?;
            to_string_value(vm, primitive)
        }
        _ => Ok(Value::Atom(atom::K_UNDEFINED)),
    }
}

/// Human-facing rendering used by `console.log` and the uncaught-error
/// diagnostic.
pub fn to_display_string(vm: &mut Vm, value: Value) -> JsResult<String> {
    match value {
        Value::Object(obj) => match obj.as_ref().class() {
            ClassTag::Array => {
                let len = obj.as_ref().as_array().map_or(0, |a| a.len());
                if len == 0 {
                    return Ok("[]".to_string());
                }
                let mut out = String::from("[ ");
                // Rendering an element may collect; re-resolve the array
                // through the rooted value each round.
                vm.heap.push_temp_root(value);
                for i in 0..len {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let array = vm.heap.temp_root(0).as_object().unwrap();
                    let element = array
                        .as_ref()
                        .as_array()
                        .map_or(Value::Undefined, |a| a.get(i));
                    match to_display_string(vm, element) {
                        Ok(text) => out.push_str(&text),
                        Err(err) => {
                            vm.heap.pop_temp_roots(1);
                            return Err(err);
                        }
                    }
                }
                vm.heap.pop_temp_roots(1);
                out.push_str(" ]");
                Ok(out)
            }
            class if class.is_callable() => {
                let name = vm.function_name(obj);
                if name.is_empty() {
                    Ok("[Function (anonymous)]".to_string())
                } else {
                    Ok(format!("[Function: {name}]"))
                }
            }
            ClassTag::Error => {
                let name = vm.get_prop_atom_value(value, atom::K_NAME)?;
                let message = vm.get_prop_atom_value(value, atom::K_MESSAGE)?;
                let name = to_display_string(vm, name)?;
                let message = to_display_string(vm, message)?;
                if message.is_empty() {
                    Ok(name)
                } else {
                    Ok(format!("{name}: {message}"))
                }
            }
            class => Ok(format!("[object {}]", class.name())),
        },
        _ => {
            let text = to_string_value(vm, value)?;
            Ok(String::from_utf16_lossy(&string_value_units(vm, &text)))
        }
    }
}

// ---------------------------------------------------------------------
// Integer coercions
// ---------------------------------------------------------------------

/// ### ToInt32 ( argument ), on an already-numeric value.
pub fn f64_to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let n = n.trunc();
    let m = n.rem_euclid(4294967296.0);
    let m = if m >= 2147483648.0 { m - 4294967296.0 } else { m };
    m as i32
}

pub fn f64_to_uint32(n: f64) -> u32 {
    f64_to_int32(n) as u32
}

pub fn to_integer_or_infinity(n: f64) -> f64 {
    if n.is_nan() { 0.0 } else { n.trunc() }
}

/// An integral f64 within the integer-atom range, as an array index.
pub fn f64_array_index(n: f64) -> Option<u32> {
    if n.trunc() == n && (0.0..=atom::ATOM_INT_MAX as f64).contains(&n) {
        Some(n as u32)
    } else {
        None
    }
}

// ---------------------------------------------------------------------
// Equality and relational comparison
// ---------------------------------------------------------------------

/// ### IsStrictlyEqual ( x, y )
pub fn strict_equals(vm: &Vm, a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Uninit, Value::Undefined | Value::Uninit) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        _ if a.is_number() && b.is_number() => a.number() == b.number(),
        (Value::Atom(x), Value::Atom(y)) if x == y => true,
        _ if a.is_string() && b.is_string() => {
            string_value_units(vm, &a) == string_value_units(vm, &b)
        }
        (Value::Object(x), Value::Object(y)) => x.same(y),
        _ => false,
    }
}

/// ### SameValue ( x, y ): strict equality except NaN equals NaN and the
/// two zeros differ.
pub fn same_value(vm: &Vm, a: Value, b: Value) -> bool {
    if a.is_number() && b.is_number() {
        let (x, y) = (a.number(), b.number());
        if x.is_nan() && y.is_nan() {
            return true;
        }
        if x == 0.0 && y == 0.0 {
            return x.is_sign_positive() == y.is_sign_positive();
        }
        return x == y;
    }
    strict_equals(vm, a, b)
}

/// ### IsLooselyEqual ( x, y )
pub fn abstract_equals(vm: &mut Vm, a: Value, b: Value) -> JsResult<bool> {
    if value_types_match(a, b) {
        return Ok(strict_equals(vm, a, b));
    }
    match (a, b) {
        (Value::Null, Value::Undefined | Value::Uninit)
        | (Value::Undefined | Value::Uninit, Value::Null) => Ok(true),
        _ if a.is_number() && b.is_string() => {
            let n = to_number(vm, b)?;
            Ok(a.number() == n)
        }
        _ if a.is_string() && b.is_number() => {
            let n = to_number(vm, a)?;
            Ok(n == b.number())
        }
        (Value::Bool(_), _) => {
            let n = to_number(vm, a)?;
            abstract_equals(vm, Value::F64(n), b)
        }
        (_, Value::Bool(_)) => {
            let n = to_number(vm, b)?;
            abstract_equals(vm, a, Value::F64(n))
        }
        (Value::Object(_), _) if !b.is_object() && !b.is_nil() => {
            vm.heap.push_temp_root(b);
            let prim = to_primitive(vm, a, PreferredType::Default);
            let b = vm.heap.temp_root(0);
            vm.heap.pop_temp_roots(1);
            abstract_equals(vm, prim?, b)
        }
        (_, Value::Object(_)) if !a.is_object() && !a.is_nil() => {
            vm.heap.push_temp_root(a);
            let prim = to_primitive(vm, b, PreferredType::Default);
            let a = vm.heap.temp_root(0);
            vm.heap.pop_temp_roots(1);
            abstract_equals(vm, a, prim?)
        }
        _ => Ok(false),
    }
}

fn value_types_match(a: Value, b: Value) -> bool {
    if a.is_number() && b.is_number() {
        return true;
    }
    if a.is_string() && b.is_string() {
        return true;
    }
    matches!(
        (a, b),
        (Value::Undefined | Value::Uninit, Value::Undefined | Value::Uninit)
            | (Value::Null, Value::Null)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Symbol(_), Value::Symbol(_))
            | (Value::Object(_), Value::Object(_))
    )
}

/// ### IsLessThan ( x, y ): `None` means an incomparable NaN operand.
pub fn abstract_less_than(
    vm: &mut Vm,
    a: Value,
    b: Value,
) -> JsResult<Option<bool>> {
    vm.heap.push_temp_root(b);
    let pa = to_primitive(vm, a, PreferredType::Number);
    let b = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    let pa = pa?;
    vm.heap.push_temp_root(pa);
    let pb = to_primitive(vm, b, PreferredType::Number);
    let pa = vm.heap.temp_root(0);
    vm.heap.pop_temp_roots(1);
    let pb = pb?;
    if pa.is_string() && pb.is_string() {
        let ua = string_value_units(vm, &pa).into_owned();
        let ub = string_value_units(vm, &pb);
        return Ok(Some(units_cmp(&ua, &ub) == std::cmp::Ordering::Less));
    }
    let na = to_number(vm, pa)?;
    let nb = to_number(vm, pb)?;
    if na.is_nan() || nb.is_nan() {
        return Ok(None);
    }
    Ok(Some(na < nb))
}

/// The atom naming `typeof value`.
pub fn typeof_atom(value: Value) -> Atom {
    match value {
        Value::Undefined | Value::Uninit => atom::K_UNDEFINED,
        Value::Null => atom::K_OBJECT,
        Value::Bool(_) => atom::K_BOOLEAN,
        Value::U32(_) | Value::I32(_) | Value::F64(_) => atom::K_NUMBER,
        Value::Atom(_) | Value::String(_) => atom::K_STRING,
        Value::Symbol(_) => atom::K_SYMBOL,
        Value::Object(obj) if obj.as_ref().class().is_callable() => {
            atom::K_FUNCTION
        }
        _ => atom::K_OBJECT,
    }
}

// ---------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------

/// ### Number::toString ( x, 10 )
pub fn f64_to_js_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let mut buffer = ryu_js::Buffer::new();
    buffer.format(n).to_string()
}

/// Format with an explicit fraction-digit count (`Number.prototype.toFixed`).
pub fn f64_to_fixed_string(n: f64, digits: u8) -> String {
    if !n.is_finite() {
        return f64_to_js_string(n);
    }
    let mut buffer = ryu_js::Buffer::new();
    buffer.format_to_fixed(n, digits).to_string()
}

macro_rules! radix_arms {
    ($value:expr, $radix:expr, [$($r:literal),* $(,)?]) => {
        match $radix {
            $(
                $r => {
                    const FORMAT: u128 =
                        lexical::NumberFormatBuilder::from_radix($r);
                    lexical::to_string_with_options::<i64, FORMAT>(
                        $value,
                        &lexical::WriteIntegerOptions::new(),
                    )
                }
            )*
            _ => unreachable!("radix out of range"),
        }
    };
}

fn i64_to_radix_string(value: i64, radix: u32) -> String {
    let mut text = radix_arms!(value, radix, [
        2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
        21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36,
    ]);
    text.make_ascii_lowercase();
    text
}

/// ### Number::toString ( x, radix ), radix in 2..=36.
pub fn f64_to_radix_string(n: f64, radix: u32) -> String {
    debug_assert!((2..=36).contains(&radix));
    if radix == 10 || !n.is_finite() {
        return f64_to_js_string(n);
    }
    let negative = n < 0.0;
    let n = n.abs();
    let int_part = n.trunc();
    let mut out = if negative { "-".to_string() } else { String::new() };
    if int_part <= i64::MAX as f64 {
        out.push_str(&i64_to_radix_string(int_part as i64, radix));
    } else {
        return f64_to_js_string(if negative { -n } else { n });
    }
    let mut frac = n.fract();
    if frac > 0.0 {
        out.push('.');
        // Twenty digits is plenty for a debug surface; exact shortest-digit
        // rounding in odd radixes is out of scope.
        for _ in 0..20 {
            frac *= radix as f64;
            let digit = frac.trunc() as u32;
            out.push(char::from_digit(digit, radix).unwrap());
            frac -= digit as f64;
            if frac <= 0.0 {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_wrapping() {
        assert_eq!(f64_to_int32(0.0), 0);
        assert_eq!(f64_to_int32(-1.0), -1);
        assert_eq!(f64_to_int32(4294967296.0), 0);
        assert_eq!(f64_to_int32(2147483648.0), -2147483648);
        assert_eq!(f64_to_int32(f64::NAN), 0);
        assert_eq!(f64_to_uint32(-1.0), 4294967295);
    }

    #[test]
    fn string_to_number_forms() {
        assert_eq!(string_units_to_number(&utf16_of("")), 0.0);
        assert_eq!(string_units_to_number(&utf16_of("  42  ")), 42.0);
        assert_eq!(string_units_to_number(&utf16_of("0x10")), 16.0);
        assert_eq!(string_units_to_number(&utf16_of("1.5e2")), 150.0);
        assert_eq!(
            string_units_to_number(&utf16_of("-Infinity")),
            f64::NEG_INFINITY
        );
        assert!(string_units_to_number(&utf16_of("12abc")).is_nan());
    }

    #[test]
    fn js_number_formatting() {
        assert_eq!(f64_to_js_string(42.0), "42");
        assert_eq!(f64_to_js_string(-0.5), "-0.5");
        assert_eq!(f64_to_js_string(f64::NAN), "NaN");
        assert_eq!(f64_to_js_string(f64::INFINITY), "Infinity");
    }

    #[test]
    fn radix_formatting() {
        assert_eq!(f64_to_radix_string(255.0, 16), "ff");
        assert_eq!(f64_to_radix_string(-8.0, 2), "-1000");
        assert_eq!(f64_to_radix_string(0.5, 2), "0.1");
    }

    #[test]
    fn equality_edge_cases() {
        let mut b = crate::bytecode::ProgramBuilder::new();
        b.emit(crate::bytecode::OpCode::Halt);
        let entry = b.add_meta(crate::bytecode::FunctionMeta::default());
        let vm =
            crate::vm::Vm::new(b.finish(entry), crate::vm::VmOptions::default());
        let vm = &*vm;

        let nan = Value::F64(f64::NAN);
        assert!(!strict_equals(vm, nan, nan));
        assert!(same_value(vm, nan, nan));
        assert!(strict_equals(vm, Value::F64(0.0), Value::F64(-0.0)));
        assert!(!same_value(vm, Value::F64(0.0), Value::F64(-0.0)));
        // Reflexive and symmetric across numeric representations.
        assert!(strict_equals(vm, Value::I32(3), Value::F64(3.0)));
        assert!(strict_equals(vm, Value::F64(3.0), Value::I32(3)));
        assert!(strict_equals(
            vm,
            Value::Atom(atom::K_TRUE),
            Value::Atom(atom::K_TRUE)
        ));
        assert!(!strict_equals(
            vm,
            Value::Bool(true),
            Value::Atom(atom::K_TRUE)
        ));
    }
}
