// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The minimal `Date` surface: `now`, millisecond timestamps, and an ISO
//! rendering. Date-string parsing is an admitted stub.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ErrorKind;
use crate::object::{ClassTag, JsObject, ObjectExtra};
use crate::runtime::{add_method, arg};
use crate::value::Value;
use crate::vm::{CallFlags, Completion, Vm};

pub(crate) fn install(vm: &mut Vm) {
    let proto = vm.protos.date;
    add_method(vm, proto, "getTime", 0, get_time);
    let proto = vm.protos.date;
    add_method(vm, proto, "valueOf", 0, get_time);
    let proto = vm.protos.date;
    add_method(vm, proto, "toISOString", 0, to_iso_string);

    let proto = vm.protos.date;
    let ctor =
        crate::runtime::add_constructor(vm, "Date", 1, constructor, 0, proto);
    add_method(vm, ctor, "now", 0, date_now);
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

fn constructor(
    vm: &mut Vm,
    _func: Value,
    _this: Value,
    args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let timestamp = match arg(args, 0) {
        Value::Undefined => now_millis(),
        v if v.is_number() => v.number(),
        _ => {
            // Date-string parsing is not covered; defer to upstream.
            return Completion::Throw(vm.build_error_value(
                ErrorKind::InternalError,
                "Date string parsing is not supported",
            ));
        }
    };
    let proto = vm.protos.date;
    let date = vm.heap.new_object_payload(JsObject::with_extra(
        ClassTag::Date,
        proto,
        ObjectExtra::Date { timestamp },
    ));
    Completion::Normal(Value::Object(date))
}

fn date_now(
    _vm: &mut Vm,
    _func: Value,
    _this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    Completion::Normal(Value::F64(now_millis()))
}

fn this_timestamp(vm: &mut Vm, this: Value) -> Result<f64, Completion> {
    if let Some(obj) = this.as_object() {
        if let ObjectExtra::Date { timestamp } = obj.as_ref().extra {
            return Ok(timestamp);
        }
    }
    Err(Completion::Throw(vm.build_error_value(
        ErrorKind::TypeError,
        "Receiver is not a Date",
    )))
}

fn get_time(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    match this_timestamp(vm, this) {
        Ok(timestamp) => Completion::Normal(Value::F64(timestamp)),
        Err(completion) => completion,
    }
}

fn to_iso_string(
    vm: &mut Vm,
    _func: Value,
    this: Value,
    _args: &[Value],
    _flags: CallFlags,
) -> Completion {
    let timestamp = match this_timestamp(vm, this) {
        Ok(timestamp) => timestamp,
        Err(completion) => return completion,
    };
    if !timestamp.is_finite() {
        return Completion::Throw(
            vm.build_error_value(ErrorKind::RangeError, "Invalid time value"),
        );
    }
    let text = format_iso(timestamp as i64);
    Completion::Normal(Value::String(vm.heap.new_string_utf8(&text)))
}

/// Civil-from-days conversion for the ISO rendering.
fn format_iso(millis: i64) -> String {
    let (days, mut rem) = (millis.div_euclid(86_400_000), millis.rem_euclid(86_400_000));
    let ms = rem % 1000;
    rem /= 1000;
    let (seconds, minutes, hours) = (rem % 60, (rem / 60) % 60, rem / 3600);

    // Howard Hinnant's civil_from_days.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    format!(
        "{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{ms:03}Z"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_formatting() {
        assert_eq!(format_iso(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_iso(86_400_000), "1970-01-02T00:00:00.000Z");
        assert_eq!(format_iso(1_000_000_000_000), "2001-09-09T01:46:40.000Z");
    }
}
