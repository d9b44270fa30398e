// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Promise state. Settling is monotonic: once fulfilled or rejected, later
//! settle attempts are no-ops. Then-records are an inline-plus-vector list;
//! draining them enqueues one microtask per record. The actual chaining
//! logic (adoption of thenables, self-resolution detection) lives in the
//! shared native microtask body registered by the runtime.

use crate::value::Value;
use crate::vm::ResumableState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// One `then`/`catch`/`finally` registration on a pending promise.
#[derive(Debug, Clone, Copy)]
pub struct ThenRecord {
    pub on_fulfilled: Value,
    pub on_rejected: Value,
    /// Resolve function of the promise `then` returned; its auxiliary slot
    /// points back at that promise.
    pub next_resolve: Value,
    pub next_reject: Value,
}

#[derive(Debug)]
pub struct PromiseData {
    pub state: PromiseState,
    pub result: Value,
    /// First record inline, overflow in the vector.
    pub first_record: Option<ThenRecord>,
    pub records: Vec<ThenRecord>,
    /// Suspended frame of the async function this promise fronts, if any.
    pub resume: Option<Box<ResumableState>>,
    /// Whether a rejection has a handler attached; used by the unhandled
    /// rejection diagnostic.
    pub handled: bool,
}

impl Default for PromiseData {
    fn default() -> Self {
        Self {
            state: PromiseState::Pending,
            result: Value::Undefined,
            first_record: None,
            records: Vec::new(),
            resume: None,
            handled: false,
        }
    }
}

impl PromiseData {
    pub fn is_pending(&self) -> bool {
        self.state == PromiseState::Pending
    }

    pub fn put_record(&mut self, record: ThenRecord) {
        self.handled = true;
        if self.first_record.is_none() && self.records.is_empty() {
            self.first_record = Some(record);
        } else {
            self.records.push(record);
        }
    }

    /// Take every pending record, inline one first.
    pub fn drain_records(&mut self) -> Vec<ThenRecord> {
        let mut drained =
            Vec::with_capacity(self.records.len() + usize::from(self.first_record.is_some()));
        if let Some(first) = self.first_record.take() {
            drained.push(first);
        }
        drained.append(&mut self.records);
        drained
    }

    pub fn visit_children(&mut self, f: &mut dyn FnMut(&mut Value)) {
        f(&mut self.result);
        if let Some(record) = &mut self.first_record {
            record.visit_children(f);
        }
        for record in self.records.iter_mut() {
            record.visit_children(f);
        }
        if let Some(state) = &mut self.resume {
            state.visit_children(f);
        }
    }
}

impl ThenRecord {
    pub fn visit_children(&mut self, f: &mut dyn FnMut(&mut Value)) {
        f(&mut self.on_fulfilled);
        f(&mut self.on_rejected);
        f(&mut self.next_resolve);
        f(&mut self.next_reject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: i32) -> ThenRecord {
        ThenRecord {
            on_fulfilled: Value::I32(tag),
            on_rejected: Value::Undefined,
            next_resolve: Value::Undefined,
            next_reject: Value::Undefined,
        }
    }

    #[test]
    fn records_drain_in_registration_order() {
        let mut data = PromiseData::default();
        data.put_record(record(1));
        data.put_record(record(2));
        data.put_record(record(3));
        assert!(data.first_record.is_some());
        let drained = data.drain_records();
        let tags: Vec<i32> = drained
            .iter()
            .map(|r| match r.on_fulfilled {
                Value::I32(tag) => tag,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(tags, [1, 2, 3]);
        assert!(data.first_record.is_none());
        assert!(data.records.is_empty());
    }
}
