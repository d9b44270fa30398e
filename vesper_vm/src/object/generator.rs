// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generator object state: the suspended frame and the done flag. The
//! resumable state is dropped as soon as the generator completes.

use crate::value::Value;
use crate::vm::ResumableState;

#[derive(Debug, Default)]
pub struct GeneratorData {
    pub state: Option<Box<ResumableState>>,
    pub done: bool,
}

impl GeneratorData {
    pub fn visit_children(&mut self, f: &mut dyn FnMut(&mut Value)) {
        if let Some(state) = &mut self.state {
            state.visit_children(f);
        }
    }

    pub fn dispose_state(&mut self) {
        self.state = None;
        self.done = true;
    }
}
