// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vesper: an ECMAScript-subset bytecode virtual machine.
//!
//! The engine consumes the output of an external codegen — a linear
//! instruction stream, a per-function metadata table, an interned
//! atom pool and a numeric literal pool bundled as a
//! [`bytecode::Program`] — and executes it against a generational,
//! moving heap with a cooperative event loop.
//!
//! ```no_run
//! use vesper_vm::bytecode::{FunctionMeta, OpCode, ProgramBuilder};
//! use vesper_vm::vm::{Vm, VmOptions};
//!
//! let mut b = ProgramBuilder::new();
//! let start = b.here();
//! b.emit(OpCode::Halt);
//! let entry = b.add_meta(FunctionMeta {
//!     bytecode_start: start,
//!     stack_size: 8,
//!     ..FunctionMeta::default()
//! });
//! let mut vm = Vm::new(b.finish(entry), VmOptions::default());
//! vm.run().unwrap();
//! ```

pub mod atom;
pub mod bytecode;
pub mod conversion;
pub mod error;
pub mod event_loop;
pub mod heap;
pub mod image;
pub mod object;
pub mod runtime;
pub mod string;
pub mod value;
pub mod vm;

pub use bytecode::{Program, ProgramBuilder};
pub use error::{JsError, JsResult};
pub use value::Value;
pub use vm::{Vm, VmOptions};
