// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The virtual machine: owns the heap, the bytecode and pools, the frame
//! list, the prototype graph and the event loop, and drives execution from
//! the top-level call through microtask and macrotask completion.

mod access;
mod calls;
mod completion;
mod exec;
mod frame;
pub(crate) mod promise_ops;

pub use completion::{CallFlags, Completion};
pub use frame::{ResumableState, StackFrame};

use std::collections::VecDeque;

use tracing::debug;

use crate::atom::{self, AtomPool};
use crate::bytecode::{FunctionMeta, Instruction, NativeFn, Program};
use crate::conversion::to_display_string;
use crate::error::{
    ERROR_KIND_COUNT, ErrorKind, JsError, StackTraceItem, format_stack_trace,
};
use crate::event_loop::{EventLoop, Task, TaskPayload};
use crate::heap::{GcHeap, GcRef, HeapOptions};
use crate::object::{
    ClassTag, FunctionData, JsObject, ObjectExtra, PropFlags, Property,
    PropertyKey,
};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct VmOptions {
    pub heap_size_mb: usize,
    pub disable_gc: bool,
    pub print_internals: bool,
    pub worker_threads: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            heap_size_mb: 64,
            disable_gc: false,
            print_internals: false,
            worker_threads: 4,
        }
    }
}

/// The wired prototype graph. Every field is an object value once setup has
/// run; all of them are GC roots.
#[derive(Debug, Default)]
pub struct Prototypes {
    pub object: Value,
    pub array: Value,
    pub function: Value,
    pub number: Value,
    pub string: Value,
    pub boolean: Value,
    pub errors: [Value; ERROR_KIND_COUNT],
    pub promise: Value,
    pub generator: Value,
    pub iterator: Value,
    pub array_iterator: Value,
    pub string_iterator: Value,
    pub regexp: Value,
    pub date: Value,
}

impl Prototypes {
    fn gather_roots(&mut self, out: &mut Vec<*mut Value>) {
        let Prototypes {
            object,
            array,
            function,
            number,
            string,
            boolean,
            errors,
            promise,
            generator,
            iterator,
            array_iterator,
            string_iterator,
            regexp,
            date,
        } = self;
        for value in [
            object,
            array,
            function,
            number,
            string,
            boolean,
            promise,
            generator,
            iterator,
            array_iterator,
            string_iterator,
            regexp,
            date,
        ] {
            out.push(value as *mut Value);
        }
        for value in errors.iter_mut() {
            out.push(value as *mut Value);
        }
    }
}

/// Metadata indices of the shared native entry points the interpreter
/// itself instantiates (the promise settle pair and the async-resume
/// callbacks).
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RuntimeNatives {
    pub promise_resolve_meta: u32,
    pub promise_reject_meta: u32,
    pub async_on_fulfilled_meta: u32,
    pub async_on_rejected_meta: u32,
    pub promise_all_step_meta: u32,
    pub promise_all_reject_meta: u32,
}

pub struct Vm {
    pub(crate) heap: GcHeap,
    pub(crate) bytecode: Vec<Instruction>,
    pub(crate) metas: Vec<FunctionMeta>,
    pub(crate) atoms: AtomPool,
    pub(crate) numbers: Vec<f64>,
    entry_meta: u32,

    pub(crate) frames: Vec<Box<StackFrame>>,
    /// The top-level frame once `halt` has run; its locals are the global
    /// script variables and outlive the call for later tasks.
    pub(crate) global_frame: Option<Box<StackFrame>>,
    pub(crate) global_object: Value,
    pub(crate) global_func: Value,
    pub(crate) protos: Prototypes,
    pub(crate) natives: RuntimeNatives,

    pub(crate) micro_tasks: VecDeque<Task>,
    pub(crate) event_loop: EventLoop,
    /// The task currently executing; parked here so its values stay in the
    /// root set while the call runs.
    pub(crate) current_task: Option<Task>,
    /// Synthesized argument vectors (bound calls, `apply`, promise jobs)
    /// live here for the duration of the call so the collector can rewrite
    /// them in place.
    pub(crate) native_arg_stack: Vec<Vec<Value>>,

    /// Every `console.log` line, for embedders and tests.
    pub(crate) log_buffer: Vec<String>,
    pub(crate) options: VmOptions,
}

impl Vm {
    /// Build a VM from a compiled program. The box gives the heap's GC
    /// thread a stable address to gather roots through.
    pub fn new(program: Program, options: VmOptions) -> Box<Vm> {
        let Program { bytecode, metas, atoms, numbers, entry_meta } = program;
        let heap = GcHeap::new(HeapOptions {
            heap_size_mb: options.heap_size_mb,
            disable_gc: options.disable_gc,
        });
        let worker_threads = options.worker_threads;
        let mut vm = Box::new(Vm {
            heap,
            bytecode,
            metas,
            atoms,
            numbers,
            entry_meta,
            frames: Vec::new(),
            global_frame: None,
            global_object: Value::Undefined,
            global_func: Value::Undefined,
            protos: Prototypes::default(),
            natives: RuntimeNatives::default(),
            micro_tasks: VecDeque::new(),
            event_loop: EventLoop::new(worker_threads),
            current_task: None,
            native_arg_stack: Vec::new(),
            log_buffer: Vec::new(),
            options,
        });
        let vm_ptr: *mut Vm = &mut *vm;
        vm.heap.attach_vm(vm_ptr);
        crate::runtime::setup(&mut vm);
        vm
    }

    /// Execute the top-level function, then drain microtasks and poll the
    /// macrotask queue until the loop is idle. An uncaught top-level error
    /// ends execution with the formatted diagnostic.
    pub fn run(&mut self) -> Result<(), String> {
        let global_func = self.global_func;
        let global_this = self.global_object;
        let completion =
            self.call_function(global_func, global_this, &[]);
        if let Completion::Throw(err) = completion {
            let diagnostic = self.uncaught_diagnostic(err);
            eprintln!("Uncaught {diagnostic}");
            return Err(diagnostic);
        }
        self.run_pending();
        Ok(())
    }

    /// Drain microtasks and poll the macrotask queue until the loop is
    /// idle. `run` ends with this; embedders that post host tasks after the
    /// script call it again.
    pub fn run_pending(&mut self) {
        self.drain_microtasks();
        while let Some(id) = self.event_loop.next_ready() {
            if let Some(task) = self.event_loop.take_task(id) {
                self.execute_task(task);
                self.drain_microtasks();
            }
        }
    }

    /// A global-object property by name, for embedders.
    pub fn global_value(&mut self, name: &str) -> Option<Value> {
        let key = PropertyKey::Atom(self.atoms.atomize_str(name));
        let global = self.global_object;
        self.get_prop(global, key).ok()
    }

    pub fn gc_stats(&self) -> crate::heap::GcStats {
        self.heap.stats
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log_buffer
    }

    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log_buffer)
    }

    pub(crate) fn push_log(&mut self, line: String) {
        if self.options.print_internals {
            println!("{line}");
        }
        self.log_buffer.push(line);
    }

    /// Submit blocking host work; the callable runs as a macrotask with the
    /// produced payload as its argument.
    pub fn post_blocking_task(
        &mut self,
        callable: Value,
        job: Box<dyn FnOnce() -> TaskPayload + Send>,
    ) -> u64 {
        self.event_loop.submit_blocking(callable, job)
    }

    pub(crate) fn drain_microtasks(&mut self) {
        while let Some(task) = self.micro_tasks.pop_front() {
            self.run_task(task);
        }
    }

    pub(crate) fn execute_task(&mut self, mut task: Task) {
        if task.canceled {
            return;
        }
        if let Some(text) = task.pending_text.take() {
            let s = self.heap.new_string_utf8(&text);
            task.args.push(Value::String(s));
        }
        debug!(id = task.id, "macrotask dispatch");
        self.run_task(task);
    }

    fn run_task(&mut self, task: Task) {
        // Park the task so its callable and arguments stay rooted (and get
        // rewritten in place by the collector) for the whole call.
        let previous = self.current_task.replace(task);
        let this = self.global_object;
        let (native, callable, args_ptr, args_len) = {
            let task = self.current_task.as_ref().unwrap();
            (
                task.native,
                task.callable,
                task.args.as_ptr(),
                task.args.len(),
            )
        };
        // The slice aliases `current_task.args`, which only the collector
        // touches while the call runs.
        let args = unsafe { std::slice::from_raw_parts(args_ptr, args_len) };
        let completion = match native {
            Some(native) => {
                native(self, Value::Undefined, this, args, CallFlags::default())
            }
            None => self.call_function(callable, this, args),
        };
        self.current_task = previous;
        if let Completion::Throw(err) = completion {
            let diagnostic = self.uncaught_diagnostic(err);
            eprintln!("Uncaught (in task) {diagnostic}");
        }
    }

    // -----------------------------------------------------------------
    // Errors and stack traces
    // -----------------------------------------------------------------

    /// Allocate an error object of `kind` with `message` and a `stack`
    /// snapshot of the live frame chain.
    pub(crate) fn build_error_value(
        &mut self,
        kind: ErrorKind,
        message: &str,
    ) -> Value {
        let stack_text = format_stack_trace(&self.capture_stack_trace());
        let proto = self.protos.errors[kind as usize];
        let error =
            self.heap.new_object_payload(JsObject::new(ClassTag::Error, proto));
        self.heap.push_temp_root(Value::Object(error));
        let message_value =
            Value::String(self.heap.new_string_utf8(message));
        let error = self.heap.temp_root(0).as_object().unwrap();
        self.define_prop(
            error,
            PropertyKey::Atom(atom::K_MESSAGE),
            message_value,
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
        let stack_value =
            Value::String(self.heap.new_string_utf8(&stack_text));
        let error = self.heap.temp_root(0).as_object().unwrap();
        self.define_prop(
            error,
            PropertyKey::Atom(atom::K_STACK),
            stack_value,
            PropFlags::WRITABLE.with(PropFlags::CONFIGURABLE),
        );
        self.heap.pop_temp_roots(1);
        Value::Object(error)
    }

    pub(crate) fn throw_error(
        &mut self,
        kind: ErrorKind,
        message: &str,
    ) -> JsError {
        JsError::new(self.build_error_value(kind, message))
    }

    pub fn capture_stack_trace(&self) -> Vec<StackTraceItem> {
        let mut items = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let Some(obj) = frame.function.as_object() else {
                continue;
            };
            let Some(func) = obj.as_ref().as_function() else {
                continue;
            };
            let meta = &self.metas[func.meta_idx as usize];
            items.push(StackTraceItem {
                func_name: self.atoms.atom_utf8(meta.name_atom),
                source_line: meta.source_line,
                is_native: meta.is_native,
            });
        }
        items
    }

    fn uncaught_diagnostic(&mut self, err: Value) -> String {
        let Ok(mut text) = to_display_string(self, err) else {
            return "<unprintable error>".to_string();
        };
        let is_error_object = err
            .as_object()
            .is_some_and(|obj| obj.as_ref().class() == ClassTag::Error);
        if is_error_object {
            let stack = self.get_prop_atom_value(err, atom::K_STACK);
            if let Ok(stack_value) = stack {
                if let Ok(stack) = to_display_string(self, stack_value) {
                    text.push('\n');
                    text.push_str(&stack);
                }
            }
        }
        text
    }

    // -----------------------------------------------------------------
    // Allocation and registration helpers
    // -----------------------------------------------------------------

    pub(crate) fn new_plain_object(&mut self) -> GcRef<JsObject> {
        let proto = self.protos.object;
        self.heap.new_object_payload(JsObject::new(ClassTag::Object, proto))
    }

    pub(crate) fn new_function_object(
        &mut self,
        meta_idx: u32,
    ) -> GcRef<JsObject> {
        let meta = &self.metas[meta_idx as usize];
        let class = if meta.is_async {
            ClassTag::AsyncFunction
        } else if meta.is_generator {
            ClassTag::GeneratorFunction
        } else {
            ClassTag::Function
        };
        let proto = self.protos.function;
        let mut object = JsObject::with_extra(
            class,
            proto,
            ObjectExtra::Function(Box::new(FunctionData::new(meta_idx))),
        );
        // Ordinary functions get a lazily materialized `prototype`.
        if class == ClassTag::Function && !meta.is_arrow && !meta.is_native {
            object.set_own(
                PropertyKey::Atom(atom::K_PROTOTYPE),
                Property::data_value(
                    Value::Undefined,
                    PropFlags::WRITABLE.with(PropFlags::LAZY_PROTO),
                ),
            );
        }
        let name_atom = meta.name_atom;
        let param_count = meta.param_count;
        object.set_own(
            PropertyKey::Atom(atom::K_NAME),
            Property::data_value(
                Value::Atom(name_atom),
                PropFlags::CONFIGURABLE,
            ),
        );
        object.set_own(
            PropertyKey::Atom(atom::K_LENGTH),
            Property::data_value(
                Value::U32(param_count as u32),
                PropFlags::CONFIGURABLE,
            ),
        );
        self.heap.new_object_payload(object)
    }

    /// Instantiate a shared native with its auxiliary value (the promise a
    /// settle function targets, the outer promise of an async resume).
    pub(crate) fn new_function_with_aux(
        &mut self,
        meta_idx: u32,
        aux: Value,
    ) -> Value {
        self.heap.push_temp_root(aux);
        let func = self.new_function_object(meta_idx);
        let aux = self.heap.temp_root(0);
        self.heap.pop_temp_roots(1);
        let data = func.as_mut().as_function_mut().unwrap();
        data.this_or_aux = aux;
        data.has_aux = true;
        self.heap.write_barrier(func, aux);
        Value::Object(func)
    }

    pub(crate) fn register_native_meta(
        &mut self,
        name: &str,
        param_count: u16,
        func: NativeFn,
        magic: u32,
    ) -> u32 {
        let name_atom = self.atoms.atomize_str(name);
        let meta = FunctionMeta {
            magic,
            ..FunctionMeta::native(name_atom, param_count, func)
        };
        self.metas.push(meta);
        self.metas.len() as u32 - 1
    }

    /// Store a property with the write barrier applied.
    pub(crate) fn define_prop(
        &mut self,
        obj: GcRef<JsObject>,
        key: PropertyKey,
        value: Value,
        flags: PropFlags,
    ) {
        self.heap.write_barrier(obj, value);
        obj.as_mut().set_own(key, Property::data_value(value, flags));
    }

    pub(crate) fn define_accessor(
        &mut self,
        obj: GcRef<JsObject>,
        key: PropertyKey,
        getter: Value,
        setter: Value,
        flags: PropFlags,
    ) {
        self.heap.write_barrier(obj, getter);
        self.heap.write_barrier(obj, setter);
        obj.as_mut().set_own(key, Property::accessor(getter, setter, flags));
    }

    pub(crate) fn entry_meta(&self) -> u32 {
        self.entry_meta
    }

    /// The running native's receiver, re-read from its frame. Native
    /// parameters are plain copies; after any step that can collect, the
    /// frame slot holds the relocated value and the copy does not.
    pub(crate) fn current_this(&self) -> Value {
        self.frames.last().map_or(Value::Undefined, |f| f.this_val)
    }

    pub(crate) fn natives_all_step_meta(&self) -> u32 {
        self.natives.promise_all_step_meta
    }

    pub(crate) fn natives_all_reject_meta(&self) -> u32 {
        self.natives.promise_all_reject_meta
    }

    pub(crate) fn function_name(&self, obj: GcRef<JsObject>) -> String {
        match &obj.as_ref().extra {
            ObjectExtra::Function(data) => {
                self.atoms.atom_utf8(self.metas[data.meta_idx as usize].name_atom)
            }
            ObjectExtra::Bound(data) => match data.target.as_object() {
                Some(target) => format!("bound {}", self.function_name(target)),
                None => "bound".to_string(),
            },
            _ => String::new(),
        }
    }

    pub(crate) fn meta_of(&self, obj: GcRef<JsObject>) -> Option<&FunctionMeta> {
        obj.as_ref()
            .as_function()
            .map(|data| &self.metas[data.meta_idx as usize])
    }

    /// Pointer to the frame whose locals back the `Global` scope kind: the
    /// detached global frame after `halt`, the bottom live frame before.
    pub(crate) fn global_frame_ptr(&mut self) -> *mut StackFrame {
        match &mut self.global_frame {
            Some(frame) => &mut **frame as *mut StackFrame,
            None => {
                let frame =
                    self.frames.first_mut().expect("no global frame yet");
                &mut **frame as *mut StackFrame
            }
        }
    }

    // -----------------------------------------------------------------
    // GC integration
    // -----------------------------------------------------------------

    /// Collect the full root set: interpreter frames, the global graph, all
    /// task values and the temporary-root stack. Called by the GC thread
    /// while the mutator is parked.
    pub(crate) fn gather_roots(&mut self, out: &mut Vec<*mut Value>) {
        out.push(&mut self.global_object as *mut Value);
        out.push(&mut self.global_func as *mut Value);
        self.protos.gather_roots(out);
        for frame in self.frames.iter_mut() {
            frame.gather_roots(out);
        }
        if let Some(frame) = &mut self.global_frame {
            frame.gather_roots(out);
        }
        for task in self.micro_tasks.iter_mut() {
            task.gather_roots(out);
        }
        if let Some(task) = &mut self.current_task {
            task.gather_roots(out);
        }
        for args in self.native_arg_stack.iter_mut() {
            for value in args.iter_mut() {
                out.push(value as *mut Value);
            }
        }
        self.event_loop.gather_roots(out);
        self.heap.gather_heap_roots(out);
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.event_loop.shutdown();
    }
}
