// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bytecode surface: instruction encoding, function metadata, the catch
//! table, and the [`Program`] bundle handed to the VM by an external
//! codegen. A [`ProgramBuilder`] provides the assembling interface used by
//! tests and embedders, including the post-codegen jump fixup pass.

use crate::atom::{Atom, AtomPool};
use crate::vm::{CallFlags, Completion, Vm};
use crate::value::Value;

/// Native function entry point. Receives the function value itself, the
/// `this` argument (or the new target on construct calls, see
/// [`CallFlags::this_is_new_target`]), and the argument span.
pub type NativeFn =
    fn(&mut Vm, Value, Value, &[Value], CallFlags) -> Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    Halt,
    HaltErr,

    // Constants.
    PushI32,
    /// Immediate f64 in the wide operand.
    PushF64,
    /// f64 from the numeric literal pool.
    PushNum,
    /// Primitive string built from an atom's text.
    PushStr,
    PushAtom,
    PushBool,
    PushNull,
    PushUndef,
    PushUninit,
    PushThis,
    PushGlobalThis,

    // Stack shuffling.
    PopDrop,
    Dup,
    MoveToTop1,
    MoveToTop2,

    // Variable access; operand one is the scope kind, operand two the index.
    PushVar,
    PushVarCheck,
    PopVar,
    PopVarCheck,
    StoreVar,
    StoreVarCheck,

    // Locals bookkeeping.
    VarUndef,
    VarDeinit,
    VarDeinitRange,
    VarDispose,
    VarDisposeRange,
    LoopVarRenew,
    StoreCurrFunc,

    // Arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Inc,
    Dec,
    AddToLeft,

    // Bit operations; the `I` forms carry the shift count as an immediate.
    BitsAnd,
    BitsOr,
    BitsXor,
    BitsNot,
    Lsh,
    LshI,
    Rsh,
    RshI,
    Ursh,
    UrshI,

    LogiAnd,
    LogiOr,
    LogiNot,

    // Comparisons.
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    EqStrict,
    NeStrict,

    // Control flow; jump targets are absolute PCs.
    Jmp,
    JmpTrue,
    JmpFalse,
    JmpCond,
    JmpPop,
    JmpTruePop,
    JmpFalsePop,
    JmpCondPop,

    // Object and array literals.
    MakeObj,
    MakeArray,
    AddProps,
    AddElements,

    // Property access.
    GetPropAtom,
    GetPropAtom2,
    GetPropIndex,
    GetPropIndex2,
    SetPropAtom,
    SetPropIndex,

    // Free-identifier lookup through the global object.
    DynGetVar,
    DynGetVarUndef,
    DynSetVar,

    // Calls and function creation.
    Call,
    JsNew,
    MakeFunc,
    Ret,
    RetUndef,
    RetErr,
    Await,
    Yield,
    ProcCall,
    ProcRet,

    // Iteration.
    ForInInit,
    ForInNext,
    ForOfInit,
    ForOfNext,
    IterEndJmp,

    // Miscellaneous operators.
    In,
    InstanceOf,
    TypeOf,
    Delete,
    ToNumber,
    RegexpBuild,
}

impl OpCode {
    /// Decode one opcode byte; the discriminants are contiguous.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        if byte <= OpCode::RegexpBuild as u8 {
            // Fieldless repr(u8) enum with contiguous discriminants.
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    pub fn is_jump_single_target(self) -> bool {
        matches!(
            self,
            OpCode::Jmp
                | OpCode::JmpTrue
                | OpCode::JmpFalse
                | OpCode::JmpPop
                | OpCode::JmpTruePop
                | OpCode::JmpFalsePop
                | OpCode::IterEndJmp
        )
    }

    pub fn is_jump_two_target(self) -> bool {
        matches!(self, OpCode::JmpCond | OpCode::JmpCondPop)
    }
}

#[derive(Clone, Copy)]
union Operand {
    two: [i32; 2],
    num: f64,
}

/// One instruction: a one-byte opcode plus either two 32-bit operands or one
/// 64-bit operand (used by `push_f64`).
#[derive(Clone, Copy)]
pub struct Instruction {
    pub op: OpCode,
    operand: Operand,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Self { op, operand: Operand { two: [0, 0] } }
    }

    pub fn with1(op: OpCode, a: i32) -> Self {
        Self { op, operand: Operand { two: [a, 0] } }
    }

    pub fn with2(op: OpCode, a: i32, b: i32) -> Self {
        Self { op, operand: Operand { two: [a, b] } }
    }

    pub fn num_imm(num: f64) -> Self {
        Self { op: OpCode::PushF64, operand: Operand { num } }
    }

    #[inline]
    pub fn a(&self) -> i32 {
        // Both union arms are plain-old-data of the same size.
        unsafe { self.operand.two[0] }
    }

    #[inline]
    pub fn b(&self) -> i32 {
        unsafe { self.operand.two[1] }
    }

    #[inline]
    pub fn num(&self) -> f64 {
        unsafe { self.operand.num }
    }

    #[inline]
    pub fn scope(&self) -> ScopeKind {
        ScopeKind::from_i32(self.a())
    }

    pub fn set_a(&mut self, a: i32) {
        let b = unsafe { self.operand.two[1] };
        self.operand = Operand { two: [a, b] };
    }

    pub fn set_b(&mut self, b: i32) {
        let a = unsafe { self.operand.two[0] };
        self.operand = Operand { two: [a, b] };
    }

    /// The operand as raw bits, for the image writer.
    pub fn raw_operand(&self) -> u64 {
        unsafe { std::mem::transmute::<Operand, u64>(self.operand) }
    }

    pub fn from_raw(op: OpCode, raw: u64) -> Self {
        Self { op, operand: unsafe { std::mem::transmute::<u64, Operand>(raw) } }
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.op {
            OpCode::PushF64 => write!(f, "push_f64 {}", self.num()),
            op if op.is_jump_two_target() => {
                write!(f, "{:?} {} {}", op, self.a(), self.b())
            }
            op => write!(f, "{:?} {} {}", op, self.a(), self.b()),
        }
    }
}

/// Which frame region a variable-access opcode addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScopeKind {
    Global = 0,
    Local = 1,
    Arg = 2,
    Closure = 3,
}

impl ScopeKind {
    pub fn from_i32(raw: i32) -> Self {
        match raw {
            0 => ScopeKind::Global,
            1 => ScopeKind::Local,
            2 => ScopeKind::Arg,
            3 => ScopeKind::Closure,
            _ => panic!("invalid scope kind {raw}"),
        }
    }
}

/// One catch-table row. The last entry of every table is the sentinel with
/// `start_pc == end_pc`, naming the function's unwind block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchEntry {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub locals_begin: u32,
    pub locals_end: u32,
}

impl CatchEntry {
    pub fn is_sentinel(&self) -> bool {
        self.start_pc == self.end_pc
    }

    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// How `make_func` fills one capture cell of a fresh closure.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSpec {
    /// `Local` and `Arg` promote the enclosing slot to a heap cell; `Closure`
    /// copies the enclosing function's cell.
    pub kind: ScopeKind,
    pub index: u32,
}

/// Per-function metadata, immutable after codegen. Shared by every function
/// instance created from the same `make_func` site.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub name_atom: Atom,
    pub is_anonymous: bool,
    pub is_arrow: bool,
    pub is_native: bool,
    pub is_strict: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub prepare_arguments_array: bool,
    pub param_count: u16,
    pub local_var_count: u16,
    pub stack_size: u16,
    pub bytecode_start: u32,
    pub bytecode_end: u32,
    pub source_line: u32,
    pub catch_table: Vec<CatchEntry>,
    pub captures: Vec<CaptureSpec>,
    pub native: Option<NativeFn>,
    /// Small discriminator for native entry points shared between several
    /// builtins (the promise resolve/reject pair).
    pub magic: u32,
}

impl Default for FunctionMeta {
    fn default() -> Self {
        Self {
            name_atom: crate::atom::K_EMPTY,
            is_anonymous: false,
            is_arrow: false,
            is_native: false,
            is_strict: false,
            is_async: false,
            is_generator: false,
            prepare_arguments_array: false,
            param_count: 0,
            local_var_count: 0,
            stack_size: 0,
            bytecode_start: 0,
            bytecode_end: 0,
            source_line: 0,
            catch_table: Vec::new(),
            captures: Vec::new(),
            native: None,
            magic: 0,
        }
    }
}

impl FunctionMeta {
    pub fn native(name_atom: Atom, param_count: u16, func: NativeFn) -> Self {
        Self {
            name_atom,
            is_native: true,
            param_count,
            native: Some(func),
            ..Self::default()
        }
    }
}

/// Everything the VM consumes: the instruction stream, the function
/// metadata table, the atom pool and the numeric literal pool.
#[derive(Debug)]
pub struct Program {
    pub bytecode: Vec<Instruction>,
    pub metas: Vec<FunctionMeta>,
    pub atoms: AtomPool,
    pub numbers: Vec<f64>,
    /// Metadata index of the top-level function.
    pub entry_meta: u32,
}

/// Assembles a [`Program`]. Jump targets are absolute PCs; `finish` runs the
/// post-codegen pass that skips elided NOPs and fuses `jmp_true; jmp` pairs.
pub struct ProgramBuilder {
    pub bytecode: Vec<Instruction>,
    pub metas: Vec<FunctionMeta>,
    pub atoms: AtomPool,
    pub numbers: Vec<f64>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            bytecode: Vec::new(),
            metas: Vec::new(),
            atoms: AtomPool::new(),
            numbers: Vec::new(),
        }
    }

    pub fn atom(&mut self, text: &str) -> Atom {
        self.atoms.atomize_str(text)
    }

    pub fn number(&mut self, value: f64) -> i32 {
        let idx = self.numbers.len();
        self.numbers.push(value);
        idx as i32
    }

    pub fn here(&self) -> u32 {
        self.bytecode.len() as u32
    }

    pub fn emit(&mut self, op: OpCode) -> u32 {
        self.bytecode.push(Instruction::new(op));
        self.bytecode.len() as u32 - 1
    }

    pub fn emit1(&mut self, op: OpCode, a: i32) -> u32 {
        self.bytecode.push(Instruction::with1(op, a));
        self.bytecode.len() as u32 - 1
    }

    pub fn emit2(&mut self, op: OpCode, a: i32, b: i32) -> u32 {
        self.bytecode.push(Instruction::with2(op, a, b));
        self.bytecode.len() as u32 - 1
    }

    pub fn emit_f64(&mut self, num: f64) -> u32 {
        self.bytecode.push(Instruction::num_imm(num));
        self.bytecode.len() as u32 - 1
    }

    /// Patch the first operand (the target) of a previously emitted jump.
    pub fn patch_target(&mut self, at: u32, target: u32) {
        debug_assert!(
            self.bytecode[at as usize].op.is_jump_single_target()
                || self.bytecode[at as usize].op.is_jump_two_target()
        );
        self.bytecode[at as usize].set_a(target as i32);
    }

    pub fn patch_second_target(&mut self, at: u32, target: u32) {
        debug_assert!(self.bytecode[at as usize].op.is_jump_two_target());
        self.bytecode[at as usize].set_b(target as i32);
    }

    pub fn add_meta(&mut self, meta: FunctionMeta) -> u32 {
        self.metas.push(meta);
        self.metas.len() as u32 - 1
    }

    pub fn finish(mut self, entry_meta: u32) -> Program {
        self.fixup_jumps();
        Program {
            bytecode: self.bytecode,
            metas: self.metas,
            atoms: self.atoms,
            numbers: self.numbers,
            entry_meta,
        }
    }

    /// Fuse `jmp_true t; jmp u` into `jmp_false u` where the true-branch
    /// target is the fall-through, then retarget every jump past any NOP run
    /// at its destination.
    fn fixup_jumps(&mut self) {
        let len = self.bytecode.len();
        for i in 0..len.saturating_sub(1) {
            let (first, second) = (self.bytecode[i], self.bytecode[i + 1]);
            if first.op == OpCode::JmpTrue
                && second.op == OpCode::Jmp
                && first.a() as usize == i + 2
            {
                self.bytecode[i] = Instruction::with1(OpCode::JmpFalse, second.a());
                self.bytecode[i + 1] = Instruction::new(OpCode::Nop);
            }
        }
        for i in 0..len {
            let op = self.bytecode[i].op;
            if op.is_jump_single_target() || op.is_jump_two_target() {
                let skipped = self.skip_nops(self.bytecode[i].a());
                self.bytecode[i].set_a(skipped);
            }
            if op.is_jump_two_target() {
                let skipped = self.skip_nops(self.bytecode[i].b());
                self.bytecode[i].set_b(skipped);
            }
        }
    }

    fn skip_nops(&self, target: i32) -> i32 {
        let mut t = target as usize;
        while t < self.bytecode.len() && self.bytecode[t].op == OpCode::Nop {
            t += 1;
        }
        t as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_operands() {
        let inst = Instruction::with2(OpCode::Call, 2, 1);
        assert_eq!(inst.a(), 2);
        assert_eq!(inst.b(), 1);
        let num = Instruction::num_imm(1.5);
        assert_eq!(num.num(), 1.5);
    }

    #[test]
    fn catch_entry_cover() {
        let entry = CatchEntry {
            start_pc: 4,
            end_pc: 9,
            handler_pc: 12,
            locals_begin: 0,
            locals_end: 0,
        };
        assert!(entry.covers(4));
        assert!(entry.covers(8));
        assert!(!entry.covers(9));
        let sentinel = CatchEntry {
            start_pc: 0,
            end_pc: 0,
            handler_pc: 20,
            locals_begin: 0,
            locals_end: 0,
        };
        assert!(sentinel.is_sentinel());
    }

    #[test]
    fn jump_fixup_skips_nops_and_fuses() {
        let mut b = ProgramBuilder::new();
        // jmp_true -> fall-through pattern followed by jmp.
        let jt = b.emit1(OpCode::JmpTrue, 0);
        let j = b.emit1(OpCode::Jmp, 0);
        b.patch_target(jt, 2);
        b.emit(OpCode::Nop);
        b.emit(OpCode::Nop);
        let real = b.emit(OpCode::Halt);
        b.patch_target(j, 2);
        let program = b.finish(0);
        // Fused into jmp_false targeting past the NOP run.
        assert_eq!(program.bytecode[0].op, OpCode::JmpFalse);
        assert_eq!(program.bytecode[0].a(), real as i32);
        assert_eq!(program.bytecode[1].op, OpCode::Nop);
    }
}
