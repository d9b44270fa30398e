// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The compiled program image: a compact little-endian binary bundling the
//! instruction stream, function metadata, atom pool and numeric pool, for
//! handing codegen output to the CLI runner.
//!
//! Layout: magic, version, then one section per pool, each length-prefixed.
//! Native function metadata cannot cross the serialization boundary; codegen
//! output never contains it.

use crate::atom::AtomPool;
use crate::bytecode::{
    CaptureSpec, CatchEntry, FunctionMeta, Instruction, OpCode, Program,
    ScopeKind,
};

const MAGIC: &[u8; 4] = b"VSPR";
const VERSION: u32 = 1;

#[derive(Debug)]
pub enum ImageError {
    BadMagic,
    UnsupportedVersion(u32),
    Truncated,
    BadOpcode(u8),
    BadScopeKind(u8),
    BadAtomTag(u8),
    NativeMeta,
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::BadMagic => write!(f, "not a vesper program image"),
            ImageError::UnsupportedVersion(v) => {
                write!(f, "unsupported image version {v}")
            }
            ImageError::Truncated => write!(f, "truncated image"),
            ImageError::BadOpcode(b) => write!(f, "invalid opcode byte {b:#x}"),
            ImageError::BadScopeKind(b) => {
                write!(f, "invalid scope kind {b:#x}")
            }
            ImageError::BadAtomTag(b) => write!(f, "invalid atom tag {b:#x}"),
            ImageError::NativeMeta => {
                write!(f, "native function metadata cannot be serialized")
            }
        }
    }
}

impl std::error::Error for ImageError {}

// Meta flag bits.
const F_ANONYMOUS: u8 = 1 << 0;
const F_ARROW: u8 = 1 << 1;
const F_STRICT: u8 = 1 << 2;
const F_ASYNC: u8 = 1 << 3;
const F_GENERATOR: u8 = 1 << 4;
const F_ARGUMENTS: u8 = 1 << 5;

// Atom slot tags.
const A_STRING: u8 = 0;
const A_SYMBOL: u8 = 1;
const A_SYMBOL_DESC: u8 = 2;

pub fn write_image(program: &Program) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    put_u32(&mut out, VERSION);

    put_u32(&mut out, program.bytecode.len() as u32);
    for inst in &program.bytecode {
        out.push(inst.op as u8);
        put_u64(&mut out, inst.raw_operand());
    }

    put_u32(&mut out, program.metas.len() as u32);
    for meta in &program.metas {
        if meta.is_native || meta.native.is_some() {
            return Err(ImageError::NativeMeta);
        }
        put_u32(&mut out, meta.name_atom);
        let mut flags = 0u8;
        if meta.is_anonymous {
            flags |= F_ANONYMOUS;
        }
        if meta.is_arrow {
            flags |= F_ARROW;
        }
        if meta.is_strict {
            flags |= F_STRICT;
        }
        if meta.is_async {
            flags |= F_ASYNC;
        }
        if meta.is_generator {
            flags |= F_GENERATOR;
        }
        if meta.prepare_arguments_array {
            flags |= F_ARGUMENTS;
        }
        out.push(flags);
        put_u16(&mut out, meta.param_count);
        put_u16(&mut out, meta.local_var_count);
        put_u16(&mut out, meta.stack_size);
        put_u32(&mut out, meta.bytecode_start);
        put_u32(&mut out, meta.bytecode_end);
        put_u32(&mut out, meta.source_line);
        put_u32(&mut out, meta.magic);
        put_u32(&mut out, meta.catch_table.len() as u32);
        for entry in &meta.catch_table {
            put_u32(&mut out, entry.start_pc);
            put_u32(&mut out, entry.end_pc);
            put_u32(&mut out, entry.handler_pc);
            put_u32(&mut out, entry.locals_begin);
            put_u32(&mut out, entry.locals_end);
        }
        put_u32(&mut out, meta.captures.len() as u32);
        for capture in &meta.captures {
            out.push(capture.kind as u8);
            put_u32(&mut out, capture.index);
        }
    }

    put_u32(&mut out, program.atoms.len() as u32);
    for index in 0..program.atoms.len() as u32 {
        let (is_symbol, text) = program.atoms.slot_view(index);
        let tag = match (is_symbol, text.is_some()) {
            (false, _) => A_STRING,
            (true, true) => A_SYMBOL_DESC,
            (true, false) => A_SYMBOL,
        };
        out.push(tag);
        if tag != A_SYMBOL {
            let text = text.unwrap_or(&[]);
            put_u32(&mut out, text.len() as u32);
            for unit in text {
                put_u16(&mut out, *unit);
            }
        }
    }

    put_u32(&mut out, program.numbers.len() as u32);
    for n in &program.numbers {
        put_u64(&mut out, n.to_bits());
    }
    put_u32(&mut out, program.entry_meta);
    Ok(out)
}

pub fn read_image(bytes: &[u8]) -> Result<Program, ImageError> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(4)? != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }

    let instruction_count = r.u32()? as usize;
    let mut bytecode = Vec::with_capacity(instruction_count);
    for _ in 0..instruction_count {
        let byte = r.u8()?;
        let op = OpCode::from_u8(byte).ok_or(ImageError::BadOpcode(byte))?;
        let raw = r.u64()?;
        bytecode.push(Instruction::from_raw(op, raw));
    }

    let meta_count = r.u32()? as usize;
    let mut metas = Vec::with_capacity(meta_count);
    for _ in 0..meta_count {
        let name_atom = r.u32()?;
        let flags = r.u8()?;
        let param_count = r.u16()?;
        let local_var_count = r.u16()?;
        let stack_size = r.u16()?;
        let bytecode_start = r.u32()?;
        let bytecode_end = r.u32()?;
        let source_line = r.u32()?;
        let magic = r.u32()?;
        let catch_count = r.u32()? as usize;
        let mut catch_table = Vec::with_capacity(catch_count);
        for _ in 0..catch_count {
            catch_table.push(CatchEntry {
                start_pc: r.u32()?,
                end_pc: r.u32()?,
                handler_pc: r.u32()?,
                locals_begin: r.u32()?,
                locals_end: r.u32()?,
            });
        }
        let capture_count = r.u32()? as usize;
        let mut captures = Vec::with_capacity(capture_count);
        for _ in 0..capture_count {
            let kind = r.u8()?;
            if kind > ScopeKind::Closure as u8 {
                return Err(ImageError::BadScopeKind(kind));
            }
            captures.push(CaptureSpec {
                kind: ScopeKind::from_i32(kind as i32),
                index: r.u32()?,
            });
        }
        metas.push(FunctionMeta {
            name_atom,
            is_anonymous: flags & F_ANONYMOUS != 0,
            is_arrow: flags & F_ARROW != 0,
            is_native: false,
            is_strict: flags & F_STRICT != 0,
            is_async: flags & F_ASYNC != 0,
            is_generator: flags & F_GENERATOR != 0,
            prepare_arguments_array: flags & F_ARGUMENTS != 0,
            param_count,
            local_var_count,
            stack_size,
            bytecode_start,
            bytecode_end,
            source_line,
            catch_table,
            captures,
            native: None,
            magic,
        });
    }

    // Rebuild the atom pool slot by slot. The static prefix is recreated by
    // the pool itself; the remaining slots intern in image order, which
    // reproduces their indices.
    let mut atoms = AtomPool::new();
    let atom_count = r.u32()? as usize;
    for index in 0..atom_count {
        let tag = r.u8()?;
        let text = if tag == A_SYMBOL {
            Vec::new()
        } else {
            let len = r.u32()? as usize;
            let mut text = Vec::with_capacity(len);
            for _ in 0..len {
                text.push(r.u16()?);
            }
            text
        };
        if index < atoms.len() {
            // Static slot; already interned by `AtomPool::new`.
            continue;
        }
        match tag {
            A_STRING => {
                atoms.atomize_no_uint(&text);
            }
            A_SYMBOL => {
                atoms.atomize_symbol();
            }
            A_SYMBOL_DESC => {
                atoms.atomize_symbol_desc(&text);
            }
            other => return Err(ImageError::BadAtomTag(other)),
        }
    }

    let number_count = r.u32()? as usize;
    let mut numbers = Vec::with_capacity(number_count);
    for _ in 0..number_count {
        numbers.push(f64::from_bits(r.u64()?));
    }
    let entry_meta = r.u32()?;
    Ok(Program { bytecode, metas, atoms, numbers, entry_meta })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(len).ok_or(ImageError::Truncated)?;
        if end > self.bytes.len() {
            return Err(ImageError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, ImageError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ProgramBuilder;

    #[test]
    fn image_round_trip() {
        let mut b = ProgramBuilder::new();
        let hello = b.atom("hello");
        let start = b.here();
        b.emit1(OpCode::PushStr, hello as i32);
        b.emit_f64(2.5);
        b.emit(OpCode::Halt);
        let entry = b.add_meta(FunctionMeta {
            bytecode_start: start,
            bytecode_end: b.here(),
            stack_size: 4,
            catch_table: vec![CatchEntry {
                start_pc: 0,
                end_pc: 0,
                handler_pc: 2,
                locals_begin: 0,
                locals_end: 0,
            }],
            ..FunctionMeta::default()
        });
        let program = b.finish(entry);
        let bytes = write_image(&program).unwrap();
        let loaded = read_image(&bytes).unwrap();

        assert_eq!(loaded.bytecode.len(), program.bytecode.len());
        assert_eq!(loaded.bytecode[0].op, OpCode::PushStr);
        assert_eq!(loaded.bytecode[0].a(), hello as i32);
        assert_eq!(loaded.bytecode[1].num(), 2.5);
        assert_eq!(loaded.entry_meta, entry);
        assert_eq!(loaded.metas[0].stack_size, 4);
        assert_eq!(loaded.metas[0].catch_table, program.metas[0].catch_table);
        assert_eq!(loaded.atoms.len(), program.atoms.len());
        assert_eq!(
            loaded.atoms.get_string(hello),
            program.atoms.get_string(hello)
        );
    }

    #[test]
    fn image_rejects_garbage() {
        assert!(matches!(read_image(b"nope"), Err(ImageError::BadMagic)));
        let mut b = ProgramBuilder::new();
        b.emit(OpCode::Halt);
        let entry = b.add_meta(FunctionMeta::default());
        let bytes = write_image(&b.finish(entry)).unwrap();
        assert!(matches!(
            read_image(&bytes[..bytes.len() - 2]),
            Err(ImageError::Truncated)
        ));
    }
}
