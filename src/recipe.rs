//! Encode programs: a flat opcode stream with embedded offsets and
//! resolved jump targets, plus the interpreter that runs one against a
//! value.
//!
//! The compiler folds record nesting into absolute offsets, so the only
//! ops that push base frames are the ones crossing an indirection: slice
//! elements, map values, option payloads, and lazy links. Indent mode is
//! a separate program per type: structural ops carry their newline
//! behavior baked in, and compact programs never test for it.

use facet::{MapDef, OptionDef, PtrConst, Shape, SkipSerializingIfFn};

use crate::compiler;
use crate::context::{EncodeContext, SeqFrame};
use crate::intrinsics::write_escaped;
use crate::malum::{self, VecOffsets};
use crate::value::{Number, Value};
use crate::{Error, ErrorKind};

/// Width of an integer load.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Width {
    W1,
    W2,
    W4,
    W8,
}

/// Compile-time-selected zero-value check for omitted fields.
pub(crate) enum Empty {
    /// Integers, bools, chars: all bytes zero.
    ZeroBytes { size: u8 },
    Float { wide: bool },
    Str,
    Slice { off: VecOffsets },
    Map { def: MapDef },
    Option { def: OptionDef },
    Dyn,
    Number,
    /// User predicate from `skip_serializing_if`.
    Predicate(SkipSerializingIfFn),
}

/// A primitive operation in an encode recipe.
pub(crate) enum Op {
    /// Emit literal bytes.
    Lit(Box<[u8]>),
    Bool { offset: u32 },
    Int { offset: u32, width: Width, signed: bool },
    Int128 { offset: u32, signed: bool },
    Float { offset: u32, wide: bool },
    Char { offset: u32 },
    Str { offset: u32 },
    NumberLit { offset: u32 },
    /// Custom text codec: vtable `display`, emitted as a quoted string.
    DisplayScalar { offset: u32, shape: &'static Shape },
    DynValue { offset: u32, nl: bool },
    /// `{`: push a comma frame, raise depth.
    ObjOpen,
    /// Comma-if-needed, optional newline, then the pre-rendered key.
    /// Jumps to `skip_to` without emitting when the empty check fires.
    FieldKey {
        offset: u32,
        key: Box<[u8]>,
        check: Option<Empty>,
        skip_to: u32,
        nl: bool,
    },
    /// `}`: pop the comma frame, drop depth, newline first if any field
    /// was emitted.
    ObjClose { nl: bool },
    /// Read the Vec at offset; `[]` fast path jumps to `end`, otherwise
    /// push an element frame and fall into the element body.
    SliceHead {
        offset: u32,
        stride: u32,
        off: VecOffsets,
        end: u32,
        nl: bool,
    },
    /// Fixed-size arrays: like SliceHead but the data is in line at
    /// `offset` with a static length.
    ArrayHead {
        offset: u32,
        stride: u32,
        len: u32,
        end: u32,
        nl: bool,
    },
    /// Collect and key-sort the map's entries; `{}` fast path jumps to
    /// `end`, otherwise emit the first key and push a map frame.
    MapHead {
        offset: u32,
        def: MapDef,
        end: u32,
        nl: bool,
    },
    /// Advance the innermost sequence frame: either loop back to `body`
    /// (separator emitted, base updated) or close the container and fall
    /// through.
    SeqNext { body: u32, nl: bool },
    /// `null` fast path jumps to `end`; otherwise push the payload base.
    OptionHead {
        offset: u32,
        def: OptionDef,
        end: u32,
    },
    /// Pop one base frame.
    BaseEnd,
    /// Run another type's recipe at `base + offset` (recursive types).
    Nested { offset: u32, shape: &'static Shape },
    End,
}

/// A compiled encode program.
pub(crate) struct Recipe {
    pub(crate) ops: Vec<Op>,
    pub(crate) indent: bool,
}

/// Recipe builder. Jump fields hold label indices until `finish` patches
/// them to instruction addresses.
pub(crate) struct RecipeBuilder {
    pub(crate) ops: Vec<Op>,
    labels: Vec<u32>,
    indent: bool,
}

impl RecipeBuilder {
    pub(crate) fn new(indent: bool) -> Self {
        RecipeBuilder {
            ops: Vec::new(),
            labels: Vec::new(),
            indent,
        }
    }

    pub(crate) fn indent(&self) -> bool {
        self.indent
    }

    pub(crate) fn label(&mut self) -> u32 {
        let idx = self.labels.len() as u32;
        self.labels.push(u32::MAX);
        idx
    }

    pub(crate) fn bind(&mut self, label: u32) {
        self.labels[label as usize] = self.ops.len() as u32;
    }

    pub(crate) fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub(crate) fn finish(mut self) -> Recipe {
        let labels = &self.labels;
        let patch = |slot: &mut u32| {
            let pc = labels[*slot as usize];
            debug_assert_ne!(pc, u32::MAX, "unbound recipe label");
            *slot = pc;
        };
        for op in &mut self.ops {
            match op {
                Op::FieldKey { skip_to, .. } => patch(skip_to),
                Op::SliceHead { end, .. }
                | Op::ArrayHead { end, .. }
                | Op::MapHead { end, .. }
                | Op::OptionHead { end, .. } => patch(end),
                Op::SeqNext { body, .. } => patch(body),
                _ => {}
            }
        }
        self.ops.push(Op::End);
        Recipe {
            ops: self.ops,
            indent: self.indent,
        }
    }
}

impl Recipe {
    /// Interpret the program. The caller must have pushed the value's
    /// base pointer onto `ctx.bases` (and pops it afterwards).
    pub(crate) fn run(&self, ctx: &mut EncodeContext) -> Result<(), Error> {
        let mut pc = 0usize;
        loop {
            match &self.ops[pc] {
                Op::Lit(bytes) => ctx.buf.extend_from_slice(bytes),
                Op::Bool { offset } => {
                    let v = unsafe { *(at(ctx, *offset) as *const bool) };
                    ctx.buf
                        .extend_from_slice(if v { b"true" } else { b"false" });
                }
                Op::Int {
                    offset,
                    width,
                    signed,
                } => {
                    let p = at(ctx, *offset);
                    let mut tmp = itoa::Buffer::new();
                    let s = unsafe {
                        if *signed {
                            let v: i64 = match width {
                                Width::W1 => (p as *const i8).read() as i64,
                                Width::W2 => (p as *const i16).read() as i64,
                                Width::W4 => (p as *const i32).read() as i64,
                                Width::W8 => (p as *const i64).read(),
                            };
                            tmp.format(v)
                        } else {
                            let v: u64 = match width {
                                Width::W1 => p.read() as u64,
                                Width::W2 => (p as *const u16).read() as u64,
                                Width::W4 => (p as *const u32).read() as u64,
                                Width::W8 => (p as *const u64).read(),
                            };
                            tmp.format(v)
                        }
                    };
                    ctx.buf.extend_from_slice(s.as_bytes());
                }
                Op::Int128 { offset, signed } => {
                    let p = at(ctx, *offset);
                    let mut tmp = itoa::Buffer::new();
                    let s = unsafe {
                        if *signed {
                            tmp.format((p as *const i128).read())
                        } else {
                            tmp.format((p as *const u128).read())
                        }
                    };
                    ctx.buf.extend_from_slice(s.as_bytes());
                }
                Op::Float { offset, wide } => {
                    let p = at(ctx, *offset);
                    write_float(ctx, p, *wide)?;
                }
                Op::Char { offset } => {
                    let c = unsafe { *(at(ctx, *offset) as *const char) };
                    let mut tmp = [0u8; 4];
                    let s = c.encode_utf8(&mut tmp);
                    let html = ctx.html_escape;
                    write_escaped(&mut ctx.buf, s, html);
                }
                Op::Str { offset } => {
                    let s = unsafe { &*(at(ctx, *offset) as *const String) };
                    let html = ctx.html_escape;
                    write_escaped(&mut ctx.buf, s, html);
                }
                Op::NumberLit { offset } => {
                    let n = unsafe { &*(at(ctx, *offset) as *const Number) };
                    if n.as_str().is_empty() {
                        ctx.buf.push(b'0');
                    } else {
                        ctx.buf.extend_from_slice(n.as_str().as_bytes());
                    }
                }
                Op::DisplayScalar { offset, shape } => {
                    let text = compiler::call_display(*shape, at(ctx, *offset))
                        .map_err(Error::new)?;
                    let html = ctx.html_escape;
                    write_escaped(&mut ctx.buf, &text, html);
                }
                Op::DynValue { offset, nl } => {
                    let v = unsafe { &*(at(ctx, *offset) as *const Value) };
                    write_value(ctx, v, *nl)?;
                }
                Op::ObjOpen => {
                    ctx.buf.push(b'{');
                    ctx.commas.push(false);
                    ctx.depth += 1;
                }
                Op::FieldKey {
                    offset,
                    key,
                    check,
                    skip_to,
                    nl,
                } => {
                    let p = at(ctx, *offset);
                    if let Some(check) = check {
                        if unsafe { is_empty(check, p) } {
                            pc = *skip_to as usize;
                            continue;
                        }
                    }
                    let had = ctx.commas.last_mut().expect("field outside object");
                    if *had {
                        ctx.buf.push(b',');
                    } else {
                        *had = true;
                    }
                    if *nl {
                        ctx.newline();
                    }
                    ctx.buf.extend_from_slice(key);
                }
                Op::ObjClose { nl } => {
                    let had = ctx.commas.pop().expect("unbalanced object close");
                    ctx.depth -= 1;
                    if *nl && had {
                        ctx.newline();
                    }
                    ctx.buf.push(b'}');
                }
                Op::SliceHead {
                    offset,
                    stride,
                    off,
                    end,
                    nl,
                } => {
                    let p = at(ctx, *offset);
                    let (data, len) = unsafe { malum::read_parts(p, off) };
                    ctx.buf.push(b'[');
                    if len == 0 {
                        ctx.buf.push(b']');
                        pc = *end as usize;
                        continue;
                    }
                    ctx.depth += 1;
                    if *nl {
                        ctx.newline();
                    }
                    ctx.seqs.push(SeqFrame::Elems {
                        data,
                        len,
                        idx: 0,
                        stride: *stride as usize,
                    });
                    ctx.bases.push(data);
                }
                Op::ArrayHead {
                    offset,
                    stride,
                    len,
                    end,
                    nl,
                } => {
                    let data = at(ctx, *offset);
                    ctx.buf.push(b'[');
                    if *len == 0 {
                        ctx.buf.push(b']');
                        pc = *end as usize;
                        continue;
                    }
                    ctx.depth += 1;
                    if *nl {
                        ctx.newline();
                    }
                    ctx.seqs.push(SeqFrame::Elems {
                        data,
                        len: *len as usize,
                        idx: 0,
                        stride: *stride as usize,
                    });
                    ctx.bases.push(data);
                }
                Op::MapHead {
                    offset,
                    def,
                    end,
                    nl,
                } => {
                    let p = at(ctx, *offset);
                    let mut pairs = collect_map_entries(def, p);
                    // Key order is stable across re-encodes.
                    pairs.sort_by(|a, b| unsafe {
                        a.0.get::<String>().cmp(b.0.get::<String>())
                    });
                    ctx.buf.push(b'{');
                    if pairs.is_empty() {
                        ctx.buf.push(b'}');
                        pc = *end as usize;
                        continue;
                    }
                    ctx.depth += 1;
                    if *nl {
                        ctx.newline();
                    }
                    emit_map_key(ctx, pairs[0].0, *nl);
                    let value = pairs[0].1.as_byte_ptr();
                    ctx.seqs.push(SeqFrame::Map { pairs, idx: 0 });
                    ctx.bases.push(value);
                }
                Op::SeqNext { body, nl } => {
                    let frame = ctx.seqs.last_mut().expect("seq next outside sequence");
                    match frame {
                        SeqFrame::Elems {
                            data,
                            len,
                            idx,
                            stride,
                        } => {
                            *idx += 1;
                            if *idx < *len {
                                let next = unsafe { data.add(*idx * *stride) };
                                ctx.buf.push(b',');
                                if *nl {
                                    ctx.newline();
                                }
                                *ctx.bases.last_mut().unwrap() = next;
                                pc = *body as usize;
                                continue;
                            }
                            ctx.seqs.pop();
                            ctx.bases.pop();
                            ctx.depth -= 1;
                            if *nl {
                                ctx.newline();
                            }
                            ctx.buf.push(b']');
                        }
                        SeqFrame::Map { pairs, idx } => {
                            *idx += 1;
                            if *idx < pairs.len() {
                                let (key, value) = pairs[*idx];
                                ctx.buf.push(b',');
                                if *nl {
                                    ctx.newline();
                                }
                                emit_map_key(ctx, key, *nl);
                                *ctx.bases.last_mut().unwrap() = value.as_byte_ptr();
                                pc = *body as usize;
                                continue;
                            }
                            ctx.seqs.pop();
                            ctx.bases.pop();
                            ctx.depth -= 1;
                            if *nl {
                                ctx.newline();
                            }
                            ctx.buf.push(b'}');
                        }
                    }
                }
                Op::OptionHead { offset, def, end } => {
                    let p = at(ctx, *offset);
                    let some = unsafe { (def.vtable.is_some_fn)(PtrConst::new(p)) };
                    if !some {
                        ctx.buf.extend_from_slice(b"null");
                        pc = *end as usize;
                        continue;
                    }
                    let inner = unsafe { (def.vtable.get_value_fn)(PtrConst::new(p)) }
                        .expect("is_some option yielded no value");
                    ctx.bases.push(inner.as_byte_ptr());
                }
                Op::BaseEnd => {
                    ctx.bases.pop();
                }
                Op::Nested { offset, shape } => {
                    let recipe = compiler::encoder_for(*shape, self.indent)?;
                    ctx.bases.push(at(ctx, *offset));
                    let result = recipe.run(ctx);
                    ctx.bases.pop();
                    result?;
                }
                Op::End => return Ok(()),
            }
            pc += 1;
        }
    }
}

#[inline]
fn at(ctx: &EncodeContext, offset: u32) -> *const u8 {
    unsafe { ctx.base().add(offset as usize) }
}

fn write_float(ctx: &mut EncodeContext, p: *const u8, wide: bool) -> Result<(), Error> {
    let mut tmp = ryu::Buffer::new();
    let s = if wide {
        let v = unsafe { (p as *const f64).read() };
        if !v.is_finite() {
            return Err(Error::new(ErrorKind::UnsupportedValue("non-finite float")));
        }
        tmp.format_finite(v)
    } else {
        let v = unsafe { (p as *const f32).read() };
        if !v.is_finite() {
            return Err(Error::new(ErrorKind::UnsupportedValue("non-finite float")));
        }
        tmp.format_finite(v)
    };
    ctx.buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn collect_map_entries(def: &MapDef, map: *const u8) -> Vec<(PtrConst<'static>, PtrConst<'static>)> {
    let iter_vt = &def.vtable.iter_vtable;
    let Some(init) = iter_vt.init_with_value else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    unsafe {
        let iter = (init)(PtrConst::new(map));
        while let Some(pair) = (iter_vt.next)(iter) {
            pairs.push(pair);
        }
        (iter_vt.dealloc)(iter);
    }
    pairs
}

fn emit_map_key(ctx: &mut EncodeContext, key: PtrConst<'static>, nl: bool) {
    let s = unsafe { key.get::<String>() };
    let html = ctx.html_escape;
    write_escaped(&mut ctx.buf, s, html);
    ctx.buf.push(b':');
    if nl {
        ctx.buf.push(b' ');
    }
}

unsafe fn is_empty(check: &Empty, p: *const u8) -> bool {
    unsafe {
        match check {
            Empty::ZeroBytes { size } => (0..*size as usize).all(|i| *p.add(i) == 0),
            Empty::Float { wide } => {
                if *wide {
                    (p as *const f64).read() == 0.0
                } else {
                    (p as *const f32).read() == 0.0
                }
            }
            Empty::Str => (*(p as *const String)).is_empty(),
            Empty::Slice { off } => malum::read_parts(p, off).1 == 0,
            Empty::Map { def } => (def.vtable.len_fn)(PtrConst::new(p)) == 0,
            Empty::Option { def } => !(def.vtable.is_some_fn)(PtrConst::new(p)),
            Empty::Dyn => matches!(&*(p as *const Value), Value::Null),
            Empty::Number => (*(p as *const Number)).as_str().is_empty(),
            Empty::Predicate(f) => (*f)(PtrConst::new(p)),
        }
    }
}

/// Serialize a dynamic [`Value`]. Depth rides on the context so nested
/// containers indent correctly inside an indented document.
fn write_value(ctx: &mut EncodeContext, v: &Value, nl: bool) -> Result<(), Error> {
    match v {
        Value::Null => ctx.buf.extend_from_slice(b"null"),
        Value::Bool(b) => ctx
            .buf
            .extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Num(n) => {
            if !n.is_finite() {
                return Err(Error::new(ErrorKind::UnsupportedValue("non-finite float")));
            }
            let mut tmp = ryu::Buffer::new();
            ctx.buf.extend_from_slice(tmp.format_finite(*n).as_bytes());
        }
        Value::NumberLit(n) => {
            if n.as_str().is_empty() {
                ctx.buf.push(b'0');
            } else {
                ctx.buf.extend_from_slice(n.as_str().as_bytes());
            }
        }
        Value::Str(s) => {
            let html = ctx.html_escape;
            write_escaped(&mut ctx.buf, s, html);
        }
        Value::Array(items) => {
            ctx.buf.push(b'[');
            if items.is_empty() {
                ctx.buf.push(b']');
                return Ok(());
            }
            ctx.depth += 1;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    ctx.buf.push(b',');
                }
                if nl {
                    ctx.newline();
                }
                write_value(ctx, item, nl)?;
            }
            ctx.depth -= 1;
            if nl {
                ctx.newline();
            }
            ctx.buf.push(b']');
        }
        Value::Object(pairs) => {
            ctx.buf.push(b'{');
            if pairs.is_empty() {
                ctx.buf.push(b'}');
                return Ok(());
            }
            ctx.depth += 1;
            for (i, (key, item)) in pairs.iter().enumerate() {
                if i > 0 {
                    ctx.buf.push(b',');
                }
                if nl {
                    ctx.newline();
                }
                let html = ctx.html_escape;
                write_escaped(&mut ctx.buf, key, html);
                ctx.buf.push(b':');
                if nl {
                    ctx.buf.push(b' ');
                }
                write_value(ctx, item, nl)?;
            }
            ctx.depth -= 1;
            if nl {
                ctx.newline();
            }
            ctx.buf.push(b'}');
        }
    }
    Ok(())
}
