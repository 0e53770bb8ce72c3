//! Decode programs: a tree of specialized nodes, one per type node,
//! produced by the compiler and interpreted against raw destination
//! memory.
//!
//! Every node writes only within `[out, out + size_of(node's type))` and
//! either fully initializes that region or leaves nothing initialized:
//! on any error the interpreter drops whatever it had produced before
//! propagating, so callers never observe partial state.

use std::alloc::Layout;
use std::collections::HashMap;
use std::mem::ManuallyDrop;

use facet::{DefaultSource, MapDef, OptionDef, PtrMut, PtrUninit, Shape};

use crate::compiler;
use crate::context::DeserContext;
use crate::intrinsics::{self, Text};
use crate::malum::{self, VecOffsets};
use crate::value::{Number, Value};
use crate::{Error, ErrorKind};

/// One unit of a decode program.
pub(crate) enum Node {
    Unit,
    Bool,
    /// Integer of 1/2/4/8 bytes. Signed and unsigned targets bind the
    /// same truncating store; the bit pattern carries the sign.
    Int { width: u8 },
    Int128,
    Float { wide: bool },
    Char,
    Str,
    NumberLit,
    Record(RecordNode),
    Slice(SliceNode),
    Array(ArrayNode),
    Map(MapNode),
    Optional(OptionalNode),
    /// The dynamic `Value` target.
    Dyn,
    /// Custom text codec: string payload forwarded to the shape's vtable
    /// `parse` hook.
    Parse { shape: &'static Shape },
    /// The `string` coercion: a primitive wrapped in a JSON string.
    Quoted(Box<Node>),
    /// Lazy link to another type's program; breaks recursive types.
    ByShape { shape: &'static Shape },
    /// A skipped record field: never decoded, only default-initialized.
    DefaultOnly { shape: &'static Shape },
}

pub(crate) struct FieldDec {
    pub(crate) name: &'static str,
    pub(crate) offset: usize,
    pub(crate) shape: &'static Shape,
    pub(crate) node: Node,
    /// `#[facet(default)]` / `#[facet(default = expr)]`, tried before the
    /// node's zero value when the field is absent.
    pub(crate) default: Option<DefaultSource>,
}

pub(crate) struct RecordNode {
    pub(crate) fields: Vec<FieldDec>,
    /// Serialized key (exact and case-folded forms) to field position.
    /// First insertion wins, so collisions resolve to declaration order.
    pub(crate) index: HashMap<String, usize>,
    /// `deny_unknown_fields` on the type itself.
    pub(crate) strict: bool,
}

pub(crate) struct SliceNode {
    pub(crate) elem: Box<Node>,
    pub(crate) elem_shape: &'static Shape,
    pub(crate) elem_layout: Layout,
    pub(crate) off: VecOffsets,
}

pub(crate) struct ArrayNode {
    pub(crate) elem: Box<Node>,
    pub(crate) elem_shape: &'static Shape,
    pub(crate) stride: usize,
    pub(crate) len: usize,
}

pub(crate) struct MapNode {
    pub(crate) value: Box<Node>,
    pub(crate) value_layout: Layout,
    pub(crate) map_shape: &'static Shape,
    pub(crate) def: MapDef,
}

pub(crate) struct OptionalNode {
    pub(crate) elem: Box<Node>,
    pub(crate) elem_layout: Layout,
    pub(crate) def: OptionDef,
}

impl Node {
    /// Decode one value into `out`.
    ///
    /// `out` must point to uninitialized storage of the node's type, with
    /// the type's alignment. On `Ok` the storage is fully initialized; on
    /// `Err` it is as uninitialized as it started.
    pub(crate) fn decode(&self, ctx: &mut DeserContext, out: *mut u8) -> Result<(), Error> {
        match self {
            Node::Unit => {
                if !intrinsics::try_null(ctx)? {
                    return Err(ctx.err(ErrorKind::UnexpectedToken {
                        expected: "null",
                        found: ctx.char(),
                    }));
                }
                Ok(())
            }
            Node::Bool => {
                if intrinsics::try_null(ctx)? {
                    unsafe { out.write(0) };
                    return Ok(());
                }
                let v = intrinsics::read_bool(ctx)?;
                unsafe { out.write(v as u8) };
                Ok(())
            }
            Node::Int { width } => {
                if intrinsics::try_null(ctx)? {
                    unsafe { std::ptr::write_bytes(out, 0, *width as usize) };
                    return Ok(());
                }
                let (s, e) = intrinsics::number_token(ctx)?;
                let bits = intrinsics::int_bits(ctx, s, e)?;
                unsafe { write_int(out, bits, *width) };
                Ok(())
            }
            Node::Int128 => {
                if intrinsics::try_null(ctx)? {
                    unsafe { std::ptr::write_bytes(out, 0, 16) };
                    return Ok(());
                }
                let (s, e) = intrinsics::number_token(ctx)?;
                let bits = intrinsics::int128_bits(ctx, s, e)?;
                unsafe { (out as *mut u128).write(bits) };
                Ok(())
            }
            Node::Float { wide } => {
                if intrinsics::try_null(ctx)? {
                    unsafe { std::ptr::write_bytes(out, 0, if *wide { 8 } else { 4 }) };
                    return Ok(());
                }
                let (s, e) = intrinsics::number_token(ctx)?;
                let v = intrinsics::float_value(ctx, s, e)?;
                unsafe {
                    if *wide {
                        (out as *mut f64).write(v);
                    } else {
                        (out as *mut f32).write(v as f32);
                    }
                }
                Ok(())
            }
            Node::Char => {
                if intrinsics::try_null(ctx)? {
                    unsafe { (out as *mut char).write('\0') };
                    return Ok(());
                }
                let text = intrinsics::read_string(ctx)?;
                let s = text.into_string(ctx);
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => {
                        unsafe { (out as *mut char).write(c) };
                        Ok(())
                    }
                    _ => Err(ctx.err(ErrorKind::StringSyntax)),
                }
            }
            Node::Str => {
                if intrinsics::try_null(ctx)? {
                    unsafe { (out as *mut String).write(String::new()) };
                    return Ok(());
                }
                let text = intrinsics::read_string(ctx)?;
                let s = text.into_string(ctx);
                unsafe { (out as *mut String).write(s) };
                Ok(())
            }
            Node::NumberLit => {
                if intrinsics::try_null(ctx)? {
                    unsafe { (out as *mut Number).write(Number::default()) };
                    return Ok(());
                }
                let (s, e) = intrinsics::number_token(ctx)?;
                let lit = unsafe { std::str::from_utf8_unchecked(ctx.slice(s, e)) }.to_owned();
                unsafe { (out as *mut Number).write(Number::from_literal(lit)) };
                Ok(())
            }
            Node::Record(rec) => rec.decode(ctx, out),
            Node::Slice(sl) => sl.decode(ctx, out),
            Node::Array(arr) => arr.decode(ctx, out),
            Node::Map(map) => map.decode(ctx, out),
            Node::Optional(opt) => opt.decode(ctx, out),
            Node::Dyn => {
                let v = read_value(ctx)?;
                unsafe { (out as *mut Value).write(v) };
                Ok(())
            }
            Node::Parse { shape } => {
                let text = intrinsics::read_string(ctx)?;
                let pos = ctx.cursor;
                let s = text.into_string(ctx);
                compiler::call_parse(*shape, &s, out).map_err(|kind| Error::at(kind, pos))
            }
            Node::Quoted(inner) => {
                intrinsics::expect(ctx, b'"', "quoted primitive")?;
                inner.decode(ctx, out)?;
                // The primitive is plain data, so erroring past this point
                // still leaves nothing that would need dropping.
                intrinsics::expect_literal(ctx, b"\"", "closing quote")
            }
            Node::ByShape { shape } => {
                let node = compiler::decoder_for(*shape)?;
                node.decode(ctx, out)
            }
            Node::DefaultOnly { shape } => Err(Error::unsupported(shape.type_identifier)),
        }
    }

    /// Write the node's zero value. Returns `false` when the type has no
    /// derivable default (custom scalars without `default_in_place`); in
    /// that case nothing is initialized.
    pub(crate) fn default_in_place(&self, out: *mut u8) -> Result<bool, Error> {
        match self {
            Node::Unit => Ok(true),
            Node::Bool => {
                unsafe { out.write(0) };
                Ok(true)
            }
            Node::Int { width } => {
                unsafe { std::ptr::write_bytes(out, 0, *width as usize) };
                Ok(true)
            }
            Node::Int128 => {
                unsafe { std::ptr::write_bytes(out, 0, 16) };
                Ok(true)
            }
            Node::Float { wide } => {
                unsafe { std::ptr::write_bytes(out, 0, if *wide { 8 } else { 4 }) };
                Ok(true)
            }
            Node::Char => {
                unsafe { (out as *mut char).write('\0') };
                Ok(true)
            }
            Node::Str => {
                unsafe { (out as *mut String).write(String::new()) };
                Ok(true)
            }
            Node::NumberLit => {
                unsafe { (out as *mut Number).write(Number::default()) };
                Ok(true)
            }
            Node::Record(rec) => {
                for (i, f) in rec.fields.iter().enumerate() {
                    match f.node.default_in_place(unsafe { out.add(f.offset) }) {
                        Ok(true) => {}
                        other => {
                            for prior in &rec.fields[..i] {
                                drop_at(prior.shape, unsafe { out.add(prior.offset) });
                            }
                            return other;
                        }
                    }
                }
                Ok(true)
            }
            Node::Slice(sl) => {
                let dangling = sl.elem_layout.align() as *mut u8;
                unsafe { malum::write_parts(out, &sl.off, dangling, 0, 0) };
                Ok(true)
            }
            Node::Array(arr) => {
                for i in 0..arr.len {
                    match arr.elem.default_in_place(unsafe { out.add(i * arr.stride) }) {
                        Ok(true) => {}
                        other => {
                            for j in 0..i {
                                drop_at(arr.elem_shape, unsafe { out.add(j * arr.stride) });
                            }
                            return other;
                        }
                    }
                }
                Ok(true)
            }
            Node::Map(map) => {
                unsafe {
                    (map.def.vtable.init_in_place_with_capacity_fn)(PtrUninit::new(out), 0)
                };
                Ok(true)
            }
            Node::Optional(opt) => {
                unsafe { (opt.def.vtable.init_none_fn)(PtrUninit::new(out)) };
                Ok(true)
            }
            Node::Dyn => {
                unsafe { (out as *mut Value).write(Value::Null) };
                Ok(true)
            }
            Node::Parse { shape } => {
                let done = unsafe { shape.call_default_in_place(PtrMut::new(out)) };
                Ok(done.is_some())
            }
            Node::Quoted(inner) => inner.default_in_place(out),
            Node::ByShape { shape } => {
                let node = compiler::decoder_for(*shape)?;
                node.default_in_place(out)
            }
            Node::DefaultOnly { shape } => {
                let done = unsafe { shape.call_default_in_place(PtrMut::new(out)) };
                Ok(done.is_some())
            }
        }
    }
}

/// Drop a fully initialized value of `shape` at `ptr`.
fn drop_at(shape: &'static Shape, ptr: *mut u8) {
    let _ = unsafe { shape.call_drop_in_place(PtrMut::new(ptr)) };
}

impl RecordNode {
    fn decode(&self, ctx: &mut DeserContext, out: *mut u8) -> Result<(), Error> {
        let mut seen = vec![false; self.fields.len()];
        match self.fill(ctx, out, &mut seen) {
            Ok(()) => Ok(()),
            Err(e) => {
                for (i, f) in self.fields.iter().enumerate() {
                    if seen[i] {
                        drop_at(f.shape, unsafe { out.add(f.offset) });
                    }
                }
                Err(e)
            }
        }
    }

    fn fill(
        &self,
        ctx: &mut DeserContext,
        out: *mut u8,
        seen: &mut [bool],
    ) -> Result<(), Error> {
        if intrinsics::try_null(ctx)? {
            return self.fill_defaults(ctx, out, seen);
        }
        intrinsics::expect(ctx, b'{', "object")?;
        if intrinsics::peek(ctx)? == b'}' {
            ctx.cursor += 1;
            return self.fill_defaults(ctx, out, seen);
        }
        let strict = self.strict || ctx.disallow_unknown;
        loop {
            let key = intrinsics::read_string(ctx)?;
            intrinsics::expect(ctx, b':', "`:` after object key")?;
            match self.lookup(ctx, &key) {
                Some(i) => {
                    let f = &self.fields[i];
                    let at = unsafe { out.add(f.offset) };
                    if seen[i] {
                        // Duplicate key: release the earlier value first.
                        drop_at(f.shape, at);
                        seen[i] = false;
                    }
                    f.node.decode(ctx, at)?;
                    seen[i] = true;
                }
                None => {
                    if strict {
                        let name = key.into_string(ctx);
                        return Err(ctx.err(ErrorKind::UnknownField(name)));
                    }
                    intrinsics::skip_value(ctx)?;
                }
            }
            if intrinsics::comma_or_close(ctx, b'}')? {
                break;
            }
        }
        self.fill_defaults(ctx, out, seen)
    }

    fn fill_defaults(
        &self,
        ctx: &DeserContext,
        out: *mut u8,
        seen: &mut [bool],
    ) -> Result<(), Error> {
        for (i, f) in self.fields.iter().enumerate() {
            if seen[i] {
                continue;
            }
            let at = unsafe { out.add(f.offset) };
            let filled = match f.default {
                Some(DefaultSource::Custom(init)) => {
                    unsafe { init(PtrUninit::new(at)) };
                    true
                }
                Some(DefaultSource::FromTrait) => unsafe {
                    f.shape.call_default_in_place(PtrMut::new(at)).is_some()
                },
                None => f.node.default_in_place(at)?,
            };
            if !filled {
                return Err(ctx.err(ErrorKind::MissingField(f.name)));
            }
            seen[i] = true;
        }
        Ok(())
    }

    fn lookup(&self, ctx: &DeserContext, key: &Text) -> Option<usize> {
        let bytes: &[u8] = match key {
            Text::Range(s, e) => ctx.slice(*s, *e),
            Text::Owned(s) => s.as_bytes(),
        };
        // Ranges were UTF-8 validated by the scanner.
        let key_str = unsafe { std::str::from_utf8_unchecked(bytes) };
        if let Some(&i) = self.index.get(key_str) {
            return Some(i);
        }
        let folded = key_str.to_ascii_lowercase();
        self.index.get(folded.as_str()).copied()
    }
}

impl SliceNode {
    fn decode(&self, ctx: &mut DeserContext, out: *mut u8) -> Result<(), Error> {
        if intrinsics::try_null(ctx)? {
            self.write_empty(out);
            return Ok(());
        }
        intrinsics::expect(ctx, b'[', "array")?;
        if intrinsics::peek(ctx)? == b']' {
            ctx.cursor += 1;
            self.write_empty(out);
            return Ok(());
        }

        let esize = self.elem_layout.size();
        if esize == 0 {
            // Zero-sized elements: count them, no backing buffer.
            let mut len = 0usize;
            loop {
                self.elem.decode(ctx, self.elem_layout.align() as *mut u8)?;
                len += 1;
                if intrinsics::comma_or_close(ctx, b']')? {
                    break;
                }
            }
            unsafe {
                malum::write_parts(out, &self.off, self.elem_layout.align() as *mut u8, len, 0)
            };
            return Ok(());
        }

        // Grow the backing buffer by doubling, decoding elements in place.
        let mut cap = 4usize;
        let mut data = unsafe { alloc_array(self.elem_layout, cap) };
        let mut len = 0usize;
        let result = loop {
            if len == cap {
                data = unsafe { grow_array(data, self.elem_layout, cap, cap * 2) };
                cap *= 2;
            }
            if let Err(e) = self.elem.decode(ctx, unsafe { data.add(len * esize) }) {
                break Err(e);
            }
            len += 1;
            match intrinsics::comma_or_close(ctx, b']') {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
        };
        match result {
            Ok(()) => {
                unsafe { malum::write_parts(out, &self.off, data, len, cap) };
                Ok(())
            }
            Err(e) => {
                for i in 0..len {
                    drop_at(self.elem_shape, unsafe { data.add(i * esize) });
                }
                unsafe { dealloc_array(data, self.elem_layout, cap) };
                Err(e)
            }
        }
    }

    fn write_empty(&self, out: *mut u8) {
        let dangling = self.elem_layout.align() as *mut u8;
        unsafe { malum::write_parts(out, &self.off, dangling, 0, 0) };
    }
}

impl ArrayNode {
    fn decode(&self, ctx: &mut DeserContext, out: *mut u8) -> Result<(), Error> {
        if intrinsics::try_null(ctx)? {
            return self.fill_rest(ctx, out, 0);
        }
        intrinsics::expect(ctx, b'[', "array")?;
        if intrinsics::peek(ctx)? == b']' {
            ctx.cursor += 1;
            return self.fill_rest(ctx, out, 0);
        }
        let mut filled = 0usize;
        loop {
            if filled < self.len {
                let at = unsafe { out.add(filled * self.stride) };
                if let Err(e) = self.elem.decode(ctx, at) {
                    self.drop_prefix(out, filled);
                    return Err(e);
                }
                filled += 1;
            } else {
                // Input elements past the declared length are ignored.
                if let Err(e) = intrinsics::skip_value(ctx) {
                    self.drop_prefix(out, filled);
                    return Err(e);
                }
            }
            match intrinsics::comma_or_close(ctx, b']') {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.drop_prefix(out, filled);
                    return Err(e);
                }
            }
        }
        self.fill_rest(ctx, out, filled)
    }

    /// Default-fill positions `[from, len)`, rolling back on failure.
    fn fill_rest(&self, ctx: &DeserContext, out: *mut u8, from: usize) -> Result<(), Error> {
        for i in from..self.len {
            match self.elem.default_in_place(unsafe { out.add(i * self.stride) }) {
                Ok(true) => {}
                Ok(false) => {
                    self.drop_prefix(out, i);
                    return Err(ctx.err(ErrorKind::MissingField(self.elem_shape.type_identifier)));
                }
                Err(e) => {
                    self.drop_prefix(out, i);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn drop_prefix(&self, out: *mut u8, upto: usize) {
        for i in 0..upto {
            drop_at(self.elem_shape, unsafe { out.add(i * self.stride) });
        }
    }
}

impl MapNode {
    fn decode(&self, ctx: &mut DeserContext, out: *mut u8) -> Result<(), Error> {
        let init = self.def.vtable.init_in_place_with_capacity_fn;
        if intrinsics::try_null(ctx)? {
            unsafe { init(PtrUninit::new(out), 0) };
            return Ok(());
        }
        intrinsics::expect(ctx, b'{', "object")?;
        let map_ptr = unsafe { init(PtrUninit::new(out), 0) };
        if intrinsics::peek(ctx)? == b'}' {
            ctx.cursor += 1;
            return Ok(());
        }
        let vsize = self.value_layout.size();
        let scratch = if vsize == 0 {
            self.value_layout.align() as *mut u8
        } else {
            unsafe { std::alloc::alloc(self.value_layout) }
        };
        if vsize != 0 && scratch.is_null() {
            std::alloc::handle_alloc_error(self.value_layout);
        }
        let result = loop {
            let key = match intrinsics::read_string(ctx) {
                Ok(t) => t.into_string(ctx),
                Err(e) => break Err(e),
            };
            if let Err(e) = intrinsics::expect(ctx, b':', "`:` after object key") {
                break Err(e);
            }
            if let Err(e) = self.value.decode(ctx, scratch) {
                break Err(e);
            }
            // Both key and value are moved out of by the insert hook.
            let mut key = ManuallyDrop::new(key);
            unsafe {
                (self.def.vtable.insert_fn)(
                    map_ptr,
                    PtrMut::new(&mut *key as *mut String),
                    PtrMut::new(scratch),
                );
            }
            match intrinsics::comma_or_close(ctx, b'}') {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
        };
        if vsize != 0 {
            unsafe { std::alloc::dealloc(scratch, self.value_layout) };
        }
        if result.is_err() {
            drop_at(self.map_shape, out);
        }
        result
    }
}

impl OptionalNode {
    fn decode(&self, ctx: &mut DeserContext, out: *mut u8) -> Result<(), Error> {
        if intrinsics::try_null(ctx)? {
            unsafe { (self.def.vtable.init_none_fn)(PtrUninit::new(out)) };
            return Ok(());
        }
        let esize = self.elem_layout.size();
        let scratch = if esize == 0 {
            self.elem_layout.align() as *mut u8
        } else {
            unsafe { std::alloc::alloc(self.elem_layout) }
        };
        if esize != 0 && scratch.is_null() {
            std::alloc::handle_alloc_error(self.elem_layout);
        }
        let result = self.elem.decode(ctx, scratch);
        if result.is_ok() {
            // init_some moves the payload out of scratch.
            unsafe {
                (self.def.vtable.init_some_fn)(PtrUninit::new(out), PtrMut::new(scratch));
            }
        }
        if esize != 0 {
            unsafe { std::alloc::dealloc(scratch, self.elem_layout) };
        }
        result
    }
}

// ── Dynamic values ───────────────────────────────────────────────────

/// Decode one value of unknown shape, dispatching on the first
/// non-whitespace byte.
pub(crate) fn read_value(ctx: &mut DeserContext) -> Result<Value, Error> {
    match intrinsics::peek(ctx)? {
        b'{' => {
            ctx.cursor += 1;
            let mut pairs = Vec::new();
            if intrinsics::peek(ctx)? == b'}' {
                ctx.cursor += 1;
                return Ok(Value::Object(pairs));
            }
            loop {
                let key = intrinsics::read_string(ctx)?.into_string(ctx);
                intrinsics::expect(ctx, b':', "`:` after object key")?;
                let v = read_value(ctx)?;
                pairs.push((key, v));
                if intrinsics::comma_or_close(ctx, b'}')? {
                    return Ok(Value::Object(pairs));
                }
            }
        }
        b'[' => {
            ctx.cursor += 1;
            let mut items = Vec::new();
            if intrinsics::peek(ctx)? == b']' {
                ctx.cursor += 1;
                return Ok(Value::Array(items));
            }
            loop {
                items.push(read_value(ctx)?);
                if intrinsics::comma_or_close(ctx, b']')? {
                    return Ok(Value::Array(items));
                }
            }
        }
        b'"' => {
            let text = intrinsics::read_string(ctx)?;
            Ok(Value::Str(text.into_string(ctx)))
        }
        b't' | b'f' => Ok(Value::Bool(intrinsics::read_bool(ctx)?)),
        b'n' => {
            intrinsics::expect_literal(ctx, b"null", "null")?;
            Ok(Value::Null)
        }
        b'-' | b'0'..=b'9' => {
            let (s, e) = intrinsics::number_token(ctx)?;
            if ctx.use_number {
                let lit = unsafe { std::str::from_utf8_unchecked(ctx.slice(s, e)) }.to_owned();
                Ok(Value::NumberLit(Number::from_literal(lit)))
            } else {
                Ok(Value::Num(intrinsics::float_value(ctx, s, e)?))
            }
        }
        c if c == crate::context::NUL && ctx.at_sentinel() => {
            Err(ctx.err(ErrorKind::UnexpectedEof))
        }
        c => Err(ctx.err(ErrorKind::UnexpectedToken {
            expected: "value",
            found: c,
        })),
    }
}

// ── Raw buffer management for slice decoding ─────────────────────────

unsafe fn alloc_array(elem: Layout, cap: usize) -> *mut u8 {
    let layout = array_layout(elem, cap);
    let ptr = unsafe { std::alloc::alloc(layout) };
    if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
    }
    ptr
}

unsafe fn grow_array(ptr: *mut u8, elem: Layout, old_cap: usize, new_cap: usize) -> *mut u8 {
    let old = array_layout(elem, old_cap);
    let new = array_layout(elem, new_cap);
    let grown = unsafe { std::alloc::realloc(ptr, old, new.size()) };
    if grown.is_null() {
        std::alloc::handle_alloc_error(new);
    }
    grown
}

unsafe fn dealloc_array(ptr: *mut u8, elem: Layout, cap: usize) {
    unsafe { std::alloc::dealloc(ptr, array_layout(elem, cap)) };
}

/// Same layout `Vec` would use for this capacity, so the assembled `Vec`
/// frees it correctly.
fn array_layout(elem: Layout, cap: usize) -> Layout {
    let size = elem
        .size()
        .checked_mul(cap)
        .expect("slice capacity overflow");
    Layout::from_size_align(size, elem.align()).expect("invalid slice layout")
}

/// Store the low `width` bytes of a 64-bit pattern.
pub(crate) unsafe fn write_int(out: *mut u8, bits: u64, width: u8) {
    unsafe {
        match width {
            1 => out.write(bits as u8),
            2 => (out as *mut u16).write(bits as u16),
            4 => (out as *mut u32).write(bits as u32),
            _ => (out as *mut u64).write(bits),
        }
    }
}
