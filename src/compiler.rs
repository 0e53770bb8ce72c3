//! The one-time type walk: turns a `facet` shape into a decode node tree
//! or an encode recipe, and memoizes the result by type identity.
//!
//! Compilation is idempotent, so the caches tolerate racing compiles:
//! whoever publishes first wins, losers drop their copy. Errors are never
//! cached. The locks guard map access only, never a compile.

use std::alloc::Layout;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use facet::{
    Def, Field, FieldFlags, OxPtrConst, OxPtrMut, PtrConst, PtrMut, ScalarType, Shape,
    StructKind, StructType, Type, UserType, VTableErased,
};

use crate::decode::{ArrayNode, FieldDec, MapNode, Node, OptionalNode, RecordNode, SliceNode};
use crate::intrinsics::write_escaped;
use crate::malum;
use crate::recipe::{Empty, Op, Recipe, RecipeBuilder, Width};
use crate::value::{Number, Value};
use crate::{Error, ErrorKind};

static DECODERS: OnceLock<RwLock<HashMap<TypeId, &'static Node>>> = OnceLock::new();
static ENCODERS: OnceLock<RwLock<HashMap<(TypeId, bool), &'static Recipe>>> = OnceLock::new();

/// The decode program for a shape, compiling and publishing on first use.
pub(crate) fn decoder_for(shape: &'static Shape) -> Result<&'static Node, Error> {
    let cache = DECODERS.get_or_init(|| RwLock::new(HashMap::new()));
    let key = shape.id.get();
    if let Some(&node) = cache.read().unwrap().get(&key) {
        return Ok(node);
    }
    log::trace!("compiling decode program for {}", shape.type_identifier);
    let mut stack = Vec::new();
    let node = compile_decode(shape, &mut stack)?;
    let fresh: &'static Node = Box::leak(Box::new(node));
    let mut map = cache.write().unwrap();
    Ok(*map.entry(key).or_insert(fresh))
}

/// The encode program for a `(shape, indent)` pair.
pub(crate) fn encoder_for(shape: &'static Shape, indent: bool) -> Result<&'static Recipe, Error> {
    let cache = ENCODERS.get_or_init(|| RwLock::new(HashMap::new()));
    let key = (shape.id.get(), indent);
    if let Some(&recipe) = cache.read().unwrap().get(&key) {
        return Ok(recipe);
    }
    log::trace!(
        "compiling encode program for {} (indent={indent})",
        shape.type_identifier
    );
    let mut builder = RecipeBuilder::new(indent);
    let mut stack = Vec::new();
    compile_encode(shape, &mut builder, 0, &mut stack)?;
    let fresh: &'static Recipe = Box::leak(Box::new(builder.finish()));
    let mut map = cache.write().unwrap();
    Ok(*map.entry(key).or_insert(fresh))
}

// ── Decode compilation ───────────────────────────────────────────────

fn compile_decode(shape: &'static Shape, stack: &mut Vec<TypeId>) -> Result<Node, Error> {
    let key = shape.id.get();
    if stack.contains(&key) {
        return Ok(Node::ByShape { shape });
    }
    if key == TypeId::of::<Value>() {
        return Ok(Node::Dyn);
    }
    if key == TypeId::of::<Number>() {
        return Ok(Node::NumberLit);
    }

    if let Some(st) = shape.scalar_type() {
        match st {
            ScalarType::Bool => return Ok(Node::Bool),
            ScalarType::Unit => return Ok(Node::Unit),
            ScalarType::Char => return Ok(Node::Char),
            ScalarType::String => return Ok(Node::Str),
            ScalarType::U8 | ScalarType::I8 => return Ok(Node::Int { width: 1 }),
            ScalarType::U16 | ScalarType::I16 => return Ok(Node::Int { width: 2 }),
            ScalarType::U32 | ScalarType::I32 => return Ok(Node::Int { width: 4 }),
            ScalarType::U64 | ScalarType::I64 => return Ok(Node::Int { width: 8 }),
            ScalarType::USize | ScalarType::ISize => {
                return Ok(Node::Int {
                    width: std::mem::size_of::<usize>() as u8,
                })
            }
            ScalarType::U128 | ScalarType::I128 => return Ok(Node::Int128),
            ScalarType::F32 => return Ok(Node::Float { wide: false }),
            ScalarType::F64 => return Ok(Node::Float { wide: true }),
            // str / Cow<str> would borrow from the input buffer, which the
            // pool hygiene rules forbid; other scalars go through the
            // custom text hook below.
            _ => {}
        }
    }

    if let Def::Option(def) = shape.def {
        let inner = def.t();
        stack.push(key);
        let elem = compile_decode(inner, stack);
        stack.pop();
        return Ok(Node::Optional(OptionalNode {
            elem: Box::new(elem?),
            elem_layout: sized_layout(inner)?,
            def,
        }));
    }
    if let Def::List(def) = shape.def {
        let elem_shape = def.t();
        stack.push(key);
        let elem = compile_decode(elem_shape, stack);
        stack.pop();
        return Ok(Node::Slice(SliceNode {
            elem: Box::new(elem?),
            elem_shape,
            elem_layout: sized_layout(elem_shape)?,
            off: malum::discover_vec_offsets(&def, shape)?,
        }));
    }
    if let Def::Array(def) = shape.def {
        let elem_shape = def.t();
        stack.push(key);
        let elem = compile_decode(elem_shape, stack);
        stack.pop();
        return Ok(Node::Array(ArrayNode {
            elem: Box::new(elem?),
            elem_shape,
            stride: sized_layout(elem_shape)?.size(),
            len: def.n,
        }));
    }
    if let Def::Map(def) = shape.def {
        if def.k.scalar_type() != Some(ScalarType::String) {
            return Err(Error::unsupported(shape.type_identifier));
        }
        let value_shape = def.v;
        stack.push(key);
        let value = compile_decode(value_shape, stack);
        stack.pop();
        return Ok(Node::Map(MapNode {
            value: Box::new(value?),
            value_layout: sized_layout(value_shape)?,
            map_shape: shape,
            def,
        }));
    }

    if let Type::User(UserType::Struct(st)) = &shape.ty {
        if shape.is_transparent() {
            if let Some(f) = st.fields.first() {
                debug_assert_eq!(f.offset, 0, "transparent wrapper field not at offset 0");
                return compile_decode(f.shape(), stack);
            }
        }
        match st.kind {
            StructKind::Struct | StructKind::Unit => {
                stack.push(key);
                let rec = compile_record(shape, st, stack);
                stack.pop();
                return rec.map(Node::Record);
            }
            _ => return Err(Error::unsupported(shape.type_identifier)),
        }
    }

    // Custom text codec: anything carrying both vtable hooks round-trips
    // through a JSON string.
    if shape.vtable.has_parse() && shape.vtable.has_display() {
        return Ok(Node::Parse { shape });
    }

    Err(Error::unsupported(shape.type_identifier))
}

fn compile_record(
    shape: &'static Shape,
    st: &StructType,
    stack: &mut Vec<TypeId>,
) -> Result<RecordNode, Error> {
    let mut fields: Vec<FieldDec> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for f in st.fields {
        let fshape = f.shape();
        if f.flags.contains(FieldFlags::SKIP) || f.flags.contains(FieldFlags::SKIP_DESERIALIZING)
        {
            // Not reachable from input, but the destination bytes still
            // need a value.
            fields.push(FieldDec {
                name: f.name,
                offset: f.offset,
                shape: fshape,
                node: Node::DefaultOnly { shape: fshape },
                default: f.default,
            });
            continue;
        }
        let mut node = compile_decode(fshape, stack)?;
        if string_coerced(f) {
            node = quote_wrap(node, shape)?;
        }
        let serialized = f.rename.unwrap_or(f.name);
        let pos = fields.len();
        fields.push(FieldDec {
            name: serialized,
            offset: f.offset,
            shape: fshape,
            node,
            default: f.default,
        });
        // Three entries per field: declared name, serialized name, and
        // the case-folded serialized name. First insertion wins, so
        // collisions resolve in declaration order.
        index.entry(f.name.to_owned()).or_insert(pos);
        index.entry(serialized.to_owned()).or_insert(pos);
        index.entry(serialized.to_ascii_lowercase()).or_insert(pos);
        if let Some(alias) = f.alias {
            index.entry(alias.to_owned()).or_insert(pos);
        }
    }
    Ok(RecordNode {
        fields,
        index,
        strict: shape.has_deny_unknown_fields_attr(),
    })
}

/// The `string` option applies to primitives only.
fn quote_wrap(node: Node, record: &'static Shape) -> Result<Node, Error> {
    match node {
        Node::Int { .. } | Node::Int128 | Node::Float { .. } | Node::Bool => {
            Ok(Node::Quoted(Box::new(node)))
        }
        _ => Err(Error::unsupported(record.type_identifier)),
    }
}

fn string_coerced(f: &Field) -> bool {
    f.has_attr(Some("json"), "string")
}

fn omit_empty(f: &Field) -> bool {
    f.has_attr(Some("json"), "omit_empty")
}

// ── Encode compilation ───────────────────────────────────────────────

fn compile_encode(
    shape: &'static Shape,
    b: &mut RecipeBuilder,
    offset: u32,
    stack: &mut Vec<TypeId>,
) -> Result<(), Error> {
    let key = shape.id.get();
    if stack.contains(&key) {
        b.push(Op::Nested { offset, shape });
        return Ok(());
    }
    if key == TypeId::of::<Value>() {
        b.push(Op::DynValue {
            offset,
            nl: b.indent(),
        });
        return Ok(());
    }
    if key == TypeId::of::<Number>() {
        b.push(Op::NumberLit { offset });
        return Ok(());
    }

    if let Some(st) = shape.scalar_type() {
        match st {
            ScalarType::Bool => {
                b.push(Op::Bool { offset });
                return Ok(());
            }
            ScalarType::Unit => {
                b.push(Op::Lit(Box::from(&b"null"[..])));
                return Ok(());
            }
            ScalarType::Char => {
                b.push(Op::Char { offset });
                return Ok(());
            }
            ScalarType::String => {
                b.push(Op::Str { offset });
                return Ok(());
            }
            ScalarType::U8 | ScalarType::U16 | ScalarType::U32 | ScalarType::U64
            | ScalarType::USize => {
                b.push(Op::Int {
                    offset,
                    width: scalar_width(st),
                    signed: false,
                });
                return Ok(());
            }
            ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64
            | ScalarType::ISize => {
                b.push(Op::Int {
                    offset,
                    width: scalar_width(st),
                    signed: true,
                });
                return Ok(());
            }
            ScalarType::U128 => {
                b.push(Op::Int128 {
                    offset,
                    signed: false,
                });
                return Ok(());
            }
            ScalarType::I128 => {
                b.push(Op::Int128 {
                    offset,
                    signed: true,
                });
                return Ok(());
            }
            ScalarType::F32 => {
                b.push(Op::Float {
                    offset,
                    wide: false,
                });
                return Ok(());
            }
            ScalarType::F64 => {
                b.push(Op::Float { offset, wide: true });
                return Ok(());
            }
            _ => {}
        }
    }

    if let Def::Option(def) = shape.def {
        let inner = def.t();
        let end = b.label();
        b.push(Op::OptionHead { offset, def, end });
        stack.push(key);
        let body = compile_encode(inner, b, 0, stack);
        stack.pop();
        body?;
        b.push(Op::BaseEnd);
        b.bind(end);
        return Ok(());
    }
    if let Def::List(def) = shape.def {
        let elem_shape = def.t();
        let stride = sized_layout(elem_shape)?.size() as u32;
        let off = malum::discover_vec_offsets(&def, shape)?;
        let end = b.label();
        let body = b.label();
        b.push(Op::SliceHead {
            offset,
            stride,
            off,
            end,
            nl: b.indent(),
        });
        b.bind(body);
        stack.push(key);
        let elem = compile_encode(elem_shape, b, 0, stack);
        stack.pop();
        elem?;
        b.push(Op::SeqNext {
            body,
            nl: b.indent(),
        });
        b.bind(end);
        return Ok(());
    }
    if let Def::Array(def) = shape.def {
        let elem_shape = def.t();
        let stride = sized_layout(elem_shape)?.size() as u32;
        let end = b.label();
        let body = b.label();
        b.push(Op::ArrayHead {
            offset,
            stride,
            len: def.n as u32,
            end,
            nl: b.indent(),
        });
        b.bind(body);
        stack.push(key);
        let elem = compile_encode(elem_shape, b, 0, stack);
        stack.pop();
        elem?;
        b.push(Op::SeqNext {
            body,
            nl: b.indent(),
        });
        b.bind(end);
        return Ok(());
    }
    if let Def::Map(def) = shape.def {
        if def.k.scalar_type() != Some(ScalarType::String) {
            return Err(Error::unsupported(shape.type_identifier));
        }
        let end = b.label();
        let body = b.label();
        b.push(Op::MapHead {
            offset,
            def,
            end,
            nl: b.indent(),
        });
        b.bind(body);
        stack.push(key);
        let value = compile_encode(def.v, b, 0, stack);
        stack.pop();
        value?;
        b.push(Op::SeqNext {
            body,
            nl: b.indent(),
        });
        b.bind(end);
        return Ok(());
    }

    if let Type::User(UserType::Struct(st)) = &shape.ty {
        if shape.is_transparent() {
            if let Some(f) = st.fields.first() {
                return compile_encode(f.shape(), b, offset + f.offset as u32, stack);
            }
        }
        match st.kind {
            StructKind::Struct | StructKind::Unit => {
                stack.push(key);
                let rec = compile_record_encode(shape, st, b, offset, stack);
                stack.pop();
                return rec;
            }
            _ => return Err(Error::unsupported(shape.type_identifier)),
        }
    }

    if shape.vtable.has_display() && shape.vtable.has_parse() {
        b.push(Op::DisplayScalar { offset, shape });
        return Ok(());
    }

    Err(Error::unsupported(shape.type_identifier))
}

fn compile_record_encode(
    _shape: &'static Shape,
    st: &StructType,
    b: &mut RecipeBuilder,
    offset: u32,
    stack: &mut Vec<TypeId>,
) -> Result<(), Error> {
    let nl = b.indent();
    b.push(Op::ObjOpen);
    for f in st.fields {
        if f.flags.contains(FieldFlags::SKIP) || f.flags.contains(FieldFlags::SKIP_SERIALIZING) {
            continue;
        }
        let fshape = f.shape();
        let field_offset = offset + f.offset as u32;
        let serialized = f.rename.unwrap_or(f.name);

        let mut key = Vec::new();
        write_escaped(&mut key, serialized, false);
        key.push(b':');
        if nl {
            key.push(b' ');
        }

        let check = if let Some(pred) = f.skip_serializing_if {
            Some(Empty::Predicate(pred))
        } else if omit_empty(f) {
            empty_check(fshape)?
        } else {
            None
        };

        let skip = b.label();
        b.push(Op::FieldKey {
            offset: field_offset,
            key: key.into_boxed_slice(),
            check,
            skip_to: skip,
            nl,
        });
        if string_coerced(f) {
            b.push(Op::Lit(Box::from(&b"\""[..])));
            compile_encode(fshape, b, field_offset, stack)?;
            b.push(Op::Lit(Box::from(&b"\""[..])));
        } else {
            compile_encode(fshape, b, field_offset, stack)?;
        }
        b.bind(skip);
    }
    b.push(Op::ObjClose { nl });
    Ok(())
}

/// Zero-value check for `omit_empty`, per the field's shape. Records and
/// fixed arrays are never empty.
fn empty_check(shape: &'static Shape) -> Result<Option<Empty>, Error> {
    if shape.id.get() == TypeId::of::<Value>() {
        return Ok(Some(Empty::Dyn));
    }
    if shape.id.get() == TypeId::of::<Number>() {
        return Ok(Some(Empty::Number));
    }
    if let Some(st) = shape.scalar_type() {
        let check = match st {
            ScalarType::Bool | ScalarType::Char => Some(Empty::ZeroBytes {
                size: sized_layout(shape)?.size() as u8,
            }),
            ScalarType::String => Some(Empty::Str),
            ScalarType::F32 => Some(Empty::Float { wide: false }),
            ScalarType::F64 => Some(Empty::Float { wide: true }),
            ScalarType::U8
            | ScalarType::U16
            | ScalarType::U32
            | ScalarType::U64
            | ScalarType::U128
            | ScalarType::USize
            | ScalarType::I8
            | ScalarType::I16
            | ScalarType::I32
            | ScalarType::I64
            | ScalarType::I128
            | ScalarType::ISize => Some(Empty::ZeroBytes {
                size: sized_layout(shape)?.size() as u8,
            }),
            _ => None,
        };
        return Ok(check);
    }
    if let Def::Option(def) = shape.def {
        return Ok(Some(Empty::Option { def }));
    }
    if let Def::List(def) = shape.def {
        return Ok(Some(Empty::Slice {
            off: malum::discover_vec_offsets(&def, shape)?,
        }));
    }
    if let Def::Map(def) = shape.def {
        return Ok(Some(Empty::Map { def }));
    }
    Ok(None)
}

fn scalar_width(st: ScalarType) -> Width {
    match st {
        ScalarType::U8 | ScalarType::I8 => Width::W1,
        ScalarType::U16 | ScalarType::I16 => Width::W2,
        ScalarType::U32 | ScalarType::I32 => Width::W4,
        ScalarType::USize | ScalarType::ISize => {
            if std::mem::size_of::<usize>() == 4 {
                Width::W4
            } else {
                Width::W8
            }
        }
        _ => Width::W8,
    }
}

fn sized_layout(shape: &'static Shape) -> Result<Layout, Error> {
    shape
        .layout
        .sized_layout()
        .map_err(|_| Error::unsupported(shape.type_identifier))
}

// ── Custom text codec shims ──────────────────────────────────────────

/// Parse a string payload into `out` through the shape's vtable hook.
pub(crate) fn call_parse(
    shape: &'static Shape,
    s: &str,
    out: *mut u8,
) -> Result<(), ErrorKind> {
    match shape.vtable {
        VTableErased::Direct(vt) => {
            let parse = vt
                .parse
                .ok_or(ErrorKind::UnsupportedType(shape.type_identifier))?;
            unsafe { parse(s, out as *mut ()) }.map_err(|_| ErrorKind::StringSyntax)
        }
        VTableErased::Indirect(vt) => {
            let parse = vt
                .parse
                .ok_or(ErrorKind::UnsupportedType(shape.type_identifier))?;
            match unsafe { parse(s, OxPtrMut::new(PtrMut::new(out), shape)) } {
                Some(Ok(())) => Ok(()),
                Some(Err(_)) => Err(ErrorKind::StringSyntax),
                None => Err(ErrorKind::UnsupportedType(shape.type_identifier)),
            }
        }
    }
}

/// Render a value through the shape's vtable `display` hook.
pub(crate) fn call_display(shape: &'static Shape, ptr: *const u8) -> Result<String, ErrorKind> {
    use std::fmt::{self, Write};

    struct Shim {
        ptr: *const u8,
        shape: &'static Shape,
    }
    impl fmt::Display for Shim {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.shape.vtable {
                VTableErased::Direct(vt) => match vt.display {
                    Some(display) => unsafe { display(self.ptr as *const (), f) },
                    None => Err(fmt::Error),
                },
                VTableErased::Indirect(vt) => match vt.display {
                    Some(display) => unsafe {
                        display(
                            OxPtrConst::new(PtrConst::new(self.ptr), self.shape),
                            f,
                        )
                    }
                    .unwrap_or(Err(fmt::Error)),
                    None => Err(fmt::Error),
                },
            }
        }
    }

    let mut text = String::new();
    write!(text, "{}", Shim { ptr, shape })
        .map_err(|_| ErrorKind::UnsupportedType(shape.type_identifier))?;
    Ok(text)
}
